//! Hierarchical configuration tree.
//!
//! Keys are `::`-separated paths (`Dir::Bin::Methods`). Every node keeps its
//! children in insertion order, and [`Configuration::iter`] walks the tree in
//! pre-order, which is the order the worker pushes items to a method.

pub mod quote;

use std::path::{Path, PathBuf};

use crate::bridge::protocol::{string_to_bool, tag};

const SEPARATOR: &str = "::";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("top-level configuration must be a JSON object")]
    NotAnObject,
    #[error("invalid override '{0}', expected Key=Value")]
    InvalidOverride(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    tag: String,
    value: String,
    children: Vec<Node>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    fn child(&self, tag: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.tag.eq_ignore_ascii_case(tag))
    }

    /// Find or create the child named `tag`. An empty tag always appends,
    /// which is how list entries are stored.
    fn child_mut(&mut self, tag: &str) -> &mut Node {
        let existing = if tag.is_empty() {
            None
        } else {
            self.children
                .iter()
                .position(|c| c.tag.eq_ignore_ascii_case(tag))
        };
        let index = match existing {
            Some(index) => index,
            None => {
                self.children.push(Node::new(tag));
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    /// Walk or create a `::`-separated path below this node.
    fn path_mut(&mut self, key: &str) -> &mut Node {
        let mut node = self;
        for part in key.split(SEPARATOR) {
            node = node.child_mut(part);
        }
        node
    }
}

/// Ordered configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    root: Node,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, creating intermediate nodes as needed.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.root.path_mut(key).value = value.into();
    }

    /// Apply a `Key=Value` override, as given on a command line.
    pub fn set_override(&mut self, spec: &str) -> Result<(), ConfigError> {
        let (key, value) = spec
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .ok_or_else(|| ConfigError::InvalidOverride(spec.to_string()))?;
        self.set(key, value);
        Ok(())
    }

    fn lookup(&self, key: &str) -> Option<(&Node, Option<&Node>)> {
        let mut parent = None;
        let mut node = &self.root;
        for part in key.split(SEPARATOR) {
            let next = node.child(part)?;
            parent = Some(node);
            node = next;
        }
        Some((node, parent.filter(|p| !std::ptr::eq(*p, &self.root))))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Value stored at `key`; empty values count as unset.
    pub fn find(&self, key: &str) -> Option<&str> {
        self.lookup(key)
            .map(|(node, _)| node.value.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn find_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.find(key).unwrap_or(default)
    }

    pub fn find_bool(&self, key: &str, default: bool) -> bool {
        self.find(key)
            .map_or(default, |v| string_to_bool(v, default))
    }

    /// Resolve a file name. Relative values are taken relative to the value of
    /// the parent node, so `Dir::Cache "var/cache"` under `Dir "/"` yields
    /// `/var/cache`.
    pub fn find_file(&self, key: &str, default: &str) -> PathBuf {
        let Some((node, parent)) = self.lookup(key).filter(|(n, _)| !n.value.is_empty()) else {
            return PathBuf::from(default);
        };

        let value = node.value.as_str();
        if value.starts_with('/') || value.starts_with("./") || value.starts_with("~/") {
            return PathBuf::from(value);
        }
        match parent.map(|p| p.value.as_str()).filter(|v| !v.is_empty()) {
            Some(base) => Path::new(base).join(value),
            None => PathBuf::from(value),
        }
    }

    /// Like [`find_file`](Self::find_file), for directories.
    pub fn find_dir(&self, key: &str, default: &str) -> PathBuf {
        let mut dir = self.find_file(key, default).into_os_string();
        if !dir.to_string_lossy().ends_with('/') {
            dir.push("/");
        }
        PathBuf::from(dir)
    }

    /// Pre-order walk over every node with a non-empty value, yielding the
    /// full `::`-joined key and the raw value.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stack: vec![(String::new(), self.root.children.iter())],
        }
    }

    /// Build a tree from JSON. Objects become subtrees, arrays become list
    /// entries with empty tags, scalars become values.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let serde_json::Value::Object(map) = value else {
            return Err(ConfigError::NotAnObject);
        };
        let mut config = Self::new();
        for (key, value) in map {
            merge_json(config.root.path_mut(key), value);
        }
        Ok(config)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&value)
    }
}

fn merge_json(node: &mut Node, value: &serde_json::Value) {
    use serde_json::Value;

    match value {
        Value::Null => node.value.clear(),
        Value::Bool(b) => node.value = b.to_string(),
        Value::Number(n) => node.value = n.to_string(),
        Value::String(s) => node.value = s.clone(),
        Value::Array(items) => {
            for item in items {
                merge_json(node.child_mut(""), item);
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                merge_json(node.path_mut(key), value);
            }
        }
    }
}

/// Iterator returned by [`Configuration::iter`].
pub struct Iter<'a> {
    stack: Vec<(String, std::slice::Iter<'a, Node>)>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (String, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let depth = self.stack.len();
            let (prefix, siblings) = self.stack.last_mut()?;
            let Some(node) = siblings.next() else {
                self.stack.pop();
                continue;
            };

            let key = if depth == 1 {
                node.tag.clone()
            } else {
                format!("{prefix}{SEPARATOR}{}", node.tag)
            };

            if !node.children.is_empty() {
                self.stack.push((key.clone(), node.children.iter()));
            }
            if !node.value.is_empty() {
                return Some((key, node.value.as_str()));
            }
        }
    }
}

/// Parse one `Config-Item` value (`<key>=<quoted value>`) back into a pair.
/// A leading `Config-Item:` header name is accepted and stripped.
pub fn parse_config_item(line: &str) -> Option<(String, String)> {
    let line = match line.split_once(':') {
        Some((name, rest)) if name.eq_ignore_ascii_case(tag::CONFIG_ITEM) => rest.trim_start(),
        _ => line,
    };
    let (key, value) = line.split_once('=')?;
    Some((key.to_string(), quote::dequote(value)))
}
