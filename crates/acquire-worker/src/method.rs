//! Per-method configuration shared by every worker running that method.

use std::cell::OnceCell;

use serde::Serialize;

use crate::bridge::protocol::{Message, tag};

/// Feature flags a method announces in its 100 Capabilities message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Capabilities {
    pub version: String,
    /// Only one instance of the method may run at a time.
    pub single_instance: bool,
    /// The method accepts further 600 requests before the current one is done.
    pub pipeline: bool,
    /// The method wants a 601 Configuration message after startup.
    pub send_config: bool,
    /// The method only reaches local resources (file, cdrom).
    pub local_only: bool,
}

impl Capabilities {
    pub fn from_message(message: &Message) -> Self {
        Self {
            version: message.tag_or(tag::VERSION, "").to_string(),
            single_instance: message.tag_bool(tag::SINGLE_INSTANCE, false),
            pipeline: message.tag_bool(tag::PIPELINE, false),
            send_config: message.tag_bool(tag::SEND_CONFIG, false),
            local_only: message.tag_bool(tag::LOCAL_ONLY, false),
        }
    }
}

/// Method name plus its capabilities, negotiated once.
#[derive(Debug)]
pub struct MethodConfig {
    access: String,
    capabilities: OnceCell<Capabilities>,
}

impl MethodConfig {
    pub fn new(access: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            capabilities: OnceCell::new(),
        }
    }

    /// Method name, e.g. `http`. Also the executable name in the methods directory.
    pub fn access(&self) -> &str {
        &self.access
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.get()
    }

    pub fn is_negotiated(&self) -> bool {
        self.capabilities.get().is_some()
    }

    /// Record capabilities. Returns `false` if they were already recorded, in
    /// which case `caps` is discarded.
    pub fn negotiate(&self, caps: Capabilities) -> bool {
        self.capabilities.set(caps).is_ok()
    }

    pub fn send_config(&self) -> bool {
        self.capabilities().is_some_and(|c| c.send_config)
    }
}
