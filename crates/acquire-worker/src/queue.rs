//! Item collaborators: the queue that owns pending fetches and the items
//! that receive lifecycle hooks.
//!
//! A worker never holds an item directly. It holds an [`ItemDesc`] (a value
//! snapshot carrying the owner's [`ItemId`]) and resolves the owner through
//! the queue each time it needs it, so removing an item from the queue can
//! never leave the worker pointing at freed bookkeeping.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use crate::bridge::protocol::Message;

/// Key of an item in its queue's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(u64);

impl ItemId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor of one URI-to-destination fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDesc {
    pub uri: String,
    pub description: String,
    pub short_desc: String,
    pub owner: ItemId,
}

/// An artifact being fetched. Receives the method's progress for its URI.
pub trait AcquireItem {
    /// Where the method writes the file.
    fn dest_file(&self) -> &Path;

    /// Extra header lines for the 600 request, each with a leading newline.
    fn custom_headers(&self) -> String {
        String::new()
    }

    fn start(&mut self, message: &Message, size: u64);

    fn done(&mut self, message: &Message, size: u64, md5_hash: &str);

    fn failed(&mut self, message: &Message);
}

pub type SharedItem = Rc<RefCell<dyn AcquireItem>>;

/// Pending fetches assigned to a worker.
pub trait ItemQueue {
    fn find_item(&self, uri: &str) -> Option<ItemDesc>;

    /// Drop the bookkeeping for `item`.
    fn item_done(&mut self, item: &ItemDesc);

    /// Resolve an owner key.
    fn owner(&self, id: ItemId) -> Option<SharedItem>;
}

pub type SharedQueue = Rc<RefCell<dyn ItemQueue>>;

/// In-memory [`ItemQueue`] keyed by [`ItemId`].
#[derive(Default)]
pub struct TableQueue {
    next_id: u64,
    pending: Vec<ItemDesc>,
    owners: HashMap<ItemId, SharedItem>,
}

impl TableQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fetch for `uri` owned by `owner`, returning its descriptor.
    pub fn enqueue(
        &mut self,
        uri: impl Into<String>,
        description: impl Into<String>,
        short_desc: impl Into<String>,
        owner: SharedItem,
    ) -> ItemDesc {
        self.next_id += 1;
        let id = ItemId(self.next_id);
        self.owners.insert(id, owner);

        let desc = ItemDesc {
            uri: uri.into(),
            description: description.into(),
            short_desc: short_desc.into(),
            owner: id,
        };
        self.pending.push(desc.clone());
        desc
    }

    pub fn pending(&self) -> &[ItemDesc] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl ItemQueue for TableQueue {
    fn find_item(&self, uri: &str) -> Option<ItemDesc> {
        self.pending.iter().find(|d| d.uri == uri).cloned()
    }

    fn item_done(&mut self, item: &ItemDesc) {
        self.pending
            .retain(|d| !(d.uri == item.uri && d.owner == item.owner));
        if !self.pending.iter().any(|d| d.owner == item.owner) {
            self.owners.remove(&item.owner);
        }
    }

    fn owner(&self, id: ItemId) -> Option<SharedItem> {
        self.owners.get(&id).cloned()
    }
}
