//! Shared helpers for tests that run real method subprocesses.

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::rc::Rc;

use crate::bridge::protocol::Message;
use crate::channel::MethodSpawner;
use crate::queue::{AcquireItem, ItemDesc};
use crate::status::AcquireStatus;

/// Runs method scripts through `/bin/sh` so tests never exec a file they
/// just wrote (which races with concurrent forks and fails with ETXTBSY).
pub(crate) struct ShellSpawner;

impl MethodSpawner for ShellSpawner {
    fn spawn(&self, path: &Path) -> io::Result<Child> {
        Command::new("/bin/sh")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
    }
}

pub(crate) fn write_method(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

/// Method that announces itself, then drains stdin until it is closed.
/// Its stdout stays open the whole time, so the worker never sees a
/// premature end-of-stream.
pub(crate) const IDLE_METHOD: &str =
    "printf '100 Capabilities\\nVersion: 1.0\\nSingle-Instance: true\\n\\n'\nwhile IFS= read -r _l; do :; done\n";

/// Item that records every hook call.
#[derive(Debug, Default)]
pub(crate) struct RecordingItem {
    pub dest: PathBuf,
    pub headers: String,
    pub events: Vec<String>,
}

impl RecordingItem {
    pub fn shared(dest: impl Into<PathBuf>) -> Rc<RefCell<RecordingItem>> {
        Rc::new(RefCell::new(Self {
            dest: dest.into(),
            ..Self::default()
        }))
    }
}

impl AcquireItem for RecordingItem {
    fn dest_file(&self) -> &Path {
        &self.dest
    }

    fn custom_headers(&self) -> String {
        self.headers.clone()
    }

    fn start(&mut self, _message: &Message, size: u64) {
        self.events.push(format!("start {size}"));
    }

    fn done(&mut self, _message: &Message, size: u64, md5_hash: &str) {
        self.events.push(format!("done {size} {md5_hash}"));
    }

    fn failed(&mut self, message: &Message) {
        self.events
            .push(format!("failed {}", message.tag_or("Message", "")));
    }
}

/// Status sink that records notifications and answers media changes with
/// `confirm_media`.
#[derive(Debug, Default)]
pub(crate) struct RecordingStatus {
    pub confirm_media: bool,
    pub events: Vec<String>,
}

impl AcquireStatus for RecordingStatus {
    fn fetch(&mut self, item: &ItemDesc) {
        self.events.push(format!("fetch {}", item.uri));
    }

    fn done(&mut self, item: &ItemDesc) {
        self.events.push(format!("done {}", item.uri));
    }

    fn ims_hit(&mut self, item: &ItemDesc) {
        self.events.push(format!("ims-hit {}", item.uri));
    }

    fn fail(&mut self, item: &ItemDesc) {
        self.events.push(format!("fail {}", item.uri));
    }

    fn media_change(&mut self, media: &str, drive: &str) -> bool {
        self.events.push(format!("media {media} {drive}"));
        self.confirm_media
    }
}
