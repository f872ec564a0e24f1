//! Change notifications emitted by a resource store.

use crate::meta::{ObjectKey, Resource};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// One object change. `object` is the post-change snapshot (last state for
/// deletions).
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: &'static str,
    pub key: ObjectKey,
    pub event_type: EventType,
    pub object: Arc<serde_json::Value>,
}

impl WatchEvent {
    pub fn is<R: Resource>(&self) -> bool {
        self.kind == R::KIND
    }

    /// Decode the snapshot if the event is about kind `R`.
    pub fn decode<R: Resource>(&self) -> Option<R> {
        if !self.is::<R>() {
            return None;
        }
        serde_json::from_value(self.object.as_ref().clone()).ok()
    }
}

/// Source of [`WatchEvent`]s.
pub trait WatchSource: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}
