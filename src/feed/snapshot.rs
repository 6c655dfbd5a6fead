use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use prost::Message;

use super::message::empty_feed_message;

/// A serialized feed message together with the time it was generated.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    pub bytes: Bytes,
    pub generated_at: DateTime<Utc>,
}

impl FeedSnapshot {
    pub fn new(bytes: impl Into<Bytes>, generated_at: DateTime<Utc>) -> Self {
        Self {
            bytes: bytes.into(),
            generated_at,
        }
    }
}

impl Default for FeedSnapshot {
    /// A header-only message, served until the first cycle publishes.
    fn default() -> Self {
        Self::new(
            empty_feed_message().encode_to_vec(),
            DateTime::<Utc>::UNIX_EPOCH,
        )
    }
}

/// Holds the latest published snapshot for one feed.
///
/// Cloning yields another handle to the same store. Snapshots are swapped
/// whole under a lock, so a reader sees either the previous or the new one.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    current: Arc<RwLock<FeedSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: FeedSnapshot) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = snapshot;
    }

    /// Bytes of the latest snapshot.
    pub fn get(&self) -> Bytes {
        self.latest().bytes
    }

    pub fn latest(&self) -> FeedSnapshot {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
