use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{FetchError, SourceError};

struct CacheEntry<R> {
    records: Vec<R>,
    last_success_at: DateTime<Utc>,
}

/// Last successfully fetched records per source key.
///
/// A failed fetch never touches the entry for its key; a successful one
/// replaces it wholesale.
pub struct SourceCache<K, R> {
    entries: HashMap<K, CacheEntry<R>>,
}

impl<K, R> SourceCache<K, R>
where
    K: Eq + Hash + Display,
    R: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Resolves the records to use for `key` this cycle.
    ///
    /// On success the fetched records are stored and returned. On failure the
    /// error is pushed onto `errors` and the previously stored records (or
    /// none) are returned instead.
    pub fn merge(
        &mut self,
        key: K,
        fetched: Result<Vec<R>, FetchError>,
        now: DateTime<Utc>,
        errors: &mut Vec<SourceError>,
    ) -> Vec<R> {
        match fetched {
            Ok(records) => {
                debug!(source = %key, records = records.len(), "Source fetch succeeded");
                self.entries.insert(
                    key,
                    CacheEntry {
                        records: records.clone(),
                        last_success_at: now,
                    },
                );
                records
            }
            Err(error) => {
                let stale = self.entries.get(&key);
                warn!(
                    source = %key,
                    error = %error,
                    stale_records = stale.map_or(0, |e| e.records.len()),
                    last_success_at = ?stale.map(|e| e.last_success_at),
                    "Source fetch failed, using last known records"
                );
                let records = stale.map(|e| e.records.clone()).unwrap_or_default();
                errors.push(SourceError::new(key.to_string(), error));
                records
            }
        }
    }

    pub fn last_success_at(&self, key: &K) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|e| e.last_success_at)
    }
}

impl<K, R> Default for SourceCache<K, R>
where
    K: Eq + Hash + Display,
    R: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
