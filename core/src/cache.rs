//! Expiration cache: memoizes the per-event expiration computation.
//!
//! RULE: The cache is keyed by the natural event key, never by row
//! position, and is only served when it covers exactly the requested key
//! set. Anything else (absent, partial, extra keys) is a miss.
//!
//! A `None` value records an orphan event that was dropped, so a cache
//! written under the drop policy still round-trips.

use crate::{
    error::PipelineResult,
    event::EventKey,
    store::PipelineStore,
    types::Hour,
};
use std::collections::HashMap;

pub trait ExpirationCache {
    /// Stable backend name for logs.
    fn name(&self) -> &'static str;

    /// Values in the order of `keys`, or None on a miss.
    fn fetch(&self, keys: &[EventKey]) -> PipelineResult<Option<Vec<Option<Hour>>>>;

    /// Replace the cache contents with `entries`.
    fn persist(&mut self, entries: &[(EventKey, Option<Hour>)]) -> PipelineResult<()>;

    fn clear(&mut self) -> PipelineResult<()>;
}

/// Structural check shared by every backend.
fn covering_values(
    entries: &HashMap<EventKey, Option<Hour>>,
    keys: &[EventKey],
) -> Option<Vec<Option<Hour>>> {
    if entries.len() != keys.len() {
        log::debug!(
            "Cache shape mismatch: {} cached entries, {} requested",
            entries.len(),
            keys.len()
        );
        return None;
    }
    keys.iter().map(|k| entries.get(k).copied()).collect()
}

/// In-process backend, used by tests and `--no-cache` runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Option<HashMap<EventKey, Option<Hour>>>,
    writes:  usize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `persist` has been called.
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl ExpirationCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn fetch(&self, keys: &[EventKey]) -> PipelineResult<Option<Vec<Option<Hour>>>> {
        Ok(self.entries.as_ref().and_then(|e| covering_values(e, keys)))
    }

    fn persist(&mut self, entries: &[(EventKey, Option<Hour>)]) -> PipelineResult<()> {
        self.entries = Some(entries.iter().cloned().collect());
        self.writes += 1;
        Ok(())
    }

    fn clear(&mut self) -> PipelineResult<()> {
        self.entries = None;
        Ok(())
    }
}

/// File-backed backend.
impl ExpirationCache for PipelineStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn fetch(&self, keys: &[EventKey]) -> PipelineResult<Option<Vec<Option<Hour>>>> {
        Ok(self
            .expiration_entries()?
            .and_then(|e| covering_values(&e, keys)))
    }

    fn persist(&mut self, entries: &[(EventKey, Option<Hour>)]) -> PipelineResult<()> {
        self.replace_expirations(entries)
    }

    fn clear(&mut self) -> PipelineResult<()> {
        self.clear_expirations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn key(user: &str, time: Hour) -> EventKey {
        EventKey {
            user_id:  user.into(),
            offer_id: "o1".into(),
            kind:     EventKind::OfferReceived,
            time,
        }
    }

    #[test]
    fn empty_cache_misses() {
        let cache = MemoryCache::new();
        assert_eq!(cache.fetch(&[key("u1", 0)]).unwrap(), None);
    }

    #[test]
    fn values_come_back_in_request_order() {
        let mut cache = MemoryCache::new();
        cache
            .persist(&[(key("u1", 0), Some(168)), (key("u2", 6), None)])
            .unwrap();
        let values = cache.fetch(&[key("u2", 6), key("u1", 0)]).unwrap();
        assert_eq!(values, Some(vec![None, Some(168)]));
    }

    #[test]
    fn different_key_set_is_a_miss() {
        let mut cache = MemoryCache::new();
        cache.persist(&[(key("u1", 0), Some(168))]).unwrap();

        assert_eq!(cache.fetch(&[key("u1", 6)]).unwrap(), None, "Same count, different key");
        assert_eq!(
            cache.fetch(&[key("u1", 0), key("u1", 6)]).unwrap(),
            None,
            "Cache is a strict subset of the request"
        );
    }

    #[test]
    fn sqlite_cache_round_trips() {
        let mut store = PipelineStore::in_memory().unwrap();
        store.migrate().unwrap();
        let entries = vec![(key("u1", 0), Some(168)), (key("u1", 200), None)];
        store.persist(&entries).unwrap();

        let keys: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(store.fetch(&keys).unwrap(), Some(vec![Some(168), None]));
    }

    #[test]
    fn sqlite_cache_without_meta_row_is_a_miss() {
        let mut store = PipelineStore::in_memory().unwrap();
        store.migrate().unwrap();
        store.persist(&[(key("u1", 0), Some(168))]).unwrap();
        store.forget_cache_meta().unwrap();

        assert_eq!(store.fetch(&[key("u1", 0)]).unwrap(), None);
    }
}
