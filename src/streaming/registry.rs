//! Transfer registry for tracking live handoffs
//!
//! Maps correlation ids to their [`Transfer`]. Every operation takes the lock,
//! runs to completion and releases it; nothing awaits while holding it, so a
//! lookup observes either no entry or a fully constructed one.
//!
//! Entries are removed by the terminal transitions themselves, never by a sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::streaming::channel::SinkReader;
use crate::streaming::transfer::{
    TeardownOutcome, Transfer, TransferId, TransferMetadata, TransferSnapshot,
};

/// Result of a registration.
#[derive(Debug)]
pub struct Registration {
    pub generation: u64,
    /// Teardown of the entry this registration replaced, if the id was in use.
    pub replaced: Option<TeardownOutcome>,
}

/// Registry of live transfers, keyed by correlation id.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    transfers: Mutex<HashMap<TransferId, Transfer>>,
    next_generation: AtomicU64,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransferId, Transfer>> {
        // A panic mid-operation cannot leave a half-built entry: inserts and
        // removals are single map calls.
        self.transfers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a transfer, overwriting any live entry with the same id.
    pub fn register(&self, id: TransferId, metadata: TransferMetadata) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let transfer = Transfer::new(id.clone(), generation, metadata);
        let replaced = self.lock().insert(id, transfer).map(Transfer::replace);
        Registration {
            generation,
            replaced,
        }
    }

    /// Snapshot of a live transfer.
    pub fn get(&self, id: &str) -> Option<TransferSnapshot> {
        self.lock().get(id).map(Transfer::snapshot)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Remove a transfer regardless of generation.
    pub fn remove(&self, id: &str) -> Option<Transfer> {
        self.lock().remove(id)
    }

    /// Remove a transfer only if it is still the given registration.
    pub(crate) fn remove_generation(&self, id: &str, generation: u64) -> Option<Transfer> {
        let mut transfers = self.lock();
        match transfers.get(id) {
            Some(t) if t.generation() == generation => transfers.remove(id),
            _ => None,
        }
    }

    /// Run `f` against a live transfer while holding the lock.
    pub(crate) fn with_transfer<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Transfer) -> R,
    ) -> Option<R> {
        self.lock().get_mut(id).map(f)
    }

    /// Run `f` against a live transfer if it is still the given registration.
    pub(crate) fn with_generation<R>(
        &self,
        id: &str,
        generation: u64,
        f: impl FnOnce(&mut Transfer) -> R,
    ) -> Option<R> {
        self.lock()
            .get_mut(id)
            .filter(|t| t.generation() == generation)
            .map(f)
    }

    /// Hand the read half of a transfer to its consumer.
    ///
    /// Returns the generation alongside the reader; `None` if the id is
    /// unknown or its reader was already taken.
    pub fn take_reader(&self, id: &str) -> Option<(u64, TransferMetadata, SinkReader)> {
        self.with_transfer(id, |t| {
            t.take_reader()
                .map(|reader| (t.generation(), t.metadata().clone(), reader))
        })
        .flatten()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of all live transfers, sorted.
    pub fn ids(&self) -> Vec<TransferId> {
        let mut ids: Vec<_> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::transfer::TransferState;
    use std::sync::Arc;

    #[test]
    fn test_register_get_remove() {
        let registry = TransferRegistry::new();
        let reg = registry.register(
            "a".into(),
            TransferMetadata::new("report.pdf").with_size(10),
        );
        assert!(reg.replaced.is_none());

        let snap = registry.get("a").unwrap();
        assert_eq!(snap.generation, reg.generation);
        assert_eq!(snap.state, TransferState::Registered);
        assert_eq!(snap.metadata.filename, "report.pdf");
        assert_eq!(snap.metadata.size, Some(10));

        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregister_overwrites() {
        let registry = TransferRegistry::new();
        let first = registry.register("a".into(), TransferMetadata::new("one"));
        let second = registry.register("a".into(), TransferMetadata::new("two"));

        assert_ne!(first.generation, second.generation);
        let replaced = second.replaced.unwrap();
        assert_eq!(replaced.previous, TransferState::Registered);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().metadata.filename, "two");
    }

    #[test]
    fn test_remove_generation_ignores_stale() {
        let registry = TransferRegistry::new();
        let first = registry.register("a".into(), TransferMetadata::new("one"));
        let second = registry.register("a".into(), TransferMetadata::new("two"));

        assert!(registry.remove_generation("a", first.generation).is_none());
        assert!(registry.contains("a"));
        assert!(registry.remove_generation("a", second.generation).is_some());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_take_reader_once() {
        let registry = TransferRegistry::new();
        let reg = registry.register("a".into(), TransferMetadata::new("f"));

        let (generation, metadata, _reader) = registry.take_reader("a").unwrap();
        assert_eq!(generation, reg.generation);
        assert_eq!(metadata.filename, "f");
        assert!(registry.take_reader("a").is_none());
        assert!(registry.take_reader("missing").is_none());
    }

    #[test]
    fn test_concurrent_register_remove() {
        let registry = Arc::new(TransferRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let id = format!("{}-{}", n, i);
                        registry.register(id.as_str().into(), TransferMetadata::new("f"));
                        if i % 2 == 0 {
                            registry.remove(&id);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 50);
        assert_eq!(registry.ids().len(), 8 * 50);
    }
}
