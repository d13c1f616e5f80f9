//! Process-wide trust store handle with atomic replacement

use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::LoadError;
use crate::store::TrustStore;

/// Shared, hot-swappable [`TrustStore`]
///
/// Sessions take an `Arc` snapshot at the start of a transaction and keep
/// using it even if the store is replaced meanwhile. A replacement store is
/// fully parsed and verified before it is published.
#[derive(Debug, Default)]
pub struct SharedTrustStore {
    current: RwLock<Arc<TrustStore>>,
}

impl SharedTrustStore {
    pub fn new(store: TrustStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    /// The store as of now
    pub fn snapshot(&self) -> Arc<TrustStore> {
        // A writer can only panic between acquiring the lock and the pointer
        // assignment, so a poisoned lock still holds a complete store.
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Publish `store`, returning the one it replaced
    pub fn replace(&self, store: TrustStore) -> Arc<TrustStore> {
        let next = Arc::new(store);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }

    /// Load a new document and publish it; on error the current store stays
    pub fn reload(&self, source: &str) -> Result<(), LoadError> {
        let store = TrustStore::load(source)?;
        let previous = self.replace(store);
        tracing::info!(previous_keys = previous.len(), "Trust store replaced");
        Ok(())
    }

    pub fn reload_file(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let store = TrustStore::load_file(path)?;
        self.replace(store);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_replace() {
        let shared = SharedTrustStore::new(TrustStore::new());
        let before = shared.snapshot();
        let previous = shared.replace(TrustStore::new());
        assert!(Arc::ptr_eq(&before, &previous));
        assert!(!Arc::ptr_eq(&before, &shared.snapshot()));
    }

    #[test]
    fn test_failed_reload_keeps_current() {
        let shared = SharedTrustStore::new(TrustStore::new());
        let before = shared.snapshot();
        assert!(shared.reload("not json").is_err());
        assert!(Arc::ptr_eq(&before, &shared.snapshot()));
    }

    #[test]
    fn test_concurrent_readers() {
        let shared = Arc::new(SharedTrustStore::new(TrustStore::new()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(shared.snapshot().is_empty());
                    }
                })
            })
            .collect();
        for _ in 0..10 {
            shared.replace(TrustStore::new());
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
