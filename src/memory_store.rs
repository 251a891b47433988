use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::{Collection, Store};

/// In-memory store implementation for tests and demos.
///
/// Clones share the same documents, so a test can keep a handle while the
/// engine owns another.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: RwLock<HashMap<Collection, Vec<u8>>>,
    writes: RwLock<HashMap<Collection, usize>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a raw document for a collection.
    pub fn insert_document(&self, collection: Collection, document: impl Into<Vec<u8>>) {
        self.inner
            .documents
            .write()
            .insert(collection, document.into());
    }

    /// Returns the current raw document of a collection.
    pub fn document(&self, collection: Collection) -> Option<Vec<u8>> {
        self.inner.documents.read().get(&collection).cloned()
    }

    /// Returns how many successful saves a collection has received.
    pub fn write_count(&self, collection: Collection) -> usize {
        self.inner
            .writes
            .read()
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the total number of successful saves.
    pub fn total_writes(&self) -> usize {
        self.inner.writes.read().values().sum()
    }

    /// Makes every subsequent save fail until switched back.
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl Store for MemoryStore {
    fn load(&self, collection: Collection) -> std::result::Result<Option<Vec<u8>>, StoreError> {
        Ok(self.document(collection))
    }

    fn save(
        &self,
        collection: Collection,
        document: &[u8],
    ) -> std::result::Result<(), StoreError> {
        if self.inner.fail_saves.load(Ordering::SeqCst) {
            return Err(format!("simulated write failure for {collection}").into());
        }
        self.inner
            .documents
            .write()
            .insert(collection, document.to_vec());
        *self.inner.writes.write().entry(collection).or_default() += 1;
        Ok(())
    }
}
