//! File-backed store keeping one JSON array per collection.
//!
//! ```text
//! Data/door_access/
//! ├── groups.json
//! ├── doors.json
//! ├── users.json
//! └── access_logs.json
//! ```

use crate::error::{Error, Result, StoreError};
use crate::store::{Collection, Store};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// JSON file store rooted at a data directory.
///
/// Writes go to a dot-prefixed temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_path: PathBuf,
}

impl JsonFileStore {
    /// Opens a store, creating the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the directory cannot be created.
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|err| Error::Store(Box::new(err)))?;
        Ok(Self { base_path })
    }

    /// Returns the data directory.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the file path of a collection.
    pub fn collection_path(&self, collection: Collection) -> PathBuf {
        self.base_path.join(format!("{}.json", collection.name()))
    }

    fn temp_path(&self, collection: Collection) -> PathBuf {
        self.base_path.join(format!(".{}.json.tmp", collection.name()))
    }
}

impl Store for JsonFileStore {
    fn load(&self, collection: Collection) -> std::result::Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.collection_path(collection)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Box::new(err)),
        }
    }

    fn save(
        &self,
        collection: Collection,
        document: &[u8],
    ) -> std::result::Result<(), StoreError> {
        let temp_path = self.temp_path(collection);
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(document)?;
        // data must be on disk before the rename makes it visible
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, self.collection_path(collection))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (JsonFileStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = JsonFileStore::open(temp.path().join("door_access")).unwrap();
        (store, temp)
    }

    #[test]
    fn open_creates_directory() {
        let (store, _temp) = test_store();
        assert!(store.base_path().is_dir());
    }

    #[test]
    fn load_missing_collection_is_none() {
        let (store, _temp) = test_store();
        assert!(store.load(Collection::Users).unwrap().is_none());
    }

    #[test]
    fn save_replaces_whole_document_and_leaves_no_temp_file() {
        let (store, _temp) = test_store();

        store.save(Collection::Doors, b"[1,2,3]").unwrap();
        store.save(Collection::Doors, b"[]").unwrap();

        assert_eq!(store.load(Collection::Doors).unwrap().unwrap(), b"[]");
        assert!(store.collection_path(Collection::Doors).ends_with("doors.json"));
        assert!(!store.temp_path(Collection::Doors).exists());
    }

    #[test]
    fn save_overwrites_stale_temp_file() {
        let (store, _temp) = test_store();
        fs::write(store.temp_path(Collection::Users), b"[{\"half written").unwrap();

        store.save(Collection::Users, b"[]").unwrap();

        assert_eq!(store.load(Collection::Users).unwrap().unwrap(), b"[]");
        assert!(!store.temp_path(Collection::Users).exists());
    }
}
