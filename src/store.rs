use crate::error::StoreError;
use std::fmt;

/// Durable collection persisted as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Groups,
    Doors,
    Users,
    AccessLogs,
}

impl Collection {
    /// Every collection in load order.
    pub const ALL: [Collection; 4] = [
        Collection::Groups,
        Collection::Doors,
        Collection::Users,
        Collection::AccessLogs,
    ];

    /// Returns the storage name of the collection.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Groups => "groups",
            Self::Doors => "doors",
            Self::Users => "users",
            Self::AccessLogs => "access_logs",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Durable backing for the entity collections.
///
/// Each collection is read and written as a whole serialized document. Writes
/// replace prior content entirely and are expected to be atomic per collection.
pub trait Store: Send + Sync {
    /// Returns the stored document, or `None` when the collection was never saved.
    fn load(&self, collection: Collection) -> std::result::Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the stored document for a collection.
    fn save(&self, collection: Collection, document: &[u8])
    -> std::result::Result<(), StoreError>;
}

impl<T> Store for std::sync::Arc<T>
where
    T: Store + ?Sized,
{
    fn load(&self, collection: Collection) -> std::result::Result<Option<Vec<u8>>, StoreError> {
        (**self).load(collection)
    }

    fn save(
        &self,
        collection: Collection,
        document: &[u8],
    ) -> std::result::Result<(), StoreError> {
        (**self).save(collection, document)
    }
}
