//! Table reader handles shared between file metadata and the table cache.
//!
//! The version layer never opens tables itself. It only holds opaque handles
//! handed out by a [`TableReaderCache`] and gives them back when the last
//! version referencing a file goes away.

use std::fmt;

/// Opaque reference to a reader owned by a table cache.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableReaderHandle(u64);

impl TableReaderHandle {
    /// Wrap a cache-specific id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the cache-specific id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TableReaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableReaderHandle({})", self.0)
    }
}

/// Owner of table readers.
pub trait TableReaderCache: Send + Sync {
    /// Release a reader once no live version references its file.
    fn release(&self, file_number: u64, handle: TableReaderHandle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingCache {
        released: Mutex<Vec<(u64, TableReaderHandle)>>,
    }

    impl TableReaderCache for RecordingCache {
        fn release(&self, file_number: u64, handle: TableReaderHandle) {
            self.released.lock().push((file_number, handle));
        }
    }

    #[test]
    fn test_handle_id() {
        let handle = TableReaderHandle::new(12);
        assert_eq!(handle.id(), 12);
        assert_eq!(format!("{:?}", handle), "TableReaderHandle(12)");
    }

    #[test]
    fn test_release_through_trait_object() {
        let cache = RecordingCache::default();
        let dyn_cache: &dyn TableReaderCache = &cache;
        dyn_cache.release(5, TableReaderHandle::new(1));
        assert_eq!(*cache.released.lock(), vec![(5, TableReaderHandle::new(1))]);
    }
}
