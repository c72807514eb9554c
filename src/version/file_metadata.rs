//! File metadata for SSTable files.

use crate::cache::TableReaderHandle;
use crate::types::{InternalKey, OpId};
use crate::Result;

use super::boundary::{
    update_frontier, update_user_value, BoundaryValuesBase, BoundaryValuesExtractor,
    FileBoundaryValues, UpdateBoundariesType, UpdateUserValueType,
};
use super::FileDescriptor;

/// Entry statistics read from a table's properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub num_entries: u64,
    pub num_deletions: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
}

/// Metadata about an SSTable file as carried by version edits.
///
/// `refs`, `being_compacted` and `table_reader_handle` belong to the running
/// process and are never persisted. The remaining fields survive an
/// encode/decode round trip.
///
/// The stats fields are only read or written by the thread holding the
/// version set's apply lock.
#[derive(Debug, Clone)]
pub struct FileMetaData {
    /// Number of live versions holding this file.
    pub refs: u32,
    /// Identity and sizes.
    pub fd: FileDescriptor,
    /// Claimed as input by a running compaction.
    pub being_compacted: bool,
    /// Smallest boundary in the file.
    pub smallest: FileBoundaryValues,
    /// Largest boundary in the file.
    pub largest: FileBoundaryValues,
    /// Last replicated op id contained in the file.
    pub last_op_id: OpId,
    /// Whether the file was imported from another database.
    pub imported: bool,
    /// Reader cached by the table cache. Released by the cache owner when
    /// `refs` drops to zero, never by this struct.
    pub table_reader_handle: Option<TableReaderHandle>,
    /// Number of entries.
    pub num_entries: u64,
    /// Number of deletion entries.
    pub num_deletions: u64,
    /// Total uncompressed key size.
    pub raw_key_size: u64,
    /// Total uncompressed value size.
    pub raw_value_size: u64,
    /// Whether the entry stats were loaded from the file itself.
    pub init_stats_from_file: bool,
    /// A client asked for this file to be compacted.
    pub marked_for_compaction: bool,
    compensated_file_size: u64,
}

impl Default for FileMetaData {
    fn default() -> Self {
        Self::new(FileDescriptor::default())
    }
}

impl FileMetaData {
    /// Create metadata with unset boundaries and zeroed stats.
    pub fn new(fd: FileDescriptor) -> Self {
        Self {
            refs: 0,
            fd,
            being_compacted: false,
            smallest: FileBoundaryValues::smallest_unset(),
            largest: FileBoundaryValues::largest_unset(),
            last_op_id: OpId::default(),
            imported: false,
            table_reader_handle: None,
            num_entries: 0,
            num_deletions: 0,
            raw_key_size: 0,
            raw_value_size: 0,
            init_stats_from_file: false,
            marked_for_compaction: false,
            compensated_file_size: 0,
        }
    }

    /// Create metadata spanning `smallest..=largest`.
    pub fn with_boundaries(fd: FileDescriptor, smallest: InternalKey, largest: InternalKey) -> Self {
        let mut meta = Self::new(fd);
        meta.smallest = FileBoundaryValues::from_key(smallest);
        meta.largest = FileBoundaryValues::from_key(largest);
        meta
    }

    /// Get the file number.
    pub fn number(&self) -> u64 {
        self.fd.number()
    }

    /// Get the total file size.
    pub fn file_size(&self) -> u64 {
        self.fd.total_file_size()
    }

    /// File size adjusted for deletions, or zero if not computed yet.
    pub fn compensated_file_size(&self) -> u64 {
        self.compensated_file_size
    }

    /// Record the compensated size, once.
    ///
    /// # Panics
    ///
    /// Panics if a non-zero value was already recorded.
    pub fn set_compensated_file_size(&mut self, size: u64) {
        assert_eq!(
            self.compensated_file_size, 0,
            "compensated size of file {} is immutable once set",
            self.number()
        );
        self.compensated_file_size = size;
    }

    /// Load entry stats once; later calls keep the first values.
    ///
    /// Returns true if the stats were taken.
    pub fn init_stats(&mut self, stats: &FileStats) -> bool {
        if self.init_stats_from_file {
            return false;
        }
        self.num_entries = stats.num_entries;
        self.num_deletions = stats.num_deletions;
        self.raw_key_size = stats.raw_key_size;
        self.raw_value_size = stats.raw_value_size;
        self.init_stats_from_file = true;
        true
    }

    /// File size inflated by the estimated size of the values its deletion
    /// entries shadow.
    pub fn compute_compensated_file_size(&self, deletion_weight: u64) -> u64 {
        let average_value_size = if self.num_entries > 0 {
            self.raw_value_size / self.num_entries
        } else {
            0
        };
        self.file_size().saturating_add(
            self.num_deletions
                .saturating_mul(average_value_size)
                .saturating_mul(deletion_weight),
        )
    }

    /// True when the sequence bounds are ordered.
    pub fn has_ordered_seqnos(&self) -> bool {
        self.smallest.seqno <= self.largest.seqno
    }

    /// Widen the boundaries to include `key`.
    ///
    /// Keys must be given in sorted order: the last key becomes the largest.
    pub fn update_boundaries(&mut self, key: InternalKey, source: &BoundaryValuesBase) {
        if self.smallest.key.is_none() {
            self.smallest.key = Some(key.clone());
        }
        self.largest.key = Some(key);
        self.update_boundaries_except_key(source, UpdateBoundariesType::All);
    }

    /// Widen the auxiliary boundary values without touching the keys.
    pub fn update_boundaries_except_key(
        &mut self,
        source: &BoundaryValuesBase,
        kind: UpdateBoundariesType,
    ) {
        debug_assert!(
            self.smallest.key.is_some(),
            "boundaries of file {} updated before any key",
            self.number()
        );

        if kind.includes_smallest() {
            widen(&mut self.smallest, source, UpdateUserValueType::Smallest);
        }
        if kind.includes_largest() {
            widen(&mut self.largest, source, UpdateUserValueType::Largest);
        }
    }

    /// Widen the boundaries for an entry, deriving user values with `extractor`.
    pub fn update_boundaries_from_entry(
        &mut self,
        extractor: &dyn BoundaryValuesExtractor,
        key: InternalKey,
        value: &[u8],
    ) -> Result<()> {
        let mut source = BoundaryValuesBase::with_seqno(key.sequence());
        extractor.extract(key.user_key(), value, &mut source.user_values)?;
        self.update_boundaries(key, &source);
        Ok(())
    }

    /// Copy holding only what is needed to reopen the file after a restart.
    pub fn cleaned(&self) -> Self {
        let mut meta = Self::new(self.fd);
        meta.smallest = self.smallest.clone();
        meta.largest = self.largest.clone();
        meta.last_op_id = self.last_op_id;
        meta.marked_for_compaction = self.marked_for_compaction;
        meta.imported = self.imported;
        meta
    }
}

fn widen(target: &mut FileBoundaryValues, source: &BoundaryValuesBase, kind: UpdateUserValueType) {
    target.seqno = match kind {
        UpdateUserValueType::Smallest => target.seqno.min(source.seqno),
        UpdateUserValueType::Largest => target.seqno.max(source.seqno),
    };
    update_frontier(&mut target.user_frontier, source.user_frontier.as_deref(), kind);
    for value in &source.user_values {
        update_user_value(&mut target.user_values, value, kind);
    }
}

/// Compares persisted fields only.
impl PartialEq for FileMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.fd == other.fd
            && self.smallest == other.smallest
            && self.largest == other.largest
            && self.last_op_id == other.last_op_id
            && self.imported == other.imported
            && self.compensated_file_size == other.compensated_file_size
            && self.num_entries == other.num_entries
            && self.num_deletions == other.num_deletions
            && self.raw_key_size == other.raw_key_size
            && self.raw_value_size == other.raw_value_size
            && self.init_stats_from_file == other.init_stats_from_file
            && self.marked_for_compaction == other.marked_for_compaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_SEQUENCE_NUMBER;
    use crate::version::boundary::{
        BytewiseBoundaryValue, ConsensusFrontier, UserBoundaryValueRef, UserBoundaryValues,
        UserFrontier,
    };
    use bytes::Bytes;
    use std::sync::Arc;

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::for_value(Bytes::copy_from_slice(user_key), seq)
    }

    /// Tags every entry with the first byte of its value.
    struct FirstByteExtractor;

    impl BoundaryValuesExtractor for FirstByteExtractor {
        fn decode(&self, tag: u32, data: &[u8]) -> Result<Option<UserBoundaryValueRef>> {
            Ok(Some(Arc::new(BytewiseBoundaryValue::new(
                tag,
                Bytes::copy_from_slice(data),
            ))))
        }

        fn extract(&self, _user_key: &[u8], value: &[u8], values: &mut UserBoundaryValues) -> Result<()> {
            values.push(Arc::new(BytewiseBoundaryValue::new(
                1,
                Bytes::copy_from_slice(&value[..1]),
            )));
            Ok(())
        }

        fn decode_frontier(&self, data: &[u8]) -> Result<Box<dyn UserFrontier>> {
            Ok(Box::new(ConsensusFrontier::decode(data)?))
        }
    }

    #[test]
    fn test_new_metadata_defaults() {
        let meta = FileMetaData::new(FileDescriptor::new(1, 0, 1024, 512));

        assert_eq!(meta.refs, 0);
        assert_eq!(meta.number(), 1);
        assert_eq!(meta.file_size(), 1024);
        assert_eq!(meta.compensated_file_size(), 0);
        assert_eq!(meta.smallest.seqno, MAX_SEQUENCE_NUMBER);
        assert_eq!(meta.largest.seqno, 0);
        assert!(meta.smallest.key.is_none());
        assert!(!meta.being_compacted);
        assert!(!meta.marked_for_compaction);
        assert!(meta.table_reader_handle.is_none());
    }

    #[test]
    fn test_update_boundaries_single_key() {
        let mut meta = FileMetaData::new(FileDescriptor::new(1, 0, 0, 0));
        meta.update_boundaries(make_key(b"m", 7), &BoundaryValuesBase::with_seqno(7));

        assert_eq!(meta.smallest.key, Some(make_key(b"m", 7)));
        assert_eq!(meta.largest.key, Some(make_key(b"m", 7)));
        assert_eq!(meta.smallest.seqno, 7);
        assert_eq!(meta.largest.seqno, 7);
    }

    #[test]
    fn test_update_boundaries_sorted_keys() {
        let mut meta = FileMetaData::new(FileDescriptor::new(1, 0, 0, 0));
        let keys = [(b"a", 40u64), (b"b", 10), (b"c", 90), (b"d", 20)];
        for (user_key, seq) in keys {
            meta.update_boundaries(make_key(user_key, seq), &BoundaryValuesBase::with_seqno(seq));
        }

        assert_eq!(meta.smallest.key, Some(make_key(b"a", 40)));
        assert_eq!(meta.largest.key, Some(make_key(b"d", 20)));
        assert_eq!(meta.smallest.seqno, 10);
        assert_eq!(meta.largest.seqno, 90);
        assert!(meta.has_ordered_seqnos());
    }

    #[test]
    fn test_update_boundaries_except_key() {
        let mut meta = FileMetaData::new(FileDescriptor::new(1, 0, 0, 0));
        meta.update_boundaries(make_key(b"a", 5), &BoundaryValuesBase::with_seqno(5));

        let mut source = BoundaryValuesBase::with_seqno(1);
        source.user_frontier = Some(Box::new(ConsensusFrontier::new(OpId::new(1, 3), 30)));
        meta.update_boundaries_except_key(&source, UpdateBoundariesType::Smallest);

        assert_eq!(meta.smallest.seqno, 1);
        assert_eq!(meta.largest.seqno, 5);
        assert!(meta.smallest.user_frontier.is_some());
        assert!(meta.largest.user_frontier.is_none());
        assert_eq!(meta.smallest.key, Some(make_key(b"a", 5)));

        let source = BoundaryValuesBase::with_seqno(50);
        meta.update_boundaries_except_key(&source, UpdateBoundariesType::Largest);
        assert_eq!(meta.smallest.seqno, 1);
        assert_eq!(meta.largest.seqno, 50);
    }

    #[test]
    fn test_update_boundaries_from_entry() {
        let mut meta = FileMetaData::new(FileDescriptor::new(1, 0, 0, 0));
        let extractor = FirstByteExtractor;
        meta.update_boundaries_from_entry(&extractor, make_key(b"a", 3), b"q1")
            .unwrap();
        meta.update_boundaries_from_entry(&extractor, make_key(b"b", 4), b"c1")
            .unwrap();
        meta.update_boundaries_from_entry(&extractor, make_key(b"c", 5), b"z1")
            .unwrap();

        let smallest = meta.smallest.user_value_with_tag(1).unwrap();
        let largest = meta.largest.user_value_with_tag(1).unwrap();
        assert_eq!(smallest.encode(), Bytes::from_static(b"c"));
        assert_eq!(largest.encode(), Bytes::from_static(b"z"));
        assert_eq!(meta.smallest.seqno, 3);
        assert_eq!(meta.largest.seqno, 5);
    }

    #[test]
    fn test_compensated_size_set_once() {
        let mut meta = FileMetaData::new(FileDescriptor::new(1, 0, 100, 100));
        meta.set_compensated_file_size(150);
        assert_eq!(meta.compensated_file_size(), 150);
    }

    #[test]
    #[should_panic(expected = "immutable once set")]
    fn test_compensated_size_overwrite_panics() {
        let mut meta = FileMetaData::new(FileDescriptor::new(1, 0, 100, 100));
        meta.set_compensated_file_size(150);
        meta.set_compensated_file_size(200);
    }

    #[test]
    fn test_init_stats_once() {
        let mut meta = FileMetaData::new(FileDescriptor::new(1, 0, 1000, 1000));
        let first = FileStats {
            num_entries: 10,
            num_deletions: 4,
            raw_key_size: 80,
            raw_value_size: 500,
        };
        assert!(meta.init_stats(&first));
        assert!(!meta.init_stats(&FileStats::default()));
        assert_eq!(meta.num_entries, 10);
        assert_eq!(meta.num_deletions, 4);
        assert!(meta.init_stats_from_file);

        // 1000 + 4 deletions * 50 average value bytes * weight 2
        assert_eq!(meta.compute_compensated_file_size(2), 1400);
    }

    #[test]
    fn test_compensated_size_without_entries() {
        let meta = FileMetaData::new(FileDescriptor::new(1, 0, 300, 300));
        assert_eq!(meta.compute_compensated_file_size(2), 300);
    }

    #[test]
    fn test_cleaned_drops_runtime_state() {
        let mut meta = FileMetaData::with_boundaries(
            FileDescriptor::new(9, 1, 4096, 1024),
            make_key(b"a", 1),
            make_key(b"z", 9),
        );
        meta.refs = 3;
        meta.being_compacted = true;
        meta.table_reader_handle = Some(TableReaderHandle::new(77));
        meta.num_entries = 100;
        meta.set_compensated_file_size(5000);
        meta.last_op_id = OpId::new(2, 9);
        meta.imported = true;
        meta.marked_for_compaction = true;

        let cleaned = meta.cleaned();
        assert_eq!(cleaned.refs, 0);
        assert!(!cleaned.being_compacted);
        assert!(cleaned.table_reader_handle.is_none());
        assert_eq!(cleaned.num_entries, 0);
        assert_eq!(cleaned.compensated_file_size(), 0);
        assert_eq!(cleaned.fd, meta.fd);
        assert_eq!(cleaned.smallest, meta.smallest);
        assert_eq!(cleaned.last_op_id, OpId::new(2, 9));
        assert!(cleaned.imported);
        assert!(cleaned.marked_for_compaction);
    }

    #[test]
    fn test_equality_ignores_runtime_state() {
        let a = FileMetaData::with_boundaries(
            FileDescriptor::new(1, 0, 10, 10),
            make_key(b"a", 1),
            make_key(b"b", 2),
        );
        let mut b = a.clone();
        b.refs = 2;
        b.being_compacted = true;
        b.table_reader_handle = Some(TableReaderHandle::new(1));
        assert_eq!(a, b);

        b.num_deletions = 1;
        assert_ne!(a, b);
    }
}
