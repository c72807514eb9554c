//! Version - immutable snapshot of the SSTable files of one column family.

use std::sync::Arc;

use crate::options::MAX_LEVELS;
use crate::types::OpId;

use super::FileMetaData;

/// Files of a column family, per level.
pub type LevelFiles = [Vec<Arc<FileMetaData>>; MAX_LEVELS];

/// An immutable snapshot of all SSTable files of a column family.
///
/// Level 0 is ordered newest first; higher levels are sorted by smallest key.
/// The `FileMetaData` values are snapshots taken when the version was built:
/// reference counts and reader handles are tracked by the version set.
#[derive(Debug, Clone)]
pub struct Version {
    /// Column family this version belongs to.
    column_family: u32,
    /// Files at each level (0 to MAX_LEVELS-1).
    files: LevelFiles,
    /// Total file size at each level.
    level_sizes: [u64; MAX_LEVELS],
    /// Highest op id flushed to the files of this version.
    flushed_op_id: OpId,
}

impl Version {
    /// Create an empty version.
    pub fn new(column_family: u32) -> Self {
        Self::with_files(column_family, Default::default(), OpId::default())
    }

    /// Create a version with the given files.
    pub fn with_files(column_family: u32, files: LevelFiles, flushed_op_id: OpId) -> Self {
        let mut level_sizes = [0u64; MAX_LEVELS];
        for (level, level_files) in files.iter().enumerate() {
            level_sizes[level] = level_files.iter().map(|f| f.file_size()).sum();
        }

        Self {
            column_family,
            files,
            level_sizes,
            flushed_op_id,
        }
    }

    /// Get the column family id.
    pub fn column_family(&self) -> u32 {
        self.column_family
    }

    /// Get files at a specific level.
    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    /// Get number of files at a level.
    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Get total number of files across all levels.
    pub fn total_files(&self) -> usize {
        self.files.iter().map(|f| f.len()).sum()
    }

    /// Get total size at a level.
    pub fn level_size(&self, level: usize) -> u64 {
        self.level_sizes[level]
    }

    /// Sum of compensated sizes at a level, falling back to the raw size of
    /// files whose compensated size is not known yet.
    pub fn compensated_level_size(&self, level: usize) -> u64 {
        self.files[level]
            .iter()
            .map(|f| match f.compensated_file_size() {
                0 => f.file_size(),
                size => size,
            })
            .sum()
    }

    /// Highest op id flushed to the files of this version.
    pub fn flushed_op_id(&self) -> OpId {
        self.flushed_op_id
    }

    /// Get an iterator over all files at all levels.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetaData>)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    /// Find a file by number.
    pub fn find_file(&self, file_number: u64) -> Option<(usize, &Arc<FileMetaData>)> {
        self.all_files().find(|(_, f)| f.number() == file_number)
    }

    /// Files a client asked to have compacted.
    pub fn files_marked_for_compaction(&self) -> Vec<(usize, Arc<FileMetaData>)> {
        self.all_files()
            .filter(|(_, f)| f.marked_for_compaction)
            .map(|(level, f)| (level, Arc::clone(f)))
            .collect()
    }

    /// Copy of this version with one file's metadata replaced.
    ///
    /// Returns None if the file is not part of this version.
    pub(crate) fn with_replaced_file(&self, file: Arc<FileMetaData>) -> Option<Self> {
        let (level, _) = self.find_file(file.number())?;
        let mut files = self.files.clone();
        for slot in files[level].iter_mut() {
            if slot.number() == file.number() {
                *slot = Arc::clone(&file);
            }
        }
        Some(Self::with_files(self.column_family, files, self.flushed_op_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InternalKey;
    use crate::version::FileDescriptor;
    use bytes::Bytes;

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::for_value(Bytes::copy_from_slice(user_key), seq)
    }

    fn make_file(num: u64, smallest: &[u8], largest: &[u8]) -> Arc<FileMetaData> {
        Arc::new(FileMetaData::with_boundaries(
            FileDescriptor::new(num, 0, 1024, 1024),
            make_key(smallest, 1),
            make_key(largest, 1),
        ))
    }

    #[test]
    fn test_version_empty() {
        let version = Version::new(3);
        assert_eq!(version.column_family(), 3);
        assert_eq!(version.total_files(), 0);
        assert_eq!(version.num_files(0), 0);
        assert_eq!(version.flushed_op_id(), OpId::default());
    }

    #[test]
    fn test_version_with_files() {
        let mut files: LevelFiles = Default::default();

        files[0].push(make_file(1, b"a", b"c"));
        files[0].push(make_file(2, b"b", b"d"));
        files[1].push(make_file(3, b"a", b"m"));
        files[1].push(make_file(4, b"n", b"z"));

        let version = Version::with_files(0, files, OpId::new(1, 5));

        assert_eq!(version.num_files(0), 2);
        assert_eq!(version.num_files(1), 2);
        assert_eq!(version.total_files(), 4);
        assert_eq!(version.level_size(1), 2048);
        assert_eq!(version.flushed_op_id(), OpId::new(1, 5));
    }

    #[test]
    fn test_find_file() {
        let mut files: LevelFiles = Default::default();
        files[2].push(make_file(7, b"a", b"b"));
        let version = Version::with_files(0, files, OpId::default());

        let (level, file) = version.find_file(7).unwrap();
        assert_eq!(level, 2);
        assert_eq!(file.number(), 7);
        assert!(version.find_file(8).is_none());
    }

    #[test]
    fn test_compensated_level_size() {
        let mut compensated = FileMetaData::with_boundaries(
            FileDescriptor::new(1, 0, 100, 100),
            make_key(b"a", 1),
            make_key(b"b", 2),
        );
        compensated.set_compensated_file_size(250);

        let mut files: LevelFiles = Default::default();
        files[1].push(Arc::new(compensated));
        files[1].push(make_file(2, b"c", b"d"));
        let version = Version::with_files(0, files, OpId::default());

        assert_eq!(version.level_size(1), 1124);
        assert_eq!(version.compensated_level_size(1), 250 + 1024);
    }

    #[test]
    fn test_files_marked_for_compaction() {
        let mut marked = FileMetaData::with_boundaries(
            FileDescriptor::new(5, 0, 10, 10),
            make_key(b"a", 1),
            make_key(b"b", 1),
        );
        marked.marked_for_compaction = true;

        let mut files: LevelFiles = Default::default();
        files[0].push(make_file(4, b"a", b"z"));
        files[3].push(Arc::new(marked));
        let version = Version::with_files(0, files, OpId::default());

        let result = version.files_marked_for_compaction();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, 3);
        assert_eq!(result[0].1.number(), 5);
    }

    #[test]
    fn test_with_replaced_file() {
        let mut files: LevelFiles = Default::default();
        files[1].push(make_file(1, b"a", b"b"));
        let version = Version::with_files(0, files, OpId::default());

        let mut updated = (*version.files(1)[0]).clone();
        updated.num_entries = 42;
        let replaced = version.with_replaced_file(Arc::new(updated)).unwrap();
        assert_eq!(replaced.files(1)[0].num_entries, 42);
        assert_eq!(version.files(1)[0].num_entries, 0);

        assert!(version.with_replaced_file(make_file(9, b"x", b"y")).is_none());
    }

    #[test]
    fn test_all_files_iterator() {
        let mut files: LevelFiles = Default::default();

        files[0].push(make_file(1, b"a", b"b"));
        files[1].push(make_file(2, b"c", b"d"));
        files[2].push(make_file(3, b"e", b"f"));

        let version = Version::with_files(0, files, OpId::default());

        let all: Vec<_> = version.all_files().collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].0, 0);
        assert_eq!(all[1].0, 1);
        assert_eq!(all[2].0, 2);
    }
}
