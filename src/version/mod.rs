//! Version edits and the state they describe.
//!
//! The version system provides:
//! - **FileDescriptor**: Packed identity and sizes of an SST
//! - **FileMetaData**: Boundaries, stats and flags of each SST
//! - **VersionEdit**: Delta to apply to a Version, plus column family lifecycle
//! - **Manifest**: Append-only log of encoded VersionEdits for recovery
//! - **VersionSet**: Applies edits under a single writer and installs Versions
//!
//! # Record layout
//!
//! ```text
//! VersionEdit := (tag:u8 payload)*
//! NewFile     := level number path_id total_size base_size
//!                smallest largest [last_op_id] [imported] [compensated] [stats] [marked]
//! Boundary    := key seqno (user_value)* [frontier]
//! ```
//!
//! Every integer is a varint, every string or nested record is length-prefixed.
//!
//! # Recovery
//!
//! On startup:
//! 1. Read CURRENT file to find active manifest
//! 2. Replay all VersionEdits from manifest
//! 3. Reconstruct the current Version of every column family

mod boundary;
mod column_family;
mod debug;
mod file_descriptor;
mod file_metadata;
mod manifest;
#[allow(clippy::module_inception)]
mod version;
mod version_edit;
mod version_set;

pub use boundary::{
    update_frontier, update_user_value, BoundaryValuesBase, BoundaryValuesExtractor,
    BytewiseBoundaryValue, ConsensusFrontier, DefaultBoundaryValuesExtractor, FileBoundaryValues,
    UpdateBoundariesType, UpdateUserValueType, UserBoundaryTag, UserBoundaryValue,
    UserBoundaryValueRef, UserBoundaryValues, UserFrontier,
};
pub use column_family::{ColumnFamilyData, ColumnFamilySet};
pub use file_descriptor::{pack_file_number_and_path_id, FileDescriptor, FILE_NUMBER_MASK, MAX_PATH_ID};
pub use file_metadata::{FileMetaData, FileStats};
pub use manifest::{Manifest, ManifestReader, ManifestWriter};
pub use version::{LevelFiles, Version};
pub use version_edit::{DeletedFileSet, NewFiles, VersionEdit};
pub use version_set::{database_exists, VersionBuilder, VersionSet};

/// Tag values for top-level VersionEdit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EditTag {
    /// Comparator name.
    Comparator = 1,
    /// Log number.
    LogNumber = 2,
    /// Next file number.
    NextFileNumber = 3,
    /// Last sequence number.
    LastSequence = 4,
    /// Deleted file (level, file_number).
    DeletedFile = 6,
    /// New file, as a nested record.
    NewFile = 7,
    /// Previous log number.
    PrevLogNumber = 9,
    /// Last op id flushed to SSTs (term, index).
    FlushedOpId = 10,
    /// Column family the edit applies to.
    ColumnFamily = 200,
    /// Column family creation, with its name.
    ColumnFamilyAdd = 201,
    /// Column family drop, followed by a flag byte.
    ColumnFamilyDrop = 202,
    /// Highest column family id handed out.
    MaxColumnFamily = 203,
}

impl EditTag {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(EditTag::Comparator),
            2 => Some(EditTag::LogNumber),
            3 => Some(EditTag::NextFileNumber),
            4 => Some(EditTag::LastSequence),
            6 => Some(EditTag::DeletedFile),
            7 => Some(EditTag::NewFile),
            9 => Some(EditTag::PrevLogNumber),
            10 => Some(EditTag::FlushedOpId),
            200 => Some(EditTag::ColumnFamily),
            201 => Some(EditTag::ColumnFamilyAdd),
            202 => Some(EditTag::ColumnFamilyDrop),
            203 => Some(EditTag::MaxColumnFamily),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Tag values inside a NewFile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NewFileTag {
    /// Level the file is added to.
    Level = 1,
    /// File number.
    Number = 2,
    /// Storage path index.
    PathId = 3,
    /// Total size of all files of the SST.
    TotalSize = 4,
    /// Size of the base file.
    BaseSize = 5,
    /// Smallest boundary, as a nested record.
    Smallest = 6,
    /// Largest boundary, as a nested record.
    Largest = 7,
    /// Last op id in the file.
    LastOpId = 8,
    /// Imported from another database.
    Imported = 9,
    /// Size adjusted for deletions.
    CompensatedSize = 10,
    /// Entry counts and raw sizes.
    Stats = 11,
    /// Marked for compaction.
    MarkedForCompaction = 12,
}

impl NewFileTag {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(NewFileTag::Level),
            2 => Some(NewFileTag::Number),
            3 => Some(NewFileTag::PathId),
            4 => Some(NewFileTag::TotalSize),
            5 => Some(NewFileTag::BaseSize),
            6 => Some(NewFileTag::Smallest),
            7 => Some(NewFileTag::Largest),
            8 => Some(NewFileTag::LastOpId),
            9 => Some(NewFileTag::Imported),
            10 => Some(NewFileTag::CompensatedSize),
            11 => Some(NewFileTag::Stats),
            12 => Some(NewFileTag::MarkedForCompaction),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Tag values inside a boundary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BoundaryTag {
    /// Encoded internal key.
    Key = 1,
    /// Sequence number bound.
    Seqno = 2,
    /// User value (tag, bytes).
    UserValue = 3,
    /// Encoded user frontier.
    Frontier = 4,
}

impl BoundaryTag {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(BoundaryTag::Key),
            2 => Some(BoundaryTag::Seqno),
            3 => Some(BoundaryTag::UserValue),
            4 => Some(BoundaryTag::Frontier),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_tag_roundtrip() {
        for tag in [
            EditTag::Comparator,
            EditTag::LogNumber,
            EditTag::NextFileNumber,
            EditTag::LastSequence,
            EditTag::DeletedFile,
            EditTag::NewFile,
            EditTag::PrevLogNumber,
            EditTag::FlushedOpId,
            EditTag::ColumnFamily,
            EditTag::ColumnFamilyAdd,
            EditTag::ColumnFamilyDrop,
            EditTag::MaxColumnFamily,
        ] {
            assert_eq!(EditTag::from_byte(tag.to_byte()), Some(tag));
        }
        assert_eq!(EditTag::from_byte(5), None);
    }

    #[test]
    fn test_nested_tags_roundtrip() {
        for b in 1..=12u8 {
            assert_eq!(NewFileTag::from_byte(b).map(NewFileTag::to_byte), Some(b));
        }
        assert_eq!(NewFileTag::from_byte(13), None);

        for b in 1..=4u8 {
            assert_eq!(BoundaryTag::from_byte(b).map(BoundaryTag::to_byte), Some(b));
        }
        assert_eq!(BoundaryTag::from_byte(0), None);
    }
}
