//! # lsm-version-edit
//!
//! Version edits, file metadata and manifest replay for an LSM-tree storage
//! engine.
//!
//! ## Features
//!
//! - **Version Edits**: Tagged, forward-compatible encoding of file additions,
//!   deletions and log bookkeeping
//! - **File Metadata**: Packed file descriptors, key/seqno boundaries with
//!   pluggable user values and frontiers
//! - **Manifest**: Checksummed, block-framed log of edits with crash-tolerant replay
//! - **Column Families**: Create and drop families through the same edit stream
//! - **Version Set**: Serialized log-and-apply, lock-free reads of the current version
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lsm_version_edit::{DefaultBoundaryValuesExtractor, Options, VersionEdit, VersionSet};
//!
//! let vs = VersionSet::open(
//!     "./my_data".as_ref(),
//!     Arc::new(Options::default()),
//!     Arc::new(DefaultBoundaryValuesExtractor),
//! )?;
//!
//! let mut edit = VersionEdit::new();
//! edit.add_file(0, file);
//! edit.set_last_sequence(100);
//! vs.log_and_apply(&mut edit)?;
//!
//! let current = vs.default_version()?;
//! ```

// Public modules
pub mod cache;
pub mod error;
pub mod options;
pub mod types;
pub mod version;

// Internal modules
mod util;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, OptionsBuilder, SyncMode};
pub use types::{InternalKey, OpId, SequenceNumber, ValueType};

// Cache
pub use cache::{TableReaderCache, TableReaderHandle};

// Versions
pub use version::{
    database_exists, BoundaryValuesExtractor, ConsensusFrontier, DefaultBoundaryValuesExtractor,
    FileBoundaryValues, FileDescriptor, FileMetaData, FileStats, Manifest, Version,
    VersionBuilder, VersionEdit, VersionSet,
};
