//! Packed file identity: file number and storage path in one integer.

use std::fmt;

use crate::{Error, Result};

/// Mask selecting the file number bits of a packed identity.
pub const FILE_NUMBER_MASK: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Number of distinct storage paths a packed identity can address.
pub const MAX_PATH_ID: u32 = 3;

/// Pack a file number and path id into one integer.
///
/// # Panics
///
/// Panics if `number` does not fit in 62 bits or `path_id` exceeds
/// [`MAX_PATH_ID`]; either would alias identities across paths.
pub fn pack_file_number_and_path_id(number: u64, path_id: u32) -> u64 {
    assert!(
        number <= FILE_NUMBER_MASK,
        "file number {} does not fit in 62 bits",
        number
    );
    assert!(path_id <= MAX_PATH_ID, "path id {} out of range", path_id);
    number | (path_id as u64) * (FILE_NUMBER_MASK + 1)
}

/// Identity and size of an SST.
///
/// An SST is either one file, or a base (metadata) file plus data files.
/// `total_file_size` covers all of them, `base_file_size` only the base.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileDescriptor {
    packed_number_and_path_id: u64,
    total_file_size: u64,
    base_file_size: u64,
}

impl FileDescriptor {
    /// Create a descriptor.
    ///
    /// # Panics
    ///
    /// Panics when the number or path id is out of range, or when the base
    /// file is larger than the total.
    pub fn new(number: u64, path_id: u32, total_file_size: u64, base_file_size: u64) -> Self {
        assert!(
            base_file_size <= total_file_size,
            "base file size {} exceeds total size {}",
            base_file_size,
            total_file_size
        );
        Self {
            packed_number_and_path_id: pack_file_number_and_path_id(number, path_id),
            total_file_size,
            base_file_size,
        }
    }

    /// Build a descriptor from persisted fields, reporting corruption instead
    /// of panicking.
    pub fn try_new(
        number: u64,
        path_id: u32,
        total_file_size: u64,
        base_file_size: u64,
    ) -> Result<Self> {
        if number > FILE_NUMBER_MASK {
            return Err(Error::corruption(format!(
                "file number {} does not fit in 62 bits",
                number
            )));
        }
        if path_id > MAX_PATH_ID {
            return Err(Error::corruption(format!("path id {} out of range", path_id)));
        }
        if base_file_size > total_file_size {
            return Err(Error::corruption(format!(
                "base file size {} exceeds total size {}",
                base_file_size, total_file_size
            )));
        }
        Ok(Self::new(number, path_id, total_file_size, base_file_size))
    }

    /// The packed number/path identity as persisted.
    pub fn packed_number_and_path_id(&self) -> u64 {
        self.packed_number_and_path_id
    }

    /// Get the file number.
    pub fn number(&self) -> u64 {
        self.packed_number_and_path_id & FILE_NUMBER_MASK
    }

    /// Get the storage path index.
    pub fn path_id(&self) -> u32 {
        (self.packed_number_and_path_id / (FILE_NUMBER_MASK + 1)) as u32
    }

    /// Total size of all files of this SST in bytes.
    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    /// Size of the base file in bytes.
    pub fn base_file_size(&self) -> u64 {
        self.base_file_size
    }
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("number", &self.number())
            .field("path_id", &self.path_id())
            .field("total_file_size", &self.total_file_size)
            .field("base_file_size", &self.base_file_size)
            .finish()
    }
}
