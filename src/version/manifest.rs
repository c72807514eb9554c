//! Manifest - Append-only log of VersionEdits.
//!
//! Every edit accepted by the version set is appended here before it is
//! installed. On startup the manifest named by CURRENT is replayed to
//! reconstruct the current Version of every column family.
//!
//! Records are framed in 32 KiB blocks. Each physical record carries a
//! 7-byte header (CRC, length, type); edits larger than the space left in
//! a block are split into First/Middle/Last fragments.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::options::SyncMode;
use crate::util::crc::crc32_multi;
use crate::util::filename::manifest_file_path;
use crate::{Error, Result};

use super::{BoundaryValuesExtractor, VersionEdit};

/// Block size for manifest (32KB).
const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: CRC (4) + Length (2) + Type (1) = 7 bytes.
const HEADER_SIZE: usize = 7;

/// Record types for manifest entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    /// Zero is reserved for block padding.
    Zero = 0,
    /// Complete record in a single fragment.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment(s) of a record.
    Middle = 3,
    /// Last fragment of a record.
    Last = 4,
}

impl RecordType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Manifest file writer.
pub struct ManifestWriter {
    /// Buffered writer for the manifest file.
    writer: BufWriter<File>,
    /// Current position within the current block.
    block_offset: usize,
    /// Sync mode for durability.
    sync_mode: SyncMode,
    /// Bytes written since last sync.
    bytes_since_sync: usize,
    /// File number for this manifest.
    file_number: u64,
    /// Path to the manifest file.
    path: PathBuf,
    /// Reused encoding buffer.
    scratch: BytesMut,
}

impl ManifestWriter {
    /// Create a new manifest file, truncating any existing one.
    pub fn new(path: &Path, file_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self::with_file(file, 0, path, file_number, sync_mode))
    }

    /// Open an existing manifest for appending.
    pub fn open_for_append(path: &Path, file_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let file_size = file.metadata()?.len() as usize;
        let block_offset = file_size % BLOCK_SIZE;

        Ok(Self::with_file(file, block_offset, path, file_number, sync_mode))
    }

    fn with_file(
        file: File,
        block_offset: usize,
        path: &Path,
        file_number: u64,
        sync_mode: SyncMode,
    ) -> Self {
        Self {
            writer: BufWriter::with_capacity(BLOCK_SIZE * 4, file),
            block_offset,
            sync_mode,
            bytes_since_sync: 0,
            file_number,
            path: path.to_path_buf(),
            scratch: BytesMut::with_capacity(512),
        }
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the manifest file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a VersionEdit.
    ///
    /// Fails without writing anything if the edit cannot be encoded.
    pub fn add_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        let mut data = std::mem::take(&mut self.scratch);
        data.clear();
        if !edit.append_encoded_to(&mut data) {
            self.scratch = data;
            return Err(Error::manifest(format!(
                "version edit for column family {} cannot be encoded",
                edit.column_family()
            )));
        }
        trace!(
            manifest = self.file_number,
            bytes = data.len(),
            "appending version edit"
        );
        let result = self.add_record(&data);
        self.scratch = data;
        result
    }

    /// Add a raw record to the manifest.
    fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data.len();
        let mut ptr = 0;
        let mut begin = true;

        // An empty record still emits one zero-length fragment.
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;

            if leftover < HEADER_SIZE {
                if leftover > 0 {
                    self.writer.write_all(&[0u8; HEADER_SIZE][..leftover])?;
                    self.bytes_since_sync += leftover;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_length = left.min(avail);
            let end = left == fragment_length;

            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &data[ptr..ptr + fragment_length])?;

            ptr += fragment_length;
            left -= fragment_length;
            begin = false;
            if left == 0 {
                break;
            }
        }

        self.maybe_sync()
    }

    /// Write a physical record (header + data).
    fn emit_physical_record(&mut self, record_type: RecordType, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= 0xFFFF);
        debug_assert!(self.block_offset + HEADER_SIZE + data.len() <= BLOCK_SIZE);

        let crc = crc32_multi(&[&[record_type.to_byte()][..], data]);

        // Header format: CRC (4) + Length (2) + Type (1)
        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&crc.to_le_bytes());
        header[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        header[6] = record_type.to_byte();

        self.writer.write_all(&header)?;
        self.writer.write_all(data)?;

        let record_size = HEADER_SIZE + data.len();
        self.block_offset += record_size;
        self.bytes_since_sync += record_size;

        Ok(())
    }

    /// Sync if required by sync mode.
    fn maybe_sync(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Always => self.sync(),
            SyncMode::Bytes { bytes } if self.bytes_since_sync >= bytes => self.sync(),
            SyncMode::Bytes { .. } | SyncMode::None => self.flush(),
        }
    }

    /// Force a sync to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    /// Flush buffered data (but don't sync to disk).
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Close the writer.
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

/// Manifest file reader.
///
/// Reads and replays VersionEdits from a manifest file.
pub struct ManifestReader {
    /// Buffered reader for the manifest file.
    reader: BufReader<File>,
    /// Current block buffer.
    buffer: Vec<u8>,
    /// Current position within the buffer.
    buffer_offset: usize,
    /// Valid bytes in the buffer.
    buffer_size: usize,
    /// Whether we've reached EOF.
    eof: bool,
    /// Whether checksum errors are fatal.
    checksum_errors_are_fatal: bool,
    /// File number for this manifest.
    file_number: u64,
    /// Records handed out so far.
    records_read: u64,
}

impl ManifestReader {
    /// Create a new manifest reader.
    pub fn new(path: &Path, file_number: u64) -> Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            reader: BufReader::with_capacity(BLOCK_SIZE * 4, file),
            buffer: vec![0u8; BLOCK_SIZE],
            buffer_offset: 0,
            buffer_size: 0,
            eof: false,
            checksum_errors_are_fatal: true,
            file_number,
            records_read: 0,
        })
    }

    /// Set whether checksum errors should be fatal.
    ///
    /// When not fatal, damaged blocks are skipped with a warning.
    pub fn set_checksum_errors_fatal(&mut self, fatal: bool) {
        self.checksum_errors_are_fatal = fatal;
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Number of records read so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Read the next VersionEdit.
    ///
    /// Returns None when there are no more edits.
    pub fn read_edit(
        &mut self,
        extractor: &dyn BoundaryValuesExtractor,
    ) -> Result<Option<VersionEdit>> {
        match self.read_record()? {
            Some(data) => {
                let edit = VersionEdit::decode_from(extractor, &data).map_err(|err| {
                    warn!(
                        manifest = self.file_number,
                        record = self.records_read,
                        error = %err,
                        "failed to decode version edit"
                    );
                    err
                })?;
                Ok(Some(edit))
            }
            None => Ok(None),
        }
    }

    /// Read all VersionEdits from the manifest.
    pub fn read_all_edits(
        &mut self,
        extractor: &dyn BoundaryValuesExtractor,
    ) -> Result<Vec<VersionEdit>> {
        let mut edits = Vec::new();
        while let Some(edit) = self.read_edit(extractor)? {
            edits.push(edit);
        }
        debug!(manifest = self.file_number, edits = edits.len(), "read manifest");
        Ok(edits)
    }

    /// Read the next logical record.
    fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;

        loop {
            let Some((record_type, data)) = self.read_physical_record()? else {
                if in_fragmented_record {
                    warn!(manifest = self.file_number, "manifest ends inside a fragmented record");
                }
                return Ok(None);
            };

            match record_type {
                RecordType::Full => {
                    if in_fragmented_record {
                        self.report_drop("partial record without end")?;
                    }
                    self.records_read += 1;
                    return Ok(Some(data));
                }
                RecordType::First => {
                    if in_fragmented_record {
                        self.report_drop("partial record without end")?;
                    }
                    scratch.clear();
                    scratch.extend_from_slice(&data);
                    in_fragmented_record = true;
                }
                RecordType::Middle => {
                    if !in_fragmented_record {
                        self.report_drop("unexpected middle record fragment")?;
                        continue;
                    }
                    scratch.extend_from_slice(&data);
                }
                RecordType::Last => {
                    if !in_fragmented_record {
                        self.report_drop("unexpected last record fragment")?;
                        continue;
                    }
                    scratch.extend_from_slice(&data);
                    self.records_read += 1;
                    return Ok(Some(scratch));
                }
                RecordType::Zero => {}
            }
        }
    }

    /// Fail on damage in paranoid mode, otherwise log and carry on.
    fn report_drop(&self, reason: &str) -> Result<()> {
        if self.checksum_errors_are_fatal {
            return Err(Error::corruption(reason.to_string()));
        }
        warn!(manifest = self.file_number, reason, "skipping damaged manifest data");
        Ok(())
    }

    /// Read a physical record from the current position.
    fn read_physical_record(&mut self) -> Result<Option<(RecordType, Vec<u8>)>> {
        loop {
            if self.buffer_offset + HEADER_SIZE > self.buffer_size {
                if !self.read_block()? {
                    return Ok(None);
                }
                continue;
            }

            let header = &self.buffer[self.buffer_offset..self.buffer_offset + HEADER_SIZE];
            let crc_expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let record_type_byte = header[6];

            // Zero-filled block tail.
            if record_type_byte == 0 && crc_expected == 0 && length == 0 {
                self.buffer_offset = self.buffer_size;
                continue;
            }

            let Some(record_type) = RecordType::from_byte(record_type_byte) else {
                self.report_drop("invalid record type")?;
                self.buffer_offset = self.buffer_size;
                continue;
            };

            if self.buffer_offset + HEADER_SIZE + length > self.buffer_size {
                if self.eof {
                    // Torn write at the tail of the log.
                    warn!(manifest = self.file_number, "truncated record at end of manifest");
                    return Ok(None);
                }
                self.report_drop("record extends beyond block")?;
                self.buffer_offset = self.buffer_size;
                continue;
            }

            let data_start = self.buffer_offset + HEADER_SIZE;
            let data_end = data_start + length;
            let data = &self.buffer[data_start..data_end];

            let crc_actual = crc32_multi(&[&[record_type_byte][..], data]);
            if crc_expected != crc_actual {
                if self.checksum_errors_are_fatal {
                    return Err(Error::CrcMismatch {
                        expected: crc_expected,
                        actual: crc_actual,
                    });
                }
                warn!(
                    manifest = self.file_number,
                    expected = crc_expected,
                    actual = crc_actual,
                    "skipping manifest block with bad checksum"
                );
                self.buffer_offset = self.buffer_size;
                continue;
            }

            let data = data.to_vec();
            self.buffer_offset = data_end;
            return Ok(Some((record_type, data)));
        }
    }

    /// Read the next block into the buffer.
    fn read_block(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }

        self.buffer_offset = 0;
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.reader.read(&mut self.buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        self.buffer_size = filled;
        if filled < BLOCK_SIZE {
            self.eof = true;
        }

        Ok(filled > 0)
    }
}

/// Manifest file manager.
///
/// Owns the writer of the active manifest.
pub struct Manifest {
    /// Current manifest writer.
    writer: ManifestWriter,
    /// Current manifest file number.
    manifest_number: u64,
}

impl Manifest {
    /// Create a new manifest.
    pub fn create(db_path: &Path, manifest_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let manifest_path = manifest_file_path(db_path, manifest_number);
        let writer = ManifestWriter::new(&manifest_path, manifest_number, sync_mode)?;
        debug!(path = %manifest_path.display(), "created manifest");

        Ok(Self {
            writer,
            manifest_number,
        })
    }

    /// Open an existing manifest for appending.
    pub fn open(db_path: &Path, manifest_number: u64, sync_mode: SyncMode) -> Result<Self> {
        let manifest_path = manifest_file_path(db_path, manifest_number);
        let writer = ManifestWriter::open_for_append(&manifest_path, manifest_number, sync_mode)?;

        Ok(Self {
            writer,
            manifest_number,
        })
    }

    /// Get the current manifest number.
    pub fn manifest_number(&self) -> u64 {
        self.manifest_number
    }

    /// Add a VersionEdit to the manifest.
    pub fn log_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        self.writer.add_edit(edit)
    }

    /// Sync the manifest to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    /// Recover by reading all edits from a manifest file.
    pub fn recover(
        db_path: &Path,
        manifest_number: u64,
        extractor: &dyn BoundaryValuesExtractor,
        paranoid_checks: bool,
    ) -> Result<Vec<VersionEdit>> {
        let manifest_path = manifest_file_path(db_path, manifest_number);
        let mut reader = ManifestReader::new(&manifest_path, manifest_number)?;
        reader.set_checksum_errors_fatal(paranoid_checks);
        reader.read_all_edits(extractor)
    }

    /// Close the manifest.
    pub fn close(self) -> Result<()> {
        self.writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InternalKey;
    use crate::version::{DefaultBoundaryValuesExtractor, FileDescriptor, FileMetaData};
    use bytes::Bytes;
    use std::fs;
    use tempfile::tempdir;

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::for_value(Bytes::copy_from_slice(user_key), seq)
    }

    fn make_file(number: u64, size: u64, smallest: InternalKey, largest: InternalKey) -> FileMetaData {
        FileMetaData::with_boundaries(FileDescriptor::new(number, 0, size, size), smallest, largest)
    }

    fn read_all(path: &Path) -> Result<Vec<VersionEdit>> {
        let mut reader = ManifestReader::new(path, 1)?;
        reader.read_all_edits(&DefaultBoundaryValuesExtractor)
    }

    #[test]
    fn test_manifest_writer_reader_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        let writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();
        writer.close().unwrap();

        let mut reader = ManifestReader::new(&path, 1).unwrap();
        assert!(reader
            .read_edit(&DefaultBoundaryValuesExtractor)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_manifest_writer_reader_single_edit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        let mut writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();

        let mut edit = VersionEdit::new();
        edit.set_comparator_name("bytewise");
        edit.set_log_number(10);
        edit.set_next_file(100);

        writer.add_edit(&edit).unwrap();
        writer.close().unwrap();

        let mut reader = ManifestReader::new(&path, 1).unwrap();
        let recovered = reader
            .read_edit(&DefaultBoundaryValuesExtractor)
            .unwrap()
            .unwrap();

        assert_eq!(recovered, edit);
        assert_eq!(reader.records_read(), 1);
        assert!(reader
            .read_edit(&DefaultBoundaryValuesExtractor)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_manifest_writer_reader_multiple_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        let mut writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();

        for i in 0..10u64 {
            let mut edit = VersionEdit::new();
            edit.set_last_sequence(i * 100);
            edit.add_file(
                (i % 7) as usize,
                make_file(i, 1024 * (i + 1), make_key(b"start", i), make_key(b"end", i + 100)),
            );
            writer.add_edit(&edit).unwrap();
        }

        writer.close().unwrap();

        let edits = read_all(&path).unwrap();
        assert_eq!(edits.len(), 10);
        for (i, edit) in edits.iter().enumerate() {
            assert_eq!(edit.last_sequence(), Some((i as u64) * 100));
            assert_eq!(edit.new_files().len(), 1);
            assert_eq!(edit.new_files()[0].0, i % 7);
        }
    }

    #[test]
    fn test_manifest_fragmented_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        // Large enough to span several blocks.
        let mut edit = VersionEdit::new();
        for i in 0..2000u64 {
            let user_key = format!("key-{:08}-{}", i, "x".repeat(20));
            edit.add_file(
                1,
                make_file(
                    i + 1,
                    4096,
                    make_key(user_key.as_bytes(), i),
                    make_key(user_key.as_bytes(), i + 1),
                ),
            );
        }

        let mut writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();
        writer.add_edit(&edit).unwrap();
        let mut tail = VersionEdit::new();
        tail.set_log_number(77);
        writer.add_edit(&tail).unwrap();
        writer.close().unwrap();

        assert!(fs::metadata(&path).unwrap().len() > 2 * BLOCK_SIZE as u64);

        let edits = read_all(&path).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0], edit);
        assert_eq!(edits[1].log_number(), Some(77));
    }

    #[test]
    fn test_manifest_with_deleted_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        let mut writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();

        let mut edit = VersionEdit::new();
        edit.delete_file(0, 1);
        edit.delete_file(0, 2);
        edit.delete_file(1, 5);
        edit.add_file(1, make_file(10, 2048, make_key(b"a", 1), make_key(b"z", 100)));

        writer.add_edit(&edit).unwrap();
        writer.close().unwrap();

        let recovered = read_all(&path).unwrap().remove(0);
        assert_eq!(recovered.deleted_files().len(), 3);
        assert!(recovered.deleted_files().contains(&(0, 1)));
        assert!(recovered.deleted_files().contains(&(0, 2)));
        assert!(recovered.deleted_files().contains(&(1, 5)));
        assert_eq!(recovered.new_files().len(), 1);
    }

    #[test]
    fn test_unencodable_edit_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        let mut writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();
        let mut file = FileMetaData::new(FileDescriptor::new(3, 0, 1, 1));
        file.smallest.seqno = 0;
        let mut edit = VersionEdit::new();
        edit.add_file(0, file);

        assert!(matches!(writer.add_edit(&edit), Err(Error::ManifestError(_))));
        writer.close().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_corrupted_record_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        let mut writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();
        let mut edit = VersionEdit::new();
        edit.set_log_number(5);
        writer.add_edit(&edit).unwrap();
        writer.close().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let err = read_all(&path).unwrap_err();
        assert!(err.is_corruption());

        let mut reader = ManifestReader::new(&path, 1).unwrap();
        reader.set_checksum_errors_fatal(false);
        let edits = reader.read_all_edits(&DefaultBoundaryValuesExtractor).unwrap();
        assert!(edits.is_empty());
    }

    #[test]
    fn test_manifest_manager() {
        let dir = tempdir().unwrap();

        let mut manifest = Manifest::create(dir.path(), 1, SyncMode::None).unwrap();
        assert_eq!(manifest.manifest_number(), 1);

        let mut edit = VersionEdit::new();
        edit.set_log_number(5);
        edit.set_next_file(50);

        manifest.log_edit(&edit).unwrap();
        manifest.sync().unwrap();
        manifest.close().unwrap();

        let edits = Manifest::recover(dir.path(), 1, &DefaultBoundaryValuesExtractor, true).unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].log_number(), Some(5));
    }

    #[test]
    fn test_manifest_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("MANIFEST-000001");

        {
            let mut writer = ManifestWriter::new(&path, 1, SyncMode::None).unwrap();
            let mut edit = VersionEdit::new();
            edit.set_log_number(1);
            writer.add_edit(&edit).unwrap();
            writer.close().unwrap();
        }

        {
            let mut writer = ManifestWriter::open_for_append(&path, 1, SyncMode::Always).unwrap();
            let mut edit = VersionEdit::new();
            edit.set_log_number(2);
            writer.add_edit(&edit).unwrap();
            writer.close().unwrap();
        }

        let edits = read_all(&path).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].log_number(), Some(1));
        assert_eq!(edits[1].log_number(), Some(2));
    }
}
