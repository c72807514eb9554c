//! VersionEdit - describes changes between versions.

use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::options::{BYTEWISE_COMPARATOR_NAME, MAX_LEVELS};
use crate::types::{InternalKey, OpId, SequenceNumber};
use crate::util::coding::{
    decode_length_prefixed, decode_varint32, decode_varint64, decode_varint_signed,
    encode_length_prefixed, encode_varint32, encode_varint64, encode_varint_signed,
};
use crate::{Error, Result};

use super::{
    BoundaryTag, BoundaryValuesExtractor, EditTag, FileBoundaryValues, FileDescriptor,
    FileMetaData, NewFileTag,
};

/// Files added by an edit, in insertion order: (level, metadata).
pub type NewFiles = Vec<(usize, FileMetaData)>;

/// Files removed by an edit: (level, file number).
pub type DeletedFileSet = BTreeSet<(usize, u64)>;

/// A VersionEdit describes the changes between two Versions.
///
/// An edit is either a file edit (files added and removed, log and sequence
/// bookkeeping) or a column family add or drop. Once an add or drop is
/// recorded the edit accepts no file changes, and vice versa.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    comparator: Option<String>,
    log_number: Option<u64>,
    prev_log_number: Option<u64>,
    next_file_number: Option<u64>,
    max_column_family: Option<u32>,
    last_sequence: Option<SequenceNumber>,
    flushed_op_id: OpId,
    deleted_files: DeletedFileSet,
    new_files: NewFiles,
    column_family: u32,
    column_family_name: Option<String>,
    is_column_family_drop: bool,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the empty edit.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Fill in the fields of the first edit of a new database.
    pub fn init_new_db(&mut self) {
        self.set_comparator_name(BYTEWISE_COMPARATOR_NAME);
        self.set_log_number(0);
        self.set_next_file(2);
        self.set_last_sequence(0);
        self.set_flushed_op_id(OpId::default());
    }

    /// Get the comparator name.
    pub fn comparator_name(&self) -> Option<&str> {
        self.comparator.as_deref()
    }

    /// Set the comparator name.
    pub fn set_comparator_name(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    /// Get the log number.
    pub fn log_number(&self) -> Option<u64> {
        self.log_number
    }

    /// Set the log number.
    pub fn set_log_number(&mut self, num: u64) {
        self.log_number = Some(num);
    }

    /// Get the previous log number.
    pub fn prev_log_number(&self) -> Option<u64> {
        self.prev_log_number
    }

    /// Set the previous log number.
    pub fn set_prev_log_number(&mut self, num: u64) {
        self.prev_log_number = Some(num);
    }

    /// Get the next file number.
    pub fn next_file_number(&self) -> Option<u64> {
        self.next_file_number
    }

    /// Set the next file number.
    pub fn set_next_file(&mut self, num: u64) {
        self.next_file_number = Some(num);
    }

    /// Get the highest column family id handed out.
    pub fn max_column_family(&self) -> Option<u32> {
        self.max_column_family
    }

    /// Set the highest column family id handed out.
    pub fn set_max_column_family(&mut self, id: u32) {
        self.max_column_family = Some(id);
    }

    /// Get the last sequence number.
    pub fn last_sequence(&self) -> Option<SequenceNumber> {
        self.last_sequence
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        self.last_sequence = Some(seq);
    }

    /// Get the op id durable in SSTs as of this edit.
    pub fn flushed_op_id(&self) -> OpId {
        self.flushed_op_id
    }

    /// Set the op id durable in SSTs as of this edit.
    pub fn set_flushed_op_id(&mut self, op_id: OpId) {
        self.flushed_op_id = op_id;
    }

    /// Set the flushed op id from its parts.
    pub fn set_flushed_op_id_parts(&mut self, term: i64, index: i64) {
        self.set_flushed_op_id(OpId::new(term, index));
    }

    /// Files added by this edit.
    pub fn new_files(&self) -> &NewFiles {
        &self.new_files
    }

    /// Files removed by this edit.
    pub fn deleted_files(&self) -> &DeletedFileSet {
        &self.deleted_files
    }

    /// Column family the edit applies to.
    pub fn column_family(&self) -> u32 {
        self.column_family
    }

    /// Set the column family the edit applies to.
    pub fn set_column_family(&mut self, column_family: u32) {
        self.column_family = column_family;
    }

    /// Name of the column family created by this edit.
    pub fn column_family_name(&self) -> Option<&str> {
        self.column_family_name.as_deref()
    }

    /// Whether the edit drops its column family.
    pub fn is_column_family_drop(&self) -> bool {
        self.is_column_family_drop
    }

    /// Whether the edit creates a column family.
    pub fn is_column_family_add(&self) -> bool {
        self.column_family_name.is_some()
    }

    /// Whether the edit creates or drops a column family.
    pub fn is_column_family_manipulation(&self) -> bool {
        self.is_column_family_add() || self.is_column_family_drop
    }

    /// Number of file additions plus deletions.
    pub fn num_entries(&self) -> usize {
        self.new_files.len() + self.deleted_files.len()
    }

    /// Add a file at `level`.
    ///
    /// # Panics
    ///
    /// Panics when the file's smallest seqno exceeds its largest, when the
    /// level is out of range, or when the edit creates or drops a column
    /// family.
    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.check_file_edit_allowed();
        assert!(level < MAX_LEVELS, "level {} out of range", level);
        assert!(
            file.has_ordered_seqnos(),
            "file {}: smallest seqno {} exceeds largest seqno {}",
            file.number(),
            file.smallest.seqno,
            file.largest.seqno
        );
        self.new_files.push((level, file));
    }

    /// Add a copy of `file` holding only the fields needed after a restart.
    pub fn add_cleaned_file(&mut self, level: usize, file: &FileMetaData) {
        self.add_file(level, file.cleaned());
    }

    /// Add a file from raw boundaries. The last op id is derived from the
    /// largest seqno.
    pub fn add_test_file(
        &mut self,
        level: usize,
        fd: FileDescriptor,
        smallest: FileBoundaryValues,
        largest: FileBoundaryValues,
        marked_for_compaction: bool,
    ) {
        let mut file = FileMetaData::new(fd);
        file.last_op_id = OpId::new(1, largest.seqno as i64);
        file.smallest = smallest;
        file.largest = largest;
        file.marked_for_compaction = marked_for_compaction;
        self.add_file(level, file);
    }

    /// Mark a file for deletion. Repeated calls are no-ops.
    ///
    /// # Panics
    ///
    /// Panics when the edit creates or drops a column family.
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.check_file_edit_allowed();
        self.deleted_files.insert((level, file_number));
    }

    /// Turn this edit into the creation of column family `name`.
    ///
    /// # Panics
    ///
    /// Panics if the edit already drops a column family or touches files.
    pub fn add_column_family(&mut self, name: impl Into<String>) {
        assert!(
            !self.is_column_family_drop,
            "cannot add a column family in an edit that drops one"
        );
        assert_eq!(
            self.num_entries(),
            0,
            "cannot add a column family in an edit with file changes"
        );
        self.column_family_name = Some(name.into());
    }

    /// Turn this edit into the drop of its column family.
    ///
    /// # Panics
    ///
    /// Panics if the edit already adds a column family or touches files.
    pub fn drop_column_family(&mut self) {
        assert!(
            self.column_family_name.is_none(),
            "cannot drop a column family in an edit that adds one"
        );
        assert_eq!(
            self.num_entries(),
            0,
            "cannot drop a column family in an edit with file changes"
        );
        self.is_column_family_drop = true;
    }

    fn check_file_edit_allowed(&self) {
        assert!(
            !self.is_column_family_manipulation(),
            "file changes cannot be combined with a column family add or drop"
        );
    }

    /// Check what the wire format cannot carry. Nothing has been written yet
    /// when this fails.
    fn check_encodable(&self) -> std::result::Result<(), String> {
        if self.column_family_name.is_some() && self.is_column_family_drop {
            return Err("column family both added and dropped".into());
        }
        if self.is_column_family_manipulation() && self.num_entries() > 0 {
            return Err("column family add or drop combined with file changes".into());
        }
        for (level, file) in &self.new_files {
            if *level >= MAX_LEVELS {
                return Err(format!("file {} at invalid level {}", file.number(), level));
            }
            if file.smallest.key.is_none() || file.largest.key.is_none() {
                return Err(format!("file {} has no boundary keys", file.number()));
            }
            if !file.has_ordered_seqnos() {
                return Err(format!("file {} has inverted seqno bounds", file.number()));
            }
        }
        Ok(())
    }

    /// Append the persisted form of this edit to `dst`.
    ///
    /// Returns false, appending nothing, when the edit is internally
    /// inconsistent.
    pub fn append_encoded_to(&self, dst: &mut BytesMut) -> bool {
        if let Err(reason) = self.check_encodable() {
            warn!(column_family = self.column_family, %reason, "refusing to encode version edit");
            return false;
        }

        if let Some(ref name) = self.comparator {
            dst.put_u8(EditTag::Comparator.to_byte());
            encode_length_prefixed(dst, name.as_bytes());
        }
        if let Some(num) = self.log_number {
            dst.put_u8(EditTag::LogNumber.to_byte());
            encode_varint64(dst, num);
        }
        if let Some(num) = self.prev_log_number {
            dst.put_u8(EditTag::PrevLogNumber.to_byte());
            encode_varint64(dst, num);
        }
        if let Some(num) = self.next_file_number {
            dst.put_u8(EditTag::NextFileNumber.to_byte());
            encode_varint64(dst, num);
        }
        if let Some(id) = self.max_column_family {
            dst.put_u8(EditTag::MaxColumnFamily.to_byte());
            encode_varint32(dst, id);
        }
        if let Some(seq) = self.last_sequence {
            dst.put_u8(EditTag::LastSequence.to_byte());
            encode_varint64(dst, seq);
        }

        dst.put_u8(EditTag::FlushedOpId.to_byte());
        encode_op_id(dst, self.flushed_op_id);

        for &(level, file_number) in &self.deleted_files {
            dst.put_u8(EditTag::DeletedFile.to_byte());
            encode_varint64(dst, level as u64);
            encode_varint64(dst, file_number);
        }

        let mut record = BytesMut::new();
        for (level, file) in &self.new_files {
            record.clear();
            encode_new_file(&mut record, *level, file);
            dst.put_u8(EditTag::NewFile.to_byte());
            encode_length_prefixed(dst, &record);
        }

        if self.column_family != 0 {
            dst.put_u8(EditTag::ColumnFamily.to_byte());
            encode_varint32(dst, self.column_family);
        }
        if let Some(ref name) = self.column_family_name {
            dst.put_u8(EditTag::ColumnFamilyAdd.to_byte());
            encode_length_prefixed(dst, name.as_bytes());
        }
        if self.is_column_family_drop {
            dst.put_u8(EditTag::ColumnFamilyDrop.to_byte());
            dst.put_u8(COLUMN_FAMILY_DROP_FLAG);
        }

        true
    }

    /// Encode the edit into a fresh buffer.
    pub fn encode(&self) -> Option<Bytes> {
        let mut buf = BytesMut::with_capacity(256);
        self.append_encoded_to(&mut buf).then(|| buf.freeze())
    }

    /// Decode an edit, using `extractor` for user boundary values.
    pub fn decode_from(extractor: &dyn BoundaryValuesExtractor, data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut cursor = data;

        while !cursor.is_empty() {
            let tag = cursor.get_u8();
            let tag = EditTag::from_byte(tag)
                .ok_or_else(|| Error::corruption(format!("unknown edit tag: {}", tag)))?;

            match tag {
                EditTag::Comparator => {
                    edit.comparator = Some(read_string(&mut cursor, "comparator name")?);
                }
                EditTag::LogNumber => {
                    edit.log_number = Some(read_varint64(&mut cursor, "log number")?);
                }
                EditTag::PrevLogNumber => {
                    edit.prev_log_number = Some(read_varint64(&mut cursor, "previous log number")?);
                }
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(read_varint64(&mut cursor, "next file number")?);
                }
                EditTag::MaxColumnFamily => {
                    edit.max_column_family = Some(read_varint32(&mut cursor, "max column family")?);
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(read_varint64(&mut cursor, "last sequence")?);
                }
                EditTag::FlushedOpId => {
                    edit.flushed_op_id = read_op_id(&mut cursor, "flushed op id")?;
                }
                EditTag::DeletedFile => {
                    let level = read_level(&mut cursor, "deleted file")?;
                    let file_number = read_varint64(&mut cursor, "deleted file number")?;
                    edit.deleted_files.insert((level, file_number));
                }
                EditTag::NewFile => {
                    let record = read_slice(&mut cursor, "new file")?;
                    edit.new_files.push(decode_new_file(extractor, record)?);
                }
                EditTag::ColumnFamily => {
                    edit.column_family = read_varint32(&mut cursor, "column family")?;
                }
                EditTag::ColumnFamilyAdd => {
                    edit.column_family_name = Some(read_string(&mut cursor, "column family name")?);
                }
                EditTag::ColumnFamilyDrop => {
                    match read_u8(&mut cursor, "column family drop")? {
                        COLUMN_FAMILY_DROP_FLAG => edit.is_column_family_drop = true,
                        flag => {
                            return Err(Error::corruption(format!(
                                "invalid column family drop flag: {}",
                                flag
                            )))
                        }
                    }
                }
            }
        }

        if edit.column_family_name.is_some() && edit.is_column_family_drop {
            return Err(Error::corruption("column family both added and dropped"));
        }
        if edit.is_column_family_manipulation() && edit.num_entries() > 0 {
            return Err(Error::corruption(
                "column family add or drop combined with file changes",
            ));
        }

        Ok(edit)
    }
}

/// Payload of the drop tag. A drop cut off after its tag must not decode as
/// a plain edit.
const COLUMN_FAMILY_DROP_FLAG: u8 = 1;

fn encode_op_id(dst: &mut BytesMut, op_id: OpId) {
    encode_varint_signed(dst, op_id.term);
    encode_varint_signed(dst, op_id.index);
}

fn encode_new_file(dst: &mut BytesMut, level: usize, file: &FileMetaData) {
    dst.put_u8(NewFileTag::Level.to_byte());
    encode_varint64(dst, level as u64);
    dst.put_u8(NewFileTag::Number.to_byte());
    encode_varint64(dst, file.fd.number());
    if file.fd.path_id() != 0 {
        dst.put_u8(NewFileTag::PathId.to_byte());
        encode_varint32(dst, file.fd.path_id());
    }
    dst.put_u8(NewFileTag::TotalSize.to_byte());
    encode_varint64(dst, file.fd.total_file_size());
    dst.put_u8(NewFileTag::BaseSize.to_byte());
    encode_varint64(dst, file.fd.base_file_size());

    let mut boundary = BytesMut::new();
    encode_boundary(&mut boundary, &file.smallest);
    dst.put_u8(NewFileTag::Smallest.to_byte());
    encode_length_prefixed(dst, &boundary);

    boundary.clear();
    encode_boundary(&mut boundary, &file.largest);
    dst.put_u8(NewFileTag::Largest.to_byte());
    encode_length_prefixed(dst, &boundary);

    if file.last_op_id != OpId::default() {
        dst.put_u8(NewFileTag::LastOpId.to_byte());
        encode_op_id(dst, file.last_op_id);
    }
    if file.imported {
        dst.put_u8(NewFileTag::Imported.to_byte());
    }
    if file.compensated_file_size() != 0 {
        dst.put_u8(NewFileTag::CompensatedSize.to_byte());
        encode_varint64(dst, file.compensated_file_size());
    }
    if file.init_stats_from_file
        || file.num_entries != 0
        || file.num_deletions != 0
        || file.raw_key_size != 0
        || file.raw_value_size != 0
    {
        dst.put_u8(NewFileTag::Stats.to_byte());
        encode_varint64(dst, file.num_entries);
        encode_varint64(dst, file.num_deletions);
        encode_varint64(dst, file.raw_key_size);
        encode_varint64(dst, file.raw_value_size);
        dst.put_u8(file.init_stats_from_file as u8);
    }
    if file.marked_for_compaction {
        dst.put_u8(NewFileTag::MarkedForCompaction.to_byte());
    }
}

fn encode_boundary(dst: &mut BytesMut, boundary: &FileBoundaryValues) {
    if let Some(ref key) = boundary.key {
        dst.put_u8(BoundaryTag::Key.to_byte());
        encode_varint64(dst, key.encoded_len() as u64);
        key.encode_to(dst);
    }
    dst.put_u8(BoundaryTag::Seqno.to_byte());
    encode_varint64(dst, boundary.seqno);
    for value in &boundary.user_values {
        dst.put_u8(BoundaryTag::UserValue.to_byte());
        encode_varint32(dst, value.tag());
        encode_length_prefixed(dst, &value.encode());
    }
    if let Some(ref frontier) = boundary.user_frontier {
        dst.put_u8(BoundaryTag::Frontier.to_byte());
        encode_length_prefixed(dst, &frontier.encode());
    }
}

fn decode_new_file(
    extractor: &dyn BoundaryValuesExtractor,
    mut cursor: &[u8],
) -> Result<(usize, FileMetaData)> {
    let mut level = None;
    let mut number = None;
    let mut path_id = 0;
    let mut total_size = None;
    let mut base_size = None;
    let mut smallest = None;
    let mut largest = None;
    let mut last_op_id = OpId::default();
    let mut imported = false;
    let mut compensated_size = 0;
    let mut stats = None;
    let mut marked_for_compaction = false;

    while !cursor.is_empty() {
        let tag = cursor.get_u8();
        let tag = NewFileTag::from_byte(tag)
            .ok_or_else(|| Error::corruption(format!("unknown new file tag: {}", tag)))?;

        match tag {
            NewFileTag::Level => level = Some(read_level(&mut cursor, "new file")?),
            NewFileTag::Number => number = Some(read_varint64(&mut cursor, "file number")?),
            NewFileTag::PathId => path_id = read_varint32(&mut cursor, "path id")?,
            NewFileTag::TotalSize => total_size = Some(read_varint64(&mut cursor, "total file size")?),
            NewFileTag::BaseSize => base_size = Some(read_varint64(&mut cursor, "base file size")?),
            NewFileTag::Smallest => {
                let record = read_slice(&mut cursor, "smallest boundary")?;
                smallest = Some(decode_boundary(extractor, record, "smallest")?);
            }
            NewFileTag::Largest => {
                let record = read_slice(&mut cursor, "largest boundary")?;
                largest = Some(decode_boundary(extractor, record, "largest")?);
            }
            NewFileTag::LastOpId => last_op_id = read_op_id(&mut cursor, "last op id")?,
            NewFileTag::Imported => imported = true,
            NewFileTag::CompensatedSize => {
                compensated_size = read_varint64(&mut cursor, "compensated file size")?;
            }
            NewFileTag::Stats => {
                let entries = read_varint64(&mut cursor, "num entries")?;
                let deletions = read_varint64(&mut cursor, "num deletions")?;
                let raw_key_size = read_varint64(&mut cursor, "raw key size")?;
                let raw_value_size = read_varint64(&mut cursor, "raw value size")?;
                let init_from_file = read_u8(&mut cursor, "stats flag")? != 0;
                stats = Some((entries, deletions, raw_key_size, raw_value_size, init_from_file));
            }
            NewFileTag::MarkedForCompaction => marked_for_compaction = true,
        }
    }

    let missing = |field: &str| Error::corruption(format!("new file record missing {}", field));
    let level = level.ok_or_else(|| missing("level"))?;
    let number = number.ok_or_else(|| missing("file number"))?;
    let total_size = total_size.ok_or_else(|| missing("total file size"))?;
    let base_size = base_size.ok_or_else(|| missing("base file size"))?;
    let smallest = smallest.ok_or_else(|| missing("smallest boundary"))?;
    let largest = largest.ok_or_else(|| missing("largest boundary"))?;

    let mut file = FileMetaData::new(FileDescriptor::try_new(number, path_id, total_size, base_size)?);
    file.smallest = smallest;
    file.largest = largest;
    if !file.has_ordered_seqnos() {
        return Err(Error::corruption(format!(
            "file {}: smallest seqno {} exceeds largest seqno {}",
            number, file.smallest.seqno, file.largest.seqno
        )));
    }
    file.last_op_id = last_op_id;
    file.imported = imported;
    if compensated_size != 0 {
        file.set_compensated_file_size(compensated_size);
    }
    if let Some((entries, deletions, raw_key_size, raw_value_size, init_from_file)) = stats {
        file.num_entries = entries;
        file.num_deletions = deletions;
        file.raw_key_size = raw_key_size;
        file.raw_value_size = raw_value_size;
        file.init_stats_from_file = init_from_file;
    }
    file.marked_for_compaction = marked_for_compaction;

    Ok((level, file))
}

fn decode_boundary(
    extractor: &dyn BoundaryValuesExtractor,
    mut cursor: &[u8],
    side: &str,
) -> Result<FileBoundaryValues> {
    let mut key = None;
    let mut seqno = None;
    let mut boundary = FileBoundaryValues::largest_unset();

    while !cursor.is_empty() {
        let tag = cursor.get_u8();
        let tag = BoundaryTag::from_byte(tag).ok_or_else(|| {
            Error::corruption(format!("unknown {} boundary tag: {}", side, tag))
        })?;

        match tag {
            BoundaryTag::Key => {
                let encoded = read_slice(&mut cursor, "boundary key")?;
                key = Some(InternalKey::decode(encoded).ok_or_else(|| {
                    Error::corruption(format!("invalid {} boundary key", side))
                })?);
            }
            BoundaryTag::Seqno => seqno = Some(read_varint64(&mut cursor, "boundary seqno")?),
            BoundaryTag::UserValue => {
                let value_tag = read_varint32(&mut cursor, "user value tag")?;
                let data = read_slice(&mut cursor, "user value")?;
                if let Some(value) = extractor.decode(value_tag, data)? {
                    boundary.user_values.push(value);
                }
            }
            BoundaryTag::Frontier => {
                let data = read_slice(&mut cursor, "user frontier")?;
                boundary.user_frontier = Some(extractor.decode_frontier(data)?);
            }
        }
    }

    boundary.key = Some(key.ok_or_else(|| {
        Error::corruption(format!("{} boundary missing key", side))
    })?);
    boundary.seqno =
        seqno.ok_or_else(|| Error::corruption(format!("{} boundary missing seqno", side)))?;
    Ok(boundary)
}

fn truncated(what: &str) -> Error {
    Error::corruption(format!("truncated {}", what))
}

fn read_u8(cursor: &mut &[u8], what: &str) -> Result<u8> {
    if cursor.is_empty() {
        return Err(truncated(what));
    }
    Ok(cursor.get_u8())
}

fn read_varint32(cursor: &mut &[u8], what: &str) -> Result<u32> {
    decode_varint32(cursor).ok_or_else(|| truncated(what))
}

fn read_varint64(cursor: &mut &[u8], what: &str) -> Result<u64> {
    decode_varint64(cursor).ok_or_else(|| truncated(what))
}

fn read_op_id(cursor: &mut &[u8], what: &str) -> Result<OpId> {
    let term = decode_varint_signed(cursor).ok_or_else(|| truncated(what))?;
    let index = decode_varint_signed(cursor).ok_or_else(|| truncated(what))?;
    Ok(OpId::new(term, index))
}

fn read_slice<'a>(cursor: &mut &'a [u8], what: &str) -> Result<&'a [u8]> {
    decode_length_prefixed(cursor).ok_or_else(|| truncated(what))
}

fn read_string(cursor: &mut &[u8], what: &str) -> Result<String> {
    let data = read_slice(cursor, what)?;
    String::from_utf8(data.to_vec()).map_err(|_| Error::corruption(format!("invalid {}", what)))
}

fn read_level(cursor: &mut &[u8], what: &str) -> Result<usize> {
    let level = read_varint64(cursor, what)?;
    if level >= MAX_LEVELS as u64 {
        return Err(Error::corruption(format!("invalid level for {}: {}", what, level)));
    }
    Ok(level as usize)
}
