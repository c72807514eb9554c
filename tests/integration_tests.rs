//! Integration tests for complete version set workflows.

use bytes::Bytes;
use lsm_version_edit::version::{BoundaryValuesBase, BytewiseBoundaryValue, UserBoundaryValueRef};
use lsm_version_edit::{
    ConsensusFrontier, DefaultBoundaryValuesExtractor, Error, FileDescriptor, FileMetaData,
    InternalKey, OpId, Options, OptionsBuilder, SyncMode, VersionEdit, VersionSet,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn open_with(path: &Path, options: Options) -> lsm_version_edit::Result<VersionSet> {
    VersionSet::open(path, Arc::new(options), Arc::new(DefaultBoundaryValuesExtractor))
}

fn open(path: &Path) -> VersionSet {
    open_with(path, Options::default()).unwrap()
}

fn key(user_key: &str, seq: u64) -> InternalKey {
    InternalKey::for_value(Bytes::copy_from_slice(user_key.as_bytes()), seq)
}

/// Build a flushed file the way a table builder would: one key at a time.
fn flushed_file(number: u64, keys: &[(&str, u64)], op_id: OpId) -> FileMetaData {
    let mut file = FileMetaData::new(FileDescriptor::new(number, 0, 4096, 3072));
    for &(user_key, seq) in keys {
        let mut source = BoundaryValuesBase::with_seqno(seq);
        let value: UserBoundaryValueRef = Arc::new(BytewiseBoundaryValue::new(
            7,
            Bytes::copy_from_slice(user_key.as_bytes()),
        ));
        source.user_values.push(value);
        source.user_frontier = Some(Box::new(ConsensusFrontier::new(op_id, seq * 10)));
        file.update_boundaries(key(user_key, seq), &source);
    }
    file.last_op_id = op_id;
    file
}

fn manifest_path(dir: &Path) -> std::path::PathBuf {
    let current = std::fs::read_to_string(dir.join("CURRENT")).unwrap();
    dir.join(current.trim())
}

/// Test flush then compaction, surviving a restart.
#[test]
fn integration_flush_and_compact() {
    let dir = TempDir::new().unwrap();

    {
        let vs = open(dir.path());

        // Flush two memtables
        for (i, range) in [("a", "m"), ("c", "z")].iter().enumerate() {
            let number = vs.new_file_number();
            let base = (i as u64) * 100;
            let op_id = OpId::new(1, base as i64 + 99);
            let mut edit = VersionEdit::new();
            edit.add_file(0, flushed_file(number, &[(range.0, base + 1), (range.1, base + 99)], op_id));
            edit.set_flushed_op_id(op_id);
            edit.set_last_sequence(base + 99);
            vs.log_and_apply(&mut edit).unwrap();
        }

        let current = vs.default_version().unwrap();
        assert_eq!(current.num_files(0), 2);
        // Newest first
        assert_eq!(current.files(0)[0].number(), 3);

        // Compact both into L1
        let output = vs.new_file_number();
        let mut edit = VersionEdit::new();
        edit.delete_file(0, 2);
        edit.delete_file(0, 3);
        edit.add_file(
            1,
            flushed_file(output, &[("a", 1), ("z", 199)], OpId::new(1, 199)),
        );
        vs.log_and_apply(&mut edit).unwrap();
    }

    let vs = open(dir.path());
    let current = vs.default_version().unwrap();
    assert_eq!(current.num_files(0), 0);
    assert_eq!(current.num_files(1), 1);
    assert_eq!(current.flushed_op_id(), OpId::new(1, 199));
    assert_eq!(vs.last_sequence(), 199);
    assert!(vs.next_file_number() > 4);

    let file = &current.files(1)[0];
    assert_eq!(file.smallest.key.as_ref().unwrap().user_key(), b"a");
    assert_eq!(file.largest.key.as_ref().unwrap().user_key(), b"z");
    assert_eq!(file.smallest.seqno, 1);
    assert_eq!(file.largest.seqno, 199);
    assert_eq!(file.fd.base_file_size(), 3072);
    assert_eq!(file.last_op_id, OpId::new(1, 199));

    // User values and frontiers come back through the extractor
    assert_eq!(file.smallest.user_values.len(), 1);
    assert_eq!(file.smallest.user_values[0].encode().as_ref(), b"a");
    assert_eq!(file.largest.user_values[0].encode().as_ref(), b"z");
    let frontier = file.largest.user_frontier.as_ref().unwrap();
    assert_eq!(frontier.to_json()["HybridTime"], 1990);
}

/// Test column families share one manifest.
#[test]
fn integration_column_families() {
    let dir = TempDir::new().unwrap();

    {
        let vs = open(dir.path());
        let users = vs.create_column_family("users").unwrap();
        let index = vs.create_column_family("index").unwrap();

        for (cf, number) in [(users, 10), (index, 11), (0, 12)] {
            let mut edit = VersionEdit::new();
            edit.set_column_family(cf);
            edit.add_file(0, flushed_file(number, &[("k", number)], OpId::default()));
            vs.log_and_apply(&mut edit).unwrap();
        }

        vs.drop_column_family(index).unwrap();
    }

    let vs = open(dir.path());
    assert_eq!(vs.column_families().len(), 2);
    let users = vs.column_family_id("users").unwrap();
    assert_eq!(vs.current(users).unwrap().files(0)[0].number(), 10);
    assert_eq!(vs.default_version().unwrap().files(0)[0].number(), 12);
    assert!(vs.column_family_id("index").is_none());
    assert!(vs.file_metadata(2, 11).is_none());
    assert!(matches!(
        vs.create_column_family("users"),
        Err(Error::ColumnFamilyExists(_))
    ));
}

/// Test that a reader keeps its version while edits are installed.
#[test]
fn integration_version_snapshots() {
    let dir = TempDir::new().unwrap();
    let vs = open(dir.path());

    let mut edit = VersionEdit::new();
    edit.add_file(1, flushed_file(20, &[("a", 1), ("b", 2)], OpId::default()));
    vs.log_and_apply(&mut edit).unwrap();

    let snapshot = vs.default_version().unwrap();

    let mut edit = VersionEdit::new();
    edit.delete_file(1, 20);
    vs.log_and_apply(&mut edit).unwrap();

    assert_eq!(snapshot.num_files(1), 1);
    assert_eq!(vs.default_version().unwrap().num_files(1), 0);
}

/// Test checksum damage handling with and without paranoid checks.
#[test]
fn integration_corrupted_manifest() {
    let dir = TempDir::new().unwrap();

    {
        let vs = open(dir.path());
        for number in [30, 31] {
            let mut edit = VersionEdit::new();
            edit.add_file(0, flushed_file(number, &[("a", number)], OpId::default()));
            vs.log_and_apply(&mut edit).unwrap();
        }
    }

    // Flip the last byte, inside the record adding file 31
    let path = manifest_path(dir.path());
    let mut data = std::fs::read(&path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xff;
    std::fs::write(&path, &data).unwrap();

    let err = open_with(dir.path(), Options::default()).err().unwrap();
    assert!(err.is_corruption());

    let options = OptionsBuilder::new().paranoid_checks(false).build().unwrap();
    let vs = open_with(dir.path(), options).unwrap();
    let current = vs.default_version().unwrap();
    assert_eq!(current.num_files(0), 1);
    assert_eq!(current.files(0)[0].number(), 30);
}

/// Test that a torn write at the manifest tail is ignored.
#[test]
fn integration_torn_manifest_tail() {
    let dir = TempDir::new().unwrap();

    {
        let vs = open(dir.path());
        let mut edit = VersionEdit::new();
        edit.add_file(0, flushed_file(40, &[("a", 1)], OpId::default()));
        vs.log_and_apply(&mut edit).unwrap();
    }

    // Header promising 100 bytes, followed by only three
    let mut file = OpenOptions::new()
        .append(true)
        .open(manifest_path(dir.path()))
        .unwrap();
    file.write_all(&[0, 0, 0, 0, 100, 0, 1, 1, 2, 3]).unwrap();
    drop(file);

    let vs = open(dir.path());
    assert_eq!(vs.default_version().unwrap().num_files(0), 1);
}

/// Test edits logged with every sync mode survive a reopen.
#[test]
fn integration_sync_modes() {
    for mode in [SyncMode::Always, SyncMode::Bytes { bytes: 64 }, SyncMode::None] {
        let dir = TempDir::new().unwrap();
        let options = OptionsBuilder::new().sync_mode(mode).build().unwrap();

        {
            let vs = open_with(dir.path(), options.clone()).unwrap();
            for number in 50..60 {
                let mut edit = VersionEdit::new();
                edit.add_file(0, flushed_file(number, &[("k", number)], OpId::default()));
                vs.log_and_apply(&mut edit).unwrap();
            }
        }

        let vs = open_with(dir.path(), options).unwrap();
        assert_eq!(vs.default_version().unwrap().num_files(0), 10, "{:?}", mode);
    }
}

/// Test edits naming levels beyond the configured count are rejected.
#[test]
fn integration_level_limit() {
    let dir = TempDir::new().unwrap();
    let options = OptionsBuilder::new().num_levels(3).build().unwrap();
    let vs = open_with(dir.path(), options).unwrap();

    let mut edit = VersionEdit::new();
    edit.add_file(5, flushed_file(60, &[("a", 1)], OpId::default()));
    assert!(vs.log_and_apply(&mut edit).unwrap_err().is_corruption());
    assert_eq!(vs.default_version().unwrap().total_files(), 0);
}
