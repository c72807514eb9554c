//! Human-readable and JSON renderings of version edits.

use serde_json::{json, Map, Value};

use crate::types::to_hex;

use super::{FileBoundaryValues, FileMetaData, VersionEdit};

/// Persisted fields of a new file beyond its identity and boundaries.
fn file_extras_string(file: &FileMetaData) -> String {
    let mut out = format!(" last_op_id: {}", file.last_op_id);
    if file.compensated_file_size() != 0 {
        out.push_str(&format!(" compensated: {}", file.compensated_file_size()));
    }
    if file.num_entries != 0
        || file.num_deletions != 0
        || file.raw_key_size != 0
        || file.raw_value_size != 0
        || file.init_stats_from_file
    {
        out.push_str(&format!(
            " stats: {{ entries: {} deletions: {} raw_key_size: {} raw_value_size: {} from_file: {} }}",
            file.num_entries,
            file.num_deletions,
            file.raw_key_size,
            file.raw_value_size,
            file.init_stats_from_file
        ));
    }
    if file.imported {
        out.push_str(" imported");
    }
    if file.marked_for_compaction {
        out.push_str(" marked_for_compaction");
    }
    out
}

fn boundary_string(boundary: &FileBoundaryValues, hex_key: bool) -> String {
    let mut out = String::from("{ key: ");
    match boundary.key {
        Some(ref key) => out.push_str(&key.debug_string(hex_key)),
        None => out.push_str("<unset>"),
    }
    out.push_str(&format!(" seqno: {}", boundary.seqno));
    if !boundary.user_values.is_empty() {
        let values: Vec<String> = boundary
            .user_values
            .iter()
            .map(|v| format!("{}:{}", v.tag(), to_hex(&v.encode())))
            .collect();
        out.push_str(&format!(" user_values: [{}]", values.join(", ")));
    }
    if let Some(ref frontier) = boundary.user_frontier {
        out.push_str(&format!(" frontier: {}", frontier.to_json()));
    }
    out.push_str(" }");
    out
}

fn boundary_json(boundary: &FileBoundaryValues, hex_key: bool) -> Value {
    let mut map = Map::new();
    if let Some(ref key) = boundary.key {
        map.insert("Key".into(), json!(key.debug_string(hex_key)));
    }
    map.insert("Seqno".into(), json!(boundary.seqno));
    if !boundary.user_values.is_empty() {
        let values: Vec<Value> = boundary
            .user_values
            .iter()
            .map(|v| json!({ "Tag": v.tag(), "Value": to_hex(&v.encode()) }))
            .collect();
        map.insert("UserValues".into(), Value::Array(values));
    }
    if let Some(ref frontier) = boundary.user_frontier {
        map.insert("Frontier".into(), frontier.to_json());
    }
    Value::Object(map)
}

impl VersionEdit {
    /// Multi-line dump of every set field. User keys are hex-encoded when
    /// `hex_key` is true.
    pub fn debug_string(&self, hex_key: bool) -> String {
        let mut r = String::from("VersionEdit {");
        if let Some(name) = self.comparator_name() {
            r.push_str(&format!("\n  Comparator: {}", name));
        }
        if let Some(num) = self.log_number() {
            r.push_str(&format!("\n  LogNumber: {}", num));
        }
        if let Some(num) = self.prev_log_number() {
            r.push_str(&format!("\n  PrevLogNumber: {}", num));
        }
        if let Some(num) = self.next_file_number() {
            r.push_str(&format!("\n  NextFileNumber: {}", num));
        }
        if let Some(seq) = self.last_sequence() {
            r.push_str(&format!("\n  LastSeq: {}", seq));
        }
        for (level, number) in self.deleted_files() {
            r.push_str(&format!("\n  DeleteFile: {} {}", level, number));
        }
        for (level, file) in self.new_files() {
            r.push_str(&format!(
                "\n  AddFile: {} {} {} {} {}{}",
                level,
                file.fd.number(),
                file.fd.total_file_size(),
                boundary_string(&file.smallest, hex_key),
                boundary_string(&file.largest, hex_key),
                file_extras_string(file),
            ));
        }
        r.push_str(&format!("\n  ColumnFamily: {}", self.column_family()));
        if let Some(name) = self.column_family_name() {
            r.push_str(&format!("\n  ColumnFamilyAdd: {}", name));
        }
        if self.is_column_family_drop() {
            r.push_str("\n  ColumnFamilyDrop");
        }
        if let Some(id) = self.max_column_family() {
            r.push_str(&format!("\n  MaxColumnFamily: {}", id));
        }
        r.push_str(&format!("\n  FlushedOpId: {}", self.flushed_op_id()));
        r.push_str("\n}\n");
        r
    }

    /// Single-line JSON dump, tagged with the edit's position in the manifest.
    pub fn debug_json(&self, edit_num: u64, hex_key: bool) -> String {
        let mut map = Map::new();
        map.insert("EditNumber".into(), json!(edit_num));
        if let Some(name) = self.comparator_name() {
            map.insert("Comparator".into(), json!(name));
        }
        if let Some(num) = self.log_number() {
            map.insert("LogNumber".into(), json!(num));
        }
        if let Some(num) = self.prev_log_number() {
            map.insert("PrevLogNumber".into(), json!(num));
        }
        if let Some(num) = self.next_file_number() {
            map.insert("NextFileNumber".into(), json!(num));
        }
        if let Some(seq) = self.last_sequence() {
            map.insert("LastSeq".into(), json!(seq));
        }
        if !self.deleted_files().is_empty() {
            let deleted: Vec<Value> = self
                .deleted_files()
                .iter()
                .map(|(level, number)| json!({ "Level": level, "FileNumber": number }))
                .collect();
            map.insert("DeletedFiles".into(), Value::Array(deleted));
        }
        if !self.new_files().is_empty() {
            let added: Vec<Value> = self
                .new_files()
                .iter()
                .map(|(level, file)| {
                    json!({
                        "Level": level,
                        "FileNumber": file.fd.number(),
                        "PathId": file.fd.path_id(),
                        "FileSize": file.fd.total_file_size(),
                        "BaseFileSize": file.fd.base_file_size(),
                        "Smallest": boundary_json(&file.smallest, hex_key),
                        "Largest": boundary_json(&file.largest, hex_key),
                        "LastOpId": file.last_op_id.to_string(),
                        "Imported": file.imported,
                        "MarkedForCompaction": file.marked_for_compaction,
                        "CompensatedFileSize": file.compensated_file_size(),
                        "NumEntries": file.num_entries,
                        "NumDeletions": file.num_deletions,
                        "RawKeySize": file.raw_key_size,
                        "RawValueSize": file.raw_value_size,
                        "InitStatsFromFile": file.init_stats_from_file,
                    })
                })
                .collect();
            map.insert("AddedFiles".into(), Value::Array(added));
        }
        map.insert("ColumnFamily".into(), json!(self.column_family()));
        if let Some(name) = self.column_family_name() {
            map.insert("ColumnFamilyAdd".into(), json!(name));
        }
        if self.is_column_family_drop() {
            map.insert("ColumnFamilyDrop".into(), json!(true));
        }
        if let Some(id) = self.max_column_family() {
            map.insert("MaxColumnFamily".into(), json!(id));
        }
        map.insert("FlushedOpId".into(), json!(self.flushed_op_id().to_string()));
        Value::Object(map).to_string()
    }
}
