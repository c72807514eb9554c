//! Manifest and CURRENT file naming.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Generate the CURRENT file path.
pub fn current_file_path(db_path: &Path) -> PathBuf {
    db_path.join("CURRENT")
}

/// Generate a manifest file path.
pub fn manifest_file_path(db_path: &Path, number: u64) -> PathBuf {
    db_path.join(manifest_file_name(number))
}

/// Manifest file name without directory.
pub fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

/// Parse a manifest file name to extract the manifest number.
pub fn parse_manifest_filename(name: &str) -> Option<u64> {
    name.strip_prefix("MANIFEST-")?.parse().ok()
}

/// Point CURRENT at the given manifest.
///
/// Writes a temp file, syncs it, then renames over CURRENT.
pub fn set_current_file(db_path: &Path, manifest_number: u64) -> std::io::Result<()> {
    let current_path = current_file_path(db_path);
    let temp_path = db_path.join(format!("{:06}.dbtmp", manifest_number));

    {
        let mut file = fs::File::create(&temp_path)?;
        writeln!(file, "{}", manifest_file_name(manifest_number))?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, &current_path)?;
    Ok(())
}

/// Read the manifest name stored in CURRENT, if the file exists.
pub fn read_current_file(db_path: &Path) -> std::io::Result<Option<String>> {
    match fs::read_to_string(current_file_path(db_path)) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> std::io::Result<()> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
