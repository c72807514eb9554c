//! Column family registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::options::{DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME};
use crate::{Error, Result};

use super::Version;

/// A column family and its current version.
#[derive(Debug)]
pub struct ColumnFamilyData {
    id: u32,
    name: String,
    current: ArcSwap<Version>,
}

impl ColumnFamilyData {
    fn new(id: u32, name: String, version: Version) -> Self {
        Self {
            id,
            name,
            current: ArcSwap::from_pointee(version),
        }
    }

    /// Get the column family id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Get the column family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current version.
    pub fn current(&self) -> Arc<Version> {
        self.current.load_full()
    }

    /// Install a new version, returning the one it replaces.
    pub(crate) fn install(&self, version: Arc<Version>) -> Arc<Version> {
        self.current.swap(version)
    }
}

/// Live column families by id and by name.
#[derive(Debug)]
pub struct ColumnFamilySet {
    by_id: BTreeMap<u32, Arc<ColumnFamilyData>>,
    by_name: HashMap<String, u32>,
    max_column_family: u32,
}

impl ColumnFamilySet {
    /// Registry holding only the default column family.
    pub fn new() -> Self {
        let mut set = Self {
            by_id: BTreeMap::new(),
            by_name: HashMap::new(),
            max_column_family: DEFAULT_COLUMN_FAMILY_ID,
        };
        set.insert_unchecked(
            DEFAULT_COLUMN_FAMILY_ID,
            DEFAULT_COLUMN_FAMILY_NAME.to_string(),
            Version::new(DEFAULT_COLUMN_FAMILY_ID),
        );
        set
    }

    fn insert_unchecked(&mut self, id: u32, name: String, version: Version) -> Arc<ColumnFamilyData> {
        let cfd = Arc::new(ColumnFamilyData::new(id, name.clone(), version));
        self.by_id.insert(id, Arc::clone(&cfd));
        self.by_name.insert(name, id);
        self.max_column_family = self.max_column_family.max(id);
        cfd
    }

    /// Register a column family.
    pub fn create(&mut self, id: u32, name: &str) -> Result<Arc<ColumnFamilyData>> {
        if self.by_name.contains_key(name) {
            return Err(Error::ColumnFamilyExists(name.to_string()));
        }
        if self.by_id.contains_key(&id) {
            return Err(Error::ColumnFamilyExists(format!("id {}", id)));
        }
        Ok(self.insert_unchecked(id, name.to_string(), Version::new(id)))
    }

    /// Unregister a column family.
    pub fn remove(&mut self, id: u32) -> Result<Arc<ColumnFamilyData>> {
        let cfd = self
            .by_id
            .remove(&id)
            .ok_or_else(|| Error::ColumnFamilyNotFound(format!("id {}", id)))?;
        self.by_name.remove(cfd.name());
        Ok(cfd)
    }

    /// Look up by id.
    pub fn get(&self, id: u32) -> Option<&Arc<ColumnFamilyData>> {
        self.by_id.get(&id)
    }

    /// Look up by name.
    pub fn get_by_name(&self, name: &str) -> Option<&Arc<ColumnFamilyData>> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Highest id ever handed out, including dropped families.
    pub fn max_column_family(&self) -> u32 {
        self.max_column_family
    }

    /// Raise the highest id handed out.
    pub fn update_max_column_family(&mut self, id: u32) {
        self.max_column_family = self.max_column_family.max(id);
    }

    /// Iterate over live column families in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ColumnFamilyData>> {
        self.by_id.values()
    }

    /// Number of live column families.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when no column family is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for ColumnFamilySet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_default() {
        let set = ColumnFamilySet::new();
        assert_eq!(set.len(), 1);
        let cfd = set.get_by_name(DEFAULT_COLUMN_FAMILY_NAME).unwrap();
        assert_eq!(cfd.id(), DEFAULT_COLUMN_FAMILY_ID);
        assert_eq!(set.max_column_family(), 0);
    }

    #[test]
    fn test_create_and_remove() {
        let mut set = ColumnFamilySet::new();
        let cfd = set.create(1, "logs").unwrap();
        assert_eq!(cfd.current().column_family(), 1);
        assert_eq!(set.max_column_family(), 1);
        assert!(matches!(set.create(2, "logs"), Err(Error::ColumnFamilyExists(_))));
        assert!(matches!(set.create(1, "other"), Err(Error::ColumnFamilyExists(_))));

        set.remove(1).unwrap();
        assert!(set.get_by_name("logs").is_none());
        assert!(matches!(set.remove(1), Err(Error::ColumnFamilyNotFound(_))));
        assert_eq!(set.max_column_family(), 1);
    }

    #[test]
    fn test_install_swaps_version() {
        let set = ColumnFamilySet::new();
        let cfd = set.get(0).unwrap();
        let old = cfd.install(Arc::new(Version::new(0)));
        assert_eq!(old.total_files(), 0);
    }
}
