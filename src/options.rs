//! Configuration options for the version set and manifest.

/// Maximum number of levels in the LSM tree.
pub const MAX_LEVELS: usize = 7;

/// Name of the default bytewise comparator, recorded by new databases.
pub const BYTEWISE_COMPARATOR_NAME: &str = "leveldb.BytewiseComparator";

/// Id of the column family every database starts with.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/// Name of the column family every database starts with.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// Weight applied to deletion entries when computing compensated file sizes.
pub const DEFAULT_DELETION_WEIGHT: u64 = 2;

/// Manifest sync mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Sync after every edit (safest, slowest).
    #[default]
    Always,
    /// Sync after N bytes written.
    Bytes {
        /// Number of bytes before sync.
        bytes: usize,
    },
    /// Let OS decide when to sync (fastest, may lose recent edits on crash).
    None,
}

/// Version set configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    // === Storage ===
    /// Create database if it doesn't exist.
    pub create_if_missing: bool,

    /// Return error if database already exists.
    pub error_if_exists: bool,

    /// Treat manifest checksum errors as fatal during recovery.
    pub paranoid_checks: bool,

    /// Comparator name written to the first edit of a new database.
    pub comparator_name: String,

    // === Levels ===
    /// Number of levels in use; edits naming a higher level are rejected.
    pub num_levels: usize,

    /// Multiplier for deletion entries in compensated file sizes.
    pub deletion_weight: u64,

    // === Durability ===
    /// Manifest sync mode.
    pub sync_mode: SyncMode,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: true,
            comparator_name: BYTEWISE_COMPARATOR_NAME.to_string(),
            num_levels: MAX_LEVELS,
            deletion_weight: DEFAULT_DELETION_WEIGHT,
            sync_mode: SyncMode::default(),
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_levels == 0 || self.num_levels > MAX_LEVELS {
            return Err(crate::Error::InvalidConfiguration(format!(
                "num_levels must be in 1..={}",
                MAX_LEVELS
            )));
        }

        if self.comparator_name.is_empty() {
            return Err(crate::Error::InvalidConfiguration(
                "comparator_name must not be empty".into(),
            ));
        }

        if let SyncMode::Bytes { bytes: 0 } = self.sync_mode {
            return Err(crate::Error::InvalidConfiguration(
                "SyncMode::Bytes requires a non-zero threshold".into(),
            ));
        }

        Ok(())
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set create_if_missing.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.options.create_if_missing = value;
        self
    }

    /// Set error_if_exists.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.options.error_if_exists = value;
        self
    }

    /// Set paranoid_checks.
    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.options.paranoid_checks = value;
        self
    }

    /// Set the comparator name.
    pub fn comparator_name(mut self, name: impl Into<String>) -> Self {
        self.options.comparator_name = name.into();
        self
    }

    /// Set the number of levels.
    pub fn num_levels(mut self, levels: usize) -> Self {
        self.options.num_levels = levels;
        self
    }

    /// Set the weight of deletion entries in compensated file sizes.
    pub fn deletion_weight(mut self, weight: u64) -> Self {
        self.options.deletion_weight = weight;
        self
    }

    /// Set sync mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.sync_mode = mode;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
