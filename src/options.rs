//! Tunables for the storage layout and scan execution

/// Column family used for every variant column unless overridden
pub const DEFAULT_COLUMN_FAMILY: &str = "0";

/// Row key prefix of persisted study configurations
pub const DEFAULT_CONFIG_KEY_PREFIX: &str = "~SC_";

/// Stats payloads at least this large are zstd-compressed
pub const DEFAULT_STATS_COMPRESSION_THRESHOLD: usize = 256;

/// Default zstd level for stats payloads and configuration blobs
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Number of rows decoded between configuration revalidations
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 1024;

/// Storage and scan options shared by the codecs, the configuration manager and the scan decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    /// Column family holding variant columns
    pub column_family: String,

    /// Row key prefix of configuration rows
    pub config_key_prefix: String,

    /// Minimum stats payload size (bytes) before compression is attempted
    pub stats_compression_threshold: usize,

    /// zstd level used for stats payloads
    pub stats_compression_level: i32,

    /// zstd level used for configuration blobs
    pub config_compression_level: i32,

    /// Worker threads for scan decoding (0 = all available cores)
    pub scan_threads: usize,

    /// Rows per scan batch
    pub scan_batch_size: usize,
}
impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            column_family: DEFAULT_COLUMN_FAMILY.to_string(),
            config_key_prefix: DEFAULT_CONFIG_KEY_PREFIX.to_string(),
            stats_compression_threshold: DEFAULT_STATS_COMPRESSION_THRESHOLD,
            stats_compression_level: DEFAULT_COMPRESSION_LEVEL,
            config_compression_level: DEFAULT_COMPRESSION_LEVEL,
            scan_threads: 0,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }
}
impl StorageOptions {
    #[must_use]
    pub fn with_column_family(mut self, family: &str) -> Self {
        self.column_family = family.to_string();
        self
    }

    #[must_use]
    pub fn with_config_key_prefix(mut self, prefix: &str) -> Self {
        self.config_key_prefix = prefix.to_string();
        self
    }

    #[must_use]
    pub fn with_stats_compression(mut self, threshold: usize, level: i32) -> Self {
        self.stats_compression_threshold = threshold;
        self.stats_compression_level = level;
        self
    }

    #[must_use]
    pub fn with_config_compression_level(mut self, level: i32) -> Self {
        self.config_compression_level = level;
        self
    }

    #[must_use]
    pub fn with_scan_threads(mut self, threads: usize) -> Self {
        self.scan_threads = threads;
        self
    }

    #[must_use]
    pub fn with_scan_batch_size(mut self, batch_size: usize) -> Self {
        self.scan_batch_size = batch_size.max(1);
        self
    }

    /// Resolves the configured thread count against the available cores
    #[must_use]
    pub fn effective_threads(&self) -> usize {
        if self.scan_threads == 0 {
            num_cpus::get()
        } else {
            self.scan_threads.min(num_cpus::get())
        }
    }
}
