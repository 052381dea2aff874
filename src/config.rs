//! Tunable knobs gathered into one settings type, with documented defaults,
//! instead of scattering magic numbers through the view engine and executor.

/// Default rebuild batch size: the number of atomic-write operations batched
/// together while a view is being rebuilt from scratch.
pub const DEFAULT_REBUILD_BATCH_SIZE: usize = 1000;

/// Default clamp applied to the underlying store's native scan limit.
pub const DEFAULT_PLATFORM_SCAN_LIMIT: usize = 10_000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub namespace: String,
    pub rebuild_batch_size: usize,
    pub platform_scan_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            namespace: "default".to_string(),
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
            platform_scan_limit: DEFAULT_PLATFORM_SCAN_LIMIT,
        }
    }
}
