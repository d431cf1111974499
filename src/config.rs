use std::env;

/// Environment-driven configuration for the anonymous backing store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ceiling on swap-hash bucket count for very large objects (MAXBUCKETS).
    pub max_buckets: u64,
    /// Cost-model constant for flush traversal selection (FLUSHPENALTY).
    ///
    /// A range flush walks the resident list when the object holds no more
    /// than `range_pages * flush_penalty` resident pages, and falls back to
    /// per-offset lookup otherwise. Empirical; tune per allocator.
    pub flush_penalty: u64,
    /// Backing file for the default file swap backend (SWAPPATH).
    pub swap_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_buckets: 256,
            flush_penalty: 4,
            swap_path: "/tmp/anonstore_swap".to_string(),
        }
    }
}

impl Config {
    /// Build configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.max_buckets = env_or("MAXBUCKETS", cfg.max_buckets).max(1);
        cfg.flush_penalty = env_or("FLUSHPENALTY", cfg.flush_penalty);
        cfg.swap_path = env::var("SWAPPATH").unwrap_or(cfg.swap_path);
        cfg
    }
}

fn env_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
