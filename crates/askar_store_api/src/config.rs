use crate::*;

/// Store runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// How long to wait on a contended lock or connection
    /// before failing with `Busy`.
    pub busy_timeout_ms: u64,

    /// Connection pool size for file backed databases.
    pub max_connections: usize,

    /// Entries fetched per scan page.
    pub scan_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 30_000,
            max_connections: 8,
            scan_page_size: 32,
        }
    }
}

impl StoreConfig {
    /// Obtain a config with default values.
    pub fn builder() -> Self {
        Self::default()
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Set the pool size.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the scan page size.
    pub fn with_scan_page_size(mut self, scan_page_size: usize) -> Self {
        self.scan_page_size = scan_page_size;
        self
    }

    /// The busy timeout as a duration.
    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.busy_timeout_ms)
    }

    /// Decode a yaml config.
    pub fn from_bytes(bytes: &[u8]) -> AskarResult<Self> {
        let config: Self = serde_yaml::from_slice(bytes)
            .map_err(|e| err_input(format!("invalid store config: {e}")))?;
        if config.max_connections == 0 || config.scan_page_size == 0 {
            return Err(err_input(
                "maxConnections and scanPageSize must be non-zero",
            ));
        }
        Ok(config)
    }
}

impl std::fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_yaml::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&s)
    }
}
