//! Worker configuration via `tessera.toml`
//!
//! On first start a commented default file can be written next to the
//! deployment; to change settings, edit the file and restart. Every field
//! has a default, so a partial (or empty) file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_core::error::{Result, TesseraError};
use tessera_core::limits;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// One read replica endpoint with its steering weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaEndpoint {
    /// Backend address
    pub addr: String,
    /// Weighted-random share of reads (0 disables the replica)
    pub weight: u32,
}

/// Backend endpoints: one master, zero or more weighted read replicas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendEndpoints {
    /// Master address; all writes land here
    pub master: String,
    /// Read replicas
    #[serde(default)]
    pub replicas: Vec<ReplicaEndpoint>,
}

impl Default for BackendEndpoints {
    fn default() -> Self {
        BackendEndpoints {
            master: "memory://local".to_string(),
            replicas: Vec::new(),
        }
    }
}

/// Recognized configuration surface of one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Listen address handed to the external acceptor
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    /// Number of worker processes the entry point spawns
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Close connections that send no RPC within this window
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Cap on anonymous connections per client IP
    #[serde(default = "default_max_anon")]
    pub max_anonymous_per_ip: usize,
    /// Receive budget `(max, windowSeconds)` pairs for anonymous connections
    #[serde(default = "default_anon_recv")]
    pub anonymous_recv_budget: Vec<(u32, u64)>,
    /// Receive budget after elevation
    #[serde(default = "default_user_recv")]
    pub recv_budget: Vec<(u32, u64)>,
    /// Send budget applied when draining the outbound queue
    #[serde(default = "default_send")]
    pub send_budget: Vec<(u32, u64)>,
    /// Cap on row subscriptions per connection
    #[serde(default = "default_row_subs")]
    pub row_sub_budget: usize,
    /// Cap on index (range) subscriptions per connection
    #[serde(default = "default_index_subs")]
    pub index_sub_budget: usize,
    /// Largest accepted inbound message, in bytes
    #[serde(default = "default_max_message")]
    pub max_message_bytes: usize,
    /// Backend endpoints
    #[serde(default)]
    pub backend: BackendEndpoints,
    /// Name of the built-in permission-elevation System
    #[serde(default = "default_elevation")]
    pub elevation_system: String,
    /// Wall-clock budget for commit-race retries, in milliseconds
    #[serde(default = "default_retry_budget")]
    pub retry_budget_ms: u64,
}

fn default_listen() -> String {
    "0.0.0.0:9000".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_idle_timeout() -> u64 {
    limits::DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_max_anon() -> usize {
    limits::DEFAULT_MAX_ANONYMOUS_PER_IP
}
fn default_anon_recv() -> Vec<(u32, u64)> {
    vec![(10, 1), (60, 60)]
}
fn default_user_recv() -> Vec<(u32, u64)> {
    vec![(30, 1), (600, 60)]
}
fn default_send() -> Vec<(u32, u64)> {
    vec![(120, 1)]
}
fn default_row_subs() -> usize {
    limits::DEFAULT_ROW_SUB_BUDGET
}
fn default_index_subs() -> usize {
    limits::DEFAULT_INDEX_SUB_BUDGET
}
fn default_max_message() -> usize {
    limits::MAX_INBOUND_MESSAGE_BYTES
}
fn default_elevation() -> String {
    "elevate".to_string()
}
fn default_retry_budget() -> u64 {
    limits::DEFAULT_RETRY_BUDGET_MS
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            listen_addr: default_listen(),
            workers: default_workers(),
            idle_timeout_secs: default_idle_timeout(),
            max_anonymous_per_ip: default_max_anon(),
            anonymous_recv_budget: default_anon_recv(),
            recv_budget: default_user_recv(),
            send_budget: default_send(),
            row_sub_budget: default_row_subs(),
            index_sub_budget: default_index_subs(),
            max_message_bytes: default_max_message(),
            backend: BackendEndpoints::default(),
            elevation_system: default_elevation(),
            retry_budget_ms: default_retry_budget(),
        }
    }
}

impl WorkerConfig {
    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Tessera worker configuration

# Address the external acceptor binds
listen_addr = "0.0.0.0:9000"

# Worker processes per host
workers = 4

# Close connections that send no RPC within this window (seconds)
idle_timeout_secs = 300

# Anonymous connections allowed per client IP
max_anonymous_per_ip = 8

# Receive budgets: lists of [max, windowSeconds]; all must admit
anonymous_recv_budget = [[10, 1], [60, 60]]
recv_budget = [[30, 1], [600, 60]]
send_budget = [[120, 1]]

# Subscription budgets per connection
row_sub_budget = 200
index_sub_budget = 100

# Largest accepted inbound message (bytes)
max_message_bytes = 65536

# Name of the built-in permission-elevation System
elevation_system = "elevate"

# Wall-clock budget for commit-race retries (milliseconds)
retry_budget_ms = 1000

[backend]
master = "memory://local"
# replicas = [{ addr = "redis://replica-1", weight = 2 }]
"#
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::internal(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: WorkerConfig = toml::from_str(&content).map_err(|e| {
            TesseraError::query(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default file unless one already exists
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                TesseraError::internal(format!(
                    "failed to write default config '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Eager sanity checks on loaded values
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(TesseraError::query("workers must be at least 1"));
        }
        if self.max_message_bytes == 0 {
            return Err(TesseraError::query("max_message_bytes must be positive"));
        }
        for (max, secs) in self
            .anonymous_recv_budget
            .iter()
            .chain(&self.recv_budget)
            .chain(&self.send_budget)
        {
            if *max == 0 || *secs == 0 {
                return Err(TesseraError::query(
                    "rate budget pairs must have positive max and window",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_parses_to_defaults() {
        let parsed: WorkerConfig = toml::from_str(WorkerConfig::default_toml()).unwrap();
        let default = WorkerConfig::default();
        assert_eq!(parsed.listen_addr, default.listen_addr);
        assert_eq!(parsed.recv_budget, default.recv_budget);
        assert_eq!(parsed.elevation_system, "elevate");
        assert_eq!(parsed.backend.master, "memory://local");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: WorkerConfig = toml::from_str("").unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.row_sub_budget, 200);
    }

    #[test]
    fn test_partial_override() {
        let config: WorkerConfig = toml::from_str(
            r#"
workers = 2
retry_budget_ms = 250

[backend]
master = "redis://primary"
replicas = [{ addr = "redis://replica-1", weight = 2 }]
"#,
        )
        .unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.retry_budget_ms, 250);
        assert_eq!(config.backend.master, "redis://primary");
        assert_eq!(config.backend.replicas.len(), 1);
        // Untouched fields keep defaults
        assert_eq!(config.idle_timeout_secs, 300);
    }

    #[test]
    fn test_validate_rejects_zero_windows() {
        let config: WorkerConfig = toml::from_str("recv_budget = [[0, 1]]").unwrap();
        assert!(config.validate().is_err());
        let config: WorkerConfig = toml::from_str("workers = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_default_if_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());
        WorkerConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        let config = WorkerConfig::from_file(&path).unwrap();
        assert_eq!(config.workers, 4);

        // Never overwrites
        std::fs::write(&path, "workers = 1\n").unwrap();
        WorkerConfig::write_default_if_missing(&path).unwrap();
        assert_eq!(WorkerConfig::from_file(&path).unwrap().workers, 1);
    }
}
