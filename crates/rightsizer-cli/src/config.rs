//! Configuration management for the CLI
//!
//! Sources, lowest precedence first:
//! - built-in defaults
//! - TOML file (`--config`, or `~/.config/rightsizer/config.toml` when present)
//! - `RIGHTSIZER_*` environment variables, nested keys separated by `__`

use anyhow::{Context, Result};
use rightsizer_lib::analysis::TransientConfig;
use rightsizer_lib::client::{GatewayConfig, RetryConfig};
use rightsizer_lib::collector::CollectorConfig;
use rightsizer_lib::pipeline::{PipelineConfig, PollerConfig};
use rightsizer_lib::pricing::CostConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "RIGHTSIZER";

/// Where configuration records are read and written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordBackend {
    /// Parameter store behind the infrastructure gateway
    #[default]
    Http,
    /// One file per record under `records_dir`
    File,
}

/// CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub gateway: GatewayConfig,
    pub backend: RecordBackend,
    /// Record directory for the file backend
    pub records_dir: Option<PathBuf>,
    /// Checkpoints live here; defaults to the user data directory
    pub state_dir: Option<PathBuf>,
    /// JSON-lines audit log; defaults to `<state_dir>/audit.jsonl`
    pub audit_log: Option<PathBuf>,
    /// Prometheus textfile written after every trial
    pub metrics_textfile: Option<PathBuf>,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub poller: PollerConfig,
    pub cost: CostConfig,
    pub transient: TransientConfig,
    pub collector: CollectorConfig,
}

impl Settings {
    /// Load layered configuration
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs_next::data_dir()
                .map(|dir| dir.join("rightsizer"))
                .unwrap_or_else(|| PathBuf::from(".rightsizer"))
        })
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir().join("checkpoints")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.state_dir().join("audit.jsonl"))
    }

    pub fn records_dir(&self) -> PathBuf {
        self.records_dir
            .clone()
            .unwrap_or_else(|| self.state_dir().join("records"))
    }
}

/// `~/.config/rightsizer/config.toml`
fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("rightsizer").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_carry_library_constants() {
        let settings = Settings::default();
        assert_eq!(settings.backend, RecordBackend::Http);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.poller.interval_secs, 30);
        assert_eq!(settings.cost.runs_per_month, 30);
        assert_eq!(settings.pipeline.guardrails.max_cluster_instances, 20);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
backend = "file"
state_dir = "/tmp/rightsizer-state"

[gateway]
endpoint = "http://gateway.internal:9000"

[pipeline.guardrails]
max_test_cost = 10.0
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.backend, RecordBackend::File);
        assert_eq!(settings.gateway.endpoint, "http://gateway.internal:9000");
        assert_eq!(settings.pipeline.guardrails.max_test_cost, 10.0);
        // Untouched sections keep their defaults
        assert_eq!(settings.pipeline.guardrails.max_cluster_instances, 20);
        assert_eq!(
            settings.audit_log_path(),
            PathBuf::from("/tmp/rightsizer-state/audit.jsonl")
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/rightsizer.toml"))).is_err());
    }
}
