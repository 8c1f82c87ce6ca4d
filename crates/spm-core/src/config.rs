//! SPM configuration
//!
//! Loaded from TOML, then overridden from `SPM_*` environment variables and
//! validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{SpmError, SpmResult};
use crate::identifiers::HostId;
use crate::types::{DomainVersion, SPM_TASK_TAG};

/// Prefix of environment variables read by [`SpmConfig::merge_with_env`]
pub const ENV_PREFIX: &str = "SPM_";

/// Top-level configuration for one host's SPM service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpmConfig {
    /// This host's id, written into pool metadata as `spmId`
    pub host_id: u32,
    /// Number of task worker threads per pool
    pub task_workers: usize,
    /// Tag given to tasks scheduled by the SPM
    pub tasks_tag: String,
    /// Mailbox settings
    pub mailbox: MailboxConfig,
    /// Upgrade campaign settings
    pub upgrade: UpgradeConfig,
}

/// Extension mailbox settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Run the mailbox on block-backed pools
    pub extend_on_demand: bool,
    /// Interval between inbox scans
    pub poll_interval_ms: u64,
    /// Threads serving extension requests
    pub workers: usize,
}

/// Upgrade campaign settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Accepted target versions; empty accepts any
    pub supported_domain_versions: Vec<DomainVersion>,
}

impl Default for SpmConfig {
    fn default() -> Self {
        Self {
            host_id: 1,
            task_workers: 10,
            tasks_tag: SPM_TASK_TAG.to_string(),
            mailbox: MailboxConfig::default(),
            upgrade: UpgradeConfig::default(),
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            extend_on_demand: true,
            poll_interval_ms: 2000,
            workers: 2,
        }
    }
}

impl UpgradeConfig {
    /// Whether `version` may be used as an upgrade target
    pub fn supports(&self, version: DomainVersion) -> bool {
        self.supported_domain_versions.is_empty()
            || self.supported_domain_versions.contains(&version)
    }
}

impl SpmConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> SpmResult<Self> {
        toml::from_str(content).map_err(|e| SpmError::config(format!("Invalid TOML: {e}")))
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> SpmResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SpmError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> SpmResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SpmError::config(format!("Failed to serialize config: {e}")))
    }

    /// Override fields from `SPM_*` variables in the process environment
    pub fn merge_with_env(&mut self) -> SpmResult<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Override fields from `SPM_*` pairs.
    ///
    /// Recognized keys: `SPM_HOST_ID`, `SPM_TASK_WORKERS`, `SPM_TASKS_TAG`,
    /// `SPM_MAILBOX_EXTEND_ON_DEMAND`, `SPM_MAILBOX_POLL_INTERVAL_MS`,
    /// `SPM_MAILBOX_WORKERS`,
    /// `SPM_UPGRADE_SUPPORTED_DOMAIN_VERSIONS` (comma separated).
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> SpmResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(key) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match key {
                "HOST_ID" => self.host_id = parse_var(key, value)?,
                "TASK_WORKERS" => self.task_workers = parse_var(key, value)?,
                "TASKS_TAG" => self.tasks_tag = value.to_string(),
                "MAILBOX_EXTEND_ON_DEMAND" => {
                    self.mailbox.extend_on_demand = parse_var(key, value)?;
                }
                "MAILBOX_POLL_INTERVAL_MS" => {
                    self.mailbox.poll_interval_ms = parse_var(key, value)?;
                }
                "MAILBOX_WORKERS" => self.mailbox.workers = parse_var(key, value)?,
                "UPGRADE_SUPPORTED_DOMAIN_VERSIONS" => {
                    self.upgrade.supported_domain_versions = value
                        .split(',')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(|v| parse_var(key, v))
                        .collect::<SpmResult<_>>()?;
                }
                _ => tracing::debug!(key, "Ignoring unknown SPM environment variable"),
            }
        }
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> SpmResult<()> {
        if self.host_id == 0 {
            return Err(SpmError::config("host_id must be at least 1"));
        }
        if self.task_workers == 0 {
            return Err(SpmError::config("task_workers must be at least 1"));
        }
        if self.tasks_tag.is_empty() {
            return Err(SpmError::config("tasks_tag must not be empty"));
        }
        if self.mailbox.poll_interval_ms == 0 {
            return Err(SpmError::config("mailbox.poll_interval_ms must be positive"));
        }
        if self.mailbox.workers == 0 {
            return Err(SpmError::config("mailbox.workers must be at least 1"));
        }
        Ok(())
    }

    /// This host's id
    pub fn host(&self) -> HostId {
        HostId::new(self.host_id)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> SpmResult<T> {
    value
        .parse()
        .map_err(|_| SpmError::config(format!("Invalid value for {ENV_PREFIX}{key}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SpmConfig::default();
        assert_eq!(config.task_workers, 10);
        assert_eq!(config.tasks_tag, "spm");
        assert!(config.mailbox.extend_on_demand);
        assert_eq!(config.mailbox.poll_interval_ms, 2000);
        assert!(config.upgrade.supports(42));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SpmConfig::from_toml_str(
            r#"
            host_id = 3

            [mailbox]
            extend_on_demand = false
            "#,
        )
        .unwrap();
        assert_eq!(config.host(), HostId(3));
        assert!(!config.mailbox.extend_on_demand);
        assert_eq!(config.mailbox.poll_interval_ms, 2000);
        assert_eq!(config.task_workers, 10);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "task_workers = 4\n[upgrade]\nsupported_domain_versions = [3, 5]").unwrap();

        let config = SpmConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.task_workers, 4);
        assert!(config.upgrade.supports(5));
        assert!(!config.upgrade.supports(4));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SpmConfig::load_from_file(&dir.path().join("absent.toml"));
        assert_matches!(result, Err(SpmError::Config { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SpmConfig::default();
        config
            .merge_with_vars([
                ("SPM_HOST_ID", "7"),
                ("SPM_MAILBOX_POLL_INTERVAL_MS", "250"),
                ("SPM_MAILBOX_WORKERS", "4"),
                ("SPM_UPGRADE_SUPPORTED_DOMAIN_VERSIONS", "3, 4"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();
        assert_eq!(config.host_id, 7);
        assert_eq!(config.mailbox.poll_interval_ms, 250);
        assert_eq!(config.mailbox.workers, 4);
        assert_eq!(config.upgrade.supported_domain_versions, vec![3, 4]);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = SpmConfig::default();
        let result = config.merge_with_vars([("SPM_TASK_WORKERS", "many")]);
        assert_matches!(result, Err(SpmError::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = SpmConfig {
            task_workers: 0,
            ..SpmConfig::default()
        };
        assert_matches!(config.validate(), Err(SpmError::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_mailbox_workers() {
        let mut config = SpmConfig::default();
        config.mailbox.workers = 0;
        assert_matches!(config.validate(), Err(SpmError::Config { .. }));
    }

    #[test]
    fn test_toml_roundtrip_preserves_config() {
        let config = SpmConfig {
            host_id: 2,
            ..SpmConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(SpmConfig::from_toml_str(&text).unwrap(), config);
    }
}
