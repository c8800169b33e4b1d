//! The service configuration as processed from the embedding process. This controls
//! which partitions exist, how they are indexed, and which of the optional interceptor
//! behaviours are enabled.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sketching::LogLevel;

use crate::prelude::*;

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct PartitionConfig {
    /// The partition name, eg `example`.
    pub id: String,
    /// The naming context this partition holds, eg `dc=example,dc=com`.
    pub suffix: String,
    /// Attributes to maintain an equality index for, in addition to the system ones.
    #[serde(default)]
    pub indexed_attributes: Vec<String>,
    #[serde(default = "default_entry_lock_stripes")]
    pub entry_lock_stripes: usize,
}

fn default_entry_lock_stripes() -> usize {
    DEFAULT_ENTRY_LOCK_STRIPES
}

impl PartitionConfig {
    pub fn new(id: &str, suffix: &str) -> Self {
        PartitionConfig {
            id: id.to_string(),
            suffix: suffix.to_string(),
            indexed_attributes: Vec::new(),
            entry_lock_stripes: DEFAULT_ENTRY_LOCK_STRIPES,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ChangeLogConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Write the journal to this file. When absent the journal is held in memory.
    pub path: Option<PathBuf>,
    /// Rotate the journal file once it holds this many revisions. Zero disables rotation.
    #[serde(default)]
    pub rotation: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_max_size_limit")]
    pub max_size_limit: usize,
    #[serde(default = "default_max_time_limit_secs")]
    pub max_time_limit_secs: u64,
}

fn default_max_size_limit() -> usize {
    DEFAULT_MAX_SIZE_LIMIT
}

fn default_max_time_limit_secs() -> u64 {
    DEFAULT_MAX_TIME_LIMIT.as_secs()
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_size_limit: DEFAULT_MAX_SIZE_LIMIT,
            max_time_limit_secs: DEFAULT_MAX_TIME_LIMIT.as_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub allow_anonymous_access: bool,
    #[serde(default = "default_true")]
    pub access_control_enabled: bool,
    /// Store operational names as given rather than normalised.
    #[serde(default)]
    pub denormalize_op_attrs: bool,
    /// The initial password of `uid=admin,ou=system`.
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default)]
    pub changelog: ChangeLogConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
}

fn default_instance_id() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_admin_password() -> String {
    "secret".to_string()
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance_id: {}, ", self.instance_id)?;
        write!(f, "log_level: {}, ", self.log_level)?;
        write!(f, "allow_anonymous_access: {}, ", self.allow_anonymous_access)?;
        write!(f, "access_control_enabled: {}, ", self.access_control_enabled)?;
        write!(f, "changelog enabled: {}, ", self.changelog.enabled)?;
        write!(f, "journal enabled: {}, ", self.journal.enabled)?;
        write!(f, "max_size_limit: {}, ", self.limits.max_size_limit)?;
        write!(f, "max_time_limit_secs: {}, ", self.limits.max_time_limit_secs)?;
        write!(
            f,
            "partitions: [{}]",
            self.partitions
                .iter()
                .map(|p| format!("{} ({})", p.id, p.suffix))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl Configuration {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, OperationError> {
        let mut f = File::open(config_path.as_ref()).map_err(|e| {
            admin_error!(?e, path = ?config_path.as_ref(), "Unable to open config file");
            OperationError::FsError
        })?;

        let mut contents = String::new();
        f.read_to_string(&mut contents).map_err(|e| {
            admin_error!(?e, "unable to read contents");
            OperationError::FsError
        })?;

        Self::from_toml_str(contents.as_str())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, OperationError> {
        toml::from_str(contents).map_err(|e| {
            admin_error!(?e, "unable to parse config");
            OperationError::InvalidConfiguration(e.to_string())
        })
    }

    /// A deterministic in memory setup with one example partition and both recorders
    /// enabled.
    pub fn new_for_test() -> Self {
        Configuration {
            instance_id: "test".to_string(),
            log_level: LogLevel::Trace,
            allow_anonymous_access: false,
            access_control_enabled: false,
            denormalize_op_attrs: false,
            admin_password: default_admin_password(),
            changelog: ChangeLogConfig { enabled: true },
            journal: JournalConfig {
                enabled: true,
                path: None,
                rotation: 0,
            },
            limits: LimitsConfig::default(),
            partitions: vec![PartitionConfig {
                indexed_attributes: vec![ATTR_CN.to_string(), ATTR_SN.to_string()],
                ..PartitionConfig::new("example", "dc=example,dc=com")
            }],
        }
    }

    pub fn max_time_limit(&self) -> Duration {
        Duration::from_secs(self.limits.max_time_limit_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::Configuration;
    use sketching::LogLevel;

    #[test]
    fn test_config_from_toml() {
        let c = Configuration::from_toml_str(
            r#"
            instance_id = "dsa1"
            log_level = "debug"
            allow_anonymous_access = true

            [changelog]
            enabled = true

            [journal]
            enabled = true
            rotation = 100

            [limits]
            max_size_limit = 50

            [[partitions]]
            id = "example"
            suffix = "dc=example,dc=com"
            indexed_attributes = ["cn", "mail"]
            "#,
        )
        .expect("valid config");
        assert_eq!(c.instance_id, "dsa1");
        assert_eq!(c.log_level, LogLevel::Debug);
        assert!(c.allow_anonymous_access);
        assert!(c.access_control_enabled);
        assert!(c.changelog.enabled);
        assert_eq!(c.journal.rotation, 100);
        assert!(c.journal.path.is_none());
        assert_eq!(c.limits.max_size_limit, 50);
        assert_eq!(c.limits.max_time_limit_secs, 60);
        assert_eq!(c.partitions.len(), 1);
        assert_eq!(c.partitions[0].entry_lock_stripes, 64);
    }

    #[test]
    fn test_config_rejects_unknown_fields() {
        assert!(Configuration::from_toml_str("no_such_option = 1").is_err());
        assert!(Configuration::from_toml_str("[journal]\nenabeld = true").is_err());
    }

    #[test]
    fn test_config_from_file() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "instance_id = \"file\"").unwrap();
        let c = Configuration::new(f.path()).unwrap();
        assert_eq!(c.instance_id, "file");
        assert!(Configuration::new("/nonexistent/dirsrv.toml").is_err());
    }
}
