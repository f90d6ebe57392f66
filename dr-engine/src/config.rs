//! Configuration for the recovery engine.
//!
//! Loaded from a TOML file. Every component receives the slice it needs at
//! construction time; nothing reads configuration globally.

use crate::model::Domain;
use crate::schedule::ScheduleInterval;
use crate::utils::{DrError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identifies this node in events and reports
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub objectives: ObjectivesConfig,

    #[serde(default)]
    pub drill: DrillConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub domains: DomainsConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local artifact root; each job writes `<root>/<backup id>/`
    pub root: PathBuf,

    /// Recovery point registry and job history
    pub state_dir: PathBuf,

    /// Scratch space for decoding artifacts during recovery
    pub work_dir: PathBuf,

    /// Generated reports
    pub reports_dir: PathBuf,

    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RemoteConfig {
    #[default]
    None,
    /// A mounted directory standing in for object storage
    Local { dir: PathBuf },
    /// HTTP object store (PUT/GET/DELETE/HEAD under a base URL)
    Http {
        url: String,
        #[serde(default)]
        token: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub compression: bool,

    /// zstd level (1-22)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    #[serde(default)]
    pub encryption: bool,

    /// File holding a hex-encoded 32-byte key; `DR_ENCRYPTION_KEY` is used when absent
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    #[serde(default)]
    pub remote_upload: bool,

    #[serde(default = "default_true")]
    pub verification: bool,

    /// Upper bound for any single stage or domain adapter call
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// A backup lease older than this is considered abandoned
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Keep at most this many points regardless of age
    #[serde(default)]
    pub max_points: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub interval: ScheduleInterval,

    /// Six-field cron expression; overrides `interval` where cron is supported
    #[serde(default)]
    pub cron: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectivesConfig {
    /// Recovery Time Objective
    #[serde(default = "default_rto_hours")]
    pub rto_hours: f64,

    /// Recovery Point Objective
    #[serde(default = "default_rpo_hours")]
    pub rpo_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillConfig {
    /// Sandboxes are provisioned beneath this directory
    pub sandbox_root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Commands run after a production restore, in order
    #[serde(default)]
    pub restart_commands: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainsConfig {
    #[serde(default)]
    pub database: Option<DatabaseDomainConfig>,

    #[serde(default)]
    pub files: Option<FilesDomainConfig>,

    #[serde(default)]
    pub marketplace: Option<MarketplaceDomainConfig>,

    #[serde(default)]
    pub configuration: Option<ConfigurationDomainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseDomainConfig {
    pub databases: Vec<String>,

    /// argv for the dump tool; `{database}` is substituted, stdout is the dump
    pub dump_command: Vec<String>,

    /// argv for the restore tool; `{database}` is substituted, the dump is fed on stdin
    pub restore_command: Vec<String>,

    /// argv that drops a sandbox copy after a drill; `{database}` is substituted
    #[serde(default = "default_drop_command")]
    pub drop_command: Vec<String>,
}

fn default_drop_command() -> Vec<String> {
    vec![
        "mysql".into(),
        "-e".into(),
        "DROP DATABASE IF EXISTS `{database}`".into(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesDomainConfig {
    pub directories: Vec<PathBuf>,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceDomainConfig {
    pub marketplaces: Vec<String>,

    /// Live integration records, one `<marketplace>.json` document each
    pub source_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationDomainConfig {
    #[serde(default = "default_config_categories")]
    pub categories: Vec<String>,

    /// One `<category>.json` document each
    pub source_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_node_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "dr-node-01".to_string())
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> i32 {
    3
}

fn default_stage_timeout_secs() -> u64 {
    3600
}

fn default_lease_ttl_secs() -> u64 {
    6 * 3600
}

fn default_retention_days() -> u32 {
    30
}

fn default_rto_hours() -> f64 {
    4.0
}

fn default_rpo_hours() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_exclude_patterns() -> Vec<String> {
    vec![".git".to_string(), "node_modules".to_string(), ".DS_Store".to_string()]
}

fn default_config_categories() -> Vec<String> {
    ["system", "security", "integration", "marketplace"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::under(Path::new("/var/lib/dr-engine"))
    }
}

impl StorageConfig {
    /// Standard layout beneath a single base directory.
    pub fn under(base: &Path) -> Self {
        Self {
            root: base.join("backups"),
            state_dir: base.join("data"),
            work_dir: base.join("temp"),
            reports_dir: base.join("reports"),
            remote: RemoteConfig::None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compression: true,
            compression_level: default_compression_level(),
            encryption: false,
            key_file: None,
            remote_upload: false,
            verification: true,
            stage_timeout_secs: default_stage_timeout_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs.max(1))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_points: None,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: ScheduleInterval::Daily,
            cron: None,
        }
    }
}

impl Default for ObjectivesConfig {
    fn default() -> Self {
        Self {
            rto_hours: default_rto_hours(),
            rpo_hours: default_rpo_hours(),
        }
    }
}

impl Default for DrillConfig {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from("/var/lib/dr-engine/sandbox"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            storage: StorageConfig::default(),
            pipeline: PipelineConfig::default(),
            retention: RetentionConfig::default(),
            schedule: ScheduleConfig::default(),
            objectives: ObjectivesConfig::default(),
            drill: DrillConfig::default(),
            services: ServicesConfig::default(),
            notify: NotifyConfig::default(),
            domains: DomainsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| DrError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=22).contains(&self.pipeline.compression_level) {
            return Err(DrError::Config(format!(
                "compression_level must be within 1-22, got {}",
                self.pipeline.compression_level
            )));
        }
        if self.pipeline.remote_upload && matches!(self.storage.remote, RemoteConfig::None) {
            return Err(DrError::Config(
                "remote_upload is enabled but no remote storage backend is configured".into(),
            ));
        }
        if let Some(db) = &self.domains.database {
            if db.dump_command.is_empty() || db.restore_command.is_empty() {
                return Err(DrError::Config("database dump/restore commands must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Domains with a configuration section, in restore order.
    pub fn configured_domains(&self) -> Vec<Domain> {
        let d = &self.domains;
        let mut domains = Vec::new();
        if d.database.is_some() {
            domains.push(Domain::Database);
        }
        if d.files.is_some() {
            domains.push(Domain::Files);
        }
        if d.marketplace.is_some() {
            domains.push(Domain::Marketplace);
        }
        if d.configuration.is_some() {
            domains.push(Domain::Configuration);
        }
        domains
    }
}
