use dr_engine::config::StorageConfig;
use dr_engine::EngineConfig;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Engine TOML; when unset the engine runs with defaults under `data_dir`
    pub engine_config: Option<PathBuf>,
    pub log_level: String,
    /// Six-field cron expression overriding the engine's schedule
    pub backup_cron: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(
            std::env::var("DR_DATA_DIR").unwrap_or_else(|_| "/var/lib/dr-server".into()),
        );

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: data_dir.join("dr-server.db"),
            data_dir,
            engine_config: std::env::var("DR_CONFIG").ok().map(PathBuf::from),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            backup_cron: std::env::var("DR_BACKUP_CRON").ok().filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn load_engine_config(&self) -> anyhow::Result<EngineConfig> {
        if let Some(path) = &self.engine_config {
            return Ok(EngineConfig::from_file(path)?);
        }
        let mut config = EngineConfig::default();
        config.storage = StorageConfig::under(&self.data_dir);
        config.drill.sandbox_root = self.data_dir.join("sandbox");
        config.log.level = self.log_level.clone();
        Ok(config)
    }

    /// Cron expression for scheduled backups, if scheduling is on.
    pub fn schedule_cron(&self, engine: &EngineConfig) -> Option<String> {
        if let Some(cron) = &self.backup_cron {
            return Some(cron.clone());
        }
        if !engine.schedule.enabled {
            return None;
        }
        Some(
            engine
                .schedule
                .cron
                .clone()
                .unwrap_or_else(|| engine.schedule.interval.cron_expression().to_string()),
        )
    }
}
