//! Wiring: builds every collaborator and orchestrator from an
//! [`EngineConfig`].
//!
//! Binaries construct one [`Engine`] and drive it; tests usually build
//! orchestrators directly from a hand-made [`Collaborators`] instead.

use crate::adapters::{self, AdapterSet};
use crate::backup::{BackupOptions, BackupOrchestrator};
use crate::config::EngineConfig;
use crate::drill::{DrillEnvironment, DrillRunner, LocalSandbox};
use crate::notify::{FanoutNotifier, Notifier, TracingNotifier, WebhookNotifier};
use crate::recovery::RecoveryOrchestrator;
use crate::report::ReportGenerator;
use crate::retention::{RetentionManager, RetentionPolicy};
use crate::schedule::Scheduler;
use crate::services::{CommandServices, NoopServices, ServiceController};
use crate::storage::{self, RemoteStorage};
use crate::store::{JsonPointStore, RecoveryPointStore};
use crate::transform::{cipher_from_config, Cipher};
use crate::utils::Result;
use std::sync::Arc;
use tracing::info;

/// Everything the orchestrators talk to, behind traits.
#[derive(Clone)]
pub struct Collaborators {
    pub adapters: AdapterSet,
    pub store: Arc<dyn RecoveryPointStore>,
    pub remote: Option<Arc<dyn RemoteStorage>>,
    pub cipher: Option<Arc<dyn Cipher>>,
    pub notifier: Arc<dyn Notifier>,
    pub services: Arc<dyn ServiceController>,
}

impl Collaborators {
    /// Collaborators for `config`, with the JSON file store under the state dir.
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let store = Arc::new(JsonPointStore::open(&config.storage.state_dir).await?);
        Self::with_store(config, store)
    }

    /// Collaborators for `config` around an externally provided store.
    pub fn with_store(config: &EngineConfig, store: Arc<dyn RecoveryPointStore>) -> Result<Self> {
        let mut notifier = FanoutNotifier::new(vec![Arc::new(TracingNotifier)]);
        if let Some(url) = &config.notify.webhook_url {
            notifier = notifier.with(Arc::new(WebhookNotifier::new(url)?));
        }

        let services: Arc<dyn ServiceController> = if config.services.restart_commands.is_empty() {
            Arc::new(NoopServices)
        } else {
            Arc::new(CommandServices::new(config.services.restart_commands.clone()))
        };

        Ok(Self {
            adapters: adapters::from_config(&config.domains),
            store,
            remote: storage::from_config(&config.storage.remote)?,
            cipher: cipher_from_config(&config.pipeline)?,
            notifier: Arc::new(notifier),
            services,
        })
    }

    /// Replace the notifier, e.g. to add a channel on top of the defaults.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

pub struct Engine {
    config: EngineConfig,
    deps: Collaborators,
    backup: Arc<BackupOrchestrator>,
    recovery: Arc<RecoveryOrchestrator>,
    retention: Arc<RetentionManager>,
    drills: Arc<DrillRunner>,
    reports: ReportGenerator,
}

impl Engine {
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let deps = Collaborators::from_config(&config).await?;
        Self::new(config, deps).await
    }

    pub async fn new(config: EngineConfig, deps: Collaborators) -> Result<Self> {
        for dir in [
            &config.storage.root,
            &config.storage.state_dir,
            &config.storage.work_dir,
            &config.storage.reports_dir,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let retention = Arc::new(RetentionManager::new(
            deps.store.clone(),
            deps.remote.clone(),
            config.storage.work_dir.clone(),
        ));
        let backup = Arc::new(BackupOrchestrator::new(&config, deps.clone(), retention.clone()));
        let recovery = Arc::new(RecoveryOrchestrator::new(&config, deps.clone()));
        let environment: Arc<dyn DrillEnvironment> = Arc::new(LocalSandbox::new(
            config.drill.sandbox_root.clone(),
            deps.adapters.clone(),
        ));
        let drills = Arc::new(DrillRunner::new(&config, deps.clone(), recovery.clone(), environment));
        let reports = ReportGenerator::new(&config, deps.store.clone());

        info!(
            "Engine ready for {} ({} domain(s), remote: {})",
            config.node_id,
            deps.adapters.len(),
            deps.remote.as_ref().map(|r| r.describe()).unwrap_or_else(|| "none".into())
        );

        Ok(Self {
            config,
            deps,
            backup,
            recovery,
            retention,
            drills,
            reports,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RecoveryPointStore> {
        self.deps.store.clone()
    }

    pub fn backups(&self) -> Arc<BackupOrchestrator> {
        self.backup.clone()
    }

    pub fn recoveries(&self) -> Arc<RecoveryOrchestrator> {
        self.recovery.clone()
    }

    pub fn retention(&self) -> Arc<RetentionManager> {
        self.retention.clone()
    }

    pub fn drills(&self) -> Arc<DrillRunner> {
        self.drills.clone()
    }

    pub fn reports(&self) -> &ReportGenerator {
        &self.reports
    }

    pub fn default_options(&self) -> BackupOptions {
        BackupOptions::from(&self.config.pipeline)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from(&self.config.retention)
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.schedule.interval, self.backup.clone(), self.default_options())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::model::JobStatus;
    use crate::recovery::RecoveryScope;
    use crate::adapters::RestoreTarget;

    #[tokio::test]
    async fn test_engine_from_config_runs_backup_and_recovery() {
        let dir = tempfile::TempDir::new().unwrap();
        let site = dir.path().join("site");
        std::fs::create_dir_all(site.join("image")).unwrap();
        std::fs::write(site.join("index.php"), b"<?php echo 1;").unwrap();
        std::fs::write(site.join("image/logo.png"), vec![7u8; 256]).unwrap();

        let settings = dir.path().join("settings");
        std::fs::create_dir_all(&settings).unwrap();
        std::fs::write(settings.join("system.json"), br#"{"store_name":"Shop"}"#).unwrap();

        let toml = format!(
            r#"
            node_id = "shop-test"

            [storage]
            root = "{base}/backups"
            state_dir = "{base}/data"
            work_dir = "{base}/temp"
            reports_dir = "{base}/reports"

            [domains.files]
            directories = ["{site}"]

            [domains.configuration]
            categories = ["system"]
            source_dir = "{settings}"
            "#,
            base = dir.path().display(),
            site = site.display(),
            settings = settings.display(),
        );
        let config = EngineConfig::from_toml(&toml).unwrap();
        assert_eq!(config.storage.root, StorageConfig::under(dir.path()).root);

        let engine = Engine::open(config).await.unwrap();
        let job = engine
            .backups()
            .run_full_backup(&[], &engine.default_options())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.verified);

        std::fs::remove_file(site.join("image/logo.png")).unwrap();
        let recovery = engine
            .recoveries()
            .recover(None, RecoveryScope::Full, RestoreTarget::Production)
            .await
            .unwrap();
        assert_eq!(recovery.status, JobStatus::Completed, "{:?}", recovery.error);
        assert_eq!(std::fs::read(site.join("image/logo.png")).unwrap(), vec![7u8; 256]);
    }
}
