//! Test doubles and a ready-made engine fixture.

use crate::adapters::{
    AdapterSet, BackupContext, ComponentAdapter, ConfigurationAdapter, DecodedArtifact, DocumentSource,
    FilesAdapter, JsonDirSource, MarketplaceAdapter, RestoreReport, RestoreTarget, DatabaseAdapter,
};
use crate::backup::BackupOrchestrator;
use crate::config::{EngineConfig, RemoteConfig, StorageConfig};
use crate::engine::Collaborators;
use crate::model::{ComponentResult, Domain};
use crate::notify::{EventKind, Notifier, PipelineEvent};
use crate::recovery::RecoveryOrchestrator;
use crate::retention::RetentionManager;
use crate::services::ServiceController;
use crate::storage::{LocalDirStorage, RemoteStorage};
use crate::store::JsonPointStore;
use crate::tools::{DumpTool, TarArchiver};
use crate::transform::{Aes256GcmCipher, Cipher};
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Tools ──

/// Writes a small SQL script per database and records restores.
#[derive(Debug, Default)]
pub struct FakeDumpTool {
    fail_on: Option<String>,
    restored: Mutex<Vec<String>>,
    dropped: Mutex<Vec<String>>,
}

impl FakeDumpTool {
    pub fn failing_on(database: &str) -> Self {
        Self {
            fail_on: Some(database.to_string()),
            ..Self::default()
        }
    }

    pub fn restored(&self) -> Vec<String> {
        self.restored.lock().unwrap().clone()
    }

    pub fn dropped(&self) -> Vec<String> {
        self.dropped.lock().unwrap().clone()
    }
}

#[async_trait]
impl DumpTool for FakeDumpTool {
    async fn dump_database(&self, database: &str, dest: &Path) -> Result<()> {
        if self.fail_on.as_deref() == Some(database) {
            return Err(DrError::tool(format!("mysqldump: Got error 1049: Unknown database '{database}'")));
        }
        let script = format!(
            "-- dump of {database}\nCREATE TABLE oc_product (product_id INT);\nINSERT INTO oc_product VALUES (42);\n"
        );
        tokio::fs::write(dest, script).await?;
        Ok(())
    }

    async fn restore_database(&self, database: &str, artifact: &Path) -> Result<()> {
        let script = tokio::fs::read_to_string(artifact).await?;
        if !script.starts_with("-- dump of") {
            return Err(DrError::tool("not a dump"));
        }
        self.restored.lock().unwrap().push(database.to_string());
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        self.dropped.lock().unwrap().push(database.to_string());
        Ok(())
    }
}

// ── Notifier ──

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    fail: bool,
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingNotifier {
    /// Records the event, then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(DrError::storage("channel unavailable"));
        }
        Ok(())
    }
}

// ── Services ──

#[derive(Debug, Default)]
pub struct RecordingServices {
    restarts: AtomicUsize,
}

impl RecordingServices {
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceController for RecordingServices {
    async fn restart(&self, _target: &RestoreTarget) -> Result<Vec<String>> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["php-fpm".into()])
    }
}

// ── Adapters ──

pub struct FailingAdapter {
    domain: Domain,
}

impl FailingAdapter {
    pub fn new(domain: Domain) -> Self {
        Self { domain }
    }
}

#[async_trait]
impl ComponentAdapter for FailingAdapter {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn backup(&self, _ctx: &BackupContext) -> Result<ComponentResult> {
        Err(DrError::DomainBackupFailure {
            domain: self.domain.to_string(),
            reason: "connection refused".into(),
        })
    }

    async fn restore(&self, _artifacts: &[DecodedArtifact], _target: &RestoreTarget) -> Result<RestoreReport> {
        Err(DrError::tool("connection refused"))
    }
}

/// Sleeps before producing a single small artifact.
pub struct SlowAdapter {
    domain: Domain,
    delay: Duration,
}

impl SlowAdapter {
    pub fn new(domain: Domain, delay_ms: u64) -> Self {
        Self {
            domain,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl ComponentAdapter for SlowAdapter {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn backup(&self, ctx: &BackupContext) -> Result<ComponentResult> {
        tokio::time::sleep(self.delay).await;
        let dir = ctx.domain_dir(self.domain).await?;
        let file = dir.join("slow.json");
        tokio::fs::write(&file, b"{\"slow\":true}").await?;
        let artifact = ctx.finalize("slow", &file, 1).await?;
        Ok(ComponentResult::success(self.domain, vec![artifact], 1))
    }

    async fn restore(&self, artifacts: &[DecodedArtifact], _target: &RestoreTarget) -> Result<RestoreReport> {
        let mut report = RestoreReport::new(self.domain);
        report.items = artifacts.len() as u64;
        report.expected_items = artifacts.len() as u64;
        Ok(report)
    }
}

// ── Fixture ──

/// A temp-dir engine with all four domains over live test data:
/// database `shop` (fake dump tool), a small site tree, two marketplaces
/// (one empty) and two configuration categories.
pub struct Fixture {
    pub dir: TempDir,
    pub config: EngineConfig,
    pub store: Arc<JsonPointStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Arc<RecordingServices>,
    pub dump: Arc<FakeDumpTool>,
    pub remote: Option<Arc<dyn RemoteStorage>>,
    pub cipher: Option<Arc<dyn Cipher>>,
    marketplace: Arc<JsonDirSource>,
    settings: Arc<JsonDirSource>,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_path_buf();

        let mut config = EngineConfig::default();
        config.node_id = "test-node".into();
        config.storage = StorageConfig::under(&base);
        config.drill.sandbox_root = base.join("sandbox");

        let site = base.join("live/site");
        std::fs::create_dir_all(site.join("catalog")).unwrap();
        std::fs::create_dir_all(site.join("image")).unwrap();
        std::fs::write(site.join("index.php"), b"<?php require 'startup.php';").unwrap();
        std::fs::write(site.join("catalog/product.tpl"), b"<h1>{{ heading_title }}</h1>").unwrap();
        std::fs::write(site.join("image/banner.jpg"), vec![0xffu8; 2048]).unwrap();

        let marketplace = Arc::new(JsonDirSource::new(base.join("live/marketplace")));
        marketplace
            .import("trendyol", &json!([{ "sku": "TY-1", "stock": 4 }, { "sku": "TY-2", "stock": 0 }]))
            .await
            .unwrap();

        let settings = Arc::new(JsonDirSource::new(base.join("live/settings")));
        settings.import("system", &json!({ "store_name": "Shop", "maintenance": false })).await.unwrap();
        settings.import("security", &json!({ "two_factor": true })).await.unwrap();

        let store = Arc::new(JsonPointStore::open(&config.storage.state_dir).await.unwrap());

        Self {
            dir,
            config,
            store,
            notifier: Arc::new(RecordingNotifier::default()),
            services: Arc::new(RecordingServices::default()),
            dump: Arc::new(FakeDumpTool::default()),
            remote: None,
            cipher: None,
            marketplace,
            settings,
        }
    }

    /// Like [`Fixture::new`], plus a directory-backed remote and an AES key.
    pub async fn with_remote_and_key() -> Self {
        let mut fx = Self::new().await;
        let remote_dir = fx.dir.path().join("remote");
        fx.config.storage.remote = RemoteConfig::Local { dir: remote_dir.clone() };
        fx.remote = Some(Arc::new(LocalDirStorage::new(remote_dir)));
        fx.cipher = Some(Arc::new(Aes256GcmCipher::new(&[42u8; 32])));
        fx
    }

    pub fn site_dir(&self) -> PathBuf {
        self.dir.path().join("live/site")
    }

    pub fn remote_dir(&self) -> PathBuf {
        self.dir.path().join("remote")
    }

    pub fn adapters(&self) -> AdapterSet {
        let mut set = AdapterSet::new();
        set.insert(Domain::Database, Arc::new(DatabaseAdapter::new(vec!["shop".into()], self.dump.clone())));
        set.insert(
            Domain::Files,
            Arc::new(FilesAdapter::new(vec![self.site_dir()], Arc::new(TarArchiver::default()))),
        );
        let marketplace: Arc<dyn DocumentSource> = self.marketplace.clone();
        set.insert(
            Domain::Marketplace,
            Arc::new(MarketplaceAdapter::new(vec!["trendyol".into(), "n11".into()], marketplace)),
        );
        let settings: Arc<dyn DocumentSource> = self.settings.clone();
        set.insert(
            Domain::Configuration,
            Arc::new(ConfigurationAdapter::new(vec!["system".into(), "security".into()], settings)),
        );
        set
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            adapters: self.adapters(),
            store: self.store.clone(),
            remote: self.remote.clone(),
            cipher: self.cipher.clone(),
            notifier: self.notifier.clone(),
            services: self.services.clone(),
        }
    }

    pub fn retention(&self) -> Arc<RetentionManager> {
        Arc::new(RetentionManager::new(
            self.store.clone(),
            self.remote.clone(),
            self.config.storage.work_dir.clone(),
        ))
    }

    pub fn backup_orchestrator(&self) -> BackupOrchestrator {
        self.backup_orchestrator_with(|_| {})
    }

    /// Orchestrator over the default adapters as modified by `customize`.
    pub fn backup_orchestrator_with(&self, customize: impl FnOnce(&mut AdapterSet)) -> BackupOrchestrator {
        let mut deps = self.collaborators();
        customize(&mut deps.adapters);
        BackupOrchestrator::new(&self.config, deps, self.retention())
    }

    pub fn recovery_orchestrator(&self) -> RecoveryOrchestrator {
        RecoveryOrchestrator::new(&self.config, self.collaborators())
    }
}
