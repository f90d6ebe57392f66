use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::error::AppError;
use crate::ws::ui::UiBroadcaster;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dr_engine::Engine;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Long-running operations; at most one of each kind runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Backup,
    Recovery,
    Drill,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Backup => "backup",
            Operation::Recovery => "recovery",
            Operation::Drill => "drill",
        })
    }
}

/// Marks an operation as running until dropped.
pub struct OperationGuard {
    op: Operation,
    token: CancellationToken,
    active: Arc<DashMap<Operation, CancellationToken>>,
}

impl OperationGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.active.remove(&self.op);
    }
}

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub engine: Arc<Engine>,
    pub ui: UiBroadcaster,
    active: Arc<DashMap<Operation, CancellationToken>>,
    /// Parent of every operation token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, engine: Arc<Engine>, ui: UiBroadcaster) -> Self {
        Self {
            db,
            config,
            engine,
            ui,
            active: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn begin(&self, op: Operation) -> Result<OperationGuard, AppError> {
        match self.active.entry(op) {
            Entry::Occupied(_) => Err(AppError::Conflict(format!("A {} is already running", op))),
            Entry::Vacant(slot) => {
                let token = self.shutdown.child_token();
                slot.insert(token.clone());
                Ok(OperationGuard {
                    op,
                    token,
                    active: self.active.clone(),
                })
            }
        }
    }

    /// Cancel a running operation. Returns false when none was running.
    pub fn cancel(&self, op: Operation) -> bool {
        match self.active.get(&op) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_operations(&self) -> Vec<Operation> {
        self.active.iter().map(|e| *e.key()).collect()
    }
}
