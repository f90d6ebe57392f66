use super::Domain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a recovery point's artifacts can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Location {
    /// Job directory on the local artifact root.
    Local(String),
    /// Key prefix on the remote storage backend.
    Remote(String),
}

/// Registry entry for a restorable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPoint {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    /// Set only once every artifact checksum has been confirmed.
    pub verified: bool,
    pub size: u64,
    pub locations: Vec<Location>,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

impl RecoveryPoint {
    pub fn local_dir(&self) -> Option<&str> {
        self.locations.iter().find_map(|l| match l {
            Location::Local(p) => Some(p.as_str()),
            _ => None,
        })
    }

    pub fn remote_prefix(&self) -> Option<&str> {
        self.locations.iter().find_map(|l| match l {
            Location::Remote(p) => Some(p.as_str()),
            _ => None,
        })
    }

    pub fn is_remote(&self) -> bool {
        self.remote_prefix().is_some()
    }
}
