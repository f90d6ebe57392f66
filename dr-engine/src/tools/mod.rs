//! External tools the domain adapters drive: database dump/restore and
//! directory archive/extract.

pub mod archive;
pub mod command;

pub use archive::TarArchiver;
pub use command::CommandDumpTool;

use crate::utils::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait DumpTool: Send + Sync {
    /// Write a logical dump of `database` to `dest`.
    async fn dump_database(&self, database: &str, dest: &Path) -> Result<()>;

    /// Load the dump at `artifact` into `database`.
    async fn restore_database(&self, database: &str, artifact: &Path) -> Result<()>;

    /// Drop `database` if it exists. Used only on sandbox copies.
    async fn drop_database(&self, database: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files: u64,
    pub bytes: u64,
}

#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Archive the contents of `src` into the single file `dest`.
    async fn archive_directory(&self, src: &Path, dest: &Path) -> Result<ArchiveStats>;

    /// Unpack `archive` beneath `dest`, creating it if needed.
    async fn extract_archive(&self, archive: &Path, dest: &Path) -> Result<ArchiveStats>;
}
