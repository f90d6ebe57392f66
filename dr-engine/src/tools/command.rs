//! Dump tool backed by external commands (mysqldump/mysql, pg_dump/psql, ...).

use super::DumpTool;
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

const PLACEHOLDER: &str = "{database}";

#[derive(Debug, Clone)]
pub struct CommandDumpTool {
    dump_command: Vec<String>,
    restore_command: Vec<String>,
    drop_command: Vec<String>,
}

impl CommandDumpTool {
    pub fn new(dump_command: Vec<String>, restore_command: Vec<String>) -> Self {
        Self {
            dump_command,
            restore_command,
            drop_command: Vec::new(),
        }
    }

    pub fn with_drop_command(mut self, drop_command: Vec<String>) -> Self {
        self.drop_command = drop_command;
        self
    }

    fn build(template: &[String], database: &str) -> Result<Command> {
        let (program, args) = template
            .split_first()
            .ok_or_else(|| DrError::Config("empty command template".into()))?;
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| a.replace(PLACEHOLDER, database)));
        // Dropping the child (timeout, cancellation) must not leave it running
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl DumpTool for CommandDumpTool {
    async fn dump_database(&self, database: &str, dest: &Path) -> Result<()> {
        let out = std::fs::File::create(dest)?;
        let mut cmd = Self::build(&self.dump_command, database)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped());

        tracing::debug!(database, dest = %dest.display(), "Running dump command");
        let output = cmd.spawn()?.wait_with_output().await?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(DrError::tool(format!(
                "dump of {} exited with {}: {}",
                database,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn restore_database(&self, database: &str, artifact: &Path) -> Result<()> {
        let input = std::fs::File::open(artifact)?;
        let mut cmd = Self::build(&self.restore_command, database)?;
        cmd.stdin(Stdio::from(input))
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        tracing::debug!(database, artifact = %artifact.display(), "Running restore command");
        let output = cmd.spawn()?.wait_with_output().await?;

        if !output.status.success() {
            return Err(DrError::tool(format!(
                "restore of {} exited with {}: {}",
                database,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<()> {
        if self.drop_command.is_empty() {
            return Err(DrError::tool(format!("cannot drop {database}: no drop command configured")));
        }
        let mut cmd = Self::build(&self.drop_command, database)?;
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

        tracing::debug!(database, "Running drop command");
        let output = cmd.spawn()?.wait_with_output().await?;

        if !output.status.success() {
            return Err(DrError::tool(format!(
                "drop of {} exited with {}: {}",
                database,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
