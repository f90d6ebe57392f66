//! Dependent-service restarts after a production restore.

use crate::adapters::RestoreTarget;
use crate::utils::{DrError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Restart whatever depends on the restored state; returns what was restarted.
    async fn restart(&self, target: &RestoreTarget) -> Result<Vec<String>>;
}

/// Runs a fixed list of commands in order, stopping at the first failure.
#[derive(Debug, Clone, Default)]
pub struct CommandServices {
    commands: Vec<Vec<String>>,
}

impl CommandServices {
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl ServiceController for CommandServices {
    async fn restart(&self, target: &RestoreTarget) -> Result<Vec<String>> {
        let mut restarted = Vec::new();
        for argv in &self.commands {
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            let label = argv.join(" ");
            info!("Restarting dependent service for {}: {}", target, label);

            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| DrError::tool(format!("{label}: {e}")))?;

            if !output.status.success() {
                return Err(DrError::tool(format!(
                    "{} exited with {}: {}",
                    label,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            restarted.push(label);
        }
        Ok(restarted)
    }
}

/// For deployments without dependent services.
#[derive(Debug, Clone, Default)]
pub struct NoopServices;

#[async_trait]
impl ServiceController for NoopServices {
    async fn restart(&self, _target: &RestoreTarget) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commands_run_in_order_and_stop_on_failure() {
        let services = CommandServices::new(vec![
            vec!["true".into()],
            vec!["sh".into(), "-c".into(), "echo nginx down >&2; exit 1".into()],
            vec!["true".into(), "never".into()],
        ]);

        let err = services.restart(&RestoreTarget::Production).await.unwrap_err();
        assert!(matches!(err, DrError::Tool(ref m) if m.contains("nginx down")));
    }

    #[tokio::test]
    async fn test_successful_restart_lists_commands() {
        let services = CommandServices::new(vec![vec!["true".into(), "php-fpm".into()]]);
        let restarted = services.restart(&RestoreTarget::Production).await.unwrap();
        assert_eq!(restarted, vec!["true php-fpm".to_string()]);
    }
}
