//! drctl - Main entry point
//!
//! Operator CLI for the recovery engine. Every command prints its result
//! as JSON on stdout; logs go to stderr.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use dr_engine::adapters::RestoreTarget;
use dr_engine::model::{new_id, Domain, JobStatus};
use dr_engine::recovery::RecoveryScope;
use dr_engine::report::TimeRange;
use dr_engine::{daemon, utils, BackupOptions, Engine, EngineConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full backup of the configured (or listed) domains
    Backup {
        /// Domains to include; all configured domains when omitted
        #[arg(short, long, value_delimiter = ',')]
        domains: Vec<Domain>,

        #[arg(long)]
        no_compress: bool,

        #[arg(long)]
        encrypt: bool,

        #[arg(long)]
        no_encrypt: bool,

        #[arg(long)]
        upload: bool,

        #[arg(long)]
        no_upload: bool,

        #[arg(long)]
        no_verify: bool,
    },
    /// Restore from a recovery point
    Recover {
        /// Recovery point; the latest verified one when omitted
        #[arg(short, long)]
        backup_id: Option<String>,

        /// "full" or a comma-separated list of domains
        #[arg(short, long, default_value = "full")]
        scope: RecoveryScope,

        /// Restore into this directory instead of production
        #[arg(long, value_name = "DIR")]
        sandbox: Option<PathBuf>,
    },
    /// Restore into a throwaway sandbox and probe the result
    Drill {
        #[arg(short, long)]
        backup_id: Option<String>,
    },
    /// Summarise backups, recoveries and drills over a time range
    Report {
        #[arg(short, long, default_value = "30d")]
        range: TimeRange,
    },
    /// Apply the retention policy
    Prune,
    /// Remove a single recovery point
    Remove { backup_id: String },
    /// List recovery points
    Points,
    /// Re-check a stored backup against its manifest
    Verify { backup_id: String },
    /// Run scheduled backups until interrupted
    Daemon,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn backup_options(
    engine: &Engine,
    no_compress: bool,
    encrypt: bool,
    no_encrypt: bool,
    upload: bool,
    no_upload: bool,
    no_verify: bool,
) -> BackupOptions {
    let mut options = engine.default_options();
    if no_compress {
        options.compression = false;
    }
    if encrypt {
        options.encryption = true;
    }
    if no_encrypt {
        options.encryption = false;
    }
    if upload {
        options.remote_upload = true;
    }
    if no_upload {
        options.remote_upload = false;
    }
    if no_verify {
        options.verification = false;
    }
    options
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        EngineConfig::from_file(config_path)?
    } else {
        EngineConfig::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting drctl v{} (node_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.node_id
    );

    let engine = Arc::new(Engine::open(config).await?);

    match args.command {
        Command::Backup {
            domains,
            no_compress,
            encrypt,
            no_encrypt,
            upload,
            no_upload,
            no_verify,
        } => {
            let options = backup_options(&engine, no_compress, encrypt, no_encrypt, upload, no_upload, no_verify);
            let job = engine.backups().run_full_backup(&domains, &options).await?;
            print_json(&job)?;
            if job.status == JobStatus::Failed {
                bail!("backup {} failed", job.id);
            }
        }
        Command::Recover {
            backup_id,
            scope,
            sandbox,
        } => {
            let target = match sandbox {
                Some(root) => RestoreTarget::Sandbox {
                    id: new_id("sandbox"),
                    root,
                },
                None => RestoreTarget::Production,
            };
            let job = engine
                .recoveries()
                .recover(backup_id.as_deref(), scope, target)
                .await?;
            print_json(&job)?;
            job.into_result()?;
        }
        Command::Drill { backup_id } => {
            let result = engine.drills().run_drill(backup_id.as_deref()).await?;
            print_json(&result)?;
            if !result.passed() {
                bail!("drill {} failed", result.id);
            }
        }
        Command::Report { range } => {
            let report = engine.reports().generate_report(range).await?;
            print_json(&report)?;
        }
        Command::Prune => {
            let result = engine.retention().prune(&engine.retention_policy()).await?;
            print_json(&result)?;
        }
        Command::Remove { backup_id } => {
            let result = engine.retention().remove_point(&backup_id).await?;
            print_json(&result)?;
        }
        Command::Points => {
            let points = engine.store().list().await?;
            print_json(&points)?;
        }
        Command::Verify { backup_id } => {
            let result = engine.backups().reverify(&backup_id).await?;
            print_json(&result)?;
            if !result.passed {
                bail!("{} artifact(s) failed verification", result.failed_count());
            }
        }
        Command::Daemon => {
            daemon::run(engine).await;
        }
    }

    Ok(())
}
