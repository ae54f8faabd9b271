//! Push Agent - command line entry point.
//!
//! Exit codes: 0 success (including "No changes detected."), 2 partially
//! failed push, 3 aborted push, 4 empty push refused, 1 anything else.

use anyhow::Result;
use clap::{Parser, Subcommand};
use push_agent::diff::{diff_with, DiffOptions};
use push_agent::executor::{ExecutorOptions, PushExecutor, RunStatus};
use push_agent::manifest::{Manifest, ManifestOptions};
use push_agent::shutdown::ShutdownCoordinator;
use push_agent::snapshot::{Snapshot, SnapshotBuilder};
use push_agent::target::{HttpTarget, LocalDirTarget, PushTarget};
use push_agent::{utils, Config, PushError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_PARTIALLY_FAILED: u8 = 2;
const EXIT_ABORTED: u8 = 3;
const EXIT_EMPTY_PUSH: u8 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Additional ignore pattern (repeatable)
    #[arg(long = "ignore", value_name = "PATTERN", global = true)]
    ignore: Vec<String>,

    /// Retries per entry (overrides config)
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Entries in flight at once (overrides config)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Fail instead of reporting a no-op when nothing changed
    #[arg(long, global = true)]
    require_non_empty: bool,

    /// Treat permission-bit changes as modifications
    #[arg(long, global = true)]
    compare_mode: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot a directory tree
    Snapshot {
        root: PathBuf,

        /// Save the snapshot instead of printing it
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show what changed between two trees or saved snapshots
    Diff { before: PathBuf, after: PathBuf },

    /// Generate a push manifest between two trees or saved snapshots
    Manifest {
        before: PathBuf,
        after: PathBuf,

        /// Save the manifest instead of printing it
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Push a source tree to a staging directory or receiver URL
    Push {
        source: PathBuf,

        /// Staging directory or http(s):// receiver URL
        #[arg(long, value_name = "DIR|URL")]
        to: String,

        /// Tree or saved snapshot to diff against (default: the target's recorded state)
        #[arg(long, value_name = "DIR|FILE", conflicts_with = "manifest")]
        before: Option<PathBuf>,

        /// Push a previously generated manifest instead of diffing. The
        /// target must still hold the manifest's base state.
        #[arg(long, value_name = "FILE")]
        manifest: Option<PathBuf>,

        /// Also save the generated manifest
        #[arg(long, value_name = "FILE")]
        manifest_out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<PushError>() {
            Some(PushError::EmptyPush) => {
                eprintln!("No changes detected, refusing an empty push.");
                ExitCode::from(EXIT_EMPTY_PUSH)
            }
            _ => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("push-agent v{}", env!("CARGO_PKG_VERSION"));

    let builder = SnapshotBuilder::from_config(&config)?;
    let diff_options = DiffOptions {
        compare_mode: config.push.compare_mode,
    };
    let manifest_options = ManifestOptions {
        require_non_empty: config.push.require_non_empty,
    };

    match args.command {
        Command::Snapshot { root, output } => {
            let snapshot = build_snapshot(&builder, &root).await?;
            match output {
                Some(path) => {
                    snapshot.save(&path)?;
                    println!("Saved snapshot of {} files to {}", snapshot.len(), path.display());
                }
                None => println!("{}", snapshot.to_json()?),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Diff { before, after } => {
            let before = load_state(&builder, &before).await?;
            let after = load_state(&builder, &after).await?;
            let change_set = diff_with(&before, &after, diff_options);

            if args.json {
                println!("{}", serde_json::to_string_pretty(&change_set)?);
            } else if change_set.is_empty() {
                println!("No changes detected.");
            } else {
                for entry in &change_set {
                    println!("{:<9} {}", entry.kind, entry.path);
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Manifest { before, after, output } => {
            let before = load_state(&builder, &before).await?;
            let after = load_state(&builder, &after).await?;
            let manifest = Manifest::generate(
                diff_with(&before, &after, diff_options),
                before.root_id(),
                after.root_id(),
                manifest_options,
            )?;

            if manifest.is_empty() {
                eprintln!("No changes detected.");
            }
            match output {
                Some(path) => {
                    manifest.save(&path)?;
                    println!("{} -> {}", manifest.summary(), path.display());
                }
                None => println!("{}", manifest.to_json()?),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Push {
            source,
            to,
            before,
            manifest,
            manifest_out,
        } => {
            let target = open_target(&to, &config)?;
            // An explicit base is the operator's call; otherwise the target
            // must still hold the manifest's base when the push starts
            let mut options = ExecutorOptions::from_config(&config.push);
            options.verify_base = before.is_none();

            let manifest = match manifest {
                Some(path) => Manifest::load(&path)?,
                None => {
                    let after = build_snapshot(&builder, &source).await?;
                    let before = match before {
                        Some(path) => load_state(&builder, &path).await?,
                        None => match target.recorded_state().await {
                            Ok(state) => state,
                            Err(PushError::Target(e)) => {
                                eprintln!("Push aborted: target unreachable: {}", e);
                                return Ok(ExitCode::from(EXIT_ABORTED));
                            }
                            Err(e) => return Err(e.into()),
                        },
                    };
                    Manifest::generate(
                        diff_with(&before, &after, diff_options),
                        before.root_id(),
                        after.root_id(),
                        manifest_options,
                    )?
                }
            };

            if let Some(path) = manifest_out {
                manifest.save(&path)?;
            }

            if manifest.is_empty() {
                println!("No changes detected.");
                return Ok(ExitCode::SUCCESS);
            }
            if !args.json {
                println!("Pushing {}", manifest.summary());
            }

            let shutdown = ShutdownCoordinator::new();
            let listener = shutdown.listen();

            let executor = PushExecutor::with_cancel(
                target,
                &source,
                options,
                shutdown.token(),
            );
            let result = executor.execute(manifest).await;

            shutdown.shutdown();
            let _ = listener.await;

            if args.json {
                println!("{}", result.to_json()?);
            } else {
                print!("{}", result.report());
            }

            Ok(match result.status() {
                RunStatus::Completed => ExitCode::SUCCESS,
                RunStatus::PartiallyFailed => ExitCode::from(EXIT_PARTIALLY_FAILED),
                RunStatus::Aborted => ExitCode::from(EXIT_ABORTED),
                RunStatus::Pending | RunStatus::InProgress => ExitCode::FAILURE,
            })
        }
    }
}

/// Command line flags win over the configuration file.
fn apply_overrides(config: &mut Config, args: &Args) {
    config.push.ignore_patterns.extend(args.ignore.iter().cloned());
    if let Some(max_retries) = args.max_retries {
        config.push.max_retries = max_retries;
    }
    if let Some(concurrency) = args.concurrency {
        config.push.concurrency = concurrency;
    }
    if args.require_non_empty {
        config.push.require_non_empty = true;
    }
    if args.compare_mode {
        config.push.compare_mode = true;
    }
}

fn open_target(to: &str, config: &Config) -> Result<Arc<dyn PushTarget>> {
    if to.starts_with("http://") || to.starts_with("https://") {
        Ok(Arc::new(HttpTarget::new(to, &config.target)?))
    } else {
        Ok(Arc::new(LocalDirTarget::new(to)))
    }
}

async fn build_snapshot(builder: &SnapshotBuilder, root: &Path) -> Result<Snapshot> {
    let builder = builder.clone();
    let root = root.to_path_buf();
    let snapshot = tokio::task::spawn_blocking(move || builder.build(&root)).await??;
    Ok(snapshot)
}

/// A directory is snapshotted; anything else is read as a saved snapshot.
async fn load_state(builder: &SnapshotBuilder, path: &Path) -> Result<Snapshot> {
    if path.is_dir() {
        build_snapshot(builder, path).await
    } else {
        Ok(Snapshot::load(path)?)
    }
}
