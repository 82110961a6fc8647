//! cmsync command-line tool.
//!
//! Syncs a local content directory with its remote Git branch: `pull` merges
//! remote changes into the working tree, `push` publishes local edits,
//! `status` previews what a sync would do, and `init` writes a starter
//! configuration file.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cmsync_core::config::CONFIG_FILE_NAME;
use cmsync_core::errors::SyncError;
use cmsync_core::merge::MergePlan;
use cmsync_core::{CmsyncConfig, FsWorkingTree, GitRemote, SyncEngine, SyncReport, SyncState};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Sync a local content directory with a remote Git branch.
#[derive(Parser, Debug)]
#[command(name = "cmsync", version, about = "Three-way content sync with a remote Git branch")]
struct Cli {
    /// Path to the TOML configuration file. Defaults to ./cmsync.toml when
    /// present, otherwise the user config directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge remote changes into the working tree.
    Pull,

    /// Publish local changes, merging in concurrent remote edits.
    Push,

    /// Show what a sync would do without changing anything.
    Status,

    /// Write a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        init_logging("warn");
        return cmd_init(output);
    }

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;
    init_logging(&config.log_level);

    let engine = open_engine(&config)?;
    let state = engine
        .recorded_state()
        .await
        .context("failed to read recorded base revision")?;

    match cli.command {
        Commands::Pull => {
            let report = engine.pull(&state).await.map_err(|e| sync_failure("pull", e))?;
            print_report(&report, cli.json)
        }
        Commands::Push => {
            let report = engine.push(&state).await.map_err(|e| sync_failure("push", e))?;
            print_report(&report, cli.json)
        }
        Commands::Status => {
            let plan = engine.preview(&state).await.context("failed to plan sync")?;
            print_plan(&plan, &state, cli.json)
        }
        Commands::Init { .. } => Ok(()),
    }
}

/// Log to stderr so `--json` output on stdout stays parseable. `RUST_LOG`
/// overrides the configured level.
fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Wrap a failed sync, warning first when the working tree was left
/// half-written.
fn sync_failure(op: &str, err: SyncError) -> anyhow::Error {
    if err.is_partial_apply() {
        eprintln!(
            "{}",
            style::warn("the working tree may be partially updated; fix the cause and run `cmsync pull` again")
        );
    }
    anyhow::Error::new(err).context(format!("{op} failed"))
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        local
    } else {
        CmsyncConfig::default_path()
    }
}

fn load_config(path: &Path) -> Result<CmsyncConfig> {
    let mut config = CmsyncConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    // A relative repo path is relative to the config file, not the caller.
    if config.repo.path.is_relative() {
        if let Some(dir) = path.parent() {
            config.repo.path = dir.join(&config.repo.path);
        }
    }
    Ok(config)
}

fn open_engine(config: &CmsyncConfig) -> Result<SyncEngine<GitRemote, FsWorkingTree>> {
    debug!(
        path = %config.repo.path.display(),
        remote = %config.repo.remote,
        branch = %config.repo.branch,
        "opening sync engine"
    );
    let remote = GitRemote::from_config(&config.repo).context("failed to open git repository")?;
    let tree = FsWorkingTree::new(&config.repo.path, &config.tree)
        .context("failed to open working tree")?;
    Ok(SyncEngine::new(remote, tree, &config.sync))
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    CmsyncConfig::default()
        .write_to_file(output)
        .context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Point [repo] at your content checkout and its remote");
    println!("  2. Set token_env if the remote needs credentials");
    println!("  3. Run: cmsync --config {} pull", output.display());

    Ok(())
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", style::outcome(report.outcome));
    println!(
        "  {} created, {} updated, {} deleted, {} merged",
        report.created, report.updated, report.deleted, report.merged
    );
    if report.retries > 0 {
        println!("  {}", style::dim(&format!("published after {} retries", report.retries)));
    }
    if let Some(rev) = &report.base_revision {
        println!("  {}", style::dim(&format!("base {}", rev.short())));
    }
    for warning in &report.warnings {
        println!("  {}", style::warn(warning));
    }
    for conflict in &report.conflicts {
        let location = match &conflict.field {
            Some(field) => format!("{} [{}]", conflict.path, field),
            None => conflict.path.clone(),
        };
        println!(
            "  {}",
            style::warn(&format!(
                "{location}: kept {:?}, dropped remote {:?}",
                conflict.local_preview, conflict.remote_preview
            ))
        );
    }
    Ok(())
}

fn print_plan(plan: &MergePlan, state: &SyncState, json: bool) -> Result<()> {
    // Paths where both sides already agree need no action.
    let pending: Vec<_> = plan
        .actions
        .iter()
        .filter(|a| a.local != a.remote)
        .collect();

    if json {
        let actions: Vec<_> = pending
            .iter()
            .map(|a| {
                serde_json::json!({
                    "path": a.path,
                    "kind": a.kind,
                    "warning": a.warning,
                })
            })
            .collect();
        let value = serde_json::json!({
            "base_revision": state.base_revision,
            "actions": actions,
            "conflicts": plan.conflicts,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", style::header("cmsync status"));
    let base = state
        .base_revision
        .as_ref()
        .map_or_else(|| "none".to_string(), |r| r.short().to_string());
    println!("  {}", style::dim(&format!("base {base}")));
    println!();

    if pending.is_empty() {
        println!("{}", style::success("Working tree and remote are in sync"));
        return Ok(());
    }
    for action in &pending {
        println!("  {} {}", style::action(action.kind), action.path);
        if let Some(warning) = &action.warning {
            println!("          {}", style::warn(warning));
        }
    }
    if !plan.conflicts.is_empty() {
        println!();
        println!(
            "  {}",
            style::warn(&format!(
                "{} conflict(s) would resolve in favour of local edits",
                plan.conflicts.len()
            ))
        );
    }
    Ok(())
}
