use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qbt_sync::config::{InstanceConfig, LoggingConfig};
use qbt_sync::diff::SyncDiff;
use qbt_sync::reconcile::{ChildOutcome, ChildSummary, CycleSummary};
use qbt_sync::{Config, Connector, Daemon, FileConfigSource, QbitConnector, Reconciler};

#[derive(Parser)]
#[command(name = "qbt-sync")]
#[command(about = "Mirror completed torrents from a master qBittorrent instance onto child instances")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to ./config.yaml, then the XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle (the default)
    Sync {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,

        /// Print the cycle summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Repeat the sync cycle on the configured interval
    Daemon {
        /// Never mutate children, regardless of configuration
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration and test every connection
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config_path, config) = match load_config(cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("❌ Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(cli.verbose, &config.logging);
    info!("Starting qbt-sync v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        "Loaded config from {}: master={}, children={}",
        config_path.display(),
        config.master.host,
        config.children.len()
    );

    let connector = QbitConnector::new(Duration::from_secs(config.http.timeout_secs));

    match cli.command.unwrap_or(Commands::Sync {
        dry_run: false,
        json: false,
    }) {
        Commands::Sync { dry_run, json } => cmd_sync(connector, &config, dry_run, json).await,
        Commands::Daemon { dry_run } => cmd_daemon(connector, config_path, config, dry_run).await,
        Commands::Check => cmd_check(connector, &config).await,
    }
}

/// Initialize logging: RUST_LOG wins, then --verbose, then the config level
fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(logging.color))
        .with(filter)
        .init();
}

fn load_config(explicit: Option<PathBuf>) -> Result<(PathBuf, Config)> {
    let path = Config::resolve_path(explicit)
        .ok_or_else(|| anyhow!("no configuration file found; pass --config"))?;
    let config = Config::load(&path)?;
    Ok((path, config))
}

async fn cmd_sync(connector: QbitConnector, config: &Config, dry_run: bool, json: bool) -> Result<()> {
    let dry_run = dry_run || config.sync.dry_run;
    let reconciler = Reconciler::new(connector);

    let summary = tokio::select! {
        result = reconciler.run_cycle(config, dry_run) => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n⚠️  Interrupted.");
            std::process::exit(130);
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize cycle summary")?
        );
    } else {
        print_summary(&summary);
    }

    Ok(())
}

async fn cmd_daemon(connector: QbitConnector, path: PathBuf, config: Config, dry_run: bool) -> Result<()> {
    println!("🚀 Starting qbt-sync daemon (Ctrl+C to stop)");
    println!("   Config: {}", path.display());
    println!("   Interval: {} minute(s)", config.sync.daemon_interval_minutes);

    let mut daemon = Daemon::new(
        Reconciler::new(connector),
        Box::new(FileConfigSource::new(path)),
        config,
        dry_run,
    );
    daemon.run().await?;

    let stats = daemon.stats();
    println!(
        "🛑 Daemon stopped: {} cycle(s), {} successful, {} failed",
        stats.total_cycles, stats.successful_cycles, stats.failed_cycles
    );
    Ok(())
}

async fn cmd_check(connector: QbitConnector, config: &Config) -> Result<()> {
    println!("🔍 qbt-sync configuration check");
    println!();

    let mut failures = 0;
    let instances = std::iter::once(&config.master).chain(config.children.iter());
    for instance in instances {
        if !check_instance(&connector, instance).await {
            failures += 1;
        }
    }

    println!();
    if failures == 0 {
        println!("✅ All instances reachable");
        Ok(())
    } else {
        Err(anyhow!("{} instance(s) failed the check", failures))
    }
}

async fn check_instance(connector: &QbitConnector, instance: &InstanceConfig) -> bool {
    let client = match connector.connect(instance).await {
        Ok(client) => client,
        Err(e) => {
            println!("❌ {} ({}): {}", instance.name, instance.host, e);
            return false;
        }
    };

    match client.list_torrents().await {
        Ok(torrents) => {
            println!(
                "✅ {} ({}): {} torrent(s)",
                instance.name,
                instance.host,
                torrents.len()
            );
            true
        }
        Err(e) => {
            println!("❌ {} ({}): authenticated but listing failed: {}", instance.name, instance.host, e);
            false
        }
    }
}

/// Print a per-child report of a finished cycle
fn print_summary(summary: &CycleSummary) {
    let label = if summary.dry_run { "[DRY RUN] " } else { "" };

    println!();
    println!("📊 {}Master: {} eligible torrent(s)", label, summary.master_eligible);

    for child in &summary.children {
        print_child(child, label);
    }

    let totals = summary.totals();
    println!();
    println!("🎉 {}Cycle complete", label);
    println!("   🗑️  Deleted: {}", totals.deleted);
    println!("   📥 Added: {}", totals.added);
    println!("   🏷️  Recategorized: {}", totals.recategorized);
    println!("   📂 Relocated: {}", totals.relocated);
    println!("   📄 File-selection synced: {}", totals.file_synced);
    if totals.stale > 0 {
        println!("   🧹 Stale torrents: {}", totals.stale);
    }
    if totals.failed > 0 {
        println!("   ❌ Failed: {}", totals.failed);
    }
    if totals.skipped_children > 0 {
        println!("   ⏭️  Skipped children: {}", totals.skipped_children);
    }
}

fn print_child(child: &ChildSummary, label: &str) {
    println!();
    println!("── {} ({})", child.name, child.host);

    match &child.outcome {
        ChildOutcome::Skipped { reason } => {
            println!("   ⏭️  Skipped: {}", reason);
        }
        ChildOutcome::Planned { stale, diff } => {
            if *stale > 0 {
                println!("   🧹 {}Would remove {} stale torrent(s)", label, stale);
            }
            print_diff(diff);
        }
        ChildOutcome::Applied {
            stale_removed,
            diff,
            report,
        } => {
            if *stale_removed > 0 {
                println!("   🧹 Removed {} stale torrent(s)", stale_removed);
            }
            print_diff(diff);
            if !diff.is_empty() {
                println!(
                    "   Done: {} deleted, {} added, {} recategorized, {} relocated, {} file-selection synced",
                    report.deleted, report.added, report.recategorized, report.relocated, report.file_synced
                );
            }
            if report.already_present > 0 {
                println!("   ℹ️  {} torrent(s) were already present", report.already_present);
            }
            for failure in &report.failures {
                println!("   ❌ {:?} {}: {}", failure.action, failure.name, failure.error);
            }
        }
    }
}

fn print_diff(diff: &SyncDiff) {
    if diff.is_empty() {
        println!("   ✅ Already in sync");
        return;
    }

    print_names("🗑️  Delete", diff.to_delete.iter().map(|e| e.name.clone()));
    print_names("📥 Add", diff.to_add.iter().map(|e| e.name.clone()));
    print_names(
        "🏷️  Recategorize",
        diff.to_recategorize
            .iter()
            .map(|p| format!("{}: {:?} → {:?}", p.master.name, p.child.category, p.master.category)),
    );
    print_names(
        "📂 Relocate",
        diff.to_relocate.iter().map(|p| {
            let mut parts = Vec::new();
            if p.save_path_differs() {
                parts.push(format!("{} → {}", p.child.save_path, p.master.save_path));
            }
            if p.download_path_differs() {
                parts.push(format!(
                    "temp: {} → {}",
                    or_none(&p.child.download_path),
                    or_none(&p.master.download_path)
                ));
            }
            format!("{}: {}", p.master.name, parts.join("; "))
        }),
    );
    print_names("📄 File selection", diff.to_sync_files.iter().map(|e| e.name.clone()));
}

/// Print at most ten lines per action
fn print_names(title: &str, names: impl ExactSizeIterator<Item = String>) {
    let total = names.len();
    if total == 0 {
        return;
    }

    println!("   {} ({})", title, total);
    for name in names.take(10) {
        println!("      {}", name);
    }
    if total > 10 {
        println!("      … and {} more", total - 10);
    }
}

fn or_none(path: &str) -> &str {
    if path.is_empty() {
        "(none)"
    } else {
        path
    }
}
