use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabletop_migrate::{
    InMemoryWorldStore, MemorySink, MigrationConfig, MigrationOutcome, MigrationRunner,
    SchemaVersion, StepReport, WorldStore, world_steps,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "world-migrate")]
#[command(about = "Migrates a tabletop world snapshot to the current schema")]
struct Cli {
    /// World snapshot (JSON).
    #[arg(long, global = true)]
    world: Option<PathBuf>,

    /// Engine configuration (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the world's schema version and the steps still pending.
    Status,
    /// List every registered step.
    Steps,
    /// Run pending steps.
    Migrate {
        /// Stop at this version instead of the latest.
        #[arg(long)]
        target: Option<SchemaVersion>,
        /// Write the result here instead of over the input.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Migrate in memory only.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).await?;

    match cli.command {
        Command::Steps => list_steps(),
        Command::Status => {
            let world = require_world(cli.world.as_deref())?;
            status(world, config).await
        }
        Command::Migrate {
            target,
            out,
            dry_run,
        } => {
            let world = require_world(cli.world.as_deref())?;
            migrate(world, config, target, out.as_deref(), dry_run).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tabletop_migrate=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn require_world(world: Option<&Path>) -> Result<&Path> {
    world.ok_or_else(|| anyhow!("A world snapshot is required: --world <path>"))
}

async fn load_config(path: Option<&Path>) -> Result<MigrationConfig> {
    match path {
        Some(path) => MigrationConfig::from_json_file(path)
            .await
            .with_context(|| format!("Failed to load configuration '{}'", path.display())),
        None => Ok(MigrationConfig::default()),
    }
}

async fn load_world(path: &Path) -> Result<InMemoryWorldStore> {
    InMemoryWorldStore::load(path)
        .await
        .with_context(|| format!("Failed to load world snapshot '{}'", path.display()))
}

fn list_steps() -> Result<()> {
    let registry = world_steps().context("Step registry is invalid")?;
    for step in registry.iter() {
        let mut flags = Vec::new();
        if step.uses_workspace() {
            flags.push("workspace");
        }
        if step.halts_after() {
            flags.push("restart");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("v{:<3} {}{}", step.target_version(), step.display_name(), flags);
    }
    Ok(())
}

async fn status(world: &Path, config: MigrationConfig) -> Result<()> {
    let store = Arc::new(load_world(world).await?);
    let current = store.schema_version().await?;
    let runner = MigrationRunner::new(world_steps()?, store).with_config(config);
    let latest = runner.registry().latest_version();
    println!("World schema version: v{} (latest v{})", current, latest);

    let pending = runner.pending(current, latest);
    if pending.is_empty() {
        println!("Up to date.");
    }
    for step in pending {
        println!("  pending v{}: {}", step.target_version(), step.display_name());
    }
    Ok(())
}

async fn migrate(
    world: &Path,
    config: MigrationConfig,
    target: Option<SchemaVersion>,
    out: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    config.validate()?;
    let store = Arc::new(load_world(world).await?);
    let sink = Arc::new(MemorySink::new());
    let runner = MigrationRunner::new(world_steps()?, store.clone())
        .with_config(config)
        .with_progress(sink.clone())
        .with_diagnostics(sink.clone());

    let current = store.schema_version().await?;
    let target = target.unwrap_or_else(|| runner.registry().latest_version());
    if target < current {
        return Err(anyhow!(
            "Cannot migrate down from v{} to v{}; downgrades are not supported",
            current,
            target
        ));
    }

    let outcome = runner
        .migrate_world(current, target)
        .await
        .context("Migration could not record the schema version")?;
    for report in outcome.reports() {
        print_report(report);
    }

    let warnings = sink.warnings().len();
    match &outcome {
        MigrationOutcome::UpToDate { version } => {
            println!("World is already at v{}; nothing to do.", version);
            return Ok(());
        }
        MigrationOutcome::Completed { from, to, .. } => {
            println!("Migrated v{} -> v{} ({} warning(s)).", from, to, warnings);
        }
        MigrationOutcome::Halted {
            version,
            halted_step,
            target,
            ..
        } => {
            println!(
                "Stopped at v{} after '{}'. Run again to continue to v{}.",
                version, halted_step, target
            );
        }
        MigrationOutcome::Failed {
            version,
            failed_step,
            failed_version,
            ..
        } => {
            println!(
                "Step '{}' (v{}) failed with {} error(s); world left at v{}.",
                failed_step,
                failed_version,
                outcome.error_count(),
                version
            );
        }
    }

    if dry_run {
        println!("Dry run: no files written.");
    } else {
        let destination = match out {
            Some(out) => out.to_path_buf(),
            None => {
                let backup = backup_path(world, current);
                tokio::fs::copy(world, &backup)
                    .await
                    .with_context(|| format!("Failed to back up '{}'", world.display()))?;
                println!("Original saved to {}", backup.display());
                world.to_path_buf()
            }
        };
        store
            .save(&destination)
            .await
            .with_context(|| format!("Failed to write world snapshot '{}'", destination.display()))?;
        println!("Wrote {}", destination.display());
    }

    if outcome.succeeded() || outcome.requires_restart() {
        Ok(())
    } else {
        Err(anyhow!("Migration failed"))
    }
}

fn backup_path(world: &Path, version: SchemaVersion) -> PathBuf {
    let stem = world
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "world".to_string());
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    world.with_file_name(format!("{}.v{}.{}.json", stem, version, stamp))
}

fn print_report(report: &StepReport) {
    println!(
        "v{} {}: {:?}, {} changed of {}, {} error(s)",
        report.target_version,
        report.display_name,
        report.status,
        report.changed,
        report.attempted,
        report.error_count
    );
    for failure in &report.failures {
        println!(
            "    {} '{}' ({}): {}",
            failure.subject_kind, failure.subject_name, failure.subject_id, failure.error
        );
    }
    for leftover in &report.leftovers {
        println!(
            "    leftover clone '{}' ({}) in workspace",
            leftover.clone_name, leftover.clone_id
        );
    }
}
