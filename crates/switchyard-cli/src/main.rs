//! Switchyard CLI - package, promote and roll back decision policies

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use switchyard_core::canary::ComparisonSummary;
use switchyard_core::config::Config;
use switchyard_core::deploy::{self, PromoteOptions};
use switchyard_core::engine::{replay, ReplayOptions};
use switchyard_core::episode::EpisodeArchive;
use switchyard_core::policy::{PolicyComponent, Stage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(author, version, about = "Decision policies for conversational assistants", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a policy package from sub-policy files
    Export {
        /// Routing policy file
        #[arg(long)]
        routing: Option<PathBuf>,
        /// Tool policy file
        #[arg(long)]
        tools: Option<PathBuf>,
        /// Cache policy file
        #[arg(long)]
        cache: Option<PathBuf>,
        /// Adapter reference file
        #[arg(long)]
        adapter: Option<PathBuf>,
        /// Package version (defaults to a timestamp)
        #[arg(long = "package-version")]
        package_version: Option<String>,
        /// Where to write the package
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Make a package the active package of a stage
    Promote {
        /// Package file written by `export`
        package: PathBuf,
        #[arg(short, long, default_value = "canary")]
        stage: Stage,
        /// Skip the pre-flight health check
        #[arg(long)]
        skip_preflight: bool,
        /// Promote invalid packages and ignore a failed pre-flight check
        #[arg(long)]
        force: bool,
    },

    /// Restore the most recent pre-deployment snapshot
    Rollback {
        #[arg(short, long, default_value = "canary")]
        stage: Stage,
    },

    /// Show the active package of each stage
    Status {
        /// Only this stage
        #[arg(short, long)]
        stage: Option<Stage>,
    },

    /// List rollback snapshots, newest first
    Snapshots {
        #[arg(short, long, default_value = "canary")]
        stage: Stage,
    },

    /// Summarize the canary comparison log
    CanarySummary {
        /// Comparison log (defaults to store.comparison_log)
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Replay archived episodes and rebuild bandit state
    Replay {
        /// Episode archive (defaults to store.episode_log)
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Stage whose state is replaced
        #[arg(short, long)]
        stage: Option<Stage>,
        /// Refit numeric feature statistics on the archive
        #[arg(long)]
        refit: bool,
        /// Report without writing snapshots
        #[arg(long)]
        dry_run: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("switchyard=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(e) = &result {
        if let Some(error) = e.downcast_ref::<switchyard_core::Error>() {
            eprintln!("[{}] {}", error.code(), error);
            if let Some(suggestion) = error.suggestion() {
                eprintln!("  try: {}", suggestion);
            }
        }
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Export {
            routing,
            tools,
            cache,
            adapter,
            package_version,
            output,
        } => {
            let mut files = BTreeMap::new();
            for (component, path) in [
                (PolicyComponent::Routing, routing),
                (PolicyComponent::Tools, tools),
                (PolicyComponent::Cache, cache),
                (PolicyComponent::Adapter, adapter),
            ] {
                if let Some(path) = path {
                    files.insert(component, path);
                }
            }
            cmd_export(files, package_version, output, &out)
        }

        Commands::Promote {
            package,
            stage,
            skip_preflight,
            force,
        } => cmd_promote(&package, stage, skip_preflight, force, &out).await,

        Commands::Rollback { stage } => cmd_rollback(stage, &out).await,

        Commands::Status { stage } => cmd_status(stage, &out),

        Commands::Snapshots { stage } => cmd_snapshots(stage, &out),

        Commands::CanarySummary { log } => cmd_canary_summary(log, &out),

        Commands::Replay {
            archive,
            stage,
            refit,
            dry_run,
        } => cmd_replay(archive, stage, refit, dry_run, &out),

        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    /// JSON mode prints `value`; text mode runs `text` unless quiet
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => {
                if !self.quiet {
                    text();
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_export(
    files: BTreeMap<PolicyComponent, PathBuf>,
    version: Option<String>,
    output: Option<PathBuf>,
    out: &Output,
) -> anyhow::Result<()> {
    let version = version.unwrap_or_else(deploy::default_version);
    let package = deploy::export_package(version, &files)?;
    let path = output.unwrap_or_else(|| PathBuf::from(format!("policy-{}.json", package.version)));
    deploy::write_package(&package, &path)?;

    out.emit(&package, || {
        println!("Exported package {} to {}", package.version, path.display());
        for (component, result) in &package.metadata.validation_results {
            if result.valid {
                println!("  [OK] {}", component);
            } else {
                println!("  [!!] {}: {}", component, result.errors.join("; "));
            }
        }
        if !package.is_valid() {
            println!("Package is INVALID; promotion requires --force");
        }
    })
}

async fn cmd_promote(
    package: &Path,
    stage: Stage,
    skip_preflight: bool,
    force: bool,
    out: &Output,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let pipeline = config.pipeline()?;
    let package = deploy::read_package(package)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, rolling back promotion");
            on_interrupt.cancel();
        }
    });

    let options = PromoteOptions {
        skip_preflight,
        force,
        cancel,
    };
    if !out.quiet && out.format == OutputFormat::Text && stage == Stage::Canary && config.deploy.health_url.is_some() {
        println!(
            "Promoting {} to {}; monitoring stability for {}s...",
            package.version, stage, config.deploy.stability_window_secs
        );
    }
    let result = pipeline.promote(&package, stage, options).await;
    interrupt.abort();
    let report = result?;

    info!(stage = %stage, version = %report.version, "Promotion complete");
    out.emit(&report, || {
        println!("Promoted {} to {}", report.version, report.stage);
        if let Some(previous) = &report.previous_version {
            println!("  Previous: {}", previous);
        }
        println!("  Snapshot: {}", report.snapshot.display());
        if let Some(stability) = &report.stability {
            println!(
                "  Stability: {}/{} healthy ({:.2})",
                stability.healthy, stability.checks, stability.ratio
            );
        }
    })
}

async fn cmd_rollback(stage: Stage, out: &Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let report = config.pipeline()?.rollback(stage).await?;

    out.emit(&report, || {
        match &report.restored_version {
            Some(version) => println!("Rolled back {} to {}", report.stage, version),
            None => println!("Rolled back {}; no package is active", report.stage),
        }
        println!("  Previous state archived to {}", report.history.display());
    })
}

fn cmd_status(stage: Option<Stage>, out: &Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let pipeline = config.pipeline()?;
    let stages = match stage {
        Some(stage) => vec![stage],
        None => vec![Stage::Canary, Stage::Prod],
    };
    let statuses = stages
        .into_iter()
        .map(|s| pipeline.status(s))
        .collect::<switchyard_core::Result<Vec<_>>>()?;

    out.emit(&statuses, || {
        for status in &statuses {
            match &status.active {
                Some(active) => println!(
                    "{}: {} (activated {}, valid: {})",
                    status.stage,
                    active.version,
                    active.activated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    status
                        .package_valid
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                ),
                None => println!("{}: no active package", status.stage),
            }
            println!("  Snapshots: {}", status.snapshots);
        }
    })
}

fn cmd_snapshots(stage: Stage, out: &Output) -> anyhow::Result<()> {
    let config = Config::load()?;
    let snapshots = config.pipeline()?.list_snapshots(stage)?;

    out.emit(&snapshots, || {
        if snapshots.is_empty() {
            println!("No snapshots for {}", stage);
            return;
        }
        for snapshot in &snapshots {
            println!(
                "{}  {}  {}",
                snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                snapshot.version.as_deref().unwrap_or("(empty)"),
                snapshot.path.display()
            );
        }
    })
}

fn cmd_canary_summary(log: Option<PathBuf>, out: &Output) -> anyhow::Result<()> {
    let path = match log {
        Some(path) => path,
        None => Config::load()?.comparison_log()?,
    };
    let summary = ComparisonSummary::from_log(&path)?;

    out.emit(&summary, || {
        println!("Canary comparisons: {}", summary.total);
        println!("  Eligible:           {:.1}%", summary.eligible_rate * 100.0);
        println!("  Routed:             {:.1}%", summary.routed_rate * 100.0);
        println!("  Gate pass:          {:.1}%", summary.gate_pass_rate * 100.0);
        println!("  Win rate:           {:.1}%", summary.win_rate * 100.0);
        println!("  Intent agreement:   {:.1}%", summary.intent_agreement_rate * 100.0);
        println!("  Schema validity:    {:.1}%", summary.schema_validity_rate * 100.0);
        println!("  Tool agreement:     {:.1}%", summary.tool_agreement_rate * 100.0);
        println!("  Similarity:         {:.3}", summary.mean_similarity);
        println!(
            "  Latency delta:      p50 {:.1}ms, p95 {:.1}ms",
            summary.latency_delta_p50_ms, summary.latency_delta_p95_ms
        );
        for (reason, count) in &summary.rollback_reasons {
            println!("  {:<20}{}", reason.as_str(), count);
        }
        if summary.skipped_lines > 0 {
            println!("  Skipped {} malformed lines", summary.skipped_lines);
        }
    })
}

fn cmd_replay(
    archive: Option<PathBuf>,
    stage: Option<Stage>,
    refit: bool,
    dry_run: bool,
    out: &Output,
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let archive = match archive {
        Some(path) => path,
        None => config.episode_log()?,
    };
    let episodes = EpisodeArchive::new(&archive).read_all()?;
    if episodes.is_empty() {
        anyhow::bail!("No episodes in {}", archive.display());
    }

    let options = ReplayOptions {
        refit_encoder: refit,
        tool_seed: config.bandit.tool_seed,
    };
    let report = replay(
        &episodes,
        config.encoder()?,
        config.bandit_config(),
        &config.reward_calculator()?,
        &options,
    )?;

    let stage = match stage {
        Some(stage) => stage,
        None => config.stage()?,
    };
    if !dry_run {
        let store = config.policy_store(stage)?;
        store.save_routing_state(&report.routing)?;
        store.save_tool_state(&report.tools)?;
        info!(stage = %stage, "Replayed state saved");
    }

    out.emit(&report, || {
        println!(
            "Replayed {} episodes ({} routed, {} tool updates)",
            report.episodes, report.routed, report.tool_updates
        );
        println!("  Mean reward: {:.4}", report.mean_reward);
        println!("  Trained arms: {}", report.fit.trained.join(", "));
        if !report.fit.zero_initialized.is_empty() {
            println!("  Reset to prior: {}", report.fit.zero_initialized.join(", "));
        }
        if report.fit.skipped_samples > 0 {
            println!("  Skipped {} samples for unknown arms", report.fit.skipped_samples);
        }
        if dry_run {
            println!("Dry run; no snapshots written");
        } else {
            println!("Saved routing and tool state for {}", stage);
        }
    })
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod main_tests;
