//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use url::Url;

use pagewatch_core::{JobScheduler, PipelineRunner, RunOutcome, Summarizer, take_selector_handoff};
use pagewatch_fetcher::{ContentFetcher, HttpFetcher};
use pagewatch_shared::{
    AppConfig, FetchConfig, GenerationConfig, MonitoredTarget, Observation, Schedule,
    SchedulerConfig, TargetId, init_config, load_config, load_config_from, parse_api_days,
    parse_time_of_day,
};
use pagewatch_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PageWatch: get told when part of a web page changes.
#[derive(Parser)]
#[command(
    name = "pagewatch",
    version,
    about = "Watch one element of a web page on a weekly schedule and summarize what changed.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.pagewatch/pagewatch.toml.
    #[arg(long, global = true, env = "PAGEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the monitor: schedule all active targets until Ctrl-C.
    Serve,

    /// Manage monitored targets.
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Run one target once, outside the schedule.
    Check {
        /// Target ID.
        id: String,
    },

    /// Show a target's observations, newest first.
    History {
        /// Target ID.
        id: String,

        /// Maximum number of observations to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,

        /// Only show the current (unread) observation.
        #[arg(long)]
        current_only: bool,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Mark a target's current observation as read.
    MarkRead {
        /// Target ID.
        id: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Target subcommands.
#[derive(Subcommand)]
pub(crate) enum TargetAction {
    /// Add a target.
    Add {
        /// Page URL.
        url: String,

        /// CSS selector of the element to watch.
        #[arg(long, required_unless_present = "selector_file", conflicts_with = "selector_file")]
        selector: Option<String>,

        /// Read the selector from a picker handoff file (consumed).
        #[arg(long)]
        selector_file: Option<PathBuf>,

        /// Weekdays, comma-separated, 0 = Sunday (e.g. "1,3,5").
        #[arg(long)]
        days: String,

        /// Time of day, HH:MM.
        #[arg(long)]
        at: String,

        /// Extra instruction for summaries.
        #[arg(long)]
        instruction: Option<String>,
    },

    /// List targets.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Flip a target between active and paused.
    Toggle {
        /// Target ID.
        id: String,
    },

    /// Remove a target and its history.
    Remove {
        /// Target ID.
        id: String,
    },

    /// Set or clear a target's summary instruction.
    Instruct {
        /// Target ID.
        id: String,

        /// Instruction text. Omit to clear.
        text: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pagewatch=info",
        1 => "pagewatch=debug",
        _ => "pagewatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    let config = || resolve_config(config_path.as_deref());

    match cli.command {
        Command::Serve => cmd_serve(&config()?).await,
        Command::Target { action } => match action {
            TargetAction::Add {
                url,
                selector,
                selector_file,
                days,
                at,
                instruction,
            } => {
                cmd_target_add(
                    &config()?,
                    &url,
                    selector,
                    selector_file.as_deref(),
                    &days,
                    &at,
                    instruction,
                )
                .await
            }
            TargetAction::List { json } => cmd_target_list(&config()?, json).await,
            TargetAction::Toggle { id } => cmd_target_toggle(&config()?, &id).await,
            TargetAction::Remove { id } => cmd_target_remove(&config()?, &id).await,
            TargetAction::Instruct { id, text } => {
                cmd_target_instruct(&config()?, &id, text.as_deref()).await
            }
        },
        Command::Check { id } => cmd_check(&config()?, &id).await,
        Command::History {
            id,
            limit,
            current_only,
            json,
        } => cmd_history(&config()?, &id, limit, current_only, json).await,
        Command::MarkRead { id } => cmd_mark_read(&config()?, &id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config()?).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn parse_target_id(id: &str) -> Result<TargetId> {
    id.parse()
        .map_err(|e| eyre!("invalid target id '{id}': {e}"))
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    Ok(Storage::open(&config.db_path()?).await?)
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    Ok(Storage::open_readonly(&config.db_path()?).await?)
}

async fn require_target(storage: &Storage, id: &TargetId) -> Result<MonitoredTarget> {
    storage
        .get_target(id)
        .await?
        .ok_or_else(|| eyre!("no target with id {id}"))
}

fn build_runner(config: &AppConfig, storage: Arc<Storage>) -> Result<PipelineRunner> {
    let fetcher: Arc<dyn ContentFetcher> = Arc::new(HttpFetcher::new(FetchConfig::from(config)));
    let summarizer = Arc::new(Summarizer::new(GenerationConfig::from(config))?);
    Ok(PipelineRunner::new(storage, fetcher, summarizer))
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

async fn cmd_serve(config: &AppConfig) -> Result<()> {
    let scheduler_config = SchedulerConfig::try_from(config)?;
    let storage = Arc::new(open_storage(config).await?);
    let runner = Arc::new(build_runner(config, storage.clone())?);

    let scheduler = JobScheduler::new(runner, scheduler_config.timezone);
    scheduler.start().await;

    let mut sync = tokio::time::interval(scheduler_config.sync_interval);
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        sync_interval_secs = scheduler_config.sync_interval.as_secs(),
        "monitor running, press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = sync.tick() => match storage.list_active_targets().await {
                Ok(targets) => {
                    scheduler.reconcile(&targets).await;
                }
                Err(e) => warn!(error = %e, "could not load targets, keeping current triggers"),
            },
        }
    }

    info!("shutting down");
    scheduler.stop().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Target management
// ---------------------------------------------------------------------------

async fn cmd_target_add(
    config: &AppConfig,
    url: &str,
    selector: Option<String>,
    selector_file: Option<&Path>,
    days: &str,
    at: &str,
    instruction: Option<String>,
) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(eyre!("unsupported URL scheme '{}': expected http or https", parsed.scheme()));
    }

    let selector = match (selector, selector_file) {
        (Some(selector), _) => selector.trim().to_string(),
        (None, Some(path)) => take_selector_handoff(path)?
            .map(|handoff| handoff.selector)
            .ok_or_else(|| eyre!("no selector handoff found at {}", path.display()))?,
        (None, None) => return Err(eyre!("either --selector or --selector-file is required")),
    };
    if selector.is_empty() {
        return Err(eyre!("selector must not be empty"));
    }

    let (hour, minute) = parse_time_of_day(at)?;
    let schedule = Schedule::from_api_days(&parse_api_days(days)?, hour, minute)?;

    let now = Utc::now();
    let target = MonitoredTarget {
        id: TargetId::new(),
        url: parsed.to_string(),
        selector,
        schedule,
        active: true,
        custom_instruction: instruction
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        created_at: now,
        activated_at: now,
    };

    let storage = open_storage(config).await?;
    storage.insert_target(&target).await?;
    info!(target_id = %target.id, url = %target.url, "target added");

    println!();
    println!("  Target added!");
    println!("  ID:       {}", target.id);
    println!("  URL:      {}", target.url);
    println!("  Selector: {}", target.selector);
    println!("  Schedule: {}", target.schedule);
    println!();
    println!("  A running `pagewatch serve` picks it up on its next sync.");
    println!();

    Ok(())
}

async fn cmd_target_list(config: &AppConfig, json: bool) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let targets = storage.list_targets().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&targets)?);
        return Ok(());
    }

    if targets.is_empty() {
        println!("No targets. Add one with `pagewatch target add`.");
        return Ok(());
    }

    for target in &targets {
        let state = if target.active { "active" } else { "paused" };
        println!("{}  [{state}]  {}", target.id, target.schedule);
        println!("    {} {}", target.url, target.selector);
        if let Some(instruction) = &target.custom_instruction {
            println!("    instruction: {}", excerpt(instruction, 80));
        }
    }
    Ok(())
}

async fn cmd_target_toggle(config: &AppConfig, id: &str) -> Result<()> {
    let id = parse_target_id(id)?;
    let storage = open_storage(config).await?;
    let target = require_target(&storage, &id).await?;

    let active = !target.active;
    storage.set_active(&id, active).await?;
    info!(target_id = %id, active, "target toggled");
    println!("Target {id} is now {}.", if active { "active" } else { "paused" });
    Ok(())
}

async fn cmd_target_remove(config: &AppConfig, id: &str) -> Result<()> {
    let id = parse_target_id(id)?;
    let storage = open_storage(config).await?;
    if !storage.delete_target(&id).await? {
        return Err(eyre!("no target with id {id}"));
    }
    info!(target_id = %id, "target removed");
    println!("Target {id} and its history removed.");
    Ok(())
}

async fn cmd_target_instruct(config: &AppConfig, id: &str, text: Option<&str>) -> Result<()> {
    let id = parse_target_id(id)?;
    let storage = open_storage(config).await?;
    if !storage.set_custom_instruction(&id, text).await? {
        return Err(eyre!("no target with id {id}"));
    }
    match storage.custom_instruction(&id).await? {
        Some(instruction) => println!("Instruction for {id}: {instruction}"),
        None => println!("Instruction for {id} cleared."),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Runs and history
// ---------------------------------------------------------------------------

async fn cmd_check(config: &AppConfig, id: &str) -> Result<()> {
    let id = parse_target_id(id)?;
    let storage = Arc::new(open_storage(config).await?);
    let target = require_target(&storage, &id).await?;
    let runner = build_runner(config, storage.clone())?;

    let spinner = CliSpinner::new();
    spinner.message(format!("Checking {}", target.url));
    let outcome = runner.run(id, &target.fetch_spec()).await;
    spinner.finish();

    match &outcome {
        RunOutcome::Inserted {
            observation_id,
            summarized,
            ..
        } => {
            println!("New content stored ({observation_id}).");
            if !summarized {
                println!("No summary was generated.");
            }
            if let Some(obs) = storage.list_recent(&id, 1, true).await?.first() {
                print_observation(obs);
            }
        }
        RunOutcome::Unchanged { .. } => println!("No change since the last observation."),
        RunOutcome::Failed { kind, message } => {
            return Err(eyre!("check failed ({kind}): {message}"));
        }
    }
    Ok(())
}

async fn cmd_history(
    config: &AppConfig,
    id: &str,
    limit: u32,
    current_only: bool,
    json: bool,
) -> Result<()> {
    let id = parse_target_id(id)?;
    let storage = open_storage_readonly(config).await?;
    let target = require_target(&storage, &id).await?;
    let observations = storage.list_recent(&id, limit, current_only).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&observations)?);
        return Ok(());
    }

    println!("{}  {}", target.url, target.selector);
    if observations.is_empty() {
        println!("  (no observations)");
    }
    for obs in &observations {
        print_observation(obs);
    }
    Ok(())
}

async fn cmd_mark_read(config: &AppConfig, id: &str) -> Result<()> {
    let id = parse_target_id(id)?;
    let storage = open_storage(config).await?;
    require_target(&storage, &id).await?;

    let demoted = storage.demote_current(&id).await?;
    info!(target_id = %id, demoted, "marked read");
    if demoted == 0 {
        println!("Nothing unread for {id}.");
    } else {
        println!("Marked {id} as read.");
    }
    Ok(())
}

fn print_observation(obs: &Observation) {
    let marker = if obs.is_current { "*" } else { " " };
    let status = if obs.is_error() { "error" } else { "content" };
    println!(
        "{marker} {}  {status}",
        obs.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    match &obs.summary {
        Some(summary) => {
            for line in summary.lines() {
                println!("    {line}");
            }
        }
        None => println!("    {}", excerpt(&obs.content, 160)),
    }
}

/// First `max` characters of `text` on one line.
fn excerpt(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{cut}…")
}

// ---------------------------------------------------------------------------
// CLI spinner
// ---------------------------------------------------------------------------

/// Indicatif spinner shown while a one-off check runs.
struct CliSpinner {
    spinner: ProgressBar,
}

impl CliSpinner {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn message(&self, msg: String) {
        self.spinner.set_message(msg);
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn target_add_requires_a_selector_source() {
        let missing = Cli::try_parse_from([
            "pagewatch", "target", "add", "http://news.example/index", "--days", "1", "--at",
            "08:00",
        ]);
        assert!(missing.is_err());

        let both = Cli::try_parse_from([
            "pagewatch",
            "target",
            "add",
            "http://news.example/index",
            "--selector",
            "#list",
            "--selector-file",
            "/tmp/selector.json",
            "--days",
            "1",
            "--at",
            "08:00",
        ]);
        assert!(both.is_err());

        let ok = Cli::try_parse_from([
            "pagewatch", "target", "add", "http://news.example/index", "--selector", "#list",
            "--days", "1,3,5", "--at", "08:00",
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn history_defaults() {
        let cli = Cli::try_parse_from(["pagewatch", "history", "some-id"]).unwrap();
        match cli.command {
            Command::History {
                limit,
                current_only,
                json,
                ..
            } => {
                assert_eq!(limit, 10);
                assert!(!current_only);
                assert!(!json);
            }
            _ => panic!("expected history command"),
        }
    }

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("<li>a</li>\n  <li>b</li>", 80), "<li>a</li> <li>b</li>");
        assert_eq!(excerpt("abcdef", 3), "abc…");
    }
}
