//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use tpsync_compliance::{CheckerOptions, TpsClient};
use tpsync_core::reconcile::{self, ReconcileConfig};
use tpsync_core::{ProgressReporter, SweepConfig, run_sweep};
use tpsync_crm::{CrmOptions, HubSpotClient};
use tpsync_ledger::Ledger;
use tpsync_shared::{AppConfig, CONFIG_FILE_NAME, Credentials, init_config, load_config};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// tpsync: keep CRM phone numbers in line with the TPS/CTPS registers.
#[derive(Parser)]
#[command(
    name = "tpsync",
    version,
    about = "Check CRM phone numbers against the TPS/CTPS registers and record the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./tpsync.toml, then ~/.tpsync/tpsync.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Check every unchecked CRM record and append verdicts to the ledger.
    Check {
        /// Check at most this many records in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Numbers per compliance API call (overrides config and BATCH_SIZE).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Ledger file (overrides sync.ledger_path).
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Write ledger verdicts back onto the CRM records.
    Apply {
        /// Ledger file (overrides sync.ledger_path).
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Print the updates without sending them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize the ledger.
    Status {
        /// Ledger file (overrides sync.ledger_path).
        #[arg(long)]
        ledger: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing & environment setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "warn,tpsync=info",
        1 => "warn,tpsync=debug",
        _ => "info,tpsync=trace",
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

/// Load `env/.env` and `.env` when present. Existing variables win.
pub(crate) fn load_dotenv() {
    for path in ["env/.env", ".env"] {
        match dotenvy::from_path(path) {
            Ok(()) => debug!(path, "loaded environment file"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(path, error = %e, "could not read environment file"),
        }
    }
}

/// Config file, then environment overrides, then validation.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = load_config(path)?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

fn credentials(config: &AppConfig) -> Credentials {
    Credentials::resolve(config, |name| std::env::var(name).ok())
}

fn ledger_path(config: &AppConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| config.sync.ledger_path.clone())
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Check {
            limit,
            batch_size,
            ledger,
        } => cmd_check(config_path, limit, batch_size, ledger).await,
        Command::Apply { ledger, dry_run } => cmd_apply(config_path, ledger, dry_run).await,
        Command::Status { ledger } => cmd_status(config_path, ledger),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_check(
    config_path: Option<&Path>,
    limit: Option<usize>,
    batch_size: Option<usize>,
    ledger: Option<PathBuf>,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    if let Some(size) = batch_size {
        if size == 0 {
            return Err(eyre!("--batch-size must be at least 1"));
        }
        config.compliance.batch_size = size;
    }

    let creds = credentials(&config);
    let api_key = creds.require_compliance_key(&config)?;
    let token = creds.require_crm_token(&config)?;

    let crm = HubSpotClient::new(&config.crm.endpoint, token, &CrmOptions::from(&config.crm))?;
    let checker = TpsClient::new(
        &config.compliance.endpoint,
        api_key,
        &CheckerOptions::from(&config.compliance),
    )?;

    let mut sweep = SweepConfig::from_app(&config);
    sweep.limit = limit;

    let path = ledger_path(&config, ledger);
    let mut ledger = Ledger::load(&path);
    info!(
        ledger = %path.display(),
        endpoint = %crm.endpoint(),
        batch_size = sweep.batch_size,
        "checking CRM records"
    );

    let reporter = CliProgress::new();
    let result = run_sweep(&crm, &checker, &mut ledger, &sweep, &reporter).await?;

    println!();
    println!("  Run:       {}", result.run_id);
    println!("  Fetched:   {}", result.records_fetched);
    println!("  Skipped:   {} (already in ledger)", result.records_skipped);
    println!("  Pending:   {}", result.records_pending);
    if result.records_deferred > 0 {
        println!("  Deferred:  {} (over --limit)", result.records_deferred);
    }
    println!("  Numbers:   {}", result.numbers_checked);
    println!("  Listed:    {}", result.listed);
    println!(
        "  Chunks:    {}/{}",
        result.chunks_completed, result.chunks_total
    );
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();

    match result.halted {
        Some(halt) => Err(eyre!(
            "sweep halted at chunk {}: {}. Re-run to resume.",
            halt.chunk,
            halt.error
        )),
        None => Ok(()),
    }
}

async fn cmd_apply(config_path: Option<&Path>, ledger: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let path = ledger_path(&config, ledger);
    let ledger = Ledger::open_existing(&path)?;
    let reconcile_config = ReconcileConfig::from_app(&config);

    if dry_run {
        for (id, properties) in reconcile::plan(&ledger, &reconcile_config) {
            println!("{id}\t{}", serde_json::to_string(&properties)?);
        }
        return Ok(());
    }

    let token = credentials(&config).require_crm_token(&config)?;
    let crm = HubSpotClient::new(
        &config.crm.endpoint,
        token,
        &CrmOptions::for_writes(&config.crm),
    )?;

    info!(
        ledger = %path.display(),
        entities = ledger.entity_count(),
        "applying ledger to CRM"
    );

    let reporter = CliProgress::new();
    let result = reconcile::reconcile(&crm, &ledger, &reconcile_config, &reporter).await;

    println!();
    println!("  Run:       {}", result.run_id);
    println!("  Updated:   {}", result.updated);
    println!("  Failed:    {}", result.failed);
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();

    if result.failed > 0 {
        return Err(eyre!(
            "{} records could not be updated: {}",
            result.failed,
            result.failed_ids.join(", ")
        ));
    }
    Ok(())
}

fn cmd_status(config_path: Option<&Path>, ledger: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let path = ledger_path(&config, ledger);
    let summary = Ledger::open_existing(&path)?.summary();

    println!();
    println!("  Ledger:    {}", path.display());
    println!("  Rows:      {}", summary.rows);
    println!("  Entities:  {}", summary.entities);
    if summary.skipped_rows > 0 {
        println!("  Skipped:   {} malformed rows", summary.skipped_rows);
    }
    println!(
        "  Phone:     {} listed, {} not listed",
        summary.primary_listed, summary.primary_not_listed
    );
    println!(
        "  Mobile:    {} listed, {} not listed",
        summary.mobile_listed, summary.mobile_not_listed
    );
    println!();

    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let target = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let path = init_config(&target)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    println!("# {} is {}", config.compliance.api_key_env, set_or_missing(&config.compliance.api_key_env));
    println!("# {} is {}", config.crm.access_token_env, set_or_missing(&config.crm.access_token_env));
    Ok(())
}

fn set_or_missing(var: &str) -> &'static str {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => "set",
        _ => "missing",
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn chunk_started(&self, chunk: usize, total: usize, numbers: usize) {
        self.spinner
            .set_message(format!("Checking chunk [{chunk}/{total}] ({numbers} numbers)"));
    }

    fn chunk_finished(&self, chunk: usize, total: usize, listed: usize) {
        self.spinner
            .println(format!("  chunk {chunk}/{total} recorded, {listed} listed"));
    }

    fn record_applied(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Updating CRM records [{current}/{total}]"));
    }

    fn finished(&self, summary: &str) {
        self.spinner.finish_and_clear();
        debug!(summary, "finished");
    }
}
