//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use contactlink_core::Reconciler;
use contactlink_shared::{
    AppConfig, ContactLinkError, IdentifyRequest, StoreBackend, init_config, load_config,
    resolve_database_path,
};
use contactlink_storage::{ContactStore, LibsqlStore, MemoryStore};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// contactlink: resolve contact observations into identity clusters.
#[derive(Parser)]
#[command(
    name = "contactlink",
    version,
    about = "Link contact observations (email, phone) into consolidated identities.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides the config file).
    #[arg(long, env = "CONTACTLINK_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Storage backend (overrides the config file).
    #[arg(long, global = true)]
    pub backend: Option<BackendArg>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Storage backend selectable from the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum BackendArg {
    Libsql,
    Memory,
}

impl From<BackendArg> for StoreBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Libsql => StoreBackend::Libsql,
            BackendArg::Memory => StoreBackend::Memory,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Reconcile one observation and print its consolidated contact.
    Identify {
        /// Email address.
        #[arg(short, long)]
        email: Option<String>,

        /// Phone number.
        #[arg(short, long)]
        phone: Option<String>,
    },

    /// Reconcile a JSON Lines stream of observations in order.
    Ingest {
        /// Input file, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,
    },

    /// Print every live contact as JSON.
    List,

    /// Check that the contact store is reachable.
    Health,

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
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries JSON output.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "contactlink=info",
        1 => "contactlink=debug",
        _ => "contactlink=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
        Command::Identify { email, phone } => {
            let store = open_store(cli.db.as_deref(), cli.backend, Access::ReadWrite).await?;
            let request = IdentifyRequest {
                email,
                phone_number: phone,
            };
            with_store(store, |store| cmd_identify(store, request)).await
        }
        Command::Ingest { input } => {
            let store = open_store(cli.db.as_deref(), cli.backend, Access::ReadWrite).await?;
            with_store(store, |store| cmd_ingest(store, input)).await
        }
        Command::List => {
            let store = open_store(cli.db.as_deref(), cli.backend, Access::ReadOnly).await?;
            with_store(store, cmd_list).await
        }
        Command::Health => {
            let store = open_store(cli.db.as_deref(), cli.backend, Access::ReadOnly).await?;
            with_store(store, cmd_health).await
        }
    }
}

// ---------------------------------------------------------------------------
// Store lifecycle
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadWrite,
    ReadOnly,
}

/// Open the configured store. Flags override the config file.
async fn open_store(
    db: Option<&Path>,
    backend: Option<BackendArg>,
    access: Access,
) -> Result<Arc<dyn ContactStore>> {
    let config = load_config()?;
    let backend = backend
        .map(StoreBackend::from)
        .unwrap_or(config.database.backend);

    match backend {
        StoreBackend::Memory => {
            info!("using in-memory contact store; nothing will be persisted");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Libsql => {
            let path = resolve_database_path(&config, db)?;
            if access == Access::ReadOnly && !path.exists() {
                return Err(eyre!(
                    "no contact database at '{}'; run `contactlink identify` first",
                    path.display()
                ));
            }
            info!(path = %path.display(), "opening contact store");
            let store = match access {
                Access::ReadWrite => LibsqlStore::open(&path).await?,
                Access::ReadOnly => LibsqlStore::open_readonly(&path).await?,
            };
            Ok(Arc::new(store))
        }
    }
}

/// Run `f` against the store, then close the store whether or not `f` failed.
async fn with_store<F, Fut>(store: Arc<dyn ContactStore>, f: F) -> Result<()>
where
    F: FnOnce(Arc<dyn ContactStore>) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let result = f(Arc::clone(&store)).await;
    store.close().await?;
    result
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_identify(store: Arc<dyn ContactStore>, request: IdentifyRequest) -> Result<()> {
    let reconciler = Reconciler::new(store);
    let response = reconciler.identify(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Counters reported at the end of an ingest run.
#[derive(Debug, Default)]
struct IngestStats {
    reconciled: usize,
    skipped: usize,
}

async fn cmd_ingest(store: Arc<dyn ContactStore>, input: String) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(&input)
            .await
            .wrap_err_with(|| format!("cannot open '{input}'"))?;
        Box::new(BufReader::new(file))
    };
    let mut lines = reader.lines();

    let reconciler = Reconciler::new(store);
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut stats = IngestStats::default();
    let mut line_no = 0usize;

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                warn!(line_no, "interrupt received, stopping ingest");
                break;
            }
            line = lines.next_line() => line.wrap_err("failed to read input")?,
        };
        let Some(line) = line else { break };
        line_no += 1;

        let request = match parse_observation(&line) {
            None => continue,
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                warn!(line_no, error = %e, "skipping malformed observation");
                stats.skipped += 1;
                continue;
            }
        };

        match reconciler.identify(&request).await {
            Ok(response) => {
                let json = serde_json::to_string(&response)?;
                spinner.suspend(|| println!("{json}"));
                stats.reconciled += 1;
                spinner.set_message(format!("Reconciled {} observations", stats.reconciled));
            }
            Err(ContactLinkError::Validation { message }) => {
                warn!(line_no, %message, "skipping observation");
                stats.skipped += 1;
            }
            Err(e) => {
                spinner.finish_and_clear();
                return Err(eyre!("line {line_no}: {e}"));
            }
        }
    }

    spinner.finish_and_clear();
    info!(
        reconciled = stats.reconciled,
        skipped = stats.skipped,
        "ingest finished"
    );
    Ok(())
}

/// Parse one JSON Lines record. Blank lines yield `None`.
fn parse_observation(line: &str) -> Option<serde_json::Result<IdentifyRequest>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

async fn cmd_list(store: Arc<dyn ContactStore>) -> Result<()> {
    let contacts = store.list_all().await?;
    info!(count = contacts.len(), "listing contacts");
    println!("{}", serde_json::to_string_pretty(&contacts)?);
    Ok(())
}

async fn cmd_health(store: Arc<dyn ContactStore>) -> Result<()> {
    store.ping().await?;
    println!("{}", serde_json::json!({ "status": "OK" }));
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
