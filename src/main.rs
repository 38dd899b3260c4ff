//! mailbot-config - resolve and watch the mail bot configuration
//!
//! Prints the resolved configuration, then keeps it current while the file
//! changes until a signal arrives or a reload fails.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use mailbot_config::config::{ConfigResolver, LogWriter, ReloadPolicy};
use mailbot_config::{ShutdownCoordinator, ShutdownReason};

/// CLI arguments for mailbot-config
#[derive(Parser, Debug)]
#[command(name = "mailbot-config")]
#[command(about = "Resolve and watch the mail bot configuration")]
#[command(version)]
#[command(long_about = "
Resolve and watch the mail bot configuration.

The configuration file is named `config` (YAML; `config.yaml`, `config.yml`
or `config`), searched in /etc/app/ and then the working directory.

Environment variables override file values:
  DELTA, LOG_LEVEL, LOG_PATH (comma separated), LOG_TIME,
  DATABASE_HOST, DATABASE_PORT, DATABASE_NAME, DATABASE_USER,
  DATABASE_PASS, DATABASE_ZONE, DATABASE_SSL,
  IMAP_HOST, IMAP_PORT, IMAP_USER, IMAP_PASS, IMAP_MSG, EMAILBOT_PROC
")]
pub struct CliArgs {
    /// Configuration file path (skips the directory search)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory to search for the config file (repeatable, replaces the defaults)
    #[arg(long = "search-dir", value_name = "DIR")]
    pub search_dirs: Vec<PathBuf>,

    /// Keep the current configuration when a reload fails instead of exiting
    #[arg(long)]
    pub keep_on_reload_error: bool,

    /// Delay between a file change and re-reading it, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub settle_ms: u64,

    /// Print the resolved configuration and exit
    #[arg(long)]
    pub once: bool,

    /// Tracing filter for diagnostics (defaults to the configured log level)
    #[arg(long)]
    pub log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Until the log section is resolved, diagnostics go to stderr.
    let bootstrap = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let resolver = tracing::subscriber::with_default(bootstrap, || build_resolver(&args))
        .context("Failed to load configuration")?;

    init_tracing(&args, &resolver)?;
    info!(
        "mailbot-config v{} using {}",
        env!("CARGO_PKG_VERSION"),
        resolver.config_path().display()
    );

    print_summary(&resolver);

    if args.once {
        return Ok(());
    }

    let coordinator = ShutdownCoordinator::new();
    info!("Watching for configuration changes, press Ctrl+C to stop");

    match coordinator.wait(resolver.subscribe()).await? {
        ShutdownReason::ReloadFault(e) => {
            error!("Configuration reload failed: {}", e);
            bail!("configuration reload failed: {}", e);
        }
        reason => {
            info!("Shutdown complete ({:?})", reason);
            Ok(())
        }
    }
}

fn build_resolver(args: &CliArgs) -> Result<ConfigResolver> {
    let mut builder = ConfigResolver::builder()
        .settle_delay(Duration::from_millis(args.settle_ms))
        .watch(!args.once);

    if let Some(path) = &args.config {
        builder = builder.file(path);
    } else if !args.search_dirs.is_empty() {
        builder = builder.search_paths(args.search_dirs.iter().cloned());
    }

    if args.keep_on_reload_error {
        builder = builder.policy(ReloadPolicy::KeepCurrent);
    }

    Ok(builder.build()?)
}

/// Map the numeric log level (higher is more verbose) to a tracing filter
fn level_filter(level: u64) -> &'static str {
    match level {
        0..=2 => "error",
        3 => "warn",
        4 => "info",
        5 => "debug",
        _ => "trace",
    }
}

/// Install one fmt layer per configured log writer
fn init_tracing(args: &CliArgs, resolver: &ConfigResolver) -> Result<()> {
    let sections = resolver.snapshot();

    let (writers, open_error) = match resolver.log_writers() {
        Ok(writers) => (writers, None),
        Err(e) => {
            let message = e.to_string();
            (e.writers, Some(message))
        }
    };

    let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = writers
        .into_iter()
        .map(|writer| writer_layer(writer, sections.log.time))
        .collect();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level_filter(sections.log.level))),
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing")?;

    if let Some(message) = open_error {
        warn!("{}", message);
    }

    Ok(())
}

fn writer_layer(writer: LogWriter, timestamps: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(writer.is_stdout())
        .with_writer(Mutex::new(writer));

    if timestamps {
        layer.boxed()
    } else {
        layer.without_time().boxed()
    }
}

fn print_summary(resolver: &ConfigResolver) {
    let sections = resolver.snapshot();
    let mut redacted = sections.database.clone();
    if !redacted.pass.is_empty() {
        redacted.pass = "********".to_string();
    }

    println!("config:        {}", resolver.config_path().display());
    println!("delta:         {}", sections.core.delta);
    println!("log level:     {}", sections.log.level);
    println!("log paths:     {:?}", sections.log.path);
    println!("log time:      {}", sections.log.time);
    println!("database:      {}", redacted.url());
    println!("imap server:   {}", sections.imap.server());
    println!("imap user:     {}", sections.imap.user);
    println!(
        "imap pass:     {}",
        if sections.imap.pass.is_empty() { "<unset>" } else { "<set>" }
    );
    println!("imap msg:      {}", sections.imap.msg);
    println!("emailbot proc: {}", sections.emailbot.proc);
}
