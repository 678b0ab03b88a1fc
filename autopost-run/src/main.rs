//! autopost-run - run the publish loop in the foreground
//!
//! Each cycle picks an active account, acquires and rewrites content,
//! publishes it through the browser and waits a random backoff. The run ends
//! on SIGINT/SIGTERM, when the post limit is reached, or when no account is
//! eligible any more.

use anyhow::{Context, Result};
use clap::Parser;
use libautopost::accounts::AccountRegistry;
use libautopost::browser::default_driver;
use libautopost::config::Config;
use libautopost::logging::{LogFormat, LoggingConfig};
use libautopost::pipeline::{GeminiRewriter, PassthroughRewriter, RewriteService, SourceFetcher};
use libautopost::publish::RandomDelays;
use libautopost::scheduling::BackoffWindow;
use libautopost::session::{FileSessionStore, SessionLocks};
use libautopost::types::PublishRecord;
use libautopost::{
    AutopostError, Collaborators, Database, Event, Orchestrator, PublishAction, PublishSettings,
    RunSettings, RunStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tracing::{info, warn};

const SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "autopost-run")]
#[command(version)]
#[command(about = "Run the autopost publish loop")]
#[command(long_about = "\
autopost-run - Run the autopost publish loop

DESCRIPTION:
    Publishes rewritten content from the configured source through a pool
    of browser accounts. Every cycle picks a random active account, fetches
    the source, rewrites it, types it into the editor at a human pace and
    submits it, then waits a random backoff before the next cycle.

    The activity log goes to stderr. Each publish attempt is printed to
    stdout and appended to the history database.

USAGE:
    # Run with the configured interval and post limit
    autopost-run

    # Wait 2 to 5 minutes between posts, stop after 10 attempts
    autopost-run --interval 2m-5m --posts-limit 10

    # Machine-readable output
    autopost-run --format json --log-format json

SIGNALS:
    SIGTERM, SIGINT - Graceful stop (the current step finishes first)

CONFIGURATION:
    Configuration file: ~/.config/autopost/config.toml (or $AUTOPOST_CONFIG)

    [bot]
    interval_min = 5    # seconds
    interval_max = 15
    posts_limit = 50

    [bot.source]
    kind = \"url\"
    url = \"https://www.binance.com/en/square\"

    [rewrite]
    tone = \"friendly\"
    creativity = 7
    language = \"English\"
    api_key_env = \"GEMINI_API_KEY\"  # unset: content is published unchanged

EXIT CODES:
    0 - Stopped cleanly or post limit reached
    1 - Runtime error
    2 - Configuration error or no eligible account
    3 - Invalid input
")]
struct Cli {
    /// Backoff window between cycles, e.g. 30-90 or 5m-15m (overrides config)
    #[arg(long, value_name = "MIN-MAX")]
    interval: Option<String>,

    /// Stop after this many publish attempts; 0 runs until stopped (overrides config)
    #[arg(long, value_name = "N")]
    posts_limit: Option<u32>,

    /// Output format for publish attempts
    #[arg(short, long, default_value = "text")]
    #[arg(value_parser = ["text", "json"])]
    format: String,

    /// Log format (text, json, pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(cli: &Cli) {
    let mut logging = LoggingConfig::from_env();
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.verbose = cli.verbose;
    logging.init();
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<Notify>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGTERM || sig == SIGINT {
                info!("Received shutdown signal, stopping after the current step...");
                shutdown.notify_one();
            }
        }
    });

    Ok(())
}

fn build_settings(cli: &Cli, config: &Config) -> Result<RunSettings> {
    let mut settings = RunSettings::from_config(config)?;
    if let Some(interval) = &cli.interval {
        settings.bot = settings.bot.with_backoff(BackoffWindow::parse(interval)?);
    }
    if let Some(limit) = cli.posts_limit {
        settings.bot = settings.bot.with_posts_limit(Some(limit));
    }
    Ok(settings)
}

fn build_rewriter(config: &Config) -> Arc<dyn RewriteService> {
    match GeminiRewriter::from_section(&config.rewrite) {
        Ok(rewriter) => Arc::new(rewriter),
        Err(e) => {
            warn!("{}; publishing source text unchanged", e);
            Arc::new(PassthroughRewriter)
        }
    }
}

fn print_record(record: &PublishRecord, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string(record)?);
        return Ok(());
    }
    let symbol = if record.is_posted() { "✓" } else { "✗" };
    let preview: String = record.content.chars().take(60).collect();
    match &record.failure_detail {
        Some(detail) => println!("{} {} {} ({})", symbol, record.account_id, preview, detail),
        None => println!("{} {} {}", symbol, record.account_id, preview),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<RunStatus> {
    let config = Config::load().context("Failed to load configuration")?;
    let settings = build_settings(&cli, &config)?;

    let registry = AccountRegistry::with_path(config.account_state_path())
        .context("Failed to open account registry")?;
    if registry.list_eligible().is_empty() {
        return Err(AutopostError::NoEligibleAccount)
            .context("Add or enable an account with autopost-accounts");
    }

    let publisher = PublishAction::new(
        default_driver()?,
        Arc::new(FileSessionStore::new(config.session_dir())),
        SessionLocks::new(),
        Arc::new(RandomDelays::new(config.pacing)),
        PublishSettings::from_config(&config.browser),
    );
    let db = Database::new(&config.database.path)
        .await
        .context("Failed to open database")?;

    let orchestrator = Orchestrator::new(
        Collaborators {
            registry,
            source: Arc::new(SourceFetcher::new(SOURCE_TIMEOUT, &config.browser.user_agent)?),
            rewriter: build_rewriter(&config),
            publisher: Arc::new(publisher),
            sink: Arc::new(db),
        },
        settings,
    );

    let shutdown = Arc::new(Notify::new());
    setup_signal_handlers(shutdown.clone())?;

    let mut events = orchestrator.subscribe();
    orchestrator.start();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                orchestrator.stop();
            }
            event = events.recv() => match event {
                Ok(Event::RecordCreated { record }) => print_record(&record, &cli.format)?,
                Ok(Event::RunFinished { status }) => {
                    info!(%status, "Run finished");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Output fell behind; some attempts were not printed");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    orchestrator.join().await;
    Ok(orchestrator.status())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        // The only run-ending error is an empty account pool
        Ok(RunStatus::Error) => std::process::exit(AutopostError::NoEligibleAccount.exit_code()),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<AutopostError>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("autopost-run").chain(args.iter().copied()))
    }

    #[test]
    fn test_overrides_apply_to_settings() {
        let config = Config::default_config();
        let settings = build_settings(&cli(&["--interval", "2m-5m", "--posts-limit", "3"]), &config)
            .unwrap();

        assert_eq!(settings.bot.backoff().min_secs(), 120);
        assert_eq!(settings.bot.backoff().max_secs(), 300);
        assert_eq!(settings.bot.posts_limit(), Some(3));
    }

    #[test]
    fn test_zero_posts_limit_means_unbounded() {
        let config = Config::default_config();
        let settings = build_settings(&cli(&["--posts-limit", "0"]), &config).unwrap();
        assert_eq!(settings.bot.posts_limit(), None);
    }

    #[test]
    fn test_inverted_interval_rejected() {
        let config = Config::default_config();
        let err = build_settings(&cli(&["--interval", "90-30"]), &config).unwrap_err();
        let code = err
            .downcast_ref::<AutopostError>()
            .map(|e| e.exit_code());
        assert_eq!(code, Some(2));
    }

    #[test]
    fn test_defaults_come_from_config() {
        let config = Config::default_config();
        let settings = build_settings(&cli(&[]), &config).unwrap();
        assert_eq!(settings.bot.backoff().min_secs(), 5);
        assert_eq!(settings.bot.posts_limit(), Some(50));
    }
}
