//! autopost-accounts - manage the account pool
//!
//! Adds and removes accounts, toggles eligibility, assigns proxies and runs
//! the interactive login that captures a browser session.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libautopost::accounts::AccountRegistry;
use libautopost::browser::default_driver;
use libautopost::config::Config;
use libautopost::login::LoginAction;
use libautopost::session::{FileSessionStore, SessionLocks, SessionStore};
use libautopost::types::{Account, Eligibility, ProxySpec, SessionValidity};
use libautopost::AutopostError;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "autopost-accounts")]
#[command(version, about = "Manage the accounts autopost publishes with")]
#[command(long_about = r#"Manage the accounts autopost publishes with.

New accounts start as needs_login. Run `autopost-accounts login <ACCOUNT>`
to sign in through a visible browser window; the captured session is reused
by every publish. Only active accounts are picked by autopost-run.

ACCOUNT may be an account id or its exact display name.

EXAMPLES:
    autopost-accounts add "Clone 01" --proxy 203.0.113.7:8080
    autopost-accounts login "Clone 01"
    autopost-accounts disable "Clone 01"
    autopost-accounts list --format json

EXIT CODES:
    0 - Success
    1 - Error
    2 - Configuration error
    3 - Invalid input
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account
    Add {
        /// Display name
        name: String,

        /// Proxy as host:port or host:port:user:pass
        #[arg(long)]
        proxy: Option<String>,
    },

    /// List accounts
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        #[arg(value_parser = ["text", "json"])]
        format: String,
    },

    /// Make an account eligible for publishing
    Enable { account: String },

    /// Exclude an account from publishing
    Disable { account: String },

    /// Delete an account and its saved session
    Remove { account: String },

    /// Set or clear an account's proxy
    Proxy {
        account: String,

        /// host:port or host:port:user:pass
        #[arg(conflicts_with = "clear", required_unless_present = "clear")]
        spec: Option<String>,

        #[arg(long)]
        clear: bool,
    },

    /// Sign in through a visible browser and save the session
    Login { account: String },

    /// Forget an account's saved session
    Logout { account: String },
}

struct Workspace {
    config: Config,
    registry: AccountRegistry,
}

fn open() -> Result<Workspace> {
    let config = Config::load().context("Failed to load configuration")?;
    let registry = AccountRegistry::with_path(config.account_state_path())
        .context("Failed to open account registry")?;
    Ok(Workspace { config, registry })
}

/// Find an account by id, falling back to an exact display name match
fn resolve(registry: &AccountRegistry, key: &str) -> Result<Account> {
    let not_found = match registry.get(key) {
        Ok(account) => return Ok(account),
        Err(e) => e,
    };
    let mut matches: Vec<Account> = registry
        .list()
        .into_iter()
        .filter(|a| a.display_name == key)
        .collect();
    match matches.len() {
        0 => Err(not_found.into()),
        1 => Ok(matches.remove(0)),
        n => Err(AutopostError::InvalidInput(format!(
            "{} accounts are named '{}'; use the account id",
            n, key
        ))
        .into()),
    }
}

fn print_accounts(accounts: &[Account], format: &str) -> Result<()> {
    if format == "json" {
        // Proxy passwords stay in the state file
        let listed: Vec<serde_json::Value> = accounts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "display_name": a.display_name,
                    "eligibility": a.eligibility,
                    "session_validity": a.session_validity,
                    "proxy": a.proxy.as_ref().map(|p| p.to_string()),
                    "last_active": a.last_active,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    if accounts.is_empty() {
        println!("No accounts. Add one with: autopost-accounts add <NAME>");
        return Ok(());
    }

    for account in accounts {
        let proxy = account
            .proxy
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "direct".to_string());
        let last_active = account
            .last_active
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  {:<20} {:<12} session:{:<8} proxy:{}  last:{}",
            account.id,
            account.display_name,
            account.eligibility,
            account.session_validity,
            proxy,
            last_active
        );
    }
    Ok(())
}

async fn run_command(command: Commands) -> Result<()> {
    let ctx = open()?;
    let registry = &ctx.registry;

    match command {
        Commands::Add { name, proxy } => {
            let proxy = proxy.map(|p| p.parse::<ProxySpec>()).transpose()?;
            let account = registry.add_account(&name, proxy)?;
            println!("✓ Added {} ({})", account.display_name, account.id);
            println!("  Sign in with: autopost-accounts login {}", account.id);
        }
        Commands::List { format } => print_accounts(&registry.list(), &format)?,
        Commands::Enable { account } => {
            let account = resolve(registry, &account)?;
            registry.set_eligibility(&account.id, Eligibility::Active)?;
            println!("✓ {} is active", account.display_name);
        }
        Commands::Disable { account } => {
            let account = resolve(registry, &account)?;
            registry.set_eligibility(&account.id, Eligibility::Inactive)?;
            println!("✓ {} is inactive", account.display_name);
        }
        Commands::Remove { account } => {
            let account = resolve(registry, &account)?;
            registry.remove_account(&account.id)?;
            FileSessionStore::new(ctx.config.session_dir())
                .clear(&account.id)
                .await?;
            println!("✓ Removed {}", account.display_name);
        }
        Commands::Proxy {
            account,
            spec,
            clear,
        } => {
            let account = resolve(registry, &account)?;
            let proxy = if clear {
                None
            } else {
                spec.map(|s| s.parse::<ProxySpec>()).transpose()?
            };
            registry.set_proxy(&account.id, proxy.clone())?;
            match proxy {
                Some(p) => println!("✓ {} now uses {}", account.display_name, p),
                None => println!("✓ {} connects directly", account.display_name),
            }
        }
        Commands::Login { account } => {
            let account = resolve(registry, &account)?;
            let action = LoginAction::new(
                default_driver()?,
                Arc::new(FileSessionStore::new(ctx.config.session_dir())),
                SessionLocks::new(),
                registry.clone(),
                &ctx.config.browser,
            );
            println!(
                "Opening a browser for {}. Sign in within {}s...",
                account.display_name, ctx.config.browser.login_timeout_secs
            );
            action.login(&account.id).await?;
            let account = registry.get(&account.id)?;
            println!(
                "✓ Session saved for {} ({})",
                account.display_name, account.eligibility
            );
        }
        Commands::Logout { account } => {
            let account = resolve(registry, &account)?;
            // Clearing a session needs no browser
            FileSessionStore::new(ctx.config.session_dir())
                .clear(&account.id)
                .await?;
            registry.set_session_validity(&account.id, SessionValidity::Expired)?;
            println!("✓ Session cleared for {}", account.display_name);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = libautopost::logging::LoggingConfig::from_env();
    logging.verbose = cli.verbose;
    logging.init();

    if let Err(e) = run_command(cli.command).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<AutopostError>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
