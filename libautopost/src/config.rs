//! Configuration management for Autopost

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::pipeline::SourceSpec;
use crate::scheduling::{BackoffWindow, DelayRange};
use crate::types::{RewriteConfig, Tone};

pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub rewrite: RewriteSection,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountsConfig {
    pub state_file: String,
    pub session_dir: String,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            state_file: "~/.config/autopost/accounts.toml".to_string(),
            session_dir: "~/.local/share/autopost/sessions".to_string(),
        }
    }
}

/// `[bot]` as written in the file; see [`BotConfig`] for the validated form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSection {
    pub source: SourceSpec,
    pub interval_min: u64,
    pub interval_max: u64,
    pub posts_limit: Option<u32>,
    pub log_capacity: usize,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            source: SourceSpec::Url {
                url: "https://www.binance.com/en/square".to_string(),
                selector: None,
            },
            interval_min: 5,
            interval_max: 15,
            posts_limit: Some(50),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl BotSection {
    pub fn bot_config(&self) -> Result<BotConfig> {
        BotConfig::new(
            self.interval_min,
            self.interval_max,
            self.posts_limit,
            self.log_capacity,
        )
    }
}

/// Validated run settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotConfig {
    backoff: BackoffWindow,
    posts_limit: Option<u32>,
    log_capacity: usize,
}

impl BotConfig {
    pub fn new(
        interval_min: u64,
        interval_max: u64,
        posts_limit: Option<u32>,
        log_capacity: usize,
    ) -> Result<Self> {
        let backoff = BackoffWindow::new(interval_min, interval_max)?;
        if log_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "bot.log_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if posts_limit == Some(0) {
            return Err(ConfigError::OutOfRange {
                field: "bot.posts_limit".to_string(),
                reason: "must be at least 1 when set".to_string(),
            }
            .into());
        }
        Ok(Self {
            backoff,
            posts_limit,
            log_capacity,
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffWindow) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_posts_limit(mut self, posts_limit: Option<u32>) -> Self {
        self.posts_limit = posts_limit.filter(|n| *n > 0);
        self
    }

    pub fn backoff(&self) -> BackoffWindow {
        self.backoff
    }

    pub fn posts_limit(&self) -> Option<u32> {
        self.posts_limit
    }

    pub fn log_capacity(&self) -> usize {
        self.log_capacity
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffWindow::default(),
            posts_limit: None,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteSection {
    pub tone: Tone,
    pub creativity: u8,
    pub language: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
}

impl Default for RewriteSection {
    fn default() -> Self {
        Self {
            tone: Tone::Friendly,
            creativity: 7,
            language: "English".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

impl RewriteSection {
    pub fn rewrite_config(&self) -> Result<RewriteConfig> {
        RewriteConfig::new(self.tone, self.creativity, self.language.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub publish_url: String,
    pub login_url: String,
    pub editor_selector: String,
    /// Visible text of the submit button
    pub submit_text: String,
    /// Element that appears once a post went through; when unset the
    /// confirmation window is a plain wait
    pub confirmation_selector: Option<String>,
    pub logged_in_selector: String,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub headless: bool,
    pub target_timeout_secs: u64,
    pub confirm_wait_secs: u64,
    pub login_timeout_secs: u64,
    /// Chrome/Chromium executable; auto-detected when unset
    pub executable: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            publish_url: "https://www.binance.com/en/feed/creator-center/create".to_string(),
            login_url: "https://accounts.binance.com/en/login".to_string(),
            editor_selector: r#"div.ProseMirror[contenteditable="true"]"#.to_string(),
            submit_text: "Đăng".to_string(),
            confirmation_selector: None,
            logged_in_selector: r#"a[href*="/my/dashboard"]"#.to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
            viewport_width: 1280,
            viewport_height: 720,
            headless: false,
            target_timeout_secs: 30,
            confirm_wait_secs: 5,
            login_timeout_secs: 300,
            executable: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub keystroke_ms: DelayRange,
    pub line_pause_ms: DelayRange,
    pub anti_spam_ms: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            keystroke_ms: DelayRange::KEYSTROKE,
            line_pause_ms: DelayRange::LINE_PAUSE,
            anti_spam_ms: DelayRange::ANTI_SPAM,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.bot.bot_config()?;
        self.rewrite.rewrite_config()?;

        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.browser.publish_url.trim().is_empty() {
            return Err(ConfigError::MissingField("browser.publish_url".to_string()).into());
        }
        if self.browser.editor_selector.trim().is_empty() {
            return Err(ConfigError::MissingField("browser.editor_selector".to_string()).into());
        }
        if self.browser.target_timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "browser.target_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/autopost/records.db".to_string(),
            },
            accounts: AccountsConfig::default(),
            bot: BotSection::default(),
            rewrite: RewriteSection::default(),
            browser: BrowserConfig::default(),
            pacing: PacingConfig::default(),
        }
    }

    /// Expanded path of the account state file
    pub fn account_state_path(&self) -> PathBuf {
        expand_path(&self.accounts.state_file)
    }

    /// Expanded path of the session directory
    pub fn session_dir(&self) -> PathBuf {
        expand_path(&self.accounts.session_dir)
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("AUTOPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("autopost").join("config.toml"))
}
