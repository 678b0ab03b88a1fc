//! Core types for Autopost

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AccountError, AutopostError, ConfigError, Result};

// ============================================================================
// Accounts
// ============================================================================

/// Whether an account may be chosen for publishing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Active,
    Inactive,
    NeedsLogin,
    Error,
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eligibility::Active => write!(f, "active"),
            Eligibility::Inactive => write!(f, "inactive"),
            Eligibility::NeedsLogin => write!(f, "needs_login"),
            Eligibility::Error => write!(f, "error"),
        }
    }
}

impl FromStr for Eligibility {
    type Err = AutopostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Eligibility::Active),
            "inactive" => Ok(Eligibility::Inactive),
            "needs_login" | "needs-login" => Ok(Eligibility::NeedsLogin),
            "error" => Ok(Eligibility::Error),
            _ => Err(AutopostError::InvalidInput(format!(
                "Invalid eligibility '{}'. Valid options: active, inactive, needs_login, error",
                s
            ))),
        }
    }
}

/// Whether the persisted session for an account is believed to be usable
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionValidity {
    Valid,
    Expired,
}

impl fmt::Display for SessionValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionValidity::Valid => write!(f, "valid"),
            SessionValidity::Expired => write!(f, "expired"),
        }
    }
}

/// Proxy authentication
pub struct ProxyCredentials {
    pub username: String,
    pub password: SecretString,
}

impl Clone for ProxyCredentials {
    fn clone(&self) -> Self {
        Self {
            username: self.username.clone(),
            password: SecretString::from(self.password.expose_secret().to_string()),
        }
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Proxy connection spec: `host:port` or `host:port:user:pass`
///
/// `Display` never includes the password. Serialization writes the full
/// connection string so the account file round-trips.
#[derive(Debug, Clone)]
pub struct ProxySpec {
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxySpec {
    /// Proxy server URL as passed to the browser (`http://host:port`)
    pub fn server(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Full connection string including credentials
    pub fn connection_string(&self) -> String {
        match &self.credentials {
            Some(creds) => format!(
                "{}:{}:{}:{}",
                self.host,
                self.port,
                creds.username,
                creds.password.expose_secret()
            ),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

impl FromStr for ProxySpec {
    type Err = AutopostError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix("http://")
            .or_else(|| trimmed.strip_prefix("https://"))
            .unwrap_or(trimmed);

        let parts: Vec<&str> = trimmed.split(':').collect();
        let (host, port, credentials) = match parts.as_slice() {
            [host, port] => (*host, *port, None),
            [host, port, user, pass] => (
                *host,
                *port,
                Some(ProxyCredentials {
                    username: user.to_string(),
                    password: SecretString::from(pass.to_string()),
                }),
            ),
            _ => {
                return Err(AccountError::InvalidProxy(
                    "expected host:port or host:port:user:pass".to_string(),
                )
                .into())
            }
        };

        if host.is_empty() {
            return Err(AccountError::InvalidProxy("host cannot be empty".to_string()).into());
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| AccountError::InvalidProxy(format!("invalid port '{}'", port)))?;

        Ok(Self {
            host: host.to_string(),
            port,
            credentials,
        })
    }
}

impl fmt::Display for ProxySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.credentials {
            Some(creds) => write!(f, "{}:{} (user {})", self.host, self.port, creds.username),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

impl Serialize for ProxySpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.connection_string())
    }
}

impl<'de> Deserialize<'de> for ProxySpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A publishing account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub eligibility: Eligibility,
    pub session_validity: SessionValidity,
    #[serde(default)]
    pub proxy: Option<ProxySpec>,
    /// Unix timestamp of the last publish attempt
    #[serde(default)]
    pub last_active: Option<i64>,
}

impl Account {
    /// Create a new account; new accounts must log in before they are used
    pub fn new(display_name: String, proxy: Option<ProxySpec>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            display_name,
            eligibility: Eligibility::NeedsLogin,
            session_validity: SessionValidity::Expired,
            proxy,
            last_active: None,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.eligibility == Eligibility::Active
    }
}

// ============================================================================
// Publish records
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Draft,
    Scheduled,
    Posted,
    Failed,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Draft => "draft",
            PublishStatus::Scheduled => "scheduled",
            PublishStatus::Posted => "posted",
            PublishStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishStatus {
    type Err = AutopostError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(PublishStatus::Draft),
            "scheduled" => Ok(PublishStatus::Scheduled),
            "posted" => Ok(PublishStatus::Posted),
            "failed" => Ok(PublishStatus::Failed),
            _ => Err(AutopostError::InvalidInput(format!(
                "Unknown publish status: {}",
                s
            ))),
        }
    }
}

/// Outcome of one publish attempt; append-only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishRecord {
    pub id: String,
    pub content: String,
    pub status: PublishStatus,
    /// Unix timestamp
    pub timestamp: i64,
    pub account_id: String,
    pub failure_detail: Option<String>,
}

impl PublishRecord {
    pub fn posted(account_id: &str, content: &str) -> Self {
        Self::new(account_id, content, PublishStatus::Posted, None)
    }

    pub fn failed(account_id: &str, content: &str, detail: String) -> Self {
        Self::new(account_id, content, PublishStatus::Failed, Some(detail))
    }

    fn new(
        account_id: &str,
        content: &str,
        status: PublishStatus,
        failure_detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            status,
            timestamp: Utc::now().timestamp(),
            account_id: account_id.to_string(),
            failure_detail,
        }
    }

    pub fn is_posted(&self) -> bool {
        self.status == PublishStatus::Posted
    }
}

// ============================================================================
// Activity log
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Success => write!(f, "success"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

// ============================================================================
// Cycle state
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Acquiring,
    Transforming,
    Publishing,
    Waiting,
    Error,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Idle => write!(f, "idle"),
            CyclePhase::Acquiring => write!(f, "acquiring"),
            CyclePhase::Transforming => write!(f, "transforming"),
            CyclePhase::Publishing => write!(f, "publishing"),
            CyclePhase::Waiting => write!(f, "waiting"),
            CyclePhase::Error => write!(f, "error"),
        }
    }
}

/// Observable state of the active run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CycleState {
    pub phase: CyclePhase,
    /// Seconds left in the current wait
    pub countdown_remaining: u64,
    /// Length of the current wait in seconds
    pub countdown_total: u64,
}

/// Aggregate state of the bot run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Stopped => write!(f, "stopped"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

// ============================================================================
// Rewrite configuration
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Expert,
    News,
    Friendly,
    Hype,
    Summary,
}

impl Tone {
    /// Style description handed to the rewrite service
    pub fn description(&self) -> &'static str {
        match self {
            Tone::Expert => "Expert: analytical, precise terminology",
            Tone::News => "News: neutral, factual reporting",
            Tone::Friendly => "Newbie friendly: simple and easy to understand",
            Tone::Hype => "Hype marketing: energetic, FOMO, emojis welcome",
            Tone::Summary => "Summary: short and to the point",
        }
    }
}

impl FromStr for Tone {
    type Err = AutopostError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "expert" => Ok(Tone::Expert),
            "news" => Ok(Tone::News),
            "friendly" => Ok(Tone::Friendly),
            "hype" => Ok(Tone::Hype),
            "summary" => Ok(Tone::Summary),
            _ => Err(AutopostError::InvalidInput(format!(
                "Invalid tone '{}'. Valid options: expert, news, friendly, hype, summary",
                s
            ))),
        }
    }
}

pub const MAX_CREATIVITY: u8 = 10;

/// Immutable rewrite settings, copied into every Transform call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRewriteConfig")]
pub struct RewriteConfig {
    tone: Tone,
    creativity: u8,
    language: String,
}

#[derive(Deserialize)]
struct RawRewriteConfig {
    tone: Tone,
    creativity: u8,
    language: String,
}

impl TryFrom<RawRewriteConfig> for RewriteConfig {
    type Error = AutopostError;

    fn try_from(raw: RawRewriteConfig) -> Result<Self> {
        Self::new(raw.tone, raw.creativity, raw.language)
    }
}

impl RewriteConfig {
    pub fn new(tone: Tone, creativity: u8, language: String) -> Result<Self> {
        if creativity > MAX_CREATIVITY {
            return Err(ConfigError::OutOfRange {
                field: "rewrite.creativity".to_string(),
                reason: format!("{} exceeds maximum of {}", creativity, MAX_CREATIVITY),
            }
            .into());
        }
        if language.trim().is_empty() {
            return Err(ConfigError::MissingField("rewrite.language".to_string()).into());
        }
        Ok(Self {
            tone,
            creativity,
            language,
        })
    }

    pub fn tone(&self) -> Tone {
        self.tone
    }

    pub fn creativity(&self) -> u8 {
        self.creativity
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Sampling temperature in `[0.0, 1.0]`
    pub fn temperature(&self) -> f64 {
        f64::from(self.creativity) / f64::from(MAX_CREATIVITY)
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            tone: Tone::Friendly,
            creativity: 7,
            language: "English".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_spec_host_port() {
        let proxy: ProxySpec = "103.21.123.1:8080".parse().unwrap();
        assert_eq!(proxy.host, "103.21.123.1");
        assert_eq!(proxy.port, 8080);
        assert!(proxy.credentials.is_none());
        assert_eq!(proxy.server(), "http://103.21.123.1:8080");
    }

    #[test]
    fn test_proxy_spec_with_credentials_redacts_display() {
        let proxy: ProxySpec = "192.168.1.1:8080:user:hunter2".parse().unwrap();
        let creds = proxy.credentials.as_ref().unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password.expose_secret(), "hunter2");

        assert!(!proxy.to_string().contains("hunter2"));
        assert!(!format!("{:?}", proxy).contains("hunter2"));
        assert_eq!(proxy.connection_string(), "192.168.1.1:8080:user:hunter2");
    }

    #[test]
    fn test_proxy_spec_rejects_malformed() {
        assert!("localhost".parse::<ProxySpec>().is_err());
        assert!("localhost:notaport".parse::<ProxySpec>().is_err());
        assert!(":8080".parse::<ProxySpec>().is_err());
        assert!("a:1:b".parse::<ProxySpec>().is_err());
    }

    #[test]
    fn test_proxy_spec_strips_scheme() {
        let proxy: ProxySpec = "http://proxy.local:3128".parse().unwrap();
        assert_eq!(proxy.host, "proxy.local");
        assert_eq!(proxy.port, 3128);
    }

    #[test]
    fn test_new_account_needs_login() {
        let account = Account::new("Clone 01".to_string(), None);
        assert_eq!(account.eligibility, Eligibility::NeedsLogin);
        assert_eq!(account.session_validity, SessionValidity::Expired);
        assert!(!account.is_eligible());
        assert!(!account.id.is_empty());
    }

    #[test]
    fn test_rewrite_config_rejects_creativity_above_ten() {
        assert!(RewriteConfig::new(Tone::Hype, 11, "English".to_string()).is_err());
        assert!(RewriteConfig::new(Tone::Hype, 10, "English".to_string()).is_ok());
        assert!(RewriteConfig::new(Tone::Hype, 0, "English".to_string()).is_ok());
    }

    #[test]
    fn test_rewrite_config_rejects_empty_language() {
        assert!(RewriteConfig::new(Tone::News, 5, "  ".to_string()).is_err());
    }

    #[test]
    fn test_rewrite_config_deserialize_validates() {
        let ok: RewriteConfig =
            toml::from_str("tone = \"expert\"\ncreativity = 3\nlanguage = \"Vietnamese\"").unwrap();
        assert_eq!(ok.tone(), Tone::Expert);
        assert!((ok.temperature() - 0.3).abs() < f64::EPSILON);

        let bad = toml::from_str::<RewriteConfig>(
            "tone = \"expert\"\ncreativity = 42\nlanguage = \"Vietnamese\"",
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_publish_record_constructors() {
        let posted = PublishRecord::posted("1", "hello");
        assert!(posted.is_posted());
        assert!(posted.failure_detail.is_none());

        let failed = PublishRecord::failed("1", "hello", "boom".to_string());
        assert_eq!(failed.status, PublishStatus::Failed);
        assert_eq!(failed.failure_detail.as_deref(), Some("boom"));
        assert_ne!(posted.id, failed.id);
    }

    #[test]
    fn test_eligibility_parse_roundtrip() {
        for e in [
            Eligibility::Active,
            Eligibility::Inactive,
            Eligibility::NeedsLogin,
            Eligibility::Error,
        ] {
            assert_eq!(e.to_string().parse::<Eligibility>().unwrap(), e);
        }
    }
}
