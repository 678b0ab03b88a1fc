//! Error types for Autopost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutopostError>;

#[derive(Error, Debug)]
pub enum AutopostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("No eligible account: every account is inactive, needs login, or in error")]
    NoEligibleAccount,

    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    #[error("Rewrite service error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AutopostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            AutopostError::InvalidInput(_) => 3,
            AutopostError::Config(_) | AutopostError::NoEligibleAccount => 2,
            _ => 1,
        }
    }

    /// Whether this error ends the whole bot run rather than a single cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, AutopostError::NoEligibleAccount)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    OutOfRange { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Invalid account name: {0}")]
    InvalidName(String),

    #[error("Invalid proxy spec: {0}")]
    InvalidProxy(String),

    #[error("Account state file error: {0}")]
    StateFile(String),
}

/// Failure of the external generative rewrite service
#[derive(Error, Debug, Clone)]
pub enum RewriteError {
    #[error("Rewrite request failed: {0}")]
    Request(String),

    #[error("Rewrite service returned no content")]
    EmptyResponse,

    #[error("Rewrite service is not configured: {0}")]
    NotConfigured(String),
}

/// Failure of a single publish attempt
///
/// `SubmitControlNotFound` is kept distinct from the generic browser failures
/// because it usually means the session expired or the publish surface changed.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("Editor target '{selector}' not found within {timeout_secs}s")]
    TargetNotFound { selector: String, timeout_secs: u64 },

    #[error("Submit control not found or not enabled: {0}")]
    SubmitControlNotFound(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Attachment upload failed: {0}")]
    Attachment(String),

    #[error("Publish was not confirmed within {0}s")]
    Unconfirmed(u64),

    #[error("Browser error: {0}")]
    Browser(String),
}

/// Failure to load, save, or establish persisted session state
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to persist session for account {account}: {reason}")]
    Persist { account: String, reason: String },

    #[error("Failed to load session for account {account}: {reason}")]
    Load { account: String, reason: String },

    #[error("Login was not completed within {0}s")]
    LoginTimeout(u64),
}
