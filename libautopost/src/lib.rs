//! Autopost - a cancellable publish loop for a pool of browser accounts
//!
//! Each cycle selects an eligible account, acquires source text, rewrites it,
//! publishes it through a human-paced browser session and waits a randomized
//! backoff before the next cycle.

pub mod accounts;
pub mod browser;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod login;
pub mod orchestrator;
pub mod pipeline;
pub mod publish;
pub mod scheduling;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use accounts::AccountRegistry;
pub use config::Config;
pub use db::{Database, HistoryStats, MemoryRecordSink, RecordQuery, RecordSink};
pub use error::{AutopostError, Result};
pub use events::{Event, EventBus};
pub use orchestrator::{Collaborators, Orchestrator, RunSettings};
pub use publish::{PublishAction, PublishSettings, Publisher};
pub use types::{
    Account, CyclePhase, CycleState, Eligibility, LogEntry, LogLevel, PublishRecord,
    PublishStatus, RewriteConfig, RunStatus, SessionValidity,
};
