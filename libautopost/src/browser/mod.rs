//! Browser driver protocol
//!
//! The publish and login actions drive a browser exclusively through these
//! traits. [`MockBrowser`] records every call and is available in all builds;
//! the CDP-backed `ChromiumDriver` is behind the `browser` feature.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::BrowserConfig;
use crate::error::{PublishError, Result};
use crate::types::ProxySpec;

#[cfg(feature = "browser")]
pub mod chromium;
pub mod mock;

#[cfg(feature = "browser")]
pub use chromium::ChromiumDriver;
pub use mock::{BrowserCall, MockBrowser};

pub type BrowserResult<T> = std::result::Result<T, PublishError>;

/// The real driver, when this build has one
#[cfg(feature = "browser")]
pub fn default_driver() -> Result<std::sync::Arc<dyn BrowserDriver>> {
    Ok(std::sync::Arc::new(ChromiumDriver::new()))
}

#[cfg(not(feature = "browser"))]
pub fn default_driver() -> Result<std::sync::Arc<dyn BrowserDriver>> {
    Err(crate::error::ConfigError::OutOfRange {
        field: "browser".to_string(),
        reason: "this build has no browser driver; rebuild with --features browser".to_string(),
    }
    .into())
}

/// How to find an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    /// A `<button>` whose visible text contains the string
    ButtonWithText(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => write!(f, "{}", selector),
            Locator::ButtonWithText(text) => write!(f, "button with text '{}'", text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Everything needed to launch one isolated context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub viewport: Viewport,
    pub user_agent: String,
    pub proxy: Option<ProxySpec>,
    /// Persisted session blob to restore, if any
    pub session: Option<String>,
    pub headless: bool,
    pub executable: Option<String>,
}

impl ContextOptions {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            viewport: Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
            },
            user_agent: config.user_agent.clone(),
            proxy: None,
            session: None,
            headless: config.headless,
            executable: config.executable.clone(),
        }
    }

    pub fn with_proxy(mut self, proxy: Option<ProxySpec>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_session(mut self, session: Option<String>) -> Self {
        self.session = session;
        self
    }

    pub fn headed(mut self) -> Self {
        self.headless = false;
        self
    }
}

/// Launches isolated execution contexts
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self, options: &ContextOptions) -> BrowserResult<Box<dyn BrowserContext>>;
}

/// One isolated context (browser, page, cookie jar)
///
/// Owned by exactly one action; `close` consumes it.
#[async_trait]
pub trait BrowserContext: Send {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// Poll until `locator` is present or `timeout` elapses
    async fn wait_for(&mut self, locator: &Locator, timeout: Duration) -> BrowserResult<bool>;

    async fn click(&mut self, locator: &Locator) -> BrowserResult<()>;

    /// Type into the focused element
    async fn type_text(&mut self, text: &str) -> BrowserResult<()>;

    async fn press_key(&mut self, key: &str) -> BrowserResult<()>;

    /// Present, visible and enabled
    async fn is_actionable(&mut self, locator: &Locator) -> BrowserResult<bool>;

    async fn attach_files(&mut self, locator: &Locator, files: &[PathBuf]) -> BrowserResult<()>;

    /// Serialized session (cookies) to persist for the next launch
    async fn session_state(&mut self) -> BrowserResult<String>;

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}
