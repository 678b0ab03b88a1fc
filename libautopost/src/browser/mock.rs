//! Recording browser driver for tests
//!
//! Every element is present and actionable unless configured otherwise.
//! Calls across all contexts launched by one `MockBrowser` (and its clones)
//! land in a shared log.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{BrowserContext, BrowserDriver, BrowserResult, ContextOptions, Locator};
use crate::error::PublishError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserCall {
    Launch {
        proxy: Option<String>,
        session: Option<String>,
        headless: bool,
    },
    Navigate(String),
    WaitFor(Locator),
    Click(Locator),
    Type(String),
    Key(String),
    Attach(Vec<PathBuf>),
    SessionState,
    Close,
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    missing: HashSet<Locator>,
    disabled: HashSet<Locator>,
    launch_error: Option<String>,
    navigation_error: Option<String>,
    session_blob: String,
    delay: Duration,
}

#[derive(Clone)]
pub struct MockBrowser {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<BrowserCall>>>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            behavior: Behavior {
                session_blob: r#"[{"name":"sid","value":"mock"}]"#.to_string(),
                ..Default::default()
            },
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `locator` never appears
    pub fn missing(mut self, locator: Locator) -> Self {
        self.behavior.missing.insert(locator);
        self
    }

    /// `locator` appears but is not actionable
    pub fn disabled(mut self, locator: Locator) -> Self {
        self.behavior.disabled.insert(locator);
        self
    }

    pub fn failing_launch(mut self, error: &str) -> Self {
        self.behavior.launch_error = Some(error.to_string());
        self
    }

    pub fn failing_navigation(mut self, error: &str) -> Self {
        self.behavior.navigation_error = Some(error.to_string());
        self
    }

    pub fn with_session_blob(mut self, blob: &str) -> Self {
        self.behavior.session_blob = blob.to_string();
        self
    }

    /// Simulated page load time, applied on every navigation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<BrowserCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn launch_count(&self) -> usize {
        self.count(|c| matches!(c, BrowserCall::Launch { .. }))
    }

    pub fn close_count(&self) -> usize {
        self.count(|c| matches!(c, BrowserCall::Close))
    }

    /// Everything typed, with key presses other than Enter dropped
    pub fn typed_text(&self) -> String {
        let mut out = String::new();
        for call in self.calls() {
            match call {
                BrowserCall::Type(text) => out.push_str(&text),
                BrowserCall::Key(key) if key == "Enter" => out.push('\n'),
                _ => {}
            }
        }
        out
    }

    pub fn clicks(&self) -> Vec<Locator> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BrowserCall::Click(locator) => Some(locator),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&BrowserCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| pred(c))
            .count()
    }
}

fn record(calls: &Arc<Mutex<Vec<BrowserCall>>>, call: BrowserCall) {
    calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(call);
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn launch(&self, options: &ContextOptions) -> BrowserResult<Box<dyn BrowserContext>> {
        record(
            &self.calls,
            BrowserCall::Launch {
                proxy: options.proxy.as_ref().map(|p| p.server()),
                session: options.session.clone(),
                headless: options.headless,
            },
        );
        if let Some(error) = &self.behavior.launch_error {
            return Err(PublishError::Browser(error.clone()));
        }
        Ok(Box::new(MockContext {
            behavior: self.behavior.clone(),
            calls: self.calls.clone(),
        }))
    }
}

struct MockContext {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<BrowserCall>>>,
}

impl MockContext {
    fn present(&self, locator: &Locator) -> bool {
        !self.behavior.missing.contains(locator)
    }
}

#[async_trait]
impl BrowserContext for MockContext {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        record(&self.calls, BrowserCall::Navigate(url.to_string()));
        if !self.behavior.delay.is_zero() {
            tokio::time::sleep(self.behavior.delay).await;
        }
        match &self.behavior.navigation_error {
            Some(error) => Err(PublishError::Navigation(error.clone())),
            None => Ok(()),
        }
    }

    async fn wait_for(&mut self, locator: &Locator, _timeout: Duration) -> BrowserResult<bool> {
        record(&self.calls, BrowserCall::WaitFor(locator.clone()));
        Ok(self.present(locator))
    }

    async fn click(&mut self, locator: &Locator) -> BrowserResult<()> {
        record(&self.calls, BrowserCall::Click(locator.clone()));
        if self.present(locator) {
            Ok(())
        } else {
            Err(PublishError::Browser(format!("no element matches {}", locator)))
        }
    }

    async fn type_text(&mut self, text: &str) -> BrowserResult<()> {
        record(&self.calls, BrowserCall::Type(text.to_string()));
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> BrowserResult<()> {
        record(&self.calls, BrowserCall::Key(key.to_string()));
        Ok(())
    }

    async fn is_actionable(&mut self, locator: &Locator) -> BrowserResult<bool> {
        Ok(self.present(locator) && !self.behavior.disabled.contains(locator))
    }

    async fn attach_files(&mut self, _locator: &Locator, files: &[PathBuf]) -> BrowserResult<()> {
        record(&self.calls, BrowserCall::Attach(files.to_vec()));
        Ok(())
    }

    async fn session_state(&mut self) -> BrowserResult<String> {
        record(&self.calls, BrowserCall::SessionState);
        Ok(self.behavior.session_blob.clone())
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        record(&self.calls, BrowserCall::Close);
        Ok(())
    }
}
