//! Publish action: one human-paced browser session per attempt
//!
//! Protocol, in order:
//!
//! 1. Launch a context with the account's proxy and persisted session.
//! 2. Navigate to the publish surface and wait (bounded) for the editor.
//! 3. Focus the editor and type line by line, one keystroke at a time.
//! 4. Attach images, if any.
//! 5. Anti-spam wait.
//! 6. Activate the submit control, which must be visible and enabled.
//! 7. Confirmation window.
//!
//! Once the editor has been reached the session is persisted, whatever the
//! outcome. The context is closed on every path after a successful launch.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::browser::{BrowserContext, BrowserDriver, ContextOptions, Locator};
use crate::config::{BrowserConfig, PacingConfig};
use crate::error::PublishError;
use crate::session::{SessionLocks, SessionStore};
use crate::types::{Account, PublishRecord};

/// Source of the human-pacing pauses
pub trait DelayGenerator: Send + Sync {
    fn keystroke(&self) -> Duration;
    fn line_pause(&self) -> Duration;
    fn anti_spam(&self) -> Duration;
}

/// Uniform pauses drawn from the configured ranges
pub struct RandomDelays {
    pacing: PacingConfig,
    rng: Mutex<StdRng>,
}

impl RandomDelays {
    pub fn new(pacing: PacingConfig) -> Self {
        Self {
            pacing,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(pacing: PacingConfig, seed: u64) -> Self {
        Self {
            pacing,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn draw(&self, range: crate::scheduling::DelayRange) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        range.sample(&mut *rng)
    }
}

impl DelayGenerator for RandomDelays {
    fn keystroke(&self) -> Duration {
        self.draw(self.pacing.keystroke_ms)
    }

    fn line_pause(&self) -> Duration {
        self.draw(self.pacing.line_pause_ms)
    }

    fn anti_spam(&self) -> Duration {
        self.draw(self.pacing.anti_spam_ms)
    }
}

/// Zero pauses everywhere
pub struct NoDelays;

impl DelayGenerator for NoDelays {
    fn keystroke(&self) -> Duration {
        Duration::ZERO
    }

    fn line_pause(&self) -> Duration {
        Duration::ZERO
    }

    fn anti_spam(&self) -> Duration {
        Duration::ZERO
    }
}

/// What one publish attempt produced
#[derive(Debug)]
pub struct PublishOutcome {
    pub result: Result<PublishRecord, PublishError>,
    /// Saved session could not be read or written; never fails the attempt
    pub session_warning: Option<String>,
}

impl From<Result<PublishRecord, PublishError>> for PublishOutcome {
    fn from(result: Result<PublishRecord, PublishError>) -> Self {
        Self {
            result,
            session_warning: None,
        }
    }
}

/// Publishes one text for one account
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, account: &Account, text: &str) -> PublishOutcome;
}

/// Map a publish outcome to the record appended to history
pub fn record_for(
    account: &Account,
    text: &str,
    outcome: Result<PublishRecord, PublishError>,
) -> PublishRecord {
    match outcome {
        Ok(record) => record,
        Err(e) => PublishRecord::failed(&account.id, text, e.to_string()),
    }
}

/// Where and how to publish
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub publish_url: String,
    pub editor: Locator,
    pub submit: Locator,
    pub confirmation: Option<Locator>,
    pub file_input: Locator,
    pub target_timeout: Duration,
    pub confirm_wait: Duration,
    pub context: ContextOptions,
}

impl PublishSettings {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            publish_url: config.publish_url.clone(),
            editor: Locator::Css(config.editor_selector.clone()),
            submit: Locator::ButtonWithText(config.submit_text.clone()),
            confirmation: config.confirmation_selector.clone().map(Locator::Css),
            file_input: Locator::Css(r#"input[type="file"]"#.to_string()),
            target_timeout: Duration::from_secs(config.target_timeout_secs),
            confirm_wait: Duration::from_secs(config.confirm_wait_secs),
            context: ContextOptions::from_config(config),
        }
    }
}

pub struct PublishAction {
    driver: Arc<dyn BrowserDriver>,
    sessions: Arc<dyn SessionStore>,
    locks: SessionLocks,
    delays: Arc<dyn DelayGenerator>,
    settings: PublishSettings,
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

impl PublishAction {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        sessions: Arc<dyn SessionStore>,
        locks: SessionLocks,
        delays: Arc<dyn DelayGenerator>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            driver,
            sessions,
            locks,
            delays,
            settings,
        }
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Publish `text`, attaching `images` when non-empty
    pub async fn publish_with_images(
        &self,
        account: &Account,
        text: &str,
        images: &[PathBuf],
    ) -> PublishOutcome {
        let _session_guard = self.locks.lock(&account.id).await;
        let mut session_problems = Vec::new();

        let session = match self.sessions.load(&account.id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(account_id = %account.id, "Starting without saved session: {}", e);
                session_problems.push(format!("saved session not loaded: {}", e));
                None
            }
        };

        let options = self
            .settings
            .context
            .clone()
            .with_proxy(account.proxy.clone())
            .with_session(session);

        debug!(
            account_id = %account.id,
            proxy = ?options.proxy.as_ref().map(|p| p.to_string()),
            "Launching context"
        );
        let result = self
            .attempt(&options, account, text, images, &mut session_problems)
            .await;
        let session_warning =
            (!session_problems.is_empty()).then(|| session_problems.join("; "));
        PublishOutcome {
            result,
            session_warning,
        }
    }

    async fn attempt(
        &self,
        options: &ContextOptions,
        account: &Account,
        text: &str,
        images: &[PathBuf],
        session_problems: &mut Vec<String>,
    ) -> Result<PublishRecord, PublishError> {
        let mut context = self.driver.launch(options).await?;

        let mut reached_editor = false;
        let outcome = self
            .drive(context.as_mut(), text, images, &mut reached_editor)
            .await;

        if reached_editor {
            if let Err(problem) = self.persist_session(context.as_mut(), &account.id).await {
                session_problems.push(problem);
            }
        }

        if let Err(e) = context.close().await {
            warn!(account_id = %account.id, "Failed to close browser context: {}", e);
        }

        match &outcome {
            Ok(()) => info!(account_id = %account.id, chars = text.chars().count(), "Published"),
            Err(e) => warn!(account_id = %account.id, error = %e, "Publish failed"),
        }
        outcome.map(|()| PublishRecord::posted(&account.id, text))
    }

    async fn drive(
        &self,
        context: &mut dyn BrowserContext,
        text: &str,
        images: &[PathBuf],
        reached_editor: &mut bool,
    ) -> Result<(), PublishError> {
        let settings = &self.settings;

        context.navigate(&settings.publish_url).await?;

        if !context
            .wait_for(&settings.editor, settings.target_timeout)
            .await?
        {
            return Err(PublishError::TargetNotFound {
                selector: settings.editor.to_string(),
                timeout_secs: settings.target_timeout.as_secs(),
            });
        }
        *reached_editor = true;

        context.click(&settings.editor).await?;
        self.type_like_human(context, text).await?;

        if !images.is_empty() {
            debug!(count = images.len(), "Attaching images");
            context.attach_files(&settings.file_input, images).await?;
        }

        let wait = self.delays.anti_spam();
        debug!(wait_ms = wait.as_millis() as u64, "Anti-spam wait");
        pause(wait).await;

        if !context.is_actionable(&settings.submit).await? {
            return Err(PublishError::SubmitControlNotFound(format!(
                "{} is not visible or enabled",
                settings.submit
            )));
        }
        context.click(&settings.submit).await?;
        debug!("Submit clicked");

        match &settings.confirmation {
            Some(confirmation) => {
                if !context.wait_for(confirmation, settings.confirm_wait).await? {
                    return Err(PublishError::Unconfirmed(settings.confirm_wait.as_secs()));
                }
            }
            None => pause(settings.confirm_wait).await,
        }
        Ok(())
    }

    async fn type_like_human(
        &self,
        context: &mut dyn BrowserContext,
        text: &str,
    ) -> Result<(), PublishError> {
        for line in text.split('\n') {
            let mut buf = [0u8; 4];
            for ch in line.chars() {
                context.type_text(ch.encode_utf8(&mut buf)).await?;
                pause(self.delays.keystroke()).await;
            }
            context.press_key("Enter").await?;
            pause(self.delays.line_pause()).await;
        }
        Ok(())
    }

    /// Returns the problem, already logged, when the session was not saved
    async fn persist_session(
        &self,
        context: &mut dyn BrowserContext,
        account_id: &str,
    ) -> Result<(), String> {
        let blob = match context.session_state().await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(account_id, "Could not read session state: {}", e);
                return Err(format!("session state not readable: {}", e));
            }
        };
        if let Err(e) = self.sessions.save(account_id, &blob).await {
            warn!(account_id, "Session not persisted: {}", e);
            return Err(format!("session not saved: {}", e));
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for PublishAction {
    async fn publish(&self, account: &Account, text: &str) -> PublishOutcome {
        self.publish_with_images(account, text, &[]).await
    }
}
