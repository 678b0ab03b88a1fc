//! Interactive login: capture a session while the operator signs in

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::accounts::AccountRegistry;
use crate::browser::{BrowserDriver, ContextOptions, Locator};
use crate::config::BrowserConfig;
use crate::error::{Result, SessionError};
use crate::session::{SessionLocks, SessionStore};
use crate::types::{Eligibility, SessionValidity};

pub struct LoginAction {
    driver: Arc<dyn BrowserDriver>,
    sessions: Arc<dyn SessionStore>,
    locks: SessionLocks,
    registry: AccountRegistry,
    login_url: String,
    logged_in: Locator,
    timeout: Duration,
    context: ContextOptions,
}

impl LoginAction {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        sessions: Arc<dyn SessionStore>,
        locks: SessionLocks,
        registry: AccountRegistry,
        config: &BrowserConfig,
    ) -> Self {
        Self {
            driver,
            sessions,
            locks,
            registry,
            login_url: config.login_url.clone(),
            logged_in: Locator::Css(config.logged_in_selector.clone()),
            timeout: Duration::from_secs(config.login_timeout_secs),
            context: ContextOptions::from_config(config).headed(),
        }
    }

    /// Open a visible browser on the login page and wait for the operator
    ///
    /// On success the session is saved, the session is marked valid, and an
    /// account still waiting for its first login becomes active.
    pub async fn login(&self, account_id: &str) -> Result<()> {
        let account = self.registry.get(account_id)?;
        let _guard = self.locks.lock(account_id).await;

        let existing = self.sessions.load(account_id).await.unwrap_or_else(|e| {
            warn!(account_id, "Ignoring saved session: {}", e);
            None
        });
        let options = self
            .context
            .clone()
            .with_proxy(account.proxy.clone())
            .with_session(existing);

        let mut context = self.driver.launch(&options).await?;

        let outcome: Result<String> = async {
            context.navigate(&self.login_url).await?;
            info!(
                account_id,
                timeout_secs = self.timeout.as_secs(),
                "Waiting for manual login"
            );
            if !context.wait_for(&self.logged_in, self.timeout).await? {
                return Err(SessionError::LoginTimeout(self.timeout.as_secs()).into());
            }
            Ok(context.session_state().await?)
        }
        .await;

        if let Err(e) = context.close().await {
            warn!(account_id, "Failed to close browser context: {}", e);
        }

        let blob = outcome?;
        self.sessions.save(account_id, &blob).await?;
        self.registry
            .set_session_validity(account_id, SessionValidity::Valid)?;
        // Eligibility may have changed while the operator was signing in
        let current = self.registry.get(account_id)?;
        if current.eligibility == Eligibility::NeedsLogin {
            self.registry
                .set_eligibility(account_id, Eligibility::Active)?;
        }
        info!(account_id, "Login captured");
        Ok(())
    }

    /// Forget the saved session
    pub async fn logout(&self, account_id: &str) -> Result<()> {
        self.registry.get(account_id)?;
        let _guard = self.locks.lock(account_id).await;
        self.sessions.clear(account_id).await?;
        self.registry
            .set_session_validity(account_id, SessionValidity::Expired)?;
        info!(account_id, "Session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserCall, MockBrowser};
    use crate::error::AutopostError;
    use crate::session::MemorySessionStore;
    use crate::types::Account;

    fn setup(
        browser: &MockBrowser,
    ) -> (LoginAction, AccountRegistry, Arc<MemorySessionStore>, String) {
        let registry = AccountRegistry::in_memory(vec![]);
        let account = registry.add_account("Clone 01", None).unwrap();
        let sessions = Arc::new(MemorySessionStore::new());
        let action = LoginAction::new(
            Arc::new(browser.clone()),
            sessions.clone(),
            SessionLocks::new(),
            registry.clone(),
            &BrowserConfig::default(),
        );
        (action, registry, sessions, account.id)
    }

    #[tokio::test]
    async fn test_login_saves_session_and_activates() {
        let browser = MockBrowser::new().with_session_blob("fresh-cookies");
        let (action, registry, sessions, id) = setup(&browser);

        action.login(&id).await.unwrap();

        let account: Account = registry.get(&id).unwrap();
        assert_eq!(account.session_validity, SessionValidity::Valid);
        assert_eq!(account.eligibility, Eligibility::Active);
        assert_eq!(sessions.get(&id).as_deref(), Some("fresh-cookies"));

        // Login is always headed
        assert!(matches!(
            browser.calls()[0],
            BrowserCall::Launch { headless: false, .. }
        ));
        assert_eq!(browser.close_count(), 1);
    }

    #[tokio::test]
    async fn test_login_keeps_inactive_accounts_inactive() {
        let browser = MockBrowser::new();
        let (action, registry, _sessions, id) = setup(&browser);
        registry.set_eligibility(&id, Eligibility::Inactive).unwrap();

        action.login(&id).await.unwrap();
        assert_eq!(registry.get(&id).unwrap().eligibility, Eligibility::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_during_login_stays_inactive() {
        let browser = MockBrowser::new().with_delay(Duration::from_secs(60));
        let (action, registry, _sessions, id) = setup(&browser);

        let login = {
            let id = id.clone();
            tokio::spawn(async move { action.login(&id).await })
        };

        // Operator is still on the login page
        tokio::time::sleep(Duration::from_secs(1)).await;
        registry.set_eligibility(&id, Eligibility::Inactive).unwrap();

        login.await.unwrap().unwrap();
        let account = registry.get(&id).unwrap();
        assert_eq!(account.eligibility, Eligibility::Inactive);
        assert_eq!(account.session_validity, SessionValidity::Valid);
    }

    #[tokio::test]
    async fn test_login_timeout() {
        let marker = Locator::Css(BrowserConfig::default().logged_in_selector);
        let browser = MockBrowser::new().missing(marker);
        let (action, registry, sessions, id) = setup(&browser);

        let err = action.login(&id).await.unwrap_err();
        assert!(matches!(
            err,
            AutopostError::Session(SessionError::LoginTimeout(300))
        ));
        assert!(sessions.get(&id).is_none());
        assert_eq!(
            registry.get(&id).unwrap().session_validity,
            SessionValidity::Expired
        );
        assert_eq!(browser.close_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let browser = MockBrowser::new();
        let (action, registry, sessions, id) = setup(&browser);
        action.login(&id).await.unwrap();

        action.logout(&id).await.unwrap();
        assert!(sessions.get(&id).is_none());
        assert_eq!(
            registry.get(&id).unwrap().session_validity,
            SessionValidity::Expired
        );
    }

    #[tokio::test]
    async fn test_login_unknown_account() {
        let browser = MockBrowser::new();
        let (action, _registry, _sessions, _id) = setup(&browser);
        assert!(action.login("nope").await.is_err());
        assert_eq!(browser.launch_count(), 0);
    }
}
