//! Account registry: the pool of publishing accounts and their state
//!
//! The registry is shared between the operator (adding accounts, toggling
//! eligibility, logging in) and the orchestrator (listing and selecting).
//! Every mutation is applied and persisted under one write lock, so readers
//! never observe a state that differs from what is on disk.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::error::{AccountError, AutopostError, Result};
use crate::types::{Account, Eligibility, ProxySpec, SessionValidity};

const MAX_NAME_LEN: usize = 64;

/// Account state persisted to TOML
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccountState {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl AccountState {
    fn find_mut(&mut self, id: &str) -> Result<&mut Account> {
        self.accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AccountError::NotFound(id.to_string()).into())
    }
}

/// Thread-safe account registry, optionally backed by a state file
#[derive(Clone)]
pub struct AccountRegistry {
    state_file: Option<PathBuf>,
    state: Arc<RwLock<AccountState>>,
}

impl AccountRegistry {
    /// Open the registry at `state_file`, creating it lazily on first write
    ///
    /// A corrupted file is logged and replaced by an empty registry on the
    /// next write.
    pub fn with_path(state_file: PathBuf) -> Result<Self> {
        let state = load_state(&state_file)?;
        Ok(Self {
            state_file: Some(state_file),
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Registry that lives only in memory
    pub fn in_memory(accounts: Vec<Account>) -> Self {
        Self {
            state_file: None,
            state: Arc::new(RwLock::new(AccountState { accounts })),
        }
    }

    pub fn validate_display_name(name: &str) -> Result<()> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AccountError::InvalidName("Account name cannot be empty".to_string()).into());
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(AccountError::InvalidName(format!(
                "Account name too long: {} characters (max {})",
                trimmed.chars().count(),
                MAX_NAME_LEN
            ))
            .into());
        }
        if trimmed.chars().any(char::is_control) {
            return Err(AccountError::InvalidName(
                "Account name cannot contain control characters".to_string(),
            )
            .into());
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, AccountState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and persist the result while holding the write lock
    fn mutate<T>(&self, f: impl FnOnce(&mut AccountState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut state)?;
        if let Some(path) = &self.state_file {
            save_state(path, &state)?;
        }
        Ok(out)
    }

    pub fn list(&self) -> Vec<Account> {
        self.read().accounts.clone()
    }

    pub fn get(&self, id: &str) -> Result<Account> {
        self.read()
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| AccountError::NotFound(id.to_string()).into())
    }

    /// Accounts with `eligibility == active`; an empty result is not an error
    pub fn list_eligible(&self) -> Vec<Account> {
        self.read()
            .accounts
            .iter()
            .filter(|a| a.is_eligible())
            .cloned()
            .collect()
    }

    /// Uniform random choice among `eligible`
    pub fn select<R: Rng + ?Sized>(&self, eligible: &[Account], rng: &mut R) -> Result<Account> {
        eligible
            .choose(rng)
            .cloned()
            .ok_or(AutopostError::NoEligibleAccount)
    }

    /// Register a new account; it starts as `needs_login` with an expired session
    pub fn add_account(&self, display_name: &str, proxy: Option<ProxySpec>) -> Result<Account> {
        Self::validate_display_name(display_name)?;
        let account = Account::new(display_name.trim().to_string(), proxy);
        let added = account.clone();
        self.mutate(move |state| {
            state.accounts.push(account);
            Ok(())
        })?;
        tracing::info!(account_id = %added.id, name = %added.display_name, "Account added");
        Ok(added)
    }

    /// Insert or replace an account as-is
    pub fn insert(&self, account: Account) -> Result<()> {
        self.mutate(move |state| {
            match state.accounts.iter_mut().find(|a| a.id == account.id) {
                Some(existing) => *existing = account,
                None => state.accounts.push(account),
            }
            Ok(())
        })
    }

    pub fn remove_account(&self, id: &str) -> Result<Account> {
        let removed = self.mutate(|state| {
            let index = state
                .accounts
                .iter()
                .position(|a| a.id == id)
                .ok_or_else(|| AutopostError::from(AccountError::NotFound(id.to_string())))?;
            Ok(state.accounts.remove(index))
        })?;
        tracing::info!(account_id = %id, "Account removed");
        Ok(removed)
    }

    /// Idempotent
    pub fn set_eligibility(&self, id: &str, value: Eligibility) -> Result<()> {
        self.mutate(|state| {
            state.find_mut(id)?.eligibility = value;
            Ok(())
        })?;
        tracing::debug!(account_id = %id, eligibility = %value, "Eligibility updated");
        Ok(())
    }

    /// Idempotent
    pub fn set_session_validity(&self, id: &str, value: SessionValidity) -> Result<()> {
        self.mutate(|state| {
            state.find_mut(id)?.session_validity = value;
            Ok(())
        })?;
        tracing::debug!(account_id = %id, session = %value, "Session validity updated");
        Ok(())
    }

    pub fn set_proxy(&self, id: &str, proxy: Option<ProxySpec>) -> Result<()> {
        self.mutate(|state| {
            state.find_mut(id)?.proxy = proxy;
            Ok(())
        })
    }

    /// Record a publish attempt at `timestamp`
    pub fn touch(&self, id: &str, timestamp: i64) -> Result<()> {
        self.mutate(|state| {
            state.find_mut(id)?.last_active = Some(timestamp);
            Ok(())
        })
    }
}

fn load_state(path: &Path) -> Result<AccountState> {
    if !path.exists() {
        return Ok(AccountState::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| AccountError::StateFile(format!("Failed to read state file: {}", e)))?;

    match toml::from_str::<AccountState>(&content) {
        Ok(state) => Ok(state),
        Err(e) => {
            tracing::warn!("Corrupted account state file, using defaults: {}", e);
            Ok(AccountState::default())
        }
    }
}

/// Write via a sibling temp file and rename so a crash never truncates the registry
fn save_state(path: &Path, state: &AccountState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AccountError::StateFile(format!("Failed to create directory: {}", e)))?;
    }

    let content = toml::to_string_pretty(state)
        .map_err(|e| AccountError::StateFile(format!("Failed to serialize state: {}", e)))?;

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)
        .map_err(|e| AccountError::StateFile(format!("Failed to write state file: {}", e)))?;

    // Proxy passwords live in this file
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| AccountError::StateFile(format!("Failed to set permissions: {}", e)))?;
    }

    std::fs::rename(&tmp, path)
        .map_err(|e| AccountError::StateFile(format!("Failed to replace state file: {}", e)))?;
    Ok(())
}
