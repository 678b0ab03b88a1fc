//! Scripted pipeline stages for tests
//!
//! Compiled in all builds so integration tests and the binaries' dry-run
//! paths can drive the orchestrator without network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::rewrite::RewriteService;
use super::source::{ContentSource, SourceSpec};
use crate::error::{AutopostError, Result, RewriteError};
use crate::types::RewriteConfig;

type Scripted = std::result::Result<String, String>;

/// Replays a script of outcomes; the last one repeats once the script runs out
struct Script {
    pending: Mutex<VecDeque<Scripted>>,
    last: Mutex<Scripted>,
    calls: Arc<Mutex<usize>>,
}

impl Script {
    fn new(outcomes: Vec<Scripted>) -> Self {
        let last = outcomes
            .last()
            .cloned()
            .unwrap_or_else(|| Err("empty script".to_string()));
        Self {
            pending: Mutex::new(outcomes.into()),
            last: Mutex::new(last),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    fn next(&self) -> Scripted {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.pop_front() {
            Some(outcome) => outcome,
            None => self
                .last
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Content source returning scripted text or acquisition failures
pub struct MockSource {
    script: Script,
}

impl MockSource {
    pub fn success(text: &str) -> Self {
        Self::sequence(vec![Ok(text.to_string())])
    }

    pub fn failing(error: &str) -> Self {
        Self::sequence(vec![Err(error.to_string())])
    }

    pub fn sequence(outcomes: Vec<Scripted>) -> Self {
        Self {
            script: Script::new(outcomes),
        }
    }

    pub fn call_count(&self) -> usize {
        self.script.calls()
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn fetch(&self, _spec: &SourceSpec) -> Result<String> {
        self.script.next().map_err(AutopostError::Acquisition)
    }
}

/// Rewrite service returning scripted text or request failures
pub struct MockRewriter {
    script: Script,
    seen: Arc<Mutex<Vec<(String, RewriteConfig)>>>,
}

impl MockRewriter {
    pub fn success(text: &str) -> Self {
        Self::sequence(vec![Ok(text.to_string())])
    }

    pub fn failing(error: &str) -> Self {
        Self::sequence(vec![Err(error.to_string())])
    }

    pub fn sequence(outcomes: Vec<Scripted>) -> Self {
        Self {
            script: Script::new(outcomes),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.script.calls()
    }

    /// Inputs received so far, with the config snapshot of each call
    pub fn seen(&self) -> Vec<(String, RewriteConfig)> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl RewriteService for MockRewriter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn rewrite(
        &self,
        text: &str,
        config: &RewriteConfig,
    ) -> std::result::Result<String, RewriteError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((text.to_string(), config.clone()));
        self.script.next().map_err(RewriteError::Request)
    }
}
