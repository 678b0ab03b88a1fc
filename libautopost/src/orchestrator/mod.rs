//! Cycle orchestrator
//!
//! One run is one sequential task:
//!
//! ```text
//! idle -> acquiring -> transforming -> publishing -> waiting -> acquiring ...
//! ```
//!
//! `error` is reachable from acquiring (no eligible account) and ends the run.
//! A stop during the wait ends the run within the current countdown tick; a
//! stop during any other phase is honored at the next phase boundary, so an
//! in-flight publish always runs to completion.
//!
//! Observers read [`CycleState`], the activity log and the publish records
//! through the [`Orchestrator`] handle, or follow the [`EventBus`].

mod log;

pub use log::ActivityLog;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::accounts::AccountRegistry;
use crate::config::{BotConfig, Config};
use crate::db::RecordSink;
use crate::error::Result;
use crate::events::{Event, EventBus, EventReceiver};
use crate::pipeline::{Acquirer, ContentSource, RewriteService, SourceSpec, Transformed, Transformer};
use crate::publish::{record_for, Publisher};
use crate::scheduling::format_wait;
use crate::types::{
    Account, CyclePhase, CycleState, Eligibility, LogEntry, LogLevel, ProxySpec, PublishRecord,
    RewriteConfig, RunStatus, SessionValidity,
};

const TICK: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;
/// Characters of acquired text quoted in the activity log
const PREVIEW_CHARS: usize = 30;

/// External stages the orchestrator sequences
pub struct Collaborators {
    pub registry: AccountRegistry,
    pub source: Arc<dyn ContentSource>,
    pub rewriter: Arc<dyn RewriteService>,
    pub publisher: Arc<dyn Publisher>,
    pub sink: Arc<dyn RecordSink>,
}

/// What a run does, fixed at construction except for the rewrite settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub bot: BotConfig,
    pub source: SourceSpec,
    pub rewrite: RewriteConfig,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            bot: config.bot.bot_config()?,
            source: config.bot.source.clone(),
            rewrite: config.rewrite.rewrite_config()?,
        })
    }
}

enum CycleOutcome {
    Continue,
    Halted,
    Stopped,
    LimitReached,
}

struct Shared {
    registry: AccountRegistry,
    acquirer: Acquirer,
    transformer: Transformer,
    publisher: Arc<dyn Publisher>,
    sink: Arc<dyn RecordSink>,
    bot: BotConfig,
    source: SourceSpec,
    rewrite: RwLock<RewriteConfig>,
    state: RwLock<CycleState>,
    status: RwLock<RunStatus>,
    log: ActivityLog,
    records: Mutex<Vec<PublishRecord>>,
    rng: Mutex<StdRng>,
    events: EventBus,
}

/// The active run: its cancellation token and task
struct RunHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl RunHandle {
    fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Handle to the engine; at most one run is active at a time
pub struct Orchestrator {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
}

impl Orchestrator {
    pub fn new(parts: Collaborators, settings: RunSettings) -> Self {
        let shared = Shared {
            registry: parts.registry,
            acquirer: Acquirer::new(parts.source),
            transformer: Transformer::new(parts.rewriter),
            publisher: parts.publisher,
            sink: parts.sink,
            log: ActivityLog::new(settings.bot.log_capacity()),
            bot: settings.bot,
            source: settings.source,
            rewrite: RwLock::new(settings.rewrite),
            state: RwLock::new(CycleState::default()),
            status: RwLock::new(RunStatus::Idle),
            records: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            events: EventBus::new(EVENT_CAPACITY),
        };
        Self {
            shared: Arc::new(shared),
            run: Mutex::new(None),
        }
    }

    /// Make account selection and backoff reproducible
    pub fn with_seed(self, seed: u64) -> Self {
        *self
            .shared
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
        self
    }

    /// Start a run; returns false (and does nothing) if one is active
    pub fn start(&self) -> bool {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        if run.as_ref().is_some_and(RunHandle::is_active) {
            debug!("Start ignored, a run is already active");
            return false;
        }

        let token = CancellationToken::new();
        self.shared.set_status(RunStatus::Running);
        self.shared.log(LogLevel::Success, "Bot started");

        let shared = self.shared.clone();
        let child = token.clone();
        let task = tokio::spawn(async move {
            let status = shared.run(&child).await;
            shared.set_status(status);
            shared.events.emit(Event::RunFinished { status });
        });

        *run = Some(RunHandle { token, task });
        true
    }

    /// Ask the active run to stop; returns false if none is active
    pub fn stop(&self) -> bool {
        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        match run.as_ref() {
            Some(handle) if handle.is_active() => {
                handle.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait for the current run to finish
    pub async fn join(&self) {
        let handle = self
            .run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.task.await {
                warn!("Run task ended abnormally: {}", e);
                self.shared.set_status(RunStatus::Error);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(RunHandle::is_active)
    }

    pub fn state(&self) -> CycleState {
        *self
            .shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> RunStatus {
        *self
            .shared
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Activity log, oldest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.shared.log.entries()
    }

    /// Records produced by this handle's runs, oldest first
    pub fn records(&self) -> Vec<PublishRecord> {
        self.shared
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.shared.registry
    }

    pub fn add_account(&self, display_name: &str, proxy: Option<ProxySpec>) -> Result<Account> {
        let account = self.shared.registry.add_account(display_name, proxy)?;
        self.shared.log(
            LogLevel::Success,
            format!("Account added: {}", account.display_name),
        );
        Ok(account)
    }

    /// Takes effect from the next cycle
    pub fn set_eligibility(&self, account_id: &str, value: Eligibility) -> Result<()> {
        self.shared.registry.set_eligibility(account_id, value)
    }

    /// Takes effect from the next transform
    pub fn set_rewrite_config(&self, config: RewriteConfig) {
        *self
            .shared
            .rewrite
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn rewrite_config(&self) -> RewriteConfig {
        self.shared
            .rewrite
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self
            .run
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handle.token.cancel();
        }
    }
}

impl Shared {
    async fn run(&self, token: &CancellationToken) -> RunStatus {
        let mut attempts: u32 = 0;
        loop {
            if token.is_cancelled() {
                return self.finish_stopped();
            }

            match self.cycle(token, &mut attempts).await {
                CycleOutcome::Continue => {}
                CycleOutcome::Halted => return RunStatus::Error,
                CycleOutcome::Stopped => return self.finish_stopped(),
                CycleOutcome::LimitReached => return self.finish_idle(),
            }

            if !self.wait(token).await {
                return self.finish_stopped();
            }
        }
    }

    async fn cycle(&self, token: &CancellationToken, attempts: &mut u32) -> CycleOutcome {
        self.set_phase(CyclePhase::Acquiring);

        let eligible = self.registry.list_eligible();
        let picked = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.registry.select(&eligible, &mut *rng)
        };
        let account = match picked {
            Ok(account) => account,
            Err(e) => {
                self.set_phase(CyclePhase::Error);
                self.log(LogLevel::Error, format!("{}; stopping", e));
                return CycleOutcome::Halted;
            }
        };

        if account.session_validity == SessionValidity::Expired {
            self.log(
                LogLevel::Warning,
                format!(
                    "Session for {} is expired; the publish may need a fresh login",
                    account.display_name
                ),
            );
        }

        self.log(
            LogLevel::Info,
            format!(
                "Cycle started [account: {}]: acquiring content from {}",
                account.display_name, self.source
            ),
        );
        let acquired = match self.acquirer.acquire(&self.source).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.log(LogLevel::Error, e.to_string());
                return CycleOutcome::Continue;
            }
        };
        if acquired.from_cache {
            self.log(
                LogLevel::Warning,
                "Source unavailable, reusing the last acquired content",
            );
        }
        self.log(
            LogLevel::Info,
            format!("Acquired \"{}\"", preview(&acquired.text)),
        );

        if token.is_cancelled() {
            return CycleOutcome::Stopped;
        }
        self.set_phase(CyclePhase::Transforming);
        self.log(
            LogLevel::Info,
            format!("Rewriting with {}", self.transformer.service_name()),
        );
        let config = self
            .rewrite
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let text = match self.transformer.transform(&acquired.text, &config).await {
            Transformed::Rewritten(text) => {
                self.log(
                    LogLevel::Success,
                    format!("Rewrite complete ({})", self.transformer.service_name()),
                );
                text
            }
            Transformed::Fallback { text, error } => {
                self.log(
                    LogLevel::Warning,
                    format!("Rewrite failed, using source text: {}", error),
                );
                text
            }
        };

        if token.is_cancelled() {
            return CycleOutcome::Stopped;
        }
        self.set_phase(CyclePhase::Publishing);
        self.log(
            LogLevel::Info,
            format!("Publishing as {}", account.display_name),
        );
        let outcome = self.publisher.publish(&account, &text).await;
        if let Some(problem) = &outcome.session_warning {
            self.log(
                LogLevel::Warning,
                format!("Session for {} not kept: {}", account.display_name, problem),
            );
        }
        let record = record_for(&account, &text, outcome.result);
        match &record.failure_detail {
            None => self.log(
                LogLevel::Success,
                format!("Published as {}", account.display_name),
            ),
            Some(detail) => self.log(
                LogLevel::Error,
                format!("Publish failed for {}: {}", account.display_name, detail),
            ),
        };
        self.store(&account, record).await;

        *attempts += 1;
        if let Some(limit) = self.bot.posts_limit() {
            if *attempts >= limit {
                self.log(
                    LogLevel::Success,
                    format!("Post limit of {} reached, stopping", limit),
                );
                return CycleOutcome::LimitReached;
            }
        }
        CycleOutcome::Continue
    }

    async fn store(&self, account: &Account, record: PublishRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());

        if let Err(e) = self.sink.append(&record).await {
            self.log(
                LogLevel::Warning,
                format!("Publish record not saved: {}", e),
            );
        }
        if let Err(e) = self.registry.touch(&account.id, record.timestamp) {
            // Removed mid-cycle
            debug!(account_id = %account.id, "Could not update last activity: {}", e);
        }
        self.events.emit(Event::RecordCreated { record });
    }

    /// Returns false if a stop arrived before the wait elapsed
    async fn wait(&self, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }

        let total = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.bot.backoff().sample(&mut *rng)
        };
        self.set_state(CycleState {
            phase: CyclePhase::Waiting,
            countdown_remaining: total,
            countdown_total: total,
        });
        self.log(
            LogLevel::Warning,
            format!("Waiting {} seconds ({})", total, format_wait(total)),
        );

        let mut remaining = total;
        while remaining > 0 {
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(TICK) => {}
            }
            remaining -= 1;
            self.set_countdown(remaining, total);
        }
        true
    }

    fn finish_stopped(&self) -> RunStatus {
        self.log(LogLevel::Info, "Bot stopped");
        self.finish_idle()
    }

    fn finish_idle(&self) -> RunStatus {
        self.set_phase(CyclePhase::Idle);
        RunStatus::Stopped
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = self.log.record(level, message);
        self.events.emit(Event::Log { entry });
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.set_state(CycleState {
            phase,
            countdown_remaining: 0,
            countdown_total: 0,
        });
    }

    fn set_state(&self, state: CycleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        self.events.emit(Event::PhaseChanged { phase: state.phase });
    }

    fn set_countdown(&self, remaining: u64, total: u64) {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.countdown_remaining = remaining;
            state.countdown_total = total;
        }
        self.events.emit(Event::Countdown { remaining, total });
    }

    fn set_status(&self, status: RunStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRecordSink;
    use crate::publish::PublishOutcome;
    use crate::pipeline::{MockRewriter, MockSource};
    use crate::scheduling::BackoffWindow;
    use crate::types::Tone;
    use async_trait::async_trait;

    /// Publisher that succeeds after an optional delay
    struct SlowPublisher {
        delay: Duration,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Publisher for SlowPublisher {
        async fn publish(&self, account: &Account, text: &str) -> PublishOutcome {
            *self.calls.lock().unwrap() += 1;
            tokio::time::sleep(self.delay).await;
            PublishOutcome {
                result: Ok(PublishRecord::posted(&account.id, text)),
                session_warning: None,
            }
        }
    }

    fn active(id: &str, validity: SessionValidity) -> Account {
        Account {
            id: id.to_string(),
            display_name: format!("Clone {}", id),
            eligibility: Eligibility::Active,
            session_validity: validity,
            proxy: None,
            last_active: None,
        }
    }

    fn orchestrator(
        accounts: Vec<Account>,
        source: Arc<MockSource>,
        rewriter: Arc<MockRewriter>,
        publisher: Arc<dyn Publisher>,
        bot: BotConfig,
    ) -> Orchestrator {
        Orchestrator::new(
            Collaborators {
                registry: AccountRegistry::in_memory(accounts),
                source,
                rewriter,
                publisher,
                sink: Arc::new(MemoryRecordSink::new()),
            },
            RunSettings {
                bot,
                source: SourceSpec::Text {
                    text: "unused".to_string(),
                },
                rewrite: RewriteConfig::default(),
            },
        )
        .with_seed(7)
    }

    fn slow(delay: Duration) -> Arc<SlowPublisher> {
        Arc::new(SlowPublisher {
            delay,
            calls: Mutex::new(0),
        })
    }

    async fn wait_for_phase(rx: &mut EventReceiver, phase: CyclePhase) {
        loop {
            match rx.recv().await.unwrap() {
                Event::PhaseChanged { phase: p } if p == phase => return,
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_noop_while_running() {
        let orch = orchestrator(
            vec![active("1", SessionValidity::Valid)],
            Arc::new(MockSource::success("text")),
            Arc::new(MockRewriter::success("rewritten")),
            slow(Duration::ZERO),
            BotConfig::default(),
        );

        assert!(orch.start());
        assert!(!orch.start());
        assert!(orch.is_running());

        assert!(orch.stop());
        orch.join().await;
        assert!(!orch.is_running());
        assert!(!orch.stop());
        assert_eq!(orch.status(), RunStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_publish_waits_for_boundary() {
        let publisher = slow(Duration::from_secs(3));
        let source = Arc::new(MockSource::success("text"));
        let orch = orchestrator(
            vec![active("1", SessionValidity::Valid)],
            source.clone(),
            Arc::new(MockRewriter::success("rewritten")),
            publisher.clone(),
            BotConfig::default(),
        );
        let mut rx = orch.subscribe();

        orch.start();
        wait_for_phase(&mut rx, CyclePhase::Publishing).await;
        orch.stop();
        orch.join().await;

        // The in-flight publish completed and was recorded
        assert_eq!(orch.records().len(), 1);
        assert_eq!(*publisher.calls.lock().unwrap(), 1);
        assert_eq!(source.call_count(), 1);
        assert_eq!(orch.state().phase, CyclePhase::Idle);
        assert!(!orch.logs().iter().any(|e| e.message.starts_with("Waiting")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_selected_with_warning() {
        let orch = orchestrator(
            vec![active("1", SessionValidity::Expired)],
            Arc::new(MockSource::success("text")),
            Arc::new(MockRewriter::success("rewritten")),
            slow(Duration::ZERO),
            BotConfig::default().with_posts_limit(Some(1)),
        );

        orch.start();
        orch.join().await;

        assert_eq!(orch.records().len(), 1);
        assert!(orch
            .logs()
            .iter()
            .any(|e| e.level == LogLevel::Warning && e.message.contains("expired")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_posts_limit_stops_cleanly() {
        let source = Arc::new(MockSource::success("text"));
        let orch = orchestrator(
            vec![active("1", SessionValidity::Valid)],
            source.clone(),
            Arc::new(MockRewriter::success("rewritten")),
            slow(Duration::ZERO),
            BotConfig::default()
                .with_backoff(BackoffWindow::new(1, 2).unwrap())
                .with_posts_limit(Some(3)),
        );

        orch.start();
        orch.join().await;

        assert_eq!(orch.records().len(), 3);
        assert_eq!(source.call_count(), 3);
        assert_eq!(orch.status(), RunStatus::Stopped);
        assert_eq!(orch.state().phase, CyclePhase::Idle);
        let last = orch.logs().pop().unwrap();
        assert_eq!(last.level, LogLevel::Success);
        assert!(last.message.contains("Post limit of 3 reached"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewrite_config_change_applies_next_cycle() {
        let rewriter = Arc::new(MockRewriter::success("rewritten"));
        let orch = orchestrator(
            vec![active("1", SessionValidity::Valid)],
            Arc::new(MockSource::success("text")),
            rewriter.clone(),
            slow(Duration::ZERO),
            BotConfig::default().with_posts_limit(Some(1)),
        );

        let hype = RewriteConfig::new(Tone::Hype, 9, "Vietnamese".to_string()).unwrap();
        orch.set_rewrite_config(hype.clone());
        orch.start();
        orch.join().await;

        let seen = rewriter.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, hype);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_is_observable() {
        let orch = orchestrator(
            vec![active("1", SessionValidity::Valid)],
            Arc::new(MockSource::success("text")),
            Arc::new(MockRewriter::success("rewritten")),
            slow(Duration::ZERO),
            BotConfig::default().with_backoff(BackoffWindow::new(4, 4).unwrap()),
        );
        let mut rx = orch.subscribe();

        orch.start();
        wait_for_phase(&mut rx, CyclePhase::Waiting).await;
        assert_eq!(orch.state().countdown_total, 4);
        assert_eq!(orch.state().countdown_remaining, 4);

        let mut ticks = Vec::new();
        while ticks.len() < 4 {
            if let Event::Countdown { remaining, total } = rx.recv().await.unwrap() {
                assert_eq!(total, 4);
                ticks.push(remaining);
            }
        }
        assert_eq!(ticks, vec![3, 2, 1, 0]);

        orch.stop();
        orch.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sink_only_warns() {
        let orch = Orchestrator::new(
            Collaborators {
                registry: AccountRegistry::in_memory(vec![active("1", SessionValidity::Valid)]),
                source: Arc::new(MockSource::success("text")),
                rewriter: Arc::new(MockRewriter::success("rewritten")),
                publisher: slow(Duration::ZERO),
                sink: Arc::new(MemoryRecordSink::failing()),
            },
            RunSettings {
                bot: BotConfig::default().with_posts_limit(Some(2)),
                source: SourceSpec::Text {
                    text: "unused".to_string(),
                },
                rewrite: RewriteConfig::default(),
            },
        );

        orch.start();
        orch.join().await;

        assert_eq!(orch.records().len(), 2);
        assert_eq!(orch.status(), RunStatus::Stopped);
        assert!(orch
            .logs()
            .iter()
            .any(|e| e.level == LogLevel::Warning && e.message.contains("not saved")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_touches_account() {
        let orch = orchestrator(
            vec![active("1", SessionValidity::Valid)],
            Arc::new(MockSource::success("text")),
            Arc::new(MockRewriter::success("rewritten")),
            slow(Duration::ZERO),
            BotConfig::default().with_posts_limit(Some(1)),
        );

        orch.start();
        orch.join().await;

        let account = orch.registry().get("1").unwrap();
        assert_eq!(account.last_active, Some(orch.records()[0].timestamp));
        assert_eq!(account.eligibility, Eligibility::Active);
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(40);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(30)));
    }
}
