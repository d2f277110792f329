//! Unlock session
//!
//! One session per seed dialog. The session owns the background worker,
//! the preference subscription and the view state, and tears all of them
//! down on [`UnlockSession::end`] or drop, whichever comes first.
//!
//! Background work never touches the session directly: completions and
//! preference notifications are queued to the session inbox and applied
//! when the owner polls [`UnlockSession::next_event`].

use crate::audit::UnlockAuditLog;
use crate::liveness::SessionLiveness;
use crate::worker::BackgroundWorker;
use crate::workflow::{
    AttemptOutcome, AttemptStart, Completion, CompletionSink, SeedUnlockWorkflow, UnlockState,
};
use seedvault_core::settings::DEFAULT_WORKER_THREAD_NAME;
use seedvault_core::{
    Configuration, KdfCost, ListenerId, PinRetryController, PreferenceListener, Result,
    UnlockSettings, Wallet, PREFS_KEY_REMIND_BACKUP_SEED,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Facts captured when the session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Wallet seed needs a PIN
    pub is_encrypted: bool,
    /// Wallet is mid-upgrade; no backup reminder
    pub is_upgrading: bool,
    /// Backup reminder flag at start
    pub remind_backup_seed_enabled: bool,
}

/// Caller-supplied session options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Wallet is mid-upgrade
    pub is_upgrading: bool,
    /// Key derivation cost
    pub kdf_cost: KdfCost,
    /// Name of the background worker thread
    pub worker_thread_name: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            is_upgrading: false,
            kdf_cost: KdfCost::default(),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

impl From<&UnlockSettings> for SessionOptions {
    fn from(settings: &UnlockSettings) -> Self {
        Self {
            is_upgrading: false,
            kdf_cost: settings.kdf_cost,
            worker_thread_name: settings.worker_thread_name.clone(),
        }
    }
}

/// What the seed dialog should show
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockView {
    /// PIN field and submit button shown
    pub password_entry_visible: bool,
    /// Seed words shown
    pub seed_visible: bool,
    /// "I have written it down" checkbox shown
    pub written_down_visible: bool,
    /// PIN field editable
    pub input_enabled: bool,
    /// Submit button enabled
    pub submit_enabled: bool,
    /// Progress indicator shown
    pub decrypting: bool,
    /// Hint under the PIN field
    pub error_message: Option<String>,
}

/// Delivered by [`UnlockSession::next_event`]
#[derive(Debug)]
pub enum SessionEvent {
    /// An attempt finished
    Outcome(AttemptOutcome),
    /// The view changed
    ViewChanged(UnlockView),
}

enum SessionMessage {
    Completion(Completion),
    PreferenceChanged,
}

type OnEnd = Box<dyn FnOnce() + Send>;

/// One seed dialog lifetime
pub struct UnlockSession {
    id: Uuid,
    wallet_id: String,
    config: SessionConfig,
    workflow: SeedUnlockWorkflow,
    worker: Option<Arc<BackgroundWorker>>,
    configuration: Arc<dyn Configuration>,
    listener: Option<ListenerId>,
    inbox: mpsc::UnboundedReceiver<SessionMessage>,
    pending: VecDeque<SessionEvent>,
    liveness: SessionLiveness,
    view: UnlockView,
    written_down: bool,
    audit: UnlockAuditLog,
    on_end: Option<OnEnd>,
    ended: bool,
}

impl UnlockSession {
    /// Open a session for `wallet`.
    ///
    /// Spawns the worker for encrypted wallets and subscribes to preference
    /// changes. An unencrypted wallet's seed is queued as the first event.
    /// Fails on integration defects such as an encrypted wallet without an
    /// active key chain.
    pub fn start(
        wallet: Arc<dyn Wallet>,
        retry: Arc<PinRetryController>,
        configuration: Arc<dyn Configuration>,
        options: SessionOptions,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let liveness = SessionLiveness::new(id);
        let (tx, inbox) = mpsc::unbounded_channel();

        let config = SessionConfig {
            is_encrypted: wallet.is_encrypted(),
            is_upgrading: options.is_upgrading,
            remind_backup_seed_enabled: configuration.remind_backup_seed(),
        };

        let worker = if config.is_encrypted {
            Some(Arc::new(BackgroundWorker::spawn(&options.worker_thread_name)?))
        } else {
            None
        };

        let completions = tx.clone();
        let sink: CompletionSink = Arc::new(move |completion: Completion| {
            let _ = completions.send(SessionMessage::Completion(completion));
        });
        let wallet_id = wallet.wallet_id().to_string();
        let workflow = SeedUnlockWorkflow::new(
            wallet,
            retry,
            worker.clone().map(|worker| (worker, options.kdf_cost)),
            sink,
            liveness.clone(),
        )?;

        let listener_liveness = liveness.clone();
        let listener: Arc<dyn PreferenceListener> = Arc::new(move |key: &str| {
            if key == PREFS_KEY_REMIND_BACKUP_SEED && listener_liveness.is_live() {
                let _ = tx.send(SessionMessage::PreferenceChanged);
            }
        });
        let listener = configuration.register_listener(listener);

        let mut audit = UnlockAuditLog::new(id.to_string());
        audit.log_session_started(&wallet_id, config.is_encrypted, config.is_upgrading);

        let view = UnlockView {
            password_entry_visible: config.is_encrypted,
            input_enabled: config.is_encrypted,
            submit_enabled: config.is_encrypted,
            ..UnlockView::default()
        };

        let mut session = Self {
            id,
            wallet_id,
            config,
            workflow,
            worker,
            configuration,
            listener: Some(listener),
            inbox,
            pending: VecDeque::new(),
            liveness,
            view,
            written_down: false,
            audit,
            on_end: None,
            ended: false,
        };

        // Dropping on error tears down what was set up above.
        if let Some(outcome) = session.workflow.start()? {
            session.apply_outcome(&outcome);
            session.pending.push_back(SessionEvent::Outcome(outcome));
            session.push_view();
        }

        Ok(session)
    }

    /// Run `on_end` once when the session ends
    pub fn with_on_end(mut self, on_end: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(on_end));
        self
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wallet this session unlocks
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    /// Facts captured at start
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Current view
    pub fn view(&self) -> &UnlockView {
        &self.view
    }

    /// Workflow state
    pub fn state(&self) -> UnlockState {
        self.workflow.state()
    }

    /// Audit trail so far
    pub fn audit(&self) -> &UnlockAuditLog {
        &self.audit
    }

    /// Liveness flag of this session; ending it stops event delivery
    pub fn liveness(&self) -> SessionLiveness {
        self.liveness.clone()
    }

    /// Whether the session was ended
    pub fn is_ended(&self) -> bool {
        self.ended || !self.liveness.is_live()
    }

    /// Submit a PIN.
    ///
    /// `Rejected` outcomes are returned directly; a `Started` attempt's
    /// outcome arrives through [`UnlockSession::next_event`].
    pub fn attempt(&mut self, pin: &str) -> AttemptStart {
        if self.is_ended() {
            return AttemptStart::Ignored;
        }

        let start = self.workflow.attempt(pin);
        match &start {
            AttemptStart::Started(attempt) => {
                self.audit.log_attempt_started(attempt.value());
                self.view.input_enabled = false;
                self.view.submit_enabled = false;
                self.view.decrypting = true;
                self.view.error_message = None;
                self.push_view();
            }
            AttemptStart::Rejected(outcome) => {
                self.apply_outcome(outcome);
                self.push_view();
            }
            AttemptStart::Ignored => {}
        }
        start
    }

    /// The PIN field was edited: clear the hint and re-enable submit
    pub fn pin_edited(&mut self) {
        if self.is_ended()
            || !matches!(
                self.workflow.state(),
                UnlockState::Idle | UnlockState::RejectedLocked
            )
        {
            return;
        }
        if self.view.error_message.is_some() || !self.view.submit_enabled {
            self.view.error_message = None;
            self.view.submit_enabled = true;
            self.push_view();
        }
    }

    /// Tick or untick "I have written it down"; ignored while the box is hidden
    pub fn set_written_down(&mut self, written_down: bool) {
        if !self.view.written_down_visible {
            debug!(session_id = %self.id, "Written-down toggle ignored, checkbox hidden");
            return;
        }
        self.written_down = written_down;
    }

    /// Whether "I have written it down" is ticked
    pub fn is_written_down(&self) -> bool {
        self.written_down
    }

    /// Next event, waiting for background work if needed.
    ///
    /// Returns `Ok(None)` once the session has ended. Errors are
    /// integration defects surfaced by the workflow.
    pub async fn next_event(&mut self) -> Result<Option<SessionEvent>> {
        loop {
            if self.is_ended() {
                self.pending.clear();
                return Ok(None);
            }
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let liveness = self.liveness.clone();
            let message = tokio::select! {
                biased;
                _ = liveness.ended() => return Ok(None),
                message = self.inbox.recv() => message,
            };

            match message {
                Some(SessionMessage::Completion(completion)) => {
                    match self.workflow.on_completion(completion) {
                        Ok(Some(outcome)) => {
                            self.apply_outcome(&outcome);
                            self.pending.push_back(SessionEvent::Outcome(outcome));
                            self.push_view();
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                session_id = %self.id,
                                category = %e.category(),
                                user_error = e.is_user_error(),
                                error = %e,
                                "Attempt aborted"
                            );
                            self.view.decrypting = false;
                            self.view.input_enabled = true;
                            self.view.submit_enabled = true;
                            self.push_view();
                            return Err(e);
                        }
                    }
                }
                Some(SessionMessage::PreferenceChanged) => {
                    let visible = self.reminder_visible();
                    if visible != self.view.written_down_visible {
                        self.view.written_down_visible = visible;
                        self.push_view();
                    }
                }
                None => return Ok(None),
            }
        }
    }

    /// Submit a PIN and wait for its outcome.
    ///
    /// View changes queued meanwhile are consumed; read [`UnlockSession::view`]
    /// afterwards. `None` when the attempt was ignored or the session ended.
    pub async fn submit(&mut self, pin: &str) -> Result<Option<AttemptOutcome>> {
        match self.attempt(pin) {
            AttemptStart::Rejected(outcome) => Ok(Some(outcome)),
            AttemptStart::Ignored => Ok(None),
            AttemptStart::Started(_) => {
                while let Some(event) = self.next_event().await? {
                    if let SessionEvent::Outcome(outcome) = event {
                        return Ok(Some(outcome));
                    }
                }
                Ok(None)
            }
        }
    }

    /// End the session
    pub fn end(mut self) {
        self.teardown();
    }

    fn apply_outcome(&mut self, outcome: &AttemptOutcome) {
        self.view.decrypting = false;
        match outcome {
            AttemptOutcome::Revealed(seed) => {
                self.audit.log_seed_revealed(seed.word_count());
                self.view.password_entry_visible = false;
                self.view.input_enabled = false;
                self.view.submit_enabled = false;
                self.view.error_message = None;
                self.view.seed_visible = true;
                self.view.written_down_visible = self.reminder_visible();
            }
            AttemptOutcome::WrongPassword(message) => {
                self.audit.log_wrong_pin(message);
                self.show_error(message);
            }
            AttemptOutcome::Locked(message) => {
                self.audit.log_attempt_locked(message);
                self.show_error(message);
            }
            AttemptOutcome::DerivationFailed(message) => {
                self.audit.log_derivation_failed(message);
                self.show_error(message);
            }
        }
    }

    fn show_error(&mut self, message: &str) {
        self.view.input_enabled = true;
        self.view.submit_enabled = false;
        self.view.error_message = Some(message.to_string());
    }

    fn reminder_visible(&self) -> bool {
        self.workflow.state() == UnlockState::Revealed
            && !self.config.is_upgrading
            && self.configuration.remind_backup_seed()
    }

    fn push_view(&mut self) {
        self.pending
            .push_back(SessionEvent::ViewChanged(self.view.clone()));
    }

    fn teardown(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if !self.liveness.end() {
            debug!(session_id = %self.id, "Liveness was already ended");
        }

        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
        if let Some(listener) = self.listener.take() {
            self.configuration.unregister_listener(listener);
        }
        self.inbox.close();
        self.pending.clear();

        if self.written_down {
            self.configuration.disarm_backup_seed_reminder();
            self.audit.log_reminder_disarmed();
        }
        if let Some(on_end) = self.on_end.take() {
            on_end();
        }

        let revealed = self.workflow.state() == UnlockState::Revealed;
        self.audit.log_session_ended(revealed);
        info!(
            session_id = %self.id,
            wallet_id = %self.wallet_id,
            revealed,
            "Unlock session closed"
        );
    }
}

impl Drop for UnlockSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
