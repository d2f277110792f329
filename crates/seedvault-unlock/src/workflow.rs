//! Seed unlock state machine
//!
//! ```text
//! Idle ──attempt──▶ AwaitingKey ──key──▶ AwaitingDecryption ──ok──▶ Revealed
//!  ▲  │                 │                      │
//!  │  └─locked─▶ RejectedLocked                 └─wrong PIN──▶ Idle
//!  └──── derivation failed ─┘
//! ```
//!
//! Background results arrive as [`Completion`]s through the sink handed to
//! the workflow. The owner feeds them back with
//! [`SeedUnlockWorkflow::on_completion`] from the interactive context, so
//! all state changes happen there.

use crate::derivation::KeyDerivationService;
use crate::liveness::SessionLiveness;
use crate::worker::BackgroundWorker;
use seedvault_core::{DerivedKey, Error, KdfCost, PinRetryController, Result, Seed, Wallet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    /// Waiting for a PIN
    Idle,
    /// PIN submitted, key derivation running
    AwaitingKey,
    /// Key derived, seed decryption running
    AwaitingDecryption,
    /// Seed handed out; terminal
    Revealed,
    /// Last attempt refused by the lockout
    RejectedLocked,
}

/// Result of one PIN attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Seed decrypted (or never encrypted)
    Revealed(Seed),
    /// PIN did not decrypt the seed; carries the remaining-attempts hint
    WrongPassword(String),
    /// Refused without checking the PIN
    Locked(String),
    /// Key derivation could not complete; no retry consumed
    DerivationFailed(String),
}

impl AttemptOutcome {
    /// Message to show the user, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            AttemptOutcome::Revealed(_) => None,
            AttemptOutcome::WrongPassword(message)
            | AttemptOutcome::Locked(message)
            | AttemptOutcome::DerivationFailed(message) => Some(message),
        }
    }

    /// Outcome of an attempt refused before the PIN could be checked.
    fn refused(error: Error) -> Self {
        match error {
            Error::LockedOut(remaining) => AttemptOutcome::Locked(remaining),
            other => AttemptOutcome::DerivationFailed(other.user_message()),
        }
    }
}

/// Identifies one attempt within a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Sequence number, starting at 1
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Background result posted back to the workflow
pub enum Completion {
    /// Key derivation finished
    KeyDerived {
        /// Attempt the key belongs to
        attempt: AttemptId,
        /// Derived key or failure
        result: Result<DerivedKey>,
    },
    /// Seed decryption finished
    SeedDecrypted {
        /// Attempt the seed belongs to
        attempt: AttemptId,
        /// Decrypted seed or failure
        result: Result<Seed>,
    },
}

impl Completion {
    /// Attempt this completion belongs to
    pub fn attempt(&self) -> AttemptId {
        match self {
            Completion::KeyDerived { attempt, .. } | Completion::SeedDecrypted { attempt, .. } => {
                *attempt
            }
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, attempt, ok) = match self {
            Completion::KeyDerived { attempt, result } => ("KeyDerived", attempt, result.is_ok()),
            Completion::SeedDecrypted { attempt, result } => {
                ("SeedDecrypted", attempt, result.is_ok())
            }
        };
        f.debug_struct(kind)
            .field("attempt", attempt)
            .field("ok", &ok)
            .finish()
    }
}

/// What [`SeedUnlockWorkflow::attempt`] did with a PIN
#[derive(Debug)]
pub enum AttemptStart {
    /// Derivation queued; the outcome follows as a completion
    Started(AttemptId),
    /// Dropped: an attempt is in flight, the seed is revealed, or the session ended
    Ignored,
    /// Answered immediately without derivation
    Rejected(AttemptOutcome),
}

/// Receives background completions, from any thread
pub type CompletionSink = Arc<dyn Fn(Completion) + Send + Sync>;

/// Orchestrates lockout check, derivation, decryption and retry bookkeeping
pub struct SeedUnlockWorkflow {
    wallet: Arc<dyn Wallet>,
    retry: Arc<PinRetryController>,
    worker: Option<Arc<BackgroundWorker>>,
    derivation: Option<KeyDerivationService>,
    sink: CompletionSink,
    liveness: SessionLiveness,
    state: UnlockState,
    next_attempt: u64,
    current: Option<AttemptId>,
}

impl SeedUnlockWorkflow {
    /// Wire the workflow for `wallet`.
    ///
    /// Encrypted wallets need a worker and must expose a key crypter;
    /// anything else is an integration defect.
    pub fn new(
        wallet: Arc<dyn Wallet>,
        retry: Arc<PinRetryController>,
        worker: Option<(Arc<BackgroundWorker>, KdfCost)>,
        sink: CompletionSink,
        liveness: SessionLiveness,
    ) -> Result<Self> {
        if retry.wallet_id() != wallet.wallet_id() {
            return Err(Error::InvalidState(format!(
                "Retry controller for {} used with wallet {}",
                retry.wallet_id(),
                wallet.wallet_id()
            )));
        }

        let (worker, derivation) = if wallet.is_encrypted() {
            let (worker, cost) = worker.ok_or_else(|| {
                Error::InvalidState("Encrypted wallet needs a background worker".to_string())
            })?;
            let crypter = wallet.key_crypter()?;
            let derivation = KeyDerivationService::new(Arc::clone(&worker), crypter, cost);
            (Some(worker), Some(derivation))
        } else {
            (None, None)
        };

        Ok(Self {
            wallet,
            retry,
            worker,
            derivation,
            sink,
            liveness,
            state: UnlockState::Idle,
            next_attempt: 1,
            current: None,
        })
    }

    /// Current state
    pub fn state(&self) -> UnlockState {
        self.state
    }

    /// Whether the wallet needs a PIN
    pub fn is_encrypted(&self) -> bool {
        self.derivation.is_some()
    }

    /// Attempt awaiting a completion
    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.current
    }

    /// Reveal an unencrypted wallet's seed; `None` when a PIN is needed
    pub fn start(&mut self) -> Result<Option<AttemptOutcome>> {
        if self.is_encrypted() || self.state != UnlockState::Idle {
            return Ok(None);
        }
        let seed = self.wallet.plaintext_seed()?;
        self.state = UnlockState::Revealed;
        info!(wallet_id = %self.wallet.wallet_id(), "Unencrypted seed revealed");
        Ok(Some(AttemptOutcome::Revealed(seed)))
    }

    /// Submit a PIN
    pub fn attempt(&mut self, pin: &str) -> AttemptStart {
        if !self.liveness.is_live() {
            return AttemptStart::Ignored;
        }
        let Some(derivation) = self.derivation.as_ref() else {
            return AttemptStart::Ignored;
        };
        if !matches!(self.state, UnlockState::Idle | UnlockState::RejectedLocked) {
            debug!(state = ?self.state, "Attempt ignored");
            return AttemptStart::Ignored;
        }

        let pin = Zeroizing::new(pin.trim().to_string());

        if self.retry.is_locked() {
            let refusal = self.refuse_locked();
            warn!(
                wallet_id = %self.retry.wallet_id(),
                category = %refusal.category(),
                "Attempt refused, wallet locked"
            );
            return AttemptStart::Rejected(AttemptOutcome::refused(refusal));
        }

        let attempt = AttemptId(self.next_attempt);
        self.next_attempt += 1;

        let sink = Arc::clone(&self.sink);
        let liveness = self.liveness.clone();
        let submitted = derivation.derive_async(pin, move |result| {
            if liveness.is_live() {
                sink(Completion::KeyDerived { attempt, result });
            } else {
                debug!(%attempt, "Derived key discarded, session ended");
            }
        });

        match submitted {
            Ok(()) => {
                self.state = UnlockState::AwaitingKey;
                self.current = Some(attempt);
                debug!(%attempt, "Key derivation started");
                AttemptStart::Started(attempt)
            }
            Err(Error::SessionEnded) => AttemptStart::Ignored,
            Err(e) => {
                self.state = UnlockState::Idle;
                warn!(category = %e.category(), error = %e, "Key derivation could not start");
                AttemptStart::Rejected(AttemptOutcome::refused(e))
            }
        }
    }

    /// Apply a background completion.
    ///
    /// Returns the attempt's outcome once it is known. Completions for an
    /// ended session or a superseded attempt are discarded. Errors are
    /// integration defects, not PIN failures.
    pub fn on_completion(&mut self, completion: Completion) -> Result<Option<AttemptOutcome>> {
        if !self.liveness.is_live() {
            debug!(?completion, "Completion discarded, session ended");
            return Ok(None);
        }
        if self.current != Some(completion.attempt()) {
            debug!(?completion, "Stale completion discarded");
            return Ok(None);
        }

        match completion {
            Completion::KeyDerived { attempt, result } => {
                if self.state != UnlockState::AwaitingKey {
                    return Ok(None);
                }
                match result {
                    Ok(key) => self.on_key_derived(attempt, key),
                    Err(e) => {
                        self.finish(UnlockState::Idle);
                        warn!(
                            %attempt,
                            category = %e.category(),
                            error = %e,
                            "Key derivation failed"
                        );
                        Ok(Some(AttemptOutcome::refused(e)))
                    }
                }
            }
            Completion::SeedDecrypted { attempt, result } => {
                if self.state != UnlockState::AwaitingDecryption {
                    return Ok(None);
                }
                self.on_seed_decrypted(attempt, result)
            }
        }
    }

    fn on_key_derived(
        &mut self,
        attempt: AttemptId,
        key: DerivedKey,
    ) -> Result<Option<AttemptOutcome>> {
        // Another session on this wallet may have locked it meanwhile.
        if self.retry.is_locked() {
            let refusal = self.refuse_locked();
            warn!(
                %attempt,
                category = %refusal.category(),
                "Wallet locked while deriving, key dropped"
            );
            return Ok(Some(AttemptOutcome::refused(refusal)));
        }

        let handle = match self.wallet.encrypted_seed_handle() {
            Ok(handle) => handle,
            Err(e) => {
                self.finish(UnlockState::Idle);
                return Err(e);
            }
        };
        let Some(worker) = self.worker.as_ref() else {
            self.finish(UnlockState::Idle);
            return Err(Error::InvalidState("No background worker".to_string()));
        };

        let wallet = Arc::clone(&self.wallet);
        let sink = Arc::clone(&self.sink);
        let liveness = self.liveness.clone();
        let submitted = worker.execute(move || {
            let result = wallet.decrypt_seed(&handle, &key);
            drop(key);
            if liveness.is_live() {
                sink(Completion::SeedDecrypted { attempt, result });
            } else {
                debug!(%attempt, "Decrypted seed discarded, session ended");
            }
        });

        match submitted {
            Ok(()) => {
                self.state = UnlockState::AwaitingDecryption;
                debug!(%attempt, "Seed decryption started");
                Ok(None)
            }
            Err(Error::SessionEnded) => {
                self.finish(UnlockState::Idle);
                Ok(None)
            }
            Err(e) => {
                self.finish(UnlockState::Idle);
                Err(e)
            }
        }
    }

    fn on_seed_decrypted(
        &mut self,
        attempt: AttemptId,
        result: Result<Seed>,
    ) -> Result<Option<AttemptOutcome>> {
        match result {
            Ok(seed) => {
                if let Err(e) = self.retry.successful_attempt() {
                    error!(
                        wallet_id = %self.retry.wallet_id(),
                        error = %e,
                        "Failed to persist PIN success"
                    );
                }
                self.finish(UnlockState::Revealed);
                info!(%attempt, wallet_id = %self.wallet.wallet_id(), "Seed revealed");
                Ok(Some(AttemptOutcome::Revealed(seed)))
            }
            Err(Error::WrongPassword) => {
                if let Err(e) = self.retry.failed_attempt() {
                    error!(
                        wallet_id = %self.retry.wallet_id(),
                        error = %e,
                        "Failed to persist wrong PIN"
                    );
                }
                self.finish(UnlockState::Idle);
                let message = self.retry.remaining_attempts_message();
                warn!(%attempt, remaining = %message, "Wrong PIN");
                Ok(Some(AttemptOutcome::WrongPassword(message)))
            }
            Err(e) => {
                self.finish(UnlockState::Idle);
                error!(%attempt, error = %e, "Seed decryption failed");
                Err(e)
            }
        }
    }

    fn refuse_locked(&mut self) -> Error {
        self.finish(UnlockState::RejectedLocked);
        Error::LockedOut(self.retry.remaining_attempts_message())
    }

    fn finish(&mut self, state: UnlockState) {
        self.state = state;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedvault_core::{
        EncryptionAlgorithm, LockoutSchedule, ManualClock, MemoryRetryStore, SoftwareWallet,
    };
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    const FAST: KdfCost = KdfCost::new(64, 1, 1);
    const PHRASE: &str = "abandon ability able about above absent";

    struct Harness {
        workflow: SeedUnlockWorkflow,
        completions: std_mpsc::Receiver<Completion>,
        retry: Arc<PinRetryController>,
        liveness: SessionLiveness,
    }

    impl Harness {
        fn new(wallet: SoftwareWallet) -> Self {
            let retry = Arc::new(
                PinRetryController::open(
                    wallet.wallet_id().to_string(),
                    LockoutSchedule::default(),
                    Arc::new(MemoryRetryStore::new()),
                    Arc::new(ManualClock::default()),
                )
                .unwrap(),
            );
            let (tx, rx) = std_mpsc::channel();
            let tx = parking_lot::Mutex::new(tx);
            let sink: CompletionSink = Arc::new(move |c: Completion| {
                let _ = tx.lock().send(c);
            });
            let liveness = SessionLiveness::new(uuid::Uuid::new_v4());
            let worker = Arc::new(BackgroundWorker::spawn("workflow-test").unwrap());
            let workflow = SeedUnlockWorkflow::new(
                Arc::new(wallet),
                Arc::clone(&retry),
                Some((worker, FAST)),
                sink,
                liveness.clone(),
            )
            .unwrap();
            Self {
                workflow,
                completions: rx,
                retry,
                liveness,
            }
        }

        fn next_completion(&self) -> Completion {
            self.completions
                .recv_timeout(Duration::from_secs(10))
                .unwrap()
        }

        fn run(&mut self, pin: &str) -> AttemptOutcome {
            match self.workflow.attempt(pin) {
                AttemptStart::Started(_) => loop {
                    let completion = self.next_completion();
                    if let Some(outcome) = self.workflow.on_completion(completion).unwrap() {
                        return outcome;
                    }
                },
                AttemptStart::Rejected(outcome) => outcome,
                AttemptStart::Ignored => panic!("attempt ignored"),
            }
        }
    }

    fn encrypted_wallet() -> SoftwareWallet {
        SoftwareWallet::encrypted(
            "wallet_123",
            &Seed::from_phrase(PHRASE),
            "1234",
            &FAST,
            EncryptionAlgorithm::ChaCha20Poly1305,
        )
        .unwrap()
    }

    #[test]
    fn test_correct_pin_reveals() {
        let mut harness = Harness::new(encrypted_wallet());
        match harness.run(" 1234 ") {
            AttemptOutcome::Revealed(seed) => assert_eq!(seed.as_phrase().as_str(), PHRASE),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(harness.workflow.state(), UnlockState::Revealed);
        assert!(matches!(harness.workflow.attempt("1234"), AttemptStart::Ignored));
    }

    #[test]
    fn test_wrong_pin_counts_and_returns_to_idle() {
        let mut harness = Harness::new(encrypted_wallet());
        match harness.run("0000") {
            AttemptOutcome::WrongPassword(message) => assert_eq!(message, "2 attempts remaining"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(harness.workflow.state(), UnlockState::Idle);
        assert_eq!(harness.retry.state().consecutive_failures, 1);
    }

    #[test]
    fn test_refusals_map_to_user_outcomes() {
        let locked = AttemptOutcome::refused(Error::LockedOut("locked for 5 minutes".to_string()));
        assert!(matches!(locked, AttemptOutcome::Locked(ref m) if m == "locked for 5 minutes"));

        let failed = AttemptOutcome::refused(Error::DerivationFailed("out of memory".to_string()));
        assert_eq!(
            failed.message(),
            Some("Unable to check the PIN right now. Please try again.")
        );
    }

    #[test]
    fn test_locked_wallet_rejected_without_derivation() {
        let mut harness = Harness::new(encrypted_wallet());
        for _ in 0..3 {
            harness.retry.failed_attempt().unwrap();
        }

        match harness.workflow.attempt("1234") {
            AttemptStart::Rejected(AttemptOutcome::Locked(message)) => {
                assert_eq!(message, "0 attempts remaining, locked for 1 minute")
            }
            other => panic!("unexpected start: {:?}", other),
        }
        assert_eq!(harness.workflow.state(), UnlockState::RejectedLocked);
        assert!(harness.completions.try_recv().is_err());
        assert_eq!(harness.retry.state().consecutive_failures, 3);

        // Repeated rejection does not count either.
        assert!(matches!(
            harness.workflow.attempt("1234"),
            AttemptStart::Rejected(AttemptOutcome::Locked(_))
        ));
        assert_eq!(harness.retry.state().consecutive_failures, 3);
    }

    #[test]
    fn test_lock_rechecked_after_derivation() {
        let mut harness = Harness::new(encrypted_wallet());
        assert!(matches!(harness.workflow.attempt("1234"), AttemptStart::Started(_)));
        let completion = harness.next_completion();

        for _ in 0..3 {
            harness.retry.failed_attempt().unwrap();
        }
        let outcome = harness.workflow.on_completion(completion).unwrap();
        assert!(matches!(outcome, Some(AttemptOutcome::Locked(_))));
        assert_eq!(harness.workflow.state(), UnlockState::RejectedLocked);
    }

    #[test]
    fn test_attempt_while_in_flight_is_ignored() {
        let mut harness = Harness::new(encrypted_wallet());
        let first = harness.workflow.attempt("1234");
        assert!(matches!(first, AttemptStart::Started(_)));
        assert!(matches!(harness.workflow.attempt("1234"), AttemptStart::Ignored));
    }

    #[test]
    fn test_completions_after_end_are_discarded() {
        let mut harness = Harness::new(encrypted_wallet());
        assert!(matches!(harness.workflow.attempt("0000"), AttemptStart::Started(_)));
        let completion = harness.next_completion();

        harness.liveness.end();
        assert!(harness.workflow.on_completion(completion).unwrap().is_none());
        assert_eq!(harness.retry.state().consecutive_failures, 0);
        assert!(matches!(harness.workflow.attempt("1234"), AttemptStart::Ignored));
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let mut harness = Harness::new(encrypted_wallet());
        let stale = Completion::KeyDerived {
            attempt: AttemptId(99),
            result: Err(Error::DerivationFailed("late".to_string())),
        };
        assert!(harness.workflow.on_completion(stale).unwrap().is_none());
        assert_eq!(harness.workflow.state(), UnlockState::Idle);
    }

    #[test]
    fn test_unencrypted_wallet_reveals_on_start() {
        let mut harness = Harness::new(SoftwareWallet::unencrypted(
            "wallet_123",
            Seed::from_phrase(PHRASE),
        ));
        assert!(!harness.workflow.is_encrypted());
        assert!(matches!(
            harness.workflow.start().unwrap(),
            Some(AttemptOutcome::Revealed(_))
        ));
        assert!(matches!(harness.workflow.attempt("1234"), AttemptStart::Ignored));
        assert!(harness.completions.try_recv().is_err());
    }

    #[test]
    fn test_encrypted_wallet_without_key_chain_is_defect() {
        let retry = Arc::new(
            PinRetryController::open(
                "wallet_123",
                LockoutSchedule::default(),
                Arc::new(MemoryRetryStore::new()),
                Arc::new(ManualClock::default()),
            )
            .unwrap(),
        );
        let worker = Arc::new(BackgroundWorker::spawn("workflow-test").unwrap());
        let result = SeedUnlockWorkflow::new(
            Arc::new(SoftwareWallet::without_key_chain("wallet_123", true)),
            retry,
            Some((worker, FAST)),
            Arc::new(|_: Completion| {}),
            SessionLiveness::new(uuid::Uuid::new_v4()),
        );
        assert!(matches!(result, Err(Error::Wallet(_))));
    }
}
