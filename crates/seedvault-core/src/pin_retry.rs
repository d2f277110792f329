//! PIN retry controller
//!
//! Owns the lockout state of one wallet. Every operation runs its
//! read-modify-persist cycle under one lock, so sessions sharing a
//! controller observe each other's failures. Controllers are handed out by
//! [`PinRetryRegistry`], one per wallet id.

use crate::clock::Clock;
use crate::lockout::{LockoutSchedule, LockoutState, RetryLockoutPolicy};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persistence for lockout state
pub trait RetryStateStore: Send + Sync {
    /// Load state for a wallet
    fn load(&self, wallet_id: &str) -> Result<Option<LockoutState>>;

    /// Persist state for a wallet
    fn save(&self, wallet_id: &str, state: &LockoutState) -> Result<()>;

    /// Forget state for a wallet (wallet reset)
    fn clear(&self, wallet_id: &str) -> Result<()>;
}

/// In-memory store (lost on restart)
#[derive(Debug, Default)]
pub struct MemoryRetryStore {
    states: RwLock<HashMap<String, LockoutState>>,
}

impl MemoryRetryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl RetryStateStore for MemoryRetryStore {
    fn load(&self, wallet_id: &str) -> Result<Option<LockoutState>> {
        Ok(self.states.read().get(wallet_id).cloned())
    }

    fn save(&self, wallet_id: &str, state: &LockoutState) -> Result<()> {
        self.states
            .write()
            .insert(wallet_id.to_string(), state.clone());
        Ok(())
    }

    fn clear(&self, wallet_id: &str) -> Result<()> {
        self.states.write().remove(wallet_id);
        Ok(())
    }
}

/// JSON file store, one file per wallet
#[derive(Debug, Clone)]
pub struct JsonFileRetryStore {
    dir: PathBuf,
}

impl JsonFileRetryStore {
    /// Create store rooted at `dir` (created if missing)
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// File holding a wallet's state
    pub fn path_for(&self, wallet_id: &str) -> PathBuf {
        let digest = Sha256::digest(wallet_id.as_bytes());
        self.dir.join(format!("{}.lockout.json", hex::encode(digest)))
    }
}

impl RetryStateStore for JsonFileRetryStore {
    fn load(&self, wallet_id: &str) -> Result<Option<LockoutState>> {
        let path = self.path_for(wallet_id);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, wallet_id: &str, state: &LockoutState) -> Result<()> {
        let path = self.path_for(wallet_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(state)?)?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("Failed to replace {}: {}", path.display(), e)))
    }

    fn clear(&self, wallet_id: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(wallet_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lockout state of one wallet, shared by all of its unlock sessions
///
/// The store is the source of truth: every operation reloads the wallet's
/// state under the controller lock before acting, so controllers opened
/// separately over one store never overwrite each other's lockout. A state
/// whose last write failed is merged with the stored one, keeping the
/// tighter of the two.
pub struct PinRetryController {
    wallet_id: String,
    schedule: LockoutSchedule,
    inner: Mutex<ControllerState>,
    store: Arc<dyn RetryStateStore>,
    clock: Arc<dyn Clock>,
}

struct ControllerState {
    policy: RetryLockoutPolicy,
    unsaved: bool,
}

impl PinRetryController {
    /// Load the wallet's state from `store`
    pub fn open(
        wallet_id: impl Into<String>,
        schedule: LockoutSchedule,
        store: Arc<dyn RetryStateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        schedule.validate()?;
        let wallet_id = wallet_id.into();
        let state = store.load(&wallet_id)?.unwrap_or_default();

        tracing::debug!(
            wallet_id = %wallet_id,
            consecutive_failures = state.consecutive_failures,
            "PIN retry state loaded"
        );

        Ok(Self {
            wallet_id,
            inner: Mutex::new(ControllerState {
                policy: RetryLockoutPolicy::with_state(schedule.clone(), state),
                unsaved: false,
            }),
            schedule,
            store,
            clock,
        })
    }

    /// Wallet this controller guards
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    /// Whether PIN attempts are currently refused
    pub fn is_locked(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.policy.is_locked(self.clock.now())
    }

    /// Record a wrong PIN
    ///
    /// The in-memory lockout is tightened before persisting, so a failed
    /// write still refuses the next attempt.
    pub fn failed_attempt(&self) -> Result<LockoutState> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let state = inner.policy.record_failure(self.clock.now()).clone();

        tracing::warn!(
            wallet_id = %self.wallet_id,
            consecutive_failures = state.consecutive_failures,
            "Wrong PIN recorded"
        );

        self.persist(&mut inner)?;
        Ok(state)
    }

    /// Record a correct PIN
    pub fn successful_attempt(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.policy.record_success();
        self.persist(&mut inner)
    }

    /// Human-readable remaining attempts / lock time
    pub fn remaining_attempts_message(&self) -> String {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.policy.remaining_attempts_message(self.clock.now())
    }

    /// Attempts allowed before the next lockout
    pub fn attempts_remaining(&self) -> u32 {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.policy.attempts_remaining(self.clock.now())
    }

    /// Snapshot of the state
    pub fn state(&self) -> LockoutState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.policy.state().clone()
    }

    /// Clear all lockout state (wallet reset/wipe)
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.policy.record_success();
        inner.unsaved = true;
        self.store.clear(&self.wallet_id)?;
        inner.unsaved = false;
        tracing::info!(wallet_id = %self.wallet_id, "PIN retry state reset");
        Ok(())
    }

    fn refresh(&self, inner: &mut ControllerState) {
        let stored = match self.store.load(&self.wallet_id) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                tracing::error!(
                    wallet_id = %self.wallet_id,
                    error = %e,
                    "Failed to reload PIN retry state, using cached state"
                );
                return;
            }
        };
        let state = if inner.unsaved {
            tighter(inner.policy.state(), &stored)
        } else {
            stored
        };
        inner.policy = RetryLockoutPolicy::with_state(self.schedule.clone(), state);
    }

    fn persist(&self, inner: &mut ControllerState) -> Result<()> {
        match self.store.save(&self.wallet_id, inner.policy.state()) {
            Ok(()) => {
                inner.unsaved = false;
                Ok(())
            }
            Err(e) => {
                inner.unsaved = true;
                Err(e)
            }
        }
    }
}

fn tighter(a: &LockoutState, b: &LockoutState) -> LockoutState {
    LockoutState {
        consecutive_failures: a.consecutive_failures.max(b.consecutive_failures),
        locked_until: a.locked_until.max(b.locked_until),
    }
}

/// Hands out one controller per wallet
pub struct PinRetryRegistry {
    schedule: LockoutSchedule,
    store: Arc<dyn RetryStateStore>,
    clock: Arc<dyn Clock>,
    controllers: Mutex<HashMap<String, Arc<PinRetryController>>>,
}

impl PinRetryRegistry {
    /// Create registry over a store
    pub fn new(
        schedule: LockoutSchedule,
        store: Arc<dyn RetryStateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        schedule.validate()?;
        Ok(Self {
            schedule,
            store,
            clock,
            controllers: Mutex::new(HashMap::new()),
        })
    }

    /// Shared controller for a wallet, loading it on first use
    pub fn controller_for(&self, wallet_id: &str) -> Result<Arc<PinRetryController>> {
        let mut controllers = self.controllers.lock();
        if let Some(existing) = controllers.get(wallet_id) {
            return Ok(Arc::clone(existing));
        }

        let controller = Arc::new(PinRetryController::open(
            wallet_id,
            self.schedule.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
        )?);
        controllers.insert(wallet_id.to_string(), Arc::clone(&controller));
        Ok(controller)
    }
}
