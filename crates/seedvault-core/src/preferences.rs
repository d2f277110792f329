//! Backup reminder preference
//!
//! The unlock session pulls the current flag and subscribes to change
//! notifications for as long as it is alive.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Preference key of the "remind me to back up the seed" flag
pub const PREFS_KEY_REMIND_BACKUP_SEED: &str = "remind_backup_seed";

/// Handle returned by [`Configuration::register_listener`]
pub type ListenerId = u64;

/// Receives preference change notifications
///
/// May be called from any thread.
pub trait PreferenceListener: Send + Sync {
    /// A preference changed
    fn on_preference_changed(&self, key: &str);
}

impl<F> PreferenceListener for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_preference_changed(&self, key: &str) {
        self(key)
    }
}

/// Application configuration consumed by the unlock session
pub trait Configuration: Send + Sync {
    /// Whether backup reminders are enabled
    fn remind_backup_seed(&self) -> bool;

    /// Stop reminding the user to back up the seed
    fn disarm_backup_seed_reminder(&self);

    /// Subscribe to preference changes
    fn register_listener(&self, listener: Arc<dyn PreferenceListener>) -> ListenerId;

    /// Unsubscribe; returns false for unknown ids
    fn unregister_listener(&self, id: ListenerId) -> bool;
}

/// Process-local configuration
pub struct InMemoryConfiguration {
    remind_backup_seed: AtomicBool,
    listeners: RwLock<HashMap<ListenerId, Arc<dyn PreferenceListener>>>,
    next_listener: AtomicU64,
}

impl InMemoryConfiguration {
    /// Create with the reminder flag set to `remind_backup_seed`
    pub fn new(remind_backup_seed: bool) -> Self {
        Self {
            remind_backup_seed: AtomicBool::new(remind_backup_seed),
            listeners: RwLock::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Change the reminder flag, notifying listeners if it changed
    pub fn set_remind_backup_seed(&self, enabled: bool) {
        let previous = self.remind_backup_seed.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            self.notify(PREFS_KEY_REMIND_BACKUP_SEED);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, key: &str) {
        // Snapshot so listeners may (un)register from inside the callback.
        let listeners: Vec<_> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener.on_preference_changed(key);
        }
    }
}

impl Default for InMemoryConfiguration {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Configuration for InMemoryConfiguration {
    fn remind_backup_seed(&self) -> bool {
        self.remind_backup_seed.load(Ordering::SeqCst)
    }

    fn disarm_backup_seed_reminder(&self) {
        tracing::info!("Backup seed reminder disarmed");
        self.set_remind_backup_seed(false);
    }

    fn register_listener(&self, listener: Arc<dyn PreferenceListener>) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(id, listener);
        id
    }

    fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }
}
