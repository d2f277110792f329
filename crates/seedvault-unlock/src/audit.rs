//! Unlock session audit trail
//!
//! Structured record of what happened in one session. Events carry wallet
//! and attempt identifiers and user-facing hints only: never PINs, keys or
//! seed words.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Audited session event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UnlockAuditEvent {
    /// Session opened
    SessionStarted {
        /// Wallet being unlocked
        wallet_id: String,
        /// Whether a PIN is required
        encrypted: bool,
        /// Whether the wallet is mid-upgrade
        upgrading: bool,
        /// Event time
        timestamp: DateTime<Utc>,
    },
    /// PIN accepted for checking
    AttemptStarted {
        /// Attempt sequence number
        attempt: u64,
        /// Event time
        timestamp: DateTime<Utc>,
    },
    /// PIN refused by the lockout
    AttemptLocked {
        /// Hint shown to the user
        message: String,
        /// Event time
        timestamp: DateTime<Utc>,
    },
    /// PIN did not decrypt the seed
    WrongPin {
        /// Hint shown to the user
        message: String,
        /// Event time
        timestamp: DateTime<Utc>,
    },
    /// Key derivation failed
    DerivationFailed {
        /// Failure description
        reason: String,
        /// Event time
        timestamp: DateTime<Utc>,
    },
    /// Seed shown
    SeedRevealed {
        /// Number of words revealed
        word_count: usize,
        /// Event time
        timestamp: DateTime<Utc>,
    },
    /// User confirmed the seed is written down
    ReminderDisarmed {
        /// Event time
        timestamp: DateTime<Utc>,
    },
    /// Session torn down
    SessionEnded {
        /// Whether the seed had been revealed
        revealed: bool,
        /// Event time
        timestamp: DateTime<Utc>,
    },
}

/// Audit log of one unlock session
#[derive(Debug, Clone)]
pub struct UnlockAuditLog {
    session_id: String,
    events: Vec<UnlockAuditEvent>,
}

impl UnlockAuditLog {
    /// Empty log for `session_id`
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            events: Vec::new(),
        }
    }

    /// Session this log belongs to
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Log session opened
    pub fn log_session_started(&mut self, wallet_id: &str, encrypted: bool, upgrading: bool) {
        info!(
            event = "unlock_session_started",
            session_id = %self.session_id,
            wallet_id = %wallet_id,
            encrypted,
            upgrading,
            "Unlock session started"
        );
        self.events.push(UnlockAuditEvent::SessionStarted {
            wallet_id: wallet_id.to_string(),
            encrypted,
            upgrading,
            timestamp: Utc::now(),
        });
    }

    /// Log attempt started
    pub fn log_attempt_started(&mut self, attempt: u64) {
        debug!(
            event = "unlock_attempt_started",
            session_id = %self.session_id,
            attempt,
            "PIN attempt started"
        );
        self.events.push(UnlockAuditEvent::AttemptStarted {
            attempt,
            timestamp: Utc::now(),
        });
    }

    /// Log lockout refusal
    pub fn log_attempt_locked(&mut self, message: &str) {
        warn!(
            event = "unlock_attempt_locked",
            session_id = %self.session_id,
            message = %message,
            "PIN attempt refused by lockout"
        );
        self.events.push(UnlockAuditEvent::AttemptLocked {
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Log wrong PIN
    pub fn log_wrong_pin(&mut self, message: &str) {
        warn!(
            event = "unlock_wrong_pin",
            session_id = %self.session_id,
            message = %message,
            "Wrong PIN"
        );
        self.events.push(UnlockAuditEvent::WrongPin {
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Log derivation failure
    pub fn log_derivation_failed(&mut self, reason: &str) {
        warn!(
            event = "unlock_derivation_failed",
            session_id = %self.session_id,
            reason = %reason,
            "Key derivation failed"
        );
        self.events.push(UnlockAuditEvent::DerivationFailed {
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Log seed revealed
    pub fn log_seed_revealed(&mut self, word_count: usize) {
        info!(
            event = "unlock_seed_revealed",
            session_id = %self.session_id,
            word_count,
            "Seed revealed"
        );
        self.events.push(UnlockAuditEvent::SeedRevealed {
            word_count,
            timestamp: Utc::now(),
        });
    }

    /// Log backup reminder disarmed
    pub fn log_reminder_disarmed(&mut self) {
        info!(
            event = "unlock_reminder_disarmed",
            session_id = %self.session_id,
            "Backup reminder disarmed"
        );
        self.events.push(UnlockAuditEvent::ReminderDisarmed {
            timestamp: Utc::now(),
        });
    }

    /// Log session ended
    pub fn log_session_ended(&mut self, revealed: bool) {
        info!(
            event = "unlock_session_ended",
            session_id = %self.session_id,
            revealed,
            "Unlock session ended"
        );
        self.events.push(UnlockAuditEvent::SessionEnded {
            revealed,
            timestamp: Utc::now(),
        });
    }

    /// All events in order
    pub fn get_events(&self) -> &[UnlockAuditEvent] {
        &self.events
    }

    /// Events as a JSON document
    pub fn export_events(&self) -> seedvault_core::Result<String> {
        let export = serde_json::json!({
            "session_id": self.session_id,
            "events": self.events,
        });
        Ok(serde_json::to_string_pretty(&export)?)
    }
}
