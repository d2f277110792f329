//! Unlock settings
//!
//! Loaded from JSON; every field is optional and falls back to defaults.
//!
//! ```json
//! {
//!   "kdf_cost": { "memory_kib": 65536, "iterations": 3, "parallelism": 4 },
//!   "lockout": {
//!     "free_attempts": 3,
//!     "lockout_minutes": [1, 5, 15, 60, 240],
//!     "permanent_after": 8
//!   },
//!   "worker_thread_name": "seed-unlock"
//! }
//! ```

use crate::crypto::KdfCost;
use crate::lockout::LockoutSchedule;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default name of the per-session derivation thread
pub const DEFAULT_WORKER_THREAD_NAME: &str = "seed-unlock";

/// Tunables for the unlock workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockSettings {
    /// Key derivation cost
    pub kdf_cost: KdfCost,
    /// PIN lockout escalation
    pub lockout: LockoutSchedule,
    /// Name of the background worker thread
    pub worker_thread_name: String,
}

impl Default for UnlockSettings {
    fn default() -> Self {
        Self {
            kdf_cost: KdfCost::default(),
            lockout: LockoutSchedule::default(),
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

impl UnlockSettings {
    /// Parse and validate JSON settings
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and validate a JSON settings file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Check all values
    pub fn validate(&self) -> Result<()> {
        self.kdf_cost.validate()?;
        self.lockout.validate()?;
        if self.worker_thread_name.trim().is_empty() {
            return Err(Error::Config("Worker thread name is empty".to_string()));
        }
        Ok(())
    }
}
