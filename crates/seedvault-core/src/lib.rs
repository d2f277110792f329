//! Seed vault core
//!
//! Domain types and collaborator contracts for revealing a wallet's
//! recovery phrase behind an optional PIN.
//!
//! ## Contents
//!
//! - **Seed material**: zeroizing word lists, opaque encrypted seed handles
//! - **Key derivation**: Argon2id crypter behind the [`KeyCrypter`] trait
//! - **Seed cipher**: AES-256-GCM or ChaCha20-Poly1305 sealed seeds
//! - **Retry lockout**: escalating lockout windows, permanent lock after a hard limit
//! - **PIN retry persistence**: wallet-keyed controllers with pluggable stores
//! - **Preferences**: backup-reminder flag with change listeners

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod crypto;
pub mod error;
pub mod lockout;
pub mod pin_retry;
pub mod preferences;
pub mod seed;
pub mod settings;
pub mod wallet;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{
    generate_salt, Argon2Crypter, DerivedKey, EncryptionAlgorithm, KdfCost, KeyCrypter,
    SeedCipher,
};
pub use error::{Error, ErrorCategory, Result};
pub use lockout::{
    LockedUntil, LockoutSchedule, LockoutState, RetryLockoutPolicy, MAX_LOCKOUT_MINUTES,
};
pub use pin_retry::{
    JsonFileRetryStore, MemoryRetryStore, PinRetryController, PinRetryRegistry, RetryStateStore,
};
pub use preferences::{
    Configuration, InMemoryConfiguration, ListenerId, PreferenceListener,
    PREFS_KEY_REMIND_BACKUP_SEED,
};
pub use seed::{EncryptedSeedHandle, Seed};
pub use settings::UnlockSettings;
pub use wallet::{SoftwareWallet, Wallet};
