//! Seed unlock workflow
//!
//! Reveals a wallet's recovery phrase after checking the user's PIN:
//!
//! - **Lockout first**: a locked wallet refuses attempts without deriving a key
//! - **Off-thread crypto**: key derivation and decryption run on a per-session worker
//! - **Inbox model**: background results are applied only when the owner polls
//! - **Guaranteed teardown**: ending or dropping a session discards late results
//!
//! ```no_run
//! # async fn demo(
//! #     wallet: std::sync::Arc<dyn seedvault_core::Wallet>,
//! #     retry: std::sync::Arc<seedvault_core::PinRetryController>,
//! #     configuration: std::sync::Arc<dyn seedvault_core::Configuration>,
//! # ) -> seedvault_core::Result<()> {
//! use seedvault_unlock::{AttemptOutcome, SessionOptions, UnlockSession};
//!
//! let options = SessionOptions::default();
//! let mut session = UnlockSession::start(wallet, retry, configuration, options)?;
//! match session.submit("1234").await? {
//!     Some(AttemptOutcome::Revealed(seed)) => println!("{} words", seed.word_count()),
//!     Some(other) => println!("{:?}", other.message()),
//!     None => {}
//! }
//! session.end();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod derivation;
pub mod liveness;
pub mod logging;
pub mod session;
pub mod worker;
pub mod workflow;

pub use audit::{UnlockAuditEvent, UnlockAuditLog};
pub use derivation::KeyDerivationService;
pub use liveness::SessionLiveness;
pub use logging::init_unlock_logging;
pub use session::{SessionConfig, SessionEvent, SessionOptions, UnlockSession, UnlockView};
pub use worker::BackgroundWorker;
pub use workflow::{
    AttemptId, AttemptOutcome, AttemptStart, Completion, CompletionSink, SeedUnlockWorkflow,
    UnlockState,
};
