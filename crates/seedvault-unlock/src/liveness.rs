//! Liveness of one unlock session, shared with its background work.
//!
//! Every derivation or decryption job holds a clone. Jobs check it before
//! posting a completion, and the workflow checks it again before applying
//! one, so results from an ended session are dropped at both ends.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Cloneable "is this session still alive" flag, tagged with the session id.
#[derive(Clone)]
pub struct SessionLiveness {
    session_id: Uuid,
    ended: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SessionLiveness {
    /// Create a live flag for `session_id`.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            ended: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Session this flag belongs to
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns `true` until [`SessionLiveness::end`] is called.
    pub fn is_live(&self) -> bool {
        !self.ended.load(Ordering::Acquire)
    }

    /// Mark the session ended and wake any waiters. Irreversible.
    ///
    /// Returns `true` only for the call that actually ended the session, so
    /// teardown paths racing each other (explicit end and drop) can tell
    /// which one owns the cleanup.
    pub fn end(&self) -> bool {
        if self.ended.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!(session_id = %self.session_id, "Session liveness ended");
        self.notify.notify_waiters();
        true
    }

    /// Await until the session ends.
    pub async fn ended(&self) {
        // Register before checking so an end() in between still wakes us.
        let notified = self.notify.notified();
        if !self.is_live() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_end_is_visible_to_clones() {
        let id = Uuid::new_v4();
        let liveness = SessionLiveness::new(id);
        let clone = liveness.clone();
        assert!(clone.is_live());
        assert_eq!(clone.session_id(), id);

        liveness.end();
        assert!(!clone.is_live());
    }

    #[test]
    fn test_only_first_end_reports_ownership() {
        let liveness = SessionLiveness::new(Uuid::new_v4());
        let clone = liveness.clone();

        assert!(clone.end());
        assert!(!liveness.end());
        assert!(!clone.end());
        assert!(!liveness.is_live());
    }

    #[test]
    fn test_sessions_do_not_share_liveness() {
        let first = SessionLiveness::new(Uuid::new_v4());
        let second = SessionLiveness::new(Uuid::new_v4());

        first.end();
        assert!(second.is_live());
        assert_ne!(first.session_id(), second.session_id());
    }

    #[tokio::test]
    async fn test_ended_wakes_waiter() {
        let liveness = SessionLiveness::new(Uuid::new_v4());
        let waiter = liveness.clone();
        let task = tokio::spawn(async move { waiter.ended().await });

        tokio::task::yield_now().await;
        liveness.end();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter not woken")
            .unwrap();

        // Already ended: returns immediately.
        liveness.ended().await;
    }
}
