//! PIN to key derivation on the session worker

use crate::worker::BackgroundWorker;
use seedvault_core::{DerivedKey, Error, KdfCost, KeyCrypter, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Derives keys one at a time on a [`BackgroundWorker`]
pub struct KeyDerivationService {
    worker: Arc<BackgroundWorker>,
    crypter: Arc<dyn KeyCrypter>,
    cost: KdfCost,
    in_flight: Arc<AtomicBool>,
}

impl KeyDerivationService {
    /// Service deriving with `crypter` at `cost`
    pub fn new(worker: Arc<BackgroundWorker>, crypter: Arc<dyn KeyCrypter>, cost: KdfCost) -> Self {
        Self {
            worker,
            crypter,
            cost,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a derivation is queued or running
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Derive on the worker and hand the result to `on_complete`.
    ///
    /// `on_complete` runs exactly once, on the worker thread. Returns
    /// [`Error::InvalidState`] while another derivation is in flight and
    /// [`Error::SessionEnded`] once the worker is shut down; in both cases
    /// `on_complete` is never called.
    pub fn derive_async<F>(&self, password: Zeroizing<String>, on_complete: F) -> Result<()>
    where
        F: FnOnce(Result<DerivedKey>) + Send + 'static,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidState(
                "Key derivation already in progress".to_string(),
            ));
        }

        let crypter = Arc::clone(&self.crypter);
        let cost = self.cost;
        let in_flight = Arc::clone(&self.in_flight);

        let submitted = self.worker.execute(move || {
            debug!(
                memory_kib = cost.memory_kib,
                iterations = cost.iterations,
                "Deriving key"
            );
            let result = catch_unwind(AssertUnwindSafe(|| {
                crypter.derive_key(password.as_bytes(), &cost)
            }))
            .unwrap_or_else(|_| {
                warn!("Key derivation panicked");
                Err(Error::DerivationFailed("Key derivation panicked".to_string()))
            });
            drop(password);

            in_flight.store(false, Ordering::Release);
            on_complete(result);
        });

        if let Err(e) = submitted {
            self.in_flight.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Await a derivation
    pub async fn derive(&self, password: Zeroizing<String>) -> Result<DerivedKey> {
        let (tx, rx) = oneshot::channel();
        self.derive_async(password, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.map_err(|_| Error::SessionEnded)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    struct FixedCrypter {
        calls: AtomicUsize,
    }

    impl KeyCrypter for FixedCrypter {
        fn derive_key(&self, password: &[u8], _cost: &KdfCost) -> Result<DerivedKey> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut key = [0u8; DerivedKey::LEN];
            for (slot, byte) in key.iter_mut().zip(password) {
                *slot = *byte;
            }
            Ok(DerivedKey::from_bytes(key))
        }
    }

    struct PanickingCrypter;

    impl KeyCrypter for PanickingCrypter {
        fn derive_key(&self, _password: &[u8], _cost: &KdfCost) -> Result<DerivedKey> {
            panic!("kdf blew up");
        }
    }

    struct GatedCrypter {
        gate: parking_lot::Mutex<std_mpsc::Receiver<()>>,
    }

    impl KeyCrypter for GatedCrypter {
        fn derive_key(&self, _password: &[u8], _cost: &KdfCost) -> Result<DerivedKey> {
            let _ = self.gate.lock().recv_timeout(Duration::from_secs(5));
            Ok(DerivedKey::from_bytes([7u8; DerivedKey::LEN]))
        }
    }

    fn service(crypter: Arc<dyn KeyCrypter>) -> KeyDerivationService {
        let worker = Arc::new(BackgroundWorker::spawn("derive-test").unwrap());
        KeyDerivationService::new(worker, crypter, KdfCost::new(64, 1, 1))
    }

    #[tokio::test]
    async fn test_derive_returns_key() {
        let crypter = Arc::new(FixedCrypter {
            calls: AtomicUsize::new(0),
        });
        let service = service(crypter.clone());

        let key = service
            .derive(Zeroizing::new("1234".to_string()))
            .await
            .unwrap();
        assert_eq!(&key.as_bytes()[..4], b"1234");
        assert_eq!(crypter.calls.load(Ordering::SeqCst), 1);
        assert!(!service.is_in_flight());
    }

    #[tokio::test]
    async fn test_panic_becomes_derivation_failed() {
        let service = service(Arc::new(PanickingCrypter));
        let result = service.derive(Zeroizing::new("1234".to_string())).await;
        assert!(matches!(result, Err(Error::DerivationFailed(_))));
        assert!(!service.is_in_flight());
    }

    #[test]
    fn test_second_derivation_rejected_while_in_flight() {
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let service = service(Arc::new(GatedCrypter {
            gate: parking_lot::Mutex::new(gate_rx),
        }));
        let (done_tx, done_rx) = std_mpsc::channel();

        service
            .derive_async(Zeroizing::new("1234".to_string()), move |result| {
                done_tx.send(result.is_ok()).unwrap();
            })
            .unwrap();
        assert!(service.is_in_flight());
        assert!(matches!(
            service.derive_async(Zeroizing::new("5678".to_string()), |_| {}),
            Err(Error::InvalidState(_))
        ));

        gate_tx.send(()).unwrap();
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!service.is_in_flight());
    }

    #[test]
    fn test_shut_down_worker_rejects_and_clears_flag() {
        let worker = Arc::new(BackgroundWorker::spawn("derive-test").unwrap());
        let service = KeyDerivationService::new(
            Arc::clone(&worker),
            Arc::new(FixedCrypter {
                calls: AtomicUsize::new(0),
            }),
            KdfCost::new(64, 1, 1),
        );
        worker.shutdown();

        assert!(matches!(
            service.derive_async(Zeroizing::new("1234".to_string()), |_| {}),
            Err(Error::SessionEnded)
        ));
        assert!(!service.is_in_flight());
    }
}
