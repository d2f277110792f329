//! Wallet collaborator contract and a software reference wallet

use crate::crypto::{
    Argon2Crypter, DerivedKey, EncryptionAlgorithm, KdfCost, KeyCrypter, SeedCipher,
};
use crate::seed::{EncryptedSeedHandle, Seed};
use crate::{Error, Result};
use std::sync::Arc;

/// Wallet as seen by the unlock workflow
///
/// Implementations must be safe to call from the background worker.
pub trait Wallet: Send + Sync {
    /// Stable wallet identifier (keys the PIN retry state)
    fn wallet_id(&self) -> &str;

    /// Whether the seed is protected by a PIN
    fn is_encrypted(&self) -> bool;

    /// Encrypted seed of the active key chain
    fn encrypted_seed_handle(&self) -> Result<EncryptedSeedHandle>;

    /// Plaintext seed of an unencrypted wallet
    fn plaintext_seed(&self) -> Result<Seed>;

    /// Crypter that turns a PIN into a key for this wallet
    fn key_crypter(&self) -> Result<Arc<dyn KeyCrypter>>;

    /// Decrypt the seed; [`Error::WrongPassword`] when the key does not fit
    fn decrypt_seed(&self, handle: &EncryptedSeedHandle, key: &DerivedKey) -> Result<Seed>;
}

enum KeyChain {
    Plain(Seed),
    Encrypted {
        crypter: Arc<Argon2Crypter>,
        sealed: Vec<u8>,
    },
}

/// Wallet keeping its key chain in memory
pub struct SoftwareWallet {
    wallet_id: String,
    encrypted: bool,
    key_chain: Option<KeyChain>,
}

impl SoftwareWallet {
    /// Wallet whose seed is stored in the clear
    pub fn unencrypted(wallet_id: impl Into<String>, seed: Seed) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            encrypted: false,
            key_chain: Some(KeyChain::Plain(seed)),
        }
    }

    /// Wallet whose seed is sealed under a key derived from `pin`
    pub fn encrypted(
        wallet_id: impl Into<String>,
        seed: &Seed,
        pin: &str,
        cost: &KdfCost,
        algorithm: EncryptionAlgorithm,
    ) -> Result<Self> {
        let crypter = Argon2Crypter::generate();
        let key = crypter.derive_key(pin.as_bytes(), cost)?;
        let sealed = SeedCipher::new(algorithm).seal(&key, &seed.to_bytes())?;

        Ok(Self {
            wallet_id: wallet_id.into(),
            encrypted: true,
            key_chain: Some(KeyChain::Encrypted {
                crypter: Arc::new(crypter),
                sealed,
            }),
        })
    }

    /// Wallet without an active key chain (watching-only or corrupt)
    pub fn without_key_chain(wallet_id: impl Into<String>, encrypted: bool) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            encrypted,
            key_chain: None,
        }
    }

    fn key_chain(&self) -> Result<&KeyChain> {
        self.key_chain.as_ref().ok_or_else(|| {
            Error::Wallet(format!("Wallet {} has no active key chain", self.wallet_id))
        })
    }
}

impl Wallet for SoftwareWallet {
    fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn encrypted_seed_handle(&self) -> Result<EncryptedSeedHandle> {
        match self.key_chain()? {
            KeyChain::Encrypted { sealed, .. } => {
                Ok(EncryptedSeedHandle::new(self.wallet_id.clone(), sealed.clone()))
            }
            KeyChain::Plain(_) => Err(Error::Wallet("Seed is not encrypted".to_string())),
        }
    }

    fn plaintext_seed(&self) -> Result<Seed> {
        match self.key_chain()? {
            KeyChain::Plain(seed) => Ok(Seed::new(seed.words().to_vec())),
            KeyChain::Encrypted { .. } => Err(Error::Wallet(
                "Seed is encrypted and needs a PIN".to_string(),
            )),
        }
    }

    fn key_crypter(&self) -> Result<Arc<dyn KeyCrypter>> {
        match self.key_chain()? {
            KeyChain::Encrypted { crypter, .. } => Ok(Arc::clone(crypter) as Arc<dyn KeyCrypter>),
            KeyChain::Plain(_) => Err(Error::Wallet("Wallet has no key crypter".to_string())),
        }
    }

    fn decrypt_seed(&self, handle: &EncryptedSeedHandle, key: &DerivedKey) -> Result<Seed> {
        if handle.wallet_id() != self.wallet_id {
            return Err(Error::Wallet(format!(
                "Seed handle belongs to wallet {}",
                handle.wallet_id()
            )));
        }
        let plaintext = SeedCipher::open(key, handle.ciphertext())?;
        Seed::from_bytes(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfCost = KdfCost::new(64, 1, 1);

    fn phrase() -> Seed {
        Seed::from_phrase("abandon ability able about above absent")
    }

    #[test]
    fn test_encrypted_wallet_decrypts_with_right_pin() {
        let wallet = SoftwareWallet::encrypted(
            "wallet_123",
            &phrase(),
            "1234",
            &FAST,
            EncryptionAlgorithm::ChaCha20Poly1305,
        )
        .unwrap();
        assert!(wallet.is_encrypted());
        assert!(wallet.plaintext_seed().is_err());

        let handle = wallet.encrypted_seed_handle().unwrap();
        let key = wallet.key_crypter().unwrap().derive_key(b"1234", &FAST).unwrap();
        let seed = wallet.decrypt_seed(&handle, &key).unwrap();
        assert_eq!(seed.words(), phrase().words());
    }

    #[test]
    fn test_encrypted_wallet_rejects_wrong_pin() {
        let wallet = SoftwareWallet::encrypted(
            "wallet_123",
            &phrase(),
            "1234",
            &FAST,
            EncryptionAlgorithm::AesGcm,
        )
        .unwrap();

        let handle = wallet.encrypted_seed_handle().unwrap();
        let key = wallet.key_crypter().unwrap().derive_key(b"0000", &FAST).unwrap();
        assert!(matches!(
            wallet.decrypt_seed(&handle, &key),
            Err(Error::WrongPassword)
        ));
    }

    #[test]
    fn test_unencrypted_wallet_exposes_plaintext() {
        let wallet = SoftwareWallet::unencrypted("wallet_123", phrase());
        assert!(!wallet.is_encrypted());
        assert_eq!(wallet.plaintext_seed().unwrap().word_count(), 6);
        assert!(wallet.encrypted_seed_handle().is_err());
        assert!(wallet.key_crypter().is_err());
    }

    #[test]
    fn test_missing_key_chain_is_wallet_error() {
        let wallet = SoftwareWallet::without_key_chain("wallet_123", true);
        assert!(matches!(wallet.encrypted_seed_handle(), Err(Error::Wallet(_))));
        assert!(matches!(wallet.key_crypter(), Err(Error::Wallet(_))));
    }
}
