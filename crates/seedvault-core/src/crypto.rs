//! Key derivation and seed sealing primitives
//!
//! Argon2id turns a PIN into a 256-bit key; the key seals the seed phrase
//! with AES-256-GCM or ChaCha20-Poly1305. An authentication failure on
//! open is reported as [`Error::WrongPassword`], every other failure as
//! [`Error::Encryption`].

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, ParamsBuilder, Version};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Current sealed-seed format version
const SEALED_VERSION: u8 = 1;

/// Header: [version(1)][algorithm(1)][nonce(12)]
const HEADER_LEN: usize = 14;

/// Minimum salt length accepted by [`Argon2Crypter`]
pub const MIN_SALT_LEN: usize = 16;

/// Key derivation cost
///
/// Opaque tuning knob handed to the crypter; the unlock workflow never
/// interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCost {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Parallel lanes
    pub parallelism: u32,
}

impl KdfCost {
    /// Create a cost triple
    pub const fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Check the triple against Argon2 bounds
    pub fn validate(&self) -> Result<()> {
        self.params().map(|_| ())
    }

    fn params(&self) -> Result<argon2::Params> {
        ParamsBuilder::new()
            .m_cost(self.memory_kib)
            .t_cost(self.iterations)
            .p_cost(self.parallelism)
            .output_len(DerivedKey::LEN)
            .build()
            .map_err(|e| Error::Config(format!("Invalid KDF cost: {}", e)))
    }
}

impl Default for KdfCost {
    /// 64 MiB, 3 iterations, 4 lanes
    fn default() -> Self {
        Self::new(65536, 3, 4)
    }
}

/// 256-bit key derived from a PIN
///
/// Created per attempt and consumed by the decryption step. No `Clone`
/// and no `Debug`.
pub struct DerivedKey(Zeroizing<[u8; 32]>);

impl DerivedKey {
    /// Key length in bytes
    pub const LEN: usize = 32;

    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Password-to-key capability of a wallet
pub trait KeyCrypter: Send + Sync {
    /// Derive a key from password bytes. Expected to be slow.
    fn derive_key(&self, password: &[u8], cost: &KdfCost) -> Result<DerivedKey>;
}

/// Argon2id crypter bound to a wallet salt
#[derive(Clone)]
pub struct Argon2Crypter {
    salt: Vec<u8>,
}

impl Argon2Crypter {
    /// Create with an existing salt
    pub fn new(salt: Vec<u8>) -> Result<Self> {
        if salt.len() < MIN_SALT_LEN {
            return Err(Error::Encryption("Salt too short".to_string()));
        }
        Ok(Self { salt })
    }

    /// Create with a fresh random salt
    pub fn generate() -> Self {
        Self {
            salt: generate_salt().to_vec(),
        }
    }

    /// Salt bytes
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl KeyCrypter for Argon2Crypter {
    fn derive_key(&self, password: &[u8], cost: &KdfCost) -> Result<DerivedKey> {
        let params = cost
            .params()
            .map_err(|e| Error::DerivationFailed(e.to_string()))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(password, &self.salt, &mut *key)
            .map_err(|e| Error::DerivationFailed(e.to_string()))?;

        Ok(DerivedKey(key))
    }
}

/// AEAD algorithm for sealed seeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM
    AesGcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl EncryptionAlgorithm {
    fn tag(self) -> u8 {
        match self {
            Self::AesGcm => 0,
            Self::ChaCha20Poly1305 => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::AesGcm),
            1 => Ok(Self::ChaCha20Poly1305),
            other => Err(Error::Encryption(format!("Unknown algorithm: {}", other))),
        }
    }
}

/// Seals and opens seed phrases with a derived key
#[derive(Debug, Clone, Copy)]
pub struct SeedCipher {
    algorithm: EncryptionAlgorithm,
}

impl SeedCipher {
    /// Create cipher for an algorithm
    pub fn new(algorithm: EncryptionAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Algorithm used when sealing
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    /// Seal plaintext
    ///
    /// Format: [version(1)][algorithm(1)][nonce(12)][ciphertext(variable)]
    pub fn seal(&self, key: &DerivedKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = match self.algorithm {
            EncryptionAlgorithm::AesGcm => Aes256Gcm::new(key.as_bytes().into())
                .encrypt(Nonce::from_slice(&nonce_bytes), plaintext),
            EncryptionAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key.as_bytes().into())
                .encrypt(chacha20poly1305::Nonce::from_slice(&nonce_bytes), plaintext),
        }
        .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        sealed.push(SEALED_VERSION);
        sealed.push(self.algorithm.tag());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Open sealed bytes. The algorithm is read from the header.
    pub fn open(key: &DerivedKey, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() < HEADER_LEN {
            return Err(Error::Encryption("Invalid ciphertext length".to_string()));
        }
        if sealed[0] != SEALED_VERSION {
            return Err(Error::Encryption(format!(
                "Unsupported encryption version: {}",
                sealed[0]
            )));
        }
        let algorithm = EncryptionAlgorithm::from_tag(sealed[1])?;
        let nonce = &sealed[2..HEADER_LEN];
        let ciphertext = &sealed[HEADER_LEN..];

        // An AEAD tag mismatch is the only signal of a wrong key.
        let plaintext = match algorithm {
            EncryptionAlgorithm::AesGcm => Aes256Gcm::new(key.as_bytes().into())
                .decrypt(Nonce::from_slice(nonce), ciphertext),
            EncryptionAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new(key.as_bytes().into())
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext),
        }
        .map_err(|_| Error::WrongPassword)?;

        Ok(Zeroizing::new(plaintext))
    }
}

/// Generate secure random salt
pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    salt
}
