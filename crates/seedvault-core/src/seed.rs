//! Seed phrase material
//!
//! The plaintext word list lives in a zeroizing buffer and never prints.

use crate::{Error, Result};
use std::fmt;
use zeroize::Zeroizing;

/// Mnemonic recovery phrase (zeroized on drop)
pub struct Seed {
    words: Zeroizing<Vec<String>>,
}

impl Seed {
    /// Create from an ordered word list
    pub fn new(words: Vec<String>) -> Self {
        Self {
            words: Zeroizing::new(words),
        }
    }

    /// Parse a whitespace separated phrase
    pub fn from_phrase(phrase: &str) -> Self {
        Self::new(phrase.split_whitespace().map(str::to_string).collect())
    }

    /// Decode the UTF-8 phrase produced by [`Seed::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let phrase = std::str::from_utf8(bytes)
            .map_err(|_| Error::Encryption("Seed plaintext is not valid UTF-8".to_string()))?;
        let seed = Self::from_phrase(phrase);
        if seed.word_count() == 0 {
            return Err(Error::Encryption("Seed plaintext is empty".to_string()));
        }
        Ok(seed)
    }

    /// Get words (read-only reference)
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Get word count
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Get words as space-separated string (for display)
    pub fn as_phrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.words.join(" "))
    }

    /// Phrase bytes for sealing
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.as_phrase().as_bytes().to_vec())
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed {{ words: <{} redacted> }}", self.words.len())
    }
}

/// Opaque reference to an encrypted seed, obtained from the wallet
#[derive(Clone)]
pub struct EncryptedSeedHandle {
    wallet_id: String,
    ciphertext: Vec<u8>,
}

impl EncryptedSeedHandle {
    /// Create a handle over sealed seed bytes
    pub fn new(wallet_id: impl Into<String>, ciphertext: Vec<u8>) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            ciphertext,
        }
    }

    /// Owning wallet
    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    /// Sealed bytes
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

impl fmt::Debug for EncryptedSeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSeedHandle")
            .field("wallet_id", &self.wallet_id)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}
