//! Release artifact sealing.
//!
//! Artifacts are sealed with ChaCha20-Poly1305 under a 32-byte key shared
//! out of band between the publisher and each installation. The AEAD tag
//! makes a wrong key or a corrupted download fail deterministically instead
//! of producing garbage.
//!
//! Sealed layout: `magic(4) || nonce(12) || ciphertext+tag`. The magic is
//! bound as associated data.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Symmetric key length in bytes.
pub const ARTIFACT_KEY_LEN: usize = 32;

/// Format marker at the start of every sealed artifact.
pub const ARTIFACT_MAGIC: &[u8; 4] = b"SKF1";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = ARTIFACT_MAGIC.len() + NONCE_LEN;

/// Pre-shared key used to seal and open release artifacts.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ArtifactKey {
    bytes: [u8; ARTIFACT_KEY_LEN],
}

impl ArtifactKey {
    /// Generate a fresh key from the operating system RNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; ARTIFACT_KEY_LEN];
        getrandom::getrandom(&mut bytes).map_err(|_| CryptoError::RngError)?;
        Ok(Self { bytes })
    }

    /// Build a key from raw bytes, e.g. the contents of `encryption_key.bin`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; ARTIFACT_KEY_LEN] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: ARTIFACT_KEY_LEN,
                got: bytes.len(),
            })?;
        Ok(Self { bytes })
    }

    /// Raw key bytes, for persisting.
    pub fn as_bytes(&self) -> &[u8; ARTIFACT_KEY_LEN] {
        &self.bytes
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.bytes))
    }

    /// Seal a plaintext archive under a random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::RngError)?;

        let ct = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: ARTIFACT_MAGIC,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(HEADER_LEN + ct.len());
        out.extend_from_slice(ARTIFACT_MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Open a sealed artifact.
    ///
    /// Fails with [`CryptoError::DecryptionFailed`] for a wrong key or any
    /// modification of the sealed bytes. Nothing is returned on failure.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < HEADER_LEN + TAG_LEN {
            return Err(CryptoError::MalformedArtifact("too short"));
        }
        let (magic, rest) = sealed.split_at(ARTIFACT_MAGIC.len());
        if magic != ARTIFACT_MAGIC {
            return Err(CryptoError::MalformedArtifact("wrong magic bytes"));
        }
        let (nonce, ct) = rest.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ct,
                    aad: ARTIFACT_MAGIC,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ArtifactKey(..)")
    }
}
