//! HostForge Vault: reversible, authenticated encryption for server and
//! service secrets at rest.
//!
//! Ciphertexts are `<b64 nonce>.<b64 ciphertext>.<b64 tag>`: an HMAC-SHA256
//! keystream XORed over the plaintext, authenticated encrypt-then-MAC with a
//! second HMAC-SHA256 key derived from the same master key. Decryption fails
//! closed: a tampered or wrongly-keyed ciphertext yields `Corrupt`, never an
//! empty secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid ciphertext format: expected <nonce>.<ciphertext>.<tag>")]
    InvalidFormat,
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("ciphertext failed authentication; secret may be tampered or wrongly keyed")]
    Corrupt,
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// A 256-bit vault master key.
#[derive(Clone)]
pub struct VaultKey {
    bytes: Vec<u8>,
}

impl VaultKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generate a new random 256-bit key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { bytes: key }
    }

    /// Encode the key to base64 for storage.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Decode a key from base64.
    pub fn from_base64(encoded: &str) -> Result<Self, VaultError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Symmetric credential vault keyed by a process-wide master key.
pub struct CredentialVault {
    enc_key: Vec<u8>,
    mac_key: Vec<u8>,
}

impl CredentialVault {
    pub fn new(key: VaultKey) -> Self {
        // Domain-separated subkeys so the keystream and the tag never share
        // an HMAC key.
        Self {
            enc_key: derive_subkey(&key.bytes, b"hostforge.vault.enc"),
            mac_key: derive_subkey(&key.bytes, b"hostforge.vault.mac"),
        }
    }

    /// Encrypt a plaintext secret. Each call uses a fresh random nonce, so
    /// equal plaintexts produce distinct ciphertexts.
    pub fn encrypt(&self, plaintext: &str) -> String {
        use base64::Engine;
        use rand::RngCore;
        let engine = base64::engine::general_purpose::STANDARD;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut ciphertext = plaintext.as_bytes().to_vec();
        self.apply_keystream(&nonce, &mut ciphertext);

        let tag = self.tag(&nonce, &ciphertext);

        format!(
            "{}.{}.{}",
            engine.encode(nonce),
            engine.encode(&ciphertext),
            engine.encode(tag)
        )
    }

    /// Decrypt a vault ciphertext. Fails with `Corrupt` if the tag does not
    /// authenticate; callers must treat that as fatal for the operation.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;

        let parts: Vec<&str> = ciphertext.trim().splitn(3, '.').collect();
        if parts.len() != 3 {
            return Err(VaultError::InvalidFormat);
        }

        let nonce = engine.decode(parts[0])?;
        let mut body = engine.decode(parts[1])?;
        let tag = engine.decode(parts[2])?;

        if nonce.len() != NONCE_LEN {
            return Err(VaultError::InvalidFormat);
        }

        let mut mac = HmacSha256::new_from_slice(&self.mac_key).expect("HMAC accepts any key length");
        mac.update(&nonce);
        mac.update(&body);
        mac.verify_slice(&tag).map_err(|_| VaultError::Corrupt)?;

        self.apply_keystream(&nonce, &mut body);
        String::from_utf8(body).map_err(|_| VaultError::Corrupt)
    }

    fn apply_keystream(&self, nonce: &[u8], buf: &mut [u8]) {
        for (block_index, chunk) in buf.chunks_mut(32).enumerate() {
            let mut mac =
                HmacSha256::new_from_slice(&self.enc_key).expect("HMAC accepts any key length");
            mac.update(nonce);
            mac.update(&(block_index as u64).to_le_bytes());
            let block = mac.finalize().into_bytes();
            for (byte, key_byte) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= key_byte;
            }
        }
    }

    fn tag(&self, nonce: &[u8], ciphertext: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.mac_key).expect("HMAC accepts any key length");
        mac.update(nonce);
        mac.update(ciphertext);
        mac.finalize().into_bytes().to_vec()
    }
}

fn derive_subkey(master: &[u8], label: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(master).expect("HMAC accepts any key length");
    mac.update(label);
    mac.finalize().into_bytes().to_vec()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
