//! Crypto module for end-to-end payload encryption
//!
//! Uses AES-256-GCM with PBKDF2-HMAC-SHA256 key derivation so the server only
//! ever stores ciphertext. Two wire forms are produced:
//! - Text envelope: `enc:v1:<iv_b64>:<tag_b64>:<ciphertext_b64>`
//! - Binary envelope: `"CTXE" | 0x01 | iv(12) | tag(16) | ciphertext`
//!
//! Blind indexes (HMAC-SHA256) are derived from a separate key so that the
//! index key and the payload key never coincide for the same passphrase.
//!
//! Decryption never tells a wrong passphrase apart from a corrupted envelope:
//! both come back as `None`.

use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::hmac;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;
use zeroize::Zeroize;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Fixed salt for payload keys (shared with the dashboard decryptor)
pub const PAYLOAD_SALT: &[u8] = b"contexter-e2e-v1";

/// Fixed salt for blind-index keys
pub const INDEX_SALT: &[u8] = b"contexter-search-index-v1";

pub const ENCRYPTED_PREFIX: &str = "enc:v1:";
pub const BUFFER_MAGIC: &[u8; 4] = b"CTXE";
pub const BUFFER_VERSION: u8 = 0x01;

const BUFFER_HEADER_LEN: usize = BUFFER_MAGIC.len() + 1 + IV_LEN + TAG_LEN;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption passphrase is not configured")]
    MissingPassphrase,

    #[error("Invalid key derivation parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to generate random IV")]
    Rng,

    #[error("Encryption failed")]
    Seal,

    #[error("Unable to decrypt value")]
    Undecryptable,
}

impl CryptoError {
    /// Configuration problems fail fast and are never retried
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingPassphrase | Self::InvalidParameters(_))
    }
}

// ============================================================================
// Key Derivation
// ============================================================================

/// Wrapper for derived key material that zeroizes on drop
struct SecureKey([u8; KEY_LEN]);

impl Drop for SecureKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl AsRef<[u8]> for SecureKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Derive key material with PBKDF2-HMAC-SHA256
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::MissingPassphrase);
    }
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| CryptoError::InvalidParameters("iterations must be non-zero".to_string()))?;
    if length == 0 {
        return Err(CryptoError::InvalidParameters("key length must be non-zero".to_string()));
    }

    let mut out = vec![0u8; length];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        passphrase.as_bytes(),
        &mut out,
    );
    Ok(out)
}

fn derive_secure_key(passphrase: &str, salt: &[u8]) -> Result<SecureKey, CryptoError> {
    let mut derived = derive_key(passphrase, salt, PBKDF2_ITERATIONS, KEY_LEN)?;
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&derived);
    derived.zeroize();
    Ok(SecureKey(key))
}

// ============================================================================
// Encryption Service
// ============================================================================

/// Encryption context bound to one passphrase.
///
/// Key derivation is deliberately slow, so callers encrypting many fields
/// (a backfill batch, a contact snapshot) build one service and reuse it.
pub struct EncryptionService {
    payload_key: SecureKey,
    index_key: SecureKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService").finish_non_exhaustive()
    }
}

impl EncryptionService {
    /// Derive payload and index keys for `passphrase`
    pub fn new(passphrase: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            payload_key: derive_secure_key(passphrase, PAYLOAD_SALT)?,
            index_key: derive_secure_key(passphrase, INDEX_SALT)?,
            rng: SystemRandom::new(),
        })
    }

    fn cipher(&self) -> Result<LessSafeKey, CryptoError> {
        let unbound = UnboundKey::new(&AES_256_GCM, self.payload_key.as_ref())
            .map_err(|_| CryptoError::Seal)?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Encrypt raw bytes, returning (iv, tag, ciphertext)
    fn seal(&self, plaintext: &[u8]) -> Result<([u8; IV_LEN], [u8; TAG_LEN], Vec<u8>), CryptoError> {
        let mut iv = [0u8; IV_LEN];
        self.rng.fill(&mut iv).map_err(|_| CryptoError::Rng)?;

        let key = self.cipher()?;
        let mut in_out = plaintext.to_vec();
        let tag = key
            .seal_in_place_separate_tag(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Seal)?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_ref());
        Ok((iv, tag_bytes, in_out))
    }

    /// Verify and decrypt. Any failure (bad lengths, tag mismatch) is opaque.
    fn open(&self, iv: &[u8], tag: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if tag.len() != TAG_LEN {
            return Err(CryptoError::Undecryptable);
        }
        let nonce = Nonce::try_assume_unique_for_key(iv).map_err(|_| CryptoError::Undecryptable)?;

        let key = self.cipher()?;
        let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Undecryptable)?;
        Ok(plaintext.to_vec())
    }

    fn seal_envelope(&self, data: &[u8]) -> Result<String, CryptoError> {
        let (iv, tag, ciphertext) = self.seal(data)?;
        Ok(format!(
            "{}{}:{}:{}",
            ENCRYPTED_PREFIX,
            encode_base64(&iv),
            encode_base64(&tag),
            encode_base64(&ciphertext)
        ))
    }

    /// Parse and open a text envelope. Caller has already checked the prefix.
    fn open_envelope(&self, body: &str) -> Option<Vec<u8>> {
        let parts: Vec<&str> = body.split(':').collect();
        if parts.len() != 3 {
            return None;
        }

        let iv = decode_base64(parts[0]).ok()?;
        let tag = decode_base64(parts[1]).ok()?;
        let ciphertext = decode_base64(parts[2]).ok()?;

        self.open(&iv, &tag, &ciphertext).ok()
    }

    /// Encrypt text into the `enc:v1:` envelope. Empty text passes through.
    pub fn encrypt_text(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        self.seal_envelope(plaintext.as_bytes())
    }

    /// Decrypt a text envelope.
    ///
    /// Strings without the `enc:v1:` prefix are returned unchanged. Malformed
    /// envelopes and authentication failures both yield `None`.
    pub fn decrypt_text(&self, envelope: &str) -> Option<String> {
        let Some(body) = envelope.strip_prefix(ENCRYPTED_PREFIX) else {
            return Some(envelope.to_string());
        };
        let plaintext = self.open_envelope(body)?;
        String::from_utf8(plaintext).ok()
    }

    /// Encrypt binary data into the text envelope (for JSON transport)
    pub fn encrypt_bytes_to_string(&self, data: &[u8]) -> Result<String, CryptoError> {
        if data.is_empty() {
            return Ok(String::new());
        }
        self.seal_envelope(data)
    }

    /// Inverse of [`encrypt_bytes_to_string`](Self::encrypt_bytes_to_string).
    /// Non-envelope input is treated as plain base64.
    pub fn decrypt_string_to_bytes(&self, envelope: &str) -> Option<Vec<u8>> {
        match envelope.strip_prefix(ENCRYPTED_PREFIX) {
            Some(body) => self.open_envelope(body),
            None => decode_base64(envelope).ok(),
        }
    }

    /// Encrypt into the binary `CTXE` frame. Empty input passes through.
    pub fn encrypt_buffer(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let (iv, tag, ciphertext) = self.seal(data)?;
        let mut framed = Vec::with_capacity(BUFFER_HEADER_LEN + ciphertext.len());
        framed.extend_from_slice(BUFFER_MAGIC);
        framed.push(BUFFER_VERSION);
        framed.extend_from_slice(&iv);
        framed.extend_from_slice(&tag);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    /// Decrypt a binary `CTXE` frame.
    ///
    /// Input without the magic is legacy plaintext and is returned unchanged.
    /// Known magic with an unknown version, a truncated header, or a failed
    /// tag check all yield `None`.
    pub fn decrypt_buffer(&self, data: &[u8]) -> Option<Vec<u8>> {
        if !is_encrypted_buffer(data) {
            return Some(data.to_vec());
        }

        let version = data[BUFFER_MAGIC.len()];
        if version != BUFFER_VERSION {
            log::warn!("Unknown buffer encryption version: {}", version);
            return None;
        }
        if data.len() < BUFFER_HEADER_LEN {
            return None;
        }

        let iv_start = BUFFER_MAGIC.len() + 1;
        let tag_start = iv_start + IV_LEN;
        let body_start = tag_start + TAG_LEN;

        self.open(
            &data[iv_start..tag_start],
            &data[tag_start..body_start],
            &data[body_start..],
        )
        .ok()
    }

    /// Deterministic HMAC-SHA256 blind index (hex). Empty input maps to "".
    pub fn blind_index(&self, plaintext: &str) -> String {
        if plaintext.is_empty() {
            return String::new();
        }
        let key = hmac::Key::new(hmac::HMAC_SHA256, self.index_key.as_ref());
        hex::encode(hmac::sign(&key, plaintext.as_bytes()).as_ref())
    }
}

// ============================================================================
// Passphrase-based helpers
// ============================================================================

/// Encrypt text under `passphrase`
pub fn encrypt_text(plaintext: &str, passphrase: &str) -> Result<String, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::MissingPassphrase);
    }
    if plaintext.is_empty() {
        return Ok(String::new());
    }
    EncryptionService::new(passphrase)?.encrypt_text(plaintext)
}

/// Decrypt text under `passphrase`.
///
/// Plain strings come back unchanged. An envelope with an empty passphrase
/// cannot be opened and yields `None`.
pub fn decrypt_text(envelope: &str, passphrase: &str) -> Option<String> {
    if !is_encrypted(envelope) {
        return Some(envelope.to_string());
    }
    EncryptionService::new(passphrase).ok()?.decrypt_text(envelope)
}

/// Encrypt into the binary `CTXE` frame under `passphrase`
pub fn encrypt_buffer(data: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::MissingPassphrase);
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }
    EncryptionService::new(passphrase)?.encrypt_buffer(data)
}

/// Decrypt a binary frame under `passphrase`
pub fn decrypt_buffer(data: &[u8], passphrase: &str) -> Option<Vec<u8>> {
    if !is_encrypted_buffer(data) {
        return Some(data.to_vec());
    }
    EncryptionService::new(passphrase).ok()?.decrypt_buffer(data)
}

/// Blind index of `plaintext` under `passphrase` (hex, "" for empty input)
pub fn compute_blind_index(plaintext: &str, passphrase: &str) -> String {
    if plaintext.is_empty() || passphrase.is_empty() {
        return String::new();
    }
    match EncryptionService::new(passphrase) {
        Ok(service) => service.blind_index(plaintext),
        Err(_) => String::new(),
    }
}

/// Whether `text` carries the text envelope prefix
pub fn is_encrypted(text: &str) -> bool {
    text.starts_with(ENCRYPTED_PREFIX)
}

/// Whether `data` carries the binary envelope magic
pub fn is_encrypted_buffer(data: &[u8]) -> bool {
    data.len() > BUFFER_MAGIC.len() && data.starts_with(BUFFER_MAGIC)
}

/// Encode bytes to base64 string (for transmission)
pub fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode base64 string to bytes
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data)
}

// ============================================================================
// Tests
// ============================================================================
