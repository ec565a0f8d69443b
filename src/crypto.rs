//! Password-derived symmetric encryption of host-memory payloads (C1).
//!
//! A single password derives a 256-bit AES-GCM key via Argon2id over a
//! fixed per-install salt. The key lives in RAM only while unlocked;
//! optionally the raw password is handed off to the OS credential store
//! (keychain / Credential Manager / libsecret via the `keyring` crate) so
//! the next launch can auto-unlock.
//!
//! Ciphertext wire format: `ENC:v1:` followed by base64 of
//! `nonce(12) || AEAD ciphertext || tag(16)`. The literal prefix is the
//! sole discriminator used by [`Crypto::is_encrypted`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use zeroize::Zeroizing;

use crate::atomic::write_atomic;
use crate::error::KnowledgeError;

const ENC_PREFIX: &str = "ENC:v1:";
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const VERIFY_PLAINTEXT: &[u8] = b"knowledge-core-verify-v1";

const KEYCHAIN_SERVICE: &str = "com.parallax-labs.knowledge-core";
const KEYCHAIN_ACCOUNT: &str = "host-memory-password";

/// Password-derived AEAD wrapper over host-memory payloads.
pub struct Crypto {
    salt_path: PathBuf,
    verify_path: PathBuf,
    persist_to_keychain: bool,
    key: RwLock<Option<Zeroizing<[u8; 32]>>>,
}

impl Crypto {
    /// Construct a `Crypto` rooted at `data_root` (holding `.salt`/`.password`).
    /// Does not touch disk or the keychain until a method is called.
    pub fn new(data_root: impl AsRef<Path>, persist_to_keychain: bool) -> Self {
        let data_root = data_root.as_ref();
        Self {
            salt_path: data_root.join(".salt"),
            verify_path: data_root.join(".password"),
            persist_to_keychain,
            key: RwLock::new(None),
        }
    }

    /// Whether a password has ever been set (the verification file exists).
    pub fn has_password(&self) -> bool {
        self.verify_path.exists()
    }

    /// Whether the key is currently absent from RAM.
    pub fn is_locked(&self) -> bool {
        self.key.read().unwrap().is_none()
    }

    /// Set the password for the first time, or reset it outright (callers
    /// that want an atomic re-key of existing ciphertext should use
    /// [`Crypto::change_password`] instead).
    pub fn set_password(&self, password: &str) -> Result<()> {
        let salt = self.load_or_create_salt()?;
        let key = derive_key(password, &salt)?;
        self.write_verify_file(&key)?;
        if self.persist_to_keychain {
            self.store_in_keychain(password)?;
        }
        *self.key.write().unwrap() = Some(key);
        Ok(())
    }

    /// Derive the key from `password` against the existing salt and, if it
    /// decrypts the verification file successfully, unlock (load into RAM).
    pub fn unlock(&self, password: &str) -> Result<()> {
        if !self.verify_password(password)? {
            return Err(anyhow::Error::new(KnowledgeError::CryptoError(
                "wrong password".to_string(),
            )));
        }
        let salt = self.load_salt()?;
        let key = derive_key(password, &salt)?;
        *self.key.write().unwrap() = Some(key);
        Ok(())
    }

    /// Drop the key from RAM without touching anything on disk.
    pub fn lock(&self) {
        *self.key.write().unwrap() = None;
    }

    /// Check a candidate password against the verification file without
    /// mutating lock state.
    pub fn verify_password(&self, password: &str) -> Result<bool> {
        if !self.has_password() {
            return Ok(false);
        }
        let salt = self.load_salt()?;
        let key = derive_key(password, &salt)?;
        let stored = std::fs::read_to_string(&self.verify_path)
            .with_context(|| format!("reading {}", self.verify_path.display()))?;
        match decrypt_with_key(&key, &stored) {
            Ok(plaintext) => Ok(plaintext.as_bytes() == VERIFY_PLAINTEXT),
            Err(_) => Ok(false),
        }
    }

    /// Encrypt `plaintext` with the current RAM key.
    ///
    /// # Errors
    /// Returns [`KnowledgeError::CryptoError`] if locked.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let guard = self.key.read().unwrap();
        let key = guard.as_ref().ok_or_else(|| {
            anyhow::Error::new(KnowledgeError::CryptoError("locked".to_string()))
        })?;
        encrypt_with_key(key, plaintext)
    }

    /// Decrypt `ciphertext` with the current RAM key.
    ///
    /// Callers on the search path (§7) should fall back to leaving the
    /// ciphertext in place on error rather than propagating this.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let guard = self.key.read().unwrap();
        let key = guard.as_ref().ok_or_else(|| {
            anyhow::Error::new(KnowledgeError::CryptoError("locked".to_string()))
        })?;
        decrypt_with_key(key, ciphertext)
    }

    /// True iff `data` is recognizable ciphertext produced by [`Crypto::encrypt`].
    pub fn is_encrypted(data: &str) -> bool {
        data.starts_with(ENC_PREFIX)
    }

    /// Atomically change the password, re-encrypting every blob in `blobs`
    /// with the new key. On any decrypt/encrypt failure, nothing is
    /// committed: the verification file and RAM key are untouched and the
    /// caller's stores remain keyed to the old password.
    ///
    /// Returns the re-encrypted ciphertexts in the same order as `blobs`;
    /// the caller (KnowledgeCore) is responsible for writing them back into
    /// the DocumentIndex/VectorStore/BM25 records it owns.
    pub fn change_password(&self, old: &str, new: &str, blobs: &[String]) -> Result<Vec<String>> {
        if !self.verify_password(old)? {
            return Err(anyhow::Error::new(KnowledgeError::CryptoError(
                "wrong old password".to_string(),
            )));
        }
        let salt = self.load_salt()?;
        let old_key = derive_key(old, &salt)?;
        let new_key = derive_key(new, &salt)?;

        let mut staged = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let plaintext = decrypt_with_key(&old_key, blob)
                .with_context(|| "decrypting existing blob during change_password")?;
            staged.push(encrypt_with_key(&new_key, &plaintext)?);
        }

        // Only now commit: overwrite the verification file and swap the RAM key.
        self.write_verify_file(&new_key)?;
        if self.persist_to_keychain {
            self.store_in_keychain(new)?;
        }
        *self.key.write().unwrap() = Some(new_key);

        Ok(staged)
    }

    /// Attempt to decrypt every entry in `blobs`, tolerating individual
    /// failures. Returns the count of successes and the per-blob result.
    pub fn decrypt_all(&self, blobs: &[String]) -> (usize, Vec<Result<String>>) {
        let results: Vec<Result<String>> = blobs.iter().map(|b| self.decrypt(b)).collect();
        let count = results.iter().filter(|r| r.is_ok()).count();
        (count, results)
    }

    /// Remove the password entirely. Callers must have already run
    /// [`Crypto::decrypt_all`] successfully and rewritten the plaintext —
    /// this method only tears down the key material and sentinel files.
    pub fn clear_password(&self) -> Result<()> {
        if self.verify_path.exists() {
            std::fs::remove_file(&self.verify_path)
                .with_context(|| format!("removing {}", self.verify_path.display()))?;
        }
        if self.persist_to_keychain {
            if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT) {
                let _ = entry.delete_credential();
            }
        }
        self.lock();
        Ok(())
    }

    /// Try to auto-unlock using a password previously persisted to the OS
    /// credential store. Returns `false` if no entry exists or it fails.
    pub fn try_auto_unlock(&self) -> bool {
        if !self.persist_to_keychain {
            return false;
        }
        let entry = match keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT) {
            Ok(e) => e,
            Err(_) => return false,
        };
        match entry.get_password() {
            Ok(password) => self.unlock(&password).is_ok(),
            Err(_) => false,
        }
    }

    fn store_in_keychain(&self, password: &str) -> Result<()> {
        let entry = keyring::Entry::new(KEYCHAIN_SERVICE, KEYCHAIN_ACCOUNT)
            .context("initializing OS keychain entry")?;
        entry
            .set_password(password)
            .context("storing password in OS keychain")?;
        Ok(())
    }

    fn load_or_create_salt(&self) -> Result<[u8; SALT_LEN]> {
        if self.salt_path.exists() {
            return self.load_salt();
        }
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        write_atomic(&self.salt_path, &salt)?;
        Ok(salt)
    }

    fn load_salt(&self) -> Result<[u8; SALT_LEN]> {
        let bytes = std::fs::read(&self.salt_path)
            .with_context(|| format!("reading {}", self.salt_path.display()))?;
        if bytes.len() != SALT_LEN {
            anyhow::bail!("corrupt salt file: expected {SALT_LEN} bytes, found {}", bytes.len());
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes);
        Ok(salt)
    }

    fn write_verify_file(&self, key: &Zeroizing<[u8; 32]>) -> Result<()> {
        let ciphertext = encrypt_with_key(key, std::str::from_utf8(VERIFY_PLAINTEXT).unwrap())?;
        write_atomic(&self.verify_path, ciphertext.as_bytes())
    }
}

fn derive_key(password: &str, salt: &[u8; SALT_LEN]) -> Result<Zeroizing<[u8; 32]>> {
    let mut out = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, out.as_mut())
        .map_err(|e| anyhow::Error::new(KnowledgeError::CryptoError(format!("argon2: {e}"))))?;
    Ok(out)
}

fn encrypt_with_key(key: &Zeroizing<[u8; 32]>, plaintext: &str) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ct = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| anyhow::Error::new(KnowledgeError::CryptoError(format!("encrypt: {e}"))))?;

    let mut payload = Vec::with_capacity(NONCE_LEN + ct.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ct);

    Ok(format!("{ENC_PREFIX}{}", BASE64.encode(payload)))
}

fn decrypt_with_key(key: &Zeroizing<[u8; 32]>, ciphertext: &str) -> Result<String> {
    let body = ciphertext.strip_prefix(ENC_PREFIX).ok_or_else(|| {
        anyhow::Error::new(KnowledgeError::CryptoError(
            "missing ENC:v1: prefix".to_string(),
        ))
    })?;
    let payload = BASE64
        .decode(body)
        .map_err(|e| anyhow::Error::new(KnowledgeError::CryptoError(format!("base64: {e}"))))?;
    if payload.len() < NONCE_LEN {
        return Err(anyhow::Error::new(KnowledgeError::CryptoError(
            "ciphertext too short".to_string(),
        )));
    }
    let (nonce_bytes, ct) = payload.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ct)
        .map_err(|e| anyhow::Error::new(KnowledgeError::CryptoError(format!("decrypt: {e}"))))?;
    String::from_utf8(plaintext)
        .map_err(|e| anyhow::Error::new(KnowledgeError::CryptoError(format!("utf8: {e}"))))
}
