//! Authenticated encryption of exported documents.
//!
//! ChaCha20-Poly1305 (12 byte nonce, 16 byte tag) keyed by Argon2id. Every
//! call draws a fresh salt and nonce, so encrypting the same bytes twice never
//! produces the same output.

use crate::error::{Result, ShieldError};
use crate::fsutil::write_atomic;
use crate::kdf::{derive_key_with, KdfParams, SALT_LEN};
use crate::payload::{EncryptedPayload, NONCE_LEN};
use crate::task::{run_blocking, CancelToken};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[derive(Debug, Clone, Default)]
pub struct CryptoEngine {
    kdf: KdfParams,
}

impl CryptoEngine {
    pub fn new(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    pub fn kdf_params(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn encrypt(&self, plaintext: &[u8], password: &str) -> Result<EncryptedPayload> {
        let salt = generate_salt();
        let nonce = generate_nonce();
        let key = derive_key_with(password, &salt, &self.kdf)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ShieldError::InvalidInput("plaintext too large to encrypt".into()))?;
        drop(key);
        EncryptedPayload::new(salt, nonce, ciphertext)
    }

    pub fn decrypt(&self, payload: &EncryptedPayload, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let key = derive_key_with(password, payload.salt(), &self.kdf)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(payload.nonce()), payload.ciphertext_and_tag())
            .map_err(|_| ShieldError::AuthenticationFailure)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Parse a serialized payload and decrypt it.
    pub fn decrypt_bytes(&self, bytes: &[u8], password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let payload = EncryptedPayload::from_bytes(bytes)?;
        self.decrypt(&payload, password)
    }

    pub fn encrypt_file(
        &self,
        src: &Path,
        dst: &Path,
        password: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let plaintext = Zeroizing::new(fs::read(src).map_err(|e| ShieldError::io(src, e))?);
        cancel.check()?;
        let payload = self.encrypt(&plaintext, password)?;
        cancel.check()?;
        write_atomic(dst, &payload.to_bytes(), cancel)?;
        info!(
            src = %src.display(),
            dst = %dst.display(),
            bytes = plaintext.len(),
            "file encrypted"
        );
        Ok(())
    }

    pub fn decrypt_file(
        &self,
        src: &Path,
        dst: &Path,
        password: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let bytes = fs::read(src).map_err(|e| ShieldError::io(src, e))?;
        cancel.check()?;
        let plaintext = match self.decrypt_bytes(&bytes, password) {
            Ok(p) => p,
            Err(e) => {
                warn!(src = %src.display(), error = %e, "decryption rejected");
                return Err(e);
            }
        };
        cancel.check()?;
        write_atomic(dst, &plaintext, cancel)?;
        debug!(src = %src.display(), dst = %dst.display(), "file decrypted");
        Ok(())
    }

    pub async fn encrypt_file_async(
        self: Arc<Self>,
        src: PathBuf,
        dst: PathBuf,
        password: Zeroizing<String>,
        cancel: CancelToken,
    ) -> Result<()> {
        run_blocking(move || self.encrypt_file(&src, &dst, &password, &cancel)).await
    }

    pub async fn decrypt_file_async(
        self: Arc<Self>,
        src: PathBuf,
        dst: PathBuf,
        password: Zeroizing<String>,
        cancel: CancelToken,
    ) -> Result<()> {
        run_blocking(move || self.decrypt_file(&src, &dst, &password, &cancel)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MIN_PAYLOAD_LEN;
    use crate::task::cancel_pair;
    use tempfile::tempdir;

    fn engine() -> CryptoEngine {
        CryptoEngine::new(KdfParams::MINIMUM)
    }

    #[test]
    fn roundtrip() {
        let e = engine();
        for data in [&b"x"[..], &b"Hello Milestone 1!"[..], &[0u8; 4096][..]] {
            let payload = e.encrypt(data, "pass123").unwrap();
            assert_eq!(&*e.decrypt(&payload, "pass123").unwrap(), data);
        }
    }

    #[test]
    fn wrong_password_is_authentication_failure() {
        let e = engine();
        let payload = e.encrypt(b"secret", "pass123").unwrap();
        assert!(matches!(
            e.decrypt(&payload, "nope"),
            Err(ShieldError::AuthenticationFailure)
        ));
    }

    #[test]
    fn any_flipped_bit_is_detected() {
        let e = engine();
        let bytes = e.encrypt(b"tamper evident", "pw").unwrap().to_bytes();
        // one position in each region: salt, nonce, ciphertext, tag
        for pos in [0, 31, 32, 43, 44, bytes.len() - 17, bytes.len() - 1] {
            for bit in [0u8, 7] {
                let mut corrupted = bytes.clone();
                corrupted[pos] ^= 1 << bit;
                assert!(
                    matches!(
                        e.decrypt_bytes(&corrupted, "pw"),
                        Err(ShieldError::AuthenticationFailure)
                    ),
                    "byte {pos} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn salt_and_nonce_are_never_reused() {
        let e = engine();
        let a = e.encrypt(b"same", "same").unwrap();
        let b = e.encrypt(b"same", "same").unwrap();
        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.ciphertext_and_tag(), b.ciphertext_and_tag());
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let e = engine();
        let err = e.decrypt_bytes(&[0u8; MIN_PAYLOAD_LEN - 1], "pw").unwrap_err();
        assert!(matches!(err, ShieldError::MalformedInput(_)));
    }

    #[test]
    fn empty_password_rejected_before_work() {
        assert!(matches!(
            engine().encrypt(b"data", ""),
            Err(ShieldError::InvalidInput(_))
        ));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let enc = dir.path().join("enc.bin");
        let dec = dir.path().join("dec.txt");
        fs::write(&plain, "Hello Milestone 1!").unwrap();

        let e = engine();
        e.encrypt_file(&plain, &enc, "pass123", &CancelToken::never())
            .unwrap();
        let raw = fs::read(&enc).unwrap();
        assert_eq!(raw.len(), MIN_PAYLOAD_LEN + "Hello Milestone 1!".len());

        e.decrypt_file(&enc, &dec, "pass123", &CancelToken::never())
            .unwrap();
        assert_eq!(fs::read_to_string(&dec).unwrap(), "Hello Milestone 1!");
    }

    #[test]
    fn failed_decrypt_does_not_create_output() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let enc = dir.path().join("enc.bin");
        let dec = dir.path().join("dec.txt");
        fs::write(&plain, "data").unwrap();
        let e = engine();
        e.encrypt_file(&plain, &enc, "right", &CancelToken::never())
            .unwrap();
        assert!(e
            .decrypt_file(&enc, &dec, "wrong", &CancelToken::never())
            .is_err());
        assert!(!dec.exists());
    }

    #[test]
    fn missing_source_is_file_not_found() {
        let dir = tempdir().unwrap();
        let err = engine()
            .encrypt_file(
                &dir.path().join("absent"),
                &dir.path().join("out"),
                "pw",
                &CancelToken::never(),
            )
            .unwrap_err();
        assert!(matches!(err, ShieldError::FileNotFound(_)));
    }

    #[test]
    fn cancelled_encrypt_leaves_no_output() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let enc = dir.path().join("enc.bin");
        fs::write(&plain, "data").unwrap();
        let (handle, token) = cancel_pair();
        handle.cancel();
        let err = engine()
            .encrypt_file(&plain, &enc, "pw", &token)
            .unwrap_err();
        assert!(matches!(err, ShieldError::Cancelled));
        assert!(!enc.exists());
    }

    #[tokio::test]
    async fn async_wrappers_roundtrip() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("plain.txt");
        let enc = dir.path().join("enc.bin");
        let dec = dir.path().join("dec.txt");
        fs::write(&plain, "async").unwrap();
        let e = Arc::new(engine());
        e.clone()
            .encrypt_file_async(
                plain.clone(),
                enc.clone(),
                Zeroizing::new("pw".to_string()),
                CancelToken::never(),
            )
            .await
            .unwrap();
        e.decrypt_file_async(enc, dec.clone(), Zeroizing::new("pw".to_string()), CancelToken::never())
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(dec).unwrap(), "async");
    }
}
