//! On-disk layout of an encrypted export: `salt(32) ∥ nonce(12) ∥ ciphertext+tag`.
//!
//! There is no magic or version field; the layout is fixed and every length
//! except the trailing ciphertext is checked before use.

use crate::error::{Result, ShieldError};
use crate::kdf::SALT_LEN;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const MIN_PAYLOAD_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext_and_tag: Vec<u8>,
}

impl EncryptedPayload {
    pub fn new(
        salt: [u8; SALT_LEN],
        nonce: [u8; NONCE_LEN],
        ciphertext_and_tag: Vec<u8>,
    ) -> Result<Self> {
        if ciphertext_and_tag.len() < TAG_LEN {
            return Err(ShieldError::MalformedInput(format!(
                "ciphertext shorter than the {TAG_LEN} byte tag"
            )));
        }
        Ok(Self {
            salt,
            nonce,
            ciphertext_and_tag,
        })
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn ciphertext_and_tag(&self) -> &[u8] {
        &self.ciphertext_and_tag
    }

    /// Length of the serialized form.
    pub fn encoded_len(&self) -> usize {
        SALT_LEN + NONCE_LEN + self.ciphertext_and_tag.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext_and_tag);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < MIN_PAYLOAD_LEN {
            return Err(ShieldError::MalformedInput(format!(
                "encrypted payload is {} bytes, minimum is {MIN_PAYLOAD_LEN}",
                buf.len()
            )));
        }
        let (salt, rest) = buf.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let salt: [u8; SALT_LEN] = salt
            .try_into()
            .map_err(|_| ShieldError::MalformedInput("salt length".into()))?;
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| ShieldError::MalformedInput("nonce length".into()))?;
        Self::new(salt, nonce, ciphertext.to_vec())
    }
}
