//! Password-based key derivation.
//!
//! Argon2id with a per-payload 32 byte salt. Default cost is 64 MiB, 3 passes,
//! 4 lanes; [`KdfParams::MINIMUM`] is the floor accepted from configuration.

use crate::error::{Result, ShieldError};
use argon2::{Argon2, Params};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 32;
pub const KEY_LEN: usize = 32;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64MB
pub const KDF_PARALLELISM: u32 = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl KdfParams {
    pub const MINIMUM: KdfParams = KdfParams {
        memory_cost_kib: 19456,
        time_cost: 2,
        parallelism: 1,
    };

    pub fn validate(&self) -> Result<()> {
        let min = Self::MINIMUM;
        if self.memory_cost_kib < min.memory_cost_kib
            || self.time_cost < min.time_cost
            || self.parallelism < min.parallelism
        {
            return Err(ShieldError::Config(format!(
                "kdf cost below floor (m={} KiB, t={}, p={})",
                min.memory_cost_kib, min.time_cost, min.parallelism
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost_kib: KDF_MEMORY_COST,
            time_cost: KDF_TIME_COST,
            parallelism: KDF_PARALLELISM,
        }
    }
}

/// A 256-bit symmetric key. Wiped from memory on drop.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derive a key with the default cost parameters.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<DerivedKey> {
    derive_key_with(password, salt, &KdfParams::default())
}

pub fn derive_key_with(password: &str, salt: &[u8], params: &KdfParams) -> Result<DerivedKey> {
    if password.trim().is_empty() {
        return Err(ShieldError::InvalidInput("password must not be empty".into()));
    }
    if salt.len() != SALT_LEN {
        return Err(ShieldError::InvalidInput(format!(
            "salt must be exactly {SALT_LEN} bytes, got {}",
            salt.len()
        )));
    }
    let params = Params::new(
        params.memory_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| ShieldError::InvalidInput(format!("argon2 params: {e}")))?;
    let argon = Argon2::from(params);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| ShieldError::InvalidInput(format!("argon2 derive: {e}")))?;
    Ok(DerivedKey(key))
}
