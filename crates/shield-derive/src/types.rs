//! Shared types: tweak contexts, derivation results and the crate error.

use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of the caller-supplied identifier.
pub const ID_LEN: usize = 32;

/// Length of the nonce derived from the master key set.
pub const NONCE_LEN: usize = 32;

/// Length of a compressed secp256k1 public key.
pub const COMPRESSED_KEY_LEN: usize = 33;

/// `OP_16` caps the key count a bare multisig script can express, and
/// standardness rules cap it further at 15.
pub const MAX_MULTISIG_KEYS: usize = 15;

/// Length of the message fed to the keyed hash: id || counter (LE) || threshold.
pub const TWEAK_MESSAGE_LEN: usize = ID_LEN + 4 + 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShieldError {
    #[error("id must be 32 bytes, got {0}")]
    InvalidIdLength(usize),

    #[error("counter {0} does not fit in 32 bits")]
    CounterOutOfRange(u64),

    #[error("threshold {0} does not fit in 8 bits")]
    ThresholdOutOfRange(u64),

    #[error("nonce must be 32 bytes, got {0}")]
    InvalidNonceLength(usize),

    #[error("invalid multisig bounds: {m} of {n}")]
    InvalidMultisig { m: usize, n: usize },

    #[error("expected {expected} keys, got {actual}")]
    KeyCountMismatch { expected: usize, actual: usize },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("push data of {0} bytes cannot be framed")]
    PushDataTooLong(usize),

    #[error("invalid witness program: {0}")]
    InvalidWitnessProgram(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("nonce does not match the master key set")]
    NonceMismatch,

    /// The tweak is zero, not below the curve order, or produced an invalid point.
    #[error("tweak is not a valid scalar for this key set")]
    TweakInvalid,

    #[error("tweak counter exhausted the 32-bit range")]
    CounterExhausted,
}

impl ShieldError {
    /// Only an invalid tweak is recovered from, by advancing the counter.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShieldError::TweakInvalid)
    }

    /// Caller errors: malformed input that retrying can never fix.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(
            self,
            ShieldError::TweakInvalid | ShieldError::CounterExhausted
        )
    }
}

/// Everything needed to recompute a tweak.
///
/// The nonce is a function of the sorted master key set, so a context can be
/// rebuilt from public data. Only the counter changes between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TweakContext {
    #[serde(with = "hex")]
    pub id: [u8; ID_LEN],
    pub counter: u32,
    pub threshold: u8,
    #[serde(with = "hex")]
    pub nonce: [u8; NONCE_LEN],
}

impl TweakContext {
    pub fn new(id: [u8; ID_LEN], counter: u32, threshold: u8, nonce: [u8; NONCE_LEN]) -> Self {
        Self {
            id,
            counter,
            threshold,
            nonce,
        }
    }

    /// Build a context from unconstrained input, e.g. values read back from disk.
    pub fn from_raw(
        id: &[u8],
        counter: u64,
        threshold: u64,
        nonce: &[u8],
    ) -> Result<Self, ShieldError> {
        let id: [u8; ID_LEN] = id
            .try_into()
            .map_err(|_| ShieldError::InvalidIdLength(id.len()))?;
        let counter =
            u32::try_from(counter).map_err(|_| ShieldError::CounterOutOfRange(counter))?;
        let threshold =
            u8::try_from(threshold).map_err(|_| ShieldError::ThresholdOutOfRange(threshold))?;
        let nonce: [u8; NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| ShieldError::InvalidNonceLength(nonce.len()))?;

        Ok(Self::new(id, counter, threshold, nonce))
    }

    /// The keyed-hash message: id || counter (little-endian) || threshold.
    pub fn message(&self) -> [u8; TWEAK_MESSAGE_LEN] {
        let mut msg = [0u8; TWEAK_MESSAGE_LEN];
        msg[..ID_LEN].copy_from_slice(&self.id);
        msg[ID_LEN..ID_LEN + 4].copy_from_slice(&self.counter.to_le_bytes());
        msg[ID_LEN + 4] = self.threshold;
        msg
    }

    /// The same context one counter further on. Never wraps.
    pub fn next(&self) -> Result<Self, ShieldError> {
        let counter = self
            .counter
            .checked_add(1)
            .ok_or(ShieldError::CounterExhausted)?;
        Ok(Self { counter, ..*self })
    }
}

/// Output of a redeem-script derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedScript {
    /// The context that produced valid keys; its counter may exceed the requested one.
    pub context: TweakContext,
    /// Tweaked keys in canonical (byte-sorted) order.
    pub derived_keys: Vec<PublicKey>,
    pub redeem_script: Vec<u8>,
}

/// Output of a full address derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub context: TweakContext,
    #[serde(with = "hex")]
    pub redeem_script: Vec<u8>,
    pub address: String,
}

/// Parse a master key; only 33-byte compressed points on the curve are accepted.
pub fn parse_master_key(bytes: &[u8]) -> Result<PublicKey, ShieldError> {
    if bytes.len() != COMPRESSED_KEY_LEN {
        return Err(ShieldError::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            COMPRESSED_KEY_LEN,
            bytes.len()
        )));
    }
    PublicKey::from_slice(bytes).map_err(|e| ShieldError::InvalidPublicKey(e.to_string()))
}

/// Parse a hex-encoded master key.
pub fn parse_master_key_hex(s: &str) -> Result<PublicKey, ShieldError> {
    let bytes = hex::decode(s.trim())
        .map_err(|e| ShieldError::InvalidPublicKey(format!("bad hex: {}", e)))?;
    parse_master_key(&bytes)
}
