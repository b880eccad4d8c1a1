//! Nonce and tweak derivation, and multiplicative key tweaking.
//!
//! Master keys are independent points `[x]G`. A [`TweakContext`] hashes to a
//! scalar `t`, and each derived key is `[t][x]G`. Since scalar multiplication
//! is associative this equals `[t·x]G`, so a co-signer signs with `t·x` without
//! ever revealing `x`:
//!
//! ```text
//! nonce = BLAKE2b-256(sorted(master_keys)...)
//! t     = BLAKE2b-256(id || counter_le32 || threshold, key = nonce)
//! P'    = [t]P
//! ```

use blake2b_simd::Params;
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey, VerifyOnly};

use crate::types::{ShieldError, TweakContext, NONCE_LEN};

/// Length of a tweak scalar.
pub const TWEAK_LEN: usize = 32;

/// Hash the master key set into a nonce.
///
/// Keys are sorted by their compressed encoding first, so the nonce does not
/// depend on the order the caller supplies them in. A lost tweak can therefore
/// be recomputed from the public keys alone.
pub fn derive_nonce(master_keys: &[PublicKey]) -> [u8; NONCE_LEN] {
    let mut sorted: Vec<[u8; 33]> = master_keys.iter().map(PublicKey::serialize).collect();
    sorted.sort_unstable();

    let mut state = Params::new().hash_length(NONCE_LEN).to_state();
    for key in &sorted {
        state.update(key);
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(state.finalize().as_bytes());
    nonce
}

/// Compute the tweak for a context: a BLAKE2b-256 MAC of the context message
/// keyed with the nonce.
///
/// The result is only a scalar candidate; it may still be zero or exceed the
/// curve order, which [`KeyTweaker`] reports as [`ShieldError::TweakInvalid`].
pub fn compute_tweak(context: &TweakContext) -> [u8; TWEAK_LEN] {
    let hash = Params::new()
        .hash_length(TWEAK_LEN)
        .key(&context.nonce)
        .hash(&context.message());

    let mut tweak = [0u8; TWEAK_LEN];
    tweak.copy_from_slice(hash.as_bytes());
    tweak
}

/// Interpret tweak bytes as a big-endian scalar below the curve order.
pub fn tweak_scalar(tweak: &[u8; TWEAK_LEN]) -> Result<Scalar, ShieldError> {
    Scalar::from_be_bytes(*tweak).map_err(|_| ShieldError::TweakInvalid)
}

/// Multiplies a public key by a tweak.
///
/// Implementations return [`ShieldError::TweakInvalid`] for the rare, retryable
/// case; any other error is treated as fatal by the derivation loop.
pub trait KeyTweaker {
    fn tweak_public_key(
        &self,
        key: &PublicKey,
        tweak: &[u8; TWEAK_LEN],
    ) -> Result<PublicKey, ShieldError>;
}

/// secp256k1 point multiplication.
pub struct CurveTweaker {
    secp: Secp256k1<VerifyOnly>,
}

impl CurveTweaker {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for CurveTweaker {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyTweaker for CurveTweaker {
    fn tweak_public_key(
        &self,
        key: &PublicKey,
        tweak: &[u8; TWEAK_LEN],
    ) -> Result<PublicKey, ShieldError> {
        let scalar = tweak_scalar(tweak)?;
        // Fails for a zero scalar
        key.mul_tweak(&self.secp, &scalar)
            .map_err(|_| ShieldError::TweakInvalid)
    }
}

/// Tweak every master key with the context's tweak, in input order.
///
/// Fails as soon as one key cannot be tweaked.
pub fn tweak_public_keys<T: KeyTweaker + ?Sized>(
    tweaker: &T,
    context: &TweakContext,
    master_keys: &[PublicKey],
) -> Result<Vec<PublicKey>, ShieldError> {
    let tweak = compute_tweak(context);
    master_keys
        .iter()
        .map(|key| tweaker.tweak_public_key(key, &tweak))
        .collect()
}

/// Co-signer side: derive the signing key for a tweaked public key.
///
/// child_secret = tweak · master_secret (mod n)
pub fn tweak_secret_key(
    context: &TweakContext,
    secret_key: &SecretKey,
) -> Result<SecretKey, ShieldError> {
    let scalar = tweak_scalar(&compute_tweak(context))?;
    secret_key
        .mul_tweak(&scalar)
        .map_err(|_| ShieldError::TweakInvalid)
}
