//! # Shield Derive
//!
//! Deterministic multisig addresses from long-lived master keys.
//!
//! Each co-signer publishes one master public key. For every user or context
//! identifier, the master keys are multiplied by a tweak derived from public
//! data, and the tweaked keys form an `m`-of-`n` multisig wrapped as
//! P2SH(P2WSH). The same identifier and counter always reproduce the same
//! address, and since the tweak only depends on the identifier, counter,
//! threshold and key set, a lost tweak can be recomputed rather than stored.
//!
//! # Example
//!
//! ```
//! use bitcoin::Network;
//! use shield_derive::{derive_address, parse_master_key_hex};
//!
//! let keys: Vec<_> = [
//!     "03a6c20e343dac4741b77d0d4ae8246cbdd1f375a38faf675386fe9921a0aaeb75",
//!     "0378e367ee344232a095189d86e9c012b65f23b1beb9e9051ba206b1d99e70f7e2",
//!     "027de470ba7cd817de96450466f7079828b6a44f23a5d91f7495730e2972f7fb5a",
//! ]
//! .iter()
//! .map(|k| parse_master_key_hex(k).unwrap())
//! .collect();
//!
//! let derived = derive_address(&[0u8; 32], 0, 2, &keys, Network::Bitcoin).unwrap();
//! assert!(derived.address.starts_with('3'));
//! ```

pub mod address;
pub mod script;
pub mod tweak;
pub mod types;

use std::ops::RangeInclusive;

use bitcoin::Network;
use secp256k1::PublicKey;

pub use address::{decode_p2sh, encode_nested_address};
pub use script::{build_multisig_script, push_data};
pub use tweak::{
    compute_tweak, derive_nonce, tweak_secret_key, CurveTweaker, KeyTweaker,
};
pub use types::*;

use script::check_multisig_bounds;
use tweak::tweak_public_keys;

/// Derive the redeem script for `id`, starting at `counter`.
///
/// If the tweak is invalid for any master key the counter advances and the
/// derivation restarts. The returned context carries the counter that
/// succeeded, which is the smallest one `>= counter` that yields valid keys.
pub fn derive_redeem_script(
    id: &[u8; ID_LEN],
    counter: u32,
    threshold: u8,
    master_keys: &[PublicKey],
) -> Result<DerivedScript, ShieldError> {
    derive_redeem_script_with(&CurveTweaker::new(), id, counter, threshold, master_keys)
}

/// [`derive_redeem_script`] with a caller-supplied tweaker.
pub fn derive_redeem_script_with<T: KeyTweaker + ?Sized>(
    tweaker: &T,
    id: &[u8; ID_LEN],
    counter: u32,
    threshold: u8,
    master_keys: &[PublicKey],
) -> Result<DerivedScript, ShieldError> {
    check_multisig_bounds(threshold as usize, master_keys.len())?;

    let nonce = derive_nonce(master_keys);
    let mut context = TweakContext::new(*id, counter, threshold, nonce);

    // Bounded by the counter space: `next` fails instead of wrapping.
    let derived_keys = loop {
        match tweak_public_keys(tweaker, &context, master_keys) {
            Ok(keys) => break keys,
            Err(ShieldError::TweakInvalid) => {
                log::warn!(
                    "Tweak invalid at counter {}, advancing counter",
                    context.counter
                );
                context = context.next()?;
            }
            Err(e) => return Err(e),
        }
    };

    finish_script(context, derived_keys, master_keys.len())
}

fn finish_script(
    context: TweakContext,
    mut derived_keys: Vec<PublicKey>,
    n: usize,
) -> Result<DerivedScript, ShieldError> {
    let redeem_script = build_multisig_script(context.threshold, n, &derived_keys)?;
    derived_keys.sort_by_key(PublicKey::serialize);

    Ok(DerivedScript {
        context,
        derived_keys,
        redeem_script,
    })
}

/// Derive the nested multisig address for `id`, starting at `counter`.
pub fn derive_address(
    id: &[u8; ID_LEN],
    counter: u32,
    threshold: u8,
    master_keys: &[PublicKey],
    network: Network,
) -> Result<DerivedAddress, ShieldError> {
    let derived = derive_redeem_script(id, counter, threshold, master_keys)?;
    let address = encode_nested_address(&derived.redeem_script, network)?;

    log::debug!(
        "Derived {}-of-{} address {} at counter {}",
        threshold,
        master_keys.len(),
        address,
        derived.context.counter
    );

    Ok(DerivedAddress {
        context: derived.context,
        redeem_script: derived.redeem_script,
        address,
    })
}

/// Rebuild the redeem script for a previously issued context.
///
/// Unlike [`derive_redeem_script`] this never advances the counter: a stored
/// context must reproduce exactly, so an invalid tweak is an error here.
pub fn verify_context(
    context: &TweakContext,
    master_keys: &[PublicKey],
) -> Result<DerivedScript, ShieldError> {
    check_multisig_bounds(context.threshold as usize, master_keys.len())?;

    if derive_nonce(master_keys) != context.nonce {
        return Err(ShieldError::NonceMismatch);
    }

    let derived_keys = tweak_public_keys(&CurveTweaker::new(), context, master_keys)?;
    finish_script(*context, derived_keys, master_keys.len())
}

/// Find the context that produced `address` when its counter was lost.
///
/// Walks `counters` in order, skipping counters whose tweak is invalid, and
/// returns the first context whose address matches. The range is inclusive so
/// the search can reach `u32::MAX`.
pub fn recover_context(
    id: &[u8; ID_LEN],
    threshold: u8,
    master_keys: &[PublicKey],
    network: Network,
    address: &str,
    counters: RangeInclusive<u32>,
) -> Result<Option<TweakContext>, ShieldError> {
    check_multisig_bounds(threshold as usize, master_keys.len())?;

    let tweaker = CurveTweaker::new();
    let nonce = derive_nonce(master_keys);

    for counter in counters {
        let context = TweakContext::new(*id, counter, threshold, nonce);
        let derived_keys = match tweak_public_keys(&tweaker, &context, master_keys) {
            Ok(keys) => keys,
            Err(ShieldError::TweakInvalid) => continue,
            Err(e) => return Err(e),
        };

        let script = build_multisig_script(threshold, master_keys.len(), &derived_keys)?;
        if encode_nested_address(&script, network)? == address {
            log::debug!("Recovered counter {} for {}", counter, address);
            return Ok(Some(context));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Secp256k1, SecretKey};
    use std::cell::Cell;

    const MASTER_KEYS: [&str; 5] = [
        "03a6c20e343dac4741b77d0d4ae8246cbdd1f375a38faf675386fe9921a0aaeb75",
        "0378e367ee344232a095189d86e9c012b65f23b1beb9e9051ba206b1d99e70f7e2",
        "027de470ba7cd817de96450466f7079828b6a44f23a5d91f7495730e2972f7fb5a",
        "03c0c90453b762ac8e2f569a20e05d07f15d9462fa36dbced3193462db05cf9e28",
        "02575b15fc2e030f0c94deeacf4d97ec47de265bb0ab6766447a3d4e8d2142cfa4",
    ];

    fn master_keys() -> Vec<PublicKey> {
        MASTER_KEYS
            .iter()
            .map(|k| parse_master_key_hex(k).unwrap())
            .collect()
    }

    fn hello_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        for (b, c) in id.iter_mut().zip(b"hello world".iter().cycle()) {
            *b = *c;
        }
        id
    }

    fn test_keypair(seed: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let mut secret_bytes = [0u8; 32];
        secret_bytes[31] = seed;
        secret_bytes[0] = 0x01;
        let sk = SecretKey::from_slice(&secret_bytes).unwrap();
        let pk = sk.public_key(&secp);
        (sk, pk)
    }

    /// Rejects a fixed set of tweaks, optionally only for one key.
    struct RejectingTweaker {
        rejected: Vec<[u8; 32]>,
        only_key: Option<PublicKey>,
        calls: Cell<usize>,
        inner: CurveTweaker,
    }

    impl RejectingTweaker {
        fn new(rejected: Vec<[u8; 32]>) -> Self {
            Self {
                rejected,
                only_key: None,
                calls: Cell::new(0),
                inner: CurveTweaker::new(),
            }
        }
    }

    impl KeyTweaker for RejectingTweaker {
        fn tweak_public_key(
            &self,
            key: &PublicKey,
            tweak: &[u8; 32],
        ) -> Result<PublicKey, ShieldError> {
            self.calls.set(self.calls.get() + 1);
            let key_matches = self.only_key.map_or(true, |k| k == *key);
            if key_matches && self.rejected.contains(tweak) {
                return Err(ShieldError::TweakInvalid);
            }
            self.inner.tweak_public_key(key, tweak)
        }
    }

    struct AlwaysInvalid;

    impl KeyTweaker for AlwaysInvalid {
        fn tweak_public_key(&self, _: &PublicKey, _: &[u8; 32]) -> Result<PublicKey, ShieldError> {
            Err(ShieldError::TweakInvalid)
        }
    }

    struct BrokenKey;

    impl KeyTweaker for BrokenKey {
        fn tweak_public_key(&self, _: &PublicKey, _: &[u8; 32]) -> Result<PublicKey, ShieldError> {
            Err(ShieldError::InvalidPublicKey("broken".into()))
        }
    }

    fn tweak_at(counter: u32, threshold: u8, keys: &[PublicKey]) -> [u8; 32] {
        compute_tweak(&TweakContext::new(
            hello_id(),
            counter,
            threshold,
            derive_nonce(keys),
        ))
    }

    #[test]
    fn test_hello_world_vector() {
        let keys = master_keys();
        let derived = derive_address(&hello_id(), 0, 3, &keys, Network::Bitcoin).unwrap();

        assert_eq!(derived.address, "3NaF7Xpt4HCHNbM5S3RzRcGHgqrW98vyjf");
        assert_eq!(derived.context.counter, 0);
        assert_eq!(derived.context.threshold, 3);
        assert_eq!(derived.context.id, hello_id());
        assert_eq!(
            hex::encode(derived.context.nonce),
            "7e094b67b2551bc3b7d8c32ba70c30efa9956e87c5633b949ad300ea957f7057"
        );

        let testnet = derive_address(&hello_id(), 0, 3, &keys, Network::Testnet).unwrap();
        assert_eq!(testnet.address, "2NE8TBGkufjhdaNyd7B3s3ZFYuC4fwKZJr1");
        assert_eq!(testnet.redeem_script, derived.redeem_script);
    }

    #[test]
    fn test_other_vectors() {
        let keys = master_keys();

        let next = derive_address(&hello_id(), 1, 3, &keys, Network::Bitcoin).unwrap();
        assert_eq!(next.address, "32euMERk1sTEbQWgd1RoTFMPqF72CziucM");

        let two_of_three = derive_address(&hello_id(), 0, 2, &keys[..3], Network::Bitcoin).unwrap();
        assert_eq!(two_of_three.address, "342sMkiXN6xJzd7euyfVHR6q7jPQ9c8LxR");

        let single = derive_address(&[0u8; 32], 0, 1, &keys[..1], Network::Bitcoin).unwrap();
        assert_eq!(single.address, "3BUH3pQ7iReWVcAqt5aV6o6RY5MKSH2opz");
        assert_eq!(
            hex::encode(&single.redeem_script),
            "51210242b28a9df5a3c7aab904dbf83387860912a232c4f41fae5e8b52ff3098d8ed0d51ae"
        );
    }

    #[test]
    fn test_deterministic() {
        let keys = master_keys();
        let a = derive_address(&hello_id(), 0, 3, &keys, Network::Bitcoin).unwrap();
        let b = derive_address(&hello_id(), 0, 3, &keys, Network::Bitcoin).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_order_independent() {
        let keys = master_keys();
        let reference = derive_redeem_script(&hello_id(), 0, 3, &keys).unwrap();

        let mut permuted = keys.clone();
        for shift in 1..keys.len() {
            permuted.rotate_left(1);
            let derived = derive_redeem_script(&hello_id(), 0, 3, &permuted).unwrap();
            assert_eq!(derived, reference, "rotation {}", shift);
        }

        permuted.reverse();
        permuted.swap(0, 3);
        assert_eq!(
            derive_redeem_script(&hello_id(), 0, 3, &permuted).unwrap(),
            reference
        );
    }

    #[test]
    fn test_derived_keys_sorted_and_in_script() {
        let derived = derive_redeem_script(&hello_id(), 0, 3, &master_keys()).unwrap();

        for pair in derived.derived_keys.windows(2) {
            assert!(pair[0].serialize() < pair[1].serialize());
        }
        for (i, key) in derived.derived_keys.iter().enumerate() {
            let offset = 2 + 34 * i;
            assert_eq!(&derived.redeem_script[offset..offset + 33], &key.serialize());
        }
    }

    #[test]
    fn test_retry_advances_to_first_valid_counter() {
        let keys = master_keys();
        let tweaker = RejectingTweaker::new(vec![tweak_at(0, 3, &keys), tweak_at(1, 3, &keys)]);

        let derived = derive_redeem_script_with(&tweaker, &hello_id(), 0, 3, &keys).unwrap();
        assert_eq!(derived.context.counter, 2);

        // Identical to asking for counter 2 directly
        let direct = derive_redeem_script(&hello_id(), 2, 3, &keys).unwrap();
        assert_eq!(derived, direct);
    }

    #[test]
    fn test_retry_when_single_key_fails() {
        let keys = master_keys();
        let mut tweaker = RejectingTweaker::new(vec![tweak_at(0, 3, &keys)]);
        tweaker.only_key = Some(keys[3]);

        let derived = derive_redeem_script_with(&tweaker, &hello_id(), 0, 3, &keys).unwrap();
        assert_eq!(derived.context.counter, 1);
        // First pass stops at the fourth key, second pass tweaks all five
        assert_eq!(tweaker.calls.get(), 4 + 5);
    }

    #[test]
    fn test_retry_skips_only_rejected_counters() {
        let keys = master_keys();
        // Rejecting a later counter does not affect a start before it
        let tweaker = RejectingTweaker::new(vec![tweak_at(5, 3, &keys)]);
        let derived = derive_redeem_script_with(&tweaker, &hello_id(), 4, 3, &keys).unwrap();
        assert_eq!(derived.context.counter, 4);

        let derived = derive_redeem_script_with(&tweaker, &hello_id(), 5, 3, &keys).unwrap();
        assert_eq!(derived.context.counter, 6);
    }

    #[test]
    fn test_counter_exhaustion() {
        let keys = master_keys();
        let result = derive_redeem_script_with(&AlwaysInvalid, &hello_id(), u32::MAX - 1, 3, &keys);
        assert_eq!(result, Err(ShieldError::CounterExhausted));
    }

    #[test]
    fn test_fatal_tweaker_errors_not_retried() {
        let keys = master_keys();
        let result = derive_redeem_script_with(&BrokenKey, &hello_id(), 0, 3, &keys);
        assert!(matches!(result, Err(ShieldError::InvalidPublicKey(_))));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let keys = master_keys();

        assert_eq!(
            derive_address(&hello_id(), 0, 0, &keys, Network::Bitcoin),
            Err(ShieldError::InvalidMultisig { m: 0, n: 5 })
        );
        assert_eq!(
            derive_address(&hello_id(), 0, 6, &keys, Network::Bitcoin),
            Err(ShieldError::InvalidMultisig { m: 6, n: 5 })
        );
        assert_eq!(
            derive_address(&hello_id(), 0, 1, &[], Network::Bitcoin),
            Err(ShieldError::InvalidMultisig { m: 1, n: 0 })
        );
    }

    #[test]
    fn test_sixteen_keys_rejected() {
        let keys: Vec<PublicKey> = (1..=16).map(|i| test_keypair(i).1).collect();
        assert_eq!(
            derive_redeem_script(&hello_id(), 0, 2, &keys),
            Err(ShieldError::InvalidMultisig { m: 2, n: 16 })
        );

        // Fifteen is the ceiling
        let derived = derive_redeem_script(&hello_id(), 0, 15, &keys[..15]).unwrap();
        assert_eq!(derived.redeem_script[0], 0x5f);
        assert_eq!(derived.redeem_script[derived.redeem_script.len() - 2], 0x5f);
    }

    #[test]
    fn test_threshold_changes_address() {
        let keys = master_keys();
        let a = derive_address(&hello_id(), 0, 2, &keys, Network::Bitcoin).unwrap();
        let b = derive_address(&hello_id(), 0, 3, &keys, Network::Bitcoin).unwrap();
        assert_ne!(a.address, b.address);
    }

    #[test]
    fn test_verify_context() {
        let keys = master_keys();
        let derived = derive_redeem_script(&hello_id(), 0, 3, &keys).unwrap();

        let mut reversed = keys.clone();
        reversed.reverse();
        let verified = verify_context(&derived.context, &reversed).unwrap();
        assert_eq!(verified, derived);

        // A different key set has a different nonce
        assert_eq!(
            verify_context(&derived.context, &keys[..4]),
            Err(ShieldError::NonceMismatch)
        );

        // Stored contexts are bounds-checked like fresh ones
        let tampered = TweakContext {
            threshold: 6,
            ..derived.context
        };
        assert_eq!(
            verify_context(&tampered, &keys),
            Err(ShieldError::InvalidMultisig { m: 6, n: 5 })
        );
    }

    #[test]
    fn test_signing_keys_match_script() {
        let secp = Secp256k1::new();
        let pairs: Vec<(SecretKey, PublicKey)> = (1..=3).map(test_keypair).collect();
        let masters: Vec<PublicKey> = pairs.iter().map(|(_, pk)| *pk).collect();

        let derived = derive_redeem_script(&[0x5a; 32], 0, 2, &masters).unwrap();
        for (sk, _) in &pairs {
            let child = tweak_secret_key(&derived.context, sk).unwrap();
            assert!(derived.derived_keys.contains(&child.public_key(&secp)));
        }
    }

    #[test]
    fn test_recover_context() {
        let keys = master_keys();
        let issued = derive_address(&hello_id(), 7, 3, &keys, Network::Bitcoin).unwrap();

        let recovered =
            recover_context(&hello_id(), 3, &keys, Network::Bitcoin, &issued.address, 0..=15)
                .unwrap();
        assert_eq!(recovered, Some(issued.context));

        // Search window ends before the counter
        let missed =
            recover_context(&hello_id(), 3, &keys, Network::Bitcoin, &issued.address, 0..=6)
                .unwrap();
        assert_eq!(missed, None);

        // Window starting past the counter
        let late =
            recover_context(&hello_id(), 3, &keys, Network::Bitcoin, &issued.address, 8..=20)
                .unwrap();
        assert_eq!(late, None);

        // Window starting exactly on it
        let exact =
            recover_context(&hello_id(), 3, &keys, Network::Bitcoin, &issued.address, 7..=7)
                .unwrap();
        assert_eq!(exact, Some(issued.context));

        // Wrong network never matches
        let other_net =
            recover_context(&hello_id(), 3, &keys, Network::Testnet, &issued.address, 0..=15)
                .unwrap();
        assert_eq!(other_net, None);
    }

    #[test]
    fn test_recover_context_reaches_last_counter() {
        let keys = master_keys();
        let issued = derive_address(&hello_id(), u32::MAX, 3, &keys, Network::Bitcoin).unwrap();
        assert_eq!(issued.context.counter, u32::MAX);

        let window = u32::MAX - 3..=u32::MAX;
        let recovered =
            recover_context(&hello_id(), 3, &keys, Network::Bitcoin, &issued.address, window)
                .unwrap();
        assert_eq!(recovered, Some(issued.context));

        // An empty range searches nothing
        #[allow(clippy::reversed_empty_ranges)]
        let empty = recover_context(&hello_id(), 3, &keys, Network::Bitcoin, &issued.address, 5..=4)
            .unwrap();
        assert_eq!(empty, None);
    }
}
