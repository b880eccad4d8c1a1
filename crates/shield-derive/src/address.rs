//! Nested SegWit address encoding: P2SH(P2WSH(redeem script)).
//!
//! ```text
//! witness_script = OP_0 <SHA256(redeem_script)>
//! payload        = version || HASH160(witness_script)
//! address        = Base58(payload || SHA256d(payload)[..4])
//! ```

use bitcoin::hashes::{hash160, sha256, sha256d, Hash};
use bitcoin::{base58, Network, NetworkKind};

use crate::script::witness_program;
use crate::types::ShieldError;

/// P2SH version byte on mainnet.
pub const P2SH_VERSION_MAINNET: u8 = 0x05;

/// P2SH version byte on every test network.
pub const P2SH_VERSION_TESTNET: u8 = 0xc4;

const CHECKSUM_LEN: usize = 4;
const PAYLOAD_LEN: usize = 1 + 20;

/// P2SH version byte for a network.
pub fn p2sh_version(network: Network) -> u8 {
    match NetworkKind::from(network) {
        NetworkKind::Main => P2SH_VERSION_MAINNET,
        NetworkKind::Test => P2SH_VERSION_TESTNET,
    }
}

/// SHA-256 of a script, the P2WSH commitment.
pub fn script_hash(script: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(script).to_byte_array()
}

/// SHA-256 followed by RIPEMD-160.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = sha256d::Hash::hash(payload).to_byte_array();
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// The version-0 witness program committing to `redeem_script`.
pub fn nested_witness_script(redeem_script: &[u8]) -> Result<Vec<u8>, ShieldError> {
    witness_program(0, &script_hash(redeem_script))
}

/// Base58Check-encode a 20-byte script hash as a P2SH address.
pub fn encode_p2sh(script_hash160: &[u8; 20], network: Network) -> String {
    let mut data = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
    data.push(p2sh_version(network));
    data.extend_from_slice(script_hash160);
    let check = checksum(&data);
    data.extend_from_slice(&check);
    base58::encode(&data)
}

/// Encode a redeem script as a P2SH-wrapped P2WSH address.
pub fn encode_nested_address(redeem_script: &[u8], network: Network) -> Result<String, ShieldError> {
    let witness_script = nested_witness_script(redeem_script)?;
    Ok(encode_p2sh(&hash160(&witness_script), network))
}

/// Decode a P2SH address into its version byte and script hash, verifying the checksum.
pub fn decode_p2sh(address: &str) -> Result<(u8, [u8; 20]), ShieldError> {
    let payload =
        base58::decode_check(address).map_err(|e| ShieldError::InvalidAddress(e.to_string()))?;
    if payload.len() != PAYLOAD_LEN {
        return Err(ShieldError::InvalidAddress(format!(
            "payload is {} bytes, expected {}",
            payload.len(),
            PAYLOAD_LEN
        )));
    }

    let version = payload[0];
    if version != P2SH_VERSION_MAINNET && version != P2SH_VERSION_TESTNET {
        return Err(ShieldError::InvalidAddress(format!(
            "version byte {:#04x} is not P2SH",
            version
        )));
    }

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    Ok((version, hash))
}
