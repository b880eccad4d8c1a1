//! Script serialization: push-data framing, bare multisig redeem scripts and
//! witness programs.
//!
//! # Redeem Script Structure
//!
//! ```text
//! OP_m <key_1> ... <key_n> OP_n OP_CHECKMULTISIG
//! ```
//!
//! Keys are sorted by their compressed encoding, so a key set produces the
//! same script whatever order it arrives in.

use secp256k1::PublicKey;

use crate::types::{ShieldError, MAX_MULTISIG_KEYS};

/// The fixed opcode set used for multisig and witness-program construction.
pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_CHECKMULTISIG: u8 = 0xae;

    /// Small-integer opcode: `OP_0` for 0, `OP_1..OP_16` for 1..=16.
    pub const fn op_n(n: u8) -> Option<u8> {
        match n {
            0 => Some(OP_0),
            1..=16 => Some(OP_1 - 1 + n),
            _ => None,
        }
    }
}

use opcodes::*;

/// Longest payload pushed with a bare length byte.
pub const MAX_DIRECT_PUSH: usize = 75;

/// Witness programs are 2 to 40 bytes (BIP-141).
const WITNESS_PROGRAM_LEN: std::ops::RangeInclusive<usize> = 2..=40;

/// Number of bytes a push of `len` data bytes occupies in a script.
pub fn push_data_len(len: usize) -> usize {
    match len {
        0 => 1,
        1..=MAX_DIRECT_PUSH => 1 + len,
        0x4c..=0xff => 2 + len,
        0x100..=0xffff => 3 + len,
        _ => 5 + len,
    }
}

/// Append `data` to `out` as a minimal push and return the bytes written.
pub fn encode_push_data(out: &mut Vec<u8>, data: &[u8]) -> Result<usize, ShieldError> {
    let len = data.len();
    match len {
        0 => out.push(OP_0),
        1..=MAX_DIRECT_PUSH => out.push(len as u8),
        0x4c..=0xff => {
            out.push(OP_PUSHDATA1);
            out.push(len as u8);
        }
        0x100..=0xffff => {
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(len as u16).to_le_bytes());
        }
        _ => {
            let len32 = u32::try_from(len).map_err(|_| ShieldError::PushDataTooLong(len))?;
            out.push(OP_PUSHDATA4);
            out.extend_from_slice(&len32.to_le_bytes());
        }
    }
    out.extend_from_slice(data);
    Ok(push_data_len(len))
}

/// Frame `data` as a standalone push.
pub fn push_data(data: &[u8]) -> Result<Vec<u8>, ShieldError> {
    let mut out = Vec::with_capacity(push_data_len(data.len()));
    encode_push_data(&mut out, data)?;
    Ok(out)
}

/// Check `1 <= m <= n <= 15`.
pub fn check_multisig_bounds(m: usize, n: usize) -> Result<(), ShieldError> {
    if m == 0 || m > n || n > MAX_MULTISIG_KEYS {
        return Err(ShieldError::InvalidMultisig { m, n });
    }
    Ok(())
}

/// Build the canonical `m`-of-`n` redeem script over `keys`.
pub fn build_multisig_script(
    m: u8,
    n: usize,
    keys: &[PublicKey],
) -> Result<Vec<u8>, ShieldError> {
    check_multisig_bounds(m as usize, n)?;
    if keys.len() != n {
        return Err(ShieldError::KeyCountMismatch {
            expected: n,
            actual: keys.len(),
        });
    }

    let mut sorted: Vec<[u8; 33]> = keys.iter().map(PublicKey::serialize).collect();
    sorted.sort_unstable();

    let op_m = op_n(m).ok_or(ShieldError::InvalidMultisig { m: m as usize, n })?;
    let op_keys = op_n(n as u8).ok_or(ShieldError::InvalidMultisig { m: m as usize, n })?;

    let keys_len: usize = sorted.iter().map(|k| push_data_len(k.len())).sum();
    let mut script = Vec::with_capacity(keys_len + 3);

    script.push(op_m);
    for key in &sorted {
        encode_push_data(&mut script, key)?;
    }
    script.push(op_keys);
    script.push(OP_CHECKMULTISIG);

    Ok(script)
}

/// Build a witness program script: a version opcode followed by the pushed program.
pub fn witness_program(version: u8, program: &[u8]) -> Result<Vec<u8>, ShieldError> {
    let version_op = op_n(version).ok_or_else(|| {
        ShieldError::InvalidWitnessProgram(format!("version {} above 16", version))
    })?;
    if !WITNESS_PROGRAM_LEN.contains(&program.len()) {
        return Err(ShieldError::InvalidWitnessProgram(format!(
            "program of {} bytes, expected 2..=40",
            program.len()
        )));
    }

    let mut script = Vec::with_capacity(1 + push_data_len(program.len()));
    script.push(version_op);
    encode_push_data(&mut script, program)?;
    Ok(script)
}
