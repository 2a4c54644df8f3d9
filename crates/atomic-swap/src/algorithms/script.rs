//! # HTLC Script Engine
//!
//! Builds and parses the two-branch HTLC witness script:
//!
//! ```text
//! OP_IF
//!   OP_HASH160 <hash160> OP_EQUALVERIFY <receiver_pubkey> OP_CHECKSIG
//! OP_ELSE
//!   <timeout> OP_CHECKSEQUENCEVERIFY OP_DROP <sender_pubkey> OP_CHECKSIG
//! OP_ENDIF
//! ```
//!
//! Both counterparties derive the funding address from public parameters
//! alone, so the byte layout must never change.

use crate::domain::{
    CompiledHtlcScript, CompressedPubkey, Hash, Hash160, HtlcParameters, Network, SwapError,
};
use bech32::{segwit, Hrp};
use bitcoin::hashes::Hash as _;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CSV, OP_DROP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF,
    OP_PUSHNUM_1, OP_PUSHNUM_16,
};
use bitcoin::opcodes::Opcode;
use bitcoin::script::{self, Instruction};
use bitcoin::{ScriptBuf, WScriptHash, WitnessProgram, WitnessVersion};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Number of instructions in the HTLC skeleton.
const HTLC_INSTRUCTION_COUNT: usize = 13;

/// Fields recovered from a raw HTLC script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedHtlcScript {
    /// The 20-byte hash from the claim branch.
    pub hash160: Hash160,
    /// Claim-branch key.
    pub receiver_pubkey: CompressedPubkey,
    /// Refund-branch key.
    pub sender_pubkey: CompressedPubkey,
    /// Relative timeout in blocks.
    pub timeout: u16,
}

/// Compile parameters into the HTLC script and its P2WSH address.
///
/// A 32-byte payment hash is reduced to RIPEMD160 before embedding.
pub fn build_script(params: &HtlcParameters) -> Result<CompiledHtlcScript, SwapError> {
    let hash160 = params.payment_hash().to_hash160();
    let script = script::Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_HASH160)
        .push_slice(hash160)
        .push_opcode(OP_EQUALVERIFY)
        .push_slice(*params.receiver_pubkey().as_bytes())
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_int(i64::from(params.timeout()))
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_slice(*params.sender_pubkey().as_bytes())
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ENDIF)
        .into_script();

    let script_hash: Hash = Sha256::digest(script.as_bytes()).into();
    let address = witness_address(&script_hash, params.network())?;

    debug!(
        hash160 = %hex::encode(hash160),
        timeout = params.timeout(),
        %address,
        "[swap] built HTLC script"
    );

    Ok(CompiledHtlcScript {
        params: params.clone(),
        hash160,
        script,
        script_hash,
        address,
    })
}

/// Recover the parameters from raw script bytes.
pub fn parse_script(bytes: &[u8]) -> Result<ParsedHtlcScript, SwapError> {
    let script = script::Script::from_bytes(bytes);
    let instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SwapError::MalformedScript(e.to_string()))?;

    match instructions.first() {
        Some(Instruction::Op(op)) if *op == OP_IF => {}
        _ => {
            return Err(SwapError::MalformedScript(
                "script must start with OP_IF".into(),
            ))
        }
    }
    if instructions.len() < HTLC_INSTRUCTION_COUNT {
        return Err(SwapError::MalformedScript(format!(
            "expected {HTLC_INSTRUCTION_COUNT} elements, got {}",
            instructions.len()
        )));
    }
    if instructions.len() > HTLC_INSTRUCTION_COUNT {
        return Err(SwapError::MalformedScript(format!(
            "unexpected trailing elements: {} > {HTLC_INSTRUCTION_COUNT}",
            instructions.len()
        )));
    }

    expect_op(&instructions[1], OP_HASH160, 1)?;
    let hash = expect_push(&instructions[2], 2)?;
    expect_op(&instructions[3], OP_EQUALVERIFY, 3)?;
    let receiver = expect_push(&instructions[4], 4)?;
    expect_op(&instructions[5], OP_CHECKSIG, 5)?;
    expect_op(&instructions[6], OP_ELSE, 6)?;
    let timeout = decode_timeout(&instructions[7])?;
    expect_op(&instructions[8], OP_CSV, 8)?;
    expect_op(&instructions[9], OP_DROP, 9)?;
    let sender = expect_push(&instructions[10], 10)?;
    expect_op(&instructions[11], OP_CHECKSIG, 11)?;
    expect_op(&instructions[12], OP_ENDIF, 12)?;

    let hash160: Hash160 = hash.try_into().map_err(|_| {
        SwapError::MalformedScript(format!("hash must be 20 bytes, got {}", hash.len()))
    })?;
    let receiver_pubkey = CompressedPubkey::from_slice(receiver)
        .map_err(|e| SwapError::MalformedScript(format!("receiver key: {e}")))?;
    let sender_pubkey = CompressedPubkey::from_slice(sender)
        .map_err(|e| SwapError::MalformedScript(format!("sender key: {e}")))?;

    Ok(ParsedHtlcScript {
        hash160,
        receiver_pubkey,
        sender_pubkey,
        timeout,
    })
}

fn expect_op(instruction: &Instruction<'_>, expected: Opcode, pos: usize) -> Result<(), SwapError> {
    match instruction {
        Instruction::Op(op) if *op == expected => Ok(()),
        other => Err(SwapError::MalformedScript(format!(
            "element {pos}: expected {expected}, got {other:?}"
        ))),
    }
}

fn expect_push<'a>(instruction: &Instruction<'a>, pos: usize) -> Result<&'a [u8], SwapError> {
    match instruction {
        Instruction::PushBytes(bytes) => Ok(bytes.as_bytes()),
        other => Err(SwapError::MalformedScript(format!(
            "element {pos}: expected data push, got {other:?}"
        ))),
    }
}

/// Decode the timeout: `OP_1`..`OP_16` or a minimal little-endian script number.
fn decode_timeout(instruction: &Instruction<'_>) -> Result<u16, SwapError> {
    let value: i64 = match instruction {
        Instruction::Op(op)
            if op.to_u8() >= OP_PUSHNUM_1.to_u8() && op.to_u8() <= OP_PUSHNUM_16.to_u8() =>
        {
            i64::from(op.to_u8() - OP_PUSHNUM_1.to_u8() + 1)
        }
        Instruction::PushBytes(bytes) => {
            let bytes = bytes.as_bytes();
            if bytes.is_empty() || bytes.len() > 3 {
                return Err(SwapError::MalformedScript(format!(
                    "timeout push of {} bytes",
                    bytes.len()
                )));
            }
            let mut n: i64 = 0;
            for (i, b) in bytes.iter().enumerate() {
                n |= i64::from(*b) << (8 * i);
            }
            let sign_bit = 0x80i64 << (8 * (bytes.len() - 1));
            if n & sign_bit != 0 {
                return Err(SwapError::MalformedScript("negative timeout".into()));
            }
            n
        }
        other => {
            return Err(SwapError::MalformedScript(format!(
                "element 7: expected timeout, got {other:?}"
            )))
        }
    };
    u16::try_from(value)
        .ok()
        .filter(|t| *t > 0)
        .ok_or_else(|| SwapError::MalformedScript(format!("timeout {value} out of range")))
}

/// Bech32 P2WSH address for a script hash.
pub fn witness_address(script_hash: &Hash, network: Network) -> Result<String, SwapError> {
    let hrp = Hrp::parse(network.bech32_hrp())
        .map_err(|e| SwapError::InvalidAddress(e.to_string()))?;
    segwit::encode(hrp, segwit::VERSION_0, script_hash)
        .map_err(|e| SwapError::InvalidAddress(e.to_string()))
}

/// `OP_0 <script_hash>`.
pub fn p2wsh_script_pubkey(script_hash: &Hash) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&WScriptHash::from_byte_array(*script_hash))
}

/// Decode a segwit address for `network` into its output script.
pub fn address_to_script_pubkey(address: &str, network: Network) -> Result<ScriptBuf, SwapError> {
    let (hrp, version, program) =
        segwit::decode(address).map_err(|e| SwapError::InvalidAddress(e.to_string()))?;
    if !hrp.to_string().eq_ignore_ascii_case(network.bech32_hrp()) {
        return Err(SwapError::InvalidAddress(format!(
            "{address}: prefix {hrp} does not match network {network}"
        )));
    }
    let version = WitnessVersion::try_from(version.to_u8())
        .map_err(|e| SwapError::InvalidAddress(e.to_string()))?;
    let program = WitnessProgram::new(version, &program)
        .map_err(|e| SwapError::InvalidAddress(e.to_string()))?;
    Ok(ScriptBuf::new_witness_program(&program))
}
