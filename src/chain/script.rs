// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Script construction and inspection helpers

use std::time::Duration;

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::{PublicKey, Script};

use crate::error::Error;

/// Build an M-of-N redeem script, optionally wrapped in a CSV escrow branch:
///
/// `IF <M-of-N> ELSE <sequence> CHECKSEQUENCEVERIFY DROP <timeout_pub> CHECKSIG ENDIF`
///
/// The timeout is rounded down to whole hours and expressed as a relative
/// block count at six blocks per hour.
pub fn multisig_redeem_script(
    pubkeys: &[PublicKey],
    threshold: usize,
    timeout: Duration,
    timeout_key: Option<&PublicKey>,
) -> Result<Script, Error> {
    let timeout_hours = timeout.as_secs() / 3600;
    if timeout_hours > 0 && timeout_key.is_none() {
        return Err(Error::MissingTimeoutKey);
    }
    if pubkeys.len() < threshold {
        return Err(Error::InvalidAmount(format!(
            "cannot require {} signatures from {} keys",
            threshold,
            pubkeys.len()
        )));
    }

    let push_multisig = |mut builder: Builder| -> Builder {
        builder = builder.push_int(threshold as i64);
        for key in pubkeys {
            builder = builder.push_slice(&key.to_bytes());
        }
        builder
            .push_int(pubkeys.len() as i64)
            .push_opcode(opcodes::all::OP_CHECKMULTISIG)
    };

    let builder = if timeout_hours == 0 {
        push_multisig(Builder::new())
    } else {
        let timeout_key = timeout_key.expect("checked above");
        let sequence_lock = timeout_hours * 6;
        let mut builder = Builder::new().push_opcode(opcodes::all::OP_IF);
        builder = push_multisig(builder);
        builder
            .push_opcode(opcodes::all::OP_ELSE)
            .push_int(sequence_lock as i64)
            .push_opcode(opcodes::all::OP_CSV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_slice(&timeout_key.to_bytes())
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_opcode(opcodes::all::OP_ENDIF)
    };

    Ok(builder.into_script())
}

/// Whether a redeem script opens with the escrow `OP_IF` branch
pub fn is_timelocked_escrow(redeem_script: &Script) -> bool {
    redeem_script
        .as_bytes()
        .first()
        .map(|b| *b == opcodes::all::OP_IF.into_u8())
        .unwrap_or(false)
}

/// Recover the CSV sequence value from an escrow redeem script.
///
/// Returns `Error::UnknownScript` when the script has no timeout branch.
pub fn lock_time_from_redeem_script(redeem_script: &Script) -> Result<u32, Error> {
    let mut saw_else = false;
    for instruction in redeem_script.instructions() {
        let instruction = instruction.map_err(|_| Error::UnknownScript)?;
        if saw_else {
            return match instruction {
                Instruction::Op(op) => {
                    // OP_1 through OP_16 encode small sequence values directly
                    let v = op.into_u8();
                    let op_1 = opcodes::all::OP_PUSHNUM_1.into_u8();
                    let op_16 = opcodes::all::OP_PUSHNUM_16.into_u8();
                    if (op_1..=op_16).contains(&v) {
                        Ok((v - op_1 + 1) as u32)
                    } else {
                        Err(Error::UnknownScript)
                    }
                }
                Instruction::PushBytes(bytes) => decode_script_int(bytes),
            };
        }
        if let Instruction::Op(op) = instruction {
            if op == opcodes::all::OP_ELSE {
                saw_else = true;
            }
        }
    }
    Err(Error::UnknownScript)
}

/// Minimal little-endian script-number decoding, bounded to a u32 sequence
fn decode_script_int(bytes: &[u8]) -> Result<u32, Error> {
    if bytes.is_empty() || bytes.len() > 5 {
        return Err(Error::UnknownScript);
    }
    let mut value: i64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        let byte = if i == bytes.len() - 1 { b & 0x7f } else { *b };
        value |= (byte as i64) << (8 * i);
    }
    if bytes.last().unwrap() & 0x80 != 0 {
        value = -value;
    }
    if value < 0 || value > u32::MAX as i64 {
        return Err(Error::UnknownScript);
    }
    Ok(value as u32)
}

/// scriptSig spending a P2PKH output
pub fn p2pkh_script_sig(signature: &[u8], pubkey: &PublicKey) -> Script {
    Builder::new()
        .push_slice(signature)
        .push_slice(&pubkey.to_bytes())
        .into_script()
}

/// scriptSig assembling two multisig signatures in BIP69 input order.
///
/// The leading OP_0 eats the historical CHECKMULTISIG off-by-one; escrow
/// scripts additionally select the multisig branch with OP_1.
pub fn multisig_script_sig(
    sig1: &[u8],
    sig2: &[u8],
    timelocked: bool,
    redeem_script: &Script,
) -> Script {
    let mut builder = Builder::new()
        .push_opcode(opcodes::all::OP_PUSHBYTES_0)
        .push_slice(sig1)
        .push_slice(sig2);
    if timelocked {
        builder = builder.push_opcode(opcodes::all::OP_PUSHNUM_1);
    }
    builder.push_slice(redeem_script.as_bytes()).into_script()
}

/// scriptSig for the single-signature escrow timeout branch
pub fn escrow_timeout_script_sig(signature: &[u8], redeem_script: &Script) -> Script {
    Builder::new()
        .push_slice(signature)
        .push_opcode(opcodes::all::OP_PUSHBYTES_0)
        .push_slice(redeem_script.as_bytes())
        .into_script()
}

/// scriptSig spending a 1-of-N multisig with a single signature
pub fn single_sig_multisig_script_sig(signature: &[u8], redeem_script: &Script) -> Script {
    Builder::new()
        .push_opcode(opcodes::all::OP_PUSHBYTES_0)
        .push_slice(signature)
        .push_slice(redeem_script.as_bytes())
        .into_script()
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::secp256k1::SecretKey;

    use crate::chain::SECP;

    fn test_key(byte: u8) -> PublicKey {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey {
            compressed: true,
            key: bitcoin::secp256k1::PublicKey::from_secret_key(&SECP, &sk),
        }
    }

    #[test]
    fn test_plain_multisig_script() {
        let keys = vec![test_key(1), test_key(2), test_key(3)];
        let script = multisig_redeem_script(&keys, 2, Duration::from_secs(0), None).unwrap();

        assert!(!is_timelocked_escrow(&script));
        assert!(lock_time_from_redeem_script(&script).is_err());
        let bytes = script.as_bytes();
        assert_eq!(bytes[0], opcodes::all::OP_PUSHNUM_2.into_u8());
        assert_eq!(
            bytes[bytes.len() - 1],
            opcodes::all::OP_CHECKMULTISIG.into_u8()
        );
    }

    #[test]
    fn test_escrow_script_locktime() {
        let keys = vec![test_key(1), test_key(2)];
        let timeout_key = test_key(9);
        let script = multisig_redeem_script(
            &keys,
            2,
            Duration::from_secs(48 * 3600),
            Some(&timeout_key),
        )
        .unwrap();

        assert!(is_timelocked_escrow(&script));
        assert_eq!(lock_time_from_redeem_script(&script).unwrap(), 48 * 6);
    }

    #[test]
    fn test_timeout_requires_key() {
        let keys = vec![test_key(1), test_key(2)];
        let err = multisig_redeem_script(&keys, 2, Duration::from_secs(3600), None);
        assert!(matches!(err, Err(Error::MissingTimeoutKey)));
    }

    #[test]
    fn test_threshold_bounds() {
        let keys = vec![test_key(1)];
        assert!(multisig_redeem_script(&keys, 2, Duration::from_secs(0), None).is_err());
    }
}
