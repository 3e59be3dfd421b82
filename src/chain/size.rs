// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Worst-case signed-size estimation
//!
//! Fee iteration needs the size a transaction will have *after* signing.
//! These formulas assume maximum-length DER signatures (72 bytes plus the
//! sighash byte) and compressed public keys, so the estimate never
//! undershoots. Witness inputs are measured in virtual bytes.

use bitcoin::TxOut;

use crate::chain::{ChainParams, TxFormat};

/// Bytes of a serialized varint for `n`
fn varint_size(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        _ => 5,
    }
}

/// A maximal DER signature with sighash byte, including its push prefix
const SIG_PUSH_SIZE: usize = 1 + 73;
/// A compressed public key including its push prefix
const PUBKEY_PUSH_SIZE: usize = 1 + 33;

/// p2pkh scriptSig: signature push plus pubkey push
const P2PKH_SCRIPT_SIG_SIZE: usize = SIG_PUSH_SIZE + PUBKEY_PUSH_SIZE;

/// A 2-of-3 multisig redeem script
const MULTISIG_2OF3_SCRIPT_SIZE: usize = 1 + 3 * PUBKEY_PUSH_SIZE + 1 + 1;
/// The escrow wrapper adds IF/ELSE/ENDIF, CSV DROP, a sequence push and a key
const ESCROW_2OF3_SCRIPT_SIZE: usize = MULTISIG_2OF3_SCRIPT_SIZE + 5 + 4 + PUBKEY_PUSH_SIZE + 1;

/// How an input will be redeemed, for sizing purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    P2pkh,
    P2wpkh,
    P2shMultisig2of3,
    /// Escrow redeem script spent through the 2-signature multisig branch
    P2shTimelock2Sigs,
    /// Escrow redeem script spent through the single-signature timeout branch
    P2shTimelock1Sig,
}

impl InputType {
    /// The keychain input type owned keys produce on this chain
    pub fn for_params(params: &ChainParams) -> InputType {
        if params.uses_segwit() {
            InputType::P2wpkh
        } else {
            InputType::P2pkh
        }
    }

    /// Worst-case serialized size of one input, in virtual bytes
    pub fn input_size(&self) -> usize {
        // outpoint (36) + sequence (4) precede every scriptSig
        const INPUT_OVERHEAD: usize = 36 + 4;
        match self {
            InputType::P2pkh => {
                INPUT_OVERHEAD + varint_size(P2PKH_SCRIPT_SIG_SIZE) + P2PKH_SCRIPT_SIG_SIZE
            }
            InputType::P2wpkh => {
                // empty scriptSig; witness is discounted to a quarter
                let witness_weight = 1 + SIG_PUSH_SIZE + PUBKEY_PUSH_SIZE;
                INPUT_OVERHEAD + 1 + (witness_weight + 3) / 4
            }
            InputType::P2shMultisig2of3 => {
                let script_sig =
                    1 + 2 * SIG_PUSH_SIZE + 2 + MULTISIG_2OF3_SCRIPT_SIZE;
                INPUT_OVERHEAD + varint_size(script_sig) + script_sig
            }
            InputType::P2shTimelock2Sigs => {
                let script_sig =
                    1 + 2 * SIG_PUSH_SIZE + 1 + 2 + ESCROW_2OF3_SCRIPT_SIZE;
                INPUT_OVERHEAD + varint_size(script_sig) + script_sig
            }
            InputType::P2shTimelock1Sig => {
                let script_sig = SIG_PUSH_SIZE + 1 + 2 + ESCROW_2OF3_SCRIPT_SIZE;
                INPUT_OVERHEAD + varint_size(script_sig) + script_sig
            }
        }
    }
}

/// Serialized size of one output
pub fn output_size(output: &TxOut) -> usize {
    8 + varint_size(output.script_pubkey.len()) + output.script_pubkey.len()
}

/// Size of the change output the wallet would add on this chain
pub fn change_output_size(params: &ChainParams) -> usize {
    if params.uses_segwit() {
        8 + 1 + 22
    } else {
        8 + 1 + 25
    }
}

/// Estimate the signed size of a transaction in virtual bytes.
///
/// `add_change_output` reserves room for the change output the builder may
/// append after fee iteration settles.
pub fn estimate_serialize_size(
    params: &ChainParams,
    input_count: usize,
    input_type: InputType,
    outputs: &[TxOut],
    add_change_output: bool,
) -> usize {
    let output_count = outputs.len() + if add_change_output { 1 } else { 0 };

    let mut size = 4 + 4; // version + locktime
    if params.format == TxFormat::ZcashV4 {
        // version group id, expiry height, value balance, empty shielded counts
        size += 4 + 4 + 8 + 3;
    }
    if input_type == InputType::P2wpkh {
        // segwit marker and flag, quarter-weighted
        size += 1;
    }
    size += varint_size(input_count) + input_count * input_type.input_size();
    size += varint_size(output_count);
    size += outputs.iter().map(output_size).sum::<usize>();
    if add_change_output {
        size += change_output_size(params);
    }
    size
}
