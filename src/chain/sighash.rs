// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Signature-hash computation
//!
//! All four coins sign with SIGHASH_ALL over a BIP143-shaped digest:
//! Bitcoin and Litecoin use it for native witness inputs, Bitcoin Cash sets
//! the fork id bit on the same digest, and Zcash v4 replaces double-SHA256
//! with personalized BLAKE2b bound to a consensus branch id (ZIP-243).

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{Script, Transaction};

use crate::chain::{ChainParams, SighashScheme};

/// SIGHASH_ALL
pub const SIGHASH_ALL: u32 = 0x01;
/// The Bitcoin Cash replay-protection bit
pub const SIGHASH_FORKID: u32 = 0x40;

/// Sapling consensus branch id, mixed into the ZIP-243 personalization
pub const ZCASH_CONSENSUS_BRANCH_ID: u32 = 0x76b8_09bb;
/// Sapling version group id, part of the v4 header
pub const ZCASH_VERSION_GROUP_ID: u32 = 0x892f_2085;

/// The sighash type encoded for this chain, as committed in signatures
pub fn sighash_type(params: &ChainParams) -> u32 {
    match params.sighash {
        SighashScheme::ForkId => SIGHASH_ALL | SIGHASH_FORKID,
        _ => SIGHASH_ALL,
    }
}

/// The byte appended to each DER signature
pub fn sighash_type_byte(params: &ChainParams) -> u8 {
    sighash_type(params) as u8
}

/// Digest one input of `tx` for signing under the chain's scheme.
///
/// `script_code` is the consumed output's script (or the redeem script for
/// P2SH spends) and `value` the consumed output's amount.
pub fn signature_hash(
    params: &ChainParams,
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
) -> [u8; 32] {
    match params.sighash {
        SighashScheme::Bip143 | SighashScheme::ForkId => {
            bip143_digest(tx, input_index, script_code, value, sighash_type(params))
        }
        SighashScheme::ZcashV4 => zip243_digest(tx, input_index, script_code, value),
    }
}

fn hash_prevouts(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::with_capacity(tx.input.len() * 36);
    for input in &tx.input {
        data.extend_from_slice(&serialize(&input.previous_output));
    }
    data
}

fn hash_sequences(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::with_capacity(tx.input.len() * 4);
    for input in &tx.input {
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }
    data
}

fn hash_outputs(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::new();
    for output in &tx.output {
        data.extend_from_slice(&serialize(output));
    }
    data
}

fn bip143_digest(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
    sighash_type: u32,
) -> [u8; 32] {
    let sha256d = |data: &[u8]| sha256d::Hash::hash(data).into_inner();

    let mut preimage = Vec::new();
    preimage.extend_from_slice(&(tx.version as u32).to_le_bytes());
    preimage.extend_from_slice(&sha256d(&hash_prevouts(tx)));
    preimage.extend_from_slice(&sha256d(&hash_sequences(tx)));

    let input = &tx.input[input_index];
    preimage.extend_from_slice(&serialize(&input.previous_output));
    preimage.extend_from_slice(&serialize(script_code));
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());

    preimage.extend_from_slice(&sha256d(&hash_outputs(tx)));
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    preimage.extend_from_slice(&sighash_type.to_le_bytes());

    sha256d(&preimage)
}

fn blake2b_256(personal: &[u8; 16], data: &[u8]) -> [u8; 32] {
    let hash = blake2b_simd::Params::new()
        .hash_length(32)
        .personal(personal)
        .hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

fn zip243_digest(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
) -> [u8; 32] {
    let mut sighash_personal = *b"ZcashSigHash\0\0\0\0";
    sighash_personal[12..].copy_from_slice(&ZCASH_CONSENSUS_BRANCH_ID.to_le_bytes());

    let mut preimage = Vec::new();
    // overwintered v4 header
    preimage.extend_from_slice(&(4u32 | (1 << 31)).to_le_bytes());
    preimage.extend_from_slice(&ZCASH_VERSION_GROUP_ID.to_le_bytes());
    preimage.extend_from_slice(&blake2b_256(b"ZcashPrevoutHash", &hash_prevouts(tx)));
    preimage.extend_from_slice(&blake2b_256(b"ZcashSequencHash", &hash_sequences(tx)));
    preimage.extend_from_slice(&blake2b_256(b"ZcashOutputsHash", &hash_outputs(tx)));
    // transparent-only wallet: joinsplits, shielded spends and outputs are all empty
    preimage.extend_from_slice(&[0u8; 32]);
    preimage.extend_from_slice(&[0u8; 32]);
    preimage.extend_from_slice(&[0u8; 32]);
    preimage.extend_from_slice(&tx.lock_time.to_le_bytes());
    // expiry height
    preimage.extend_from_slice(&0u32.to_le_bytes());
    // value balance
    preimage.extend_from_slice(&0i64.to_le_bytes());
    preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());

    let input = &tx.input[input_index];
    preimage.extend_from_slice(&serialize(&input.previous_output));
    preimage.extend_from_slice(&serialize(script_code));
    preimage.extend_from_slice(&value.to_le_bytes());
    preimage.extend_from_slice(&input.sequence.to_le_bytes());

    blake2b_256(&sighash_personal, &preimage)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::hashes::hex::FromHex;
    use bitcoin::{OutPoint, Script, Transaction, TxIn, TxOut};

    use super::*;
    use crate::chain::{BITCOIN, BITCOIN_CASH, ZCASH};

    fn dummy_tx() -> Transaction {
        Transaction {
            version: 1,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::from_str(
                    "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456:1",
                )
                .unwrap(),
                script_sig: Script::new(),
                sequence: 0xffff_ffff,
                witness: vec![],
            }],
            output: vec![TxOut {
                value: 90_000,
                script_pubkey: Script::from(
                    Vec::<u8>::from_hex("76a91402306a7c23f3e8010de41e9e591348bb83f11daa88ac")
                        .unwrap(),
                ),
            }],
        }
    }

    #[test]
    fn test_bip143_known_vector() {
        // BIP143 "native P2WPKH" test vector, second input
        let raw = Vec::<u8>::from_hex(
            "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000",
        )
        .unwrap();
        let tx: Transaction = bitcoin::consensus::deserialize(&raw).unwrap();
        let script_code = Script::from(
            Vec::<u8>::from_hex("76a9141d0f172a0ecb48aee1be1f2687d2963ae33f71a188ac").unwrap(),
        );

        let digest = bip143_digest(&tx, 1, &script_code, 600_000_000, SIGHASH_ALL);
        assert_eq!(
            digest.to_vec(),
            Vec::<u8>::from_hex(
                "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
            )
            .unwrap()
        );
    }

    #[test]
    fn test_forkid_changes_digest() {
        let tx = dummy_tx();
        let script = Script::from(
            Vec::<u8>::from_hex("76a91402306a7c23f3e8010de41e9e591348bb83f11daa88ac").unwrap(),
        );
        let btc = signature_hash(&BITCOIN, &tx, 0, &script, 100_000);
        let bch = signature_hash(&BITCOIN_CASH, &tx, 0, &script, 100_000);
        assert_ne!(btc, bch);
        assert_eq!(sighash_type_byte(&BITCOIN_CASH), 0x41);
    }

    #[test]
    fn test_zcash_digest_is_branch_bound() {
        let tx = dummy_tx();
        let script = Script::from(
            Vec::<u8>::from_hex("76a91402306a7c23f3e8010de41e9e591348bb83f11daa88ac").unwrap(),
        );
        let zec = signature_hash(&ZCASH, &tx, 0, &script, 100_000);
        let btc = signature_hash(&BITCOIN, &tx, 0, &script, 100_000);
        assert_ne!(zec, btc);
        // deterministic for a fixed transaction
        assert_eq!(zec, signature_hash(&ZCASH, &tx, 0, &script, 100_000));
    }
}
