// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Coin-specific transaction serialization
//!
//! Bitcoin-model coins use the standard consensus encoding. Zcash persists
//! and broadcasts the v4 (Sapling) layout: an overwintered header, version
//! group id, expiry height, value balance and empty shielded bundles. The
//! txid in both cases is double-SHA256 over the canonical bytes.

use bitcoin::consensus::encode::{deserialize_partial, serialize, VarInt};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{Transaction, TxIn, TxOut, Txid};

use crate::chain::sighash::ZCASH_VERSION_GROUP_ID;
use crate::chain::{ChainParams, TxFormat};
use crate::error::Error;

/// Serialize a transaction into the chain's canonical consensus bytes
pub fn serialize_tx(params: &ChainParams, tx: &Transaction) -> Vec<u8> {
    match params.format {
        TxFormat::Bitcoin => serialize(tx),
        TxFormat::ZcashV4 => serialize_zcash_v4(tx),
    }
}

/// Deserialize the chain's canonical consensus bytes
pub fn deserialize_tx(params: &ChainParams, bytes: &[u8]) -> Result<Transaction, Error> {
    match params.format {
        TxFormat::Bitcoin => Ok(bitcoin::consensus::deserialize(bytes)?),
        TxFormat::ZcashV4 => deserialize_zcash_v4(bytes),
    }
}

/// The transaction id under the chain's canonical serialization
pub fn txid(params: &ChainParams, tx: &Transaction) -> Txid {
    match params.format {
        TxFormat::Bitcoin => tx.txid(),
        TxFormat::ZcashV4 => {
            let digest = sha256d::Hash::hash(&serialize_zcash_v4(tx));
            Txid::from_hash(digest)
        }
    }
}

fn serialize_zcash_v4(tx: &Transaction) -> Vec<u8> {
    let mut data = Vec::new();
    // overwintered bit plus version 4
    data.extend_from_slice(&(4u32 | (1 << 31)).to_le_bytes());
    data.extend_from_slice(&ZCASH_VERSION_GROUP_ID.to_le_bytes());

    data.extend_from_slice(&serialize(&VarInt(tx.input.len() as u64)));
    for input in &tx.input {
        data.extend_from_slice(&serialize(input));
    }
    data.extend_from_slice(&serialize(&VarInt(tx.output.len() as u64)));
    for output in &tx.output {
        data.extend_from_slice(&serialize(output));
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    // expiry height: never expire wallet transactions
    data.extend_from_slice(&0u32.to_le_bytes());
    // sapling value balance
    data.extend_from_slice(&0i64.to_le_bytes());
    // nShieldedSpend, nShieldedOutput, nJoinSplit all empty
    data.extend_from_slice(&serialize(&VarInt(0)));
    data.extend_from_slice(&serialize(&VarInt(0)));
    data.extend_from_slice(&serialize(&VarInt(0)));
    data
}

fn deserialize_zcash_v4(bytes: &[u8]) -> Result<Transaction, Error> {
    let mut cursor = 0usize;

    let header = read_u32(bytes, &mut cursor)?;
    if header != (4u32 | (1 << 31)) {
        return Err(Error::Protocol(format!(
            "unexpected zcash tx header {:#010x}",
            header
        )));
    }
    let version_group = read_u32(bytes, &mut cursor)?;
    if version_group != ZCASH_VERSION_GROUP_ID {
        return Err(Error::Protocol(format!(
            "unexpected zcash version group {:#010x}",
            version_group
        )));
    }

    let (input_count, used) = deserialize_partial::<VarInt>(&bytes[cursor..])?;
    cursor += used;
    let mut input = Vec::with_capacity(input_count.0 as usize);
    for _ in 0..input_count.0 {
        let (txin, used) = deserialize_partial::<TxIn>(&bytes[cursor..])?;
        cursor += used;
        input.push(txin);
    }

    let (output_count, used) = deserialize_partial::<VarInt>(&bytes[cursor..])?;
    cursor += used;
    let mut output = Vec::with_capacity(output_count.0 as usize);
    for _ in 0..output_count.0 {
        let (txout, used) = deserialize_partial::<TxOut>(&bytes[cursor..])?;
        cursor += used;
        output.push(txout);
    }

    let lock_time = read_u32(bytes, &mut cursor)?;
    let _expiry_height = read_u32(bytes, &mut cursor)?;

    Ok(Transaction {
        version: 4,
        lock_time,
        input,
        output,
    })
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, Error> {
    let end = *cursor + 4;
    if bytes.len() < end {
        return Err(Error::Protocol("truncated transaction".to_string()));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[*cursor..end]);
    *cursor = end;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::hashes::hex::FromHex;
    use bitcoin::{OutPoint, Script};

    use super::*;
    use crate::chain::{BITCOIN, ZCASH};

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            lock_time: 0,
            input: vec![TxIn {
                previous_output: OutPoint::from_str(
                    "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456:0",
                )
                .unwrap(),
                script_sig: Script::from(vec![0x51]),
                sequence: 0xffff_fffe,
                witness: vec![],
            }],
            output: vec![TxOut {
                value: 50_000,
                script_pubkey: Script::from(
                    Vec::<u8>::from_hex("76a91402306a7c23f3e8010de41e9e591348bb83f11daa88ac")
                        .unwrap(),
                ),
            }],
        }
    }

    #[test]
    fn test_bitcoin_format_matches_consensus() {
        let tx = sample_tx();
        assert_eq!(serialize_tx(&BITCOIN, &tx), serialize(&tx));
        assert_eq!(txid(&BITCOIN, &tx), tx.txid());
    }

    #[test]
    fn test_zcash_v4_roundtrip() {
        let tx = sample_tx();
        let bytes = serialize_tx(&ZCASH, &tx);

        // header: 0x80000004 little-endian, then the sapling version group
        assert_eq!(&bytes[0..4], &[0x04, 0x00, 0x00, 0x80]);
        assert_eq!(&bytes[4..8], &ZCASH_VERSION_GROUP_ID.to_le_bytes());

        let decoded = deserialize_tx(&ZCASH, &bytes).unwrap();
        assert_eq!(decoded.version, 4);
        assert_eq!(decoded.input, tx.input);
        assert_eq!(decoded.output, tx.output);
    }

    #[test]
    fn test_zcash_txid_differs_from_bitcoin() {
        let tx = sample_tx();
        assert_ne!(txid(&ZCASH, &tx), txid(&BITCOIN, &tx));
    }

    #[test]
    fn test_zcash_rejects_foreign_header() {
        let tx = sample_tx();
        let bytes = serialize(&tx);
        assert!(deserialize_tx(&ZCASH, &bytes).is_err());
    }
}
