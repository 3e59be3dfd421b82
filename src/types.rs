// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Shared wallet types

use std::time::SystemTime;

use bitcoin::{OutPoint, Script, Txid};

use serde::{Deserialize, Serialize};

use crate::chain::address::Address;

/// The coins the wallet core can be configured for.
///
/// Every coin shares the Bitcoin transaction model but differs in chain
/// parameters, address encoding, dust policy and signature hashing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoinType {
    Bitcoin,
    BitcoinCash,
    Litecoin,
    Zcash,
}

impl std::str::FromStr for CoinType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<CoinType, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(CoinType::Bitcoin),
            "bitcoincash" | "bch" => Ok(CoinType::BitcoinCash),
            "litecoin" | "ltc" => Ok(CoinType::Litecoin),
            "zcash" | "zec" => Ok(CoinType::Zcash),
            _ => Err(crate::error::Error::NotFound),
        }
    }
}

impl std::fmt::Display for CoinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CoinType::Bitcoin => "Bitcoin",
            CoinType::BitcoinCash => "Bitcoin Cash",
            CoinType::Litecoin => "Litecoin",
            CoinType::Zcash => "Zcash",
        };
        write!(f, "{}", name)
    }
}

/// Key chains within a BIP44 account
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPurpose {
    /// Receiving addresses handed out to other parties
    External = 0,
    /// Change addresses, only ever paid by the wallet itself
    Internal = 1,
}

impl KeyPurpose {
    /// The BIP44 change-level child number for this chain
    pub fn child_number(&self) -> u32 {
        *self as u32
    }
}

/// Position of a derived key within the account.
///
/// Imported keys are stored with `index = -1`; derived keys keep a dense
/// `0..=max` range per purpose.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyPath {
    pub purpose: KeyPurpose,
    pub index: i32,
}

/// Fee urgency requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeLevel {
    Economic,
    Normal,
    Priority,
    /// Used by CPFP fee bumping, priced to pull a stuck parent along
    FeeBump,
}

/// An unspent output tracked by the wallet
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Utxo {
    /// Location of the output
    pub outpoint: OutPoint,
    /// Value in satoshis
    pub value: u64,
    /// The locking script
    pub script_pubkey: Script,
    /// Block height of the containing transaction, 0 while unconfirmed
    pub at_height: i32,
    /// True when the output pays a watched script rather than an owned key
    pub watch_only: bool,
}

/// A spent output, kept on a best-effort basis for ancestry checks
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stxo {
    /// The output as it was before being spent
    pub utxo: Utxo,
    /// Height of the spending transaction, 0 while unconfirmed
    pub spend_height: i32,
    /// The spending transaction
    pub spend_txid: Txid,
}

/// A wallet-relevant transaction in its persisted form.
///
/// `raw` holds the canonical consensus serialization for the coin and is
/// immutable once stored; only `height` may move afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Txn {
    pub txid: Txid,
    /// Canonical consensus bytes (coin-specific format)
    pub raw: Vec<u8>,
    /// Net value from the wallet's perspective: owned outputs minus owned inputs
    pub value: i64,
    /// 0 = unconfirmed, -1 = dead (double spent or reorged out)
    pub height: i32,
    pub timestamp: SystemTime,
    /// True when no owned key was touched, only watched scripts
    pub watch_only: bool,
}

/// Height sentinel marking a transaction as dead
pub const TX_HEIGHT_DEAD: i32 = -1;

/// An input handed to the sweep and multisig entrypoints
#[derive(Debug, Clone)]
pub struct TransactionInput {
    pub outpoint: OutPoint,
    pub value: i64,
    /// Address owning the consumed output, used to rebuild its script
    pub linked_address: Address,
}

/// An output handed to the multisig entrypoints
#[derive(Debug, Clone)]
pub struct TransactionOutput {
    pub address: Address,
    pub value: i64,
}

/// A detached signature over one input of a deterministic transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub input_index: u32,
    pub signature: Vec<u8>,
}

/// Callback payload delivered to transaction listeners
pub type TransactionCallback = Txn;

/// Listener invoked when a transaction is first seen or changes height
pub type TxListener = Box<dyn Fn(&TransactionCallback) + Send + Sync>;
