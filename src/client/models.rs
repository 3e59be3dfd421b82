// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Insight API wire models
//!
//! Amount-bearing fields are normalized through [`Amount`] because deployed
//! indexers disagree on whether values are JSON numbers or decimal strings.

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

/// A coin amount that deserializes from a number or a decimal string
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Amount(pub f64);

impl Amount {
    /// The amount in satoshis, rounding away float noise
    pub fn as_sats(&self) -> i64 {
        (self.0 * 100_000_000.0).round() as i64
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a number or a decimal string")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                Ok(Amount(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(v as f64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                Ok(Amount(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse::<f64>()
                    .map(Amount)
                    .map_err(|_| E::custom(format!("unparseable amount {:?}", v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub info: Info,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub version: i64,
    #[serde(rename = "protocolversion", default)]
    pub protocol_version: i64,
    pub blocks: i32,
    #[serde(default)]
    pub connections: i64,
    #[serde(default)]
    pub testnet: bool,
    #[serde(rename = "relayfee", default)]
    pub relay_fee: Amount,
    #[serde(default)]
    pub errors: String,
    #[serde(default)]
    pub network: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub hash: String,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub time: i64,
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: String,
}

/// Shape of `GET /blocks`
#[derive(Debug, Clone, Deserialize)]
pub struct BlockList {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Utxo {
    #[serde(default)]
    pub address: String,
    pub txid: String,
    pub vout: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: String,
    #[serde(default)]
    pub amount: Amount,
    #[serde(default)]
    pub satoshis: i64,
    #[serde(default)]
    pub confirmations: i32,
}

impl Utxo {
    /// Satoshi value, preferring the integer field when the server sends both
    pub fn value_sats(&self) -> i64 {
        if self.satoshis != 0 {
            self.satoshis
        } else {
            self.amount.as_sats()
        }
    }
}

/// One page of `POST /addrs/txs`
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionList {
    #[serde(rename = "totalItems")]
    pub total_items: usize,
    #[serde(default)]
    pub from: usize,
    #[serde(default)]
    pub to: usize,
    pub items: Vec<Transaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub txid: String,
    #[serde(default = "default_version")]
    pub version: i32,
    #[serde(default)]
    pub locktime: u32,
    #[serde(rename = "vin", default)]
    pub inputs: Vec<Input>,
    #[serde(rename = "vout", default)]
    pub outputs: Vec<Output>,
    #[serde(rename = "blockhash", default)]
    pub block_hash: String,
    #[serde(rename = "blockheight", default)]
    pub block_height: i32,
    #[serde(default)]
    pub confirmations: i32,
    #[serde(default)]
    pub time: i64,
}

fn default_version() -> i32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub asm: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Input {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub vout: u32,
    #[serde(default)]
    pub sequence: u32,
    #[serde(default)]
    pub n: u32,
    #[serde(rename = "scriptSig", default)]
    pub script_sig: ScriptSig,
    #[serde(default)]
    pub addr: String,
    #[serde(rename = "valueSat", default)]
    pub value_sat: i64,
    #[serde(default)]
    pub value: Amount,
}

impl Input {
    pub fn value_sats(&self) -> i64 {
        if self.value_sat != 0 {
            self.value_sat
        } else {
            self.value.as_sats()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutScript {
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub value: Amount,
    #[serde(default)]
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: OutScript,
    #[serde(rename = "spentTxId", default)]
    pub spent_txid: Option<String>,
}

/// Shape of `POST /tx/send`
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastResult {
    pub txid: String,
}

/// An incoming websocket frame
#[derive(Debug, Clone, Deserialize)]
pub struct SocketEvent {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of a `bitcoind/addresstxid` event
#[derive(Debug, Clone, Deserialize)]
pub struct AddressTxid {
    pub address: String,
    pub txid: String,
}
