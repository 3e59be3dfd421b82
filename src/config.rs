// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wallet configuration
//!
//! Plain structs; loading them from files or flags is the embedder's
//! business. `Config::default_mainnet` wires public endpoints and the
//! in-memory datastore for quick starts and tests.

use std::sync::Arc;
use std::time::SystemTime;

use bitcoin::Network;

use crate::database::{Datastore, MemoryDatastore};
use crate::fees::ExchangeRates;
use crate::types::CoinType;

pub struct CoinConfig {
    pub coin_type: CoinType,

    /// Default fee-per-byte for each level
    pub low_fee: u64,
    pub medium_fee: u64,
    pub high_fee: u64,
    /// The highest allowable fee-per-byte
    pub max_fee: u64,

    /// External API to query for fees; on any failure the defaults apply.
    /// The response must decode as `{ "fastestFee": n, "halfHourFee": n,
    /// "hourFee": n }`.
    pub fee_api: Option<String>,

    /// Trusted indexer endpoints, in rotation order
    pub client_apis: Vec<String>,

    /// The datastore backing this coin
    pub db: Arc<dyn Datastore>,

    /// Optional fiat anchor; overrides the fee API when set
    pub exchange_rates: Option<Box<dyn ExchangeRates>>,
}

pub struct Config {
    /// Mainnet or testnet; applied to every coin
    pub network: Network,

    /// BIP39 mnemonic. When empty a new one is generated at construction.
    pub mnemonic: Option<String>,

    /// When the wallet was first created; sync can skip history before it
    pub creation_date: SystemTime,

    /// Optional SOCKS5 proxy as host:port, e.g. for Tor
    pub proxy: Option<String>,

    /// One entry per coin the wallet should run
    pub coins: Vec<CoinConfig>,
}

impl Config {
    /// A mainnet Bitcoin-only config against public infrastructure,
    /// backed by the in-memory datastore
    pub fn default_mainnet() -> Config {
        Config {
            network: Network::Bitcoin,
            mnemonic: None,
            creation_date: SystemTime::now(),
            proxy: None,
            coins: vec![CoinConfig {
                coin_type: CoinType::Bitcoin,
                low_fee: 140,
                medium_fee: 160,
                high_fee: 180,
                max_fee: 2000,
                fee_api: Some("https://bitcoinfees.earn.com/api/v1/fees/recommended".to_string()),
                client_apis: vec!["https://insight.bitpay.com/api".to_string()],
                db: Arc::new(MemoryDatastore::new()),
                exchange_rates: None,
            }],
        }
    }
}
