// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A multi-currency SPV wallet core for UTXO chains that share the Bitcoin
//! transaction model (Bitcoin, Bitcoin Cash, Litecoin, Zcash).
//!
//! The wallet keeps all cryptographic material local while trusting one or
//! more remote chain-indexing HTTP endpoints for UTXO and transaction data.
//! It is built from four interlocking pieces:
//!
//! 1. an HD [key manager] maintaining BIP44 chains with lookahead windows,
//! 2. a [client pool] that rotates across indexer endpoints with health
//!    tracking, retry and websocket fan-in,
//! 3. a [sync engine] reconciling the remote view into a local [datastore],
//! 4. a transaction builder doing coin selection, fee iteration, change
//!    handling and per-coin signing (multisig and sweep flows included).
//!
//! [key manager]: crate::keys::KeyManager
//! [client pool]: crate::client::ClientPool
//! [sync engine]: crate::wallet::sync::WalletService
//! [datastore]: crate::database::Datastore

pub extern crate bitcoin;
extern crate log;
extern crate serde;
extern crate serde_json;
#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate lazy_static;

pub extern crate reqwest;

#[cfg(feature = "key-value-db")]
pub extern crate sled;

#[macro_use]
pub(crate) mod error;
pub mod chain;
pub mod client;
pub mod config;
pub mod database;
pub mod fees;
pub mod keys;
pub mod multiwallet;
pub mod types;
pub mod wallet;

pub use chain::address::Address;
pub use chain::ChainParams;
pub use config::{CoinConfig, Config};
pub use error::Error;
pub use fees::FeeProvider;
pub use multiwallet::MultiWallet;
pub use types::*;
pub use wallet::Wallet;
