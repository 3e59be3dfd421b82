// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Chain-indexer clients
//!
//! [`InsightClient`] speaks the Insight/BlockBook JSON surface of a single
//! endpoint over HTTP plus a websocket for push notifications.
//! [`ClientPool`] exposes the same interface across several endpoints with
//! health-tracked rotation, so a single endpoint failure never reaches the
//! wallet.

pub mod insight;
pub mod models;
pub mod pool;

pub use insight::InsightClient;
pub use pool::{ClientPool, PoolState};

use crate::error::Error;

/// The indexer operations the wallet consumes.
///
/// Implemented by the single-endpoint client and, transparently, by the
/// rotating pool.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain tip height, network id and relay fee
    async fn get_info(&self) -> Result<models::Info, Error>;

    /// The most recently mined block
    async fn get_best_block(&self) -> Result<models::Block, Error>;

    /// Canonical decoded view of one transaction
    async fn get_transaction(&self, txid: &str) -> Result<models::Transaction, Error>;

    /// Raw consensus bytes of one transaction
    async fn get_raw_transaction(&self, txid: &str) -> Result<Vec<u8>, Error>;

    /// Every transaction touching the given addresses, fully paged
    async fn get_transactions(&self, addrs: &[String])
        -> Result<Vec<models::Transaction>, Error>;

    /// Spendable outputs for the given addresses
    async fn get_utxos(&self, addrs: &[String]) -> Result<Vec<models::Utxo>, Error>;

    /// Submit raw bytes; returns the txid the server reports
    async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, Error>;

    /// Fee estimate for confirmation within `n_blocks`, in satoshis per byte
    async fn estimate_fee(&self, n_blocks: u32) -> Result<u64, Error>;

    /// Subscribe to push events for an address
    async fn listen_address(&self, addr: &str);
}
