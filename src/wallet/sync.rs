// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wallet synchronization
//!
//! The service reconciles the indexer's authoritative view into the local
//! datastore: on start and on every new-block event it pulls UTXOs and
//! transactions for all stored addresses, upserts what the indexer reports
//! and deletes what it stopped reporting. Transaction pushes from the
//! websocket take the cheap single-transaction path. Both paths serialize
//! on one lock so partial reconciliations never interleave.
//!
//! Sync errors are logged and absorbed; the next block tick retries.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bitcoin::hashes::hex::FromHex;
use bitcoin::{OutPoint, Script, Transaction, TxIn, TxOut, Txid};

use log::{debug, error, info};
use tokio::sync::watch;

use crate::chain::{serialize, Address, ChainParams};
use crate::client::models;
use crate::client::{ChainClient, ClientPool};
use crate::database::Datastore;
use crate::error::Error;
use crate::keys::KeyManager;
use crate::types::*;

/// Recursion bound for the ancestor-confirmation walk
const MAX_ANCESTOR_DEPTH: usize = 100;

/// An address the wallet queries the indexer for
#[derive(Debug, Clone)]
pub(crate) struct StoredAddress {
    pub address: Address,
    pub watch_only: bool,
}

pub struct WalletService {
    db: Arc<dyn Datastore>,
    km: Arc<KeyManager>,
    client: Arc<ClientPool>,
    params: &'static ChainParams,
    chain_height: AtomicI32,
    best_hash: Mutex<Option<String>>,
    listeners: Mutex<Vec<TxListener>>,
    /// Serializes full reconciliation against the single-transaction path
    reconcile: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl WalletService {
    pub fn new(
        db: Arc<dyn Datastore>,
        km: Arc<KeyManager>,
        client: Arc<ClientPool>,
        params: &'static ChainParams,
    ) -> WalletService {
        let (shutdown, _) = watch::channel(false);
        WalletService {
            db,
            km,
            client,
            params,
            chain_height: AtomicI32::new(0),
            best_hash: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            reconcile: tokio::sync::Mutex::new(()),
            shutdown,
        }
    }

    /// Subscribe stored addresses, reconcile once, then follow the stream
    pub fn start(self: &Arc<Self>) {
        info!("starting {} wallet service", self.params.coin);
        let service = self.clone();
        tokio::spawn(async move {
            for address in service.collect_stored_addresses().keys() {
                service.client.listen_address(address).await;
            }
            service.update_state().await;

            let mut blocks = match service.client.take_block_channel() {
                Some(rx) => rx,
                None => return,
            };
            let mut txs = match service.client.take_tx_channel() {
                Some(rx) => rx,
                None => return,
            };
            let mut shutdown = service.shutdown.subscribe();
            loop {
                tokio::select! {
                    block = blocks.recv() => match block {
                        Some(block) => {
                            debug!("{} block event {}", service.params.coin, block.hash);
                            service.update_state().await;
                        }
                        None => break,
                    },
                    tx = txs.recv() => match tx {
                        Some(tx) => service.process_incoming_tx(tx).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("{} wallet service stopped", service.params.coin);
        });
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn add_transaction_listener(&self, listener: TxListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn chain_height(&self) -> i32 {
        self.chain_height.load(Ordering::SeqCst)
    }

    /// Chain tip as (height, best block hash)
    pub fn chain_tip(&self) -> (i32, String) {
        let hash = self.best_hash.lock().unwrap().clone().unwrap_or_default();
        (self.chain_height(), hash)
    }

    /// (confirmations, height) of a stored transaction
    pub fn get_confirmations(&self, txid: &Txid) -> Result<(u32, u32), Error> {
        let txn = self.db.txns().get(txid)?;
        if txn.height <= 0 {
            return Ok((0, 0));
        }
        let tip = self.chain_height();
        Ok(((tip - txn.height + 1).max(0) as u32, txn.height as u32))
    }

    /// Full reconciliation against the indexer
    pub async fn update_state(&self) {
        let _guard = self.reconcile.lock().await;
        debug!("querying {} chain state", self.params.coin);

        match self.client.get_info().await {
            Ok(info) => {
                debug!("{} chain height: {}", self.params.coin, info.blocks);
                self.chain_height.store(info.blocks, Ordering::SeqCst);
            }
            Err(e) => error!("error querying {} info: {}", self.params.coin, e),
        }
        match self.client.get_best_block().await {
            Ok(block) => *self.best_hash.lock().unwrap() = Some(block.hash),
            Err(e) => debug!("error querying {} best block: {}", self.params.coin, e),
        }

        let addrs = self.collect_stored_addresses();
        let query: Vec<String> = addrs.keys().cloned().collect();
        if query.is_empty() {
            return;
        }
        tokio::join!(self.sync_utxos(&query, &addrs), self.sync_txs(&query, &addrs));
    }

    /// The cheap path for a single pushed transaction
    pub async fn process_incoming_tx(&self, tx: models::Transaction) {
        let _guard = self.reconcile.lock().await;
        let addrs = self.collect_stored_addresses();
        if let Err(e) = self.save_single_tx(&tx, &addrs) {
            error!("error saving incoming {} tx {}: {}", self.params.coin, tx.txid, e);
        }
    }

    /// Union of key-manager addresses and watched-script addresses, keyed by
    /// their indexer string form
    pub(crate) fn collect_stored_addresses(&self) -> HashMap<String, StoredAddress> {
        let mut addrs = HashMap::new();

        match self.db.keys().get_all_script_addresses() {
            Ok(script_addresses) => {
                for script_address in script_addresses {
                    if script_address.len() != 20 {
                        continue;
                    }
                    let mut hash = [0u8; 20];
                    hash.copy_from_slice(&script_address);
                    let address = Address::from_script_address(hash, self.params);
                    addrs.insert(
                        address.to_string(),
                        StoredAddress {
                            address,
                            watch_only: false,
                        },
                    );
                }
            }
            Err(e) => error!("error loading {} keys: {}", self.params.coin, e),
        }

        match self.db.watched_scripts().get_all() {
            Ok(scripts) => {
                for script in scripts {
                    // watched scripts are redeem scripts; the chain pays
                    // their P2SH wrapper
                    let address = Address::p2sh(&script, self.params);
                    addrs.insert(
                        address.to_string(),
                        StoredAddress {
                            address,
                            watch_only: true,
                        },
                    );
                }
            }
            Err(e) => error!("error loading {} watched scripts: {}", self.params.coin, e),
        }

        addrs
    }

    async fn sync_utxos(&self, query: &[String], addrs: &HashMap<String, StoredAddress>) {
        debug!("querying for {} utxos", self.params.coin);
        match self.client.get_utxos(query).await {
            Ok(utxos) => {
                debug!("downloaded {} {} utxos", utxos.len(), self.params.coin);
                self.save_utxos(utxos, addrs);
            }
            Err(e) => error!("error downloading {} utxos: {}", self.params.coin, e),
        }
    }

    fn save_utxos(&self, remote: Vec<models::Utxo>, addrs: &HashMap<String, StoredAddress>) {
        let current = match self.db.utxos().get_all() {
            Ok(current) => current,
            Err(e) => {
                error!("error loading {} utxos: {}", self.params.coin, e);
                return;
            }
        };
        let chain_height = self.chain_height();

        let mut seen = HashSet::new();
        for utxo in remote {
            let txid = match Txid::from_hex(&utxo.txid) {
                Ok(txid) => txid,
                Err(e) => {
                    error!("error parsing {} utxo txid: {}", self.params.coin, e);
                    continue;
                }
            };
            let script_bytes = match Vec::<u8>::from_hex(&utxo.script_pub_key) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("error parsing {} utxo script: {}", self.params.coin, e);
                    continue;
                }
            };
            let watch_only = addrs
                .get(&utxo.address)
                .map(|sa| sa.watch_only)
                .unwrap_or(false);
            let at_height = if utxo.confirmations > 0 {
                chain_height - (utxo.confirmations - 1)
            } else {
                0
            };

            let outpoint = OutPoint {
                txid,
                vout: utxo.vout,
            };
            seen.insert(outpoint);
            let record = Utxo {
                outpoint,
                value: utxo.value_sats().max(0) as u64,
                script_pubkey: Script::from(script_bytes),
                at_height,
                watch_only,
            };
            if let Err(e) = self.db.utxos().put(record) {
                error!("error storing {} utxo: {}", self.params.coin, e);
            }
        }

        // outputs the indexer stopped reporting were spent or reorged away
        for stale in current {
            if !seen.contains(&stale.outpoint) {
                if let Err(e) = self.db.utxos().delete(&stale.outpoint) {
                    error!("error deleting {} utxo: {}", self.params.coin, e);
                    continue;
                }
                self.record_stxo(stale);
            }
        }
    }

    /// Best-effort: pair a reaped UTXO with the stored transaction that
    /// spent it
    fn record_stxo(&self, utxo: Utxo) {
        let txns = match self.db.txns().get_all(true) {
            Ok(txns) => txns,
            Err(_) => return,
        };
        for txn in txns {
            let tx = match serialize::deserialize_tx(self.params, &txn.raw) {
                Ok(tx) => tx,
                Err(_) => continue,
            };
            if tx
                .input
                .iter()
                .any(|input| input.previous_output == utxo.outpoint)
            {
                let stxo = Stxo {
                    utxo,
                    spend_height: txn.height,
                    spend_txid: txn.txid,
                };
                if let Err(e) = self.db.stxos().put(stxo) {
                    debug!("error storing {} stxo: {}", self.params.coin, e);
                }
                return;
            }
        }
    }

    async fn sync_txs(&self, query: &[String], addrs: &HashMap<String, StoredAddress>) {
        debug!("querying for {} transactions", self.params.coin);
        match self.client.get_transactions(query).await {
            Ok(txs) => {
                debug!("downloaded {} {} transactions", txs.len(), self.params.coin);
                self.save_txs(txs, addrs);
            }
            Err(e) => error!("error downloading {} txs: {}", self.params.coin, e),
        }
    }

    fn save_txs(&self, remote: Vec<models::Transaction>, addrs: &HashMap<String, StoredAddress>) {
        let current = match self.db.txns().get_all(true) {
            Ok(current) => current,
            Err(e) => {
                error!("error loading {} txns: {}", self.params.coin, e);
                return;
            }
        };

        let mut seen = HashSet::new();
        for tx in remote {
            match self.save_single_tx(&tx, addrs) {
                Ok(txid) => {
                    seen.insert(txid);
                }
                Err(e) => error!("error saving {} tx {}: {}", self.params.coin, tx.txid, e),
            }
        }

        for stale in current {
            if !seen.contains(&stale.txid) {
                if let Err(e) = self.db.txns().delete(&stale.txid) {
                    error!("error deleting {} txn: {}", self.params.coin, e);
                }
            }
        }
    }

    /// Parse one indexer transaction into canonical bytes, classify it and
    /// upsert. Fires listeners when the transaction is new or moved height.
    fn save_single_tx(
        &self,
        tx: &models::Transaction,
        addrs: &HashMap<String, StoredAddress>,
    ) -> Result<Txid, Error> {
        let txid = Txid::from_hex(&tx.txid)?;

        let mut hits = 0usize;
        let mut value = 0i64;

        let mut inputs = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let prev_txid = match Txid::from_hex(&input.txid) {
                Ok(prev) => prev,
                // coinbase inputs carry no previous txid
                Err(_) => Txid::default(),
            };
            let script_sig = match Vec::<u8>::from_hex(&input.script_sig.hex) {
                Ok(bytes) => Script::from(bytes),
                Err(_) => Script::new(),
            };
            inputs.push(TxIn {
                previous_output: OutPoint {
                    txid: prev_txid,
                    vout: input.vout,
                },
                script_sig,
                sequence: input.sequence,
                witness: vec![],
            });
            if let Some(stored) = addrs.get(&input.addr) {
                if !stored.watch_only {
                    hits += 1;
                    value -= input.value_sats();
                }
            }
        }

        let mut outputs = Vec::with_capacity(tx.outputs.len());
        for output in &tx.outputs {
            let script_pubkey = Script::from(Vec::<u8>::from_hex(&output.script_pub_key.hex)?);
            let sats = output.value.as_sats();
            outputs.push(TxOut {
                value: sats.max(0) as u64,
                script_pubkey,
            });
            let owner = match output.script_pub_key.addresses.first() {
                Some(address) => addrs.get(address),
                None => None,
            };
            if let Some(stored) = owner {
                if !stored.watch_only {
                    hits += 1;
                    value += sats;
                    // money arrived: burn the key and grow the window
                    if let Err(e) = self
                        .km
                        .mark_key_as_used(stored.address.script_address())
                    {
                        debug!("marking {} key used: {}", self.params.coin, e);
                    }
                }
            }
        }

        let parsed = Transaction {
            version: tx.version,
            lock_time: tx.locktime,
            input: inputs,
            output: outputs,
        };
        let height = if tx.confirmations > 0 {
            self.chain_height() - (tx.confirmations - 1)
        } else {
            0
        };
        let timestamp = if tx.time > 0 {
            SystemTime::UNIX_EPOCH + Duration::from_secs(tx.time as u64)
        } else {
            SystemTime::now()
        };

        match self.db.txns().get(&txid) {
            Err(Error::NotFound) => {
                let raw = serialize::serialize_tx(self.params, &parsed);
                self.db
                    .txns()
                    .put(raw, txid, value, height, timestamp, hits == 0)?;
                self.fire_listeners(&txid);
            }
            Ok(existing) => {
                if existing.height != height {
                    // never touch the stored bytes, only the height moves
                    self.db.txns().update_height(&txid, height)?;
                    self.fire_listeners(&txid);
                }
            }
            Err(e) => return Err(e),
        }

        Ok(txid)
    }

    fn fire_listeners(&self, txid: &Txid) {
        let txn = match self.db.txns().get(txid) {
            Ok(txn) => txn,
            Err(_) => return,
        };
        for listener in self.listeners.lock().unwrap().iter() {
            listener(&txn);
        }
    }
}

/// Split the wallet's UTXO value into confirmed and unconfirmed.
///
/// A UTXO at height zero still counts as confirmed when every ancestor it
/// draws from is itself confirmed; this is what makes freshly created change
/// spendable-looking the moment its funding parent confirms.
pub fn calc_balance(params: &'static ChainParams, utxos: &[Utxo], txns: &[Txn]) -> (i64, i64) {
    let by_id: HashMap<Txid, &Txn> = txns.iter().map(|t| (t.txid, t)).collect();

    fn confirmed(
        params: &'static ChainParams,
        txid: &Txid,
        by_id: &HashMap<Txid, &Txn>,
        depth: usize,
    ) -> bool {
        if depth >= MAX_ANCESTOR_DEPTH {
            return false;
        }
        let txn = match by_id.get(txid) {
            Some(txn) => txn,
            None => return false,
        };
        if txn.height > 0 {
            return true;
        }
        let tx = match serialize::deserialize_tx(params, &txn.raw) {
            Ok(tx) => tx,
            Err(_) => return false,
        };
        tx.input
            .iter()
            .all(|input| confirmed(params, &input.previous_output.txid, by_id, depth + 1))
    }

    let mut confirmed_total = 0i64;
    let mut unconfirmed_total = 0i64;
    for utxo in utxos {
        if utxo.watch_only {
            continue;
        }
        let value = utxo.value as i64;
        if utxo.at_height > 0 || confirmed(params, &utxo.outpoint.txid, &by_id, 0) {
            confirmed_total += value;
        } else {
            unconfirmed_total += value;
        }
    }
    (confirmed_total, unconfirmed_total)
}
