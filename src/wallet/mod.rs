// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Per-coin wallet
//!
//! A [`Wallet`] owns everything one coin needs: the key manager, a handle to
//! the coin's datastore, the rotating client pool, the sync service and the
//! fee provider. Construction derives the master key from the BIP39
//! mnemonic and fills the initial lookahead windows; [`Wallet::start`]
//! connects the pool and hands the stream to the sync service.

use std::io::Write;
use std::sync::Arc;

use bip39::{Language, Mnemonic, Seed};
use bitcoin::util::bip32::{ExtendedPrivKey, ExtendedPubKey};
use bitcoin::{Network, Script, Txid};

use crate::chain::{Address, ChainParams, SECP};
use crate::client::{ChainClient, ClientPool};
use crate::config::CoinConfig;
use crate::database::Datastore;
use crate::error::Error;
use crate::fees::FeeProvider;
use crate::keys::KeyManager;
use crate::types::*;

pub mod coin_selection;
pub mod sync;
pub mod tx_builder;

use sync::WalletService;

pub struct Wallet {
    pub(crate) params: &'static ChainParams,
    pub(crate) db: Arc<dyn Datastore>,
    pub(crate) km: Arc<KeyManager>,
    pub(crate) client: Arc<ClientPool>,
    pub(crate) service: Arc<WalletService>,
    pub(crate) fees: FeeProvider,
    master_key: ExtendedPrivKey,
    master_pubkey: ExtendedPubKey,
}

impl Wallet {
    /// Build a wallet for one coin from its config and the shared mnemonic
    pub fn new(
        config: CoinConfig,
        mnemonic: &str,
        network: Network,
        proxy: Option<String>,
    ) -> Result<Wallet, Error> {
        let mnemonic = Mnemonic::from_phrase(mnemonic, Language::English)
            .map_err(|e| Error::Mnemonic(e.to_string()))?;
        let seed = Seed::new(&mnemonic, "");
        let master_key = ExtendedPrivKey::new_master(network, seed.as_bytes())?;
        let master_pubkey = ExtendedPubKey::from_private(&SECP, &master_key);

        let params = ChainParams::for_coin(config.coin_type, network);
        let km = Arc::new(KeyManager::new(config.db.clone(), params, &master_key)?);
        let client = Arc::new(ClientPool::new(config.client_apis, proxy)?);
        let service = Arc::new(WalletService::new(
            config.db.clone(),
            km.clone(),
            client.clone(),
            params,
        ));
        let fees = FeeProvider::new(
            config.low_fee,
            config.medium_fee,
            config.high_fee,
            config.max_fee,
            config.fee_api,
            config.exchange_rates,
        );

        Ok(Wallet {
            params,
            db: config.db,
            km,
            client,
            service,
            fees,
            master_key,
            master_pubkey,
        })
    }

    /// Connect the client pool and start the sync service
    pub async fn start(&self) -> Result<(), Error> {
        self.client.start().await?;
        self.service.start();
        Ok(())
    }

    /// Cascade shutdown to the sync service and the pool
    pub async fn close(&self) {
        self.service.stop();
        self.client.close().await;
    }

    pub fn params(&self) -> &'static ChainParams {
        self.params
    }

    pub fn coin_type(&self) -> CoinType {
        self.params.coin
    }

    pub fn currency_code(&self) -> &'static str {
        self.params.currency_code
    }

    /// Whether an amount is below the coin's dust line for a standard output
    pub fn is_dust(&self, amount: i64) -> bool {
        self.params.is_dust(amount, 25)
    }

    pub fn master_private_key(&self) -> &ExtendedPrivKey {
        &self.master_key
    }

    pub fn master_public_key(&self) -> &ExtendedPubKey {
        &self.master_pubkey
    }

    /// The lowest-index unused address for a purpose
    pub fn current_address(&self, purpose: KeyPurpose) -> Result<Address, Error> {
        self.km.current_address(purpose)
    }

    /// Hand out a fresh address, marking its key used
    pub fn new_address(&self, purpose: KeyPurpose) -> Result<Address, Error> {
        self.km.new_address(purpose)
    }

    pub fn decode_address(&self, address: &str) -> Result<Address, Error> {
        Address::decode(address, self.params)
    }

    pub fn script_to_address(&self, script: &Script) -> Result<Address, Error> {
        Address::from_script(script, self.params)
    }

    pub fn address_to_script(&self, address: &Address) -> Script {
        address.script_pubkey()
    }

    pub fn has_key(&self, address: &Address) -> bool {
        self.km.has_key(address.script_address()).unwrap_or(false)
    }

    /// Import a loose private key and subscribe its address
    pub async fn import_key(&self, key: bitcoin::PrivateKey) -> Result<Address, Error> {
        let address = self.km.import_key(key)?;
        self.client.listen_address(&address.to_string()).await;
        Ok(address)
    }

    /// Private key backing an address, derived or imported
    pub fn get_key(&self, address: &Address) -> Result<bitcoin::PrivateKey, Error> {
        self.km.get_key_for_script(address.script_address())
    }

    /// Every address the wallet has keys for
    pub fn list_addresses(&self) -> Result<Vec<Address>, Error> {
        let mut addresses = Vec::new();
        for script_address in self.db.keys().get_all_script_addresses()? {
            if script_address.len() != 20 {
                continue;
            }
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script_address);
            addresses.push(Address::from_script_address(hash, self.params));
        }
        Ok(addresses)
    }

    /// Every stored key path, imported keys included
    pub fn list_keys(&self) -> Result<Vec<KeyPath>, Error> {
        self.db.keys().get_all()
    }

    /// (confirmed, unconfirmed) balance over non-watch-only UTXOs
    pub fn balance(&self) -> Result<(i64, i64), Error> {
        let utxos = self.db.utxos().get_all()?;
        let txns = self.db.txns().get_all(true)?;
        Ok(sync::calc_balance(self.params, &utxos, &txns))
    }

    /// All wallet-relevant transactions, watch-only excluded
    pub fn transactions(&self) -> Result<Vec<Txn>, Error> {
        self.db.txns().get_all(false)
    }

    pub fn get_transaction(&self, txid: &Txid) -> Result<Txn, Error> {
        self.db.txns().get(txid)
    }

    /// Chain tip as (height, best block hash)
    pub fn chain_tip(&self) -> (i32, String) {
        self.service.chain_tip()
    }

    pub async fn get_fee_per_byte(&self, level: FeeLevel) -> u64 {
        self.fees.fee_per_byte(level).await
    }

    pub fn get_confirmations(&self, txid: &Txid) -> Result<(u32, u32), Error> {
        self.service.get_confirmations(txid)
    }

    /// Watch a redeem script's P2SH address without owning its keys
    pub async fn add_watched_script(&self, script: Script) -> Result<(), Error> {
        self.db.watched_scripts().put(script.clone())?;
        let address = Address::p2sh(&script, self.params);
        self.client.listen_address(&address.to_string()).await;
        Ok(())
    }

    pub fn add_transaction_listener(&self, listener: TxListener) {
        self.service.add_transaction_listener(listener);
    }

    /// Re-run a full reconciliation against the indexer
    pub async fn resync_blockchain(&self) {
        self.service.update_state().await;
    }

    /// Write a human-readable dump of the transaction and UTXO tables
    pub fn dump_tables(&self, writer: &mut dyn Write) -> Result<(), Error> {
        let io_err = |e: std::io::Error| Error::Protocol(format!("writing table dump: {}", e));

        writeln!(writer, "Transactions-----").map_err(io_err)?;
        for txn in self.db.txns().get_all(true)? {
            writeln!(
                writer,
                "Hash: {}, Height: {}, Value: {}, WatchOnly: {}",
                txn.txid, txn.height, txn.value, txn.watch_only
            )
            .map_err(io_err)?;
        }
        writeln!(writer, "\nUtxos-----").map_err(io_err)?;
        for utxo in self.db.utxos().get_all()? {
            writeln!(
                writer,
                "Hash: {}, Index: {}, Height: {}, Value: {}, WatchOnly: {}",
                utxo.outpoint.txid,
                utxo.outpoint.vout,
                utxo.at_height,
                utxo.value,
                utxo.watch_only
            )
            .map_err(io_err)?;
        }
        Ok(())
    }
}

impl Drop for Wallet {
    fn drop(&mut self) {
        self.service.stop();
    }
}
