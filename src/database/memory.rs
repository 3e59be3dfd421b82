// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! In-memory datastore
//!
//! Reference implementation of the [`Datastore`] traits. Rows live in
//! `BTreeMap`s behind `RwLock`s, which makes every mutation atomic per-row
//! exactly as the interface demands. Useful for tests and as the default
//! backing store.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::SystemTime;

use bitcoin::consensus::encode::serialize;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{OutPoint, Script, Txid};

use crate::database::{
    Datastore, KeyStore, StxoStore, TxnStore, UtxoStore, WatchedScriptStore,
};
use crate::error::Error;
use crate::types::*;

#[derive(Debug, Clone)]
struct KeyEntry {
    path: KeyPath,
    used: bool,
    imported: Option<SecretKey>,
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: RwLock<BTreeMap<Vec<u8>, KeyEntry>>,
}

impl KeyStore for MemoryKeyStore {
    fn put(&self, script_address: &[u8], path: KeyPath) -> Result<(), Error> {
        self.keys.write().unwrap().insert(
            script_address.to_vec(),
            KeyEntry {
                path,
                used: false,
                imported: None,
            },
        );
        Ok(())
    }

    fn import_key(&self, script_address: &[u8], key: SecretKey) -> Result<(), Error> {
        self.keys.write().unwrap().insert(
            script_address.to_vec(),
            KeyEntry {
                path: KeyPath {
                    purpose: KeyPurpose::External,
                    index: -1,
                },
                used: false,
                imported: Some(key),
            },
        );
        Ok(())
    }

    fn mark_key_as_used(&self, script_address: &[u8]) -> Result<(), Error> {
        let mut keys = self.keys.write().unwrap();
        let entry = keys.get_mut(script_address).ok_or(Error::NotFound)?;
        entry.used = true;
        Ok(())
    }

    fn get_last_key_index(&self, purpose: KeyPurpose) -> Result<Option<(i32, bool)>, Error> {
        let keys = self.keys.read().unwrap();
        let mut last: Option<(i32, bool)> = None;
        for entry in keys.values() {
            if entry.path.purpose == purpose
                && entry.path.index >= 0
                && last.map_or(true, |(i, _)| entry.path.index > i)
            {
                last = Some((entry.path.index, entry.used));
            }
        }
        Ok(last)
    }

    fn get_path_for_key(&self, script_address: &[u8]) -> Result<KeyPath, Error> {
        let keys = self.keys.read().unwrap();
        match keys.get(script_address) {
            Some(entry) if entry.path.index >= 0 => Ok(entry.path),
            _ => Err(Error::NotFound),
        }
    }

    fn get_key(&self, script_address: &[u8]) -> Result<SecretKey, Error> {
        let keys = self.keys.read().unwrap();
        keys.get(script_address)
            .and_then(|entry| entry.imported)
            .ok_or(Error::NotFound)
    }

    fn get_imported(&self) -> Result<Vec<SecretKey>, Error> {
        let keys = self.keys.read().unwrap();
        Ok(keys.values().filter_map(|e| e.imported).collect())
    }

    fn get_unused(&self, purpose: KeyPurpose) -> Result<Vec<i32>, Error> {
        let keys = self.keys.read().unwrap();
        let mut indices: Vec<i32> = keys
            .values()
            .filter(|e| !e.used && e.path.purpose == purpose && e.path.index >= 0)
            .map(|e| e.path.index)
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    fn get_all(&self) -> Result<Vec<KeyPath>, Error> {
        let keys = self.keys.read().unwrap();
        Ok(keys.values().map(|e| e.path).collect())
    }

    fn get_all_script_addresses(&self) -> Result<Vec<Vec<u8>>, Error> {
        let keys = self.keys.read().unwrap();
        Ok(keys.keys().cloned().collect())
    }

    fn has_key(&self, script_address: &[u8]) -> Result<bool, Error> {
        Ok(self.keys.read().unwrap().contains_key(script_address))
    }

    fn get_lookahead_windows(&self) -> Result<BTreeMap<KeyPurpose, usize>, Error> {
        let keys = self.keys.read().unwrap();
        let mut windows = BTreeMap::new();
        for purpose in [KeyPurpose::External, KeyPurpose::Internal].iter() {
            let last_used = keys
                .values()
                .filter(|e| e.path.purpose == *purpose && e.used)
                .map(|e| e.path.index)
                .max()
                .unwrap_or(-1);
            let unused_past = keys
                .values()
                .filter(|e| {
                    e.path.purpose == *purpose && !e.used && e.path.index > last_used
                })
                .count();
            windows.insert(*purpose, unused_past);
        }
        Ok(windows)
    }
}

#[derive(Debug, Default)]
pub struct MemoryUtxoStore {
    utxos: RwLock<BTreeMap<Vec<u8>, Utxo>>,
}

impl UtxoStore for MemoryUtxoStore {
    fn put(&self, utxo: Utxo) -> Result<(), Error> {
        self.utxos
            .write()
            .unwrap()
            .insert(serialize(&utxo.outpoint), utxo);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Utxo>, Error> {
        Ok(self.utxos.read().unwrap().values().cloned().collect())
    }

    fn delete(&self, outpoint: &OutPoint) -> Result<(), Error> {
        self.utxos.write().unwrap().remove(&serialize(outpoint));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStxoStore {
    stxos: RwLock<BTreeMap<Vec<u8>, Stxo>>,
}

impl StxoStore for MemoryStxoStore {
    fn put(&self, stxo: Stxo) -> Result<(), Error> {
        self.stxos
            .write()
            .unwrap()
            .insert(serialize(&stxo.utxo.outpoint), stxo);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Stxo>, Error> {
        Ok(self.stxos.read().unwrap().values().cloned().collect())
    }

    fn delete(&self, outpoint: &OutPoint) -> Result<(), Error> {
        self.stxos.write().unwrap().remove(&serialize(outpoint));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTxnStore {
    txns: RwLock<BTreeMap<Txid, Txn>>,
}

impl TxnStore for MemoryTxnStore {
    fn put(
        &self,
        raw: Vec<u8>,
        txid: Txid,
        value: i64,
        height: i32,
        timestamp: SystemTime,
        watch_only: bool,
    ) -> Result<(), Error> {
        self.txns.write().unwrap().insert(
            txid,
            Txn {
                txid,
                raw,
                value,
                height,
                timestamp,
                watch_only,
            },
        );
        Ok(())
    }

    fn get(&self, txid: &Txid) -> Result<Txn, Error> {
        self.txns
            .read()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn get_all(&self, include_watch_only: bool) -> Result<Vec<Txn>, Error> {
        Ok(self
            .txns
            .read()
            .unwrap()
            .values()
            .filter(|t| include_watch_only || !t.watch_only)
            .cloned()
            .collect())
    }

    fn update_height(&self, txid: &Txid, height: i32) -> Result<(), Error> {
        let mut txns = self.txns.write().unwrap();
        let txn = txns.get_mut(txid).ok_or(Error::NotFound)?;
        txn.height = height;
        Ok(())
    }

    fn delete(&self, txid: &Txid) -> Result<(), Error> {
        self.txns.write().unwrap().remove(txid);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryWatchedScriptStore {
    scripts: RwLock<BTreeMap<Vec<u8>, Script>>,
}

impl WatchedScriptStore for MemoryWatchedScriptStore {
    fn put(&self, script: Script) -> Result<(), Error> {
        self.scripts
            .write()
            .unwrap()
            .insert(script.to_bytes(), script);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Script>, Error> {
        Ok(self.scripts.read().unwrap().values().cloned().collect())
    }

    fn delete(&self, script: &Script) -> Result<(), Error> {
        self.scripts.write().unwrap().remove(&script.to_bytes());
        Ok(())
    }
}

/// All five tables in memory
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    keys: MemoryKeyStore,
    utxos: MemoryUtxoStore,
    stxos: MemoryStxoStore,
    txns: MemoryTxnStore,
    watched_scripts: MemoryWatchedScriptStore,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Datastore for MemoryDatastore {
    fn keys(&self) -> &dyn KeyStore {
        &self.keys
    }

    fn utxos(&self) -> &dyn UtxoStore {
        &self.utxos
    }

    fn stxos(&self) -> &dyn StxoStore {
        &self.stxos
    }

    fn txns(&self) -> &dyn TxnStore {
        &self.txns
    }

    fn watched_scripts(&self) -> &dyn WatchedScriptStore {
        &self.watched_scripts
    }
}
