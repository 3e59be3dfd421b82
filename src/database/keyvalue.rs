// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Sled-backed datastore
//!
//! Durable implementation of the [`Datastore`] traits on one `sled` database
//! with a tree per table. Rows are keyed the same way the in-memory store
//! keys its maps (script address, outpoint, txid, script bytes) and carry
//! JSON values, except for raw transaction bytes which are stored verbatim.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use sled::Tree;

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::secp256k1::SecretKey;
use bitcoin::{OutPoint, Script, Txid};

use serde::{Deserialize, Serialize};

use crate::database::{
    Datastore, KeyStore, StxoStore, TxnStore, UtxoStore, WatchedScriptStore,
};
use crate::error::Error;
use crate::types::*;

#[derive(Serialize, Deserialize)]
struct KeyRow {
    path: KeyPath,
    used: bool,
    /// Raw imported secret bytes; `None` for derived keys
    imported: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct TxnRow {
    value: i64,
    height: i32,
    timestamp: SystemTime,
    watch_only: bool,
    raw: Vec<u8>,
}

pub struct SledKeyStore {
    tree: Tree,
}

impl SledKeyStore {
    fn row(&self, script_address: &[u8]) -> Result<Option<KeyRow>, Error> {
        match self.tree.get(script_address)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn rows(&self) -> impl Iterator<Item = Result<(Vec<u8>, KeyRow), Error>> + '_ {
        self.tree.iter().map(|entry| {
            let (key, value) = entry?;
            let row: KeyRow = serde_json::from_slice(&value)?;
            Ok((key.to_vec(), row))
        })
    }

    fn write(&self, script_address: &[u8], row: &KeyRow) -> Result<(), Error> {
        self.tree
            .insert(script_address, serde_json::to_vec(row)?)?;
        Ok(())
    }
}

impl KeyStore for SledKeyStore {
    fn put(&self, script_address: &[u8], path: KeyPath) -> Result<(), Error> {
        self.write(
            script_address,
            &KeyRow {
                path,
                used: false,
                imported: None,
            },
        )
    }

    fn import_key(&self, script_address: &[u8], key: SecretKey) -> Result<(), Error> {
        self.write(
            script_address,
            &KeyRow {
                path: KeyPath {
                    purpose: KeyPurpose::External,
                    index: -1,
                },
                used: false,
                imported: Some(key[..].to_vec()),
            },
        )
    }

    fn mark_key_as_used(&self, script_address: &[u8]) -> Result<(), Error> {
        let mut row = self.row(script_address)?.ok_or(Error::NotFound)?;
        row.used = true;
        self.write(script_address, &row)
    }

    fn get_last_key_index(&self, purpose: KeyPurpose) -> Result<Option<(i32, bool)>, Error> {
        let mut last: Option<(i32, bool)> = None;
        for entry in self.rows() {
            let (_, row) = entry?;
            if row.path.purpose == purpose
                && row.path.index >= 0
                && last.map_or(true, |(i, _)| row.path.index > i)
            {
                last = Some((row.path.index, row.used));
            }
        }
        Ok(last)
    }

    fn get_path_for_key(&self, script_address: &[u8]) -> Result<KeyPath, Error> {
        match self.row(script_address)? {
            Some(row) if row.path.index >= 0 => Ok(row.path),
            _ => Err(Error::NotFound),
        }
    }

    fn get_key(&self, script_address: &[u8]) -> Result<SecretKey, Error> {
        let row = self.row(script_address)?.ok_or(Error::NotFound)?;
        let bytes = row.imported.ok_or(Error::NotFound)?;
        Ok(SecretKey::from_slice(&bytes)?)
    }

    fn get_imported(&self) -> Result<Vec<SecretKey>, Error> {
        let mut keys = Vec::new();
        for entry in self.rows() {
            let (_, row) = entry?;
            if let Some(bytes) = row.imported {
                keys.push(SecretKey::from_slice(&bytes)?);
            }
        }
        Ok(keys)
    }

    fn get_unused(&self, purpose: KeyPurpose) -> Result<Vec<i32>, Error> {
        let mut indices = Vec::new();
        for entry in self.rows() {
            let (_, row) = entry?;
            if !row.used && row.path.purpose == purpose && row.path.index >= 0 {
                indices.push(row.path.index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    fn get_all(&self) -> Result<Vec<KeyPath>, Error> {
        self.rows().map(|entry| Ok(entry?.1.path)).collect()
    }

    fn get_all_script_addresses(&self) -> Result<Vec<Vec<u8>>, Error> {
        self.rows().map(|entry| Ok(entry?.0)).collect()
    }

    fn has_key(&self, script_address: &[u8]) -> Result<bool, Error> {
        Ok(self.tree.contains_key(script_address)?)
    }

    fn get_lookahead_windows(&self) -> Result<BTreeMap<KeyPurpose, usize>, Error> {
        let rows = self
            .rows()
            .map(|entry| entry.map(|(_, row)| row))
            .collect::<Result<Vec<_>, Error>>()?;
        let mut windows = BTreeMap::new();
        for purpose in [KeyPurpose::External, KeyPurpose::Internal].iter() {
            let last_used = rows
                .iter()
                .filter(|r| r.path.purpose == *purpose && r.used)
                .map(|r| r.path.index)
                .max()
                .unwrap_or(-1);
            let unused_past = rows
                .iter()
                .filter(|r| r.path.purpose == *purpose && !r.used && r.path.index > last_used)
                .count();
            windows.insert(*purpose, unused_past);
        }
        Ok(windows)
    }
}

pub struct SledUtxoStore {
    tree: Tree,
}

impl UtxoStore for SledUtxoStore {
    fn put(&self, utxo: Utxo) -> Result<(), Error> {
        self.tree
            .insert(serialize(&utxo.outpoint), serde_json::to_vec(&utxo)?)?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Utxo>, Error> {
        self.tree
            .iter()
            .map(|entry| {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn delete(&self, outpoint: &OutPoint) -> Result<(), Error> {
        self.tree.remove(serialize(outpoint))?;
        Ok(())
    }
}

pub struct SledStxoStore {
    tree: Tree,
}

impl StxoStore for SledStxoStore {
    fn put(&self, stxo: Stxo) -> Result<(), Error> {
        self.tree
            .insert(serialize(&stxo.utxo.outpoint), serde_json::to_vec(&stxo)?)?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Stxo>, Error> {
        self.tree
            .iter()
            .map(|entry| {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn delete(&self, outpoint: &OutPoint) -> Result<(), Error> {
        self.tree.remove(serialize(outpoint))?;
        Ok(())
    }
}

pub struct SledTxnStore {
    tree: Tree,
}

impl SledTxnStore {
    fn row(&self, txid: &Txid) -> Result<TxnRow, Error> {
        let bytes = self.tree.get(serialize(txid))?.ok_or(Error::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn to_txn(txid: Txid, row: TxnRow) -> Txn {
        Txn {
            txid,
            raw: row.raw,
            value: row.value,
            height: row.height,
            timestamp: row.timestamp,
            watch_only: row.watch_only,
        }
    }
}

impl TxnStore for SledTxnStore {
    fn put(
        &self,
        raw: Vec<u8>,
        txid: Txid,
        value: i64,
        height: i32,
        timestamp: SystemTime,
        watch_only: bool,
    ) -> Result<(), Error> {
        let row = TxnRow {
            value,
            height,
            timestamp,
            watch_only,
            raw,
        };
        self.tree
            .insert(serialize(&txid), serde_json::to_vec(&row)?)?;
        Ok(())
    }

    fn get(&self, txid: &Txid) -> Result<Txn, Error> {
        Ok(Self::to_txn(*txid, self.row(txid)?))
    }

    fn get_all(&self, include_watch_only: bool) -> Result<Vec<Txn>, Error> {
        let mut txns = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let row: TxnRow = serde_json::from_slice(&value)?;
            if !include_watch_only && row.watch_only {
                continue;
            }
            let txid: Txid = deserialize(&key)?;
            txns.push(Self::to_txn(txid, row));
        }
        Ok(txns)
    }

    fn update_height(&self, txid: &Txid, height: i32) -> Result<(), Error> {
        let mut row = self.row(txid)?;
        row.height = height;
        self.tree
            .insert(serialize(txid), serde_json::to_vec(&row)?)?;
        Ok(())
    }

    fn delete(&self, txid: &Txid) -> Result<(), Error> {
        self.tree.remove(serialize(txid))?;
        Ok(())
    }
}

pub struct SledWatchedScriptStore {
    tree: Tree,
}

impl WatchedScriptStore for SledWatchedScriptStore {
    fn put(&self, script: Script) -> Result<(), Error> {
        self.tree.insert(script.to_bytes(), vec![])?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<Script>, Error> {
        self.tree
            .iter()
            .map(|entry| {
                let (key, _) = entry?;
                Ok(Script::from(key.to_vec()))
            })
            .collect()
    }

    fn delete(&self, script: &Script) -> Result<(), Error> {
        self.tree.remove(script.to_bytes())?;
        Ok(())
    }
}

/// All five tables on one sled database
pub struct SledDatastore {
    keys: SledKeyStore,
    utxos: SledUtxoStore,
    stxos: SledStxoStore,
    txns: SledTxnStore,
    watched_scripts: SledWatchedScriptStore,
}

impl SledDatastore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SledDatastore, Error> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Split one database into the wallet's trees
    pub fn from_db(db: &sled::Db) -> Result<SledDatastore, Error> {
        Ok(SledDatastore {
            keys: SledKeyStore {
                tree: db.open_tree("keys")?,
            },
            utxos: SledUtxoStore {
                tree: db.open_tree("utxos")?,
            },
            stxos: SledStxoStore {
                tree: db.open_tree("stxos")?,
            },
            txns: SledTxnStore {
                tree: db.open_tree("txns")?,
            },
            watched_scripts: SledWatchedScriptStore {
                tree: db.open_tree("watched_scripts")?,
            },
        })
    }
}

impl Datastore for SledDatastore {
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::test::*;

    fn temporary() -> SledDatastore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledDatastore::from_db(&db).unwrap()
    }

    #[test]
    fn test_sled_keys() {
        test_keys(temporary());
    }

    #[test]
    fn test_sled_imported_key() {
        test_imported_key(temporary());
    }

    #[test]
    fn test_sled_lookahead_windows() {
        test_lookahead_windows(temporary());
    }

    #[test]
    fn test_sled_utxos() {
        test_utxos(temporary());
    }

    #[test]
    fn test_sled_txns() {
        test_txns(temporary());
    }

    #[test]
    fn test_sled_watch_only_txns() {
        test_watch_only_txns(temporary());
    }

    #[test]
    fn test_sled_watched_scripts() {
        test_watched_scripts(temporary());
    }
}
