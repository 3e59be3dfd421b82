// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Datastore interface
//!
//! The wallet persists five typed collections: keys, UTXOs, spent outputs,
//! transactions and watched scripts. Implementations must make every single
//! mutation atomic; the multi-row reconciliation passes in the sync engine
//! deliberately tolerate brief inconsistency between rows.
//!
//! A complete in-memory implementation lives in [`memory`] and backs the
//! default configuration and the test suites.

use std::collections::BTreeMap;
use std::time::SystemTime;

use bitcoin::secp256k1::SecretKey;
use bitcoin::{OutPoint, Script, Txid};

use crate::error::Error;
use crate::types::*;

#[cfg(feature = "key-value-db")]
pub mod keyvalue;
pub mod memory;

#[cfg(feature = "key-value-db")]
pub use keyvalue::SledDatastore;
pub use memory::MemoryDatastore;

/// The keys table: script-address-indexed derived and imported keys
pub trait KeyStore: Send + Sync {
    /// Record a derived key by its canonical script address (hash160)
    fn put(&self, script_address: &[u8], path: KeyPath) -> Result<(), Error>;

    /// Record an imported key; stored with `index = -1`
    fn import_key(&self, script_address: &[u8], key: SecretKey) -> Result<(), Error>;

    /// Flag a key as having appeared on chain
    fn mark_key_as_used(&self, script_address: &[u8]) -> Result<(), Error>;

    /// Highest derived index and whether that key is used
    fn get_last_key_index(&self, purpose: KeyPurpose) -> Result<Option<(i32, bool)>, Error>;

    /// Path for a derived key, `Error::NotFound` for imported or unknown keys
    fn get_path_for_key(&self, script_address: &[u8]) -> Result<KeyPath, Error>;

    /// Raw private key for an imported script address
    fn get_key(&self, script_address: &[u8]) -> Result<SecretKey, Error>;

    /// All imported private keys
    fn get_imported(&self) -> Result<Vec<SecretKey>, Error>;

    /// Ascending indices of unused derived keys for a purpose
    fn get_unused(&self, purpose: KeyPurpose) -> Result<Vec<i32>, Error>;

    /// Every stored path, imported keys included
    fn get_all(&self) -> Result<Vec<KeyPath>, Error>;

    /// Script addresses of every stored key
    fn get_all_script_addresses(&self) -> Result<Vec<Vec<u8>>, Error>;

    /// Whether the script address belongs to a stored key
    fn has_key(&self, script_address: &[u8]) -> Result<bool, Error>;

    /// Count of unused keys past the highest used index, per purpose
    fn get_lookahead_windows(&self) -> Result<BTreeMap<KeyPurpose, usize>, Error>;
}

/// The UTXO table, keyed by outpoint
pub trait UtxoStore: Send + Sync {
    fn put(&self, utxo: Utxo) -> Result<(), Error>;
    fn get_all(&self) -> Result<Vec<Utxo>, Error>;
    fn delete(&self, outpoint: &OutPoint) -> Result<(), Error>;
}

/// The spent-output table, keyed by the spent outpoint
pub trait StxoStore: Send + Sync {
    fn put(&self, stxo: Stxo) -> Result<(), Error>;
    fn get_all(&self) -> Result<Vec<Stxo>, Error>;
    fn delete(&self, outpoint: &OutPoint) -> Result<(), Error>;
}

/// The transaction table, keyed by txid.
///
/// The raw bytes are write-once: `update_height` is the only permitted
/// mutation after insert.
pub trait TxnStore: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn put(
        &self,
        raw: Vec<u8>,
        txid: Txid,
        value: i64,
        height: i32,
        timestamp: SystemTime,
        watch_only: bool,
    ) -> Result<(), Error>;
    fn get(&self, txid: &Txid) -> Result<Txn, Error>;
    fn get_all(&self, include_watch_only: bool) -> Result<Vec<Txn>, Error>;
    fn update_height(&self, txid: &Txid, height: i32) -> Result<(), Error>;
    fn delete(&self, txid: &Txid) -> Result<(), Error>;
}

/// Output scripts the wallet watches without owning a key
pub trait WatchedScriptStore: Send + Sync {
    fn put(&self, script: Script) -> Result<(), Error>;
    fn get_all(&self) -> Result<Vec<Script>, Error>;
    fn delete(&self, script: &Script) -> Result<(), Error>;
}

/// One datastore per configured coin
pub trait Datastore: Send + Sync {
    fn keys(&self) -> &dyn KeyStore;
    fn utxos(&self) -> &dyn UtxoStore;
    fn stxos(&self) -> &dyn StxoStore;
    fn txns(&self) -> &dyn TxnStore;
    fn watched_scripts(&self) -> &dyn WatchedScriptStore;
}

#[cfg(test)]
pub mod test {
    use std::str::FromStr;

    use bitcoin::hashes::hex::FromHex;

    use super::*;

    pub fn test_keys<D: Datastore>(db: D) {
        let addr = Vec::<u8>::from_hex("02306a7c23f3e8010de41e9e591348bb83f11daa").unwrap();
        let path = KeyPath {
            purpose: KeyPurpose::External,
            index: 0,
        };

        db.keys().put(&addr, path).unwrap();
        assert!(db.keys().has_key(&addr).unwrap());
        assert_eq!(db.keys().get_path_for_key(&addr).unwrap(), path);
        assert_eq!(
            db.keys().get_last_key_index(KeyPurpose::External).unwrap(),
            Some((0, false))
        );
        assert_eq!(
            db.keys().get_unused(KeyPurpose::External).unwrap(),
            vec![0]
        );

        db.keys().mark_key_as_used(&addr).unwrap();
        assert_eq!(
            db.keys().get_last_key_index(KeyPurpose::External).unwrap(),
            Some((0, true))
        );
        assert!(db.keys().get_unused(KeyPurpose::External).unwrap().is_empty());
    }

    pub fn test_imported_key<D: Datastore>(db: D) {
        let addr = Vec::<u8>::from_hex("89abcdefabbaabbaabbaabbaabbaabbaabbaabba").unwrap();
        let sk = SecretKey::from_slice(&[0xcd; 32]).unwrap();

        db.keys().import_key(&addr, sk).unwrap();
        assert!(db.keys().has_key(&addr).unwrap());
        assert_eq!(db.keys().get_key(&addr).unwrap(), sk);
        assert_eq!(db.keys().get_imported().unwrap(), vec![sk]);
        // imported keys are invisible to path queries
        assert!(db.keys().get_path_for_key(&addr).is_err());
        assert_eq!(
            db.keys().get_last_key_index(KeyPurpose::External).unwrap(),
            None
        );
    }

    pub fn test_lookahead_windows<D: Datastore>(db: D) {
        for i in 0..5 {
            let mut addr = vec![0u8; 19];
            addr.push(i as u8);
            db.keys()
                .put(
                    &addr,
                    KeyPath {
                        purpose: KeyPurpose::External,
                        index: i,
                    },
                )
                .unwrap();
        }
        db.keys().mark_key_as_used(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1])
            .unwrap();

        let windows = db.keys().get_lookahead_windows().unwrap();
        assert_eq!(windows[&KeyPurpose::External], 3);
        assert_eq!(windows[&KeyPurpose::Internal], 0);
    }

    pub fn test_utxos<D: Datastore>(db: D) {
        let outpoint = OutPoint::from_str(
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456:0",
        )
        .unwrap();
        let utxo = Utxo {
            outpoint,
            value: 133_742,
            script_pubkey: Script::from(
                Vec::<u8>::from_hex("76a91402306a7c23f3e8010de41e9e591348bb83f11daa88ac").unwrap(),
            ),
            at_height: 1000,
            watch_only: false,
        };

        db.utxos().put(utxo.clone()).unwrap();
        assert_eq!(db.utxos().get_all().unwrap(), vec![utxo.clone()]);

        // same outpoint overwrites
        let mut updated = utxo.clone();
        updated.at_height = 1001;
        db.utxos().put(updated.clone()).unwrap();
        assert_eq!(db.utxos().get_all().unwrap(), vec![updated]);

        db.utxos().delete(&outpoint).unwrap();
        assert!(db.utxos().get_all().unwrap().is_empty());
    }

    pub fn test_txns<D: Datastore>(db: D) {
        let raw = Vec::<u8>::from_hex("0100000001a15d57094aa7a21a28cb20b59aab8fc7d1149a3bdbcddba9c622e4f5f6a99ece010000006c493046022100f93bb0e7d8db7bd46e40132d1f8242026e045f03a0efe71bbb8e3f475e970d790221009337cd7f1f929f00cc6ff01f03729b069a7c21b59b1736ddfee5db5946c5da8c0121033b9b137ee87d5a812d6f506efdd37f0affa7ffc310711c06c7f3e097c9447c52ffffffff0100e1f505000000001976a9140389035a9225b3839e2bbf32d826a1e222031fd888ac00000000").unwrap();
        let txid =
            Txid::from_hex("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b")
                .unwrap();
        let now = SystemTime::now();

        db.txns()
            .put(raw.clone(), txid, 1337, 0, now, false)
            .unwrap();

        let txn = db.txns().get(&txid).unwrap();
        assert_eq!(txn.raw, raw);
        assert_eq!(txn.height, 0);

        db.txns().update_height(&txid, 1000).unwrap();
        let txn = db.txns().get(&txid).unwrap();
        assert_eq!(txn.height, 1000);
        // the canonical bytes never move once stored
        assert_eq!(txn.raw, raw);

        assert_eq!(db.txns().get_all(true).unwrap().len(), 1);
        db.txns().delete(&txid).unwrap();
        assert!(db.txns().get(&txid).is_err());
    }

    pub fn test_watch_only_txns<D: Datastore>(db: D) {
        let txid =
            Txid::from_hex("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b")
                .unwrap();
        db.txns()
            .put(vec![0x01], txid, 0, 0, SystemTime::now(), true)
            .unwrap();

        assert_eq!(db.txns().get_all(true).unwrap().len(), 1);
        assert!(db.txns().get_all(false).unwrap().is_empty());
    }

    pub fn test_watched_scripts<D: Datastore>(db: D) {
        let script = Script::from(
            Vec::<u8>::from_hex("a914748284390f9e263a4b766a75d0633c50426eb87587").unwrap(),
        );

        db.watched_scripts().put(script.clone()).unwrap();
        assert_eq!(db.watched_scripts().get_all().unwrap(), vec![script.clone()]);

        db.watched_scripts().delete(&script).unwrap();
        assert!(db.watched_scripts().get_all().unwrap().is_empty());
    }
}
