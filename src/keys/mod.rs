// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! HD key management
//!
//! Keys live on the two BIP44 chains of account 0, derived from the wallet
//! master key at `m/44'/coin'/0'/change/index`. The manager keeps a window
//! of [`LOOKAHEAD_WINDOW`] unused keys persisted past the highest used index
//! on each chain, so a wallet restored from seed can hand the sync engine
//! every address an earlier session could have used.
//!
//! Derived keys are addressed by their canonical script address, the
//! hash160 of the compressed public key. Imported loose keys share that
//! lookup space but are stored with index −1 and never participate in
//! path-based queries.

use std::sync::{Arc, Mutex};

use bitcoin::hashes::{hash160, Hash};
use bitcoin::util::bip32::{ChildNumber, ExtendedPrivKey};
use bitcoin::PrivateKey;

use crate::chain::{Address, ChainParams, SECP};
use crate::database::Datastore;
use crate::error::Error;
use crate::types::{KeyPath, KeyPurpose};

/// Unused keys maintained past the highest used index, per chain
pub const LOOKAHEAD_WINDOW: usize = 20;

pub struct KeyManager {
    db: Arc<dyn Datastore>,
    params: &'static ChainParams,
    /// Chain-level keys for external (0) and internal (1), under m/44'/coin'/0'
    chain_keys: [ExtendedPrivKey; 2],
    /// Serializes lookahead extension and address handout
    handout: Mutex<()>,
}

impl KeyManager {
    /// Derive the account chains and fill the initial lookahead windows
    pub fn new(
        db: Arc<dyn Datastore>,
        params: &'static ChainParams,
        master: &ExtendedPrivKey,
    ) -> Result<KeyManager, Error> {
        let account = master.derive_priv(
            &SECP,
            &[
                ChildNumber::from_hardened_idx(44)?,
                ChildNumber::from_hardened_idx(params.bip44_coin)?,
                ChildNumber::from_hardened_idx(0)?,
            ],
        )?;
        let external = account.ckd_priv(&SECP, ChildNumber::from_normal_idx(0)?)?;
        let internal = account.ckd_priv(&SECP, ChildNumber::from_normal_idx(1)?)?;

        let manager = KeyManager {
            db,
            params,
            chain_keys: [external, internal],
            handout: Mutex::new(()),
        };
        let _guard = manager.handout.lock().unwrap();
        manager.extend_lookahead_locked()?;
        drop(_guard);
        Ok(manager)
    }

    fn chain_key(&self, purpose: KeyPurpose) -> &ExtendedPrivKey {
        &self.chain_keys[purpose as usize]
    }

    fn derive(&self, purpose: KeyPurpose, index: u32) -> Result<PrivateKey, Error> {
        let child = self
            .chain_key(purpose)
            .ckd_priv(&SECP, ChildNumber::from_normal_idx(index)?)?;
        Ok(child.private_key)
    }

    fn script_address_of(&self, key: &PrivateKey) -> [u8; 20] {
        let pubkey = key.public_key(&SECP);
        hash160::Hash::hash(&pubkey.to_bytes()).into_inner()
    }

    /// Derive the key at (purpose, index), persisting it if it is new
    pub fn generate_child_key(&self, purpose: KeyPurpose, index: u32) -> Result<PrivateKey, Error> {
        let key = self.derive(purpose, index)?;
        let script_address = self.script_address_of(&key);
        if !self.db.keys().has_key(&script_address)? {
            self.db.keys().put(
                &script_address,
                KeyPath {
                    purpose,
                    index: index as i32,
                },
            )?;
        }
        Ok(key)
    }

    /// The lowest-index unused address for a purpose
    pub fn current_address(&self, purpose: KeyPurpose) -> Result<Address, Error> {
        let _guard = self.handout.lock().unwrap();
        self.current_address_locked(purpose)
    }

    fn current_address_locked(&self, purpose: KeyPurpose) -> Result<Address, Error> {
        let unused = self.db.keys().get_unused(purpose)?;
        let index = match unused.first() {
            Some(index) => *index as u32,
            None => {
                // every generated key has been used, grow the window
                self.extend_lookahead_locked()?;
                *self
                    .db
                    .keys()
                    .get_unused(purpose)?
                    .first()
                    .ok_or(Error::NotFound)? as u32
            }
        };
        let key = self.derive(purpose, index)?;
        Ok(self.params.key_to_address(&key.public_key(&SECP)))
    }

    /// Hand out the current address and burn it: marks the key used and
    /// extends the lookahead window past it
    pub fn new_address(&self, purpose: KeyPurpose) -> Result<Address, Error> {
        let _guard = self.handout.lock().unwrap();
        let address = self.current_address_locked(purpose)?;
        self.db.keys().mark_key_as_used(address.script_address())?;
        self.extend_lookahead_locked()?;
        Ok(address)
    }

    /// Whether the script address belongs to a derived or imported key
    pub fn has_key(&self, script_address: &[u8]) -> Result<bool, Error> {
        self.db.keys().has_key(script_address)
    }

    /// Private key for a script address, derived or imported
    pub fn get_key_for_script(&self, script_address: &[u8]) -> Result<PrivateKey, Error> {
        match self.db.keys().get_path_for_key(script_address) {
            Ok(path) => self.derive(path.purpose, path.index as u32),
            Err(Error::NotFound) => {
                let secret = self.db.keys().get_key(script_address)?;
                Ok(PrivateKey {
                    compressed: true,
                    network: self.params.network,
                    key: secret,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Store a loose private key under its script address
    pub fn import_key(&self, key: PrivateKey) -> Result<Address, Error> {
        let script_address = self.script_address_of(&key);
        self.db.keys().import_key(&script_address, key.key)?;
        Ok(self.params.key_to_address(&key.public_key(&SECP)))
    }

    /// Flag a key as observed on chain and grow the window behind it
    pub fn mark_key_as_used(&self, script_address: &[u8]) -> Result<(), Error> {
        self.db.keys().mark_key_as_used(script_address)?;
        let _guard = self.handout.lock().unwrap();
        self.extend_lookahead_locked()
    }

    /// Top both windows back up to [`LOOKAHEAD_WINDOW`] unused keys.
    ///
    /// Generated indices always continue the dense range from 0, so the
    /// on-disk key set stays a contiguous prefix per purpose.
    fn extend_lookahead_locked(&self) -> Result<(), Error> {
        for purpose in [KeyPurpose::External, KeyPurpose::Internal].iter() {
            let windows = self.db.keys().get_lookahead_windows()?;
            let unused = windows.get(purpose).copied().unwrap_or(0);
            if unused >= LOOKAHEAD_WINDOW {
                continue;
            }
            let next = self
                .db
                .keys()
                .get_last_key_index(*purpose)?
                .map(|(index, _)| index + 1)
                .unwrap_or(0) as u32;
            for index in next..next + (LOOKAHEAD_WINDOW - unused) as u32 {
                self.generate_child_key(*purpose, index)?;
            }
        }
        Ok(())
    }
}
