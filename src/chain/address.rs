// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Coin-typed addresses
//!
//! An [`Address`] is a script-hash payload plus the chain it encodes for.
//! The 20-byte payload (the "script address") is the canonical identity the
//! key manager and sync engine work with; the string form only matters at
//! the edges (indexer queries, user-supplied destinations).
//!
//! Bitcoin Cash is displayed in legacy base58check and Zcash as transparent
//! t-addresses; the richer CashAddr/unified encodings are out of scope here.

use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::util::base58;
use bitcoin::{PublicKey, Script};

use bech32::{FromBase32, ToBase32, Variant};

use crate::chain::ChainParams;
use crate::error::Error;

/// What the 20-byte hash commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Payload {
    PubkeyHash([u8; 20]),
    ScriptHash([u8; 20]),
    WitnessPubkeyHash([u8; 20]),
}

impl Payload {
    fn hash(&self) -> &[u8; 20] {
        match self {
            Payload::PubkeyHash(h) | Payload::ScriptHash(h) | Payload::WitnessPubkeyHash(h) => h,
        }
    }
}

/// An address on one of the supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub payload: Payload,
    pub params: &'static ChainParams,
}

impl Address {
    pub fn p2pkh(pubkey: &PublicKey, params: &'static ChainParams) -> Address {
        let hash = hash160::Hash::hash(&pubkey.to_bytes());
        Address {
            payload: Payload::PubkeyHash(hash.into_inner()),
            params,
        }
    }

    pub fn p2wpkh(pubkey: &PublicKey, params: &'static ChainParams) -> Address {
        let hash = hash160::Hash::hash(&pubkey.to_bytes());
        Address {
            payload: Payload::WitnessPubkeyHash(hash.into_inner()),
            params,
        }
    }

    pub fn p2sh(script: &Script, params: &'static ChainParams) -> Address {
        let hash = hash160::Hash::hash(script.as_bytes());
        Address {
            payload: Payload::ScriptHash(hash.into_inner()),
            params,
        }
    }

    /// Rebuild the address an owned key pays to from its stored script address
    pub fn from_script_address(hash: [u8; 20], params: &'static ChainParams) -> Address {
        let payload = if params.uses_segwit() {
            Payload::WitnessPubkeyHash(hash)
        } else {
            Payload::PubkeyHash(hash)
        };
        Address { payload, params }
    }

    /// Extract the address a standard output script pays to
    pub fn from_script(script: &Script, params: &'static ChainParams) -> Result<Address, Error> {
        let bytes = script.as_bytes();
        let payload = if script.is_p2pkh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[3..23]);
            Payload::PubkeyHash(hash)
        } else if script.is_p2sh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[2..22]);
            Payload::ScriptHash(hash)
        } else if script.is_v0_p2wpkh() {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes[2..22]);
            Payload::WitnessPubkeyHash(hash)
        } else {
            return Err(Error::UnknownScript);
        };
        Ok(Address { payload, params })
    }

    /// The canonical 20-byte lookup key
    pub fn script_address(&self) -> &[u8; 20] {
        self.payload.hash()
    }

    /// The output script paying this address
    pub fn script_pubkey(&self) -> Script {
        let hash = self.payload.hash();
        match self.payload {
            Payload::PubkeyHash(_) => Builder::new()
                .push_opcode(opcodes::all::OP_DUP)
                .push_opcode(opcodes::all::OP_HASH160)
                .push_slice(hash)
                .push_opcode(opcodes::all::OP_EQUALVERIFY)
                .push_opcode(opcodes::all::OP_CHECKSIG)
                .into_script(),
            Payload::ScriptHash(_) => Builder::new()
                .push_opcode(opcodes::all::OP_HASH160)
                .push_slice(hash)
                .push_opcode(opcodes::all::OP_EQUAL)
                .into_script(),
            Payload::WitnessPubkeyHash(_) => {
                Builder::new().push_int(0).push_slice(hash).into_script()
            }
        }
    }

    /// Parse a string form for the given chain
    pub fn decode(s: &str, params: &'static ChainParams) -> Result<Address, Error> {
        if let Some(hrp) = params.bech32_hrp {
            if let Ok((found_hrp, data, _variant)) = bech32::decode(s) {
                if found_hrp != hrp {
                    return Err(Error::Protocol(format!(
                        "address {} is for another network",
                        s
                    )));
                }
                if data.is_empty() || data[0].to_u8() != 0 {
                    return Err(Error::UnknownScript);
                }
                let program = Vec::<u8>::from_base32(&data[1..])
                    .map_err(|e| Error::Protocol(format!("bad witness program: {}", e)))?;
                if program.len() != 20 {
                    return Err(Error::UnknownScript);
                }
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&program);
                return Ok(Address {
                    payload: Payload::WitnessPubkeyHash(hash),
                    params,
                });
            }
        }

        let decoded = base58::from_check(s)?;
        let prefix_len = params.p2pkh_prefix.len();
        if decoded.len() != prefix_len + 20 {
            return Err(Error::UnknownScript);
        }
        let (prefix, hash_bytes) = decoded.split_at(prefix_len);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(hash_bytes);
        let payload = if prefix == params.p2pkh_prefix {
            Payload::PubkeyHash(hash)
        } else if prefix == params.p2sh_prefix {
            Payload::ScriptHash(hash)
        } else {
            return Err(Error::Protocol(format!(
                "address {} is for another network",
                s
            )));
        };
        Ok(Address { payload, params })
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.payload {
            Payload::WitnessPubkeyHash(hash) => {
                // only reachable on coins with an hrp configured
                let hrp = self.params.bech32_hrp.unwrap_or("bc");
                let mut data = vec![bech32::u5::try_from_u8(0).expect("0 < 32")];
                data.extend(hash.to_base32());
                let encoded =
                    bech32::encode(hrp, data, Variant::Bech32).map_err(|_| std::fmt::Error)?;
                write!(f, "{}", encoded)
            }
            Payload::PubkeyHash(hash) => {
                let mut bytes = self.params.p2pkh_prefix.to_vec();
                bytes.extend_from_slice(&hash);
                write!(f, "{}", base58::check_encode_slice(&bytes))
            }
            Payload::ScriptHash(hash) => {
                let mut bytes = self.params.p2sh_prefix.to_vec();
                bytes.extend_from_slice(&hash);
                write!(f, "{}", base58::check_encode_slice(&bytes))
            }
        }
    }
}
