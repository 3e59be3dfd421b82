// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use bitcoin::{OutPoint, Txid};

use crate::types::CoinType;

/// Errors that can be returned by the wallet core
#[derive(Debug)]
pub enum Error {
    /// An amount is dust, negative, or not representable as a positive i64
    InvalidAmount(String),
    /// Coin selection could not cover the target plus fees
    InsufficientFunds,
    /// A key, transaction or script lookup missed
    NotFound,
    /// Fee bump requested for a transaction that already confirmed
    BumpFeeAlreadyConfirmed,
    /// Fee bump requested for a transaction marked dead by a reorg
    BumpFeeTransactionDead,
    /// Fee bump requested but no spendable output of the parent remains
    BumpFeeNotFound,
    /// Transport failure after the client pool exhausted every endpoint
    AllEndpointsFailed,
    /// A single request failed at the transport level
    Network(String),
    /// The websocket did not report a connection within the timeout
    ConnectTimeout,
    /// The server returned a payload the client could not interpret
    Protocol(String),
    /// The dispatcher has no wallet for the requested coin
    UnsupportedCoin(CoinType),
    /// Shutdown was triggered while the operation was in flight
    Cancelled,
    /// A script does not parse to any address form the wallet understands
    UnknownScript,
    /// An outpoint referenced an output index past the end of the transaction
    InvalidOutpoint(OutPoint),
    /// A timeout was set on a multisig script without a timeout key
    MissingTimeoutKey,
    /// A transaction in the datastore could not be decoded
    CorruptTransaction(Txid),

    Bip32(bitcoin::util::bip32::Error),
    Secp256k1(bitcoin::secp256k1::Error),
    Encode(bitcoin::consensus::encode::Error),
    Hex(bitcoin::hashes::hex::Error),
    Base58(bitcoin::util::base58::Error),
    Mnemonic(String),
    Json(serde_json::Error),
    Http(reqwest::Error),
    #[cfg(feature = "key-value-db")]
    Sled(sled::Error),
}

impl Error {
    /// Whether the client pool should rotate endpoints and try again
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Http(_) | Error::ConnectTimeout
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidAmount(msg) => write!(f, "invalid amount: {}", msg),
            Error::InsufficientFunds => write!(f, "insufficient funds"),
            Error::NotFound => write!(f, "not found"),
            Error::BumpFeeAlreadyConfirmed => {
                write!(f, "transaction is confirmed, cannot bump fee")
            }
            Error::BumpFeeTransactionDead => write!(f, "transaction is dead, cannot bump fee"),
            Error::BumpFeeNotFound => write!(f, "no spendable output to bump fee with"),
            Error::AllEndpointsFailed => write!(f, "all indexer endpoints returned errors"),
            Error::Network(msg) => write!(f, "network error: {}", msg),
            Error::ConnectTimeout => write!(f, "timed out waiting for websocket connection"),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::UnsupportedCoin(coin) => write!(f, "no wallet configured for {}", coin),
            Error::Cancelled => write!(f, "operation cancelled by shutdown"),
            Error::UnknownScript => write!(f, "unknown script"),
            Error::InvalidOutpoint(op) => write!(f, "outpoint {} is out of range", op),
            Error::MissingTimeoutKey => {
                write!(f, "timeout key must be set when using an escrow timeout")
            }
            Error::CorruptTransaction(txid) => {
                write!(f, "stored transaction {} failed to decode", txid)
            }
            Error::Bip32(e) => write!(f, "bip32: {}", e),
            Error::Secp256k1(e) => write!(f, "secp256k1: {}", e),
            Error::Encode(e) => write!(f, "encode: {}", e),
            Error::Hex(e) => write!(f, "hex: {}", e),
            Error::Base58(e) => write!(f, "base58: {}", e),
            Error::Mnemonic(msg) => write!(f, "mnemonic: {}", msg),
            Error::Json(e) => write!(f, "json: {}", e),
            Error::Http(e) => write!(f, "http: {}", e),
            #[cfg(feature = "key-value-db")]
            Error::Sled(e) => write!(f, "sled: {}", e),
        }
    }
}

impl std::error::Error for Error {}

macro_rules! impl_error {
    ( $from:ty, $to:ident ) => {
        impl std::convert::From<$from> for Error {
            fn from(err: $from) -> Self {
                Error::$to(err)
            }
        }
    };
}

impl_error!(bitcoin::util::bip32::Error, Bip32);
impl_error!(bitcoin::secp256k1::Error, Secp256k1);
impl_error!(bitcoin::consensus::encode::Error, Encode);
impl_error!(bitcoin::hashes::hex::Error, Hex);
impl_error!(bitcoin::util::base58::Error, Base58);
impl_error!(serde_json::Error, Json);
impl_error!(reqwest::Error, Http);
#[cfg(feature = "key-value-db")]
impl_error!(sled::Error, Sled);
