// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Per-coin chain capabilities
//!
//! Everything that differs between the supported coins is collected into a
//! [`ChainParams`] table: BIP44 coin index, address version bytes, segwit
//! use, signature-hash scheme, transaction format and dust policy. The rest
//! of the wallet is written once against this table, so adding a coin means
//! adding a row here rather than a new wallet implementation.

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Network, PublicKey};

use crate::types::CoinType;

pub mod address;
pub mod script;
pub mod serialize;
pub mod sighash;
pub mod size;

pub use address::Address;

lazy_static! {
    /// Shared verification-capable secp context
    pub(crate) static ref SECP: Secp256k1<All> = Secp256k1::new();
}

/// How signature hashes are computed for a coin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SighashScheme {
    /// BIP143 digest, used for native witness inputs (Bitcoin, Litecoin)
    Bip143,
    /// BIP143 digest with the BCH fork id mixed into the sighash type
    ForkId,
    /// ZIP-243 BLAKE2b digest bound to a consensus branch id (Zcash v4)
    ZcashV4,
}

/// On-the-wire transaction format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxFormat {
    /// Standard Bitcoin serialization, witness included when present
    Bitcoin,
    /// Zcash v4: overwinter header, version group id, expiry, empty shielded bundles
    ZcashV4,
}

/// The capability set for one coin on one network
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ChainParams {
    pub coin: CoinType,
    pub network: Network,
    /// BIP44 coin-level child index
    pub bip44_coin: u32,
    /// Base58check version bytes for pay-to-pubkey-hash (Zcash uses two)
    pub p2pkh_prefix: &'static [u8],
    /// Base58check version bytes for pay-to-script-hash
    pub p2sh_prefix: &'static [u8],
    /// Human-readable part for native segwit addresses, if the coin has them
    pub bech32_hrp: Option<&'static str>,
    pub sighash: SighashScheme,
    pub format: TxFormat,
    /// Ticker for mainnet, test-prefixed ticker otherwise
    pub currency_code: &'static str,
    /// Relay fee floor used by the dust policy, satoshis per kilobyte
    pub dust_relay_fee_per_kb: u64,
}

pub const BITCOIN: ChainParams = ChainParams {
    coin: CoinType::Bitcoin,
    network: Network::Bitcoin,
    bip44_coin: 0,
    p2pkh_prefix: &[0x00],
    p2sh_prefix: &[0x05],
    bech32_hrp: Some("bc"),
    sighash: SighashScheme::Bip143,
    format: TxFormat::Bitcoin,
    currency_code: "btc",
    dust_relay_fee_per_kb: 1000,
};

pub const BITCOIN_TESTNET: ChainParams = ChainParams {
    coin: CoinType::Bitcoin,
    network: Network::Testnet,
    bip44_coin: 1,
    p2pkh_prefix: &[0x6f],
    p2sh_prefix: &[0xc4],
    bech32_hrp: Some("tb"),
    sighash: SighashScheme::Bip143,
    format: TxFormat::Bitcoin,
    currency_code: "tbtc",
    dust_relay_fee_per_kb: 1000,
};

pub const BITCOIN_CASH: ChainParams = ChainParams {
    coin: CoinType::BitcoinCash,
    network: Network::Bitcoin,
    bip44_coin: 145,
    p2pkh_prefix: &[0x00],
    p2sh_prefix: &[0x05],
    bech32_hrp: None,
    sighash: SighashScheme::ForkId,
    format: TxFormat::Bitcoin,
    currency_code: "bch",
    dust_relay_fee_per_kb: 1000,
};

pub const BITCOIN_CASH_TESTNET: ChainParams = ChainParams {
    coin: CoinType::BitcoinCash,
    network: Network::Testnet,
    bip44_coin: 1,
    p2pkh_prefix: &[0x6f],
    p2sh_prefix: &[0xc4],
    bech32_hrp: None,
    sighash: SighashScheme::ForkId,
    format: TxFormat::Bitcoin,
    currency_code: "tbch",
    dust_relay_fee_per_kb: 1000,
};

pub const LITECOIN: ChainParams = ChainParams {
    coin: CoinType::Litecoin,
    network: Network::Bitcoin,
    bip44_coin: 2,
    p2pkh_prefix: &[0x30],
    p2sh_prefix: &[0x32],
    bech32_hrp: Some("ltc"),
    sighash: SighashScheme::Bip143,
    format: TxFormat::Bitcoin,
    currency_code: "ltc",
    dust_relay_fee_per_kb: 1000,
};

pub const LITECOIN_TESTNET: ChainParams = ChainParams {
    coin: CoinType::Litecoin,
    network: Network::Testnet,
    bip44_coin: 1,
    p2pkh_prefix: &[0x6f],
    p2sh_prefix: &[0x3a],
    bech32_hrp: Some("tltc"),
    sighash: SighashScheme::Bip143,
    format: TxFormat::Bitcoin,
    currency_code: "tltc",
    dust_relay_fee_per_kb: 1000,
};

pub const ZCASH: ChainParams = ChainParams {
    coin: CoinType::Zcash,
    network: Network::Bitcoin,
    bip44_coin: 133,
    p2pkh_prefix: &[0x1c, 0xb8],
    p2sh_prefix: &[0x1c, 0xbd],
    bech32_hrp: None,
    sighash: SighashScheme::ZcashV4,
    format: TxFormat::ZcashV4,
    currency_code: "zec",
    dust_relay_fee_per_kb: 1000,
};

pub const ZCASH_TESTNET: ChainParams = ChainParams {
    coin: CoinType::Zcash,
    network: Network::Testnet,
    bip44_coin: 1,
    p2pkh_prefix: &[0x1d, 0x25],
    p2sh_prefix: &[0x1c, 0xba],
    bech32_hrp: None,
    sighash: SighashScheme::ZcashV4,
    format: TxFormat::ZcashV4,
    currency_code: "tzec",
    dust_relay_fee_per_kb: 1000,
};

impl ChainParams {
    /// Look up the capability table for a coin on a network
    pub fn for_coin(coin: CoinType, network: Network) -> &'static ChainParams {
        let mainnet = network == Network::Bitcoin;
        match (coin, mainnet) {
            (CoinType::Bitcoin, true) => &BITCOIN,
            (CoinType::Bitcoin, false) => &BITCOIN_TESTNET,
            (CoinType::BitcoinCash, true) => &BITCOIN_CASH,
            (CoinType::BitcoinCash, false) => &BITCOIN_CASH_TESTNET,
            (CoinType::Litecoin, true) => &LITECOIN,
            (CoinType::Litecoin, false) => &LITECOIN_TESTNET,
            (CoinType::Zcash, true) => &ZCASH,
            (CoinType::Zcash, false) => &ZCASH_TESTNET,
        }
    }

    /// Whether owned keys map to native witness outputs on this coin
    pub fn uses_segwit(&self) -> bool {
        self.bech32_hrp.is_some()
    }

    /// The address an owned key is paid at: P2WPKH on segwit coins, P2PKH elsewhere
    pub fn key_to_address(&'static self, pubkey: &PublicKey) -> Address {
        if self.uses_segwit() {
            Address::p2wpkh(pubkey, self)
        } else {
            Address::p2pkh(pubkey, self)
        }
    }

    /// The smallest output value the coin's relay policy will carry.
    ///
    /// Port of the btcwallet rule: an output is dust when spending it costs
    /// more than a third of its value at the relay fee rate.
    pub fn dust_threshold(&self, script_len: usize) -> i64 {
        let script_varint = if script_len < 0xfd { 1 } else { 3 };
        let total_size = (8 + script_varint + script_len + 148) as i64;
        total_size * 3 * self.dust_relay_fee_per_kb as i64 / 1000
    }

    pub fn is_dust(&self, amount: i64, script_len: usize) -> bool {
        amount < self.dust_threshold(script_len)
    }
}
