#![allow(unused)]

use std::str::FromStr;
use std::sync::Arc;

use bitcoin::{Network, OutPoint, Script, Txid};

use polywallet::config::CoinConfig;
use polywallet::database::{Datastore, MemoryDatastore};
use polywallet::types::{CoinType, Utxo};
use polywallet::Wallet;

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

/// A wallet wired to the given endpoints with static fees and a fresh
/// in-memory datastore
pub fn test_wallet(coin: CoinType, endpoints: Vec<String>) -> (Arc<MemoryDatastore>, Wallet) {
    let db = Arc::new(MemoryDatastore::new());
    let config = CoinConfig {
        coin_type: coin,
        low_fee: 20,
        medium_fee: 30,
        high_fee: 40,
        max_fee: 2000,
        fee_api: None,
        client_apis: endpoints,
        db: db.clone(),
        exchange_rates: None,
    };
    let wallet = Wallet::new(config, TEST_MNEMONIC, Network::Bitcoin, None).unwrap();
    (db, wallet)
}

/// A wallet with no reachable endpoint, for offline transaction building
pub fn offline_wallet(coin: CoinType) -> (Arc<MemoryDatastore>, Wallet) {
    test_wallet(coin, vec!["http://localhost:18332/api".to_string()])
}

/// Credit the wallet's first external address with one confirmed-looking UTXO
pub fn fund_wallet(db: &Arc<MemoryDatastore>, wallet: &Wallet, value: u64) -> Utxo {
    let address = wallet
        .current_address(polywallet::types::KeyPurpose::External)
        .unwrap();
    let utxo = Utxo {
        outpoint: OutPoint {
            txid: Txid::from_str(
                "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456",
            )
            .unwrap(),
            vout: 0,
        },
        value,
        script_pubkey: address.script_pubkey(),
        at_height: 0,
        watch_only: false,
    };
    db.utxos().put(utxo.clone()).unwrap();
    utxo
}
