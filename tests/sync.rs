mod common;

use httpmock::prelude::*;
use serde_json::json;

use bitcoin::hashes::hex::ToHex;

use polywallet::database::Datastore;
use polywallet::types::{CoinType, KeyPurpose};

use common::*;

fn mock_chain_basics(server: &MockServer, blocks: i32) {
    server.mock(|when, then| {
        when.method(GET).path("/api/status");
        then.status(200)
            .json_body(json!({ "info": { "blocks": blocks, "network": "livenet" } }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/blocks");
        then.status(200).json_body(json!({
            "blocks": [{ "hash": "00000000000000000007abc", "height": blocks }]
        }));
    });
}

#[tokio::test]
async fn test_sync_reaps_spent_utxos() {
    let server = MockServer::start();
    mock_chain_basics(&server, 700_000);
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/utxo");
        then.status(200).json_body(json!([]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/txs");
        then.status(200)
            .json_body(json!({ "totalItems": 0, "items": [] }));
    });

    let (db, wallet) = test_wallet(CoinType::Bitcoin, vec![server.url("/api")]);
    fund_wallet(&db, &wallet, 500_000);
    assert_eq!(db.utxos().get_all().unwrap().len(), 1);

    wallet.resync_blockchain().await;

    // the indexer no longer reports the output, so it is gone locally
    assert!(db.utxos().get_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_stores_utxos_and_txs_idempotently() {
    let server = MockServer::start();
    mock_chain_basics(&server, 700_000);

    let (db, wallet) = test_wallet(CoinType::Bitcoin, vec![server.url("/api")]);
    let address = wallet.current_address(KeyPurpose::External).unwrap();
    let script_hex = address.script_pubkey().as_bytes().to_hex();

    let txid = "6f7a58ad92702601fcbaac0e039943a384f5274a205c16bb8bbab54f9ea2fbad";
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/utxo");
        then.status(200).json_body(json!([{
            "address": address.to_string(),
            "txid": txid,
            "vout": 0,
            "scriptPubKey": script_hex,
            "amount": "0.005",
            "confirmations": 3
        }]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/txs");
        then.status(200).json_body(json!({
            "totalItems": 1,
            "items": [{
                "txid": txid,
                "version": 1,
                "locktime": 0,
                "vin": [{
                    "txid": "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456",
                    "vout": 1, "sequence": 4294967295u32, "n": 0,
                    "scriptSig": { "hex": "51" },
                    "addr": "1JunkAddressUnknownToTheWallet",
                    "valueSat": 600000
                }],
                "vout": [{
                    "value": 0.005,
                    "n": 0,
                    "scriptPubKey": { "hex": script_hex, "addresses": [address.to_string()] }
                }],
                "confirmations": 3,
                "time": 1600000000
            }]
        }));
    });

    wallet.resync_blockchain().await;

    let utxos_first = db.utxos().get_all().unwrap();
    let txns_first = db.txns().get_all(true).unwrap();
    assert_eq!(utxos_first.len(), 1);
    assert_eq!(txns_first.len(), 1);

    // at_height = tip - (confirmations - 1)
    assert_eq!(utxos_first[0].at_height, 700_000 - 2);
    assert!(!utxos_first[0].watch_only);

    // net value is the credited output, and the receiving key is now used
    assert_eq!(txns_first[0].value, 500_000);
    assert!(!txns_first[0].watch_only);
    assert_ne!(
        wallet.current_address(KeyPurpose::External).unwrap(),
        address
    );

    // balance identity: confirmed + unconfirmed covers every owned utxo
    let (confirmed, unconfirmed) = wallet.balance().unwrap();
    assert_eq!(confirmed + unconfirmed, 500_000);
    assert_eq!(confirmed, 500_000);

    // a second pass against the same responses changes nothing
    wallet.resync_blockchain().await;
    assert_eq!(db.utxos().get_all().unwrap(), utxos_first);
    assert_eq!(db.txns().get_all(true).unwrap(), txns_first);
}

#[tokio::test]
async fn test_restore_from_seed_rediscovers_usage() {
    // a prior session received funds at external index 5; a wallet restored
    // from the same mnemonic must find them because the initial lookahead
    // window already covers that index
    let server = MockServer::start();
    mock_chain_basics(&server, 700_000);

    let (db, wallet) = test_wallet(CoinType::Bitcoin, vec![server.url("/api")]);
    let addresses = wallet.list_addresses().unwrap();
    assert!(addresses.len() >= 20);

    // pick the address the indexer will report history for
    let target = {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let mnemonic =
            bip39::Mnemonic::from_phrase(TEST_MNEMONIC, bip39::Language::English).unwrap();
        let seed = bip39::Seed::new(&mnemonic, "");
        let master = bitcoin::util::bip32::ExtendedPrivKey::new_master(
            bitcoin::Network::Bitcoin,
            seed.as_bytes(),
        )
        .unwrap();
        let child = master
            .derive_priv(
                &secp,
                &[
                    bitcoin::util::bip32::ChildNumber::from_hardened_idx(44).unwrap(),
                    bitcoin::util::bip32::ChildNumber::from_hardened_idx(0).unwrap(),
                    bitcoin::util::bip32::ChildNumber::from_hardened_idx(0).unwrap(),
                    bitcoin::util::bip32::ChildNumber::from_normal_idx(0).unwrap(),
                    bitcoin::util::bip32::ChildNumber::from_normal_idx(5).unwrap(),
                ],
            )
            .unwrap();
        wallet
            .params()
            .key_to_address(&child.private_key.public_key(&secp))
    };
    assert!(addresses.contains(&target));
    let script_hex = target.script_pubkey().as_bytes().to_hex();

    let txid = "6f7a58ad92702601fcbaac0e039943a384f5274a205c16bb8bbab54f9ea2fbad";
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/utxo");
        then.status(200).json_body(json!([{
            "address": target.to_string(),
            "txid": txid,
            "vout": 0,
            "scriptPubKey": script_hex,
            "satoshis": 250_000,
            "confirmations": 12
        }]));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/txs");
        then.status(200).json_body(json!({
            "totalItems": 1,
            "items": [{
                "txid": txid,
                "vin": [],
                "vout": [{
                    "value": 0.0025, "n": 0,
                    "scriptPubKey": { "hex": script_hex, "addresses": [target.to_string()] }
                }],
                "confirmations": 12,
                "time": 1600000000
            }]
        }));
    });

    wallet.resync_blockchain().await;

    let (confirmed, _) = wallet.balance().unwrap();
    assert_eq!(confirmed, 250_000);

    // the used key at index 5 pushed the lookahead window past it
    let last = db
        .keys()
        .get_last_key_index(KeyPurpose::External)
        .unwrap()
        .unwrap();
    assert_eq!(last.0, 25);
}

#[tokio::test]
async fn test_confirmations_follow_chain_tip() {
    let server = MockServer::start();
    mock_chain_basics(&server, 1000);
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/utxo");
        then.status(200).json_body(json!([]));
    });

    let (db, wallet) = test_wallet(CoinType::Bitcoin, vec![server.url("/api")]);
    let address = wallet.current_address(KeyPurpose::External).unwrap();
    let script_hex = address.script_pubkey().as_bytes().to_hex();
    let txid = "6f7a58ad92702601fcbaac0e039943a384f5274a205c16bb8bbab54f9ea2fbad";
    server.mock(|when, then| {
        when.method(POST).path("/api/addrs/txs");
        then.status(200).json_body(json!({
            "totalItems": 1,
            "items": [{
                "txid": txid,
                "vin": [],
                "vout": [{
                    "value": 0.001, "n": 0,
                    "scriptPubKey": { "hex": script_hex, "addresses": [address.to_string()] }
                }],
                "confirmations": 10,
                "time": 1600000000
            }]
        }));
    });

    wallet.resync_blockchain().await;

    let (height, hash) = wallet.chain_tip();
    assert_eq!(height, 1000);
    assert!(!hash.is_empty());

    let stored = &db.txns().get_all(true).unwrap()[0];
    let (confirmations, tx_height) = wallet.get_confirmations(&stored.txid).unwrap();
    assert_eq!(tx_height, 991);
    assert_eq!(confirmations, 10);
}
