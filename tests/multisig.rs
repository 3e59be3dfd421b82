mod common;

use std::str::FromStr;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{OutPoint, PublicKey, Txid};

use polywallet::database::Datastore;
use polywallet::types::*;
use polywallet::Error;

use common::*;

fn pubkey(byte: u8) -> PublicKey {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
    PublicKey {
        compressed: true,
        key: bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk),
    }
}

fn privkey(byte: u8) -> bitcoin::PrivateKey {
    bitcoin::PrivateKey {
        compressed: true,
        network: bitcoin::Network::Bitcoin,
        key: SecretKey::from_slice(&[byte; 32]).unwrap(),
    }
}

fn escrow_input(value: i64, wallet: &polywallet::Wallet) -> TransactionInput {
    TransactionInput {
        outpoint: OutPoint {
            txid: Txid::from_str(
                "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456",
            )
            .unwrap(),
            vout: 0,
        },
        value,
        linked_address: wallet
            .current_address(KeyPurpose::External)
            .unwrap(),
    }
}

#[tokio::test]
async fn test_multisig_signature_roundtrip() {
    let (_db, wallet) = offline_wallet(CoinType::Bitcoin);

    let keys = vec![pubkey(1), pubkey(2), pubkey(3)];
    let (address, redeem_script) = wallet
        .generate_multisig_script(&keys, 2, Duration::from_secs(0), None)
        .unwrap();
    assert!(address.to_string().starts_with('3'));

    let ins = vec![escrow_input(1_000_000, &wallet)];
    let outs = vec![TransactionOutput {
        address: wallet.current_address(KeyPurpose::Internal).unwrap(),
        value: 1_000_000,
    }];

    let sigs1 = wallet
        .create_multisig_signature(&ins, &outs, &privkey(1), &redeem_script, 30)
        .unwrap();
    let sigs2 = wallet
        .create_multisig_signature(&ins, &outs, &privkey(2), &redeem_script, 30)
        .unwrap();
    assert_eq!(sigs1.len(), 1);
    assert_eq!(sigs2.len(), 1);
    // co-signers building independently produce identical digests, so the
    // same key always yields the same signature
    let again = wallet
        .create_multisig_signature(&ins, &outs, &privkey(1), &redeem_script, 30)
        .unwrap();
    assert_eq!(sigs1[0].signature, again[0].signature);

    let raw = wallet
        .multisign(&ins, &outs, &sigs1, &sigs2, &redeem_script, 30, false)
        .await
        .unwrap();
    assert!(!raw.is_empty());

    // fee came out of the output
    let tx: bitcoin::Transaction = bitcoin::consensus::deserialize(&raw).unwrap();
    assert_eq!(tx.output.len(), 1);
    assert!(tx.output[0].value < 1_000_000);
}

#[tokio::test]
async fn test_escrow_script_requires_timeout_key() {
    let (_db, wallet) = offline_wallet(CoinType::Bitcoin);
    let keys = vec![pubkey(1), pubkey(2)];
    let err = wallet
        .generate_multisig_script(&keys, 2, Duration::from_secs(3600), None)
        .unwrap_err();
    assert!(matches!(err, Error::MissingTimeoutKey));
}

#[tokio::test]
async fn test_sweep_timelocked_escrow_sets_version_and_sequence() {
    let server = MockServer::start();
    let broadcast = server.mock(|when, then| {
        when.method(POST).path("/api/tx/send");
        then.status(200).json_body(json!({ "txid": "beef" }));
    });

    let (_db, wallet) = test_wallet(CoinType::Bitcoin, vec![server.url("/api")]);
    let keys = vec![pubkey(1), pubkey(2)];
    let timeout_key = pubkey(9);
    let (_address, redeem_script) = wallet
        .generate_multisig_script(&keys, 2, Duration::from_secs(24 * 3600), Some(&timeout_key))
        .unwrap();

    let ins = vec![escrow_input(500_000, &wallet)];
    wallet
        .sweep_address(ins, None, privkey(9), Some(redeem_script), FeeLevel::Normal)
        .await
        .unwrap();
    broadcast.assert_hits(1);
}

#[tokio::test]
async fn test_bump_fee_errors() {
    let (db, wallet) = offline_wallet(CoinType::Bitcoin);

    let confirmed =
        Txid::from_str("6f7a58ad92702601fcbaac0e039943a384f5274a205c16bb8bbab54f9ea2fbad")
            .unwrap();
    db.txns()
        .put(vec![0x01], confirmed, 1000, 500, std::time::SystemTime::now(), false)
        .unwrap();
    assert!(matches!(
        wallet.bump_fee(confirmed).await,
        Err(Error::BumpFeeAlreadyConfirmed)
    ));

    let dead = Txid::from_str("5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456")
        .unwrap();
    db.txns()
        .put(vec![0x01], dead, -1000, -1, std::time::SystemTime::now(), false)
        .unwrap();
    assert!(matches!(
        wallet.bump_fee(dead).await,
        Err(Error::BumpFeeTransactionDead)
    ));

    let unknown =
        Txid::from_str("1111111111111111111111111111111111111111111111111111111111111111")
            .unwrap();
    assert!(matches!(wallet.bump_fee(unknown).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_bump_fee_sweeps_own_unconfirmed_output() {
    let server = MockServer::start();
    let broadcast = server.mock(|when, then| {
        when.method(POST).path("/api/tx/send");
        then.status(200).json_body(json!({ "txid": "beef" }));
    });

    let (db, wallet) = test_wallet(CoinType::Bitcoin, vec![server.url("/api")]);
    let stuck = fund_wallet(&db, &wallet, 500_000);
    db.txns()
        .put(
            vec![0x01],
            stuck.outpoint.txid,
            500_000,
            0,
            std::time::SystemTime::now(),
            false,
        )
        .unwrap();

    wallet.bump_fee(stuck.outpoint.txid).await.unwrap();
    broadcast.assert_hits(1);
}

#[tokio::test]
async fn test_bump_fee_without_spendable_output() {
    let (db, wallet) = offline_wallet(CoinType::Bitcoin);
    let txid = Txid::from_str("6f7a58ad92702601fcbaac0e039943a384f5274a205c16bb8bbab54f9ea2fbad")
        .unwrap();
    db.txns()
        .put(vec![0x01], txid, 0, 0, std::time::SystemTime::now(), false)
        .unwrap();
    assert!(matches!(
        wallet.bump_fee(txid).await,
        Err(Error::BumpFeeNotFound)
    ));
}
