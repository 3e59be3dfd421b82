mod common;

use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{Message, Secp256k1, Signature};
use bitcoin::util::bip32::{ChildNumber, ExtendedPrivKey};
use bitcoin::{Network, PublicKey};

use polywallet::chain::{serialize, sighash, size, BITCOIN};
use polywallet::types::{CoinType, FeeLevel, KeyPurpose};
use polywallet::Error;

use common::*;

const DEST: &str = "1AhsMpyyyVyPZ9KDUgwsX3zTDJWWSsRo4f";

/// The key the funding UTXO pays, m/44'/0'/0'/0/0 from the test mnemonic
fn funding_key() -> (bitcoin::PrivateKey, PublicKey) {
    let secp = Secp256k1::new();
    let mnemonic =
        bip39::Mnemonic::from_phrase(TEST_MNEMONIC, bip39::Language::English).unwrap();
    let seed = bip39::Seed::new(&mnemonic, "");
    let master = ExtendedPrivKey::new_master(Network::Bitcoin, seed.as_bytes()).unwrap();
    let child = master
        .derive_priv(
            &secp,
            &[
                ChildNumber::from_hardened_idx(44).unwrap(),
                ChildNumber::from_hardened_idx(0).unwrap(),
                ChildNumber::from_hardened_idx(0).unwrap(),
                ChildNumber::from_normal_idx(0).unwrap(),
                ChildNumber::from_normal_idx(0).unwrap(),
            ],
        )
        .unwrap();
    let key = child.private_key;
    let pubkey = key.public_key(&secp);
    (key, pubkey)
}

#[tokio::test]
async fn test_build_bitcoin_spend() {
    let (db, wallet) = offline_wallet(CoinType::Bitcoin);
    let utxo = fund_wallet(&db, &wallet, 2_000_000);

    let dest = wallet.decode_address(DEST).unwrap();
    let tx = wallet
        .build_tx(1_500_000, &dest, FeeLevel::Normal, None)
        .await
        .unwrap();

    // exactly one payment output of the requested amount to the destination
    let payments: Vec<_> = tx
        .output
        .iter()
        .filter(|o| o.script_pubkey == dest.script_pubkey())
        .collect();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].value, 1_500_000);

    // exactly one change output, paying an internal key the wallet owns
    assert_eq!(tx.output.len(), 2);
    let change = tx
        .output
        .iter()
        .find(|o| o.script_pubkey != dest.script_pubkey())
        .unwrap();
    let change_address = wallet.script_to_address(&change.script_pubkey).unwrap();
    assert!(wallet.has_key(&change_address));

    // the fee clears the requested rate against the actual signed size
    let fee = 2_000_000 - tx.output.iter().map(|o| o.value).sum::<u64>();
    let vsize = size::estimate_serialize_size(
        &BITCOIN,
        tx.input.len(),
        size::InputType::P2wpkh,
        &tx.output,
        false,
    );
    assert!(fee >= vsize as u64 * 30, "fee {} for vsize {}", fee, vsize);

    // the witness signature verifies under the derived pubkey
    let (_key, pubkey) = funding_key();
    assert_eq!(tx.input.len(), 1);
    let witness = &tx.input[0].witness;
    assert_eq!(witness.len(), 2);
    assert_eq!(witness[1], pubkey.to_bytes());

    let mut unsigned = tx.clone();
    for input in &mut unsigned.input {
        input.script_sig = bitcoin::Script::new();
        input.witness = vec![];
    }
    // BIP143 script code for a p2wpkh spend: the p2pkh form of the same hash
    let hash = hash160::Hash::hash(&pubkey.to_bytes());
    let script_code = {
        use bitcoin::blockdata::{opcodes, script::Builder};
        Builder::new()
            .push_opcode(opcodes::all::OP_DUP)
            .push_opcode(opcodes::all::OP_HASH160)
            .push_slice(&hash.into_inner())
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script()
    };
    let digest = sighash::signature_hash(&BITCOIN, &unsigned, 0, &script_code, utxo.value);

    let secp = Secp256k1::new();
    let der = &witness[0][..witness[0].len() - 1];
    let signature = Signature::from_der(der).unwrap();
    secp.verify(
        &Message::from_slice(&digest).unwrap(),
        &signature,
        &pubkey.key,
    )
    .unwrap();

    // canonical ordering survives a re-sort
    let mut sorted = tx.clone();
    polywallet::wallet::tx_builder::bip69_sort(&mut sorted);
    assert_eq!(sorted, tx);
}

#[tokio::test]
async fn test_insufficient_funds() {
    let (db, wallet) = offline_wallet(CoinType::Bitcoin);
    fund_wallet(&db, &wallet, 2_000_000);

    let dest = wallet.decode_address(DEST).unwrap();
    let err = wallet
        .build_tx(1_000_000_000, &dest, FeeLevel::Normal, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds));
}

#[tokio::test]
async fn test_dust_amount_rejected() {
    let (db, wallet) = offline_wallet(CoinType::Bitcoin);
    fund_wallet(&db, &wallet, 2_000_000);

    let dest = wallet.decode_address(DEST).unwrap();
    let err = wallet
        .build_tx(1, &dest, FeeLevel::Normal, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAmount(_)));
}

#[tokio::test]
async fn test_overflow_amount_rejected() {
    let (db, wallet) = offline_wallet(CoinType::BitcoinCash);
    fund_wallet(&db, &wallet, 2_000_000);

    let dest = wallet
        .decode_address("1Bw5sjyq5p64ujN95yXzaGJVpfWp6sCfMe")
        .unwrap();
    let err = wallet
        .build_tx(i64::MAX as u64 + 1, &dest, FeeLevel::Normal, None)
        .await
        .unwrap_err();
    match err {
        Error::InvalidAmount(message) => assert!(message.contains("is too large")),
        other => panic!("expected InvalidAmount, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bch_spend_signs_with_forkid() {
    let (db, wallet) = offline_wallet(CoinType::BitcoinCash);
    fund_wallet(&db, &wallet, 2_000_000);

    let dest = wallet
        .decode_address("1Bw5sjyq5p64ujN95yXzaGJVpfWp6sCfMe")
        .unwrap();
    let tx = wallet
        .build_tx(1_000_000, &dest, FeeLevel::Normal, None)
        .await
        .unwrap();

    // legacy scriptSig spend, no witness, sighash byte carries the fork id
    assert!(tx.input[0].witness.is_empty());
    let script_sig = tx.input[0].script_sig.as_bytes();
    let sig_len = script_sig[0] as usize;
    assert_eq!(script_sig[sig_len], 0x41);
}

#[tokio::test]
async fn test_zcash_spend_serializes_v4() {
    let (db, wallet) = offline_wallet(CoinType::Zcash);
    fund_wallet(&db, &wallet, 2_000_000);

    let dest = wallet
        .current_address(KeyPurpose::External)
        .unwrap();
    let tx = wallet
        .build_tx(1_000_000, &dest, FeeLevel::Normal, None)
        .await
        .unwrap();

    let raw = serialize::serialize_tx(wallet.params(), &tx);
    assert_eq!(&raw[0..4], &[0x04, 0x00, 0x00, 0x80]);
    let decoded = serialize::deserialize_tx(wallet.params(), &raw).unwrap();
    assert_eq!(decoded.output, tx.output);
}

#[tokio::test]
async fn test_estimate_spend_fee_matches_build() {
    let (db, wallet) = offline_wallet(CoinType::Bitcoin);
    fund_wallet(&db, &wallet, 2_000_000);

    let fee = wallet
        .estimate_spend_fee(1_000_000, FeeLevel::Normal)
        .await
        .unwrap();
    assert!(fee > 0);
}
