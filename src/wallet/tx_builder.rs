// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Transaction construction and signing
//!
//! `build_tx` runs the full pipeline: dust and overflow checks, coin
//! gathering, max-value-age selection, fee iteration against the estimated
//! signed size, change handling, BIP69 ordering and per-coin signing.
//! `sweep_address`, `bump_fee` (CPFP) and the multisig entrypoints reuse
//! the same ordering and signing machinery so co-signers always see the
//! same deterministic transaction.

use std::collections::HashMap;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::{OutPoint, PrivateKey, Script, Transaction, TxIn, TxOut, Txid};

use log::debug;

use crate::chain::size::{estimate_serialize_size, InputType};
use crate::chain::{script, serialize, sighash, Address, SECP};
use crate::client::ChainClient;
use crate::error::Error;
use crate::types::*;
use crate::wallet::coin_selection::{select_coins, SpendableCoin};
use crate::wallet::Wallet;

/// Inputs opt into replaceability so a stuck parent can be CPFP-bumped
const RBF_SEQUENCE: u32 = 0;

struct PrevOut {
    key: PrivateKey,
    value: u64,
    script_pubkey: Script,
}

impl Wallet {
    /// Build, sign and broadcast a payment
    pub async fn spend(
        &self,
        amount: u64,
        to: &Address,
        level: FeeLevel,
    ) -> Result<Txid, Error> {
        let tx = self.build_tx(amount, to, level, None).await?;
        let raw = serialize::serialize_tx(self.params, &tx);
        self.client.broadcast(&raw).await?;
        Ok(serialize::txid(self.params, &tx))
    }

    /// Build and sign a payment of `amount` to `to`, without broadcasting
    pub async fn build_tx(
        &self,
        amount: u64,
        to: &Address,
        level: FeeLevel,
        extra_output: Option<TxOut>,
    ) -> Result<Transaction, Error> {
        if amount > i64::MAX as u64 {
            return Err(Error::InvalidAmount(format!(
                "amount {} is too large",
                amount
            )));
        }
        let payment_script = to.script_pubkey();
        if self.params.is_dust(amount as i64, payment_script.len()) {
            return Err(Error::InvalidAmount(format!("amount {} is dust", amount)));
        }

        let fee_per_byte = self.fees.fee_per_byte(level).await;
        let candidates = self.gather_coins()?;
        let input_type = InputType::for_params(self.params);

        let mut outputs = vec![TxOut {
            value: amount,
            script_pubkey: payment_script,
        }];
        if let Some(extra) = extra_output {
            outputs.push(extra);
        }
        let target: i64 = outputs.iter().map(|o| o.value as i64).sum();

        let mut required_fee = (estimate_serialize_size(
            self.params,
            1,
            input_type,
            &outputs,
            true,
        ) as u64
            * fee_per_byte) as i64;

        loop {
            let selected = select_coins(candidates.clone(), target + required_fee)?;
            let input_total: i64 = selected.iter().map(|c| c.utxo.value as i64).sum();

            let size =
                estimate_serialize_size(self.params, selected.len(), input_type, &outputs, true);
            let fee_for_size = (size as u64 * fee_per_byte) as i64;
            if input_total < target + fee_for_size {
                // selection came up short of the fee for its own size
                required_fee = fee_for_size;
                continue;
            }

            let mut tx = Transaction {
                version: 1,
                lock_time: 0,
                input: selected
                    .iter()
                    .map(|coin| TxIn {
                        previous_output: coin.utxo.outpoint,
                        script_sig: Script::new(),
                        sequence: RBF_SEQUENCE,
                        witness: vec![],
                    })
                    .collect(),
                output: outputs.clone(),
            };

            let change = input_total - target - fee_for_size;
            let change_address = self.km.current_address(KeyPurpose::Internal)?;
            let change_script = change_address.script_pubkey();
            let has_change = change > 0 && !self.params.is_dust(change, change_script.len());
            if has_change {
                tx.output.push(TxOut {
                    value: change as u64,
                    script_pubkey: change_script,
                });
            }

            bip69_sort(&mut tx);

            let prevouts: HashMap<OutPoint, PrevOut> = selected
                .iter()
                .map(|coin| {
                    (
                        coin.utxo.outpoint,
                        PrevOut {
                            key: coin.key,
                            value: coin.utxo.value,
                            script_pubkey: coin.utxo.script_pubkey.clone(),
                        },
                    )
                })
                .collect();
            self.sign_inputs(&mut tx, &prevouts)?;

            if has_change {
                self.km
                    .mark_key_as_used(change_address.script_address())?;
            }
            debug!(
                "built {} tx: {} inputs, {} outputs, fee {}",
                self.params.coin,
                tx.input.len(),
                tx.output.len(),
                fee_for_size
            );
            return Ok(tx);
        }
    }

    /// Every UTXO the wallet can sign for, tagged with its confirmations
    fn gather_coins(&self) -> Result<Vec<SpendableCoin>, Error> {
        let height = self.service.chain_height();
        let mut coins = Vec::new();
        for utxo in self.db.utxos().get_all()? {
            if utxo.watch_only {
                continue;
            }
            let address = match Address::from_script(&utxo.script_pubkey, self.params) {
                Ok(address) => address,
                Err(_) => continue,
            };
            let key = match self.km.get_key_for_script(address.script_address()) {
                Ok(key) => key,
                // outputs we cannot sign for are not spendable coins
                Err(_) => continue,
            };
            let confirmations = if utxo.at_height > 0 {
                (height - utxo.at_height + 1).max(0) as i64
            } else {
                0
            };
            coins.push(SpendableCoin {
                utxo,
                key,
                confirmations,
            });
        }
        Ok(coins)
    }

    /// Sign every input of `tx` from the prevout map. Owned keys produce a
    /// witness on segwit coins and a p2pkh scriptSig elsewhere.
    fn sign_inputs(
        &self,
        tx: &mut Transaction,
        prevouts: &HashMap<OutPoint, PrevOut>,
    ) -> Result<(), Error> {
        let unsigned = tx.clone();
        for (index, txin) in tx.input.iter_mut().enumerate() {
            let prevout = prevouts
                .get(&txin.previous_output)
                .ok_or(Error::NotFound)?;
            let script_code = script_code_for(&prevout.script_pubkey);
            let digest = sighash::signature_hash(
                self.params,
                &unsigned,
                index,
                &script_code,
                prevout.value,
            );
            let signature = self.raw_signature(&digest, &prevout.key)?;
            let pubkey = prevout.key.public_key(&SECP);
            if prevout.script_pubkey.is_v0_p2wpkh() {
                txin.witness = vec![signature, pubkey.to_bytes()];
                txin.script_sig = Script::new();
            } else {
                txin.script_sig = script::p2pkh_script_sig(&signature, &pubkey);
            }
        }
        Ok(())
    }

    /// DER signature over a digest with the chain's sighash byte appended
    fn raw_signature(&self, digest: &[u8; 32], key: &PrivateKey) -> Result<Vec<u8>, Error> {
        let message = Message::from_slice(digest)?;
        let mut signature = SECP.sign(&message, &key.key).serialize_der().to_vec();
        signature.push(sighash::sighash_type_byte(self.params));
        Ok(signature)
    }

    /// CPFP fee bump: sweep a spendable output of the stuck parent to a
    /// fresh internal address at the fee-bump rate, paying for both
    pub async fn bump_fee(&self, txid: Txid) -> Result<Txid, Error> {
        let txn = self.db.txns().get(&txid)?;
        if txn.height > 0 {
            return Err(Error::BumpFeeAlreadyConfirmed);
        }
        if txn.height < 0 {
            return Err(Error::BumpFeeTransactionDead);
        }

        for utxo in self.db.utxos().get_all()? {
            if utxo.outpoint.txid != txid || utxo.at_height != 0 || utxo.watch_only {
                continue;
            }
            let address = Address::from_script(&utxo.script_pubkey, self.params)?;
            let key = self.km.get_key_for_script(address.script_address())?;
            let input = TransactionInput {
                outpoint: utxo.outpoint,
                value: utxo.value as i64,
                linked_address: address,
            };
            return self
                .sweep_address(vec![input], None, key, None, FeeLevel::FeeBump)
                .await;
        }
        Err(Error::BumpFeeNotFound)
    }

    /// Sweep a set of inputs into a single output, minus the fee.
    ///
    /// With a redeem script the inputs are P2SH spends; a script opening
    /// with OP_IF is a time-locked escrow, which forces version 2 and sets
    /// every input's sequence to the script's CSV value.
    pub async fn sweep_address(
        &self,
        ins: Vec<TransactionInput>,
        dest: Option<Address>,
        key: PrivateKey,
        redeem_script: Option<Script>,
        level: FeeLevel,
    ) -> Result<Txid, Error> {
        if ins.is_empty() {
            return Err(Error::InvalidAmount("no inputs to sweep".to_string()));
        }
        let destination = match dest {
            Some(address) => address,
            None => self.km.current_address(KeyPurpose::Internal)?,
        };
        let total: i64 = ins.iter().map(|i| i.value).sum();

        let timelocked = redeem_script
            .as_ref()
            .map(script::is_timelocked_escrow)
            .unwrap_or(false);
        let input_type = match &redeem_script {
            None => InputType::for_params(self.params),
            Some(_) if timelocked => InputType::P2shTimelock1Sig,
            Some(_) => InputType::P2shMultisig2of3,
        };

        let mut output = TxOut {
            value: 0,
            script_pubkey: destination.script_pubkey(),
        };
        let size = estimate_serialize_size(
            self.params,
            ins.len(),
            input_type,
            std::slice::from_ref(&output),
            false,
        );
        let fee = size as u64 * self.fees.fee_per_byte(level).await;
        output.value = (total - fee as i64).max(0) as u64;

        let mut sequence = 0xffff_ffff;
        let mut version = 1;
        if timelocked {
            // the CSV branch only verifies with the matching sequence
            let redeem = redeem_script.as_ref().expect("timelocked implies script");
            sequence = script::lock_time_from_redeem_script(redeem)?;
            version = 2;
        }

        let mut tx = Transaction {
            version,
            lock_time: 0,
            input: ins
                .iter()
                .map(|input| TxIn {
                    previous_output: input.outpoint,
                    script_sig: Script::new(),
                    sequence,
                    witness: vec![],
                })
                .collect(),
            output: vec![output],
        };
        bip69_sort(&mut tx);

        let values: HashMap<OutPoint, (i64, Address)> = ins
            .iter()
            .map(|input| (input.outpoint, (input.value, input.linked_address)))
            .collect();

        let unsigned = tx.clone();
        for (index, txin) in tx.input.iter_mut().enumerate() {
            let (value, linked_address) = *values
                .get(&txin.previous_output)
                .ok_or(Error::NotFound)?;
            match &redeem_script {
                None => {
                    let script_pubkey = linked_address.script_pubkey();
                    let script_code = script_code_for(&script_pubkey);
                    let digest = sighash::signature_hash(
                        self.params,
                        &unsigned,
                        index,
                        &script_code,
                        value as u64,
                    );
                    let signature = self.raw_signature(&digest, &key)?;
                    let pubkey = key.public_key(&SECP);
                    if script_pubkey.is_v0_p2wpkh() {
                        txin.witness = vec![signature, pubkey.to_bytes()];
                    } else {
                        txin.script_sig = script::p2pkh_script_sig(&signature, &pubkey);
                    }
                }
                Some(redeem) => {
                    let digest = sighash::signature_hash(
                        self.params,
                        &unsigned,
                        index,
                        redeem,
                        value as u64,
                    );
                    let signature = self.raw_signature(&digest, &key)?;
                    txin.script_sig = if timelocked {
                        script::escrow_timeout_script_sig(&signature, redeem)
                    } else {
                        script::single_sig_multisig_script_sig(&signature, redeem)
                    };
                }
            }
        }

        let raw = serialize::serialize_tx(self.params, &tx);
        self.client.broadcast(&raw).await?;
        Ok(serialize::txid(self.params, &tx))
    }

    /// Sign each input of the deterministic multisig transaction with one
    /// key. Nothing is broadcast; the co-signer runs the same construction.
    pub fn create_multisig_signature(
        &self,
        ins: &[TransactionInput],
        outs: &[TransactionOutput],
        key: &PrivateKey,
        redeem_script: &Script,
        fee_per_byte: u64,
    ) -> Result<Vec<Signature>, Error> {
        let tx = self.multisig_tx(ins, outs, redeem_script, fee_per_byte)?;
        let values: HashMap<OutPoint, i64> =
            ins.iter().map(|i| (i.outpoint, i.value)).collect();

        let mut signatures = Vec::with_capacity(tx.input.len());
        for (index, txin) in tx.input.iter().enumerate() {
            let value = *values.get(&txin.previous_output).ok_or(Error::NotFound)?;
            let digest =
                sighash::signature_hash(self.params, &tx, index, redeem_script, value as u64);
            signatures.push(Signature {
                input_index: index as u32,
                signature: self.raw_signature(&digest, key)?,
            });
        }
        Ok(signatures)
    }

    /// Assemble both signature sets into final scriptSigs, optionally
    /// broadcasting. Returns the raw transaction bytes.
    #[allow(clippy::too_many_arguments)]
    pub async fn multisign(
        &self,
        ins: &[TransactionInput],
        outs: &[TransactionOutput],
        sigs1: &[Signature],
        sigs2: &[Signature],
        redeem_script: &Script,
        fee_per_byte: u64,
        broadcast: bool,
    ) -> Result<Vec<u8>, Error> {
        let mut tx = self.multisig_tx(ins, outs, redeem_script, fee_per_byte)?;
        let timelocked = script::is_timelocked_escrow(redeem_script);

        for (index, txin) in tx.input.iter_mut().enumerate() {
            let sig1 = sigs1
                .iter()
                .find(|s| s.input_index as usize == index)
                .ok_or(Error::NotFound)?;
            let sig2 = sigs2
                .iter()
                .find(|s| s.input_index as usize == index)
                .ok_or(Error::NotFound)?;
            txin.script_sig = script::multisig_script_sig(
                &sig1.signature,
                &sig2.signature,
                timelocked,
                redeem_script,
            );
        }

        let raw = serialize::serialize_tx(self.params, &tx);
        if broadcast {
            self.client.broadcast(&raw).await?;
        }
        Ok(raw)
    }

    /// The deterministic unsigned multisig transaction both parties build:
    /// fee spread across outputs, BIP69 order
    fn multisig_tx(
        &self,
        ins: &[TransactionInput],
        outs: &[TransactionOutput],
        redeem_script: &Script,
        fee_per_byte: u64,
    ) -> Result<Transaction, Error> {
        if ins.is_empty() || outs.is_empty() {
            return Err(Error::InvalidAmount(
                "multisig spend needs inputs and outputs".to_string(),
            ));
        }
        let input_type = if script::is_timelocked_escrow(redeem_script) {
            InputType::P2shTimelock2Sigs
        } else {
            InputType::P2shMultisig2of3
        };

        let mut outputs: Vec<TxOut> = outs
            .iter()
            .map(|out| TxOut {
                value: out.value.max(0) as u64,
                script_pubkey: out.address.script_pubkey(),
            })
            .collect();

        let size = estimate_serialize_size(self.params, ins.len(), input_type, &outputs, false);
        let fee = size as u64 * fee_per_byte;
        let fee_per_output = fee / outputs.len() as u64;
        for output in &mut outputs {
            output.value = output.value.saturating_sub(fee_per_output);
        }

        let mut tx = Transaction {
            version: 1,
            lock_time: 0,
            input: ins
                .iter()
                .map(|input| TxIn {
                    previous_output: input.outpoint,
                    script_sig: Script::new(),
                    sequence: 0xffff_ffff,
                    witness: vec![],
                })
                .collect(),
            output: outputs,
        };
        bip69_sort(&mut tx);
        Ok(tx)
    }

    /// M-of-N redeem script plus its P2SH address; a non-zero timeout wraps
    /// the multisig in a CSV escrow branch released by `timeout_key`
    pub fn generate_multisig_script(
        &self,
        pubkeys: &[bitcoin::PublicKey],
        threshold: usize,
        timeout: std::time::Duration,
        timeout_key: Option<&bitcoin::PublicKey>,
    ) -> Result<(Address, Script), Error> {
        let redeem_script =
            script::multisig_redeem_script(pubkeys, threshold, timeout, timeout_key)?;
        let address = Address::p2sh(&redeem_script, self.params);
        Ok((address, redeem_script))
    }

    /// Fee for a hypothetical transaction over the given inputs and outputs
    pub fn estimate_fee(
        &self,
        ins: &[TransactionInput],
        outs: &[TransactionOutput],
        fee_per_byte: u64,
    ) -> u64 {
        let outputs: Vec<TxOut> = outs
            .iter()
            .map(|out| TxOut {
                value: out.value.max(0) as u64,
                script_pubkey: out.address.script_pubkey(),
            })
            .collect();
        let size = estimate_serialize_size(
            self.params,
            ins.len(),
            InputType::for_params(self.params),
            &outputs,
            false,
        );
        size as u64 * fee_per_byte
    }

    /// The fee `spend` would pay right now for this amount and level
    pub async fn estimate_spend_fee(&self, amount: u64, level: FeeLevel) -> Result<u64, Error> {
        // build against our own address; the size is what matters
        let destination = self.km.current_address(KeyPurpose::External)?;
        let tx = self.build_tx(amount, &destination, level, None).await?;

        let utxos = self.db.utxos().get_all()?;
        let mut input_total = 0i64;
        for txin in &tx.input {
            let utxo = utxos
                .iter()
                .find(|u| u.outpoint == txin.previous_output)
                .ok_or(Error::NotFound)?;
            input_total += utxo.value as i64;
        }
        let output_total: i64 = tx.output.iter().map(|o| o.value as i64).sum();
        if input_total < output_total {
            return Err(Error::InvalidAmount(
                "inputs less than outputs".to_string(),
            ));
        }
        Ok((input_total - output_total) as u64)
    }
}

fn script_code_for(script_pubkey: &Script) -> Script {
    if script_pubkey.is_v0_p2wpkh() {
        // BIP143 signs witness-pubkey-hash inputs over the equivalent p2pkh
        let bytes = script_pubkey.as_bytes();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes[2..22]);
        bitcoin::blockdata::script::Builder::new()
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_DUP)
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_HASH160)
            .push_slice(&hash)
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_EQUALVERIFY)
            .push_opcode(bitcoin::blockdata::opcodes::all::OP_CHECKSIG)
            .into_script()
    } else {
        script_pubkey.clone()
    }
}

/// BIP69 deterministic ordering: inputs by (reversed txid, vout), outputs
/// by (value, script)
pub fn bip69_sort(tx: &mut Transaction) {
    tx.input.sort_by(|a, b| {
        let a_txid = reversed_txid(&a.previous_output.txid);
        let b_txid = reversed_txid(&b.previous_output.txid);
        a_txid
            .cmp(&b_txid)
            .then(a.previous_output.vout.cmp(&b.previous_output.vout))
    });
    tx.output.sort_by(|a, b| {
        a.value
            .cmp(&b.value)
            .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
    });
}

/// Txids compare in their big-endian (display) byte order under BIP69
fn reversed_txid(txid: &Txid) -> [u8; 32] {
    let mut bytes = txid.into_inner();
    bytes.reverse();
    bytes
}
