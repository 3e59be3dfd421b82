// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Coin selection
//!
//! A max-value-age selector: candidates are ranked by value times
//! confirmations and taken greedily until the target is covered, preferring
//! old, large outputs. Equal priorities fall back to larger values so the
//! input count stays small. Deterministic by construction, which multisig
//! co-signing relies on.

use bitcoin::PrivateKey;

use crate::error::Error;
use crate::types::Utxo;

/// Hard cap on inputs per transaction
pub const MAX_INPUTS: usize = 10_000;

/// A UTXO the wallet can sign for, tagged for selection
#[derive(Debug, Clone)]
pub struct SpendableCoin {
    pub utxo: Utxo,
    pub key: PrivateKey,
    pub confirmations: i64,
}

impl SpendableCoin {
    fn priority(&self) -> i128 {
        self.utxo.value as i128 * self.confirmations.max(0) as i128
    }
}

/// Pick coins covering `target`, maximizing aggregate value-age.
///
/// Fails with [`Error::InsufficientFunds`] when even every candidate
/// together (bounded by [`MAX_INPUTS`]) cannot cover the target.
pub fn select_coins(
    mut candidates: Vec<SpendableCoin>,
    target: i64,
) -> Result<Vec<SpendableCoin>, Error> {
    candidates.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then(b.utxo.value.cmp(&a.utxo.value))
    });

    let mut selected = Vec::new();
    let mut total = 0i64;
    for coin in candidates {
        if selected.len() >= MAX_INPUTS {
            break;
        }
        total += coin.utxo.value as i64;
        selected.push(coin);
        if total >= target {
            return Ok(selected);
        }
    }
    Err(Error::InsufficientFunds)
}
