// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Fee-rate resolution
//!
//! Maps a [`FeeLevel`] to satoshis per byte. Three sources, in precedence
//! order: a fiat anchor via an exchange-rate provider, a remote fee API with
//! a one-minute cache, and finally the static per-level floors from the coin
//! config. The provider never fails; every fallback lands on the floors.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;
use serde::Deserialize;

use crate::error::Error;
use crate::types::FeeLevel;

/// How long a remote fee quote is trusted
const FEE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Fiat targets in US cents for a 226-byte median transaction
const ECONOMIC_TARGET_CENTS: f64 = 0.1;
const NORMAL_TARGET_CENTS: f64 = 1.0;
const PRIORITY_TARGET_CENTS: f64 = 5.0;
/// Size of the median transaction the fiat targets are quoted against
const MEDIAN_TX_SIZE: f64 = 226.0;

/// Source of fiat exchange rates for the fiat-anchored mode
pub trait ExchangeRates: Send + Sync {
    /// Coins per unit of `currency`, e.g. BTC per USD-priced coin
    fn latest_rate(&self, currency: &str) -> Result<f64, Error>;
}

/// Response shape of the fee API
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFees {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
}

struct FeeCache {
    fees: ApiFees,
    fetched_at: Instant,
}

pub struct FeeProvider {
    low: u64,
    medium: u64,
    high: u64,
    max: u64,
    fee_api: Option<String>,
    exchange_rates: Option<Box<dyn ExchangeRates>>,
    http: reqwest::Client,
    cache: Mutex<Option<FeeCache>>,
}

impl FeeProvider {
    pub fn new(
        low: u64,
        medium: u64,
        high: u64,
        max: u64,
        fee_api: Option<String>,
        exchange_rates: Option<Box<dyn ExchangeRates>>,
    ) -> FeeProvider {
        FeeProvider {
            low,
            medium,
            high,
            max,
            fee_api,
            exchange_rates,
            http: reqwest::Client::new(),
            cache: Mutex::new(None),
        }
    }

    fn static_fee(&self, level: FeeLevel) -> u64 {
        match level {
            FeeLevel::Economic => self.low,
            FeeLevel::Normal => self.medium,
            FeeLevel::Priority => self.high,
            FeeLevel::FeeBump => self.high * 2,
        }
    }

    /// Resolve a fee level to satoshis per byte
    pub async fn fee_per_byte(&self, level: FeeLevel) -> u64 {
        if let Some(rate) = self.fiat_rate() {
            return self.fiat_fee(level, rate);
        }
        if self.fee_api.is_some() {
            if let Some(fees) = self.api_fees().await {
                return self.clamp(self.api_fee(level, &fees));
            }
        }
        self.static_fee(level)
    }

    fn fiat_rate(&self) -> Option<f64> {
        let provider = self.exchange_rates.as_ref()?;
        match provider.latest_rate("USD") {
            Ok(rate) if rate > 0.0 => Some(rate),
            Ok(_) => None,
            Err(e) => {
                debug!("exchange rate unavailable: {}", e);
                None
            }
        }
    }

    fn fiat_fee(&self, level: FeeLevel, rate: f64) -> u64 {
        let target_cents = match level {
            FeeLevel::Economic => ECONOMIC_TARGET_CENTS,
            FeeLevel::Normal => NORMAL_TARGET_CENTS,
            FeeLevel::Priority => PRIORITY_TARGET_CENTS,
            FeeLevel::FeeBump => PRIORITY_TARGET_CENTS * 2.0,
        };
        let fee_per_byte = (((target_cents / 100.0) / rate) * 100_000_000.0) / MEDIAN_TX_SIZE;
        if fee_per_byte as u64 > self.max {
            return self.max;
        }
        if fee_per_byte as u64 == 0 {
            return 1;
        }
        fee_per_byte as u64
    }

    async fn api_fees(&self) -> Option<ApiFees> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < FEE_CACHE_TTL {
                    return Some(cached.fees);
                }
            }
        }

        let url = self.fee_api.as_ref()?;
        let fees: ApiFees = match self.fetch_fees(url).await {
            Ok(fees) => fees,
            Err(e) => {
                debug!("fee api unavailable: {}", e);
                return None;
            }
        };

        *self.cache.lock().unwrap() = Some(FeeCache {
            fees,
            fetched_at: Instant::now(),
        });
        Some(fees)
    }

    async fn fetch_fees(&self, url: &str) -> Result<ApiFees, Error> {
        Ok(self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<ApiFees>()
            .await?)
    }

    fn api_fee(&self, level: FeeLevel, fees: &ApiFees) -> u64 {
        match level {
            FeeLevel::Economic => fees.hour_fee,
            FeeLevel::Normal => fees.half_hour_fee,
            FeeLevel::Priority => fees.fastest_fee,
            FeeLevel::FeeBump => fees.fastest_fee * 2,
        }
    }

    fn clamp(&self, fee: u64) -> u64 {
        fee.max(self.low).min(self.max)
    }
}
