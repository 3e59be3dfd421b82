// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Multicoin dispatcher
//!
//! Holds one [`Wallet`] per configured coin. Requests carrying a coin
//! selector route to the matching instance; a missing coin is
//! [`Error::UnsupportedCoin`]. Start and close fan out to every wallet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use bip39::{Language, Mnemonic, MnemonicType};
use log::error;

use crate::config::Config;
use crate::error::Error;
use crate::types::CoinType;
use crate::wallet::Wallet;

pub struct MultiWallet {
    wallets: HashMap<CoinType, Arc<Wallet>>,
    mnemonic: String,
    creation_date: SystemTime,
}

impl MultiWallet {
    /// Build one wallet per configured coin, generating a fresh mnemonic
    /// when the config does not carry one
    pub fn new(config: Config) -> Result<MultiWallet, Error> {
        let (mnemonic, creation_date) = match config.mnemonic {
            Some(mnemonic) if !mnemonic.is_empty() => (mnemonic, config.creation_date),
            _ => {
                let generated = Mnemonic::new(MnemonicType::Words12, Language::English);
                (generated.into_phrase(), SystemTime::now())
            }
        };

        let mut wallets = HashMap::new();
        for coin_config in config.coins {
            let coin = coin_config.coin_type;
            let wallet = Wallet::new(
                coin_config,
                &mnemonic,
                config.network,
                config.proxy.clone(),
            )?;
            wallets.insert(coin, Arc::new(wallet));
        }

        Ok(MultiWallet {
            wallets,
            mnemonic,
            creation_date,
        })
    }

    /// The mnemonic every wallet derives from; persist it for restores
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn creation_date(&self) -> SystemTime {
        self.creation_date
    }

    pub fn coins(&self) -> Vec<CoinType> {
        self.wallets.keys().copied().collect()
    }

    /// Route to one coin's wallet
    pub fn wallet(&self, coin: CoinType) -> Result<&Arc<Wallet>, Error> {
        self.wallets.get(&coin).ok_or(Error::UnsupportedCoin(coin))
    }

    /// Start every wallet concurrently; individual failures are logged and
    /// do not stop the others
    pub async fn start(&self) {
        let starts = self.wallets.values().map(|wallet| {
            let wallet = wallet.clone();
            async move {
                if let Err(e) = wallet.start().await {
                    error!("failed to start {} wallet: {}", wallet.coin_type(), e);
                }
            }
        });
        futures_util::future::join_all(starts).await;
    }

    /// Cascade shutdown to every wallet
    pub async fn close(&self) {
        for wallet in self.wallets.values() {
            wallet.close().await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::SystemTime;

    use bitcoin::Network;

    use super::*;
    use crate::config::CoinConfig;
    use crate::database::MemoryDatastore;

    fn coin_config(coin_type: CoinType) -> CoinConfig {
        CoinConfig {
            coin_type,
            low_fee: 20,
            medium_fee: 30,
            high_fee: 40,
            max_fee: 2000,
            fee_api: None,
            client_apis: vec!["http://localhost:3001/api".to_string()],
            db: Arc::new(MemoryDatastore::new()),
            exchange_rates: None,
        }
    }

    #[test]
    fn test_dispatch_and_unsupported_coin() {
        let config = Config {
            network: Network::Bitcoin,
            mnemonic: Some(
                "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"
                    .to_string(),
            ),
            creation_date: SystemTime::now(),
            proxy: None,
            coins: vec![coin_config(CoinType::Bitcoin), coin_config(CoinType::Zcash)],
        };

        let multiwallet = MultiWallet::new(config).unwrap();
        assert_eq!(multiwallet.coins().len(), 2);
        assert!(multiwallet.wallet(CoinType::Bitcoin).is_ok());
        assert!(matches!(
            multiwallet.wallet(CoinType::Litecoin),
            Err(Error::UnsupportedCoin(CoinType::Litecoin))
        ));
    }

    #[test]
    fn test_generates_mnemonic_when_missing() {
        let config = Config {
            network: Network::Bitcoin,
            mnemonic: None,
            creation_date: SystemTime::now(),
            proxy: None,
            coins: vec![],
        };

        let multiwallet = MultiWallet::new(config).unwrap();
        assert_eq!(multiwallet.mnemonic().split_whitespace().count(), 12);
    }
}
