// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Single-endpoint Insight client
//!
//! One HTTP connection for queries and one websocket for push events. The
//! websocket starts with a `subscribe inv` firehose; block hashes and
//! address hits arriving there are resolved back over HTTP into the common
//! models and published on the client's two channels.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use bitcoin::hashes::hex::{FromHex, ToHex};

use crate::client::models::*;
use crate::client::ChainClient;
use crate::error::Error;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Page size of the `addrs/txs` endpoint
const TX_PAGE_SIZE: usize = 50;
const NOTIFY_BUFFER: usize = 32;

pub(crate) struct Inner {
    http: reqwest::Client,
    base_url: String,
    ws_url: String,
    block_sender: mpsc::Sender<Block>,
    tx_sender: mpsc::Sender<Transaction>,
    block_receiver: Mutex<Option<mpsc::Receiver<Block>>>,
    tx_receiver: Mutex<Option<mpsc::Receiver<Transaction>>>,
    /// Outbound websocket frames once connected
    ws_out: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Addresses subscribed before (or between) websocket sessions
    subscriptions: Mutex<BTreeSet<String>>,
    shutdown: watch::Sender<bool>,
}

/// HTTP + websocket channel to one chain-indexing endpoint
pub struct InsightClient {
    inner: Arc<Inner>,
}

impl InsightClient {
    /// Build a client for `api_url` (e.g. `https://insight.bitpay.com/api`),
    /// optionally tunneling through a SOCKS5 proxy
    pub fn new(api_url: &str, proxy: Option<&str>) -> Result<InsightClient, Error> {
        let base_url = api_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Protocol(format!("unknown url scheme in {}", api_url)));
        }

        let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(format!("socks5h://{}", proxy))
                .map_err(|e| Error::Protocol(format!("bad proxy address: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let http = builder.build()?;

        let ws_url = format!("{}/ws", base_url.replacen("http", "ws", 1));

        let (block_sender, block_receiver) = mpsc::channel(NOTIFY_BUFFER);
        let (tx_sender, tx_receiver) = mpsc::channel(NOTIFY_BUFFER);
        let (shutdown, _) = watch::channel(false);

        Ok(InsightClient {
            inner: Arc::new(Inner {
                http,
                base_url,
                ws_url,
                block_sender,
                tx_sender,
                block_receiver: Mutex::new(Some(block_receiver)),
                tx_receiver: Mutex::new(Some(tx_receiver)),
                ws_out: Mutex::new(None),
                subscriptions: Mutex::new(BTreeSet::new()),
                shutdown,
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.base_url
    }

    /// Open the websocket, subscribe to the new-block firehose and replay
    /// address subscriptions. Fails with [`Error::ConnectTimeout`] when no
    /// connection is established within ten seconds.
    pub async fn start(&self) -> Result<(), Error> {
        let (stream, _) = timeout(WS_CONNECT_TIMEOUT, connect_async(self.inner.ws_url.as_str()))
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(|e| Error::Network(format!("websocket connect: {}", e)))?;
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let _ = out_tx.send(subscribe_frame("inv"));
        for addr in self.inner.subscriptions.lock().unwrap().iter() {
            let _ = out_tx.send(subscribe_frame(addr));
        }
        *self.inner.ws_out.lock().unwrap() = Some(out_tx);

        let mut writer_shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => match frame {
                        Some(frame) => {
                            if write.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_shutdown.changed() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let inner = self.inner.clone();
        let mut reader_shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => handle_event(&inner, &text).await,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("websocket read failed on {}: {}", inner.base_url, e);
                            break;
                        }
                        None => break,
                    },
                    _ = reader_shutdown.changed() => break,
                }
            }
        });

        Ok(())
    }

    /// Cancel in-flight work, close the websocket and drain the channels
    pub fn close(&self) {
        let _ = self.inner.shutdown.send(true);
        *self.inner.ws_out.lock().unwrap() = None;
    }

    /// The channel block notifications arrive on; can only be taken once
    pub fn take_block_channel(&self) -> Option<mpsc::Receiver<Block>> {
        self.inner.block_receiver.lock().unwrap().take()
    }

    /// The channel transaction notifications arrive on; can only be taken once
    pub fn take_tx_channel(&self) -> Option<mpsc::Receiver<Transaction>> {
        self.inner.tx_receiver.lock().unwrap().take()
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, Error> {
        let url = format!("{}/{}", self.inner.base_url, path);
        let mut response = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if response.status() == StatusCode::BAD_REQUEST {
            // deployed indexers occasionally glitch on request parsing;
            // one same-endpoint replay before giving up on it
            response = self
                .inner
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
        }
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response, Error> {
        let url = format!("{}/{}", self.inner.base_url, path);
        let mut response = self
            .inner
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        if response.status() == StatusCode::BAD_REQUEST {
            response = self
                .inner
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
        }
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        Ok(response)
    }

    async fn get_transaction_page(
        &self,
        addrs: &str,
        from: usize,
        to: usize,
    ) -> Result<TransactionList, Error> {
        let response = self
            .post(
                "addrs/txs",
                json!({ "addrs": addrs, "from": from, "to": to }),
            )
            .await?;
        response
            .json::<TransactionList>()
            .await
            .map_err(|e| Error::Protocol(format!("decoding transaction list: {}", e)))
    }
}

fn subscribe_frame(topic: &str) -> String {
    json!({ "method": "subscribe", "params": [topic] }).to_string()
}

async fn handle_event(inner: &Arc<Inner>, text: &str) {
    let event: SocketEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("ignoring unparseable websocket frame: {}", e);
            return;
        }
    };

    match event.event.as_str() {
        "bitcoind/hashblock" => {
            // the event only carries a hash; pull the authoritative tip
            match fetch_best_block(inner).await {
                Ok(block) => {
                    let _ = inner.block_sender.send(block).await;
                }
                Err(e) => error!("fetching best block after hashblock event: {}", e),
            }
        }
        "bitcoind/addresstxid" => {
            let hit: AddressTxid = match serde_json::from_value(event.data) {
                Ok(hit) => hit,
                Err(e) => {
                    debug!("ignoring malformed addresstxid event: {}", e);
                    return;
                }
            };
            match fetch_transaction(inner, &hit.txid).await {
                Ok(tx) => {
                    let _ = inner.tx_sender.send(tx).await;
                }
                Err(e) => error!("fetching transaction {}: {}", hit.txid, e),
            }
        }
        other => debug!("ignoring websocket event {:?}", other),
    }
}

async fn fetch_best_block(inner: &Arc<Inner>) -> Result<Block, Error> {
    let url = format!("{}/blocks?limit=1", inner.base_url);
    let list: BlockList = inner
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Network(e.to_string()))?
        .json()
        .await
        .map_err(|e| Error::Protocol(format!("decoding block list: {}", e)))?;
    list.blocks.into_iter().next().ok_or(Error::NotFound)
}

async fn fetch_transaction(inner: &Arc<Inner>, txid: &str) -> Result<Transaction, Error> {
    let url = format!("{}/tx/{}", inner.base_url, txid);
    inner
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Network(e.to_string()))?
        .json()
        .await
        .map_err(|e| Error::Protocol(format!("decoding transaction: {}", e)))
}

#[async_trait]
impl ChainClient for InsightClient {
    async fn get_info(&self) -> Result<Info, Error> {
        let response = self.get("status?q=values").await?;
        let status: Status = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("decoding status: {}", e)))?;
        Ok(status.info)
    }

    async fn get_best_block(&self) -> Result<Block, Error> {
        let response = self.get("blocks?limit=1").await?;
        let list: BlockList = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("decoding block list: {}", e)))?;
        list.blocks.into_iter().next().ok_or(Error::NotFound)
    }

    async fn get_transaction(&self, txid: &str) -> Result<Transaction, Error> {
        let response = self.get(&format!("tx/{}", txid)).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("decoding transaction: {}", e)))
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Vec<u8>, Error> {
        #[derive(serde::Deserialize)]
        struct RawTx {
            rawtx: String,
        }
        let response = self.get(&format!("rawtx/{}", txid)).await?;
        let raw: RawTx = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("decoding raw transaction: {}", e)))?;
        Ok(Vec::<u8>::from_hex(&raw.rawtx)?)
    }

    async fn get_transactions(&self, addrs: &[String]) -> Result<Vec<Transaction>, Error> {
        let joined = addrs.join(",");
        let mut transactions = Vec::new();
        let mut from = 0;
        loop {
            let page = self
                .get_transaction_page(&joined, from, from + TX_PAGE_SIZE)
                .await?;
            let received = page.items.len();
            transactions.extend(page.items);
            if transactions.len() >= page.total_items || received == 0 {
                break;
            }
            from += TX_PAGE_SIZE;
        }
        Ok(transactions)
    }

    async fn get_utxos(&self, addrs: &[String]) -> Result<Vec<Utxo>, Error> {
        let response = self
            .post("addrs/utxo", json!({ "addrs": addrs.join(",") }))
            .await?;
        response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("decoding utxo list: {}", e)))
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, Error> {
        let response = self
            .post("tx/send", json!({ "rawtx": raw_tx.to_hex() }))
            .await?;
        let result: BroadcastResult = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("decoding broadcast result: {}", e)))?;
        Ok(result.txid)
    }

    async fn estimate_fee(&self, n_blocks: u32) -> Result<u64, Error> {
        let response = self
            .get(&format!("utils/estimatefee?nBlocks={}", n_blocks))
            .await?;
        // the server answers with {"<n>": <coin per kilobyte>}
        let estimates: std::collections::BTreeMap<String, Amount> = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("decoding fee estimate: {}", e)))?;
        let per_kb = estimates
            .get(&n_blocks.to_string())
            .copied()
            .or_else(|| estimates.values().next().copied())
            .ok_or_else(|| Error::Protocol("empty fee estimate".to_string()))?;
        Ok((per_kb.as_sats().max(0) as u64) / 1000)
    }

    async fn listen_address(&self, addr: &str) {
        self.inner
            .subscriptions
            .lock()
            .unwrap()
            .insert(addr.to_string());
        if let Some(out) = self.inner.ws_out.lock().unwrap().as_ref() {
            let _ = out.send(subscribe_frame(addr));
        }
    }
}
