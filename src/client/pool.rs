// Polywallet
// Copyright (c) 2021 The Polywallet Developers
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Health-tracked endpoint rotation
//!
//! The pool exposes the indexer interface across N endpoints so a single
//! endpoint failure is invisible to callers. One endpoint is live at a
//! time. RPC callers hold a shared lease on the live slot for the duration
//! of their request; rotation takes the exclusive lease, closes the current
//! client, selects the next healthy endpoint (sleeping until the earliest
//! backoff expiry when none is healthy), replays address subscriptions and
//! restarts the stream fan-in. The shared lease is never held across a
//! suspension that waits on another lease, so readers and the rotation path
//! cannot deadlock.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::{mpsc, watch, RwLock};

use crate::client::models::{Block, Info, Transaction, Utxo};
use crate::client::{ChainClient, InsightClient};
use crate::error::Error;

/// Failures within this window of the previous one double the backoff
const FAILURE_MEMORY: Duration = Duration::from_secs(5 * 60);
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const NOTIFY_BUFFER: usize = 32;

/// Lifecycle of the currently selected endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Unselected,
    Starting,
    Live,
    Failing,
    Closed,
}

#[derive(Debug, Clone)]
struct EndpointHealth {
    last_failed_at: Option<Instant>,
    backoff: Duration,
}

impl EndpointHealth {
    fn new() -> EndpointHealth {
        EndpointHealth {
            last_failed_at: None,
            backoff: INITIAL_BACKOFF,
        }
    }

    fn mark_failed(&mut self) {
        let now = Instant::now();
        self.backoff = match self.last_failed_at {
            Some(previous) if now.duration_since(previous) < FAILURE_MEMORY => {
                (self.backoff * 2).min(MAX_BACKOFF)
            }
            _ => INITIAL_BACKOFF,
        };
        self.last_failed_at = Some(now);
    }

    /// The instant this endpoint may be selected again
    fn next_available(&self) -> Instant {
        match self.last_failed_at {
            Some(failed_at) => failed_at + self.backoff,
            None => Instant::now(),
        }
    }

    fn is_healthy(&self, now: Instant) -> bool {
        now >= self.next_available()
    }
}

struct Slot {
    index: usize,
    state: PoolState,
    client: Arc<InsightClient>,
}

struct PoolInner {
    endpoints: Vec<String>,
    proxy: Option<String>,
    health: Vec<Mutex<EndpointHealth>>,
    slot: RwLock<Slot>,
    block_sender: mpsc::Sender<Block>,
    tx_sender: mpsc::Sender<Transaction>,
    block_receiver: Mutex<Option<mpsc::Receiver<Block>>>,
    tx_receiver: Mutex<Option<mpsc::Receiver<Transaction>>>,
    /// Every address subscribed so far, replayed onto each new endpoint
    listening: Mutex<BTreeSet<String>>,
    /// Set once `start` succeeds; rotation then re-establishes websockets
    streaming: AtomicBool,
    fanin_cancel: Mutex<Option<watch::Sender<bool>>>,
}

/// Rotating multi-endpoint indexer client
pub struct ClientPool {
    inner: Arc<PoolInner>,
}

/// Run one RPC against the live client under a shared lease, rotating on
/// retryable failures until every endpoint had its chance.
macro_rules! with_rotation {
    ($self:expr, $client:ident => $call:expr) => {{
        let mut attempts = 0usize;
        loop {
            let result = {
                let slot = $self.inner.slot.read().await;
                let $client = slot.client.clone();
                $call
            };
            match result {
                Ok(value) => break Ok(value),
                Err(e) if e.is_retryable() => {
                    attempts += 1;
                    if attempts > $self.inner.endpoints.len() {
                        break Err(Error::AllEndpointsFailed);
                    }
                    warn!("endpoint request failed, rotating: {}", e);
                    if $self.rotate().await.is_err() {
                        break Err(Error::AllEndpointsFailed);
                    }
                }
                Err(e) => break Err(e),
            }
        }
    }};
}

impl ClientPool {
    pub fn new(endpoints: Vec<String>, proxy: Option<String>) -> Result<ClientPool, Error> {
        if endpoints.is_empty() {
            return Err(Error::Protocol("no client endpoints provided".to_string()));
        }
        let first = Arc::new(InsightClient::new(&endpoints[0], proxy.as_deref())?);
        let health = endpoints
            .iter()
            .map(|_| Mutex::new(EndpointHealth::new()))
            .collect();
        let (block_sender, block_receiver) = mpsc::channel(NOTIFY_BUFFER);
        let (tx_sender, tx_receiver) = mpsc::channel(NOTIFY_BUFFER);

        Ok(ClientPool {
            inner: Arc::new(PoolInner {
                endpoints,
                proxy,
                health,
                slot: RwLock::new(Slot {
                    index: 0,
                    state: PoolState::Unselected,
                    client: first,
                }),
                block_sender,
                tx_sender,
                block_receiver: Mutex::new(Some(block_receiver)),
                tx_receiver: Mutex::new(Some(tx_receiver)),
                listening: Mutex::new(BTreeSet::new()),
                streaming: AtomicBool::new(false),
                fanin_cancel: Mutex::new(None),
            }),
        })
    }

    /// Connect the first endpoint that will take a websocket, rotating
    /// through the list until one starts
    pub async fn start(&self) -> Result<(), Error> {
        self.inner.streaming.store(true, Ordering::SeqCst);
        let mut slot = self.inner.slot.write().await;
        for _ in 0..self.inner.endpoints.len() {
            let endpoint = &self.inner.endpoints[slot.index];
            slot.state = PoolState::Starting;
            info!("starting endpoint {}", endpoint);
            match self.bring_up(&slot.client).await {
                Ok(()) => {
                    slot.state = PoolState::Live;
                    return Ok(());
                }
                Err(e) => {
                    warn!("failed to start {}: {}", endpoint, e);
                    self.inner.health[slot.index].lock().unwrap().mark_failed();
                    slot.client.close();
                    let next = (slot.index + 1) % self.inner.endpoints.len();
                    let client = Arc::new(InsightClient::new(
                        &self.inner.endpoints[next],
                        self.inner.proxy.as_deref(),
                    )?);
                    slot.index = next;
                    slot.client = client;
                }
            }
        }
        slot.state = PoolState::Failing;
        Err(Error::AllEndpointsFailed)
    }

    /// Open the websocket on a fresh client, replay subscriptions and attach
    /// the stream fan-in
    async fn bring_up(&self, client: &Arc<InsightClient>) -> Result<(), Error> {
        client.start().await?;
        let addresses: Vec<String> = self
            .inner
            .listening
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect();
        for address in addresses {
            client.listen_address(&address).await;
        }
        self.spawn_fanin(client);
        Ok(())
    }

    fn cancel_fanin(&self) {
        if let Some(cancel) = self.inner.fanin_cancel.lock().unwrap().take() {
            let _ = cancel.send(true);
        }
    }

    /// Copy the live client's channels into the pool channels until rotation
    /// or close cancels the task. Subscribers see one coherent stream across
    /// rotations.
    fn spawn_fanin(&self, client: &Arc<InsightClient>) {
        let mut block_rx = match client.take_block_channel() {
            Some(rx) => rx,
            None => return,
        };
        let mut tx_rx = match client.take_tx_channel() {
            Some(rx) => rx,
            None => return,
        };

        let (cancel, mut cancelled) = watch::channel(false);
        *self.inner.fanin_cancel.lock().unwrap() = Some(cancel);

        let block_out = self.inner.block_sender.clone();
        let tx_out = self.inner.tx_sender.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    block = block_rx.recv() => match block {
                        Some(block) => {
                            let _ = block_out.send(block).await;
                        }
                        None => break,
                    },
                    tx = tx_rx.recv() => match tx {
                        Some(tx) => {
                            let _ = tx_out.send(tx).await;
                        }
                        None => break,
                    },
                    _ = cancelled.changed() => break,
                }
            }
        });
    }

    /// Close the current endpoint and bring up the next healthy one.
    ///
    /// Takes the exclusive lease, so it waits for in-flight RPCs to finish
    /// and blocks new ones until the switch is done.
    async fn rotate(&self) -> Result<(), Error> {
        let mut slot = self.inner.slot.write().await;
        slot.state = PoolState::Failing;
        self.cancel_fanin();
        slot.client.close();
        self.inner.health[slot.index].lock().unwrap().mark_failed();

        for _ in 0..self.inner.endpoints.len() {
            let index = self.next_healthy(slot.index).await;
            let endpoint = &self.inner.endpoints[index];
            slot.state = PoolState::Starting;
            info!("rotating to endpoint {}", endpoint);

            let client = Arc::new(InsightClient::new(endpoint, self.inner.proxy.as_deref())?);
            if self.inner.streaming.load(Ordering::SeqCst) {
                if let Err(e) = self.bring_up(&client).await {
                    warn!("failed to start {}: {}", endpoint, e);
                    self.inner.health[index].lock().unwrap().mark_failed();
                    slot.index = index;
                    continue;
                }
            }
            slot.index = index;
            slot.client = client;
            slot.state = PoolState::Live;
            return Ok(());
        }

        slot.state = PoolState::Failing;
        Err(Error::AllEndpointsFailed)
    }

    /// The next endpoint whose backoff has expired, in rotation order from
    /// `current`. Sleeps until the earliest `next_available` when every
    /// endpoint is still backing off.
    async fn next_healthy(&self, current: usize) -> usize {
        loop {
            let now = Instant::now();
            let mut earliest: Option<(usize, Instant)> = None;
            for offset in 1..=self.inner.endpoints.len() {
                let index = (current + offset) % self.inner.endpoints.len();
                let health = self.inner.health[index].lock().unwrap();
                if health.is_healthy(now) {
                    return index;
                }
                let available = health.next_available();
                if earliest.map_or(true, |(_, at)| available < at) {
                    earliest = Some((index, available));
                }
            }
            let (_, at) = earliest.expect("at least one endpoint");
            tokio::time::sleep(at.saturating_duration_since(now)).await;
        }
    }

    /// The endpoint currently serving requests
    pub async fn current_endpoint(&self) -> String {
        let slot = self.inner.slot.read().await;
        self.inner.endpoints[slot.index].clone()
    }

    pub async fn state(&self) -> PoolState {
        self.inner.slot.read().await.state
    }

    /// Block notifications across all rotations; can only be taken once
    pub fn take_block_channel(&self) -> Option<mpsc::Receiver<Block>> {
        self.inner.block_receiver.lock().unwrap().take()
    }

    /// Transaction notifications across all rotations; can only be taken once
    pub fn take_tx_channel(&self) -> Option<mpsc::Receiver<Transaction>> {
        self.inner.tx_receiver.lock().unwrap().take()
    }

    /// Stop streaming and close the live client
    pub async fn close(&self) {
        self.inner.streaming.store(false, Ordering::SeqCst);
        let mut slot = self.inner.slot.write().await;
        self.cancel_fanin();
        slot.client.close();
        slot.state = PoolState::Closed;
    }
}

#[async_trait]
impl ChainClient for ClientPool {
    async fn get_info(&self) -> Result<Info, Error> {
        with_rotation!(self, client => client.get_info().await)
    }

    async fn get_best_block(&self) -> Result<Block, Error> {
        with_rotation!(self, client => client.get_best_block().await)
    }

    async fn get_transaction(&self, txid: &str) -> Result<Transaction, Error> {
        with_rotation!(self, client => client.get_transaction(txid).await)
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<Vec<u8>, Error> {
        with_rotation!(self, client => client.get_raw_transaction(txid).await)
    }

    async fn get_transactions(&self, addrs: &[String]) -> Result<Vec<Transaction>, Error> {
        with_rotation!(self, client => client.get_transactions(addrs).await)
    }

    async fn get_utxos(&self, addrs: &[String]) -> Result<Vec<Utxo>, Error> {
        with_rotation!(self, client => client.get_utxos(addrs).await)
    }

    async fn broadcast(&self, raw_tx: &[u8]) -> Result<String, Error> {
        with_rotation!(self, client => client.broadcast(raw_tx).await)
    }

    async fn estimate_fee(&self, n_blocks: u32) -> Result<u64, Error> {
        with_rotation!(self, client => client.estimate_fee(n_blocks).await)
    }

    async fn listen_address(&self, addr: &str) {
        self.inner
            .listening
            .lock()
            .unwrap()
            .insert(addr.to_string());
        let slot = self.inner.slot.read().await;
        slot.client.listen_address(addr).await;
    }
}

#[cfg(test)]
mod test {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn status_body(blocks: i32) -> serde_json::Value {
        json!({ "info": { "blocks": blocks, "network": "livenet" } })
    }

    #[tokio::test]
    async fn test_rotates_past_server_error() {
        let bad = MockServer::start();
        bad.mock(|when, then| {
            when.method(GET).path("/api/tx/beef");
            then.status(500);
        });
        let good = MockServer::start();
        good.mock(|when, then| {
            when.method(GET).path("/api/tx/beef");
            then.status(200)
                .json_body(json!({ "txid": "beef", "vin": [], "vout": [] }));
        });

        let pool = ClientPool::new(vec![bad.url("/api"), good.url("/api")], None).unwrap();
        let tx = pool.get_transaction("beef").await.unwrap();
        assert_eq!(tx.txid, "beef");
        assert_eq!(pool.current_endpoint().await, good.url("/api"));
    }

    #[tokio::test]
    async fn test_every_call_succeeds_with_one_good_endpoint() {
        let bad = MockServer::start();
        bad.mock(|when, then| {
            when.method(GET).path("/api/status");
            then.status(502);
        });
        let good = MockServer::start();
        good.mock(|when, then| {
            when.method(GET).path("/api/status");
            then.status(200).json_body(status_body(100));
        });

        let pool = ClientPool::new(vec![bad.url("/api"), good.url("/api")], None).unwrap();
        for _ in 0..3 {
            let info = pool.get_info().await.unwrap();
            assert_eq!(info.blocks, 100);
        }
    }

    #[tokio::test]
    async fn test_all_endpoints_failed() {
        let bad = MockServer::start();
        bad.mock(|when, then| {
            when.method(GET).path("/api/status");
            then.status(500);
        });

        let pool = ClientPool::new(vec![bad.url("/api")], None).unwrap();
        let err = pool.get_info().await.unwrap_err();
        assert!(matches!(err, Error::AllEndpointsFailed));
    }

    #[tokio::test]
    async fn test_backoff_doubles_within_memory() {
        let mut health = EndpointHealth::new();
        health.mark_failed();
        assert_eq!(health.backoff, INITIAL_BACKOFF);
        health.mark_failed();
        assert_eq!(health.backoff, INITIAL_BACKOFF * 2);
        health.mark_failed();
        assert_eq!(health.backoff, INITIAL_BACKOFF * 4);
        for _ in 0..10 {
            health.mark_failed();
        }
        assert_eq!(health.backoff, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_listen_addresses_accumulate() {
        let server = MockServer::start();
        let pool = ClientPool::new(vec![server.url("/api")], None).unwrap();
        pool.listen_address("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").await;
        pool.listen_address("1BoatSLRHtKNngkdXEeobR76b53LETtpyT").await;
        assert_eq!(pool.inner.listening.lock().unwrap().len(), 1);
    }
}
