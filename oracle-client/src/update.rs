// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain data fetcher.
//!
//! Stateless façade over the per-chain access services. Every method does
//! one logical unit of work: it reads whatever selectors it needs from the
//! store, issues exactly the external reads that unit requires, and commits
//! the result through one write transaction. Methods are idempotent:
//! re-running one just refreshes the same fields.
//!
//! The fetcher performs no retries; failures propagate unmodified and retry
//! policy stays with the calling task.

use crate::chain_client::ChainClient;
use crate::error::{ClientResult, NotFound};
use crate::metrics::ClientMetrics;
use crate::reducer;
use crate::store::Store;
use ethers::types::{Address, U256};
use oracle_types::{ChainId, Request, RequestKey};
use std::collections::HashMap;
use std::sync::Arc;
use tap::TapFallible;
use tracing::{debug, warn};

pub struct Update {
    store: Arc<Store>,
    clients: HashMap<ChainId, Arc<dyn ChainClient>>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Update {
    pub fn new(store: Arc<Store>, clients: Vec<Arc<dyn ChainClient>>) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.chain_id(), client))
            .collect();
        Self {
            store,
            clients,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn has_chain(&self, chain: ChainId) -> bool {
        self.clients.contains_key(&chain)
    }

    pub fn client(&self, chain: ChainId) -> ClientResult<Arc<dyn ChainClient>> {
        self.clients
            .get(&chain)
            .cloned()
            .ok_or_else(|| NotFound::Chain(chain).into())
    }

    /// Spender address for collateral approvals on `chain`.
    pub fn oracle_address(&self, chain: ChainId) -> ClientResult<Address> {
        Ok(self.client(chain)?.oracle_address())
    }

    /// Refresh one request record from its chain.
    pub async fn request(&self, key: &RequestKey) -> ClientResult<()> {
        let client = self.client(key.chain_id)?;
        let request: Request = client
            .get_request(key)
            .await
            .tap_err(|e| self.note_error(key.chain_id, "request", e))?;
        self.note_fetch(key.chain_id, "request");
        self.store
            .write(|txn| {
                txn.put_request(request);
                Ok(())
            })
            .await
    }

    /// Refresh the currently selected request.
    pub async fn active_request(&self) -> ClientResult<()> {
        let key = self.store.read().await.active_request_key()?;
        self.request(&key).await
    }

    /// Refresh one balance entry.
    pub async fn balance(
        &self,
        chain: ChainId,
        token: Address,
        account: Address,
    ) -> ClientResult<()> {
        let client = self.client(chain)?;
        let amount: U256 = client
            .balance_of(token, account)
            .await
            .tap_err(|e| self.note_error(chain, "balance", e))?;
        self.note_fetch(chain, "balance");
        self.store
            .write(|txn| {
                txn.set_balance(chain, token, account, amount);
                Ok(())
            })
            .await
    }

    /// Refresh one allowance entry.
    pub async fn allowance(
        &self,
        chain: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ClientResult<()> {
        let client = self.client(chain)?;
        let amount: U256 = client
            .allowance(token, owner, spender)
            .await
            .tap_err(|e| self.note_error(chain, "allowance", e))?;
        self.note_fetch(chain, "allowance");
        self.store
            .write(|txn| {
                txn.set_allowance(chain, token, owner, spender, amount);
                Ok(())
            })
            .await
    }

    /// Refresh an ERC-20's decimals and symbol.
    pub async fn erc20_metadata(&self, chain: ChainId, token: Address) -> ClientResult<()> {
        let client = self.client(chain)?;
        let meta = client
            .erc20_metadata(token)
            .await
            .tap_err(|e| self.note_error(chain, "erc20_metadata", e))?;
        self.note_fetch(chain, "erc20_metadata");
        self.store
            .write(|txn| {
                txn.set_erc20_metadata(chain, token, meta.decimals, meta.symbol);
                Ok(())
            })
            .await
    }

    /// Refresh a chain's current block time.
    pub async fn block_time(&self, chain: ChainId) -> ClientResult<()> {
        let client = self.client(chain)?;
        let time = client
            .get_block_time()
            .await
            .tap_err(|e| self.note_error(chain, "block_time", e))?;
        self.note_fetch(chain, "block_time");
        if let Some(metrics) = &self.metrics {
            metrics
                .last_block_time
                .with_label_values(&[&chain.to_string()])
                .set(time as i64);
        }
        self.store
            .write(|txn| {
                txn.set_current_time(chain, time);
                Ok(())
            })
            .await
    }

    /// Latest block number. Read-only; nothing is written to the store.
    pub async fn latest_block(&self, chain: ChainId) -> ClientResult<u64> {
        let client = self.client(chain)?;
        client
            .get_block_number()
            .await
            .tap_err(|e| self.note_error(chain, "latest_block", e))
    }

    /// Fetch events in `[from, to]`, fold them through the reducer against
    /// the current snapshot, and commit events plus refreshed request
    /// records in one transaction. Returns the number of events fetched.
    ///
    /// Range sizing is the caller's concern; this method queries the range
    /// it was given.
    pub async fn events(&self, chain: ChainId, from: u64, to: u64) -> ClientResult<usize> {
        let client = self.client(chain)?;
        let events = client
            .query_events(from, to)
            .await
            .tap_err(|e| self.note_error(chain, "events", e))?;
        self.note_fetch(chain, "events");

        let snapshot = self.store.read().await;
        let mut requests: HashMap<RequestKey, Request> = HashMap::new();
        for event in &events {
            if let Ok(existing) = snapshot.request(&event.key) {
                requests.entry(event.key).or_insert_with(|| existing.clone());
            }
        }
        reducer::fold(&mut requests, &events);

        let count = events.len();
        debug!("[{chain}] ingesting {count} events from blocks [{from}, {to}]");
        self.store
            .write(|txn| {
                for event in events {
                    txn.insert_event(event);
                }
                for request in requests.into_values() {
                    txn.put_request(request);
                }
                Ok(())
            })
            .await?;
        Ok(count)
    }

    fn note_fetch(&self, chain: ChainId, op: &str) {
        if let Some(metrics) = &self.metrics {
            metrics
                .fetches
                .with_label_values(&[&chain.to_string(), op])
                .inc();
        }
    }

    fn note_error(&self, chain: ChainId, op: &str, error: &crate::error::ClientError) {
        warn!("[{chain}] {op} fetch failed: {error}");
        if let Some(metrics) = &self.metrics {
            metrics
                .fetch_errors
                .with_label_values(&[&chain.to_string(), op])
                .inc();
        }
    }
}
