// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Component wiring.
//!
//! Builds the store, fetcher and executor, registers the continuous pollers
//! for every configured chain, and runs the executor under a cancellation
//! token. The returned [`OracleClient`] handle is what the embedding layer
//! (API server, UI bridge) uses to read state and start workflows.

use crate::chain_client::ChainClient;
use crate::config::ClientConfig;
use crate::executor::{Executor, ExecutorHandle};
use crate::metrics::ClientMetrics;
use crate::store::Store;
use crate::tasks::workflows::{
    ApproveSpend, DisputePrice, FetchPastEvents, ProposePrice, SetActiveRequest, SetUser,
    SwitchChain, WorkflowReceiver,
};
use crate::tasks::{ActiveRequestRefresher, NewEventPoller, ACTIVE_REQUEST_REFRESHER_ID};
use crate::update::Update;
use anyhow::{bail, Result};
use ethers::types::{Address, I256, U256};
use oracle_types::{ChainId, RequestKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Handle to a running client engine.
pub struct OracleClient {
    config: ClientConfig,
    store: Arc<Store>,
    update: Arc<Update>,
    executor: ExecutorHandle,
    cancel: CancellationToken,
    workflow_seq: AtomicU64,
}

/// Build the engine, register its pollers and spawn the executor loop.
pub fn run_oracle_client(
    config: ClientConfig,
    clients: Vec<Arc<dyn ChainClient>>,
    registry: &prometheus::Registry,
) -> Result<(Arc<OracleClient>, JoinHandle<()>)> {
    config.validate()?;
    let metrics = Arc::new(ClientMetrics::new(registry));

    let store = Arc::new(Store::with_chains(
        config.chains.iter().map(|chain| chain.chain_id()),
    ));
    let update =
        Arc::new(Update::new(store.clone(), clients).with_metrics(metrics.clone()));
    for chain in &config.chains {
        if !update.has_chain(chain.chain_id()) {
            bail!("chain {} is configured but has no client", chain.chain_id);
        }
    }

    let mut executor = Executor::new().with_metrics(metrics.clone());
    executor.insert(
        ACTIVE_REQUEST_REFRESHER_ID,
        Box::new(
            ActiveRequestRefresher::new(update.clone())
                .with_interval(config.refresh_interval()),
        ),
    );
    for chain in &config.chains {
        let poller = NewEventPoller::new(update.clone(), chain.chain_id())
            .with_start_block(chain.start_block)
            .with_poll_rate(chain.poll_rate())
            .with_metrics(metrics.clone());
        executor.insert(crate::tasks::event_poller_id(chain.chain_id()), Box::new(poller));
    }

    let handle = executor.handle();
    let cancel = CancellationToken::new();
    let join = tokio::spawn(executor.run(cancel.child_token()));
    info!(
        "oracle client started: {} chain(s), refresh every {:?}",
        config.chains.len(),
        config.refresh_interval()
    );

    let client = Arc::new(OracleClient {
        config,
        store,
        update,
        executor: handle,
        cancel,
        workflow_seq: AtomicU64::new(0),
    });
    Ok((client, join))
}

impl OracleClient {
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn update(&self) -> &Arc<Update> {
        &self.update
    }

    pub fn executor(&self) -> &ExecutorHandle {
        &self.executor
    }

    /// Stop the executor loop. Running handler bodies finish their current
    /// invocation; nothing new is scheduled afterwards.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn workflow_id(&self, name: &str) -> String {
        let seq = self.workflow_seq.fetch_add(1, Ordering::Relaxed);
        format!("{name} - {seq}")
    }

    /// Select the active chain and account, prefetching the user's balance
    /// and oracle allowance for the active request's currency.
    pub fn set_user(&self, chain_id: ChainId, account: Address) -> WorkflowReceiver {
        let (task, rx) = SetUser::new(self.update.clone(), chain_id, account);
        let task = task.with_policy(self.config.workflow_policy());
        self.executor.spawn(self.workflow_id("set_user"), Box::new(task));
        rx
    }

    /// Select the active request and fetch its record and currency metadata.
    pub fn set_active_request(&self, key: RequestKey) -> WorkflowReceiver {
        let (task, rx) = SetActiveRequest::new(self.update.clone(), key);
        let task = task.with_policy(self.config.workflow_policy());
        self.executor
            .spawn(self.workflow_id("set_active_request"), Box::new(task));
        rx
    }

    /// Approve the oracle to spend collateral for the active account.
    pub fn approve_spend(
        &self,
        chain_id: ChainId,
        token: Address,
        amount: U256,
    ) -> WorkflowReceiver {
        let (task, rx) = ApproveSpend::new(self.update.clone(), chain_id, token, amount);
        let task = task.with_policy(self.config.workflow_policy());
        self.executor
            .spawn(self.workflow_id("approve_spend"), Box::new(task));
        rx
    }

    /// Propose a price for a request in the `Requested` state.
    pub fn propose_price(&self, key: RequestKey, price: I256) -> WorkflowReceiver {
        let (task, rx) = ProposePrice::new(self.update.clone(), key, price);
        let task = task.with_policy(self.config.workflow_policy());
        self.executor
            .spawn(self.workflow_id("propose_price"), Box::new(task));
        rx
    }

    /// Dispute a proposal in the `Proposed` state.
    pub fn dispute_price(&self, key: RequestKey) -> WorkflowReceiver {
        let (task, rx) = DisputePrice::new(self.update.clone(), key);
        let task = task.with_policy(self.config.workflow_policy());
        self.executor
            .spawn(self.workflow_id("dispute_price"), Box::new(task));
        rx
    }

    /// Switch the active chain after verifying the target is reachable.
    pub fn switch_chain(&self, chain_id: ChainId) -> WorkflowReceiver {
        let (task, rx) = SwitchChain::new(self.update.clone(), chain_id);
        let task = task.with_policy(self.config.workflow_policy());
        self.executor
            .spawn(self.workflow_id("switch_chain"), Box::new(task));
        rx
    }

    /// Backfill historical events over `[from, to]` in `chunk`-sized ranges.
    pub fn fetch_past_events(
        &self,
        chain_id: ChainId,
        from: u64,
        to: u64,
        chunk: u64,
    ) -> WorkflowReceiver {
        let (task, rx) = FetchPastEvents::new(self.update.clone(), chain_id, from, to, chunk);
        let task = task.with_policy(self.config.workflow_policy());
        self.executor
            .spawn(self.workflow_id("fetch_past_events"), Box::new(task));
        rx
    }
}
