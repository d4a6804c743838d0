// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-chain new-event poller.
//!
//! Each tick compares the chain head against the poller's checkpoint and
//! ingests `[checkpoint, latest]` when the head has moved. The checkpoint
//! advances only after the whole range has been committed, so a failed tick
//! retries the same range next time: no gap, at worst a duplicate overlap
//! that the set-based event store absorbs.

use crate::error::ClientResult;
use crate::executor::{StepOutcome, Task, TaskContext};
use crate::metrics::ClientMetrics;
use crate::update::Update;
use async_trait::async_trait;
use oracle_types::ChainId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_POLL_RATE: Duration = Duration::from_secs(50);

#[derive(Debug, Clone)]
pub struct PollerParams {
    pub chain_id: ChainId,
    /// First block to watch from. When absent, watching starts at the head
    /// observed on the first tick, with no historical backfill.
    pub start_block: Option<u64>,
    pub poll_rate: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct PollerMemory {
    /// Checkpoint: last block fully ingested. Stays unset until the first
    /// successful range fetch.
    pub last_block: Option<u64>,
    /// Head observed on the first tick when no explicit start was given;
    /// the baseline to watch from until something is ingested.
    pub watch_from: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

pub struct NewEventPoller {
    update: Arc<Update>,
    params: PollerParams,
    memory: PollerMemory,
    name: String,
    metrics: Option<Arc<ClientMetrics>>,
}

impl NewEventPoller {
    pub fn new(update: Arc<Update>, chain_id: ChainId) -> Self {
        Self {
            update,
            params: PollerParams {
                chain_id,
                start_block: None,
                poll_rate: DEFAULT_POLL_RATE,
            },
            memory: PollerMemory::default(),
            name: super::event_poller_id(chain_id),
            metrics: None,
        }
    }

    pub fn with_start_block(mut self, start_block: Option<u64>) -> Self {
        self.params.start_block = start_block;
        self
    }

    pub fn with_poll_rate(mut self, poll_rate: Duration) -> Self {
        self.params.poll_rate = poll_rate;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn memory(&self) -> &PollerMemory {
        &self.memory
    }

    /// Fetch and commit `[from, to]`, then advance the store checkpoint.
    async fn ingest(&self, from: u64, to: u64) -> ClientResult<usize> {
        let chain = self.params.chain_id;
        let count = self.update.events(chain, from, to).await?;
        self.update
            .store()
            .write(|txn| {
                txn.set_event_checkpoint(chain, to);
                Ok(())
            })
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Task for NewEventPoller {
    fn name(&self) -> &str {
        &self.name
    }

    fn handler(&self) -> &'static str {
        "poll"
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        let chain = self.params.chain_id;

        let latest = match self.update.latest_block(chain).await {
            Ok(latest) => latest,
            Err(error) => {
                self.memory.consecutive_failures += 1;
                warn!(
                    "[{chain}] head read failed ({} consecutive): {error}",
                    self.memory.consecutive_failures
                );
                self.memory.last_error = Some(error.to_string());
                return StepOutcome::Sleep(self.params.poll_rate);
            }
        };

        let anchor = self
            .memory
            .last_block
            .or(self.params.start_block)
            .or(self.memory.watch_from);
        let checkpoint = anchor.unwrap_or(latest);

        // Head at (or momentarily behind) the checkpoint: nothing to query.
        if latest <= checkpoint {
            if anchor.is_none() {
                // First sight of the head establishes the watch baseline.
                self.memory.watch_from = Some(latest);
            }
            debug!("[{chain}] head unchanged at block {latest}");
            self.memory.last_error = None;
            self.memory.consecutive_failures = 0;
            return StepOutcome::Sleep(self.params.poll_rate);
        }

        match self.ingest(checkpoint, latest).await {
            Ok(count) => {
                self.memory.last_block = Some(latest);
                self.memory.last_error = None;
                self.memory.consecutive_failures = 0;
                if let Some(metrics) = &self.metrics {
                    metrics
                        .event_checkpoint
                        .with_label_values(&[&chain.to_string()])
                        .set(latest as i64);
                }
                debug!("[{chain}] ingested {count} event(s), checkpoint now {latest}");
            }
            Err(error) => {
                // Leave the checkpoint untouched so the same range is
                // retried on the next tick.
                self.memory.consecutive_failures += 1;
                warn!(
                    "[{chain}] event poll failed ({} consecutive): {error}",
                    self.memory.consecutive_failures
                );
                self.memory.last_error = Some(error.to_string());
            }
        }
        StepOutcome::Sleep(self.params.poll_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_client::MockChainClient;
    use crate::store::Store;
    use ethers::types::{Address, H256};
    use oracle_types::{OracleEvent, OracleEventKind, RequestKey};

    fn chain() -> ChainId {
        ChainId(1)
    }

    fn event(block: u64, seed: u8) -> OracleEvent {
        OracleEvent {
            chain_id: chain(),
            block_number: block,
            log_index: 0,
            key: RequestKey::new(
                chain(),
                Address::repeat_byte(seed),
                H256::repeat_byte(seed),
                1_700_000_000,
                &[seed],
            ),
            kind: OracleEventKind::RequestPrice,
            currency: None,
            proposer: None,
            disputer: None,
            price: None,
        }
    }

    fn setup() -> (Arc<MockChainClient>, NewEventPoller) {
        let client = Arc::new(MockChainClient::new(chain()));
        let store = Arc::new(Store::with_chains([chain()]));
        let update = Arc::new(Update::new(store, vec![client.clone()]));
        (client.clone(), NewEventPoller::new(update, chain()))
    }

    #[tokio::test]
    async fn test_first_tick_at_head_queries_nothing() {
        let (client, mut poller) = setup();
        client.set_latest_block(100);

        let ctx = TaskContext::new("poller");
        let outcome = poller.step(&ctx).await;

        assert_eq!(outcome, StepOutcome::Sleep(DEFAULT_POLL_RATE));
        assert_eq!(client.calls().query_events, 0);
        // The checkpoint stays unset until something is actually ingested.
        assert_eq!(poller.memory().last_block, None);
    }

    #[tokio::test]
    async fn test_watching_starts_from_first_seen_head() {
        let (client, mut poller) = setup();
        client.set_latest_block(100);
        let ctx = TaskContext::new("poller");
        poller.step(&ctx).await;

        // Head moves: everything since the first-seen head is ingested.
        client.set_latest_block(110);
        client.push_event(event(95, 1)); // before the baseline, ignored
        client.push_event(event(105, 2));
        poller.step(&ctx).await;

        assert_eq!(poller.memory().last_block, Some(110));
        assert_eq!(client.calls().query_events, 1);
        let snap = poller.update.store().read().await;
        assert_eq!(snap.event_checkpoint(chain()).unwrap(), Some(110));
        let events = snap.events(chain()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number, 105);
    }

    #[tokio::test]
    async fn test_checkpoint_unmoved_on_failure() {
        let (client, mut poller) = setup();
        client.set_latest_block(100);
        let ctx = TaskContext::new("poller");
        poller.step(&ctx).await;

        client.set_latest_block(110);
        client.push_event(event(105, 1));
        poller.step(&ctx).await;
        assert_eq!(poller.memory().last_block, Some(110));

        // Head moves but the range fetch fails: checkpoint must not move.
        client.set_latest_block(120);
        client.fail_next("query_events", 1);
        poller.step(&ctx).await;
        assert_eq!(poller.memory().last_block, Some(110));
        assert_eq!(poller.memory().consecutive_failures, 1);
        assert!(poller.memory().last_error.is_some());

        // The retry covers the same range (plus the new head) and recovers.
        client.push_event(event(115, 2));
        poller.step(&ctx).await;
        assert_eq!(poller.memory().last_block, Some(120));
        assert_eq!(poller.memory().consecutive_failures, 0);
        let snap = poller.update.store().read().await;
        assert_eq!(snap.events(chain()).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_block_enables_backfill_from_a_point() {
        let (client, mut poller) = setup();
        poller = poller.with_start_block(Some(50));
        client.set_latest_block(100);
        client.push_event(event(60, 1));
        client.push_event(event(40, 2)); // before the start block

        let ctx = TaskContext::new("poller");
        poller.step(&ctx).await;

        assert_eq!(poller.memory().last_block, Some(100));
        let snap = poller.update.store().read().await;
        let events = snap.events(chain()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block_number, 60);
    }

    #[tokio::test]
    async fn test_overlap_reingestion_is_harmless() {
        let (client, mut poller) = setup();
        poller = poller.with_start_block(Some(100));
        client.set_latest_block(110);
        client.push_event(event(110, 1));

        let ctx = TaskContext::new("poller");
        poller.step(&ctx).await;
        assert_eq!(poller.memory().last_block, Some(110));

        // Block 110 sits exactly on the checkpoint, so the next range
        // [110, 120] re-fetches it; the event store must not duplicate.
        client.set_latest_block(120);
        poller.step(&ctx).await;

        assert_eq!(client.calls().query_events, 2);
        let snap = poller.update.store().read().await;
        assert_eq!(snap.events(chain()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_head_number_fetch_failure_counts_as_failed_tick() {
        let (client, mut poller) = setup();
        client.set_latest_block(100);
        client.fail_next("get_block_number", 1);

        let ctx = TaskContext::new("poller");
        let outcome = poller.step(&ctx).await;

        assert_eq!(outcome, StepOutcome::Sleep(DEFAULT_POLL_RATE));
        assert_eq!(poller.memory().consecutive_failures, 1);
        assert_eq!(poller.memory().last_block, None);
        assert_eq!(client.calls().query_events, 0);
    }
}
