// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Continuous refresher for the currently selected request.
//!
//! Terminal states (`Invalid`, `Settled`) never change on chain, so those
//! ticks skip the request fetch and only refresh the chain's current time.

use crate::error::ClientResult;
use crate::executor::{StepOutcome, Task, TaskContext};
use crate::update::Update;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RefresherParams {
    pub interval: Duration,
}

impl Default for RefresherParams {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
pub struct RefresherMemory {
    pub ticks: u64,
    pub last_error: Option<String>,
}

pub struct ActiveRequestRefresher {
    update: Arc<Update>,
    params: RefresherParams,
    memory: RefresherMemory,
}

impl ActiveRequestRefresher {
    pub fn new(update: Arc<Update>) -> Self {
        Self {
            update,
            params: RefresherParams::default(),
            memory: RefresherMemory::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.params.interval = interval;
        self
    }

    pub fn memory(&self) -> &RefresherMemory {
        &self.memory
    }

    async fn refresh(&self) -> ClientResult<()> {
        let snapshot = self.update.store().read().await;
        let key = match snapshot.active_request_key() {
            Ok(key) => key,
            // Nothing selected yet; idle tick.
            Err(_) => return Ok(()),
        };

        self.update.block_time(key.chain_id).await?;

        if let Ok(request) = snapshot.request(&key) {
            if request.state.is_terminal() {
                debug!(
                    "[{}] request {key} is {}, skipping refresh",
                    key.chain_id, request.state
                );
                return Ok(());
            }
        }
        self.update.request(&key).await
    }
}

#[async_trait]
impl Task for ActiveRequestRefresher {
    fn name(&self) -> &str {
        "active_request_refresher"
    }

    fn handler(&self) -> &'static str {
        "poll"
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        self.memory.ticks += 1;
        match self.refresh().await {
            Ok(()) => self.memory.last_error = None,
            Err(error) => {
                debug!("active request refresh failed: {error}");
                self.memory.last_error = Some(error.to_string());
            }
        }
        StepOutcome::Sleep(self.params.interval)
    }
}
