// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client engine configuration.

use crate::tasks::active_request::DEFAULT_REFRESH_INTERVAL;
use crate::tasks::event_poller::DEFAULT_POLL_RATE;
use crate::tasks::workflows::WorkflowPolicy;
use anyhow::{bail, Context, Result};
use oracle_types::ChainId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the oracle client engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Chains to synchronize. Every entry needs a matching chain client at
    /// wiring time.
    #[serde(default)]
    pub chains: Vec<ChainSyncConfig>,

    /// Active-request refresh interval, seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Workflow retry/confirmation budgets.
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Per-chain sync settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSyncConfig {
    pub chain_id: u64,

    /// First block to watch for events. Absent means watch from the head
    /// observed on the poller's first tick.
    #[serde(default)]
    pub start_block: Option<u64>,

    /// Event poll rate, seconds. Absent means the default rate.
    #[serde(default)]
    pub poll_rate_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_workflow_retry_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_workflow_confirm_secs")]
    pub confirm_interval_secs: u64,
    #[serde(default = "default_workflow_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_workflow_max_confirm_checks")]
    pub max_confirm_checks: u32,
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_secs()
}

fn default_workflow_retry_secs() -> u64 {
    5
}

fn default_workflow_confirm_secs() -> u64 {
    5
}

fn default_workflow_max_retries() -> u32 {
    3
}

fn default_workflow_max_confirm_checks() -> u32 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chains: Vec::new(),
            refresh_interval_secs: default_refresh_interval_secs(),
            workflow: WorkflowConfig::default(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: default_workflow_retry_secs(),
            confirm_interval_secs: default_workflow_confirm_secs(),
            max_retries: default_workflow_max_retries(),
            max_confirm_checks: default_workflow_max_confirm_checks(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Add a chain with default sync settings.
    pub fn with_chain(mut self, chain_id: u64) -> Self {
        self.chains.push(ChainSyncConfig {
            chain_id,
            start_block: None,
            poll_rate_secs: None,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("at least one chain must be configured");
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                bail!("chain {} configured twice", chain.chain_id);
            }
            if chain.poll_rate_secs == Some(0) {
                bail!("chain {} has a zero poll rate", chain.chain_id);
            }
        }
        if self.refresh_interval_secs == 0 {
            bail!("refresh interval must be non-zero");
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn workflow_policy(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            retry_interval: Duration::from_secs(self.workflow.retry_interval_secs),
            confirm_interval: Duration::from_secs(self.workflow.confirm_interval_secs),
            max_retries: self.workflow.max_retries,
            max_confirm_checks: self.workflow.max_confirm_checks,
        }
    }
}

impl ChainSyncConfig {
    pub fn chain_id(&self) -> ChainId {
        ChainId(self.chain_id)
    }

    pub fn poll_rate(&self) -> Duration {
        self.poll_rate_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_RATE)
    }
}
