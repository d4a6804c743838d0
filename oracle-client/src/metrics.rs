// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

#[derive(Clone, Debug)]
pub struct ClientMetrics {
    /// Successful chain fetches by chain and operation.
    pub(crate) fetches: IntCounterVec,
    /// Failed chain fetches by chain and operation.
    pub(crate) fetch_errors: IntCounterVec,
    /// Last fully ingested event block per chain.
    pub(crate) event_checkpoint: IntGaugeVec,
    /// Latest observed block timestamp per chain.
    pub(crate) last_block_time: IntGaugeVec,
    /// Executor ticks driven so far.
    pub(crate) executor_ticks: IntCounter,
    /// Handler invocations per task.
    pub(crate) task_steps: IntCounterVec,
    /// Task instances currently registered.
    pub(crate) running_tasks: IntGauge,
}

impl ClientMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            fetches: register_int_counter_vec_with_registry!(
                "oracle_client_fetches",
                "Successful chain fetches by chain and operation",
                &["chain", "op"],
                registry,
            )
            .unwrap(),
            fetch_errors: register_int_counter_vec_with_registry!(
                "oracle_client_fetch_errors",
                "Failed chain fetches by chain and operation",
                &["chain", "op"],
                registry,
            )
            .unwrap(),
            event_checkpoint: register_int_gauge_vec_with_registry!(
                "oracle_client_event_checkpoint",
                "Last fully ingested event block per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            last_block_time: register_int_gauge_vec_with_registry!(
                "oracle_client_last_block_time",
                "Latest observed block timestamp per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            executor_ticks: register_int_counter_with_registry!(
                "oracle_client_executor_ticks",
                "Executor ticks driven so far",
                registry,
            )
            .unwrap(),
            task_steps: register_int_counter_vec_with_registry!(
                "oracle_client_task_steps",
                "Handler invocations per task",
                &["task"],
                registry,
            )
            .unwrap(),
            running_tasks: register_int_gauge_with_registry!(
                "oracle_client_running_tasks",
                "Task instances currently registered",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}
