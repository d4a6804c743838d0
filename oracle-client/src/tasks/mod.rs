// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Concrete task instances for the executor: continuous pollers that keep
//! the store fresh, and short-lived step workflows driving user actions.
//! The executor does not distinguish between the two; everything here
//! speaks the same delay/transition contract.

pub mod active_request;
pub mod event_poller;
pub mod workflows;

pub use active_request::ActiveRequestRefresher;
pub use event_poller::NewEventPoller;

use oracle_types::ChainId;

/// Registry id for the per-chain event poller instance.
pub fn event_poller_id(chain: ChainId) -> String {
    format!("new_event_poller - {chain}")
}

/// Registry id for the single active-request refresher instance.
pub const ACTIVE_REQUEST_REFRESHER_ID: &str = "active_request_refresher";
