// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared value types for the optimistic-oracle client engine.
//!
//! Every composite key in this crate carries its `ChainId`. Identical
//! requests can exist on two chains at once, so a key without the chain
//! component is ambiguous and must never be used for addressing.

use ethers::types::{Address, H256, I256, U256};
use ethers::utils::keccak256;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// EVM chain identifier (e.g. 1 for mainnet, 137 for Polygon).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId(id)
    }
}

/// Lifecycle state of an oracle price request, in contract order.
///
/// The discriminants are ordered so that lifecycle progress is monotone
/// non-decreasing; a stale read can never legally move a record backwards.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum OracleState {
    Invalid = 0,
    Requested = 1,
    Proposed = 2,
    Expired = 3,
    Disputed = 4,
    Resolved = 5,
    Settled = 6,
}

impl OracleState {
    /// Terminal states never change on chain, so refreshing them is wasted work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OracleState::Invalid | OracleState::Settled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OracleState::Invalid => "invalid",
            OracleState::Requested => "requested",
            OracleState::Proposed => "proposed",
            OracleState::Expired => "expired",
            OracleState::Disputed => "disputed",
            OracleState::Resolved => "resolved",
            OracleState::Settled => "settled",
        }
    }
}

impl fmt::Display for OracleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identifier of a price request.
///
/// Ancillary data is carried as its keccak256 hash; the raw bytes can be
/// arbitrarily large and are never needed for addressing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RequestKey {
    pub chain_id: ChainId,
    pub requester: Address,
    pub identifier: H256,
    pub timestamp: u64,
    pub ancillary_data_hash: H256,
}

impl RequestKey {
    pub fn new(
        chain_id: ChainId,
        requester: Address,
        identifier: H256,
        timestamp: u64,
        ancillary_data: &[u8],
    ) -> Self {
        Self {
            chain_id,
            requester,
            identifier,
            timestamp,
            ancillary_data_hash: H256(keccak256(ancillary_data)),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:?}:{:#x}@{}",
            self.chain_id, self.requester, self.identifier, self.timestamp
        )
    }
}

/// An oracle price request as mirrored from chain state.
///
/// Created on first fetch, refreshed in place afterwards. Once `Settled`
/// the record is immutable; further refreshes are harmless no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub key: RequestKey,
    pub currency: Address,
    pub state: OracleState,
    /// Liveness window in seconds before an undisputed proposal expires.
    pub liveness: u64,
    pub proposer: Option<Address>,
    pub disputer: Option<Address>,
    pub proposed_price: Option<I256>,
    pub resolved_price: Option<I256>,
    pub expiration_time: Option<u64>,
}

impl Request {
    /// A minimal record for a request we have only seen referenced, not fetched.
    pub fn placeholder(key: RequestKey) -> Self {
        Self {
            key,
            currency: Address::zero(),
            state: OracleState::Invalid,
            liveness: 0,
            proposer: None,
            disputer: None,
            proposed_price: None,
            resolved_price: None,
            expiration_time: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state == OracleState::Settled
    }
}

/// Locally mirrored ERC-20 record. Balance and allowance entries update
/// independently of the rest of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20Info {
    pub address: Address,
    pub chain_id: ChainId,
    pub decimals: Option<u8>,
    pub symbol: Option<String>,
    pub balances: HashMap<Address, U256>,
    pub allowances: HashMap<(Address, Address), U256>,
}

impl Erc20Info {
    pub fn new(chain_id: ChainId, address: Address) -> Self {
        Self {
            address,
            chain_id,
            decimals: None,
            symbol: None,
            balances: HashMap::new(),
            allowances: HashMap::new(),
        }
    }
}

/// Discriminant of an on-chain oracle event.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum OracleEventKind {
    RequestPrice = 0,
    ProposePrice = 1,
    DisputePrice = 2,
    Settle = 3,
}

impl OracleEventKind {
    /// The request state this event moves its subject into.
    pub fn resulting_state(&self) -> OracleState {
        match self {
            OracleEventKind::RequestPrice => OracleState::Requested,
            OracleEventKind::ProposePrice => OracleState::Proposed,
            OracleEventKind::DisputePrice => OracleState::Disputed,
            OracleEventKind::Settle => OracleState::Settled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OracleEventKind::RequestPrice => "request_price",
            OracleEventKind::ProposePrice => "propose_price",
            OracleEventKind::DisputePrice => "dispute_price",
            OracleEventKind::Settle => "settle",
        }
    }
}

/// A decoded oracle event. `chain_id` is supplied by the fetching client,
/// not part of the raw log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleEvent {
    pub chain_id: ChainId,
    pub block_number: u64,
    pub log_index: u32,
    pub key: RequestKey,
    pub kind: OracleEventKind,
    pub currency: Option<Address>,
    pub proposer: Option<Address>,
    pub disputer: Option<Address>,
    pub price: Option<I256>,
}

impl OracleEvent {
    /// Position of this event in the chain's ordered event stream.
    pub fn ordinal(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// Confirmation status of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed { block: u64 },
    Failed { reason: String },
}

impl TxStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}
