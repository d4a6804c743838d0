// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed contract for per-chain access services.
//!
//! The engine never constructs raw network calls; everything it needs from a
//! chain goes through this trait. Implementations live with the embedding
//! layer (one per connected chain) and are free to batch, meter or proxy the
//! underlying RPC however they like.

use crate::error::ClientResult;
use async_trait::async_trait;
use ethers::types::{Address, H256, I256, U256};
use oracle_types::{ChainId, OracleEvent, Request, RequestKey, TxStatus};

/// Decimals and symbol of an ERC-20 token, fetched as one logical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Metadata {
    pub decimals: u8,
    pub symbol: String,
}

/// Read and submit access to one chain's oracle and token contracts.
///
/// All failures surface as `ClientError::Transient`; retry policy belongs to
/// the caller, never to the client.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Address of the optimistic oracle contract on this chain. Used as the
    /// spender for collateral approvals.
    fn oracle_address(&self) -> Address;

    async fn get_request(&self, key: &RequestKey) -> ClientResult<Request>;

    async fn balance_of(&self, token: Address, account: Address) -> ClientResult<U256>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ClientResult<U256>;

    async fn erc20_metadata(&self, token: Address) -> ClientResult<Erc20Metadata>;

    async fn get_block_number(&self) -> ClientResult<u64>;

    /// Timestamp of the latest block, seconds.
    async fn get_block_time(&self) -> ClientResult<u64>;

    /// Decoded oracle events in `[from_block, to_block]`, ordered by
    /// (block, log index). The range is bounded by the caller; the client
    /// must not assume it is small.
    async fn query_events(&self, from_block: u64, to_block: u64)
        -> ClientResult<Vec<OracleEvent>>;

    async fn submit_approve(
        &self,
        from: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> ClientResult<H256>;

    async fn submit_propose(
        &self,
        from: Address,
        key: &RequestKey,
        price: I256,
    ) -> ClientResult<H256>;

    async fn submit_dispute(&self, from: Address, key: &RequestKey) -> ClientResult<H256>;

    async fn tx_status(&self, tx_hash: H256) -> ClientResult<TxStatus>;
}
