// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scriptable in-memory chain client for tests.
//!
//! Backed by plain maps plus per-operation call counters and failure
//! injection, so tests can assert exactly which external reads a component
//! issued and how it behaves when the chain misbehaves.

use crate::chain_client::{ChainClient, Erc20Metadata};
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use ethers::types::{Address, H256, I256, U256};
use oracle_types::{ChainId, OracleEvent, Request, RequestKey, TxStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Number of calls seen per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_request: usize,
    pub balance_of: usize,
    pub allowance: usize,
    pub erc20_metadata: usize,
    pub get_block_number: usize,
    pub get_block_time: usize,
    pub query_events: usize,
    pub submit: usize,
    pub tx_status: usize,
}

#[derive(Debug, Default)]
struct MockInner {
    latest_block: u64,
    block_time: u64,
    requests: HashMap<RequestKey, Request>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    metadata: HashMap<Address, Erc20Metadata>,
    events: Vec<OracleEvent>,
    /// Scripted confirmation statuses per transaction, consumed in order.
    /// When a script runs dry the status stays at its last value.
    tx_scripts: HashMap<H256, VecDeque<TxStatus>>,
    /// Remaining injected failures per operation name.
    failures: HashMap<&'static str, u32>,
    next_tx: u64,
    calls: CallCounts,
}

pub struct MockChainClient {
    chain_id: ChainId,
    oracle: Address,
    inner: Mutex<MockInner>,
}

impl MockChainClient {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            oracle: Address::repeat_byte(0x0a),
            inner: Mutex::new(MockInner::default()),
        }
    }

    pub fn set_latest_block(&self, block: u64) {
        self.inner.lock().unwrap().latest_block = block;
    }

    pub fn set_block_time(&self, time: u64) {
        self.inner.lock().unwrap().block_time = time;
    }

    pub fn put_request(&self, request: Request) {
        let mut inner = self.inner.lock().unwrap();
        inner.requests.insert(request.key, request);
    }

    pub fn set_balance(&self, token: Address, account: Address, amount: U256) {
        let mut inner = self.inner.lock().unwrap();
        inner.balances.insert((token, account), amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        let mut inner = self.inner.lock().unwrap();
        inner.allowances.insert((token, owner, spender), amount);
    }

    pub fn set_metadata(&self, token: Address, decimals: u8, symbol: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.metadata.insert(
            token,
            Erc20Metadata {
                decimals,
                symbol: symbol.to_string(),
            },
        );
    }

    pub fn push_event(&self, event: OracleEvent) {
        self.inner.lock().unwrap().events.push(event);
    }

    /// Make the next `count` calls to `op` fail with a transient error.
    /// Operation names match the `ChainClient` method names.
    pub fn fail_next(&self, op: &'static str, count: u32) {
        *self.inner.lock().unwrap().failures.entry(op).or_insert(0) += count;
    }

    /// Script the confirmation statuses returned for a transaction hash,
    /// consumed one per `tx_status` call.
    pub fn script_tx_status(&self, tx_hash: H256, statuses: Vec<TxStatus>) {
        self.inner
            .lock()
            .unwrap()
            .tx_scripts
            .insert(tx_hash, statuses.into());
    }

    /// The hash the `n`-th submitted transaction got (0-based).
    pub fn tx_hash(&self, n: u64) -> H256 {
        H256::from_low_u64_be(n + 1)
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.lock().unwrap().calls.clone()
    }

    fn check_failure(&self, inner: &mut MockInner, op: &'static str) -> ClientResult<()> {
        if let Some(remaining) = inner.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::transient(format!(
                    "injected {op} failure on chain {}",
                    self.chain_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn oracle_address(&self) -> Address {
        self.oracle
    }

    async fn get_request(&self, key: &RequestKey) -> ClientResult<Request> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.get_request += 1;
        self.check_failure(&mut inner, "get_request")?;
        inner
            .requests
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::transient(format!("no such request {key}")))
    }

    async fn balance_of(&self, token: Address, account: Address) -> ClientResult<U256> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.balance_of += 1;
        self.check_failure(&mut inner, "balance_of")?;
        Ok(inner
            .balances
            .get(&(token, account))
            .copied()
            .unwrap_or_default())
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ClientResult<U256> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.allowance += 1;
        self.check_failure(&mut inner, "allowance")?;
        Ok(inner
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn erc20_metadata(&self, token: Address) -> ClientResult<Erc20Metadata> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.erc20_metadata += 1;
        self.check_failure(&mut inner, "erc20_metadata")?;
        inner
            .metadata
            .get(&token)
            .cloned()
            .ok_or_else(|| ClientError::transient(format!("no metadata for {token:?}")))
    }

    async fn get_block_number(&self) -> ClientResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.get_block_number += 1;
        self.check_failure(&mut inner, "get_block_number")?;
        Ok(inner.latest_block)
    }

    async fn get_block_time(&self) -> ClientResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.get_block_time += 1;
        self.check_failure(&mut inner, "get_block_time")?;
        Ok(inner.block_time)
    }

    async fn query_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> ClientResult<Vec<OracleEvent>> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.query_events += 1;
        self.check_failure(&mut inner, "query_events")?;
        let mut events: Vec<OracleEvent> = inner
            .events
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.ordinal());
        Ok(events)
    }

    async fn submit_approve(
        &self,
        _from: Address,
        _token: Address,
        _spender: Address,
        _amount: U256,
    ) -> ClientResult<H256> {
        self.submit("submit_approve")
    }

    async fn submit_propose(
        &self,
        _from: Address,
        _key: &RequestKey,
        _price: I256,
    ) -> ClientResult<H256> {
        self.submit("submit_propose")
    }

    async fn submit_dispute(&self, _from: Address, _key: &RequestKey) -> ClientResult<H256> {
        self.submit("submit_dispute")
    }

    async fn tx_status(&self, tx_hash: H256) -> ClientResult<TxStatus> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.tx_status += 1;
        self.check_failure(&mut inner, "tx_status")?;
        let latest = inner.latest_block;
        match inner.tx_scripts.get_mut(&tx_hash) {
            Some(script) => {
                if script.len() > 1 {
                    Ok(script.pop_front().unwrap())
                } else {
                    script
                        .front()
                        .cloned()
                        .ok_or_else(|| ClientError::transient("empty tx script"))
                }
            }
            // Unscripted transactions confirm immediately.
            None => Ok(TxStatus::Confirmed { block: latest }),
        }
    }
}

impl MockChainClient {
    fn submit(&self, op: &'static str) -> ClientResult<H256> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.submit += 1;
        self.check_failure(&mut inner, op)?;
        let hash = H256::from_low_u64_be(inner.next_tx + 1);
        inner.next_tx += 1;
        Ok(hash)
    }
}
