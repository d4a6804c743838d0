// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory snapshot store for synchronized chain state.
//!
//! All mutation goes through [`Store::write`], which stages a batch of typed
//! mutations and applies them in one swap: readers observe either the full
//! result of a transaction or none of it. Reads take a [`Snapshot`], a
//! detached copy that stays coherent while later writes land.
//!
//! Lookups for data that has not been fetched yet fail with a `NotFound`
//! condition instead of returning a default; callers must fetch first.

use crate::error::{ClientError, ClientResult, NotFound};
use ethers::types::{Address, U256};
use oracle_types::{ChainId, Erc20Info, OracleEvent, Request, RequestKey};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Which chain, account and request the embedding layer has selected.
/// The engine only reacts to these; it never chooses selections itself.
#[derive(Debug, Clone, Default)]
pub struct ActiveSelection {
    pub chain_id: Option<ChainId>,
    pub account: Option<Address>,
    pub request: Option<RequestKey>,
}

/// Per-chain bucket of synchronized state.
#[derive(Debug, Clone, Default)]
pub struct ChainSlice {
    pub requests: HashMap<RequestKey, Request>,
    pub erc20s: HashMap<Address, Erc20Info>,
    /// Latest observed block timestamp, seconds.
    pub current_time: Option<u64>,
    /// Last block fully scanned for events. Forward-only.
    pub event_checkpoint: Option<u64>,
    /// Ingested events keyed by (block, log index). Re-inserting an already
    /// ingested event is a no-op, which is what lets overlapping re-fetches
    /// after a failed tick stay harmless.
    pub events: BTreeMap<(u64, u32), OracleEvent>,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    active: ActiveSelection,
    chains: HashMap<ChainId, ChainSlice>,
}

/// One typed field update. The write view exposes one method per path;
/// arbitrary deep mutation is not expressible.
#[derive(Debug, Clone)]
enum Mutation {
    PutRequest(Request),
    SetBalance {
        chain: ChainId,
        token: Address,
        account: Address,
        amount: U256,
    },
    SetAllowance {
        chain: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    },
    SetErc20Metadata {
        chain: ChainId,
        token: Address,
        decimals: u8,
        symbol: String,
    },
    SetCurrentTime {
        chain: ChainId,
        time: u64,
    },
    SetEventCheckpoint {
        chain: ChainId,
        block: u64,
    },
    InsertEvent(OracleEvent),
    SetActiveChain(ChainId),
    SetActiveAccount(Address),
    SetActiveRequest(RequestKey),
}

/// Mutation staging view handed to the closure passed to [`Store::write`].
/// The borrow cannot outlive the call, so no handler can hold a stale
/// partial write across transactions.
#[derive(Debug, Default)]
pub struct WriteTxn {
    mutations: Vec<Mutation>,
}

impl WriteTxn {
    pub fn put_request(&mut self, request: Request) {
        self.mutations.push(Mutation::PutRequest(request));
    }

    pub fn set_balance(&mut self, chain: ChainId, token: Address, account: Address, amount: U256) {
        self.mutations.push(Mutation::SetBalance {
            chain,
            token,
            account,
            amount,
        });
    }

    pub fn set_allowance(
        &mut self,
        chain: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) {
        self.mutations.push(Mutation::SetAllowance {
            chain,
            token,
            owner,
            spender,
            amount,
        });
    }

    pub fn set_erc20_metadata(
        &mut self,
        chain: ChainId,
        token: Address,
        decimals: u8,
        symbol: impl Into<String>,
    ) {
        self.mutations.push(Mutation::SetErc20Metadata {
            chain,
            token,
            decimals,
            symbol: symbol.into(),
        });
    }

    pub fn set_current_time(&mut self, chain: ChainId, time: u64) {
        self.mutations.push(Mutation::SetCurrentTime { chain, time });
    }

    pub fn set_event_checkpoint(&mut self, chain: ChainId, block: u64) {
        self.mutations
            .push(Mutation::SetEventCheckpoint { chain, block });
    }

    pub fn insert_event(&mut self, event: OracleEvent) {
        self.mutations.push(Mutation::InsertEvent(event));
    }

    pub fn set_active_chain(&mut self, chain: ChainId) {
        self.mutations.push(Mutation::SetActiveChain(chain));
    }

    pub fn set_active_account(&mut self, account: Address) {
        self.mutations.push(Mutation::SetActiveAccount(account));
    }

    pub fn set_active_request(&mut self, key: RequestKey) {
        self.mutations.push(Mutation::SetActiveRequest(key));
    }
}

/// The snapshot store. The single shared mutable resource of the engine.
#[derive(Debug, Default)]
pub struct Store {
    state: RwLock<StoreState>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register chain slices so lookups on configured-but-unsynced
    /// chains report the missing field instead of a missing chain.
    pub fn with_chains(chains: impl IntoIterator<Item = ChainId>) -> Self {
        let mut state = StoreState::default();
        for chain in chains {
            state.chains.entry(chain).or_default();
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Take a detached snapshot of the current state.
    pub async fn read(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            state: state.clone(),
        }
    }

    /// Run a write transaction.
    ///
    /// The closure stages typed mutations; once it returns `Ok`, the batch is
    /// applied to a scratch copy which replaces the live state in one swap.
    /// If the closure fails, or any staged mutation fails validation (e.g.
    /// a checkpoint regression), the whole batch is discarded.
    pub async fn write<T>(
        &self,
        f: impl FnOnce(&mut WriteTxn) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let mut txn = WriteTxn::default();
        let out = f(&mut txn)?;

        let mut state = self.state.write().await;
        let mut next = state.clone();
        for mutation in txn.mutations {
            apply(&mut next, mutation)?;
        }
        *state = next;
        Ok(out)
    }
}

fn apply(state: &mut StoreState, mutation: Mutation) -> ClientResult<()> {
    match mutation {
        Mutation::PutRequest(request) => {
            let slice = state.chains.entry(request.key.chain_id).or_default();
            slice.requests.insert(request.key, request);
        }
        Mutation::SetBalance {
            chain,
            token,
            account,
            amount,
        } => {
            erc20_entry(state, chain, token).balances.insert(account, amount);
        }
        Mutation::SetAllowance {
            chain,
            token,
            owner,
            spender,
            amount,
        } => {
            erc20_entry(state, chain, token)
                .allowances
                .insert((owner, spender), amount);
        }
        Mutation::SetErc20Metadata {
            chain,
            token,
            decimals,
            symbol,
        } => {
            let info = erc20_entry(state, chain, token);
            info.decimals = Some(decimals);
            info.symbol = Some(symbol);
        }
        Mutation::SetCurrentTime { chain, time } => {
            state.chains.entry(chain).or_default().current_time = Some(time);
        }
        Mutation::SetEventCheckpoint { chain, block } => {
            let slice = state.chains.entry(chain).or_default();
            if let Some(current) = slice.event_checkpoint {
                if block < current {
                    return Err(ClientError::CheckpointRegression {
                        chain,
                        from: current,
                        to: block,
                    });
                }
            }
            slice.event_checkpoint = Some(block);
        }
        Mutation::InsertEvent(event) => {
            let slice = state.chains.entry(event.chain_id).or_default();
            slice.events.insert(event.ordinal(), event);
        }
        Mutation::SetActiveChain(chain) => {
            state.chains.entry(chain).or_default();
            state.active.chain_id = Some(chain);
        }
        Mutation::SetActiveAccount(account) => {
            state.active.account = Some(account);
        }
        Mutation::SetActiveRequest(key) => {
            state.chains.entry(key.chain_id).or_default();
            state.active.request = Some(key);
        }
    }
    Ok(())
}

fn erc20_entry(state: &mut StoreState, chain: ChainId, token: Address) -> &mut Erc20Info {
    state
        .chains
        .entry(chain)
        .or_default()
        .erc20s
        .entry(token)
        .or_insert_with(|| Erc20Info::new(chain, token))
}

/// Pure-lookup view over a detached copy of the store state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    state: StoreState,
}

impl Snapshot {
    fn chain(&self, chain: ChainId) -> ClientResult<&ChainSlice> {
        self.state
            .chains
            .get(&chain)
            .ok_or_else(|| NotFound::Chain(chain).into())
    }

    pub fn active_chain(&self) -> ClientResult<ChainId> {
        self.state
            .active
            .chain_id
            .ok_or_else(|| NotFound::Selection("chain").into())
    }

    pub fn active_account(&self) -> ClientResult<Address> {
        self.state
            .active
            .account
            .ok_or_else(|| NotFound::Selection("account").into())
    }

    pub fn active_request_key(&self) -> ClientResult<RequestKey> {
        self.state
            .active
            .request
            .ok_or_else(|| NotFound::Selection("request").into())
    }

    pub fn active_request(&self) -> ClientResult<&Request> {
        let key = self.active_request_key()?;
        self.request(&key)
    }

    pub fn request(&self, key: &RequestKey) -> ClientResult<&Request> {
        self.chain(key.chain_id)?
            .requests
            .get(key)
            .ok_or_else(|| NotFound::Request(*key).into())
    }

    pub fn erc20(&self, chain: ChainId, token: Address) -> ClientResult<&Erc20Info> {
        self.chain(chain)?
            .erc20s
            .get(&token)
            .ok_or_else(|| NotFound::Erc20 { chain, token }.into())
    }

    pub fn balance(&self, chain: ChainId, token: Address, account: Address) -> ClientResult<U256> {
        self.erc20(chain, token)?
            .balances
            .get(&account)
            .copied()
            .ok_or_else(|| {
                NotFound::Balance {
                    chain,
                    token,
                    account,
                }
                .into()
            })
    }

    pub fn allowance(
        &self,
        chain: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ClientResult<U256> {
        self.erc20(chain, token)?
            .allowances
            .get(&(owner, spender))
            .copied()
            .ok_or_else(|| {
                NotFound::Allowance {
                    chain,
                    token,
                    owner,
                    spender,
                }
                .into()
            })
    }

    pub fn current_time(&self, chain: ChainId) -> ClientResult<u64> {
        self.chain(chain)?
            .current_time
            .ok_or_else(|| NotFound::CurrentTime(chain).into())
    }

    /// `Ok(None)` means the chain is known but has never been scanned.
    pub fn event_checkpoint(&self, chain: ChainId) -> ClientResult<Option<u64>> {
        Ok(self.chain(chain)?.event_checkpoint)
    }

    /// Ingested events for a chain in block order.
    pub fn events(&self, chain: ChainId) -> ClientResult<Vec<&OracleEvent>> {
        Ok(self.chain(chain)?.events.values().collect())
    }

    /// All requests across every chain, newest first. Keys are fully
    /// chain-qualified, so requests from different chains never collide.
    pub fn sorted_requests(&self) -> Vec<&Request> {
        let mut requests: Vec<&Request> = self
            .state
            .chains
            .values()
            .flat_map(|slice| slice.requests.values())
            .collect();
        requests.sort_by(|a, b| {
            b.key
                .timestamp
                .cmp(&a.key.timestamp)
                .then_with(|| a.key.cmp(&b.key))
        });
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;
    use oracle_types::{OracleEventKind, OracleState};

    fn chain() -> ChainId {
        ChainId(1)
    }

    fn request_key(chain_id: u64, seed: u8) -> RequestKey {
        RequestKey::new(
            ChainId(chain_id),
            Address::repeat_byte(seed),
            H256::repeat_byte(seed),
            1_700_000_000 + seed as u64,
            &[seed],
        )
    }

    fn request(chain_id: u64, seed: u8, state: OracleState) -> Request {
        let mut request = Request::placeholder(request_key(chain_id, seed));
        request.currency = Address::repeat_byte(0xcc);
        request.state = state;
        request
    }

    fn event(chain_id: u64, block: u64, log_index: u32, seed: u8) -> OracleEvent {
        OracleEvent {
            chain_id: ChainId(chain_id),
            block_number: block,
            log_index,
            key: request_key(chain_id, seed),
            kind: OracleEventKind::RequestPrice,
            currency: None,
            proposer: None,
            disputer: None,
            price: None,
        }
    }

    #[tokio::test]
    async fn test_read_before_fetch_is_not_found() {
        let store = Store::with_chains([chain()]);
        let snap = store.read().await;

        assert!(matches!(
            snap.request(&request_key(1, 1)),
            Err(ClientError::NotFound(NotFound::Request(_)))
        ));
        assert!(matches!(
            snap.current_time(chain()),
            Err(ClientError::NotFound(NotFound::CurrentTime(_)))
        ));
        assert!(matches!(
            snap.active_request_key(),
            Err(ClientError::NotFound(NotFound::Selection("request")))
        ));
        // Configured chain: checkpoint is known-empty, not missing.
        assert_eq!(snap.event_checkpoint(chain()).unwrap(), None);
        // Unknown chain: the chain itself is missing.
        assert!(matches!(
            snap.event_checkpoint(ChainId(999)),
            Err(ClientError::NotFound(NotFound::Chain(_)))
        ));
    }

    #[tokio::test]
    async fn test_write_batch_is_all_or_nothing_on_closure_error() {
        let store = Store::new();
        let result: ClientResult<()> = store
            .write(|txn| {
                txn.put_request(request(1, 1, OracleState::Requested));
                txn.set_current_time(chain(), 42);
                Err(ClientError::transient("abort after staging"))
            })
            .await;
        assert!(result.is_err());

        let snap = store.read().await;
        assert!(snap.request(&request_key(1, 1)).is_err());
        assert!(snap.current_time(chain()).is_err());
    }

    #[tokio::test]
    async fn test_write_batch_is_all_or_nothing_on_validation_error() {
        let store = Store::new();
        store
            .write(|txn| {
                txn.set_event_checkpoint(chain(), 100);
                Ok(())
            })
            .await
            .unwrap();

        // A batch containing a checkpoint regression is rejected wholesale:
        // the request staged alongside it must not land either.
        let result = store
            .write(|txn| {
                txn.put_request(request(1, 7, OracleState::Requested));
                txn.set_event_checkpoint(chain(), 50);
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(ClientError::CheckpointRegression { from: 100, to: 50, .. })
        ));

        let snap = store.read().await;
        assert!(snap.request(&request_key(1, 7)).is_err());
        assert_eq!(snap.event_checkpoint(chain()).unwrap(), Some(100));
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_writes() {
        let store = Store::new();
        store
            .write(|txn| {
                txn.set_current_time(chain(), 1000);
                Ok(())
            })
            .await
            .unwrap();

        let before = store.read().await;
        store
            .write(|txn| {
                txn.set_current_time(chain(), 2000);
                txn.put_request(request(1, 1, OracleState::Requested));
                Ok(())
            })
            .await
            .unwrap();

        // The earlier snapshot still sees the pre-transaction state in full.
        assert_eq!(before.current_time(chain()).unwrap(), 1000);
        assert!(before.request(&request_key(1, 1)).is_err());

        // A fresh snapshot sees the transaction in full.
        let after = store.read().await;
        assert_eq!(after.current_time(chain()).unwrap(), 2000);
        assert!(after.request(&request_key(1, 1)).is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_moves_forward_and_tolerates_equal() {
        let store = Store::new();
        for block in [10u64, 10, 25] {
            store
                .write(|txn| {
                    txn.set_event_checkpoint(chain(), block);
                    Ok(())
                })
                .await
                .unwrap();
        }
        let snap = store.read().await;
        assert_eq!(snap.event_checkpoint(chain()).unwrap(), Some(25));
    }

    #[tokio::test]
    async fn test_event_insertion_is_set_based() {
        let store = Store::new();
        let ev = event(1, 100, 0, 1);
        store
            .write(|txn| {
                txn.insert_event(ev.clone());
                txn.insert_event(ev.clone());
                txn.insert_event(event(1, 100, 1, 2));
                Ok(())
            })
            .await
            .unwrap();
        // Duplicate re-ingestion of the same (block, log index) is a no-op.
        store
            .write(|txn| {
                txn.insert_event(ev.clone());
                Ok(())
            })
            .await
            .unwrap();

        let snap = store.read().await;
        let events = snap.events(chain()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].ordinal(), (100, 0));
        assert_eq!(events[1].ordinal(), (100, 1));
    }

    #[tokio::test]
    async fn test_balance_and_allowance_update_independently() {
        let store = Store::new();
        let token = Address::repeat_byte(0xaa);
        let owner = Address::repeat_byte(0x01);
        let spender = Address::repeat_byte(0x02);

        store
            .write(|txn| {
                txn.set_erc20_metadata(chain(), token, 18, "WETH");
                txn.set_balance(chain(), token, owner, U256::from(500));
                Ok(())
            })
            .await
            .unwrap();
        store
            .write(|txn| {
                txn.set_allowance(chain(), token, owner, spender, U256::from(100));
                Ok(())
            })
            .await
            .unwrap();

        let snap = store.read().await;
        let info = snap.erc20(chain(), token).unwrap();
        assert_eq!(info.decimals, Some(18));
        assert_eq!(info.symbol.as_deref(), Some("WETH"));
        assert_eq!(snap.balance(chain(), token, owner).unwrap(), U256::from(500));
        assert_eq!(
            snap.allowance(chain(), token, owner, spender).unwrap(),
            U256::from(100)
        );
        // The spender's balance was never fetched; it must not default to zero.
        assert!(snap.balance(chain(), token, spender).is_err());
    }

    #[tokio::test]
    async fn test_writes_for_different_keys_do_not_clobber() {
        let store = Store::new();
        let a = request(1, 1, OracleState::Requested);
        let b = request(1, 2, OracleState::Proposed);

        store
            .write(|txn| {
                txn.put_request(a.clone());
                Ok(())
            })
            .await
            .unwrap();
        store
            .write(|txn| {
                txn.put_request(b.clone());
                Ok(())
            })
            .await
            .unwrap();

        let snap = store.read().await;
        assert_eq!(snap.request(&a.key).unwrap().state, OracleState::Requested);
        assert_eq!(snap.request(&b.key).unwrap().state, OracleState::Proposed);
    }

    #[tokio::test]
    async fn test_sorted_requests_is_chain_qualified_and_newest_first() {
        let store = Store::new();
        // Same seed on two chains: distinct records, both listed.
        let mainnet = request(1, 5, OracleState::Requested);
        let polygon = request(137, 5, OracleState::Settled);
        let newer = request(1, 9, OracleState::Proposed);

        store
            .write(|txn| {
                txn.put_request(mainnet.clone());
                txn.put_request(polygon.clone());
                txn.put_request(newer.clone());
                Ok(())
            })
            .await
            .unwrap();

        let snap = store.read().await;
        let sorted = snap.sorted_requests();
        assert_eq!(sorted.len(), 3);
        assert_eq!(sorted[0].key, newer.key);
        // Equal timestamps order deterministically by full key.
        assert_eq!(sorted[1].key.timestamp, sorted[2].key.timestamp);
        assert!(sorted[1].key < sorted[2].key);
    }

    #[tokio::test]
    async fn test_selection_mutations() {
        let store = Store::new();
        let key = request_key(1, 3);
        let account = Address::repeat_byte(0xee);

        store
            .write(|txn| {
                txn.set_active_chain(chain());
                txn.set_active_account(account);
                txn.set_active_request(key);
                Ok(())
            })
            .await
            .unwrap();

        let snap = store.read().await;
        assert_eq!(snap.active_chain().unwrap(), chain());
        assert_eq!(snap.active_account().unwrap(), account);
        assert_eq!(snap.active_request_key().unwrap(), key);
        // Selected but not yet fetched: the request lookup still fails.
        assert!(matches!(
            snap.active_request(),
            Err(ClientError::NotFound(NotFound::Request(_)))
        ));
    }
}
