// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Short-lived step workflows driving user actions.
//!
//! Each workflow is an ordinary task instance under the executor's
//! delay/transition contract, with a small number of handler transitions.
//! The final result is reported through a oneshot channel to whoever
//! started the workflow: an unresolved channel means still pending, which
//! keeps failures distinguishable from in-flight actions.
//!
//! Transient chain errors are retried up to the workflow's own budget;
//! malformed parameters (missing selection, unknown chain, wrong request
//! state) resolve the channel immediately and are never retried.

use crate::error::{ClientError, ClientResult};
use crate::executor::{StepOutcome, Task, TaskContext};
use crate::update::Update;
use async_trait::async_trait;
use ethers::types::{Address, H256, I256, U256};
use oracle_types::{ChainId, OracleState, RequestKey, TxStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Retry and confirmation budgets shared by all step workflows.
#[derive(Debug, Clone)]
pub struct WorkflowPolicy {
    /// Delay before retrying a transient failure.
    pub retry_interval: Duration,
    /// Delay between transaction confirmation checks.
    pub confirm_interval: Duration,
    /// Transient failures tolerated per handler before giving up.
    pub max_retries: u32,
    /// Confirmation checks tolerated before the action counts as timed out.
    pub max_confirm_checks: u32,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            confirm_interval: Duration::from_secs(5),
            max_retries: 3,
            max_confirm_checks: 10,
        }
    }
}

pub type WorkflowResult = Result<(), ClientError>;
pub type WorkflowReceiver = oneshot::Receiver<WorkflowResult>;

/// Scratch state every workflow keeps: retry bookkeeping, the submitted
/// transaction if any, and the channel the final result goes out on.
#[derive(Debug, Default)]
struct WorkflowMemory {
    attempts: u32,
    confirm_checks: u32,
    last_error: Option<String>,
    tx_hash: Option<H256>,
    account: Option<Address>,
    cursor: Option<u64>,
    result: Option<oneshot::Sender<WorkflowResult>>,
}

impl WorkflowMemory {
    fn new() -> (Self, WorkflowReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                result: Some(tx),
                ..Self::default()
            },
            rx,
        )
    }

    /// Resolve the workflow's result channel and terminate the instance.
    fn finish(&mut self, name: &str, result: WorkflowResult) -> StepOutcome {
        match &result {
            Ok(()) => info!("workflow {name} completed"),
            Err(error) => warn!("workflow {name} failed: {error}"),
        }
        if let Some(tx) = self.result.take() {
            let _ = tx.send(result);
        }
        StepOutcome::Done
    }

    /// Sleep-and-retry a transient failure within budget; anything else,
    /// or an exhausted budget, ends the workflow.
    fn retry(&mut self, name: &str, policy: &WorkflowPolicy, error: ClientError) -> StepOutcome {
        if !error.is_transient() {
            return self.finish(name, Err(error));
        }
        self.attempts += 1;
        if self.attempts > policy.max_retries {
            return self.finish(name, Err(error));
        }
        debug!(
            "workflow {name}: transient failure (attempt {}/{}): {error}",
            self.attempts, policy.max_retries
        );
        self.last_error = Some(error.to_string());
        StepOutcome::Sleep(policy.retry_interval)
    }

    /// Handle one confirmation check. `None` means the transaction landed
    /// and the workflow should advance to its next handler.
    fn track_confirmation(
        &mut self,
        name: &str,
        policy: &WorkflowPolicy,
        status: ClientResult<TxStatus>,
    ) -> Option<StepOutcome> {
        match status {
            Ok(TxStatus::Confirmed { block }) => {
                debug!("workflow {name}: transaction confirmed in block {block}");
                self.attempts = 0;
                None
            }
            Ok(TxStatus::Failed { reason }) => Some(self.finish(
                name,
                Err(ClientError::transient(format!(
                    "transaction failed: {reason}"
                ))),
            )),
            Ok(TxStatus::Pending) => {
                self.confirm_checks += 1;
                if self.confirm_checks > policy.max_confirm_checks {
                    Some(self.finish(
                        name,
                        Err(ClientError::transient("transaction confirmation timed out")),
                    ))
                } else {
                    Some(StepOutcome::Sleep(policy.confirm_interval))
                }
            }
            Err(error) => Some(self.retry(name, policy, error)),
        }
    }
}

// ---------------------------------------------------------------------------
// SetUser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetUserHandler {
    Select,
    FetchBalances,
}

/// Selects the active chain and account, then prefetches the balance and
/// oracle allowance of the active request's collateral currency.
pub struct SetUser {
    update: Arc<Update>,
    chain_id: ChainId,
    account: Address,
    policy: WorkflowPolicy,
    handler: SetUserHandler,
    memory: WorkflowMemory,
}

impl SetUser {
    pub fn new(
        update: Arc<Update>,
        chain_id: ChainId,
        account: Address,
    ) -> (Self, WorkflowReceiver) {
        let (memory, rx) = WorkflowMemory::new();
        (
            Self {
                update,
                chain_id,
                account,
                policy: WorkflowPolicy::default(),
                handler: SetUserHandler::Select,
                memory,
            },
            rx,
        )
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for SetUser {
    fn name(&self) -> &str {
        "set_user"
    }

    fn handler(&self) -> &'static str {
        match self.handler {
            SetUserHandler::Select => "select",
            SetUserHandler::FetchBalances => "fetch_balances",
        }
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        match self.handler {
            SetUserHandler::Select => {
                if !self.update.has_chain(self.chain_id) {
                    return self.memory.finish(
                        "set_user",
                        Err(ClientError::fatal(format!(
                            "chain {} has no configured client",
                            self.chain_id
                        ))),
                    );
                }
                let (chain, account) = (self.chain_id, self.account);
                let written = self
                    .update
                    .store()
                    .write(|txn| {
                        txn.set_active_chain(chain);
                        txn.set_active_account(account);
                        Ok(())
                    })
                    .await;
                match written {
                    Ok(()) => {
                        self.handler = SetUserHandler::FetchBalances;
                        self.memory.attempts = 0;
                        StepOutcome::Transition("fetch_balances")
                    }
                    Err(error) => self.memory.retry("set_user", &self.policy, error),
                }
            }
            SetUserHandler::FetchBalances => {
                let snapshot = self.update.store().read().await;
                let currency = match snapshot.active_request() {
                    Ok(request) => request.currency,
                    // No request selected (or not fetched yet): nothing to
                    // prefetch for this user.
                    Err(_) => return self.memory.finish("set_user", Ok(())),
                };
                let fetched = async {
                    let spender = self.update.oracle_address(self.chain_id)?;
                    self.update
                        .balance(self.chain_id, currency, self.account)
                        .await?;
                    self.update
                        .allowance(self.chain_id, currency, self.account, spender)
                        .await
                }
                .await;
                match fetched {
                    Ok(()) => self.memory.finish("set_user", Ok(())),
                    Err(error) => self.memory.retry("set_user", &self.policy, error),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SetActiveRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetActiveRequestHandler {
    Select,
    FetchRequest,
    FetchCurrency,
}

/// Selects the active request, fetches its record, then the metadata of its
/// collateral currency.
pub struct SetActiveRequest {
    update: Arc<Update>,
    key: RequestKey,
    policy: WorkflowPolicy,
    handler: SetActiveRequestHandler,
    memory: WorkflowMemory,
}

impl SetActiveRequest {
    pub fn new(update: Arc<Update>, key: RequestKey) -> (Self, WorkflowReceiver) {
        let (memory, rx) = WorkflowMemory::new();
        (
            Self {
                update,
                key,
                policy: WorkflowPolicy::default(),
                handler: SetActiveRequestHandler::Select,
                memory,
            },
            rx,
        )
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for SetActiveRequest {
    fn name(&self) -> &str {
        "set_active_request"
    }

    fn handler(&self) -> &'static str {
        match self.handler {
            SetActiveRequestHandler::Select => "select",
            SetActiveRequestHandler::FetchRequest => "fetch_request",
            SetActiveRequestHandler::FetchCurrency => "fetch_currency",
        }
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        match self.handler {
            SetActiveRequestHandler::Select => {
                if !self.update.has_chain(self.key.chain_id) {
                    return self.memory.finish(
                        "set_active_request",
                        Err(ClientError::fatal(format!(
                            "chain {} has no configured client",
                            self.key.chain_id
                        ))),
                    );
                }
                let key = self.key;
                let written = self
                    .update
                    .store()
                    .write(|txn| {
                        txn.set_active_chain(key.chain_id);
                        txn.set_active_request(key);
                        Ok(())
                    })
                    .await;
                match written {
                    Ok(()) => {
                        self.handler = SetActiveRequestHandler::FetchRequest;
                        self.memory.attempts = 0;
                        StepOutcome::Transition("fetch_request")
                    }
                    Err(error) => self.memory.retry("set_active_request", &self.policy, error),
                }
            }
            SetActiveRequestHandler::FetchRequest => match self.update.request(&self.key).await {
                Ok(()) => {
                    self.handler = SetActiveRequestHandler::FetchCurrency;
                    self.memory.attempts = 0;
                    StepOutcome::Transition("fetch_currency")
                }
                Err(error) => self.memory.retry("set_active_request", &self.policy, error),
            },
            SetActiveRequestHandler::FetchCurrency => {
                let snapshot = self.update.store().read().await;
                let currency = match snapshot.request(&self.key) {
                    Ok(request) => request.currency,
                    Err(error) => {
                        return self.memory.finish("set_active_request", Err(error));
                    }
                };
                match self
                    .update
                    .erc20_metadata(self.key.chain_id, currency)
                    .await
                {
                    Ok(()) => self.memory.finish("set_active_request", Ok(())),
                    Err(error) => self.memory.retry("set_active_request", &self.policy, error),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ApproveSpend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxHandler {
    Submit,
    Confirm,
    Refresh,
}

impl TxHandler {
    fn as_str(&self) -> &'static str {
        match self {
            TxHandler::Submit => "submit",
            TxHandler::Confirm => "confirm",
            TxHandler::Refresh => "refresh",
        }
    }
}

/// Approves the oracle contract to spend `amount` of `token` for the active
/// account, then refreshes the cached allowance.
pub struct ApproveSpend {
    update: Arc<Update>,
    chain_id: ChainId,
    token: Address,
    amount: U256,
    policy: WorkflowPolicy,
    handler: TxHandler,
    memory: WorkflowMemory,
}

impl ApproveSpend {
    pub fn new(
        update: Arc<Update>,
        chain_id: ChainId,
        token: Address,
        amount: U256,
    ) -> (Self, WorkflowReceiver) {
        let (memory, rx) = WorkflowMemory::new();
        (
            Self {
                update,
                chain_id,
                token,
                amount,
                policy: WorkflowPolicy::default(),
                handler: TxHandler::Submit,
                memory,
            },
            rx,
        )
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for ApproveSpend {
    fn name(&self) -> &str {
        "approve_spend"
    }

    fn handler(&self) -> &'static str {
        self.handler.as_str()
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        match self.handler {
            TxHandler::Submit => {
                let snapshot = self.update.store().read().await;
                let account = match snapshot.active_account() {
                    Ok(account) => account,
                    Err(_) => {
                        return self.memory.finish(
                            "approve_spend",
                            Err(ClientError::fatal("no active account selected")),
                        );
                    }
                };
                let client = match self.update.client(self.chain_id) {
                    Ok(client) => client,
                    Err(error) => return self.memory.finish("approve_spend", Err(error)),
                };
                self.memory.account = Some(account);
                let spender = client.oracle_address();
                match client
                    .submit_approve(account, self.token, spender, self.amount)
                    .await
                {
                    Ok(hash) => {
                        info!(
                            "[{}] approval submitted: {hash:?}",
                            self.chain_id
                        );
                        self.memory.tx_hash = Some(hash);
                        self.memory.attempts = 0;
                        self.handler = TxHandler::Confirm;
                        StepOutcome::Transition("confirm")
                    }
                    Err(error) => self.memory.retry("approve_spend", &self.policy, error),
                }
            }
            TxHandler::Confirm => {
                let (client, hash) = match (
                    self.update.client(self.chain_id),
                    self.memory.tx_hash,
                ) {
                    (Ok(client), Some(hash)) => (client, hash),
                    (Err(error), _) => return self.memory.finish("approve_spend", Err(error)),
                    (_, None) => {
                        return self.memory.finish(
                            "approve_spend",
                            Err(ClientError::fatal("confirm without a submitted transaction")),
                        );
                    }
                };
                let status = client.tx_status(hash).await;
                match self
                    .memory
                    .track_confirmation("approve_spend", &self.policy, status)
                {
                    Some(outcome) => outcome,
                    None => {
                        self.handler = TxHandler::Refresh;
                        StepOutcome::Transition("refresh")
                    }
                }
            }
            TxHandler::Refresh => {
                let owner = match self.memory.account {
                    Some(owner) => owner,
                    None => {
                        return self.memory.finish(
                            "approve_spend",
                            Err(ClientError::fatal("refresh without a submitting account")),
                        );
                    }
                };
                let refreshed = async {
                    let spender = self.update.oracle_address(self.chain_id)?;
                    self.update
                        .allowance(self.chain_id, self.token, owner, spender)
                        .await
                }
                .await;
                match refreshed {
                    Ok(()) => self.memory.finish("approve_spend", Ok(())),
                    Err(error) => self.memory.retry("approve_spend", &self.policy, error),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProposePrice
// ---------------------------------------------------------------------------

/// Proposes a price for a request currently in the `Requested` state, waits
/// for confirmation, then refreshes the request record.
pub struct ProposePrice {
    update: Arc<Update>,
    key: RequestKey,
    price: I256,
    policy: WorkflowPolicy,
    handler: TxHandler,
    memory: WorkflowMemory,
}

impl ProposePrice {
    pub fn new(update: Arc<Update>, key: RequestKey, price: I256) -> (Self, WorkflowReceiver) {
        let (memory, rx) = WorkflowMemory::new();
        (
            Self {
                update,
                key,
                price,
                policy: WorkflowPolicy::default(),
                handler: TxHandler::Submit,
                memory,
            },
            rx,
        )
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for ProposePrice {
    fn name(&self) -> &str {
        "propose_price"
    }

    fn handler(&self) -> &'static str {
        self.handler.as_str()
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        match self.handler {
            TxHandler::Submit => {
                let snapshot = self.update.store().read().await;
                let account = match snapshot.active_account() {
                    Ok(account) => account,
                    Err(_) => {
                        return self.memory.finish(
                            "propose_price",
                            Err(ClientError::fatal("no active account selected")),
                        );
                    }
                };
                let state = match snapshot.request(&self.key) {
                    Ok(request) => request.state,
                    Err(error) => return self.memory.finish("propose_price", Err(error)),
                };
                if state != OracleState::Requested {
                    return self.memory.finish(
                        "propose_price",
                        Err(ClientError::fatal(format!(
                            "request {} is {state}, not proposable",
                            self.key
                        ))),
                    );
                }
                let client = match self.update.client(self.key.chain_id) {
                    Ok(client) => client,
                    Err(error) => return self.memory.finish("propose_price", Err(error)),
                };
                self.memory.account = Some(account);
                match client.submit_propose(account, &self.key, self.price).await {
                    Ok(hash) => {
                        info!("[{}] proposal submitted: {hash:?}", self.key.chain_id);
                        self.memory.tx_hash = Some(hash);
                        self.memory.attempts = 0;
                        self.handler = TxHandler::Confirm;
                        StepOutcome::Transition("confirm")
                    }
                    Err(error) => self.memory.retry("propose_price", &self.policy, error),
                }
            }
            TxHandler::Confirm => {
                let (client, hash) =
                    match (self.update.client(self.key.chain_id), self.memory.tx_hash) {
                        (Ok(client), Some(hash)) => (client, hash),
                        (Err(error), _) => {
                            return self.memory.finish("propose_price", Err(error))
                        }
                        (_, None) => {
                            return self.memory.finish(
                                "propose_price",
                                Err(ClientError::fatal(
                                    "confirm without a submitted transaction",
                                )),
                            );
                        }
                    };
                let status = client.tx_status(hash).await;
                match self
                    .memory
                    .track_confirmation("propose_price", &self.policy, status)
                {
                    Some(outcome) => outcome,
                    None => {
                        self.handler = TxHandler::Refresh;
                        StepOutcome::Transition("refresh")
                    }
                }
            }
            TxHandler::Refresh => match self.update.request(&self.key).await {
                Ok(()) => self.memory.finish("propose_price", Ok(())),
                Err(error) => self.memory.retry("propose_price", &self.policy, error),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// DisputePrice
// ---------------------------------------------------------------------------

/// Disputes a proposal currently in the `Proposed` state, waits for
/// confirmation, then refreshes the request record.
pub struct DisputePrice {
    update: Arc<Update>,
    key: RequestKey,
    policy: WorkflowPolicy,
    handler: TxHandler,
    memory: WorkflowMemory,
}

impl DisputePrice {
    pub fn new(update: Arc<Update>, key: RequestKey) -> (Self, WorkflowReceiver) {
        let (memory, rx) = WorkflowMemory::new();
        (
            Self {
                update,
                key,
                policy: WorkflowPolicy::default(),
                handler: TxHandler::Submit,
                memory,
            },
            rx,
        )
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for DisputePrice {
    fn name(&self) -> &str {
        "dispute_price"
    }

    fn handler(&self) -> &'static str {
        self.handler.as_str()
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        match self.handler {
            TxHandler::Submit => {
                let snapshot = self.update.store().read().await;
                let account = match snapshot.active_account() {
                    Ok(account) => account,
                    Err(_) => {
                        return self.memory.finish(
                            "dispute_price",
                            Err(ClientError::fatal("no active account selected")),
                        );
                    }
                };
                let state = match snapshot.request(&self.key) {
                    Ok(request) => request.state,
                    Err(error) => return self.memory.finish("dispute_price", Err(error)),
                };
                if state != OracleState::Proposed {
                    return self.memory.finish(
                        "dispute_price",
                        Err(ClientError::fatal(format!(
                            "request {} is {state}, not disputable",
                            self.key
                        ))),
                    );
                }
                let client = match self.update.client(self.key.chain_id) {
                    Ok(client) => client,
                    Err(error) => return self.memory.finish("dispute_price", Err(error)),
                };
                self.memory.account = Some(account);
                match client.submit_dispute(account, &self.key).await {
                    Ok(hash) => {
                        info!("[{}] dispute submitted: {hash:?}", self.key.chain_id);
                        self.memory.tx_hash = Some(hash);
                        self.memory.attempts = 0;
                        self.handler = TxHandler::Confirm;
                        StepOutcome::Transition("confirm")
                    }
                    Err(error) => self.memory.retry("dispute_price", &self.policy, error),
                }
            }
            TxHandler::Confirm => {
                let (client, hash) =
                    match (self.update.client(self.key.chain_id), self.memory.tx_hash) {
                        (Ok(client), Some(hash)) => (client, hash),
                        (Err(error), _) => {
                            return self.memory.finish("dispute_price", Err(error))
                        }
                        (_, None) => {
                            return self.memory.finish(
                                "dispute_price",
                                Err(ClientError::fatal(
                                    "confirm without a submitted transaction",
                                )),
                            );
                        }
                    };
                let status = client.tx_status(hash).await;
                match self
                    .memory
                    .track_confirmation("dispute_price", &self.policy, status)
                {
                    Some(outcome) => outcome,
                    None => {
                        self.handler = TxHandler::Refresh;
                        StepOutcome::Transition("refresh")
                    }
                }
            }
            TxHandler::Refresh => match self.update.request(&self.key).await {
                Ok(()) => self.memory.finish("dispute_price", Ok(())),
                Err(error) => self.memory.retry("dispute_price", &self.policy, error),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// SwitchChain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchChainHandler {
    Probe,
    RefreshTime,
}

/// Verifies the target chain is reachable, switches the active-chain
/// selector, then refreshes that chain's block time.
pub struct SwitchChain {
    update: Arc<Update>,
    chain_id: ChainId,
    policy: WorkflowPolicy,
    handler: SwitchChainHandler,
    memory: WorkflowMemory,
}

impl SwitchChain {
    pub fn new(update: Arc<Update>, chain_id: ChainId) -> (Self, WorkflowReceiver) {
        let (memory, rx) = WorkflowMemory::new();
        (
            Self {
                update,
                chain_id,
                policy: WorkflowPolicy::default(),
                handler: SwitchChainHandler::Probe,
                memory,
            },
            rx,
        )
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Task for SwitchChain {
    fn name(&self) -> &str {
        "switch_chain"
    }

    fn handler(&self) -> &'static str {
        match self.handler {
            SwitchChainHandler::Probe => "probe",
            SwitchChainHandler::RefreshTime => "refresh_time",
        }
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        match self.handler {
            SwitchChainHandler::Probe => {
                if !self.update.has_chain(self.chain_id) {
                    return self.memory.finish(
                        "switch_chain",
                        Err(ClientError::fatal(format!(
                            "chain {} has no configured client",
                            self.chain_id
                        ))),
                    );
                }
                match self.update.latest_block(self.chain_id).await {
                    Ok(head) => {
                        debug!("[{}] reachable at block {head}", self.chain_id);
                        let chain = self.chain_id;
                        let written = self
                            .update
                            .store()
                            .write(|txn| {
                                txn.set_active_chain(chain);
                                Ok(())
                            })
                            .await;
                        match written {
                            Ok(()) => {
                                self.handler = SwitchChainHandler::RefreshTime;
                                self.memory.attempts = 0;
                                StepOutcome::Transition("refresh_time")
                            }
                            Err(error) => self.memory.retry("switch_chain", &self.policy, error),
                        }
                    }
                    Err(error) => self.memory.retry("switch_chain", &self.policy, error),
                }
            }
            SwitchChainHandler::RefreshTime => match self.update.block_time(self.chain_id).await {
                Ok(()) => self.memory.finish("switch_chain", Ok(())),
                Err(error) => self.memory.retry("switch_chain", &self.policy, error),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// FetchPastEvents
// ---------------------------------------------------------------------------

/// Historical event backfill over `[from, to]` in bounded chunks.
///
/// Ingests through the same fetcher path as the live poller but never
/// touches the live checkpoint: backfilled ranges lie behind it, and the
/// forward-only rule stays with the poller.
pub struct FetchPastEvents {
    update: Arc<Update>,
    chain_id: ChainId,
    from: u64,
    to: u64,
    chunk: u64,
    policy: WorkflowPolicy,
    memory: WorkflowMemory,
}

impl FetchPastEvents {
    pub fn new(
        update: Arc<Update>,
        chain_id: ChainId,
        from: u64,
        to: u64,
        chunk: u64,
    ) -> (Self, WorkflowReceiver) {
        let (memory, rx) = WorkflowMemory::new();
        (
            Self {
                update,
                chain_id,
                from,
                to,
                chunk,
                policy: WorkflowPolicy::default(),
                memory,
            },
            rx,
        )
    }

    pub fn with_policy(mut self, policy: WorkflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Next unprocessed position.
    pub fn cursor(&self) -> u64 {
        self.memory.cursor.unwrap_or(self.from)
    }
}

#[async_trait]
impl Task for FetchPastEvents {
    fn name(&self) -> &str {
        "fetch_past_events"
    }

    fn handler(&self) -> &'static str {
        "fetch"
    }

    async fn step(&mut self, _ctx: &TaskContext) -> StepOutcome {
        if self.chunk == 0 || self.from > self.to {
            return self.memory.finish(
                "fetch_past_events",
                Err(ClientError::fatal(format!(
                    "invalid backfill range [{}, {}] with chunk {}",
                    self.from, self.to, self.chunk
                ))),
            );
        }
        if !self.update.has_chain(self.chain_id) {
            return self.memory.finish(
                "fetch_past_events",
                Err(ClientError::fatal(format!(
                    "chain {} has no configured client",
                    self.chain_id
                ))),
            );
        }

        let start = self.cursor();
        let end = start.saturating_add(self.chunk - 1).min(self.to);
        match self.update.events(self.chain_id, start, end).await {
            Ok(count) => {
                debug!(
                    "[{}] backfilled {count} event(s) in [{start}, {end}]",
                    self.chain_id
                );
                self.memory.cursor = Some(end + 1);
                self.memory.attempts = 0;
                if end >= self.to {
                    self.memory.finish("fetch_past_events", Ok(()))
                } else {
                    // Next chunk on the next tick; no artificial delay.
                    StepOutcome::Sleep(Duration::ZERO)
                }
            }
            Err(error) => self.memory.retry("fetch_past_events", &self.policy, error),
        }
    }
}
