// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::Address;
use oracle_types::{ChainId, RequestKey};

/// A snapshot lookup hit data the store has not been populated with yet.
///
/// This is always either a caller bug (read before fetch) or a genuine
/// "not yet known" state; it is never silently defaulted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    #[error("chain {0} is not known to the store")]
    Chain(ChainId),

    #[error("request {0} has not been fetched")]
    Request(RequestKey),

    #[error("erc20 {token:?} on chain {chain} has not been fetched")]
    Erc20 { chain: ChainId, token: Address },

    #[error("balance of {account:?} in {token:?} on chain {chain} has not been fetched")]
    Balance {
        chain: ChainId,
        token: Address,
        account: Address,
    },

    #[error(
        "allowance {owner:?} -> {spender:?} in {token:?} on chain {chain} has not been fetched"
    )]
    Allowance {
        chain: ChainId,
        token: Address,
        owner: Address,
        spender: Address,
    },

    #[error("current block time for chain {0} has not been fetched")]
    CurrentTime(ChainId),

    #[error("no active {0} selected")]
    Selection(&'static str),
}

/// Error type for the client engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// Any failure from an external chain-access call. Pollers record these
    /// into task memory and retry on their next tick.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Malformed parameters to a workflow. Surfaced immediately to the
    /// workflow's caller, never retried.
    #[error("invalid configuration: {0}")]
    FatalConfig(String),

    /// The event-scan checkpoint only moves forward. A write that would move
    /// it backwards rejects the whole transaction.
    #[error("event checkpoint for chain {chain} cannot move backwards ({from} -> {to})")]
    CheckpointRegression { chain: ChainId, from: u64, to: u64 },
}

impl ClientError {
    pub fn transient(msg: impl Into<String>) -> Self {
        ClientError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        ClientError::FatalConfig(msg.into())
    }

    /// Whether this error should be retried on a later tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    /// Short stable string for metrics labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            ClientError::NotFound(_) => "not_found",
            ClientError::Transient(_) => "transient",
            ClientError::FatalConfig(_) => "fatal_config",
            ClientError::CheckpointRegression { .. } => "checkpoint_regression",
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClientError::transient("rpc timeout").is_transient());
        assert!(!ClientError::fatal("no account selected").is_transient());
        assert!(!ClientError::NotFound(NotFound::Chain(ChainId(5))).is_transient());
        assert!(!ClientError::CheckpointRegression {
            chain: ChainId(1),
            from: 10,
            to: 5,
        }
        .is_transient());
    }

    #[test]
    fn test_error_types_are_valid_metric_labels() {
        let errors = [
            ClientError::NotFound(NotFound::Selection("chain")),
            ClientError::transient("x"),
            ClientError::fatal("x"),
            ClientError::CheckpointRegression {
                chain: ChainId(1),
                from: 2,
                to: 1,
            },
        ];
        for error in errors {
            let label = error.error_type();
            assert!(!label.is_empty());
            assert!(label.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn test_not_found_display_names_the_gap() {
        let err = ClientError::from(NotFound::CurrentTime(ChainId(137)));
        assert!(err.to_string().contains("137"));
        let err = ClientError::from(NotFound::Selection("request"));
        assert!(err.to_string().contains("request"));
    }
}
