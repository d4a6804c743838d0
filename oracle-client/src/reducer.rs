// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pure fold of ordered oracle events into request records.
//!
//! Lifecycle state is monotone non-decreasing across the fold, so
//! re-applying an overlapping sub-range of events changes nothing beyond
//! redundant writes. That tolerance is what lets the event poller re-fetch
//! a failed range without tracking exactly where the previous attempt died.

use oracle_types::{OracleEvent, OracleEventKind, Request, RequestKey};
use std::collections::HashMap;

/// Fold `events` (ordered by block, then log index) into `requests`,
/// creating records for keys seen for the first time.
pub fn fold(requests: &mut HashMap<RequestKey, Request>, events: &[OracleEvent]) {
    for event in events {
        apply(requests, event);
    }
}

fn apply(requests: &mut HashMap<RequestKey, Request>, event: &OracleEvent) {
    let record = requests
        .entry(event.key)
        .or_insert_with(|| Request::placeholder(event.key));

    if let Some(currency) = event.currency {
        record.currency = currency;
    }
    if let Some(proposer) = event.proposer {
        record.proposer = Some(proposer);
    }
    if let Some(disputer) = event.disputer {
        record.disputer = Some(disputer);
    }
    match event.kind {
        OracleEventKind::ProposePrice => {
            if event.price.is_some() {
                record.proposed_price = event.price;
            }
        }
        OracleEventKind::Settle => {
            if event.price.is_some() {
                record.resolved_price = event.price;
            }
        }
        _ => {}
    }

    // Never move a record backwards; a duplicate or stale event is a no-op.
    let next = event.kind.resulting_state();
    if next > record.state {
        record.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256, I256};
    use oracle_types::{ChainId, OracleState};

    fn key(seed: u8) -> RequestKey {
        RequestKey::new(
            ChainId(1),
            Address::repeat_byte(seed),
            H256::repeat_byte(seed),
            1_700_000_000,
            &[seed],
        )
    }

    fn event(block: u64, log_index: u32, seed: u8, kind: OracleEventKind) -> OracleEvent {
        OracleEvent {
            chain_id: ChainId(1),
            block_number: block,
            log_index,
            key: key(seed),
            kind,
            currency: None,
            proposer: None,
            disputer: None,
            price: None,
        }
    }

    fn lifecycle(seed: u8) -> Vec<OracleEvent> {
        let mut request = event(10, 0, seed, OracleEventKind::RequestPrice);
        request.currency = Some(Address::repeat_byte(0xcc));
        let mut propose = event(12, 0, seed, OracleEventKind::ProposePrice);
        propose.proposer = Some(Address::repeat_byte(0xbb));
        propose.price = Some(I256::from(42));
        let mut settle = event(20, 1, seed, OracleEventKind::Settle);
        settle.price = Some(I256::from(42));
        vec![request, propose, settle]
    }

    #[test]
    fn test_fold_builds_latest_record() {
        let mut requests = HashMap::new();
        fold(&mut requests, &lifecycle(1));

        let record = &requests[&key(1)];
        assert_eq!(record.state, OracleState::Settled);
        assert_eq!(record.currency, Address::repeat_byte(0xcc));
        assert_eq!(record.proposer, Some(Address::repeat_byte(0xbb)));
        assert_eq!(record.proposed_price, Some(I256::from(42)));
        assert_eq!(record.resolved_price, Some(I256::from(42)));
    }

    #[test]
    fn test_fold_is_idempotent() {
        let events = lifecycle(1);

        let mut once = HashMap::new();
        fold(&mut once, &events);

        let mut twice = HashMap::new();
        fold(&mut twice, &events);
        fold(&mut twice, &events);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_overlapping_subrange_is_a_no_op() {
        let events = lifecycle(1);

        let mut requests = HashMap::new();
        fold(&mut requests, &events);
        let settled = requests.clone();

        // Re-applying the proposal sub-range after settlement must not
        // resurrect the proposed state.
        fold(&mut requests, &events[..2]);
        assert_eq!(requests, settled);
    }

    #[test]
    fn test_independent_keys_fold_independently() {
        let mut requests = HashMap::new();
        fold(&mut requests, &lifecycle(1));
        fold(&mut requests, &[event(11, 0, 2, OracleEventKind::RequestPrice)]);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[&key(1)].state, OracleState::Settled);
        assert_eq!(requests[&key(2)].state, OracleState::Requested);
    }

    #[test]
    fn test_dispute_beats_proposal_but_not_settlement() {
        let mut requests = HashMap::new();
        fold(
            &mut requests,
            &[
                event(10, 0, 1, OracleEventKind::RequestPrice),
                event(11, 0, 1, OracleEventKind::ProposePrice),
                event(12, 0, 1, OracleEventKind::DisputePrice),
            ],
        );
        assert_eq!(requests[&key(1)].state, OracleState::Disputed);

        fold(&mut requests, &[event(15, 0, 1, OracleEventKind::Settle)]);
        fold(&mut requests, &[event(12, 0, 1, OracleEventKind::DisputePrice)]);
        assert_eq!(requests[&key(1)].state, OracleState::Settled);
    }
}
