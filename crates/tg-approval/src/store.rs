//! In-memory proposal store with capacity-bounded eviction.
//!
//! Lock discipline: the map lock guards structure only. State transitions
//! clone the per-proposal `Arc` out of the map, release the map lock, and
//! then take the proposal's own lock, so no two transitions run on the
//! same proposal concurrently and the map lock is never held across one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;
use uuid::Uuid;

use tg_schemas::OrderProposal;

use crate::ApprovalError;

pub const DEFAULT_CAPACITY: usize = 1000;

struct Inner {
    map: HashMap<Uuid, Arc<Mutex<OrderProposal>>>,
    /// Insertion order, oldest first; drives eviction.
    order: VecDeque<Uuid>,
}

pub struct ProposalStore {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl ProposalStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a new proposal. At capacity, the oldest proposal in a terminal
    /// state is dropped; non-terminal proposals are never evicted, and the
    /// insert is refused when nothing is evictable.
    pub fn insert(&self, proposal: OrderProposal) -> Result<(), ApprovalError> {
        let mut inner = self.inner.write().expect("store lock poisoned");

        if inner.map.len() >= self.capacity {
            let inner_ref: &Inner = &inner;
            let victim = inner_ref.order.iter().copied().find(|id| {
                inner_ref
                    .map
                    .get(id)
                    // A proposal mid-transition is locked and by definition
                    // not terminal; skip it rather than block.
                    .and_then(|arc| arc.try_lock().ok().map(|p| p.state.is_terminal()))
                    .unwrap_or(false)
            });
            match victim {
                Some(id) => {
                    inner.map.remove(&id);
                    inner.order.retain(|x| *x != id);
                    debug!(proposal_id = %id, "evicted oldest terminal proposal");
                }
                None => return Err(ApprovalError::StoreFull),
            }
        }

        let id = proposal.proposal_id;
        inner.map.insert(id, Arc::new(Mutex::new(proposal)));
        inner.order.push_back(id);
        Ok(())
    }

    /// Handle for a transition; see the module docs for the lock order.
    pub fn handle(&self, id: Uuid) -> Result<Arc<Mutex<OrderProposal>>, ApprovalError> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .map
            .get(&id)
            .cloned()
            .ok_or(ApprovalError::NotFound(id))
    }

    /// Point-in-time copy.
    pub fn snapshot(&self, id: Uuid) -> Result<OrderProposal, ApprovalError> {
        let arc = self.handle(id)?;
        let guard = arc.lock().expect("proposal lock poisoned");
        Ok(guard.clone())
    }

    /// All proposals matching `pred`, newest first.
    pub fn filtered(
        &self,
        limit: usize,
        pred: impl Fn(&OrderProposal) -> bool,
    ) -> Vec<OrderProposal> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut hits: Vec<OrderProposal> = inner
            .map
            .values()
            .filter_map(|arc| {
                let guard = arc.lock().expect("proposal lock poisoned");
                pred(&guard).then(|| guard.clone())
            })
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hits.truncate(limit);
        hits
    }
}

impl Default for ProposalStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use tg_schemas::{
        Constraints, Instrument, OrderIntent, OrderState, OrderType, Side, TimeInForce,
    };

    fn proposal(created_offset_secs: i64) -> OrderProposal {
        let intent = OrderIntent {
            account_id: "DU123456".into(),
            instrument: Instrument::stock("AAPL"),
            side: Side::Buy,
            order_type: OrderType::Mkt,
            quantity: dec!(1),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "store capacity exercise trade".into(),
            strategy_tag: None,
            constraints: Constraints {
                max_slippage_bps: 100,
                max_notional: dec!(100000),
            },
        };
        let now = Utc::now() + Duration::seconds(created_offset_secs);
        OrderProposal::new(intent, Uuid::new_v4(), now).unwrap()
    }

    fn terminal(mut p: OrderProposal) -> OrderProposal {
        let now = p.created_at;
        p.advance(OrderState::Simulated, now).unwrap();
        p.advance(OrderState::RiskRejected, now).unwrap();
        p
    }

    #[test]
    fn eviction_drops_oldest_terminal_only() {
        let store = ProposalStore::new(2);
        let old_terminal = terminal(proposal(0));
        let old_id = old_terminal.proposal_id;
        let live = proposal(1);
        let live_id = live.proposal_id;

        store.insert(old_terminal).unwrap();
        store.insert(live).unwrap();

        let newcomer = proposal(2);
        let new_id = newcomer.proposal_id;
        store.insert(newcomer).unwrap();

        assert!(store.snapshot(old_id).is_err(), "terminal evicted");
        assert!(store.snapshot(live_id).is_ok(), "live proposal kept");
        assert!(store.snapshot(new_id).is_ok());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn full_store_of_live_proposals_refuses_inserts() {
        let store = ProposalStore::new(2);
        store.insert(proposal(0)).unwrap();
        store.insert(proposal(1)).unwrap();

        let err = store.insert(proposal(2)).unwrap_err();
        assert!(matches!(err, ApprovalError::StoreFull));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn filtered_returns_newest_first() {
        let store = ProposalStore::new(10);
        let a = proposal(0);
        let b = proposal(10);
        let (ida, idb) = (a.proposal_id, b.proposal_id);
        store.insert(a).unwrap();
        store.insert(b).unwrap();

        let got = store.filtered(10, |_| true);
        assert_eq!(got[0].proposal_id, idb);
        assert_eq!(got[1].proposal_id, ida);
    }
}
