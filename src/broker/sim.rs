//! Simulated broker - deterministic, in-memory, no keys required
//!
//! Every placement resolves according to a scenario tag fixed at
//! construction, which makes protocol and state-machine behavior testable
//! without any external dependency.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::core::{now_ms, Result, Side, Symbol};

use super::{Broker, BrokerOrderView, BrokerPlacement, BrokerState};

/// How the simulator resolves placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Fill immediately.
    Ok,
    /// Cancel immediately.
    Cancel,
    /// Stay in `wait` (the broker accepted but never acked a fill); lets the
    /// ack-timeout path reconcile to a fill later via `force_state`.
    AckTimeoutDone,
    /// Stay in `wait`; exercised by the fill-timeout path.
    FillTimeoutCancel,
}

#[derive(Debug, Clone)]
struct SimOrder {
    exchange_order_id: String,
    state: BrokerState,
    executed_qty: Decimal,
    remaining_qty: Decimal,
    avg_price: Decimal,
    fee: Decimal,
}

#[derive(Default)]
struct SimDb {
    by_uuid: HashMap<String, String>,
    by_oid: HashMap<String, SimOrder>,
    seq: u64,
}

pub struct SimBroker {
    scenario: Scenario,
    db: Mutex<SimDb>,
}

impl SimBroker {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            db: Mutex::new(SimDb::default()),
        }
    }

    /// Test hook: flip an order's broker-side state out of band, the way a
    /// real exchange would between two of our queries.
    pub fn force_state(&self, client_oid: &str, state: BrokerState, executed: Option<Decimal>) {
        let mut db = self.db.lock();
        let Some(order) = db.by_oid.get_mut(client_oid) else {
            return;
        };
        order.state = state;
        if let Some(exec) = executed {
            order.executed_qty = exec;
            order.remaining_qty = (order.remaining_qty - exec).max(Decimal::ZERO);
        }
        if state == BrokerState::Done {
            order.remaining_qty = Decimal::ZERO;
        }
    }

    fn view(order: &SimOrder) -> BrokerOrderView {
        BrokerOrderView {
            exchange_order_id: order.exchange_order_id.clone(),
            state: order.state,
            executed_qty: order.executed_qty,
            remaining_qty: order.remaining_qty,
            avg_price: order.avg_price,
            fee: order.fee,
        }
    }
}

#[async_trait]
impl Broker for SimBroker {
    fn name(&self) -> &str {
        "sim"
    }

    async fn place_limit(
        &self,
        _market: &Symbol,
        _side: Side,
        price: Decimal,
        qty: Decimal,
        client_oid: &str,
    ) -> Result<BrokerPlacement> {
        let mut db = self.db.lock();
        if let Some(existing) = db.by_oid.get(client_oid) {
            return Ok(BrokerPlacement {
                exchange_order_id: existing.exchange_order_id.clone(),
                client_oid: client_oid.to_string(),
            });
        }

        db.seq += 1;
        let exchange_order_id = format!("sim-{}-{:06}", now_ms() / 1000, db.seq);

        let mut order = SimOrder {
            exchange_order_id: exchange_order_id.clone(),
            state: BrokerState::Wait,
            executed_qty: Decimal::ZERO,
            remaining_qty: qty,
            avg_price: price,
            fee: Decimal::ZERO,
        };
        match self.scenario {
            Scenario::Ok => {
                order.state = BrokerState::Done;
                order.executed_qty = qty;
                order.remaining_qty = Decimal::ZERO;
            }
            Scenario::Cancel => order.state = BrokerState::Cancel,
            Scenario::AckTimeoutDone | Scenario::FillTimeoutCancel => {}
        }

        db.by_uuid
            .insert(exchange_order_id.clone(), client_oid.to_string());
        db.by_oid.insert(client_oid.to_string(), order);

        Ok(BrokerPlacement {
            exchange_order_id,
            client_oid: client_oid.to_string(),
        })
    }

    async fn query_order(
        &self,
        exchange_order_id: Option<&str>,
        client_oid: Option<&str>,
    ) -> Result<Option<BrokerOrderView>> {
        let db = self.db.lock();
        let oid = client_oid
            .map(str::to_string)
            .or_else(|| exchange_order_id.and_then(|u| db.by_uuid.get(u).cloned()));
        Ok(oid.and_then(|oid| db.by_oid.get(&oid).map(Self::view)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym() -> Symbol {
        Symbol::new("BTC-KRW")
    }

    #[tokio::test]
    async fn placement_is_idempotent_on_client_oid() {
        let broker = SimBroker::new(Scenario::Ok);
        let a = broker
            .place_limit(&sym(), Side::Buy, Decimal::from(100), Decimal::from(1), "X")
            .await
            .unwrap();
        let b = broker
            .place_limit(&sym(), Side::Buy, Decimal::from(100), Decimal::from(1), "X")
            .await
            .unwrap();
        assert_eq!(a.exchange_order_id, b.exchange_order_id);
    }

    #[tokio::test]
    async fn ok_scenario_fills_immediately() {
        let broker = SimBroker::new(Scenario::Ok);
        broker
            .place_limit(&sym(), Side::Buy, Decimal::from(100), Decimal::from(2), "X")
            .await
            .unwrap();
        let view = broker.query_order(None, Some("X")).await.unwrap().unwrap();
        assert_eq!(view.state, BrokerState::Done);
        assert_eq!(view.executed_qty, Decimal::from(2));
        assert_eq!(view.remaining_qty, Decimal::ZERO);
    }

    #[tokio::test]
    async fn wait_scenarios_stay_pending_until_forced() {
        let broker = SimBroker::new(Scenario::AckTimeoutDone);
        broker
            .place_limit(&sym(), Side::Sell, Decimal::from(100), Decimal::from(1), "X")
            .await
            .unwrap();
        let view = broker.query_order(None, Some("X")).await.unwrap().unwrap();
        assert_eq!(view.state, BrokerState::Wait);

        broker.force_state("X", BrokerState::Done, Some(Decimal::from(1)));
        let view = broker.query_order(None, Some("X")).await.unwrap().unwrap();
        assert_eq!(view.state, BrokerState::Done);
        assert_eq!(view.executed_qty, Decimal::from(1));
    }

    #[tokio::test]
    async fn query_by_exchange_id_or_unknown() {
        let broker = SimBroker::new(Scenario::Cancel);
        let placed = broker
            .place_limit(&sym(), Side::Buy, Decimal::from(100), Decimal::from(1), "X")
            .await
            .unwrap();
        let view = broker
            .query_order(Some(&placed.exchange_order_id), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.state, BrokerState::Cancel);
        assert!(broker.query_order(None, Some("nope")).await.unwrap().is_none());
    }
}
