//! Broker bridge - one interface over the simulated and live brokers
//!
//! The bridge is the only component allowed to perform external I/O. Its
//! responses are folded back into the order table through reconciliation,
//! never written into orders by anyone else.

pub mod sim;
pub mod live;
pub mod reconcile;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::core::{Result, Side, Symbol};

pub use reconcile::reconcile_order;
pub use sim::{Scenario, SimBroker};
pub use live::LiveBroker;

/// Broker-side order lifecycle, as exchanges report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Wait,
    Done,
    Cancel,
}

/// Acknowledgement of a placement.
#[derive(Debug, Clone)]
pub struct BrokerPlacement {
    pub exchange_order_id: String,
    pub client_oid: String,
}

/// The broker's current view of one order.
#[derive(Debug, Clone)]
pub struct BrokerOrderView {
    pub exchange_order_id: String,
    pub state: BrokerState,
    pub executed_qty: Decimal,
    pub remaining_qty: Decimal,
    pub avg_price: Decimal,
    pub fee: Decimal,
}

/// Universal broker interface. Placement is idempotent on `client_oid` at
/// this level too: a second call with the same key returns the original
/// placement without submitting twice.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Broker name ("sim", "live")
    fn name(&self) -> &str;

    /// Place a limit order. Idempotent on `client_oid`.
    async fn place_limit(
        &self,
        market: &Symbol,
        side: Side,
        price: Decimal,
        qty: Decimal,
        client_oid: &str,
    ) -> Result<BrokerPlacement>;

    /// Query the broker's view of an order by exchange id and/or client key.
    async fn query_order(
        &self,
        exchange_order_id: Option<&str>,
        client_oid: Option<&str>,
    ) -> Result<Option<BrokerOrderView>>;
}

/// Select the broker variant from the environment: exchange credentials pick
/// the live bridge, otherwise the simulator. Live placement stays gated by
/// its own flag either way.
pub fn make_broker() -> Arc<dyn Broker> {
    let key = std::env::var("QUANTD_API_KEY").ok().filter(|s| !s.is_empty());
    let secret = std::env::var("QUANTD_API_SECRET").ok().filter(|s| !s.is_empty());
    match (key, secret) {
        (Some(key), Some(secret)) => {
            info!("broker: live (credentials present)");
            Arc::new(LiveBroker::from_env(key, secret))
        }
        _ => {
            info!("broker: sim (no credentials)");
            Arc::new(SimBroker::new(Scenario::Ok))
        }
    }
}
