//! Reconciliation - fold the broker's view into the local order table
//!
//! This is the only path by which PARTIAL/FILLED/CANCELED are reached when a
//! timeout fires: a timed-out order is never assumed failed while the broker
//! can still be asked.

use rust_decimal::Decimal;
use tracing::info;

use crate::engine::manager::OrderManager;
use crate::engine::order::OrderStatus;

use super::{BrokerOrderView, BrokerState};

/// Map a broker view onto the local order. Returns the new status when the
/// order changed, `None` when the order is unknown or already in that state.
pub fn reconcile_order(
    orders: &mut OrderManager,
    client_oid: &str,
    view: &BrokerOrderView,
) -> Option<OrderStatus> {
    let current = orders.get(client_oid)?.status;

    let avg = (view.avg_price > Decimal::ZERO).then_some(view.avg_price);
    if view.executed_qty > Decimal::ZERO {
        orders.apply_fill(client_oid, view.executed_qty, avg, view.fee);
    }

    let next = match view.state {
        BrokerState::Done => OrderStatus::Filled,
        BrokerState::Cancel => OrderStatus::Canceled,
        BrokerState::Wait => {
            if view.executed_qty > Decimal::ZERO {
                OrderStatus::Partial
            } else {
                OrderStatus::Ack
            }
        }
    };

    if next == current {
        // Still refresh the broker id if we only just learned it.
        if orders.get(client_oid)?.exchange_order_id.is_none() {
            orders.set_status(client_oid, current, None, Some(view.exchange_order_id.clone()));
        }
        return None;
    }

    orders.set_status(
        client_oid,
        next,
        Some("reconcile".to_string()),
        Some(view.exchange_order_id.clone()),
    );
    info!(client_oid = %client_oid, from = %current, to = %next, "order reconciled");
    Some(next)
}
