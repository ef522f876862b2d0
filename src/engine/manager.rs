//! Order Manager - idempotent order table keyed by client_oid
//!
//! The `client_oid -> Order` map is the sole identity index. All mutation
//! happens on the engine loop, so no lock is needed here.

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::{Error, OrderType, Result, Side, Symbol};
use crate::engine::order::{Order, OrderPolicy, OrderStatus};

/// Validated order creation request.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub client_oid: String,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub qty: Decimal,
}

/// Result of the idempotent create-or-fetch.
#[derive(Debug, Clone)]
pub struct EnsureOutcome {
    pub client_oid: String,
    pub duplicate: bool,
    pub status: OrderStatus,
}

/// What the timeout sweep decided for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Status is ambiguous; ask the broker before concluding anything.
    NeedsReconcile { client_oid: String },
    /// No reconciliation allowed; the order was marked EXPIRED in place.
    Expired { client_oid: String },
}

pub struct OrderManager {
    by_oid: HashMap<String, Order>,
    /// Insertion order, oldest first; drives capacity eviction.
    insertion: VecDeque<String>,
    max_orders: usize,
}

impl OrderManager {
    pub fn new(max_orders: usize) -> Self {
        Self {
            by_oid: HashMap::new(),
            insertion: VecDeque::new(),
            max_orders: max_orders.max(1),
        }
    }

    // -------------------------------------------------------------
    // Read views
    // -------------------------------------------------------------

    pub fn get(&self, client_oid: &str) -> Option<&Order> {
        self.by_oid.get(client_oid)
    }

    pub fn contains(&self, client_oid: &str) -> bool {
        self.by_oid.contains_key(client_oid)
    }

    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    /// Most recent `limit` orders, oldest first.
    pub fn list_orders(&self, limit: usize) -> Vec<Order> {
        let skip = self.insertion.len().saturating_sub(limit);
        self.insertion
            .iter()
            .skip(skip)
            .filter_map(|oid| self.by_oid.get(oid).cloned())
            .collect()
    }

    /// Orders not yet terminal (REQUEST/SENT/ACK/PARTIAL).
    pub fn active_count(&self) -> usize {
        self.by_oid.values().filter(|o| o.status.is_active()).count()
    }

    // -------------------------------------------------------------
    // Core actions
    // -------------------------------------------------------------

    /// Idempotent create-or-fetch: the single entry point for new orders.
    ///
    /// Calling this repeatedly with the same `client_oid` never produces two
    /// live orders for that key. An existing non-terminal order (or a
    /// terminal one whose policy forbids reuse) is returned unchanged apart
    /// from `updated_at`.
    pub fn ensure_order(
        &mut self,
        req: OrderRequest,
        policy: OrderPolicy,
        reason: Option<String>,
    ) -> Result<EnsureOutcome> {
        let oid = req.client_oid.trim().to_string();
        if oid.is_empty() {
            return Err(Error::Validation("missing client_oid".into()));
        }

        if let Some(existing) = self.by_oid.get_mut(&oid) {
            let reusable = existing.status.is_terminal()
                && existing.policy.allow_reuse_after_terminal;
            // idempotent=false is a discouraged escape hatch: the key is
            // recycled even while the previous order is live.
            if policy.idempotent && !reusable {
                existing.updated_at = chrono::Utc::now();
                return Ok(EnsureOutcome {
                    client_oid: oid,
                    duplicate: true,
                    status: existing.status,
                });
            }
            warn!(client_oid = %oid, prev_status = %existing.status, "recycling order key");
            self.remove(&oid);
        }

        let order = Order::new(
            oid.clone(),
            req.symbol,
            req.side,
            req.order_type,
            req.price,
            req.qty,
            policy,
            reason,
        );
        let status = order.status;
        self.insert(order);
        debug!(client_oid = %oid, "order created");
        Ok(EnsureOutcome {
            client_oid: oid,
            duplicate: false,
            status,
        })
    }

    /// Is this order eligible to be handed to the broker right now?
    /// Pure eligibility check: the broker call itself is the caller's job.
    pub fn request_send(&self, client_oid: &str, _now_ms: i64) -> bool {
        self.by_oid
            .get(client_oid)
            .map(|o| o.status == OrderStatus::Request)
            .unwrap_or(false)
    }

    /// Apply a status transition. Returns false if the order is unknown.
    /// Transition legality is on the caller (router / reconcile loop).
    pub fn set_status(
        &mut self,
        client_oid: &str,
        status: OrderStatus,
        message: Option<String>,
        exchange_order_id: Option<String>,
    ) -> bool {
        let Some(order) = self.by_oid.get_mut(client_oid) else {
            return false;
        };
        order.apply_status(status);
        if let Some(m) = message {
            order.message = Some(m);
        }
        if let Some(id) = exchange_order_id {
            order.exchange_order_id = Some(id);
        }
        true
    }

    /// Monotonic fill accumulation from a reconcile result.
    pub fn apply_fill(
        &mut self,
        client_oid: &str,
        executed_qty: Decimal,
        avg_price: Option<Decimal>,
        fee: Decimal,
    ) -> bool {
        let Some(order) = self.by_oid.get_mut(client_oid) else {
            return false;
        };
        order.apply_fill(executed_qty, avg_price, fee);
        true
    }

    /// Periodic timeout pass.
    ///
    /// SENT past `ack_timeout_ms` and ACK/PARTIAL past `fill_timeout_ms` are
    /// either flagged for broker reconciliation (policy permitting) or marked
    /// EXPIRED in place. Timeouts never unilaterally assume failure when
    /// reconciliation is available.
    pub fn sweep_timeouts(&mut self, now_ms: i64) -> Vec<SweepOutcome> {
        let mut expire = Vec::new();
        let mut reconcile = Vec::new();

        for order in self.by_oid.values() {
            let timed_out = match order.status {
                OrderStatus::Sent => order
                    .sent_ms
                    .map(|t| now_ms - t > order.policy.ack_timeout_ms)
                    .unwrap_or(false),
                OrderStatus::Ack | OrderStatus::Partial => order
                    .ack_ms
                    .map(|t| now_ms - t > order.policy.fill_timeout_ms)
                    .unwrap_or(false),
                _ => false,
            };
            if !timed_out {
                continue;
            }
            if order.policy.enable_reconcile {
                reconcile.push(order.client_oid.clone());
            } else {
                expire.push(order.client_oid.clone());
            }
        }

        let mut out = Vec::with_capacity(expire.len() + reconcile.len());
        for oid in expire {
            self.set_status(&oid, OrderStatus::Expired, Some("TIMEOUT".into()), None);
            out.push(SweepOutcome::Expired { client_oid: oid });
        }
        for oid in reconcile {
            out.push(SweepOutcome::NeedsReconcile { client_oid: oid });
        }
        out
    }

    /// Re-arm an EXPIRED order for another send attempt, up to the policy's
    /// `max_retry`. Beyond that the order stays EXPIRED permanently.
    pub fn retry_expired(&mut self, client_oid: &str) -> bool {
        let Some(order) = self.by_oid.get_mut(client_oid) else {
            return false;
        };
        if order.status != OrderStatus::Expired || order.retry_count >= order.policy.max_retry {
            return false;
        }
        order.retry_count += 1;
        order.apply_status(OrderStatus::Request);
        debug!(client_oid = %client_oid, retry = order.retry_count, "order re-armed for resend");
        true
    }

    // -------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------

    fn insert(&mut self, order: Order) {
        let oid = order.client_oid.clone();
        self.by_oid.insert(oid.clone(), order);
        self.insertion.push_back(oid);
        while self.insertion.len() > self.max_orders {
            if let Some(oldest) = self.insertion.pop_front() {
                self.by_oid.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, client_oid: &str) {
        self.by_oid.remove(client_oid);
        self.insertion.retain(|oid| oid != client_oid);
    }
}
