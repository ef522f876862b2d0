//! Order entity and lifecycle status
//!
//! REQUEST -> SENT -> ACK -> PARTIAL -> FILLED, with CANCELED / REJECTED /
//! EXPIRED / ERROR exits. Terminal states are only ever left when the policy
//! explicitly allows key reuse, or when a timed-out order is retried.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{now_ms, OrderType, Side, Symbol};

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Request,
    Sent,
    Ack,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Error,
    Expired,
}

impl OrderStatus {
    /// Terminal for retry/idempotency purposes. `Error` counts as terminal
    /// here, though reconciliation may still supersede it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::Error
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Request | OrderStatus::Sent | OrderStatus::Ack | OrderStatus::Partial
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Request => "REQUEST",
            OrderStatus::Sent => "SENT",
            OrderStatus::Ack => "ACK",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Error => "ERROR",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", s)
    }
}

/// Timeout/retry/idempotency policy, captured per order at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrderPolicy {
    /// SENT -> ACK deadline
    pub ack_timeout_ms: i64,
    /// ACK/PARTIAL -> FILLED deadline
    pub fill_timeout_ms: i64,
    /// Automatic resend attempts after an ack timeout
    pub max_retry: u32,
    /// Query the broker to resolve ambiguous timeouts
    pub enable_reconcile: bool,
    /// Duplicate client_oid never creates a second order
    pub idempotent: bool,
    /// Permit a fresh order on a key whose previous order is terminal
    pub allow_reuse_after_terminal: bool,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 2_500,
            fill_timeout_ms: 120_000,
            max_retry: 2,
            enable_reconcile: true,
            idempotent: true,
            allow_reuse_after_terminal: false,
        }
    }
}

/// A single order, identified by its idempotency key.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub client_oid: String,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub qty: Decimal,

    pub status: OrderStatus,
    pub exchange_order_id: Option<String>,

    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub fee: Decimal,

    pub reason: Option<String>,
    pub message: Option<String>,
    pub retry_count: u32,

    pub requested_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub ack_at: Option<DateTime<Utc>>,
    /// First entry into a terminal state; never reset.
    pub done_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// Epoch-ms twins of sent/ack for timeout arithmetic.
    pub sent_ms: Option<i64>,
    pub ack_ms: Option<i64>,

    pub policy: OrderPolicy,
}

impl Order {
    pub fn new(
        client_oid: String,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        price: Decimal,
        qty: Decimal,
        policy: OrderPolicy,
        reason: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_oid,
            symbol,
            side,
            order_type,
            price,
            qty,
            status: OrderStatus::Request,
            exchange_order_id: None,
            filled_qty: Decimal::ZERO,
            avg_fill_price: None,
            fee: Decimal::ZERO,
            reason,
            message: None,
            retry_count: 0,
            requested_at: now,
            sent_at: None,
            ack_at: None,
            done_at: None,
            updated_at: now,
            sent_ms: None,
            ack_ms: None,
            policy,
        }
    }

    /// Apply a status transition, recording the at-most-once timestamps.
    /// Legality of the transition is the caller's responsibility.
    pub fn apply_status(&mut self, status: OrderStatus) {
        let now = Utc::now();
        self.status = status;
        match status {
            OrderStatus::Sent => {
                if self.sent_at.is_none() {
                    self.sent_at = Some(now);
                    self.sent_ms = Some(now_ms());
                }
            }
            OrderStatus::Ack | OrderStatus::Partial => {
                if self.ack_at.is_none() {
                    self.ack_at = Some(now);
                    self.ack_ms = Some(now_ms());
                }
            }
            _ => {}
        }
        if status.is_terminal() && self.done_at.is_none() {
            self.done_at = Some(now);
        }
        self.updated_at = now;
    }

    /// Fold in a broker-reported fill. `filled_qty` never decreases.
    pub fn apply_fill(&mut self, executed_qty: Decimal, avg_price: Option<Decimal>, fee: Decimal) {
        if executed_qty > self.filled_qty {
            self.filled_qty = executed_qty;
        }
        if let Some(p) = avg_price {
            if p > Decimal::ZERO {
                self.avg_fill_price = Some(p);
            }
        }
        if fee > self.fee {
            self.fee = fee;
        }
        self.updated_at = Utc::now();
    }
}
