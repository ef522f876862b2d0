//! Command Router - interprets inbound commands against engine state
//!
//! One acknowledgement per request, correlated by `req_id`, plus at most one
//! event to broadcast and at most one broker dispatch for the engine loop to
//! perform. Routing precedence matters: SNAPSHOT.GET is answered before any
//! gate so a reconnecting observer can always recover state, even killed.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::{now_ms, OrderType, Side, Symbol};
use crate::engine::manager::{OrderManager, OrderRequest};
use crate::engine::order::{Order, OrderPolicy};
use crate::engine::state::EngineState;
use crate::protocol::{now_ts, Envelope, ErrorInfo, PROTOCOL_VERSION};

// Error codes surfaced in acks.
pub const ENGINE_KILLED: &str = "ENGINE_KILLED";
pub const ENGINE_ARMED: &str = "ENGINE_ARMED";
pub const ENGINE_NOT_ARMED: &str = "ENGINE_NOT_ARMED";
pub const ENGINE_BLOCKED: &str = "ENGINE_BLOCKED";
pub const INVALID_PAYLOAD: &str = "INVALID_PAYLOAD";
pub const ORDER_CREATE_FAILED: &str = "ORDER_CREATE_FAILED";
pub const UNKNOWN_CMD: &str = "UNKNOWN_CMD";
pub const ENGINE_EXCEPTION: &str = "ENGINE_EXCEPTION";

/// What the router wants the engine loop to do with the broker.
#[derive(Debug, Clone)]
pub struct PlaceDispatch {
    pub client_oid: String,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
}

/// Router result: the ack to write back, an optional event to broadcast and
/// an optional broker placement to dispatch asynchronously.
#[derive(Debug)]
pub struct RouterOutput {
    pub ack: Envelope,
    pub event: Option<Envelope>,
    pub dispatch: Option<PlaceDispatch>,
}

impl RouterOutput {
    pub fn ack_only(ack: Envelope) -> Self {
        Self {
            ack,
            event: None,
            dispatch: None,
        }
    }
}

/// Ack for an unexpected internal fault at the router boundary. The process
/// survives; the caller gets the diagnostic.
pub fn exception_ack(req: &Envelope, state: &EngineState, detail: &str) -> RouterOutput {
    RouterOutput::ack_only(ack(
        req,
        state,
        false,
        json!({"detail": detail}),
        Some(ErrorInfo::new(ENGINE_EXCEPTION, "internal engine fault")),
    ))
}

// ----------------------------------------------------------------
// Typed command payloads, validated once at the channel boundary.
// Unknown fields are rejected, not ignored.
// ----------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotGet {
    tf: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigApply {
    symbol: String,
    tf: String,
    strategy_id: String,
    profile: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlaceLimit {
    client_oid: Option<String>,
    symbol: Option<String>,
    side: Side,
    price: Decimal,
    qty: Decimal,
    policy: Option<OrderPolicy>,
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> std::result::Result<T, ErrorInfo> {
    serde_json::from_value::<T>(payload.clone())
        .map_err(|e| ErrorInfo::new(INVALID_PAYLOAD, e.to_string()))
}

// ----------------------------------------------------------------
// Ack / event construction
// ----------------------------------------------------------------

fn ack(req: &Envelope, state: &EngineState, ok: bool, payload: Value, error: Option<ErrorInfo>) -> Envelope {
    Envelope {
        v: PROTOCOL_VERSION,
        msg_type: "ACK".to_string(),
        ts: now_ts(),
        req_id: req.req_id.clone(),
        run_id: Some(state.run_id.clone()),
        symbol: None,
        seq: None,
        ok: Some(ok),
        error,
        payload,
    }
}

fn ack_ok(req: &Envelope, state: &EngineState, payload: Value) -> Envelope {
    ack(req, state, true, payload, None)
}

fn ack_err(req: &Envelope, state: &EngineState, code: &str, message: impl Into<String>) -> Envelope {
    ack(req, state, false, json!({}), Some(ErrorInfo::new(code, message)))
}

fn make_event(state: &mut EngineState, msg_type: &str, payload: Value) -> Envelope {
    let seq = state.bump_seq();
    Envelope::event(msg_type, state.run_id.clone(), state.symbol.as_str(), seq, payload)
}

/// Full engine/mode/active/versions/market/health summary.
pub fn status_payload(state: &EngineState) -> Value {
    json!({
        "engine": {"run_id": state.run_id, "started_ts": state.started_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()},
        "mode": {"armed": state.armed, "killed": state.killed, "block_orders": state.block_orders},
        "active": {"symbol": state.symbol.as_str(), "tf": state.timeframe, "strategy": state.strategy_id, "profile": state.profile},
        "versions": {"config_version": state.config_version, "params_hash": state.params_hash},
        "market": {"last_price": state.last_price, "last_tick_ts": state.last_tick_ts},
        "health": {"feed": "OK", "latency_ms": 0, "evt_backlog": 0},
    })
}

fn order_summary(order: &Order) -> Value {
    json!({
        "client_oid": order.client_oid,
        "symbol": order.symbol.as_str(),
        "side": order.side,
        "order_type": order.order_type,
        "price": order.price,
        "qty": order.qty,
        "filled_qty": order.filled_qty,
        "status": order.status,
        "exchange_order_id": order.exchange_order_id,
        "retry_count": order.retry_count,
    })
}

/// ORDER.UPDATE event for one order's current state.
pub fn order_event(state: &mut EngineState, order: &Order) -> Envelope {
    let payload = json!({ "order": order_summary(order) });
    make_event(state, "ORDER.UPDATE", payload)
}

// ----------------------------------------------------------------
// Routing
// ----------------------------------------------------------------

/// Route one decoded command. Precedence (each arm returns immediately):
/// snapshot, lightweight queries, unblock, arm/disarm/kill, config, then the
/// armed gate, the order-block gate, and finally the order commands.
pub fn handle_command(
    req: &Envelope,
    state: &mut EngineState,
    orders: &mut OrderManager,
    snapshot_limit: usize,
) -> RouterOutput {
    let cmd = req.msg_type.trim().to_uppercase();

    // ---- SNAPSHOT: always before any gate or validation ----
    if cmd == "SNAPSHOT.GET" {
        let p: SnapshotGet = match parse_payload(&req.payload) {
            Ok(p) => p,
            Err(e) => return RouterOutput::ack_only(ack(req, state, false, json!({}), Some(e))),
        };
        let tf = p.tf.unwrap_or_else(|| state.timeframe.clone());
        let limit = p.limit.unwrap_or(snapshot_limit);
        let snap = build_snapshot(state, orders, &tf, limit);
        return RouterOutput::ack_only(ack_ok(req, state, json!({"snapshot": snap})));
    }

    // ---- lightweight queries, no ARM required ----
    if cmd == "PING" {
        return RouterOutput::ack_only(ack_ok(req, state, json!({"pong": true})));
    }
    if cmd == "ENGINE.STATUS" {
        return RouterOutput::ack_only(ack_ok(req, state, status_payload(state)));
    }
    if cmd == "EVENT.SUBSCRIBE" {
        // Subscription is implicit on the event channel; acked for client compat.
        return RouterOutput::ack_only(ack_ok(req, state, json!({"subscribed": true})));
    }

    if cmd == "LIVE.UNBLOCK" {
        state.block_orders = false;
        return RouterOutput::ack_only(ack_ok(req, state, json!({"block_orders": false})));
    }

    // ---- ARM / DISARM / KILL ----
    if cmd == "LIVE.ARM" {
        if state.killed {
            return RouterOutput::ack_only(ack_err(req, state, ENGINE_KILLED, "cannot arm a killed engine"));
        }
        state.armed = true;
        state.block_orders = false;
        return RouterOutput::ack_only(ack_ok(
            req,
            state,
            json!({"armed": true, "block_orders": false}),
        ));
    }

    if cmd == "LIVE.DISARM" {
        state.armed = false;
        return RouterOutput::ack_only(ack_ok(req, state, json!({"armed": false})));
    }

    if cmd == "KILL.SWITCH" {
        // Irreversible for the process: no UNKILL exists.
        state.killed = true;
        state.armed = false;
        state.block_orders = true;
        return RouterOutput::ack_only(ack_ok(
            req,
            state,
            json!({"killed": true, "block_orders": true}),
        ));
    }

    if cmd == "CONFIG.APPLY" {
        if state.killed {
            return RouterOutput::ack_only(ack_err(req, state, ENGINE_KILLED, "cannot apply config while killed"));
        }
        if state.armed {
            return RouterOutput::ack_only(ack_err(
                req,
                state,
                ENGINE_ARMED,
                "disarm before applying config",
            ));
        }
        let p: ConfigApply = match parse_payload(&req.payload) {
            Ok(p) => p,
            Err(e) => return RouterOutput::ack_only(ack(req, state, false, json!({}), Some(e))),
        };
        state.apply_config(
            Symbol::new(p.symbol),
            p.tf,
            p.strategy_id,
            p.profile,
            if p.params.is_null() { json!({}) } else { p.params },
        );
        let payload = json!({
            "config_version": state.config_version,
            "strategy_id": state.strategy_id,
            "profile": state.profile,
            "symbol": state.symbol.as_str(),
            "params": state.params,
            "params_hash": state.params_hash,
        });
        let event = make_event(state, "CONFIG.UPDATED", payload);
        let ack = ack_ok(
            req,
            state,
            json!({"config_version": state.config_version, "params_hash": state.params_hash}),
        );
        return RouterOutput {
            ack,
            event: Some(event),
            dispatch: None,
        };
    }

    // ---- everything below requires ARM ----
    // Kill implies disarm; report the kill, not the disarm it caused.
    if state.killed {
        return RouterOutput::ack_only(ack_err(req, state, ENGINE_KILLED, "engine killed"));
    }
    if !state.armed {
        return RouterOutput::ack_only(ack_err(req, state, ENGINE_NOT_ARMED, "arm first (LIVE.ARM)"));
    }

    // ---- order commands are additionally gated by block_orders ----
    if state.block_orders && cmd.starts_with("ORDER.") {
        return RouterOutput::ack_only(ack_err(req, state, ENGINE_BLOCKED, "orders blocked (block_orders)"));
    }

    if cmd == "ORDER.PLACE.LIMIT" {
        let p: PlaceLimit = match parse_payload(&req.payload) {
            Ok(p) => p,
            Err(e) => return RouterOutput::ack_only(ack(req, state, false, json!({}), Some(e))),
        };
        if p.price <= Decimal::ZERO || p.qty <= Decimal::ZERO {
            return RouterOutput::ack_only(ack_err(req, state, INVALID_PAYLOAD, "price/qty must be > 0"));
        }

        let symbol = p
            .symbol
            .map(Symbol::new)
            .unwrap_or_else(|| state.symbol.clone());
        // No caller key: the engine mints one and echoes it in the ack. The
        // caller must retain it for retries to stay idempotent.
        let client_oid = match p.client_oid.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            Some(oid) => oid,
            None => format!("oid-{}", &Uuid::new_v4().simple().to_string()[..12]),
        };
        let policy = p.policy.unwrap_or_default();

        let outcome = match orders.ensure_order(
            OrderRequest {
                client_oid: client_oid.clone(),
                symbol: symbol.clone(),
                side: p.side,
                order_type: OrderType::Limit,
                price: p.price,
                qty: p.qty,
            },
            policy,
            Some("ui_place_limit".to_string()),
        ) {
            Ok(o) => o,
            Err(e) => {
                return RouterOutput::ack_only(ack_err(req, state, ORDER_CREATE_FAILED, e.to_string()))
            }
        };

        let send_ready = orders.request_send(&client_oid, now_ms());

        let event = orders.get(&client_oid).cloned().map(|o| order_event(state, &o));
        let dispatch = if send_ready && !outcome.duplicate {
            Some(PlaceDispatch {
                client_oid: client_oid.clone(),
                symbol: symbol.clone(),
                side: p.side,
                price: p.price,
                qty: p.qty,
            })
        } else {
            None
        };

        let ack = ack_ok(
            req,
            state,
            json!({
                "accepted": true,
                "duplicate": outcome.duplicate,
                "send_ready": send_ready,
                "client_oid": client_oid,
                "symbol": symbol.as_str(),
                "side": p.side,
                "price": p.price,
                "qty": p.qty,
                "status": outcome.status,
            }),
        );
        return RouterOutput {
            ack,
            event,
            dispatch,
        };
    }

    RouterOutput::ack_only(ack_err(
        req,
        state,
        UNKNOWN_CMD,
        format!("unknown command: {}", cmd),
    ))
}

// ----------------------------------------------------------------
// Snapshot
// ----------------------------------------------------------------

/// Most recent orders included in a snapshot, regardless of how many candles
/// the caller asked for.
const SNAPSHOT_ORDER_LIMIT: usize = 200;

/// Read-only snapshot: recent candles (synthesized around the last tick),
/// order list, active count, market and mode blocks. Never mutates state.
fn build_snapshot(state: &EngineState, orders: &OrderManager, tf: &str, limit: usize) -> Value {
    let base = state
        .last_price
        .and_then(|p| p.to_f64())
        .unwrap_or(1_500_000.0);
    let now = chrono::Utc::now().timestamp();
    let t0 = now - now % 60;

    let mut candles = Vec::with_capacity(limit);
    for i in 0..limit {
        let t = t0 - ((limit - 1 - i) as i64) * 60;
        let price = base + ((i % 7) as f64 - 3.0) * 50.0;
        candles.push(json!({
            "t": t,
            "o": price - 20.0,
            "h": price + 30.0,
            "l": price - 35.0,
            "c": price,
            "v": 1.0,
        }));
    }

    let listed: Vec<Value> = orders
        .list_orders(SNAPSHOT_ORDER_LIMIT)
        .iter()
        .map(order_summary)
        .collect();

    json!({
        "tf": tf,
        "limit": limit,
        "candles": candles,
        "orders": listed,
        "active": orders.active_count(),
        "market": {"last_price": state.last_price, "last_tick_ts": state.last_tick_ts},
        "mode": {"armed": state.armed, "killed": state.killed, "block_orders": state.block_orders},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::order::OrderStatus;

    fn setup() -> (EngineState, OrderManager) {
        (
            EngineState::new(Symbol::new("BTC-KRW"), "1m"),
            OrderManager::new(100),
        )
    }

    fn cmd(msg_type: &str, payload: Value) -> Envelope {
        Envelope::request(msg_type, "req-1", payload)
    }

    fn route(
        msg_type: &str,
        payload: Value,
        state: &mut EngineState,
        orders: &mut OrderManager,
    ) -> RouterOutput {
        handle_command(&cmd(msg_type, payload), state, orders, 120)
    }

    fn err_code(out: &RouterOutput) -> Option<&str> {
        out.ack.error.as_ref().map(|e| e.code.as_str())
    }

    fn arm(state: &mut EngineState, orders: &mut OrderManager) {
        let out = route("LIVE.ARM", json!({}), state, orders);
        assert_eq!(out.ack.ok, Some(true));
    }

    fn place(oid: &str, state: &mut EngineState, orders: &mut OrderManager) -> RouterOutput {
        route(
            "ORDER.PLACE.LIMIT",
            json!({"client_oid": oid, "symbol": "BTC-KRW", "side": "BUY", "price": 100, "qty": 1}),
            state,
            orders,
        )
    }

    #[test]
    fn ping_works_unarmed() {
        let (mut state, mut orders) = setup();
        let out = route("PING", json!({}), &mut state, &mut orders);
        assert_eq!(out.ack.ok, Some(true));
        assert_eq!(out.ack.payload["pong"], json!(true));
        assert_eq!(out.ack.req_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn status_reports_mode_and_versions() {
        let (mut state, mut orders) = setup();
        let out = route("ENGINE.STATUS", json!({}), &mut state, &mut orders);
        assert_eq!(out.ack.payload["mode"]["armed"], json!(false));
        assert_eq!(out.ack.payload["versions"]["config_version"], json!(0));
    }

    #[test]
    fn snapshot_answers_even_when_killed() {
        let (mut state, mut orders) = setup();
        route("KILL.SWITCH", json!({}), &mut state, &mut orders);
        let out = route("SNAPSHOT.GET", json!({"limit": 5}), &mut state, &mut orders);
        assert_eq!(out.ack.ok, Some(true));
        let snap = &out.ack.payload["snapshot"];
        assert_eq!(snap["candles"].as_array().unwrap().len(), 5);
        assert_eq!(snap["mode"]["killed"], json!(true));
    }

    #[test]
    fn arm_fails_after_kill_forever() {
        let (mut state, mut orders) = setup();
        route("KILL.SWITCH", json!({}), &mut state, &mut orders);
        for _ in 0..3 {
            let out = route("LIVE.ARM", json!({}), &mut state, &mut orders);
            assert_eq!(out.ack.ok, Some(false));
            assert_eq!(err_code(&out), Some(ENGINE_KILLED));
        }
        assert!(!state.armed);
    }

    #[test]
    fn disarm_is_unconditional() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        let out = route("LIVE.DISARM", json!({}), &mut state, &mut orders);
        assert_eq!(out.ack.ok, Some(true));
        assert!(!state.armed);
    }

    #[test]
    fn unblock_clears_block_orders() {
        let (mut state, mut orders) = setup();
        assert!(state.block_orders);
        let out = route("LIVE.UNBLOCK", json!({}), &mut state, &mut orders);
        assert_eq!(out.ack.ok, Some(true));
        assert!(!state.block_orders);
    }

    #[test]
    fn config_apply_rejected_while_armed() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        let out = route(
            "CONFIG.APPLY",
            json!({"symbol": "ETH-KRW", "tf": "5m", "strategy_id": "S", "profile": "SAFE", "params": {}}),
            &mut state,
            &mut orders,
        );
        assert_eq!(err_code(&out), Some(ENGINE_ARMED));
        assert_eq!(state.config_version, 0);
    }

    #[test]
    fn config_apply_updates_and_emits_event() {
        let (mut state, mut orders) = setup();
        let out = route(
            "CONFIG.APPLY",
            json!({"symbol": "ETH-KRW", "tf": "5m", "strategy_id": "SMA", "profile": "SAFE", "params": {"n": 7}}),
            &mut state,
            &mut orders,
        );
        assert_eq!(out.ack.ok, Some(true));
        assert_eq!(out.ack.payload["config_version"], json!(1));
        let evt = out.event.expect("CONFIG.UPDATED event");
        assert_eq!(evt.msg_type, "CONFIG.UPDATED");
        assert_eq!(evt.seq, Some(1));
        assert_eq!(state.symbol.as_str(), "ETH-KRW");
    }

    #[test]
    fn config_apply_rejects_unknown_fields() {
        let (mut state, mut orders) = setup();
        let out = route(
            "CONFIG.APPLY",
            json!({"symbol": "ETH-KRW", "tf": "5m", "strategy_id": "S", "profile": "SAFE", "bogus": 1}),
            &mut state,
            &mut orders,
        );
        assert_eq!(err_code(&out), Some(INVALID_PAYLOAD));
        assert_eq!(state.config_version, 0);
    }

    #[test]
    fn orders_require_arming() {
        let (mut state, mut orders) = setup();
        let out = place("X", &mut state, &mut orders);
        assert_eq!(err_code(&out), Some(ENGINE_NOT_ARMED));
        assert_eq!(orders.len(), 0);
    }

    #[test]
    fn orders_blocked_when_block_orders_set() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        state.block_orders = true;
        let out = place("X", &mut state, &mut orders);
        assert_eq!(err_code(&out), Some(ENGINE_BLOCKED));
        assert_eq!(orders.len(), 0);
    }

    #[test]
    fn order_rejected_with_killed_code_after_kill() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        route("KILL.SWITCH", json!({}), &mut state, &mut orders);
        // Kill also disarms, but the caller must see the kill, not the disarm.
        let out = place("X", &mut state, &mut orders);
        assert_eq!(err_code(&out), Some(ENGINE_KILLED));
        assert_eq!(orders.len(), 0);

        let out = route("LIVE.ARM", json!({}), &mut state, &mut orders);
        assert_eq!(err_code(&out), Some(ENGINE_KILLED));
    }

    #[test]
    fn place_limit_accepts_and_replays_as_duplicate() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);

        let out = place("X", &mut state, &mut orders);
        assert_eq!(out.ack.ok, Some(true));
        assert_eq!(out.ack.payload["accepted"], json!(true));
        assert_eq!(out.ack.payload["duplicate"], json!(false));
        assert_eq!(out.ack.payload["status"], json!("REQUEST"));
        assert!(out.dispatch.is_some());
        assert_eq!(orders.len(), 1);

        let replay = place("X", &mut state, &mut orders);
        assert_eq!(replay.ack.payload["accepted"], json!(true));
        assert_eq!(replay.ack.payload["duplicate"], json!(true));
        assert!(replay.dispatch.is_none());
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn place_limit_validates_price_and_qty() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        let out = route(
            "ORDER.PLACE.LIMIT",
            json!({"client_oid": "X", "side": "BUY", "price": 0, "qty": 1}),
            &mut state,
            &mut orders,
        );
        assert_eq!(err_code(&out), Some(INVALID_PAYLOAD));
        assert_eq!(orders.len(), 0);
    }

    #[test]
    fn place_limit_rejects_bad_side() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        let out = route(
            "ORDER.PLACE.LIMIT",
            json!({"client_oid": "X", "side": "HOLD", "price": 100, "qty": 1}),
            &mut state,
            &mut orders,
        );
        assert_eq!(err_code(&out), Some(INVALID_PAYLOAD));
    }

    #[test]
    fn place_limit_generates_key_when_absent() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        let out = route(
            "ORDER.PLACE.LIMIT",
            json!({"side": "SELL", "price": 100, "qty": 1}),
            &mut state,
            &mut orders,
        );
        assert_eq!(out.ack.ok, Some(true));
        let oid = out.ack.payload["client_oid"].as_str().unwrap();
        assert!(oid.starts_with("oid-"));
        assert!(orders.contains(oid));
    }

    #[test]
    fn place_limit_honors_policy_payload() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        let out = route(
            "ORDER.PLACE.LIMIT",
            json!({"client_oid": "X", "side": "BUY", "price": 100, "qty": 1,
                   "policy": {"ack_timeout_ms": 500, "enable_reconcile": false}}),
            &mut state,
            &mut orders,
        );
        assert_eq!(out.ack.ok, Some(true));
        let o = orders.get("X").unwrap();
        assert_eq!(o.policy.ack_timeout_ms, 500);
        assert!(!o.policy.enable_reconcile);
        // Unspecified fields keep defaults.
        assert_eq!(o.policy.max_retry, 2);
    }

    #[test]
    fn unknown_command_rejected() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        let out = route("FROBNICATE", json!({}), &mut state, &mut orders);
        assert_eq!(err_code(&out), Some(UNKNOWN_CMD));
    }

    #[test]
    fn event_seq_is_strictly_monotonic() {
        let (mut state, mut orders) = setup();
        let mut seqs = Vec::new();
        for i in 0..5 {
            let out = route(
                "CONFIG.APPLY",
                json!({"symbol": "ETH-KRW", "tf": "5m", "strategy_id": format!("S{}", i), "profile": "SAFE"}),
                &mut state,
                &mut orders,
            );
            seqs.push(out.event.unwrap().seq.unwrap());
        }
        for w in seqs.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn snapshot_lists_orders() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        place("X", &mut state, &mut orders);
        let out = route("SNAPSHOT.GET", json!({}), &mut state, &mut orders);
        let snap = &out.ack.payload["snapshot"];
        assert_eq!(snap["active"], json!(1));
        assert_eq!(snap["orders"][0]["client_oid"], json!("X"));
    }

    #[test]
    fn snapshot_order_list_independent_of_candle_limit() {
        let (mut state, mut orders) = setup();
        arm(&mut state, &mut orders);
        place("X", &mut state, &mut orders);
        place("Y", &mut state, &mut orders);
        let out = route("SNAPSHOT.GET", json!({"limit": 1}), &mut state, &mut orders);
        let snap = &out.ack.payload["snapshot"];
        assert_eq!(snap["candles"].as_array().unwrap().len(), 1);
        // A narrow candle window must not hide orders.
        assert_eq!(snap["orders"].as_array().unwrap().len(), 2);
    }
}
