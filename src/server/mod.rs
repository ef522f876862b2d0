//! Engine server - local IPC listeners and the single engine loop
//!
//! Two unix sockets: a request/response command channel and a push-only
//! event channel. All state mutation happens on one sequential loop; socket
//! tasks only move bytes. Broker I/O is spawned off the loop and folds back
//! in as messages, so the loop never blocks.

pub mod broadcast;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::broker::{reconcile_order, Broker, BrokerOrderView, BrokerPlacement};
use crate::core::{now_ms, EngineConfig, Result, Symbol};
use crate::engine::manager::{OrderManager, SweepOutcome};
use crate::engine::order::OrderStatus;
use crate::engine::router::{exception_ack, handle_command, order_event, RouterOutput};
use crate::engine::state::EngineState;
use crate::protocol::{encode, now_ts, DecodeBuffer, Envelope};

pub use broadcast::Broadcaster;

/// Everything the engine loop reacts to besides its own timers.
enum EngineMsg {
    /// A decoded command; the ack bytes go back through `reply`.
    Command {
        env: Envelope,
        reply: oneshot::Sender<Vec<u8>>,
    },
    /// A new event-channel observer.
    Observer { sink: flume::Sender<Vec<u8>> },
    /// Result of an async broker placement.
    Placed {
        client_oid: String,
        result: Result<BrokerPlacement>,
    },
    /// Result of an async broker query.
    Reconciled {
        client_oid: String,
        result: Result<Option<BrokerOrderView>>,
    },
}

pub struct EngineServer {
    config: EngineConfig,
    broker: Arc<dyn Broker>,
}

impl EngineServer {
    pub fn new(config: EngineConfig, broker: Arc<dyn Broker>) -> Self {
        Self { config, broker }
    }

    /// Bind both sockets and run the engine loop until the process exits.
    pub async fn run(self) -> Result<()> {
        // Stale socket files from a previous run would fail the bind.
        let _ = std::fs::remove_file(&self.config.cmd_socket);
        let _ = std::fs::remove_file(&self.config.evt_socket);

        let cmd_listener = UnixListener::bind(&self.config.cmd_socket)?;
        let evt_listener = UnixListener::bind(&self.config.evt_socket)?;

        let (msg_tx, msg_rx) = flume::unbounded::<EngineMsg>();

        tokio::spawn(accept_cmd(
            cmd_listener,
            msg_tx.clone(),
            self.config.max_frame_len,
        ));
        tokio::spawn(accept_evt(evt_listener, msg_tx.clone()));

        self.engine_loop(msg_rx, msg_tx).await
    }

    async fn engine_loop(
        self,
        msg_rx: flume::Receiver<EngineMsg>,
        msg_tx: flume::Sender<EngineMsg>,
    ) -> Result<()> {
        let cfg = self.config;
        let broker = self.broker;

        let mut state = EngineState::new(Symbol::new(&cfg.symbol), cfg.timeframe.clone());
        let mut orders = OrderManager::new(cfg.max_orders);
        let mut broadcaster = Broadcaster::new();

        info!(
            run_id = %state.run_id,
            cmd = %cfg.cmd_socket.display(),
            evt = %cfg.evt_socket.display(),
            "engine listening"
        );
        let start_evt = emit(
            &mut state,
            "TIMELINE.EVENT",
            json!({
                "level": "INFO", "category": "SYSTEM", "code": "ENGINE_START",
                "msg": "engine started",
                "meta": {"cmd": cfg.cmd_socket.display().to_string(), "evt": cfg.evt_socket.display().to_string()},
            }),
        );
        broadcaster.broadcast(&start_evt);

        let mut tick = tokio::time::interval(Duration::from_millis(cfg.tick_interval_ms));
        let mut status = tokio::time::interval(Duration::from_millis(cfg.status_interval_ms));
        let mut sweep = tokio::time::interval(Duration::from_millis(cfg.sweep_interval_ms));

        loop {
            tokio::select! {
                msg = msg_rx.recv_async() => {
                    let Ok(msg) = msg else { break };
                    match msg {
                        EngineMsg::Command { env, reply } => {
                            let routed = catch_unwind(AssertUnwindSafe(|| {
                                handle_command(&env, &mut state, &mut orders, cfg.snapshot_limit)
                            }));
                            let out = match routed {
                                Ok(out) => out,
                                Err(_) => {
                                    error!(cmd = %env.msg_type, "command handler panicked");
                                    exception_ack(&env, &state, "panic in command handler")
                                }
                            };

                            let RouterOutput { ack, event, dispatch } = out;
                            match encode(&ack) {
                                Ok(bytes) => {
                                    let _ = reply.send(bytes);
                                }
                                Err(e) => error!("unencodable ack: {}", e),
                            }
                            if let Some(evt) = event {
                                broadcaster.broadcast(&evt);
                            }
                            if let Some(d) = dispatch {
                                dispatch_placement(
                                    &d.client_oid, &mut orders, &mut state,
                                    &mut broadcaster, &broker, &msg_tx,
                                );
                            }
                        }
                        EngineMsg::Observer { sink } => {
                            let payload = json!({"msg": "EVT connected", "run_id": state.run_id});
                            let hello = emit(&mut state, "EVT.SERVER_HELLO", payload);
                            if let Ok(bytes) = encode(&hello) {
                                let _ = sink.send(bytes);
                            }
                            broadcaster.attach(sink);
                            debug!(observers = broadcaster.observer_count(), "observer connected");
                        }
                        EngineMsg::Placed { client_oid, result } => match result {
                            Ok(placement) => {
                                orders.set_status(
                                    &client_oid,
                                    OrderStatus::Ack,
                                    None,
                                    Some(placement.exchange_order_id.clone()),
                                );
                                broadcast_order(&client_oid, &mut orders, &mut state, &mut broadcaster);
                                // Fold fills in promptly rather than waiting
                                // out the fill-timeout sweep.
                                spawn_query(&client_oid, Some(placement.exchange_order_id), &broker, &msg_tx);
                            }
                            Err(e) => {
                                let msg = e.to_string();
                                warn!(client_oid = %client_oid, "placement failed: {}", msg);
                                orders.set_status(
                                    &client_oid,
                                    OrderStatus::Error,
                                    Some(msg.clone()),
                                    None,
                                );
                                broadcast_order(&client_oid, &mut orders, &mut state, &mut broadcaster);
                                let evt = emit(
                                    &mut state,
                                    "TIMELINE.EVENT",
                                    json!({
                                        "level": "ERROR", "category": "ORDER", "code": "PLACE_FAILED",
                                        "msg": msg, "meta": {"client_oid": client_oid},
                                    }),
                                );
                                broadcaster.broadcast(&evt);
                            }
                        },
                        EngineMsg::Reconciled { client_oid, result } => match result {
                            Ok(Some(view)) => {
                                if let Some(next) = reconcile_order(&mut orders, &client_oid, &view) {
                                    debug!(client_oid = %client_oid, status = %next, "reconciled");
                                    broadcast_order(&client_oid, &mut orders, &mut state, &mut broadcaster);
                                }
                            }
                            Ok(None) => {
                                // The broker has no record: the send never
                                // took effect. Expire, then resend if the
                                // retry budget allows.
                                orders.set_status(
                                    &client_oid,
                                    OrderStatus::Expired,
                                    Some("NOT_FOUND".into()),
                                    None,
                                );
                                broadcast_order(&client_oid, &mut orders, &mut state, &mut broadcaster);
                                maybe_retry(
                                    &client_oid, &mut orders, &mut state,
                                    &mut broadcaster, &broker, &msg_tx,
                                );
                            }
                            Err(e) => {
                                // Infrastructure fault: an order only changes
                                // status via an explicit reconcile result.
                                warn!(client_oid = %client_oid, "reconcile query failed: {}", e);
                            }
                        },
                    }
                }
                _ = tick.tick() => {
                    heartbeat_and_tick(&cfg, &mut state, &mut broadcaster);
                }
                _ = status.tick() => {
                    let payload = status_update_payload(&state);
                    let evt = emit(&mut state, "ENGINE.STATUS.UPDATE", payload);
                    broadcaster.broadcast(&evt);
                }
                _ = sweep.tick() => {
                    for outcome in orders.sweep_timeouts(now_ms()) {
                        match outcome {
                            SweepOutcome::Expired { client_oid } => {
                                broadcast_order(&client_oid, &mut orders, &mut state, &mut broadcaster);
                                maybe_retry(
                                    &client_oid, &mut orders, &mut state,
                                    &mut broadcaster, &broker, &msg_tx,
                                );
                            }
                            SweepOutcome::NeedsReconcile { client_oid } => {
                                let exchange_id = orders
                                    .get(&client_oid)
                                    .and_then(|o| o.exchange_order_id.clone());
                                spawn_query(&client_oid, exchange_id, &broker, &msg_tx);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Event envelope stamped with the engine identity and the next sequence
/// number.
fn emit(state: &mut EngineState, msg_type: &str, payload: Value) -> Envelope {
    let seq = state.bump_seq();
    Envelope::event(msg_type, state.run_id.clone(), state.symbol.as_str(), seq, payload)
}

fn broadcast_order(
    client_oid: &str,
    orders: &mut OrderManager,
    state: &mut EngineState,
    broadcaster: &mut Broadcaster,
) {
    if let Some(order) = orders.get(client_oid).cloned() {
        let evt = order_event(state, &order);
        broadcaster.broadcast(&evt);
    }
}

/// Mark SENT and hand the placement to the broker off-loop. The result comes
/// back as `EngineMsg::Placed`.
fn dispatch_placement(
    client_oid: &str,
    orders: &mut OrderManager,
    state: &mut EngineState,
    broadcaster: &mut Broadcaster,
    broker: &Arc<dyn Broker>,
    msg_tx: &flume::Sender<EngineMsg>,
) {
    let Some(order) = orders.get(client_oid) else {
        return;
    };
    let (symbol, side, price, qty) = (order.symbol.clone(), order.side, order.price, order.qty);

    orders.set_status(client_oid, OrderStatus::Sent, None, None);
    broadcast_order(client_oid, orders, state, broadcaster);

    let broker = Arc::clone(broker);
    let tx = msg_tx.clone();
    let oid = client_oid.to_string();
    tokio::spawn(async move {
        let result = broker.place_limit(&symbol, side, price, qty, &oid).await;
        let _ = tx
            .send_async(EngineMsg::Placed {
                client_oid: oid,
                result,
            })
            .await;
    });
}

fn spawn_query(
    client_oid: &str,
    exchange_order_id: Option<String>,
    broker: &Arc<dyn Broker>,
    msg_tx: &flume::Sender<EngineMsg>,
) {
    let broker = Arc::clone(broker);
    let tx = msg_tx.clone();
    let oid = client_oid.to_string();
    tokio::spawn(async move {
        let result = broker
            .query_order(exchange_order_id.as_deref(), Some(&oid))
            .await;
        let _ = tx
            .send_async(EngineMsg::Reconciled {
                client_oid: oid,
                result,
            })
            .await;
    });
}

/// Automatic resend after an ack timeout, while the retry budget lasts.
/// Orders that were already acked (fill timeout) are never resent.
fn maybe_retry(
    client_oid: &str,
    orders: &mut OrderManager,
    state: &mut EngineState,
    broadcaster: &mut Broadcaster,
    broker: &Arc<dyn Broker>,
    msg_tx: &flume::Sender<EngineMsg>,
) {
    let never_acked = orders
        .get(client_oid)
        .map(|o| o.ack_ms.is_none())
        .unwrap_or(false);
    if never_acked && orders.retry_expired(client_oid) {
        dispatch_placement(client_oid, orders, state, broadcaster, broker, msg_tx);
    }
}

fn heartbeat_and_tick(cfg: &EngineConfig, state: &mut EngineState, broadcaster: &mut Broadcaster) {
    let hb_payload = json!({
        "lag_ms": 0,
        "evt_backlog": 0,
        "engine_uptime_sec": state.uptime_sec(),
        "health": {
            "feed": "OK",
            "account": "UNKNOWN",
            "orders": if state.block_orders { "DISABLED" } else { "ENABLED" },
        },
    });
    let hb = emit(state, "EVT.HEARTBEAT", hb_payload);
    broadcaster.broadcast(&hb);

    // Synthetic slow-walk tick: keeps the market block and the monitor chart
    // alive without a data provider attached.
    let base = state
        .last_price
        .and_then(|p| p.to_f64())
        .unwrap_or(1_500_000.0);
    let step = ((state.evt_seq % 7) as f64 - 3.0) * 150.0;
    let price = base + step;
    state.last_price = Decimal::try_from(price).ok();
    state.last_tick_ts = Some(now_ts());

    let now = chrono::Utc::now().timestamp();
    let t0 = now - now % 60;
    let candle_payload = json!({
        "tf": cfg.timeframe,
        "kind": "UPDATE",
        "candle": {"t": t0, "o": price - 200.0, "h": price + 300.0, "l": price - 350.0, "c": price, "v": 1.23},
        "source": "SYNTH",
    });
    let candle = emit(state, "DATA.CANDLE", candle_payload);
    broadcaster.broadcast(&candle);

    let ind_payload = json!({
        "tf": cfg.timeframe,
        "at_t": t0,
        "values": {"rsi14": 55.2, "ema20": price - 120.0, "bb_up": price * 1.01, "bb_lo": price * 0.99},
    });
    let ind = emit(state, "INDICATOR.UPDATE", ind_payload);
    broadcaster.broadcast(&ind);
}

fn status_update_payload(state: &EngineState) -> Value {
    json!({
        "mode": {"armed": state.armed, "killed": state.killed, "block_orders": state.block_orders},
        "config": {"strategy_id": state.strategy_id, "profile": state.profile,
                   "config_version": state.config_version, "params_hash": state.params_hash},
        "market": {"last_price": state.last_price, "last_tick_ts": state.last_tick_ts},
        "position": {"side": "NONE", "qty": 0.0, "avg_price": 0.0, "unrealized_pnl_pct": 0.0},
        "risk": {"block_state": "OK", "block_reason": null, "exposure_pct": 0.0,
                 "daily_loss_limit_pct": 30.0, "daily_pnl_pct": 0.0},
        "health": {"feed": "OK", "latency_ms": 0},
    })
}

// ----------------------------------------------------------------
// Socket plumbing
// ----------------------------------------------------------------

async fn accept_cmd(listener: UnixListener, msg_tx: flume::Sender<EngineMsg>, max_frame_len: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(cmd_connection(stream, msg_tx.clone(), max_frame_len));
            }
            Err(e) => {
                error!("cmd accept failed: {}", e);
                return;
            }
        }
    }
}

/// One command connection: decode frames, route each through the engine loop
/// and write the ack back before reading the next. This is what keeps acks
/// in request order per connection.
async fn cmd_connection(mut stream: UnixStream, msg_tx: flume::Sender<EngineMsg>, max_frame_len: usize) {
    let mut buf = DecodeBuffer::new(max_frame_len);
    let mut chunk = [0u8; 8192];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        buf.feed(&chunk[..n]);
        loop {
            match buf.next() {
                Ok(Some(env)) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    if msg_tx
                        .send_async(EngineMsg::Command {
                            env,
                            reply: reply_tx,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let Ok(bytes) = reply_rx.await else { return };
                    if stream.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("closing cmd connection: {}", e);
                    return;
                }
            }
        }
    }
}

async fn accept_evt(listener: UnixListener, msg_tx: flume::Sender<EngineMsg>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let (sink_tx, sink_rx) = flume::unbounded::<Vec<u8>>();
                if msg_tx
                    .send_async(EngineMsg::Observer { sink: sink_tx })
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::spawn(evt_writer(stream, sink_rx));
            }
            Err(e) => {
                error!("evt accept failed: {}", e);
                return;
            }
        }
    }
}

/// Drain one observer's byte channel onto its socket. A write failure ends
/// the task; the broadcaster prunes the sender on its next send.
async fn evt_writer(mut stream: UnixStream, rx: flume::Receiver<Vec<u8>>) {
    while let Ok(bytes) = rx.recv_async().await {
        if stream.write_all(&bytes).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Scenario, SimBroker};
    use crate::client::{CommandClient, EventClient};

    fn test_config() -> EngineConfig {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let dir = std::env::temp_dir();
        EngineConfig {
            cmd_socket: dir.join(format!("quantd-test-{}-cmd.sock", &tag[..8])),
            evt_socket: dir.join(format!("quantd-test-{}-evt.sock", &tag[..8])),
            tick_interval_ms: 100,
            status_interval_ms: 5_000,
            sweep_interval_ms: 50,
            ..EngineConfig::default()
        }
    }

    async fn start_server(cfg: &EngineConfig) {
        start_server_with(cfg, Arc::new(SimBroker::new(Scenario::Ok))).await;
    }

    async fn start_server_with(cfg: &EngineConfig, broker: Arc<dyn Broker>) {
        let server = EngineServer::new(cfg.clone(), broker);
        tokio::spawn(server.run());
        // Wait until the command socket accepts.
        for _ in 0..50 {
            if CommandClient::connect(&cfg.cmd_socket, Duration::from_millis(100))
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("server did not come up");
    }

    /// Poll snapshots until the order's status matches, or give up.
    async fn wait_for_status(client: &mut CommandClient, oid: &str, want: &str) -> bool {
        for _ in 0..50 {
            let ack = send(client, "SNAPSHOT.GET", json!({"limit": 1})).await;
            let orders = &ack.payload["snapshot"]["orders"];
            let hit = orders
                .as_array()
                .into_iter()
                .flatten()
                .any(|o| o["client_oid"] == json!(oid) && o["status"] == json!(want));
            if hit {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    async fn send(
        client: &mut CommandClient,
        msg_type: &str,
        payload: Value,
    ) -> Envelope {
        client
            .send(msg_type, payload, Duration::from_secs(2))
            .await
            .expect("command round trip")
    }

    #[tokio::test]
    async fn ping_and_status_over_the_wire() {
        let cfg = test_config();
        start_server(&cfg).await;
        let mut client = CommandClient::connect(&cfg.cmd_socket, Duration::from_secs(1))
            .await
            .unwrap();

        let ack = send(&mut client, "PING", json!({})).await;
        assert_eq!(ack.ok, Some(true));
        assert_eq!(ack.payload["pong"], json!(true));

        let ack = send(&mut client, "ENGINE.STATUS", json!({})).await;
        assert_eq!(ack.payload["mode"]["armed"], json!(false));
        let _ = std::fs::remove_file(&cfg.cmd_socket);
        let _ = std::fs::remove_file(&cfg.evt_socket);
    }

    #[tokio::test]
    async fn arm_place_and_replay_end_to_end() {
        let cfg = test_config();
        start_server(&cfg).await;
        let mut client = CommandClient::connect(&cfg.cmd_socket, Duration::from_secs(1))
            .await
            .unwrap();

        let ack = send(&mut client, "LIVE.ARM", json!({})).await;
        assert_eq!(ack.ok, Some(true));

        let place = json!({"client_oid": "X", "side": "BUY", "price": 100, "qty": 1});
        let ack = send(&mut client, "ORDER.PLACE.LIMIT", place.clone()).await;
        assert_eq!(ack.payload["accepted"], json!(true));
        assert_eq!(ack.payload["duplicate"], json!(false));

        let ack = send(&mut client, "ORDER.PLACE.LIMIT", place).await;
        assert_eq!(ack.payload["duplicate"], json!(true));

        // The sim broker fills immediately; the snapshot converges on FILLED.
        assert!(
            wait_for_status(&mut client, "X", "FILLED").await,
            "order never reconciled to FILLED"
        );
        let _ = std::fs::remove_file(&cfg.cmd_socket);
        let _ = std::fs::remove_file(&cfg.evt_socket);
    }

    #[tokio::test]
    async fn fill_timeout_reconciles_through_broker_instead_of_expiring() {
        let cfg = test_config();
        let broker = Arc::new(SimBroker::new(Scenario::AckTimeoutDone));
        start_server_with(&cfg, broker.clone()).await;
        let mut client = CommandClient::connect(&cfg.cmd_socket, Duration::from_secs(1))
            .await
            .unwrap();

        send(&mut client, "LIVE.ARM", json!({})).await;
        let ack = send(
            &mut client,
            "ORDER.PLACE.LIMIT",
            json!({"client_oid": "X", "side": "BUY", "price": 100, "qty": 1,
                   "policy": {"fill_timeout_ms": 100}}),
        )
        .await;
        assert_eq!(ack.ok, Some(true));

        // The broker accepted but never fills, so the order parks at ACK.
        assert!(wait_for_status(&mut client, "X", "ACK").await);

        // Well past the fill deadline: the sweep must query the broker, and
        // the broker still says wait, so the order must not be expired.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let ack = send(&mut client, "SNAPSHOT.GET", json!({"limit": 1})).await;
        assert_eq!(ack.payload["snapshot"]["orders"][0]["status"], json!("ACK"));

        // The exchange finally reports the fill out of band; the next sweep's
        // reconcile picks it up.
        broker.force_state("X", crate::broker::BrokerState::Done, Some(Decimal::from(1)));
        assert!(
            wait_for_status(&mut client, "X", "FILLED").await,
            "timed-out order never reconciled to the broker's fill"
        );
        let _ = std::fs::remove_file(&cfg.cmd_socket);
        let _ = std::fs::remove_file(&cfg.evt_socket);
    }

    #[tokio::test]
    async fn observer_gets_hello_and_ordered_seqs() {
        let cfg = test_config();
        start_server(&cfg).await;

        let mut events = EventClient::connect(&cfg.evt_socket, Duration::from_secs(1))
            .await
            .unwrap();

        let hello = events.next_event(Duration::from_secs(2)).await.unwrap();
        assert_eq!(hello.msg_type, "EVT.SERVER_HELLO");

        let mut prev = hello.seq.unwrap();
        for _ in 0..5 {
            let evt = events.next_event(Duration::from_secs(2)).await.unwrap();
            let seq = evt.seq.unwrap();
            assert!(seq > prev, "seq must be strictly increasing");
            prev = seq;
        }
        let _ = std::fs::remove_file(&cfg.cmd_socket);
        let _ = std::fs::remove_file(&cfg.evt_socket);
    }
}
