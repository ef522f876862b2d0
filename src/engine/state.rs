//! Engine safety and configuration state
//!
//! One instance per process, owned by the engine loop. Mutated only by the
//! command router (arm/kill/config fields) and the tick timer (market fields).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::Symbol;

/// Process-wide mutable engine state.
#[derive(Debug, Clone)]
pub struct EngineState {
    /// Opaque process identity, immutable after startup.
    pub run_id: String,
    pub symbol: Symbol,
    pub timeframe: String,

    pub armed: bool,
    pub killed: bool,
    /// Observe-only mode: order commands are rejected while set.
    pub block_orders: bool,

    pub strategy_id: String,
    pub profile: String,
    pub config_version: u64,
    pub params: Value,
    pub params_hash: String,

    pub last_price: Option<Decimal>,
    pub last_tick_ts: Option<String>,

    /// Monotonic event sequence; observers gap-check this.
    pub evt_seq: u64,
    pub started_at: DateTime<Utc>,
}

impl EngineState {
    pub fn new(symbol: Symbol, timeframe: impl Into<String>) -> Self {
        let params = Value::Object(Default::default());
        let hash = params_hash(&params);
        Self {
            run_id: make_run_id(),
            symbol,
            timeframe: timeframe.into(),
            armed: false,
            killed: false,
            block_orders: true,
            strategy_id: "NONE".to_string(),
            profile: "SAFE".to_string(),
            config_version: 0,
            params,
            params_hash: hash,
            last_price: None,
            last_tick_ts: None,
            evt_seq: 0,
            started_at: Utc::now(),
        }
    }

    /// Increment and return the event sequence number.
    pub fn bump_seq(&mut self) -> u64 {
        self.evt_seq += 1;
        self.evt_seq
    }

    pub fn uptime_sec(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Replace the active configuration identity. Increments `config_version`
    /// exactly once and recomputes the params hash. Gating (killed/armed) is
    /// the router's job, not ours.
    pub fn apply_config(
        &mut self,
        symbol: Symbol,
        timeframe: String,
        strategy_id: String,
        profile: String,
        params: Value,
    ) {
        self.symbol = symbol;
        self.timeframe = timeframe;
        self.strategy_id = strategy_id;
        self.profile = profile;
        self.params_hash = params_hash(&params);
        self.params = params;
        self.config_version += 1;
    }
}

/// Run identity: date-scoped with a short random suffix, e.g.
/// `live-20260827-3fa9c2`.
pub fn make_run_id() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("live-{}-{}", date, &suffix[..6])
}

/// Stable, order-independent hash of a params object: `sha256:<12 hex>`.
pub fn params_hash(params: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("sha256:{}", &hex::encode(digest)[..12])
}

/// Canonical JSON: object keys sorted, no whitespace. Insertion order of the
/// incoming map must not affect the result.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*k], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&serde_json::to_string(other).unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_id_shape() {
        let id = make_run_id();
        assert!(id.starts_with("live-"));
        assert_eq!(id.split('-').count(), 3);
    }

    #[test]
    fn params_hash_is_order_independent() {
        let a = json!({"alpha": 1, "beta": {"x": 2, "y": 3}});
        let b = json!({"beta": {"y": 3, "x": 2}, "alpha": 1});
        assert_eq!(params_hash(&a), params_hash(&b));
        assert!(params_hash(&a).starts_with("sha256:"));
    }

    #[test]
    fn params_hash_changes_with_content() {
        let a = json!({"alpha": 1});
        let b = json!({"alpha": 2});
        assert_ne!(params_hash(&a), params_hash(&b));
    }

    #[test]
    fn bump_seq_is_strictly_increasing() {
        let mut st = EngineState::new(Symbol::new("BTC-KRW"), "1m");
        let mut prev = 0;
        for _ in 0..100 {
            let s = st.bump_seq();
            assert!(s > prev);
            prev = s;
        }
    }

    #[test]
    fn apply_config_bumps_version_once() {
        let mut st = EngineState::new(Symbol::new("BTC-KRW"), "1m");
        assert_eq!(st.config_version, 0);
        st.apply_config(
            Symbol::new("ETH-KRW"),
            "5m".into(),
            "SMA_CROSS".into(),
            "AGGRESSIVE".into(),
            json!({"fast": 5, "slow": 20}),
        );
        assert_eq!(st.config_version, 1);
        assert_eq!(st.symbol.as_str(), "ETH-KRW");
        assert_eq!(st.params_hash, params_hash(&json!({"slow": 20, "fast": 5})));
    }
}
