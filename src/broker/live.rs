//! Live broker - real exchange client, gated against accidental placement
//!
//! Placement is disabled unless QUANTD_ALLOW_LIVE_PLACE=1; attempting to
//! place with the gate closed fails fast rather than no-op-ing, so a
//! misconfiguration can never masquerade as a successful submission.
//! Query-only use works with the gate closed.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::warn;

use crate::core::{Error, Result, Side, Symbol};

use super::{Broker, BrokerOrderView, BrokerPlacement, BrokerState};

const DEFAULT_BASE_URL: &str = "https://api.upbit.com";

pub struct LiveBroker {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    #[allow(dead_code)]
    api_secret: String,
    allow_live_place: bool,
}

impl LiveBroker {
    pub fn new(api_key: String, api_secret: String, base_url: String, allow_live_place: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            api_secret,
            allow_live_place,
        }
    }

    /// Credentials from the caller, gate and base URL from the environment.
    pub fn from_env(api_key: String, api_secret: String) -> Self {
        let allow = std::env::var("QUANTD_ALLOW_LIVE_PLACE").as_deref() == Ok("1");
        let base_url =
            std::env::var("QUANTD_EXCHANGE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        if !allow {
            warn!("live broker in query-only mode (QUANTD_ALLOW_LIVE_PLACE unset)");
        }
        Self::new(api_key, api_secret, base_url, allow)
    }

    fn map_state(s: &str) -> BrokerState {
        match s {
            "done" => BrokerState::Done,
            "cancel" => BrokerState::Cancel,
            _ => BrokerState::Wait,
        }
    }

    fn dec_field(body: &Value, key: &str) -> Decimal {
        match body.get(key) {
            Some(Value::String(s)) => Decimal::from_str(s).unwrap_or(Decimal::ZERO),
            Some(Value::Number(n)) => {
                Decimal::from_str(&n.to_string()).unwrap_or(Decimal::ZERO)
            }
            _ => Decimal::ZERO,
        }
    }
}

#[async_trait]
impl Broker for LiveBroker {
    fn name(&self) -> &str {
        "live"
    }

    async fn place_limit(
        &self,
        market: &Symbol,
        side: Side,
        price: Decimal,
        qty: Decimal,
        client_oid: &str,
    ) -> Result<BrokerPlacement> {
        if !self.allow_live_place {
            return Err(Error::LivePlaceDisabled);
        }

        // identifier carries the idempotency key through to the exchange.
        let body = json!({
            "market": market.as_str(),
            "side": match side { Side::Buy => "bid", Side::Sell => "ask" },
            "ord_type": "limit",
            "price": price.to_string(),
            "volume": qty.to_string(),
            "identifier": client_oid,
        });

        let resp = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            return Err(Error::Broker(format!("place failed ({}): {}", status, body)));
        }

        let uuid = body
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Broker(format!("place response missing uuid: {}", body)))?;

        Ok(BrokerPlacement {
            exchange_order_id: uuid.to_string(),
            client_oid: client_oid.to_string(),
        })
    }

    async fn query_order(
        &self,
        exchange_order_id: Option<&str>,
        client_oid: Option<&str>,
    ) -> Result<Option<BrokerOrderView>> {
        let mut req = self.http.get(format!("{}/v1/order", self.base_url));
        if let Some(uuid) = exchange_order_id {
            req = req.query(&[("uuid", uuid)]);
        }
        if let Some(oid) = client_oid {
            req = req.query(&[("identifier", oid)]);
        }

        let resp = req.header("X-API-KEY", &self.api_key).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            return Err(Error::Broker(format!("query failed ({}): {}", status, body)));
        }

        let uuid = body
            .get("uuid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let state = Self::map_state(body.get("state").and_then(Value::as_str).unwrap_or("wait"));

        Ok(Some(BrokerOrderView {
            exchange_order_id: uuid,
            state,
            executed_qty: Self::dec_field(&body, "executed_volume"),
            remaining_qty: Self::dec_field(&body, "remaining_volume"),
            avg_price: Self::dec_field(&body, "avg_price"),
            fee: Self::dec_field(&body, "paid_fee"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placement_fails_fast_with_gate_closed() {
        let broker = LiveBroker::new(
            "key".into(),
            "secret".into(),
            "http://127.0.0.1:1".into(),
            false,
        );
        let err = broker
            .place_limit(
                &Symbol::new("BTC-KRW"),
                Side::Buy,
                Decimal::from(100),
                Decimal::from(1),
                "X",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LivePlaceDisabled));
    }

    #[test]
    fn state_mapping() {
        assert_eq!(LiveBroker::map_state("done"), BrokerState::Done);
        assert_eq!(LiveBroker::map_state("cancel"), BrokerState::Cancel);
        assert_eq!(LiveBroker::map_state("wait"), BrokerState::Wait);
        assert_eq!(LiveBroker::map_state("watch"), BrokerState::Wait);
    }
}
