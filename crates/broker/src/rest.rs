//! Generic JSON-over-REST broker client.
//!
//! Every supported broker build exposes the same POST surface:
//! `{base_url}/api/v1/{endpoint}` with the credential in the JSON body and a
//! `{"status": "success", "data": ...}` envelope in the response. This
//! client owns the transport concerns only: fixed request timeout, HTTP
//! status mapping, envelope unwrapping and payload normalization. What the
//! caller does with a failure (circuit bookkeeping, stale fallback) is the
//! feed layer's business.
//!
//! A body that fails to parse as JSON maps to [`BrokerError::Malformed`]:
//! in practice that is a broker login page served to an expired session.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde_json::{json, Value};

use crate::client::BrokerClient;
use crate::errors::BrokerError;
use crate::models::{
    BrokerSession, ClosePositionRequest, Funds, InstrumentRecord, Order, OrderResult, Position,
    QuoteTick, SymbolRef, Trade,
};

/// Default per-request timeout. There is no mid-flight cancellation; a slow
/// call simply misses its sweep and is superseded by the next one.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client configuration.
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Fixed timeout applied to every upstream request.
    pub request_timeout: Duration,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// [`BrokerClient`] implementation over the uniform REST surface.
pub struct RestBrokerClient {
    http: Client,
}

impl RestBrokerClient {
    /// Creates a client with default settings.
    pub fn new() -> Self {
        Self::with_config(RestClientConfig::default())
    }

    /// Creates a client with custom configuration.
    pub fn with_config(config: RestClientConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http }
    }

    /// POSTs one endpoint call and unwraps the response envelope.
    async fn post(
        &self,
        session: &BrokerSession,
        endpoint: &str,
        mut body: Value,
    ) -> Result<Value, BrokerError> {
        let url = format!(
            "{}/api/v1/{}",
            session.base_url.trim_end_matches('/'),
            endpoint
        );

        if let Some(map) = body.as_object_mut() {
            map.insert("apikey".to_string(), Value::String(session.api_key.clone()));
        }

        debug!("POST {} for instance '{}'", url, session.instance_id);

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(session, e))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BrokerError::RateLimited {
                instance: session.instance_id.clone(),
            });
        }
        if !response.status().is_success() {
            return Err(BrokerError::Upstream {
                instance: session.instance_id.clone(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(session, e))?;

        // A login page instead of JSON is the classic expired-session tell.
        let payload: Value =
            serde_json::from_str(&text).map_err(|e| BrokerError::Malformed {
                instance: session.instance_id.clone(),
                message: format!("non-JSON response from {}: {}", endpoint, e),
            })?;

        match payload.get("status").and_then(Value::as_str) {
            Some("success") => Ok(payload.get("data").cloned().unwrap_or(Value::Null)),
            Some(_) => Err(BrokerError::Upstream {
                instance: session.instance_id.clone(),
                message: payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream reported failure")
                    .to_string(),
            }),
            None => Err(BrokerError::Malformed {
                instance: session.instance_id.clone(),
                message: format!("missing status envelope from {}", endpoint),
            }),
        }
    }

    fn map_transport_error(&self, session: &BrokerSession, error: reqwest::Error) -> BrokerError {
        if error.is_timeout() {
            BrokerError::Timeout {
                instance: session.instance_id.clone(),
            }
        } else if error.is_connect() {
            BrokerError::Upstream {
                instance: session.instance_id.clone(),
                message: error.to_string(),
            }
        } else {
            BrokerError::Network(error)
        }
    }

    /// Expects the payload to be a JSON array and normalizes each element,
    /// silently dropping rows the normalizer rejects.
    fn collect_rows<T>(
        session: &BrokerSession,
        endpoint: &str,
        data: Value,
        normalize: impl Fn(&Value) -> Option<T>,
    ) -> Result<Vec<T>, BrokerError> {
        match data {
            Value::Array(rows) => Ok(rows.iter().filter_map(normalize).collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(BrokerError::Malformed {
                instance: session.instance_id.clone(),
                message: format!(
                    "expected array from {}, got {}",
                    endpoint,
                    json_kind(&other)
                ),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Default for RestBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for RestBrokerClient {
    async fn get_quotes(
        &self,
        session: &BrokerSession,
        symbols: &[SymbolRef],
    ) -> Result<Vec<QuoteTick>, BrokerError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let data = self
                .post(
                    session,
                    "quotes",
                    json!({"symbol": symbol.symbol, "exchange": symbol.exchange}),
                )
                .await?;
            if let Some(quote) = QuoteTick::from_upstream(&symbol.exchange, &symbol.symbol, &data)
            {
                quotes.push(quote);
            } else {
                debug!(
                    "Quote for {}:{} had no usable price, dropping",
                    symbol.exchange, symbol.symbol
                );
            }
        }
        Ok(quotes)
    }

    async fn get_position_book(
        &self,
        session: &BrokerSession,
    ) -> Result<Vec<Position>, BrokerError> {
        let data = self.post(session, "positionbook", json!({})).await?;
        let instance_id = session.instance_id.clone();
        Self::collect_rows(session, "positionbook", data, |raw| {
            Position::from_upstream(&instance_id, raw)
        })
    }

    async fn get_funds(&self, session: &BrokerSession) -> Result<Funds, BrokerError> {
        let data = self.post(session, "funds", json!({})).await?;
        if !data.is_object() {
            return Err(BrokerError::Malformed {
                instance: session.instance_id.clone(),
                message: format!("expected object from funds, got {}", json_kind(&data)),
            });
        }
        Ok(Funds::from_upstream(&data))
    }

    async fn get_order_book(&self, session: &BrokerSession) -> Result<Vec<Order>, BrokerError> {
        // Some builds nest the rows under data.orders.
        let data = self.post(session, "orderbook", json!({})).await?;
        let rows = data.get("orders").cloned().unwrap_or(data);
        Self::collect_rows(session, "orderbook", rows, Order::from_upstream)
    }

    async fn get_trade_book(&self, session: &BrokerSession) -> Result<Vec<Trade>, BrokerError> {
        let data = self.post(session, "tradebook", json!({})).await?;
        let rows = data.get("trades").cloned().unwrap_or(data);
        Self::collect_rows(session, "tradebook", rows, Trade::from_upstream)
    }

    async fn get_instruments(
        &self,
        session: &BrokerSession,
        exchange: &str,
    ) -> Result<Vec<InstrumentRecord>, BrokerError> {
        let data = self
            .post(session, "instruments", json!({"exchange": exchange}))
            .await?;
        Self::collect_rows(session, "instruments", data, InstrumentRecord::from_upstream)
    }

    async fn close_position(
        &self,
        session: &BrokerSession,
        request: &ClosePositionRequest,
    ) -> Result<OrderResult, BrokerError> {
        let data = self
            .post(
                session,
                "closeposition",
                json!({
                    "strategy": request.strategy,
                    "symbol": request.symbol,
                    "exchange": request.exchange,
                    "product": request.product,
                }),
            )
            .await?;

        Ok(OrderResult {
            order_id: data
                .get("orderid")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: data
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("submitted")
                .to_string(),
        })
    }

    async fn cancel_all_orders(
        &self,
        session: &BrokerSession,
        strategy: &str,
    ) -> Result<OrderResult, BrokerError> {
        let data = self
            .post(session, "cancelallorder", json!({"strategy": strategy}))
            .await?;

        Ok(OrderResult {
            order_id: None,
            status: data
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("submitted")
                .to_string(),
        })
    }
}
