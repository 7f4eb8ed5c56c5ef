use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ExchangeError, CODE_MARGIN_UNCHANGED};
use crate::exchange::{Credentials, FuturesExchange, OrderAck, OrderKind, OrderRequest, SymbolRules};
use crate::models::MarginMode;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
struct LeverageResponse {
    leverage: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    client_order_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenKeyResponse {
    listen_key: String,
}

/// USDⓈ-M futures REST client.
pub struct BinanceFutures {
    client: Client,
    rest_url: String,
    recv_window: u64,
    timeout: Duration,
    credentials: RwLock<Option<Credentials>>,
    rules: RwLock<HashMap<String, SymbolRules>>,
}

impl BinanceFutures {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let timeout = cfg.exchange_timeout();
        let client = Client::builder().timeout(timeout).build()?;
        let credentials = cfg
            .has_exchange_credentials()
            .then(|| Credentials::new(&cfg.binance_api_key, &cfg.binance_api_secret));

        Ok(Self {
            client,
            rest_url: cfg.binance_rest_url.clone(),
            recv_window: cfg.recv_window_ms,
            timeout,
            credentials: RwLock::new(credentials),
            rules: RwLock::new(HashMap::new()),
        })
    }

    fn sign(secret: &str, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Transport(format!("invalid signing key: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, creds: &Credentials, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        query.push(format!("recvWindow={}", self.recv_window));
        query.push(format!("timestamp={}", Utc::now().timestamp_millis()));
        let payload = query.join("&");
        let signature = Self::sign(&creds.api_secret, &payload)?;
        Ok(format!("{}&signature={}", payload, signature))
    }

    async fn current_credentials(&self) -> Result<Credentials, ExchangeError> {
        self.credentials
            .read()
            .await
            .clone()
            .ok_or(ExchangeError::MissingCredentials)
    }

    fn map_transport(&self, err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::Timeout(self.timeout)
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }

    async fn send(&self, req: RequestBuilder, endpoint: &str) -> Result<Value, ExchangeError> {
        let resp = req.send().await.map_err(|e| self.map_transport(e))?;
        self.decode(resp, endpoint).await
    }

    async fn decode(&self, resp: Response, endpoint: &str) -> Result<Value, ExchangeError> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.map_transport(e))?;

        if status.is_success() {
            debug!(endpoint, "exchange call ok");
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()));
        }

        warn!(endpoint, status = status.as_u16(), body = %body, "exchange call rejected");
        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(api) => Err(ExchangeError::Api {
                code: api.code,
                msg: api.msg,
            }),
            Err(_) => Err(ExchangeError::Http {
                status: status.as_u16(),
                body,
            }),
        }
    }

    async fn signed_call(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        creds: &Credentials,
    ) -> Result<Value, ExchangeError> {
        let query = self.signed_query(creds, params)?;
        let url = format!("{}{}?{}", self.rest_url, path, query);
        let req = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &creds.api_key);
        self.send(req, path).await
    }

    async fn signed(&self, method: Method, path: &str, params: &[(&str, String)]) -> Result<Value, ExchangeError> {
        let creds = self.current_credentials().await?;
        self.signed_call(method, path, params, &creds).await
    }

    async fn public_get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ExchangeError> {
        let req = self
            .client
            .get(format!("{}{}", self.rest_url, path))
            .query(query);
        self.send(req, path).await
    }

    fn parse<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ExchangeError> {
        serde_json::from_value(value).map_err(|e| ExchangeError::Decode(e.to_string()))
    }

    fn order_params(req: &OrderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", req.symbol.clone()),
            ("side", req.side.exchange_side().to_string()),
            ("type", req.kind.as_str().to_string()),
            ("newClientOrderId", req.client_order_id.clone()),
        ];
        if let Some(qty) = &req.quantity {
            params.push(("quantity", qty.clone()));
        }
        match &req.kind {
            OrderKind::Market => {}
            OrderKind::Limit { price } => {
                params.push(("price", price.clone()));
                params.push(("timeInForce", "GTC".to_string()));
            }
            OrderKind::TakeProfitMarket { stop_price } | OrderKind::StopMarket { stop_price } => {
                params.push(("stopPrice", stop_price.clone()));
                params.push(("workingType", "MARK_PRICE".to_string()));
                params.push(("priceProtect", "TRUE".to_string()));
            }
        }
        // closePosition already implies reduce-only and rejects the explicit flag.
        if req.close_position {
            params.push(("closePosition", "true".to_string()));
        } else if req.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        params
    }
}

fn filter_number(filter: &Value, field: &str) -> Option<f64> {
    filter.get(field)?.as_str()?.parse().ok()
}

fn rules_from_info(symbol: &str, info: &SymbolInfo) -> Result<SymbolRules, ExchangeError> {
    let find = |kind: &str| {
        info.filters
            .iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some(kind))
    };

    let lot = find("LOT_SIZE").ok_or_else(|| ExchangeError::MissingFilter {
        symbol: symbol.to_string(),
        filter: "LOT_SIZE",
    })?;
    let price = find("PRICE_FILTER").ok_or_else(|| ExchangeError::MissingFilter {
        symbol: symbol.to_string(),
        filter: "PRICE_FILTER",
    })?;

    let step_size = filter_number(lot, "stepSize").filter(|v| *v > 0.0);
    let tick_size = filter_number(price, "tickSize").filter(|v| *v > 0.0);
    match (step_size, tick_size) {
        (Some(step_size), Some(tick_size)) => Ok(SymbolRules {
            symbol: symbol.to_string(),
            step_size,
            min_qty: filter_number(lot, "minQty").unwrap_or(0.0),
            tick_size,
        }),
        (None, _) => Err(ExchangeError::MissingFilter {
            symbol: symbol.to_string(),
            filter: "LOT_SIZE",
        }),
        (_, None) => Err(ExchangeError::MissingFilter {
            symbol: symbol.to_string(),
            filter: "PRICE_FILTER",
        }),
    }
}

#[async_trait]
impl FuturesExchange for BinanceFutures {
    async fn validate_credentials(&self, creds: &Credentials) -> Result<(), ExchangeError> {
        self.signed_call(Method::GET, "/fapi/v2/balance", &[], creds)
            .await
            .map(|_| ())
    }

    async fn set_credentials(&self, creds: Credentials) {
        *self.credentials.write().await = Some(creds);
    }

    async fn account_id(&self) -> Option<String> {
        self.credentials
            .read()
            .await
            .as_ref()
            .map(Credentials::account_label)
    }

    async fn change_margin_type(&self, symbol: &str, mode: MarginMode) -> Result<(), ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("marginType", mode.exchange_value().to_string()),
        ];
        match self.signed(Method::POST, "/fapi/v1/marginType", &params).await {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(CODE_MARGIN_UNCHANGED) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<u32, ExchangeError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let value = self.signed(Method::POST, "/fapi/v1/leverage", &params).await?;
        Ok(Self::parse::<LeverageResponse>(value)?.leverage)
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        if let Some(rules) = self.rules.read().await.get(symbol) {
            return Ok(rules.clone());
        }

        let value = self.public_get("/fapi/v1/exchangeInfo", &[]).await?;
        let info: ExchangeInfo = Self::parse(value)?;

        let mut cache = self.rules.write().await;
        let mut found = None;
        for entry in &info.symbols {
            if let Ok(rules) = rules_from_info(&entry.symbol, entry) {
                if entry.symbol == symbol {
                    found = Some(rules.clone());
                }
                cache.insert(entry.symbol.clone(), rules);
            } else if entry.symbol == symbol {
                return rules_from_info(symbol, entry);
            }
        }
        found.ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn current_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let value = self
            .public_get("/fapi/v1/ticker/price", &[("symbol", symbol)])
            .await?;
        let ticker: TickerPrice = Self::parse(value)?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|e| ExchangeError::Decode(format!("ticker price '{}': {}", ticker.price, e)))
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let params = Self::order_params(req);
        let value = self.signed(Method::POST, "/fapi/v1/order", &params).await?;
        let resp: OrderResponse = Self::parse(value)?;
        Ok(OrderAck {
            order_id: resp.order_id,
            client_order_id: resp.client_order_id,
            status: resp.status,
        })
    }

    async fn start_user_stream(&self) -> Result<String, ExchangeError> {
        let creds = self.current_credentials().await?;
        let req = self
            .client
            .post(format!("{}/fapi/v1/listenKey", self.rest_url))
            .header("X-MBX-APIKEY", &creds.api_key);
        let value = self.send(req, "/fapi/v1/listenKey").await?;
        Ok(Self::parse::<ListenKeyResponse>(value)?.listen_key)
    }

    async fn keepalive_user_stream(&self, listen_key: &str) -> Result<(), ExchangeError> {
        let creds = self.current_credentials().await?;
        let req = self
            .client
            .put(format!("{}/fapi/v1/listenKey", self.rest_url))
            .query(&[("listenKey", listen_key)])
            .header("X-MBX-APIKEY", &creds.api_key);
        self.send(req, "/fapi/v1/listenKey").await.map(|_| ())
    }
}
