use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::error::ExchangeError;
use crate::exchange::{OrderStatus, OrderUpdate, UserStreamConnector};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E", default)]
    event_time: i64,
    #[serde(rename = "o")]
    order: Option<OrderPayload>,
}

#[derive(Debug, Deserialize)]
struct OrderPayload {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c", default)]
    client_order_id: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "ap", default)]
    avg_price: String,
    #[serde(rename = "rp", default)]
    realized_profit: String,
    #[serde(rename = "R", default)]
    reduce_only: bool,
}

/// Decode one user-data frame. Anything other than an order update yields `None`.
pub fn parse_order_update(text: &str) -> Option<OrderUpdate> {
    let event: StreamEvent = serde_json::from_str(text).ok()?;
    if event.event_type != "ORDER_TRADE_UPDATE" {
        return None;
    }
    let o = event.order?;
    Some(OrderUpdate {
        symbol: o.symbol,
        order_id: o.order_id,
        client_order_id: o.client_order_id,
        status: OrderStatus::from_exchange(&o.status),
        avg_price: o.avg_price.parse().unwrap_or(0.0),
        realized_profit: o.realized_profit.parse().unwrap_or(0.0),
        reduce_only: o.reduce_only,
        event_time: DateTime::<Utc>::from_timestamp_millis(event.event_time).unwrap_or_else(Utc::now),
    })
}

pub struct BinanceUserStream {
    ws_url: String,
}

impl BinanceUserStream {
    pub fn new(ws_url: &str) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl UserStreamConnector for BinanceUserStream {
    async fn connect(&self, listen_key: &str) -> Result<mpsc::Receiver<OrderUpdate>, ExchangeError> {
        let url = format!("{}/{}", self.ws_url, listen_key);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        info!("User data stream connected");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(update) = parse_order_update(&text) {
                            if tx.send(update).await.is_err() {
                                debug!("Order update receiver dropped");
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if let Err(e) = ws_tx.send(Message::Pong(payload)).await {
                            warn!("User data stream pong failed: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        warn!("User data stream closed: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        warn!("User data stream error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            // Dropping `tx` closes the receiver so the monitor can reconnect.
        });

        Ok(rx)
    }
}
