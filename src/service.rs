use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use signal_desk::bot::SignalDesk;
use signal_desk::chat::{ChatTransport, NotificationSink, TelegramTransport};
use signal_desk::config::SharedConfig;
use signal_desk::exchange::{BinanceFutures, BinanceUserStream, FuturesExchange, UserStreamConnector};
use signal_desk::trading::supervisor::Backoff;
use signal_desk::trading::{FillMonitor, JsonlJournal, TradeJournal};
use signal_desk::webhook;

/// Wires the production collaborators together and drives the chat loop.
pub struct Service {
    config: SharedConfig,
    telegram: Arc<TelegramTransport>,
    desk: Arc<SignalDesk>,
}

impl Service {
    pub async fn new(config: SharedConfig) -> Result<Self> {
        let cfg = config.read().await.clone();

        info!("{}", "=".repeat(60));
        info!("Signal desk starting up");
        info!("Admin chat: {}", cfg.telegram_chat_id);
        info!("Exchange: {}", cfg.binance_rest_url);
        info!(
            "Exchange credentials: {}",
            if cfg.has_exchange_credentials() {
                "configured"
            } else {
                "not set (use /setapi)"
            }
        );
        info!("Journal: {}", cfg.journal_dir);
        info!("{}", "=".repeat(60));

        let telegram = Arc::new(TelegramTransport::new(&cfg.telegram_bot_token)?);
        let chat: Arc<dyn ChatTransport> = telegram.clone();
        let sink: Arc<dyn NotificationSink> = telegram.clone();

        let exchange: Arc<dyn FuturesExchange> =
            Arc::new(BinanceFutures::new(&cfg).context("Failed to build exchange client")?);
        let connector: Arc<dyn UserStreamConnector> = Arc::new(BinanceUserStream::new(&cfg.binance_ws_url));
        let journal: Arc<dyn TradeJournal> = Arc::new(JsonlJournal::new(&cfg.journal_dir));

        let fills = Arc::new(FillMonitor::new(
            exchange.clone(),
            connector,
            sink.clone(),
            journal.clone(),
            cfg.telegram_chat_id,
        ));
        let desk = Arc::new(SignalDesk::new(&cfg, chat, sink, exchange, fills, journal));

        Ok(Self {
            config,
            telegram,
            desk,
        })
    }

    pub async fn run(&self) -> Result<()> {
        let addr = self.config.read().await.webhook_addr.clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let desk = self.desk.clone();
        let mut server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.await;
            };
            webhook::serve(&addr, desk, shutdown).await
        });

        info!("Service is now running. Press Ctrl+C to stop.");
        let mut offset = 0i64;
        let mut backoff = Backoff::default();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    let _ = stop_tx.send(());
                    if let Err(e) = (&mut server).await {
                        warn!("Webhook task ended abnormally: {}", e);
                    }
                    return Ok(());
                }
                result = &mut server => {
                    return match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(e).context("Webhook task panicked"),
                    };
                }
                polled = self.telegram.poll(&mut offset) => match polled {
                    Ok(events) => {
                        backoff.reset();
                        for event in events {
                            self.desk.handle_event(event).await;
                        }
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        error!("Telegram poll failed: {:#}, retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
