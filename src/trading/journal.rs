use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::models::{Direction, Signal};

const SIGNALS_FILE: &str = "signals.jsonl";
const TRADES_FILE: &str = "trades.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedSignalRecord {
    pub signal_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry: f64,
    pub take_profits: [f64; 3],
    pub stop_loss: f64,
    pub recorded_at: DateTime<Utc>,
}

impl ConfirmedSignalRecord {
    pub fn from_signal(signal: &Signal, recorded_at: DateTime<Utc>) -> Self {
        Self {
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry: signal.entry_price,
            take_profits: signal.take_profits,
            stop_loss: signal.stop_loss,
            recorded_at,
        }
    }
}

/// One realized exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub signal_id: String,
    pub symbol: String,
    pub entry: f64,
    pub exit: f64,
    pub profit: f64,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn record_signal(&self, record: ConfirmedSignalRecord) -> Result<()>;
    async fn record_trade(&self, record: TradeRecord) -> Result<()>;
    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>>;
}

/// Append-only JSON lines files under one directory.
pub struct JsonlJournal {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create journal dir {}", self.dir.display()))?;
        let path = self.dir.join(file);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        f.write_all(line.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }

    async fn read_all<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let mut rows = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(row) => rows.push(row),
                Err(e) => warn!("Skipping bad journal line {} in {}: {}", n + 1, path.display(), e),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl TradeJournal for JsonlJournal {
    async fn record_signal(&self, record: ConfirmedSignalRecord) -> Result<()> {
        self.append(SIGNALS_FILE, &record).await
    }

    async fn record_trade(&self, record: TradeRecord) -> Result<()> {
        self.append(TRADES_FILE, &record).await
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows: Vec<TradeRecord> = Self::read_all(&self.dir.join(TRADES_FILE)).await?;
        Ok(rows.into_iter().filter(|t| t.recorded_at >= since).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
    Years,
}

impl Period {
    pub const ALL: [Period; 5] = [Period::Day, Period::Week, Period::Month, Period::Year, Period::Years];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::Years => "years",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Period::Day => "Previous Day",
            Period::Week => "Previous Week",
            Period::Month => "Previous Month",
            Period::Year => "Previous Year",
            Period::Years => "Recent Years",
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let span = match self {
            Period::Day => Duration::days(1),
            Period::Week => Duration::weeks(1),
            Period::Month => Duration::days(30),
            Period::Year => Duration::days(365),
            Period::Years => Duration::days(5 * 365),
        };
        now - span
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| format!("unknown period '{}'", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_ratio: f64,
    pub average_profit: f64,
    pub average_loss: f64,
    pub total_profit: f64,
    pub total_loss: f64,
    pub net_profit: f64,
}

impl PerformanceSummary {
    /// A trade with zero profit counts as a loss.
    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        let mut s = PerformanceSummary::default();
        for t in trades {
            s.total_trades += 1;
            if t.profit > 0.0 {
                s.winning_trades += 1;
                s.total_profit += t.profit;
            } else {
                s.losing_trades += 1;
                s.total_loss += t.profit;
            }
        }
        let ratio = |num: f64, den: usize| if den == 0 { 0.0 } else { num / den as f64 };
        s.win_ratio = ratio(s.winning_trades as f64, s.total_trades);
        s.average_profit = ratio(s.total_profit, s.winning_trades);
        s.average_loss = ratio(s.total_loss, s.losing_trades);
        s.net_profit = s.total_profit + s.total_loss;
        s
    }

    pub fn render(&self, period: Period) -> String {
        format!(
            "<b>Performance: {}</b>\n\
             Total Trades: {}\n\
             Winning Trades: {}\n\
             Losing Trades: {}\n\
             Win Ratio: {:.2}\n\
             Average Profit: {:.2}\n\
             Average Loss: {:.2}\n\
             Total Profit: {:.2}\n\
             Total Loss: {:.2}\n\
             Net Profit: {:.2}",
            period.label(),
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_ratio,
            self.average_profit,
            self.average_loss,
            self.total_profit,
            self.total_loss,
            self.net_profit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(profit: f64, at: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            signal_id: "s".into(),
            symbol: "BTCUSDT".into(),
            entry: 100.0,
            exit: 100.0 + profit,
            profit,
            recorded_at: at,
        }
    }

    #[test]
    fn empty_summary_has_no_nan() {
        let s = PerformanceSummary::from_trades(&[]);
        assert_eq!(s, PerformanceSummary::default());
        assert!(!s.render(Period::Day).contains("NaN"));
    }

    #[test]
    fn summary_splits_wins_and_losses() {
        let now = Utc::now();
        let s = PerformanceSummary::from_trades(&[trade(10.0, now), trade(-4.0, now), trade(0.0, now), trade(6.0, now)]);
        assert_eq!(s.total_trades, 4);
        assert_eq!(s.winning_trades, 2);
        assert_eq!(s.losing_trades, 2);
        assert_eq!(s.win_ratio, 0.5);
        assert_eq!(s.average_profit, 8.0);
        assert_eq!(s.average_loss, -2.0);
        assert_eq!(s.net_profit, 12.0);
    }

    #[test]
    fn period_tokens() {
        assert_eq!("years".parse::<Period>().unwrap(), Period::Years);
        assert!("decade".parse::<Period>().is_err());
        let now = Utc::now();
        assert_eq!(now - Period::Week.since(now), Duration::days(7));
    }

    #[tokio::test]
    async fn jsonl_journal_appends_and_filters() {
        let dir = std::env::temp_dir().join(format!("signal-desk-journal-{}", std::process::id()));
        let journal = JsonlJournal::new(&dir);
        let now = Utc::now();
        journal.record_trade(trade(5.0, now - Duration::days(3))).await.unwrap();
        journal.record_trade(trade(-1.0, now)).await.unwrap();

        let recent = journal.trades_since(now - Duration::days(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].profit, -1.0);
        assert_eq!(journal.trades_since(now - Duration::days(7)).await.unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
