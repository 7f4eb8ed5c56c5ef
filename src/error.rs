use std::time::Duration;
use thiserror::Error;

/// Binance: "No need to change margin type."
pub const CODE_MARGIN_UNCHANGED: i64 = -4046;
/// Binance: order price outside the allowed band around mark price.
pub const CODE_PRICE_OUT_OF_RANGE: i64 = -4131;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    #[error("exchange rejected request (code {code}): {msg}")]
    Api { code: i64, msg: String },
    #[error("exchange returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode exchange response: {0}")]
    Decode(String),
    #[error("exchange call timed out after {0:?}")]
    Timeout(Duration),
    #[error("symbol {symbol} has no {filter} filter")]
    MissingFilter { symbol: String, filter: &'static str },
    #[error("symbol {0} is not listed on the exchange")]
    UnknownSymbol(String),
    #[error("exchange credentials are not configured")]
    MissingCredentials,
}

impl ExchangeError {
    pub fn code(&self) -> Option<i64> {
        match self {
            ExchangeError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("failed to set leverage for {symbol}: {source}")]
    Leverage {
        symbol: String,
        #[source]
        source: ExchangeError,
    },
    #[error("exchange applied {effective}x leverage on {symbol}, requested {requested}x")]
    LeverageNotAccepted {
        symbol: String,
        requested: u32,
        effective: u32,
    },
    #[error("failed to load trading rules for {symbol}: {source}")]
    SymbolRules {
        symbol: String,
        #[source]
        source: ExchangeError,
    },
    #[error("entry price {0} is not positive")]
    InvalidEntryPrice(f64),
    #[error("order quantity {quantity} for {symbol} is below the minimum {min_qty}")]
    QuantityTooSmall {
        symbol: String,
        quantity: f64,
        min_qty: f64,
    },
    #[error("failed to fetch current price for {symbol}: {source}")]
    PriceCheck {
        symbol: String,
        #[source]
        source: ExchangeError,
    },
    #[error(
        "price drift on {symbol}: entry {entry}, market {current}, deviation {deviation:.6} > tolerance {tolerance:.6}"
    )]
    PriceDrift {
        symbol: String,
        entry: f64,
        current: f64,
        deviation: f64,
        tolerance: f64,
    },
    #[error("entry order for {symbol} rejected: {source}")]
    EntryOrder {
        symbol: String,
        #[source]
        source: ExchangeError,
    },
    #[error("{leg} order for {symbol} rejected: {source}")]
    ProtectiveOrder {
        symbol: String,
        leg: String,
        #[source]
        source: ExchangeError,
    },
}

impl TradeError {
    pub fn is_price_drift(&self) -> bool {
        matches!(self, TradeError::PriceDrift { .. })
    }

    fn exchange_source(&self) -> Option<&ExchangeError> {
        match self {
            TradeError::Leverage { source, .. }
            | TradeError::SymbolRules { source, .. }
            | TradeError::PriceCheck { source, .. }
            | TradeError::EntryOrder { source, .. }
            | TradeError::ProtectiveOrder { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Operator-facing text. Never includes raw exchange bodies.
    pub fn user_message(&self) -> String {
        if let Some(ExchangeError::Timeout(_)) = self.exchange_source() {
            return "The exchange did not respond in time. Please check your open orders before retrying."
                .to_string();
        }
        if self.exchange_source().and_then(|e| e.code()) == Some(CODE_PRICE_OUT_OF_RANGE) {
            return "Trade could not be placed because the requested price is outside the exchange's allowable range. Please move closer to the current market price and try again."
                .to_string();
        }

        match self {
            TradeError::Leverage { symbol, .. } => format!(
                "Could not set margin/leverage for {}. No order was placed.",
                symbol
            ),
            TradeError::LeverageNotAccepted {
                symbol,
                requested,
                effective,
            } => format!(
                "The exchange kept {}x leverage on {} (requested {}x). No order was placed.",
                effective, symbol, requested
            ),
            TradeError::SymbolRules { symbol, .. } => format!(
                "Could not load trading rules for {}. No order was placed.",
                symbol
            ),
            TradeError::InvalidEntryPrice(_) => {
                "The signal has no valid entry price. Edit the entry price and confirm again."
                    .to_string()
            }
            TradeError::QuantityTooSmall { symbol, .. } => format!(
                "The position size is too small for the minimum order quantity on {}.",
                symbol
            ),
            TradeError::PriceCheck { symbol, .. } => format!(
                "Could not fetch the current price for {}. No order was placed.",
                symbol
            ),
            TradeError::PriceDrift {
                symbol,
                deviation,
                tolerance,
                ..
            } => format!(
                "Trade for {} was not placed: the market price is {:.2}% away from the signal entry, beyond your {:.2}% tolerance.",
                symbol,
                deviation * 100.0,
                tolerance * 100.0
            ),
            TradeError::EntryOrder { symbol, .. } => format!(
                "The exchange rejected the entry order for {}. Please try again later.",
                symbol
            ),
            TradeError::ProtectiveOrder { symbol, leg, .. } => format!(
                "Entry order for {} was placed, but the {} order failed. Check the position manually.",
                symbol, leg
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("signal {0} not found")]
    NotFound(String),
    #[error("signal {0} is already confirmed or dismissed")]
    Finalized(String),
}

/// Failure of an edit applied through a repository.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Rejected operator input; the message is shown to the operator verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("unknown signal direction '{0}'")]
    UnknownDirection(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Invalid(#[from] AlertError),
    #[error("failed to deliver alert to chat: {0}")]
    Delivery(String),
}
