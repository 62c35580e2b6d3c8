use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_QUANTITY: u32 = 1;

/// A ticker the user monitors, with the holding metadata used for valuation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSymbol {
    pub ticker: String,
    pub quantity: u32,
    pub purchase_price: Decimal,
}

impl TrackedSymbol {
    /// A quantity of 0 counts as the default single share.
    pub fn with_holding(ticker: &str, quantity: u32, purchase_price: Decimal) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            quantity: if quantity == 0 { DEFAULT_QUANTITY } else { quantity },
            purchase_price: purchase_price.max(Decimal::ZERO),
        }
    }
}

/// Authoritative data for one symbol at one poll instant.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuoteSnapshot {
    pub ticker: String,
    pub name: String,
    pub price: Decimal,
    pub exchange: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceChange {
    Up,
    Down,
    Same,
}

impl PriceChange {
    pub fn arrow(self) -> &'static str {
        match self {
            Self::Up => "▲",
            Self::Down => "▼",
            Self::Same => "·",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiffedQuote {
    pub ticker: String,
    pub name: String,
    pub price: Decimal,
    pub exchange: String,
    pub price_change: PriceChange,
    /// Price this tick was compared against; equals `price` on first observation.
    pub reference_price: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HoldingValuation {
    pub ticker: String,
    pub quantity: u32,
    pub current_value: Decimal,
    pub unrealized_pl: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub total_value: Decimal,
    /// Movement since the previous poll, not since purchase.
    pub total_change: Decimal,
    pub total_cost: Decimal,
    pub total_unrealized_pl: Decimal,
    pub holdings: Vec<HoldingValuation>,
}

impl PortfolioSummary {
    pub fn holding(&self, ticker: &str) -> Option<&HoldingValuation> {
        self.holdings.iter().find(|holding| holding.ticker == ticker)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Ticker,
    Price,
    Exchange,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ticker" | "symbol" => Some(Self::Ticker),
            "price" => Some(Self::Price),
            "exchange" => Some(Self::Exchange),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Price => "price",
            Self::Exchange => "exchange",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewState {
    pub filter: String,
    pub sort_key: SortKey,
}

/// Canonical ticker form: trimmed and uppercase.
pub fn normalize_ticker(raw: &str) -> String {
    raw.trim().to_uppercase()
}

// ── Backend wire types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct AddSymbolRequest {
    pub ticker: String,
    pub quantity: u32,
    pub purchase_price: Decimal,
}

impl AddSymbolRequest {
    /// Builds a request from raw form input. Non-numeric or zero quantity falls
    /// back to 1, non-numeric or negative purchase price to 0.
    pub fn from_input(ticker: &str, quantity: &str, purchase_price: &str) -> Self {
        let quantity = quantity
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|q| *q > 0)
            .unwrap_or(DEFAULT_QUANTITY);
        let purchase_price = purchase_price
            .trim()
            .parse::<Decimal>()
            .ok()
            .filter(|p| !p.is_sign_negative())
            .unwrap_or(Decimal::ZERO);

        Self {
            ticker: normalize_ticker(ticker),
            quantity,
            purchase_price,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user_id: Option<Value>,
}

impl AuthResponse {
    /// The backend may send the id as a number or a string.
    pub fn user_id(&self) -> Option<String> {
        match self.user_id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// One row of a watchlist mutation response: either a bare ticker or a
/// detailed entry carrying holding metadata.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum WatchlistEntry {
    Ticker(String),
    Detailed {
        ticker: String,
        #[serde(default)]
        quantity: Option<Value>,
        #[serde(default)]
        purchase_price: Option<Value>,
    },
}

impl WatchlistEntry {
    pub fn ticker(&self) -> String {
        match self {
            Self::Ticker(ticker) => normalize_ticker(ticker),
            Self::Detailed { ticker, .. } => normalize_ticker(ticker),
        }
    }

    pub fn quantity(&self) -> Option<u32> {
        match self {
            Self::Ticker(_) => None,
            Self::Detailed { quantity, .. } => quantity.as_ref().and_then(quantity_from_value),
        }
    }

    pub fn purchase_price(&self) -> Option<Decimal> {
        match self {
            Self::Ticker(_) => None,
            Self::Detailed { purchase_price, .. } => {
                purchase_price.as_ref().and_then(decimal_from_value)
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct WatchlistResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub watchlist: Vec<WatchlistEntry>,
}

/// One row of the quote-detail endpoint. Fields stay loosely typed because
/// the backend substitutes `"N/A"` for data it could not load.
#[derive(Clone, Debug, Deserialize)]
pub struct QuoteDetail {
    pub ticker: String,
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub exchange: Option<Value>,
    #[serde(default)]
    pub quantity: Option<Value>,
    #[serde(default)]
    pub purchase_price: Option<Value>,
}

impl QuoteDetail {
    /// Converts to a snapshot; `None` when the price is not numeric.
    pub fn to_snapshot(&self) -> Option<QuoteSnapshot> {
        let price = self.price.as_ref().and_then(decimal_from_value)?;
        Some(QuoteSnapshot {
            ticker: normalize_ticker(&self.ticker),
            name: text_from_value(self.name.as_ref()),
            price,
            exchange: text_from_value(self.exchange.as_ref()),
        })
    }

    pub fn quantity(&self) -> Option<u32> {
        self.quantity.as_ref().and_then(quantity_from_value)
    }

    pub fn purchase_price(&self) -> Option<Decimal> {
        self.purchase_price.as_ref().and_then(decimal_from_value)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct QuoteDetailResponse {
    #[serde(default)]
    pub watchlist: Vec<QuoteDetail>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TickerListResponse {
    #[serde(default)]
    pub watchlist: Vec<WatchlistEntry>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChartSeries {
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub prices: Vec<f64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub analysis: String,
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .to_string()
            .parse::<Decimal>()
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        Value::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    }
}

/// Backend quantities of 0 read as the default quantity.
fn quantity_from_value(value: &Value) -> Option<u32> {
    let quantity = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64))
            .and_then(|q| u32::try_from(q).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    quantity.map(|q| if q == 0 { DEFAULT_QUANTITY } else { q })
}

fn text_from_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "N/A".to_string(),
        Some(other) => other.to_string(),
    }
}
