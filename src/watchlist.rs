use crate::backend::QuoteBackend;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    normalize_ticker, AddSymbolRequest, QuoteDetail, TrackedSymbol, WatchlistEntry, DEFAULT_QUANTITY,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// The tracked set of one session, in backend order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Watchlist {
    symbols: Vec<TrackedSymbol>,
}

impl Watchlist {
    pub fn new(symbols: Vec<TrackedSymbol>) -> Self {
        let mut list = Self::default();
        for symbol in symbols {
            list.upsert(symbol);
        }
        list
    }

    pub fn symbols(&self) -> &[TrackedSymbol] {
        &self.symbols
    }

    pub fn get(&self, ticker: &str) -> Option<&TrackedSymbol> {
        self.symbols.iter().find(|symbol| symbol.ticker == ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.get(ticker).is_some()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.symbols.iter().map(|symbol| symbol.ticker.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    fn upsert(&mut self, symbol: TrackedSymbol) {
        if symbol.ticker.is_empty() {
            return;
        }
        match self.symbols.iter_mut().find(|existing| existing.ticker == symbol.ticker) {
            Some(existing) => *existing = symbol,
            None => self.symbols.push(symbol),
        }
    }

    /// Rebuilds the list from a backend response. Metadata missing from the
    /// response comes from `pending` (the symbol just submitted), then from
    /// the previous local entry, then from defaults.
    pub fn from_entries(entries: &[WatchlistEntry], previous: &Watchlist, pending: Option<&AddSymbolRequest>) -> Self {
        let symbols = entries
            .iter()
            .map(|entry| {
                let ticker = entry.ticker();
                let from_pending = pending.filter(|request| request.ticker == ticker);
                let from_previous = previous.get(&ticker);

                let quantity = entry
                    .quantity()
                    .or(from_pending.map(|request| request.quantity))
                    .or(from_previous.map(|symbol| symbol.quantity))
                    .unwrap_or(DEFAULT_QUANTITY);
                let purchase_price = entry
                    .purchase_price()
                    .or(from_pending.map(|request| request.purchase_price))
                    .or(from_previous.map(|symbol| symbol.purchase_price))
                    .unwrap_or(Decimal::ZERO);

                TrackedSymbol::with_holding(&ticker, quantity, purchase_price)
            })
            .collect();
        Self::new(symbols)
    }

    /// Refreshes holding metadata from a quote-detail poll. Membership is
    /// unchanged: rows for tickers not in the list are ignored.
    pub fn refresh_metadata(&mut self, details: &[QuoteDetail]) {
        for detail in details {
            let ticker = normalize_ticker(&detail.ticker);
            if let Some(symbol) = self.symbols.iter_mut().find(|symbol| symbol.ticker == ticker) {
                if let Some(quantity) = detail.quantity() {
                    symbol.quantity = quantity;
                }
                if let Some(price) = detail.purchase_price().filter(|p| !p.is_sign_negative()) {
                    symbol.purchase_price = price;
                }
            }
        }
    }
}

/// Result of a committed add or remove.
#[derive(Clone, Debug)]
pub struct WatchlistChange {
    pub message: String,
    pub watchlist: Watchlist,
}

/// Mediates watchlist membership against the backend. It computes the new
/// authoritative list; committing it is left to the caller so the commit can
/// be checked against the session that issued it.
#[derive(Clone)]
pub struct WatchlistRepository {
    backend: Arc<dyn QuoteBackend>,
}

impl WatchlistRepository {
    pub fn new(backend: Arc<dyn QuoteBackend>) -> Self {
        Self { backend }
    }

    pub async fn load(&self, user_id: &str) -> SyncResult<Watchlist> {
        let entries = self.backend.list_watchlist(user_id).await?;
        let watchlist = Watchlist::from_entries(&entries, &Watchlist::default(), None);
        info!("Loaded watchlist: [{}]", watchlist.tickers().join(", "));
        Ok(watchlist)
    }

    pub async fn add(&self, user_id: &str, current: &Watchlist, request: AddSymbolRequest) -> SyncResult<WatchlistChange> {
        if request.ticker.is_empty() {
            return Err(SyncError::invalid("Enter a ticker symbol"));
        }

        let response = self.backend.add_symbol(user_id, &request).await?;
        let watchlist = Watchlist::from_entries(&response.watchlist, current, Some(&request));
        info!("Added {} (watchlist now {} symbols)", request.ticker, watchlist.len());

        Ok(WatchlistChange {
            message: non_empty_or(response.message, || format!("{} added to watchlist", request.ticker)),
            watchlist,
        })
    }

    pub async fn remove(&self, user_id: &str, current: &Watchlist, ticker: &str) -> SyncResult<WatchlistChange> {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(SyncError::invalid("Enter a ticker symbol"));
        }

        let response = self.backend.remove_symbol(user_id, &ticker).await?;
        let watchlist = Watchlist::from_entries(&response.watchlist, current, None);
        info!("Removed {} (watchlist now {} symbols)", ticker, watchlist.len());

        Ok(WatchlistChange {
            message: non_empty_or(response.message, || format!("{} removed from watchlist", ticker)),
            watchlist,
        })
    }
}

fn non_empty_or(message: String, fallback: impl FnOnce() -> String) -> String {
    if message.trim().is_empty() { fallback() } else { message }
}
