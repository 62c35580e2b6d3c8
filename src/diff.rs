use crate::models::{DiffedQuote, PriceChange, QuoteSnapshot};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Last observed price per ticker, scoped to one session.
#[derive(Clone, Debug, Default)]
pub struct PriceHistory {
    prices: HashMap<String, Decimal>,
}

impl PriceHistory {
    pub fn get(&self, ticker: &str) -> Option<Decimal> {
        self.prices.get(ticker).copied()
    }

    pub fn forget(&mut self, ticker: &str) {
        self.prices.remove(ticker);
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.prices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }
}

/// Classifies each snapshot against the previous tick's price and records
/// the new price as the next reference.
pub struct SnapshotDiffEngine;

impl SnapshotDiffEngine {
    pub fn classify(history: &mut PriceHistory, snapshots: Vec<QuoteSnapshot>) -> Vec<DiffedQuote> {
        snapshots
            .into_iter()
            .map(|snapshot| {
                let reference_price = history.get(&snapshot.ticker).unwrap_or(snapshot.price);
                let price_change = if snapshot.price > reference_price {
                    PriceChange::Up
                } else if snapshot.price < reference_price {
                    PriceChange::Down
                } else {
                    PriceChange::Same
                };

                history.prices.insert(snapshot.ticker.clone(), snapshot.price);

                DiffedQuote {
                    ticker: snapshot.ticker,
                    name: snapshot.name,
                    price: snapshot.price,
                    exchange: snapshot.exchange,
                    price_change,
                    reference_price,
                }
            })
            .collect()
    }
}
