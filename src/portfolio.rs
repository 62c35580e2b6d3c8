use crate::models::{DiffedQuote, HoldingValuation, PortfolioSummary, TrackedSymbol, DEFAULT_QUANTITY};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Derives portfolio totals from one tick's diffed quotes. Rebuilt from
/// scratch every call.
pub struct PortfolioAggregator;

impl PortfolioAggregator {
    pub fn summarize(quotes: &[DiffedQuote], tracked: &[TrackedSymbol]) -> PortfolioSummary {
        let by_ticker: HashMap<&str, &TrackedSymbol> =
            tracked.iter().map(|symbol| (symbol.ticker.as_str(), symbol)).collect();

        let mut summary = PortfolioSummary::default();
        let mut reference_value = Decimal::ZERO;

        for quote in quotes {
            let (quantity, purchase_price) = by_ticker
                .get(quote.ticker.as_str())
                .map(|symbol| (symbol.quantity, symbol.purchase_price))
                .unwrap_or((DEFAULT_QUANTITY, Decimal::ZERO));
            let qty = Decimal::from(quantity);

            let current_value = quote.price * qty;
            let unrealized_pl = (quote.price - purchase_price) * qty;

            summary.total_value += current_value;
            summary.total_cost += purchase_price * qty;
            summary.total_unrealized_pl += unrealized_pl;
            reference_value += quote.reference_price * qty;

            summary.holdings.push(HoldingValuation {
                ticker: quote.ticker.clone(),
                quantity,
                current_value,
                unrealized_pl,
            });
        }

        summary.total_change = summary.total_value - reference_value;
        summary
    }
}
