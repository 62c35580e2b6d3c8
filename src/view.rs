use crate::models::{DiffedQuote, SortKey, ViewState};

pub struct ViewProjector;

impl ViewProjector {
    /// Filters and orders quotes for display. Pure: the input is never modified.
    pub fn project(quotes: &[DiffedQuote], view: &ViewState) -> Vec<DiffedQuote> {
        let needle = view.filter.to_uppercase();

        let mut projected: Vec<DiffedQuote> = quotes
            .iter()
            .filter(|quote| needle.is_empty() || quote.ticker.to_uppercase().contains(&needle))
            .cloned()
            .collect();

        // sort_by is stable, so equal keys keep their input order.
        match view.sort_key {
            SortKey::Price => projected.sort_by(|a, b| b.price.cmp(&a.price)),
            SortKey::Ticker => projected.sort_by(|a, b| a.ticker.cmp(&b.ticker)),
            SortKey::Exchange => projected.sort_by(|a, b| a.exchange.cmp(&b.exchange)),
        }

        projected
    }
}
