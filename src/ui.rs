use crate::models::{ChartSeries, NewsItem, ViewState};
use crate::sync::Dashboard;
use rust_decimal::Decimal;
use std::fmt::Write;

pub const HELP: &str = "Commands: +TICKER [qty] [price] add | -TICKER remove | /text filter | sort ticker|price|exchange | r refresh | q quit";

const SPARK: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Renders the watchlist table followed by the portfolio totals.
pub fn render_dashboard(dashboard: &Dashboard, view: &ViewState) -> String {
    let mut out = String::new();

    let refreshed = dashboard
        .refreshed_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let filter = if view.filter.is_empty() { "none" } else { view.filter.as_str() };
    let _ = writeln!(
        out,
        " Watchlist | {} symbols | sort: {} | filter: {} | updated {}",
        dashboard.watchlist.len(),
        view.sort_key.as_str(),
        filter,
        refreshed
    );

    if dashboard.quotes.is_empty() {
        let hint = if dashboard.watchlist.is_empty() {
            "  Watchlist is empty. Add a symbol with +TICKER."
        } else {
            "  No quotes to show."
        };
        let _ = writeln!(out, "{}", hint);
    } else {
        let _ = writeln!(
            out,
            "  {:<8} {:<24} {:>12}   {:<8} {:>6} {:>14} {:>14}",
            "Ticker", "Name", "Price", "Exchange", "Qty", "Value", "P/L"
        );
        for quote in &dashboard.quotes {
            let holding = dashboard.summary.holding(&quote.ticker);
            let quantity = holding.map(|h| h.quantity.to_string()).unwrap_or_default();
            let value = holding.map(|h| money(h.current_value)).unwrap_or_default();
            let pl = holding.map(|h| signed(h.unrealized_pl)).unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<8} {:<24} {:>12} {} {:<8} {:>6} {:>14} {:>14}",
                quote.ticker,
                truncate(&quote.name, 24),
                money(quote.price),
                quote.price_change.arrow(),
                quote.exchange,
                quantity,
                value,
                pl
            );
        }
    }

    let summary = &dashboard.summary;
    let _ = writeln!(
        out,
        " Total value: {} | Change: {} | Cost: {} | Unrealized P/L: {}",
        money(summary.total_value),
        signed(summary.total_change),
        money(summary.total_cost),
        signed(summary.total_unrealized_pl)
    );
    out
}

/// One-line sparkline with the first and last close.
pub fn render_chart(ticker: &str, series: &ChartSeries) -> String {
    let (Some(first), Some(last)) = (series.prices.first(), series.prices.last()) else {
        return format!("{}: no chart data", ticker);
    };

    let min = series.prices.iter().copied().fold(f64::INFINITY, f64::min);
    let max = series.prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    let line: String = series
        .prices
        .iter()
        .map(|price| {
            if span <= f64::EPSILON {
                SPARK[0]
            } else {
                let level = ((price - min) / span * (SPARK.len() - 1) as f64).round() as usize;
                SPARK[level.min(SPARK.len() - 1)]
            }
        })
        .collect();

    let from = series.dates.first().map(String::as_str).unwrap_or("?");
    let to = series.dates.last().map(String::as_str).unwrap_or("?");
    let change = if *first != 0.0 { (last - first) / first * 100.0 } else { 0.0 };
    format!(
        "{} {} .. {}\n{}\n{:.2} -> {:.2} ({:+.2}%) low {:.2} high {:.2}",
        ticker, from, to, line, first, last, change, min, max
    )
}

pub fn render_news(ticker: &str, items: &[NewsItem]) -> String {
    if items.is_empty() {
        return format!("{}: no news", ticker);
    }
    let mut out = format!("{} news\n", ticker);
    for item in items {
        let _ = writeln!(out, "  - {}\n    {}", item.title, item.url);
    }
    out
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn signed(value: Decimal) -> String {
    let value = value.round_dp(2);
    if value.is_sign_negative() && !value.is_zero() {
        format!("{:.2}", value)
    } else {
        format!("+{:.2}", value.abs())
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
