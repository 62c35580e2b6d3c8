use crate::config::AppConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    AddSymbolRequest, AnalysisResponse, AuthResponse, ChartSeries, Credentials, NewsItem,
    QuoteDetail, QuoteDetailResponse, TickerListResponse, WatchlistEntry, WatchlistResponse,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// The HTTP/JSON service that owns watchlists, quotes and credentials.
#[async_trait]
pub trait QuoteBackend: Send + Sync {
    async fn list_watchlist(&self, user_id: &str) -> SyncResult<Vec<WatchlistEntry>>;

    async fn watchlist_detail(&self, user_id: &str) -> SyncResult<Vec<QuoteDetail>>;

    async fn add_symbol(&self, user_id: &str, request: &AddSymbolRequest) -> SyncResult<WatchlistResponse>;

    async fn remove_symbol(&self, user_id: &str, ticker: &str) -> SyncResult<WatchlistResponse>;

    async fn signup(&self, credentials: &Credentials) -> SyncResult<AuthResponse>;

    async fn login(&self, credentials: &Credentials) -> SyncResult<AuthResponse>;

    async fn chart(&self, ticker: &str) -> SyncResult<ChartSeries>;

    async fn news(&self, ticker: &str) -> SyncResult<Vec<NewsItem>>;

    async fn analysis(&self, ticker: &str) -> SyncResult<String>;
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tickerwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> SyncResult<Self> {
        Self::new(&config.api_url, config.request_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)], fallback: &str) -> SyncResult<T> {
        debug!("GET {}", path);
        let response = self.client.get(self.url(path)).query(query).send().await?;
        decode(response, fallback).await
    }
}

/// Reads a successful body as `T`, or turns an error status into
/// [`SyncError::Backend`] carrying the `detail` field when present.
async fn decode<T: DeserializeOwned>(response: Response, fallback: &str) -> SyncResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return serde_json::from_str(&body).map_err(SyncError::from);
    }

    debug!("Backend returned {}: {}", status, body);
    Err(SyncError::backend(error_detail(&body).unwrap_or_else(|| fallback.to_string())))
}

fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(detail) if !detail.trim().is_empty() => Some(detail.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl QuoteBackend for HttpBackend {
    async fn list_watchlist(&self, user_id: &str) -> SyncResult<Vec<WatchlistEntry>> {
        let response: TickerListResponse = self
            .get_json("/watchlist", &[("user_id", user_id)], "Error loading watchlist")
            .await?;
        Ok(response.watchlist)
    }

    async fn watchlist_detail(&self, user_id: &str) -> SyncResult<Vec<QuoteDetail>> {
        let response: QuoteDetailResponse = self
            .get_json("/watchlist-info", &[("user_id", user_id)], "Error loading quotes")
            .await?;
        Ok(response.watchlist)
    }

    async fn add_symbol(&self, user_id: &str, request: &AddSymbolRequest) -> SyncResult<WatchlistResponse> {
        debug!("POST /watchlist ticker={}", request.ticker);
        let response = self
            .client
            .post(self.url("/watchlist"))
            .query(&[("user_id", user_id)])
            .json(request)
            .send()
            .await?;
        decode(response, "Error adding ticker").await
    }

    async fn remove_symbol(&self, user_id: &str, ticker: &str) -> SyncResult<WatchlistResponse> {
        debug!("DELETE /watchlist/{}", ticker);
        let response = self
            .client
            .delete(self.url(&format!("/watchlist/{}", ticker)))
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        decode(response, "Error removing ticker").await
    }

    async fn signup(&self, credentials: &Credentials) -> SyncResult<AuthResponse> {
        let response = self.client.post(self.url("/signup")).json(credentials).send().await?;
        decode(response, "Signup error").await
    }

    async fn login(&self, credentials: &Credentials) -> SyncResult<AuthResponse> {
        let response = self.client.post(self.url("/login")).json(credentials).send().await?;
        decode(response, "Login error").await
    }

    async fn chart(&self, ticker: &str) -> SyncResult<ChartSeries> {
        let series: ChartSeries = self
            .get_json(&format!("/stock-chart/{}", ticker), &[], "Error fetching chart")
            .await?;
        if series.dates.len() != series.prices.len() {
            return Err(SyncError::Decode(format!(
                "chart for {} has {} dates but {} prices",
                ticker,
                series.dates.len(),
                series.prices.len()
            )));
        }
        Ok(series)
    }

    async fn news(&self, ticker: &str) -> SyncResult<Vec<NewsItem>> {
        self.get_json(&format!("/stock-news/{}", ticker), &[], "Error fetching news")
            .await
    }

    async fn analysis(&self, ticker: &str) -> SyncResult<String> {
        let response: AnalysisResponse = self
            .get_json(&format!("/stock-ai/{}", ticker), &[], "Error fetching AI analysis")
            .await?;
        Ok(response.analysis)
    }
}
