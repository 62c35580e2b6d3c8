use crate::backend::QuoteBackend;
use crate::diff::{PriceHistory, SnapshotDiffEngine};
use crate::error::{SyncError, SyncResult};
use crate::models::{AddSymbolRequest, DiffedQuote, PortfolioSummary, TrackedSymbol, ViewState};
use crate::portfolio::PortfolioAggregator;
use crate::session::Session;
use crate::view::ViewProjector;
use crate::watchlist::{Watchlist, WatchlistChange, WatchlistRepository};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Everything derived for one session. Replaced wholesale when a session
/// begins or ends.
#[derive(Default)]
struct SessionState {
    session: Option<Session>,
    /// Sequence number of the most recently issued poll.
    issued: u64,
    applied: u64,
    watchlist: Watchlist,
    history: PriceHistory,
    quotes: Vec<DiffedQuote>,
    summary: PortfolioSummary,
    refreshed_at: Option<DateTime<Local>>,
}

impl SessionState {
    fn is_current(&self, session: &Session) -> bool {
        self.session.as_ref() == Some(session)
    }

    /// Drops derived data for tickers that left the watchlist.
    fn prune_untracked(&mut self) {
        let dropped: Vec<String> = self
            .history
            .tickers()
            .filter(|ticker| !self.watchlist.contains(ticker))
            .map(str::to_string)
            .collect();
        for ticker in &dropped {
            self.history.forget(ticker);
        }
        let watchlist = &self.watchlist;
        self.quotes.retain(|quote| watchlist.contains(&quote.ticker));
        self.summary = PortfolioAggregator::summarize(&self.quotes, self.watchlist.symbols());
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    Applied { seq: u64, quotes: usize },
    /// Superseded by a newer request or a session change; nothing was applied.
    Stale { seq: u64 },
    /// Transport or backend failure; previous data is retained.
    Failed { seq: u64, message: String },
    Inactive,
}

/// Read-only copy of the derived state, projected for display.
#[derive(Clone, Debug, Default)]
pub struct Dashboard {
    pub quotes: Vec<DiffedQuote>,
    pub summary: PortfolioSummary,
    pub watchlist: Vec<TrackedSymbol>,
    pub refreshed_at: Option<DateTime<Local>>,
}

/// Applies poll responses and watchlist mutations to session state.
///
/// Every poll takes a ticket (session + sequence number) before going to the
/// network. Its response is applied only if the ticket is still the newest
/// one issued for the current session; anything else is discarded.
pub struct SyncEngine {
    backend: Arc<dyn QuoteBackend>,
    repository: WatchlistRepository,
    state: Mutex<SessionState>,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn QuoteBackend>) -> Self {
        Self {
            repository: WatchlistRepository::new(backend.clone()),
            backend,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Starts a session from empty state.
    pub async fn begin(&self, session: Session) {
        let mut state = self.state.lock().await;
        let issued = state.issued;
        *state = SessionState {
            session: Some(session),
            // Keep the counter monotonic so tickets of the previous session can
            // never match.
            issued,
            applied: issued,
            ..SessionState::default()
        };
    }

    /// Ends the session and clears all derived state.
    pub async fn end(&self) {
        let mut state = self.state.lock().await;
        let issued = state.issued + 1;
        *state = SessionState {
            issued,
            applied: issued,
            ..SessionState::default()
        };
    }

    async fn require_session(&self) -> SyncResult<(Session, Watchlist)> {
        let state = self.state.lock().await;
        match &state.session {
            Some(session) => Ok((session.clone(), state.watchlist.clone())),
            None => Err(SyncError::Unauthenticated),
        }
    }

    /// Seeds the tracked set from the backend. The load counts as a mutation,
    /// so polls issued before it are stale.
    pub async fn load_watchlist(&self) -> SyncResult<usize> {
        let (session, _) = self.require_session().await?;
        let watchlist = self.repository.load(&session.user_id).await?;

        let mut state = self.state.lock().await;
        if !state.is_current(&session) {
            return Err(SyncError::SessionChanged);
        }
        state.watchlist = watchlist;
        state.issued += 1;
        state.prune_untracked();
        Ok(state.watchlist.len())
    }

    pub async fn add_symbol(&self, request: AddSymbolRequest) -> SyncResult<WatchlistChange> {
        if request.ticker.is_empty() {
            return Err(SyncError::invalid("Enter a ticker symbol"));
        }
        let (session, current) = self.require_session().await?;
        let change = self.repository.add(&session.user_id, &current, request).await?;
        self.commit(&session, change).await
    }

    pub async fn remove_symbol(&self, ticker: &str) -> SyncResult<WatchlistChange> {
        if ticker.trim().is_empty() {
            return Err(SyncError::invalid("Enter a ticker symbol"));
        }
        let (session, current) = self.require_session().await?;
        let change = self.repository.remove(&session.user_id, &current, ticker).await?;
        self.commit(&session, change).await
    }

    async fn commit(&self, session: &Session, change: WatchlistChange) -> SyncResult<WatchlistChange> {
        let mut state = self.state.lock().await;
        if !state.is_current(session) {
            debug!("Dropping watchlist change for an ended session");
            return Err(SyncError::SessionChanged);
        }
        state.watchlist = change.watchlist.clone();
        // Polls issued against the old membership are now stale.
        state.issued += 1;
        state.prune_untracked();
        Ok(change)
    }

    /// Runs one poll cycle: fetch, then classify and aggregate if the
    /// response is still the newest for this session.
    pub async fn poll_once(&self) -> PollOutcome {
        let (session, seq) = {
            let mut state = self.state.lock().await;
            let Some(session) = state.session.clone() else {
                return PollOutcome::Inactive;
            };
            state.issued += 1;
            (session, state.issued)
        };

        let result = self.backend.watchlist_detail(&session.user_id).await;

        let mut state = self.state.lock().await;
        if !state.is_current(&session) || state.issued != seq {
            debug!(seq, latest = state.issued, applied = state.applied, "Discarding superseded poll response");
            return PollOutcome::Stale { seq };
        }

        let details = match result {
            Ok(details) => details,
            Err(e) => {
                warn!(seq, transient = e.is_transient(), "Quote refresh failed (keeping previous data): {}", e);
                return PollOutcome::Failed {
                    seq,
                    message: e.to_string(),
                };
            }
        };

        state.watchlist.refresh_metadata(&details);

        let mut snapshots = Vec::with_capacity(details.len());
        for detail in &details {
            match detail.to_snapshot() {
                Some(snapshot) if state.watchlist.contains(&snapshot.ticker) => snapshots.push(snapshot),
                Some(snapshot) => debug!("Ignoring quote for untracked {}", snapshot.ticker),
                None => warn!("Skipping {}: price is not numeric", detail.ticker),
            }
        }

        let state = &mut *state;
        let quotes = SnapshotDiffEngine::classify(&mut state.history, snapshots);
        state.summary = PortfolioAggregator::summarize(&quotes, state.watchlist.symbols());
        state.quotes = quotes;
        state.applied = seq;
        state.refreshed_at = Some(Local::now());

        info!(
            seq,
            symbols = state.quotes.len(),
            history = state.history.len(),
            total_value = %state.summary.total_value,
            total_change = %state.summary.total_change,
            "Quotes refreshed"
        );
        PollOutcome::Applied {
            seq,
            quotes: state.quotes.len(),
        }
    }

    pub async fn dashboard(&self, view: &ViewState) -> Dashboard {
        let state = self.state.lock().await;
        Dashboard {
            quotes: ViewProjector::project(&state.quotes, view),
            summary: state.summary.clone(),
            watchlist: state.watchlist.symbols().to_vec(),
            refreshed_at: state.refreshed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::models::{PriceChange, SortKey};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    impl SyncEngine {
        async fn session(&self) -> Option<Session> {
            self.state.lock().await.session.clone()
        }

        async fn summary(&self) -> PortfolioSummary {
            self.state.lock().await.summary.clone()
        }

        async fn last_applied(&self) -> u64 {
            self.state.lock().await.applied
        }

        async fn history_len(&self) -> usize {
            self.state.lock().await.history.len()
        }
    }

    fn session(generation: u64) -> Session {
        Session {
            user_id: "1".to_string(),
            generation,
        }
    }

    async fn engine_with(rows: &[(&str, Decimal, u32, Decimal)]) -> (Arc<FakeBackend>, Arc<SyncEngine>) {
        let backend = Arc::new(FakeBackend::new());
        for (ticker, price, quantity, purchase_price) in rows {
            backend.seed(ticker, *price, *quantity, *purchase_price).await;
        }
        let engine = Arc::new(SyncEngine::new(backend.clone()));
        engine.begin(session(1)).await;
        engine.load_watchlist().await.expect("watchlist should load");
        (backend, engine)
    }

    fn quote<'a>(dashboard: &'a Dashboard, ticker: &str) -> &'a DiffedQuote {
        dashboard.quotes.iter().find(|q| q.ticker == ticker).expect("quote present")
    }

    #[tokio::test]
    async fn test_no_network_without_session() {
        let backend = Arc::new(FakeBackend::new());
        let engine = SyncEngine::new(backend.clone());

        assert_eq!(engine.poll_once().await, PollOutcome::Inactive);
        let err = engine
            .add_symbol(AddSymbolRequest::from_input("AAPL", "1", "0"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Unauthenticated));
        assert!(matches!(engine.remove_symbol("AAPL").await, Err(SyncError::Unauthenticated)));
        assert!(matches!(engine.load_watchlist().await, Err(SyncError::Unauthenticated)));
        assert_eq!(backend.network_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_add_then_two_polls() {
        let (backend, engine) = engine_with(&[]).await;

        let change = engine
            .add_symbol(AddSymbolRequest::from_input("tsla", "3", "200"))
            .await
            .expect("add should succeed");
        assert_eq!(change.watchlist.tickers(), vec!["TSLA"]);

        backend.set_price("TSLA", dec!(210)).await;
        assert!(matches!(engine.poll_once().await, PollOutcome::Applied { .. }));
        let first = engine.dashboard(&ViewState::default()).await;
        let tsla = quote(&first, "TSLA");
        assert_eq!(tsla.price_change, PriceChange::Same);
        assert_eq!(first.summary.total_value, dec!(630));
        assert_eq!(first.summary.holding("TSLA").unwrap().unrealized_pl, dec!(30));
        assert_eq!(first.summary.total_change, Decimal::ZERO);

        backend.set_price("TSLA", dec!(205)).await;
        engine.poll_once().await;
        let second = engine.dashboard(&ViewState::default()).await;
        assert_eq!(quote(&second, "TSLA").price_change, PriceChange::Down);
        assert_eq!(second.summary.total_value, dec!(615));
        assert_eq!(second.summary.total_change, dec!(-15));
    }

    #[tokio::test]
    async fn test_out_of_order_response_is_discarded() {
        let (backend, engine) = engine_with(&[("AAPL", dec!(100), 1, dec!(0))]).await;
        engine.poll_once().await;

        // Request A is issued at price 90 and held.
        backend.set_price("AAPL", dec!(90)).await;
        let (entered, release) = backend.hold_next_detail().await;
        let slow = tokio::spawn({
            let engine = engine.clone();
            async move { engine.poll_once().await }
        });
        entered.await.expect("slow poll should reach the backend");

        // Request B is issued later at 120 and lands first.
        backend.set_price("AAPL", dec!(120)).await;
        let fast = engine.poll_once().await;
        assert!(matches!(fast, PollOutcome::Applied { .. }));

        release.send(()).expect("slow poll still waiting");
        let slow = slow.await.unwrap();
        assert!(matches!(slow, PollOutcome::Stale { .. }));

        let dashboard = engine.dashboard(&ViewState::default()).await;
        let aapl = quote(&dashboard, "AAPL");
        assert_eq!(aapl.price, dec!(120));
        assert_eq!(aapl.price_change, PriceChange::Up);
        assert_eq!(dashboard.summary.total_value, dec!(120));

        // History still holds B's price: the next tick compares against 120.
        backend.set_price("AAPL", dec!(110)).await;
        engine.poll_once().await;
        let next = engine.dashboard(&ViewState::default()).await;
        assert_eq!(quote(&next, "AAPL").price_change, PriceChange::Down);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_in_flight_poll() {
        let (backend, engine) = engine_with(&[("AAPL", dec!(100), 1, dec!(0))]).await;

        let (entered, release) = backend.hold_next_detail().await;
        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.poll_once().await }
        });
        entered.await.unwrap();

        engine.remove_symbol("AAPL").await.expect("remove should succeed");
        release.send(()).unwrap();

        assert!(matches!(pending.await.unwrap(), PollOutcome::Stale { .. }));
        let dashboard = engine.dashboard(&ViewState::default()).await;
        assert!(dashboard.quotes.is_empty());
        assert!(dashboard.watchlist.is_empty());
        assert_eq!(engine.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_end_discards_in_flight_poll_and_clears_state() {
        let (backend, engine) = engine_with(&[("AAPL", dec!(100), 1, dec!(0))]).await;
        engine.poll_once().await;
        let applied_before = engine.last_applied().await;

        let (entered, release) = backend.hold_next_detail().await;
        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.poll_once().await }
        });
        entered.await.unwrap();

        engine.end().await;
        release.send(()).unwrap();
        assert!(matches!(pending.await.unwrap(), PollOutcome::Stale { .. }));

        assert_eq!(engine.session().await, None);
        assert_eq!(engine.summary().await, PortfolioSummary::default());
        assert_eq!(engine.history_len().await, 0);
        assert!(engine.last_applied().await > applied_before);
    }

    #[tokio::test]
    async fn test_new_session_rejects_previous_generation() {
        let (backend, engine) = engine_with(&[("AAPL", dec!(100), 1, dec!(0))]).await;

        let (entered, release) = backend.hold_next_detail().await;
        let pending = tokio::spawn({
            let engine = engine.clone();
            async move { engine.poll_once().await }
        });
        entered.await.unwrap();

        engine.end().await;
        engine.begin(session(2)).await;
        release.send(()).unwrap();

        assert!(matches!(pending.await.unwrap(), PollOutcome::Stale { .. }));
        assert!(engine.dashboard(&ViewState::default()).await.quotes.is_empty());
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_previous_data() {
        let (backend, engine) = engine_with(&[("AAPL", dec!(155), 2, dec!(150))]).await;
        engine.poll_once().await;
        let before = engine.dashboard(&ViewState::default()).await;

        *backend.fail_next_detail.lock().await = true;
        backend.set_price("AAPL", dec!(1)).await;
        assert!(matches!(engine.poll_once().await, PollOutcome::Failed { .. }));

        let after = engine.dashboard(&ViewState::default()).await;
        assert_eq!(after.quotes, before.quotes);
        assert_eq!(after.summary, before.summary);
        assert_eq!(after.summary.holding("AAPL").unwrap().current_value, dec!(310));
    }

    #[tokio::test]
    async fn test_zero_quantity_row_values_one_share() {
        let (backend, engine) = engine_with(&[("AAPL", dec!(155), 2, dec!(0))]).await;
        engine.poll_once().await;
        assert_eq!(engine.summary().await.total_value, dec!(310));

        backend.rows.lock().await[0].quantity = 0;
        engine.poll_once().await;

        let dashboard = engine.dashboard(&ViewState::default()).await;
        assert_eq!(dashboard.watchlist[0].quantity, 1);
        assert_eq!(dashboard.summary.total_value, dec!(155));
        assert_eq!(dashboard.summary.total_change, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_backend_rejection_leaves_state_unmutated() {
        let (backend, engine) = engine_with(&[("AAPL", dec!(155), 1, dec!(0))]).await;
        *backend.reject_next_mutation.lock().await = Some("Invalid ticker".to_string());

        let err = engine
            .add_symbol(AddSymbolRequest::from_input("ZZZZ", "1", "0"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid ticker");
        let dashboard = engine.dashboard(&ViewState::default()).await;
        assert_eq!(dashboard.watchlist.len(), 1);
    }

    #[tokio::test]
    async fn test_dashboard_projection_does_not_touch_state() {
        let (_backend, engine) = engine_with(&[
            ("TSLA", dec!(210), 1, dec!(0)),
            ("AAPL", dec!(155), 1, dec!(0)),
        ])
        .await;
        engine.poll_once().await;

        let view = ViewState {
            filter: "ts".to_string(),
            sort_key: SortKey::Price,
        };
        let summary = engine.summary().await;
        let first = engine.dashboard(&view).await;
        let second = engine.dashboard(&view).await;

        assert_eq!(first.quotes, second.quotes);
        assert_eq!(first.quotes.len(), 1);
        assert_eq!(engine.summary().await, summary);
        assert_eq!(engine.history_len().await, 2);
        assert_eq!(engine.dashboard(&ViewState::default()).await.quotes.len(), 2);
    }
}
