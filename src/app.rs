use crate::backend::QuoteBackend;
use crate::config::AppConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{AddSymbolRequest, Credentials, SortKey, ViewState};
use crate::scheduler::PollingScheduler;
use crate::session::{Session, SessionGate, SessionStore};
use crate::sync::{Dashboard, PollOutcome, SyncEngine};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

/// Notifications for the presentation surface.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    Refreshed { seq: u64, quotes: usize },
    Info(String),
    Warning(String),
}

/// One line of console input while watching.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Add {
        ticker: String,
        quantity: String,
        purchase_price: String,
    },
    Remove(String),
    Filter(String),
    Sort(SortKey),
    Refresh,
    Help,
    Quit,
}

impl Command {
    /// Parses `+TICKER [qty] [price]`, `-TICKER`, `/filter`, `sort <key>`,
    /// `r`, `?` or `q`. Blank input yields `None`.
    pub fn parse(line: &str) -> SyncResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        if let Some(rest) = line.strip_prefix('+') {
            let mut parts = rest.split_whitespace();
            let ticker = parts.next().unwrap_or_default().to_string();
            let quantity = parts.next().unwrap_or("1").to_string();
            let purchase_price = parts.next().unwrap_or("0").to_string();
            return Ok(Some(Self::Add {
                ticker,
                quantity,
                purchase_price,
            }));
        }
        if let Some(rest) = line.strip_prefix('-') {
            return Ok(Some(Self::Remove(rest.trim().to_string())));
        }
        if let Some(rest) = line.strip_prefix('/') {
            return Ok(Some(Self::Filter(rest.trim().to_string())));
        }

        let mut words = line.split_whitespace();
        let command = match (words.next().unwrap_or_default(), words.next()) {
            ("sort", Some(key)) => Self::Sort(
                SortKey::parse(key)
                    .ok_or_else(|| SyncError::invalid(format!("Unknown sort key '{}' (ticker, price, exchange)", key)))?,
            ),
            ("sort", None) => return Err(SyncError::invalid("Usage: sort <ticker|price|exchange>")),
            ("r" | "refresh", None) => Self::Refresh,
            ("q" | "quit" | "exit", None) => Self::Quit,
            ("?" | "help", None) => Self::Help,
            _ => return Err(SyncError::invalid(format!("Unknown command '{}' (? for help)", line))),
        };
        Ok(Some(command))
    }
}

/// Binds the session gate, sync engine and scheduler: establishing a session
/// starts polling, ending it stops polling and clears derived state.
pub struct App {
    config: AppConfig,
    backend: Arc<dyn QuoteBackend>,
    gate: SessionGate,
    engine: Arc<SyncEngine>,
    scheduler: PollingScheduler,
    pub view: ViewState,
    event_tx: UnboundedSender<SyncEvent>,
}

impl App {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn QuoteBackend>,
        store: Box<dyn SessionStore>,
    ) -> (Self, UnboundedReceiver<SyncEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let app = Self {
            config,
            engine: Arc::new(SyncEngine::new(backend.clone())),
            backend,
            gate: SessionGate::new(store),
            scheduler: PollingScheduler::new(),
            view: ViewState::default(),
            event_tx,
        };
        (app, event_rx)
    }

    pub fn session(&self) -> Option<&Session> {
        self.gate.current()
    }

    pub fn backend(&self) -> &Arc<dyn QuoteBackend> {
        &self.backend
    }

    /// Reopens the persisted session and starts polling. Returns `None` when
    /// nobody is logged in.
    pub async fn restore(&mut self) -> Option<Session> {
        let session = self.gate.restore()?;
        self.activate(session.clone()).await;
        Some(session)
    }

    /// Reopens the persisted session for a single request: no watchlist
    /// load, no polling. A later add or remove refreshes quotes inline.
    pub async fn restore_idle(&mut self) -> Option<Session> {
        let session = self.gate.restore()?;
        self.engine.begin(session.clone()).await;
        Some(session)
    }

    pub async fn signup(&mut self, email: &str, password: &str) -> SyncResult<String> {
        let credentials = credentials(email, password)?;
        let response = self.backend.signup(&credentials).await?;
        info!("Signed up {}", credentials.email);
        Ok(non_empty_or(response.message, "Signup successful"))
    }

    /// Logs in through the backend and establishes the returned user id.
    pub async fn login(&mut self, email: &str, password: &str) -> SyncResult<String> {
        let credentials = credentials(email, password)?;
        let response = self.backend.login(&credentials).await?;
        let user_id = response.user_id().ok_or_else(|| SyncError::backend("Login error"))?;

        self.deactivate().await;
        let session = self.gate.establish(&user_id)?;
        self.activate(session).await;
        Ok(non_empty_or(response.message, "Login successful"))
    }

    /// Stops polling, clears session state and forgets the persisted id.
    pub async fn logout(&mut self) -> SyncResult<()> {
        self.deactivate().await;
        self.gate.teardown()?;
        let _ = self.event_tx.send(SyncEvent::Info("Logged out".to_string()));
        info!("Logged out");
        Ok(())
    }

    /// Like `logout` but keeps the persisted id for the next run.
    pub async fn shutdown(&mut self) {
        self.deactivate().await;
        self.gate.release();
    }

    pub async fn add(&self, ticker: &str, quantity: &str, purchase_price: &str) -> SyncResult<String> {
        let request = AddSymbolRequest::from_input(ticker, quantity, purchase_price);
        let change = self.engine.add_symbol(request).await?;
        self.refresh_now().await;
        Ok(change.message)
    }

    pub async fn remove(&self, ticker: &str) -> SyncResult<String> {
        let change = self.engine.remove_symbol(ticker).await?;
        self.refresh_now().await;
        Ok(change.message)
    }

    /// Asks the scheduler for an out-of-band poll, or polls inline when the
    /// scheduler is not running.
    pub async fn refresh_now(&self) {
        if !self.scheduler.refresh_now() {
            report(self.engine.poll_once().await, &self.event_tx);
        }
    }

    pub fn set_filter(&mut self, filter: &str) {
        self.view.filter = filter.trim().to_string();
    }

    pub fn set_sort(&mut self, sort_key: SortKey) {
        self.view.sort_key = sort_key;
    }

    pub async fn dashboard(&self) -> Dashboard {
        self.engine.dashboard(&self.view).await
    }

    /// Applies one console command. Returns false once the user asked to quit.
    pub async fn handle(&mut self, command: Command) -> bool {
        let result = match command {
            Command::Add {
                ticker,
                quantity,
                purchase_price,
            } => self.add(&ticker, &quantity, &purchase_price).await.map(Some),
            Command::Remove(ticker) => self.remove(&ticker).await.map(Some),
            Command::Filter(filter) => {
                self.set_filter(&filter);
                Ok(None)
            }
            Command::Sort(key) => {
                self.set_sort(key);
                Ok(None)
            }
            Command::Refresh => {
                self.refresh_now().await;
                Ok(None)
            }
            Command::Help => Ok(Some(crate::ui::HELP.to_string())),
            Command::Quit => return false,
        };

        let event = match result {
            Ok(Some(message)) => SyncEvent::Info(message),
            Ok(None) => return true,
            Err(e) => SyncEvent::Warning(e.to_string()),
        };
        let _ = self.event_tx.send(event);
        true
    }

    async fn activate(&mut self, session: Session) {
        self.engine.begin(session).await;
        match self.engine.load_watchlist().await {
            Ok(count) => info!("Tracking {} symbols", count),
            Err(e) => {
                warn!("Could not load watchlist: {}", e);
                let _ = self.event_tx.send(SyncEvent::Warning(format!("Could not load watchlist: {}", e)));
            }
        }
        self.start_polling();
    }

    fn start_polling(&mut self) {
        let engine = self.engine.clone();
        let events = self.event_tx.clone();
        self.scheduler.start(
            move || {
                let engine = engine.clone();
                let events = events.clone();
                async move { report(engine.poll_once().await, &events) }
            },
            self.config.poll_interval,
        );
    }

    async fn deactivate(&mut self) {
        self.scheduler.stop().await;
        self.engine.end().await;
    }
}

fn report(outcome: PollOutcome, events: &UnboundedSender<SyncEvent>) {
    let event = match outcome {
        PollOutcome::Applied { seq, quotes } => SyncEvent::Refreshed { seq, quotes },
        PollOutcome::Failed { message, .. } => SyncEvent::Warning(format!("Quote refresh failed: {}", message)),
        PollOutcome::Stale { .. } | PollOutcome::Inactive => return,
    };
    let _ = events.send(event);
}

fn credentials(email: &str, password: &str) -> SyncResult<Credentials> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(SyncError::invalid("Enter email and password"));
    }
    Ok(Credentials {
        email: email.to_string(),
        password: password.to_string(),
    })
}

fn non_empty_or(message: String, fallback: &str) -> String {
    if message.trim().is_empty() { fallback.to_string() } else { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::session::MemorySessionStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    impl App {
        fn is_polling(&self) -> bool {
            self.scheduler.is_running()
        }
    }

    fn app_with(backend: &Arc<FakeBackend>) -> (App, UnboundedReceiver<SyncEvent>) {
        let config = AppConfig {
            poll_interval: Duration::from_secs(15),
            ..AppConfig::default()
        };
        App::new(config, backend.clone(), Box::new(MemorySessionStore::default()))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn logged_in(backend: &Arc<FakeBackend>) -> (App, UnboundedReceiver<SyncEvent>) {
        let (mut app, events) = app_with(backend);
        app.signup("ada@example.com", "pw").await.unwrap();
        app.login("ada@example.com", "pw").await.unwrap();
        (app, events)
    }

    #[test]
    fn test_parse_console_commands() {
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(
            Command::parse("+tsla 3 200").unwrap(),
            Some(Command::Add {
                ticker: "tsla".into(),
                quantity: "3".into(),
                purchase_price: "200".into(),
            })
        );
        assert_eq!(
            Command::parse("+aapl").unwrap(),
            Some(Command::Add {
                ticker: "aapl".into(),
                quantity: "1".into(),
                purchase_price: "0".into(),
            })
        );
        assert_eq!(Command::parse("-AAPL").unwrap(), Some(Command::Remove("AAPL".into())));
        assert_eq!(Command::parse("/ns").unwrap(), Some(Command::Filter("ns".into())));
        assert_eq!(Command::parse("/").unwrap(), Some(Command::Filter(String::new())));
        assert_eq!(Command::parse("sort price").unwrap(), Some(Command::Sort(SortKey::Price)));
        assert_eq!(Command::parse("q").unwrap(), Some(Command::Quit));
        assert!(matches!(Command::parse("sort volume"), Err(SyncError::InvalidInput(_))));
        assert!(matches!(Command::parse("buy everything"), Err(SyncError::InvalidInput(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_app_makes_no_requests() {
        let backend = Arc::new(FakeBackend::new());
        let (mut app, _events) = app_with(&backend);

        assert_eq!(app.restore().await, None);
        assert!(!app.is_polling());
        assert!(matches!(app.add("AAPL", "1", "0").await, Err(SyncError::Unauthenticated)));
        app.refresh_now().await;
        assert!(matches!(app.login("", "pw").await, Err(SyncError::InvalidInput(_))));
        assert_eq!(backend.network_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_login_surfaces_backend_message() {
        let backend = Arc::new(FakeBackend::new());
        let (mut app, _events) = app_with(&backend);

        let err = app.login("nobody@example.com", "pw").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid credentials");
        assert!(app.session().is_none());
        assert!(!app.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_starts_polling_and_publishes_refresh() {
        let backend = Arc::new(FakeBackend::new());
        backend.seed("AAPL", dec!(155), 2, dec!(150)).await;
        let (app, mut events) = logged_in(&backend).await;
        settle().await;

        assert!(app.is_polling());
        assert!(matches!(events.recv().await, Some(SyncEvent::Refreshed { quotes: 1, .. })));
        let dashboard = app.dashboard().await;
        assert_eq!(dashboard.summary.total_value, dec!(310));
        assert_eq!(dashboard.summary.holding("AAPL").unwrap().unrealized_pl, dec!(10));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(backend.detail_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_triggers_immediate_refresh() {
        let backend = Arc::new(FakeBackend::new());
        let (app, _events) = logged_in(&backend).await;
        settle().await;
        let polls = backend.detail_calls.load(Ordering::SeqCst);

        let message = app.add("nvda", "2", "100").await.unwrap();
        assert_eq!(message, "NVDA added to watchlist");
        settle().await;

        assert_eq!(backend.detail_calls.load(Ordering::SeqCst), polls + 1);
        let dashboard = app.dashboard().await;
        assert_eq!(dashboard.quotes.len(), 1);
        assert_eq!(dashboard.quotes[0].ticker, "NVDA");
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_stops_polling_and_clears_state() {
        let backend = Arc::new(FakeBackend::new());
        backend.seed("AAPL", dec!(155), 1, dec!(0)).await;
        let (mut app, _events) = logged_in(&backend).await;
        settle().await;

        app.logout().await.unwrap();
        assert!(!app.is_polling());
        assert!(app.session().is_none());
        let dashboard = app.dashboard().await;
        assert!(dashboard.quotes.is_empty());
        assert!(dashboard.watchlist.is_empty());

        let polls = backend.detail_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.detail_calls.load(Ordering::SeqCst), polls);
        assert_eq!(app.restore().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_persisted_session() {
        let backend = Arc::new(FakeBackend::new());
        let (mut app, _events) = logged_in(&backend).await;
        let first = app.session().cloned().unwrap();

        app.shutdown().await;
        assert!(!app.is_polling());

        let restored = app.restore().await.unwrap();
        assert_eq!(restored.user_id, first.user_id);
        assert!(restored.generation > first.generation);
        assert!(app.is_polling());
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_restore_does_not_poll_until_a_change() {
        let backend = Arc::new(FakeBackend::new());
        backend.seed("AAPL", dec!(155), 2, dec!(150)).await;
        let (mut app, _events) = logged_in(&backend).await;
        app.shutdown().await;
        let calls = backend.network_calls.load(Ordering::SeqCst);
        let polls = backend.detail_calls.load(Ordering::SeqCst);

        assert!(app.restore_idle().await.is_some());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!app.is_polling());
        assert_eq!(backend.network_calls.load(Ordering::SeqCst), calls);

        app.add("nvda", "1", "0").await.unwrap();
        assert_eq!(backend.detail_calls.load(Ordering::SeqCst), polls + 1);
        let dashboard = app.dashboard().await;
        assert_eq!(dashboard.quotes.len(), 2);
        assert_eq!(dashboard.summary.holding("AAPL").unwrap().current_value, dec!(310));
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_rejections_and_quits() {
        let backend = Arc::new(FakeBackend::new());
        backend.seed("AAPL", dec!(155), 1, dec!(0)).await;
        let (mut app, mut events) = logged_in(&backend).await;
        settle().await;
        while events.try_recv().is_ok() {}

        assert!(app.handle(Command::Remove("MSFT".into())).await);
        assert_eq!(events.recv().await, Some(SyncEvent::Warning("MSFT not in watchlist".into())));

        assert!(app.handle(Command::Sort(SortKey::Price)).await);
        assert!(app.handle(Command::Filter(" aa ".into())).await);
        assert_eq!(app.view.sort_key, SortKey::Price);
        assert_eq!(app.view.filter, "aa");

        assert!(!app.handle(Command::Quit).await);
        app.shutdown().await;
    }
}
