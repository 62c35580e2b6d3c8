mod app;
mod backend;
mod config;
mod diff;
mod error;
mod models;
mod portfolio;
mod scheduler;
mod session;
mod sync;
mod ui;
mod view;
mod watchlist;

use anyhow::{Context, Result, bail};
use app::{App, Command, SyncEvent};
use backend::{HttpBackend, QuoteBackend};
use clap::{Parser, Subcommand};
use config::AppConfig;
use models::{SortKey, normalize_ticker};
use session::FileSessionStore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tickerwatch: keeps a stock watchlist in sync with the quote backend",
    after_help = "EXAMPLES:
    # Create an account and log in
    tickerwatch signup ada@example.com secret
    tickerwatch login ada@example.com secret

    # Track a holding: 3 shares bought at 200
    tickerwatch add TSLA --quantity 3 --price 200

    # Live table, refreshed every 15s
    tickerwatch watch --sort price"
)]
struct Args {
    /// Backend base URL (overrides TICKERWATCH_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Refresh cadence in milliseconds (overrides TICKERWATCH_POLL_INTERVAL_MS)
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Register a new account
    Signup { email: String, password: String },
    /// Log in and remember the session
    Login { email: String, password: String },
    /// Forget the remembered session
    Logout,
    /// Add a symbol to the watchlist
    Add {
        ticker: String,
        #[arg(long, default_value = "1")]
        quantity: String,
        /// Purchase price per share
        #[arg(long, default_value = "0")]
        price: String,
    },
    /// Remove a symbol from the watchlist
    Remove { ticker: String },
    /// Poll quotes and print the table until `q` or Ctrl-C
    Watch {
        #[arg(long, default_value = "")]
        filter: String,
        /// ticker, price or exchange
        #[arg(long, default_value = "ticker")]
        sort: String,
    },
    /// Price history for one symbol
    Chart { ticker: String },
    /// Recent headlines for one symbol
    News { ticker: String },
    /// AI-generated commentary for one symbol
    Analysis { ticker: String },
    /// Chart, news and analysis together
    Detail { ticker: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tickerwatch=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = AppConfig::from_env().with_overrides(args.api_url, args.poll_interval_ms);
    info!("Backend at {}", config.api_url);

    let backend: Arc<dyn QuoteBackend> =
        Arc::new(HttpBackend::from_config(&config).context("Failed to build HTTP client")?);
    let store = FileSessionStore::new(&config.session_file);
    debug!("Session file {}", store.path().display());
    let (mut app, events) = App::new(config, backend, Box::new(store));
    let backend = app.backend().clone();

    let result = match args.command {
        CliCommand::Signup { email, password } => app.signup(&email, &password).await.map(print_line),
        CliCommand::Login { email, password } => app.login(&email, &password).await.map(print_line),
        CliCommand::Logout => app.logout().await.map(|_| println!("Logged out")),
        CliCommand::Add { ticker, quantity, price } => {
            require_session(&mut app, false).await?;
            let result = app.add(&ticker, &quantity, &price).await.map(print_line);
            print_dashboard(&app).await;
            result
        }
        CliCommand::Remove { ticker } => {
            require_session(&mut app, false).await?;
            let result = app.remove(&ticker).await.map(print_line);
            print_dashboard(&app).await;
            result
        }
        CliCommand::Watch { filter, sort } => {
            let sort_key = SortKey::parse(&sort).with_context(|| format!("Unknown sort key '{}'", sort))?;
            require_session(&mut app, true).await?;
            app.set_filter(&filter);
            app.set_sort(sort_key);
            watch(&mut app, events).await?;
            Ok(())
        }
        CliCommand::Chart { ticker } => {
            let ticker = normalize_ticker(&ticker);
            backend.chart(&ticker).await.map(|series| println!("{}", ui::render_chart(&ticker, &series)))
        }
        CliCommand::News { ticker } => {
            let ticker = normalize_ticker(&ticker);
            backend.news(&ticker).await.map(|items| print!("{}", ui::render_news(&ticker, &items)))
        }
        CliCommand::Analysis { ticker } => backend.analysis(&normalize_ticker(&ticker)).await.map(print_line),
        CliCommand::Detail { ticker } => {
            detail(backend.as_ref(), &normalize_ticker(&ticker)).await;
            Ok(())
        }
    };

    app.shutdown().await;
    result?;
    Ok(())
}

fn print_line(message: String) {
    println!("{}", message);
}

async fn print_dashboard(app: &App) {
    let dashboard = app.dashboard().await;
    if dashboard.refreshed_at.is_some() {
        print!("{}", ui::render_dashboard(&dashboard, &app.view));
    }
}

/// Restores the persisted session; `poll` also loads the watchlist and
/// starts the refresh cadence.
async fn require_session(app: &mut App, poll: bool) -> Result<()> {
    if poll {
        app.restore().await;
    } else {
        app.restore_idle().await;
    }
    match app.session() {
        Some(session) => {
            debug!("Using session for user {}", session.user_id);
            Ok(())
        }
        None => bail!("Please log in first (tickerwatch login <email> <password>)"),
    }
}

/// Prints the table on every applied refresh and applies console commands
/// read from stdin.
async fn watch(app: &mut App, mut events: tokio::sync::mpsc::UnboundedReceiver<SyncEvent>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", ui::HELP);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SyncEvent::Refreshed { .. }) => print!("{}", ui::render_dashboard(&app.dashboard().await, &app.view)),
                Some(SyncEvent::Info(message)) => println!("{}", message),
                Some(SyncEvent::Warning(message)) => println!("! {}", message),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(Some(command)) => {
                        let redraw = matches!(command, Command::Filter(_) | Command::Sort(_));
                        if !app.handle(command).await {
                            break;
                        }
                        if redraw {
                            print!("{}", ui::render_dashboard(&app.dashboard().await, &app.view));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("! {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Fetches the three detail reads concurrently; each one fails on its own.
async fn detail(backend: &dyn QuoteBackend, ticker: &str) {
    let (chart, news, analysis) =
        futures_util::future::join3(backend.chart(ticker), backend.news(ticker), backend.analysis(ticker)).await;

    match chart {
        Ok(series) => println!("{}", ui::render_chart(ticker, &series)),
        Err(e) => warn!("Chart unavailable: {}", e),
    }
    match news {
        Ok(items) => print!("{}", ui::render_news(ticker, &items)),
        Err(e) => warn!("News unavailable: {}", e),
    }
    match analysis {
        Ok(text) => println!("{}", text),
        Err(e) => warn!("Analysis unavailable: {}", e),
    }
}
