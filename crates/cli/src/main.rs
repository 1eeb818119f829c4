//! ironfly — automated iron-butterfly engine for BTC options.

mod telegram;

use clap::{Parser, Subcommand};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use ironfly_binance::{BinanceClientConfig, BinanceOptionsClient};
use ironfly_core::events::{Event, EventKind, EventSink, TracingEventSink};
use ironfly_core::{ConfigLoader, TradingConfig};
use ironfly_engine::alerts::{AlertSink, LogAlerter};
use ironfly_engine::resilience::circuit_breaker::CircuitBreaker;
use ironfly_engine::resilience::retry::RetryPolicy;
use ironfly_engine::resilience::Resilience;
use ironfly_engine::session::SessionWorkers;
use ironfly_engine::{
    shutdown_channel, ButterflyBuilder, Closer, CycleProgress, CycleScheduler, FillDriver,
    FillDriverConfig, PositionBook, PositionMonitor, RiskEngine, RiskEngineConfig,
    SessionController, SessionHandle, ShutdownCoordinator,
};

use telegram::TelegramAlerter;

#[derive(Parser)]
#[command(name = "ironfly")]
#[command(about = "Automated iron-butterfly engine for BTC options", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a trading session
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/ironfly.toml")]
        config: String,
    },
    /// Validate the configuration and exit
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/ironfly.toml")]
        config: String,
    },
    /// Send a test message through the configured alert sink
    TestAlerts {
        /// Config file path
        #[arg(short, long, default_value = "config/ironfly.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run { config } => run_session(&config).await,
        Commands::CheckConfig { config } => check_config(&config),
        Commands::TestAlerts { config } => test_alerts(&config).await,
    };
    if code != 0 {
        std::process::exit(code);
    }
}

/// Loads and validates configuration; fatal problems exit the process
/// with code 1 before anything touches the venue.
fn load_config(path: &str) -> Option<TradingConfig> {
    let config = match ConfigLoader::load(path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("failed to load configuration from {path}: {err:#}");
            return None;
        }
    };
    if let Err(err) = config.validate() {
        tracing::error!("invalid configuration: {err}");
        return None;
    }
    Some(config)
}

fn check_config(path: &str) -> i32 {
    match load_config(path) {
        Some(config) => {
            log_config_summary(&config);
            tracing::info!("configuration is valid");
            0
        }
        None => 1,
    }
}

async fn test_alerts(path: &str) -> i32 {
    let Some(config) = load_config(path) else {
        return 1;
    };
    if !config.telegram_enabled() {
        tracing::warn!("Telegram is not configured; alerts go to the log only");
        return 0;
    }
    let alerter = match TelegramAlerter::new(
        config.telegram_bot_token.clone().unwrap_or_default(),
        config.telegram_chat_id.clone().unwrap_or_default(),
    ) {
        Ok(alerter) => alerter,
        Err(err) => {
            tracing::error!("failed to build Telegram alerter: {err:#}");
            return 1;
        }
    };
    match alerter.test_connection().await {
        Ok(()) => {
            tracing::info!("Telegram connection test successful");
            0
        }
        Err(err) => {
            tracing::error!("Telegram connection test failed: {err:#}");
            1
        }
    }
}

fn log_config_summary(config: &TradingConfig) {
    tracing::info!("trading configuration:");
    tracing::info!("  session window: {} - {}", config.session_start, config.session_end);
    tracing::info!(
        "  cycles: {} every {} minutes",
        config.number_of_cycles,
        config.cycle_interval_minutes
    );
    tracing::info!("  position quantity: {}", config.position_quantity);
    tracing::info!("  strike distance: {}", config.strike_distance);
    tracing::info!(
        "  risk: SL {}% / TP {}% / portfolio {}%",
        config.stop_loss_pct,
        config.profit_target_pct,
        config.portfolio_risk_pct
    );
    tracing::info!("  order timeout: {}s", config.order_timeout_seconds);
    tracing::info!("  api url: {}", config.api_url);
    tracing::info!("  api key: {}", config.masked_api_key());
    tracing::info!("  telegram: {}", if config.telegram_enabled() { "enabled" } else { "disabled" });
}

async fn run_session(config_path: &str) -> i32 {
    let Some(config) = load_config(config_path) else {
        return 1;
    };
    log_config_summary(&config);

    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let alerts: Arc<dyn AlertSink> = if config.telegram_enabled() {
        match TelegramAlerter::new(
            config.telegram_bot_token.clone().unwrap_or_default(),
            config.telegram_chat_id.clone().unwrap_or_default(),
        ) {
            Ok(alerter) => Arc::new(alerter),
            Err(err) => {
                tracing::warn!("Telegram alerter unavailable ({err:#}), logging alerts only");
                Arc::new(LogAlerter)
            }
        }
    } else {
        Arc::new(LogAlerter)
    };

    let venue = match BinanceOptionsClient::new(
        BinanceClientConfig::new(config.api_key.clone(), config.api_secret.clone())
            .with_base_url(config.api_url.clone()),
    ) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::error!("failed to build venue client: {err}");
            return 1;
        }
    };

    events.emit(
        Event::new(EventKind::ApplicationStarted)
            .with("session_start", config.session_start)
            .with("session_end", config.session_end)
            .with("cycles", config.number_of_cycles),
    );
    alerts.notify(&format!(
        "SESSION 🤖 ironfly started\nSession: {} - {}\nCycles: {} (every {} min)\nQuantity: {}\nStrike distance: {}\nWaiting for the session window",
        config.session_start,
        config.session_end,
        config.number_of_cycles,
        config.cycle_interval_minutes,
        config.position_quantity,
        config.strike_distance,
    ));

    // Process-wide shared state, built once and passed down.
    let resilience = Resilience::new(Arc::new(CircuitBreaker::default_config()), RetryPolicy::default());
    let (engine_stop, engine_token) = shutdown_channel();
    let book = Arc::new(PositionBook::new());
    let session = Arc::new(SessionHandle::new());
    let progress = Arc::new(CycleProgress::new(config.number_of_cycles));
    let risk_latch = Arc::new(AtomicBool::new(false));

    let driver_config = FillDriverConfig {
        order_timeout: Duration::from_secs(config.order_timeout_seconds),
        poll_interval: Duration::from_secs(config.order_update_interval_seconds),
    };
    let closer = Arc::new(Closer::new(
        book.clone(),
        venue.clone(),
        resilience.clone(),
        FillDriver::new(
            venue.clone(),
            resilience.clone(),
            alerts.clone(),
            events.clone(),
            driver_config.clone(),
            engine_token.clone(),
        ),
        alerts.clone(),
        events.clone(),
    ));
    let builder = Arc::new(ButterflyBuilder::new(
        venue.clone(),
        resilience.clone(),
        Arc::new(FillDriver::new(
            venue.clone(),
            resilience.clone(),
            alerts.clone(),
            events.clone(),
            driver_config,
            engine_token.clone(),
        )),
        book.clone(),
        alerts.clone(),
        events.clone(),
        config.position_quantity,
        config.strike_distance,
    ));

    let (snapshots_tx, snapshots_rx) = mpsc::channel(8);
    let monitor = PositionMonitor::new(
        book.clone(),
        venue.clone(),
        resilience.clone(),
        snapshots_tx,
        alerts.clone(),
        engine_token.clone(),
    );
    let (emergency_tx, mut emergency_rx) = mpsc::channel(4);
    let risk = RiskEngine::new(
        RiskEngineConfig {
            stop_loss_pct: config.stop_loss_pct,
            profit_target_pct: config.profit_target_pct,
            portfolio_risk_pct: config.portfolio_risk_pct,
        },
        closer.clone(),
        alerts.clone(),
        events.clone(),
        risk_latch.clone(),
        emergency_tx,
    );
    let scheduler = CycleScheduler::new(
        builder,
        progress.clone(),
        Duration::from_secs(config.cycle_interval_minutes * 60),
        session.subscribe(),
        risk_latch,
        alerts.clone(),
        events.clone(),
        engine_token.clone(),
    );
    let controller = Arc::new(SessionController::new(
        session.clone(),
        config.session_start,
        config.session_end,
        closer.clone(),
        book.clone(),
        progress,
        alerts.clone(),
        events.clone(),
        engine_token.clone(),
    ));
    let coordinator = Arc::new(ShutdownCoordinator::new(
        session,
        closer,
        book,
        engine_stop,
        alerts.clone(),
        events.clone(),
    ));

    let workers = SessionWorkers {
        monitor: Box::pin(monitor.run()),
        risk: Box::pin(risk.run(snapshots_rx, engine_token)),
        scheduler: Box::pin(scheduler.run()),
    };
    let session_runner = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run(workers).await })
    };

    // Whichever comes first decides the teardown flavor: the session
    // finishing on its own, the operator's Ctrl-C, or the risk engine
    // requesting emergency liquidation.
    tokio::select! {
        result = session_runner => {
            if let Err(err) = result {
                tracing::error!("session worker panicked: {err}");
                events.emit(
                    Event::new(EventKind::UncaughtException)
                        .with("worker", "session")
                        .with("error", &err),
                );
                alerts.alert(&format!("SHUTDOWN 🚨 uncaught failure in session worker: {err}"));
                return coordinator.emergency("session worker failure").await;
            }
            coordinator.graceful("session complete").await
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                tracing::error!("failed to listen for Ctrl-C: {err}");
            }
            tracing::info!("interrupt received, shutting down");
            coordinator.graceful("operator interrupt").await
        }
        Some(reason) = emergency_rx.recv() => {
            coordinator.emergency(&reason).await
        }
    }
}
