//! Yield Arb Engine - operator binary
//!
//! Runs the session scheduler and position monitors against paper venues,
//! prints persisted status, or does a one-shot arbitrage scan.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use yield_arb_engine::alerts::{LogSink, NotificationSink};
use yield_arb_engine::config::{Config, PaperConfig};
use yield_arb_engine::ledger::{PositionLedger, TradeLog};
use yield_arb_engine::market::{BinanceMarketData, FundingRateSource, PriceOracle, StaticMarketData};
use yield_arb_engine::persistence::Store;
use yield_arb_engine::strategy::OpportunityScanner;
use yield_arb_engine::venue::{PaperChain, PaperVenue, VenueRegistry};
use yield_arb_engine::Engine;

/// Yield Arb Engine CLI
#[derive(Parser)]
#[command(name = "yield-arb-engine")]
#[command(version, about = "Multi-venue yield, hedge and arbitrage engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the session scheduler and monitors over paper venues (default)
    Run,

    /// Show persisted sessions, portfolio and trades for an owner
    Status {
        /// Path to SQLite database
        #[arg(short, long, default_value = "engine.db")]
        db: String,

        /// Owner to report on
        #[arg(short, long, default_value = "operator")]
        owner: String,

        /// Number of recent trades to show
        #[arg(short, long, default_value = "10")]
        trades: usize,
    },

    /// One-shot arbitrage scan over the paper venues
    Scan {
        /// Token to scan (defaults to the configured token)
        #[arg(short, long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Status { db, owner, trades }) => show_status(&db, &owner, trades),
        Some(Commands::Scan { token }) => run_scan(&config, token.as_deref()).await,
        Some(Commands::Run) | None => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Yield Arb Engine starting");
    log_config(&config);

    if let Some(parent) = Path::new(&config.engine.database_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = Arc::new(
        Store::new(&config.engine.database_path)
            .with_context(|| format!("Failed to open {}", config.engine.database_path))?,
    );

    let (prices, funding) = market_data(&config)?;
    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
    let engine = Engine::new(
        &config,
        store,
        paper_venues(&config.paper),
        prices,
        funding,
        sinks,
    );
    engine.activate_signer(&config.paper.owner, Arc::new(PaperChain::new(&config.paper.address)));

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let handles = engine.spawn_background(
        Duration::from_secs(config.engine.tick_interval_secs),
        Duration::from_secs(config.engine.monitor_interval_secs),
        shutdown.clone(),
    );
    info!(owner = %config.paper.owner, "Engine running, Ctrl-C to stop");

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    info!("Yield Arb Engine shutdown complete");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "yield-arb-engine.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("yield_arb_engine=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Database: {}", config.engine.database_path);
    info!(
        "   Tick: {}s, Monitor: {}s",
        config.engine.tick_interval_secs, config.engine.monitor_interval_secs
    );
    info!(
        "   Risk defaults: max position ${}, max exposure ${}, max slippage {} bps",
        config.risk.max_position_usd, config.risk.max_total_exposure_usd, config.risk.max_slippage_bps
    );
    info!(
        "   Scanner: {}/{} probe {}, viable at {} bps",
        config.scanner.token,
        config.scanner.quote_token,
        config.scanner.probe_amount,
        config.scanner.viable_spread_bps
    );
    info!(
        "   Market data: {}",
        if config.market_data.use_binance { "Binance" } else { "static paper prices" }
    );
    info!("   Paper venues: {}", config.paper.venues.len());
}

fn paper_venues(paper: &PaperConfig) -> VenueRegistry {
    paper
        .venues
        .iter()
        .fold(VenueRegistry::new(), |registry, venue| {
            registry.with(Arc::new(PaperVenue::from_config(venue)))
        })
}

fn market_data(config: &Config) -> Result<(Arc<dyn PriceOracle>, Arc<dyn FundingRateSource>)> {
    if config.market_data.use_binance {
        let binance = Arc::new(
            BinanceMarketData::new(&config.market_data).context("Failed to create Binance market data client")?,
        );
        return Ok((binance.clone(), binance));
    }

    let mut market = StaticMarketData::new();
    for (token, price) in &config.paper.prices {
        market = market.with_price(token, *price);
    }
    for (token, rate) in &config.paper.funding_rates {
        market = market.with_funding_rate(token, *rate);
    }
    let market = Arc::new(market);
    Ok((market.clone(), market))
}

async fn run_scan(config: &Config, token: Option<&str>) -> Result<()> {
    let scanner = OpportunityScanner::new(paper_venues(&config.paper), config.scanner.clone());
    let opportunities = match token {
        Some(token) => {
            scanner
                .scan(token, &config.scanner.quote_token, config.scanner.probe_amount)
                .await
        }
        None => scanner.scan_default().await,
    };

    if opportunities.is_empty() {
        println!("No arbitrage opportunities found.");
        return Ok(());
    }

    println!("Arbitrage opportunities ({}):", opportunities.len());
    for opp in &opportunities {
        println!(
            "   ├─ {} buy {} @ {} → sell {} @ {} | {:.2} bps | est ${:.4}{}",
            opp.id,
            opp.buy_venue,
            opp.buy_price,
            opp.sell_venue,
            opp.sell_price,
            opp.spread_bps,
            opp.estimated_profit_usd,
            if opp.viable { "" } else { " (below viable threshold)" }
        );
    }
    Ok(())
}

fn show_status(db_path: &str, owner: &str, trade_limit: usize) -> Result<()> {
    if !Path::new(db_path).exists() {
        println!("Database not found: {}", db_path);
        println!("   The engine has not run yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = Arc::new(Store::new(db_path).with_context(|| format!("Failed to open {}", db_path))?);

    println!("Status for {}", owner);

    match store.latest_session(owner)? {
        Some(session) => {
            println!("\nAuto-arb session {}", session.id);
            println!("   ├─ Status:     {}", session.status);
            println!("   ├─ Trades:     {}", session.trades_count);
            println!("   ├─ PnL:        ${:.4}", session.total_pnl_usd);
            println!("   ├─ Max loss:   ${}", session.max_loss_usd);
            println!("   ├─ Slippage:   {} bps", session.max_slippage_bps);
            println!("   └─ Expires:    {}", session.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("\nNo auto-arb sessions."),
    }

    let portfolio = PositionLedger::new(store.clone()).portfolio(owner)?;
    println!("\nPortfolio");
    println!("   ├─ Total value:  ${:.2}", portfolio.total_value_usd);
    println!("   ├─ Yield earned: ${:.4}", portfolio.yield_earned);
    println!("   ├─ Arb profits:  ${:.4}", portfolio.arb_profits);
    println!("   └─ Open:         {}", portfolio.positions.len());
    for position in &portfolio.positions {
        println!(
            "       {} {} {} {} @ {}",
            position.id,
            position.kind,
            position.amount,
            position.token,
            position.venue
        );
    }

    let trades = TradeLog::new(store).history(owner, Some(trade_limit), None)?;
    if !trades.is_empty() {
        println!("\nRecent trades");
        for trade in &trades {
            println!(
                "   ├─ {} {} {} {} → {} ({})",
                trade.executed_at.format("%Y-%m-%d %H:%M"),
                trade.kind,
                trade.venue,
                trade.from_token.as_deref().unwrap_or("-"),
                trade.to_token.as_deref().unwrap_or("-"),
                trade.settlement_tx_ref
            );
        }
    }

    println!();
    Ok(())
}
