// =============================================================================
// Confluence Core — Main Entry Point
// =============================================================================
//
// Thin wiring only: build the acquisition layer (kline/orderbook/trade
// WebSocket streams plus a futures-intel poller), run one driver loop per
// symbol that turns acquisition state into a `MarketSnapshot`, feeds it
// through the analyzer and signal generator, and hands the result to the
// quality tracker and the dispatch queue. No trading logic lives here.

mod config;
mod confluence;
mod dispatch;
mod error;
mod futures_intel;
mod indicators;
mod market_data;
mod quality_tracker;
mod shaper;
mod signal_generator;
mod snapshot;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ConfluenceConfig;
use crate::confluence::Analyzer;
use crate::dispatch::{LoggingSink, SignalDispatcher};
use crate::futures_intel::{FundingRateMonitor, FuturesIntelCache, LongShortMonitor, OpenInterestTracker};
use crate::market_data::{CandleBuffer, OrderBookManager, TradeStreamProcessor};
use crate::quality_tracker::QualityMetricsTracker;
use crate::signal_generator::SignalGenerator;
use crate::snapshot::SnapshotBuilder;

const CONFIG_PATH: &str = "confluence_config.json";
const MAX_CANDLES_PER_SYMBOL_INTERVAL: usize = 500;
const FUTURES_INTEL_POLL_SECS: u64 = 60;
const ANALYSIS_INTERVAL_SECS: u64 = 5;
const STREAM_RECONNECT_DELAY_SECS: u64 = 5;

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".into(), "ETHUSDT".into(), "BNBUSDT".into(), "SOLUSDT".into()]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("confluence-core starting up");

    let config = Arc::new(ConfluenceConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load confluence config, using defaults");
        ConfluenceConfig::default()
    }));

    let symbols: Vec<String> = std::env::var("CONFLUENCE_SYMBOLS")
        .ok()
        .map(|s| {
            s.split(',')
                .map(|sym| sym.trim().to_uppercase())
                .filter(|sym| !sym.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(default_symbols);

    info!(symbols = ?symbols, "configured symbols");

    // ── Acquisition layer ───────────────────────────────────────────────
    let candles = Arc::new(CandleBuffer::new(MAX_CANDLES_PER_SYMBOL_INTERVAL));
    let orderbooks = Arc::new(OrderBookManager::new());
    let futures_intel = Arc::new(FuturesIntelCache::new());
    let funding_monitor = Arc::new(FundingRateMonitor::new());
    let long_short_monitor = Arc::new(LongShortMonitor::new());
    let open_interest_tracker = Arc::new(OpenInterestTracker::new());

    let snapshot_builder = Arc::new(SnapshotBuilder::new(
        candles.clone(),
        orderbooks.clone(),
        futures_intel.clone(),
        config.timeframes.clone(),
    ));

    for symbol in &symbols {
        let cb = candles.clone();
        let sym = symbol.clone();
        let base_interval = config.timeframes.base.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::candle_buffer::run_kline_stream(&sym, &base_interval, &cb).await {
                    error!(symbol = %sym, interval = %base_interval, error = %e, "kline stream error, reconnecting");
                }
                tokio::time::sleep(Duration::from_secs(STREAM_RECONNECT_DELAY_SECS)).await;
            }
        });

        for interval in [config.timeframes.ltf.clone(), config.timeframes.mtf.clone(), config.timeframes.htf.clone()] {
            let cb = candles.clone();
            let sym = symbol.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(e) = market_data::candle_buffer::run_kline_stream(&sym, &interval, &cb).await {
                        error!(symbol = %sym, interval = %interval, error = %e, "kline stream error, reconnecting");
                    }
                    tokio::time::sleep(Duration::from_secs(STREAM_RECONNECT_DELAY_SECS)).await;
                }
            });
        }

        let ob = orderbooks.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::orderbook::run_depth_stream(&sym, &ob).await {
                    error!(symbol = %sym, error = %e, "depth stream error, reconnecting");
                }
                tokio::time::sleep(Duration::from_secs(STREAM_RECONNECT_DELAY_SECS)).await;
            }
        });

        let processor = Arc::new(TradeStreamProcessor::new(symbol.clone()));
        snapshot_builder.register_trade_processor(symbol, processor.clone());
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::trade_stream::run_trade_stream(&sym, &processor).await {
                    error!(symbol = %sym, error = %e, "trade stream error, reconnecting");
                }
                tokio::time::sleep(Duration::from_secs(STREAM_RECONNECT_DELAY_SECS)).await;
            }
        });
    }

    // ── Futures intelligence poller ─────────────────────────────────────
    for symbol in &symbols {
        let intel = futures_intel.clone();
        let funding = funding_monitor.clone();
        let long_short = long_short_monitor.clone();
        let open_interest = open_interest_tracker.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(FUTURES_INTEL_POLL_SECS));
            loop {
                interval.tick().await;
                intel.refresh(&sym, &funding, &long_short, &open_interest).await;
            }
        });
    }

    info!(count = symbols.len(), "acquisition streams launched");

    // ── Core pipeline ────────────────────────────────────────────────────
    let analyzer = Arc::new(Analyzer::new(config.clone()));
    let generator = Arc::new(SignalGenerator::new(config.clone()));
    let tracker = Arc::new(QualityMetricsTracker::new(&config.tracker.log_dir, config.tracker.cache_capacity)?);
    let (dispatcher, dispatcher_handle) = SignalDispatcher::spawn(LoggingSink);

    for symbol in &symbols {
        let builder = snapshot_builder.clone();
        let analyzer = analyzer.clone();
        let generator = generator.clone();
        let tracker = tracker.clone();
        let dispatcher = dispatcher.clone();
        let sym = symbol.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(ANALYSIS_INTERVAL_SECS));
            loop {
                interval.tick().await;

                let timestamp_ms = chrono::Utc::now().timestamp_millis();
                let Some(snapshot) = builder.build(&sym, timestamp_ms) else {
                    continue;
                };
                let price = snapshot.ticker.as_ref().and_then(|t| t.last).unwrap_or(0.0);

                let fusion = analyzer.analyze(&snapshot).await;
                let outcome = generator.generate(&fusion, &sym, timestamp_ms, price);

                if let Err(e) = tracker.log(outcome.quality_record) {
                    warn!(symbol = %sym, error = %e, "failed to log quality record");
                }

                if let Some(signal) = outcome.signal {
                    dispatcher.send(signal);
                }
            }
        });
    }

    info!("all subsystems running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");
    drop(dispatcher);
    let _ = dispatcher_handle.await;

    info!("confluence-core shut down complete");
    Ok(())
}
