// =============================================================================
// Confluence Core — library surface
// =============================================================================
//
// Module layout mirrors SPEC_FULL.md's dependency order, leaves first: data
// model and error taxonomy, configuration, the validator/shaper, the six
// indicators, the confluence analyzer (fusion + cache), the signal generator,
// the quality metrics tracker, the dispatch queue, and finally the
// acquisition layer (`market_data`, `futures_intel`, `snapshot`) that feeds
// it all from the outside.

pub mod config;
pub mod confluence;
pub mod dispatch;
pub mod error;
pub mod futures_intel;
pub mod indicators;
pub mod market_data;
pub mod quality_tracker;
pub mod shaper;
pub mod signal_generator;
pub mod snapshot;
pub mod types;

pub use config::ConfluenceConfig;
pub use confluence::Analyzer;
pub use dispatch::{SignalDispatcher, SignalSink};
pub use quality_tracker::QualityMetricsTracker;
pub use signal_generator::SignalGenerator;
pub use snapshot::SnapshotBuilder;
