// Typed error taxonomy for the confluence pipeline's own components.
//
// I/O boundaries (HTTP fetches, WebSocket streams, config persistence) still
// return `anyhow::Result`, matching the donor's own convention there. This
// enum exists only for the pipeline's internal error kinds, so call sites
// can match on error *kind* instead of grepping log strings. Indicator-level
// rejection/insufficient-data/numeric-anomaly outcomes are deliberately NOT
// represented here: spec.md §4.2 mandates indicators never error, only fall
// back to a neutral score, so those paths have nothing to construct.

use crate::types::IndicatorKind;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{indicator} exceeded its soft timeout")]
    IndicatorTimeout { indicator: IndicatorKind },

    #[error("analysis exceeded its hard timeout budget")]
    AnalysisTimeout,

    #[error("signal sink error: {0}")]
    Sink(String),

    #[error("quality metrics tracker I/O error: {0}")]
    TrackerIo(String),

    #[error("configuration error: {0}")]
    Config(String),
}
