// =============================================================================
// Signal Dispatcher
// =============================================================================
//
// The core never calls a sink directly (spec.md §4.6/§5): `SignalDispatcher`
// owns a bounded mpsc channel and a single background task that drains it
// into a `SignalSink`, so a slow or failing sink never blocks the analysis
// loop. `send` is a non-blocking `try_send`; a full queue drops the signal
// with a `warn!` rather than backing up the driver.
//
// `SignalSink` uses a plain `async fn` trait method under Rust's native
// async-fn-in-trait support (SPEC_FULL.md §6 decision): the donor never
// pulls in `async-trait`, and `SignalDispatcher` is generic over its sink
// rather than boxing it as `dyn SignalSink`, so no extra dependency or
// manual future-boxing is needed to keep the sink swappable.
//
// Grounded on the channel-plus-background-task shape used for streaming
// consumers in the pack (e.g. `connect_trade_stream`'s
// `(mpsc::Receiver<_>, JoinHandle<()>)` return in
// ForgeTrade-mcp-binance-rs's trade_stream.rs), adapted here to the sender
// side: the core holds the `Sender`, the dispatcher task holds the
// `Receiver`.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::CoreError;
use crate::types::Signal;

const DISPATCH_QUEUE_CAPACITY: usize = 256;

/// A downstream consumer of generated signals (webhook, PDF report, position
/// manager, ...). Implementations are expected to do their own I/O timeout
/// handling; a slow `deliver` only stalls the dispatcher task, never the
/// analysis loop.
pub trait SignalSink: Send + Sync + 'static {
    fn deliver(
        &self,
        signal: &Signal,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// A sink that logs signals via `tracing` — the default when no real
/// delivery target is configured.
pub struct LoggingSink;

impl SignalSink for LoggingSink {
    async fn deliver(&self, signal: &Signal) -> anyhow::Result<()> {
        tracing::info!(
            symbol = %signal.symbol,
            r#type = %signal.signal_type,
            strength = ?signal.strength,
            score = signal.score,
            "signal dispatched"
        );
        Ok(())
    }
}

/// Owns the bounded hand-off queue between the analysis loop and a
/// `SignalSink`. Cloning the dispatcher clones the sender, so every symbol's
/// driver task can hold its own handle onto the same queue.
#[derive(Clone)]
pub struct SignalDispatcher {
    tx: mpsc::Sender<Signal>,
}

impl SignalDispatcher {
    /// Spawn the background dispatcher task and return a handle to it plus
    /// its `JoinHandle`. The task runs until every `SignalDispatcher` clone
    /// (and thus every sender) is dropped.
    pub fn spawn<S: SignalSink>(sink: S) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);
        let handle = tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                if let Err(e) = sink.deliver(&signal).await {
                    let err = CoreError::Sink(e.to_string());
                    warn!(symbol = %signal.symbol, error = %err, "signal sink delivery failed");
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Queue a signal for delivery. Never blocks; a full queue drops the
    /// signal and logs a warning rather than stalling the analysis loop.
    pub fn send(&self, signal: Signal) {
        if let Err(e) = self.tx.try_send(signal) {
            warn!(error = %e, "signal dispatch queue full or closed, dropping signal");
        }
    }
}
