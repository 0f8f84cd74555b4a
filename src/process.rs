//! # Engine Processes
//!
//! A process is any long-running unit the host supervises: a dispatch loop, a
//! queue listener, a maintenance sweep. Each runs on its own tokio task and shares
//! mutable state with nothing except the explicitly thread-safe components it
//! resolved from the scope.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::EngineError;

/// Initialize/run contract for supervised processes.
#[async_trait]
pub trait EngineProcess: Send {
    /// Stable name used in observer events and logs.
    fn name(&self) -> &str;

    /// Prepares the process without starting any work. Called once by the host
    /// during `build()`, before anything runs.
    fn initialize(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Runs until the shutdown signal fires or the work source closes.
    async fn run(self: Box<Self>, shutdown: ShutdownSignal) -> Result<(), EngineError>;
}

/// Cooperative stop signal handed to every process at start.
///
/// Wraps a broadcast receiver so the host can stop all processes with one send;
/// `recv` resolves once the host has requested shutdown (including if the request
/// happened before the process subscribed its first await).
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    pub(crate) fn new(receiver: broadcast::Receiver<()>) -> Self {
        Self { receiver }
    }

    /// Completes when shutdown has been requested.
    pub async fn recv(&mut self) {
        // A lagged or closed channel both mean "stop": the sender only ever
        // broadcasts the one shutdown message.
        let _ = self.receiver.recv().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_resolves_after_broadcast() {
        let (tx, rx) = broadcast::channel(1);
        let mut signal = ShutdownSignal::new(rx);
        tx.send(()).unwrap();
        signal.recv().await;
    }

    #[tokio::test]
    async fn signal_resolves_when_sender_dropped() {
        let (tx, rx) = broadcast::channel(1);
        let mut signal = ShutdownSignal::new(rx);
        drop(tx);
        signal.recv().await;
    }
}
