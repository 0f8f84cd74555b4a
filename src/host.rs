//! # Engine Host
//!
//! The assembled runtime and supervision root. The host owns the resolved scope
//! and the process set; it moves through `Created -> Initialized -> Running ->
//! Stopped`, spawns every process on its own tokio task, and on stop broadcasts
//! one cooperative shutdown signal, waits a bounded grace period per process,
//! force-aborts stragglers, and releases the scope exactly once.
//!
//! One process failing never silently aborts the others: every start, stop, and
//! failure is reported through the observer broadcaster, and aggregate health is
//! tracked on the host.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::observer::{SystemEvent, SystemObserverSet};
use crate::process::{EngineProcess, ShutdownSignal};
use crate::registry::EngineScope;

/// Lifecycle states of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl HostState {
    fn name(self) -> &'static str {
        match self {
            HostState::Created => "Created",
            HostState::Initialized => "Initialized",
            HostState::Running => "Running",
            HostState::Stopped => "Stopped",
        }
    }
}

struct SupervisedProcess {
    name: String,
    handle: JoinHandle<()>,
}

/// The running engine: resolved scope, observer broadcaster, supervised
/// process set.
pub struct EngineHost {
    state: HostState,
    scope: Option<EngineScope>,
    observers: Arc<SystemObserverSet>,
    processes: Vec<Box<dyn EngineProcess>>,
    running: Vec<SupervisedProcess>,
    shutdown: broadcast::Sender<()>,
    failed: Arc<AtomicUsize>,
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("state", &self.state)
            .field("running", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl EngineHost {
    pub(crate) fn new(
        scope: EngineScope,
        observers: Arc<SystemObserverSet>,
        processes: Vec<Box<dyn EngineProcess>>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            state: HostState::Created,
            scope: Some(scope),
            observers,
            processes,
            running: Vec::new(),
            shutdown,
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// The resolved dependency scope, until the host releases it on stop.
    pub fn scope(&self) -> Option<&EngineScope> {
        self.scope.as_ref()
    }

    /// Number of processes that have terminated with an error so far.
    pub fn failed_processes(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn is_healthy(&self) -> bool {
        self.failed_processes() == 0
    }

    /// Prepares every process without starting any work. Called by `build()`.
    pub(crate) fn initialize(&mut self) -> Result<(), EngineError> {
        if self.state != HostState::Created {
            return Err(EngineError::InvalidState {
                expected: HostState::Created.name(),
                actual: self.state.name(),
            });
        }
        for process in &mut self.processes {
            process.initialize()?;
        }
        self.state = HostState::Initialized;
        self.observers.notify(&SystemEvent::EngineInitialized {
            process_count: self.processes.len(),
        });
        Ok(())
    }

    /// Transitions every process from idle to running, each on its own task.
    ///
    /// A process that later fails is reported through the observer broadcaster
    /// and counted against aggregate health; the others keep running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != HostState::Initialized {
            return Err(EngineError::InvalidState {
                expected: HostState::Initialized.name(),
                actual: self.state.name(),
            });
        }

        for process in self.processes.drain(..) {
            let name = process.name().to_string();
            self.observers.notify(&SystemEvent::ProcessStarted {
                process: name.clone(),
            });

            let signal = ShutdownSignal::new(self.shutdown.subscribe());
            let observers = Arc::clone(&self.observers);
            let failed = Arc::clone(&self.failed);
            let task_name = name.clone();
            let handle = tokio::spawn(async move {
                match process.run(signal).await {
                    Ok(()) => observers.notify(&SystemEvent::ProcessStopped {
                        process: task_name,
                        clean: true,
                    }),
                    Err(error) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        observers.notify(&SystemEvent::ProcessFailed {
                            process: task_name,
                            error: error.to_string(),
                        });
                    }
                }
            });
            self.running.push(SupervisedProcess { name, handle });
        }

        self.state = HostState::Running;
        self.observers.notify(&SystemEvent::EngineStarted);
        info!(processes = self.running.len(), "engine host running");
        Ok(())
    }

    /// Stops every process: broadcast the cooperative signal, wait up to `grace`
    /// per process, force-abort anything still running, then release the scope.
    ///
    /// Best-effort, collect-and-report: one process failing to stop never aborts
    /// the sweep. Stopping an already stopped host is a no-op.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), EngineError> {
        if self.state == HostState::Stopped {
            return Ok(());
        }

        // Receivers may all be gone already (no processes started); that is fine.
        let _ = self.shutdown.send(());

        let mut clean = true;
        for mut supervised in self.running.drain(..) {
            match timeout(grace, &mut supervised.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    clean = false;
                    self.failed.fetch_add(1, Ordering::SeqCst);
                    self.observers.notify(&SystemEvent::ProcessFailed {
                        process: supervised.name.clone(),
                        error: join_error.to_string(),
                    });
                }
                Err(_elapsed) => {
                    clean = false;
                    warn!(process = %supervised.name, "grace period elapsed, aborting");
                    supervised.handle.abort();
                    self.observers.notify(&SystemEvent::ProcessStopped {
                        process: supervised.name.clone(),
                        clean: false,
                    });
                }
            }
        }

        // Release the owned lifetime scope exactly once.
        self.scope = None;
        self.state = HostState::Stopped;
        self.observers.notify(&SystemEvent::EngineStopped {
            clean: clean && self.is_healthy(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ComponentRegistry;
    use async_trait::async_trait;

    struct Obedient;

    #[async_trait]
    impl EngineProcess for Obedient {
        fn name(&self) -> &str {
            "obedient"
        }

        async fn run(self: Box<Self>, mut shutdown: ShutdownSignal) -> Result<(), EngineError> {
            shutdown.recv().await;
            Ok(())
        }
    }

    struct Stubborn;

    #[async_trait]
    impl EngineProcess for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        async fn run(self: Box<Self>, _shutdown: ShutdownSignal) -> Result<(), EngineError> {
            // Ignores the stop signal entirely.
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    }

    fn host_with(processes: Vec<Box<dyn EngineProcess>>) -> EngineHost {
        let scope = ComponentRegistry::new().snapshot();
        let observers = SystemObserverSet::new(Vec::new());
        EngineHost::new(scope, observers, processes)
    }

    #[tokio::test]
    async fn lifecycle_runs_created_to_stopped() {
        let mut host = host_with(vec![Box::new(Obedient)]);
        assert_eq!(host.state(), HostState::Created);

        host.initialize().unwrap();
        assert_eq!(host.state(), HostState::Initialized);

        host.start().unwrap();
        assert_eq!(host.state(), HostState::Running);
        assert!(host.scope().is_some());

        host.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(host.state(), HostState::Stopped);
        assert!(host.scope().is_none());
        assert!(host.is_healthy());
    }

    #[tokio::test]
    async fn stubborn_process_is_aborted_after_grace() {
        let mut host = host_with(vec![Box::new(Obedient), Box::new(Stubborn)]);
        host.initialize().unwrap();
        host.start().unwrap();

        let started = std::time::Instant::now();
        host.stop(Duration::from_millis(100)).await.unwrap();
        // Stop completed despite the stubborn process, within bounded time.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(host.state(), HostState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut host = host_with(vec![Box::new(Obedient)]);
        host.initialize().unwrap();
        host.start().unwrap();
        host.stop(Duration::from_secs(1)).await.unwrap();
        host.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(host.state(), HostState::Stopped);
    }

    #[test]
    fn debug_output_reports_the_state() {
        let host = host_with(Vec::new());
        assert!(format!("{host:?}").contains("Created"));
    }

    #[tokio::test]
    async fn start_requires_initialized_state() {
        let mut host = host_with(vec![Box::new(Obedient)]);
        let err = host.start().unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }
}
