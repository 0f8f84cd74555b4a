//! # System Observer Broadcaster
//!
//! Lifecycle and runtime events fan out to every registered observer. The
//! broadcaster is an explicit loop with per-observer error capture: one observer
//! failing never prevents the rest from seeing the event. A default
//! [`ImmediateTracingObserver`] is present on every builder unless explicitly
//! removed, so the host is never silently unobservable.

use std::sync::Arc;

use tracing::{debug, info, warn};

/// Events emitted by the engine and its processes.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    EngineInitialized { process_count: usize },
    EngineStarted,
    EngineStopped { clean: bool },
    ProcessStarted { process: String },
    ProcessStopped { process: String, clean: bool },
    ProcessFailed { process: String, error: String },
    EnvelopeReceived { queue: String },
    EnvelopeDispatched { message_id: String, message_type: String },
    EnvelopeDuplicateSkipped { message_id: String },
    EnvelopeUnrouted { message_id: String, message_type: String },
    EnvelopeDeserializationFailed { queue: String, error: String },
    DispatchFailed { message_id: String, error: String },
}

/// Any unit that can receive system events may observe the engine.
///
/// Notification calls may arrive concurrently from multiple processes, so
/// implementations must be internally synchronized or stateless. A returned error
/// is captured and logged by the broadcaster; it does not stop delivery to the
/// remaining observers.
pub trait SystemObserver: Send + Sync {
    fn on_event(
        &self,
        event: &SystemEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Wraps N observers behind one observer surface; notification order is
/// registration order.
pub struct SystemObserverSet {
    observers: Vec<Box<dyn SystemObserver>>,
}

impl SystemObserverSet {
    pub fn new(observers: Vec<Box<dyn SystemObserver>>) -> Arc<Self> {
        Arc::new(Self { observers })
    }

    /// Delivers an event to every observer in order, isolating failures.
    pub fn notify(&self, event: &SystemEvent) {
        for observer in &self.observers {
            if let Err(error) = observer.on_event(event) {
                warn!(%error, ?event, "observer failed to process event");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Default observer: mirrors every system event onto the `tracing` stream as it
/// happens, with the severity the event deserves.
#[derive(Debug, Default)]
pub struct ImmediateTracingObserver;

impl SystemObserver for ImmediateTracingObserver {
    fn on_event(
        &self,
        event: &SystemEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match event {
            SystemEvent::EngineInitialized { process_count } => {
                info!(process_count, "Engine initialized")
            }
            SystemEvent::EngineStarted => info!("Engine started"),
            SystemEvent::EngineStopped { clean } => info!(clean, "Engine stopped"),
            SystemEvent::ProcessStarted { process } => info!(process, "Process started"),
            SystemEvent::ProcessStopped { process, clean } => {
                if *clean {
                    info!(process, "Process stopped")
                } else {
                    warn!(process, "Process did not stop within grace period, aborted")
                }
            }
            SystemEvent::ProcessFailed { process, error } => {
                warn!(process, error, "Process failed")
            }
            SystemEvent::EnvelopeReceived { queue } => debug!(queue, "Envelope received"),
            SystemEvent::EnvelopeDispatched {
                message_id,
                message_type,
            } => debug!(message_id, message_type, "Envelope dispatched"),
            SystemEvent::EnvelopeDuplicateSkipped { message_id } => {
                debug!(message_id, "Duplicate envelope skipped")
            }
            SystemEvent::EnvelopeUnrouted {
                message_id,
                message_type,
            } => warn!(message_id, message_type, "No handler for envelope"),
            SystemEvent::EnvelopeDeserializationFailed { queue, error } => {
                warn!(queue, error, "Envelope deserialization failed")
            }
            SystemEvent::DispatchFailed { message_id, error } => {
                warn!(message_id, error, "Dispatch failed")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SystemObserver for Recorder {
        fn on_event(
            &self,
            event: &SystemEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{:?}", self.label, std::mem::discriminant(event)));
            Ok(())
        }
    }

    struct AlwaysFails;

    impl SystemObserver for AlwaysFails {
        fn on_event(
            &self,
            _event: &SystemEvent,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("observer is broken".into())
        }
    }

    #[test]
    fn failing_observer_does_not_block_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let set = SystemObserverSet::new(vec![
            Box::new(Recorder {
                label: "first",
                log: Arc::clone(&log),
            }),
            Box::new(AlwaysFails),
            Box::new(Recorder {
                label: "third",
                log: Arc::clone(&log),
            }),
        ]);

        set.notify(&SystemEvent::EngineStarted);
        set.notify(&SystemEvent::EngineStopped { clean: true });

        let log = log.lock().unwrap();
        // Both surviving observers saw both events, in registration order.
        assert_eq!(log.len(), 4);
        assert!(log[0].starts_with("first:"));
        assert!(log[1].starts_with("third:"));
        assert!(log[2].starts_with("first:"));
        assert!(log[3].starts_with("third:"));
    }

    #[test]
    fn tracing_observer_accepts_every_event() {
        let observer = ImmediateTracingObserver;
        assert!(observer.on_event(&SystemEvent::EngineStarted).is_ok());
        assert!(observer
            .on_event(&SystemEvent::ProcessFailed {
                process: "dispatch-orders".to_string(),
                error: "boom".to_string(),
            })
            .is_ok());
    }
}
