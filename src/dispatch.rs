//! # Dispatch Directory & Dispatcher Process
//!
//! The routing side of the engine. A [`DispatchDirectoryModule`] is the
//! configuration-time surface: it declares message types into the contract
//! registry and binds handlers into the [`DispatchDirectory`]. The
//! [`DispatcherProcess`] is the runtime loop: it drains one queue, decodes each
//! envelope, consults the duplication manager, and routes to the registered
//! handler — marking the identity as processed only after the handler succeeds,
//! so a crash mid-handling results in reprocessing rather than loss.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::contracts::ContractRegistry;
use crate::dedup::MessageDuplicationManager;
use crate::envelope::MessageEnvelope;
use crate::error::{DispatchError, EngineError, TransportError};
use crate::observer::{SystemEvent, SystemObserverSet};
use crate::process::{EngineProcess, ShutdownSignal};
use crate::registry::{ComponentRegistry, EngineScope};
use crate::serialize::EnvelopeStreamer;

/// Any unit that can receive a decoded envelope may be a dispatch target.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), DispatchError>;
}

/// Adapts a plain closure over a concrete message type into a handler.
///
/// The payload is downcast and cloned out of the envelope, so the closure owns
/// its message; a payload of the wrong runtime type is a dispatch error.
pub struct FnHandler<T, F> {
    handler: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> FnHandler<T, F> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> MessageHandler for FnHandler<T, F>
where
    T: Any + Clone + Send + Sync,
    F: Fn(T) -> Result<(), DispatchError> + Send + Sync,
{
    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), DispatchError> {
        let payload = envelope
            .payload_as::<T>()
            .ok_or(DispatchError::PayloadType(std::any::type_name::<T>()))?
            .clone();
        (self.handler)(payload)
    }
}

/// Routing rules: message-type name to handler. Read-only after the build phase,
/// safe for concurrent lookups from every dispatch process.
#[derive(Default)]
pub struct DispatchDirectory {
    routes: HashMap<String, Arc<dyn MessageHandler>>,
}

impl DispatchDirectory {
    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.routes.insert(name.into(), handler);
    }

    pub fn handler_for(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.routes.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

type Declaration =
    Box<dyn FnOnce(&mut DispatchDirectory, &mut ContractRegistry) -> Result<(), EngineError> + Send>;

/// Configuration-time accumulator for message-type declarations and routes.
///
/// Applied during the Configure phase, strictly before serialization is wired:
/// this module is what populates the contract registry with the message types the
/// data serializer needs to know about.
#[derive(Default)]
pub struct DispatchDirectoryModule {
    declarations: Vec<Declaration>,
}

impl DispatchDirectoryModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a message type without routing it (send-only types).
    pub fn message<T>(&mut self, name: impl Into<String>)
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        let name = name.into();
        self.declarations.push(Box::new(move |_directory, contracts| {
            contracts.register::<T>(name)
        }));
    }

    /// Declares a message type and routes it to a closure handler.
    pub fn handle<T, F>(&mut self, name: impl Into<String>, handler: F)
    where
        T: Serialize + DeserializeOwned + Any + Clone + Send + Sync,
        F: Fn(T) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        let name = name.into();
        self.declarations.push(Box::new(move |directory, contracts| {
            contracts.register::<T>(name.clone())?;
            directory.insert(name, Arc::new(FnHandler::<T, F>::new(handler)));
            Ok(())
        }));
    }

    /// Routes an already-declared message type to a custom handler.
    pub fn route(&mut self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let name = name.into();
        self.declarations.push(Box::new(move |directory, _contracts| {
            directory.insert(name, handler);
            Ok(())
        }));
    }

    /// Applies every declaration in order and registers the finished directory.
    pub fn configure(
        self,
        registry: &mut ComponentRegistry,
        contracts: &mut ContractRegistry,
    ) -> Result<(), EngineError> {
        let mut directory = DispatchDirectory::default();
        for declaration in self.declarations {
            declaration(&mut directory, contracts)?;
        }
        debug!(
            routes = directory.len(),
            contracts = contracts.len(),
            "dispatch directory configured"
        );
        registry.register_arc(Arc::new(directory));
        Ok(())
    }
}

/// Inbound side of a transport: yields encoded envelopes for one queue.
///
/// `receive` may block on I/O; that blocking is confined to the owning process.
/// Returning `Ok(None)` means the source is closed and the process should end.
#[async_trait]
pub trait QueueReader: Send {
    fn queue(&self) -> &str;

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Acknowledges the envelope returned by the last `receive`.
    ///
    /// Called by the dispatch loop after the dispatch attempt completes, so a
    /// durable transport releases its copy only once the envelope has been
    /// through the pipeline; a crash in between leads to redelivery. Default is
    /// a no-op for transports without durable hand-off.
    async fn ack(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// The dispatch loop for one queue.
///
/// Per message: decode (failure → observer event, continue), dedup check
/// (duplicate → skipped, continue), route (unrouted → observer event, continue),
/// handle (error → observer event, identity NOT marked), mark processed, then
/// acknowledge the transport so durable copies outlive a crash mid-pipeline.
pub struct DispatcherProcess {
    name: String,
    reader: Box<dyn QueueReader>,
    streamer: Arc<EnvelopeStreamer>,
    directory: Arc<DispatchDirectory>,
    dedup: Arc<MessageDuplicationManager>,
    observers: Arc<SystemObserverSet>,
}

impl DispatcherProcess {
    /// Wires a dispatcher for `reader`'s queue from the resolved scope.
    pub fn from_scope(reader: Box<dyn QueueReader>, scope: &EngineScope) -> Result<Self, EngineError> {
        Ok(Self {
            name: format!("dispatch-{}", reader.queue()),
            reader,
            streamer: scope.resolve::<EnvelopeStreamer>()?,
            directory: scope.resolve::<DispatchDirectory>()?,
            dedup: scope.resolve::<MessageDuplicationManager>()?,
            observers: scope.resolve::<SystemObserverSet>()?,
        })
    }
}

#[async_trait]
impl EngineProcess for DispatcherProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, mut shutdown: ShutdownSignal) -> Result<(), EngineError> {
        let Self {
            name,
            mut reader,
            streamer,
            directory,
            dedup,
            observers,
        } = *self;
        let queue = reader.queue().to_string();
        info!(process = %name, queue = %queue, "dispatcher running");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(process = %name, "dispatcher stopping");
                    break;
                }
                received = reader.receive() => match received {
                    Ok(Some(bytes)) => {
                        dispatch_bytes(&queue, &bytes, &streamer, &directory, &dedup, &observers).await;
                        if let Err(error) = reader.ack().await {
                            warn!(process = %name, %error, "failed to acknowledge envelope");
                        }
                    }
                    Ok(None) => {
                        info!(process = %name, "queue closed, dispatcher ending");
                        break;
                    }
                    Err(error) => {
                        // Transport errors are local to this process; report and
                        // keep draining.
                        warn!(process = %name, %error, "transport receive error");
                    }
                },
            }
        }
        Ok(())
    }
}

async fn dispatch_bytes(
    queue: &str,
    bytes: &[u8],
    streamer: &EnvelopeStreamer,
    directory: &DispatchDirectory,
    dedup: &MessageDuplicationManager,
    observers: &SystemObserverSet,
) {
    observers.notify(&SystemEvent::EnvelopeReceived {
        queue: queue.to_string(),
    });

    let envelope = match streamer.open(bytes) {
        Ok(envelope) => envelope,
        Err(error) => {
            observers.notify(&SystemEvent::EnvelopeDeserializationFailed {
                queue: queue.to_string(),
                error: error.to_string(),
            });
            return;
        }
    };

    if dedup.has_been_processed(envelope.message_id()) {
        observers.notify(&SystemEvent::EnvelopeDuplicateSkipped {
            message_id: envelope.message_id().to_string(),
        });
        return;
    }

    let Some(handler) = directory.handler_for(envelope.message_type()) else {
        observers.notify(&SystemEvent::EnvelopeUnrouted {
            message_id: envelope.message_id().to_string(),
            message_type: envelope.message_type().to_string(),
        });
        return;
    };

    match handler.handle(&envelope).await {
        Ok(()) => {
            // Mark only after success: a failure here must lead to reprocessing.
            dedup.mark_processed(envelope.message_id());
            observers.notify(&SystemEvent::EnvelopeDispatched {
                message_id: envelope.message_id().to_string(),
                message_type: envelope.message_type().to_string(),
            });
        }
        Err(error) => {
            observers.notify(&SystemEvent::DispatchFailed {
                message_id: envelope.message_id().to_string(),
                error: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[tokio::test]
    async fn fn_handler_downcasts_and_invokes() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler = FnHandler::<Ping, _>::new(move |ping: Ping| {
            seen.fetch_add(ping.seq as usize, Ordering::SeqCst);
            Ok(())
        });

        let envelope = MessageEnvelope::new(Ping { seq: 5 });
        handler.handle(&envelope).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn handler_runs_on_a_spawned_task() {
        // Dispatch happens inside tokio::spawn, so the handle future (and the
        // envelope it borrows) must be Send.
        let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler::<Ping, _>::new(|_: Ping| Ok(())));
        let envelope = MessageEnvelope::new(Ping { seq: 1 });
        let task = tokio::spawn(async move { handler.handle(&envelope).await });
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fn_handler_rejects_wrong_payload_type() {
        let handler = FnHandler::<Ping, _>::new(|_: Ping| Ok(()));
        let envelope = MessageEnvelope::new("not a ping".to_string());
        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, DispatchError::PayloadType(_)));
    }

    #[test]
    fn directory_module_populates_contracts_and_routes() {
        let mut module = DispatchDirectoryModule::new();
        module.handle::<Ping, _>("Ping", |_| Ok(()));

        let mut registry = ComponentRegistry::new();
        let mut contracts = ContractRegistry::new();
        module.configure(&mut registry, &mut contracts).unwrap();

        assert_eq!(contracts.len(), 1);
        let directory = registry.snapshot().resolve::<DispatchDirectory>().unwrap();
        assert!(directory.handler_for("Ping").is_some());
        assert!(directory.handler_for("Pong").is_none());
    }
}
