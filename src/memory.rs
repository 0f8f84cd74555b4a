//! # In-Memory Transport
//!
//! The default transport: named partitions over tokio mpsc channels inside one
//! shared [`MemoryAccount`]. Writers and readers for the same queue name share a
//! partition, so an envelope put through the `"memory"` endpoint is deliverable to
//! the dispatcher listening on that queue in the same host.
//!
//! A default `MemoryAccount` and the `"memory"` writer factory are always
//! registered by the builder, so a host works out of the box with no transport
//! configuration at all.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::dispatch::{DispatcherProcess, QueueReader};
use crate::error::{EngineError, TransportError};
use crate::outbox::{QueueWriter, QueueWriterFactory};
use crate::process::EngineProcess;
use crate::registry::{ComponentRegistry, EngineModule};

/// One queue: an unbounded channel shared between writers and the reader.
#[derive(Clone)]
struct MemoryPartition {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

/// The account/identity value for the in-memory transport: a shared map of named
/// partitions. Cloning shares the same partitions.
#[derive(Clone, Default)]
pub struct MemoryAccount {
    partitions: Arc<Mutex<HashMap<String, MemoryPartition>>>,
}

impl MemoryAccount {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, queue: &str) -> MemoryPartition {
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions
            .entry(queue.to_string())
            .or_insert_with(|| {
                debug!(queue, "memory partition created");
                let (sender, receiver) = mpsc::unbounded_channel();
                MemoryPartition {
                    sender,
                    receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                }
            })
            .clone()
    }

    pub fn writer(&self, queue: &str) -> MemoryQueueWriter {
        let partition = self.partition(queue);
        MemoryQueueWriter {
            queue: queue.to_string(),
            sender: partition.sender,
        }
    }

    pub fn reader(&self, queue: &str) -> MemoryQueueReader {
        let partition = self.partition(queue);
        MemoryQueueReader {
            queue: queue.to_string(),
            receiver: partition.receiver,
        }
    }
}

/// Outbound channel into one memory partition.
pub struct MemoryQueueWriter {
    queue: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl QueueWriter for MemoryQueueWriter {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.sender
            .send(bytes)
            .map_err(|_| TransportError::QueueClosed(self.queue.clone()))
    }
}

/// Inbound side of one memory partition.
pub struct MemoryQueueReader {
    queue: String,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

#[async_trait]
impl QueueReader for MemoryQueueReader {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut receiver = self.receiver.lock().await;
        Ok(receiver.recv().await)
    }
}

/// Writer factory for the `"memory"` endpoint.
pub struct MemoryQueueWriterFactory {
    account: Arc<MemoryAccount>,
}

impl MemoryQueueWriterFactory {
    pub fn new(account: Arc<MemoryAccount>) -> Self {
        Self { account }
    }
}

impl QueueWriterFactory for MemoryQueueWriterFactory {
    fn endpoint(&self) -> &str {
        "memory"
    }

    fn create_writer(&self, queue: &str) -> Result<Arc<dyn QueueWriter>, TransportError> {
        Ok(Arc::new(self.account.writer(queue)))
    }
}

/// Configuration module: one dispatcher process per registered queue name.
#[derive(Default)]
pub struct MemoryModule {
    queues: Vec<String>,
}

impl MemoryModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dispatch process draining the named memory queue.
    pub fn add_memory_process(&mut self, queue: impl Into<String>) -> &mut Self {
        self.queues.push(queue.into());
        self
    }
}

impl EngineModule for MemoryModule {
    fn configure(self: Box<Self>, registry: &mut ComponentRegistry) -> Result<(), EngineError> {
        for queue in self.queues {
            registry.register_process(Box::new(move |scope| {
                let account = scope.resolve::<MemoryAccount>()?;
                let reader = account.reader(&queue);
                let process = DispatcherProcess::from_scope(Box::new(reader), scope)?;
                Ok(Box::new(process) as Box<dyn EngineProcess>)
            }));
        }
        Ok(())
    }
}
