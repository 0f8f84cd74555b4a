//! # Dispatch Engine
//!
//! A message-dispatch host: envelopes arrive from queue-like transports, get
//! routed to registered handlers, and are serialized/deserialized under pluggable
//! contracts. The crate's core is the composition and supervision subsystem — an
//! ordered build phase that turns declarative registrations into a live host, and
//! the host's own lifecycle.
//!
//! ## Architecture Overview
//!
//! Configuration and runtime are strictly separated:
//!
//! 1. **Build phase** ([`EngineBuilder`]) — a pure accumulator. Transports,
//!    message contracts, dispatch routes, and observers are declared; nothing
//!    resolves and no I/O happens until `build()`.
//! 2. **Configure ordering** — `build()` registers built-ins, applies modules in
//!    enlistment order, wires the observer broadcaster first, applies the domain
//!    directory *before* serialization (the directory is what populates the
//!    contract registry), applies storage *before* the registry freezes, then
//!    materializes deferred writer factories and processes in one pass. Any
//!    failure aborts the build; a partial host is never returned.
//! 3. **Runtime** ([`EngineHost`]) — the supervision root. Every
//!    [`EngineProcess`] runs on its own tokio task; shared state is limited to
//!    the explicitly thread-safe components (frozen contracts, the streamer, the
//!    duplication manager, the broadcaster).
//!
//! ## Delivery semantics
//!
//! Transports provide at-least-once delivery. The [`MessageDuplicationManager`]
//! is the idempotency backstop: the dispatch loop checks it before invoking a
//! handler and marks the identity only after success, yielding
//! at-least-once-delivered, at-most-once-effectively-processed behavior.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use dispatch_engine::{EngineBuilder, MessageEnvelope};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = EngineBuilder::new();
//!     builder.domain(|directory| {
//!         directory.handle::<OrderPlaced, _>("OrderPlaced", |order| {
//!             println!("order {} placed", order.order_id);
//!             Ok(())
//!         });
//!     });
//!     builder.memory(|memory| {
//!         memory.add_memory_process("orders");
//!     });
//!
//!     let mut host = builder.build()?;
//!     host.start()?;
//!
//!     let scope = host.scope().ok_or("host already stopped")?;
//!     let writers = scope.resolve::<dispatch_engine::QueueWriterRegistry>()?;
//!     let streamer = scope.resolve::<dispatch_engine::EnvelopeStreamer>()?;
//!     let writer = writers.get("memory")?.create_writer("orders")?;
//!     let bytes = streamer.save(&MessageEnvelope::new(OrderPlaced { order_id: 1 }))?;
//!     writer.put(bytes).await?;
//!
//!     host.stop(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod contracts;
pub mod dedup;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod file;
pub mod host;
pub mod memory;
pub mod observer;
pub mod outbox;
pub mod process;
pub mod registry;
pub mod serialize;
pub mod storage;
pub mod tracing;

// Re-export core types for convenience
pub use builder::{AdvancedBuilder, EngineBuilder};
pub use contracts::{ContractRegistry, ContractSet, MessageContract};
pub use dedup::MessageDuplicationManager;
pub use dispatch::{
    DispatchDirectory, DispatchDirectoryModule, DispatcherProcess, MessageHandler, QueueReader,
};
pub use envelope::MessageEnvelope;
pub use error::{DispatchError, EngineError, SerializationError, TransportError};
pub use host::{EngineHost, HostState};
pub use observer::{ImmediateTracingObserver, SystemEvent, SystemObserver, SystemObserverSet};
pub use outbox::{QueueWriter, QueueWriterFactory, QueueWriterRegistry};
pub use process::{EngineProcess, ShutdownSignal};
pub use registry::{ComponentRegistry, EngineModule, EngineScope};
pub use serialize::{DataSerializer, EnvelopeSerializer, EnvelopeStreamer, WireEnvelope};
pub use storage::{StorageAccount, StorageModule};
