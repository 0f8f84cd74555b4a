//! # Engine Errors
//!
//! Error taxonomy for the engine, grouped by phase: configuration and resolution
//! failures abort `build()` synchronously; transport, serialization, and dispatch
//! failures are recoverable at runtime and surface through the observer stream.

use thiserror::Error;

/// Fatal errors raised while assembling or supervising the engine.
///
/// Every variant produced during the build phase propagates synchronously to the
/// caller of [`EngineBuilder::build`](crate::builder::EngineBuilder::build); a
/// failed build never returns a partial host.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or conflicting configuration (e.g. duplicate contract names,
    /// registration against a frozen registry).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A component could not be resolved from the engine scope.
    #[error("resolution error: no component registered for {0}")]
    Resolution(&'static str),

    /// The host was asked to transition from a state that does not allow it.
    #[error("invalid host state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors local to a transport: factory construction, endpoint lookup, I/O.
///
/// At build time a factory error aborts the build; at runtime a transport error is
/// confined to its own process and reported via the observer broadcaster.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Lookup of an unregistered endpoint name. Misconfiguration, recoverable.
    #[error("no queue writer factory registered for endpoint: {0}")]
    EndpointNotFound(String),

    #[error("queue {0} is closed")]
    QueueClosed(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-message codec failures. Always recoverable: the dispatch loop reports them
/// and moves on, it never crashes the host.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// The envelope names a message type with no contract in the frozen set.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// The payload's runtime type does not match the contract it was encoded under.
    #[error("payload type mismatch for contract {0}")]
    PayloadTypeMismatch(String),

    #[error("failed to encode {context}: {source}")]
    Encode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while routing a decoded envelope to its handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("envelope payload is not a {0}")]
    PayloadType(&'static str),

    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    /// Wraps an arbitrary handler error, mirroring how entity errors are boxed at
    /// the framework boundary.
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DispatchError::Handler(Box::new(err))
    }
}
