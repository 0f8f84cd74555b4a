//! # Queue Writer Registry
//!
//! Outbound side of the transports. A [`QueueWriterFactory`] produces writers for
//! the queues of one endpoint (one transport); the [`QueueWriterRegistry`] is the
//! endpoint-name lookup built once during the build phase and read-only afterward.
//! Asking for an unregistered endpoint is a recoverable misconfiguration error,
//! never a crash.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

/// An outbound channel capable of accepting encoded envelopes for delivery.
///
/// Writers may block on I/O; that blocking is confined to the calling process.
#[async_trait]
pub trait QueueWriter: Send + Sync {
    /// Name of the queue this writer delivers to.
    fn queue(&self) -> &str;

    /// Delivers one encoded envelope.
    async fn put(&self, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// Constructor for transport-specific writers, keyed by endpoint name.
pub trait QueueWriterFactory: Send + Sync {
    /// The endpoint key this factory is looked up under (e.g. `"memory"`).
    fn endpoint(&self) -> &str;

    fn create_writer(&self, queue: &str) -> Result<Arc<dyn QueueWriter>, TransportError>;
}

/// Lookup from endpoint name to writer factory.
///
/// `add` is the only mutator and is called only while the engine is being built;
/// the registry the host hands out afterward is effectively read-only.
#[derive(Default)]
pub struct QueueWriterRegistry {
    factories: Vec<Arc<dyn QueueWriterFactory>>,
}

impl QueueWriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retains a factory. Call order is preserved; every factory is kept even if
    /// two share an endpoint name (lookup returns the first registered).
    pub fn add(&mut self, factory: Arc<dyn QueueWriterFactory>) {
        self.factories.push(factory);
    }

    /// Resolves the factory for an endpoint, or reports the misconfiguration.
    pub fn get(&self, endpoint: &str) -> Result<Arc<dyn QueueWriterFactory>, TransportError> {
        self.factories
            .iter()
            .find(|f| f.endpoint() == endpoint)
            .cloned()
            .ok_or_else(|| TransportError::EndpointNotFound(endpoint.to_string()))
    }

    /// Registered factories in registration order.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|f| f.endpoint())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullWriter(String);

    #[async_trait]
    impl QueueWriter for NullWriter {
        fn queue(&self) -> &str {
            &self.0
        }

        async fn put(&self, _bytes: Vec<u8>) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct NamedFactory(&'static str);

    impl QueueWriterFactory for NamedFactory {
        fn endpoint(&self) -> &str {
            self.0
        }

        fn create_writer(&self, queue: &str) -> Result<Arc<dyn QueueWriter>, TransportError> {
            Ok(Arc::new(NullWriter(queue.to_string())))
        }
    }

    #[test]
    fn factories_are_retained_in_call_order() {
        let mut registry = QueueWriterRegistry::new();
        registry.add(Arc::new(NamedFactory("memory")));
        registry.add(Arc::new(NamedFactory("file")));
        registry.add(Arc::new(NamedFactory("cloud")));

        let endpoints: Vec<_> = registry.endpoints().collect();
        assert_eq!(endpoints, vec!["memory", "file", "cloud"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn unknown_endpoint_is_a_recoverable_error() {
        let mut registry = QueueWriterRegistry::new();
        registry.add(Arc::new(NamedFactory("memory")));

        assert!(registry.get("memory").is_ok());
        let err = registry.get("azure").err().unwrap();
        assert!(matches!(err, TransportError::EndpointNotFound(name) if name == "azure"));
    }
}
