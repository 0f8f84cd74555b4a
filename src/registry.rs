//! # Component Registry & Engine Scope
//!
//! The registration set behind the builder. [`ComponentRegistry`] is mutable only
//! during the build phase: modules register shared instances plus deferred
//! activators for processes and writer factories. [`EngineScope`] is the immutable
//! resolved view the activators run against, and the lifetime scope the host owns
//! until shutdown.
//!
//! # Architecture Note
//! Deferred activators model late-bound construction: a transport module runs long
//! before the streamer or dedup manager exist, so it enlists a closure from the
//! resolved scope instead of an eager instance. All activators are materialized in
//! one explicit pass after the registrations are final, each exactly once.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::outbox::QueueWriterFactory;
use crate::process::EngineProcess;

/// A transport (or any other) module: an opaque configurator that registers zero
/// or more writer-factory activators and zero or more processes into the shared
/// registration set. Modules apply in enlistment order, all before the graph is
/// resolved.
pub trait EngineModule: Send {
    fn configure(self: Box<Self>, registry: &mut ComponentRegistry) -> Result<(), EngineError>;
}

/// Deferred constructor for a long-running process, resolved against the scope.
pub type ProcessActivator =
    Box<dyn FnOnce(&EngineScope) -> Result<Box<dyn EngineProcess>, EngineError> + Send>;

/// Deferred constructor for a writer factory, resolved against the scope.
pub type WriterActivator =
    Box<dyn FnOnce(&EngineScope) -> Result<Arc<dyn QueueWriterFactory>, EngineError> + Send>;

/// Build-phase accumulator of shared instances and deferred activators.
#[derive(Default)]
pub struct ComponentRegistry {
    instances: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    process_activators: Vec<ProcessActivator>,
    writer_activators: Vec<WriterActivator>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared instance, replacing any earlier one of the same type.
    pub fn register_instance<T: Send + Sync + 'static>(&mut self, value: T) {
        self.register_arc(Arc::new(value));
    }

    pub fn register_arc<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.instances.insert(TypeId::of::<T>(), value);
    }

    /// Enlists a process to be constructed once the dependency graph is resolved.
    pub fn register_process(&mut self, activator: ProcessActivator) {
        self.process_activators.push(activator);
    }

    /// Enlists a writer factory, resolved lazily in registration order.
    pub fn register_queue_writer_factory(&mut self, activator: WriterActivator) {
        self.writer_activators.push(activator);
    }

    /// Immutable view over everything registered so far.
    pub fn snapshot(&self) -> EngineScope {
        EngineScope {
            instances: Arc::new(self.instances.clone()),
        }
    }

    pub(crate) fn take_writer_activators(&mut self) -> Vec<WriterActivator> {
        std::mem::take(&mut self.writer_activators)
    }

    pub(crate) fn take_process_activators(&mut self) -> Vec<ProcessActivator> {
        std::mem::take(&mut self.process_activators)
    }
}

/// The resolved, immutable dependency scope.
///
/// Cloning is cheap; ownership of the final scope transfers to the host, which
/// drops it exactly once on shutdown.
#[derive(Clone)]
pub struct EngineScope {
    instances: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl EngineScope {
    /// Resolves a shared component by type.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, EngineError> {
        self.instances
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
            .ok_or(EngineError::Resolution(type_name::<T>()))
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.instances.contains_key(&TypeId::of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn snapshot_resolves_registered_instances() {
        let mut registry = ComponentRegistry::new();
        registry.register_instance(Marker(7));

        let scope = registry.snapshot();
        assert_eq!(*scope.resolve::<Marker>().unwrap(), Marker(7));
        assert!(scope.contains::<Marker>());
    }

    #[test]
    fn missing_component_reports_its_type() {
        let scope = ComponentRegistry::new().snapshot();
        let err = scope.resolve::<Marker>().unwrap_err();
        assert!(matches!(err, EngineError::Resolution(name) if name.contains("Marker")));
    }

    #[test]
    fn later_registration_wins_for_the_same_type() {
        let mut registry = ComponentRegistry::new();
        registry.register_instance(Marker(1));
        registry.register_instance(Marker(2));

        let scope = registry.snapshot();
        assert_eq!(*scope.resolve::<Marker>().unwrap(), Marker(2));
    }
}
