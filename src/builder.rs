//! # Engine Builder
//!
//! Fluent configuration surface for assembling an [`EngineHost`]. The builder is
//! a pure accumulator: every configuration method mutates internal state and
//! nothing else — no resolution, no I/O — until [`EngineBuilder::build`] runs the
//! ordered build phase.
//!
//! Two surfaces share one struct: the default fluent methods (`domain`, `memory`,
//! `file`, `storage`) cover ordinary configuration, while [`EngineBuilder::advanced`]
//! returns the capability-restricted escape hatch for low-level hooks — custom
//! serializers, raw module enlistment, observer and writer-factory registration.
//! Casual configuration cannot reach those by accident.
//!
//! # Build ordering
//! `build()` must uphold two invariants the rest of the engine depends on:
//! the domain/directory configuration populates the contract registry *before*
//! the data-serializer factory is invoked, and storage configuration completes
//! *before* the registry is frozen. Any failing deferred factory aborts the whole
//! build — a host with an incomplete transport set never starts.

use std::sync::Arc;

use tracing::debug;

use crate::contracts::{ContractRegistry, ContractSet};
use crate::dedup::MessageDuplicationManager;
use crate::dispatch::DispatchDirectoryModule;
use crate::error::EngineError;
use crate::file::FileModule;
use crate::host::EngineHost;
use crate::memory::{MemoryAccount, MemoryModule, MemoryQueueWriterFactory};
use crate::observer::{ImmediateTracingObserver, SystemObserver, SystemObserverSet};
use crate::outbox::{QueueWriterFactory, QueueWriterRegistry};
use crate::registry::{ComponentRegistry, EngineModule, EngineScope, WriterActivator};
use crate::serialize::{
    ContractDataSerializer, DataSerializer, EnvelopeSerializer, EnvelopeStreamer,
    JsonEnvelopeSerializer,
};
use crate::storage::StorageModule;

type DataSerializerFactory = Box<dyn FnOnce(ContractSet) -> Arc<dyn DataSerializer> + Send>;
type DirectoryConfig =
    Box<dyn FnOnce(&mut ComponentRegistry, &mut ContractRegistry) -> Result<(), EngineError> + Send>;
type ComponentConfig = Box<dyn FnOnce(&mut ComponentRegistry) -> Result<(), EngineError> + Send>;

/// Fluent builder for [`EngineHost`].
///
/// Each instance owns its own defaults — tracing observer, empty dispatch
/// directory, JSON serializers, memory transport — so builders never share
/// mutable state.
pub struct EngineBuilder {
    contracts: ContractRegistry,
    envelope_serializer: Arc<dyn EnvelopeSerializer>,
    data_serializer_factory: DataSerializerFactory,
    directory: DirectoryConfig,
    storage: StorageModule,
    modules: Vec<Box<dyn EngineModule>>,
    component_configs: Vec<ComponentConfig>,
    writer_activators: Vec<WriterActivator>,
    observers: Vec<Box<dyn SystemObserver>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            contracts: ContractRegistry::new(),
            envelope_serializer: Arc::new(JsonEnvelopeSerializer),
            data_serializer_factory: Box::new(|contracts| {
                Arc::new(ContractDataSerializer::new(contracts))
            }),
            directory: Box::new(|registry, contracts| {
                DispatchDirectoryModule::new().configure(registry, contracts)
            }),
            storage: StorageModule::new(),
            modules: Vec::new(),
            component_configs: Vec::new(),
            writer_activators: Vec::new(),
            observers: vec![Box::new(ImmediateTracingObserver)],
        };
        // The memory endpoint is always available, resolved lazily like every
        // other writer factory.
        builder.writer_activators.push(Box::new(|scope| {
            let account = scope.resolve::<MemoryAccount>()?;
            Ok(Arc::new(MemoryQueueWriterFactory::new(account)) as Arc<dyn QueueWriterFactory>)
        }));
        builder
    }

    /// Configures the message domain: type declarations and dispatch routes.
    ///
    /// Applied during the Configure phase, before serialization is wired.
    pub fn domain<F>(&mut self, config: F) -> &mut Self
    where
        F: FnOnce(&mut DispatchDirectoryModule) + Send + 'static,
    {
        self.directory = Box::new(move |registry, contracts| {
            let mut module = DispatchDirectoryModule::new();
            config(&mut module);
            module.configure(registry, contracts)
        });
        self
    }

    /// Configures the in-memory transport.
    pub fn memory<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut MemoryModule),
    {
        let mut module = MemoryModule::new();
        configure(&mut module);
        self.modules.push(Box::new(module));
        self
    }

    /// Configures the file transport.
    pub fn file<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut FileModule),
    {
        let mut module = FileModule::new();
        configure(&mut module);
        self.modules.push(Box::new(module));
        self
    }

    /// Adds configuration to the storage module.
    pub fn storage<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut StorageModule),
    {
        configure(&mut self.storage);
        self
    }

    /// The capability-restricted escape hatch for low-level hooks.
    pub fn advanced(&mut self) -> AdvancedBuilder<'_> {
        AdvancedBuilder { builder: self }
    }

    /// Runs the ordered build phase and returns the initialized host.
    ///
    /// Fail-fast throughout: configuration, resolution, or deferred-factory
    /// errors abort the build and no partial host is returned.
    pub fn build(self) -> Result<EngineHost, EngineError> {
        let Self {
            mut contracts,
            envelope_serializer,
            data_serializer_factory,
            directory,
            storage,
            modules,
            component_configs,
            writer_activators,
            observers,
        } = self;

        let mut registry = ComponentRegistry::new();

        // Non-conditional built-ins.
        registry.register_instance(MemoryAccount::new());
        for activator in writer_activators {
            registry.register_queue_writer_factory(activator);
        }
        for config in component_configs {
            config(&mut registry)?;
        }

        // Enlisted modules, in enlistment order, before anything resolves.
        for module in modules {
            module.configure(&mut registry)?;
        }

        // Configure phase. The broadcaster goes in first so everything
        // registered after it can depend on it.
        let observers = SystemObserverSet::new(observers);
        registry.register_arc(Arc::clone(&observers));

        // Domain before serialization: the directory populates the contract
        // registry with the types serialization needs to know about.
        directory(&mut registry, &mut contracts)?;
        storage.configure(&mut registry)?;

        let contract_set = contracts.get_and_make_read_only()?;
        debug!(contracts = contract_set.len(), "contract registry frozen");
        let data_serializer = data_serializer_factory(contract_set.clone());
        let streamer = EnvelopeStreamer::new(envelope_serializer, data_serializer);
        registry.register_instance(contract_set);
        registry.register_instance(streamer);
        registry.register_instance(MessageDuplicationManager::new());

        // Materialize the deferred writer factories against the resolved
        // context, in registration order; any failure aborts the build.
        let resolver = registry.snapshot();
        let mut writers = QueueWriterRegistry::new();
        for activator in registry.take_writer_activators() {
            writers.add(activator(&resolver)?);
        }
        registry.register_instance(writers);

        // Resolve the process set and the lifetime scope, then hand both to
        // the host.
        let scope = registry.snapshot();
        let mut processes = Vec::new();
        for activator in registry.take_process_activators() {
            processes.push(activator(&scope)?);
        }

        let mut host = EngineHost::new(scope, observers, processes);
        host.initialize()?;
        Ok(host)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Advanced registration surface: low-level hooks that must be explicitly
/// requested via [`EngineBuilder::advanced`].
pub struct AdvancedBuilder<'a> {
    builder: &'a mut EngineBuilder,
}

impl AdvancedBuilder<'_> {
    /// Replaces the payload-codec factory. The factory receives the complete,
    /// frozen contract set at the moment serialization is wired.
    pub fn custom_data_serializer<F>(&mut self, factory: F) -> &mut Self
    where
        F: FnOnce(ContractSet) -> Arc<dyn DataSerializer> + Send + 'static,
    {
        self.builder.data_serializer_factory = Box::new(factory);
        self
    }

    /// Replaces the envelope metadata framing.
    pub fn custom_envelope_serializer(
        &mut self,
        serializer: Arc<dyn EnvelopeSerializer>,
    ) -> &mut Self {
        self.builder.envelope_serializer = serializer;
        self
    }

    /// Enlists a deferred writer-factory closure, resolved once against the
    /// dependency context after the graph exists, never eagerly.
    pub fn register_queue_writer_factory<F>(&mut self, activator: F) -> &mut Self
    where
        F: FnOnce(&EngineScope) -> Result<Arc<dyn QueueWriterFactory>, EngineError>
            + Send
            + 'static,
    {
        self.builder.writer_activators.push(Box::new(activator));
        self
    }

    /// Enlists an opaque module, applied in enlistment order at build time.
    pub fn register_module(&mut self, module: Box<dyn EngineModule>) -> &mut Self {
        self.builder.modules.push(module);
        self
    }

    /// Raw access to the registration set, before any module applies.
    pub fn configure_components<F>(&mut self, config: F) -> &mut Self
    where
        F: FnOnce(&mut ComponentRegistry) -> Result<(), EngineError> + Send + 'static,
    {
        self.builder.component_configs.push(Box::new(config));
        self
    }

    /// Adds an observer after the default tracing observer.
    pub fn register_observer(&mut self, observer: Box<dyn SystemObserver>) -> &mut Self {
        self.builder.observers.push(observer);
        self
    }

    /// The observer list, insertion order = notification order. Clearing it
    /// suppresses the default tracing observer.
    pub fn observers(&mut self) -> &mut Vec<Box<dyn SystemObserver>> {
        &mut self.builder.observers
    }
}
