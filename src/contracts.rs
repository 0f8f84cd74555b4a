//! # Serialization Contract Registry
//!
//! Accumulates message-type → contract mappings while the engine is being
//! configured, then freezes into an immutable [`ContractSet`] the moment the build
//! phase wires serialization. The freeze models "serialization shape is fixed once
//! the runtime starts": after it, an unknown message type is a deterministic,
//! enumerable failure rather than a lookup that can change underfoot.
//!
//! # Architecture Note
//! A contract pairs a stable wire name with serde-backed encode/decode closures for
//! one concrete Rust type. The closures erase the type at the registry boundary, so
//! the streamer can work over `dyn Any` payloads while registration stays fully
//! type-checked.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, SerializationError};

type EncodeFn =
    Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, SerializationError> + Send + Sync>;
type DecodeFn =
    Arc<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send + Sync>, SerializationError> + Send + Sync>;

/// The declared mapping between one message type and its codec rules.
#[derive(Clone)]
pub struct MessageContract {
    name: String,
    type_id: TypeId,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl MessageContract {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub(crate) fn encode(
        &self,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<Vec<u8>, SerializationError> {
        (self.encode)(payload)
    }

    pub(crate) fn decode(
        &self,
        bytes: &[u8],
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationError> {
        (self.decode)(bytes)
    }
}

impl std::fmt::Debug for MessageContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContract")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Mutable accumulator for message contracts. Lives inside the builder; becomes
/// read-only forever once [`ContractRegistry::get_and_make_read_only`] runs.
#[derive(Default)]
pub struct ContractRegistry {
    entries: Vec<MessageContract>,
    frozen: bool,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a message type under a wire name, with serde as the codec.
    ///
    /// Registration order is preserved; duplicate names are not rejected here but
    /// fail fast when the registry is frozen, so misconfiguration surfaces at
    /// `build()` rather than mid-flight.
    pub fn register<T>(&mut self, name: impl Into<String>) -> Result<(), EngineError>
    where
        T: Serialize + DeserializeOwned + Any + Send + Sync,
    {
        if self.frozen {
            return Err(EngineError::Configuration(
                "contract registry is read-only; all contracts must be declared before build"
                    .to_string(),
            ));
        }
        let name = name.into();
        let encode_name = name.clone();
        let decode_name = name.clone();
        self.entries.push(MessageContract {
            name,
            type_id: TypeId::of::<T>(),
            encode: Arc::new(move |payload| {
                let typed = payload
                    .downcast_ref::<T>()
                    .ok_or_else(|| SerializationError::PayloadTypeMismatch(encode_name.clone()))?;
                serde_json::to_vec(typed).map_err(|source| SerializationError::Encode {
                    context: encode_name.clone(),
                    source,
                })
            }),
            decode: Arc::new(move |bytes| {
                serde_json::from_slice::<T>(bytes)
                    .map(|value| Box::new(value) as Box<dyn Any + Send + Sync>)
                    .map_err(|source| SerializationError::Decode {
                        context: decode_name.clone(),
                        source,
                    })
            }),
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Validates the accumulated mappings, closes the registry to further writes,
    /// and returns the frozen, shareable contract set.
    ///
    /// Fails fast on duplicate wire names or on two names claiming the same Rust
    /// type: either would make encode-side contract lookup ambiguous.
    pub fn get_and_make_read_only(&mut self) -> Result<ContractSet, EngineError> {
        let mut by_name = HashMap::with_capacity(self.entries.len());
        let mut by_type = HashMap::with_capacity(self.entries.len());
        for (index, contract) in self.entries.iter().enumerate() {
            if by_name.insert(contract.name.clone(), index).is_some() {
                return Err(EngineError::Configuration(format!(
                    "duplicate contract registered for message type: {}",
                    contract.name
                )));
            }
            if by_type.insert(contract.type_id, index).is_some() {
                return Err(EngineError::Configuration(format!(
                    "message type {} is already covered by another contract",
                    contract.name
                )));
            }
        }
        self.frozen = true;
        Ok(ContractSet {
            contracts: Arc::new(self.entries.clone()),
            by_name: Arc::new(by_name),
            by_type: Arc::new(by_type),
        })
    }
}

/// Frozen view over the declared contracts. Cheap to clone, safe for concurrent
/// reads from every dispatch process.
#[derive(Clone)]
pub struct ContractSet {
    contracts: Arc<Vec<MessageContract>>,
    by_name: Arc<HashMap<String, usize>>,
    by_type: Arc<HashMap<TypeId, usize>>,
}

impl ContractSet {
    pub fn contract_named(&self, name: &str) -> Option<&MessageContract> {
        self.by_name.get(name).map(|&i| &self.contracts[i])
    }

    pub(crate) fn contract_for(&self, type_id: TypeId) -> Option<&MessageContract> {
        self.by_type.get(&type_id).map(|&i| &self.contracts[i])
    }

    /// Wire names of every known message type, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contracts.iter().map(|c| c.name())
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

impl std::fmt::Debug for ContractSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractSet")
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct OrderPlaced {
        order_id: u64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderShipped {
        order_id: u64,
    }

    #[test]
    fn freeze_indexes_contracts_by_name_and_type() {
        let mut registry = ContractRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced").unwrap();
        registry.register::<OrderShipped>("OrderShipped").unwrap();

        let set = registry.get_and_make_read_only().unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contract_named("OrderPlaced").is_some());
        assert!(set.contract_named("OrderCancelled").is_none());
        assert!(set.contract_for(TypeId::of::<OrderShipped>()).is_some());
    }

    #[test]
    fn duplicate_names_fail_at_freeze() {
        let mut registry = ContractRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced").unwrap();
        registry.register::<OrderShipped>("OrderPlaced").unwrap();

        let err = registry.get_and_make_read_only().unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn registration_after_freeze_is_rejected() {
        let mut registry = ContractRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced").unwrap();
        registry.get_and_make_read_only().unwrap();

        let err = registry.register::<OrderShipped>("OrderShipped").unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn contract_round_trips_payload() {
        let mut registry = ContractRegistry::new();
        registry.register::<OrderPlaced>("OrderPlaced").unwrap();
        let set = registry.get_and_make_read_only().unwrap();

        let contract = set.contract_named("OrderPlaced").unwrap();
        let original = OrderPlaced { order_id: 7 };
        let bytes = contract.encode(&original).unwrap();
        let decoded = contract.decode(&bytes).unwrap();
        assert_eq!(decoded.downcast_ref::<OrderPlaced>(), Some(&original));
    }
}
