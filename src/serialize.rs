//! # Envelope Streaming Pipeline
//!
//! The pipeline is deliberately factored as envelope-codec ∘ payload-codec so
//! either seam can be replaced independently through the builder's advanced
//! surface: the [`EnvelopeSerializer`] frames delivery metadata, the
//! [`DataSerializer`] handles the message-type-aware payload bytes, and the
//! [`EnvelopeStreamer`] composes the two into the single codec used on both the
//! send and receive paths.
//!
//! The defaults speak JSON via serde_json. A custom data serializer is built from
//! the frozen contract set, so the complete type universe is known at the moment
//! serialization is wired.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contracts::ContractSet;
use crate::envelope::MessageEnvelope;
use crate::error::SerializationError;

/// On-the-wire shape of an envelope: metadata plus already-encoded payload bytes.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub message_id: String,
    pub message_type: String,
    pub created_ms: u64,
    pub attributes: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

/// Frames envelope metadata around payload bytes. Replaceable via
/// [`AdvancedBuilder::custom_envelope_serializer`](crate::builder::AdvancedBuilder::custom_envelope_serializer).
pub trait EnvelopeSerializer: Send + Sync {
    fn serialize_envelope(&self, wire: &WireEnvelope) -> Result<Vec<u8>, SerializationError>;
    fn deserialize_envelope(&self, bytes: &[u8]) -> Result<WireEnvelope, SerializationError>;
}

/// Message-type-aware payload codec over the frozen contract set.
pub trait DataSerializer: Send + Sync {
    /// Wire name for a payload's runtime type, if a contract covers it.
    fn contract_name(&self, type_id: TypeId) -> Option<&str>;

    fn encode(
        &self,
        type_name: &str,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<Vec<u8>, SerializationError>;

    fn decode(
        &self,
        type_name: &str,
        bytes: &[u8],
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationError>;
}

/// Default envelope framing: the wire envelope as a JSON document.
#[derive(Debug, Default)]
pub struct JsonEnvelopeSerializer;

impl EnvelopeSerializer for JsonEnvelopeSerializer {
    fn serialize_envelope(&self, wire: &WireEnvelope) -> Result<Vec<u8>, SerializationError> {
        serde_json::to_vec(wire).map_err(|source| SerializationError::Encode {
            context: "envelope".to_string(),
            source,
        })
    }

    fn deserialize_envelope(&self, bytes: &[u8]) -> Result<WireEnvelope, SerializationError> {
        serde_json::from_slice(bytes).map_err(|source| SerializationError::Decode {
            context: "envelope".to_string(),
            source,
        })
    }
}

/// Default payload codec: dispatches to the serde closures captured in the
/// contract set. Unknown names are a deterministic
/// [`SerializationError::UnknownMessageType`].
pub struct ContractDataSerializer {
    contracts: ContractSet,
}

impl ContractDataSerializer {
    pub fn new(contracts: ContractSet) -> Self {
        Self { contracts }
    }
}

impl DataSerializer for ContractDataSerializer {
    fn contract_name(&self, type_id: TypeId) -> Option<&str> {
        self.contracts.contract_for(type_id).map(|c| c.name())
    }

    fn encode(
        &self,
        type_name: &str,
        payload: &(dyn Any + Send + Sync),
    ) -> Result<Vec<u8>, SerializationError> {
        self.contracts
            .contract_named(type_name)
            .ok_or_else(|| SerializationError::UnknownMessageType(type_name.to_string()))?
            .encode(payload)
    }

    fn decode(
        &self,
        type_name: &str,
        bytes: &[u8],
    ) -> Result<Box<dyn Any + Send + Sync>, SerializationError> {
        self.contracts
            .contract_named(type_name)
            .ok_or_else(|| SerializationError::UnknownMessageType(type_name.to_string()))?
            .decode(bytes)
    }
}

/// The single streamer instance shared by the whole host. Stateless per call,
/// safe for concurrent use from every process.
pub struct EnvelopeStreamer {
    envelope: Arc<dyn EnvelopeSerializer>,
    data: Arc<dyn DataSerializer>,
}

impl EnvelopeStreamer {
    pub fn new(envelope: Arc<dyn EnvelopeSerializer>, data: Arc<dyn DataSerializer>) -> Self {
        Self { envelope, data }
    }

    /// Encodes an envelope into one opaque byte sequence.
    ///
    /// The payload's contract is looked up by its runtime type; a payload outside
    /// the frozen contract set fails with an unknown-message-type error.
    pub fn save(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>, SerializationError> {
        let type_name = self
            .data
            .contract_name(envelope.payload_type_id())
            .ok_or_else(|| {
                SerializationError::UnknownMessageType(format!(
                    "<unregistered payload type on envelope {}>",
                    envelope.message_id()
                ))
            })?
            .to_string();
        let payload = self.data.encode(&type_name, envelope.payload())?;
        self.envelope.serialize_envelope(&WireEnvelope {
            message_id: envelope.message_id().to_string(),
            message_type: type_name,
            created_ms: envelope.created_ms(),
            attributes: envelope.attributes().clone(),
            payload,
        })
    }

    /// Reconstructs metadata and payload from a byte sequence, or fails with a
    /// deserialization error if the embedded message type is unknown.
    pub fn open(&self, bytes: &[u8]) -> Result<MessageEnvelope, SerializationError> {
        let wire = self.envelope.deserialize_envelope(bytes)?;
        let payload = self.data.decode(&wire.message_type, &wire.payload)?;
        Ok(MessageEnvelope::from_parts(
            wire.message_id,
            wire.message_type,
            wire.created_ms,
            wire.attributes,
            payload,
        ))
    }
}
