//! # Message Envelope
//!
//! The framing around a message: delivery metadata (identity, creation time,
//! routing attributes) carried separately from the type-erased payload.
//!
//! Envelopes are constructed by senders with [`MessageEnvelope::new`] and
//! reconstructed by the [`EnvelopeStreamer`](crate::serialize::EnvelopeStreamer) on
//! the receive path. The payload is stored as `Box<dyn Any + Send + Sync>` so that
//! one envelope type serves every registered message contract and envelopes can be
//! shared across the dispatch tasks; handlers recover the concrete type with
//! [`MessageEnvelope::payload_as`].

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// A message plus its delivery metadata.
pub struct MessageEnvelope {
    message_id: String,
    /// Contract name of the payload. Empty on freshly built envelopes; the
    /// streamer derives the authoritative name from the contract registry when
    /// encoding and fills it in when decoding.
    message_type: String,
    created_ms: u64,
    attributes: BTreeMap<String, String>,
    payload: Box<dyn Any + Send + Sync>,
}

impl MessageEnvelope {
    /// Wraps a payload with a fresh uuid identity and the current timestamp.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            message_type: String::new(),
            created_ms: epoch_ms(),
            attributes: BTreeMap::new(),
            payload: Box::new(payload),
        }
    }

    /// Overrides the envelope identity. Resending with the same id is how a
    /// transport exercises the deduplication guarantee.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    /// Attaches a routing hint or other opaque metadata.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Downcasts the payload to a concrete message type.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub(crate) fn payload(&self) -> &(dyn Any + Send + Sync) {
        &*self.payload
    }

    pub(crate) fn payload_type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }

    /// Reassembles an envelope on the receive path. Only the streamer calls this.
    pub(crate) fn from_parts(
        message_id: String,
        message_type: String,
        created_ms: u64,
        attributes: BTreeMap<String, String>,
        payload: Box<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            message_id,
            message_type,
            created_ms,
            attributes,
            payload,
        }
    }
}

impl std::fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("message_id", &self.message_id)
            .field("message_type", &self.message_type)
            .field("created_ms", &self.created_ms)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
