//! Topic routing: model events to routing keys and wire envelopes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Routing key for a model event: `"{entity}.{event}"`.
///
/// Components are passed through unchanged, including empty strings.
pub fn routing_key(entity: &str, event: &str) -> String {
    format!("{}.{}", entity, event)
}

/// Wire envelope for a model event payload: `{"object": obj}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub object: T,
}

impl<T> Envelope<T> {
    pub fn new(object: T) -> Self {
        Self { object }
    }

    /// Unwrap the carried object.
    pub fn into_inner(self) -> T {
        self.object
    }
}

impl<T: Serialize> Envelope<T> {
    /// Encode the envelope as JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decode an envelope from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
