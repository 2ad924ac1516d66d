//! Envelope: the wire-level container a broker adapter transmits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Event;

/// Custom property carrying the publisher's authentication token.
pub const AUTHENTICATION_TOKEN: &str = "AuthenticationToken";
/// Custom property carrying the publisher's user identity.
pub const USER: &str = "User";

/// Properties assigned by the broker when a message is received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemProperties {
    pub lock_token: String,
    pub delivery_count: u32,
    pub sequence_number: u64,
}

/// Serialized event payload plus routing metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Serialized event payload (JSON, camelCase properties)
    pub body: Vec<u8>,
    /// Fully-qualified event-type identifier
    pub label: String,
    /// Event id in simple hex form
    pub message_id: String,
    pub session_id: Option<String>,
    /// Custom properties (authentication token, user identity, ...)
    pub properties: BTreeMap<String, String>,
    /// Broker-assigned; `None` until the envelope has been received.
    #[serde(default)]
    pub system: Option<SystemProperties>,
}

impl Envelope {
    /// Create an envelope with the given label and body.
    pub fn new(message_id: impl Into<String>, label: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            body,
            label: label.into(),
            message_id: message_id.into(),
            session_id: None,
            properties: BTreeMap::new(),
            system: None,
        }
    }

    /// Build the envelope for a typed event whose payload is already serialized.
    pub fn for_event<E: Event>(
        event: &E,
        body: Vec<u8>,
        token: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::new(event.event_id().simple().to_string(), E::EVENT_TYPE, body)
            .with_property(AUTHENTICATION_TOKEN, token)
            .with_property(USER, user);
        envelope.session_id = event.session_id().map(str::to_string);
        envelope
    }

    /// Add a custom property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|v| v.as_str())
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn lock_token(&self) -> Option<&str> {
        self.system.as_ref().map(|s| s.lock_token.as_str())
    }

    /// A copy carrying the same body and metadata but none of the
    /// broker-assigned properties, suitable for sending again.
    pub fn fresh_copy(&self) -> Self {
        Self {
            system: None,
            ..self.clone()
        }
    }

    /// Encode to the binary frame stored and transmitted by broker adapters.
    pub fn encode_frame(&self) -> Result<Vec<u8>, bitcode::Error> {
        bitcode::serialize(self)
    }

    /// Decode a binary frame produced by [`Envelope::encode_frame`].
    pub fn decode_frame(frame: &[u8]) -> Result<Self, bitcode::Error> {
        bitcode::deserialize(frame)
    }
}
