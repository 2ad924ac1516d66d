//! Error types for publishing, dispatching, broker access and configuration.
//!
//! - [`BrokerError`]: failures reported by a broker adapter.
//! - [`PublishError`]: the only error surfaced synchronously to application code.
//! - [`DispatchError`]: envelope-processing failures; the message stays unacknowledged.
//! - [`HandlerError`]: a single handler's fault; logged, never propagated.
//! - [`ConfigError`]: configuration loading and validation.

use std::error::Error;

use thiserror::Error;

/// Boxed error used by handler implementations that wrap foreign errors.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors produced by a broker adapter.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The namespace could not be reached.
    #[error("namespace unavailable: {namespace}")]
    Unavailable { namespace: String },

    /// The broker is throttling; the operation may succeed later.
    #[error("server busy: {namespace}")]
    ServerBusy { namespace: String },

    /// The broker did not acknowledge within the operation timeout.
    #[error("operation timed out on {namespace}")]
    Timeout { namespace: String },

    /// The client has been closed.
    #[error("client closed: {entity}")]
    Closed { entity: String },

    /// The message lock expired or is unknown.
    #[error("message lock lost: {lock_token}")]
    LockLost { lock_token: String },

    /// The session lock expired or the session was closed.
    #[error("session lock lost: {session_id}")]
    SessionLockLost { session_id: String },

    /// The connection string could not be parsed.
    #[error("invalid connection string: {reason}")]
    InvalidConnectionString { reason: String },
}

impl BrokerError {
    /// Whether a transport-level retry policy should retry this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::ServerBusy { .. } | BrokerError::Timeout { .. }
        )
    }

    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::Unavailable { .. } => "broker_unavailable",
            BrokerError::ServerBusy { .. } => "broker_server_busy",
            BrokerError::Timeout { .. } => "broker_timeout",
            BrokerError::Closed { .. } => "broker_closed",
            BrokerError::LockLost { .. } => "broker_lock_lost",
            BrokerError::SessionLockLost { .. } => "broker_session_lock_lost",
            BrokerError::InvalidConnectionString { .. } => "broker_invalid_connection_string",
        }
    }
}

/// Errors returned from `publish`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PublishError {
    /// The event could not be serialized to its wire payload.
    #[error("failed to serialize {event_name}: {source}")]
    Serialization {
        event_name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Every send attempt against the active connection failed and no failover was possible.
    #[error("failed to deliver {event_name} after {attempts} attempts")]
    Delivery {
        event_name: String,
        attempts: u32,
        #[source]
        source: BrokerError,
    },

    /// Delivery failed on the active connection and again after the failover path.
    #[error("failed to deliver {event_name} after failover")]
    Failover {
        event_name: String,
        #[source]
        source: BrokerError,
    },

    /// A broker client could not be created.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl PublishError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::Serialization { .. } => "publish_serialization",
            PublishError::Delivery { .. } => "publish_delivery",
            PublishError::Failover { .. } => "publish_failover",
            PublishError::Broker(_) => "publish_broker",
        }
    }
}

/// Errors raised while processing an inbound envelope (not individual handler faults).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A required envelope property is absent.
    #[error("envelope {message_id} is missing property {property}")]
    MissingProperty {
        message_id: String,
        property: &'static str,
    },

    /// The body could not be decoded into the registered event type.
    #[error("failed to deserialize {label}: {source}")]
    Deserialization {
        label: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DispatchError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::MissingProperty { .. } => "dispatch_missing_property",
            DispatchError::Deserialization { .. } => "dispatch_deserialization",
        }
    }
}

/// A fault raised by one handler instance.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler rejected or failed to process the event.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// A foreign error surfaced by the handler.
    #[error("{0}")]
    Other(#[from] BoxError),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing setting: {0}")]
    Missing(&'static str),

    #[error(transparent)]
    Connection(#[from] BrokerError),
}
