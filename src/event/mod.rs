//! Event model: the base metadata every published payload carries.
//!
//! An event is a plain serde struct that embeds an [`EventMeta`] (or a
//! [`SessionMeta`] for ordered events) and implements [`Event`], usually via
//! [`impl_event!`](crate::impl_event) or
//! [`impl_session_event!`](crate::impl_session_event).
//!
//! ## Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use topic_bus::{impl_event, Event, EventMeta};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! pub struct OrderPlaced {
//!     #[serde(flatten)]
//!     pub meta: EventMeta,
//!     pub order_id: String,
//! }
//!
//! impl_event!(OrderPlaced, "shop.orders.OrderPlaced");
//!
//! let event = OrderPlaced { meta: EventMeta::new(), order_id: "o-1".into() };
//! assert_eq!(OrderPlaced::EVENT_TYPE, "shop.orders.OrderPlaced");
//! assert!(event.session_id().is_none());
//! ```

mod envelope;

pub use envelope::{Envelope, SystemProperties, AUTHENTICATION_TOKEN, USER};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed event that can be published to a topic.
///
/// `EVENT_TYPE` is the stable, fully-qualified identifier written to the
/// envelope label. Registrations are keyed by it, so it must not change
/// between the publishing and the subscribing process.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    const EVENT_TYPE: &'static str;

    fn metadata(&self) -> &EventMeta;

    /// Session the event belongs to; events sharing a session are processed in order.
    fn session_id(&self) -> Option<&str> {
        None
    }

    fn event_id(&self) -> Uuid {
        self.metadata().event_id
    }

    fn event_time(&self) -> DateTime<Utc> {
        self.metadata().event_time
    }
}

/// Identity and creation time of an event. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    event_id: Uuid,
    event_time: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_time: Utc::now(),
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// [`EventMeta`] plus the session the event is ordered within.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(flatten)]
    event: EventMeta,
    session_id: String,
}

impl SessionMeta {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            event: EventMeta::new(),
            session_id: session_id.into(),
        }
    }

    pub fn event(&self) -> &EventMeta {
        &self.event
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Implement [`Event`] for a struct with a `meta: EventMeta` field.
///
/// ```ignore
/// impl_event!(OrderPlaced, "shop.orders.OrderPlaced");
/// impl_event!(OrderPlaced, "shop.orders.OrderPlaced", header); // custom field name
/// ```
#[macro_export]
macro_rules! impl_event {
    ($ty:ty, $label:expr) => {
        $crate::impl_event!($ty, $label, meta);
    };
    ($ty:ty, $label:expr, $field:ident) => {
        impl $crate::Event for $ty {
            const EVENT_TYPE: &'static str = $label;

            fn metadata(&self) -> &$crate::EventMeta {
                &self.$field
            }
        }
    };
}

/// Implement [`Event`] for a struct with a `meta: SessionMeta` field.
#[macro_export]
macro_rules! impl_session_event {
    ($ty:ty, $label:expr) => {
        $crate::impl_session_event!($ty, $label, meta);
    };
    ($ty:ty, $label:expr, $field:ident) => {
        impl $crate::Event for $ty {
            const EVENT_TYPE: &'static str = $label;

            fn metadata(&self) -> &$crate::EventMeta {
                self.$field.event()
            }

            fn session_id(&self) -> Option<&str> {
                Some(self.$field.session_id())
            }
        }
    };
}
