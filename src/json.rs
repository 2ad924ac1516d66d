//! JSON payload serializer.
//!
//! Payload types declare `#[serde(rename_all = "camelCase")]` so property
//! names follow one convention; unit enum variants serialize as their string
//! name. Property names are matched case-insensitively on read: when a
//! direct decode fails, each object decoded into a struct has its keys
//! matched against that struct's field names ignoring case, `_` and `-`, so
//! `EventId`, `EVENTID`, `event_id` and `eventId` all land on the same field.
//! Keys of map-valued fields are left untouched. Fields reached through
//! `#[serde(flatten)]` are matched exactly.

use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{DeserializeOwned, Deserializer, IntoDeserializer, Visitor};
use serde::{forward_to_deserialize_any, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Serialize a value to its wire payload.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Parse a payload into an untyped JSON value.
pub fn parse(body: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Deserialize a payload into `T`.
pub fn from_payload<T: DeserializeOwned>(body: &[u8]) -> Result<T, serde_json::Error> {
    from_value(parse(body)?)
}

/// Deserialize an already-parsed value into `T`, falling back to
/// case-insensitive property matching when the exact names do not match.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    match serde_json::from_value::<T>(value.clone()) {
        Ok(decoded) => Ok(decoded),
        Err(err) => T::deserialize(CaseInsensitive(value)).map_err(|_| err),
    }
}

/// Whether `key` names `field` once case, `_` and `-` are ignored.
fn same_property(field: &str, key: &str) -> bool {
    let significant = |s: &str| {
        s.chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect::<String>()
    };
    significant(field) == significant(key)
}

fn match_keys(map: Map<String, Value>, fields: &'static [&'static str]) -> Map<String, Value> {
    let mut matched = Map::with_capacity(map.len());
    for (key, value) in map {
        let key = if fields.contains(&key.as_str()) {
            key
        } else {
            fields
                .iter()
                .find(|field| same_property(field, &key))
                .map_or(key, |field| field.to_string())
        };
        matched.entry(key).or_insert(value);
    }
    matched
}

/// A [`Value`] deserializer that matches struct fields case-insensitively,
/// at every nesting level.
struct CaseInsensitive(Value);

impl<'de> IntoDeserializer<'de, serde_json::Error> for CaseInsensitive {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

impl CaseInsensitive {
    fn visit_object<'de, V>(
        map: Map<String, Value>,
        visitor: V,
    ) -> Result<V::Value, serde_json::Error>
    where
        V: Visitor<'de>,
    {
        let mut access =
            MapDeserializer::new(map.into_iter().map(|(k, v)| (k, CaseInsensitive(v))));
        let value = visitor.visit_map(&mut access)?;
        access.end()?;
        Ok(value)
    }
}

impl<'de> Deserializer<'de> for CaseInsensitive {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            Value::Object(map) => Self::visit_object(map, visitor),
            Value::Array(items) => {
                let mut access = SeqDeserializer::new(items.into_iter().map(CaseInsensitive));
                let value = visitor.visit_seq(&mut access)?;
                access.end()?;
                Ok(value)
            }
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        match self.0 {
            Value::Object(map) => Self::visit_object(match_keys(map, fields), visitor),
            other => other.deserialize_struct(name, fields, visitor),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            Value::Null => visitor.visit_none(),
            other => visitor.visit_some(CaseInsensitive(other)),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.0.deserialize_enum(name, variants, visitor)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map identifier
        ignored_any
    }
}
