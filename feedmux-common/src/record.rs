//! Normalized item records
//!
//! A [`Record`] is one unit of fetched content (a status item or a contact)
//! with an identity that is unique within its service. Records are immutable
//! once built: any change produces a new value via [`Record::with_property`],
//! so a record shared between the scratch set, the published set and a cache
//! snapshot can never be modified under a reader.
//!
//! The serialized form of a record is the wire item tuple
//! `{service, id, timestamp, props}` used on the bus and in cache files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A property value: either a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Single string value (title, url, author, ...)
    Text(String),
    /// Multi-valued property (tags, image urls, ...)
    List(Vec<String>),
}

impl PropertyValue {
    /// The value as a string slice, if it is a single string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            PropertyValue::List(_) => None,
        }
    }

    /// The value as a list slice, if it is multi-valued
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::Text(_) => None,
            PropertyValue::List(values) => Some(values),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(values: Vec<String>) -> Self {
        PropertyValue::List(values)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Text(s) => f.write_str(s),
            PropertyValue::List(values) => f.write_str(&values.join(", ")),
        }
    }
}

/// Property map of a record
///
/// Ordered so that equality checks and serialized output are deterministic.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Reference to a record by `(service, identity)`
///
/// This is the removed-item tuple on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub service: String,
    pub id: String,
}

/// One normalized unit of fetched content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    service: String,
    #[serde(rename = "id")]
    identity: String,
    /// Unix seconds
    timestamp: i64,
    #[serde(rename = "props", default)]
    properties: Properties,
}

impl Record {
    /// Start building a record for `service` with the given identity
    pub fn builder(
        service: impl Into<String>,
        identity: impl Into<String>,
        timestamp: i64,
    ) -> RecordBuilder {
        RecordBuilder {
            service: service.into(),
            identity: identity.into(),
            timestamp,
            properties: Properties::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Look up a property
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Look up a single-string property
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    /// Copy-on-write update: returns a new record with `key` set to `value`
    ///
    /// The receiver is left untouched.
    pub fn with_property(&self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Record {
        let mut next = self.clone();
        next.properties.insert(key.into(), value.into());
        next
    }

    /// Whether two records carry the same property map
    ///
    /// This is the "changed" test used when diffing: identity and service are
    /// assumed equal by the caller, and the timestamp is not compared.
    pub fn same_content(&self, other: &Record) -> bool {
        self.properties == other.properties
    }

    /// `(service, identity)` reference to this record
    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            service: self.service.clone(),
            id: self.identity.clone(),
        }
    }
}

/// Builder for [`Record`]
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    service: String,
    identity: String,
    timestamp: i64,
    properties: Properties,
}

impl RecordBuilder {
    /// Set a property, copying the value
    pub fn put(mut self, key: &str, value: &str) -> Self {
        self.properties
            .insert(key.to_string(), PropertyValue::Text(value.to_string()));
        self
    }

    /// Set a property, taking ownership of key and value
    pub fn take(mut self, key: String, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key, value.into());
        self
    }

    pub fn build(self) -> Record {
        Record {
            service: self.service,
            identity: self.identity,
            timestamp: self.timestamp,
            properties: self.properties,
        }
    }
}
