//! Query parameter bags
//!
//! Views are opened with a free-form `map<string,string>` of parameters.
//! The bag is kept sorted so that its [`Params::stable_hash`] does not depend
//! on insertion order; the hash is part of the result-cache key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Query name used when a client does not supply one
pub const DEFAULT_QUERY: &str = "feed";

/// Sorted string-to-string parameter bag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Hex SHA-256 over every key and value in sorted key order
    ///
    /// Each string is prefixed with its byte length (u64, big endian) so
    /// `{ab: c}` and `{a: bc}` hash differently.
    pub fn stable_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.0 {
            for part in [key, value] {
                hasher.update((part.len() as u64).to_be_bytes());
                hasher.update(part.as_bytes());
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Params(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Normalize an optional query name, defaulting to [`DEFAULT_QUERY`]
pub fn query_or_default(query: Option<&str>) -> &str {
    match query {
        Some(q) if !q.is_empty() => q,
        _ => DEFAULT_QUERY,
    }
}
