//! Authentication header set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Principal identifier.
pub const HEADER_USER_ID: &str = "x-user-id";
/// Signing time, decimal milliseconds since the Unix epoch.
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
/// Single-use token.
pub const HEADER_NONCE: &str = "x-nonce";
/// Hex SHA-256 body digest.
pub const HEADER_BODY_DIGEST: &str = "x-body-digest";
/// Hex signature over the other four fields.
pub const HEADER_SIGNATURE: &str = "x-signature";

/// All authentication headers, in signing order.
pub const AUTH_HEADERS: [&str; 5] = [
    HEADER_USER_ID,
    HEADER_TIMESTAMP,
    HEADER_NONCE,
    HEADER_BODY_DIGEST,
    HEADER_SIGNATURE,
];

/// Request metadata as name/value pairs with case-insensitive names.
///
/// Names are stored lowercased. An empty set is what the signer returns when
/// there is no authenticated principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct HeaderSet(BTreeMap<String, String>);

impl HeaderSet {
    /// The empty sentinel: no authentication headers at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<BTreeMap<String, String>> for HeaderSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<HeaderSet> for BTreeMap<String, String> {
    fn from(headers: HeaderSet) -> Self {
        headers.0
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderSet::empty();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}
