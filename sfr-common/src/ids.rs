//! Canonical identifiers (IdentifierNormalizer)
//!
//! The backend hands out location and bookmark identifiers in several shapes:
//! a bare database id (string or number), a `place-` prefixed composite id, or a
//! nested object id such as `{"$oid": "..."}`. Every identifier comparison in
//! the engine goes through [`normalize`] / [`normalize_value`]; [`LocationId`]
//! can only be built through them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Prefix used by composite place identifiers
pub const PLACE_PREFIX: &str = "place-";

/// Keys that may wrap an identifier inside a nested object, in lookup order
const NESTED_ID_KEYS: [&str; 4] = ["$oid", "_id", "id", "place_id"];

/// Canonicalize an identifier string
///
/// Strips surrounding whitespace and every leading `place-` prefix. Total and
/// idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let mut id = raw.trim();
    while id.len() >= PLACE_PREFIX.len()
        && id.is_char_boundary(PLACE_PREFIX.len())
        && id[..PLACE_PREFIX.len()].eq_ignore_ascii_case(PLACE_PREFIX)
    {
        id = id[PLACE_PREFIX.len()..].trim_start();
    }
    id.to_string()
}

/// Canonicalize an identifier of any JSON shape
///
/// Unsupported shapes (null, booleans, arrays, objects without an id key)
/// normalize to the empty string.
pub fn normalize_value(raw: &Value) -> String {
    match raw {
        Value::String(s) => normalize(s),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => normalize(&n.to_string()),
        },
        Value::Object(map) => NESTED_ID_KEYS
            .iter()
            .find_map(|key| map.get(*key))
            .map(normalize_value)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// Canonical location identifier
///
/// Holds an already-normalized, non-empty identifier. Equality and hashing on
/// this type are therefore canonical comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationId(String);

impl LocationId {
    /// Build from any string shape; `None` when nothing remains after normalization
    pub fn parse(raw: &str) -> Option<Self> {
        let id = normalize(raw);
        (!id.is_empty()).then_some(Self(id))
    }

    /// Build from any JSON shape; `None` when nothing remains after normalization
    pub fn from_value(raw: &Value) -> Option<Self> {
        let id = normalize_value(raw);
        (!id.is_empty()).then_some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Composite form expected by endpoints keyed on place ids
    pub fn to_place_id(&self) -> String {
        format!("{}{}", PLACE_PREFIX, self.0)
    }

    /// Whether a raw identifier of any shape refers to this location
    pub fn matches(&self, raw: &Value) -> bool {
        normalize_value(raw) == self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LocationId {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        LocationId::parse(&raw).ok_or_else(|| format!("empty location id: {:?}", raw))
    }
}

impl From<LocationId> for String {
    fn from(id: LocationId) -> Self {
        id.0
    }
}
