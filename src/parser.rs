//! JSON decoding for GTFS Realtime vehicle-position feeds.

use anyhow::Result;
use serde_json::{Map, Value};

/// A feed document as published upstream, kept loosely typed.
///
/// Nothing reads it except through structural field access; the typed view
/// is built per entity by [`crate::extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedDocument(Value);

impl FeedDocument {
    /// The degenerate document returned when a fetch fails.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Entities under the top-level `entity` member. A missing or non-array
    /// member reads as no entities.
    pub fn entities(&self) -> &[Value] {
        self.0
            .get("entity")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for FeedDocument {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Decodes a JSON-encoded feed from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedDocument> {
    Ok(FeedDocument(serde_json::from_slice(bytes)?))
}
