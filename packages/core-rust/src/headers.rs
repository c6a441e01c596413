//! Message header names, recognized event types, and the ordered header set
//! carried alongside every message body.

use std::fmt;
use std::str::FromStr;

/// Header selecting the schema (and handler routing) for the body.
pub const HDR_TYPE: &str = "Type";

/// Caller identity header. Required on publish; propagated, not re-validated on consume.
pub const HDR_IDENTITY: &str = "X-Rh-Identity";

/// Correlation id header, propagated from the originating request.
pub const HDR_REQUEST_ID: &str = "X-Rh-Insights-Request-Id";

/// Length of a synthesized correlation id.
pub const REQUEST_ID_LEN: usize = 32;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Event types understood by the schema registry.
///
/// A message whose `Type` header does not parse into one of these is rejected
/// before schema lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Request to introspect a repository.
    Introspect,
}

impl EventType {
    /// Every recognized event type.
    pub const ALL: &'static [EventType] = &[EventType::Introspect];

    /// Wire representation used in the `Type` header.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Introspect => "Introspect",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `Type` header names an event type this service does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("event not valid: '{0}'")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Header / HeaderSet
// ---------------------------------------------------------------------------

/// A single `(name, value)` message header. Values are opaque bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Vec<u8>,
}

impl Header {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered collection of message headers. Duplicate names are allowed; lookups
/// return the first match, as the broker client does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet(Vec<Header>);

impl HeaderSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a header set from alternating names and values.
    ///
    /// A trailing name without a value is ignored.
    #[must_use]
    pub fn from_pairs(keys_and_values: &[&str]) -> Self {
        keys_and_values
            .chunks_exact(2)
            .map(|pair| Header::new(pair[0], pair[1]))
            .collect()
    }

    /// Appends a header, keeping insertion order.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.push(Header::new(key, value));
    }

    /// Raw value of the first header named `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|header| header.key == key)
            .map(|header| header.value.as_slice())
    }

    /// UTF-8 value of the first header named `key`; `None` if absent or not UTF-8.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|value| std::str::from_utf8(value).ok())
    }

    /// The event type named by the `Type` header.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEventType`] when the header is missing or names an
    /// unrecognized type (an absent header is reported as an empty name).
    pub fn event_type(&self) -> Result<EventType, UnknownEventType> {
        self.get_str(HDR_TYPE).unwrap_or_default().parse()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Header> for HeaderSet {
    fn from_iter<T: IntoIterator<Item = Header>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for HeaderSet {
    type Item = Header;
    type IntoIter = std::vec::IntoIter<Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<Header> for HeaderSet {
    fn extend<T: IntoIterator<Item = Header>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

/// Renders headers as `{name: value; name: value}` for log lines.
impl fmt::Display for HeaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, header) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", header.key, String::from_utf8_lossy(&header.value))?;
        }
        f.write_str("}")
    }
}
