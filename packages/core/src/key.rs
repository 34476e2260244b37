//! Typed key parts: the closed set of primitive kinds a request may
//! contribute to a cache key or an encoded identifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One normalized parameter of a request.
///
/// Each variant has exactly one canonical text encoding (see the `Display`
/// impl), so two requests with equal parameters always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyPart {
    Str(String),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Uuid(Uuid),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // ':' separates parts, so it is escaped inside string parts.
            Self::Str(s) => f.write_str(&s.replace('%', "%25").replace(':', "%3A")),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{}", v.hyphenated()),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for KeyPart {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Uuid> for KeyPart {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

/// Joins parts with `:` using their canonical encodings.
#[must_use]
pub fn join_parts(parts: &[KeyPart]) -> String {
    parts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_parts_encode_plainly() {
        assert_eq!(KeyPart::from(42_i64).to_string(), "42");
        assert_eq!(KeyPart::from(-7_i32).to_string(), "-7");
        assert_eq!(KeyPart::from(7_u32).to_string(), "7");
        assert_eq!(KeyPart::from(true).to_string(), "true");
    }

    #[test]
    fn uuid_encodes_lowercase_hyphenated() {
        let id = Uuid::parse_str("A1A2A3A4-B1B2-C1C2-D1D2-D3D4D5D6D7D8").unwrap();
        assert_eq!(
            KeyPart::from(id).to_string(),
            "a1a2a3a4-b1b2-c1c2-d1d2-d3d4d5d6d7d8"
        );
    }

    #[test]
    fn separator_inside_strings_is_escaped() {
        let parts = vec![KeyPart::from("a:b"), KeyPart::from("c")];
        assert_eq!(join_parts(&parts), "a%3Ab:c");
        // Distinct inputs stay distinct after joining.
        let other = vec![KeyPart::from("a"), KeyPart::from("b:c")];
        assert_ne!(join_parts(&parts), join_parts(&other));
    }
}
