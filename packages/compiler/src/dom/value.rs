//! Default values carried by leaf data elements.

use std::fmt;

use serde::{Serialize, Serializer};

/// A typed default value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Variant {
    Bytes(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
    String(String),
    Int(i64),
    UInt(u64),
    Double(f64),
    Bool(bool),
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

impl Variant {
    /// Integer view of the value, if it has one.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(i128::from(*v)),
            Self::UInt(v) => Some(i128::from(*v)),
            Self::Bool(b) => Some(i128::from(*b)),
            Self::Double(d) if d.fract() == 0.0 => Some(*d as i128),
            Self::String(s) => s.trim().parse().ok(),
            Self::Bytes(_) | Self::Double(_) => None,
        }
    }

    /// Bytes of the value as they would appear in a blob.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bytes(b) => b.clone(),
            Self::String(s) => s.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "{}", hex::encode(b)),
            Self::String(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_views() {
        assert_eq!(Variant::UInt(7).as_i128(), Some(7));
        assert_eq!(Variant::Int(-3).as_i128(), Some(-3));
        assert_eq!(Variant::String(" 42 ".into()).as_i128(), Some(42));
        assert_eq!(Variant::Double(1.5).as_i128(), None);
        assert_eq!(Variant::Bytes(vec![1]).as_i128(), None);
    }

    #[test]
    fn test_serializes_bytes_as_hex() {
        let json = serde_json::to_string(&Variant::Bytes(vec![0x48, 0x69])).unwrap();
        assert_eq!(json, r#"{"type":"bytes","value":"4869"}"#);
    }

    #[test]
    fn test_to_bytes() {
        assert_eq!(Variant::String("hi".into()).to_bytes(), b"hi".to_vec());
        assert_eq!(Variant::UInt(12).to_bytes(), b"12".to_vec());
    }
}
