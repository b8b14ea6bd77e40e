use std::{
    collections::BTreeMap,
    fmt,
};

use bytes::Bytes;
use errors::TenancyError;
use serde::{
    Deserialize,
    Serialize,
};

/// Scalar key types supported by the backend key schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
pub enum ScalarType {
    S,
    N,
    B,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarType::S => "S",
            ScalarType::N => "N",
            ScalarType::B => "B",
        };
        f.write_str(s)
    }
}

/// A scalar attribute value in backend wire form. Numbers stay in their
/// decimal string representation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeValue {
    S(String),
    N(String),
    B(Bytes),
}

/// An attribute map, as sent to and returned from the backend.
pub type Item = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    pub fn s(value: impl Into<String>) -> Self {
        Self::S(value.into())
    }

    pub fn n(value: impl Into<String>) -> Self {
        Self::N(value.into())
    }

    pub fn b(value: impl Into<Bytes>) -> Self {
        Self::B(value.into())
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::S(_) => ScalarType::S,
            Self::N(_) => ScalarType::N,
            Self::B(_) => ScalarType::B,
        }
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// String form used inside prefixed physical values. Binary values are
    /// base64 so the result is always valid UTF-8.
    pub fn encode_string(&self) -> String {
        match self {
            Self::S(s) => s.clone(),
            Self::N(n) => n.clone(),
            Self::B(b) => base64::encode(b),
        }
    }

    /// Inverse of [`AttributeValue::encode_string`] for a known scalar type.
    pub fn decode_string(scalar_type: ScalarType, raw: &str) -> anyhow::Result<Self> {
        match scalar_type {
            ScalarType::S => Ok(Self::S(raw.to_owned())),
            ScalarType::N => Ok(Self::N(raw.to_owned())),
            ScalarType::B => {
                let bytes = base64::decode(raw)
                    .map_err(|_| TenancyError::malformed_prefix(raw))?;
                Ok(Self::B(Bytes::from(bytes)))
            },
        }
    }
}
