use std::{
    fmt::{
        self,
        Debug,
    },
    ops::Deref,
    str::FromStr,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::identifier::check_valid_identifier;

/// Opaque identity of a logical customer, carried ambiently across one
/// operation. Must never contain the configured prefix delimiter; the
/// identifier charset guarantees that for the default delimiter.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl FromStr for TenantId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_valid_identifier(s)?;
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for TenantId {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Deref for TenantId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<TenantId> for String {
    fn from(t: TenantId) -> Self {
        t.0
    }
}

#[cfg(any(test, feature = "testing"))]
impl proptest::arbitrary::Arbitrary for TenantId {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<TenantId>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::strategy::Strategy;

        use crate::identifier::arbitrary_regexes::IDENTIFIER_REGEX;
        IDENTIFIER_REGEX
            .prop_filter_map("Generated invalid TenantId", |s| {
                TenantId::from_str(&s).ok()
            })
            .boxed()
    }
}
