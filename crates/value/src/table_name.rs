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

/// Name of a table, virtual or physical. Restricted to the identifier
/// charset so names can never collide with the prefix delimiter.
#[derive(
    Clone,
    Default,
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
pub struct TableName(String);

impl FromStr for TableName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_valid_identifier(s)?;
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for TableName {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Debug for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Deref for TableName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<TableName> for String {
    fn from(t: TableName) -> Self {
        t.0
    }
}

#[cfg(any(test, feature = "testing"))]
impl proptest::arbitrary::Arbitrary for TableName {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<TableName>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::strategy::Strategy;

        use crate::identifier::arbitrary_regexes::IDENTIFIER_REGEX;
        IDENTIFIER_REGEX
            .prop_filter_map("Generated invalid TableName", |s| {
                TableName::from_str(&s).ok()
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::TableName;

    #[test]
    fn table_name_valid() {
        assert!("table1".parse::<TableName>().is_ok());
        assert!("mt_shared_s_n".parse::<TableName>().is_ok());
    }

    #[test]
    fn table_name_invalid() {
        assert!("".parse::<TableName>().is_err());
        assert!("a.b".parse::<TableName>().is_err());
        assert!("_____".parse::<TableName>().is_err());
    }
}
