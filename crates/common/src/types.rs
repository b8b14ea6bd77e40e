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
use value::identifier::check_valid_identifier;

/// Name of a secondary index, virtual or physical.
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
pub struct IndexName(String);

impl FromStr for IndexName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_valid_identifier(s)?;
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for IndexName {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Debug for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Deref for IndexName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<IndexName> for String {
    fn from(n: IndexName) -> Self {
        n.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    Creating,
    Active,
    Deleting,
}

/// Which item images a change stream carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamViewType {
    KeysOnly,
    NewImage,
    OldImage,
    NewAndOldImages,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpecification {
    pub enabled: bool,
    pub view_type: StreamViewType,
    /// Assigned by the backend when the table is created.
    pub stream_label: Option<String>,
}

impl StreamSpecification {
    pub fn enabled(view_type: StreamViewType) -> Self {
        Self {
            enabled: true,
            view_type,
            stream_label: None,
        }
    }
}
