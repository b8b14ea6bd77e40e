//! Typed descriptions of tables and their primary keys and secondary
//! indexes, used for both virtual and physical tables.

use serde::{
    Deserialize,
    Serialize,
};
use value::{
    ScalarType,
    TableName,
};

use crate::types::{
    IndexName,
    StreamSpecification,
    TableStatus,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeKey {
    pub name: String,
    pub key_type: ScalarType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub hash_key: String,
    pub hash_key_type: ScalarType,
    pub range_key: Option<RangeKey>,
}

impl PrimaryKey {
    pub fn hash(name: impl Into<String>, hash_key_type: ScalarType) -> Self {
        Self {
            hash_key: name.into(),
            hash_key_type,
            range_key: None,
        }
    }

    pub fn hash_and_range(
        hash_key: impl Into<String>,
        hash_key_type: ScalarType,
        range_key: impl Into<String>,
        range_key_type: ScalarType,
    ) -> Self {
        Self {
            hash_key: hash_key.into(),
            hash_key_type,
            range_key: Some(RangeKey {
                name: range_key.into(),
                key_type: range_key_type,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondaryIndexKind {
    Gsi,
    Lsi,
}

/// Which attributes the backend copies into a secondary index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexProjection {
    All,
    KeysOnly,
    Include(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    pub index_name: IndexName,
    pub kind: SecondaryIndexKind,
    pub primary_key: PrimaryKey,
    pub projection: IndexProjection,
}

impl SecondaryIndex {
    pub fn new(index_name: IndexName, kind: SecondaryIndexKind, primary_key: PrimaryKey) -> Self {
        Self {
            index_name,
            kind,
            primary_key,
            projection: IndexProjection::All,
        }
    }

    pub fn with_projection(mut self, projection: IndexProjection) -> Self {
        self.projection = projection;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: TableName,
    pub primary_key: PrimaryKey,
    pub secondary_indexes: Vec<SecondaryIndex>,
    pub stream: Option<StreamSpecification>,
    pub status: TableStatus,
}

impl TableDescription {
    pub fn new(table_name: TableName, primary_key: PrimaryKey) -> Self {
        Self {
            table_name,
            primary_key,
            secondary_indexes: Vec::new(),
            stream: None,
            status: TableStatus::Active,
        }
    }

    pub fn with_secondary_index(mut self, index: SecondaryIndex) -> Self {
        self.secondary_indexes.push(index);
        self
    }

    pub fn with_stream(mut self, stream: StreamSpecification) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn secondary_index(&self, name: &IndexName) -> Option<&SecondaryIndex> {
        self.secondary_indexes
            .iter()
            .find(|index| &index.index_name == name)
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream.as_ref().is_some_and(|spec| spec.enabled)
    }
}
