use common::schema::{
    PrimaryKey,
    SecondaryIndex,
    TableDescription,
};
use errors::TenancyError;
use value::ScalarType;

/// Chooses the physical secondary index backing a virtual one.
pub trait SecondaryIndexMapper: Send + Sync + 'static {
    fn lookup(
        &self,
        virtual_index: &SecondaryIndex,
        physical_table: &TableDescription,
    ) -> anyhow::Result<SecondaryIndex>;
}

/// Partitions the physical indexes by kind and takes the first one, in
/// declaration order, whose key schema is compatible.
#[derive(Clone, Copy, Debug, Default)]
pub struct ByTypeIndexMapper;

impl SecondaryIndexMapper for ByTypeIndexMapper {
    fn lookup(
        &self,
        virtual_index: &SecondaryIndex,
        physical_table: &TableDescription,
    ) -> anyhow::Result<SecondaryIndex> {
        physical_table
            .secondary_indexes
            .iter()
            .filter(|physical| physical.kind == virtual_index.kind)
            .find(|physical| keys_compatible(&virtual_index.primary_key, &physical.primary_key))
            .cloned()
            .ok_or_else(|| TenancyError::unmappable_index(&virtual_index.index_name).into())
    }
}

/// A virtual key fits a physical key when the physical hash key is a string
/// and, if the virtual key has a range key, the physical key has one of the
/// exact same type.
pub fn keys_compatible(virtual_key: &PrimaryKey, physical_key: &PrimaryKey) -> bool {
    if physical_key.hash_key_type != ScalarType::S {
        return false;
    }
    match (&virtual_key.range_key, &physical_key.range_key) {
        (None, _) => true,
        (Some(virtual_range), Some(physical_range)) => {
            virtual_range.key_type == physical_range.key_type
        },
        (Some(_), None) => false,
    }
}
