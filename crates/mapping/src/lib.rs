//! Maps virtual table schemas onto shared physical tables and rewrites
//! items, queries, and scans between the two forms.

mod cache;
mod field_mapping;
mod index_mapper;
mod item_mapper;
mod metrics;
mod query_mapper;
mod table_mapping;

pub use crate::{
    cache::TableMappingCache,
    field_mapping::{
        FieldMapper,
        FieldMapping,
        IndexScope,
        MappedField,
    },
    index_mapper::{
        keys_compatible,
        ByTypeIndexMapper,
        SecondaryIndexMapper,
    },
    item_mapper::ItemMapper,
    query_mapper::QueryMapper,
    table_mapping::{
        SecondaryIndexMapping,
        TableMapping,
        TableMappingBuilder,
    },
};
