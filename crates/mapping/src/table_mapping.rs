use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        OnceLock,
    },
};

use anyhow::Context;
use common::{
    backend::CreateTableRequestFactory,
    schema::{
        PrimaryKey,
        SecondaryIndex,
        SecondaryIndexKind,
        TableDescription,
    },
    tenant::TenantContextProvider,
    types::IndexName,
};
use errors::TenancyError;
use value::{
    FieldPrefix,
    ScalarType,
    TableName,
};

use crate::{
    field_mapping::{
        FieldMapper,
        FieldMapping,
        IndexScope,
        MappedField,
    },
    index_mapper::SecondaryIndexMapper,
    item_mapper::ItemMapper,
    metrics::log_mapping_built,
    query_mapper::QueryMapper,
};

/// One virtual secondary index paired with the physical index backing it.
#[derive(Clone, Debug)]
pub struct SecondaryIndexMapping {
    pub virtual_index: SecondaryIndex,
    pub physical_index: SecondaryIndex,
    pub field_mappings: Vec<FieldMapping>,
}

/// The per-(tenant, virtual table) mapping artifact: the virtual
/// description, the resolved physical description, and every field rewrite
/// rule grouped in both directions.
///
/// Immutable after construction, except for a one-time physical refresh that
/// captures backend-assigned fields such as stream labels.
#[derive(Debug)]
pub struct TableMapping {
    virtual_table: TableDescription,
    physical_table: TableDescription,
    refreshed_physical: OnceLock<TableDescription>,
    field_mapper: FieldMapper,
    virtual_to_physical: BTreeMap<String, Vec<FieldMapping>>,
    physical_to_virtual: BTreeMap<String, Vec<FieldMapping>>,
    index_mappings: BTreeMap<IndexName, SecondaryIndexMapping>,
}

impl TableMapping {
    pub fn virtual_table(&self) -> &TableDescription {
        &self.virtual_table
    }

    pub fn physical_table(&self) -> &TableDescription {
        self.refreshed_physical.get().unwrap_or(&self.physical_table)
    }

    pub fn physical_table_name(&self) -> &TableName {
        &self.physical_table.table_name
    }

    /// Captures the backend's view of the physical table. Only the first
    /// call takes effect.
    pub fn refresh_physical(&self, description: TableDescription) {
        let _ = self.refreshed_physical.set(description);
    }

    pub fn field_mapper(&self) -> &FieldMapper {
        &self.field_mapper
    }

    pub fn virtual_to_physical(&self) -> &BTreeMap<String, Vec<FieldMapping>> {
        &self.virtual_to_physical
    }

    pub fn physical_to_virtual(&self) -> &BTreeMap<String, Vec<FieldMapping>> {
        &self.physical_to_virtual
    }

    pub fn index_mapping(&self, virtual_index: &IndexName) -> Option<&SecondaryIndexMapping> {
        self.index_mappings.get(virtual_index)
    }

    pub fn index_mappings(&self) -> impl Iterator<Item = &SecondaryIndexMapping> {
        self.index_mappings.values()
    }

    /// Field mappings of the table's own key schema.
    pub fn table_key_mappings(&self) -> Vec<&FieldMapping> {
        self.virtual_to_physical
            .values()
            .flatten()
            .filter(|mapping| mapping.virtual_index_name.is_none())
            .collect()
    }

    pub fn item_mapper(&self) -> ItemMapper<'_> {
        ItemMapper::new(self)
    }

    pub fn query_mapper(&self) -> QueryMapper<'_> {
        QueryMapper::new(self)
    }
}

/// Builds and validates the [`TableMapping`] for a virtual table
/// description. Any structural incompatibility fails construction.
pub struct TableMappingBuilder {
    factory: Arc<dyn CreateTableRequestFactory>,
    index_mapper: Arc<dyn SecondaryIndexMapper>,
    context: Arc<dyn TenantContextProvider>,
    prefix: FieldPrefix,
}

impl TableMappingBuilder {
    pub fn new(
        factory: Arc<dyn CreateTableRequestFactory>,
        index_mapper: Arc<dyn SecondaryIndexMapper>,
        context: Arc<dyn TenantContextProvider>,
        prefix: FieldPrefix,
    ) -> Self {
        Self {
            factory,
            index_mapper,
            context,
            prefix,
        }
    }

    pub fn build(&self, virtual_table: &TableDescription) -> anyhow::Result<TableMapping> {
        let physical_table = self
            .factory
            .create_table_request(virtual_table)
            .ok_or_else(|| TenancyError::unsupported_virtual_table(&virtual_table.table_name))?;
        validate_physical_hash_keys(virtual_table, &physical_table)?;
        validate_key_compatibility(
            virtual_table,
            &physical_table,
            &virtual_table.primary_key,
            &physical_table.primary_key,
            "primary key",
        )?;

        let mut field_mappings = Vec::new();
        field_mappings.push(FieldMapping::table_key(
            MappedField::new(
                &virtual_table.primary_key.hash_key,
                virtual_table.primary_key.hash_key_type,
            ),
            MappedField::new(&physical_table.primary_key.hash_key, ScalarType::S),
            true,
        ));
        if let Some(virtual_range) = &virtual_table.primary_key.range_key {
            let physical_range = physical_table
                .primary_key
                .range_key
                .as_ref()
                .context("physical range key missing after validation")?;
            field_mappings.push(FieldMapping::table_key(
                MappedField::new(&virtual_range.name, virtual_range.key_type),
                MappedField::new(&physical_range.name, physical_range.key_type),
                false,
            ));
        }

        let mut index_mappings = BTreeMap::new();
        // physical LSI name -> virtual LSI name, to reject duplicate targets
        let mut used_physical_lsis: BTreeMap<IndexName, IndexName> = BTreeMap::new();
        for virtual_index in &virtual_table.secondary_indexes {
            let physical_index = self.index_mapper.lookup(virtual_index, &physical_table)?;
            validate_key_compatibility(
                virtual_table,
                &physical_table,
                &virtual_index.primary_key,
                &physical_index.primary_key,
                &format!("secondary index '{}'", virtual_index.index_name),
            )?;
            if virtual_index.kind == SecondaryIndexKind::Lsi {
                if let Some(prior) = used_physical_lsis.insert(
                    physical_index.index_name.clone(),
                    virtual_index.index_name.clone(),
                ) {
                    return Err(TenancyError::invalid_mapping(
                        &virtual_table.table_name,
                        &physical_table.table_name,
                        format!(
                            "virtual LSIs '{prior}' and '{}' both map to physical LSI '{}'",
                            virtual_index.index_name, physical_index.index_name,
                        ),
                    )
                    .into());
                }
            }

            // The LSI shares the table's partition key, so its hash mapping
            // carries table scope.
            let hash_scope = match virtual_index.kind {
                SecondaryIndexKind::Lsi => IndexScope::Table,
                SecondaryIndexKind::Gsi => IndexScope::SecondaryIndex,
            };
            let mut mappings = vec![FieldMapping::index_key(
                MappedField::new(
                    &virtual_index.primary_key.hash_key,
                    virtual_index.primary_key.hash_key_type,
                ),
                MappedField::new(&physical_index.primary_key.hash_key, ScalarType::S),
                virtual_index.index_name.clone(),
                physical_index.index_name.clone(),
                hash_scope,
                true,
            )];
            if let Some(virtual_range) = &virtual_index.primary_key.range_key {
                let physical_range = physical_index
                    .primary_key
                    .range_key
                    .as_ref()
                    .context("physical index range key missing after validation")?;
                mappings.push(FieldMapping::index_key(
                    MappedField::new(&virtual_range.name, virtual_range.key_type),
                    MappedField::new(&physical_range.name, physical_range.key_type),
                    virtual_index.index_name.clone(),
                    physical_index.index_name.clone(),
                    IndexScope::SecondaryIndex,
                    false,
                ));
            }
            field_mappings.extend(mappings.iter().cloned());
            index_mappings.insert(
                virtual_index.index_name.clone(),
                SecondaryIndexMapping {
                    virtual_index: virtual_index.clone(),
                    physical_index,
                    field_mappings: mappings,
                },
            );
        }

        let mut virtual_to_physical: BTreeMap<String, Vec<FieldMapping>> = BTreeMap::new();
        for mapping in &field_mappings {
            let entry = virtual_to_physical
                .entry(mapping.source.name.clone())
                .or_default();
            if !entry
                .iter()
                .any(|existing| existing.target.name == mapping.target.name)
            {
                entry.push(mapping.clone());
            }
        }
        let mut physical_to_virtual: BTreeMap<String, Vec<FieldMapping>> = BTreeMap::new();
        for mapping in &field_mappings {
            let inverted = mapping.invert();
            let entry = physical_to_virtual
                .entry(inverted.source.name.clone())
                .or_default();
            if !entry
                .iter()
                .any(|existing| existing.target.name == inverted.target.name)
            {
                entry.push(inverted);
            }
        }

        tracing::debug!(
            virtual_table = %virtual_table.table_name,
            physical_table = %physical_table.table_name,
            "built table mapping",
        );
        log_mapping_built();
        Ok(TableMapping {
            virtual_table: virtual_table.clone(),
            field_mapper: FieldMapper::new(
                self.context.clone(),
                virtual_table.table_name.clone(),
                self.prefix.clone(),
            ),
            physical_table,
            refreshed_physical: OnceLock::new(),
            virtual_to_physical,
            physical_to_virtual,
            index_mappings,
        })
    }
}

fn validate_physical_hash_keys(
    virtual_table: &TableDescription,
    physical_table: &TableDescription,
) -> anyhow::Result<()> {
    if physical_table.primary_key.hash_key_type != ScalarType::S {
        return Err(TenancyError::invalid_mapping(
            &virtual_table.table_name,
            &physical_table.table_name,
            format!(
                "physical hash key '{}' has type {}, expected S",
                physical_table.primary_key.hash_key, physical_table.primary_key.hash_key_type,
            ),
        )
        .into());
    }
    for index in &physical_table.secondary_indexes {
        if index.primary_key.hash_key_type != ScalarType::S {
            return Err(TenancyError::invalid_mapping(
                &virtual_table.table_name,
                &physical_table.table_name,
                format!(
                    "physical index '{}' hash key '{}' has type {}, expected S",
                    index.index_name, index.primary_key.hash_key, index.primary_key.hash_key_type,
                ),
            )
            .into());
        }
    }
    Ok(())
}

fn validate_key_compatibility(
    virtual_table: &TableDescription,
    physical_table: &TableDescription,
    virtual_key: &PrimaryKey,
    physical_key: &PrimaryKey,
    what: &str,
) -> anyhow::Result<()> {
    if physical_key.hash_key_type != ScalarType::S {
        return Err(TenancyError::invalid_mapping(
            &virtual_table.table_name,
            &physical_table.table_name,
            format!(
                "{what}: physical hash key '{}' has type {}, expected S",
                physical_key.hash_key, physical_key.hash_key_type,
            ),
        )
        .into());
    }
    match (&virtual_key.range_key, &physical_key.range_key) {
        (Some(virtual_range), Some(physical_range))
            if virtual_range.key_type != physical_range.key_type =>
        {
            Err(TenancyError::invalid_mapping(
                &virtual_table.table_name,
                &physical_table.table_name,
                format!(
                    "{what}: range key types differ ({} vs {})",
                    virtual_range.key_type, physical_range.key_type,
                ),
            )
            .into())
        },
        (Some(virtual_range), None) => Err(TenancyError::invalid_mapping(
            &virtual_table.table_name,
            &physical_table.table_name,
            format!(
                "{what}: virtual range key '{}' has no physical counterpart",
                virtual_range.name,
            ),
        )
        .into()),
        _ => Ok(()),
    }
}


#[cfg(test)]
mod tests {
    use common::schema::{
        PrimaryKey,
        SecondaryIndex,
        SecondaryIndexKind,
        TableDescription,
    };
    use errors::{
        ErrorKind,
        TenancyErrorExt,
    };
    use value::ScalarType;

    use super::test_helpers::builder_for;
    use crate::field_mapping::IndexScope;

    fn index(name: &str, kind: SecondaryIndexKind, primary_key: PrimaryKey) -> SecondaryIndex {
        SecondaryIndex::new(name.parse().unwrap(), kind, primary_key)
    }

    fn physical_with_indexes() -> TableDescription {
        TableDescription::new(
            "mt_shared_s_s".parse().unwrap(),
            PrimaryKey::hash_and_range("hk", ScalarType::S, "rk", ScalarType::S),
        )
        .with_secondary_index(index(
            "gsi_s",
            SecondaryIndexKind::Gsi,
            PrimaryKey::hash("gsi_s_hk", ScalarType::S),
        ))
        .with_secondary_index(index(
            "lsi_s",
            SecondaryIndexKind::Lsi,
            PrimaryKey::hash_and_range("hk", ScalarType::S, "lsi_s_rk", ScalarType::S),
        ))
    }

    #[test]
    fn builds_table_and_index_mappings() -> anyhow::Result<()> {
        let virtual_table = TableDescription::new(
            "table1".parse()?,
            PrimaryKey::hash_and_range("hashKeyField", ScalarType::S, "rangeKeyField", ScalarType::S),
        )
        .with_secondary_index(index(
            "by_color",
            SecondaryIndexKind::Gsi,
            PrimaryKey::hash("color", ScalarType::S),
        ))
        .with_secondary_index(index(
            "by_date",
            SecondaryIndexKind::Lsi,
            PrimaryKey::hash_and_range("hashKeyField", ScalarType::S, "date", ScalarType::S),
        ));
        let mapping = builder_for(physical_with_indexes(), "ctx1").build(&virtual_table)?;

        // The virtual hash key fans out to the physical table hash and the
        // LSI hash, which is the same physical attribute.
        let hash_targets: Vec<&str> = mapping.virtual_to_physical()["hashKeyField"]
            .iter()
            .map(|m| m.target.name.as_str())
            .collect();
        assert_eq!(hash_targets, vec!["hk"]);

        let gsi = mapping.index_mapping(&"by_color".parse()?).unwrap();
        assert_eq!(gsi.physical_index.index_name, "gsi_s".parse()?);
        assert_eq!(gsi.field_mappings[0].index_scope, IndexScope::SecondaryIndex);

        let lsi = mapping.index_mapping(&"by_date".parse()?).unwrap();
        assert_eq!(lsi.physical_index.index_name, "lsi_s".parse()?);
        assert_eq!(lsi.field_mappings[0].index_scope, IndexScope::Table);
        assert_eq!(lsi.field_mappings[1].index_scope, IndexScope::SecondaryIndex);
        assert!(!lsi.field_mappings[1].context_aware);

        assert_eq!(mapping.table_key_mappings().len(), 2);
        Ok(())
    }

    #[test]
    fn non_string_physical_hash_is_invalid() {
        let virtual_table = TableDescription::new(
            "table1".parse().unwrap(),
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        );
        let physical = TableDescription::new(
            "mt_shared_n".parse().unwrap(),
            PrimaryKey::hash("hk", ScalarType::N),
        );
        let err = builder_for(physical, "ctx1")
            .build(&virtual_table)
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidMapping));
    }

    #[test]
    fn range_type_mismatch_is_invalid() {
        let virtual_table = TableDescription::new(
            "table1".parse().unwrap(),
            PrimaryKey::hash_and_range("hashKeyField", ScalarType::S, "ts", ScalarType::N),
        );
        let err = builder_for(physical_with_indexes(), "ctx1")
            .build(&virtual_table)
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidMapping));
    }

    #[test]
    fn virtual_range_without_physical_range_is_invalid() {
        let virtual_table = TableDescription::new(
            "table1".parse().unwrap(),
            PrimaryKey::hash_and_range("hashKeyField", ScalarType::S, "ts", ScalarType::S),
        );
        let physical = TableDescription::new(
            "mt_shared_s".parse().unwrap(),
            PrimaryKey::hash("hk", ScalarType::S),
        );
        let err = builder_for(physical, "ctx1")
            .build(&virtual_table)
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidMapping));
    }

    #[test]
    fn duplicate_lsi_targets_are_invalid() {
        let virtual_table = TableDescription::new(
            "table1".parse().unwrap(),
            PrimaryKey::hash_and_range("hashKeyField", ScalarType::S, "rangeKeyField", ScalarType::S),
        )
        .with_secondary_index(index(
            "by_date",
            SecondaryIndexKind::Lsi,
            PrimaryKey::hash_and_range("hashKeyField", ScalarType::S, "date", ScalarType::S),
        ))
        .with_secondary_index(index(
            "by_label",
            SecondaryIndexKind::Lsi,
            PrimaryKey::hash_and_range("hashKeyField", ScalarType::S, "label", ScalarType::S),
        ));
        let err = builder_for(physical_with_indexes(), "ctx1")
            .build(&virtual_table)
            .unwrap_err();
        assert!(err.is_kind(ErrorKind::InvalidMapping));
    }

    #[test]
    fn missing_template_is_unsupported() {
        use std::sync::Arc;

        use common::{
            backend::CreateTableRequestFactory,
            schema::TableDescription,
            tenant::StaticTenantContext,
        };
        use value::FieldPrefix;

        use super::TableMappingBuilder;
        use crate::index_mapper::ByTypeIndexMapper;

        struct EmptyFactory;
        impl CreateTableRequestFactory for EmptyFactory {
            fn precreate_tables(&self) -> Vec<TableDescription> {
                Vec::new()
            }

            fn create_table_request(
                &self,
                _virtual_table: &TableDescription,
            ) -> Option<TableDescription> {
                None
            }
        }

        let builder = TableMappingBuilder::new(
            Arc::new(EmptyFactory),
            Arc::new(ByTypeIndexMapper),
            Arc::new(StaticTenantContext::new()),
            FieldPrefix::default(),
        );
        let virtual_table = TableDescription::new(
            "table1".parse().unwrap(),
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        );
        let err = builder.build(&virtual_table).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsupportedVirtualTable));
    }

    #[test]
    fn one_time_physical_refresh() -> anyhow::Result<()> {
        let virtual_table = TableDescription::new(
            "table1".parse()?,
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        );
        let physical = TableDescription::new(
            "mt_shared_s".parse()?,
            PrimaryKey::hash("hk", ScalarType::S),
        );
        let mapping = builder_for(physical.clone(), "ctx1").build(&virtual_table)?;

        let mut refreshed = physical.clone();
        refreshed.stream = Some(common::types::StreamSpecification {
            enabled: true,
            view_type: common::types::StreamViewType::NewAndOldImages,
            stream_label: Some("stream/mt_shared_s/000001".to_owned()),
        });
        mapping.refresh_physical(refreshed.clone());
        assert_eq!(mapping.physical_table(), &refreshed);

        // A second refresh is a no-op.
        mapping.refresh_physical(physical);
        assert_eq!(mapping.physical_table(), &refreshed);
        Ok(())
    }
}
