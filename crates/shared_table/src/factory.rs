use common::{
    backend::CreateTableRequestFactory,
    schema::{
        PrimaryKey,
        SecondaryIndex,
        SecondaryIndexKind,
        TableDescription,
    },
    types::{
        StreamSpecification,
        StreamViewType,
    },
};
use mapping::keys_compatible;
use value::ScalarType;

/// Serves physical templates from a fixed catalogue of shared tables,
/// picking the first one whose key shape and index inventory satisfy the
/// virtual description.
pub struct StaticCreateTableRequestFactory {
    tables: Vec<TableDescription>,
}

impl StaticCreateTableRequestFactory {
    pub fn new(tables: Vec<TableDescription>) -> Self {
        Self { tables }
    }

    /// The standard shared catalogue: a hash-only table plus one table per
    /// range key type. Every table carries GSIs for each key shape; ranged
    /// tables additionally carry one LSI per range type.
    pub fn with_default_catalogue(
        prefix: &str,
        stream: Option<StreamViewType>,
    ) -> anyhow::Result<Self> {
        let range_types = [
            ("s", ScalarType::S),
            ("n", ScalarType::N),
            ("b", ScalarType::B),
        ];
        let mut tables = Vec::new();
        let shapes: [(&str, Option<ScalarType>); 4] = [
            ("s", None),
            ("s_s", Some(ScalarType::S)),
            ("s_n", Some(ScalarType::N)),
            ("s_b", Some(ScalarType::B)),
        ];
        for (suffix, range_type) in shapes {
            let primary_key = match range_type {
                None => PrimaryKey::hash("hk", ScalarType::S),
                Some(range_type) => {
                    PrimaryKey::hash_and_range("hk", ScalarType::S, "rk", range_type)
                },
            };
            let mut table =
                TableDescription::new(format!("{prefix}_{suffix}").parse()?, primary_key)
                    .with_secondary_index(SecondaryIndex::new(
                        "gsi_s".parse()?,
                        SecondaryIndexKind::Gsi,
                        PrimaryKey::hash("gsi_s_hk", ScalarType::S),
                    ));
            for (range_suffix, gsi_range_type) in range_types {
                table = table.with_secondary_index(SecondaryIndex::new(
                    format!("gsi_s_{range_suffix}").parse()?,
                    SecondaryIndexKind::Gsi,
                    PrimaryKey::hash_and_range(
                        format!("gsi_s_{range_suffix}_hk"),
                        ScalarType::S,
                        format!("gsi_s_{range_suffix}_rk"),
                        gsi_range_type,
                    ),
                ));
            }
            if range_type.is_some() {
                for (range_suffix, lsi_range_type) in range_types {
                    table = table.with_secondary_index(SecondaryIndex::new(
                        format!("lsi_{range_suffix}").parse()?,
                        SecondaryIndexKind::Lsi,
                        PrimaryKey::hash_and_range(
                            "hk",
                            ScalarType::S,
                            format!("lsi_{range_suffix}_rk"),
                            lsi_range_type,
                        ),
                    ));
                }
            }
            if let Some(view_type) = stream {
                table = table.with_stream(StreamSpecification::enabled(view_type));
            }
            tables.push(table);
        }
        Ok(Self { tables })
    }
}

impl CreateTableRequestFactory for StaticCreateTableRequestFactory {
    fn precreate_tables(&self) -> Vec<TableDescription> {
        self.tables.clone()
    }

    fn create_table_request(&self, virtual_table: &TableDescription) -> Option<TableDescription> {
        self.tables
            .iter()
            .find(|physical| supports(virtual_table, physical))
            .cloned()
    }
}

fn supports(virtual_table: &TableDescription, physical: &TableDescription) -> bool {
    // Range presence must match exactly at the table level so every physical
    // row carries its full key.
    if virtual_table.primary_key.range_key.is_some() != physical.primary_key.range_key.is_some() {
        return false;
    }
    if !keys_compatible(&virtual_table.primary_key, &physical.primary_key) {
        return false;
    }
    virtual_table.secondary_indexes.iter().all(|virtual_index| {
        physical.secondary_indexes.iter().any(|physical_index| {
            physical_index.kind == virtual_index.kind
                && keys_compatible(&virtual_index.primary_key, &physical_index.primary_key)
        })
    })
}
