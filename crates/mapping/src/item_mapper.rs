use value::Item;

use crate::table_mapping::TableMapping;

/// Rewrites item attribute maps between virtual and physical form.
pub struct ItemMapper<'a> {
    mapping: &'a TableMapping,
}

impl<'a> ItemMapper<'a> {
    pub(crate) fn new(mapping: &'a TableMapping) -> Self {
        Self { mapping }
    }

    /// Virtual → physical. A mapped attribute is emitted once per physical
    /// target, each independently encoded; unmapped attributes pass through
    /// unchanged.
    pub fn apply(&self, item: &Item) -> anyhow::Result<Item> {
        let mut out = Item::new();
        for (name, value) in item {
            match self.mapping.virtual_to_physical().get(name) {
                Some(mappings) => {
                    for mapping in mappings {
                        out.insert(
                            mapping.target.name.clone(),
                            self.mapping.field_mapper().apply(mapping, value)?,
                        );
                    }
                },
                None => {
                    out.insert(name.clone(), value.clone());
                },
            }
        }
        Ok(out)
    }

    /// Physical → virtual. An empty map is returned unchanged.
    pub fn reverse(&self, item: &Item) -> anyhow::Result<Item> {
        if item.is_empty() {
            return Ok(item.clone());
        }
        let mut out = Item::new();
        for (name, value) in item {
            match self.mapping.physical_to_virtual().get(name) {
                Some(mappings) => {
                    for mapping in mappings {
                        out.insert(
                            mapping.target.name.clone(),
                            self.mapping.field_mapper().reverse(mapping, value)?,
                        );
                    }
                },
                None => {
                    out.insert(name.clone(), value.clone());
                },
            }
        }
        Ok(out)
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
    use maplit::btreemap;
    use value::{
        AttributeValue,
        ScalarType,
    };

    use crate::table_mapping::test_helpers::builder_for;

    fn physical() -> TableDescription {
        TableDescription::new(
            "mt_shared_s".parse().unwrap(),
            PrimaryKey::hash("hk", ScalarType::S),
        )
        .with_secondary_index(SecondaryIndex::new(
            "gsi_s".parse().unwrap(),
            SecondaryIndexKind::Gsi,
            PrimaryKey::hash("gsi_s_hk", ScalarType::S),
        ))
    }

    #[test]
    fn apply_encodes_and_passes_unknown_attributes_through() -> anyhow::Result<()> {
        let virtual_table = TableDescription::new(
            "table1".parse()?,
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        );
        let mapping = builder_for(physical(), "ctx1").build(&virtual_table)?;

        let item = btreemap! {
            "hashKeyField".to_owned() => AttributeValue::s("1"),
            "someField".to_owned() => AttributeValue::s("value-1"),
        };
        let physical_item = mapping.item_mapper().apply(&item)?;
        assert_eq!(
            physical_item,
            btreemap! {
                "hk".to_owned() => AttributeValue::s("ctx1.table1.1"),
                "someField".to_owned() => AttributeValue::s("value-1"),
            },
        );

        let back = mapping.item_mapper().reverse(&physical_item)?;
        assert_eq!(back, item);
        Ok(())
    }

    #[test]
    fn virtual_hash_fans_out_to_every_physical_target() -> anyhow::Result<()> {
        // The virtual hash key also serves as the hash key of a GSI, so it
        // feeds two physical attributes.
        let virtual_table = TableDescription::new(
            "table1".parse()?,
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        )
        .with_secondary_index(SecondaryIndex::new(
            "by_hash".parse()?,
            SecondaryIndexKind::Gsi,
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        ));
        let mapping = builder_for(physical(), "ctx1").build(&virtual_table)?;

        let item = btreemap! {
            "hashKeyField".to_owned() => AttributeValue::s("1"),
        };
        let physical_item = mapping.item_mapper().apply(&item)?;
        assert_eq!(
            physical_item,
            btreemap! {
                "hk".to_owned() => AttributeValue::s("ctx1.table1.1"),
                "gsi_s_hk".to_owned() => AttributeValue::s("ctx1.table1.1"),
            },
        );

        let back = mapping.item_mapper().reverse(&physical_item)?;
        assert_eq!(back, item);
        Ok(())
    }

    #[test]
    fn reverse_of_empty_map_is_identity() -> anyhow::Result<()> {
        let virtual_table = TableDescription::new(
            "table1".parse()?,
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        );
        let mapping = builder_for(physical(), "ctx1").build(&virtual_table)?;
        let empty = maplit::btreemap! {};
        assert_eq!(mapping.item_mapper().reverse(&empty)?, empty);
        Ok(())
    }

    #[test]
    fn numeric_virtual_hash_round_trips_through_string_form() -> anyhow::Result<()> {
        let virtual_table = TableDescription::new(
            "table1".parse()?,
            PrimaryKey::hash("hashKeyField", ScalarType::N),
        );
        let mapping = builder_for(physical(), "ctx1").build(&virtual_table)?;

        let item = btreemap! {
            "hashKeyField".to_owned() => AttributeValue::n("42"),
        };
        let physical_item = mapping.item_mapper().apply(&item)?;
        assert_eq!(
            physical_item,
            btreemap! { "hk".to_owned() => AttributeValue::s("ctx1.table1.42") },
        );
        assert_eq!(mapping.item_mapper().reverse(&physical_item)?, item);
        Ok(())
    }
}
