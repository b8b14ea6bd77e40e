use std::{
    collections::BTreeMap,
    sync::LazyLock,
};

use anyhow::Context;
use common::{
    requests::{
        ExpressionNames,
        ExpressionValues,
        KeyCondition,
        QueryRequest,
        ScanRequest,
    },
    types::IndexName,
};
use errors::TenancyError;
use regex::Regex;
use value::AttributeValue;

use crate::{
    field_mapping::FieldMapping,
    table_mapping::TableMapping,
};

/// `#alias = :placeholder` pairs inside an expression in substitution form.
static ALIAS_EQUALITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(#[A-Za-z0-9_]+)\s*=\s*(:[A-Za-z0-9_]+)").unwrap());

/// Rewrites query and scan requests into physical form: table and index
/// names, equality key conditions, placeholder maps, and the tenant scoping
/// predicate.
pub struct QueryMapper<'a> {
    mapping: &'a TableMapping,
}

impl<'a> QueryMapper<'a> {
    pub(crate) fn new(mapping: &'a TableMapping) -> Self {
        Self { mapping }
    }

    pub fn apply_query(&self, request: &QueryRequest) -> anyhow::Result<QueryRequest> {
        let mut out = request.clone();
        out.table_name = self.mapping.physical_table_name().clone();
        let key_mappings = self.resolve_index(&request.index_name, &mut out.index_name)?;

        let mut conditions = BTreeMap::new();
        let mut hash_pinned = false;
        for (field, condition) in &request.key_conditions {
            match key_mappings.iter().find(|m| m.source.name == *field) {
                Some(mapping) => {
                    let value = condition.equality_value().ok_or_else(|| {
                        TenancyError::unsupported_predicate(format!(
                            "only equality conditions are supported on key field '{field}'"
                        ))
                    })?;
                    let encoded = self.mapping.field_mapper().apply(mapping, value)?;
                    conditions.insert(mapping.target.name.clone(), KeyCondition::equals(encoded));
                    if mapping.context_aware {
                        hash_pinned = true;
                    }
                },
                None => {
                    conditions.insert(field.clone(), condition.clone());
                },
            }
        }
        // The encoded hash pin already scopes the query to the current
        // tenant and virtual table, so no extra predicate is appended.
        if !hash_pinned {
            return Err(TenancyError::unsupported_predicate(
                "query requires an equality condition on the hash key",
            )
            .into());
        }
        out.key_conditions = conditions;

        self.rewrite_expression_maps(
            request.filter_expression.as_deref(),
            &mut out.expression_attribute_names,
            &mut out.expression_attribute_values,
            &key_mappings,
        )?;
        Ok(out)
    }

    pub fn apply_scan(&self, request: &ScanRequest) -> anyhow::Result<ScanRequest> {
        let mut out = request.clone();
        out.table_name = self.mapping.physical_table_name().clone();
        let key_mappings = self.resolve_index(&request.index_name, &mut out.index_name)?;

        self.rewrite_expression_maps(
            request.filter_expression.as_deref(),
            &mut out.expression_attribute_names,
            &mut out.expression_attribute_values,
            &key_mappings,
        )?;

        // Scope the scan to the current tenant and virtual table with a
        // begins_with predicate on the physical hash key.
        let hash_mapping = key_mappings
            .iter()
            .find(|m| m.context_aware)
            .context("mapping has no context-aware hash field")?;
        let scope_prefix = self.mapping.field_mapper().scope_prefix()?;
        let names = out
            .expression_attribute_names
            .get_or_insert_with(Default::default);
        let values = out
            .expression_attribute_values
            .get_or_insert_with(Default::default);
        let alias = fresh_placeholder("#mt_scope", |candidate| names.contains_key(candidate));
        let placeholder =
            fresh_placeholder(":mt_scope", |candidate| values.contains_key(candidate));
        names.insert(alias.clone(), hash_mapping.target.name.clone());
        values.insert(placeholder.clone(), AttributeValue::S(scope_prefix));
        out.filter_expression = Some(match &request.filter_expression {
            Some(filter) => format!("({filter}) AND begins_with({alias}, {placeholder})"),
            None => format!("begins_with({alias}, {placeholder})"),
        });
        Ok(out)
    }

    /// Table-level key mappings when no index is named, the paired physical
    /// index's otherwise.
    fn resolve_index(
        &self,
        virtual_index: &Option<IndexName>,
        out_index: &mut Option<IndexName>,
    ) -> anyhow::Result<Vec<&FieldMapping>> {
        match virtual_index {
            None => Ok(self.mapping.table_key_mappings()),
            Some(name) => {
                let index_mapping = self
                    .mapping
                    .index_mapping(name)
                    .ok_or_else(|| TenancyError::unmappable_index(name))?;
                *out_index = Some(index_mapping.physical_index.index_name.clone());
                Ok(index_mapping.field_mappings.iter().collect())
            },
        }
    }

    /// Clones-and-rewrites the placeholder maps: aliased equality literals
    /// over mapped fields are encoded and alias targets renamed to their
    /// physical attribute. Any mapped field of the table is rewritten, not
    /// just the targeted index's key fields; everything else passes through
    /// in substitution form.
    fn rewrite_expression_maps(
        &self,
        expression: Option<&str>,
        names: &mut Option<ExpressionNames>,
        values: &mut Option<ExpressionValues>,
        key_mappings: &[&FieldMapping],
    ) -> anyhow::Result<()> {
        // Encode literals first, while the names map still holds virtual
        // attribute names.
        if let (Some(expression), Some(values_map)) = (expression, values.as_mut()) {
            for caps in ALIAS_EQUALITY.captures_iter(expression) {
                let alias = &caps[1];
                let placeholder = &caps[2];
                let Some(field) = names.as_ref().and_then(|n| n.get(alias)) else {
                    continue;
                };
                let Some(mapping) = self.expression_mapping(field, key_mappings) else {
                    continue;
                };
                if let Some(value) = values_map.get(placeholder) {
                    let encoded = self.mapping.field_mapper().apply(mapping, value)?;
                    values_map.insert(placeholder.to_owned(), encoded);
                }
            }
        }
        if let Some(names_map) = names.as_mut() {
            for target in names_map.values_mut() {
                if let Some(mapping) = self.expression_mapping(target, key_mappings) {
                    *target = mapping.target.name.clone();
                }
            }
        }
        Ok(())
    }

    /// The rewrite rule for a virtual field inside an expression: the
    /// targeted index's own mapping when the field belongs to it (so a
    /// fanned-out hash key resolves to the index under query), otherwise
    /// the field's first mapping on the table.
    fn expression_mapping<'m>(
        &'m self,
        field: &str,
        key_mappings: &[&'m FieldMapping],
    ) -> Option<&'m FieldMapping> {
        key_mappings
            .iter()
            .find(|mapping| mapping.source.name == field)
            .copied()
            .or_else(|| {
                self.mapping
                    .virtual_to_physical()
                    .get(field)
                    .and_then(|mappings| mappings.first())
            })
    }
}

fn fresh_placeholder(base: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_owned();
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{base}{n}");
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use common::{
        requests::{
            ComparisonOperator,
            KeyCondition,
            QueryRequest,
            ScanRequest,
        },
        schema::{
            PrimaryKey,
            SecondaryIndex,
            SecondaryIndexKind,
            TableDescription,
        },
    };
    use errors::{
        ErrorKind,
        TenancyErrorExt,
    };
    use maplit::btreemap;
    use value::{
        AttributeValue,
        ScalarType,
    };

    use crate::table_mapping::{
        test_helpers::builder_for,
        TableMapping,
    };

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

    fn mapping() -> TableMapping {
        let virtual_table = TableDescription::new(
            "table1".parse().unwrap(),
            PrimaryKey::hash("hashKeyField", ScalarType::S),
        )
        .with_secondary_index(SecondaryIndex::new(
            "by_color".parse().unwrap(),
            SecondaryIndexKind::Gsi,
            PrimaryKey::hash("color", ScalarType::S),
        ));
        builder_for(physical(), "ctx1").build(&virtual_table).unwrap()
    }

    #[test]
    fn query_pins_the_physical_hash_key() -> anyhow::Result<()> {
        let mapping = mapping();
        let request = QueryRequest {
            table_name: "table1".parse()?,
            key_conditions: btreemap! {
                "hashKeyField".to_owned() => KeyCondition::equals(AttributeValue::s("1")),
            },
            ..Default::default()
        };
        let physical = mapping.query_mapper().apply_query(&request)?;
        assert_eq!(physical.table_name, "mt_shared_s".parse()?);
        assert_eq!(
            physical.key_conditions,
            btreemap! {
                "hk".to_owned() =>
                    KeyCondition::equals(AttributeValue::s("ctx1.table1.1")),
            },
        );
        assert_eq!(physical.filter_expression, None);
        Ok(())
    }

    #[test]
    fn query_on_index_substitutes_the_physical_index() -> anyhow::Result<()> {
        let mapping = mapping();
        let request = QueryRequest {
            table_name: "table1".parse()?,
            index_name: Some("by_color".parse()?),
            key_conditions: btreemap! {
                "color".to_owned() => KeyCondition::equals(AttributeValue::s("red")),
            },
            ..Default::default()
        };
        let physical = mapping.query_mapper().apply_query(&request)?;
        assert_eq!(physical.index_name, Some("gsi_s".parse()?));
        assert_eq!(
            physical.key_conditions,
            btreemap! {
                "gsi_s_hk".to_owned() =>
                    KeyCondition::equals(AttributeValue::s("ctx1.table1.red")),
            },
        );
        Ok(())
    }

    #[test]
    fn non_equality_on_a_key_is_unsupported() {
        let mapping = mapping();
        let request = QueryRequest {
            table_name: "table1".parse().unwrap(),
            key_conditions: btreemap! {
                "hashKeyField".to_owned() => KeyCondition::new(
                    ComparisonOperator::BeginsWith,
                    vec![AttributeValue::s("1")],
                ),
            },
            ..Default::default()
        };
        let err = mapping.query_mapper().apply_query(&request).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsupportedPredicate));
    }

    #[test]
    fn query_without_hash_equality_is_unsupported() {
        let mapping = mapping();
        let request = QueryRequest {
            table_name: "table1".parse().unwrap(),
            ..Default::default()
        };
        let err = mapping.query_mapper().apply_query(&request).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsupportedPredicate));
    }

    #[test]
    fn scan_appends_the_scoping_predicate() -> anyhow::Result<()> {
        let mapping = mapping();
        let request = ScanRequest {
            table_name: "table1".parse()?,
            ..Default::default()
        };
        let physical = mapping.query_mapper().apply_scan(&request)?;
        assert_eq!(
            physical.filter_expression.as_deref(),
            Some("begins_with(#mt_scope, :mt_scope)"),
        );
        assert_eq!(
            physical.expression_attribute_names,
            Some(btreemap! { "#mt_scope".to_owned() => "hk".to_owned() }),
        );
        assert_eq!(
            physical.expression_attribute_values,
            Some(btreemap! {
                ":mt_scope".to_owned() => AttributeValue::s("ctx1.table1."),
            }),
        );
        Ok(())
    }

    #[test]
    fn scan_preserves_an_existing_filter_and_rewrites_placeholders() -> anyhow::Result<()> {
        let mapping = mapping();
        let request = ScanRequest {
            table_name: "table1".parse()?,
            filter_expression: Some("#h = :h AND #c = :c".to_owned()),
            expression_attribute_names: Some(btreemap! {
                "#h".to_owned() => "hashKeyField".to_owned(),
                "#c".to_owned() => "someField".to_owned(),
            }),
            expression_attribute_values: Some(btreemap! {
                ":h".to_owned() => AttributeValue::s("1"),
                ":c".to_owned() => AttributeValue::s("value-1"),
            }),
            ..Default::default()
        };
        let physical = mapping.query_mapper().apply_scan(&request)?;
        assert_eq!(
            physical.filter_expression.as_deref(),
            Some("(#h = :h AND #c = :c) AND begins_with(#mt_scope, :mt_scope)"),
        );
        let names = physical.expression_attribute_names.unwrap();
        assert_eq!(names["#h"], "hk");
        assert_eq!(names["#c"], "someField");
        let values = physical.expression_attribute_values.unwrap();
        assert_eq!(values[":h"], AttributeValue::s("ctx1.table1.1"));
        assert_eq!(values[":c"], AttributeValue::s("value-1"));
        Ok(())
    }

    #[test]
    fn table_scan_rewrites_filters_on_index_only_fields() -> anyhow::Result<()> {
        // "color" is mapped only through the GSI, not the table's own key
        // schema, yet a table-level scan filter on it must still reach the
        // physical attribute.
        let mapping = mapping();
        let request = ScanRequest {
            table_name: "table1".parse()?,
            filter_expression: Some("#c = :c".to_owned()),
            expression_attribute_names: Some(btreemap! {
                "#c".to_owned() => "color".to_owned(),
            }),
            expression_attribute_values: Some(btreemap! {
                ":c".to_owned() => AttributeValue::s("red"),
            }),
            ..Default::default()
        };
        let physical = mapping.query_mapper().apply_scan(&request)?;
        let names = physical.expression_attribute_names.unwrap();
        assert_eq!(names["#c"], "gsi_s_hk");
        let values = physical.expression_attribute_values.unwrap();
        assert_eq!(values[":c"], AttributeValue::s("ctx1.table1.red"));
        Ok(())
    }

    #[test]
    fn query_rewrites_filters_on_index_only_fields() -> anyhow::Result<()> {
        let mapping = mapping();
        let request = QueryRequest {
            table_name: "table1".parse()?,
            key_conditions: btreemap! {
                "hashKeyField".to_owned() => KeyCondition::equals(AttributeValue::s("1")),
            },
            filter_expression: Some("#c = :c".to_owned()),
            expression_attribute_names: Some(btreemap! {
                "#c".to_owned() => "color".to_owned(),
            }),
            expression_attribute_values: Some(btreemap! {
                ":c".to_owned() => AttributeValue::s("red"),
            }),
            ..Default::default()
        };
        let physical = mapping.query_mapper().apply_query(&request)?;
        let names = physical.expression_attribute_names.unwrap();
        assert_eq!(names["#c"], "gsi_s_hk");
        let values = physical.expression_attribute_values.unwrap();
        assert_eq!(values[":c"], AttributeValue::s("ctx1.table1.red"));
        Ok(())
    }

    #[test]
    fn scope_placeholders_avoid_collisions() -> anyhow::Result<()> {
        let mapping = mapping();
        let request = ScanRequest {
            table_name: "table1".parse()?,
            filter_expression: Some("#mt_scope = :mt_scope".to_owned()),
            expression_attribute_names: Some(btreemap! {
                "#mt_scope".to_owned() => "someField".to_owned(),
            }),
            expression_attribute_values: Some(btreemap! {
                ":mt_scope".to_owned() => AttributeValue::s("x"),
            }),
            ..Default::default()
        };
        let physical = mapping.query_mapper().apply_scan(&request)?;
        assert_eq!(
            physical.filter_expression.as_deref(),
            Some("(#mt_scope = :mt_scope) AND begins_with(#mt_scope1, :mt_scope1)"),
        );
        Ok(())
    }
}
