use std::{
    fmt,
    sync::Arc,
};

use common::{
    tenant::TenantContextProvider,
    types::IndexName,
};
use errors::{
    ErrorKind,
    TenancyError,
};
use value::{
    AttributeValue,
    FieldPrefix,
    ScalarType,
    TableName,
};

/// Where a mapped field participates: the table's own key schema or a
/// secondary index's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexScope {
    Table,
    SecondaryIndex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedField {
    pub name: String,
    pub scalar_type: ScalarType,
}

impl MappedField {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar_type,
        }
    }
}

/// The rewrite rule for one attribute between virtual and physical form.
/// `context_aware` is set exactly on hash-key fields, which carry the
/// tenant/virtual-table prefix on the physical side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldMapping {
    pub source: MappedField,
    pub target: MappedField,
    pub virtual_index_name: Option<IndexName>,
    pub physical_index_name: Option<IndexName>,
    pub index_scope: IndexScope,
    pub context_aware: bool,
}

impl FieldMapping {
    pub fn table_key(source: MappedField, target: MappedField, context_aware: bool) -> Self {
        Self {
            source,
            target,
            virtual_index_name: None,
            physical_index_name: None,
            index_scope: IndexScope::Table,
            context_aware,
        }
    }

    pub fn index_key(
        source: MappedField,
        target: MappedField,
        virtual_index_name: IndexName,
        physical_index_name: IndexName,
        index_scope: IndexScope,
        context_aware: bool,
    ) -> Self {
        Self {
            source,
            target,
            virtual_index_name: Some(virtual_index_name),
            physical_index_name: Some(physical_index_name),
            index_scope,
            context_aware,
        }
    }

    /// The same rule read in the opposite direction.
    pub fn invert(&self) -> Self {
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
            virtual_index_name: self.virtual_index_name.clone(),
            physical_index_name: self.physical_index_name.clone(),
            index_scope: self.index_scope,
            context_aware: self.context_aware,
        }
    }
}

/// Applies a [`FieldMapping`] to one attribute value.
///
/// Holds a tenant accessor and the virtual table name as capabilities
/// instead of a back-reference to the table mapping, so the two can be
/// constructed independently.
pub struct FieldMapper {
    context: Arc<dyn TenantContextProvider>,
    virtual_table_name: TableName,
    prefix: FieldPrefix,
}

impl fmt::Debug for FieldMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMapper")
            .field("virtual_table_name", &self.virtual_table_name)
            .field("delimiter", &self.prefix.delimiter())
            .finish()
    }
}

impl FieldMapper {
    pub fn new(
        context: Arc<dyn TenantContextProvider>,
        virtual_table_name: TableName,
        prefix: FieldPrefix,
    ) -> Self {
        Self {
            context,
            virtual_table_name,
            prefix,
        }
    }

    pub fn prefix(&self) -> &FieldPrefix {
        &self.prefix
    }

    /// Virtual → physical. Context-aware fields come out as prefixed
    /// strings; everything else passes through untouched.
    pub fn apply(
        &self,
        mapping: &FieldMapping,
        value: &AttributeValue,
    ) -> anyhow::Result<AttributeValue> {
        if !mapping.context_aware {
            return Ok(value.clone());
        }
        let tenant = self.context.get()?;
        let encoded =
            self.prefix
                .apply(&tenant, &self.virtual_table_name, &value.encode_string())?;
        Ok(AttributeValue::S(encoded.qualified))
    }

    /// Physical → virtual. Re-coerces the decoded string to the virtual
    /// field's declared scalar type.
    pub fn reverse(
        &self,
        mapping: &FieldMapping,
        value: &AttributeValue,
    ) -> anyhow::Result<AttributeValue> {
        if !mapping.context_aware {
            return Ok(value.clone());
        }
        let Some(qualified) = value.as_s() else {
            return Err(TenancyError::new(
                ErrorKind::MalformedPrefix,
                format!(
                    "physical value for field '{}' is not a string",
                    mapping.source.name
                ),
            )
            .into());
        };
        let decoded = self.prefix.reverse(qualified)?;
        AttributeValue::decode_string(mapping.target.scalar_type, &decoded.value)
    }

    /// The scope prefix of the current tenant's rows in this virtual table.
    pub fn scope_prefix(&self) -> anyhow::Result<String> {
        let tenant = self.context.get()?;
        self.prefix.scope_prefix(&tenant, &self.virtual_table_name)
    }
}
