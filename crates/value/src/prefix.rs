use errors::TenancyError;

use crate::{
    table_name::TableName,
    tenant_id::TenantId,
};

/// Default delimiter separating tenant, virtual table name, and value inside
/// a physical scalar.
pub const DEFAULT_DELIMITER: &str = ".";

/// Bijective codec between a tenant-scoped scalar and its physical wire
/// form `tenant ⊕ delim ⊕ virtualTable ⊕ delim ⊕ value`.
#[derive(Clone, Debug)]
pub struct FieldPrefix {
    delimiter: String,
}

/// A decoded (or freshly encoded) physical scalar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixedValue {
    pub tenant: TenantId,
    pub virtual_table: TableName,
    pub qualified: String,
    pub value: String,
}

impl Default for FieldPrefix {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_owned(),
        }
    }
}

impl FieldPrefix {
    pub fn new(delimiter: impl Into<String>) -> anyhow::Result<Self> {
        let delimiter = delimiter.into();
        anyhow::ensure!(!delimiter.is_empty(), "prefix delimiter cannot be empty");
        Ok(Self { delimiter })
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn apply(
        &self,
        tenant: &TenantId,
        virtual_table: &TableName,
        value: &str,
    ) -> anyhow::Result<PrefixedValue> {
        anyhow::ensure!(
            !tenant.contains(&self.delimiter),
            "tenant id '{tenant}' contains the prefix delimiter '{}'",
            self.delimiter,
        );
        anyhow::ensure!(
            !virtual_table.contains(&self.delimiter),
            "virtual table name '{virtual_table}' contains the prefix delimiter '{}'",
            self.delimiter,
        );
        let qualified = format!(
            "{tenant}{delim}{virtual_table}{delim}{value}",
            delim = self.delimiter
        );
        Ok(PrefixedValue {
            tenant: tenant.clone(),
            virtual_table: virtual_table.clone(),
            qualified,
            value: value.to_owned(),
        })
    }

    /// Splits on the delimiter exactly twice from the left; the remainder is
    /// the original value and may itself contain the delimiter.
    pub fn reverse(&self, qualified: &str) -> anyhow::Result<PrefixedValue> {
        let mut parts = qualified.splitn(3, &self.delimiter);
        let (Some(tenant), Some(virtual_table), Some(value)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(TenancyError::malformed_prefix(qualified).into());
        };
        let tenant: TenantId = tenant
            .parse()
            .map_err(|_| TenancyError::malformed_prefix(qualified))?;
        let virtual_table: TableName = virtual_table
            .parse()
            .map_err(|_| TenancyError::malformed_prefix(qualified))?;
        Ok(PrefixedValue {
            tenant,
            virtual_table,
            qualified: qualified.to_owned(),
            value: value.to_owned(),
        })
    }

    /// The `tenant ⊕ delim ⊕ virtualTable ⊕ delim` scope prefix shared by
    /// every physical hash value of one tenant's virtual table.
    pub fn scope_prefix(
        &self,
        tenant: &TenantId,
        virtual_table: &TableName,
    ) -> anyhow::Result<String> {
        Ok(self.apply(tenant, virtual_table, "")?.qualified)
    }
}
