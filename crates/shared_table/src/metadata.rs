use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use common::{
    backend::BackendClient,
    requests::{
        DeleteItemRequest,
        GetItemRequest,
        PutItemRequest,
    },
    schema::{
        PrimaryKey,
        TableDescription,
    },
    tenant::TenantContextProvider,
};
use errors::TenancyError;
use value::{
    AttributeValue,
    Item,
    ScalarType,
    TableName,
};

/// Durable store of virtual table descriptions, consulted by the router on
/// every mapping miss. Descriptions are tenant-scoped.
#[async_trait]
pub trait MetadataRepo: Send + Sync + 'static {
    async fn create_table_description(
        &self,
        table: TableDescription,
    ) -> anyhow::Result<TableDescription>;

    /// Fails with `NoSuchVirtualTable` on a miss.
    async fn get_table_description(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<TableDescription>;

    async fn delete_table_description(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<TableDescription>;
}

pub const DEFAULT_METADATA_TABLE: &str = "mt_table_metadata";

const METADATA_KEY_ATTRIBUTE: &str = "table_key";
const METADATA_PAYLOAD_ATTRIBUTE: &str = "description";

/// [`MetadataRepo`] backed by a dedicated physical table on the same
/// backend. Rows are keyed by the tenant-prefixed virtual table name and
/// hold the JSON-serialized description.
pub struct TableDescriptionRepo {
    backend: Arc<dyn BackendClient>,
    context: Arc<dyn TenantContextProvider>,
    delimiter: String,
    table_name: TableName,
    ensured: tokio::sync::OnceCell<()>,
}

impl TableDescriptionRepo {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        context: Arc<dyn TenantContextProvider>,
        delimiter: String,
        table_name: TableName,
    ) -> Self {
        Self {
            backend,
            context,
            delimiter,
            table_name,
            ensured: tokio::sync::OnceCell::new(),
        }
    }

    async fn ensure_table(&self) -> anyhow::Result<()> {
        self.ensured
            .get_or_try_init(|| async {
                if self.backend.describe_table(&self.table_name).await?.is_none() {
                    tracing::info!(table = %self.table_name, "creating metadata table");
                    self.backend
                        .create_table(TableDescription::new(
                            self.table_name.clone(),
                            PrimaryKey::hash(METADATA_KEY_ATTRIBUTE, ScalarType::S),
                        ))
                        .await?;
                }
                anyhow::Ok(())
            })
            .await?;
        Ok(())
    }

    fn row_key(&self, table_name: &TableName) -> anyhow::Result<Item> {
        let tenant = self.context.get()?;
        let mut key = Item::new();
        key.insert(
            METADATA_KEY_ATTRIBUTE.to_owned(),
            AttributeValue::s(format!("{tenant}{}{table_name}", self.delimiter)),
        );
        Ok(key)
    }
}

#[async_trait]
impl MetadataRepo for TableDescriptionRepo {
    async fn create_table_description(
        &self,
        table: TableDescription,
    ) -> anyhow::Result<TableDescription> {
        self.ensure_table().await?;
        let key = self.row_key(&table.table_name)?;
        let existing = self
            .backend
            .get_item(GetItemRequest {
                table_name: self.table_name.clone(),
                key: key.clone(),
            })
            .await?;
        anyhow::ensure!(
            existing.item.is_none(),
            "virtual table '{}' already exists",
            table.table_name,
        );
        let mut item = key;
        item.insert(
            METADATA_PAYLOAD_ATTRIBUTE.to_owned(),
            AttributeValue::s(serde_json::to_string(&table)?),
        );
        self.backend
            .put_item(PutItemRequest {
                table_name: self.table_name.clone(),
                item,
                ..Default::default()
            })
            .await?;
        Ok(table)
    }

    async fn get_table_description(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<TableDescription> {
        self.ensure_table().await?;
        let key = self.row_key(table_name)?;
        let response = self
            .backend
            .get_item(GetItemRequest {
                table_name: self.table_name.clone(),
                key,
            })
            .await?;
        let Some(item) = response.item else {
            return Err(TenancyError::no_such_virtual_table(table_name).into());
        };
        let payload = item
            .get(METADATA_PAYLOAD_ATTRIBUTE)
            .and_then(|value| value.as_s())
            .context("metadata row is missing its description payload")?;
        Ok(serde_json::from_str(payload)?)
    }

    async fn delete_table_description(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<TableDescription> {
        let description = self.get_table_description(table_name).await?;
        let key = self.row_key(table_name)?;
        self.backend
            .delete_item(DeleteItemRequest {
                table_name: self.table_name.clone(),
                key,
                ..Default::default()
            })
            .await?;
        Ok(description)
    }
}
