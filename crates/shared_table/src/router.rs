use std::{
    collections::BTreeSet,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use common::{
    backend::BackendClient,
    requests::{
        DeleteItemRequest,
        GetItemRequest,
        GetItemResponse,
        PutItemRequest,
        QueryRequest,
        QueryResponse,
        ScanRequest,
        ScanResponse,
        UpdateItemRequest,
    },
    schema::TableDescription,
    streams::{
        StreamHandle,
        TenantRecordProcessorFactory,
    },
    tenant::{
        tenant_scope,
        TenantContextProvider,
    },
    types::TableStatus,
};
use errors::{
    TenancyError,
    TenancyErrorExt,
};
use mapping::{
    TableMapping,
    TableMappingBuilder,
    TableMappingCache,
};
use value::{
    FieldPrefix,
    Item,
    TableName,
    TenantId,
};

use crate::{
    builder::SharedTableClientBuilder,
    metadata::MetadataRepo,
    metrics::{
        log_async_delete_failure,
        log_request,
    },
    stream::StreamAdapterFactory,
};

const MAX_CREATE_POLLS: usize = 120;

/// Resolves and memoizes [`TableMapping`]s, creating the backing physical
/// table on first use when it does not exist yet.
pub(crate) struct MappingStore {
    cache: TableMappingCache,
    builder: TableMappingBuilder,
    backend: Arc<dyn BackendClient>,
    metadata_repo: Arc<dyn MetadataRepo>,
    context: Arc<dyn TenantContextProvider>,
    prefix: FieldPrefix,
    poll_interval: Duration,
}

impl MappingStore {
    pub(crate) fn new(
        cache: TableMappingCache,
        builder: TableMappingBuilder,
        backend: Arc<dyn BackendClient>,
        metadata_repo: Arc<dyn MetadataRepo>,
        context: Arc<dyn TenantContextProvider>,
        prefix: FieldPrefix,
        poll_interval: Duration,
    ) -> Self {
        Self {
            cache,
            builder,
            backend,
            metadata_repo,
            context,
            prefix,
            poll_interval,
        }
    }

    pub(crate) async fn table_mapping(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<Arc<TableMapping>> {
        let tenant = self.context.get()?;
        self.table_mapping_for(tenant, table_name).await
    }

    /// The mapping lookup itself reads the ambient tenant context (the
    /// metadata repo key and the field mapper both do); `tenant` only keys
    /// the cache entry.
    pub(crate) async fn table_mapping_for(
        &self,
        tenant: TenantId,
        table_name: &TableName,
    ) -> anyhow::Result<Arc<TableMapping>> {
        self.cache
            .get_or_build(tenant, table_name.clone(), async {
                let virtual_table = self.metadata_repo.get_table_description(table_name).await?;
                let mapping = Arc::new(self.builder.build(&virtual_table)?);
                self.ensure_physical(&mapping).await?;
                Ok(mapping)
            })
            .await
    }

    async fn ensure_physical(&self, mapping: &TableMapping) -> anyhow::Result<()> {
        let name = mapping.physical_table_name();
        let description = match self.backend.describe_table(name).await? {
            Some(description) => description,
            None => {
                tracing::info!(table = %name, "creating physical table");
                self.backend
                    .create_table(mapping.physical_table().clone())
                    .await?;
                self.wait_until_active(name).await?
            },
        };
        mapping.refresh_physical(description);
        Ok(())
    }

    async fn wait_until_active(&self, name: &TableName) -> anyhow::Result<TableDescription> {
        for _ in 0..MAX_CREATE_POLLS {
            let description = self
                .backend
                .describe_table(name)
                .await?
                .with_context(|| format!("physical table '{name}' vanished during creation"))?;
            if description.status == TableStatus::Active {
                return Ok(description);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        anyhow::bail!("timed out waiting for physical table '{name}' to become active")
    }

    pub(crate) async fn invalidate(&self, tenant: &TenantId, table_name: &TableName) {
        self.cache.invalidate(tenant, table_name).await;
    }

    pub(crate) fn mappings(&self) -> Vec<Arc<TableMapping>> {
        self.cache.mappings()
    }

    pub(crate) fn prefix(&self) -> &FieldPrefix {
        &self.prefix
    }
}

/// The outward-facing shared-table API. Presents the backend's own surface
/// to each tenant while physically multiplexing all tenants onto shared
/// tables.
#[derive(Clone)]
pub struct SharedTableClient {
    backend: Arc<dyn BackendClient>,
    context: Arc<dyn TenantContextProvider>,
    metadata_repo: Arc<dyn MetadataRepo>,
    mappings: Arc<MappingStore>,
    truncate_on_delete_table: bool,
    delete_table_async: bool,
}

impl SharedTableClient {
    pub fn builder() -> SharedTableClientBuilder {
        SharedTableClientBuilder::new()
    }

    pub(crate) fn new(
        backend: Arc<dyn BackendClient>,
        context: Arc<dyn TenantContextProvider>,
        metadata_repo: Arc<dyn MetadataRepo>,
        mappings: Arc<MappingStore>,
        truncate_on_delete_table: bool,
        delete_table_async: bool,
    ) -> Self {
        Self {
            backend,
            context,
            metadata_repo,
            mappings,
            truncate_on_delete_table,
            delete_table_async,
        }
    }

    /// Persists the virtual description. The physical table is precreated
    /// or lazily created by the factory, never here.
    pub async fn create_table(
        &self,
        table: TableDescription,
    ) -> anyhow::Result<TableDescription> {
        log_request("create_table");
        self.context.get()?;
        tracing::info!(table = %table.table_name, "creating virtual table");
        self.metadata_repo.create_table_description(table).await
    }

    /// The virtual description with status forced to `ACTIVE`: virtual
    /// tables have no lifecycle of their own.
    pub async fn describe_table(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<TableDescription> {
        log_request("describe_table");
        self.context.get()?;
        let mut description = self.metadata_repo.get_table_description(table_name).await?;
        description.status = TableStatus::Active;
        Ok(description)
    }

    /// Deletes the virtual description, optionally truncating the tenant's
    /// rows first. In async mode truncation and the metadata delete run on
    /// a background task and the pre-delete description returns immediately.
    pub async fn delete_table(&self, table_name: &TableName) -> anyhow::Result<TableDescription> {
        log_request("delete_table");
        let tenant = self.context.get()?;
        let description = self.metadata_repo.get_table_description(table_name).await?;
        if self.delete_table_async {
            let client = self.clone();
            let background_tenant = tenant.clone();
            let background_description = description.clone();
            tokio::spawn(tenant_scope(async move {
                if let Err(e) = client
                    .background_delete(background_tenant, &background_description)
                    .await
                {
                    log_async_delete_failure();
                    tracing::error!(
                        table = %background_description.table_name,
                        error = %e,
                        "background table delete failed",
                    );
                }
            }));
        } else {
            if self.truncate_on_delete_table {
                self.truncate_table(&description).await?;
            }
            self.metadata_repo.delete_table_description(table_name).await?;
        }
        self.mappings.invalidate(&tenant, table_name).await;
        Ok(description)
    }

    pub async fn get_item(&self, request: GetItemRequest) -> anyhow::Result<GetItemResponse> {
        log_request("get_item");
        let mapping = self.mappings.table_mapping(&request.table_name).await?;
        let mut physical = request.clone();
        physical.table_name = mapping.physical_table_name().clone();
        physical.key = mapping.item_mapper().apply(&request.key)?;
        let response = self
            .backend
            .get_item(physical)
            .await
            .map_err(backend_error)?;
        let item = match response.item {
            Some(item) => Some(mapping.item_mapper().reverse(&item)?),
            None => None,
        };
        Ok(GetItemResponse { item })
    }

    pub async fn put_item(&self, request: PutItemRequest) -> anyhow::Result<()> {
        log_request("put_item");
        let mapping = self.mappings.table_mapping(&request.table_name).await?;
        let mut physical = request.clone();
        physical.table_name = mapping.physical_table_name().clone();
        physical.item = mapping.item_mapper().apply(&request.item)?;
        self.backend.put_item(physical).await.map_err(backend_error)
    }

    /// Update and condition expressions pass through unmodified; only the
    /// table name and key are rewritten.
    pub async fn update_item(&self, request: UpdateItemRequest) -> anyhow::Result<()> {
        log_request("update_item");
        let mapping = self.mappings.table_mapping(&request.table_name).await?;
        let mut physical = request.clone();
        physical.table_name = mapping.physical_table_name().clone();
        physical.key = mapping.item_mapper().apply(&request.key)?;
        self.backend
            .update_item(physical)
            .await
            .map_err(backend_error)
    }

    pub async fn delete_item(&self, request: DeleteItemRequest) -> anyhow::Result<()> {
        log_request("delete_item");
        let mapping = self.mappings.table_mapping(&request.table_name).await?;
        let mut physical = request.clone();
        physical.table_name = mapping.physical_table_name().clone();
        physical.key = mapping.item_mapper().apply(&request.key)?;
        self.backend
            .delete_item(physical)
            .await
            .map_err(backend_error)
    }

    pub async fn query(&self, request: QueryRequest) -> anyhow::Result<QueryResponse> {
        log_request("query");
        let mapping = self.mappings.table_mapping(&request.table_name).await?;
        let physical = mapping.query_mapper().apply_query(&request)?;
        let response = self.backend.query(physical).await.map_err(backend_error)?;
        let items = response
            .items
            .iter()
            .map(|item| mapping.item_mapper().reverse(item))
            .collect::<anyhow::Result<Vec<Item>>>()?;
        Ok(QueryResponse {
            items,
            last_evaluated_key: response.last_evaluated_key,
        })
    }

    pub async fn scan(&self, request: ScanRequest) -> anyhow::Result<ScanResponse> {
        log_request("scan");
        let mapping = self.mappings.table_mapping(&request.table_name).await?;
        let physical = mapping.query_mapper().apply_scan(&request)?;
        let response = self.backend.scan(physical).await.map_err(backend_error)?;
        let items = response
            .items
            .iter()
            .map(|item| mapping.item_mapper().reverse(item))
            .collect::<anyhow::Result<Vec<Item>>>()?;
        Ok(ScanResponse {
            items,
            last_evaluated_key: response.last_evaluated_key,
        })
    }

    /// One stream handle per physical table with streaming enabled among the
    /// cached mappings, each wrapping `factory` with a stream adapter.
    pub fn list_streams(
        &self,
        factory: Arc<dyn TenantRecordProcessorFactory>,
    ) -> Vec<StreamHandle> {
        log_request("list_streams");
        let mut seen = BTreeSet::new();
        let mut handles = Vec::new();
        for mapping in self.mappings.mappings() {
            let physical = mapping.physical_table().clone();
            if !physical.stream_enabled() {
                continue;
            }
            if !seen.insert(physical.table_name.clone()) {
                continue;
            }
            let stream_label = physical
                .stream
                .as_ref()
                .and_then(|spec| spec.stream_label.clone())
                .unwrap_or_default();
            handles.push(StreamHandle {
                physical_table_name: physical.table_name.clone(),
                stream_label,
                factory: Arc::new(StreamAdapterFactory::new(
                    physical,
                    factory.clone(),
                    self.mappings.clone(),
                    self.context.clone(),
                )),
            });
        }
        handles
    }

    async fn background_delete(
        &self,
        tenant: TenantId,
        description: &TableDescription,
    ) -> anyhow::Result<()> {
        let prior = self.context.get_opt();
        self.context.set(Some(tenant.clone()))?;
        let result = async {
            if self.truncate_on_delete_table {
                self.truncate_table(description).await?;
            }
            self.metadata_repo
                .delete_table_description(&description.table_name)
                .await?;
            self.mappings
                .invalidate(&tenant, &description.table_name)
                .await;
            anyhow::Ok(())
        }
        .await;
        let restored = self.context.set(prior);
        result?;
        restored
    }

    /// Scans the current tenant's rows and deletes them one by one.
    async fn truncate_table(&self, description: &TableDescription) -> anyhow::Result<()> {
        tracing::info!(table = %description.table_name, "truncating virtual table");
        let mut start_key = None;
        loop {
            let response = self
                .scan(ScanRequest {
                    table_name: description.table_name.clone(),
                    exclusive_start_key: start_key.take(),
                    ..Default::default()
                })
                .await?;
            for item in response.items {
                let mut key = Item::new();
                let hash = item
                    .get(&description.primary_key.hash_key)
                    .context("scanned row is missing its hash key")?;
                key.insert(description.primary_key.hash_key.clone(), hash.clone());
                if let Some(range) = &description.primary_key.range_key {
                    let value = item
                        .get(&range.name)
                        .context("scanned row is missing its range key")?;
                    key.insert(range.name.clone(), value.clone());
                }
                self.delete_item(DeleteItemRequest {
                    table_name: description.table_name.clone(),
                    key,
                    ..Default::default()
                })
                .await?;
            }
            match response.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }
        Ok(())
    }
}

/// Backend failures pass through with their original cause, tagged so
/// callers can classify them.
fn backend_error(err: anyhow::Error) -> anyhow::Error {
    if err.tenancy_kind().is_some() {
        err
    } else {
        err.context(TenancyError::backend("backend request failed"))
    }
}
