use std::{
    future::Future,
    sync::Arc,
};

use errors::TenancyError;
use value::{
    TableName,
    TenantId,
};

use crate::{
    metrics::log_mapping_cache,
    table_mapping::TableMapping,
};

/// Memoizes [`TableMapping`] construction per (tenant, virtual table).
///
/// Concurrent readers of the same key wait on a single in-flight build;
/// failed or canceled builds are not cached, so the next caller retries.
pub struct TableMappingCache {
    cache: moka::future::Cache<(TenantId, TableName), Arc<TableMapping>>,
}

impl TableMappingCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub async fn get_or_build<F>(
        &self,
        tenant: TenantId,
        table_name: TableName,
        build: F,
    ) -> anyhow::Result<Arc<TableMapping>>
    where
        F: Future<Output = anyhow::Result<Arc<TableMapping>>>,
    {
        let key = (tenant, table_name);
        if let Some(mapping) = self.cache.get(&key).await {
            log_mapping_cache(true);
            return Ok(mapping);
        }
        log_mapping_cache(false);
        self.cache
            .try_get_with(key, build)
            .await
            .map_err(rehydrate_error)
    }

    /// Drops the mapping so a deleted schema is never served stale.
    pub async fn invalidate(&self, tenant: &TenantId, table_name: &TableName) {
        self.cache
            .invalidate(&(tenant.clone(), table_name.clone()))
            .await;
    }

    /// Snapshot of every cached mapping.
    pub fn mappings(&self) -> Vec<Arc<TableMapping>> {
        self.cache.iter().map(|(_, mapping)| mapping).collect()
    }
}

/// Errors cross the cache boundary as `Arc<anyhow::Error>`; rebuild an owned
/// error, keeping any attached [`TenancyError`] kind.
fn rehydrate_error(err: Arc<anyhow::Error>) -> anyhow::Error {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<TenancyError>())
    {
        Some(tenancy) => tenancy.clone().into(),
        None => anyhow::anyhow!("{err:#}"),
    }
}
