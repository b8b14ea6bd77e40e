use std::sync::Arc;

use async_trait::async_trait;
use common::{
    schema::TableDescription,
    streams::{
        RecordProcessor,
        RecordProcessorFactory,
        StreamRecord,
        TenantRecordProcessor,
        TenantRecordProcessorFactory,
        TenantStreamRecord,
    },
    tenant::TenantContextProvider,
};
use errors::TenancyError;
use value::PrefixedValue;

use crate::{
    metrics::log_stream_record_relabeled,
    router::MappingStore,
};

/// Wraps a tenant-oblivious processor factory so every processor it creates
/// re-keys and re-labels physical change records for their owning tenant.
pub(crate) struct StreamAdapterFactory {
    physical_table: TableDescription,
    inner: Arc<dyn TenantRecordProcessorFactory>,
    mappings: Arc<MappingStore>,
    context: Arc<dyn TenantContextProvider>,
}

impl StreamAdapterFactory {
    pub(crate) fn new(
        physical_table: TableDescription,
        inner: Arc<dyn TenantRecordProcessorFactory>,
        mappings: Arc<MappingStore>,
        context: Arc<dyn TenantContextProvider>,
    ) -> Self {
        Self {
            physical_table,
            inner,
            mappings,
            context,
        }
    }
}

impl RecordProcessorFactory for StreamAdapterFactory {
    fn create_processor(&self) -> Arc<dyn RecordProcessor> {
        Arc::new(StreamAdapter {
            physical_table: self.physical_table.clone(),
            inner: self.inner.create_processor(),
            mappings: self.mappings.clone(),
            context: self.context.clone(),
        })
    }
}

/// Translates one physical table's change records back to tenant-visible
/// form: the tenant and virtual table are decoded from the physical hash
/// key, the keys and images reverse-mapped, and the tenant context restored
/// afterwards even on failure.
pub struct StreamAdapter {
    physical_table: TableDescription,
    inner: Arc<dyn TenantRecordProcessor>,
    mappings: Arc<MappingStore>,
    context: Arc<dyn TenantContextProvider>,
}

#[async_trait]
impl RecordProcessor for StreamAdapter {
    async fn process_records(&self, records: Vec<StreamRecord>) -> anyhow::Result<()> {
        let mut relabeled = Vec::with_capacity(records.len());
        // Decode errors surface to the wrapped processor's caller; records
        // are never silently dropped.
        for record in records {
            relabeled.push(self.relabel(record).await?);
        }
        self.inner.process_records(relabeled).await
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.inner.shutdown().await
    }
}

impl StreamAdapter {
    async fn relabel(&self, record: StreamRecord) -> anyhow::Result<TenantStreamRecord> {
        let hash_key = &self.physical_table.primary_key.hash_key;
        let qualified = record
            .keys
            .get(hash_key)
            .and_then(|value| value.as_s())
            .ok_or_else(|| {
                TenancyError::malformed_prefix(format!(
                    "record on '{}' has no string hash key '{hash_key}'",
                    self.physical_table.table_name,
                ))
            })?;
        let decoded = self.mappings.prefix().reverse(qualified)?;
        let tenant = decoded.tenant.clone();

        let prior = self.context.get_opt();
        self.context.set(Some(tenant.clone()))?;
        let result = self.reverse_record(&decoded, record).await;
        let restored = self.context.set(prior);
        let record = result?;
        restored?;

        log_stream_record_relabeled();
        Ok(TenantStreamRecord {
            tenant,
            table_name: decoded.virtual_table,
            record,
        })
    }

    async fn reverse_record(
        &self,
        decoded: &PrefixedValue,
        record: StreamRecord,
    ) -> anyhow::Result<StreamRecord> {
        let mapping = self
            .mappings
            .table_mapping_for(decoded.tenant.clone(), &decoded.virtual_table)
            .await?;
        let mapper = mapping.item_mapper();
        Ok(StreamRecord {
            keys: mapper.reverse(&record.keys)?,
            old_image: record
                .old_image
                .map(|image| mapper.reverse(&image))
                .transpose()?,
            new_image: record
                .new_image
                .map(|image| mapper.reverse(&image))
                .transpose()?,
            ..record
        })
    }
}
