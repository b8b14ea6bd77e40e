//! Change-capture record types and the processor seams the stream adapter
//! wraps.

use std::{
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use value::{
    Item,
    TableName,
    TenantId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEventName {
    Insert,
    Modify,
    Remove,
}

/// A change record as emitted by the backend, in physical form. Delivered in
/// the backend's partition order; the adapter never reorders.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRecord {
    pub sequence_number: String,
    pub event_name: StreamEventName,
    pub keys: Item,
    pub old_image: Option<Item>,
    pub new_image: Option<Item>,
}

/// A record translated back to tenant-visible form and labeled with the
/// owning tenant and virtual table.
#[derive(Clone, Debug, PartialEq)]
pub struct TenantStreamRecord {
    pub tenant: TenantId,
    pub table_name: TableName,
    pub record: StreamRecord,
}

/// Consumer of physical change records.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process_records(&self, records: Vec<StreamRecord>) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// Consumer of tenant-labeled change records.
#[async_trait]
pub trait TenantRecordProcessor: Send + Sync {
    async fn process_records(&self, records: Vec<TenantStreamRecord>) -> anyhow::Result<()>;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

pub trait RecordProcessorFactory: Send + Sync {
    fn create_processor(&self) -> Arc<dyn RecordProcessor>;
}

pub trait TenantRecordProcessorFactory: Send + Sync {
    fn create_processor(&self) -> Arc<dyn TenantRecordProcessor>;
}

/// One change stream per physical table with streaming enabled.
#[derive(Clone)]
pub struct StreamHandle {
    pub physical_table_name: TableName,
    pub stream_label: String,
    pub factory: Arc<dyn RecordProcessorFactory>,
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("physical_table_name", &self.physical_table_name)
            .field("stream_label", &self.stream_label)
            .finish()
    }
}
