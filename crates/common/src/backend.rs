use async_trait::async_trait;
use value::TableName;

use crate::{
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
};

/// The subset of the wide-column database API the router dispatches to.
///
/// Implementations are shared and must be safe for concurrent use. Decorator
/// variants (loggers, account shards, per-tenant-table routers) are just
/// other implementations of this trait wrapped around an inner one.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    async fn create_table(&self, table: TableDescription) -> anyhow::Result<TableDescription>;

    /// `None` when the table does not exist.
    async fn describe_table(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<Option<TableDescription>>;

    async fn delete_table(&self, table_name: &TableName) -> anyhow::Result<TableDescription>;

    async fn get_item(&self, request: GetItemRequest) -> anyhow::Result<GetItemResponse>;

    async fn put_item(&self, request: PutItemRequest) -> anyhow::Result<()>;

    async fn update_item(&self, request: UpdateItemRequest) -> anyhow::Result<()>;

    async fn delete_item(&self, request: DeleteItemRequest) -> anyhow::Result<()>;

    async fn query(&self, request: QueryRequest) -> anyhow::Result<QueryResponse>;

    async fn scan(&self, request: ScanRequest) -> anyhow::Result<ScanResponse>;
}

/// Resolves the physical template backing a virtual table.
///
/// Called once at router construction for precreation and once per new
/// mapping on a cache miss.
pub trait CreateTableRequestFactory: Send + Sync + 'static {
    /// Physical tables to create eagerly at construction time.
    fn precreate_tables(&self) -> Vec<TableDescription>;

    /// The physical template for a virtual table, or `None` when no shared
    /// table supports its shape.
    fn create_table_request(&self, virtual_table: &TableDescription) -> Option<TableDescription>;
}
