use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use common::{
    backend::{
        BackendClient,
        CreateTableRequestFactory,
    },
    tenant::{
        TaskLocalTenantContext,
        TenantContextProvider,
    },
    types::StreamViewType,
};
use mapping::{
    ByTypeIndexMapper,
    SecondaryIndexMapper,
    TableMappingBuilder,
    TableMappingCache,
};
use value::{
    FieldPrefix,
    DEFAULT_DELIMITER,
};

use crate::{
    factory::StaticCreateTableRequestFactory,
    metadata::{
        MetadataRepo,
        TableDescriptionRepo,
        DEFAULT_METADATA_TABLE,
    },
    router::{
        MappingStore,
        SharedTableClient,
    },
};

const DEFAULT_PHYSICAL_TABLE_PREFIX: &str = "mt_shared";

/// Configures and constructs a [`SharedTableClient`].
pub struct SharedTableClientBuilder {
    backend: Option<Arc<dyn BackendClient>>,
    context: Arc<dyn TenantContextProvider>,
    metadata_repo: Option<Arc<dyn MetadataRepo>>,
    create_table_request_factory: Option<Arc<dyn CreateTableRequestFactory>>,
    secondary_index_mapper: Arc<dyn SecondaryIndexMapper>,
    delimiter: String,
    precreate_tables: bool,
    truncate_on_delete_table: bool,
    delete_table_async: bool,
    poll_interval: Duration,
    mapping_cache_size: u64,
}

impl SharedTableClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            backend: None,
            context: Arc::new(TaskLocalTenantContext),
            metadata_repo: None,
            create_table_request_factory: None,
            secondary_index_mapper: Arc::new(ByTypeIndexMapper),
            delimiter: DEFAULT_DELIMITER.to_owned(),
            precreate_tables: true,
            truncate_on_delete_table: false,
            delete_table_async: false,
            poll_interval: Duration::from_secs(5),
            mapping_cache_size: 256,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn BackendClient>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn context_provider(mut self, context: Arc<dyn TenantContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn metadata_repo(mut self, metadata_repo: Arc<dyn MetadataRepo>) -> Self {
        self.metadata_repo = Some(metadata_repo);
        self
    }

    pub fn create_table_request_factory(
        mut self,
        factory: Arc<dyn CreateTableRequestFactory>,
    ) -> Self {
        self.create_table_request_factory = Some(factory);
        self
    }

    pub fn secondary_index_mapper(mut self, mapper: Arc<dyn SecondaryIndexMapper>) -> Self {
        self.secondary_index_mapper = mapper;
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn precreate_tables(mut self, precreate: bool) -> Self {
        self.precreate_tables = precreate;
        self
    }

    pub fn truncate_on_delete_table(mut self, truncate: bool) -> Self {
        self.truncate_on_delete_table = truncate;
        self
    }

    pub fn delete_table_async(mut self, delete_async: bool) -> Self {
        self.delete_table_async = delete_async;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn mapping_cache_size(mut self, size: u64) -> Self {
        self.mapping_cache_size = size;
        self
    }

    /// Validates the configuration and, unless disabled, precreates the
    /// factory's physical tables. Precreation needs no tenant context.
    pub async fn build(self) -> anyhow::Result<SharedTableClient> {
        let backend = self.backend.context("a backend client is required")?;
        anyhow::ensure!(
            !self.delimiter.is_empty()
                && !self
                    .delimiter
                    .chars()
                    .any(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "delimiter '{}' collides with the identifier charset",
            self.delimiter,
        );
        let prefix = FieldPrefix::new(self.delimiter.clone())?;

        let factory: Arc<dyn CreateTableRequestFactory> = match self.create_table_request_factory
        {
            Some(factory) => factory,
            None => Arc::new(StaticCreateTableRequestFactory::with_default_catalogue(
                DEFAULT_PHYSICAL_TABLE_PREFIX,
                Some(StreamViewType::NewAndOldImages),
            )?),
        };
        let metadata_repo: Arc<dyn MetadataRepo> = match self.metadata_repo {
            Some(repo) => repo,
            None => Arc::new(TableDescriptionRepo::new(
                backend.clone(),
                self.context.clone(),
                self.delimiter.clone(),
                DEFAULT_METADATA_TABLE.parse()?,
            )),
        };

        if self.precreate_tables {
            for table in factory.precreate_tables() {
                if backend.describe_table(&table.table_name).await?.is_none() {
                    tracing::info!(table = %table.table_name, "precreating physical table");
                    backend.create_table(table).await?;
                }
            }
        }

        let mapping_builder = TableMappingBuilder::new(
            factory,
            self.secondary_index_mapper,
            self.context.clone(),
            prefix.clone(),
        );
        let mappings = Arc::new(MappingStore::new(
            TableMappingCache::new(self.mapping_cache_size),
            mapping_builder,
            backend.clone(),
            metadata_repo.clone(),
            self.context.clone(),
            prefix,
            self.poll_interval,
        ));
        Ok(SharedTableClient::new(
            backend,
            self.context,
            metadata_repo,
            mappings,
            self.truncate_on_delete_table,
            self.delete_table_async,
        ))
    }
}
