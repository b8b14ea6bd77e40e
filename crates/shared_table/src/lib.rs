//! The shared-table router: multiplexes many tenants' virtual tables onto a
//! small set of shared physical tables, rewriting every request and response
//! on the data path.

mod builder;
mod factory;
mod metadata;
mod metrics;
mod router;
mod stream;


pub use crate::{
    builder::SharedTableClientBuilder,
    factory::StaticCreateTableRequestFactory,
    metadata::{
        MetadataRepo,
        TableDescriptionRepo,
        DEFAULT_METADATA_TABLE,
    },
    router::SharedTableClient,
    stream::StreamAdapter,
};
