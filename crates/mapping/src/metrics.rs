use std::sync::LazyLock;

use prometheus::{
    register_int_counter,
    register_int_counter_vec,
    IntCounter,
    IntCounterVec,
};

static TABLE_MAPPING_CACHE_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "shared_table_mapping_cache_requests_total",
        "Count of table-mapping cache reads, labeled with cache hits",
        &["hit"]
    )
    .unwrap()
});

pub fn log_mapping_cache(hit: bool) {
    TABLE_MAPPING_CACHE_REQUESTS_TOTAL
        .with_label_values(&[if hit { "true" } else { "false" }])
        .inc();
}

static TABLE_MAPPINGS_BUILT_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "shared_table_mappings_built_total",
        "Count of table mappings constructed"
    )
    .unwrap()
});

pub fn log_mapping_built() {
    TABLE_MAPPINGS_BUILT_TOTAL.inc();
}
