use std::sync::LazyLock;

use prometheus::{
    register_int_counter,
    register_int_counter_vec,
    IntCounter,
    IntCounterVec,
};

static SHARED_TABLE_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "shared_table_requests_total",
        "Count of shared-table router requests, labeled with the operation",
        &["op"]
    )
    .unwrap()
});

pub fn log_request(op: &'static str) {
    SHARED_TABLE_REQUESTS_TOTAL.with_label_values(&[op]).inc();
}

static STREAM_RECORDS_RELABELED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "shared_table_stream_records_relabeled_total",
        "Count of change records translated back to tenant form"
    )
    .unwrap()
});

pub fn log_stream_record_relabeled() {
    STREAM_RECORDS_RELABELED_TOTAL.inc();
}

static ASYNC_TABLE_DELETE_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "shared_table_async_delete_failures_total",
        "Count of background table deletions that failed"
    )
    .unwrap()
});

pub fn log_async_delete_failure() {
    ASYNC_TABLE_DELETE_FAILURES_TOTAL.inc();
}
