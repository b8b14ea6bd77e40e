//! In-process fakes used across the workspace's tests.

mod expression;

use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use value::{
    AttributeValue,
    Item,
    TableName,
};

use crate::{
    backend::BackendClient,
    requests::{
        ComparisonOperator,
        DeleteItemRequest,
        GetItemRequest,
        GetItemResponse,
        KeyCondition,
        PutItemRequest,
        QueryRequest,
        QueryResponse,
        ScanRequest,
        ScanResponse,
        UpdateItemRequest,
    },
    schema::{
        IndexProjection,
        PrimaryKey,
        SecondaryIndex,
        TableDescription,
    },
    streams::{
        StreamEventName,
        StreamRecord,
    },
    types::{
        StreamViewType,
        TableStatus,
    },
};

pub use self::expression::evaluate_filter;

pub type RowKey = (AttributeValue, Option<AttributeValue>);

struct TableState {
    description: TableDescription,
    rows: BTreeMap<RowKey, Item>,
    records: Vec<StreamRecord>,
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<TableName, TableState>,
    sequence_counter: u64,
}

/// An in-memory [`BackendClient`] with change capture and the filter subset
/// the router emits. Rows are keyed and ordered by (hash, range), which also
/// drives scan pagination.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<TableName> {
        self.inner.lock().tables.keys().cloned().collect()
    }

    /// All physical rows of a table, keyed by (hash, range).
    pub fn rows(&self, table_name: &TableName) -> BTreeMap<RowKey, Item> {
        self.inner
            .lock()
            .tables
            .get(table_name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Drains the captured change records of a table.
    pub fn take_stream_records(&self, table_name: &TableName) -> Vec<StreamRecord> {
        let mut inner = self.inner.lock();
        inner
            .tables
            .get_mut(table_name)
            .map(|t| std::mem::take(&mut t.records))
            .unwrap_or_default()
    }
}

fn row_key(primary_key: &PrimaryKey, attrs: &Item) -> anyhow::Result<RowKey> {
    let hash = attrs
        .get(&primary_key.hash_key)
        .with_context(|| format!("missing hash key attribute '{}'", primary_key.hash_key))?
        .clone();
    let range = match &primary_key.range_key {
        Some(range_key) => Some(
            attrs
                .get(&range_key.name)
                .with_context(|| format!("missing range key attribute '{}'", range_key.name))?
                .clone(),
        ),
        None => None,
    };
    Ok((hash, range))
}

fn key_item(primary_key: &PrimaryKey, attrs: &Item) -> anyhow::Result<Item> {
    let mut key = Item::new();
    let (hash, range) = row_key(primary_key, attrs)?;
    key.insert(primary_key.hash_key.clone(), hash);
    if let (Some(range_key), Some(range)) = (&primary_key.range_key, range) {
        key.insert(range_key.name.clone(), range);
    }
    Ok(key)
}

fn key_condition_holds(condition: &KeyCondition, actual: &AttributeValue) -> anyhow::Result<bool> {
    let first = condition
        .values
        .first()
        .context("key condition without a value")?;
    let holds = match condition.operator {
        ComparisonOperator::Eq => actual == first,
        ComparisonOperator::Lt => actual < first,
        ComparisonOperator::Le => actual <= first,
        ComparisonOperator::Gt => actual > first,
        ComparisonOperator::Ge => actual >= first,
        ComparisonOperator::BeginsWith => match (actual, first) {
            (AttributeValue::S(actual), AttributeValue::S(prefix)) => actual.starts_with(prefix),
            _ => false,
        },
        ComparisonOperator::Between => {
            let second = condition
                .values
                .get(1)
                .context("between needs two values")?;
            first <= actual && actual <= second
        },
    };
    Ok(holds)
}

/// Page through ordered rows: skip past the start key, take up to `limit`,
/// report the last scanned key when more rows remain. Filtering happens
/// after paging, as the backend does.
fn page<'a>(
    rows: impl Iterator<Item = (&'a RowKey, &'a Item)>,
    primary_key: &PrimaryKey,
    start: Option<RowKey>,
    limit: Option<usize>,
) -> (Vec<Item>, Option<Item>) {
    let mut remaining: Vec<(&RowKey, &Item)> = rows
        .skip_while(|(key, _)| match &start {
            Some(start) => *key <= start,
            None => false,
        })
        .collect();
    let limit = limit.unwrap_or(usize::MAX).max(1);
    let has_more = remaining.len() > limit;
    if has_more {
        remaining.truncate(limit);
    }
    let last_evaluated_key = if has_more {
        remaining.last().map(|(key, _)| {
            let mut item = Item::new();
            item.insert(primary_key.hash_key.clone(), key.0.clone());
            if let (Some(range_key), Some(range)) = (&primary_key.range_key, &key.1) {
                item.insert(range_key.name.clone(), range.clone());
            }
            item
        })
    } else {
        None
    };
    let items = remaining.into_iter().map(|(_, item)| item.clone()).collect();
    (items, last_evaluated_key)
}

/// Reads through an index only see the attributes its projection copied:
/// the table and index keys, plus any `Include`d attributes.
fn project_item(item: &Item, primary_key: &PrimaryKey, index: &SecondaryIndex) -> Item {
    match &index.projection {
        IndexProjection::All => item.clone(),
        projection => {
            let mut keep: BTreeSet<&str> = BTreeSet::new();
            for key in [primary_key, &index.primary_key] {
                keep.insert(key.hash_key.as_str());
                if let Some(range) = &key.range_key {
                    keep.insert(range.name.as_str());
                }
            }
            if let IndexProjection::Include(fields) = projection {
                keep.extend(fields.iter().map(String::as_str));
            }
            item.iter()
                .filter(|(name, _)| keep.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        },
    }
}

impl Inner {
    fn table(&self, name: &TableName) -> anyhow::Result<&TableState> {
        self.tables
            .get(name)
            .with_context(|| format!("table '{name}' does not exist"))
    }

    fn table_mut(&mut self, name: &TableName) -> anyhow::Result<&mut TableState> {
        self.tables
            .get_mut(name)
            .with_context(|| format!("table '{name}' does not exist"))
    }

    fn next_sequence_number(&mut self) -> String {
        self.sequence_counter += 1;
        format!("{:020}", self.sequence_counter)
    }
}

impl TableState {
    fn record(
        &mut self,
        sequence_number: String,
        event_name: StreamEventName,
        keys: Item,
        old_image: Option<Item>,
        new_image: Option<Item>,
    ) {
        let Some(spec) = &self.description.stream else {
            return;
        };
        if !spec.enabled {
            return;
        }
        let (old_image, new_image) = match spec.view_type {
            StreamViewType::KeysOnly => (None, None),
            StreamViewType::NewImage => (None, new_image),
            StreamViewType::OldImage => (old_image, None),
            StreamViewType::NewAndOldImages => (old_image, new_image),
        };
        self.records.push(StreamRecord {
            sequence_number,
            event_name,
            keys,
            old_image,
            new_image,
        });
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    async fn create_table(&self, table: TableDescription) -> anyhow::Result<TableDescription> {
        let mut inner = self.inner.lock();
        anyhow::ensure!(
            !inner.tables.contains_key(&table.table_name),
            "table '{}' already exists",
            table.table_name,
        );
        let mut description = table;
        description.status = TableStatus::Active;
        if let Some(spec) = &mut description.stream {
            if spec.enabled {
                spec.stream_label =
                    Some(format!("stream/{}/{:06}", description.table_name, 1));
            }
        }
        inner.tables.insert(
            description.table_name.clone(),
            TableState {
                description: description.clone(),
                rows: BTreeMap::new(),
                records: Vec::new(),
            },
        );
        Ok(description)
    }

    async fn describe_table(
        &self,
        table_name: &TableName,
    ) -> anyhow::Result<Option<TableDescription>> {
        let inner = self.inner.lock();
        Ok(inner.tables.get(table_name).map(|t| t.description.clone()))
    }

    async fn delete_table(&self, table_name: &TableName) -> anyhow::Result<TableDescription> {
        let mut inner = self.inner.lock();
        let state = inner
            .tables
            .remove(table_name)
            .with_context(|| format!("table '{table_name}' does not exist"))?;
        Ok(state.description)
    }

    async fn get_item(&self, request: GetItemRequest) -> anyhow::Result<GetItemResponse> {
        let inner = self.inner.lock();
        let table = inner.table(&request.table_name)?;
        let key = row_key(&table.description.primary_key, &request.key)?;
        Ok(GetItemResponse {
            item: table.rows.get(&key).cloned(),
        })
    }

    async fn put_item(&self, request: PutItemRequest) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let sequence_number = inner.next_sequence_number();
        let table = inner.table_mut(&request.table_name)?;
        let key = row_key(&table.description.primary_key, &request.item)?;
        let keys = key_item(&table.description.primary_key, &request.item)?;
        let old = table.rows.insert(key, request.item.clone());
        let event = match old {
            Some(_) => StreamEventName::Modify,
            None => StreamEventName::Insert,
        };
        table.record(sequence_number, event, keys, old, Some(request.item));
        Ok(())
    }

    async fn update_item(&self, request: UpdateItemRequest) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let sequence_number = inner.next_sequence_number();
        let table = inner.table_mut(&request.table_name)?;
        let key = row_key(&table.description.primary_key, &request.key)?;
        let old = table.rows.get(&key).cloned();
        let mut item = old.clone().unwrap_or_else(|| request.key.clone());
        if let Some(expression) = &request.update_expression {
            expression::apply_update_expression(
                &mut item,
                expression,
                request.expression_attribute_names.as_ref(),
                request.expression_attribute_values.as_ref(),
            )?;
        }
        let keys = key_item(&table.description.primary_key, &item)?;
        table.rows.insert(key, item.clone());
        let event = match old {
            Some(_) => StreamEventName::Modify,
            None => StreamEventName::Insert,
        };
        table.record(sequence_number, event, keys, old, Some(item));
        Ok(())
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let sequence_number = inner.next_sequence_number();
        let table = inner.table_mut(&request.table_name)?;
        let key = row_key(&table.description.primary_key, &request.key)?;
        let keys = key_item(&table.description.primary_key, &request.key)?;
        if let Some(old) = table.rows.remove(&key) {
            table.record(
                sequence_number,
                StreamEventName::Remove,
                keys,
                Some(old),
                None,
            );
        }
        Ok(())
    }

    async fn query(&self, request: QueryRequest) -> anyhow::Result<QueryResponse> {
        let inner = self.inner.lock();
        let table = inner.table(&request.table_name)?;
        let index = match &request.index_name {
            Some(index_name) => Some(
                table
                    .description
                    .secondary_index(index_name)
                    .with_context(|| {
                        format!(
                            "index '{index_name}' does not exist on table '{}'",
                            request.table_name,
                        )
                    })?,
            ),
            None => None,
        };
        let matching: Vec<(&RowKey, &Item)> = table
            .rows
            .iter()
            .filter_map(|(key, item)| {
                for (field, condition) in &request.key_conditions {
                    let Some(actual) = item.get(field) else {
                        return None;
                    };
                    match key_condition_holds(condition, actual) {
                        Ok(true) => {},
                        Ok(false) => return None,
                        Err(e) => return Some(Err(e)),
                    }
                }
                Some(Ok((key, item)))
            })
            .collect::<anyhow::Result<_>>()?;
        let start = match &request.exclusive_start_key {
            Some(key) => Some(row_key(&table.description.primary_key, key)?),
            None => None,
        };
        let (items, last_evaluated_key) = page(
            matching.into_iter(),
            &table.description.primary_key,
            start,
            request.limit,
        );
        let items = match index {
            Some(index) => items
                .iter()
                .map(|item| project_item(item, &table.description.primary_key, index))
                .collect(),
            None => items,
        };
        let items = filter_items(
            items,
            request.filter_expression.as_deref(),
            request.expression_attribute_names.as_ref(),
            request.expression_attribute_values.as_ref(),
        )?;
        Ok(QueryResponse {
            items,
            last_evaluated_key,
        })
    }

    async fn scan(&self, request: ScanRequest) -> anyhow::Result<ScanResponse> {
        let inner = self.inner.lock();
        let table = inner.table(&request.table_name)?;
        let index = match &request.index_name {
            Some(index_name) => Some(
                table
                    .description
                    .secondary_index(index_name)
                    .with_context(|| {
                        format!(
                            "index '{index_name}' does not exist on table '{}'",
                            request.table_name,
                        )
                    })?,
            ),
            None => None,
        };
        let start = match &request.exclusive_start_key {
            Some(key) => Some(row_key(&table.description.primary_key, key)?),
            None => None,
        };
        let (items, last_evaluated_key) = page(
            table.rows.iter(),
            &table.description.primary_key,
            start,
            request.limit,
        );
        let items = match index {
            Some(index) => items
                .iter()
                .map(|item| project_item(item, &table.description.primary_key, index))
                .collect(),
            None => items,
        };
        let items = filter_items(
            items,
            request.filter_expression.as_deref(),
            request.expression_attribute_names.as_ref(),
            request.expression_attribute_values.as_ref(),
        )?;
        Ok(ScanResponse {
            items,
            last_evaluated_key,
        })
    }
}

fn filter_items(
    items: Vec<Item>,
    expression: Option<&str>,
    names: Option<&crate::requests::ExpressionNames>,
    values: Option<&crate::requests::ExpressionValues>,
) -> anyhow::Result<Vec<Item>> {
    let Some(expression) = expression else {
        return Ok(items);
    };
    items
        .into_iter()
        .filter_map(|item| {
            match expression::evaluate_filter(expression, names, values, &item) {
                Ok(true) => Some(Ok(item)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;
    use value::{
        AttributeValue,
        ScalarType,
    };

    use super::InMemoryBackend;
    use crate::{
        backend::BackendClient,
        requests::{
            GetItemRequest,
            KeyCondition,
            PutItemRequest,
            QueryRequest,
            ScanRequest,
        },
        schema::{
            IndexProjection,
            PrimaryKey,
            SecondaryIndex,
            SecondaryIndexKind,
            TableDescription,
        },
    };

    #[tokio::test]
    async fn put_get_scan_with_pagination() -> anyhow::Result<()> {
        let backend = InMemoryBackend::new();
        let table: value::TableName = "t".parse()?;
        backend
            .create_table(TableDescription::new(
                table.clone(),
                PrimaryKey::hash("hk", ScalarType::S),
            ))
            .await?;
        for i in 0..5 {
            backend
                .put_item(PutItemRequest {
                    table_name: table.clone(),
                    item: btreemap! {
                        "hk".to_owned() => AttributeValue::s(format!("key{i}")),
                    },
                    ..Default::default()
                })
                .await?;
        }

        let got = backend
            .get_item(GetItemRequest {
                table_name: table.clone(),
                key: btreemap! { "hk".to_owned() => AttributeValue::s("key3") },
            })
            .await?;
        assert!(got.item.is_some());

        let mut seen = 0;
        let mut start = None;
        loop {
            let response = backend
                .scan(ScanRequest {
                    table_name: table.clone(),
                    exclusive_start_key: start.take(),
                    limit: Some(2),
                    ..Default::default()
                })
                .await?;
            seen += response.items.len();
            match response.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        assert_eq!(seen, 5);
        Ok(())
    }

    #[tokio::test]
    async fn index_reads_apply_the_projection() -> anyhow::Result<()> {
        let backend = InMemoryBackend::new();
        let table: value::TableName = "t".parse()?;
        backend
            .create_table(
                TableDescription::new(table.clone(), PrimaryKey::hash("hk", ScalarType::S))
                    .with_secondary_index(
                        SecondaryIndex::new(
                            "by_color".parse()?,
                            SecondaryIndexKind::Gsi,
                            PrimaryKey::hash("color", ScalarType::S),
                        )
                        .with_projection(IndexProjection::KeysOnly),
                    )
                    .with_secondary_index(
                        SecondaryIndex::new(
                            "by_color_size".parse()?,
                            SecondaryIndexKind::Gsi,
                            PrimaryKey::hash("color", ScalarType::S),
                        )
                        .with_projection(IndexProjection::Include(vec!["size".to_owned()])),
                    ),
            )
            .await?;
        backend
            .put_item(PutItemRequest {
                table_name: table.clone(),
                item: btreemap! {
                    "hk".to_owned() => AttributeValue::s("1"),
                    "color".to_owned() => AttributeValue::s("red"),
                    "size".to_owned() => AttributeValue::n("4"),
                    "note".to_owned() => AttributeValue::s("extra"),
                },
                ..Default::default()
            })
            .await?;

        let keys_only = backend
            .query(QueryRequest {
                table_name: table.clone(),
                index_name: Some("by_color".parse()?),
                key_conditions: btreemap! {
                    "color".to_owned() => KeyCondition::equals(AttributeValue::s("red")),
                },
                ..Default::default()
            })
            .await?;
        assert_eq!(
            keys_only.items,
            vec![btreemap! {
                "hk".to_owned() => AttributeValue::s("1"),
                "color".to_owned() => AttributeValue::s("red"),
            }],
        );

        let with_size = backend
            .query(QueryRequest {
                table_name: table.clone(),
                index_name: Some("by_color_size".parse()?),
                key_conditions: btreemap! {
                    "color".to_owned() => KeyCondition::equals(AttributeValue::s("red")),
                },
                ..Default::default()
            })
            .await?;
        assert_eq!(
            with_size.items,
            vec![btreemap! {
                "hk".to_owned() => AttributeValue::s("1"),
                "color".to_owned() => AttributeValue::s("red"),
                "size".to_owned() => AttributeValue::n("4"),
            }],
        );

        let scanned = backend
            .scan(ScanRequest {
                table_name: table,
                index_name: Some("by_color".parse()?),
                ..Default::default()
            })
            .await?;
        assert_eq!(scanned.items.len(), 1);
        assert!(!scanned.items[0].contains_key("note"));
        Ok(())
    }
}
