//! Request and response types for the backend API subset used on the data
//! path. Pagination keys are carried opaquely.

use std::collections::BTreeMap;

use value::{
    AttributeValue,
    Item,
    TableName,
};

use crate::types::IndexName;

/// `"#name"` placeholder → attribute name.
pub type ExpressionNames = BTreeMap<String, String>;
/// `":value"` placeholder → literal.
pub type ExpressionValues = BTreeMap<String, AttributeValue>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    BeginsWith,
    Between,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyCondition {
    pub operator: ComparisonOperator,
    pub values: Vec<AttributeValue>,
}

impl KeyCondition {
    pub fn equals(value: AttributeValue) -> Self {
        Self {
            operator: ComparisonOperator::Eq,
            values: vec![value],
        }
    }

    pub fn new(operator: ComparisonOperator, values: Vec<AttributeValue>) -> Self {
        Self { operator, values }
    }

    /// The right-hand side when this is an equality, `None` otherwise.
    pub fn equality_value(&self) -> Option<&AttributeValue> {
        match self.operator {
            ComparisonOperator::Eq => self.values.first(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct GetItemRequest {
    pub table_name: TableName,
    pub key: Item,
}

#[derive(Clone, Debug, Default)]
pub struct GetItemResponse {
    pub item: Option<Item>,
}

#[derive(Clone, Debug, Default)]
pub struct PutItemRequest {
    pub table_name: TableName,
    pub item: Item,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionNames>,
    pub expression_attribute_values: Option<ExpressionValues>,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteItemRequest {
    pub table_name: TableName,
    pub key: Item,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionNames>,
    pub expression_attribute_values: Option<ExpressionValues>,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateItemRequest {
    pub table_name: TableName,
    pub key: Item,
    pub update_expression: Option<String>,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionNames>,
    pub expression_attribute_values: Option<ExpressionValues>,
}

#[derive(Clone, Debug, Default)]
pub struct QueryRequest {
    pub table_name: TableName,
    pub index_name: Option<IndexName>,
    pub key_conditions: BTreeMap<String, KeyCondition>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionNames>,
    pub expression_attribute_values: Option<ExpressionValues>,
    pub exclusive_start_key: Option<Item>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct QueryResponse {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Clone, Debug, Default)]
pub struct ScanRequest {
    pub table_name: TableName,
    pub index_name: Option<IndexName>,
    pub filter_expression: Option<String>,
    pub expression_attribute_names: Option<ExpressionNames>,
    pub expression_attribute_values: Option<ExpressionValues>,
    pub exclusive_start_key: Option<Item>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct ScanResponse {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<Item>,
}
