//! Filter expression builder.
//!
//! Produces the OData `$filter` text the service evaluates, for example
//! `(PartitionKey eq 'orders') and (Amount gt 10.5)`.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::wire::{format_datetime, format_double};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryComparison {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl QueryComparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryComparison::Equal => "eq",
            QueryComparison::NotEqual => "ne",
            QueryComparison::GreaterThan => "gt",
            QueryComparison::GreaterThanOrEqual => "ge",
            QueryComparison::LessThan => "lt",
            QueryComparison::LessThanOrEqual => "le",
        }
    }
}

impl fmt::Display for QueryComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Boolean operators joining two filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOperator {
    And,
    Or,
}

impl TableOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableOperator::And => "and",
            TableOperator::Or => "or",
        }
    }
}

impl fmt::Display for TableOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn condition(property: &str, operation: QueryComparison, literal: &str) -> String {
    format!("{property} {operation} {literal}")
}

fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `property op 'value'` with embedded quotes doubled.
pub fn generate_filter_condition(
    property: &str,
    operation: QueryComparison,
    value: &str,
) -> String {
    condition(property, operation, &quoted(value))
}

pub fn generate_filter_condition_for_bool(
    property: &str,
    operation: QueryComparison,
    value: bool,
) -> String {
    condition(property, operation, if value { "true" } else { "false" })
}

/// Binary literals are written as `X'0aff'`.
pub fn generate_filter_condition_for_binary(
    property: &str,
    operation: QueryComparison,
    value: &[u8],
) -> String {
    condition(property, operation, &format!("X'{}'", hex::encode(value)))
}

pub fn generate_filter_condition_for_date(
    property: &str,
    operation: QueryComparison,
    value: DateTime<Utc>,
) -> String {
    condition(property, operation, &format!("datetime'{}'", format_datetime(&value)))
}

/// Doubles always carry a decimal point so they are not read as integers.
pub fn generate_filter_condition_for_double(
    property: &str,
    operation: QueryComparison,
    value: f64,
) -> String {
    condition(property, operation, &format_double(value))
}

pub fn generate_filter_condition_for_guid(
    property: &str,
    operation: QueryComparison,
    value: Uuid,
) -> String {
    condition(property, operation, &format!("guid'{}'", value.hyphenated()))
}

pub fn generate_filter_condition_for_int(
    property: &str,
    operation: QueryComparison,
    value: i32,
) -> String {
    condition(property, operation, &value.to_string())
}

/// Longs carry the `L` suffix.
pub fn generate_filter_condition_for_long(
    property: &str,
    operation: QueryComparison,
    value: i64,
) -> String {
    condition(property, operation, &format!("{value}L"))
}

/// `(left) op (right)`.
pub fn combine_filters(left: &str, operator: TableOperator, right: &str) -> String {
    format!("({left}) {operator} ({right})")
}
