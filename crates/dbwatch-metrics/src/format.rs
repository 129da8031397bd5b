//! Shaping query results into metric values.

use dbwatch_conn::QueryResult;
use serde_json::{Map, Value};

use crate::catalog::{MetricSpec, Shape};
use crate::error::{MetricError, MetricResult};

pub fn shape(spec: &MetricSpec, result: &QueryResult) -> MetricResult<String> {
    match spec.shape {
        Shape::Text => text(spec, result),
        Shape::Json => Ok(rows_json(result, false)?),
        Shape::Discovery => Ok(rows_json(result, true)?),
    }
}

/// First column of the first row. `NULL` is rendered as an empty string.
fn text(spec: &MetricSpec, result: &QueryResult) -> MetricResult<String> {
    result
        .first_value()
        .map(|value| value.unwrap_or_default().to_string())
        .ok_or(MetricError::EmptyResult(spec.key))
}

/// Serialize rows as an array of objects, one key per column.
pub fn rows_json(result: &QueryResult, discovery: bool) -> Result<String, serde_json::Error> {
    let keys: Vec<String> = result
        .columns
        .iter()
        .map(|column| {
            if discovery {
                discovery_macro(column)
            } else {
                column.clone()
            }
        })
        .collect();

    let rows: Vec<Value> = result
        .rows
        .iter()
        .map(|row| {
            let object: Map<String, Value> = keys
                .iter()
                .zip(row)
                .map(|(key, value)| {
                    let value = value.as_ref().map_or(Value::Null, |v| Value::String(v.clone()));
                    (key.clone(), value)
                })
                .collect();
            Value::Object(object)
        })
        .collect();

    serde_json::to_string(&rows)
}

/// `Slave_IO_State` → `{#SLAVE_IO_STATE}`.
pub fn discovery_macro(column: &str) -> String {
    format!("{{#{}}}", column.to_uppercase())
}
