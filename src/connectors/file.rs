//! File connector: CSV and JSON sources addressed by a quoted `src`
//! literal resolved under a per-data-source `base_dir` (spec.md §4.3.2).
//!
//! CSV values are textual by nature; this connector applies the same
//! implicit-numeric-coercion convention the spec calls out for flat
//! files, recognizing integers and decimals by regex and leaving
//! everything else as a string. JSON sources are read whole and walked
//! to a configurable `result_path` (default: the document root), then
//! expected to be an array of flat objects.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::ast::Resource;
use crate::connectors::{Connector, FetchRequest, FetchResult};
use crate::error::{EngineError, EngineResult};
use crate::functions::{FunctionCapability, ForceAll};
use crate::row::{ColumnDescriptor, ColumnIndex, Value};

fn int_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?\d+$").unwrap())
}

fn float_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?\d+\.\d+$").unwrap())
}

fn coerce_csv_cell(raw: &str) -> Value {
    if raw.is_empty() {
        Value::Null
    } else if int_pattern().is_match(raw) {
        raw.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Str(raw.to_string()))
    } else if float_pattern().is_match(raw) {
        raw.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Str(raw.to_string()))
    } else {
        Value::Str(raw.to_string())
    }
}

/// Resolve `src` under `base_dir`, rejecting any path that escapes it via
/// `.`/`..` segments or an absolute component.
fn resolve_path(base_dir: &Path, src: &str) -> EngineResult<PathBuf> {
    let candidate = Path::new(src);
    for component in candidate.components() {
        use std::path::Component;
        match component {
            Component::Normal(_) => {}
            _ => return Err(EngineError::access_denied(format!("invalid path component in '{src}'"))),
        }
    }
    Ok(base_dir.join(candidate))
}

fn base_dir_from_properties(properties: &serde_json::Value) -> PathBuf {
    properties
        .get("base_dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn is_json_resource(resource: &Resource, properties: &serde_json::Value) -> bool {
    properties
        .get("format")
        .and_then(|v| v.as_str())
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or_else(|| resource.src.to_lowercase().ends_with(".json"))
}

pub struct FileConnector;

impl FileConnector {
    fn fetch_csv(&self, resource: &Resource, properties: &serde_json::Value) -> EngineResult<FetchResult> {
        let base_dir = base_dir_from_properties(properties);
        let path = resolve_path(&base_dir, &resource.src)?;
        let separator = properties
            .get("separator")
            .and_then(|v| v.as_str())
            .and_then(|s| s.as_bytes().first().copied())
            .unwrap_or(b',');

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .has_headers(true)
            .from_path(&path)
            .map_err(EngineError::from)?;

        let headers: Vec<String> = reader.headers().map_err(EngineError::from)?.iter().map(str::to_string).collect();

        let mut columns = ColumnIndex::default();
        for h in &headers {
            columns.push(ColumnDescriptor::source(resource.alias.clone(), h.clone(), None));
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(EngineError::from)?;
            rows.push(record.iter().map(coerce_csv_cell).collect());
        }

        Ok(FetchResult { columns, rows })
    }

    fn fetch_json(&self, resource: &Resource, properties: &serde_json::Value) -> EngineResult<FetchResult> {
        let base_dir = base_dir_from_properties(properties);
        let path = resolve_path(&base_dir, &resource.src)?;
        let contents = std::fs::read_to_string(&path)?;
        let document: serde_json::Value = serde_json::from_str(&contents)?;

        let result_path = properties.get("result_path").and_then(|v| v.as_str()).unwrap_or("");
        let rooted = navigate_json_path(&document, result_path)?;

        let items = rooted
            .as_array()
            .ok_or_else(|| EngineError::fetch(format!("'{}' does not resolve to a JSON array", resource.src)))?;

        let mut columns = ColumnIndex::default();
        let mut field_order: Vec<String> = Vec::new();
        if let Some(first) = items.first().and_then(|v| v.as_object()) {
            for key in first.keys() {
                field_order.push(key.clone());
                columns.push(ColumnDescriptor::source(resource.alias.clone(), key.clone(), None));
            }
        }

        let mut rows = Vec::new();
        for item in items {
            let obj = item.as_object().ok_or_else(|| EngineError::fetch("expected array of JSON objects"))?;
            let row = field_order
                .iter()
                .map(|key| obj.get(key).map(Value::from_json).unwrap_or(Value::Null))
                .collect();
            rows.push(row);
        }

        Ok(FetchResult { columns, rows })
    }
}

/// Walks a `.`-separated JSON path; an empty path returns the document
/// root unchanged.
fn navigate_json_path<'a>(document: &'a serde_json::Value, path: &str) -> EngineResult<&'a serde_json::Value> {
    if path.is_empty() {
        return Ok(document);
    }
    let mut current = document;
    for segment in path.split('.') {
        current = current
            .get(segment)
            .ok_or_else(|| EngineError::fetch(format!("result_path segment '{segment}' not found")))?;
    }
    Ok(current)
}

#[async_trait]
impl Connector for FileConnector {
    async fn fetch(&self, request: FetchRequest<'_>) -> EngineResult<FetchResult> {
        let resource = request.resource.clone();
        let properties = request.properties.clone();
        tokio::task::spawn_blocking(move || {
            if is_json_resource(&resource, &properties) {
                FileConnector.fetch_json(&resource, &properties)
            } else {
                FileConnector.fetch_csv(&resource, &properties)
            }
        })
        .await
        .map_err(|e| EngineError::internal(format!("file connector task panicked: {e}")))?
    }

    fn function_capability(&self) -> Box<dyn FunctionCapability> {
        Box::new(ForceAll)
    }
}
