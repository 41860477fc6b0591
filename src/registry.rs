//! Source registry: resolves `(data_source, type, version)` triples to a
//! connector class and its properties at plan time (spec.md §4.2).
//!
//! Modeled on the connector-factory lookup table in
//! `other_examples/d2828ffc_barockok-kalla-rust__crates-kalla-connectors-src-factory.rs.rs`:
//! a flat table built once at startup, queried by exact match first, then
//! by a wildcard version fallback.

use std::collections::HashMap;

use crate::config::{ConnectorClass, ConnectorConfig};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct ConnectorSpec {
    pub data_source: String,
    pub type_name: String,
    pub version: Option<i64>,
    pub class: ConnectorClass,
    pub properties: serde_json::Value,
}

/// Data sources are keyed case-insensitively; exact `(data_source, version)`
/// matches win over the registrant with `version: None`, which serves as
/// that data source's wildcard.
pub struct SourceRegistry {
    exact: HashMap<(String, i64), ConnectorSpec>,
    wildcard: HashMap<String, ConnectorSpec>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { exact: HashMap::new(), wildcard: HashMap::new() }
    }

    pub fn from_configs(configs: &[ConnectorConfig]) -> Self {
        let mut registry = Self::new();
        for cfg in configs {
            registry.register(ConnectorSpec {
                data_source: cfg.data_source.clone(),
                type_name: cfg.type_name.clone(),
                version: cfg.version,
                class: cfg.class,
                properties: cfg.properties.clone(),
            });
        }
        registry
    }

    pub fn register(&mut self, spec: ConnectorSpec) {
        let name = spec.data_source.to_lowercase();
        match spec.version {
            Some(v) => {
                self.exact.insert((name, v), spec);
            }
            None => {
                self.wildcard.insert(name, spec);
            }
        }
    }

    /// Resolve a data source, optionally pinned to a model-declared
    /// version. Falls back to the wildcard registrant when no exact
    /// version match exists.
    pub fn resolve(&self, data_source: &str, version: Option<i64>) -> EngineResult<&ConnectorSpec> {
        let name = data_source.to_lowercase();
        if let Some(v) = version {
            if let Some(spec) = self.exact.get(&(name.clone(), v)) {
                return Ok(spec);
            }
        }
        self.wildcard
            .get(&name)
            .or_else(|| {
                // A single exact-version registrant also serves as an
                // implicit wildcard when it's the only entry for this name.
                let matches: Vec<_> = self.exact.iter().filter(|((n, _), _)| n == &name).map(|(_, s)| s).collect();
                if matches.len() == 1 { Some(matches[0]) } else { None }
            })
            .ok_or_else(|| EngineError::validation(format!("data source '{data_source}' does not exist")))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.is_empty()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ds: &str, version: Option<i64>, class: ConnectorClass) -> ConnectorSpec {
        ConnectorSpec {
            data_source: ds.to_string(),
            type_name: "t".to_string(),
            version,
            class,
            properties: serde_json::json!({}),
        }
    }

    #[test]
    fn exact_version_wins_over_wildcard() {
        let mut registry = SourceRegistry::new();
        registry.register(spec("crm", None, ConnectorClass::Relational));
        registry.register(spec("crm", Some(2), ConnectorClass::File));
        let resolved = registry.resolve("crm", Some(2)).unwrap();
        assert_eq!(resolved.class, ConnectorClass::File);
    }

    #[test]
    fn falls_back_to_wildcard_when_version_unknown() {
        let mut registry = SourceRegistry::new();
        registry.register(spec("crm", None, ConnectorClass::Relational));
        let resolved = registry.resolve("crm", Some(99)).unwrap();
        assert_eq!(resolved.class, ConnectorClass::Relational);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = SourceRegistry::new();
        registry.register(spec("CRM", None, ConnectorClass::Relational));
        assert!(registry.resolve("crm", None).is_ok());
    }

    #[test]
    fn unknown_data_source_errors() {
        let registry = SourceRegistry::new();
        assert!(matches!(registry.resolve("absent", None), Err(EngineError::Validation { .. })));
    }
}
