//! Web-API connector: GET + `application/json` only (spec.md §4.3.3),
//! with an optional SPNEGO handshake ahead of the actual request when the
//! data source is configured with a Kerberos identity. The handshake is
//! capped at three continuation rounds; a server that hasn't finished
//! negotiating by then is treated as a connect failure rather than
//! looped on indefinitely.

use async_trait::async_trait;
use base64::Engine;
use cross_krb5::{ClientCtx, InitiateFlags, K5Ctx, Step};

use crate::config::KerberosConfig;
use crate::connectors::{Connector, FetchRequest, FetchResult};
use crate::error::{EngineError, EngineResult};
use crate::functions::{FunctionCapability, ForceAll};
use crate::row::{ColumnDescriptor, ColumnIndex, Value};

const MAX_NEGOTIATE_ROUNDS: usize = 3;

pub struct WebApiConnector {
    client: reqwest::Client,
    kerberos: KerberosConfig,
}

impl WebApiConnector {
    pub fn new(kerberos: KerberosConfig) -> Self {
        Self { client: reqwest::Client::new(), kerberos }
    }

    fn endpoint_mapping<'a>(&self, properties: &'a serde_json::Value, src: &str) -> Option<&'a serde_json::Value> {
        properties.get("endpoint_mappings").and_then(|m| m.get(src))
    }

    async fn negotiate(&self, url: &str, spn: &str) -> EngineResult<Option<String>> {
        if self.kerberos.client_keytab.is_none() {
            return Ok(None);
        }

        let (mut ctx, mut token) = ClientCtx::new(InitiateFlags::empty(), None, spn, None)
            .map_err(|e| EngineError::connect(format!("kerberos context init failed: {e}")))?;

        for round in 0..MAX_NEGOTIATE_ROUNDS {
            let header_value = format!("Negotiate {}", base64::engine::general_purpose::STANDARD.encode(&token));
            let response = self
                .client
                .get(url)
                .header("Authorization", header_value)
                .send()
                .await
                .map_err(EngineError::from)?;

            if response.status().is_success() {
                return Ok(Some(String::new()));
            }

            let challenge = response
                .headers()
                .get("WWW-Authenticate")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Negotiate "))
                .ok_or_else(|| EngineError::connect("server did not issue a Negotiate challenge"))?;
            let challenge_token = base64::engine::general_purpose::STANDARD
                .decode(challenge)
                .map_err(|e| EngineError::connect(format!("invalid base64 challenge: {e}")))?;

            match ctx.step(Some(&challenge_token)).map_err(|e| EngineError::connect(format!("spnego step failed: {e}")))? {
                Step::Finished((_, final_token)) => {
                    let out = final_token.map(|t| base64::engine::general_purpose::STANDARD.encode(t.as_ref()));
                    return Ok(out);
                }
                Step::Continue((next_ctx, next_token)) => {
                    ctx = next_ctx;
                    token = next_token.as_ref().to_vec();
                }
            }

            if round == MAX_NEGOTIATE_ROUNDS - 1 {
                return Err(EngineError::connect("spnego handshake did not complete within round limit"));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Connector for WebApiConnector {
    async fn fetch(&self, request: FetchRequest<'_>) -> EngineResult<FetchResult> {
        let resource = request.resource;
        let properties = request.properties;

        let base_url = properties
            .get("base_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::validation("web_api data source missing 'base_url' property"))?;
        let url = format!("{}/{}", base_url.trim_end_matches('/'), resource.src);

        let spn = properties.get("spn").and_then(|v| v.as_str()).unwrap_or_default();
        let negotiated_token = self.negotiate(&url, spn).await?;

        let mut req = self.client.get(&url).header("Accept", "application/json");
        if let Some(token) = negotiated_token.filter(|t| !t.is_empty()) {
            req = req.header("Authorization", format!("Negotiate {token}"));
        }

        let response = req.send().await.map_err(EngineError::from)?;
        if !response.status().is_success() {
            return Err(EngineError::connect(format!("web api returned status {}", response.status())));
        }
        let body: serde_json::Value = response.json().await.map_err(EngineError::from)?;

        let result_path = self
            .endpoint_mapping(properties, &resource.src)
            .and_then(|m| m.get("result_path"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let mut current = &body;
        if !result_path.is_empty() {
            for segment in result_path.split('.') {
                current = current
                    .get(segment)
                    .ok_or_else(|| EngineError::fetch(format!("result_path segment '{segment}' not found")))?;
            }
        }

        let items = current
            .as_array()
            .ok_or_else(|| EngineError::fetch(format!("'{}' did not resolve to a JSON array", resource.src)))?;

        let mut columns = ColumnIndex::default();
        let mut field_order: Vec<String> = Vec::new();
        if let Some(first) = items.first().and_then(|v| v.as_object()) {
            for key in first.keys() {
                field_order.push(key.clone());
                columns.push(ColumnDescriptor::source(resource.alias.clone(), key.clone(), None));
            }
        }

        let rows = items
            .iter()
            .filter_map(|item| item.as_object())
            .map(|obj| field_order.iter().map(|key| obj.get(key).map(Value::from_json).unwrap_or(Value::Null)).collect())
            .collect();

        Ok(FetchResult { columns, rows })
    }

    fn function_capability(&self) -> Box<dyn FunctionCapability> {
        Box::new(ForceAll)
    }
}
