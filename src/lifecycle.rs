//! Request lifecycle management (spec.md §4.7): `submit` assigns a
//! request id, records an `IN_PROGRESS` entry, and spawns the
//! parse -> plan -> execute -> spill pipeline in the background; `poll`
//! and `get_result` read back the tracked state; a timer sweeps expired
//! result sets.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connectors::ConnectorFactory;
use crate::engine;
use crate::error::{EngineError, EngineResult};
use crate::metadata::{MetadataStore, ResultSetRecord, ResultStatus};
use crate::registry::SourceRegistry;

/// Everything a submitted request needs to run: the SQL text and, for
/// `poll`/`get_result`, which model/endpoint (if any) it originated from.
pub struct RequestContext {
    pub username: String,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

pub struct RequestManager {
    metadata: Arc<MetadataStore>,
    registry: Arc<SourceRegistry>,
    connector_factory: Arc<ConnectorFactory>,
    result_tmp_dir: std::path::PathBuf,
    result_set_expiry: chrono::Duration,
    request_timeout: Duration,
}

impl RequestManager {
    pub fn new(
        config: &Config,
        metadata: Arc<MetadataStore>,
        registry: Arc<SourceRegistry>,
        connector_factory: Arc<ConnectorFactory>,
    ) -> EngineResult<Self> {
        std::fs::create_dir_all(&config.result_tmp_dir)?;
        Ok(Self {
            metadata,
            registry,
            connector_factory,
            result_tmp_dir: config.result_tmp_dir.clone(),
            result_set_expiry: chrono::Duration::minutes(config.result_set_expiry as i64),
            request_timeout: Duration::from_secs(300),
        })
    }

    /// Remove any spill files left behind by a prior run whose process
    /// exited without completing its expiry sweep.
    pub fn purge_stale_spill_files(&self) -> EngineResult<()> {
        if !self.result_tmp_dir.exists() {
            return Ok(());
        }
        let tracked: std::collections::HashSet<_> = self
            .metadata
            .all_result_sets()
            .into_iter()
            .filter_map(|r| r.spill_path)
            .collect();
        for entry in std::fs::read_dir(&self.result_tmp_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") && !tracked.contains(&path) {
                info!(path = %path.display(), "purging residual spill file from prior run");
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    /// Assign a request id, record it `IN_PROGRESS`, and spawn the
    /// pipeline in the background. Returns immediately with the id.
    pub fn submit_query(&self, sql: String, context: RequestContext) -> String {
        self.submit(sql, context.model, context.endpoint, context.username)
    }

    /// Resolve a named endpoint through its model to a SQL string, then
    /// submit exactly as `submit_query` does.
    pub fn submit_endpoint(&self, endpoint_name: &str, context: RequestContext) -> EngineResult<String> {
        let endpoint = self.metadata.get_endpoint(endpoint_name)?;
        let model = self.metadata.get_model(&endpoint.model_name)?;
        Ok(self.submit(
            model.sql,
            Some(model.name),
            Some(endpoint.name),
            context.username,
        ))
    }

    fn submit(&self, sql: String, model: Option<String>, endpoint: Option<String>, username: String) -> String {
        let id = Uuid::new_v4().to_string();
        let start_time = chrono::Utc::now();

        self.metadata.put_result_set(ResultSetRecord {
            id: id.clone(),
            status: ResultStatus::InProgress,
            start_time,
            end_time: None,
            model,
            endpoint,
            query: sql.clone(),
            username,
            error: None,
            expired: false,
            spill_path: None,
            plan: None,
        });

        let metadata = self.metadata.clone();
        let registry = self.registry.clone();
        let connector_factory = self.connector_factory.clone();
        let spill_path = self.result_tmp_dir.join(format!("{id}.json"));
        let timeout = self.request_timeout;
        let request_id = id.clone();

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                timeout,
                run_pipeline(&sql, &registry, &connector_factory, &spill_path),
            )
            .await;

            let mut record = match metadata.get_result_set(&request_id) {
                Ok(r) => r,
                Err(_) => return,
            };
            record.end_time = Some(chrono::Utc::now());

            match outcome {
                Ok(Ok(plan_json)) => {
                    record.status = ResultStatus::Completed;
                    record.spill_path = Some(spill_path);
                    record.plan = Some(plan_json);
                    info!(request_id = %request_id, "request completed");
                }
                Ok(Err(e)) => {
                    record.status = ResultStatus::Failed;
                    record.error = Some(e.to_string());
                    warn!(request_id = %request_id, error = %e, "request failed");
                }
                Err(_) => {
                    record.status = ResultStatus::Failed;
                    record.error = Some("request exceeded its execution deadline".to_string());
                    warn!(request_id = %request_id, "request timed out");
                }
            }
            metadata.put_result_set(record);
        });

        id
    }

    /// Request metadata only, never the rows (spec.md §4.7).
    pub fn poll(&self, id: &str) -> EngineResult<ResultSetRecord> {
        self.metadata.get_result_set(id)
    }

    /// Spill-file contents, iff the request completed and hasn't expired.
    pub async fn get_result(&self, id: &str) -> EngineResult<serde_json::Value> {
        let record = self.metadata.get_result_set(id)?;
        if record.status != ResultStatus::Completed || record.expired {
            return Err(EngineError::not_found(format!("result for request '{id}'")));
        }
        let path = record
            .spill_path
            .ok_or_else(|| EngineError::internal("completed request has no spill path"))?;
        let contents = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&contents)?)
    }

    pub fn get_query_plan(&self, id: &str) -> EngineResult<serde_json::Value> {
        let record = self.metadata.get_result_set(id)?;
        record.plan.ok_or_else(|| EngineError::not_found(format!("plan for request '{id}'")))
    }

    /// Mark requests whose `end_time` is older than the configured expiry
    /// as expired, removing their spill file and clearing `spill_path`.
    /// Failed requests have no spill to reclaim and are left alone.
    pub async fn sweep_expired(&self) {
        let now = chrono::Utc::now();
        for mut record in self.metadata.all_result_sets() {
            if record.status != ResultStatus::Completed || record.expired {
                continue;
            }
            let Some(end_time) = record.end_time else { continue };
            if now - end_time < self.result_set_expiry {
                continue;
            }
            if let Some(path) = record.spill_path.take() {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        error!(request_id = %record.id, error = %e, "failed to remove expired spill file");
                    }
                }
            }
            record.expired = true;
            record.error = Some("result set expired".to_string());
            self.metadata.put_result_set(record);
        }
    }

    /// Spawn the periodic expiry sweep; fires every `E` minutes as
    /// configured, matching the lifecycle timer in spec.md §4.7.
    pub fn spawn_expiry_sweep(self: &Arc<Self>) {
        let manager = self.clone();
        let period = Duration::from_secs((manager.result_set_expiry.num_seconds().max(1)) as u64);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                manager.sweep_expired().await;
            }
        });
    }
}

async fn run_pipeline(
    sql: &str,
    registry: &SourceRegistry,
    connector_factory: &ConnectorFactory,
    spill_path: &std::path::Path,
) -> EngineResult<serde_json::Value> {
    let segments = crate::parser::parse(sql)?;
    let plan = crate::planner::plan(&segments, registry)?;
    let (columns, rows) = engine::execute(&plan, connector_factory).await?;
    engine::spill_to_file(spill_path, &columns, &rows).await?;

    Ok(serde_json::json!({
        "segments": format!("{:?}", segments),
        "resources": plan
            .segments
            .iter()
            .map(|s| format!("{}.{} AS {}", s.planned_resource.resource.data_source, s.planned_resource.resource.src, s.planned_resource.resource.alias))
            .collect::<Vec<_>>(),
    }))
}
