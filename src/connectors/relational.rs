//! Relational connector, backed by Postgres through `tokio_postgres` /
//! `deadpool_postgres` (see DESIGN.md for why Postgres stands in for the
//! spec's generic ODBC target). Pool setup follows the teacher's
//! `PostgresTable::new` / `From<&DatabaseConfig> for PoolConfig`
//! (`lib.rs`, pre-transformation) almost verbatim.

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use tokio_postgres::types::Type;
use tokio_postgres::NoTls;

use crate::config::{DatabaseConfig, KerberosConfig};
use crate::connectors::{Connector, FetchRequest, FetchResult};
use crate::error::{EngineError, EngineResult};
use crate::functions::{FunctionCapability, RelationalCapability};
use crate::row::{ColumnDescriptor, ColumnIndex, Value};

pub struct RelationalConnector {
    pool: Pool,
    kerberos: KerberosConfig,
}

impl RelationalConnector {
    pub async fn connect(db: &DatabaseConfig, kerberos: KerberosConfig) -> EngineResult<Self> {
        if let Some(keytab) = &kerberos.client_keytab {
            run_kinit(keytab, kerberos.client_uid.as_deref()).await?;
        }

        let mut cfg = PoolConfig::new();
        cfg.host = Some(db.host.clone());
        cfg.port = Some(db.port);
        cfg.user = Some(db.user.clone());
        cfg.password = Some(db.password.clone());
        cfg.dbname = Some(db.database.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(db.max_connections));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(EngineError::from)?;
        let _conn = pool.get().await.map_err(EngineError::from)?;

        Ok(Self { pool, kerberos })
    }

    /// Template substitution for the `$driver`/`$hostname`/`$database`/
    /// `$spn`/`$uid` connection-string placeholders named in spec.md
    /// §4.3.1; exposed for `get_query_plan` diagnostics rather than used
    /// by `tokio_postgres` itself, which connects from [`DatabaseConfig`]
    /// fields directly.
    pub fn render_connection_template(template: &str, db: &DatabaseConfig, kerberos: &KerberosConfig) -> String {
        template
            .replace("$driver", &db.driver)
            .replace("$hostname", &db.host)
            .replace("$database", &db.database)
            .replace("$spn", &db.spn)
            .replace("$uid", kerberos.client_uid.as_deref().unwrap_or(""))
    }
}

async fn run_kinit(keytab: &str, principal: Option<&str>) -> EngineResult<()> {
    let mut cmd = tokio::process::Command::new("kinit");
    cmd.arg("-kt").arg(keytab);
    if let Some(principal) = principal {
        cmd.arg(principal);
    }
    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(EngineError::connect(format!(
            "kinit failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn pg_value(row: &tokio_postgres::Row, idx: usize) -> Value {
    let col_type = row.columns()[idx].type_();
    match *col_type {
        Type::BOOL => row.get::<_, Option<bool>>(idx).map(Value::Bool).unwrap_or(Value::Null),
        Type::INT2 => row.get::<_, Option<i16>>(idx).map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        Type::INT4 => row.get::<_, Option<i32>>(idx).map(|v| Value::Int(v as i64)).unwrap_or(Value::Null),
        Type::INT8 => row.get::<_, Option<i64>>(idx).map(Value::Int).unwrap_or(Value::Null),
        Type::FLOAT4 => row.get::<_, Option<f32>>(idx).map(|v| Value::Float(v as f64)).unwrap_or(Value::Null),
        Type::FLOAT8 => row.get::<_, Option<f64>>(idx).map(Value::Float).unwrap_or(Value::Null),
        _ => row.get::<_, Option<String>>(idx).map(Value::Str).unwrap_or(Value::Null),
    }
}

#[async_trait]
impl Connector for RelationalConnector {
    async fn fetch(&self, request: FetchRequest<'_>) -> EngineResult<FetchResult> {
        let alias = &request.resource.alias;
        let table = &request.resource.src;

        let mut projection = if request.has_star || request.wanted_fields.is_empty() {
            "*".to_string()
        } else {
            request.wanted_fields.join(", ")
        };
        for func in request.pushed_down {
            projection.push_str(&format!(", {} AS {}", func.rendered, func.ident));
        }

        let sql = format!("SELECT {projection} FROM {table} AS {alias}");

        let client = self.pool.get().await.map_err(EngineError::from)?;
        let pg_rows = client.query(&sql, &[]).await.map_err(EngineError::from)?;

        let mut columns = ColumnIndex::default();
        if let Some(first) = pg_rows.first() {
            for col in first.columns() {
                columns.push(ColumnDescriptor::source(alias.clone(), col.name().to_string(), None));
            }
        } else if !request.wanted_fields.is_empty() {
            for field in request.wanted_fields {
                columns.push(ColumnDescriptor::source(alias.clone(), field.clone(), None));
            }
        }

        let rows = pg_rows
            .iter()
            .map(|row| (0..row.len()).map(|i| pg_value(row, i)).collect())
            .collect();

        Ok(FetchResult { columns, rows })
    }

    fn function_capability(&self) -> Box<dyn FunctionCapability> {
        Box::new(RelationalCapability)
    }
}

impl std::fmt::Debug for RelationalConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalConnector").field("kerberos_enabled", &self.kerberos.client_keytab.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_connection_template_placeholders() {
        let db = DatabaseConfig {
            host: "dbhost".into(),
            port: 5432,
            user: "u".into(),
            password: "p".into(),
            database: "crm".into(),
            max_connections: 10,
            driver: "PostgreSQL".into(),
            spn: "postgres/dbhost@REALM".into(),
        };
        let kerberos = KerberosConfig { client_keytab: None, client_uid: Some("svc".into()) };
        let rendered = RelationalConnector::render_connection_template(
            "Driver=$driver;Server=$hostname;Database=$database;SPN=$spn;UID=$uid",
            &db,
            &kerberos,
        );
        assert_eq!(rendered, "Driver=PostgreSQL;Server=dbhost;Database=crm;SPN=postgres/dbhost@REALM;UID=svc");
    }
}
