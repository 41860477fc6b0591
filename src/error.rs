use thiserror::Error;

/// Engine error kinds, matching the pipeline stages in the query engine.
///
/// Each pipeline stage short-circuits on the first error; the driver
/// attaches the stage name via [`EngineError::with_stage`] before the
/// request lifecycle marks the request `FAILED`.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("parse error at position {position}: {message} (remaining: {remaining:?})")]
    Parse {
        message: String,
        remaining: String,
        position: usize,
    },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("connect error: {message}")]
    Connect { message: String },

    #[error("fetch error: {message}")]
    Fetch { message: String },

    #[error("coercion error: {message}")]
    Coercion { message: String },

    #[error("function error: {message}")]
    Function { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("access denied: {message}")]
    AccessDenied { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("connection pool config error: {0}")]
    PoolConfig(#[from] deadpool_postgres::CreatePoolError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// A lower error tagged with the name of the pipeline stage that
    /// surfaced it (`"fetch"`, `"join"`, `"group_by"`, ...).
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<EngineError>,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn parse(message: impl Into<String>, remaining: impl Into<String>, position: usize) -> Self {
        Self::Parse {
            message: message.into(),
            remaining: remaining.into(),
            position,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect { message: message.into() }
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch { message: message.into() }
    }

    pub fn coercion(message: impl Into<String>) -> Self {
        Self::Coercion { message: message.into() }
    }

    pub fn function(message: impl Into<String>) -> Self {
        Self::Function { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Tag this error with the pipeline stage that produced it. Idempotent:
    /// an error that is already stage-tagged passes through unchanged so
    /// the innermost (first) stage name wins.
    pub fn with_stage(self, stage: &'static str) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage { stage, source: Box::new(other) },
        }
    }

    /// Whether a caller-level retry might succeed. Only connection-class
    /// failures are retryable; parse/validation/coercion errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Connect { .. } | EngineError::Pool(_) => true,
            EngineError::Database(e) => e
                .code()
                .map(|code| {
                    matches!(code.code(), "40001" | "40P01" | "53300" | "08006" | "08001")
                })
                .unwrap_or(false),
            EngineError::Stage { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_build_expected_variants() {
        assert!(matches!(EngineError::validation("x"), EngineError::Validation { .. }));
        assert!(matches!(EngineError::not_found("x"), EngineError::NotFound { .. }));
    }

    #[test]
    fn stage_tag_applies_once() {
        let e = EngineError::fetch("boom").with_stage("fetch").with_stage("join");
        match e {
            EngineError::Stage { stage, .. } => assert_eq!(stage, "fetch"),
            _ => panic!("expected Stage variant"),
        }
    }

    #[test]
    fn connect_errors_are_retryable_but_validation_is_not() {
        assert!(EngineError::connect("x").is_retryable());
        assert!(!EngineError::validation("x").is_retryable());
    }
}
