use thiserror::Error;

use crate::gstin::GstinError;

/// Errors surfaced by the audit library.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timestamp formatting error: {0}")]
    Time(#[from] time::error::Format),

    #[error("invalid GSTIN: {0}")]
    Gstin(#[from] GstinError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("GST registry error: {0}")]
    Registry(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
}

pub type Result<T> = std::result::Result<T, AuditError>;
