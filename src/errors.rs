use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(postern::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(postern::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(postern::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(postern::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("The {query} query did not complete in time")]
    #[diagnostic(
        code(postern::query_timeout),
        help("Raise database.query_timeout_secs or check the backing store's health")
    )]
    QueryTimeout { query: &'static str },

    #[error("Bootstrap failed: {0}")]
    #[diagnostic(
        code(postern::bootstrap),
        help("The engine refuses to start with zero rules; bring the backing store up or enable the fallback cache")
    )]
    Bootstrap(String),
}
