//! Error types for the persistence layer.

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A configuration value could not be used.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A batched upsert failed and was rolled back entirely.
    #[error("Batch upsert rolled back: {0}")]
    BatchFailed(String),

    /// A value conversion between Rust and SQL types failed.
    #[error("Conversion error: {0}")]
    Conversion(String),
}
