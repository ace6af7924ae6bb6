//! Engine startup errors and their process exit codes.

/// Fatal initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration file is unreadable or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The persistence layer could not be initialized.
    #[error("persistence init failed: {source}")]
    Persistence {
        /// The underlying database error.
        #[from]
        source: hive_db::DbError,
    },

    /// The protocol server could not bind its listener.
    #[error("protocol server bind failed: {source}")]
    Bind {
        /// The underlying transport error.
        #[from]
        source: hive_net::NetError,
    },
}

impl EngineError {
    /// The process exit code for this failure.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 1,
            Self::Persistence { .. } => 2,
            Self::Bind { .. } => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(EngineError::Config(String::new()).exit_code(), 1);
        let persistence = EngineError::from(hive_db::DbError::Config(String::new()));
        assert_eq!(persistence.exit_code(), 2);
        let bind = EngineError::from(hive_net::NetError::ConnectionLost);
        assert_eq!(bind.exit_code(), 3);
    }
}
