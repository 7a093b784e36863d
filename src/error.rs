use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetiroError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("pickup request {request_id} was already delivered")]
    AlreadyDelivered { request_id: i64 },

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}

impl RetiroError {
    /// Stable code used in IPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyDelivered { .. } => "already_delivered",
            Self::InvalidInput(_) => "bad_params",
            Self::Sql(_) => "db_query_failed",
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub type Result<T> = std::result::Result<T, RetiroError>;
