#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid workflow template: {0}")]
    Template(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
