use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
