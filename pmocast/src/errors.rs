use thiserror::Error;

#[derive(Error, Debug)]
pub enum CastError {
    // Pas de poll réussi du lecteur local depuis trop longtemps
    #[error("Local player unreachable for {0} seconds")]
    LocalUnavailable(u64),
    #[error("Local player error: {0}")]
    Player(String),
    #[error("Renderer error: {0}")]
    Renderer(String),
    #[error("Renderer {0} not found")]
    RendererNotFound(String),
    #[error("Discovery error: {0}")]
    Discovery(String),
    #[error("Media error: {0}")]
    Media(String),
    #[error("No completed sync tick for {0} seconds")]
    DeadlockDetected(u64),
    #[error("Task {0} exited: {1}")]
    TaskFailed(String, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CastError {
    pub fn player(message: impl Into<String>) -> Self {
        CastError::Player(message.into())
    }

    pub fn renderer(message: impl Into<String>) -> Self {
        CastError::Renderer(message.into())
    }

    /// Errors that must terminate the process rather than be retried on the
    /// next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CastError::LocalUnavailable(_)
                | CastError::DeadlockDetected(_)
                | CastError::TaskFailed(_, _)
        )
    }
}
