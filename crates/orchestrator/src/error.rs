use std::fmt;

#[derive(Debug)]
pub enum OrchestratorError {
    Custom(String),
    Redis(redis::RedisError),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Ssh(russh::Error),
    NotFound(String),
    CommandFailed { status: u32, output: String },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Custom(msg) => write!(f, "Orchestrator error: {}", msg),
            OrchestratorError::Redis(e) => write!(f, "Redis error: {}", e),
            OrchestratorError::Io(e) => write!(f, "IO error: {}", e),
            OrchestratorError::Serialization(e) => write!(f, "Serialization error: {}", e),
            OrchestratorError::Ssh(e) => write!(f, "SSH error: {}", e),
            OrchestratorError::NotFound(what) => write!(f, "Not found: {}", what),
            OrchestratorError::CommandFailed { status, output } => {
                write!(f, "Command exited with status {}: {}", status, output.trim())
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<redis::RedisError> for OrchestratorError {
    fn from(err: redis::RedisError) -> Self {
        OrchestratorError::Redis(err)
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Io(err)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err)
    }
}

impl From<russh::Error> for OrchestratorError {
    fn from(err: russh::Error) -> Self {
        OrchestratorError::Ssh(err)
    }
}
