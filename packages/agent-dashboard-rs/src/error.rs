use agent_policy_rs::PolicyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("invalid dashboard config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("http server error: {0}")]
    Server(String),
}
