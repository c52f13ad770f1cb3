use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy server is not running")]
    ServerUnavailable,

    #[error("Stats poll deadline expired")]
    StatsTimeout,

    #[error("Job process has exited")]
    JobGone,
}

pub type Result<T> = std::result::Result<T, PolicyError>;
