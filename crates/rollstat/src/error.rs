use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Rollup periods must be strictly ascending and each interval an exact
    /// multiple of the previous one. Detected at construction time; there is
    /// no runtime recovery from a mis-dividing hierarchy.
    #[error("Invalid rollup periods: {0}")]
    InvalidPeriods(String),

    /// A metric with the same key is already present in the registry.
    #[error("Metric already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, Error>;
