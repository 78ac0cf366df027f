use thiserror::Error;

use crate::app::{BuildError, LaunchError, RegistryError};
use crate::ports::ServiceError;

/// Any error the library can hand back, for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum PathwayError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}
