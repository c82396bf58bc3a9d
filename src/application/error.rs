use thiserror::Error;

use crate::{config::SettingsError, infra::error::InfraError};

/// Top-level error surfaced at the binary boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}
