//! CLI error type with the documented exit-code mapping.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    /// Generic error or no valid input (exit 1).
    #[error("{0}")]
    Generic(#[from] anyhow::Error),

    /// Policy load/validation failure (exit 2).
    #[error("policy error: {0}")]
    Policy(#[from] vpo_policy::PolicyError),

    /// Job store failure (exit 3).
    #[error("store error: {0}")]
    Store(#[from] vpo_db::StoreError),

    /// Interrupted by SIGINT (exit 130).
    #[error("interrupted")]
    Interrupted,

    /// Terminated by SIGTERM (exit 143).
    #[error("terminated")]
    Terminated,
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Generic(_) => 1,
            CliError::Policy(_) => 2,
            CliError::Store(_) => 3,
            CliError::Interrupted => 130,
            CliError::Terminated => 143,
        }
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, CliError::Interrupted | CliError::Terminated)
    }
}
