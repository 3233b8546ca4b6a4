use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::http::ServeError;
use crate::planner::PlanError;

/// Everything that can stop the server from starting or keep it from serving
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Listener plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Serving failed: {0}")]
    Serve(#[from] ServeError),
}

impl BootstrapError {
    /// Validation errors happen before anything touches disk or network;
    /// the caller aborts cleanly instead of treating them as a crash.
    pub fn is_validation(&self) -> bool {
        matches!(self, BootstrapError::Config(_))
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_validation() {
            2
        } else {
            1
        }
    }
}
