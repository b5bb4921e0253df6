use bs_server::{RegistryError, ServerError};

/// Errors that abort a spawn.
///
/// Provider failures never appear here: they degrade the spawn instead.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("server: {0}")]
    Server(#[from] ServerError),

    /// `stop_all` ran while the spawn was in progress; the new instance
    /// has already been stopped.
    #[error("spawn cancelled by shutdown")]
    Cancelled,
}
