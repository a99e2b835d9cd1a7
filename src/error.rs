use thiserror::Error;

/// Error kinds surfaced by the reputation engine.
///
/// Convergence shortfalls are deliberately not an error: the iterator
/// renormalizes and returns its last vector, and only logs a warning.
/// Unparseable rating rows fail the snapshot load instead, on the same
/// anyhow path as every other persistence failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("lobby {0} not found")]
    LobbyNotFound(i64),
    #[error("team {0} not found")]
    TeamNotFound(i64),
}
