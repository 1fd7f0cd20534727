//! Bridge and launcher error types.

use thiserror::Error;

/// Failures establishing the per-session bridge endpoint.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The listener could not bind its allocated port. Propagates to the
    /// session manager, which releases the port and marks the session errored.
    #[error("failed to bind bridge port {port}: {source}")]
    Bind {
        /// The port that could not be bound.
        port: u16,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Failures starting the agent subprocess.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// `exec` failed — binary missing, not executable, bad working directory.
    #[error("failed to spawn agent CLI '{cli_path}': {source}")]
    Spawn {
        /// The CLI path that failed to launch.
        cli_path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The child was created but the runtime reported no PID for it.
    #[error("agent CLI spawned without a PID")]
    NoPid,
}
