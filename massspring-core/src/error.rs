//! Error types for the mass-spring engine.
//!
//! Every fallible operation returns `SimResult<T>`.

use thiserror::Error;

/// Unified error type for building and stepping a mass-spring system.
#[derive(Debug, Error)]
pub enum SimError {
    /// The two endpoints of a spring or constraint coincide, so its direction
    /// is undefined.
    #[error("degenerate geometry: {kind} #{index} has coincident endpoints (length {length:.3e})")]
    DegenerateGeometry {
        kind: &'static str,
        index: usize,
        length: f64,
    },

    /// Newton iteration did not reach the residual tolerance.
    #[error("Newton iteration did not converge after {iterations} iterations (residual: {residual:.2e})")]
    ConvergenceFailure { iterations: u32, residual: f64 },

    /// A handle does not refer to an entity of this system.
    #[error("invalid handle: {kind} #{index} (system has {len})")]
    InvalidHandle {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    /// A numeric argument is out of its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration text could not be deserialized.
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl SimError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
