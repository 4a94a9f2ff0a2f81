//! Error types for simulation operations.

use thiserror::Error;

use crate::{BodyHandle, ConstraintHandle};

/// Errors that can occur during simulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Body handle is stale or was never issued by this world.
    #[error("invalid body handle: {0}")]
    InvalidBodyHandle(BodyHandle),

    /// Constraint handle is stale or was never issued by this world.
    #[error("invalid constraint handle: {0}")]
    InvalidConstraintHandle(ConstraintHandle),

    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be non-negative and finite)")]
    InvalidTimestep(f64),

    /// Manifold point index past the current point count.
    #[error("manifold point index {index} out of range (manifold holds {len} points)")]
    ManifoldIndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of cached points.
        len: usize,
    },

    /// Simulation diverged (`NaN` or `Inf` detected).
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMassProperties {
        /// Description of what's wrong.
        reason: String,
    },
}

impl SimError {
    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid mass properties error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMassProperties {
            reason: reason.into(),
        }
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. } | Self::InvalidTimestep(_))
    }
}
