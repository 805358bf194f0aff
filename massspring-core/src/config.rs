//! Simulation configuration.
//!
//! Parameters that are fixed when a system is built: the integration scheme,
//! the initial gravity vector and the Newton solver settings used by the
//! implicit schemes. Configurations serialize to and from TOML.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::integrator::Scheme;

/// Settings for the Newton iteration of the implicit schemes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Residual norm below which an iterate is accepted. An update `δ` with
    /// `|δ| <= tolerance · (1 + |z|)` also ends the iteration.
    pub tolerance: f64,

    /// Maximum number of Newton updates per step.
    pub max_iterations: u32,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 20,
        }
    }
}

impl NewtonConfig {
    /// Checks that the tolerance is positive and finite.
    pub fn validate(&self) -> SimResult<()> {
        if self.tolerance.is_finite() && self.tolerance > 0.0 {
            Ok(())
        } else {
            Err(SimError::invalid_argument(format!(
                "Newton tolerance must be positive and finite, got {}",
                self.tolerance
            )))
        }
    }
}

/// Configuration of a `MassSpringSystem`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SimulationConfig {
    /// Integration scheme used by `simulate`.
    pub scheme: Scheme,

    /// Gravity vector [gx, gy, gz].
    pub gravity: [f64; 3],

    /// Newton settings for the implicit schemes.
    pub newton: NewtonConfig,
}

impl SimulationConfig {
    /// Parses a configuration from TOML text. Missing fields take their defaults.
    ///
    /// ```toml
    /// scheme = "crank_nicolson"
    /// gravity = [0.0, 0.0, -9.81]
    ///
    /// [newton]
    /// tolerance = 1e-12
    /// max_iterations = 30
    /// ```
    pub fn from_toml_str(text: &str) -> SimResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every numeric field.
    pub fn validate(&self) -> SimResult<()> {
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(SimError::invalid_argument(format!(
                "gravity must be finite, got {:?}",
                self.gravity
            )));
        }
        self.newton.validate()
    }
}
