//! Entities of the mass-spring graph and the handles that refer to them.
//!
//! Entities never point at each other directly. A `Spring` or a
//! `DistanceConstraint` stores two `Endpoint`s, each of which is a handle
//! into the system's append-only list of masses or fixes. Positions are
//! looked up through these handles at every force evaluation.

use std::fmt;

use crate::error::{SimError, SimResult};
use crate::linalg::Point;

/// Stable handle to a `Mass` in a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MassHandle(pub(crate) usize);

/// Stable handle to a `Fix` in a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixHandle(pub(crate) usize);

/// Stable handle to a `Spring` in a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpringHandle(pub(crate) usize);

/// Stable handle to a `DistanceConstraint` in a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintHandle(pub(crate) usize);

impl MassHandle {
    /// Position of the mass in insertion order.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl FixHandle {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl SpringHandle {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl ConstraintHandle {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One end of a spring: either a free mass or a fixed anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Mass(MassHandle),
    Fix(FixHandle),
}

impl From<MassHandle> for Endpoint {
    fn from(handle: MassHandle) -> Self {
        Self::Mass(handle)
    }
}

impl From<FixHandle> for Endpoint {
    fn from(handle: FixHandle) -> Self {
        Self::Fix(handle)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mass(h) => write!(f, "mass #{}", h.0),
            Self::Fix(h) => write!(f, "fix #{}", h.0),
        }
    }
}

fn check_positive(name: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SimError::invalid_argument(format!(
            "{name} must be positive and finite, got {value}"
        )))
    }
}

fn check_non_negative(name: &str, value: f64) -> SimResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SimError::invalid_argument(format!(
            "{name} must be non-negative and finite, got {value}"
        )))
    }
}

/// A free point mass.
///
/// The scalar `mass` may be changed after the mass has been added to a
/// system. Forces and accelerations always read the current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Mass {
    mass: f64,
    position: Point,
    velocity: Point,
}

impl Mass {
    /// Creates a mass at rest at `position`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `mass` is not positive and finite.
    pub fn new(mass: f64, position: Point) -> SimResult<Self> {
        Ok(Self {
            mass: check_positive("mass", mass)?,
            position,
            velocity: Point::ZERO,
        })
    }

    /// Sets the initial velocity.
    #[must_use]
    pub fn with_velocity(mut self, velocity: Point) -> Self {
        self.velocity = velocity;
        self
    }

    pub const fn mass(&self) -> f64 {
        self.mass
    }

    /// Changes the scalar mass.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `mass` is not positive and finite. The old
    ///   value is kept in that case.
    pub fn set_mass(&mut self, mass: f64) -> SimResult<()> {
        self.mass = check_positive("mass", mass)?;
        Ok(())
    }

    pub const fn position(&self) -> Point {
        self.position
    }

    /// Overrides the integrated position of this mass.
    pub fn set_position(&mut self, position: Point) {
        self.position = position;
    }

    pub const fn velocity(&self) -> Point {
        self.velocity
    }

    /// Overrides the integrated velocity of this mass.
    pub fn set_velocity(&mut self, velocity: Point) {
        self.velocity = velocity;
    }

    /// Kinetic energy `½ m |v|²`.
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.length_squared()
    }
}

/// A fixed anchor with infinite effective mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    position: Point,
}

impl Fix {
    pub const fn new(position: Point) -> Self {
        Self { position }
    }

    pub const fn position(&self) -> Point {
        self.position
    }

    pub fn set_position(&mut self, position: Point) {
        self.position = position;
    }
}

/// A linear spring between two endpoints.
///
/// Arguments follow the order `(rest_length, stiffness, endpoints)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spring {
    rest_length: f64,
    stiffness: f64,
    endpoints: (Endpoint, Endpoint),
}

impl Spring {
    /// Creates a spring.
    ///
    /// Endpoint handles are checked against a system only when the spring is
    /// added to it.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `rest_length` is negative or `stiffness` is not
    ///   positive (or either is not finite).
    pub fn new<A, B>(rest_length: f64, stiffness: f64, endpoints: (A, B)) -> SimResult<Self>
    where
        A: Into<Endpoint>,
        B: Into<Endpoint>,
    {
        Ok(Self {
            rest_length: check_non_negative("rest length", rest_length)?,
            stiffness: check_positive("stiffness", stiffness)?,
            endpoints: (endpoints.0.into(), endpoints.1.into()),
        })
    }

    pub const fn rest_length(&self) -> f64 {
        self.rest_length
    }

    pub fn set_rest_length(&mut self, rest_length: f64) -> SimResult<()> {
        self.rest_length = check_non_negative("rest length", rest_length)?;
        Ok(())
    }

    pub const fn stiffness(&self) -> f64 {
        self.stiffness
    }

    pub fn set_stiffness(&mut self, stiffness: f64) -> SimResult<()> {
        self.stiffness = check_positive("stiffness", stiffness)?;
        Ok(())
    }

    pub const fn endpoints(&self) -> (Endpoint, Endpoint) {
        self.endpoints
    }

    /// Elastic energy `½ k (r - L0)²` stored at the given length.
    pub fn potential_energy(&self, length: f64) -> f64 {
        let stretch = length - self.rest_length;
        0.5 * self.stiffness * stretch * stretch
    }
}

/// Keeps two endpoints at a prescribed distance.
///
/// The constraint acts on accelerations: after the spring pass, each
/// constraint applies an equal and opposite correction along the line between
/// its endpoints so that the distance stops changing. The endpoints should
/// start `length` apart; `MassSpringSystem::constraint_violations` reports any
/// drift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceConstraint {
    length: f64,
    endpoints: (Endpoint, Endpoint),
}

impl DistanceConstraint {
    /// # Errors
    ///
    /// - `InvalidArgument` if `length` is not positive and finite.
    pub fn new<A, B>(length: f64, endpoints: (A, B)) -> SimResult<Self>
    where
        A: Into<Endpoint>,
        B: Into<Endpoint>,
    {
        Ok(Self {
            length: check_positive("constraint length", length)?,
            endpoints: (endpoints.0.into(), endpoints.1.into()),
        })
    }

    pub const fn length(&self) -> f64 {
        self.length
    }

    pub fn set_length(&mut self, length: f64) -> SimResult<()> {
        self.length = check_positive("constraint length", length)?;
        Ok(())
    }

    pub const fn endpoints(&self) -> (Endpoint, Endpoint) {
        self.endpoints
    }
}
