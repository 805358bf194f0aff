//! The simulation driver.
//!
//! `MassSpringSystem` owns the entity graph and the integrated state (stored
//! on the masses), and advances it with the configured integration scheme.

use std::fmt;

use tracing::{debug, warn};

use crate::assembler::ForceAssembler;
use crate::config::{NewtonConfig, SimulationConfig};
use crate::entity::{
    ConstraintHandle, DistanceConstraint, Endpoint, Fix, FixHandle, Mass, MassHandle, Spring,
    SpringHandle,
};
use crate::error::{SimError, SimResult};
use crate::integrator::{self, Scheme};
use crate::linalg::{block, set_block, Point, DIM};

/// Position, velocity and acceleration of one mass at the moment of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassState {
    pub position: Point,
    pub velocity: Point,
    /// `None` when forces cannot be evaluated at this state, e.g. for
    /// coincident spring endpoints.
    pub acceleration: Option<Point>,
}

/// Immutable snapshot of all masses, in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// Simulated time of the snapshot.
    pub time: f64,
    pub masses: Vec<MassState>,
}

impl StateSnapshot {
    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// One output row `[t, x_0, y_0, z_0, vx_0, vy_0, vz_0, x_1, …]`.
    /// Accelerations are not part of the row.
    pub fn to_row(&self) -> Vec<f64> {
        let mut row = Vec::with_capacity(1 + 2 * DIM * self.masses.len());
        row.push(self.time);
        for m in &self.masses {
            row.extend_from_slice(&m.position.to_array());
            row.extend_from_slice(&m.velocity.to_array());
        }
        row
    }
}

/// Anything that can be added to a `MassSpringSystem`.
pub trait Entity {
    /// Handle returned by `MassSpringSystem::add`.
    type Handle;

    /// Appends `self` to the system.
    fn add_to(self, system: &mut MassSpringSystem) -> SimResult<Self::Handle>;
}

impl Entity for Mass {
    type Handle = MassHandle;

    fn add_to(self, system: &mut MassSpringSystem) -> SimResult<MassHandle> {
        Ok(system.add_mass(self))
    }
}

impl Entity for Fix {
    type Handle = FixHandle;

    fn add_to(self, system: &mut MassSpringSystem) -> SimResult<FixHandle> {
        Ok(system.add_fix(self))
    }
}

impl Entity for Spring {
    type Handle = SpringHandle;

    fn add_to(self, system: &mut MassSpringSystem) -> SimResult<SpringHandle> {
        system.add_spring(self)
    }
}

impl Entity for DistanceConstraint {
    type Handle = ConstraintHandle;

    fn add_to(self, system: &mut MassSpringSystem) -> SimResult<ConstraintHandle> {
        system.add_constraint(self)
    }
}

/// A 3D system of masses, fixed anchors, springs and distance constraints.
#[derive(Debug, Clone, Default)]
pub struct MassSpringSystem {
    masses: Vec<Mass>,
    fixes: Vec<Fix>,
    springs: Vec<Spring>,
    constraints: Vec<DistanceConstraint>,
    gravity: Point,
    scheme: Scheme,
    newton: NewtonConfig,
    time: f64,
}

impl MassSpringSystem {
    /// Creates an empty system with zero gravity and the RK4 scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty system from a validated configuration.
    pub fn with_config(config: &SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            gravity: Point::from_array(config.gravity),
            scheme: config.scheme,
            newton: config.newton,
            ..Self::default()
        })
    }

    /// Adds a mass, fix, spring or distance constraint and returns its handle.
    ///
    /// # Errors
    ///
    /// - `InvalidHandle` if a spring or constraint references an entity
    ///   outside this system.
    /// - `InvalidArgument` if a spring or constraint joins an endpoint to
    ///   itself.
    pub fn add<E: Entity>(&mut self, entity: E) -> SimResult<E::Handle> {
        entity.add_to(self)
    }

    pub fn add_mass(&mut self, mass: Mass) -> MassHandle {
        self.masses.push(mass);
        MassHandle(self.masses.len() - 1)
    }

    pub fn add_fix(&mut self, fix: Fix) -> FixHandle {
        self.fixes.push(fix);
        FixHandle(self.fixes.len() - 1)
    }

    /// Adds a spring after checking that both endpoints exist and differ.
    pub fn add_spring(&mut self, spring: Spring) -> SimResult<SpringHandle> {
        self.check_endpoints("spring", spring.endpoints())?;
        self.springs.push(spring);
        Ok(SpringHandle(self.springs.len() - 1))
    }

    /// Adds a distance constraint after checking that both endpoints exist
    /// and differ.
    pub fn add_constraint(&mut self, constraint: DistanceConstraint) -> SimResult<ConstraintHandle> {
        self.check_endpoints("constraint", constraint.endpoints())?;
        self.constraints.push(constraint);
        Ok(ConstraintHandle(self.constraints.len() - 1))
    }

    fn check_endpoints(&self, kind: &str, (a, b): (Endpoint, Endpoint)) -> SimResult<()> {
        for endpoint in [a, b] {
            match endpoint {
                Endpoint::Mass(h) => self.mass(h).map(|_| ())?,
                Endpoint::Fix(h) => self.fix(h).map(|_| ())?,
            }
        }
        if a == b {
            return Err(SimError::invalid_argument(format!(
                "{kind} joins {a} to itself"
            )));
        }
        Ok(())
    }

    const fn invalid(kind: &'static str, index: usize, len: usize) -> SimError {
        SimError::InvalidHandle { kind, index, len }
    }

    pub fn masses(&self) -> &[Mass] {
        &self.masses
    }

    pub fn fixes(&self) -> &[Fix] {
        &self.fixes
    }

    pub fn springs(&self) -> &[Spring] {
        &self.springs
    }

    pub fn constraints(&self) -> &[DistanceConstraint] {
        &self.constraints
    }

    pub fn mass(&self, handle: MassHandle) -> SimResult<&Mass> {
        let len = self.masses.len();
        self.masses
            .get(handle.0)
            .ok_or(Self::invalid("mass", handle.0, len))
    }

    /// Mutable access to a mass. Changes apply from the next force evaluation.
    pub fn mass_mut(&mut self, handle: MassHandle) -> SimResult<&mut Mass> {
        let len = self.masses.len();
        self.masses
            .get_mut(handle.0)
            .ok_or(Self::invalid("mass", handle.0, len))
    }

    pub fn fix(&self, handle: FixHandle) -> SimResult<&Fix> {
        let len = self.fixes.len();
        self.fixes
            .get(handle.0)
            .ok_or(Self::invalid("fix", handle.0, len))
    }

    pub fn fix_mut(&mut self, handle: FixHandle) -> SimResult<&mut Fix> {
        let len = self.fixes.len();
        self.fixes
            .get_mut(handle.0)
            .ok_or(Self::invalid("fix", handle.0, len))
    }

    pub fn spring(&self, handle: SpringHandle) -> SimResult<&Spring> {
        let len = self.springs.len();
        self.springs
            .get(handle.0)
            .ok_or(Self::invalid("spring", handle.0, len))
    }

    /// Mutable access to a spring. Endpoints cannot be changed after insertion.
    pub fn spring_mut(&mut self, handle: SpringHandle) -> SimResult<&mut Spring> {
        let len = self.springs.len();
        self.springs
            .get_mut(handle.0)
            .ok_or(Self::invalid("spring", handle.0, len))
    }

    pub fn constraint(&self, handle: ConstraintHandle) -> SimResult<&DistanceConstraint> {
        let len = self.constraints.len();
        self.constraints
            .get(handle.0)
            .ok_or(Self::invalid("constraint", handle.0, len))
    }

    /// Mutable access to a constraint. Only the length can be changed.
    pub fn constraint_mut(&mut self, handle: ConstraintHandle) -> SimResult<&mut DistanceConstraint> {
        let len = self.constraints.len();
        self.constraints
            .get_mut(handle.0)
            .ok_or(Self::invalid("constraint", handle.0, len))
    }

    pub const fn gravity(&self) -> Point {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Point) {
        self.gravity = gravity;
    }

    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn set_scheme(&mut self, scheme: Scheme) {
        self.scheme = scheme;
    }

    pub const fn newton(&self) -> &NewtonConfig {
        &self.newton
    }

    pub fn set_newton(&mut self, newton: NewtonConfig) -> SimResult<()> {
        newton.validate()?;
        self.newton = newton;
        Ok(())
    }

    /// Simulated time, the sum of all committed step sizes.
    pub const fn time(&self) -> f64 {
        self.time
    }

    fn assembler(&self) -> ForceAssembler<'_> {
        ForceAssembler::new(&self.masses, &self.fixes, &self.springs, self.gravity)
            .with_constraints(&self.constraints)
    }

    /// The flat state `[x_0, …, x_{n-1}, v_0, …, v_{n-1}]`.
    pub fn state_vector(&self) -> Vec<f64> {
        let half = DIM * self.masses.len();
        let mut y = vec![0.0; 2 * half];
        let (positions, velocities) = y.split_at_mut(half);
        for (i, m) in self.masses.iter().enumerate() {
            set_block(positions, i, m.position());
            set_block(velocities, i, m.velocity());
        }
        y
    }

    /// Overwrites all positions and velocities from a flat state.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `y` does not have length `6 × masses` or holds
    ///   a NaN or infinite value.
    pub fn set_state_vector(&mut self, y: &[f64]) -> SimResult<()> {
        let expected = 2 * DIM * self.masses.len();
        if y.len() != expected {
            return Err(SimError::invalid_argument(format!(
                "state vector has length {}, expected {expected}",
                y.len()
            )));
        }
        if let Some(i) = y.iter().position(|v| !v.is_finite()) {
            return Err(SimError::invalid_argument(format!(
                "state vector entry {i} is not finite: {}",
                y[i]
            )));
        }
        self.store_state(y);
        Ok(())
    }

    /// Rejects NaN or infinite values set directly on entities or gravity.
    fn check_finite(&self) -> SimResult<()> {
        let non_finite = |what: String, v: Point| {
            Err(SimError::invalid_argument(format!("{what} is not finite: {v}")))
        };
        for (i, m) in self.masses.iter().enumerate() {
            if !m.position().is_finite() {
                return non_finite(format!("position of mass #{i}"), m.position());
            }
            if !m.velocity().is_finite() {
                return non_finite(format!("velocity of mass #{i}"), m.velocity());
            }
        }
        for (i, f) in self.fixes.iter().enumerate() {
            if !f.position().is_finite() {
                return non_finite(format!("position of fix #{i}"), f.position());
            }
        }
        if !self.gravity.is_finite() {
            return non_finite("gravity".to_string(), self.gravity);
        }
        Ok(())
    }

    fn store_state(&mut self, y: &[f64]) {
        let (positions, velocities) = y.split_at(DIM * self.masses.len());
        for (i, m) in self.masses.iter_mut().enumerate() {
            m.set_position(block(positions, i));
            m.set_velocity(block(velocities, i));
        }
    }

    /// Snapshot of every mass's position, velocity and acceleration.
    pub fn get_state(&self) -> StateSnapshot {
        let accelerations = self.accelerations().ok();
        StateSnapshot {
            time: self.time,
            masses: self
                .masses
                .iter()
                .enumerate()
                .map(|(i, m)| MassState {
                    position: m.position(),
                    velocity: m.velocity(),
                    acceleration: accelerations.as_ref().map(|acc| acc[i]),
                })
                .collect(),
        }
    }

    /// Net force on every mass at the current state.
    pub fn forces(&self) -> SimResult<Vec<Point>> {
        let y = self.state_vector();
        self.assembler().forces(&y[..DIM * self.masses.len()])
    }

    /// Acceleration of every mass at the current state, including the
    /// distance constraint corrections.
    pub fn accelerations(&self) -> SimResult<Vec<Point>> {
        let y = self.state_vector();
        let (positions, velocities) = y.split_at(DIM * self.masses.len());
        self.assembler().accelerations(positions, velocities)
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.masses.iter().map(Mass::kinetic_energy).sum()
    }

    /// Elastic energy of all springs plus gravitational energy `-m g·x`.
    pub fn potential_energy(&self) -> SimResult<f64> {
        let y = self.state_vector();
        self.assembler().potential_energy(&y[..DIM * self.masses.len()])
    }

    pub fn total_energy(&self) -> SimResult<f64> {
        Ok(self.kinetic_energy() + self.potential_energy()?)
    }

    /// `|p - q| - length` for every distance constraint, in insertion order.
    pub fn constraint_violations(&self) -> SimResult<Vec<f64>> {
        let y = self.state_vector();
        self.assembler().constraint_violations(&y[..DIM * self.masses.len()])
    }

    /// Advances the system by `steps` steps of size `dt` with the configured scheme.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `dt` is not positive and finite, or a position,
    ///   velocity or gravity component is NaN or infinite.
    /// - `DegenerateGeometry` or `ConvergenceFailure` from a step. Steps
    ///   before the failing one stay committed; the failing step commits
    ///   nothing.
    pub fn simulate(&mut self, dt: f64, steps: usize) -> SimResult<()> {
        self.simulate_with(self.scheme, dt, steps)
    }

    /// Like `simulate`, but with an explicit scheme for this call only.
    pub fn simulate_with(&mut self, scheme: Scheme, dt: f64, steps: usize) -> SimResult<()> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimError::invalid_argument(format!(
                "time step must be positive and finite, got {dt}"
            )));
        }
        self.check_finite()?;
        debug!(%scheme, dt, steps, masses = self.masses.len(), "simulate");

        let mut y = self.state_vector();
        for i in 0..steps {
            let next = integrator::step(scheme, &self.assembler(), &y, dt, &self.newton);
            match next {
                Ok(next) => {
                    y = next;
                    self.store_state(&y);
                    self.time += dt;
                }
                Err(e) => {
                    warn!(%scheme, step = i, time = self.time, error = %e, "step failed");
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for MassSpringSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fixes:")?;
        for fix in &self.fixes {
            writeln!(f, "  pos = {}", fix.position())?;
        }
        writeln!(f, "masses:")?;
        for m in &self.masses {
            writeln!(
                f,
                "  m = {}, pos = {}, vel = {}",
                m.mass(),
                m.position(),
                m.velocity()
            )?;
        }
        writeln!(f, "springs:")?;
        for s in &self.springs {
            let (a, b) = s.endpoints();
            writeln!(
                f,
                "  length = {}, stiffness = {}, {} -> {}",
                s.rest_length(),
                s.stiffness(),
                a,
                b
            )?;
        }
        if !self.constraints.is_empty() {
            writeln!(f, "constraints:")?;
            for c in &self.constraints {
                let (a, b) = c.endpoints();
                writeln!(f, "  length = {}, {} -> {}", c.length(), a, b)?;
            }
        }
        Ok(())
    }
}
