//! Force assembly: net forces, the ODE right-hand side and its Jacobian.
//!
//! The assembler borrows the entity lists of a system but never reads the
//! positions or velocities stored on the masses. Those come from the flat
//! state vector passed to each call, so integrators can evaluate forces at
//! intermediate stage states.
//!
//! # State layout
//!
//! For `n` masses the state is `y = [x_0, …, x_{n-1}, v_0, …, v_{n-1}]`, each
//! block holding 3 components, in mass insertion order.

use glam::DMat3;
use nalgebra::DMatrix;

use crate::entity::{DistanceConstraint, Endpoint, Fix, Mass, Spring};
use crate::error::{SimError, SimResult};
use crate::linalg::{add_block, block, outer, set_block, Point, DIM};

/// Endpoints closer than this are treated as coincident.
pub const MIN_SEPARATION: f64 = 1e-12;

/// Step of the central differences in `numeric_jacobian`.
pub const DIFFERENCE_STEP: f64 = 1e-6;

/// Value of a mass-indexed quantity at an endpoint, zero at fixes.
fn at(endpoint: Endpoint, value: impl Fn(usize) -> Point) -> Point {
    match endpoint {
        Endpoint::Mass(h) => value(h.index()),
        Endpoint::Fix(_) => Point::ZERO,
    }
}

/// Resolved geometry between the two endpoints of a spring or constraint.
#[derive(Debug, Clone, Copy)]
struct Separation {
    /// `p - q`, from the second endpoint to the first.
    diff: Point,
    /// `|p - q|`.
    length: f64,
}

/// Evaluates forces for a borrowed entity graph.
#[derive(Debug, Clone, Copy)]
pub struct ForceAssembler<'a> {
    masses: &'a [Mass],
    fixes: &'a [Fix],
    springs: &'a [Spring],
    constraints: &'a [DistanceConstraint],
    gravity: Point,
}

impl<'a> ForceAssembler<'a> {
    /// Creates an assembler without distance constraints.
    pub const fn new(
        masses: &'a [Mass],
        fixes: &'a [Fix],
        springs: &'a [Spring],
        gravity: Point,
    ) -> Self {
        Self {
            masses,
            fixes,
            springs,
            constraints: &[],
            gravity,
        }
    }

    /// Adds distance constraints, applied to the accelerations after the
    /// spring pass.
    pub fn with_constraints(self, constraints: &'a [DistanceConstraint]) -> Self {
        Self {
            constraints,
            ..self
        }
    }

    /// Length of the flat state vector, `6 × masses`.
    pub fn dim(&self) -> usize {
        2 * DIM * self.masses.len()
    }

    fn check_len(&self, what: &str, values: &[f64], expected: usize) -> SimResult<()> {
        if values.len() == expected {
            Ok(())
        } else {
            Err(SimError::invalid_argument(format!(
                "{what} has length {}, expected {expected} for {} masses",
                values.len(),
                self.masses.len()
            )))
        }
    }

    fn check_positions(&self, positions: &[f64]) -> SimResult<()> {
        self.check_len("position slice", positions, DIM * self.masses.len())
    }

    fn check_state(&self, y: &[f64]) -> SimResult<()> {
        self.check_len("state vector", y, self.dim())
    }

    fn position_of(&self, endpoint: Endpoint, positions: &[f64]) -> SimResult<Point> {
        match endpoint {
            Endpoint::Mass(h) if h.index() < self.masses.len() => Ok(block(positions, h.index())),
            Endpoint::Mass(h) => Err(SimError::InvalidHandle {
                kind: "mass",
                index: h.index(),
                len: self.masses.len(),
            }),
            Endpoint::Fix(h) => self
                .fixes
                .get(h.index())
                .map(Fix::position)
                .ok_or(SimError::InvalidHandle {
                    kind: "fix",
                    index: h.index(),
                    len: self.fixes.len(),
                }),
        }
    }

    fn inverse_mass(&self, endpoint: Endpoint) -> f64 {
        match endpoint {
            Endpoint::Mass(h) => 1.0 / self.masses[h.index()].mass(),
            Endpoint::Fix(_) => 0.0,
        }
    }

    fn separation(
        &self,
        kind: &'static str,
        index: usize,
        (a, b): (Endpoint, Endpoint),
        positions: &[f64],
    ) -> SimResult<Separation> {
        let diff = self.position_of(a, positions)? - self.position_of(b, positions)?;
        let length = diff.length();
        if length.is_nan() || length <= MIN_SEPARATION {
            return Err(SimError::DegenerateGeometry {
                kind,
                index,
                length,
            });
        }
        Ok(Separation { diff, length })
    }

    /// Net force on every mass for the given positions (`3 × masses` values).
    ///
    /// Gravity is added first, then spring contributions in spring insertion
    /// order. Distance constraints are not forces in this sense; they act in
    /// `accelerations`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `positions` has the wrong length.
    /// - `DegenerateGeometry` if any spring has coincident endpoints.
    pub fn forces(&self, positions: &[f64]) -> SimResult<Vec<Point>> {
        self.check_positions(positions)?;
        let mut forces = self
            .masses
            .iter()
            .map(|m| self.gravity * m.mass())
            .collect::<Vec<_>>();

        for (index, spring) in self.springs.iter().enumerate() {
            let Separation { diff, length } =
                self.separation("spring", index, spring.endpoints(), positions)?;
            let force = diff * (-spring.stiffness() * (length - spring.rest_length()) / length);

            let (a, b) = spring.endpoints();
            if let Endpoint::Mass(h) = a {
                forces[h.index()] += force;
            }
            if let Endpoint::Mass(h) = b {
                forces[h.index()] -= force;
            }
        }

        Ok(forces)
    }

    /// Acceleration of every mass: `F / m` with the current scalar masses,
    /// then one correction per distance constraint in insertion order.
    ///
    /// A constraint between `p` and `q` with `d = p - q` adds `μ d / m_p` to
    /// `p` and `-μ d / m_q` to `q`, with `μ` chosen so that
    /// `d·(a_p - a_q) + |v_p - v_q|² = 0`. That is the second derivative of
    /// `|d|²`, so an exactly integrated trajectory keeps `|d|` constant.
    /// Fixes take no correction. Each correction sees the accelerations left
    /// by the previous ones, so constraints sharing a mass are satisfied only
    /// approximately.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if either slice has the wrong length.
    /// - `DegenerateGeometry` if any spring or constraint has coincident
    ///   endpoints.
    pub fn accelerations(&self, positions: &[f64], velocities: &[f64]) -> SimResult<Vec<Point>> {
        self.check_positions(positions)?;
        self.check_len("velocity slice", velocities, DIM * self.masses.len())?;

        let mut acc = self
            .forces(positions)?
            .into_iter()
            .zip(self.masses)
            .map(|(f, m)| f / m.mass())
            .collect::<Vec<_>>();

        for (index, constraint) in self.constraints.iter().enumerate() {
            let (a, b) = constraint.endpoints();
            let Separation { diff, length } =
                self.separation("constraint", index, (a, b), positions)?;

            let (wa, wb) = (self.inverse_mass(a), self.inverse_mass(b));
            if wa + wb == 0.0 {
                continue;
            }

            let rel_acc = at(a, |i| acc[i]) - at(b, |i| acc[i]);
            let rel_vel = at(a, |i| block(velocities, i)) - at(b, |i| block(velocities, i));

            let mu = -(diff.dot(rel_acc) + rel_vel.length_squared()) / ((wa + wb) * length * length);
            if let Endpoint::Mass(h) = a {
                acc[h.index()] += diff * (mu * wa);
            }
            if let Endpoint::Mass(h) = b {
                acc[h.index()] -= diff * (mu * wb);
            }
        }

        Ok(acc)
    }

    /// Right-hand side `f(y) = [velocities; accelerations(positions, velocities)]`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `y` does not have length `dim()`.
    /// - `DegenerateGeometry` from the force pass.
    pub fn evaluate(&self, y: &[f64]) -> SimResult<Vec<f64>> {
        self.check_state(y)?;
        let half = DIM * self.masses.len();
        let (positions, velocities) = y.split_at(half);

        let mut out = vec![0.0; y.len()];
        out[..half].copy_from_slice(velocities);
        for (i, a) in self.accelerations(positions, velocities)?.into_iter().enumerate() {
            set_block(&mut out[half..], i, a);
        }
        Ok(out)
    }

    /// Stiffness block `∂F_p/∂p` of a single spring.
    ///
    /// With `u = d/r`: `K = -k [(1 - L0/r) I + (L0/r) u uᵀ]`. The other three
    /// blocks are `∂F_p/∂q = ∂F_q/∂p = -K` and `∂F_q/∂q = K`.
    fn stiffness_block(spring: &Spring, separation: Separation) -> DMat3 {
        let Separation { diff, length } = separation;
        let ratio = spring.rest_length() / length;
        let u = diff / length;
        (DMat3::IDENTITY * (1.0 - ratio) + outer(u, u) * ratio) * -spring.stiffness()
    }

    /// Jacobian `∂f/∂y` of the right-hand side, a dense `dim × dim` matrix.
    ///
    /// Analytic for springs and gravity. With distance constraints the
    /// correction depends on velocities as well as positions, and the whole
    /// matrix is taken from `numeric_jacobian` instead.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `y` does not have length `dim()`.
    /// - `DegenerateGeometry` if any spring or constraint has coincident
    ///   endpoints.
    pub fn jacobian(&self, y: &[f64]) -> SimResult<DMatrix<f64>> {
        if !self.constraints.is_empty() {
            return self.numeric_jacobian(y);
        }
        self.check_state(y)?;

        let dim = self.dim();
        let half = dim / 2;
        let positions = &y[..half];

        let mut jac = DMatrix::zeros(dim, dim);
        for i in 0..half {
            jac[(i, half + i)] = 1.0;
        }

        for (index, spring) in self.springs.iter().enumerate() {
            let separation = self.separation("spring", index, spring.endpoints(), positions)?;
            let k = Self::stiffness_block(spring, separation);

            let (a, b) = spring.endpoints();
            let pairs = [(a, a, 1.0), (a, b, -1.0), (b, a, -1.0), (b, b, 1.0)];
            for (row, col, sign) in pairs {
                if let (Endpoint::Mass(r), Endpoint::Mass(c)) = (row, col) {
                    let scale = sign / self.masses[r.index()].mass();
                    add_block(&mut jac, half + DIM * r.index(), DIM * c.index(), k * scale);
                }
            }
        }

        Ok(jac)
    }

    /// Jacobian by central differences of `evaluate`, one column per state
    /// component.
    ///
    /// # Errors
    ///
    /// Same as `evaluate`.
    pub fn numeric_jacobian(&self, y: &[f64]) -> SimResult<DMatrix<f64>> {
        self.check_state(y)?;
        let dim = y.len();
        let mut jac = DMatrix::zeros(dim, dim);

        let mut shifted = y.to_vec();
        for col in 0..dim {
            let center = y[col];
            let step = DIFFERENCE_STEP.max(center.abs() * f64::EPSILON * 16.0);

            shifted[col] = center + step;
            let upper = shifted[col];
            let f_plus = self.evaluate(&shifted)?;

            shifted[col] = center - step;
            let lower = shifted[col];
            let f_minus = self.evaluate(&shifted)?;

            shifted[col] = center;
            // Divide by the representable width, not 2 × step.
            let width = upper - lower;
            for (row, (p, m)) in f_plus.iter().zip(&f_minus).enumerate() {
                jac[(row, col)] = (p - m) / width;
            }
        }

        Ok(jac)
    }

    /// Potential energy at the given positions: spring energy plus `-m g·x`.
    ///
    /// Constraint forces do no work and add nothing. Coincident endpoints are
    /// not an error here.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `positions` has the wrong length.
    pub fn potential_energy(&self, positions: &[f64]) -> SimResult<f64> {
        self.check_positions(positions)?;
        let gravitational = self
            .masses
            .iter()
            .enumerate()
            .map(|(i, m)| -m.mass() * self.gravity.dot(block(positions, i)))
            .sum::<f64>();

        let mut elastic = 0.0;
        for spring in self.springs {
            let (a, b) = spring.endpoints();
            let length = self
                .position_of(a, positions)?
                .distance(self.position_of(b, positions)?);
            elastic += spring.potential_energy(length);
        }

        Ok(gravitational + elastic)
    }

    /// `|p - q| - length` for every distance constraint.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `positions` has the wrong length.
    pub fn constraint_violations(&self, positions: &[f64]) -> SimResult<Vec<f64>> {
        self.check_positions(positions)?;
        self.constraints
            .iter()
            .map(|c| {
                let (a, b) = c.endpoints();
                let distance = self
                    .position_of(a, positions)?
                    .distance(self.position_of(b, positions)?);
                Ok(distance - c.length())
            })
            .collect()
    }
}
