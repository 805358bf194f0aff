//! Time integration schemes for the flat state vector.
//!
//! Every scheme maps a state `y` to the state one step `dt` later, using the
//! right-hand side `f(y) = [velocities; accelerations]` from a
//! `ForceAssembler`. The input slice is never modified, so a failed step
//! leaves the caller's state untouched.
//!
//! Explicit schemes share one Runge-Kutta routine driven by a Butcher
//! tableau. Implicit Euler and Crank-Nicolson are both instances of the
//! theta method `y' = y + dt·((1-θ) f(y) + θ f(y'))`, solved by Newton's
//! method with the assembler's analytic Jacobian.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::assembler::ForceAssembler;
use crate::config::NewtonConfig;
use crate::error::{SimError, SimResult};
use crate::linalg::{axpy, norm, solve_dense};

/// The available integration schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Classical four-stage Runge-Kutta.
    #[default]
    Rk4,
    /// Heun's method: Euler predictor, trapezoidal corrector.
    ImprovedEuler,
    /// Backward Euler.
    ImplicitEuler,
    /// Trapezoidal rule.
    CrankNicolson,
    /// Forward Euler.
    ExplicitEuler,
    /// Explicit midpoint rule.
    Midpoint,
}

impl Scheme {
    pub const ALL: [Self; 6] = [
        Self::Rk4,
        Self::ImprovedEuler,
        Self::ImplicitEuler,
        Self::CrankNicolson,
        Self::ExplicitEuler,
        Self::Midpoint,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Rk4 => "rk4",
            Self::ImprovedEuler => "improved_euler",
            Self::ImplicitEuler => "implicit_euler",
            Self::CrankNicolson => "crank_nicolson",
            Self::ExplicitEuler => "explicit_euler",
            Self::Midpoint => "midpoint",
        }
    }

    /// Global order of accuracy.
    pub const fn order(self) -> u32 {
        match self {
            Self::ImplicitEuler | Self::ExplicitEuler => 1,
            Self::ImprovedEuler | Self::CrankNicolson | Self::Midpoint => 2,
            Self::Rk4 => 4,
        }
    }

    /// Whether a step needs a Newton solve.
    pub const fn is_implicit(self) -> bool {
        matches!(self, Self::ImplicitEuler | Self::CrankNicolson)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coefficients `(a, b, c)` of an explicit Runge-Kutta method.
///
/// `a` must be strictly lower triangular. The right-hand side does not depend
/// on time, so `c` is kept only for completeness of the tableau.
#[derive(Debug, Clone, PartialEq)]
pub struct ButcherTableau {
    a: Vec<Vec<f64>>,
    b: Vec<f64>,
    c: Vec<f64>,
}

impl ButcherTableau {
    /// Creates a tableau after checking its shape.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if there are no stages, the dimensions of `a`, `b`
    ///   and `c` disagree, or `a` has entries on or above the diagonal.
    pub fn new(a: Vec<Vec<f64>>, b: Vec<f64>, c: Vec<f64>) -> SimResult<Self> {
        let stages = b.len();
        if stages == 0 {
            return Err(SimError::invalid_argument("a Butcher tableau needs at least one stage"));
        }
        if a.len() != stages || c.len() != stages || a.iter().any(|row| row.len() != stages) {
            return Err(SimError::invalid_argument(format!(
                "Butcher tableau dimensions disagree: {} stages in b",
                stages
            )));
        }
        let implicit = a
            .iter()
            .enumerate()
            .any(|(i, row)| row[i..].iter().any(|&v| v != 0.0));
        if implicit {
            return Err(SimError::invalid_argument(
                "Butcher tableau must be strictly lower triangular for an explicit method",
            ));
        }
        Ok(Self { a, b, c })
    }

    pub fn explicit_euler() -> Self {
        Self {
            a: vec![vec![0.0]],
            b: vec![1.0],
            c: vec![0.0],
        }
    }

    pub fn heun() -> Self {
        Self {
            a: vec![vec![0.0, 0.0], vec![1.0, 0.0]],
            b: vec![0.5, 0.5],
            c: vec![0.0, 1.0],
        }
    }

    pub fn midpoint() -> Self {
        Self {
            a: vec![vec![0.0, 0.0], vec![0.5, 0.0]],
            b: vec![0.0, 1.0],
            c: vec![0.0, 0.5],
        }
    }

    pub fn rk4() -> Self {
        Self {
            a: vec![
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.5, 0.0, 0.0, 0.0],
                vec![0.0, 0.5, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 0.0],
            ],
            b: vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            c: vec![0.0, 0.5, 0.5, 1.0],
        }
    }

    pub fn stages(&self) -> usize {
        self.b.len()
    }

    pub fn c(&self) -> &[f64] {
        &self.c
    }
}

/// One step of an explicit Runge-Kutta method.
///
/// Stage `j` evaluates `k_j = f(y + dt Σ_{i<j} a_ji k_i)`, and the result is
/// `y + dt Σ_j b_j k_j`. Zero coefficients are skipped.
pub fn explicit_rk_step(
    assembler: &ForceAssembler<'_>,
    tableau: &ButcherTableau,
    y: &[f64],
    dt: f64,
) -> SimResult<Vec<f64>> {
    let mut k: Vec<Vec<f64>> = Vec::with_capacity(tableau.stages());

    for row in &tableau.a {
        let mut stage = y.to_vec();
        for (a_ji, k_i) in row.iter().zip(&k) {
            if *a_ji != 0.0 {
                for (s, &v) in stage.iter_mut().zip(k_i) {
                    *s += dt * a_ji * v;
                }
            }
        }
        k.push(assembler.evaluate(&stage)?);
    }

    let mut next = y.to_vec();
    for (b_j, k_j) in tableau.b.iter().zip(&k) {
        if *b_j != 0.0 {
            for (n, &v) in next.iter_mut().zip(k_j) {
                *n += dt * b_j * v;
            }
        }
    }
    Ok(next)
}

/// One step of the theta method, `θ = 1` for implicit Euler and `θ = ½` for
/// Crank-Nicolson.
///
/// Solves `G(z) = z - y - dt (1-θ) f(y) - dt θ f(z) = 0` starting from `z = y`.
/// Each Newton update solves `(I - dt θ J(z)) δ = G(z)` and sets `z -= δ`.
/// The iteration stops when `|G(z)| < tolerance`, or right after an update
/// with `|δ| <= tolerance · (1 + |z|)`. The second test lets states far from
/// the origin converge even though their residual cannot drop below the
/// rounding error of `z`.
///
/// # Errors
///
/// - `InvalidArgument` if `theta` is outside `[0, 1]`, or from the first
///   force evaluation if `y` has the wrong length.
/// - `ConvergenceFailure` if the residual norm is still above the tolerance
///   after `max_iterations` updates, or if the Newton matrix is singular.
/// - `DegenerateGeometry` from any force evaluation.
pub fn theta_step(
    assembler: &ForceAssembler<'_>,
    y: &[f64],
    dt: f64,
    theta: f64,
    newton: &NewtonConfig,
) -> SimResult<Vec<f64>> {
    if !(0.0..=1.0).contains(&theta) {
        return Err(SimError::invalid_argument(format!(
            "theta must lie in [0, 1], got {theta}"
        )));
    }
    let base = if theta < 1.0 {
        axpy(y, dt * (1.0 - theta), &assembler.evaluate(y)?)
    } else {
        y.to_vec()
    };
    let h = dt * theta;

    let mut z = y.to_vec();
    let mut residual = f64::INFINITY;
    for iteration in 0..=newton.max_iterations {
        let fz = assembler.evaluate(&z)?;
        let g = z
            .iter()
            .zip(&base)
            .zip(&fz)
            .map(|((&zi, &bi), &fi)| zi - bi - h * fi)
            .collect::<Vec<_>>();
        residual = norm(&g);
        trace!(iteration, residual, "newton iterate");

        if residual < newton.tolerance {
            debug!(iterations = iteration, residual, "newton converged");
            return Ok(z);
        }
        if iteration == newton.max_iterations {
            break;
        }

        let mut matrix = assembler.jacobian(&z)? * -h;
        for i in 0..z.len() {
            matrix[(i, i)] += 1.0;
        }
        let delta = solve_dense(matrix, &g).ok_or(SimError::ConvergenceFailure {
            iterations: iteration,
            residual,
        })?;
        let step = norm(&delta);
        for (zi, di) in z.iter_mut().zip(delta) {
            *zi -= di;
        }
        if step <= newton.tolerance * (1.0 + norm(&z)) {
            debug!(iterations = iteration + 1, residual, step, "newton update below rounding");
            return Ok(z);
        }
    }

    Err(SimError::ConvergenceFailure {
        iterations: newton.max_iterations,
        residual,
    })
}

/// Advances `y` by one step of `scheme`, returning the new state.
pub fn step(
    scheme: Scheme,
    assembler: &ForceAssembler<'_>,
    y: &[f64],
    dt: f64,
    newton: &NewtonConfig,
) -> SimResult<Vec<f64>> {
    match scheme {
        Scheme::Rk4 => explicit_rk_step(assembler, &ButcherTableau::rk4(), y, dt),
        Scheme::ImprovedEuler => explicit_rk_step(assembler, &ButcherTableau::heun(), y, dt),
        Scheme::ExplicitEuler => explicit_rk_step(assembler, &ButcherTableau::explicit_euler(), y, dt),
        Scheme::Midpoint => explicit_rk_step(assembler, &ButcherTableau::midpoint(), y, dt),
        Scheme::ImplicitEuler => theta_step(assembler, y, dt, 1.0, newton),
        Scheme::CrankNicolson => theta_step(assembler, y, dt, 0.5, newton),
    }
}
