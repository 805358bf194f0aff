//! Tests for rejected inputs and failed steps

use massspring_core::integrator::{explicit_rk_step, theta_step};
use massspring_core::tests::test_helpers::{build_chain, build_oscillator};
use massspring_core::{
    ButcherTableau, Fix, ForceAssembler, Mass, MassSpringSystem, NewtonConfig, Point, Scheme,
    SimError, Spring,
};

#[test]
fn test_coincident_endpoints_raise_degenerate_geometry() {
    let mut mss = MassSpringSystem::new();
    let anchor = mss.add(Fix::new(Point::ZERO)).unwrap();
    let mass = mss.add(Mass::new(1.0, Point::ZERO).unwrap()).unwrap();
    mss.add(Spring::new(1.0, 10.0, (anchor, mass)).unwrap()).unwrap();

    let before = mss.get_state();
    let result = mss.simulate(0.01, 10);
    assert!(
        matches!(result, Err(SimError::DegenerateGeometry { kind: "spring", index: 0, .. })),
        "Expected DegenerateGeometry, got {result:?}"
    );

    // Nothing was committed
    assert_eq!(mss.get_state(), before);
    assert_eq!(mss.time(), 0.0);
}

#[test]
fn test_degenerate_geometry_from_position_override() {
    let mut mss = MassSpringSystem::new();
    let a = mss.add(Mass::new(1.0, Point::new(0.0, 0.0, 0.0)).unwrap()).unwrap();
    let b = mss.add(Mass::new(1.0, Point::new(1.0, 0.0, 0.0)).unwrap()).unwrap();
    mss.add(Spring::new(1.0, 10.0, (a, b)).unwrap()).unwrap();
    mss.add(Spring::new(1.0, 10.0, (b, a)).unwrap()).unwrap();

    mss.mass_mut(b).unwrap().set_position(Point::ZERO);

    assert!(matches!(mss.forces(), Err(SimError::DegenerateGeometry { kind: "spring", index: 0, .. })));
    for scheme in Scheme::ALL {
        let result = mss.simulate_with(scheme, 0.01, 1);
        assert!(
            matches!(result, Err(SimError::DegenerateGeometry { .. })),
            "{scheme}: expected DegenerateGeometry, got {result:?}"
        );
    }

    // No NaN or Inf leaked into the state
    assert!(mss.state_vector().iter().all(|v| v.is_finite()));
}

#[test]
fn test_degenerate_geometry_in_jacobian() {
    let mut mss = MassSpringSystem::new();
    let anchor = mss.add(Fix::new(Point::new(1.0, 1.0, 1.0))).unwrap();
    let mass = mss.add(Mass::new(1.0, Point::new(1.0, 1.0, 1.0)).unwrap()).unwrap();
    mss.add(Spring::new(0.0, 1.0, (mass, anchor)).unwrap()).unwrap();

    let assembler = ForceAssembler::new(mss.masses(), mss.fixes(), mss.springs(), mss.gravity());
    let result = assembler.jacobian(&mss.state_vector());
    assert!(matches!(result, Err(SimError::DegenerateGeometry { .. })));
}

#[test]
fn test_failure_mid_run_keeps_committed_steps() {
    // Explicit Euler moves the mass 0.5 toward the anchor per step, landing on it after step 2
    let mut mss = MassSpringSystem::new();
    let anchor = mss.add(Fix::new(Point::ZERO)).unwrap();
    let mass = mss
        .add(Mass::new(1.0, Point::new(1.0, 0.0, 0.0)).unwrap().with_velocity(Point::new(-4.0, 0.0, 0.0)))
        .unwrap();
    mss.add(Spring::new(1.0, 1.0, (anchor, mass)).unwrap()).unwrap();

    let result = mss.simulate_with(Scheme::ExplicitEuler, 0.125, 10);
    assert!(matches!(result, Err(SimError::DegenerateGeometry { kind: "spring", index: 0, .. })), "{result:?}");

    // Step 1 at rest length: no force. Step 2 at x = 0.5: spring pushes with 0.5.
    let m = mss.mass(mass).unwrap();
    assert_eq!(m.position(), Point::ZERO);
    assert_eq!(m.velocity(), Point::new(-3.9375, 0.0, 0.0));
    assert_eq!(mss.time(), 0.25);
}

#[test]
fn test_newton_iteration_cap_raises_convergence_failure() {
    let (mut mss, _) = build_oscillator(Scheme::ImplicitEuler).unwrap();
    mss.set_newton(NewtonConfig {
        tolerance: 1e-10,
        max_iterations: 0,
    })
    .unwrap();

    let before = mss.state_vector();
    let result = mss.simulate(0.01, 5);
    match result {
        Err(SimError::ConvergenceFailure { iterations, residual }) => {
            assert_eq!(iterations, 0);
            assert!(residual > 1e-10);
        }
        other => panic!("Expected ConvergenceFailure, got {other:?}"),
    }
    assert_eq!(mss.state_vector(), before);

    // The same system still steps with a usable iteration cap
    mss.set_newton(NewtonConfig::default()).unwrap();
    mss.simulate_with(Scheme::CrankNicolson, 0.01, 5).unwrap();
}

#[test]
fn test_spring_with_foreign_handle_is_rejected() {
    let mut big = MassSpringSystem::new();
    big.add(Mass::new(1.0, Point::ZERO).unwrap()).unwrap();
    let foreign_mass = big.add(Mass::new(1.0, Point::X).unwrap()).unwrap();
    big.add(Fix::new(Point::ZERO)).unwrap();
    let foreign_fix = big.add(Fix::new(Point::Y)).unwrap();

    let mut small = MassSpringSystem::new();
    let local = small.add(Mass::new(1.0, Point::ZERO).unwrap()).unwrap();

    let result = small.add(Spring::new(1.0, 1.0, (local, foreign_mass)).unwrap());
    assert!(matches!(result, Err(SimError::InvalidHandle { kind: "mass", index: 1, len: 1 })));

    let result = small.add(Spring::new(1.0, 1.0, (foreign_fix, local)).unwrap());
    assert!(matches!(result, Err(SimError::InvalidHandle { kind: "fix", index: 1, len: 0 })));

    // Rejected springs were not added
    assert!(small.springs().is_empty());
    assert!(small.mass(foreign_mass).is_err());
    assert!(small.mass_mut(foreign_mass).is_err());
}

#[test]
fn test_invalid_mass_values() {
    assert!(matches!(Mass::new(0.0, Point::ZERO), Err(SimError::InvalidArgument(_))));
    assert!(matches!(Mass::new(-1.0, Point::ZERO), Err(SimError::InvalidArgument(_))));
    assert!(matches!(Mass::new(f64::NAN, Point::ZERO), Err(SimError::InvalidArgument(_))));

    let mut m = Mass::new(2.0, Point::ZERO).unwrap();
    assert!(m.set_mass(-5.0).is_err());
    assert_eq!(m.mass(), 2.0, "Failed mutation should keep the old mass");
}

#[test]
fn test_invalid_spring_values() {
    let mut mss = MassSpringSystem::new();
    let a = mss.add(Fix::new(Point::ZERO)).unwrap();
    let b = mss.add(Mass::new(1.0, Point::X).unwrap()).unwrap();

    assert!(Spring::new(-1.0, 10.0, (a, b)).is_err());
    assert!(Spring::new(1.0, -10.0, (a, b)).is_err());
    assert!(Spring::new(1.0, 0.0, (a, b)).is_err());
    assert!(Spring::new(0.0, 10.0, (a, b)).is_ok(), "Zero rest length is allowed");

    let s = mss.add(Spring::new(1.0, 10.0, (a, b)).unwrap()).unwrap();
    assert!(mss.spring_mut(s).unwrap().set_stiffness(-3.0).is_err());
    assert!(mss.spring_mut(s).unwrap().set_rest_length(-0.5).is_err());
    assert_eq!(mss.spring(s).unwrap().stiffness(), 10.0);
}

#[test]
fn test_invalid_time_step() {
    let (mut mss, _) = build_oscillator(Scheme::Rk4).unwrap();
    for dt in [0.0, -0.1, f64::NAN, f64::INFINITY] {
        assert!(
            matches!(mss.simulate(dt, 1), Err(SimError::InvalidArgument(_))),
            "dt = {dt} should be rejected"
        );
    }
    // Zero steps is a no-op
    let before = mss.get_state();
    mss.simulate(0.1, 0).unwrap();
    assert_eq!(mss.get_state(), before);
}

#[test]
fn test_invalid_state_vector_length() {
    let (mut mss, _) = build_oscillator(Scheme::Rk4).unwrap();
    let result = mss.set_state_vector(&[1.0, 2.0, 3.0]);
    assert!(matches!(result, Err(SimError::InvalidArgument(_))));
}

#[test]
fn test_assembler_rejects_wrong_lengths() {
    let (mss, _) = build_oscillator(Scheme::Rk4).unwrap();
    let assembler = ForceAssembler::new(mss.masses(), mss.fixes(), mss.springs(), mss.gravity());
    assert_eq!(assembler.dim(), 6);

    let short = [1.0, 2.0];
    let is_invalid = |r: Result<(), SimError>| matches!(r, Err(SimError::InvalidArgument(_)));
    assert!(is_invalid(assembler.evaluate(&short).map(|_| ())));
    assert!(is_invalid(assembler.jacobian(&short).map(|_| ())));
    assert!(is_invalid(assembler.numeric_jacobian(&short).map(|_| ())));
    assert!(is_invalid(assembler.forces(&short).map(|_| ())));
    assert!(is_invalid(assembler.potential_energy(&short).map(|_| ())));
    assert!(is_invalid(assembler.constraint_violations(&short).map(|_| ())));
    assert!(is_invalid(assembler.accelerations(&[1.5, 0.0, 0.0], &short).map(|_| ())));

    // Too long is rejected as well
    let long = vec![0.5; 12];
    assert!(is_invalid(assembler.evaluate(&long).map(|_| ())));

    let err = assembler.evaluate(&short).unwrap_err();
    assert!(err.to_string().contains("expected 6"), "{err}");
}

#[test]
fn test_integrator_steps_reject_wrong_lengths() {
    let (mss, _) = build_oscillator(Scheme::Rk4).unwrap();
    let assembler = ForceAssembler::new(mss.masses(), mss.fixes(), mss.springs(), mss.gravity());
    let newton = NewtonConfig::default();
    let short = [1.0, 2.0, 3.0];

    let result = explicit_rk_step(&assembler, &ButcherTableau::rk4(), &short, 0.01);
    assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{result:?}");
    let result = theta_step(&assembler, &short, 0.01, 0.5, &newton);
    assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{result:?}");
    let result = theta_step(&assembler, &short, 0.01, 1.0, &newton);
    assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{result:?}");

    let y = mss.state_vector();
    for theta in [2.0, -0.5, f64::NAN] {
        let result = theta_step(&assembler, &y, 0.01, theta, &newton);
        assert!(matches!(result, Err(SimError::InvalidArgument(_))), "theta = {theta}");
    }
}

#[test]
fn test_assembler_over_truncated_masses_reports_handle() {
    let (mss, _, _) = build_chain(Scheme::Rk4).unwrap();
    // The second spring reaches mass #1, which the shortened slice does not hold
    let assembler =
        ForceAssembler::new(&mss.masses()[..1], mss.fixes(), mss.springs(), mss.gravity());
    let result = assembler.evaluate(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    assert!(
        matches!(result, Err(SimError::InvalidHandle { kind: "mass", index: 1, len: 1 })),
        "{result:?}"
    );
}

#[test]
fn test_spring_to_itself_is_rejected() {
    let mut mss = MassSpringSystem::new();
    let m = mss.add(Mass::new(1.0, Point::ZERO).unwrap()).unwrap();
    let f = mss.add(Fix::new(Point::X)).unwrap();

    let result = mss.add(Spring::new(1.0, 10.0, (m, m)).unwrap());
    assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{result:?}");
    let result = mss.add(Spring::new(1.0, 10.0, (f, f)).unwrap());
    assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{result:?}");
    assert!(mss.springs().is_empty());

    // A mass and a fix sharing an index are different endpoints
    mss.add(Spring::new(1.0, 10.0, (m, f)).unwrap()).unwrap();
    assert_eq!(mss.springs().len(), 1);
}

#[test]
fn test_non_finite_state_vector_is_rejected() {
    let (mut mss, _) = build_oscillator(Scheme::Rk4).unwrap();
    let before = mss.state_vector();

    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let mut y = before.clone();
        y[4] = bad;
        let result = mss.set_state_vector(&y);
        assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{bad}: {result:?}");
        assert_eq!(mss.state_vector(), before);
    }
}

#[test]
fn test_non_finite_inputs_stop_simulate() {
    let (mut mss, mass) = build_oscillator(Scheme::Rk4).unwrap();
    mss.mass_mut(mass).unwrap().set_position(Point::new(f64::NAN, 0.0, 0.0));

    let result = mss.simulate(0.01, 10);
    assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{result:?}");
    assert_eq!(mss.time(), 0.0);
    assert_eq!(mss.mass(mass).unwrap().velocity(), Point::ZERO);

    let (mut mss, mass) = build_oscillator(Scheme::ImplicitEuler).unwrap();
    mss.mass_mut(mass).unwrap().set_velocity(Point::new(0.0, f64::INFINITY, 0.0));
    assert!(matches!(mss.simulate(0.01, 1), Err(SimError::InvalidArgument(_))));

    let (mut mss, _) = build_oscillator(Scheme::Rk4).unwrap();
    mss.set_gravity(Point::new(0.0, 0.0, f64::NEG_INFINITY));
    assert!(matches!(mss.simulate(0.01, 1), Err(SimError::InvalidArgument(_))));

    let mut mss = MassSpringSystem::new();
    let anchor = mss.add(Fix::new(Point::new(f64::INFINITY, 0.0, 0.0))).unwrap();
    let m = mss.add(Mass::new(1.0, Point::X).unwrap()).unwrap();
    mss.add(Spring::new(1.0, 1.0, (anchor, m)).unwrap()).unwrap();
    let result = mss.simulate(0.01, 1);
    assert!(matches!(result, Err(SimError::InvalidArgument(_))), "{result:?}");
    assert_eq!(mss.mass(m).unwrap().position(), Point::X);
}

#[test]
fn test_invalid_newton_config() {
    let (mut mss, _) = build_oscillator(Scheme::Rk4).unwrap();
    let result = mss.set_newton(NewtonConfig {
        tolerance: 0.0,
        max_iterations: 10,
    });
    assert!(result.is_err());
    assert_eq!(mss.newton(), &NewtonConfig::default());
}

#[test]
fn test_butcher_tableau_validation() {
    // Upper-triangular entry makes the method implicit
    let implicit = ButcherTableau::new(vec![vec![0.5]], vec![1.0], vec![0.5]);
    assert!(matches!(implicit, Err(SimError::InvalidArgument(_))));

    let mismatched = ButcherTableau::new(vec![vec![0.0, 0.0]], vec![0.5, 0.5], vec![0.0, 1.0]);
    assert!(mismatched.is_err());

    let empty = ButcherTableau::new(vec![], vec![], vec![]);
    assert!(empty.is_err());
}

#[test]
fn test_error_messages_are_not_empty() {
    let err = Mass::new(-1.0, Point::ZERO).unwrap_err();
    assert!(err.to_string().contains("mass"));

    let err = SimError::ConvergenceFailure {
        iterations: 20,
        residual: 1.5e-3,
    };
    assert!(err.to_string().contains("20 iterations"));
}
