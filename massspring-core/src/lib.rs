//! A 3D mass-spring engine: masses, fixed anchors, springs and distance
//! constraints under gravity, advanced in time by explicit or implicit
//! integration schemes.

pub mod assembler;
pub mod config;
pub mod entity;
pub mod error;
pub mod integrator;
pub mod linalg;
pub mod system;

pub use assembler::ForceAssembler;
pub use config::{NewtonConfig, SimulationConfig};
pub use entity::{
    ConstraintHandle, DistanceConstraint, Endpoint, Fix, FixHandle, Mass, MassHandle, Spring,
    SpringHandle,
};
pub use error::{SimError, SimResult};
pub use integrator::{ButcherTableau, Scheme};
pub use linalg::Point;
pub use system::{Entity, MassSpringSystem, MassState, StateSnapshot};
