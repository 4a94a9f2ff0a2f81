//! Constraint solving for rigid-body contact and joints.
//!
//! This crate turns persistent contact manifolds and typed constraints into
//! velocity changes. It knows nothing about shapes or broad phases: the world
//! hands it a flat slice of [`SolverBody`] records, the manifolds that touch
//! them, and the enabled joints, and gets updated velocities back.
//!
//! # Solvers
//!
//! - [`SequentialImpulseSolver`]: projected Gauss-Seidel over impulse rows,
//!   with warm starting, restitution, pyramid friction and split impulse
//!
//! Custom solvers implement [`ConstraintSolver`]. The world drives every
//! solver through the same three calls per sub-step: `prepare_solve`,
//! `solve_group`, `all_solved`.
//!
//! # Constraints
//!
//! - [`Point2PointConstraint`]: ball-socket joining a pivot on each body, or a
//!   body pivot to a fixed world point
//!
//! Other joints implement [`TypedConstraint`] by emitting [`JacobianRow`]s.
//!
//! # Islands
//!
//! [`SimulationIslands`] groups bodies connected through contacts or joints.
//! The world uses islands to decide which bodies may sleep together.
//!
//! # Example
//!
//! ```
//! use sim_constraint::{ConstraintSolver, SequentialImpulseSolver, SolverBody};
//! use sim_contact::{ContactHooks, ManifoldPoint, PersistentManifold};
//! use sim_types::{BodyHandle, Point3, Pose, SolverInfo, Vector3};
//!
//! // A unit-mass body falling at 1 m/s onto a fixed floor.
//! let mut falling = SolverBody::default();
//! falling.inv_mass = Vector3::repeat(1.0);
//! falling.linear_velocity = Vector3::new(0.0, -1.0, 0.0);
//! let floor = SolverBody::fixed(Pose::identity());
//! let mut bodies = vec![falling, floor];
//!
//! let hooks = ContactHooks::default();
//! let (a, b) = (BodyHandle::new(0, 0), BodyHandle::new(1, 0));
//! let mut manifold = PersistentManifold::new(a, b, 0.02, 0.02);
//! manifold.add_manifold_point(
//!     ManifoldPoint::new(Point3::origin(), Point3::origin(), Vector3::y(), 0.0),
//!     &hooks,
//! );
//!
//! let mut solver = SequentialImpulseSolver::new();
//! let info = SolverInfo::default();
//! solver.prepare_solve(bodies.len(), 1);
//! solver.solve_group(&mut bodies, &mut [&mut manifold], &mut [], &info);
//! solver.all_solved(&info);
//!
//! assert!(bodies[0].linear_velocity.y > -1e-6);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::similar_names)]

mod body;
mod islands;
mod solver;
mod typed;

pub use body::SolverBody;
pub use islands::{Island, SimulationIslands};
pub use solver::{ConstraintSolver, SequentialImpulseSolver, SolverStats};
pub use typed::{JacobianRow, Point2PointConstraint, TypedConstraint};

// Re-export types needed by solver callers
pub use sim_types::{Pose, SolverInfo, Vector3};
