//! Rigid-body dynamics world.
//!
//! This crate owns the simulation pipeline: bodies and their shapes, the
//! broad phase, the collision dispatcher with its narrow-phase algorithms,
//! and the fixed-step stepper that drives contact generation, island
//! building, the constraint solve and integration. Contact manifolds live in
//! [`sim_contact`]; the solver and island builder live in [`sim_constraint`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  World::step_simulation                      │
//! │  fixed-step accumulator, gravity, motion-state sync          │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │ per sub-step
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  predict motion → broad phase → narrow phase → islands       │
//! │        → constraint solve → integrate → activation           │
//! └───────┬──────────────────┬──────────────────┬───────────────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//! ┌───────────────┐  ┌───────────────┐  ┌──────────────────────┐
//! │  broad_phase  │  │  dispatcher   │  │    sim-constraint    │
//! │ SAP / brute   │  │ + narrow_phase│  │ islands, SI solver   │
//! │ pair cache    │  │ manifolds     │  │ joints               │
//! └───────────────┘  └───────────────┘  └──────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use sim_core::{CollisionShape, RigidBody, World};
//! use sim_types::{Pose, WorldConfig};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut world = World::new(WorldConfig::default()).unwrap();
//!
//! // Static ground whose top face is at y = 0.
//! world.add_body(RigidBody::fixed(
//!     Arc::new(CollisionShape::cuboid(Vector3::new(50.0, 50.0, 50.0))),
//!     Pose::from_position(Point3::new(0.0, -50.0, 0.0)),
//! ));
//!
//! // A box dropped from two metres.
//! let crate_box = world.add_body(RigidBody::dynamic(
//!     Arc::new(CollisionShape::cuboid(Vector3::new(0.1, 0.1, 0.1))),
//!     1.0,
//!     Pose::from_position(Point3::new(0.0, 2.0, 0.0)),
//! ));
//!
//! for _ in 0..120 {
//!     world.step_simulation(1.0 / 60.0, 10, 1.0 / 60.0).unwrap();
//! }
//!
//! let y = world.body(crate_box).unwrap().world_transform().position.y;
//! assert!((y - 0.1).abs() < 0.02);
//! ```
//!
//! # Contact events
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use sim_core::World;
//!
//! let started = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&started);
//!
//! let mut world = World::default();
//! world.hooks_mut().set_contact_started_callback(move |_manifold| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//! ```

#![doc(html_root_url = "https://docs.rs/sim-core/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

pub mod box_box;
pub mod broad_phase;
pub mod dispatcher;
pub mod integrators;
pub mod motion_state;
pub mod narrow_phase;
pub mod rigid_body;
pub mod shape;
mod stepper;
mod world;

pub use broad_phase::{
    Aabb, Axis, BroadPhase, BroadPhaseDetector, BroadphaseProxy, BruteForce, OverlappingPair,
    OverlappingPairCache, PairCallback, SweepAndPrune,
};
pub use dispatcher::{
    AlgorithmKind, CollisionDispatcher, DispatchEntry, DispatchTable, ManifoldHandle,
};
pub use motion_state::{DefaultMotionState, MotionState};
pub use narrow_phase::{ContactResult, ManifoldResult};
pub use rigid_body::{BodyKind, DynamicState, KinematicState, RigidBody};
pub use shape::{CollisionShape, ShapeType};
pub use stepper::{StepPhase, StepStats, TickContext};
pub use world::{TickCallback, World};

// Re-export key types from the lower crates for convenience
pub use sim_constraint::{
    ConstraintSolver, Point2PointConstraint, SequentialImpulseSolver, TypedConstraint,
};
pub use sim_contact::{ContactHooks, ManifoldPoint, Material, PersistentManifold};
pub use sim_types::{
    ActivationState, BodyHandle, BroadPhaseAlgorithm, BroadPhaseConfig, CollisionFilter,
    CollisionFlags, CollisionGroups, ConstraintHandle, Pose, Result, SimError, SolverInfo,
    WorldConfig,
};
