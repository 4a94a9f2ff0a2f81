//! Core types for the rigid-body pipeline.
//!
//! This crate provides the vocabulary shared by every layer of the dynamics
//! pipeline:
//!
//! - [`BodyHandle`], [`ConstraintHandle`], [`ProxyId`] - stable integer handles
//! - [`Pose`] - rigid transform of a body
//! - [`ActivationState`] - sleep state machine of a collision object
//! - [`CollisionFlags`], [`CollisionGroups`], [`CollisionFilter`] - per-object
//!   behavior and pair filtering
//! - [`WorldConfig`], [`SolverInfo`], [`BroadPhaseConfig`] - tunables
//! - [`SimError`] - the error type used across the workspace
//! - [`Callback`] - cloneable, thread-safe wrapper for user hooks
//!
//! # Design Philosophy
//!
//! These types are **pure data**. Physics lives in `sim-contact`,
//! `sim-constraint` and `sim-core`; this crate only fixes the language they
//! speak. Objects refer to each other through handles, never through
//! references, so ownership stays with the world's dense arenas.
//!
//! # Coordinate System
//!
//! Right-handed. The default gravity points along -Y.
//!
//! # Example
//!
//! ```
//! use sim_types::{Pose, WorldConfig};
//! use nalgebra::Point3;
//!
//! let config = WorldConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let pose = Pose::from_position(Point3::new(0.0, 2.0, 0.0));
//! assert_eq!(pose.position.y, 2.0);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-types/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
// Allow certain clippy lints that are overly pedantic for type definitions
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod activation;
mod callback;
mod config;
mod error;
mod handle;
mod pose;

pub use activation::{ActivationState, CollisionFilter, CollisionFlags, CollisionGroups};
pub use callback::Callback;
pub use config::{BroadPhaseAlgorithm, BroadPhaseConfig, SolverInfo, WorldConfig};
pub use error::SimError;
pub use handle::{BodyHandle, ConstraintHandle, ProxyId};
pub use pose::Pose;

// Re-export math types for convenience
pub use nalgebra::{Isometry3, Matrix3, Point3, UnitQuaternion, Vector3};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
