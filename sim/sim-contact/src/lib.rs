//! Persistent contact caching for rigid-body simulation.
//!
//! Narrow phase reports contacts one step at a time. This crate keeps them
//! alive across steps so the solver can warm start from last step's impulses
//! and resting stacks stay stable:
//!
//! - [`ManifoldPoint`] - one contact, stored in both bodies' local frames
//! - [`PersistentManifold`] - up to four points for one body pair, with
//!   refresh, replacement and area-maximising eviction
//! - [`ContactHooks`] - world-scoped started/ended/added/destroyed callbacks
//! - [`Material`] and the pair combination rules
//!
//! # Example
//!
//! ```
//! use sim_contact::{ContactHooks, ManifoldPoint, PersistentManifold};
//! use sim_types::{BodyHandle, Pose};
//! use nalgebra::{Point3, Vector3};
//!
//! let hooks = ContactHooks::new();
//! let mut manifold =
//!     PersistentManifold::new(BodyHandle::new(0, 0), BodyHandle::new(1, 0), 0.02, f64::MAX);
//!
//! // Box corner resting 1 mm inside the ground.
//! let on_a = Point3::new(0.1, -0.001, 0.1);
//! let on_b = Point3::new(0.1, 0.0, 0.1);
//! let point = ManifoldPoint::new(on_a, on_b, Vector3::y(), -0.001).with_world_positions(on_a, on_b);
//!
//! match manifold.cache_entry(&point) {
//!     Some(index) => manifold.replace_contact_point(point, index, &hooks).unwrap(),
//!     None => {
//!         manifold.add_manifold_point(point, &hooks);
//!     }
//! }
//! assert_eq!(manifold.num_contacts(), 1);
//!
//! // Next step: nothing moved, the point survives and ages.
//! manifold.refresh_contact_points(&Pose::identity(), &Pose::identity(), &hooks);
//! assert_eq!(manifold.points()[0].life_time, 1);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-contact/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn, clippy::missing_errors_doc)]

mod hooks;
mod manifold;
mod material;
mod point;

pub use hooks::{
    CbContactAdded, CbContactDestroyed, CbContactEnded, CbContactProcessed, CbContactStarted,
    ContactHooks,
};
pub use manifold::{MANIFOLD_CACHE_SIZE, PersistentManifold};
pub use material::{
    FrictionCone, MAX_FRICTION, Material, combine_friction, combine_restitution, plane_space,
};
pub use point::{ContactPointFlags, ManifoldPoint};
