//! Bridge between simulated transforms and an external representation.
//!
//! A [`MotionState`] is how a renderer or game object learns where its body
//! is. The world reads it once when a body is added (and every sub-step for
//! kinematic bodies) and writes it once per `step_simulation` call.

use std::fmt;

use sim_types::Pose;

/// Two-way transform sync with an external object.
pub trait MotionState: fmt::Debug + Send {
    /// Current external transform of the body's center of mass.
    fn world_transform(&self) -> Pose;

    /// Receive the simulated (possibly interpolated) center-of-mass transform.
    fn set_world_transform(&mut self, pose: &Pose);
}

/// Motion state that stores the transform, with an optional offset between
/// the center of mass and the graphics origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultMotionState {
    /// Transform handed to the outside world.
    pub graphics_world_trans: Pose,
    /// Graphics origin relative to the center of mass.
    pub center_of_mass_offset: Pose,
    /// Transform the body started from.
    pub start_world_trans: Pose,
}

impl Default for DefaultMotionState {
    fn default() -> Self {
        Self::new(Pose::identity())
    }
}

impl DefaultMotionState {
    /// Motion state starting at `start`, no offset.
    #[must_use]
    pub fn new(start: Pose) -> Self {
        Self::with_offset(start, Pose::identity())
    }

    /// Motion state starting at `start` with a center-of-mass offset.
    #[must_use]
    pub fn with_offset(start: Pose, center_of_mass_offset: Pose) -> Self {
        Self {
            graphics_world_trans: start,
            center_of_mass_offset,
            start_world_trans: start,
        }
    }
}

impl MotionState for DefaultMotionState {
    fn world_transform(&self) -> Pose {
        self.center_of_mass_offset
            .inverse()
            .compose(&self.graphics_world_trans)
    }

    fn set_world_transform(&mut self, pose: &Pose) {
        self.graphics_world_trans = pose.compose(&self.center_of_mass_offset);
    }
}
