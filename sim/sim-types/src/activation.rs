//! Activation states and collision flags.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Activation (sleep) state of a collision object.
///
/// Bodies at rest move through `Active` → `WantsDeactivation` →
/// `IslandSleeping`. The last two states are skipped by integration and
/// solving. `DisableDeactivation` pins a body awake, `DisableSimulation`
/// removes it from integration and collision altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ActivationState {
    /// Simulated normally.
    #[default]
    Active,
    /// Below the sleeping thresholds for longer than the deactivation time.
    WantsDeactivation,
    /// Asleep together with the rest of its island.
    IslandSleeping,
    /// Never put to sleep.
    DisableDeactivation,
    /// Neither integrated nor collided.
    DisableSimulation,
}

impl ActivationState {
    /// Whether the body takes part in integration and solving.
    ///
    /// `WantsDeactivation` bodies are still active until their island sleeps.
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::IslandSleeping | Self::DisableSimulation)
    }

    /// Whether the body is asleep.
    #[must_use]
    pub fn is_sleeping(self) -> bool {
        matches!(self, Self::IslandSleeping)
    }

    /// Whether an `activate()` request may change this state.
    ///
    /// The two `Disable*` states are sticky and only change through a forced
    /// state change.
    #[must_use]
    pub fn is_overridable(self) -> bool {
        !matches!(self, Self::DisableDeactivation | Self::DisableSimulation)
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::WantsDeactivation => "wants-deactivation",
            Self::IslandSleeping => "island-sleeping",
            Self::DisableDeactivation => "disable-deactivation",
            Self::DisableSimulation => "disable-simulation",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// Per-object behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct CollisionFlags: u32 {
        /// Contacts are detected and reported but never resolved.
        const NO_CONTACT_RESPONSE = 0b0000_0001;
        /// Contact points on this object keep their friction anchor while
        /// the lateral impulse stays inside the friction cone.
        const FRICTION_ANCHOR = 0b0000_0010;
        /// The world's gravity is not copied onto this body.
        const DISABLE_WORLD_GRAVITY = 0b0000_0100;
    }
}

bitflags::bitflags! {
    /// Collision filter groups.
    ///
    /// Two proxies may pair only if each one's group intersects the other's
    /// mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct CollisionGroups: u32 {
        /// Default group for dynamic bodies.
        const DEFAULT = 1;
        /// Static bodies.
        const STATIC = 1 << 1;
        /// Kinematic bodies.
        const KINEMATIC = 1 << 2;
        /// Small bodies that should not collide with each other.
        const DEBRIS = 1 << 3;
        /// Trigger volumes.
        const SENSOR_TRIGGER = 1 << 4;
        /// Character controllers.
        const CHARACTER = 1 << 5;
        /// Every group.
        const ALL = u32::MAX;
    }
}

impl Default for CollisionGroups {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Group and mask pair attached to a broadphase proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionFilter {
    /// Groups this object belongs to.
    pub group: CollisionGroups,
    /// Groups this object collides with.
    pub mask: CollisionGroups,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self::dynamic()
    }
}

impl CollisionFilter {
    /// Filter with an explicit group and mask.
    #[must_use]
    pub const fn new(group: CollisionGroups, mask: CollisionGroups) -> Self {
        Self { group, mask }
    }

    /// Default filter for dynamic bodies: collides with everything.
    #[must_use]
    pub const fn dynamic() -> Self {
        Self::new(CollisionGroups::DEFAULT, CollisionGroups::ALL)
    }

    /// Default filter for static and kinematic bodies: ignores other
    /// static/kinematic objects.
    #[must_use]
    pub fn fixed(group: CollisionGroups) -> Self {
        Self::new(
            group,
            CollisionGroups::ALL.difference(CollisionGroups::STATIC | CollisionGroups::KINEMATIC),
        )
    }

    /// Whether two filters allow a pair.
    #[must_use]
    pub fn allows(&self, other: &Self) -> bool {
        self.group.intersects(other.mask) && other.group.intersects(self.mask)
    }
}
