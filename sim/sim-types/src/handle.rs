//! Stable integer handles for world-owned objects.
//!
//! Bodies and constraints live in dense arenas owned by the world. Callers
//! refer to them through generational handles: a slot index plus the
//! generation the slot had when the object was inserted. Reusing a slot bumps
//! its generation, so a handle kept past removal never aliases a newer object.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Handle to a rigid body stored in a world.
///
/// # Example
///
/// ```
/// use sim_types::BodyHandle;
///
/// let handle = BodyHandle::new(3, 1);
/// assert_eq!(handle.index(), 3);
/// assert_eq!(handle.generation(), 1);
/// assert_eq!(handle.to_string(), "Body(3v1)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BodyHandle {
    index: u32,
    generation: u32,
}

impl BodyHandle {
    /// Create a handle from a slot index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the owning arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot at insertion time.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for BodyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Body({}v{})", self.index, self.generation)
    }
}

/// Handle to a typed constraint (joint) stored in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstraintHandle {
    index: u32,
    generation: u32,
}

impl ConstraintHandle {
    /// Create a handle from a slot index and generation.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the owning arena.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Generation of the slot at insertion time.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for ConstraintHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Constraint({}v{})", self.index, self.generation)
    }
}

/// Unique id of a broadphase proxy.
///
/// Ids are assigned monotonically and never reused within a broadphase, so
/// they give a total order that does not depend on memory layout. Pair
/// canonicalisation and deterministic tie-breaking both rely on this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProxyId(pub u64);

impl ProxyId {
    /// Create a proxy id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProxyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Proxy({})", self.0)
    }
}
