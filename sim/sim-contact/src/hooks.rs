//! World-scoped contact notifications.
//!
//! Every world owns one [`ContactHooks`] and passes it by reference into the
//! manifold operations that can fire events. Two worlds never share hooks
//! unless the caller clones them explicitly.

use std::sync::Arc;

use sim_types::{BodyHandle, Callback};

use crate::{ManifoldPoint, PersistentManifold};

/// Fired when a manifold receives its first point.
pub type CbContactStarted = Callback<dyn Fn(&PersistentManifold) + Send + Sync>;

/// Fired when a manifold loses its last point, either during refresh or when
/// its pair stops overlapping.
pub type CbContactEnded = Callback<dyn Fn(&PersistentManifold) + Send + Sync>;

/// Fired after a narrow-phase point has been cached, with the owning bodies.
///
/// The callback may adjust the point's material values or user data.
pub type CbContactAdded = Callback<dyn Fn(&mut ManifoldPoint, BodyHandle, BodyHandle) + Send + Sync>;

/// Fired with a point's user data when that point is dropped from a cache.
pub type CbContactDestroyed = Callback<dyn Fn(u64) + Send + Sync>;

/// Fired for every point that survives a refresh.
pub type CbContactProcessed = Callback<dyn Fn(&ManifoldPoint, BodyHandle, BodyHandle) + Send + Sync>;

/// Set of optional contact callbacks.
#[derive(Debug, Clone, Default)]
pub struct ContactHooks {
    started: Option<CbContactStarted>,
    ended: Option<CbContactEnded>,
    added: Option<CbContactAdded>,
    destroyed: Option<CbContactDestroyed>,
    processed: Option<CbContactProcessed>,
}

impl ContactHooks {
    /// Hooks with no callbacks installed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Setters ====================

    /// Install the contact-started callback.
    pub fn set_contact_started_callback<F>(&mut self, f: F)
    where
        F: Fn(&PersistentManifold) + Send + Sync + 'static,
    {
        self.started = Some(Callback(Arc::new(f)));
    }

    /// Install the contact-ended callback.
    pub fn set_contact_ended_callback<F>(&mut self, f: F)
    where
        F: Fn(&PersistentManifold) + Send + Sync + 'static,
    {
        self.ended = Some(Callback(Arc::new(f)));
    }

    /// Install the contact-added callback.
    pub fn set_contact_added_callback<F>(&mut self, f: F)
    where
        F: Fn(&mut ManifoldPoint, BodyHandle, BodyHandle) + Send + Sync + 'static,
    {
        self.added = Some(Callback(Arc::new(f)));
    }

    /// Install the contact-destroyed callback.
    pub fn set_contact_destroyed_callback<F>(&mut self, f: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.destroyed = Some(Callback(Arc::new(f)));
    }

    /// Install the contact-processed callback.
    pub fn set_contact_processed_callback<F>(&mut self, f: F)
    where
        F: Fn(&ManifoldPoint, BodyHandle, BodyHandle) + Send + Sync + 'static,
    {
        self.processed = Some(Callback(Arc::new(f)));
    }

    /// Remove every callback.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // ==================== Dispatch ====================

    pub(crate) fn contact_started(&self, manifold: &PersistentManifold) {
        if let Some(cb) = &self.started {
            (cb.0)(manifold);
        }
    }

    pub(crate) fn contact_ended(&self, manifold: &PersistentManifold) {
        if let Some(cb) = &self.ended {
            (cb.0)(manifold);
        }
    }

    /// Run the contact-added callback on a freshly cached point.
    pub fn contact_added(&self, point: &mut ManifoldPoint, body0: BodyHandle, body1: BodyHandle) {
        if let Some(cb) = &self.added {
            (cb.0)(point, body0, body1);
        }
    }

    pub(crate) fn contact_destroyed(&self, point: &ManifoldPoint) {
        if let (Some(cb), Some(data)) = (&self.destroyed, point.user_persistent_data) {
            (cb.0)(data);
        }
    }

    pub(crate) fn contact_processed(&self, point: &ManifoldPoint, body0: BodyHandle, body1: BodyHandle) {
        if let Some(cb) = &self.processed {
            (cb.0)(point, body0, body1);
        }
    }

    /// Whether a contact-added callback is installed.
    #[must_use]
    pub fn has_contact_added(&self) -> bool {
        self.added.is_some()
    }
}
