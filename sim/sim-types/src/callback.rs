//! Shared callback wrapper for user hooks.
//!
//! Hooks are owned by the world that invokes them rather than living in
//! process-wide statics, so several worlds can run side by side with
//! different handlers:
//!
//! - `Arc<dyn Fn>` keeps the owning structs `Clone`
//! - `Fn` (not `FnMut`) with `Send + Sync` keeps worlds movable across threads
//! - `Option<Callback<...>>` at the call site costs one branch when unset

use std::fmt;
use std::sync::Arc;

/// Thread-safe callback wrapper that implements Debug.
///
/// Wraps `Arc<dyn Fn(...) + Send + Sync>` and provides a Debug impl
/// (since `dyn Fn` doesn't implement Debug).
pub struct Callback<F: ?Sized>(pub Arc<F>);

impl<F: ?Sized> Clone for Callback<F> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<F: ?Sized> fmt::Debug for Callback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(<fn>)")
    }
}

impl<F: ?Sized> std::ops::Deref for Callback<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.0
    }
}
