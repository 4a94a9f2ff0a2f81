//! Configuration types for the dynamics world.
//!
//! [`WorldConfig`] holds world-level settings (gravity, stepping, sleeping,
//! broadphase). [`SolverInfo`] holds the step-global tunables handed to the
//! constraint solver.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Main configuration for a dynamics world.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WorldConfig {
    /// Gravity acceleration applied to dynamic bodies.
    pub gravity: Vector3<f64>,
    /// Fixed sub-step length used when a caller does not pass one (seconds).
    pub fixed_timestep: f64,
    /// Sub-step cap used when a caller does not pass one.
    /// Zero selects variable-timestep mode.
    pub max_sub_steps: usize,
    /// Time a body must stay under its sleeping thresholds before it may
    /// sleep (seconds).
    pub deactivation_time: f64,
    /// Global switch that keeps every body awake.
    pub disable_deactivation: bool,
    /// Distance beyond which cached contact points are dropped.
    pub contact_breaking_threshold: f64,
    /// Sort newly found pairs by proxy id so identical input replays
    /// identically.
    pub deterministic_pairs: bool,
    /// Push transforms to every motion state, not just active bodies.
    pub synchronize_all_motion_states: bool,
    /// Broadphase settings.
    pub broad_phase: BroadPhaseConfig,
    /// Constraint solver settings.
    pub solver: SolverInfo,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vector3::new(0.0, -10.0, 0.0),
            fixed_timestep: 1.0 / 60.0,
            max_sub_steps: 1,
            deactivation_time: 2.0,
            disable_deactivation: false,
            contact_breaking_threshold: 0.02,
            deterministic_pairs: true,
            synchronize_all_motion_states: false,
            broad_phase: BroadPhaseConfig::default(),
            solver: SolverInfo::default(),
        }
    }
}

impl WorldConfig {
    /// Configuration for real-time applications: 60 Hz, up to 4 catch-up
    /// sub-steps.
    #[must_use]
    pub fn realtime() -> Self {
        Self {
            max_sub_steps: 4,
            ..Default::default()
        }
    }

    /// Configuration for accurate offline simulation (240 Hz).
    #[must_use]
    pub fn high_fidelity() -> Self {
        Self {
            fixed_timestep: 1.0 / 240.0,
            max_sub_steps: 16,
            solver: SolverInfo::high_accuracy(),
            ..Default::default()
        }
    }

    /// Configuration for fast, low-fidelity simulation (30 Hz).
    #[must_use]
    pub fn fast() -> Self {
        Self {
            fixed_timestep: 1.0 / 30.0,
            solver: SolverInfo::fast(),
            ..Default::default()
        }
    }

    /// Set the gravity.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }

    /// Disable gravity (zero-G environment).
    #[must_use]
    pub fn zero_gravity(mut self) -> Self {
        self.gravity = Vector3::zeros();
        self
    }

    /// Set the default fixed timestep and sub-step cap.
    #[must_use]
    pub fn with_stepping(mut self, fixed_timestep: f64, max_sub_steps: usize) -> Self {
        self.fixed_timestep = fixed_timestep;
        self.max_sub_steps = max_sub_steps;
        self
    }

    /// Set the solver configuration.
    #[must_use]
    pub fn with_solver(mut self, solver: SolverInfo) -> Self {
        self.solver = solver;
        self
    }

    /// Set the broadphase configuration.
    #[must_use]
    pub fn with_broad_phase(mut self, broad_phase: BroadPhaseConfig) -> Self {
        self.broad_phase = broad_phase;
        self
    }

    /// Set the deactivation time.
    #[must_use]
    pub fn with_deactivation_time(mut self, seconds: f64) -> Self {
        self.deactivation_time = seconds;
        self
    }

    /// Keep every body awake.
    #[must_use]
    pub fn without_sleeping(mut self) -> Self {
        self.disable_deactivation = true;
        self
    }

    /// Synchronize every motion state after each step.
    #[must_use]
    pub fn synchronize_all(mut self) -> Self {
        self.synchronize_all_motion_states = true;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.fixed_timestep.is_finite() || self.fixed_timestep <= 0.0 {
            return Err(crate::SimError::InvalidTimestep(self.fixed_timestep));
        }

        if self.fixed_timestep > 1.0 {
            return Err(crate::SimError::invalid_config(
                "fixed_timestep > 1 second is likely an error",
            ));
        }

        if !self.gravity.iter().all(|g| g.is_finite()) {
            return Err(crate::SimError::invalid_config("gravity must be finite"));
        }

        if self.deactivation_time < 0.0 {
            return Err(crate::SimError::invalid_config(
                "deactivation_time cannot be negative",
            ));
        }

        if self.contact_breaking_threshold <= 0.0 {
            return Err(crate::SimError::invalid_config(
                "contact_breaking_threshold must be positive",
            ));
        }

        self.broad_phase.validate()?;
        self.solver.validate()?;

        Ok(())
    }

    /// Get the fixed-step frequency in Hz.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        1.0 / self.fixed_timestep
    }
}

/// Step-global tunables for the constraint solver.
///
/// `timestep` is overwritten by the world with the current sub-step length
/// before every solve.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverInfo {
    /// Sub-step length (seconds).
    pub timestep: f64,
    /// Velocity iterations per solve.
    pub num_iterations: usize,
    /// Error reduction parameter for joints and shallow contacts.
    pub erp: f64,
    /// Error reduction parameter for split-impulse penetration recovery.
    pub erp2: f64,
    /// Constraint force mixing (softness).
    pub global_cfm: f64,
    /// Approach speed below which restitution is ignored.
    pub restitution_velocity_threshold: f64,
    /// Scale applied to cached impulses when warm starting.
    pub warmstarting_factor: f64,
    /// Whether warm starting is enabled.
    pub warmstarting: bool,
    /// Correct deep penetrations with separate push velocities.
    pub split_impulse: bool,
    /// Penetration depth (negative distance) past which split impulse kicks in.
    pub split_impulse_penetration_threshold: f64,
    /// Fraction of angular push velocity applied to orientation.
    pub split_impulse_turn_erp: f64,
    /// Penetration tolerated before positional correction starts.
    pub linear_slop: f64,
    /// Default linear sleeping threshold for new bodies (m/s).
    pub linear_sleeping_threshold: f64,
    /// Default angular sleeping threshold for new bodies (rad/s).
    pub angular_sleeping_threshold: f64,
}

impl Default for SolverInfo {
    fn default() -> Self {
        Self {
            timestep: 1.0 / 60.0,
            num_iterations: 10,
            erp: 0.2,
            erp2: 0.8,
            global_cfm: 0.0,
            restitution_velocity_threshold: 0.2,
            warmstarting_factor: 0.85,
            warmstarting: true,
            split_impulse: true,
            split_impulse_penetration_threshold: -0.04,
            split_impulse_turn_erp: 0.1,
            linear_slop: 0.0,
            linear_sleeping_threshold: 0.8,
            angular_sleeping_threshold: 1.0,
        }
    }
}

impl SolverInfo {
    /// Create a high-accuracy solver configuration.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            num_iterations: 30,
            warmstarting_factor: 0.95,
            ..Default::default()
        }
    }

    /// Create a fast solver configuration.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            num_iterations: 4,
            split_impulse: false,
            ..Default::default()
        }
    }

    /// Set the iteration count.
    #[must_use]
    pub fn with_iterations(mut self, num_iterations: usize) -> Self {
        self.num_iterations = num_iterations;
        self
    }

    /// Enable or disable split impulse.
    #[must_use]
    pub fn with_split_impulse(mut self, enabled: bool) -> Self {
        self.split_impulse = enabled;
        self
    }

    /// Enable or disable warm starting.
    #[must_use]
    pub fn with_warmstarting(mut self, enabled: bool) -> Self {
        self.warmstarting = enabled;
        self
    }

    /// Validate the solver configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "num_iterations must be at least 1",
            ));
        }

        if !(0.0..=1.0).contains(&self.erp) || !(0.0..=1.0).contains(&self.erp2) {
            return Err(crate::SimError::invalid_config(
                "erp and erp2 must be between 0 and 1",
            ));
        }

        if self.global_cfm < 0.0 {
            return Err(crate::SimError::invalid_config("cfm cannot be negative"));
        }

        if !(0.0..=1.0).contains(&self.warmstarting_factor) {
            return Err(crate::SimError::invalid_config(
                "warmstarting_factor must be between 0 and 1",
            ));
        }

        if self.split_impulse_penetration_threshold > 0.0 {
            return Err(crate::SimError::invalid_config(
                "split_impulse_penetration_threshold is a penetration depth and must be <= 0",
            ));
        }

        if self.linear_sleeping_threshold < 0.0 || self.angular_sleeping_threshold < 0.0 {
            return Err(crate::SimError::invalid_config(
                "sleeping thresholds cannot be negative",
            ));
        }

        Ok(())
    }
}

/// Broad-phase algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BroadPhaseAlgorithm {
    /// Brute force below `brute_force_threshold` proxies, sweep-and-prune above.
    #[default]
    Auto,
    /// O(n²) all-pairs test.
    BruteForce,
    /// Sort-and-sweep along the axis of largest spread.
    SweepAndPrune,
}

/// Configuration for broad-phase collision detection.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BroadPhaseConfig {
    /// Algorithm to use.
    pub algorithm: BroadPhaseAlgorithm,
    /// Extra margin added around every proxy AABB.
    pub margin: f64,
    /// Proxy count below which `Auto` uses brute force.
    pub brute_force_threshold: usize,
}

impl Default for BroadPhaseConfig {
    fn default() -> Self {
        Self {
            algorithm: BroadPhaseAlgorithm::Auto,
            margin: 0.0,
            brute_force_threshold: 32,
        }
    }
}

impl BroadPhaseConfig {
    /// Use a specific algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: BroadPhaseAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Validate the broadphase configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.margin.is_finite() || self.margin < 0.0 {
            return Err(crate::SimError::invalid_config(
                "broad phase margin must be finite and non-negative",
            ));
        }
        Ok(())
    }
}
