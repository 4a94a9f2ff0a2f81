//! Rigid bodies.
//!
//! A [`RigidBody`] carries everything the pipeline needs about one object:
//! its center-of-mass transform, shared collision shape, filter and material,
//! activation state, and a [`BodyKind`] holding only the state that kind of
//! body actually has.
//!
//! | Kind | Moves | Integrated | Pushed by contacts |
//! |------|-------|------------|--------------------|
//! | `Static` | never | no | no |
//! | `Kinematic` | by the user or its motion state | no | no |
//! | `Dynamic` | by forces and contacts | yes | yes |
//!
//! Bodies are owned by the world and referred to by
//! [`BodyHandle`](sim_types::BodyHandle).

use std::sync::Arc;

use nalgebra::{Matrix3, Point3, Vector3};
use sim_constraint::SolverBody;
use sim_contact::Material;
use sim_types::{
    ActivationState, CollisionFilter, CollisionFlags, CollisionGroups, Pose, ProxyId, SimError,
};

use crate::integrators::{
    calculate_velocity, clamp_angular_step, damping_factor, integrate_transform,
};
use crate::motion_state::MotionState;
use crate::shape::CollisionShape;

/// Squared linear speed under which additional damping kicks in.
pub const ADDITIONAL_LINEAR_DAMPING_THRESHOLD_SQR: f64 = 0.01;
/// Squared angular speed under which additional damping kicks in.
pub const ADDITIONAL_ANGULAR_DAMPING_THRESHOLD_SQR: f64 = 0.01;
/// Velocity scale applied by additional damping.
pub const ADDITIONAL_DAMPING_FACTOR: f64 = 0.005;

/// State of a body moved by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicState {
    /// Velocity derived from the last pose change.
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity derived from the last pose change.
    pub angular_velocity: Vector3<f64>,
    /// Pose at the previous sub-step.
    pub previous_pose: Pose,
}

/// State of a body moved by the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicState {
    /// Linear velocity.
    pub linear_velocity: Vector3<f64>,
    /// Angular velocity in world space.
    pub angular_velocity: Vector3<f64>,
    /// Mass.
    pub mass: f64,
    /// `1 / mass`.
    pub inv_mass: f64,
    /// Diagonal of the local inertia tensor.
    pub local_inertia: Vector3<f64>,
    /// Per-axis inverse of `local_inertia`, 0 on locked axes.
    pub inv_inertia_local: Vector3<f64>,
    /// `R · diag(inv_inertia_local) · Rᵀ`, refreshed every step.
    pub inv_inertia_world: Matrix3<f64>,
    /// Force accumulated since the last clear.
    pub total_force: Vector3<f64>,
    /// Torque accumulated since the last clear.
    pub total_torque: Vector3<f64>,
    /// Per-axis linear freeze mask.
    pub linear_factor: Vector3<f64>,
    /// Per-axis angular freeze mask.
    pub angular_factor: Vector3<f64>,
    /// Linear damping in `[0, 1]`.
    pub linear_damping: f64,
    /// Angular damping in `[0, 1]`.
    pub angular_damping: f64,
    /// Extra damping for nearly resting bodies.
    pub additional_damping: bool,
    /// Gravity acceleration acting on this body.
    pub gravity: Vector3<f64>,
    /// Pose predicted for the end of the current sub-step.
    pub predicted_pose: Pose,
}

impl DynamicState {
    fn new(mass: f64, local_inertia: Vector3<f64>, pose: &Pose) -> Self {
        let mut state = Self {
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            mass: 0.0,
            inv_mass: 0.0,
            local_inertia: Vector3::zeros(),
            inv_inertia_local: Vector3::zeros(),
            inv_inertia_world: Matrix3::zeros(),
            total_force: Vector3::zeros(),
            total_torque: Vector3::zeros(),
            linear_factor: Vector3::repeat(1.0),
            angular_factor: Vector3::repeat(1.0),
            linear_damping: 0.0,
            angular_damping: 0.0,
            additional_damping: false,
            gravity: Vector3::zeros(),
            predicted_pose: *pose,
        };
        state.set_mass_props(mass, local_inertia);
        state.update_inertia_tensor(pose);
        state
    }

    fn set_mass_props(&mut self, mass: f64, local_inertia: Vector3<f64>) {
        let inv = |x: f64| if x != 0.0 { 1.0 / x } else { 0.0 };
        self.mass = mass;
        self.inv_mass = inv(mass);
        self.local_inertia = local_inertia;
        self.inv_inertia_local = local_inertia.map(inv);
    }

    fn update_inertia_tensor(&mut self, pose: &Pose) {
        let r = pose.basis();
        self.inv_inertia_world = r * Matrix3::from_diagonal(&self.inv_inertia_local) * r.transpose();
    }
}

/// What kind of body this is, with the state only that kind carries.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyKind {
    /// Immovable.
    Static,
    /// Moved by the user.
    Kinematic(KinematicState),
    /// Moved by the simulation.
    Dynamic(Box<DynamicState>),
}

/// A simulated rigid body.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use sim_core::{CollisionShape, RigidBody};
/// use sim_types::Pose;
/// use nalgebra::{Point3, Vector3};
///
/// let shape = Arc::new(CollisionShape::cuboid(Vector3::repeat(0.5)));
/// let mut body = RigidBody::dynamic(shape, 2.0, Pose::from_position(Point3::new(0.0, 3.0, 0.0)));
///
/// assert!((body.mass() - 2.0).abs() < 1e-12);
/// body.apply_central_impulse(&Vector3::new(4.0, 0.0, 0.0));
/// assert!((body.linear_velocity().x - 2.0).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct RigidBody {
    pose: Pose,
    shape: Arc<CollisionShape>,
    kind: BodyKind,
    flags: CollisionFlags,
    filter: Option<CollisionFilter>,
    material: Material,
    contact_processing_threshold: f64,
    activation_state: ActivationState,
    deactivation_time: f64,
    linear_sleeping_threshold: f64,
    angular_sleeping_threshold: f64,
    motion_state: Option<Box<dyn MotionState>>,
    proxy: Option<ProxyId>,
}

impl RigidBody {
    fn with_kind(shape: Arc<CollisionShape>, pose: Pose, kind: BodyKind) -> Self {
        Self {
            pose,
            shape,
            kind,
            flags: CollisionFlags::empty(),
            filter: None,
            material: Material::default(),
            contact_processing_threshold: f64::MAX,
            activation_state: ActivationState::Active,
            deactivation_time: 0.0,
            linear_sleeping_threshold: 0.8,
            angular_sleeping_threshold: 1.0,
            motion_state: None,
            proxy: None,
        }
    }

    /// Immovable body.
    #[must_use]
    pub fn fixed(shape: Arc<CollisionShape>, pose: Pose) -> Self {
        Self::with_kind(shape, pose, BodyKind::Static)
    }

    /// Body moved by the user or its motion state.
    #[must_use]
    pub fn kinematic(shape: Arc<CollisionShape>, pose: Pose) -> Self {
        Self::with_kind(
            shape,
            pose,
            BodyKind::Kinematic(KinematicState {
                linear_velocity: Vector3::zeros(),
                angular_velocity: Vector3::zeros(),
                previous_pose: pose,
            }),
        )
    }

    /// Simulated body with inertia computed from its shape.
    ///
    /// A mass of 0 (or less) makes the body static.
    #[must_use]
    pub fn dynamic(shape: Arc<CollisionShape>, mass: f64, pose: Pose) -> Self {
        if mass > 0.0 {
            let inertia = shape.calculate_local_inertia(mass);
            let state = DynamicState::new(mass, inertia, &pose);
            Self::with_kind(shape, pose, BodyKind::Dynamic(Box::new(state)))
        } else {
            Self::fixed(shape, pose)
        }
    }

    // ==================== Builders ====================

    /// Set the material.
    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    /// Set collision flags.
    #[must_use]
    pub fn with_flags(mut self, flags: CollisionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set an explicit collision filter.
    #[must_use]
    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set damping coefficients.
    #[must_use]
    pub fn with_damping(mut self, linear: f64, angular: f64) -> Self {
        self.set_damping(linear, angular);
        self
    }

    /// Set the initial linear velocity.
    #[must_use]
    pub fn with_linear_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.set_linear_velocity(velocity);
        self
    }

    /// Set the initial angular velocity.
    #[must_use]
    pub fn with_angular_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.set_angular_velocity(velocity);
        self
    }

    /// Attach a motion state; the body starts at its transform.
    #[must_use]
    pub fn with_motion_state(mut self, motion_state: Box<dyn MotionState>) -> Self {
        self.set_world_transform(motion_state.world_transform());
        if let BodyKind::Kinematic(k) = &mut self.kind {
            k.previous_pose = self.pose;
        }
        self.motion_state = Some(motion_state);
        self
    }

    // ==================== Kind and mass ====================

    /// Body kind and its state.
    #[must_use]
    pub fn kind(&self) -> &BodyKind {
        &self.kind
    }

    /// Dynamic state, if the body is dynamic.
    #[must_use]
    pub fn dynamic_state(&self) -> Option<&DynamicState> {
        match &self.kind {
            BodyKind::Dynamic(d) => Some(d),
            _ => None,
        }
    }

    /// Dynamic state, mutably.
    pub fn dynamic_state_mut(&mut self) -> Option<&mut DynamicState> {
        match &mut self.kind {
            BodyKind::Dynamic(d) => Some(d),
            _ => None,
        }
    }

    /// Whether the body is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self.kind, BodyKind::Static)
    }

    /// Whether the body is kinematic.
    #[must_use]
    pub fn is_kinematic(&self) -> bool {
        matches!(self.kind, BodyKind::Kinematic(_))
    }

    /// Whether the body is dynamic.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self.kind, BodyKind::Dynamic(_))
    }

    /// Whether the body is static or kinematic.
    #[must_use]
    pub fn is_static_or_kinematic(&self) -> bool {
        !self.is_dynamic()
    }

    /// Set mass and local inertia diagonal.
    ///
    /// A mass of 0 turns any body static (velocities are dropped).
    /// A positive mass turns any body dynamic, at rest. Inertia components of
    /// 0 lock that rotational axis. Bodies in a world change mass through
    /// [`World::set_mass_props`](crate::World::set_mass_props), which keeps
    /// the proxy, gravity and activation state in line with the new kind.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidMassProperties`] for a negative or
    /// non-finite mass or inertia.
    pub(crate) fn set_mass_props(&mut self, mass: f64, local_inertia: Vector3<f64>) -> sim_types::Result<()> {
        if !mass.is_finite() || mass < 0.0 {
            return Err(SimError::invalid_mass(format!("mass must be finite and >= 0, got {mass}")));
        }
        if local_inertia.iter().any(|i| !i.is_finite() || *i < 0.0) {
            return Err(SimError::invalid_mass(format!(
                "inertia must be finite and >= 0, got {local_inertia:?}"
            )));
        }

        if mass == 0.0 {
            self.kind = BodyKind::Static;
            return Ok(());
        }

        if let BodyKind::Dynamic(d) = &mut self.kind {
            d.set_mass_props(mass, local_inertia);
            d.update_inertia_tensor(&self.pose);
        } else {
            let state = DynamicState::new(mass, local_inertia, &self.pose);
            self.kind = BodyKind::Dynamic(Box::new(state));
        }
        Ok(())
    }

    /// Mass; 0 for static and kinematic bodies.
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.dynamic_state().map_or(0.0, |d| d.mass)
    }

    /// Inverse mass; 0 for static and kinematic bodies.
    #[must_use]
    pub fn inv_mass(&self) -> f64 {
        self.dynamic_state().map_or(0.0, |d| d.inv_mass)
    }

    /// Diagonal of the local inverse inertia tensor.
    #[must_use]
    pub fn inv_inertia_diag_local(&self) -> Vector3<f64> {
        self.dynamic_state()
            .map_or_else(Vector3::zeros, |d| d.inv_inertia_local)
    }

    /// World-space inverse inertia tensor.
    #[must_use]
    pub fn inv_inertia_tensor_world(&self) -> Matrix3<f64> {
        self.dynamic_state()
            .map_or_else(Matrix3::zeros, |d| d.inv_inertia_world)
    }

    /// Recompute the world-space inverse inertia from the current rotation.
    pub fn update_inertia_tensor(&mut self) {
        let pose = self.pose;
        if let Some(d) = self.dynamic_state_mut() {
            d.update_inertia_tensor(&pose);
        }
    }

    /// Set per-axis linear and angular freeze masks.
    pub fn set_factors(&mut self, linear: Vector3<f64>, angular: Vector3<f64>) {
        if let Some(d) = self.dynamic_state_mut() {
            d.linear_factor = linear;
            d.angular_factor = angular;
        }
    }

    /// Set damping coefficients, clamped to `[0, 1]`.
    pub fn set_damping(&mut self, linear: f64, angular: f64) {
        if let Some(d) = self.dynamic_state_mut() {
            d.linear_damping = linear.clamp(0.0, 1.0);
            d.angular_damping = angular.clamp(0.0, 1.0);
        }
    }

    /// Enable the extra damping of nearly resting bodies.
    pub fn set_additional_damping(&mut self, enabled: bool) {
        if let Some(d) = self.dynamic_state_mut() {
            d.additional_damping = enabled;
        }
    }

    // ==================== Transform and velocity ====================

    /// Center-of-mass transform.
    #[must_use]
    pub fn world_transform(&self) -> &Pose {
        &self.pose
    }

    /// Teleport the body. The world inertia tensor follows.
    pub fn set_world_transform(&mut self, pose: Pose) {
        self.pose = pose;
        if let BodyKind::Dynamic(d) = &mut self.kind {
            d.predicted_pose = pose;
            d.update_inertia_tensor(&pose);
        }
    }

    /// Center of mass in world space.
    #[must_use]
    pub fn center_of_mass_position(&self) -> Point3<f64> {
        self.pose.position
    }

    /// Linear velocity.
    #[must_use]
    pub fn linear_velocity(&self) -> Vector3<f64> {
        match &self.kind {
            BodyKind::Static => Vector3::zeros(),
            BodyKind::Kinematic(k) => k.linear_velocity,
            BodyKind::Dynamic(d) => d.linear_velocity,
        }
    }

    /// Angular velocity.
    #[must_use]
    pub fn angular_velocity(&self) -> Vector3<f64> {
        match &self.kind {
            BodyKind::Static => Vector3::zeros(),
            BodyKind::Kinematic(k) => k.angular_velocity,
            BodyKind::Dynamic(d) => d.angular_velocity,
        }
    }

    /// Set linear velocity. Ignored for static bodies.
    pub fn set_linear_velocity(&mut self, velocity: Vector3<f64>) {
        match &mut self.kind {
            BodyKind::Static => {}
            BodyKind::Kinematic(k) => k.linear_velocity = velocity,
            BodyKind::Dynamic(d) => d.linear_velocity = velocity,
        }
    }

    /// Set angular velocity. Ignored for static bodies.
    pub fn set_angular_velocity(&mut self, velocity: Vector3<f64>) {
        match &mut self.kind {
            BodyKind::Static => {}
            BodyKind::Kinematic(k) => k.angular_velocity = velocity,
            BodyKind::Dynamic(d) => d.angular_velocity = velocity,
        }
    }

    /// Velocity of a world point attached to the body.
    #[must_use]
    pub fn velocity_in_local_point(&self, rel_pos: &Vector3<f64>) -> Vector3<f64> {
        self.linear_velocity() + self.angular_velocity().cross(rel_pos)
    }

    /// Kinetic energy.
    #[must_use]
    pub fn kinetic_energy(&self) -> f64 {
        self.dynamic_state().map_or(0.0, |d| {
            let r = self.pose.basis();
            let omega_local = r.transpose() * d.angular_velocity;
            0.5 * d.mass * d.linear_velocity.norm_squared()
                + 0.5 * omega_local.dot(&d.local_inertia.component_mul(&omega_local))
        })
    }

    // ==================== Forces ====================

    /// Gravity acceleration acting on the body.
    #[must_use]
    pub fn gravity(&self) -> Vector3<f64> {
        self.dynamic_state().map_or_else(Vector3::zeros, |d| d.gravity)
    }

    /// Set the gravity acceleration for this body.
    pub fn set_gravity(&mut self, gravity: Vector3<f64>) {
        if let Some(d) = self.dynamic_state_mut() {
            d.gravity = gravity;
        }
    }

    /// Accumulate `mass * gravity` into the force buffer.
    pub fn apply_gravity(&mut self) {
        if let Some(d) = self.dynamic_state() {
            let weight = d.gravity * d.mass;
            self.apply_central_force(&weight);
        }
    }

    /// Accumulate a force through the center of mass.
    pub fn apply_central_force(&mut self, force: &Vector3<f64>) {
        if let Some(d) = self.dynamic_state_mut() {
            d.total_force += force.component_mul(&d.linear_factor);
        }
    }

    /// Accumulate a torque.
    pub fn apply_torque(&mut self, torque: &Vector3<f64>) {
        if let Some(d) = self.dynamic_state_mut() {
            d.total_torque += torque.component_mul(&d.angular_factor);
        }
    }

    /// Accumulate a force applied at `rel_pos` from the center of mass.
    pub fn apply_force(&mut self, force: &Vector3<f64>, rel_pos: &Vector3<f64>) {
        self.apply_central_force(force);
        let linear_factor = self
            .dynamic_state()
            .map_or_else(Vector3::zeros, |d| d.linear_factor);
        self.apply_torque(&rel_pos.cross(&force.component_mul(&linear_factor)));
    }

    /// Change velocity by `impulse / mass`. Wakes the body.
    pub fn apply_central_impulse(&mut self, impulse: &Vector3<f64>) {
        if let Some(d) = self.dynamic_state_mut() {
            d.linear_velocity += impulse.component_mul(&d.linear_factor) * d.inv_mass;
            self.wake_on_impulse(impulse);
        }
    }

    /// Change angular velocity by `I⁻¹ · impulse`. Wakes the body.
    pub fn apply_torque_impulse(&mut self, impulse: &Vector3<f64>) {
        if let Some(d) = self.dynamic_state_mut() {
            d.angular_velocity +=
                (d.inv_inertia_world * impulse).component_mul(&d.angular_factor);
            self.wake_on_impulse(impulse);
        }
    }

    /// Apply an impulse at `rel_pos` from the center of mass. Wakes the body.
    pub fn apply_impulse(&mut self, impulse: &Vector3<f64>, rel_pos: &Vector3<f64>) {
        let linear_factor = self
            .dynamic_state()
            .map_or_else(Vector3::zeros, |d| d.linear_factor);
        self.apply_central_impulse(impulse);
        self.apply_torque_impulse(&rel_pos.cross(&impulse.component_mul(&linear_factor)));
    }

    fn wake_on_impulse(&mut self, impulse: &Vector3<f64>) {
        if impulse.norm_squared() > 0.0 {
            self.activate(false);
        }
    }

    /// Accumulated force.
    #[must_use]
    pub fn total_force(&self) -> Vector3<f64> {
        self.dynamic_state().map_or_else(Vector3::zeros, |d| d.total_force)
    }

    /// Accumulated torque.
    #[must_use]
    pub fn total_torque(&self) -> Vector3<f64> {
        self.dynamic_state().map_or_else(Vector3::zeros, |d| d.total_torque)
    }

    /// Zero the force and torque buffers.
    pub fn clear_forces(&mut self) {
        if let Some(d) = self.dynamic_state_mut() {
            d.total_force = Vector3::zeros();
            d.total_torque = Vector3::zeros();
        }
    }

    // ==================== Integration ====================

    /// Apply accumulated force and torque over `dt`.
    ///
    /// The angular velocity is clamped so the body turns at most a quarter
    /// turn in one step.
    pub fn integrate_velocities(&mut self, dt: f64) {
        if let Some(d) = self.dynamic_state_mut() {
            d.linear_velocity += d.total_force * (d.inv_mass * dt);
            d.angular_velocity += d.inv_inertia_world * d.total_torque * dt;
            d.angular_velocity = clamp_angular_step(&d.angular_velocity, dt);
        }
    }

    /// Multiply velocities by `(1 - damping)^dt`, then apply additional
    /// damping if enabled.
    pub fn apply_damping(&mut self, dt: f64) {
        let Some(d) = self.dynamic_state_mut() else {
            return;
        };
        d.linear_velocity *= damping_factor(d.linear_damping, dt);
        d.angular_velocity *= damping_factor(d.angular_damping, dt);

        if !d.additional_damping {
            return;
        }
        if d.angular_velocity.norm_squared() < ADDITIONAL_ANGULAR_DAMPING_THRESHOLD_SQR
            && d.linear_velocity.norm_squared() < ADDITIONAL_LINEAR_DAMPING_THRESHOLD_SQR
        {
            d.linear_velocity *= ADDITIONAL_DAMPING_FACTOR;
            d.angular_velocity *= ADDITIONAL_DAMPING_FACTOR;
        }
        settle(&mut d.linear_velocity, d.linear_damping);
        settle(&mut d.angular_velocity, d.angular_damping);
    }

    /// Pose after moving with the current velocities for `dt`.
    #[must_use]
    pub fn predict_integrated_transform(&self, dt: f64) -> Pose {
        integrate_transform(&self.pose, &self.linear_velocity(), &self.angular_velocity(), dt)
    }

    /// Move to `pose` and refresh the world inertia.
    pub fn proceed_to_transform(&mut self, pose: Pose) {
        self.set_world_transform(pose);
    }

    /// For kinematic bodies: pull the pose from the motion state and derive
    /// velocities from the change since the previous sub-step.
    pub fn save_kinematic_state(&mut self, dt: f64) {
        if dt == 0.0 {
            return;
        }
        let BodyKind::Kinematic(k) = &mut self.kind else {
            return;
        };
        if let Some(ms) = &self.motion_state {
            self.pose = ms.world_transform();
        }
        let (linear, angular) = calculate_velocity(&k.previous_pose, &self.pose, dt);
        k.linear_velocity = linear;
        k.angular_velocity = angular;
        k.previous_pose = self.pose;
    }

    // ==================== Activation ====================

    /// Current activation state.
    #[must_use]
    pub fn activation_state(&self) -> ActivationState {
        self.activation_state
    }

    /// Change activation state unless the current one is a disable state.
    pub fn set_activation_state(&mut self, state: ActivationState) {
        if self.activation_state.is_overridable() {
            self.activation_state = state;
        }
    }

    /// Change activation state unconditionally.
    pub fn force_activation_state(&mut self, state: ActivationState) {
        self.activation_state = state;
    }

    /// Wake the body and reset its deactivation timer.
    ///
    /// Static and kinematic bodies only wake when `force` is set.
    pub fn activate(&mut self, force: bool) {
        if force || self.is_dynamic() {
            self.set_activation_state(ActivationState::Active);
            self.deactivation_time = 0.0;
        }
    }

    /// Whether the body takes part in simulation this step.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.activation_state.is_active()
    }

    /// Seconds spent below the sleeping thresholds.
    #[must_use]
    pub fn deactivation_time(&self) -> f64 {
        self.deactivation_time
    }

    /// Set the sleeping velocity thresholds.
    pub fn set_sleeping_thresholds(&mut self, linear: f64, angular: f64) {
        self.linear_sleeping_threshold = linear;
        self.angular_sleeping_threshold = angular;
    }

    /// Linear sleeping threshold.
    #[must_use]
    pub fn linear_sleeping_threshold(&self) -> f64 {
        self.linear_sleeping_threshold
    }

    /// Angular sleeping threshold.
    #[must_use]
    pub fn angular_sleeping_threshold(&self) -> f64 {
        self.angular_sleeping_threshold
    }

    /// Advance the deactivation timer while the body is slow enough.
    pub fn update_deactivation(&mut self, dt: f64) {
        if matches!(
            self.activation_state,
            ActivationState::IslandSleeping | ActivationState::DisableDeactivation
        ) {
            return;
        }

        let lin = self.linear_sleeping_threshold;
        let ang = self.angular_sleeping_threshold;
        if self.linear_velocity().norm_squared() < lin * lin
            && self.angular_velocity().norm_squared() < ang * ang
        {
            self.deactivation_time += dt;
        } else {
            self.deactivation_time = 0.0;
            if self.activation_state == ActivationState::WantsDeactivation {
                self.activation_state = ActivationState::Active;
            }
        }
    }

    /// Whether the body is ready to sleep.
    #[must_use]
    pub fn wants_sleeping(&self, deactivation_time: f64, disable_deactivation: bool) -> bool {
        match self.activation_state {
            ActivationState::DisableDeactivation => false,
            _ if disable_deactivation || deactivation_time == 0.0 => false,
            ActivationState::IslandSleeping | ActivationState::WantsDeactivation => true,
            _ => self.deactivation_time > deactivation_time,
        }
    }

    /// Put the body to sleep, zeroing its velocities.
    pub(crate) fn enter_sleep(&mut self) {
        self.set_activation_state(ActivationState::IslandSleeping);
        if self.activation_state == ActivationState::IslandSleeping {
            self.set_linear_velocity(Vector3::zeros());
            self.set_angular_velocity(Vector3::zeros());
        }
    }

    /// Wake a sleeping body because its island has an awake member.
    ///
    /// The body only wants deactivation, so the island can fall asleep again
    /// as soon as every member is quiet.
    pub(crate) fn wake_into_island(&mut self) {
        if self.activation_state == ActivationState::IslandSleeping {
            self.activation_state = ActivationState::WantsDeactivation;
            self.deactivation_time = 0.0;
        }
    }

    // ==================== Collision ====================

    /// Collision shape.
    #[must_use]
    pub fn collision_shape(&self) -> &Arc<CollisionShape> {
        &self.shape
    }

    pub(crate) fn set_shape(&mut self, shape: Arc<CollisionShape>) {
        self.shape = shape;
    }

    /// Collision flags.
    #[must_use]
    pub fn flags(&self) -> CollisionFlags {
        self.flags
    }

    /// Replace collision flags.
    pub fn set_flags(&mut self, flags: CollisionFlags) {
        self.flags = flags;
    }

    /// Whether contacts with this body are resolved.
    #[must_use]
    pub fn has_contact_response(&self) -> bool {
        !self.flags.contains(CollisionFlags::NO_CONTACT_RESPONSE)
    }

    /// Effective collision filter: the explicit one, or a default per kind.
    #[must_use]
    pub fn collision_filter(&self) -> CollisionFilter {
        self.filter.unwrap_or_else(|| match self.kind {
            BodyKind::Static => CollisionFilter::fixed(CollisionGroups::STATIC),
            BodyKind::Kinematic(_) => CollisionFilter::fixed(CollisionGroups::KINEMATIC),
            BodyKind::Dynamic(_) => CollisionFilter::dynamic(),
        })
    }

    pub(crate) fn set_filter(&mut self, filter: CollisionFilter) {
        self.filter = Some(filter);
    }

    /// Surface material.
    #[must_use]
    pub fn material(&self) -> Material {
        self.material
    }

    /// Replace the surface material.
    pub fn set_material(&mut self, material: Material) {
        self.material = material;
    }

    /// Contacts farther apart than this are not handed to the solver.
    #[must_use]
    pub fn contact_processing_threshold(&self) -> f64 {
        self.contact_processing_threshold
    }

    /// Set the contact processing threshold.
    pub fn set_contact_processing_threshold(&mut self, threshold: f64) {
        self.contact_processing_threshold = threshold;
    }

    /// World-space bounds of the shape at the current pose.
    #[must_use]
    pub fn aabb(&self) -> crate::broad_phase::Aabb {
        self.shape.aabb(&self.pose)
    }

    /// Broadphase proxy, if the body is in a world.
    #[must_use]
    pub fn broadphase_handle(&self) -> Option<ProxyId> {
        self.proxy
    }

    pub(crate) fn set_broadphase_handle(&mut self, proxy: Option<ProxyId>) {
        self.proxy = proxy;
    }

    // ==================== Motion state ====================

    /// Attached motion state.
    #[must_use]
    pub fn motion_state(&self) -> Option<&dyn MotionState> {
        self.motion_state.as_deref()
    }

    /// Attached motion state, mutably.
    pub fn motion_state_mut(&mut self) -> Option<&mut (dyn MotionState + 'static)> {
        self.motion_state.as_deref_mut()
    }

    /// Solver view of this body.
    ///
    /// Only awake dynamic bodies can be moved by impulses; everything else
    /// is fixed, keeping its velocity so moving kinematic bodies still push.
    pub(crate) fn solver_body(&self, movable: bool) -> SolverBody {
        let mut body = SolverBody::fixed(self.pose);
        body.linear_velocity = self.linear_velocity();
        body.angular_velocity = self.angular_velocity();
        if let (true, Some(d)) = (movable, self.dynamic_state()) {
            body.inv_mass = d.linear_factor * d.inv_mass;
            body.inv_inertia_world = d.inv_inertia_world;
            body.angular_factor = d.angular_factor;
        }
        body
    }
}

/// Bleed a small velocity towards zero once it is below the damping value.
fn settle(velocity: &mut Vector3<f64>, damping: f64) {
    const STEP: f64 = 0.005;
    let speed = velocity.norm();
    if speed < damping {
        if speed > STEP {
            *velocity -= *velocity / speed * STEP;
        } else {
            *velocity = Vector3::zeros();
        }
    }
}
