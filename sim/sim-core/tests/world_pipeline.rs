//! End-to-end tests for the simulation pipeline.
//!
//! Each test builds a small scene, steps it through `World::step_simulation`
//! and checks what a user of the world can observe: poses, activation
//! states, manifolds, contact events and callback order.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::float_cmp)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use sim_constraint::SolverBody;
use sim_core::{
    ActivationState, BodyHandle, CollisionFilter, CollisionFlags, CollisionGroups, CollisionShape,
    ConstraintSolver, PersistentManifold, Point2PointConstraint, Pose, RigidBody, SolverInfo,
    TypedConstraint, World, WorldConfig,
};

const DT: f64 = 1.0 / 60.0;

fn ground(world: &mut World) -> BodyHandle {
    world.add_body(RigidBody::fixed(
        Arc::new(CollisionShape::cuboid(Vector3::new(50.0, 50.0, 50.0))),
        Pose::from_position(Point3::new(0.0, -50.0, 0.0)),
    ))
}

fn small_box(y: f64) -> RigidBody {
    RigidBody::dynamic(
        Arc::new(CollisionShape::cuboid(Vector3::new(0.1, 0.1, 0.1))),
        1.0,
        Pose::from_position(Point3::new(0.0, y, 0.0)),
    )
}

fn sphere_at(position: Point3<f64>) -> RigidBody {
    RigidBody::dynamic(
        Arc::new(CollisionShape::sphere(0.5)),
        1.0,
        Pose::from_position(position),
    )
}

fn run(world: &mut World, steps: usize) {
    for _ in 0..steps {
        world.step_simulation(DT, 10, DT).unwrap();
    }
}

fn height(world: &World, handle: BodyHandle) -> f64 {
    world.body(handle).unwrap().world_transform().position.y
}

// =============================================================================
// Resting contact and sleeping
// =============================================================================

mod resting {
    use super::*;

    #[test]
    fn box_comes_to_rest_on_ground() {
        let mut world = World::default();
        let floor = ground(&mut world);
        let body = world.add_body(small_box(2.0));

        run(&mut world, 120);

        assert!((height(&world, body) - 0.1).abs() < 0.02);
        let manifold = world.manifold_between(floor, body).unwrap();
        assert!(manifold.num_contacts() >= 3);
        assert!(world.body(body).unwrap().linear_velocity().norm() < 0.5);

        let mut settled_steps = 0;
        while world.body(body).unwrap().activation_state() != ActivationState::IslandSleeping
            && settled_steps < 600
        {
            run(&mut world, 1);
            settled_steps += 1;
        }
        let rb = world.body(body).unwrap();
        assert_eq!(rb.activation_state(), ActivationState::IslandSleeping);
        assert_eq!(rb.linear_velocity(), Vector3::zeros());
        assert!((height(&world, body) - 0.1).abs() < 0.02);
    }

    #[test]
    fn resting_box_falls_asleep() {
        let mut world = World::default();
        ground(&mut world);
        let body = world.add_body(small_box(0.5));

        run(&mut world, 400);

        let rb = world.body(body).unwrap();
        assert_eq!(rb.activation_state(), ActivationState::IslandSleeping);
        assert_eq!(rb.linear_velocity(), Vector3::zeros());
        assert_eq!(world.stats().sleeping_bodies, 1);
        assert_eq!(world.stats().awake_islands, 0);
    }

    #[test]
    fn impulse_wakes_sleeping_box() {
        let mut world = World::default();
        ground(&mut world);
        let body = world.add_body(small_box(0.5));
        run(&mut world, 400);
        assert!(!world.body(body).unwrap().is_active());

        world
            .body_mut(body)
            .unwrap()
            .apply_central_impulse(&Vector3::new(0.0, 3.0, 0.0));
        assert_eq!(
            world.body(body).unwrap().activation_state(),
            ActivationState::Active
        );

        let before = height(&world, body);
        run(&mut world, 5);
        assert!(height(&world, body) > before + 0.05);
    }

    #[test]
    fn landing_sphere_wakes_sleeping_box() {
        let mut world = World::default();
        ground(&mut world);
        let base = world.add_body(RigidBody::dynamic(
            Arc::new(CollisionShape::cuboid(Vector3::new(0.25, 0.25, 0.25))),
            1.0,
            Pose::from_position(Point3::new(0.0, 0.3, 0.0)),
        ));
        let mut steps = 0;
        while world.body(base).unwrap().activation_state() != ActivationState::IslandSleeping
            && steps < 600
        {
            run(&mut world, 1);
            steps += 1;
        }
        assert_eq!(
            world.body(base).unwrap().activation_state(),
            ActivationState::IslandSleeping
        );

        let ball = world.add_body(sphere_at(Point3::new(0.0, 2.0, 0.0)));
        let mut woke = false;
        for _ in 0..240 {
            run(&mut world, 1);
            woke |= world.body(base).unwrap().activation_state() != ActivationState::IslandSleeping;
        }

        assert!(woke);
        assert!(world.manifold_between(base, ball).is_some());
        assert!((height(&world, base) - 0.25).abs() < 0.03);
        assert!((height(&world, ball) - 1.0).abs() < 0.05);
        assert!(world.body(ball).unwrap().linear_velocity().norm() < 0.2);
    }

    #[test]
    fn disabled_deactivation_keeps_box_awake() {
        let mut world = World::new(WorldConfig::default().without_sleeping()).unwrap();
        ground(&mut world);
        let body = world.add_body(small_box(0.5));
        run(&mut world, 400);
        assert!(world.body(body).unwrap().is_active());
    }

    #[test]
    fn sphere_stack_settles_without_sinking() {
        let mut world = World::default();
        ground(&mut world);
        let lower = world.add_body(sphere_at(Point3::new(0.0, 0.5, 0.0)));
        let upper = world.add_body(sphere_at(Point3::new(0.0, 1.6, 0.0)));

        run(&mut world, 180);

        assert!((height(&world, lower) - 0.5).abs() < 0.05);
        assert!((height(&world, upper) - 1.5).abs() < 0.08);
    }
}

// =============================================================================
// Mass changes
// =============================================================================

mod mass_changes {
    use super::*;

    #[test]
    fn static_box_given_mass_falls_and_rests() {
        let mut world = World::default();
        let floor = ground(&mut world);
        let shape = Arc::new(CollisionShape::cuboid(Vector3::new(0.1, 0.1, 0.1)));
        let inertia = shape.calculate_local_inertia(1.0);
        let body = world.add_body(RigidBody::fixed(
            shape,
            Pose::from_position(Point3::new(0.0, 1.0, 0.0)),
        ));

        run(&mut world, 30);
        assert_eq!(height(&world, body), 1.0);

        world.set_mass_props(body, 1.0, inertia).unwrap();
        assert_eq!(
            world.body(body).unwrap().gravity(),
            WorldConfig::default().gravity
        );

        run(&mut world, 240);

        assert!((height(&world, body) - 0.1).abs() < 0.03);
        assert!(world.manifold_between(floor, body).is_some());
    }

    #[test]
    fn dynamic_box_made_massless_stops_in_place() {
        let mut world = World::default();
        ground(&mut world);
        let body = world.add_body(small_box(3.0));
        run(&mut world, 10);

        world.set_mass_props(body, 0.0, Vector3::zeros()).unwrap();
        let frozen = height(&world, body);
        run(&mut world, 60);

        let rb = world.body(body).unwrap();
        assert!(rb.is_static());
        assert_eq!(rb.activation_state(), ActivationState::IslandSleeping);
        assert_eq!(height(&world, body), frozen);
        assert_eq!(world.num_manifolds(), 0);
    }

    #[test]
    fn box_made_massless_on_ground_holds_a_dropped_box() {
        let mut world = World::default();
        ground(&mut world);
        let shelf = world.add_body(small_box(0.5));
        run(&mut world, 120);
        world.set_mass_props(shelf, 0.0, Vector3::zeros()).unwrap();

        let top = world.add_body(small_box(1.0));
        run(&mut world, 180);

        assert!((height(&world, top) - 0.3).abs() < 0.03);
        assert!(world.manifold_between(shelf, top).is_some());
    }
}

// =============================================================================
// Stepping control
// =============================================================================

mod stepping {
    use super::*;

    #[test]
    fn zero_time_step_is_a_no_op() {
        let mut world = World::default();
        ground(&mut world);
        let body = world.add_body(small_box(2.0));

        assert_eq!(world.step_simulation(0.0, 0, DT).unwrap(), 0);
        assert_eq!(height(&world, body), 2.0);
        assert_eq!(world.step_count(), 0);
        assert_eq!(world.num_manifolds(), 0);
    }

    #[test]
    fn half_steps_accumulate_into_one() {
        let mut world = World::default();
        let body = world.add_body(small_box(2.0));

        assert_eq!(world.step_simulation(1.0 / 120.0, 1, DT).unwrap(), 0);
        assert_eq!(height(&world, body), 2.0);
        assert_eq!(world.step_simulation(1.0 / 120.0, 1, DT).unwrap(), 1);
        assert!(height(&world, body) < 2.0);
    }

    #[test]
    fn long_frame_is_clamped() {
        let mut world = World::default();
        world.add_body(small_box(2.0));
        assert_eq!(world.step_simulation(1.0, 5, DT).unwrap(), 5);
        assert_relative_eq!(world.time(), 5.0 * DT, epsilon = 1e-12);
    }

    #[test]
    fn same_scene_gives_same_result() {
        fn build() -> (World, Vec<BodyHandle>) {
            let mut world = World::default();
            ground(&mut world);
            let handles = (0..6)
                .map(|i| {
                    let x = f64::from(i % 3) * 0.9 - 0.9;
                    let y = 0.6 + f64::from(i / 3) * 1.1;
                    world.add_body(sphere_at(Point3::new(x, y, 0.05 * f64::from(i))))
                })
                .collect();
            (world, handles)
        }

        let (mut first, handles) = build();
        let (mut second, _) = build();
        run(&mut first, 90);
        run(&mut second, 90);

        for h in handles {
            assert_eq!(
                first.body(h).unwrap().world_transform(),
                second.body(h).unwrap().world_transform()
            );
        }
    }
}

// =============================================================================
// Callbacks and events
// =============================================================================

mod callbacks {
    use super::*;

    #[derive(Debug)]
    struct RecordingSolver {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ConstraintSolver for RecordingSolver {
        fn prepare_solve(&mut self, _num_bodies: usize, _num_manifolds: usize) {
            self.log.lock().unwrap().push("prepare");
        }

        fn solve_group(
            &mut self,
            _bodies: &mut [SolverBody],
            _manifolds: &mut [&mut PersistentManifold],
            _constraints: &mut [&mut (dyn TypedConstraint + 'static)],
            _info: &SolverInfo,
        ) -> f64 {
            self.log.lock().unwrap().push("solve");
            0.0
        }

        fn all_solved(&mut self, _info: &SolverInfo) {
            self.log.lock().unwrap().push("all_solved");
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn sub_step_calls_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut world = World::default();
        world.add_body(small_box(2.0));
        world.set_constraint_solver(Box::new(RecordingSolver {
            log: Arc::clone(&log),
        }));
        let pre = Arc::clone(&log);
        world.set_pre_tick_callback(move |_| pre.lock().unwrap().push("pre"));
        let post = Arc::clone(&log);
        world.set_post_tick_callback(move |_| post.lock().unwrap().push("post"));

        world.step_simulation(DT, 1, DT).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre", "prepare", "solve", "all_solved", "post"]
        );
    }

    #[test]
    fn contact_started_fires_once_on_landing() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut world = World::default();
        let counter = Arc::clone(&started);
        world
            .hooks_mut()
            .set_contact_started_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        ground(&mut world);
        world.add_body(small_box(0.5));

        run(&mut world, 90);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_body_ends_its_contacts() {
        let ended = Arc::new(AtomicUsize::new(0));
        let mut world = World::default();
        let counter = Arc::clone(&ended);
        world.hooks_mut().set_contact_ended_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let floor = ground(&mut world);
        let body = world.add_body(small_box(0.5));
        run(&mut world, 60);
        assert!(world.manifold_between(floor, body).is_some());

        world.remove_body(body).unwrap();

        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert_eq!(world.num_manifolds(), 0);
        assert_eq!(world.overlapping_pair_count(), 0);
        assert!(world.body(body).is_err());
    }
}

// =============================================================================
// Filtering and response
// =============================================================================

mod filtering {
    use super::*;

    #[test]
    fn masked_out_box_falls_through_ground() {
        let mut world = World::default();
        let floor = ground(&mut world);
        let body = world.add_body(small_box(0.5).with_filter(CollisionFilter::new(
            CollisionGroups::DEFAULT,
            CollisionGroups::ALL.difference(CollisionGroups::STATIC),
        )));

        run(&mut world, 60);

        assert!(height(&world, body) < 0.0);
        assert!(world.manifold_between(floor, body).is_none());
    }

    #[test]
    fn no_response_body_reports_contacts_but_passes_through() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut world = World::default();
        let counter = Arc::clone(&started);
        world
            .hooks_mut()
            .set_contact_started_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        ground(&mut world);
        let body = world.add_body(small_box(0.5).with_flags(CollisionFlags::NO_CONTACT_RESPONSE));

        run(&mut world, 60);

        assert!(height(&world, body) < 0.0);
        assert!(started.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn world_gravity_flag_keeps_custom_gravity() {
        let mut world = World::default();
        let body = world.add_body(small_box(1.0).with_flags(CollisionFlags::DISABLE_WORLD_GRAVITY));
        world
            .body_mut(body)
            .unwrap()
            .set_gravity(Vector3::new(0.0, 5.0, 0.0));
        world.set_gravity(Vector3::new(0.0, -20.0, 0.0));

        run(&mut world, 30);

        assert!(height(&world, body) > 1.0);
    }
}

// =============================================================================
// Joints
// =============================================================================

mod joints {
    use super::*;

    #[test]
    fn pendulum_keeps_its_length() {
        let mut world = World::default();
        let anchor = Point3::new(0.0, 5.0, 0.0);
        let bob = world.add_body(sphere_at(Point3::new(1.0, 5.0, 0.0)));
        world
            .add_constraint(
                Box::new(Point2PointConstraint::to_world(
                    bob,
                    Point3::new(-1.0, 0.0, 0.0),
                    anchor,
                )),
                false,
            )
            .unwrap();

        let mut lowest = f64::INFINITY;
        for _ in 0..120 {
            world.step_simulation(DT, 1, DT).unwrap();
            let p = world.body(bob).unwrap().world_transform().position;
            assert!(((p - anchor).norm() - 1.0).abs() < 0.1);
            lowest = lowest.min(p.y);
        }
        assert!(lowest < 4.5);
    }

    #[test]
    fn linked_bodies_can_skip_collisions() {
        let mut world = World::new(WorldConfig::default().zero_gravity()).unwrap();
        let a = world.add_body(sphere_at(Point3::new(0.0, 0.0, 0.0)));
        let b = world.add_body(sphere_at(Point3::new(0.5, 0.0, 0.0)));
        world
            .add_constraint(
                Box::new(Point2PointConstraint::new(
                    a,
                    b,
                    Point3::new(0.25, 0.0, 0.0),
                    Point3::new(-0.25, 0.0, 0.0),
                )),
                true,
            )
            .unwrap();

        run(&mut world, 30);

        assert!(world.manifold_between(a, b).is_none());
        let gap = world.body(b).unwrap().world_transform().position
            - world.body(a).unwrap().world_transform().position;
        assert_relative_eq!(gap.norm(), 0.5, epsilon = 0.02);
    }

    #[test]
    fn unlinked_overlap_is_pushed_apart() {
        let mut world = World::new(WorldConfig::default().zero_gravity()).unwrap();
        let a = world.add_body(sphere_at(Point3::new(0.0, 0.0, 0.0)));
        let b = world.add_body(sphere_at(Point3::new(0.8, 0.0, 0.0)));

        run(&mut world, 60);

        let gap = world.body(b).unwrap().world_transform().position
            - world.body(a).unwrap().world_transform().position;
        assert!(gap.norm() > 0.95);
    }
}
