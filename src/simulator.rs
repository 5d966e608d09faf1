//! Per-environment point-goal navigation state machine.

use std::sync::Arc;

use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::constants::{
    CAMERA_HEIGHT, CAM_FWD_VECTOR, MAX_STEPS, SLACK_REWARD, SUCCESS_DISTANCE, SUCCESS_REWARD,
    TURN_ANGLE, UP_VECTOR,
};
use crate::dataset::Dataset;
use crate::math::{polar_goal, Mat4, Quat, Vec3};
use crate::pathfinder::Pathfinder;
use crate::render::RenderEnvironment;

/// Discrete navigation actions, by wire value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimAction {
    Stop = 0,
    MoveForward = 1,
    TurnLeft = 2,
    TurnRight = 3,
}

impl SimAction {
    /// Decode a raw policy action. Unknown integers are a protocol error.
    #[inline]
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(Self::Stop),
            1 => Some(Self::MoveForward),
            2 => Some(Self::TurnLeft),
            3 => Some(Self::TurnRight),
            _ => None,
        }
    }
}

/// Per-step auxiliary record, laid out exactly as the training side reads
/// it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepInfo {
    pub success: f32,
    pub spl: f32,
    pub distance_to_goal: f32,
}

/// Everything a step produces for one environment.
#[derive(Clone, Copy, Debug)]
pub struct StepOutcome {
    pub done: bool,
    pub reward: f32,
    pub info: StepInfo,
    pub polar: [f32; 2],
}

/// One environment's episode progress and reward accounting.
///
/// A simulator is created against a scene, reset at every episode boundary,
/// and replaced wholesale when its environment migrates to a new scene.
pub struct Simulator {
    dataset: Arc<Dataset>,
    scene_idx: u32,

    position: Vec3,
    rotation: Quat,
    goal: Vec3,

    nav_position: Vec3,
    nav_goal: Vec3,

    initial_distance: f32,
    prev_distance: f32,
    travel_distance: f32,
    step: u32,
}

impl Simulator {
    /// Create a simulator for `scene_idx`. The state is unspecified until
    /// the first `reset`.
    pub fn new(dataset: Arc<Dataset>, scene_idx: u32) -> Self {
        Self {
            dataset,
            scene_idx,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            goal: Vec3::ZERO,
            nav_position: Vec3::ZERO,
            nav_goal: Vec3::ZERO,
            initial_distance: 0.0,
            prev_distance: 0.0,
            travel_distance: 0.0,
            step: 0,
        }
    }

    #[inline]
    pub fn scene_idx(&self) -> u32 {
        self.scene_idx
    }

    #[inline]
    pub fn distance_to_goal(&self) -> f32 {
        self.prev_distance
    }

    #[inline]
    pub fn travel_distance(&self) -> f32 {
        self.travel_distance
    }

    #[inline]
    pub fn step_count(&self) -> u32 {
        self.step
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Begin a new episode: a uniform random draw (with replacement) from
    /// the scene's episode span. Returns the polar goal observation.
    pub fn reset(
        &mut self,
        render_env: &mut RenderEnvironment,
        pathfinder: &mut dyn Pathfinder,
        rng: &mut Xoshiro256StarStar,
    ) -> [f32; 2] {
        let episodes = self.dataset.episodes_of(self.scene_idx);
        let episode = &episodes[rng.gen_range(0..episodes.len())];

        self.step = 1;
        self.position = episode.start_position;
        self.rotation = episode.start_rotation;
        self.goal = episode.goal;

        self.nav_goal = pathfinder.snap_point(episode.goal);
        self.nav_position = pathfinder.snap_point(self.position);

        self.travel_distance = 0.0;
        self.initial_distance = pathfinder.find_path(self.nav_position, self.nav_goal);
        self.prev_distance = self.initial_distance;

        self.update_observation_state(render_env)
    }

    /// Advance one step. Panics on unknown action integers.
    pub fn step(
        &mut self,
        raw_action: i64,
        render_env: &mut RenderEnvironment,
        pathfinder: &mut dyn Pathfinder,
    ) -> StepOutcome {
        let action = SimAction::from_raw(raw_action)
            .unwrap_or_else(|| panic!("Unknown action: {}", raw_action));

        self.step += 1;
        let mut done = self.step >= MAX_STEPS;
        let mut reward = -SLACK_REWARD;

        let mut success = 0.0;
        let distance_to_goal;

        match action {
            SimAction::Stop => {
                done = true;
                distance_to_goal = pathfinder.find_path(self.nav_position, self.nav_goal);
                if distance_to_goal < SUCCESS_DISTANCE {
                    success = 1.0;
                }
                reward += success * SUCCESS_REWARD;
            }
            SimAction::MoveForward => {
                let prev_position = self.position;

                let delta = self.rotation.rotate(Vec3::from_array(CAM_FWD_VECTOR));
                let desired = self.position + delta;
                self.nav_position = pathfinder.try_step(self.nav_position, desired);
                self.position = self.nav_position;

                distance_to_goal = pathfinder.find_path(self.nav_position, self.nav_goal);
                reward += self.prev_distance - distance_to_goal;
                self.travel_distance += self.position.distance(prev_position);
                self.prev_distance = distance_to_goal;
            }
            SimAction::TurnLeft => {
                self.rotation =
                    Quat::from_axis_angle(Vec3::from_array(UP_VECTOR), -TURN_ANGLE) * self.rotation;
                // Rotation in place: geodesic distance is unchanged.
                distance_to_goal = self.prev_distance;
            }
            SimAction::TurnRight => {
                self.rotation =
                    Quat::from_axis_angle(Vec3::from_array(UP_VECTOR), TURN_ANGLE) * self.rotation;
                distance_to_goal = self.prev_distance;
            }
        }

        let polar = self.update_observation_state(render_env);

        let info = StepInfo {
            success,
            spl: success * self.initial_distance
                / self.initial_distance.max(self.travel_distance),
            distance_to_goal,
        };

        StepOutcome {
            done,
            reward,
            info,
            polar,
        }
    }

    /// Refresh the renderer view matrix and return the polar goal vector.
    fn update_observation_state(&self, render_env: &mut RenderEnvironment) -> [f32; 2] {
        let eye = self.position + Vec3::from_array(UP_VECTOR).scale(CAMERA_HEIGHT);
        render_env.set_view(Mat4::view(self.rotation, eye));
        polar_goal(self.rotation, self.position, self.goal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FORWARD_STEP_SIZE;
    use crate::dataset::{Episode, SceneMetadata};
    use crate::pathfinder::OpenFloor;
    use crate::render::{AssetLoader, CameraSpec, HeadlessRenderer, RenderEnvironment, Renderer};
    use rand::SeedableRng;
    use std::path::Path;

    fn single_episode_dataset() -> Arc<Dataset> {
        let episode = Episode {
            start_position: Vec3::ZERO,
            start_rotation: Quat::IDENTITY,
            goal: Vec3::new(0.0, 0.0, -1.0),
        };
        Arc::new(Dataset::from_parts(
            vec![episode],
            vec![SceneMetadata::for_tests(0, 1)],
        ))
    }

    fn test_fixture() -> (Simulator, RenderEnvironment, OpenFloor, Xoshiro256StarStar) {
        let dataset = single_episode_dataset();
        let sim = Simulator::new(dataset, 0);

        let renderer = HeadlessRenderer;
        let scene = renderer
            .make_loader()
            .unwrap()
            .load_scene(Path::new("s.bps"))
            .unwrap();
        let render_env = RenderEnvironment::new(scene, CameraSpec::default());

        (sim, render_env, OpenFloor, Xoshiro256StarStar::seed_from_u64(0))
    }

    #[test]
    fn test_reset_state() {
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        let polar = sim.reset(&mut env, &mut pf, &mut rng);

        assert_eq!(sim.step_count(), 1);
        assert_eq!(sim.travel_distance(), 0.0);
        assert!((sim.distance_to_goal() - 1.0).abs() < 1e-6);
        assert!((polar[0] - 1.0).abs() < 1e-6);
        assert!(polar[1].abs() < 1e-6);
    }

    #[test]
    fn test_stop_far_from_goal() {
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        sim.reset(&mut env, &mut pf, &mut rng);

        let out = sim.step(SimAction::Stop as i64, &mut env, &mut pf);
        assert!(out.done);
        assert!((out.reward + SLACK_REWARD).abs() < 1e-6);
        assert_eq!(out.info.success, 0.0);
        assert_eq!(out.info.spl, 0.0);
        assert!((out.info.distance_to_goal - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_forward_then_stop_is_perfect_spl() {
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        sim.reset(&mut env, &mut pf, &mut rng);

        for i in 0..4 {
            let out = sim.step(SimAction::MoveForward as i64, &mut env, &mut pf);
            assert!(!out.done);
            // Each step closes 0.25m, refunding the slack-adjusted reward
            assert!((out.reward - (FORWARD_STEP_SIZE - SLACK_REWARD)).abs() < 1e-5);
            let expected = 1.0 - FORWARD_STEP_SIZE * (i + 1) as f32;
            assert!((out.info.distance_to_goal - expected).abs() < 1e-5);
        }
        assert!((sim.travel_distance() - 1.0).abs() < 1e-5);

        let out = sim.step(SimAction::Stop as i64, &mut env, &mut pf);
        assert!(out.done);
        assert_eq!(out.info.success, 1.0);
        assert!((out.info.spl - 1.0).abs() < 1e-5);
        assert!((out.reward - (SUCCESS_REWARD - SLACK_REWARD)).abs() < 1e-5);
    }

    #[test]
    fn test_turns_do_not_move_or_requery() {
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        sim.reset(&mut env, &mut pf, &mut rng);

        let before = sim.position();
        let out = sim.step(SimAction::TurnLeft as i64, &mut env, &mut pf);
        assert_eq!(sim.position(), before);
        assert!((out.reward + SLACK_REWARD).abs() < 1e-6);
        assert!((out.info.distance_to_goal - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_turn_round_trip_restores_rotation() {
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        sim.reset(&mut env, &mut pf, &mut rng);

        sim.step(SimAction::TurnLeft as i64, &mut env, &mut pf);
        sim.step(SimAction::TurnLeft as i64, &mut env, &mut pf);
        sim.step(SimAction::TurnRight as i64, &mut env, &mut pf);
        let out = sim.step(SimAction::TurnRight as i64, &mut env, &mut pf);

        let q = sim.rotation();
        assert!((q.w.abs() - 1.0).abs() < 1e-5);
        assert!(q.x.abs() < 1e-5 && q.y.abs() < 1e-5 && q.z.abs() < 1e-5);
        // Back to facing the goal head-on
        assert!(out.polar[1].abs() < 1e-5);
    }

    #[test]
    fn test_turn_left_faces_positive_x() {
        // The left turn composes a negative angle about up, carrying the
        // forward axis toward +X.
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        sim.reset(&mut env, &mut pf, &mut rng);

        sim.step(SimAction::TurnLeft as i64, &mut env, &mut pf);
        let forward = sim.rotation().rotate(Vec3::new(0.0, 0.0, -1.0));
        assert!(forward.x > 0.0, "forward after TurnLeft: {:?}", forward);
    }

    #[test]
    fn test_max_steps_terminates() {
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        sim.reset(&mut env, &mut pf, &mut rng);

        let mut done_at = None;
        for i in 0..MAX_STEPS {
            let out = sim.step(SimAction::MoveForward as i64, &mut env, &mut pf);
            if out.done {
                assert_eq!(out.info.success, 0.0);
                done_at = Some(i + 1);
                break;
            }
        }
        // Step counter starts at 1 after reset, so the 499th action hits 500
        assert_eq!(done_at, Some(MAX_STEPS - 1));
        assert_eq!(sim.step_count(), MAX_STEPS);
    }

    #[test]
    fn test_fixed_seed_reset_is_reproducible() {
        let episodes: Vec<Episode> = (0..16)
            .map(|i| Episode {
                start_position: Vec3::new(i as f32, 0.0, 0.0),
                start_rotation: Quat::IDENTITY,
                goal: Vec3::new(i as f32, 0.0, -1.0),
            })
            .collect();
        let dataset = Arc::new(Dataset::from_parts(
            episodes,
            vec![SceneMetadata::for_tests(0, 16)],
        ));

        let renderer = HeadlessRenderer;
        let scene = renderer
            .make_loader()
            .unwrap()
            .load_scene(Path::new("s.bps"))
            .unwrap();

        let mut positions = Vec::new();
        for _ in 0..2 {
            let mut sim = Simulator::new(dataset.clone(), 0);
            let mut env = RenderEnvironment::new(scene.clone(), CameraSpec::default());
            let mut pf = OpenFloor;
            let mut rng = Xoshiro256StarStar::seed_from_u64(7);
            sim.reset(&mut env, &mut pf, &mut rng);
            positions.push(sim.position());
        }
        assert_eq!(positions[0], positions[1]);
    }

    #[test]
    #[should_panic(expected = "Unknown action")]
    fn test_unknown_action_panics() {
        let (mut sim, mut env, mut pf, mut rng) = test_fixture();
        sim.reset(&mut env, &mut pf, &mut rng);
        sim.step(17, &mut env, &mut pf);
    }
}
