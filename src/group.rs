//! A contiguous block of environments rendered together.
//!
//! Each group binds a slice of active-scene slots; every slot contributes
//! `envs_per_scene` environments. The group owns the renderer-side
//! environment handles, the simulators, the scene trackers, and the flat
//! per-environment output buffers the policy reads between steps.

use std::sync::Arc;

use rand_xoshiro::Xoshiro256StarStar;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::pathfinder::PathfinderSet;
use crate::render::{CameraSpec, CommandStream, RenderEnvironment, SceneHandle};
use crate::scene::{SceneSlot, SceneTracker};
use crate::simulator::{Simulator, StepInfo};

pub struct EnvironmentGroup {
    dataset: Arc<Dataset>,
    slots: Arc<Vec<SceneSlot>>,
    /// Global index of this group's first slot.
    slot_base: usize,
    envs_per_scene: usize,
    camera: CameraSpec,

    render_envs: Vec<RenderEnvironment>,
    simulators: Vec<Simulator>,
    trackers: Vec<SceneTracker>,

    rewards: Vec<f32>,
    masks: Vec<u8>,
    infos: Vec<StepInfo>,
    polars: Vec<[f32; 2]>,
}

impl EnvironmentGroup {
    /// Build a group over `initial_scenes`, one `(scene_idx, handle)` per
    /// slot in slot order starting at `slot_base`.
    pub fn new(
        dataset: Arc<Dataset>,
        slots: Arc<Vec<SceneSlot>>,
        slot_base: usize,
        initial_scenes: Vec<(u32, SceneHandle)>,
        envs_per_scene: usize,
        camera: CameraSpec,
    ) -> Self {
        let num_envs = envs_per_scene * initial_scenes.len();

        let mut render_envs = Vec::with_capacity(num_envs);
        let mut simulators = Vec::with_capacity(num_envs);
        let mut trackers = Vec::with_capacity(num_envs);

        for (local_slot, (scene_idx, handle)) in initial_scenes.into_iter().enumerate() {
            for _ in 0..envs_per_scene {
                render_envs.push(RenderEnvironment::new(handle.clone(), camera));
                simulators.push(Simulator::new(dataset.clone(), scene_idx));
                trackers.push(SceneTracker::new(slot_base + local_slot, scene_idx));
            }
        }

        Self {
            dataset,
            slots,
            slot_base,
            envs_per_scene,
            camera,
            render_envs,
            simulators,
            trackers,
            rewards: vec![0.0; num_envs],
            masks: vec![0; num_envs],
            infos: vec![StepInfo::default(); num_envs],
            polars: vec![[0.0, 0.0]; num_envs],
        }
    }

    #[inline]
    pub fn num_envs(&self) -> usize {
        self.render_envs.len()
    }

    /// Global slot index owning an environment.
    #[inline]
    pub fn slot_of(&self, env_idx: usize) -> usize {
        self.slot_base + env_idx / self.envs_per_scene
    }

    #[inline]
    pub fn scene_of(&self, env_idx: usize) -> u32 {
        self.simulators[env_idx].scene_idx()
    }

    /// Step one environment and record its outputs. Returns done.
    pub fn step(&mut self, env_idx: usize, action: i64, pathfinders: &mut PathfinderSet) -> bool {
        let sim = &mut self.simulators[env_idx];
        let pathfinder = pathfinders.get_mut(sim.scene_idx());
        let out = sim.step(action, &mut self.render_envs[env_idx], pathfinder);

        self.rewards[env_idx] = out.reward;
        self.masks[env_idx] = if out.done { 0 } else { 1 };
        self.infos[env_idx] = out.info;
        self.polars[env_idx] = out.polar;

        out.done
    }

    /// Reset one environment to a fresh episode.
    pub fn reset(
        &mut self,
        env_idx: usize,
        pathfinders: &mut PathfinderSet,
        rng: &mut Xoshiro256StarStar,
    ) {
        let sim = &mut self.simulators[env_idx];
        let pathfinder = pathfinders.get_mut(sim.scene_idx());
        self.polars[env_idx] = sim.reset(&mut self.render_envs[env_idx], pathfinder, rng);
    }

    /// True when the environment's slot has rotated away from the scene the
    /// environment last synced to and the replacement assets are resident.
    pub fn swap_ready(&self, env_idx: usize) -> bool {
        let slot = &self.slots[self.slot_of(env_idx)];
        slot.has_pending() && !self.trackers[env_idx].is_consistent(&self.slots)
    }

    /// Re-home a terminated environment onto its slot's pending scene:
    /// rebuild the renderer handle, replace the simulator against the new
    /// episode span, re-sync the tracker, and count the migration.
    ///
    /// Only call when [`Self::swap_ready`] holds and the environment just
    /// finished an episode, so episode context changes at episode
    /// boundaries only.
    pub fn swap_scene(&mut self, env_idx: usize) {
        let slot_idx = self.slot_of(env_idx);
        let scene = self.slots[slot_idx]
            .pending_scene()
            .expect("swap_scene without a pending scene");

        let tracker = &mut self.trackers[env_idx];
        tracker.update(&self.slots);
        let scene_idx = tracker.current_scene();

        self.render_envs[env_idx] = RenderEnvironment::new(scene, self.camera);
        self.simulators[env_idx] = Simulator::new(self.dataset.clone(), scene_idx);
        self.slots[slot_idx].one_loaded();
    }

    /// Submit every environment's view matrix to the renderer.
    pub fn render(&self, stream: &mut dyn CommandStream, group_idx: usize) -> Result<()> {
        stream.render(group_idx, &self.render_envs)
    }

    // ========================================================================
    // Output views
    // ========================================================================

    #[inline]
    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    #[inline]
    pub fn masks(&self) -> &[u8] {
        &self.masks
    }

    #[inline]
    pub fn infos(&self) -> &[StepInfo] {
        &self.infos
    }

    #[inline]
    pub fn polars(&self) -> &[[f32; 2]] {
        &self.polars
    }
}
