//! The rollout scheduler: worker threads, the fast step barrier, and the
//! public step/reset/render surface.
//!
//! Per step, the coordinator installs any freshly loaded scenes, publishes
//! the action vector, and releases every worker with a single generation
//! bump. Workers (the coordinator included) pull environment indices from a
//! shared fetch-add queue, advance their simulators, re-home terminated
//! environments whose slot has a pending scene, and count themselves
//! finished. The coordinator then rotates completed slots and submits the
//! group to the renderer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use crate::config::RolloutConfig;
use crate::dataset::Dataset;
use crate::error::{Result, RolloutError};
use crate::group::EnvironmentGroup;
use crate::metrics::{SwapStats, ThroughputTracker};
use crate::parallel::SyncPtr;
use crate::pathfinder::{PathfinderProvider, PathfinderSet};
use crate::render::{CameraSpec, CommandStream, GpuHandle, RenderOptions, Renderer};
use crate::scene::{BackgroundSceneLoader, SceneSlot, SceneSwapper};
use crate::simulator::StepInfo;

// ============================================================================
// Shared barrier state
// ============================================================================

/// One released unit of work: which group steps and whether it resets.
#[derive(Clone, Copy, Debug)]
struct Phase {
    generation: u64,
    group_idx: usize,
    reset: bool,
}

/// State shared between the coordinator and the simulation workers.
struct WorkerShared {
    /// Release toggle: bumping `generation` under the lock wakes all
    /// workers for one step.
    phase: Mutex<Phase>,
    release: Condvar,
    /// Work-stealing queue over environment indices.
    next_env: AtomicUsize,
    /// Completion counter; the step is over when it reaches `participants`.
    finished: AtomicUsize,
    exit: AtomicBool,
    envs_per_group: usize,
    /// Spawned workers plus the coordinator.
    participants: usize,
}

/// Claim environments off the shared queue until it drains.
fn drain_claims(
    shared: &WorkerShared,
    groups: SyncPtr<EnvironmentGroup>,
    actions: SyncPtr<i64>,
    phase: Phase,
    pathfinders: &mut PathfinderSet,
    rng: &mut Xoshiro256StarStar,
) {
    loop {
        let env_idx = shared.next_env.fetch_add(1, Ordering::Relaxed);
        if env_idx >= shared.envs_per_group {
            break;
        }

        // SAFETY: each env_idx is handed to exactly one thread by the
        // fetch_add above, all per-environment state and output slots are
        // indexed by env_idx, and the coordinator keeps the group storage
        // alive and untouched between release and join.
        let group = unsafe { &mut *groups.at(phase.group_idx) };

        if phase.reset {
            group.reset(env_idx, pathfinders, rng);
        } else {
            // SAFETY: the action buffer holds envs_per_group entries and is
            // only written before workers are released.
            let action = unsafe { *actions.at(env_idx) };
            let done = group.step(env_idx, action, pathfinders);
            if done {
                if group.swap_ready(env_idx) {
                    group.swap_scene(env_idx);
                }
                group.reset(env_idx, pathfinders, rng);
            }
        }
    }
}

/// Count this thread finished; true when it was the last one.
fn finish(shared: &WorkerShared) -> bool {
    shared.finished.fetch_add(1, Ordering::AcqRel) + 1 == shared.participants
}

// ============================================================================
// Worker threads
// ============================================================================

struct WorkerContext {
    worker_id: usize,
    seed: u64,
    core: Option<core_affinity::CoreId>,
    shared: Arc<WorkerShared>,
    groups: SyncPtr<EnvironmentGroup>,
    actions: SyncPtr<i64>,
    dataset: Arc<Dataset>,
    provider: Arc<dyn PathfinderProvider>,
}

fn worker_loop(ctx: WorkerContext) {
    if let Some(core) = ctx.core {
        core_affinity::set_for_current(core);
    }

    // Pathfinders are not thread-safe; every worker owns a full set. The
    // coordinator already validated these paths, so failure here is a bug.
    let mut pathfinders = PathfinderSet::load_all(&*ctx.provider, &ctx.dataset)
        .unwrap_or_else(|e| panic!("worker {} pathfinder load: {}", ctx.worker_id, e));
    let mut rng = Xoshiro256StarStar::seed_from_u64(ctx.seed);
    let mut last_generation = 0u64;

    loop {
        let phase = {
            let mut guard = ctx.shared.phase.lock();
            while guard.generation == last_generation && !ctx.shared.exit.load(Ordering::Acquire)
            {
                ctx.shared.release.wait(&mut guard);
            }
            if ctx.shared.exit.load(Ordering::Acquire) {
                return;
            }
            last_generation = guard.generation;
            *guard
        };

        drain_claims(
            &ctx.shared,
            ctx.groups,
            ctx.actions,
            phase,
            &mut pathfinders,
            &mut rng,
        );
        finish(&ctx.shared);
    }
}

// ============================================================================
// Rollout generator
// ============================================================================

/// A fixed-size pool of navigation environments advancing in lockstep under
/// an external policy, with background scene rotation.
pub struct RolloutGenerator {
    dataset: Arc<Dataset>,
    _renderer: Box<dyn Renderer>,
    stream: Box<dyn CommandStream>,

    slots: Arc<Vec<SceneSlot>>,
    swappers: Vec<SceneSwapper>,
    inactive_scenes: Vec<u32>,

    groups: Box<[EnvironmentGroup]>,
    actions: Box<[i64]>,
    groups_ptr: SyncPtr<EnvironmentGroup>,
    actions_ptr: SyncPtr<i64>,

    shared: Arc<WorkerShared>,
    workers: Vec<JoinHandle<()>>,
    in_flight: Option<Phase>,

    main_pathfinders: PathfinderSet,
    main_rng: Xoshiro256StarStar,
    rng: Xoshiro256StarStar,

    num_environments: usize,
    envs_per_group: usize,

    total_steps: u64,
    swap_steps: u64,
    throughput: ThroughputTracker,
}

impl RolloutGenerator {
    /// Build the full environment pool: dataset, renderer, scene slots,
    /// loader threads, groups, and pinned simulation workers.
    pub fn new<F>(
        config: RolloutConfig,
        make_renderer: F,
        provider: Arc<dyn PathfinderProvider>,
    ) -> Result<Self>
    where
        F: FnOnce(&RenderOptions) -> Result<Box<dyn Renderer>>,
    {
        config.validate()?;

        let num_groups = config.num_groups();
        let num_workers = config.resolved_workers();
        let envs_per_group = config.num_environments / num_groups;
        let envs_per_scene = config.num_environments / config.num_active_scenes;
        let scenes_per_group = config.num_active_scenes / num_groups;

        let dataset = Arc::new(Dataset::load(
            &config.dataset_dir,
            &config.asset_dir,
            (num_workers + 1).max(1),
        )?);

        if dataset.num_scenes() < config.num_active_scenes {
            return Err(RolloutError::InvalidConfig {
                param: "num_active_scenes".to_string(),
                message: format!(
                    "{} active scenes requested but the dataset has {}",
                    config.num_active_scenes,
                    dataset.num_scenes()
                ),
            });
        }

        let renderer = make_renderer(&RenderOptions {
            gpu_id: config.gpu_id,
            batch_size: envs_per_group,
            resolution: config.render_resolution,
            color: config.color,
            depth: config.depth,
            double_buffered: config.double_buffered,
        })?;
        let stream = renderer.make_stream()?;

        let mut rng = Xoshiro256StarStar::seed_from_u64(config.seed);

        // Reservoir-style selection of the initial active set.
        let num_scenes = dataset.num_scenes() as u32;
        let mut active_scenes: Vec<u32> = Vec::with_capacity(config.num_active_scenes);
        let mut inactive_scenes: Vec<u32> =
            Vec::with_capacity(dataset.num_scenes() - config.num_active_scenes);
        let mut scene_idx = 0u32;
        while scene_idx < num_scenes && active_scenes.len() < config.num_active_scenes {
            let weight: f32 = rng.gen();
            let remaining_slots = (config.num_active_scenes - active_scenes.len()) as f32;
            if weight * ((num_scenes - scene_idx) as f32) < remaining_slots {
                active_scenes.push(scene_idx);
            } else {
                inactive_scenes.push(scene_idx);
            }
            scene_idx += 1;
        }
        for idx in scene_idx..num_scenes {
            inactive_scenes.push(idx);
        }

        let cores = if config.set_affinity {
            core_affinity::get_core_ids().filter(|c| !c.is_empty())
        } else {
            None
        };
        if let Some(cores) = &cores {
            // The coordinator doubles as worker 0 on core 0.
            core_affinity::set_for_current(cores[0]);
        }

        let slots: Arc<Vec<SceneSlot>> = Arc::new(
            active_scenes
                .iter()
                .map(|&scene_idx| SceneSlot::new(scene_idx))
                .collect(),
        );

        // One background loader per slot, pinned to the tail of the CPU set
        // away from the simulation workers.
        let mut swappers = Vec::with_capacity(slots.len());
        for slot_idx in 0..slots.len() {
            let loader_core = cores
                .as_ref()
                .map(|cores| cores[cores.len() - 1 - (slot_idx % cores.len())]);
            let loader = BackgroundSceneLoader::spawn(
                format!("SceneLoader-{}", slot_idx),
                renderer.make_loader()?,
                loader_core,
                config.min_load_interval,
            );
            swappers.push(SceneSwapper::new(slot_idx, loader, envs_per_scene as u32));
        }

        // Initial scene residency, loaded through each slot's own loader.
        let mut initial_scenes = Vec::with_capacity(slots.len());
        for (slot_idx, &scene_idx) in active_scenes.iter().enumerate() {
            let handle = swappers[slot_idx].load_blocking(dataset.scene_path(scene_idx))?;
            initial_scenes.push((scene_idx, handle));
        }

        let camera = CameraSpec::default();
        let mut groups = Vec::with_capacity(num_groups);
        let mut initial_iter = initial_scenes.into_iter();
        for group_idx in 0..num_groups {
            let group_scenes: Vec<_> = initial_iter.by_ref().take(scenes_per_group).collect();
            groups.push(EnvironmentGroup::new(
                dataset.clone(),
                slots.clone(),
                group_idx * scenes_per_group,
                group_scenes,
                envs_per_scene,
                camera,
            ));
        }
        let mut groups: Box<[EnvironmentGroup]> = groups.into_boxed_slice();
        let mut actions: Box<[i64]> = vec![0i64; envs_per_group].into_boxed_slice();

        // Validates every navmesh before any worker races ahead.
        let main_pathfinders = PathfinderSet::load_all(&*provider, &dataset)?;

        let shared = Arc::new(WorkerShared {
            phase: Mutex::new(Phase {
                generation: 0,
                group_idx: 0,
                reset: false,
            }),
            release: Condvar::new(),
            next_env: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            exit: AtomicBool::new(false),
            envs_per_group,
            participants: num_workers + 1,
        });

        // SAFETY: both boxed slices live as long as the generator, whose
        // Drop joins every worker before the storage is freed.
        let groups_ptr = unsafe { SyncPtr::new(groups.as_mut_ptr()) };
        let actions_ptr = unsafe { SyncPtr::new(actions.as_mut_ptr()) };

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 1..=num_workers {
            let ctx = WorkerContext {
                worker_id,
                seed: config.seed.wrapping_add(1 + worker_id as u64),
                core: cores
                    .as_ref()
                    .map(|cores| cores[worker_id % cores.len()]),
                shared: shared.clone(),
                groups: groups_ptr,
                actions: actions_ptr,
                dataset: dataset.clone(),
                provider: provider.clone(),
            };
            workers.push(
                thread::Builder::new()
                    .name(format!("SimWorker-{}", worker_id))
                    .spawn(move || worker_loop(ctx))
                    .expect("Failed to spawn simulation worker thread"),
            );
        }

        let mut generator = Self {
            dataset,
            _renderer: renderer,
            stream,
            slots,
            swappers,
            inactive_scenes,
            groups,
            actions,
            groups_ptr,
            actions_ptr,
            shared,
            workers,
            in_flight: None,
            main_pathfinders,
            main_rng: Xoshiro256StarStar::seed_from_u64(config.seed.wrapping_add(1)),
            rng,
            num_environments: config.num_environments,
            envs_per_group,
            total_steps: 0,
            swap_steps: 0,
            throughput: ThroughputTracker::new(),
        };

        // Kick off the first rotation for every slot; post_step chains the
        // rest forever.
        for swapper in &mut generator.swappers {
            swapper.start_swap(
                &generator.slots,
                &mut generator.inactive_scenes,
                &generator.dataset,
                &mut generator.rng,
            );
        }

        Ok(generator)
    }

    #[inline]
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn envs_per_group(&self) -> usize {
        self.envs_per_group
    }

    #[inline]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Reset every environment in a group and render the first frames.
    pub fn reset(&mut self, group_idx: usize) -> Result<()> {
        self.release(group_idx, true);
        self.join_step();
        self.render(group_idx)
    }

    /// Advance one step: `step_start` + `step_end` + `render`.
    pub fn step(&mut self, group_idx: usize, actions: &[i64]) -> Result<()> {
        self.step_start(group_idx, actions)?;
        self.step_end(group_idx);
        self.render(group_idx)
    }

    /// Install any freshly loaded scenes and release the workers on a
    /// group.
    pub fn step_start(&mut self, group_idx: usize, actions: &[i64]) -> Result<()> {
        assert_eq!(
            actions.len(),
            self.envs_per_group,
            "actions length {} != envs per group {}",
            actions.len(),
            self.envs_per_group
        );

        for swapper in &mut self.swappers {
            swapper.pre_step(&self.slots)?;
        }

        self.actions.copy_from_slice(actions);
        self.release(group_idx, false);
        Ok(())
    }

    /// Join the step as worker 0, wait for the stragglers, and rotate any
    /// slot whose migration completed.
    pub fn step_end(&mut self, group_idx: usize) {
        let phase = self.join_step();
        assert_eq!(
            phase.group_idx, group_idx,
            "step_end group {} does not match released group {}",
            group_idx, phase.group_idx
        );

        let mut any_completed = false;
        for swapper in &mut self.swappers {
            any_completed |= swapper.post_step(
                &self.slots,
                &mut self.inactive_scenes,
                &self.dataset,
                &mut self.rng,
            );
        }

        self.total_steps += 1;
        if any_completed {
            self.swap_steps += 1;
        }
        self.throughput.record(self.envs_per_group);
    }

    /// Submit the group's view matrices to the renderer command stream.
    pub fn render(&mut self, group_idx: usize) -> Result<()> {
        assert!(
            self.in_flight.is_none(),
            "render while a step is in flight"
        );
        self.groups[group_idx].render(&mut *self.stream, group_idx)
    }

    /// Block until the GPU signals the group's frame.
    pub fn wait_for_frame(&mut self, group_idx: usize) -> Result<()> {
        self.stream.wait_frame(group_idx)
    }

    fn release(&mut self, group_idx: usize, reset: bool) {
        assert!(
            self.in_flight.is_none(),
            "released a step while the previous one is incomplete"
        );
        assert!(group_idx < self.groups.len(), "invalid group {}", group_idx);

        self.shared.finished.store(0, Ordering::Relaxed);
        self.shared.next_env.store(0, Ordering::Relaxed);

        let phase = {
            let mut guard = self.shared.phase.lock();
            guard.generation += 1;
            guard.group_idx = group_idx;
            guard.reset = reset;
            *guard
        };
        self.shared.release.notify_all();
        self.in_flight = Some(phase);
    }

    fn join_step(&mut self) -> Phase {
        let phase = self
            .in_flight
            .take()
            .expect("step_end without a matching step_start");

        // Same claim discipline as the workers.
        drain_claims(
            &self.shared,
            self.groups_ptr,
            self.actions_ptr,
            phase,
            &mut self.main_pathfinders,
            &mut self.main_rng,
        );

        if !finish(&self.shared) {
            while self.shared.finished.load(Ordering::Acquire) < self.shared.participants {
                std::hint::spin_loop();
            }
        }

        phase
    }

    // ========================================================================
    // Output views
    // ========================================================================
    //
    // Element order is stable for the generator's lifetime. Read between
    // steps only; workers own the buffers while a step is in flight.

    pub fn rewards(&self, group_idx: usize) -> &[f32] {
        self.groups[group_idx].rewards()
    }

    pub fn masks(&self, group_idx: usize) -> &[u8] {
        self.groups[group_idx].masks()
    }

    pub fn infos(&self, group_idx: usize) -> &[StepInfo] {
        self.groups[group_idx].infos()
    }

    pub fn polars(&self, group_idx: usize) -> &[[f32; 2]] {
        self.groups[group_idx].polars()
    }

    pub fn rgba(&self, group_idx: usize) -> GpuHandle {
        self.stream.color_ptr(group_idx)
    }

    pub fn depth(&self, group_idx: usize) -> GpuHandle {
        self.stream.depth_ptr(group_idx)
    }

    pub fn cuda_semaphore(&self, group_idx: usize) -> GpuHandle {
        self.stream.cuda_semaphore(group_idx)
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Scene-rotation statistics. Call between steps.
    pub fn swap_stats(&self) -> SwapStats {
        debug_assert!(self.in_flight.is_none());

        let mut scenes: Vec<u32> = self
            .groups
            .iter()
            .flat_map(|group| (0..group.num_envs()).map(move |idx| group.scene_of(idx)))
            .collect();
        scenes.sort_unstable();
        scenes.dedup();

        SwapStats {
            swap_step_fraction: if self.total_steps == 0 {
                0.0
            } else {
                self.swap_steps as f32 / self.total_steps as f32
            },
            scenes_in_flight: scenes.len(),
            mean_envs_per_scene: self.num_environments as f32 / scenes.len().max(1) as f32,
        }
    }

    /// Environment steps per second over the generator's lifetime.
    pub fn steps_per_sec(&self) -> f64 {
        self.throughput.steps_per_sec()
    }
}

impl Drop for RolloutGenerator {
    fn drop(&mut self) {
        {
            // Taking the lock orders the exit flag against worker predicate
            // checks, so no wakeup is missed.
            let _guard = self.shared.phase.lock();
            self.shared.exit.store(true, Ordering::Release);
        }
        self.shared.release.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
