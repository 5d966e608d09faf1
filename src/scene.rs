//! Background scene loading and active-slot rotation.
//!
//! Each active-scene slot owns a [`SceneSwapper`] that walks the slot
//! through the inactive scene pool forever: pick a replacement, load it on a
//! background thread, install it as the slot's pending scene, then wait for
//! every environment on the slot to migrate before starting over. The step
//! loop never blocks on a load.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::render::{AssetLoader, SceneHandle};

// ============================================================================
// Background loader
// ============================================================================

struct LoadRequest {
    path: PathBuf,
    reply: Sender<Result<SceneHandle>>,
}

/// In-flight scene load.
pub struct SceneFuture {
    rx: Receiver<Result<SceneHandle>>,
}

impl SceneFuture {
    /// Take the result if the load has finished.
    pub fn try_take(&self) -> Option<Result<SceneHandle>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                panic!("scene loader thread dropped a pending request")
            }
        }
    }

    /// Block until the load finishes.
    pub fn wait(self) -> Result<SceneHandle> {
        self.rx
            .recv()
            .unwrap_or_else(|_| panic!("scene loader thread dropped a pending request"))
    }
}

/// A dedicated loader thread serializing scene uploads for one slot.
///
/// The thread is pinned to a core at the tail of the CPU set and reniced so
/// asset decoding never competes with simulation workers. Successive loads
/// are spaced at least `min_interval` apart to bound GPU upload churn.
pub struct BackgroundSceneLoader {
    requests: Option<Sender<LoadRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundSceneLoader {
    pub fn spawn(
        name: String,
        mut loader: Box<dyn AssetLoader>,
        core: Option<core_affinity::CoreId>,
        min_interval: Duration,
    ) -> Self {
        let (tx, rx) = unbounded::<LoadRequest>();

        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || {
                if let Some(core) = core {
                    core_affinity::set_for_current(core);
                }
                #[cfg(unix)]
                unsafe {
                    libc::nice(19);
                }

                let mut last_load: Option<Instant> = None;
                while let Ok(request) = rx.recv() {
                    if let Some(last) = last_load {
                        let elapsed = last.elapsed();
                        if elapsed < min_interval {
                            thread::sleep(min_interval - elapsed);
                        }
                    }
                    last_load = Some(Instant::now());

                    let result = loader.load_scene(&request.path);
                    // A dropped future just means nobody is waiting anymore.
                    let _ = request.reply.send(result);
                }
            })
            .expect("Failed to spawn scene loader thread");

        Self {
            requests: Some(tx),
            thread: Some(thread),
        }
    }

    /// Queue an asynchronous load.
    pub fn load_async(&self, path: &Path) -> SceneFuture {
        let (reply, rx) = bounded(1);
        self.requests
            .as_ref()
            .expect("scene loader already shut down")
            .send(LoadRequest {
                path: path.to_path_buf(),
                reply,
            })
            .expect("scene loader thread terminated");
        SceneFuture { rx }
    }

    /// Load synchronously (startup path).
    pub fn load_blocking(&self, path: &Path) -> Result<SceneHandle> {
        self.load_async(path).wait()
    }
}

impl Drop for BackgroundSceneLoader {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread and ends its loop.
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ============================================================================
// Scene slots
// ============================================================================

/// Shared per-slot state read by workers and written by the coordinator.
///
/// `active_scene` is only stored by the main thread between worker releases;
/// workers read it through their [`SceneTracker`]s during the step.
pub struct SceneSlot {
    active_scene: AtomicU32,
    pending: Mutex<Option<SceneHandle>>,
    envs_to_migrate: AtomicU32,
}

impl SceneSlot {
    pub fn new(scene_idx: u32) -> Self {
        Self {
            active_scene: AtomicU32::new(scene_idx),
            pending: Mutex::new(None),
            envs_to_migrate: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn active_scene(&self) -> u32 {
        self.active_scene.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Clone the pending scene handle, if installed.
    #[inline]
    pub fn pending_scene(&self) -> Option<SceneHandle> {
        self.pending.lock().clone()
    }

    /// Record one environment's migration onto the pending scene.
    #[inline]
    pub fn one_loaded(&self) {
        self.envs_to_migrate.fetch_sub(1, Ordering::Release);
    }

    #[inline]
    pub fn envs_to_migrate(&self) -> u32 {
        self.envs_to_migrate.load(Ordering::Acquire)
    }
}

#[cfg(test)]
impl SceneSlot {
    /// Force a rotated slot with an installed pending scene.
    pub(crate) fn install_for_tests(
        &self,
        scene_idx: u32,
        envs_to_migrate: u32,
        handle: SceneHandle,
    ) {
        self.active_scene.store(scene_idx, Ordering::Relaxed);
        self.envs_to_migrate
            .store(envs_to_migrate, Ordering::Release);
        *self.pending.lock() = Some(handle);
    }
}

/// Per-environment cursor detecting slot rotation.
///
/// Holds the slot index and the scene index it last synced to; trackers
/// read the slot table and never mutate it.
#[derive(Clone, Copy, Debug)]
pub struct SceneTracker {
    slot: usize,
    last_seen: u32,
}

impl SceneTracker {
    pub fn new(slot: usize, scene_idx: u32) -> Self {
        Self {
            slot,
            last_seen: scene_idx,
        }
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// True while the slot still points at the scene this tracker last saw.
    #[inline]
    pub fn is_consistent(&self, slots: &[SceneSlot]) -> bool {
        slots[self.slot].active_scene() == self.last_seen
    }

    /// Re-sync to the slot's current scene.
    #[inline]
    pub fn update(&mut self, slots: &[SceneSlot]) {
        self.last_seen = slots[self.slot].active_scene();
    }

    /// Scene index observed at the last sync.
    #[inline]
    pub fn current_scene(&self) -> u32 {
        self.last_seen
    }
}

// ============================================================================
// Scene swapper
// ============================================================================

/// Drives one slot through the inactive scene pool.
pub struct SceneSwapper {
    slot_idx: usize,
    loader: BackgroundSceneLoader,
    next_scene: Option<SceneFuture>,
    envs_per_scene: u32,
}

impl SceneSwapper {
    pub fn new(slot_idx: usize, loader: BackgroundSceneLoader, envs_per_scene: u32) -> Self {
        Self {
            slot_idx,
            loader,
            next_scene: None,
            envs_per_scene,
        }
    }

    #[inline]
    pub fn slot_idx(&self) -> usize {
        self.slot_idx
    }

    /// Synchronous load through this slot's loader thread (startup path).
    pub fn load_blocking(&self, path: &Path) -> Result<SceneHandle> {
        self.loader.load_blocking(path)
    }

    /// True when neither a load nor a pending scene is outstanding.
    pub fn can_swap(&self, slots: &[SceneSlot]) -> bool {
        self.next_scene.is_none() && !slots[self.slot_idx].has_pending()
    }

    /// Rotate the slot: pick a uniform random inactive scene, swap it with
    /// the slot's active index, and queue the asset load. A no-op when the
    /// inactive pool is empty.
    pub fn start_swap(
        &mut self,
        slots: &[SceneSlot],
        inactive_scenes: &mut [u32],
        dataset: &Dataset,
        rng: &mut Xoshiro256StarStar,
    ) {
        debug_assert!(self.can_swap(slots));
        if inactive_scenes.is_empty() {
            return;
        }

        let slot = &slots[self.slot_idx];
        let pick = rng.gen_range(0..inactive_scenes.len());
        let new_scene = std::mem::replace(&mut inactive_scenes[pick], slot.active_scene());
        slot.active_scene.store(new_scene, Ordering::Relaxed);

        self.next_scene = Some(self.loader.load_async(dataset.scene_path(new_scene)));
    }

    /// Install a finished load as the slot's pending scene and arm the
    /// migration counter. Called by the coordinator before releasing
    /// workers.
    pub fn pre_step(&mut self, slots: &[SceneSlot]) -> Result<()> {
        let ready = match &self.next_scene {
            Some(future) => future.try_take(),
            None => None,
        };
        if let Some(result) = ready {
            self.next_scene = None;
            let handle = result?;
            let slot = &slots[self.slot_idx];
            slot.envs_to_migrate
                .store(self.envs_per_scene, Ordering::Release);
            *slot.pending.lock() = Some(handle);
        }
        Ok(())
    }

    /// Drop the pending scene once every environment has migrated, then
    /// immediately begin the next rotation. Returns whether a swap
    /// completed. Called by the coordinator after workers finish.
    pub fn post_step(
        &mut self,
        slots: &[SceneSlot],
        inactive_scenes: &mut [u32],
        dataset: &Dataset,
        rng: &mut Xoshiro256StarStar,
    ) -> bool {
        let slot = &slots[self.slot_idx];
        {
            let mut pending = slot.pending.lock();
            if pending.is_none() || slot.envs_to_migrate() != 0 {
                return false;
            }
            *pending = None;
        }
        self.start_swap(slots, inactive_scenes, dataset, rng);
        true
    }
}
