//! Navmesh pathfinding interface.
//!
//! Pathfinder implementations are external and are not safe to share
//! between threads, so the scheduler gives every worker thread (the main
//! thread included) its own complete [`PathfinderSet`] with one pathfinder
//! per scene. Duplication removes all query contention.

use std::path::Path;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::math::Vec3;

/// Collision-aware navigation queries against one scene's navmesh.
///
/// Queries take `&mut self`: implementations keep internal scratch state and
/// must never be shared across threads.
pub trait Pathfinder: Send {
    /// Nearest point on the navmesh.
    fn snap_point(&mut self, point: Vec3) -> Vec3;

    /// Collision-clipped movement from `current` toward `desired`; may
    /// return `current` unchanged when the move is fully blocked.
    fn try_step(&mut self, current: Vec3, desired: Vec3) -> Vec3;

    /// Geodesic distance between two navmesh points. NaN or infinity when
    /// no path exists; callers propagate the value as-is.
    fn find_path(&mut self, start: Vec3, end: Vec3) -> f32;
}

/// Factory for per-worker pathfinder instances.
pub trait PathfinderProvider: Send + Sync {
    fn load(&self, navmesh_path: &Path) -> Result<Box<dyn Pathfinder>>;
}

/// One pathfinder per scene, owned by a single worker thread.
pub struct PathfinderSet {
    by_scene: Vec<Box<dyn Pathfinder>>,
}

impl PathfinderSet {
    /// Load a pathfinder for every scene in the dataset.
    pub fn load_all(provider: &dyn PathfinderProvider, dataset: &Dataset) -> Result<Self> {
        let mut by_scene = Vec::with_capacity(dataset.num_scenes());
        for scene_idx in 0..dataset.num_scenes() as u32 {
            by_scene.push(provider.load(dataset.navmesh_path(scene_idx))?);
        }
        Ok(Self { by_scene })
    }

    #[inline]
    pub fn get_mut(&mut self, scene_idx: u32) -> &mut dyn Pathfinder {
        &mut *self.by_scene[scene_idx as usize]
    }

    pub fn num_scenes(&self) -> usize {
        self.by_scene.len()
    }
}

// ============================================================================
// Open Floor (reference implementation)
// ============================================================================

/// Unbounded walkable plane at y = 0. Every point snaps straight down, no
/// move is ever blocked, and geodesic distance equals straight-line distance
/// in the plane. Used by tests and throughput benchmarks.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenFloor;

impl Pathfinder for OpenFloor {
    fn snap_point(&mut self, point: Vec3) -> Vec3 {
        Vec3::new(point.x, 0.0, point.z)
    }

    fn try_step(&mut self, _current: Vec3, desired: Vec3) -> Vec3 {
        Vec3::new(desired.x, 0.0, desired.z)
    }

    fn find_path(&mut self, start: Vec3, end: Vec3) -> f32 {
        let dx = end.x - start.x;
        let dz = end.z - start.z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// Provider handing out [`OpenFloor`] pathfinders regardless of path.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenFloorProvider;

impl PathfinderProvider for OpenFloorProvider {
    fn load(&self, _navmesh_path: &Path) -> Result<Box<dyn Pathfinder>> {
        Ok(Box::new(OpenFloor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_floor_snap() {
        let mut pf = OpenFloor;
        let snapped = pf.snap_point(Vec3::new(1.0, 3.0, -2.0));
        assert_eq!(snapped, Vec3::new(1.0, 0.0, -2.0));
    }

    #[test]
    fn test_open_floor_try_step_unblocked() {
        let mut pf = OpenFloor;
        let next = pf.try_step(Vec3::ZERO, Vec3::new(0.25, 0.5, 0.0));
        assert_eq!(next, Vec3::new(0.25, 0.0, 0.0));
    }

    #[test]
    fn test_open_floor_distance_is_planar() {
        let mut pf = OpenFloor;
        let d = pf.find_path(Vec3::ZERO, Vec3::new(3.0, 7.0, 4.0));
        assert!((d - 5.0).abs() < 1e-6);
    }
}
