//! Rollout generator configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, RolloutError};

/// Configuration for a [`crate::RolloutGenerator`] using the builder pattern.
///
/// # Example
/// ```ignore
/// let config = RolloutConfig::new("data/pointnav", "data/assets")
///     .with_num_environments(256)
///     .with_num_active_scenes(8)
///     .with_double_buffered(true)
///     .with_seed(7);
/// ```
#[derive(Clone, Debug)]
pub struct RolloutConfig {
    /// Directory of `*.json.gz` episode files.
    pub dataset_dir: PathBuf,
    /// Directory holding `.bps` meshes and `.navmesh` files.
    pub asset_dir: PathBuf,
    /// Total simulated environments across all groups.
    pub num_environments: usize,
    /// Scene slots resident on the GPU at once.
    pub num_active_scenes: usize,
    /// Simulation worker threads to spawn in addition to the main thread;
    /// -1 picks `available_parallelism() - 1`.
    pub num_workers: i32,
    /// GPU ordinal handed to the renderer.
    pub gpu_id: i32,
    /// Render resolution (width, height).
    pub render_resolution: [u32; 2],
    /// Produce color buffers.
    pub color: bool,
    /// Produce depth buffers.
    pub depth: bool,
    /// Split environments into two groups that alternate stepping and
    /// rendering.
    pub double_buffered: bool,
    /// Base RNG seed.
    pub seed: u64,
    /// Pin threads to dedicated CPU cores (best effort).
    pub set_affinity: bool,
    /// Minimum interval between successive scene loads on one background
    /// loader, limiting GPU upload churn.
    pub min_load_interval: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::new(),
            asset_dir: PathBuf::new(),
            num_environments: 64,
            num_active_scenes: 4,
            num_workers: -1,
            gpu_id: 0,
            render_resolution: [320, 240],
            color: true,
            depth: true,
            double_buffered: false,
            seed: 0,
            set_affinity: true,
            min_load_interval: Duration::from_secs(1),
        }
    }
}

impl RolloutConfig {
    /// Create a config pointing at a dataset and asset directory.
    pub fn new(dataset_dir: impl Into<PathBuf>, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            asset_dir: asset_dir.into(),
            ..Default::default()
        }
    }

    /// Set the total number of environments.
    pub fn with_num_environments(mut self, n: usize) -> Self {
        self.num_environments = n;
        self
    }

    /// Set the number of active scene slots.
    pub fn with_num_active_scenes(mut self, n: usize) -> Self {
        self.num_active_scenes = n;
        self
    }

    /// Set the worker thread count (-1 = auto).
    pub fn with_num_workers(mut self, n: i32) -> Self {
        self.num_workers = n;
        self
    }

    /// Set the GPU ordinal.
    pub fn with_gpu_id(mut self, id: i32) -> Self {
        self.gpu_id = id;
        self
    }

    /// Set the render resolution (width, height).
    pub fn with_render_resolution(mut self, width: u32, height: u32) -> Self {
        self.render_resolution = [width, height];
        self
    }

    /// Enable or disable color output.
    pub fn with_color(mut self, enabled: bool) -> Self {
        self.color = enabled;
        self
    }

    /// Enable or disable depth output.
    pub fn with_depth(mut self, enabled: bool) -> Self {
        self.depth = enabled;
        self
    }

    /// Enable double-buffered group stepping.
    pub fn with_double_buffered(mut self, enabled: bool) -> Self {
        self.double_buffered = enabled;
        self
    }

    /// Set the base RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enable or disable CPU pinning.
    pub fn with_affinity(mut self, enabled: bool) -> Self {
        self.set_affinity = enabled;
        self
    }

    /// Set the background loader rate limit.
    pub fn with_min_load_interval(mut self, interval: Duration) -> Self {
        self.min_load_interval = interval;
        self
    }

    /// Number of environment groups (2 when double buffered).
    pub fn num_groups(&self) -> usize {
        if self.double_buffered {
            2
        } else {
            1
        }
    }

    /// Worker threads to spawn, resolving -1 to the machine's parallelism
    /// minus the main thread.
    pub fn resolved_workers(&self) -> usize {
        if self.num_workers >= 0 {
            self.num_workers as usize
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            cores.saturating_sub(1).max(1)
        }
    }

    /// Validate the divisibility and range requirements.
    pub fn validate(&self) -> Result<()> {
        let groups = self.num_groups();

        if self.num_environments == 0 {
            return Err(RolloutError::InvalidConfig {
                param: "num_environments".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.num_active_scenes == 0 {
            return Err(RolloutError::InvalidConfig {
                param: "num_active_scenes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.num_environments % groups != 0 {
            return Err(RolloutError::InvalidConfig {
                param: "num_environments".to_string(),
                message: format!("{} is not a multiple of {} groups", self.num_environments, groups),
            });
        }
        if self.num_environments % self.num_active_scenes != 0 {
            return Err(RolloutError::InvalidConfig {
                param: "num_environments".to_string(),
                message: format!(
                    "{} is not a multiple of {} active scenes",
                    self.num_environments, self.num_active_scenes
                ),
            });
        }
        if self.num_active_scenes % groups != 0 {
            return Err(RolloutError::InvalidConfig {
                param: "num_active_scenes".to_string(),
                message: format!("{} is not a multiple of {} groups", self.num_active_scenes, groups),
            });
        }
        if self.num_workers < -1 {
            return Err(RolloutError::InvalidConfig {
                param: "num_workers".to_string(),
                message: format!("{} (use -1 for auto)", self.num_workers),
            });
        }
        if self.render_resolution[0] == 0 || self.render_resolution[1] == 0 {
            return Err(RolloutError::InvalidConfig {
                param: "render_resolution".to_string(),
                message: "dimensions must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(RolloutConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = RolloutConfig::new("d", "a")
            .with_num_environments(128)
            .with_num_active_scenes(8)
            .with_num_workers(4)
            .with_double_buffered(true)
            .with_seed(9);
        assert_eq!(config.num_environments, 128);
        assert_eq!(config.num_active_scenes, 8);
        assert_eq!(config.num_groups(), 2);
        assert_eq!(config.resolved_workers(), 4);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn test_rejects_non_multiple_scene_count() {
        let config = RolloutConfig::default()
            .with_num_environments(10)
            .with_num_active_scenes(4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_odd_env_count_when_double_buffered() {
        let config = RolloutConfig::default()
            .with_num_environments(9)
            .with_num_active_scenes(3)
            .with_double_buffered(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_odd_scene_count_when_double_buffered() {
        let config = RolloutConfig::default()
            .with_num_environments(12)
            .with_num_active_scenes(3)
            .with_double_buffered(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auto_workers_is_positive() {
        let config = RolloutConfig::default().with_num_workers(-1);
        assert!(config.resolved_workers() >= 1);
    }
}
