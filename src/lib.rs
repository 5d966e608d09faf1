//! # pointnav_rollout: Batched Rollout Generation for Visual Navigation
//!
//! High-throughput parallel environment stepping for point-goal navigation
//! training. A fixed pool of simulated agents advances in lockstep under an
//! external policy while background threads rotate 3D scene assets through
//! GPU memory without stalling the step loop.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        RolloutGenerator                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Main (worker 0)     Worker 1          Worker N                     │
//! │  ┌──────────┐        ┌──────────┐      ┌──────────┐                │
//! │  │ release  │──────▶ │ claim    │ ...  │ claim    │                │
//! │  │ claim    │        │ env idx  │      │ env idx  │                │
//! │  │ join     │◀────── │ step/    │      │ step/    │                │
//! │  └────┬─────┘        │ reset    │      │ reset    │                │
//! │       │              └──────────┘      └──────────┘                │
//! │       ▼                                                             │
//! │  ┌──────────────┐    ┌───────────────┐   ┌───────────────┐         │
//! │  │ CommandStream│    │ SceneSwapper 0│...│ SceneSwapper K│         │
//! │  │ (renderer)   │    │ loader thread │   │ loader thread │         │
//! │  └──────────────┘    └───────────────┘   └───────────────┘         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per step: the policy hands over an action vector, the coordinator
//! releases all workers with one generation bump, workers pull environments
//! off a shared fetch-add queue and advance their simulators, terminated
//! environments opportunistically migrate onto freshly loaded scenes, and
//! the coordinator submits the group's view matrices to the renderer.
//!
//! The GPU renderer, asset loader, and navmesh engine are external
//! collaborators behind the [`render::Renderer`] and
//! [`pathfinder::Pathfinder`] traits.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pointnav_rollout::{RolloutConfig, RolloutGenerator};
//!
//! let config = RolloutConfig::new("data/episodes", "data/assets")
//!     .with_num_environments(256)
//!     .with_num_active_scenes(8)
//!     .with_double_buffered(true);
//!
//! let mut gen = RolloutGenerator::new(config, make_gpu_renderer, navmesh_provider)?;
//! gen.reset(0)?;
//! loop {
//!     let actions = policy.act(gen.polars(0));
//!     gen.step(0, &actions)?;
//!     gen.wait_for_frame(0)?;
//!     learner.observe(gen.rewards(0), gen.masks(0), gen.infos(0));
//! }
//! ```

pub mod config;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod group;
pub mod math;
pub mod metrics;
pub mod parallel;
pub mod pathfinder;
pub mod render;
pub mod rollout;
pub mod scene;
pub mod simulator;

pub use config::RolloutConfig;
pub use dataset::{Dataset, Episode, SceneMetadata};
pub use error::{Result, RolloutError};
pub use group::EnvironmentGroup;
pub use math::{Mat4, Quat, Vec3};
pub use metrics::{SwapStats, ThroughputTracker};
pub use pathfinder::{OpenFloor, OpenFloorProvider, Pathfinder, PathfinderProvider, PathfinderSet};
pub use render::{
    AssetLoader, CameraSpec, CommandStream, GpuHandle, HeadlessRenderer, RenderEnvironment,
    RenderOptions, Renderer, SceneAsset, SceneHandle,
};
pub use rollout::RolloutGenerator;
pub use scene::{BackgroundSceneLoader, SceneSlot, SceneSwapper, SceneTracker};
pub use simulator::{SimAction, Simulator, StepInfo, StepOutcome};
