//! Interfaces to the external GPU batch renderer.
//!
//! The renderer itself lives outside this crate: it consumes per-environment
//! view matrices and scene handles and produces color/depth buffers plus a
//! GPU synchronization semaphore. These traits pin down the seam, and
//! [`HeadlessRenderer`] provides a no-GPU implementation for tests and
//! throughput benchmarks.

use std::path::Path;
use std::sync::Arc;

use crate::constants::{CAMERA_FAR, CAMERA_FOV_DEG, CAMERA_NEAR};
use crate::error::Result;
use crate::math::Mat4;

/// GPU-resident scene assets. Handles are reference counted; the last
/// environment (or pending-slot reference) to drop a handle releases the
/// assets.
pub trait SceneAsset: Send + Sync {}

/// Shared handle to a loaded scene.
pub type SceneHandle = Arc<dyn SceneAsset>;

/// Uploads a scene's assets to the GPU. One loader is owned per background
/// loader thread; implementations need not be thread-safe.
pub trait AssetLoader: Send {
    fn load_scene(&mut self, path: &Path) -> Result<SceneHandle>;
}

/// Opaque device-side pointer or semaphore surfaced to the policy side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuHandle(pub u64);

/// Per-group command submission into the renderer.
pub trait CommandStream: Send {
    /// Submit all environments' view matrices for one group.
    fn render(&mut self, group_idx: usize, envs: &[RenderEnvironment]) -> Result<()>;

    /// Block until the GPU signals completion of the group's frame.
    fn wait_frame(&mut self, group_idx: usize) -> Result<()>;

    /// Device pointer to the group's color buffer.
    fn color_ptr(&self, group_idx: usize) -> GpuHandle;

    /// Device pointer to the group's depth buffer.
    fn depth_ptr(&self, group_idx: usize) -> GpuHandle;

    /// CUDA semaphore signaled when the group's frame is done.
    fn cuda_semaphore(&self, group_idx: usize) -> GpuHandle;
}

/// Renderer-wide construction parameters.
#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub gpu_id: i32,
    /// Environments rendered per command-stream submission.
    pub batch_size: usize,
    pub resolution: [u32; 2],
    pub color: bool,
    pub depth: bool,
    pub double_buffered: bool,
}

/// The external batch renderer.
pub trait Renderer: Send {
    fn make_loader(&self) -> Result<Box<dyn AssetLoader>>;
    fn make_stream(&self) -> Result<Box<dyn CommandStream>>;
}

// ============================================================================
// Render environments
// ============================================================================

/// Camera projection parameters for one environment.
#[derive(Clone, Copy, Debug)]
pub struct CameraSpec {
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraSpec {
    fn default() -> Self {
        Self {
            fov_deg: CAMERA_FOV_DEG,
            near: CAMERA_NEAR,
            far: CAMERA_FAR,
        }
    }
}

/// One environment's renderer-side state: the scene it draws and the camera
/// view into it. Rebuilt from scratch when the environment migrates to a new
/// scene.
pub struct RenderEnvironment {
    scene: SceneHandle,
    camera: CameraSpec,
    view: Mat4,
}

impl RenderEnvironment {
    pub fn new(scene: SceneHandle, camera: CameraSpec) -> Self {
        Self {
            scene,
            camera,
            view: Mat4::IDENTITY,
        }
    }

    #[inline]
    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    #[inline]
    pub fn view(&self) -> &Mat4 {
        &self.view
    }

    #[inline]
    pub fn scene(&self) -> &SceneHandle {
        &self.scene
    }

    #[inline]
    pub fn camera(&self) -> &CameraSpec {
        &self.camera
    }
}

// ============================================================================
// Headless renderer
// ============================================================================

/// Renderer stand-in that loads empty scenes instantly and discards
/// submissions. Keeps the full scheduling path exercisable without a GPU.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessRenderer;

#[derive(Debug)]
struct HeadlessScene;

impl SceneAsset for HeadlessScene {}

struct HeadlessLoader;

impl AssetLoader for HeadlessLoader {
    fn load_scene(&mut self, _path: &Path) -> Result<SceneHandle> {
        Ok(Arc::new(HeadlessScene))
    }
}

struct HeadlessStream;

impl CommandStream for HeadlessStream {
    fn render(&mut self, _group_idx: usize, _envs: &[RenderEnvironment]) -> Result<()> {
        Ok(())
    }

    fn wait_frame(&mut self, _group_idx: usize) -> Result<()> {
        Ok(())
    }

    fn color_ptr(&self, _group_idx: usize) -> GpuHandle {
        GpuHandle(0)
    }

    fn depth_ptr(&self, _group_idx: usize) -> GpuHandle {
        GpuHandle(0)
    }

    fn cuda_semaphore(&self, _group_idx: usize) -> GpuHandle {
        GpuHandle(0)
    }
}

impl Renderer for HeadlessRenderer {
    fn make_loader(&self) -> Result<Box<dyn AssetLoader>> {
        Ok(Box::new(HeadlessLoader))
    }

    fn make_stream(&self) -> Result<Box<dyn CommandStream>> {
        Ok(Box::new(HeadlessStream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_spec_defaults() {
        let spec = CameraSpec::default();
        assert_eq!(spec.fov_deg, 90.0);
        assert!(spec.near < spec.far);
    }

    #[test]
    fn test_headless_round_trip() {
        let renderer = HeadlessRenderer;
        let mut loader = renderer.make_loader().unwrap();
        let scene = loader.load_scene(Path::new("whatever.bps")).unwrap();

        let mut env = RenderEnvironment::new(scene, CameraSpec::default());
        env.set_view(Mat4::IDENTITY);

        let mut stream = renderer.make_stream().unwrap();
        stream.render(0, std::slice::from_ref(&env)).unwrap();
        stream.wait_frame(0).unwrap();
        assert_eq!(stream.color_ptr(0), GpuHandle(0));
    }

    #[test]
    fn test_scene_handle_refcounting() {
        let renderer = HeadlessRenderer;
        let mut loader = renderer.make_loader().unwrap();
        let scene = loader.load_scene(Path::new("s.bps")).unwrap();
        let held = scene.clone();
        drop(scene);
        assert_eq!(Arc::strong_count(&held), 1);
    }
}
