//! Episode dataset loading and indexing.
//!
//! The dataset directory holds one gzipped JSON file per scene; each file
//! contributes a contiguous run of episodes and one scene record. Files are
//! split across loader threads and the per-thread results are merged under a
//! single mutex with an episode-offset fix-up.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;

use flate2::read::GzDecoder;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{Result, RolloutError};
use crate::math::{Quat, Vec3};

/// Episode files end with this suffix.
pub const DATASET_SUFFIX: &str = ".json.gz";

/// One (start pose, goal) pair within a scene.
#[derive(Clone, Copy, Debug)]
pub struct Episode {
    pub start_position: Vec3,
    pub start_rotation: Quat,
    pub goal: Vec3,
}

/// Per-scene episode span and asset paths.
#[derive(Clone, Debug)]
pub struct SceneMetadata {
    first_episode: u32,
    num_episodes: u32,
    mesh_path: PathBuf,
    navmesh_path: PathBuf,
}

#[derive(Deserialize)]
struct GoalJson {
    position: [f32; 3],
}

#[derive(Deserialize)]
struct EpisodeJson {
    start_position: [f32; 3],
    start_rotation: [f32; 4],
    goals: Vec<GoalJson>,
    scene_id: String,
}

#[derive(Deserialize)]
struct SceneFileJson {
    episodes: Vec<EpisodeJson>,
}

/// Immutable episode index shared by every simulator.
#[derive(Debug)]
pub struct Dataset {
    episodes: Vec<Episode>,
    scenes: Vec<SceneMetadata>,
}

impl Dataset {
    /// Load every `*.json.gz` file under `dataset_dir`, resolving asset
    /// paths against `asset_dir`. Files are parsed by up to
    /// `loader_threads` threads.
    pub fn load(dataset_dir: &Path, asset_dir: &Path, loader_threads: usize) -> Result<Self> {
        let mut files: Vec<PathBuf> = Vec::new();
        let entries = fs::read_dir(dataset_dir).map_err(|e| RolloutError::DatasetIo {
            path: dataset_dir.to_path_buf(),
            message: e.to_string(),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| RolloutError::DatasetIo {
                path: dataset_dir.to_path_buf(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(DATASET_SUFFIX))
                .unwrap_or(false)
            {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(RolloutError::EmptyDataset {
                path: dataset_dir.to_path_buf(),
            });
        }
        // Stable file order keeps scene indices reproducible run to run.
        files.sort();

        let num_threads = loader_threads.clamp(1, files.len());
        let chunk_size = files.len().div_ceil(num_threads);

        let merged: Mutex<(Vec<Episode>, Vec<SceneMetadata>)> =
            Mutex::new((Vec::new(), Vec::new()));
        let first_error: Mutex<Option<RolloutError>> = Mutex::new(None);

        thread::scope(|s| {
            for chunk in files.chunks(chunk_size) {
                let merged = &merged;
                let first_error = &first_error;
                s.spawn(move || {
                    let mut episodes: Vec<Episode> = Vec::new();
                    let mut scenes: Vec<SceneMetadata> = Vec::new();

                    for file in chunk {
                        let scene_start = episodes.len() as u32;
                        match parse_file(file, asset_dir) {
                            Ok((mut file_episodes, paths)) => {
                                if file_episodes.is_empty() {
                                    continue;
                                }
                                episodes.append(&mut file_episodes);
                                scenes.push(SceneMetadata {
                                    first_episode: scene_start,
                                    num_episodes: episodes.len() as u32 - scene_start,
                                    mesh_path: paths.0,
                                    navmesh_path: paths.1,
                                });
                            }
                            Err(e) => {
                                let mut slot = first_error.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                return;
                            }
                        }
                    }

                    let mut guard = merged.lock();
                    let offset = guard.0.len() as u32;
                    for mut scene in scenes {
                        scene.first_episode += offset;
                        guard.1.push(scene);
                    }
                    guard.0.append(&mut episodes);
                });
            }
        });

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }

        let (episodes, scenes) = merged.into_inner();
        if scenes.is_empty() {
            return Err(RolloutError::EmptyDataset {
                path: dataset_dir.to_path_buf(),
            });
        }

        Ok(Self { episodes, scenes })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(episodes: Vec<Episode>, scenes: Vec<SceneMetadata>) -> Self {
        Self { episodes, scenes }
    }

    /// Episodes belonging to one scene.
    #[inline]
    pub fn episodes_of(&self, scene_idx: u32) -> &[Episode] {
        let scene = &self.scenes[scene_idx as usize];
        let start = scene.first_episode as usize;
        &self.episodes[start..start + scene.num_episodes as usize]
    }

    /// Renderable mesh path for a scene.
    #[inline]
    pub fn scene_path(&self, scene_idx: u32) -> &Path {
        &self.scenes[scene_idx as usize].mesh_path
    }

    /// Navmesh path for a scene.
    #[inline]
    pub fn navmesh_path(&self, scene_idx: u32) -> &Path {
        &self.scenes[scene_idx as usize].navmesh_path
    }

    pub fn num_scenes(&self) -> usize {
        self.scenes.len()
    }

    pub fn num_episodes(&self) -> usize {
        self.episodes.len()
    }
}

#[cfg(test)]
impl SceneMetadata {
    pub(crate) fn for_tests(first_episode: u32, num_episodes: u32) -> Self {
        Self {
            first_episode,
            num_episodes,
            mesh_path: PathBuf::from("test.bps"),
            navmesh_path: PathBuf::from("test.navmesh"),
        }
    }
}

/// Decompress and parse one scene file; returns its episodes and the
/// (mesh, navmesh) asset paths derived from the scene id.
fn parse_file(path: &Path, asset_dir: &Path) -> Result<(Vec<Episode>, (PathBuf, PathBuf))> {
    let file = fs::File::open(path).map_err(|e| RolloutError::DatasetIo {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut json = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut json)
        .map_err(|e| RolloutError::DatasetIo {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let parsed: SceneFileJson =
        serde_json::from_str(&json).map_err(|e| RolloutError::DatasetParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let mut scene_id: Option<&str> = None;
    let mut episodes = Vec::with_capacity(parsed.episodes.len());

    for episode in &parsed.episodes {
        match scene_id {
            None => scene_id = Some(&episode.scene_id),
            Some(id) if id != episode.scene_id => {
                return Err(RolloutError::MultiSceneFile {
                    path: path.to_path_buf(),
                    scene_a: id.to_string(),
                    scene_b: episode.scene_id.clone(),
                });
            }
            Some(_) => {}
        }

        let goal = episode
            .goals
            .first()
            .ok_or_else(|| RolloutError::DatasetParse {
                path: path.to_path_buf(),
                message: "episode has no goals".to_string(),
            })?;

        episodes.push(Episode {
            start_position: Vec3::from_array(episode.start_position),
            start_rotation: Quat::from_array(episode.start_rotation),
            goal: Vec3::from_array(goal.position),
        });
    }

    let paths = match scene_id {
        Some(id) => asset_paths(id, asset_dir)?,
        // Files with no episodes contribute no scene; paths are unused.
        None => (PathBuf::new(), PathBuf::new()),
    };

    Ok((episodes, paths))
}

/// For scene id `foo/bar.ext`, derive `asset_dir/foo/bar.bps` and
/// `asset_dir/foo/bar.navmesh`.
fn asset_paths(scene_id: &str, asset_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let (stem, _ext) = scene_id
        .rsplit_once('.')
        .filter(|(stem, _)| !stem.is_empty())
        .ok_or_else(|| RolloutError::InvalidSceneId {
            scene_id: scene_id.to_string(),
        })?;

    Ok((
        asset_dir.join(format!("{}.bps", stem)),
        asset_dir.join(format!("{}.navmesh", stem)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_dataset_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pointnav_dataset_test_{}_{}",
            std::process::id(),
            DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_gz(path: &Path, contents: &str) {
        let file = fs::File::create(path).unwrap();
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(contents.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    fn episode_json(scene_id: &str, goal_z: f32) -> String {
        format!(
            concat!(
                "{{\"start_position\":[0.0,0.0,0.0],",
                "\"start_rotation\":[1.0,0.0,0.0,0.0],",
                "\"goals\":[{{\"position\":[0.0,0.0,{}]}}],",
                "\"scene_id\":\"{}\"}}"
            ),
            goal_z, scene_id
        )
    }

    #[test]
    fn test_load_two_scene_files() {
        let dir = temp_dataset_dir();
        write_gz(
            &dir.join("a.json.gz"),
            &format!(
                "{{\"episodes\":[{},{}]}}",
                episode_json("env/alpha.glb", -1.0),
                episode_json("env/alpha.glb", -2.0)
            ),
        );
        write_gz(
            &dir.join("b.json.gz"),
            &format!("{{\"episodes\":[{}]}}", episode_json("env/beta.glb", -3.0)),
        );

        let dataset = Dataset::load(&dir, Path::new("/assets"), 2).unwrap();
        assert_eq!(dataset.num_scenes(), 2);
        assert_eq!(dataset.num_episodes(), 3);

        let totals: usize = (0..2).map(|i| dataset.episodes_of(i).len()).sum();
        assert_eq!(totals, 3);

        for scene in 0..2u32 {
            let mesh = dataset.scene_path(scene).to_string_lossy().to_string();
            let nav = dataset.navmesh_path(scene).to_string_lossy().to_string();
            assert!(mesh.ends_with(".bps"), "{}", mesh);
            assert!(nav.ends_with(".navmesh"), "{}", nav);
            assert!(mesh.starts_with("/assets/env/"));
        }

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_single_thread_load_is_ordered() {
        let dir = temp_dataset_dir();
        write_gz(
            &dir.join("a.json.gz"),
            &format!("{{\"episodes\":[{}]}}", episode_json("x/a.glb", -1.0)),
        );
        write_gz(
            &dir.join("b.json.gz"),
            &format!("{{\"episodes\":[{}]}}", episode_json("x/b.glb", -1.0)),
        );

        let dataset = Dataset::load(&dir, Path::new("/assets"), 1).unwrap();
        assert!(dataset.scene_path(0).to_string_lossy().contains("x/a"));
        assert!(dataset.scene_path(1).to_string_lossy().contains("x/b"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_multi_scene_file_rejected() {
        let dir = temp_dataset_dir();
        write_gz(
            &dir.join("mixed.json.gz"),
            &format!(
                "{{\"episodes\":[{},{}]}}",
                episode_json("env/alpha.glb", -1.0),
                episode_json("env/beta.glb", -1.0)
            ),
        );

        let err = Dataset::load(&dir, Path::new("/assets"), 1).unwrap_err();
        assert!(matches!(err, RolloutError::MultiSceneFile { .. }));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_malformed_scene_id_rejected() {
        let dir = temp_dataset_dir();
        write_gz(
            &dir.join("bad.json.gz"),
            &format!("{{\"episodes\":[{}]}}", episode_json("no_extension", -1.0)),
        );

        let err = Dataset::load(&dir, Path::new("/assets"), 1).unwrap_err();
        assert!(matches!(err, RolloutError::InvalidSceneId { .. }));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_json_rejected() {
        let dir = temp_dataset_dir();
        write_gz(&dir.join("corrupt.json.gz"), "{\"episodes\": not json");

        let err = Dataset::load(&dir, Path::new("/assets"), 1).unwrap_err();
        assert!(matches!(err, RolloutError::DatasetParse { .. }));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory_rejected() {
        let dir = temp_dataset_dir();
        let err = Dataset::load(&dir, Path::new("/assets"), 1).unwrap_err();
        assert!(matches!(err, RolloutError::EmptyDataset { .. }));
        fs::remove_dir_all(&dir).unwrap();
    }
}
