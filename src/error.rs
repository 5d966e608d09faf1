//! Error types for the rollout generator.

use std::fmt;
use std::path::PathBuf;

/// Result type for rollout operations.
pub type Result<T> = std::result::Result<T, RolloutError>;

/// Error types that can occur while constructing or driving a rollout
/// generator.
///
/// Transient navigation outcomes (unreachable goals, blocked movement) are
/// not errors; they flow into rewards and distances as ordinary values.
#[derive(Debug)]
pub enum RolloutError {
    /// Invalid configuration (zero environments, non-multiple counts, etc.)
    InvalidConfig {
        param: String,
        message: String,
    },
    /// Failed to read a dataset file or directory.
    DatasetIo {
        path: PathBuf,
        message: String,
    },
    /// A dataset file decompressed but did not parse as expected.
    DatasetParse {
        path: PathBuf,
        message: String,
    },
    /// A dataset file mixes episodes from more than one scene.
    MultiSceneFile {
        path: PathBuf,
        scene_a: String,
        scene_b: String,
    },
    /// A scene identifier has no extension to substitute.
    InvalidSceneId {
        scene_id: String,
    },
    /// No scenes were found in the dataset directory.
    EmptyDataset {
        path: PathBuf,
    },
    /// A navmesh failed to load.
    NavmeshLoad {
        path: PathBuf,
        message: String,
    },
    /// A scene asset failed to load.
    AssetLoad {
        path: PathBuf,
        message: String,
    },
    /// Error surfaced by the external renderer.
    Render(String),
}

impl fmt::Display for RolloutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { param, message } => {
                write!(f, "Invalid configuration for '{}': {}", param, message)
            }
            Self::DatasetIo { path, message } => {
                write!(f, "Failed to read {}: {}", path.display(), message)
            }
            Self::DatasetParse { path, message } => {
                write!(f, "Failed to parse {}: {}", path.display(), message)
            }
            Self::MultiSceneFile { path, scene_a, scene_b } => {
                write!(
                    f,
                    "{} contains episodes for more than one scene ('{}' and '{}')",
                    path.display(),
                    scene_a,
                    scene_b
                )
            }
            Self::InvalidSceneId { scene_id } => {
                write!(f, "Invalid scene id: {}", scene_id)
            }
            Self::EmptyDataset { path } => {
                write!(f, "No episode files found in {}", path.display())
            }
            Self::NavmeshLoad { path, message } => {
                write!(f, "Failed to load navmesh {}: {}", path.display(), message)
            }
            Self::AssetLoad { path, message } => {
                write!(f, "Failed to load scene {}: {}", path.display(), message)
            }
            Self::Render(msg) => write!(f, "Renderer error: {}", msg),
        }
    }
}

impl std::error::Error for RolloutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_config() {
        let err = RolloutError::InvalidConfig {
            param: "num_environments".to_string(),
            message: "must be a multiple of num_active_scenes".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("num_environments"));
        assert!(msg.contains("multiple"));
    }

    #[test]
    fn test_display_invalid_scene_id() {
        let err = RolloutError::InvalidSceneId {
            scene_id: "no_extension".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid scene id: no_extension");
    }
}
