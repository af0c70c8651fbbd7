use std::path::PathBuf;

/// Default minimum cosine similarity for a positive identification.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// Default cap on images accepted by a face-update request.
pub const DEFAULT_MAX_UPDATE_IMAGES: usize = 20;

/// Service configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for stored member photos and check-in captures.
    pub photo_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Maximum number of images accepted by a face update.
    pub max_update_images: usize,
}

impl Config {
    /// Load configuration from `PRESENSI_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("PRESENSI_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| presensi_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presensi");

        let db_path = std::env::var("PRESENSI_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("presensi.db"));

        let photo_dir = std::env::var("PRESENSI_PHOTO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("photos"));

        Self {
            model_dir,
            db_path,
            photo_dir,
            similarity_threshold: env_f32(
                "PRESENSI_SIMILARITY_THRESHOLD",
                DEFAULT_SIMILARITY_THRESHOLD,
            ),
            max_update_images: env_usize("PRESENSI_MAX_UPDATE_IMAGES", DEFAULT_MAX_UPDATE_IMAGES),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
