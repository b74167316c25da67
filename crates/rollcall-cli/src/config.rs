use rollcall_core::{DetSize, DetectionLadder, PipelineConfig, DEFAULT_DET_SIZES, SIMILARITY_THRESHOLD};
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration.
///
/// Defaults, then an optional TOML file named by `ROLLCALL_CONFIG`, then
/// `ROLLCALL_*` environment variables, each layer overriding the last.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference images, one sub-directory per identity.
    pub gallery_dir: PathBuf,
    /// Serialized embedding store.
    pub store_path: PathBuf,
    /// Group photos waiting to be processed.
    pub incoming_dir: PathBuf,
    /// Archive root; photos land in `<processed_dir>/<YYYY-MM-DD>/`.
    pub processed_dir: PathBuf,
    /// Attendance CSV.
    pub ledger_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity a match must exceed.
    pub similarity_threshold: f32,
    /// Detection sizes tried in order during attendance.
    pub det_sizes: Vec<u32>,
    /// Detection size used when embedding reference images.
    pub gallery_det_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("students_images"),
            store_path: PathBuf::from("encodings.json"),
            incoming_dir: PathBuf::from("uploaded_group_images"),
            processed_dir: PathBuf::from("processed"),
            ledger_path: PathBuf::from("attendance.csv"),
            model_dir: PathBuf::from("models"),
            similarity_threshold: SIMILARITY_THRESHOLD,
            det_sizes: DEFAULT_DET_SIZES.iter().map(|s| s.0).collect(),
            gallery_det_size: DEFAULT_DET_SIZES[0].0,
        }
    }
}

impl Config {
    /// Load configuration from the TOML file (`file`, else `ROLLCALL_CONFIG`)
    /// and the environment.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let from_env = std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from);
        let base = match file.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        let config = base.with_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject detection sizes the SCRFD detector cannot run at.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(bad) = self.det_sizes.iter().find(|&&s| !valid_det_size(s)) {
            anyhow::bail!("det_sizes entry {bad} is not a positive multiple of {DET_SIZE_MULTIPLE}");
        }
        if !valid_det_size(self.gallery_det_size) {
            anyhow::bail!(
                "gallery_det_size {} is not a positive multiple of {DET_SIZE_MULTIPLE}",
                self.gallery_det_size
            );
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides read through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, field: &mut PathBuf| {
            if let Some(v) = lookup(key) {
                *field = PathBuf::from(v);
            }
        };
        path("ROLLCALL_GALLERY_DIR", &mut self.gallery_dir);
        path("ROLLCALL_STORE_PATH", &mut self.store_path);
        path("ROLLCALL_INCOMING_DIR", &mut self.incoming_dir);
        path("ROLLCALL_PROCESSED_DIR", &mut self.processed_dir);
        path("ROLLCALL_LEDGER_PATH", &mut self.ledger_path);
        path("ROLLCALL_MODEL_DIR", &mut self.model_dir);

        if let Some(v) = lookup("ROLLCALL_SIMILARITY_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.similarity_threshold = v;
        }
        if let Some(v) = lookup("ROLLCALL_GALLERY_DET_SIZE").and_then(|v| v.parse().ok()) {
            self.gallery_det_size = v;
        }
        if let Some(sizes) = lookup("ROLLCALL_DET_SIZES").map(|v| parse_sizes(&v)) {
            if !sizes.is_empty() {
                self.det_sizes = sizes;
            }
        }
        self
    }

    pub fn ladder(&self) -> DetectionLadder {
        DetectionLadder::new(self.det_sizes.iter().copied().map(DetSize).collect())
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            store_path: self.store_path.clone(),
            incoming_dir: self.incoming_dir.clone(),
            processed_dir: self.processed_dir.clone(),
            ledger_path: self.ledger_path.clone(),
            threshold: self.similarity_threshold,
            ladder: self.ladder(),
        }
    }
}

/// Detector inputs must divide evenly by the coarsest SCRFD stride.
const DET_SIZE_MULTIPLE: u32 = 32;

fn valid_det_size(size: u32) -> bool {
    size > 0 && size % DET_SIZE_MULTIPLE == 0
}

/// Parse `"640, 800,1024"`; unparsable entries are dropped.
fn parse_sizes(s: &str) -> Vec<u32> {
    s.split(',').filter_map(|p| p.trim().parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default().with_env(env(&[]));
        assert_eq!(c.store_path, PathBuf::from("encodings.json"));
        assert_eq!(c.det_sizes, vec![640, 800, 1024]);
        assert_eq!(c.similarity_threshold, 0.6);
    }

    #[test]
    fn test_env_overrides() {
        let c = Config::default().with_env(env(&[
            ("ROLLCALL_LEDGER_PATH", "/tmp/a.csv"),
            ("ROLLCALL_DET_SIZES", "1024, 640"),
            ("ROLLCALL_SIMILARITY_THRESHOLD", "0.7"),
            ("ROLLCALL_GALLERY_DET_SIZE", "not-a-number"),
        ]));
        assert_eq!(c.ledger_path, PathBuf::from("/tmp/a.csv"));
        assert_eq!(c.det_sizes, vec![1024, 640]);
        assert_eq!(c.similarity_threshold, 0.7);
        assert_eq!(c.gallery_det_size, 640);
        assert_eq!(c.ladder().sizes(), &[DetSize(640), DetSize(1024)]);
    }

    #[test]
    fn test_empty_sizes_keep_default() {
        let c = Config::default().with_env(env(&[("ROLLCALL_DET_SIZES", ",,")]));
        assert_eq!(c.det_sizes, vec![640, 800, 1024]);
    }

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_det_size_not_multiple_of_32_rejected() {
        let c = Config::default().with_env(env(&[("ROLLCALL_DET_SIZES", "640,700")]));
        let err = c.validate().unwrap_err();
        assert!(err.to_string().contains("700"));
    }

    #[test]
    fn test_gallery_det_size_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "gallery_det_size = 600\n").unwrap();

        let c = Config::from_file(&path).unwrap();
        assert!(c.validate().is_err());

        let zero = Config::default().with_env(env(&[("ROLLCALL_GALLERY_DET_SIZE", "0")]));
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_partial_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "model_dir = \"/opt/models\"\ndet_sizes = [640]\n").unwrap();

        let c = Config::from_file(&path).unwrap();
        assert_eq!(c.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(c.det_sizes, vec![640]);
        assert_eq!(c.gallery_dir, PathBuf::from("students_images"));
    }

    #[test]
    fn test_bad_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "det_sizes = \"oops\"").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
