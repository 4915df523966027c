//! Dataset field configuration loaded from JSON.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CachePolicy;
use crate::constants::{
    DEFAULT_GRID_RES, DEFAULT_POINT_CLOUD_FILE, LOAD_ATTEMPTS, LOCK_POLL_INTERVAL,
    LOCK_WAIT_BUDGET, POINT_CLOUD_PADDING, POINT_CLOUD_SCALE, PSR_CACHE_ROOT, RETRY_BACKOFF,
    SCAN_DIR, SURFACE_SAMPLE_COUNT,
};
use crate::error::{FieldError, Result};

/// Kind of ground-truth grid a dataset provides.
/// Also selects whether point inputs are rescaled into `(0, 1)`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Grids precomputed under each model directory.
    PsrFull,
    /// Grids cached under the regeneration root, rebuilt from meshes on demand.
    PsrFullAbc,
}

/// Where point cloud inputs come from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PointCloudSource {
    /// `points` and `normals` stored next to each model.
    #[default]
    Precomputed,
    /// Raw scans in `04_pts/` with ground truth sampled from `03_meshes/`.
    Scan,
}

impl PointCloudSource {
    /// Resolve the source of a dataset by probing for its scan directory.
    pub fn detect(dataset_dir: &Path) -> Self {
        if dataset_dir.join(SCAN_DIR).is_dir() {
            PointCloudSource::Scan
        } else {
            PointCloudSource::Precomputed
        }
    }
}

/// Settings for building a [`crate::fields::FieldSet`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Ground-truth grid kind, `None` for point-only datasets.
    pub data_type: Option<DataType>,
    /// Resolution of regenerated grids.
    pub grid_res: usize,
    /// Number of per-model variants stored as numbered files.
    pub multi_files: Option<usize>,
    /// Point cloud file (or directory, with `multi_files`) under each model.
    pub pointcloud_file: String,
    pub point_cloud_source: PointCloudSource,
    pub padding: f32,
    pub scale: f32,
    pub psr_cache_root: PathBuf,
    /// Surface samples drawn from meshes during regeneration.
    pub surface_samples: usize,
    /// Fixed seed for surface sampling, random when absent.
    pub sample_seed: Option<u64>,
    pub load_attempts: u32,
    pub retry_backoff_ms: u64,
    pub lock_poll_ms: u64,
    pub lock_wait_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_type: Some(DataType::PsrFull),
            grid_res: DEFAULT_GRID_RES,
            multi_files: None,
            pointcloud_file: DEFAULT_POINT_CLOUD_FILE.to_string(),
            point_cloud_source: PointCloudSource::default(),
            padding: POINT_CLOUD_PADDING,
            scale: POINT_CLOUD_SCALE,
            psr_cache_root: PathBuf::from(PSR_CACHE_ROOT),
            surface_samples: SURFACE_SAMPLE_COUNT,
            sample_seed: None,
            load_attempts: LOAD_ATTEMPTS,
            retry_backoff_ms: RETRY_BACKOFF.as_millis() as u64,
            lock_poll_ms: LOCK_POLL_INTERVAL.as_millis() as u64,
            lock_wait_secs: LOCK_WAIT_BUDGET.as_secs(),
        }
    }
}

impl DataConfig {
    /// Read and validate a JSON configuration file.
    /// Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| FieldError::io(path, e))?;
        let config: DataConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(FieldError::InvalidConfig { message });

        if self.grid_res == 0 {
            return invalid("grid_res must be positive".to_string());
        }
        if self.multi_files == Some(0) {
            return invalid("multi_files must be positive when set".to_string());
        }
        if self.pointcloud_file.is_empty() {
            return invalid("pointcloud_file must not be empty".to_string());
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return invalid(format!("scale must be finite and non-zero, got {}", self.scale));
        }
        if !self.padding.is_finite() || self.padding < 0.0 {
            return invalid(format!("padding must be finite and non-negative, got {}", self.padding));
        }
        if self.surface_samples == 0 {
            return invalid("surface_samples must be positive".to_string());
        }
        if self.load_attempts == 0 {
            return invalid("load_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            load_attempts: self.load_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            lock_poll: Duration::from_millis(self.lock_poll_ms),
            lock_wait: Duration::from_secs(self.lock_wait_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{ "data_type": "psr_full_abc", "grid_res": 64, "point_cloud_source": "scan" }"#,
        )
        .unwrap();

        let config = DataConfig::from_json_file(&path).unwrap();
        assert_eq!(config.data_type, Some(DataType::PsrFullAbc));
        assert_eq!(config.grid_res, 64);
        assert_eq!(config.point_cloud_source, PointCloudSource::Scan);
        assert_eq!(config.scale, 1.2);
        assert_eq!(config.cache_policy(), CachePolicy::default());
    }

    #[test]
    fn null_data_type_disables_ground_truth() {
        let config: DataConfig = serde_json::from_str(r#"{ "data_type": null }"#).unwrap();
        assert_eq!(config.data_type, None);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let config = DataConfig {
            scale: 0.0,
            ..DataConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(FieldError::InvalidConfig { .. })
        ));

        let config = DataConfig {
            multi_files: Some(0),
            ..DataConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_data_type_is_a_parse_error() {
        let err = serde_json::from_str::<DataConfig>(r#"{ "data_type": "voxels" }"#).unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn scan_directory_selects_scan_source() {
        let dir = tempdir().unwrap();
        assert_eq!(PointCloudSource::detect(dir.path()), PointCloudSource::Precomputed);
        fs::create_dir(dir.path().join(SCAN_DIR)).unwrap();
        assert_eq!(PointCloudSource::detect(dir.path()), PointCloudSource::Scan);
    }
}
