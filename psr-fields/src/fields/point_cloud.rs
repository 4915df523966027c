//! Oriented point cloud inputs.
//!
//! Precomputed datasets store `points` and `normals` next to each model.
//! Scan datasets pair a raw `04_pts` scan with ground-truth samples drawn
//! from the model's mesh at the same count.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{apply_transform, Field, FieldData, FieldKey, FieldValue, Transform};
use crate::cache::ModelLayout;
use crate::config::{DataType, PointCloudSource};
use crate::constants::{NORMALS_KEY, POINTS_KEY, POINTS_SCAN_KEY, POINT_CLOUD_PADDING, POINT_CLOUD_SCALE};
use crate::cube::{points_to_array, rescale, CanonicalCube};
use crate::error::{FieldError, Result};
use crate::mesh::sample_ground_truth;
use crate::npz::{read_npy, NpzReader};

#[derive(Clone)]
pub struct PointCloudField {
    file_name: String,
    data_type: Option<DataType>,
    transform: Option<Transform>,
    multi_files: Option<usize>,
    padding: f32,
    scale: f32,
    source: PointCloudSource,
    sample_seed: Option<u64>,
}

impl PointCloudField {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            data_type: None,
            transform: None,
            multi_files: None,
            padding: POINT_CLOUD_PADDING,
            scale: POINT_CLOUD_SCALE,
            source: PointCloudSource::Precomputed,
            sample_seed: None,
        }
    }

    /// PSR data types rescale points into `(0, 1)` after the transform.
    pub fn with_data_type(mut self, data_type: Option<DataType>) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_multi_files(mut self, multi_files: usize) -> Self {
        self.multi_files = Some(multi_files);
        self
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_source(mut self, source: PointCloudSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_sample_seed(mut self, seed: Option<u64>) -> Self {
        self.sample_seed = seed;
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Configured padding. Normalisation always uses the PSR cube.
    pub fn padding(&self) -> f32 {
        self.padding
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn source(&self) -> PointCloudSource {
        self.source
    }

    pub fn file_path(&self, model_path: &Path, idx: usize) -> PathBuf {
        match self.multi_files {
            Some(_) => model_path
                .join(&self.file_name)
                .join(format!("pointcloud_{idx:02}.npz")),
            None => model_path.join(&self.file_name),
        }
    }

    fn load_precomputed(&self, model_path: &Path, idx: usize) -> Result<FieldData> {
        let path = self.file_path(model_path, idx);
        let mut reader = NpzReader::open(&path)?;
        let points = reader.array(POINTS_KEY)?;
        let normals = reader.array(NORMALS_KEY)?;
        debug!(path = %path.display(), points = points.shape().first().copied().unwrap_or(0), "loaded point cloud");

        let mut data = FieldData::primary(FieldValue::Array(points));
        data.insert(FieldKey::named(NORMALS_KEY), FieldValue::Array(normals));
        Ok(data)
    }

    fn load_scan(&self, model_path: &Path) -> Result<FieldData> {
        let layout = ModelLayout::from_model_path(model_path)?;
        let scan_path = layout.scan_path();
        let scan = read_npy(&scan_path)?;
        if scan.ndim() != 2 || scan.shape()[1] != 3 {
            return Err(FieldError::ShapeMismatch {
                expected: vec![scan.shape().first().copied().unwrap_or(0), 3],
                got: scan.shape().to_vec(),
            });
        }

        let count = scan.shape()[0];
        let samples = sample_ground_truth(&layout.mesh_path(), count, self.sample_seed)?;
        let points_scan = CanonicalCube::psr().normalize_array(&scan);
        debug!(scan = %scan_path.display(), count, "sampled ground truth for scan");

        let mut data = FieldData::primary(FieldValue::Array(points_to_array(&samples.points).into_dyn()));
        data.insert(
            FieldKey::named(NORMALS_KEY),
            FieldValue::Array(points_to_array(&samples.normals).into_dyn()),
        );
        data.insert(FieldKey::named(POINTS_SCAN_KEY), FieldValue::Array(points_scan));
        Ok(data)
    }

    fn rescale_points(&self, data: &mut FieldData) {
        for key in [FieldKey::Primary, FieldKey::named(POINTS_SCAN_KEY)] {
            if let Some(FieldValue::Array(points)) = data.get_mut(&key) {
                *points = rescale(points, self.scale);
            }
        }
    }
}

impl Field for PointCloudField {
    fn load(&self, model_path: &Path, idx: usize, _category: &str) -> Result<FieldData> {
        let data = match self.source {
            PointCloudSource::Precomputed => self.load_precomputed(model_path, idx)?,
            PointCloudSource::Scan => self.load_scan(model_path)?,
        };

        let mut data = apply_transform(self.transform.as_ref(), data)?;
        if self.data_type.is_some() {
            self.rescale_points(&mut data);
        }
        Ok(data)
    }

    fn check_complete(&self, files: &HashSet<String>) -> bool {
        files.contains(&self.file_name)
    }
}
