use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{apply_transform, Field, FieldData, FieldValue, Transform};
use crate::constants::{PSR_DIR, PSR_FILE, PSR_KEY};
use crate::error::Result;
use crate::npz::read_npz_array;

/// Grid precomputed under each model directory.
///
/// Reads `<model>/psr.npz`, or `<model>/psr/psr_{idx:02}.npz` when the
/// dataset stores several variants per model. Missing files are an error;
/// this field never regenerates.
#[derive(Clone, Default)]
pub struct FullPsrField {
    transform: Option<Transform>,
    multi_files: Option<usize>,
}

impl FullPsrField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_multi_files(mut self, multi_files: usize) -> Self {
        self.multi_files = Some(multi_files);
        self
    }

    pub fn psr_path(&self, model_path: &Path, idx: usize) -> PathBuf {
        match self.multi_files {
            Some(_) => model_path.join(PSR_DIR).join(format!("psr_{idx:02}.npz")),
            None => model_path.join(PSR_FILE),
        }
    }
}

impl Field for FullPsrField {
    fn load(&self, model_path: &Path, idx: usize, _category: &str) -> Result<FieldData> {
        let path = self.psr_path(model_path, idx);
        let grid = read_npz_array(&path, PSR_KEY)?;
        debug!(path = %path.display(), shape = ?grid.shape(), "loaded precomputed grid");
        apply_transform(
            self.transform.as_ref(),
            FieldData::primary(FieldValue::Array(grid)),
        )
    }

    fn check_complete(&self, files: &HashSet<String>) -> bool {
        match self.multi_files {
            Some(_) => files.contains(PSR_DIR),
            None => files.contains(PSR_FILE),
        }
    }
}
