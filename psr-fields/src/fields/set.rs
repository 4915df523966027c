use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::debug_span;

use super::{Field, FieldKey, FieldValue, FullPsrField, FullPsrFieldAbc, IndexField, PointCloudField};
use crate::cache::Sleeper;
use crate::config::{DataConfig, DataType};
use crate::error::{FieldError, Result};
use crate::solver::PsrSolver;

/// Named fields loaded together for every dataset item.
#[derive(Default)]
pub struct FieldSet {
    fields: Vec<(String, Box<dyn Field>)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard field layout for a dataset: `inputs`, `gt_psr` when the data
    /// type provides a grid, and `idx`.
    ///
    /// `solver` is required for [`DataType::PsrFullAbc`].
    pub fn from_config(config: &DataConfig, solver: Option<Arc<dyn PsrSolver>>) -> Result<Self> {
        Self::build(config, solver, None)
    }

    /// Like [`FieldSet::from_config`], with a custom sleeper for cache retries.
    pub fn from_config_with_sleeper(
        config: &DataConfig,
        solver: Option<Arc<dyn PsrSolver>>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        Self::build(config, solver, Some(sleeper))
    }

    fn build(
        config: &DataConfig,
        solver: Option<Arc<dyn PsrSolver>>,
        sleeper: Option<Arc<dyn Sleeper>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut inputs = PointCloudField::new(config.pointcloud_file.clone())
            .with_data_type(config.data_type)
            .with_padding(config.padding)
            .with_scale(config.scale)
            .with_source(config.point_cloud_source)
            .with_sample_seed(config.sample_seed);
        if let Some(n) = config.multi_files {
            inputs = inputs.with_multi_files(n);
        }

        let mut set = Self::new().with_field("inputs", inputs);

        match config.data_type {
            Some(DataType::PsrFull) => {
                let mut gt = FullPsrField::new();
                if let Some(n) = config.multi_files {
                    gt = gt.with_multi_files(n);
                }
                set = set.with_field("gt_psr", gt);
            }
            Some(DataType::PsrFullAbc) => {
                let solver = solver.ok_or_else(|| FieldError::InvalidConfig {
                    message: "psr_full_abc needs a grid solver".to_string(),
                })?;
                let mut gt = FullPsrFieldAbc::new(config.grid_res, solver)
                    .with_cache_root(config.psr_cache_root.clone())
                    .with_surface_samples(config.surface_samples)
                    .with_sample_seed(config.sample_seed)
                    .with_policy(config.cache_policy());
                if let Some(sleeper) = sleeper {
                    gt = gt.with_sleeper(sleeper);
                }
                set = set.with_field("gt_psr", gt);
            }
            None => {}
        }

        Ok(set.with_field("idx", IndexField))
    }

    pub fn with_field(mut self, name: impl Into<String>, field: impl Field + 'static) -> Self {
        self.fields.push((name.into(), Box::new(field)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when every field finds its inputs in `files`.
    pub fn check_complete(&self, files: &HashSet<String>) -> bool {
        self.fields.iter().all(|(_, field)| field.check_complete(files))
    }

    /// Load every field and flatten the results. Primary values are keyed by
    /// the field name, named values by `<field>.<key>`.
    pub fn load_item(
        &self,
        model_path: &Path,
        idx: usize,
        category: &str,
    ) -> Result<BTreeMap<String, FieldValue>> {
        let span = debug_span!("load_item", model = %model_path.display(), idx);
        let _enter = span.enter();

        let mut item = BTreeMap::new();
        for (name, field) in &self.fields {
            for (key, value) in field.load(model_path, idx, category)? {
                let flat = match key {
                    FieldKey::Primary => name.clone(),
                    FieldKey::Named(sub) => format!("{name}.{sub}"),
                };
                item.insert(flat, value);
            }
        }
        Ok(item)
    }
}
