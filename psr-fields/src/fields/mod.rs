//! Per-item dataset fields.
//!
//! A [`Field`] turns `(model_path, idx, category)` into a small mapping of
//! named arrays. The unnamed entry is [`FieldKey::Primary`]; auxiliary
//! outputs such as `normals` are [`FieldKey::Named`].

mod index;
mod point_cloud;
mod psr;
mod psr_abc;
mod set;

pub use index::IndexField;
pub use point_cloud::PointCloudField;
pub use psr::FullPsrField;
pub use psr_abc::FullPsrFieldAbc;
pub use set::FieldSet;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ndarray::ArrayD;

use crate::error::Result;

/// Key of a field output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
    Primary,
    Named(String),
}

impl FieldKey {
    pub fn named(name: impl Into<String>) -> Self {
        FieldKey::Named(name.into())
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKey::Primary => write!(f, "<primary>"),
            FieldKey::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Value of a field output.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Index(usize),
    Array(ArrayD<f32>),
}

impl FieldValue {
    pub fn as_array(&self) -> Option<&ArrayD<f32>> {
        match self {
            FieldValue::Array(array) => Some(array),
            FieldValue::Index(_) => None,
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            FieldValue::Index(idx) => Some(*idx),
            FieldValue::Array(_) => None,
        }
    }
}

/// Ordered mapping produced by one [`Field::load`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldData {
    entries: BTreeMap<FieldKey, FieldValue>,
}

impl FieldData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping holding only a primary value.
    pub fn primary(value: FieldValue) -> Self {
        let mut data = Self::new();
        data.insert(FieldKey::Primary, value);
        data
    }

    pub fn insert(&mut self, key: FieldKey, value: FieldValue) -> Option<FieldValue> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &FieldKey) -> Option<&FieldValue> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &FieldKey) -> Option<&mut FieldValue> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Array stored under `key`, if any.
    pub fn array(&self, key: &FieldKey) -> Option<&ArrayD<f32>> {
        self.get(key).and_then(FieldValue::as_array)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &FieldValue)> {
        self.entries.iter()
    }
}

impl IntoIterator for FieldData {
    type Item = (FieldKey, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<FieldKey, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(FieldKey, FieldValue)> for FieldData {
    fn from_iter<I: IntoIterator<Item = (FieldKey, FieldValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Post-processing applied to a field's output before it is returned.
pub type Transform = Arc<dyn Fn(FieldData) -> Result<FieldData> + Send + Sync>;

/// A per-item data accessor.
pub trait Field: Send + Sync {
    /// Load this field for one item.
    fn load(&self, model_path: &Path, idx: usize, category: &str) -> Result<FieldData>;

    /// Whether a model directory listing contains what this field reads.
    fn check_complete(&self, files: &HashSet<String>) -> bool;
}

pub(crate) fn apply_transform(transform: Option<&Transform>, data: FieldData) -> Result<FieldData> {
    match transform {
        Some(transform) => transform(data),
        None => Ok(data),
    }
}
