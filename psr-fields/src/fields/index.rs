use std::collections::HashSet;
use std::path::Path;

use super::{Field, FieldData, FieldValue};
use crate::error::Result;

/// Returns the item index itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexField;

impl Field for IndexField {
    fn load(&self, _model_path: &Path, idx: usize, _category: &str) -> Result<FieldData> {
        Ok(FieldData::primary(FieldValue::Index(idx)))
    }

    fn check_complete(&self, _files: &HashSet<String>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldKey;

    #[test]
    fn returns_idx_for_any_model() {
        let data = IndexField.load(Path::new("/nowhere/model"), 42, "chair").unwrap();
        assert_eq!(data.get(&FieldKey::Primary), Some(&FieldValue::Index(42)));
        assert!(IndexField.check_complete(&HashSet::new()));
    }
}
