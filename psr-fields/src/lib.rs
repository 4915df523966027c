//! Dataset fields for Poisson surface reconstruction training data, and a
//! batch launcher for per-object optimisation runs.

pub mod cache;
pub mod config;
pub mod constants;
pub mod cube;
pub mod error;
pub mod fields;
pub mod launcher;
pub mod logging;
pub mod mesh;
pub mod npz;
pub mod solver;

pub use config::{DataConfig, DataType, PointCloudSource};
pub use error::{FieldError, Result};
pub use fields::{
    Field, FieldData, FieldKey, FieldSet, FieldValue, FullPsrField, FullPsrFieldAbc, IndexField,
    PointCloudField, Transform,
};
pub use solver::PsrSolver;
