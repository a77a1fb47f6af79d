#![deny(dead_code)]
#![deny(unused_imports)]

//! Standardization of regression inputs.
//!
//! [`standardize`] parses a regression formula, scales the response and the
//! continuous predictors, and recodes factors with magnitude-controlled sum
//! or orthogonal polynomial contrasts. The returned [`StandardizedModel`]
//! holds the standardized table, the formula rewritten over the new column
//! names, and every fitted parameter, so [`StandardizedModel::predict`] can
//! apply exactly the same transforms to new data.

pub mod classify;
pub mod contrasts;
pub mod descriptor;
pub mod engine;
pub mod formula;
pub mod frame;
pub mod model;
pub mod names;
pub mod predict;
pub mod scaling;
pub mod table;

pub use classify::VariableClass;
pub use contrasts::{ContrastSpec, poly_contrast, sum_contrast};
pub use descriptor::{ReplayError, TransformDescriptor};
pub use engine::{StandardizeError, standardize};
pub use formula::{FormulaError, parse_formula};
pub use frame::FrameError;
pub use model::{Family, ModelError, StandardizeOptions, StandardizedModel};
pub use predict::PredictOptions;
pub use scaling::scale_by;
pub use table::{Column, Factor, Table, TableError};
