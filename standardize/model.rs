//! # Standardized Model
//!
//! The immutable result of [`crate::standardize`]: the standardized training
//! table, the rewritten formula, and every descriptor needed to replay the
//! same transforms on new data.
//!
//! The replay recipe (everything except the table itself) serializes to a
//! human-readable TOML file, so a model fitted in one process can standardize
//! prediction data in another.

use crate::classify::VariableClass;
use crate::descriptor::TransformDescriptor;
use crate::engine::StandardizeError;
use crate::formula::{Expr, Role};
use crate::table::Table;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Configuration ---

/// The error distribution of the downstream regression. Only the gaussian
/// family rescales the response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    #[default]
    Gaussian,
    Binomial,
    Poisson,
    Gamma,
    InverseGaussian,
    /// Any other family, by name. Treated like every non-gaussian family.
    Other(String),
}

impl Family {
    pub fn is_gaussian(&self) -> bool {
        matches!(self, Family::Gaussian)
    }
}

impl From<&str> for Family {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "gaussian" | "normal" => Family::Gaussian,
            "binomial" => Family::Binomial,
            "poisson" => Family::Poisson,
            "gamma" => Family::Gamma,
            "inverse.gaussian" | "inverse_gaussian" => Family::InverseGaussian,
            other => Family::Other(other.to_string()),
        }
    }
}

/// Options for [`crate::standardize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizeOptions {
    pub family: Family,
    /// Target standard deviation for continuous predictors and magnitude of
    /// factor contrasts.
    pub scale: f64,
    /// Name of a column to use as offset, as an alternative to `offset(x)` in
    /// the formula.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

impl Default for StandardizeOptions {
    fn default() -> Self {
        Self {
            family: Family::Gaussian,
            scale: 1.0,
            offset: None,
        }
    }
}

impl StandardizeOptions {
    pub fn with_family(mut self, family: impl Into<Family>) -> Self {
        self.family = family.into();
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_offset(mut self, column: impl Into<String>) -> Self {
        self.offset = Some(column.into());
        self
    }

    pub fn validate(&self) -> Result<(), StandardizeError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(StandardizeError::InvalidScale(self.scale));
        }
        Ok(())
    }
}

// --- Model Metadata ---

/// How the model was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    pub formula: String,
    pub options: StandardizeOptions,
}

/// One standardized variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    /// Term text as written in the formula, e.g. `log(dur)`.
    pub original: String,
    /// The identifier the variable was given; the key of its descriptor.
    pub name: String,
    pub class: VariableClass,
    pub roles: Vec<Role>,
    /// Expression evaluated against the data before the transform.
    pub source: Expr,
    /// Output column names. Polynomial variables own several.
    pub columns: Vec<String>,
}

impl VariableInfo {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// The offset, when the formula or the options named one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetInfo {
    pub original: String,
    pub name: String,
}

// --- The Model Artifact ---

/// Everything [`crate::standardize`] produced. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardizedModel {
    pub(crate) scale: f64,
    pub(crate) formula: String,
    pub(crate) family: Family,
    pub(crate) call: CallInfo,
    pub(crate) offset: Option<OffsetInfo>,
    pub(crate) variables: Vec<VariableInfo>,
    pub(crate) descriptors: BTreeMap<String, TransformDescriptor>,
    pub(crate) contrasts: BTreeMap<String, Array2<f64>>,
    pub(crate) groups: BTreeMap<String, Vec<String>>,
    /// The standardized training table. Not persisted.
    #[serde(skip)]
    pub(crate) data: Table,
}

/// Errors while saving or loading a model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl StandardizedModel {
    /// The contrast scale the model was built with.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// The formula rewritten over the standardized column names.
    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    pub fn call(&self) -> &CallInfo {
        &self.call
    }

    pub fn offset(&self) -> Option<&OffsetInfo> {
        self.offset.as_ref()
    }

    /// Standardized variables in the order their columns appear in
    /// [`StandardizedModel::data`].
    pub fn variables(&self) -> &[VariableInfo] {
        &self.variables
    }

    /// Looks a variable up by its new name or by its original term text.
    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables
            .iter()
            .find(|v| v.name == name || v.original == name)
    }

    pub fn descriptors(&self) -> &BTreeMap<String, TransformDescriptor> {
        &self.descriptors
    }

    pub fn descriptor(&self, name: &str) -> Option<&TransformDescriptor> {
        self.descriptors.get(name)
    }

    /// Contrast matrices of the factor variables, by new name.
    pub fn contrasts(&self) -> &BTreeMap<String, Array2<f64>> {
        &self.contrasts
    }

    /// Levels of the random-effect grouping variables, by new name.
    pub fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    /// The standardized training table. Empty for a model loaded from disk.
    pub fn data(&self) -> &Table {
        &self.data
    }

    /// Saves the replay recipe to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a model saved with [`StandardizedModel::save`].
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_name() {
        assert_eq!(Family::from("Gaussian"), Family::Gaussian);
        assert_eq!(Family::from("binomial"), Family::Binomial);
        assert_eq!(Family::from("inverse.gaussian"), Family::InverseGaussian);
        assert_eq!(
            Family::from("quasipoisson"),
            Family::Other("quasipoisson".to_string())
        );
        assert!(!Family::from("poisson").is_gaussian());
    }

    #[test]
    fn test_options_defaults_and_validation() {
        let options = StandardizeOptions::default();
        assert_eq!(options.family, Family::Gaussian);
        assert_eq!(options.scale, 1.0);
        assert!(options.offset.is_none());
        assert!(options.validate().is_ok());

        let options = options.with_scale(0.5).with_family("poisson").with_offset("exposure");
        assert_eq!(options.scale, 0.5);
        assert_eq!(options.family, Family::Poisson);
        assert_eq!(options.offset.as_deref(), Some("exposure"));

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                StandardizeOptions::default().with_scale(bad).validate(),
                Err(StandardizeError::InvalidScale(_))
            ));
        }
    }
}
