//! Decides how each variable of a formula is standardized.
//!
//! The class is computed once, from the training table, and frozen into the
//! variable's transform descriptor. Prediction never re-classifies.

use crate::formula::Wrapper;
use crate::table::Column;
use serde::{Deserialize, Serialize};

/// The kind of transform a variable receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableClass {
    Continuous,
    GroupedContinuous,
    UnorderedFactor,
    OrderedFactor,
    GroupingFactor,
    /// Orthogonal polynomial expansion of a `poly(x, d)` term.
    Polynomial,
    /// Left as observed (non-gaussian response, or an offset passed through).
    Unchanged,
}

impl VariableClass {
    pub fn is_factor(self) -> bool {
        matches!(
            self,
            VariableClass::UnorderedFactor
                | VariableClass::OrderedFactor
                | VariableClass::GroupingFactor
        )
    }
}

/// Classifies one variable use.
///
/// Priority, highest first: random-effect grouping variable, grouped scaling
/// wrapper, polynomial wrapper, log wrapper or opaque expression (always
/// continuous), declared ordered factor with other than two observed levels,
/// textual values or exactly two distinct values (unordered factor), and
/// finally continuous. A two-level ordered factor is coded like any binary
/// variable.
///
/// `values` is the evaluated training column the transform will see.
pub fn classify(wrapper: Wrapper, is_grouping: bool, is_expression: bool, values: &Column) -> VariableClass {
    if is_grouping {
        return VariableClass::GroupingFactor;
    }
    match wrapper {
        Wrapper::GroupedScale => return VariableClass::GroupedContinuous,
        Wrapper::Polynomial { .. } => return VariableClass::Polynomial,
        Wrapper::Log => return VariableClass::Continuous,
        Wrapper::None => {}
    }
    if is_expression {
        return VariableClass::Continuous;
    }
    if values.is_ordered_factor() && values.distinct_labels().len() != 2 {
        return VariableClass::OrderedFactor;
    }
    if values.is_textual() || values.distinct_labels().len() == 2 {
        return VariableClass::UnorderedFactor;
    }
    VariableClass::Continuous
}
