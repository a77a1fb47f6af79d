//! # Transform Descriptors
//!
//! A descriptor is the complete, serializable recipe for one variable's
//! transform: the statistics and matrices fitted on the training table, and
//! nothing else. Replaying a descriptor is a pure function of the descriptor
//! and the table it is replayed against, which is what makes training-time
//! and prediction-time output identical.
//!
//! Replay happens in two steps. [`evaluate`] turns a term's source expression
//! (`x`, `log(x)`, or an opaque call resolved by name) into a column, then
//! [`TransformDescriptor::replay`] maps that column to the output column(s).

use crate::classify::VariableClass;
use crate::contrasts::{ContrastSpec, OrthogonalPolynomial};
use crate::formula::Expr;
use crate::scaling::{GroupedScaling, ScalingError, ScalingParams};
use crate::table::{Column, Factor, Table, TableError};
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Scaling(#[from] ScalingError),

    #[error("The variable '{variable}' must be numeric, but it is {found}.")]
    NotNumeric {
        variable: String,
        found: &'static str,
    },

    #[error("Cannot take log() of '{variable}': it contains the non-positive value {value}.")]
    NonPositiveLog { variable: String, value: f64 },

    #[error(
        "The expression '{0}' is not evaluated; provide a column with exactly this name instead."
    )]
    UnresolvedExpression(String),

    #[error(
        "The variable '{variable}' has the level '{level}', which was not seen during standardization. Known levels: {levels:?}."
    )]
    UnseenLevel {
        variable: String,
        level: String,
        levels: Vec<String>,
    },

    #[error("The variable '{variable}' has the group '{group}', which was not seen during standardization.")]
    UnseenGroup { variable: String, group: String },

    #[error("No stored transform exists for '{0}'.")]
    MissingDescriptor(String),
}

/// The replayable transform of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformDescriptor {
    /// `(x - center) / scale * target`
    Continuous { center: f64, scale: f64, target: f64 },
    /// Continuous scaling with per-group statistics.
    GroupedContinuous { scaling: GroupedScaling, target: f64 },
    UnorderedFactor { contrast: ContrastSpec },
    OrderedFactor { contrast: ContrastSpec },
    /// A random-effect grouping variable: a plain factor over stored levels.
    GroupingFactor { levels: Vec<String> },
    /// `poly(x, d)`: the fitted basis, then column `k` times `factors[k]`.
    Polynomial {
        basis: OrthogonalPolynomial,
        factors: Vec<f64>,
    },
    /// Values are copied unchanged.
    Passthrough,
}

impl TransformDescriptor {
    pub fn class(&self) -> VariableClass {
        match self {
            TransformDescriptor::Continuous { .. } => VariableClass::Continuous,
            TransformDescriptor::GroupedContinuous { .. } => VariableClass::GroupedContinuous,
            TransformDescriptor::UnorderedFactor { .. } => VariableClass::UnorderedFactor,
            TransformDescriptor::OrderedFactor { .. } => VariableClass::OrderedFactor,
            TransformDescriptor::GroupingFactor { .. } => VariableClass::GroupingFactor,
            TransformDescriptor::Polynomial { .. } => VariableClass::Polynomial,
            TransformDescriptor::Passthrough => VariableClass::Unchanged,
        }
    }

    /// Number of output columns the descriptor produces.
    pub fn width(&self) -> usize {
        match self {
            TransformDescriptor::Polynomial { factors, .. } => factors.len(),
            _ => 1,
        }
    }

    /// The contrast matrix coding a factor output, if any.
    pub fn contrast(&self) -> Option<&ContrastSpec> {
        match self {
            TransformDescriptor::UnorderedFactor { contrast }
            | TransformDescriptor::OrderedFactor { contrast } => Some(contrast),
            _ => None,
        }
    }

    /// Applies the stored transform to `values`, the evaluated source of
    /// `variable`. `table` supplies grouping columns.
    ///
    /// Nothing is re-estimated. Missing values stay missing, and levels or
    /// groups absent from the stored parameters are errors.
    pub fn replay(&self, variable: &str, values: &Column, table: &Table) -> Result<Vec<Column>, ReplayError> {
        match self {
            TransformDescriptor::Continuous {
                center,
                scale,
                target,
            } => {
                let x = numeric(variable, values)?;
                let params = ScalingParams {
                    center: *center,
                    scale: *scale,
                };
                Ok(vec![Column::Numeric(params.apply(x.view(), *target))])
            }
            TransformDescriptor::GroupedContinuous { scaling, target } => {
                let x = numeric(variable, values)?;
                let keys = group_keys(&scaling.grouping, table)?;
                let scaled = scaling
                    .apply(x.view(), &keys, *target)
                    .map_err(|e| match e {
                        ScalingError::UnknownGroup(group) => ReplayError::UnseenGroup {
                            variable: variable.to_string(),
                            group,
                        },
                        other => ReplayError::Scaling(other),
                    })?;
                Ok(vec![Column::Numeric(scaled)])
            }
            TransformDescriptor::UnorderedFactor { contrast } => {
                Ok(vec![coded_factor(variable, values, contrast, false)?])
            }
            TransformDescriptor::OrderedFactor { contrast } => {
                Ok(vec![coded_factor(variable, values, contrast, true)?])
            }
            TransformDescriptor::GroupingFactor { levels } => {
                let factor = Factor::with_levels(values.labels(), levels.clone(), false).map_err(
                    |e| match e {
                        TableError::UnknownLevel { value, .. } => ReplayError::UnseenGroup {
                            variable: variable.to_string(),
                            group: value,
                        },
                        other => ReplayError::Table(other),
                    },
                )?;
                Ok(vec![Column::Factor(factor)])
            }
            TransformDescriptor::Polynomial { basis, factors } => {
                let x = numeric(variable, values)?;
                let mut expanded = basis.evaluate(x.view());
                for (mut column, factor) in expanded.axis_iter_mut(Axis(1)).zip(factors) {
                    column.mapv_inplace(|v| v * factor);
                }
                Ok(expanded
                    .columns()
                    .into_iter()
                    .map(|c| Column::Numeric(c.to_owned()))
                    .collect())
            }
            TransformDescriptor::Passthrough => Ok(vec![values.clone()]),
        }
    }
}

fn numeric<'a>(variable: &str, values: &'a Column) -> Result<&'a Array1<f64>, ReplayError> {
    values.as_numeric().ok_or_else(|| ReplayError::NotNumeric {
        variable: variable.to_string(),
        found: values.type_name(),
    })
}

fn coded_factor(
    variable: &str,
    values: &Column,
    contrast: &ContrastSpec,
    ordered: bool,
) -> Result<Column, ReplayError> {
    let factor = Factor::with_levels(values.labels(), contrast.levels.clone(), ordered).map_err(
        |e| match e {
            TableError::UnknownLevel { value, levels } => ReplayError::UnseenLevel {
                variable: variable.to_string(),
                level: value,
                levels,
            },
            other => ReplayError::Table(other),
        },
    )?;
    Ok(Column::Factor(factor.with_contrasts(contrast.matrix.clone())))
}

/// Row-wise group keys for one or more grouping columns.
///
/// Labels of several columns are joined with `:`; a row missing any
/// component has no key.
pub fn group_keys<S: AsRef<str>>(grouping: &[S], table: &Table) -> Result<Vec<Option<String>>, ReplayError> {
    let columns = grouping
        .iter()
        .map(|name| table.column(name.as_ref()).map(Column::labels))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((0..table.height())
        .map(|row| {
            columns
                .iter()
                .map(|labels| labels[row].as_deref())
                .collect::<Option<Vec<&str>>>()
                .map(|parts| parts.join(":"))
        })
        .collect())
}

/// Evaluates the source expression of a term against `table`.
///
/// Only plain variables and `log(variable)` are computed. Any other call
/// must already exist as a column named by its exact text.
pub fn evaluate(expr: &Expr, table: &Table) -> Result<Column, ReplayError> {
    match expr {
        Expr::Variable(name) => Ok(table.column(name)?.clone()),
        Expr::Call { name, args } if name == "log" => match args.as_slice() {
            [Expr::Variable(variable)] => {
                let column = table.column(variable)?;
                let x = numeric(variable, column)?;
                if let Some(&value) = x.iter().find(|v| **v <= 0.0) {
                    return Err(ReplayError::NonPositiveLog {
                        variable: variable.clone(),
                        value,
                    });
                }
                Ok(Column::Numeric(x.mapv(f64::ln)))
            }
            _ => Err(ReplayError::UnresolvedExpression(expr.to_string())),
        },
        _ => {
            let text = expr.to_string();
            match table.get(&text) {
                Some(column) => {
                    log::debug!("Using column '{text}' for the expression of the same text.");
                    Ok(column.clone())
                }
                None => Err(ReplayError::UnresolvedExpression(text)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contrasts::sum_contrast;
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    fn grouped_table() -> Table {
        Table::from_columns(vec![
            ("x", Column::numeric(vec![1.0, 2.0, 3.0, 4.0])),
            ("g", Column::text(&["a", "a", "b", "b"])),
            ("h", Column::Text(vec![Some("u".into()), Some("v".into()), None, Some("v".into())])),
        ])
        .unwrap()
    }

    #[test]
    fn test_group_keys_join_components() {
        let table = grouped_table();
        let keys = group_keys(&["g", "h"], &table).unwrap();
        assert_eq!(
            keys,
            vec![
                Some("a:u".to_string()),
                Some("a:v".to_string()),
                None,
                Some("b:v".to_string())
            ]
        );
    }

    #[test]
    fn test_grouped_replay_reports_unseen_group() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "a".to_string(),
            ScalingParams {
                center: 1.5,
                scale: 0.5,
            },
        );
        let descriptor = TransformDescriptor::GroupedContinuous {
            scaling: GroupedScaling {
                grouping: vec!["g".to_string()],
                groups,
            },
            target: 1.0,
        };
        let table = grouped_table();
        let err = descriptor
            .replay("x", table.column("x").unwrap(), &table)
            .unwrap_err();
        assert_eq!(
            err,
            ReplayError::UnseenGroup {
                variable: "x".to_string(),
                group: "b".to_string()
            }
        );
    }

    #[test]
    fn test_factor_replay_carries_contrasts() {
        let contrast = sum_contrast(&["a", "b"], 0.5).unwrap();
        let descriptor = TransformDescriptor::UnorderedFactor { contrast };
        let values = Column::Text(vec![Some("b".into()), None, Some("a".into())]);

        let out = descriptor.replay("g", &values, &Table::new()).unwrap();
        let Column::Factor(factor) = &out[0] else {
            panic!("expected a factor column");
        };
        assert_eq!(factor.codes(), &[Some(1), None, Some(0)]);
        assert_eq!(factor.contrasts().unwrap()[[1, 0]], -0.5);

        let unseen = Column::text(&["c"]);
        assert!(matches!(
            descriptor.replay("g", &unseen, &Table::new()),
            Err(ReplayError::UnseenLevel { level, .. }) if level == "c"
        ));
    }

    #[test]
    fn test_evaluate_log_and_opaque_calls() {
        let table = Table::from_columns(vec![
            ("x", Column::numeric(vec![1.0, std::f64::consts::E, f64::NAN])),
            ("sqrt(z)", Column::numeric(vec![1.0, 2.0, 3.0])),
        ])
        .unwrap();

        let logged = evaluate(&Expr::log_of("x"), &table).unwrap();
        let values = logged.as_numeric().unwrap();
        assert_abs_diff_eq!(values[1], 1.0, epsilon = 1e-12);
        assert!(values[2].is_nan());

        let opaque = Expr::Call {
            name: "sqrt".to_string(),
            args: vec![Expr::Variable("z".to_string())],
        };
        assert!(evaluate(&opaque, &table).is_ok());

        let missing = Expr::Call {
            name: "exp".to_string(),
            args: vec![Expr::Variable("z".to_string())],
        };
        assert_eq!(
            evaluate(&missing, &table),
            Err(ReplayError::UnresolvedExpression("exp(z)".to_string()))
        );

        let bad = Table::from_columns(vec![("x", Column::numeric(vec![1.0, 0.0]))]).unwrap();
        assert!(matches!(
            evaluate(&Expr::log_of("x"), &bad),
            Err(ReplayError::NonPositiveLog { value, .. }) if value == 0.0
        ));
    }

    #[test]
    fn test_polynomial_replay_applies_factors() {
        let x = ndarray::array![1.0, 2.0, 3.0, 4.0];
        let basis = OrthogonalPolynomial::fit(x.view(), 2).unwrap();
        let plain = basis.evaluate(x.view());
        let descriptor = TransformDescriptor::Polynomial {
            basis,
            factors: vec![2.0, 3.0],
        };
        let out = descriptor
            .replay("x", &Column::Numeric(x), &Table::new())
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].as_numeric().unwrap()[0], plain[[0, 1]] * 3.0);
    }
}
