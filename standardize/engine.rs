//! # Transform Engine
//!
//! Drives a standardization call from formula text to a finished
//! [`StandardizedModel`]:
//!
//! 1. Parse the formula and merge repeated uses of a variable into one plan.
//! 2. Fit the response (and the offset, which follows the response scale).
//! 3. Classify and fit every other variable, in parallel.
//! 4. Name the outputs and rewrite the formula.
//!
//! Every descriptor is fitted first and then replayed on the training data,
//! so the returned table is exactly what [`StandardizedModel::predict`]
//! produces for the same rows.

use crate::classify::{VariableClass, classify};
use crate::contrasts::{ContrastError, OrthogonalPolynomial, ordered_contrast, sort_levels, sum_contrast};
use crate::descriptor::{ReplayError, TransformDescriptor, evaluate, group_keys};
use crate::formula::{Expr, FormulaError, ParsedFormula, Role, Term, Wrapper, parse_formula};
use crate::model::{CallInfo, OffsetInfo, StandardizeOptions, StandardizedModel, VariableInfo};
use crate::names::{NameRegistry, rewrite_formula};
use crate::scaling::{GroupedScaling, ScalingError, ScalingParams, mean_and_sd};
use crate::table::{Column, Table, TableError};
use ahash::AHashMap;
use rayon::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

/// Everything that can abort a standardization call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StandardizeError {
    #[error("Invalid formula: {0}")]
    Formula(#[from] FormulaError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error("The scale must be positive and finite, got {0}.")]
    InvalidScale(f64),

    #[error(
        "An offset was given both in the formula ('{formula}') and in the options ('{option}'). Use only one."
    )]
    ConflictingOffsets { formula: String, option: String },

    #[error("The factor '{variable}' needs at least two levels, but has {levels}.")]
    DegenerateFactor { variable: String, levels: usize },

    #[error(
        "The variable '{variable}'{} has zero or undefined standard deviation and cannot be scaled.",
        in_group(.group)
    )]
    ZeroVariance {
        variable: String,
        group: Option<String>,
    },

    #[error("Could not build the basis for '{variable}': {source}")]
    Contrast {
        variable: String,
        source: ContrastError,
    },
}

fn in_group(group: &Option<String>) -> String {
    match group {
        Some(g) => format!(" in group '{g}'"),
        None => String::new(),
    }
}

/// Standardizes the variables of `formula` in `data`.
///
/// The input table is not modified. Any failure aborts the whole call.
pub fn standardize(
    formula: &str,
    data: &Table,
    options: &StandardizeOptions,
) -> Result<StandardizedModel, StandardizeError> {
    // --- 1. Validate inputs and plan the variables ---
    options.validate()?;
    let parsed = parse_formula(formula)?;
    let response_plan = internal::Plan::from_term(parsed.response_term());
    let plans = internal::plan_predictors(&parsed, options)?;

    log::info!(
        "Standardizing '{}' over {} rows: response plus {} variables, scale {}.",
        formula.trim(),
        data.height(),
        plans.len(),
        options.scale
    );

    // --- 2. Fit the response ---
    let response = internal::fit_response(&response_plan, data, options)?;

    // --- 3. Fit every other variable, in parallel ---
    let fitted: Vec<internal::Fitted> = plans
        .par_iter()
        .map(|plan| internal::fit_plan(plan, data, options, &response.descriptor))
        .collect::<Result<Vec<_>, _>>()?;

    // --- 4. Name outputs, rewrite the formula, assemble ---
    let model = internal::assemble(&parsed, formula, options, response, fitted)?;
    log::info!("Standardized formula: {}", model.formula());
    Ok(model)
}

mod internal {
    use super::*;

    /// One variable to standardize, merged over all of its uses.
    #[derive(Debug, Clone)]
    pub(super) struct Plan {
        pub(super) raw: String,
        pub(super) source: Expr,
        pub(super) wrapper: Wrapper,
        pub(super) grouping: Option<Vec<String>>,
        pub(super) roles: Vec<Role>,
        /// An opaque call resolved by column name.
        pub(super) is_expression: bool,
    }

    impl Plan {
        pub(super) fn from_term(term: &Term) -> Self {
            let is_expression = term.wrapper == Wrapper::None
                && term.role != Role::Offset
                && matches!(term.inner, Expr::Call { .. });
            Self {
                raw: term.raw.clone(),
                source: term.inner.clone(),
                wrapper: term.wrapper,
                grouping: term.grouping.clone(),
                roles: vec![term.role],
                is_expression,
            }
        }

        fn has_role(&self, role: Role) -> bool {
            self.roles.contains(&role)
        }
    }

    /// A fitted plan with its training output.
    #[derive(Debug)]
    pub(super) struct Fitted {
        pub(super) plan: Plan,
        pub(super) descriptor: TransformDescriptor,
        pub(super) columns: Vec<Column>,
    }

    /// Merges the right-hand-side terms by text, in order of first use, and
    /// appends an offset given through the options.
    pub(super) fn plan_predictors(
        parsed: &ParsedFormula,
        options: &StandardizeOptions,
    ) -> Result<Vec<Plan>, StandardizeError> {
        let mut plans: Vec<Plan> = Vec::new();
        for term in &parsed.terms[1..] {
            match plans.iter_mut().find(|p| p.raw == term.raw) {
                Some(existing) => {
                    if !existing.roles.contains(&term.role) {
                        existing.roles.push(term.role);
                    }
                }
                None => plans.push(Plan::from_term(term)),
            }
        }

        if let Some(column) = &options.offset {
            if let Some(term) = parsed.offset_term() {
                return Err(StandardizeError::ConflictingOffsets {
                    formula: term.raw.clone(),
                    option: column.clone(),
                });
            }
            let source = Expr::Variable(column.clone());
            plans.push(Plan {
                raw: format!("offset({source})"),
                source,
                wrapper: Wrapper::None,
                grouping: None,
                roles: vec![Role::Offset],
                is_expression: false,
            });
        }

        for plan in &mut plans {
            plan.roles.sort();
        }
        Ok(plans)
    }

    fn zero_variance(variable: &str, err: ScalingError) -> StandardizeError {
        match err {
            ScalingError::ZeroVariance { group, .. } => StandardizeError::ZeroVariance {
                variable: variable.to_string(),
                group,
            },
            other => StandardizeError::Replay(ReplayError::Scaling(other)),
        }
    }

    fn numeric<'a>(plan: &Plan, values: &'a Column) -> Result<&'a ndarray::Array1<f64>, StandardizeError> {
        values.as_numeric().ok_or_else(|| {
            StandardizeError::Replay(ReplayError::NotNumeric {
                variable: plan.raw.clone(),
                found: values.type_name(),
            })
        })
    }

    fn replay(plan: Plan, descriptor: TransformDescriptor, values: &Column, data: &Table) -> Result<Fitted, StandardizeError> {
        let columns = descriptor.replay(&plan.raw, values, data)?;
        log::debug!(
            "Fitted '{}' as {:?} ({} column(s)).",
            plan.raw,
            descriptor.class(),
            columns.len()
        );
        Ok(Fitted {
            plan,
            descriptor,
            columns,
        })
    }

    /// Gaussian responses are scaled to mean 0 and standard deviation 1
    /// (per group for `scale_by`); other families pass through.
    pub(super) fn fit_response(
        plan: &Plan,
        data: &Table,
        options: &StandardizeOptions,
    ) -> Result<Fitted, StandardizeError> {
        let values = evaluate(&plan.source, data)?;
        let descriptor = if !options.family.is_gaussian() {
            log::info!(
                "Leaving the response '{}' unchanged for the {:?} family.",
                plan.raw,
                options.family
            );
            TransformDescriptor::Passthrough
        } else {
            fit_continuous(plan, &values, data, 1.0)?
        };
        replay(plan.clone(), descriptor, &values, data)
    }

    fn fit_continuous(
        plan: &Plan,
        values: &Column,
        data: &Table,
        target: f64,
    ) -> Result<TransformDescriptor, StandardizeError> {
        let x = numeric(plan, values)?;
        match &plan.grouping {
            Some(grouping) => {
                let keys = group_keys(grouping, data)?;
                let scaling = GroupedScaling::fit(x.view(), &keys, grouping.clone())
                    .map_err(|e| zero_variance(&plan.raw, e))?;
                Ok(TransformDescriptor::GroupedContinuous { scaling, target })
            }
            None => {
                let params =
                    ScalingParams::fit(x.view()).map_err(|e| zero_variance(&plan.raw, e))?;
                Ok(TransformDescriptor::Continuous {
                    center: params.center,
                    scale: params.scale,
                    target,
                })
            }
        }
    }

    /// The offset keeps its origin and is divided by the response standard
    /// deviation, per group when the response is grouped.
    fn offset_descriptor(response: &TransformDescriptor) -> TransformDescriptor {
        match response {
            TransformDescriptor::Continuous { scale, .. } => TransformDescriptor::Continuous {
                center: 0.0,
                scale: *scale,
                target: 1.0,
            },
            TransformDescriptor::GroupedContinuous { scaling, .. } => {
                let groups = scaling
                    .groups
                    .iter()
                    .map(|(key, params)| {
                        (
                            key.clone(),
                            ScalingParams {
                                center: 0.0,
                                scale: params.scale,
                            },
                        )
                    })
                    .collect();
                TransformDescriptor::GroupedContinuous {
                    scaling: GroupedScaling {
                        grouping: scaling.grouping.clone(),
                        groups,
                    },
                    target: 1.0,
                }
            }
            _ => TransformDescriptor::Passthrough,
        }
    }

    pub(super) fn fit_plan(
        plan: &Plan,
        data: &Table,
        options: &StandardizeOptions,
        response: &TransformDescriptor,
    ) -> Result<Fitted, StandardizeError> {
        let values = evaluate(&plan.source, data)?;
        if plan.is_expression {
            log::warn!(
                "'{}' is not evaluated; using the column with that exact name.",
                plan.raw
            );
        }

        if plan.has_role(Role::Offset) {
            return replay(plan.clone(), offset_descriptor(response), &values, data);
        }

        let class = classify(
            plan.wrapper,
            plan.has_role(Role::RandomGroup),
            plan.is_expression,
            &values,
        );
        let scale = options.scale;
        let descriptor = match class {
            VariableClass::Continuous | VariableClass::GroupedContinuous => {
                fit_continuous(plan, &values, data, scale)?
            }
            VariableClass::UnorderedFactor => {
                let levels = values.distinct_labels();
                let contrast =
                    sum_contrast(&levels, scale).map_err(|e| contrast_error(plan, levels.len(), e))?;
                TransformDescriptor::UnorderedFactor { contrast }
            }
            VariableClass::OrderedFactor => {
                let levels = values.distinct_labels();
                let n = levels.len();
                let contrast =
                    ordered_contrast(levels, scale).map_err(|e| contrast_error(plan, n, e))?;
                TransformDescriptor::OrderedFactor { contrast }
            }
            VariableClass::GroupingFactor => {
                let levels = match &values {
                    Column::Factor(_) => values.distinct_labels(),
                    _ => sort_levels(&values.distinct_labels()),
                };
                if levels.len() < 2 {
                    return Err(StandardizeError::DegenerateFactor {
                        variable: plan.raw.clone(),
                        levels: levels.len(),
                    });
                }
                TransformDescriptor::GroupingFactor { levels }
            }
            VariableClass::Polynomial => fit_polynomial(plan, &values, scale)?,
            VariableClass::Unchanged => TransformDescriptor::Passthrough,
        };
        replay(plan.clone(), descriptor, &values, data)
    }

    fn contrast_error(plan: &Plan, levels: usize, err: ContrastError) -> StandardizeError {
        match err {
            ContrastError::TooFewLevels(_) => StandardizeError::DegenerateFactor {
                variable: plan.raw.clone(),
                levels,
            },
            source => StandardizeError::Contrast {
                variable: plan.raw.clone(),
                source,
            },
        }
    }

    /// Fits the orthogonal basis on the training values and records, per
    /// degree, the factor that brings the column to standard deviation
    /// `scale`.
    fn fit_polynomial(plan: &Plan, values: &Column, scale: f64) -> Result<TransformDescriptor, StandardizeError> {
        let degree = match plan.wrapper {
            Wrapper::Polynomial { degree } => degree,
            _ => 1,
        };
        let x = numeric(plan, values)?;
        let basis = OrthogonalPolynomial::fit(x.view(), degree).map_err(|source| {
            StandardizeError::Contrast {
                variable: plan.raw.clone(),
                source,
            }
        })?;
        let expanded = basis.evaluate(x.view());
        let factors = expanded
            .columns()
            .into_iter()
            .map(|column| {
                let (_, sd, _) = mean_and_sd(column);
                if sd.is_finite() && sd > 0.0 {
                    Ok(scale / sd)
                } else {
                    Err(StandardizeError::ZeroVariance {
                        variable: plan.raw.clone(),
                        group: None,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransformDescriptor::Polynomial { basis, factors })
    }

    /// Claims names in output order, renders the formula and builds the
    /// model.
    pub(super) fn assemble(
        parsed: &ParsedFormula,
        formula: &str,
        options: &StandardizeOptions,
        response: Fitted,
        fitted: Vec<Fitted>,
    ) -> Result<StandardizedModel, StandardizeError> {
        let mut registry = NameRegistry::new();
        let mut replacements: AHashMap<String, String> = AHashMap::new();
        let mut variables = Vec::with_capacity(fitted.len() + 1);
        let mut descriptors = BTreeMap::new();
        let mut contrasts = BTreeMap::new();
        let mut groups = BTreeMap::new();
        let mut offset = None;
        let mut data = Table::new();

        for item in std::iter::once(response).chain(fitted) {
            let Fitted {
                plan,
                descriptor,
                columns,
            } = item;

            let name = registry.claim(&plan.raw);
            let column_names: Vec<String> = if columns.len() == 1 {
                vec![name.clone()]
            } else {
                (1..=columns.len())
                    .map(|k| registry.claim(&format!("{name}_{k}")))
                    .collect()
            };

            let rendered = if plan.has_role(Role::Offset) {
                offset = Some(OffsetInfo {
                    original: plan.raw.clone(),
                    name: name.clone(),
                });
                format!("offset({name})")
            } else if column_names.len() > 1 {
                format!("({})", column_names.join(" + "))
            } else {
                name.clone()
            };
            replacements.insert(plan.raw.clone(), rendered);

            for (column_name, column) in column_names.iter().zip(columns) {
                data.push_column(column_name.clone(), column)?;
            }
            if let Some(contrast) = descriptor.contrast() {
                contrasts.insert(name.clone(), contrast.matrix.clone());
            }
            if let TransformDescriptor::GroupingFactor { levels } = &descriptor {
                groups.insert(name.clone(), levels.clone());
            }

            variables.push(VariableInfo {
                original: plan.raw,
                name: name.clone(),
                class: descriptor.class(),
                roles: plan.roles,
                source: plan.source,
                columns: column_names,
            });
            descriptors.insert(name, descriptor);
        }

        // An offset given through the options is not part of the parsed text.
        let mut rewritten = rewrite_formula(parsed, &replacements);
        if let (Some(info), Some(_)) = (&offset, &options.offset) {
            rewritten.push_str(&format!(" + offset({})", info.name));
        }

        Ok(StandardizedModel {
            scale: options.scale,
            formula: rewritten,
            family: options.family.clone(),
            call: CallInfo {
                formula: formula.trim().to_string(),
                options: options.clone(),
            },
            offset,
            variables,
            descriptors,
            contrasts,
            groups,
            data,
        })
    }
}
