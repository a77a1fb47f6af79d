//! # Prediction Mapping
//!
//! Replays a model's stored descriptors against new data. Nothing is
//! re-estimated: new rows are centered and scaled with the training
//! statistics and coded with the training contrasts, so a fitted regression
//! can be applied to them directly.

use crate::descriptor::{ReplayError, evaluate};
use crate::formula::Role;
use crate::model::{StandardizedModel, VariableInfo};
use crate::table::{Column, Table};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Which variables [`StandardizedModel::predict`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictOptions {
    pub response: bool,
    /// Fixed-effect predictors, and the offset.
    pub fixed: bool,
    /// Random-effect grouping variables and random slopes.
    pub random: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            response: false,
            fixed: true,
            random: true,
        }
    }
}

impl PredictOptions {
    /// Everything, including the response.
    pub fn all() -> Self {
        Self {
            response: true,
            fixed: true,
            random: true,
        }
    }

    pub fn fixed_only() -> Self {
        Self {
            response: false,
            fixed: true,
            random: false,
        }
    }

    pub fn random_only() -> Self {
        Self {
            response: false,
            fixed: false,
            random: true,
        }
    }

    fn selects(&self, role: Role) -> bool {
        match role {
            Role::Response => self.response,
            Role::Fixed | Role::Offset => self.fixed,
            Role::RandomGroup | Role::RandomSlope => self.random,
        }
    }
}

impl StandardizedModel {
    /// Standardizes `new_data` with the stored transforms.
    ///
    /// The result holds the selected variables' columns with the same names,
    /// types and order as in [`StandardizedModel::data`]. Missing values stay
    /// missing. A factor level or group that was not present at fit time is
    /// an error.
    pub fn predict(&self, new_data: &Table, options: PredictOptions) -> Result<Table, ReplayError> {
        let selected: Vec<&VariableInfo> = self
            .variables
            .iter()
            .filter(|v| v.roles.iter().any(|&role| options.selects(role)))
            .collect();
        log::info!(
            "Replaying {} of {} standardized variables on {} new rows.",
            selected.len(),
            self.variables.len(),
            new_data.height()
        );

        let replayed = selected
            .par_iter()
            .map(|info| self.replay_variable(info, new_data))
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Table::new();
        for (name, column) in replayed.into_iter().flatten() {
            out.push_column(name, column)?;
        }
        Ok(out)
    }

    fn replay_variable(&self, info: &VariableInfo, new_data: &Table) -> Result<Vec<(String, Column)>, ReplayError> {
        let descriptor = self
            .descriptors
            .get(&info.name)
            .ok_or_else(|| ReplayError::MissingDescriptor(info.name.clone()))?;
        let values = evaluate(&info.source, new_data)?;
        let columns = descriptor.replay(&info.original, &values, new_data)?;
        log::debug!("Replayed '{}' into {} column(s).", info.original, columns.len());
        Ok(info.columns.iter().cloned().zip(columns).collect())
    }
}
