//! # Scaling Parameters
//!
//! Center and scale statistics for continuous variables, either for the whole
//! column or per group. The statistics are computed once at fit time and then
//! applied unchanged to any data, which keeps training and prediction
//! transforms identical.
//!
//! The center is the mean and the scale the sample standard deviation
//! (`n - 1` denominator). Missing values (`NaN`) are ignored by the fit and
//! stay missing after application.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScalingError {
    #[error(
        "{} has zero or undefined standard deviation ({observations} non-missing observations).",
        describe_group(.group)
    )]
    ZeroVariance {
        group: Option<String>,
        observations: usize,
    },

    #[error("The group '{0}' was not present when the scaling parameters were fitted.")]
    UnknownGroup(String),

    #[error("Got {values} values but {keys} group keys.")]
    LengthMismatch { values: usize, keys: usize },
}

fn describe_group(group: &Option<String>) -> String {
    match group {
        Some(g) => format!("Group '{g}'"),
        None => "The variable".to_string(),
    }
}

/// Mean and sample standard deviation of the non-missing values.
pub fn mean_and_sd(values: ArrayView1<'_, f64>) -> (f64, f64, usize) {
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let n = present.len();
    if n == 0 {
        return (f64::NAN, f64::NAN, 0);
    }
    let mean = present.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN, n);
    }
    let ss: f64 = present.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (ss / (n - 1) as f64).sqrt(), n)
}

/// Center and scale of one variable (or one group of it).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingParams {
    pub center: f64,
    pub scale: f64,
}

impl ScalingParams {
    /// Fits the mean and sample standard deviation. The standard deviation
    /// must be positive and finite.
    pub fn fit(values: ArrayView1<'_, f64>) -> Result<Self, ScalingError> {
        Self::fit_group(values, None)
    }

    fn fit_group(values: ArrayView1<'_, f64>, group: Option<&str>) -> Result<Self, ScalingError> {
        let (center, scale, observations) = mean_and_sd(values);
        if !(scale.is_finite() && scale > 0.0 && center.is_finite()) {
            return Err(ScalingError::ZeroVariance {
                group: group.map(str::to_string),
                observations,
            });
        }
        Ok(Self { center, scale })
    }

    /// `(x - center) / scale * target`
    #[inline]
    pub fn apply_value(&self, x: f64, target: f64) -> f64 {
        (x - self.center) / self.scale * target
    }

    pub fn apply(&self, values: ArrayView1<'_, f64>, target: f64) -> Array1<f64> {
        values.mapv(|x| self.apply_value(x, target))
    }
}

/// Per-group scaling parameters, keyed by the group label.
///
/// Combined groupings (`g1:g2`) use keys that join the component labels with
/// `:`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedScaling {
    pub grouping: Vec<String>,
    pub groups: BTreeMap<String, ScalingParams>,
}

impl GroupedScaling {
    /// Fits one set of parameters per observed group. Rows with a missing key
    /// do not contribute to any group.
    pub fn fit(
        values: ArrayView1<'_, f64>,
        keys: &[Option<String>],
        grouping: Vec<String>,
    ) -> Result<Self, ScalingError> {
        check_lengths(values.len(), keys.len())?;

        let mut members: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for (value, key) in values.iter().zip(keys) {
            if let Some(key) = key {
                members.entry(key.as_str()).or_default().push(*value);
            }
        }

        let groups = members
            .into_iter()
            .map(|(key, group_values)| {
                let params = ScalingParams::fit_group(ArrayView1::from(&group_values), Some(key))?;
                Ok((key.to_string(), params))
            })
            .collect::<Result<BTreeMap<_, _>, ScalingError>>()?;

        Ok(Self { grouping, groups })
    }

    /// Applies the stored parameters row by row. A missing key yields a
    /// missing value; a key that was never fitted is an error.
    pub fn apply(
        &self,
        values: ArrayView1<'_, f64>,
        keys: &[Option<String>],
        target: f64,
    ) -> Result<Array1<f64>, ScalingError> {
        check_lengths(values.len(), keys.len())?;
        values
            .iter()
            .zip(keys)
            .map(|(&x, key)| match key {
                None => Ok(f64::NAN),
                Some(key) => self
                    .groups
                    .get(key)
                    .map(|params| params.apply_value(x, target))
                    .ok_or_else(|| ScalingError::UnknownGroup(key.clone())),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Array1::from_vec)
    }
}

fn check_lengths(values: usize, keys: usize) -> Result<(), ScalingError> {
    if values != keys {
        return Err(ScalingError::LengthMismatch { values, keys });
    }
    Ok(())
}

/// Standalone grouped scaling: centers each group on its own mean and divides
/// by its own standard deviation, times `target`.
pub fn scale_by(
    values: ArrayView1<'_, f64>,
    keys: &[Option<String>],
    target: f64,
) -> Result<Array1<f64>, ScalingError> {
    GroupedScaling::fit(values, keys, Vec::new())?.apply(values, keys, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn keys(labels: &[&str]) -> Vec<Option<String>> {
        labels.iter().map(|l| Some(l.to_string())).collect()
    }

    #[test]
    fn test_fit_ignores_missing_values() {
        let values = array![1.0, f64::NAN, 2.0, 3.0];
        let params = ScalingParams::fit(values.view()).unwrap();
        assert_abs_diff_eq!(params.center, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(params.scale, 1.0, epsilon = 1e-12);

        let scaled = params.apply(values.view(), 0.5);
        assert_abs_diff_eq!(scaled[0], -0.5, epsilon = 1e-12);
        assert!(scaled[1].is_nan());
        assert_abs_diff_eq!(scaled[3], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_values_have_target_sd() {
        let values = array![3.1, 4.7, 9.2, -1.0, 0.4, 7.7];
        let params = ScalingParams::fit(values.view()).unwrap();
        let scaled = params.apply(values.view(), 0.5);
        let (mean, sd, n) = mean_and_sd(scaled.view());
        assert_eq!(n, 6);
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sd, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_variance_is_rejected() {
        let err = ScalingParams::fit(array![2.0, 2.0, 2.0].view()).unwrap_err();
        assert_eq!(
            err,
            ScalingError::ZeroVariance {
                group: None,
                observations: 3
            }
        );
        assert!(ScalingParams::fit(array![1.0, f64::NAN].view()).is_err());
    }

    #[test]
    fn test_grouped_scaling_with_unequal_groups() {
        let values = array![1.0, 2.0, 3.0, 10.0, 20.0, 100.0, 130.0, 160.0, 190.0];
        let labels = keys(&["a", "a", "a", "b", "b", "c", "c", "c", "c"]);

        let scaled = scale_by(values.view(), &labels, 1.0).unwrap();

        for group in ["a", "b", "c"] {
            let rows: Vec<f64> = scaled
                .iter()
                .zip(&labels)
                .filter(|(_, k)| k.as_deref() == Some(group))
                .map(|(v, _)| *v)
                .collect();
            let (mean, sd, _) = mean_and_sd(ArrayView1::from(&rows));
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(sd, 1.0, epsilon = 1e-12);
        }

        let (pooled_mean, pooled_sd, _) = mean_and_sd(scaled.view());
        assert_abs_diff_eq!(pooled_mean, 0.0, epsilon = 1e-12);
        // Within-group sds of 1 pool to sqrt((n - g) / (n - 1)).
        assert_abs_diff_eq!(pooled_sd, (6.0f64 / 8.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_grouped_apply_rejects_unknown_group() {
        let values = array![1.0, 2.0, 5.0, 7.0];
        let labels = keys(&["a", "a", "b", "b"]);
        let fitted = GroupedScaling::fit(values.view(), &labels, vec!["g".to_string()]).unwrap();

        let new_labels = vec![Some("a".to_string()), None, Some("z".to_string())];
        let err = fitted
            .apply(array![1.0, 2.0, 3.0].view(), &new_labels, 1.0)
            .unwrap_err();
        assert_eq!(err, ScalingError::UnknownGroup("z".to_string()));

        let ok = fitted
            .apply(array![1.5, 2.0].view(), &new_labels[..2], 1.0)
            .unwrap();
        assert_abs_diff_eq!(ok[0], 0.0, epsilon = 1e-12);
        assert!(ok[1].is_nan());
    }

    #[test]
    fn test_single_member_group_is_zero_variance() {
        let values = array![1.0, 2.0, 3.0];
        let labels = keys(&["a", "a", "b"]);
        let err = scale_by(values.view(), &labels, 1.0).unwrap_err();
        assert_eq!(
            err,
            ScalingError::ZeroVariance {
                group: Some("b".to_string()),
                observations: 1
            }
        );
    }
}
