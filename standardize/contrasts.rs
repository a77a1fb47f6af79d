//! # Contrasts
//!
//! Builds the coding matrices that replace factor dummies:
//!
//! - Sum contrasts for unordered factors. With `K` levels the matrix is
//!   `K × (K-1)`: `scale` on the diagonal of the first `K-1` rows and `-scale`
//!   across the last row, so every column sums to zero and the intercept is
//!   the unweighted grand mean.
//! - Scaled orthogonal polynomial contrasts for ordered factors. Columns
//!   are zero-mean, mutually orthogonal, and have a sample standard deviation
//!   of exactly `scale`.
//!
//! [`OrthogonalPolynomial`] is the underlying three-term-recurrence basis. It
//! is also used directly for `poly(x, d)` terms, where the basis is fitted on
//! the training values and re-evaluated on new data from its stored
//! coefficients.

use crate::names::sanitize;
use crate::scaling::mean_and_sd;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContrastError {
    #[error("A contrast needs at least two levels, but only {0} were given.")]
    TooFewLevels(usize),

    #[error("The contrast scale must be positive and finite, got {0}.")]
    InvalidScale(f64),

    #[error(
        "A degree-{degree} polynomial needs more than {degree} distinct points, but only {points} were found."
    )]
    InsufficientPoints { points: usize, degree: usize },
}

/// Levels, coding matrix (one row per level) and dummy column suffixes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastSpec {
    pub levels: Vec<String>,
    pub matrix: Array2<f64>,
    pub dummy_names: Vec<String>,
}

impl ContrastSpec {
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }
}

/// Boolean-like level pairs, positive token first.
const BOOLEAN_PAIRS: [(&str, &str); 5] = [
    ("true", "false"),
    ("1", "0"),
    ("yes", "no"),
    ("y", "n"),
    ("t", "f"),
];

fn check_scale(scale: f64) -> Result<(), ContrastError> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(ContrastError::InvalidScale(scale));
    }
    Ok(())
}

/// Sorts distinct levels for display and coding: case-insensitively, with
/// the raw text breaking ties. Numeric-looking labels sort as text too.
pub fn sort_levels<S: AsRef<str>>(levels: &[S]) -> Vec<String> {
    let mut out: Vec<String> = levels
        .iter()
        .map(|l| l.as_ref().to_string())
        .unique()
        .collect();

    out.sort_by(|a, b| match a.to_lowercase().cmp(&b.to_lowercase()) {
        Ordering::Equal => a.cmp(b),
        other => other,
    });
    out
}

/// Sorted levels, with a boolean-like pair put positive token first.
fn coding_order<S: AsRef<str>>(levels: &[S]) -> Vec<String> {
    let mut sorted = sort_levels(levels);
    if let [first, second] = sorted.as_slice() {
        let (a, b) = (first.to_lowercase(), second.to_lowercase());
        if BOOLEAN_PAIRS
            .iter()
            .any(|(positive, negative)| a == *negative && b == *positive)
        {
            sorted.swap(0, 1);
        }
    }
    sorted
}

/// Sum contrast over `levels` with magnitude `scale`.
///
/// The levels are put in coding order first, so the caller may pass them in
/// any order. Dummy names are the sanitized names of the first `K-1` levels.
pub fn sum_contrast<S: AsRef<str>>(levels: &[S], scale: f64) -> Result<ContrastSpec, ContrastError> {
    check_scale(scale)?;
    let levels = coding_order(levels);
    let k = levels.len();
    if k < 2 {
        return Err(ContrastError::TooFewLevels(k));
    }

    let mut matrix = Array2::zeros((k, k - 1));
    for j in 0..k - 1 {
        matrix[[j, j]] = scale;
        matrix[[k - 1, j]] = -scale;
    }

    let dummy_names = levels[..k - 1].iter().map(|l| sanitize(l)).collect();
    Ok(ContrastSpec {
        levels,
        matrix,
        dummy_names,
    })
}

/// Scaled orthogonal polynomial contrast matrix for `k` equally spaced
/// levels: `k × (k-1)`, each column with sample standard deviation `scale`.
pub fn poly_contrast(k: usize, scale: f64) -> Result<Array2<f64>, ContrastError> {
    check_scale(scale)?;
    if k < 2 {
        return Err(ContrastError::TooFewLevels(k));
    }
    let points = Array1::from_iter((1..=k).map(|i| i as f64));
    let basis = OrthogonalPolynomial::fit(points.view(), k - 1)?;
    let mut matrix = basis.evaluate(points.view());
    for mut column in matrix.axis_iter_mut(Axis(1)) {
        let (_, sd, _) = mean_and_sd(column.view());
        column.mapv_inplace(|v| v * scale / sd);
    }
    Ok(matrix)
}

/// Polynomial contrast for an ordered factor whose levels are already in
/// their declared order.
pub fn ordered_contrast(levels: Vec<String>, scale: f64) -> Result<ContrastSpec, ContrastError> {
    let matrix = poly_contrast(levels.len(), scale)?;
    let dummy_names = (1..levels.len()).map(polynomial_suffix).collect();
    Ok(ContrastSpec {
        levels,
        matrix,
        dummy_names,
    })
}

/// `.L`, `.Q`, `.C`, then `^4`, `^5`, ...
pub fn polynomial_suffix(degree: usize) -> String {
    match degree {
        1 => ".L".to_string(),
        2 => ".Q".to_string(),
        3 => ".C".to_string(),
        d => format!("^{d}"),
    }
}

/// Orthogonal polynomial basis built by the three-term recurrence
///
/// ```text
/// p0(x) = 1
/// p1(x) = x - alpha[0]
/// p(k+1)(x) = (x - alpha[k]) pk(x) - (norm2[k+1] / norm2[k]) p(k-1)(x)
/// ```
///
/// with `norm2 = [1, |p0|², |p1|², ..., |pd|²]` measured on the fitting
/// points. Column `k` of [`OrthogonalPolynomial::evaluate`] is
/// `pk / sqrt(norm2[k+1])`, so on the fitting points the columns are
/// orthonormal and orthogonal to the constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrthogonalPolynomial {
    pub alpha: Vec<f64>,
    pub norm2: Vec<f64>,
}

impl OrthogonalPolynomial {
    /// Fits a degree-`degree` basis on the non-missing values of `x`.
    pub fn fit(x: ArrayView1<'_, f64>, degree: usize) -> Result<Self, ContrastError> {
        let points: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
        let distinct = points
            .iter()
            .map(|v| v.to_bits())
            .unique()
            .count();
        if degree == 0 || distinct <= degree {
            return Err(ContrastError::InsufficientPoints {
                points: distinct,
                degree,
            });
        }

        let n = points.len();
        let mut alpha = Vec::with_capacity(degree);
        let mut norm2 = Vec::with_capacity(degree + 2);
        norm2.push(1.0);

        let mut previous = vec![0.0; n];
        let mut current = vec![1.0; n];
        norm2.push(n as f64);

        for k in 0..degree {
            let weighted: f64 = points
                .iter()
                .zip(&current)
                .map(|(x, p)| x * p * p)
                .sum();
            let a = weighted / norm2[k + 1];
            alpha.push(a);

            let ratio = norm2[k + 1] / norm2[k];
            let next: Vec<f64> = points
                .iter()
                .zip(current.iter().zip(&previous))
                .map(|(x, (p, q))| (x - a) * p - if k == 0 { 0.0 } else { ratio * q })
                .collect();
            norm2.push(next.iter().map(|v| v * v).sum());

            previous = current;
            current = next;
        }

        Ok(Self { alpha, norm2 })
    }

    pub fn degree(&self) -> usize {
        self.alpha.len()
    }

    /// Evaluates the basis at new points: one row per point, one column per
    /// degree. Missing points give missing rows.
    pub fn evaluate(&self, x: ArrayView1<'_, f64>) -> Array2<f64> {
        let degree = self.degree();
        let mut out = Array2::zeros((x.len(), degree));
        for (mut row, &value) in out.axis_iter_mut(Axis(0)).zip(x.iter()) {
            if value.is_nan() {
                row.fill(f64::NAN);
                continue;
            }
            let mut previous = 0.0;
            let mut current = 1.0;
            for k in 0..degree {
                let ratio = if k == 0 {
                    0.0
                } else {
                    self.norm2[k + 1] / self.norm2[k]
                };
                let next = (value - self.alpha[k]) * current - ratio * previous;
                row[k] = next / self.norm2[k + 2].sqrt();
                previous = current;
                current = next;
            }
        }
        out
    }
}
