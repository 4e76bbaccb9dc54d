//! P-value adjustment for multiple testing.
//!
//! Implements:
//! - Holm step-down correction (family-wise error rate)
//! - Benjamini-Hochberg step-up correction (false discovery rate)
//! - Bonferroni single-step correction (family-wise error rate)
//!
//! Every procedure works on the whole vector at once and returns values in the
//! input order. NaN p-values are left out of the family size, stay NaN in the
//! output and are never rejected.

use crate::types::PValues;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CorrectionError {
    #[error("significance level must lie strictly between 0 and 1, got {0}")]
    InvalidAlpha(f64),
    #[error("p-value {value} at index {index} is outside [0, 1]")]
    PValueOutOfRange { index: usize, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMethod {
    /// Holm step-down.
    Holm,
    /// Benjamini-Hochberg step-up.
    BenjaminiHochberg,
    Bonferroni,
}

impl CorrectionMethod {
    pub fn name(self) -> &'static str {
        match self {
            Self::Holm => "holm",
            Self::BenjaminiHochberg => "fdr_bh",
            Self::Bonferroni => "bonferroni",
        }
    }
}

impl fmt::Display for CorrectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of correcting one family of p-values.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipleTestResult {
    pub method: CorrectionMethod,
    /// The level the procedure was run at.
    pub alpha: f64,
    /// Per-hypothesis decision of the procedure at `alpha`.
    pub reject: Vec<bool>,
    /// Adjusted p-values, in input order.
    pub corrected: PValues,
    /// Per-test level under the Šidák correction for this family.
    pub alpha_sidak: f64,
    /// Per-test level under the Bonferroni correction for this family.
    pub alpha_bonferroni: f64,
}

impl MultipleTestResult {
    pub fn rejected_count(&self) -> usize {
        self.reject.iter().filter(|&&r| r).count()
    }

    /// Number of corrected p-values strictly below the level the correction ran at.
    pub fn significant_count(&self) -> usize {
        significant_count(&self.corrected, self.alpha)
    }
}

/// Counts p-values strictly below `alpha`. NaN never counts.
pub fn significant_count(p_values: &[f64], alpha: f64) -> usize {
    p_values.iter().filter(|&&p| p < alpha).count()
}

/// Corrects `p_values` with `method`, deciding rejections at `alpha`.
pub fn correct(
    p_values: &[f64],
    alpha: f64,
    method: CorrectionMethod,
) -> Result<MultipleTestResult, CorrectionError> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(CorrectionError::InvalidAlpha(alpha));
    }
    if let Some((index, &value)) = p_values
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_nan() && !(0.0..=1.0).contains(*p))
    {
        return Err(CorrectionError::PValueOutOfRange { index, value });
    }

    let order = ascending_order(p_values);
    let m = order.len();

    let (corrected, reject) = match method {
        CorrectionMethod::Holm => (
            holm_sorted(p_values, &order),
            holm_reject(p_values, &order, alpha),
        ),
        CorrectionMethod::BenjaminiHochberg => (
            benjamini_hochberg_sorted(p_values, &order),
            benjamini_hochberg_reject(p_values, &order, alpha),
        ),
        CorrectionMethod::Bonferroni => {
            let corrected = bonferroni(p_values);
            let reject = p_values
                .iter()
                .map(|&p| !p.is_nan() && p * m as f64 <= alpha)
                .collect();
            (corrected, reject)
        }
    };

    let family = m.max(1) as f64;
    Ok(MultipleTestResult {
        method,
        alpha,
        reject,
        corrected: PValues::new(corrected),
        alpha_sidak: 1.0 - (1.0 - alpha).powf(1.0 / family),
        alpha_bonferroni: alpha / family,
    })
}

/// Holm step-down adjusted p-values.
pub fn holm(p_values: &[f64]) -> Vec<f64> {
    holm_sorted(p_values, &ascending_order(p_values))
}

/// Benjamini-Hochberg step-up adjusted p-values (q-values).
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    benjamini_hochberg_sorted(p_values, &ascending_order(p_values))
}

/// Bonferroni adjusted p-values: `min(1, m * p)`.
pub fn bonferroni(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.iter().filter(|p| !p.is_nan()).count() as f64;
    p_values
        .iter()
        .map(|&p| if p.is_nan() { f64::NAN } else { (p * m).min(1.0) })
        .collect()
}

/// Indices of the non-NaN p-values, ascending by value. Ties keep input order.
fn ascending_order(p_values: &[f64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| !p_values[i].is_nan())
        .collect();
    indices.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(Ordering::Equal)
    });
    indices
}

fn holm_sorted(p_values: &[f64], order: &[usize]) -> Vec<f64> {
    let m = order.len();
    let mut padj = vec![f64::NAN; p_values.len()];
    let mut cummax = 0.0_f64;
    for (rank, &i) in order.iter().enumerate() {
        let adj = ((m - rank) as f64 * p_values[i]).min(1.0);
        cummax = cummax.max(adj);
        padj[i] = cummax;
    }
    padj
}

/// Rejects in ascending order until the first p-value above `alpha / (m - rank)`.
fn holm_reject(p_values: &[f64], order: &[usize], alpha: f64) -> Vec<bool> {
    let m = order.len();
    let mut reject = vec![false; p_values.len()];
    for (rank, &i) in order.iter().enumerate() {
        if p_values[i] > alpha / (m - rank) as f64 {
            break;
        }
        reject[i] = true;
    }
    reject
}

fn benjamini_hochberg_sorted(p_values: &[f64], order: &[usize]) -> Vec<f64> {
    let m = order.len() as f64;
    let mut padj = vec![f64::NAN; p_values.len()];
    let mut cummin = f64::INFINITY;
    for (pos, &i) in order.iter().enumerate().rev() {
        let rank = (pos + 1) as f64;
        let adj = (p_values[i] * m / rank).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}

/// Rejects every hypothesis up to the largest rank `k` with `p_(k) <= k/m * alpha`.
fn benjamini_hochberg_reject(p_values: &[f64], order: &[usize], alpha: f64) -> Vec<bool> {
    let m = order.len() as f64;
    let mut reject = vec![false; p_values.len()];
    let cutoff = order
        .iter()
        .enumerate()
        .rev()
        .find(|(pos, i)| p_values[**i] <= (*pos + 1) as f64 / m * alpha)
        .map(|(pos, _)| pos + 1)
        .unwrap_or(0);
    for &i in &order[..cutoff] {
        reject[i] = true;
    }
    reject
}
