//! Shapiro-Wilk normality diagnostics.
//!
//! The test follows Royston's AS R94 algorithm: the coefficient vector comes
//! from approximations to the expected normal order statistics, W is the
//! squared correlation between the sorted sample and those coefficients, and
//! the p-value uses Royston's normalising transforms (exact for n = 3).
//!
//! Results are diagnostic only. Nothing downstream reads them.

use crate::types::{Diagnosis, GeneSet, GroupSet};
use log::{debug, warn};
use ndarray::ArrayView1;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

const SMALL: f64 = 1e-19;
const MAX_ACCURATE_N: usize = 5000;

// Polynomial coefficients, lowest order first.
const G: [f64; 2] = [-2.273, 0.459];
const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.07119, 4.434685, -2.706056];
const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const C3: [f64; 4] = [0.544, -0.39978, 0.025054, -6.714e-4];
const C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];

#[derive(Debug, Error, PartialEq)]
pub enum NormalityError {
    #[error("Shapiro-Wilk needs at least 3 values, got {0}")]
    TooFewValues(usize),
    #[error("sample contains non-finite values")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapiroWilk {
    pub statistic: f64,
    pub p_value: f64,
}

fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

fn standard_normal() -> Normal {
    Normal::standard()
}

/// Antisymmetric Shapiro-Wilk coefficients for a sample of size `n`, ordered
/// to match the ascending sample.
fn coefficients(n: usize) -> Vec<f64> {
    let half = n / 2;
    let mut a = vec![0.0; half];
    if n == 3 {
        a[0] = std::f64::consts::FRAC_1_SQRT_2;
    } else {
        let normal = standard_normal();
        let an25 = n as f64 + 0.25;
        let m: Vec<f64> = (1..=half)
            .map(|i| normal.inverse_cdf((i as f64 - 0.375) / an25))
            .collect();
        let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
        let ssumm2 = summ2.sqrt();
        let rsn = 1.0 / (n as f64).sqrt();
        let a1 = poly(&C1, rsn) - m[0] / ssumm2;

        let (first_free, fac) = if n > 5 {
            let a2 = -m[1] / ssumm2 + poly(&C2, rsn);
            let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
                / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
                .sqrt();
            a[1] = a2;
            (2, fac)
        } else {
            let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
            (1, fac)
        };
        a[0] = a1;
        for i in first_free..half {
            a[i] = -m[i] / fac;
        }
    }

    let mut full = vec![0.0; n];
    for (i, &ai) in a.iter().enumerate() {
        full[i] = -ai;
        full[n - 1 - i] = ai;
    }
    full
}

/// Shapiro-Wilk test of the hypothesis that `values` come from a normal distribution.
///
/// A sample with zero range gets `W = 1` and `p = 1`.
pub fn shapiro_wilk(values: ArrayView1<'_, f64>) -> Result<ShapiroWilk, NormalityError> {
    let n = values.len();
    if n < 3 {
        return Err(NormalityError::TooFewValues(n));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(NormalityError::NonFinite);
    }
    if n > MAX_ACCURATE_N {
        warn!("Shapiro-Wilk p-value may be inaccurate for n = {n} > {MAX_ACCURATE_N}");
    }

    let mut x: Vec<f64> = values.to_vec();
    x.sort_by(|a, b| a.total_cmp(b));

    let range = x[n - 1] - x[0];
    if range < SMALL {
        debug!("Shapiro-Wilk input has zero range; reporting W = 1");
        return Ok(ShapiroWilk {
            statistic: 1.0,
            p_value: 1.0,
        });
    }

    let a = coefficients(n);
    let nf = n as f64;
    let sa = a.iter().sum::<f64>() / nf;
    let sx = x.iter().map(|v| v / range).sum::<f64>() / nf;

    let (mut ssa, mut ssx, mut sax) = (0.0, 0.0, 0.0);
    for (ai, xi) in a.iter().zip(&x) {
        let asa = ai - sa;
        let xsx = xi / range - sx;
        ssa += asa * asa;
        ssx += xsx * xsx;
        sax += asa * xsx;
    }

    // w1 is 1 - W, kept separate to avoid rounding when W is close to 1.
    let ssassx = (ssa * ssx).sqrt();
    let w1 = (ssassx - sax) * (ssassx + sax) / (ssa * ssx);
    let statistic = 1.0 - w1;

    Ok(ShapiroWilk {
        statistic,
        p_value: p_value(n, statistic, w1),
    })
}

fn p_value(n: usize, w: f64, w1: f64) -> f64 {
    if n == 3 {
        const SIX_OVER_PI: f64 = 1.909_859_317_102_74;
        const ASIN_SQRT_THREE_QUARTERS: f64 = std::f64::consts::FRAC_PI_3;
        let pw = SIX_OVER_PI * (w.sqrt().min(1.0).asin() - ASIN_SQRT_THREE_QUARTERS);
        return pw.clamp(0.0, 1.0);
    }

    let an = n as f64;
    let mut y = w1.ln();
    let (mean, sd) = if n <= 11 {
        let gamma = poly(&G, an);
        if y >= gamma {
            return 1e-99;
        }
        y = -(gamma - y).ln();
        (poly(&C3, an), poly(&C4, an).exp())
    } else {
        let log_n = an.ln();
        (poly(&C5, log_n), poly(&C6, log_n).exp())
    };

    standard_normal().sf((y - mean) / sd).clamp(0.0, 1.0)
}

/// Normality test outcome for one (gene, group) column.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalityRecord {
    pub gene_idx: usize,
    pub diagnosis: Diagnosis,
    pub n: usize,
    /// `None` when the column could not be tested (e.g. fewer than 3 subjects).
    pub result: Option<ShapiroWilk>,
}

/// Shapiro-Wilk results for every gene in every group, ordered by gene then group.
#[derive(Debug, Clone, Default)]
pub struct NormalityReport {
    pub records: Vec<NormalityRecord>,
}

impl NormalityReport {
    /// Columns whose normality is rejected at `alpha`.
    pub fn non_normal_count(&self, alpha: f64) -> usize {
        self.records
            .iter()
            .filter_map(|r| r.result)
            .filter(|r| r.p_value < alpha)
            .count()
    }

    pub fn untested_count(&self) -> usize {
        self.records.iter().filter(|r| r.result.is_none()).count()
    }
}

/// Runs the Shapiro-Wilk test for every gene in every diagnosis group.
pub fn check_normality(groups: &GroupSet, genes: &GeneSet) -> NormalityReport {
    let records = (0..genes.len())
        .into_par_iter()
        .flat_map_iter(|gene_idx| {
            groups.iter().map(move |group| {
                let column = group.gene_values(gene_idx);
                let result = match shapiro_wilk(column) {
                    Ok(result) => Some(result),
                    Err(e) => {
                        debug!(
                            "Skipping normality test for gene {gene_idx} in {}: {e}",
                            group.diagnosis
                        );
                        None
                    }
                };
                NormalityRecord {
                    gene_idx,
                    diagnosis: group.diagnosis,
                    n: column.len(),
                    result,
                }
            })
        })
        .collect();

    NormalityReport { records }
}
