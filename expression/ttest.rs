//! Welch's unequal-variance two-sample t-test, applied gene by gene.

use crate::types::{Group, PValues};
use ndarray::ArrayView1;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TestError {
    #[error(
        "Welch's t-test needs at least 2 observations per group (got {control} and {treatment})"
    )]
    TooFewObservations { control: usize, treatment: usize },
    #[error("groups disagree on gene count ({control} vs {treatment})")]
    GeneCountMismatch { control: usize, treatment: usize },
    #[error("invalid Student t distribution with {df} degrees of freedom")]
    Distribution { df: f64 },
}

/// Outcome of a single two-sided Welch test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTTest {
    pub statistic: f64,
    pub df: f64,
    pub p_value: f64,
}

/// Two-sided Welch t-test of `control` against `treatment`.
///
/// The statistic is signed as `mean(control) - mean(treatment)`. When both
/// groups are constant the standard error is zero: equal means give `t = 0`
/// and `p = 1`, different means give `t = ±inf` and `p = 0`.
pub fn welch_t_test(
    control: ArrayView1<'_, f64>,
    treatment: ArrayView1<'_, f64>,
) -> Result<WelchTTest, TestError> {
    let n_c = control.len();
    let n_t = treatment.len();
    if n_c < 2 || n_t < 2 {
        return Err(TestError::TooFewObservations {
            control: n_c,
            treatment: n_t,
        });
    }

    let (n_c, n_t) = (n_c as f64, n_t as f64);
    let mean_c = control.sum() / n_c;
    let mean_t = treatment.sum() / n_t;
    let se_c = control.var(1.0) / n_c;
    let se_t = treatment.var(1.0) / n_t;
    let se2 = se_c + se_t;
    let diff = mean_c - mean_t;

    if se2 <= 0.0 {
        let df = n_c + n_t - 2.0;
        return Ok(if diff == 0.0 {
            WelchTTest {
                statistic: 0.0,
                df,
                p_value: 1.0,
            }
        } else {
            WelchTTest {
                statistic: diff.signum() * f64::INFINITY,
                df,
                p_value: 0.0,
            }
        });
    }

    let statistic = diff / se2.sqrt();
    // Welch-Satterthwaite
    let df = se2 * se2 / (se_c * se_c / (n_c - 1.0) + se_t * se_t / (n_t - 1.0));

    let dist = StudentsT::new(0.0, 1.0, df).map_err(|_| TestError::Distribution { df })?;
    let p_value = (2.0 * dist.sf(statistic.abs())).clamp(0.0, 1.0);

    Ok(WelchTTest {
        statistic,
        df,
        p_value,
    })
}

/// Runs [`welch_t_test`] for every gene. Output index `i` belongs to gene `i`.
pub fn compare_genes(control: &Group, treatment: &Group) -> Result<Vec<WelchTTest>, TestError> {
    if control.n_genes() != treatment.n_genes() {
        return Err(TestError::GeneCountMismatch {
            control: control.n_genes(),
            treatment: treatment.n_genes(),
        });
    }

    (0..control.n_genes())
        .into_par_iter()
        .map(|gene_idx| {
            welch_t_test(
                control.gene_values(gene_idx),
                treatment.gene_values(gene_idx),
            )
        })
        .collect()
}

/// The p-value column of a batch of test results.
pub fn p_values(results: &[WelchTTest]) -> PValues {
    PValues::new(results.iter().map(|r| r.p_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Diagnosis;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn welch_statistic_and_df_match_hand_computation() {
        let a = array![19.1, 20.3, 18.7, 21.0, 19.8];
        let b = array![22.4, 21.9, 23.5, 20.8, 24.1];
        let result = welch_t_test(a.view(), b.view()).unwrap();

        let mean_a = 98.9 / 5.0;
        let mean_b = 112.7 / 5.0;
        let var_a = a.var(1.0);
        let var_b = b.var(1.0);
        let expected_t = (mean_a - mean_b) / (var_a / 5.0 + var_b / 5.0).sqrt();
        assert_abs_diff_eq!(result.statistic, expected_t, epsilon = 1e-12);
        assert!(result.statistic < 0.0);
        assert_abs_diff_eq!(result.df, 7.1898, epsilon = 1e-3);
        assert!(result.p_value > 0.0 && result.p_value < 0.05);
    }

    #[test]
    fn welch_is_symmetric_in_p_value() {
        let a = array![1.0, 2.0, 3.0, 4.0];
        let b = array![2.5, 3.5, 6.0, 9.0, 11.0];
        let ab = welch_t_test(a.view(), b.view()).unwrap();
        let ba = welch_t_test(b.view(), a.view()).unwrap();
        assert_abs_diff_eq!(ab.p_value, ba.p_value, epsilon = 1e-14);
        assert_abs_diff_eq!(ab.statistic, -ba.statistic, epsilon = 1e-14);
        assert_abs_diff_eq!(ab.df, ba.df, epsilon = 1e-12);
    }

    #[test]
    fn equal_variance_equal_size_df_is_pooled() {
        // With equal sizes and variances Welch df reduces to n_c + n_t - 2.
        let a = array![1.0, 2.0, 3.0];
        let b = array![4.0, 5.0, 6.0];
        let result = welch_t_test(a.view(), b.view()).unwrap();
        assert_abs_diff_eq!(result.df, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.statistic, -3.0 / (2.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn identical_constant_groups_are_never_significant() {
        let a = array![7.0, 7.0, 7.0];
        let b = array![7.0, 7.0, 7.0, 7.0];
        let result = welch_t_test(a.view(), b.view()).unwrap();
        assert_eq!(result.p_value, 1.0);
        assert_eq!(result.statistic, 0.0);
    }

    #[test]
    fn distinct_constant_groups_are_perfectly_separated() {
        let a = array![1.0, 1.0];
        let b = array![3.0, 3.0, 3.0];
        let result = welch_t_test(a.view(), b.view()).unwrap();
        assert_eq!(result.p_value, 0.0);
        assert_eq!(result.statistic, f64::NEG_INFINITY);
    }

    #[test]
    fn too_few_observations_is_an_error() {
        let a = array![1.0];
        let b = array![1.0, 2.0];
        assert_eq!(
            welch_t_test(a.view(), b.view()),
            Err(TestError::TooFewObservations {
                control: 1,
                treatment: 2
            })
        );
    }

    #[test]
    fn per_gene_vector_preserves_gene_order() {
        let mut rng = StdRng::seed_from_u64(17);
        let noise = Normal::<f64>::new(0.0, 1.0).unwrap();
        let n_genes = 64;
        let control = Array2::from_shape_fn((12, n_genes), |_| 10.0 + noise.sample(&mut rng));
        // Every even gene is shifted strongly in the treatment group.
        let treatment = Array2::from_shape_fn((15, n_genes), |(_, j)| {
            let shift = if j % 2 == 0 { 8.0 } else { 0.0 };
            10.0 + shift + noise.sample(&mut rng)
        });
        let control = Group::new(Diagnosis::Normal, control);
        let treatment = Group::new(Diagnosis::EarlyNeoplasia, treatment);

        let results = compare_genes(&control, &treatment).unwrap();
        let pvals = p_values(&results);
        assert_eq!(pvals.len(), n_genes);
        for (j, &p) in pvals.iter().enumerate() {
            assert!((0.0..=1.0).contains(&p));
            let single = welch_t_test(control.gene_values(j), treatment.gene_values(j)).unwrap();
            assert_eq!(p, single.p_value);
            if j % 2 == 0 {
                assert!(p < 1e-6, "shifted gene {j} should be significant, p = {p}");
            }
        }
    }

    #[test]
    fn gene_count_mismatch_is_rejected() {
        let control = Group::new(Diagnosis::Normal, Array2::zeros((3, 2)));
        let treatment = Group::new(Diagnosis::Cancer, Array2::zeros((3, 3)));
        assert!(matches!(
            compare_genes(&control, &treatment),
            Err(TestError::GeneCountMismatch { .. })
        ));
    }
}
