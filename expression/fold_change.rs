//! Fold change and the practical-significance filter.

use crate::types::{GeneSet, Group};
use itertools::izip;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FoldChangeError {
    #[error("{p_values} corrected p-values were supplied for {genes} genes")]
    PValueCountMismatch { genes: usize, p_values: usize },
    #[error("groups hold {control} and {treatment} genes, expected {genes}")]
    GroupGeneCountMismatch {
        genes: usize,
        control: usize,
        treatment: usize,
    },
}

/// Signed fold change between two group means.
///
/// `T / C` when the treatment mean is larger, `-(C / T)` otherwise. A zero mean
/// on exactly one side gives an infinite magnitude; two zero means give NaN.
pub fn fold_change(control_mean: f64, treatment_mean: f64) -> f64 {
    if treatment_mean > control_mean {
        treatment_mean / control_mean
    } else {
        -(control_mean / treatment_mean)
    }
}

/// Magnitude of [`fold_change`].
pub fn abs_fold_change(control_mean: f64, treatment_mean: f64) -> f64 {
    fold_change(control_mean, treatment_mean).abs()
}

/// Fold change of one gene that survived correction.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneFoldChange {
    pub gene: String,
    pub gene_idx: usize,
    pub control_mean: f64,
    pub treatment_mean: f64,
    /// Absolute fold change.
    pub fold_change: f64,
}

/// Absolute fold changes of the genes whose corrected p-value is below `alpha`,
/// in gene order. `corrected` and both groups must cover every gene in `genes`.
pub fn select_fold_changes(
    control: &Group,
    treatment: &Group,
    corrected: &[f64],
    genes: &GeneSet,
    alpha: f64,
) -> Result<Vec<GeneFoldChange>, FoldChangeError> {
    if corrected.len() != genes.len() {
        return Err(FoldChangeError::PValueCountMismatch {
            genes: genes.len(),
            p_values: corrected.len(),
        });
    }
    if control.n_genes() != genes.len() || treatment.n_genes() != genes.len() {
        return Err(FoldChangeError::GroupGeneCountMismatch {
            genes: genes.len(),
            control: control.n_genes(),
            treatment: treatment.n_genes(),
        });
    }

    Ok(izip!(0.., genes.iter(), corrected.iter())
        .filter(|(_, _, p)| **p < alpha)
        .map(|(gene_idx, gene, _)| {
            let control_mean = control.gene_mean(gene_idx);
            let treatment_mean = treatment.gene_mean(gene_idx);
            GeneFoldChange {
                gene: gene.clone(),
                gene_idx,
                control_mean,
                treatment_mean,
                fold_change: abs_fold_change(control_mean, treatment_mean),
            }
        })
        .collect())
}

/// Counts fold changes strictly above `threshold`. NaN never counts; infinity always does.
pub fn count_meaningful(fold_changes: &[GeneFoldChange], threshold: f64) -> usize {
    fold_changes
        .iter()
        .filter(|fc| fc.fold_change > threshold)
        .count()
}
