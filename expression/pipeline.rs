//! # Analysis Orchestration
//!
//! Wires the stages together: partition the sample table into diagnosis
//! groups, optionally run the normality diagnostics, then for each adjacent
//! pair of groups run the per-gene Welch tests, both corrections, and the
//! fold-change filter.
//!
//! Holm runs at `alpha / family_count`. The two comparisons are corrected
//! separately, so splitting alpha keeps the combined family-wise error at the
//! nominal level. Benjamini-Hochberg runs at the nominal alpha. Each comparison
//! is judged on its own corrected vector against the level that produced it.

use crate::data::{DataError, ExpressionTable};
use crate::fold_change::{
    FoldChangeError, GeneFoldChange, count_meaningful, select_fold_changes,
};
use crate::multitest::{
    CorrectionError, CorrectionMethod, MultipleTestResult, correct, significant_count,
};
use crate::normality::{NormalityReport, check_normality};
use crate::progress::{AnalysisProgressObserver, AnalysisStage, NoopAnalysisProgress};
use crate::report::ReportError;
use crate::ttest::{TestError, WelchTTest, compare_genes, p_values};
use crate::types::{Diagnosis, GeneSet, Group, GroupSet, PValues};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("alpha must lie strictly between 0 and 1, got {0}")]
    InvalidAlpha(f64),
    #[error("fold change threshold must be a finite value of at least 1, got {0}")]
    InvalidFoldChangeThreshold(f64),
    #[error("family count must be at least 1")]
    ZeroFamilies,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("significance testing failed: {0}")]
    Test(#[from] TestError),
    #[error("multiple-testing correction failed: {0}")]
    Correction(#[from] CorrectionError),
    #[error("fold-change selection failed: {0}")]
    FoldChange(#[from] FoldChangeError),
    #[error("failed to write results: {0}")]
    Report(#[from] ReportError),
}

/// Tunable parameters of the analysis. The defaults are the fixed constants
/// of the study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Nominal significance level.
    pub alpha: f64,
    /// Minimum absolute fold change, exclusive, for a practically meaningful change.
    pub fold_change_threshold: f64,
    /// Number of separately corrected families sharing `alpha` under Holm.
    pub family_count: usize,
    pub run_normality: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            fold_change_threshold: 1.5,
            family_count: 2,
            run_normality: true,
        }
    }
}

impl AnalysisConfig {
    /// Level handed to the Holm correction.
    pub fn holm_alpha(&self) -> f64 {
        self.alpha / self.family_count as f64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ConfigError::InvalidAlpha(self.alpha));
        }
        if !(self.fold_change_threshold.is_finite() && self.fold_change_threshold >= 1.0) {
            return Err(ConfigError::InvalidFoldChangeThreshold(
                self.fold_change_threshold,
            ));
        }
        if self.family_count == 0 {
            return Err(ConfigError::ZeroFamilies);
        }
        Ok(())
    }

    /// Loads a configuration from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }
}

/// A control group compared against a treatment group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Comparison {
    /// Short name, also the stem of every output file for this comparison.
    pub label: &'static str,
    pub control: Diagnosis,
    pub treatment: Diagnosis,
}

pub const NORMAL_EARLY: Comparison = Comparison {
    label: "normal_early",
    control: Diagnosis::Normal,
    treatment: Diagnosis::EarlyNeoplasia,
};

pub const EARLY_CANCER: Comparison = Comparison {
    label: "early_cancer",
    control: Diagnosis::EarlyNeoplasia,
    treatment: Diagnosis::Cancer,
};

/// The adjacent-stage comparisons the study reports on.
pub const STANDARD_COMPARISONS: [Comparison; 2] = [NORMAL_EARLY, EARLY_CANCER];

/// One correction procedure applied to one comparison.
#[derive(Debug, Clone)]
pub struct CorrectedOutcome {
    pub result: MultipleTestResult,
    /// Genes whose corrected p-value is below the correction level.
    pub significant: usize,
    /// Fold changes of those genes, in gene order.
    pub fold_changes: Vec<GeneFoldChange>,
    /// Significant genes whose absolute fold change exceeds the threshold.
    pub meaningful: usize,
}

#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    pub comparison: Comparison,
    pub tests: Vec<WelchTTest>,
    pub raw_p_values: PValues,
    /// Genes with an uncorrected p-value below alpha.
    pub raw_significant: usize,
    pub holm: CorrectedOutcome,
    pub benjamini_hochberg: CorrectedOutcome,
    pub control_means: Vec<f64>,
    pub treatment_means: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub config: AnalysisConfig,
    pub genes: GeneSet,
    pub group_sizes: BTreeMap<Diagnosis, usize>,
    pub normality: Option<NormalityReport>,
    pub comparisons: Vec<ComparisonOutcome>,
}

impl AnalysisReport {
    pub fn comparison(&self, label: &str) -> Option<&ComparisonOutcome> {
        self.comparisons
            .iter()
            .find(|outcome| outcome.comparison.label == label)
    }
}

fn corrected_outcome(
    control: &Group,
    treatment: &Group,
    genes: &GeneSet,
    raw: &PValues,
    alpha: f64,
    method: CorrectionMethod,
    threshold: f64,
) -> Result<CorrectedOutcome, AnalysisError> {
    let result = correct(raw, alpha, method)?;
    let significant = result.significant_count();
    let fold_changes = select_fold_changes(control, treatment, &result.corrected, genes, alpha)?;
    let meaningful = count_meaningful(&fold_changes, threshold);
    Ok(CorrectedOutcome {
        result,
        significant,
        fold_changes,
        meaningful,
    })
}

/// Runs the Welch tests, both corrections and the fold-change filter for one comparison.
pub fn analyze_comparison(
    groups: &GroupSet,
    genes: &GeneSet,
    comparison: Comparison,
    config: &AnalysisConfig,
) -> Result<ComparisonOutcome, AnalysisError> {
    analyze_comparison_with_progress(
        groups,
        genes,
        comparison,
        config,
        &mut NoopAnalysisProgress,
    )
}

fn analyze_comparison_with_progress(
    groups: &GroupSet,
    genes: &GeneSet,
    comparison: Comparison,
    config: &AnalysisConfig,
    progress: &mut dyn AnalysisProgressObserver,
) -> Result<ComparisonOutcome, AnalysisError> {
    let control = groups.get(comparison.control);
    let treatment = groups.get(comparison.treatment);

    let stage = AnalysisStage::WelchTests(comparison.label);
    progress.on_stage_start(stage);
    let tests = compare_genes(control, treatment)?;
    let raw_p_values = p_values(&tests);
    let raw_significant = significant_count(&raw_p_values, config.alpha);
    progress.on_stage_finish(stage);
    info!(
        "T-Student test {} vs {} different distributed genes: {raw_significant}",
        comparison.control, comparison.treatment
    );

    let stage = AnalysisStage::Correction(comparison.label);
    progress.on_stage_start(stage);
    let holm = corrected_outcome(
        control,
        treatment,
        genes,
        &raw_p_values,
        config.holm_alpha(),
        CorrectionMethod::Holm,
        config.fold_change_threshold,
    )?;
    let benjamini_hochberg = corrected_outcome(
        control,
        treatment,
        genes,
        &raw_p_values,
        config.alpha,
        CorrectionMethod::BenjaminiHochberg,
        config.fold_change_threshold,
    )?;
    progress.on_stage_finish(stage);

    info!(
        "{}: Holm at {} keeps {} genes, {} with |FC| > {}",
        comparison.label,
        config.holm_alpha(),
        holm.significant,
        holm.meaningful,
        config.fold_change_threshold
    );
    info!(
        "{}: Benjamini-Hochberg at {} keeps {} genes, {} with |FC| > {}",
        comparison.label,
        config.alpha,
        benjamini_hochberg.significant,
        benjamini_hochberg.meaningful,
        config.fold_change_threshold
    );

    let control_means = (0..genes.len()).map(|j| control.gene_mean(j)).collect();
    let treatment_means = (0..genes.len()).map(|j| treatment.gene_mean(j)).collect();

    Ok(ComparisonOutcome {
        comparison,
        tests,
        raw_p_values,
        raw_significant,
        holm,
        benjamini_hochberg,
        control_means,
        treatment_means,
    })
}

/// Runs the complete analysis on a loaded sample table.
pub fn run_analysis(
    table: &ExpressionTable,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalysisError> {
    run_analysis_with_progress(table, config, &mut NoopAnalysisProgress)
}

/// As [`run_analysis`], reporting each stage to `progress`.
pub fn run_analysis_with_progress(
    table: &ExpressionTable,
    config: &AnalysisConfig,
    progress: &mut dyn AnalysisProgressObserver,
) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;

    let group_sizes = table.diagnosis_counts();
    info!(
        "Diagnosis values: {:?}",
        group_sizes.keys().map(|d| d.label()).collect::<Vec<_>>()
    );
    let groups = table.partition()?;

    let normality = if config.run_normality {
        let stage = AnalysisStage::Normality;
        progress.on_stage_start(stage);
        let report = check_normality(&groups, &table.genes);
        progress.on_stage_finish(stage);
        info!(
            "Shapiro-Wilk: {} of {} gene/group columns depart from normality at {}",
            report.non_normal_count(config.alpha),
            report.records.len(),
            config.alpha
        );
        Some(report)
    } else {
        None
    };

    let comparisons = STANDARD_COMPARISONS
        .into_iter()
        .map(|comparison| {
            analyze_comparison_with_progress(&groups, &table.genes, comparison, config, progress)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AnalysisReport {
        config: config.clone(),
        genes: table.genes.clone(),
        group_sizes,
        normality,
        comparisons,
    })
}

/// Number of stages [`run_analysis_with_progress`] reports for `config`.
pub fn planned_stage_count(config: &AnalysisConfig) -> usize {
    usize::from(config.run_normality) + 2 * STANDARD_COMPARISONS.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toy_table() -> ExpressionTable {
        // Gene 0 rises sharply from normal to early, gene 1 is flat,
        // gene 2 rises modestly, gene 3 drops sharply from early to cancer.
        let rows: Vec<(Diagnosis, [f64; 4])> = vec![
            (Diagnosis::Normal, [10.0, 5.0, 10.0, 40.0]),
            (Diagnosis::Normal, [11.0, 5.0, 10.5, 41.0]),
            (Diagnosis::Normal, [9.0, 5.0, 9.5, 39.0]),
            (Diagnosis::Normal, [10.5, 5.0, 10.2, 40.5]),
            (Diagnosis::EarlyNeoplasia, [30.0, 5.0, 11.0, 40.0]),
            (Diagnosis::EarlyNeoplasia, [31.0, 5.0, 11.5, 41.0]),
            (Diagnosis::EarlyNeoplasia, [29.0, 5.0, 10.5, 39.5]),
            (Diagnosis::EarlyNeoplasia, [30.5, 5.0, 11.2, 40.2]),
            (Diagnosis::Cancer, [30.0, 5.0, 11.0, 4.0]),
            (Diagnosis::Cancer, [31.0, 5.0, 11.4, 4.5]),
            (Diagnosis::Cancer, [29.5, 5.0, 10.9, 3.5]),
            (Diagnosis::Cancer, [30.2, 5.0, 11.1, 4.1]),
        ];
        let mut values = Array2::zeros((rows.len(), 4));
        for (i, (_, row)) in rows.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                values[[i, j]] = *v;
            }
        }
        ExpressionTable {
            subject_ids: (1..=rows.len()).map(|i| format!("P{i}")).collect(),
            diagnoses: rows.iter().map(|(d, _)| *d).collect(),
            genes: GeneSet::new(vec!["UP".into(), "FLAT".into(), "MILD".into(), "DOWN".into()]),
            values,
        }
    }

    #[test]
    fn default_config_matches_study_constants() {
        let config = AnalysisConfig::default();
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.holm_alpha(), 0.025);
        assert_eq!(config.fold_change_threshold, 1.5);
        assert!(config.validate().is_ok());
        assert_eq!(planned_stage_count(&config), 5);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let config = AnalysisConfig {
            alpha: 1.5,
            ..AnalysisConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidAlpha(_))));

        let config = AnalysisConfig {
            family_count: 0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroFamilies)));

        let config = AnalysisConfig {
            fold_change_threshold: 0.5,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFoldChangeThreshold(_))
        ));
    }

    #[test]
    fn config_loads_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "alpha = 0.01\nrun_normality = false").unwrap();
        file.flush().unwrap();

        let config = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(config.alpha, 0.01);
        assert!(!config.run_normality);
        assert_eq!(config.family_count, 2);
        assert_eq!(config.fold_change_threshold, 1.5);
    }

    #[test]
    fn toy_analysis_finds_the_planted_changes() {
        let table = toy_table();
        let report = run_analysis(&table, &AnalysisConfig::default()).unwrap();

        assert_eq!(report.comparisons.len(), 2);
        assert!(report.normality.is_some());
        assert_eq!(report.group_sizes[&Diagnosis::Cancer], 4);

        let normal_early = report.comparison("normal_early").unwrap();
        assert_eq!(normal_early.raw_p_values.len(), 4);
        // The flat gene is constant everywhere: p = 1, never significant.
        assert_eq!(normal_early.raw_p_values[1], 1.0);
        assert!(normal_early.holm.fold_changes.iter().all(|fc| fc.gene != "FLAT"));
        // UP triples; MILD shifts by about 10%.
        assert_eq!(normal_early.holm.meaningful, 1);
        assert_eq!(normal_early.benjamini_hochberg.meaningful, 1);
        assert!(normal_early.benjamini_hochberg.significant >= normal_early.holm.significant);

        let early_cancer = report.comparison("early_cancer").unwrap();
        assert_eq!(early_cancer.holm.meaningful, 1);
        assert_eq!(early_cancer.holm.fold_changes[0].gene, "DOWN");
        assert_eq!(early_cancer.raw_p_values[1], 1.0);
    }

    #[test]
    fn holm_uses_the_split_alpha() {
        let table = toy_table();
        let config = AnalysisConfig {
            run_normality: false,
            ..AnalysisConfig::default()
        };
        let report = run_analysis(&table, &config).unwrap();
        for outcome in &report.comparisons {
            assert_eq!(outcome.holm.result.alpha, 0.025);
            assert_eq!(outcome.benjamini_hochberg.result.alpha, 0.05);
            assert_eq!(outcome.holm.result.method, CorrectionMethod::Holm);
            assert_eq!(outcome.holm.result.corrected.len(), table.n_genes());
        }
        assert!(report.normality.is_none());
    }

    #[test]
    fn single_subject_group_fails_the_welch_stage() {
        let table = ExpressionTable {
            subject_ids: vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            diagnoses: vec![
                Diagnosis::Normal,
                Diagnosis::Normal,
                Diagnosis::EarlyNeoplasia,
                Diagnosis::Cancer,
                Diagnosis::Cancer,
            ],
            genes: GeneSet::new(vec!["G".into()]),
            values: array![[1.0], [2.0], [3.0], [4.0], [5.0]],
        };
        let config = AnalysisConfig {
            run_normality: false,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            run_analysis(&table, &config),
            Err(AnalysisError::Test(TestError::TooFewObservations { .. }))
        ));
    }

    #[test]
    fn gene_list_shorter_than_groups_is_an_error() {
        let groups = GroupSet {
            normal: Group::new(Diagnosis::Normal, array![[1.0], [2.0], [3.0]]),
            early_neoplasia: Group::new(Diagnosis::EarlyNeoplasia, array![[7.0], [8.0], [9.0]]),
            cancer: Group::new(Diagnosis::Cancer, array![[7.0], [8.0], [9.0]]),
        };
        let genes = GeneSet::new(vec!["G1".into(), "G2".into()]);
        let result = analyze_comparison(&groups, &genes, NORMAL_EARLY, &AnalysisConfig::default());
        assert!(matches!(
            result,
            Err(AnalysisError::FoldChange(
                FoldChangeError::PValueCountMismatch {
                    genes: 2,
                    p_values: 1
                }
            ))
        ));
    }

    #[derive(Default)]
    struct RecordingProgress {
        started: Vec<AnalysisStage>,
        finished: usize,
    }

    impl AnalysisProgressObserver for RecordingProgress {
        fn on_stage_start(&mut self, stage: AnalysisStage) {
            self.started.push(stage);
        }
        fn on_stage_finish(&mut self, _stage: AnalysisStage) {
            self.finished += 1;
        }
    }

    #[test]
    fn progress_reports_every_planned_stage() {
        let table = toy_table();
        let config = AnalysisConfig::default();
        let mut progress = RecordingProgress::default();
        run_analysis_with_progress(&table, &config, &mut progress).unwrap();

        assert_eq!(progress.started.len(), planned_stage_count(&config));
        assert_eq!(progress.finished, planned_stage_count(&config));
        assert_eq!(progress.started[0], AnalysisStage::Normality);
        assert_eq!(progress.started[1], AnalysisStage::WelchTests("normal_early"));
    }
}
