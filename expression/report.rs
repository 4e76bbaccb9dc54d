//! Output artifacts: the six answer files, the run summary, and the optional
//! per-gene and normality tables.

use crate::fold_change::fold_change;
use crate::multitest::MultipleTestResult;
use crate::normality::NormalityReport;
use crate::pipeline::{
    AnalysisConfig, AnalysisReport, Comparison, ComparisonOutcome, CorrectedOutcome,
};
use crate::types::GeneSet;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SUMMARY_FILE: &str = "summary.toml";
pub const NORMALITY_FILE: &str = "normality.tsv";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error writing results: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to write table: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize summary: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// Which of the three counts an answer file holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerKind {
    /// Genes with an uncorrected Welch p-value below alpha.
    Raw,
    /// Holm-significant genes with a meaningful fold change.
    Holm,
    /// Benjamini-Hochberg-significant genes with a meaningful fold change.
    BenjaminiHochberg,
}

impl AnswerKind {
    pub const ALL: [AnswerKind; 3] = [
        AnswerKind::Raw,
        AnswerKind::Holm,
        AnswerKind::BenjaminiHochberg,
    ];

    fn suffix(self) -> &'static str {
        match self {
            Self::Raw => "",
            Self::Holm => "_holm",
            Self::BenjaminiHochberg => "_hohberg",
        }
    }
}

pub fn answer_file_name(comparison: &Comparison, kind: AnswerKind) -> String {
    format!("{}{}.txt", comparison.label, kind.suffix())
}

pub fn answer_value(outcome: &ComparisonOutcome, kind: AnswerKind) -> usize {
    match kind {
        AnswerKind::Raw => outcome.raw_significant,
        AnswerKind::Holm => outcome.holm.meaningful,
        AnswerKind::BenjaminiHochberg => outcome.benjamini_hochberg.meaningful,
    }
}

/// Writes `value` as plain text, replacing any existing file.
pub fn write_answer(path: &Path, value: impl Display) -> Result<(), ReportError> {
    fs::write(path, value.to_string())?;
    Ok(())
}

/// Writes every answer file for every comparison into `out_dir`.
pub fn write_answers(out_dir: &Path, report: &AnalysisReport) -> Result<Vec<PathBuf>, ReportError> {
    let mut written = Vec::with_capacity(report.comparisons.len() * AnswerKind::ALL.len());
    for kind in AnswerKind::ALL {
        for outcome in &report.comparisons {
            let path = out_dir.join(answer_file_name(&outcome.comparison, kind));
            let value = answer_value(outcome, kind);
            write_answer(&path, value)?;
            debug!("Wrote {value} to {}", path.display());
            written.push(path);
        }
    }
    Ok(written)
}

#[derive(Serialize)]
struct CorrectionSummary {
    method: &'static str,
    alpha: f64,
    alpha_bonferroni: f64,
    alpha_sidak: f64,
    rejected: usize,
    significant: usize,
    meaningful: usize,
}

impl CorrectionSummary {
    fn new(outcome: &CorrectedOutcome) -> Self {
        let result: &MultipleTestResult = &outcome.result;
        Self {
            method: result.method.name(),
            alpha: result.alpha,
            alpha_bonferroni: result.alpha_bonferroni,
            alpha_sidak: result.alpha_sidak,
            rejected: result.rejected_count(),
            significant: outcome.significant,
            meaningful: outcome.meaningful,
        }
    }
}

#[derive(Serialize)]
struct ComparisonSummary {
    label: &'static str,
    control: &'static str,
    treatment: &'static str,
    raw_significant: usize,
    holm: CorrectionSummary,
    benjamini_hochberg: CorrectionSummary,
}

#[derive(Serialize)]
struct NormalitySummary {
    tested: usize,
    untested: usize,
    non_normal: usize,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    n_genes: usize,
    config: &'a AnalysisConfig,
    group_sizes: BTreeMap<&'static str, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    normality: Option<NormalitySummary>,
    comparisons: Vec<ComparisonSummary>,
}

impl<'a> RunSummary<'a> {
    fn new(report: &'a AnalysisReport) -> Self {
        let normality = report.normality.as_ref().map(|n| {
            let untested = n.untested_count();
            NormalitySummary {
                tested: n.records.len() - untested,
                untested,
                non_normal: n.non_normal_count(report.config.alpha),
            }
        });
        Self {
            n_genes: report.genes.len(),
            config: &report.config,
            group_sizes: report
                .group_sizes
                .iter()
                .map(|(d, n)| (d.label(), *n))
                .collect(),
            normality,
            comparisons: report
                .comparisons
                .iter()
                .map(|outcome| ComparisonSummary {
                    label: outcome.comparison.label,
                    control: outcome.comparison.control.label(),
                    treatment: outcome.comparison.treatment.label(),
                    raw_significant: outcome.raw_significant,
                    holm: CorrectionSummary::new(&outcome.holm),
                    benjamini_hochberg: CorrectionSummary::new(&outcome.benjamini_hochberg),
                })
                .collect(),
        }
    }
}

/// Saves the configuration and every count of the run as TOML.
pub fn write_summary(path: &Path, report: &AnalysisReport) -> Result<(), ReportError> {
    let toml_string = toml::to_string_pretty(&RunSummary::new(report))?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, ReportError> {
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?)
}

#[derive(Serialize)]
struct GeneRow<'a> {
    gene: &'a str,
    control_mean: f64,
    treatment_mean: f64,
    t_statistic: f64,
    df: f64,
    p_value: f64,
    holm_p_value: f64,
    bh_p_value: f64,
    fold_change: f64,
}

/// One row per gene with the test statistics, all three p-values and the signed fold change.
pub fn write_gene_table(
    path: &Path,
    genes: &GeneSet,
    outcome: &ComparisonOutcome,
) -> Result<(), ReportError> {
    let mut writer = tsv_writer(path)?;
    for (idx, gene) in genes.iter().enumerate() {
        let test = &outcome.tests[idx];
        let control_mean = outcome.control_means[idx];
        let treatment_mean = outcome.treatment_means[idx];
        writer.serialize(GeneRow {
            gene,
            control_mean,
            treatment_mean,
            t_statistic: test.statistic,
            df: test.df,
            p_value: test.p_value,
            holm_p_value: outcome.holm.result.corrected[idx],
            bh_p_value: outcome.benjamini_hochberg.result.corrected[idx],
            fold_change: fold_change(control_mean, treatment_mean),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct NormalityRow<'a> {
    gene: &'a str,
    group: &'static str,
    n: usize,
    w: Option<f64>,
    p_value: Option<f64>,
}

/// One row per (gene, group) column. Untested columns leave W and p empty.
pub fn write_normality_table(
    path: &Path,
    genes: &GeneSet,
    normality: &NormalityReport,
) -> Result<(), ReportError> {
    let mut writer = tsv_writer(path)?;
    for record in &normality.records {
        writer.serialize(NormalityRow {
            gene: &genes[record.gene_idx],
            group: record.diagnosis.label(),
            n: record.n,
            w: record.result.map(|r| r.statistic),
            p_value: record.result.map(|r| r.p_value),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the answer files, the summary and, when present, the normality table.
/// Per-gene tables are added when `gene_tables` is set.
pub fn write_outputs(
    out_dir: &Path,
    report: &AnalysisReport,
    gene_tables: bool,
) -> Result<Vec<PathBuf>, ReportError> {
    fs::create_dir_all(out_dir)?;
    let mut written = write_answers(out_dir, report)?;

    let summary_path = out_dir.join(SUMMARY_FILE);
    write_summary(&summary_path, report)?;
    written.push(summary_path);

    if let Some(normality) = &report.normality {
        let path = out_dir.join(NORMALITY_FILE);
        write_normality_table(&path, &report.genes, normality)?;
        written.push(path);
    }

    if gene_tables {
        for outcome in &report.comparisons {
            let path = out_dir.join(format!("{}_genes.tsv", outcome.comparison.label));
            write_gene_table(&path, &report.genes, outcome)?;
            written.push(path);
        }
    }

    info!("Wrote {} files to {}", written.len(), out_dir.display());
    Ok(written)
}
