use std::fmt;

/// Stages reported while running an analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnalysisStage {
    Normality,
    /// Per-gene Welch tests for the named comparison.
    WelchTests(&'static str),
    /// Multiple-testing correction and fold-change filtering for the named comparison.
    Correction(&'static str),
}

impl AnalysisStage {
    pub fn describe(self) -> String {
        match self {
            Self::Normality => "Shapiro-Wilk normality diagnostics".to_string(),
            Self::WelchTests(label) => format!("Welch t-tests ({label})"),
            Self::Correction(label) => format!("multiple-testing correction ({label})"),
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Observer for reporting progress while an analysis runs.
pub trait AnalysisProgressObserver {
    fn on_stage_start(&mut self, stage: AnalysisStage) {
        let _ = stage;
    }
    fn on_stage_finish(&mut self, stage: AnalysisStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopAnalysisProgress;

impl AnalysisProgressObserver for NoopAnalysisProgress {}
