use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Diagnosis label attached to every subject in the sample table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    Normal,
    EarlyNeoplasia,
    Cancer,
}

impl Diagnosis {
    /// Every recognised diagnosis, in disease-progression order.
    pub const ALL: [Diagnosis; 3] = [
        Diagnosis::Normal,
        Diagnosis::EarlyNeoplasia,
        Diagnosis::Cancer,
    ];

    /// The exact label used in the input file.
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::EarlyNeoplasia => "early neoplasia",
            Self::Cancer => "cancer",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returned when a label is not one of the three recognised diagnoses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDiagnosis(pub String);

impl fmt::Display for UnknownDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized diagnosis label '{}'", self.0)
    }
}

impl std::error::Error for UnknownDiagnosis {}

impl FromStr for Diagnosis {
    type Err = UnknownDiagnosis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Diagnosis::ALL
            .into_iter()
            .find(|diagnosis| diagnosis.label() == s)
            .ok_or_else(|| UnknownDiagnosis(s.to_string()))
    }
}

/// Ordered gene identifiers. Every per-gene vector in the crate is indexed in this order.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneSet(pub Vec<String>);

impl GeneSet {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn position(&self, gene: &str) -> Option<usize> {
        self.0.iter().position(|name| name == gene)
    }
}

impl Deref for GeneSet {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One p-value per gene, in [`GeneSet`] order.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct PValues(pub Vec<f64>);

impl PValues {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for PValues {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<f64>> for PValues {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl From<PValues> for Vec<f64> {
    fn from(values: PValues) -> Self {
        values.0
    }
}

/// The gene-value matrix of every subject sharing one diagnosis.
#[derive(Clone, Debug)]
pub struct Group {
    pub diagnosis: Diagnosis,
    /// Shape: [n_subjects, n_genes].
    pub values: Array2<f64>,
}

impl Group {
    pub fn new(diagnosis: Diagnosis, values: Array2<f64>) -> Self {
        Self { diagnosis, values }
    }

    pub fn n_subjects(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_genes(&self) -> usize {
        self.values.ncols()
    }

    /// Expression values of one gene across the subjects of this group.
    pub fn gene_values(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.values.column(gene_idx)
    }

    /// Mean expression of one gene. NaN for an empty group.
    pub fn gene_mean(&self, gene_idx: usize) -> f64 {
        self.gene_values(gene_idx).mean().unwrap_or(f64::NAN)
    }
}

/// The three disjoint diagnosis groups of a sample table.
#[derive(Clone, Debug)]
pub struct GroupSet {
    pub normal: Group,
    pub early_neoplasia: Group,
    pub cancer: Group,
}

impl GroupSet {
    pub fn get(&self, diagnosis: Diagnosis) -> &Group {
        match diagnosis {
            Diagnosis::Normal => &self.normal,
            Diagnosis::EarlyNeoplasia => &self.early_neoplasia,
            Diagnosis::Cancer => &self.cancer,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        [&self.normal, &self.early_neoplasia, &self.cancer].into_iter()
    }
}
