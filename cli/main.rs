#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use genediff::data::load_expression_table;
use genediff::normality::check_normality;
use genediff::pipeline::{
    AnalysisConfig, AnalysisError, planned_stage_count, run_analysis_with_progress,
};
use genediff::progress::{AnalysisProgressObserver, AnalysisStage};
use genediff::report::{
    AnswerKind, NORMALITY_FILE, ReportError, answer_file_name, answer_value, write_normality_table,
    write_outputs,
};

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to the expression CSV with Patient_id,Diagnosis,<gene>... columns
    pub input: PathBuf,

    /// Directory receiving the answer files and supplementary tables
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// TOML file with analysis settings; command-line flags take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Nominal significance level
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Minimum absolute fold change (exclusive) for a meaningful change
    #[arg(long = "fold-change", value_name = "X")]
    pub fold_change: Option<f64>,

    /// Number of comparison families sharing alpha under the Holm correction
    #[arg(long, value_name = "K")]
    pub families: Option<usize>,

    /// Skip the Shapiro-Wilk diagnostics
    #[arg(long)]
    pub skip_normality: bool,

    /// Also write a per-gene result table for each comparison
    #[arg(long)]
    pub gene_tables: bool,
}

#[derive(Args)]
pub struct NormalityArgs {
    /// Path to the expression CSV with Patient_id,Diagnosis,<gene>... columns
    pub input: PathBuf,

    /// Directory receiving normality.tsv
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "genediff",
    about = "Differential gene expression across disease stages",
    long_about = "Runs per-gene Welch t-tests between normal tissue, early neoplasia and cancer, \
                 corrects for multiple testing with Holm and Benjamini-Hochberg, and counts genes \
                 whose expression changes by a meaningful fold."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the complete differential expression analysis
    #[command(about = "Run Welch tests, corrections and fold-change filtering")]
    Analyze(AnalyzeArgs),

    /// Run only the Shapiro-Wilk diagnostics
    #[command(about = "Check per-gene normality in every diagnosis group")]
    Normality(NormalityArgs),

    /// Show version information
    Version,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Analyze(args)) => analyze(args),
        Some(Commands::Normality(args)) => normality(args),
        Some(Commands::Version) => {
            println!("genediff {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Reports analysis stages on a progress bar.
struct StageProgress {
    bar: ProgressBar,
}

impl StageProgress {
    fn new(stages: usize) -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(stages as u64), draw_target);
        let template = "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        Self { bar }
    }

    fn finish(self) {
        self.bar.finish_and_clear();
    }
}

impl AnalysisProgressObserver for StageProgress {
    fn on_stage_start(&mut self, stage: AnalysisStage) {
        self.bar.set_message(stage.describe());
    }

    fn on_stage_finish(&mut self, _stage: AnalysisStage) {
        self.bar.inc(1);
    }
}

fn build_config(args: &AnalyzeArgs) -> Result<AnalysisConfig, AnalysisError> {
    let mut config = match &args.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(alpha) = args.alpha {
        config.alpha = alpha;
    }
    if let Some(threshold) = args.fold_change {
        config.fold_change_threshold = threshold;
    }
    if let Some(families) = args.families {
        config.family_count = families;
    }
    if args.skip_normality {
        config.run_normality = false;
    }
    config.validate()?;
    Ok(config)
}

fn analyze(args: AnalyzeArgs) -> Result<(), AnalysisError> {
    let config = build_config(&args)?;

    println!("Loading expression data from: {}", args.input.display());
    let table = load_expression_table(&args.input)?;
    println!(
        "Loaded {} subjects with {} genes",
        table.n_subjects(),
        table.n_genes()
    );

    let mut progress = StageProgress::new(planned_stage_count(&config));
    let report = run_analysis_with_progress(&table, &config, &mut progress)?;
    progress.finish();

    write_outputs(&args.out_dir, &report, args.gene_tables)?;

    println!("Holm alpha: {}, Benjamini-Hochberg alpha: {}", config.holm_alpha(), config.alpha);
    for kind in AnswerKind::ALL {
        for outcome in &report.comparisons {
            println!(
                "  {:<26} {}",
                answer_file_name(&outcome.comparison, kind),
                answer_value(outcome, kind)
            );
        }
    }
    println!("Results saved to: {}", args.out_dir.display());
    Ok(())
}

fn normality(args: NormalityArgs) -> Result<(), AnalysisError> {
    println!("Loading expression data from: {}", args.input.display());
    let table = load_expression_table(&args.input)?;
    let groups = table.partition()?;

    let report = check_normality(&groups, &table.genes);
    let alpha = AnalysisConfig::default().alpha;
    println!(
        "{} of {} gene/group columns depart from normality at alpha = {alpha} ({} untested)",
        report.non_normal_count(alpha),
        report.records.len(),
        report.untested_count()
    );

    std::fs::create_dir_all(&args.out_dir).map_err(ReportError::from)?;
    let path = args.out_dir.join(NORMALITY_FILE);
    write_normality_table(&path, &table.genes, &report)?;
    println!("Normality table saved to: {}", path.display());
    Ok(())
}
