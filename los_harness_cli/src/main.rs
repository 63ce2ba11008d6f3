mod plot;

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use los_harness::oracle::{render_labels, render_prescan};
use los_harness::perf::write_summary_csv;
use los_harness::{
    fit_log2, load_results, max_prescan, parse_variant_list, run_process_mode, run_sweep,
    run_variant_mode, sizes_for, visibility, CaseOutcome, CommandRunner, ConformanceConfig,
    ConformanceReport, HarnessError, LogFit, MpiRunner, OutputForm, SweepConfig, TimingTable, Variant, Verdict,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::plot::{palette, render_chart_guard, ChartKind, PlotSeries};

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-of-sight conformance and performance harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the reference answer for a comma separated altitude list
    Oracle(OracleArgs),
    /// Check every variant of a program against the oracle over random inputs
    Check(CheckArgs),
    /// Check an MPI program under every process count and input ordering
    CheckMpi(CheckMpiArgs),
    /// Time every variant over a size sweep and plot the fastest runs
    Measure(MeasureArgs),
    /// Fit persisted timings to a + b·log2(n) and plot the fitted curves
    Fit(FitArgs),
}

#[derive(Parser, Debug)]
struct OracleArgs {
    /// Altitudes, e.g. `3,1,4,1,5`
    #[arg(allow_hyphen_values = true)]
    altitudes: String,

    /// Output form
    #[arg(long, value_enum, default_value_t = FormOpt::Labels)]
    form: FormOpt,
}

/// Size sweep and input generation overrides shared by `check` and `measure`.
#[derive(Args, Debug)]
struct SweepOpts {
    /// Base configuration JSON; the flags below override its fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Smallest input size
    #[arg(long)]
    min_size: Option<usize>,

    /// Exclusive upper bound on input size
    #[arg(long)]
    end_size: Option<usize>,

    /// Size increment
    #[arg(long)]
    step: Option<usize>,

    /// Trials per size
    #[arg(long)]
    repeat: Option<usize>,

    /// Lowest generated altitude
    #[arg(long, allow_hyphen_values = true)]
    min_alt: Option<i64>,

    /// Highest generated altitude
    #[arg(long, allow_hyphen_values = true)]
    max_alt: Option<i64>,

    /// Variant selectors (comma separated, e.g. `1,2,3`)
    #[arg(long)]
    variants: Option<String>,

    /// RNG seed for reproducible inputs
    #[arg(long)]
    seed: Option<u64>,
}

/// Verdict handling shared by both conformance modes.
#[derive(Args, Debug)]
struct VerdictOpts {
    /// Output form the program prints
    #[arg(long, value_enum)]
    form: Option<FormOpt>,

    /// Absolute tolerance for prescan values
    #[arg(long)]
    tolerance: Option<f64>,

    /// Write a JSON report of every case
    #[arg(long, value_hint = ValueHint::FilePath)]
    report: Option<PathBuf>,

    /// Exit non-zero when any case mismatched or failed
    #[arg(long, action = ArgAction::SetTrue)]
    fail_on_mismatch: bool,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Program invoked as `<program> <csv> <selector>`
    #[arg(long, default_value = "./test.sh", value_hint = ValueHint::ExecutablePath)]
    program: PathBuf,

    #[command(flatten)]
    sweep: SweepOpts,

    #[command(flatten)]
    verdict: VerdictOpts,
}

#[derive(Parser, Debug)]
struct CheckMpiArgs {
    /// Base configuration JSON; the flags below override its fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// MPI launcher
    #[arg(long, default_value = "mpirun", value_hint = ValueHint::CommandName)]
    launcher: String,

    /// Host file passed to the launcher
    #[arg(long, default_value = "hostfile", value_hint = ValueHint::FilePath)]
    hostfile: PathBuf,

    /// Run without `--hostfile`
    #[arg(long, action = ArgAction::SetTrue)]
    no_hostfile: bool,

    /// Program started by the launcher as `<executable> <csv>`
    #[arg(long, default_value = "vid", value_hint = ValueHint::FilePath)]
    executable: PathBuf,

    /// Extra launcher argument placed before the executable (repeatable)
    #[arg(long = "mpi-arg", allow_hyphen_values = true)]
    mpi_args: Vec<String>,

    /// Largest input size; sizes run 1..=max-input
    #[arg(long)]
    max_input: Option<usize>,

    /// Orderings tried per size (ascending, descending, then shuffles)
    #[arg(long)]
    limit: Option<usize>,

    /// Lowest generated altitude
    #[arg(long, allow_hyphen_values = true)]
    min_alt: Option<i64>,

    /// Highest generated altitude
    #[arg(long, allow_hyphen_values = true)]
    max_alt: Option<i64>,

    /// RNG seed for reproducible inputs
    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    verdict: VerdictOpts,
}

#[derive(Parser, Debug)]
struct MeasureArgs {
    /// Program invoked as `<program> <csv> <selector>`, printing its elapsed μs
    #[arg(long, default_value = "./test.sh", value_hint = ValueHint::ExecutablePath)]
    program: PathBuf,

    #[command(flatten)]
    sweep: SweepOpts,

    /// Directory for results_<variant>.txt files
    #[arg(long, value_hint = ValueHint::DirPath)]
    results_dir: Option<PathBuf>,

    /// Output PNG figure path
    #[arg(long, default_value = "plot.png", value_hint = ValueHint::FilePath)]
    png: PathBuf,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Write a size × variant CSV of the minima
    #[arg(long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

#[derive(Parser, Debug)]
struct FitArgs {
    /// Sweep configuration JSON used by `measure`; supplies the results
    /// directory, variants, first size and step unless overridden below
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Directory holding results_<variant>.txt files [default: .]
    #[arg(long, value_hint = ValueHint::DirPath)]
    results_dir: Option<PathBuf>,

    /// Variant selectors to fit [default: 1,2,3]
    #[arg(long)]
    variants: Option<String>,

    /// Size of the first line in each results file [default: 8]
    #[arg(long)]
    min_size: Option<usize>,

    /// Size increment between lines [default: 1]
    #[arg(long)]
    step: Option<usize>,

    /// First size of the plotted curves (defaults to --min-size)
    #[arg(long)]
    plot_start: Option<usize>,

    /// Last size of the plotted curves (defaults to the largest measured size)
    #[arg(long)]
    plot_end: Option<usize>,

    /// Output SVG figure path
    #[arg(long, default_value = "common_graph.svg", value_hint = ValueHint::FilePath)]
    svg: PathBuf,

    /// Output PNG figure path
    #[arg(long, default_value = "common_graph.png", value_hint = ValueHint::FilePath)]
    png: PathBuf,

    /// Write fitted coefficients as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormOpt {
    Labels,
    Prescan,
}

impl From<FormOpt> for OutputForm {
    fn from(value: FormOpt) -> Self {
        match value {
            FormOpt::Labels => OutputForm::Labels,
            FormOpt::Prescan => OutputForm::Prescan,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Oracle(args) => handle_oracle(args),
        Command::Check(args) => handle_check(args),
        Command::CheckMpi(args) => handle_check_mpi(args),
        Command::Measure(args) => handle_measure(args),
        Command::Fit(args) => handle_fit(args),
    }
}

fn handle_oracle(args: OracleArgs) -> Result<()> {
    let altitudes = parse_altitudes(&args.altitudes)?;
    match args.form {
        FormOpt::Labels => println!("{}", render_labels(&visibility(&altitudes))),
        FormOpt::Prescan => println!("{}", render_prescan(&max_prescan(&altitudes))),
    }
    Ok(())
}

fn handle_check(args: CheckArgs) -> Result<()> {
    let mut config = match &args.sweep.config {
        Some(path) => ConformanceConfig::load(path, ConformanceConfig::variant_mode())
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ConformanceConfig::variant_mode(),
    };
    apply_sweep_to_conformance(&args.sweep, &mut config)?;
    apply_verdict_opts(&args.verdict, &mut config);

    info!(
        "checking {} over sizes {}..{} step {} ({} trials, {} variants)",
        args.program.display(),
        config.min_size,
        config.end_size,
        config.size_step,
        config.repeat,
        config.variants.len()
    );
    let color = io::stdout().is_terminal();
    let mut runner = CommandRunner::new(&args.program);
    let report = run_variant_mode(&mut runner, &config, |case| print_case(case, color))?;
    finish_report(&report, &args.verdict)
}

fn handle_check_mpi(args: CheckMpiArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ConformanceConfig::load(path, ConformanceConfig::process_mode())
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ConformanceConfig::process_mode(),
    };
    if let Some(max_input) = args.max_input {
        config.max_input = max_input;
    }
    if let Some(limit) = args.limit {
        config.ordering_limit = limit;
    }
    if let Some(min) = args.min_alt {
        config.min_altitude = min;
    }
    if let Some(max) = args.max_alt {
        config.max_altitude = max;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    apply_verdict_opts(&args.verdict, &mut config);

    let mut runner = MpiRunner::new(args.launcher.as_str(), &args.executable);
    if !args.no_hostfile {
        runner = runner.with_hostfile(&args.hostfile);
    }
    runner.extra_args = args.mpi_args.clone();

    info!(
        "checking {} under {} for sizes 1..={} ({} orderings max)",
        args.executable.display(),
        args.launcher,
        config.max_input,
        config.ordering_limit
    );
    let color = io::stdout().is_terminal();
    let report = run_process_mode(&mut runner, &config, |case| print_case(case, color))?;
    finish_report(&report, &args.verdict)
}

fn handle_measure(args: MeasureArgs) -> Result<()> {
    let mut config = match &args.sweep.config {
        Some(path) => SweepConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SweepConfig::default(),
    };
    apply_sweep_to_measure(&args.sweep, &mut config)?;
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }

    info!(
        "timing {} over sizes {}..{} step {} ({} trials)",
        args.program.display(),
        config.min_size,
        config.end_size,
        config.size_step,
        config.repeat
    );
    let mut runner = CommandRunner::new(&args.program);
    let mut table = TimingTable::new();
    run_sweep(&mut runner, &config, &mut table)
        .with_context(|| format!("sweep into {} failed", config.results_dir.display()))?;
    for variant in &config.variants {
        info!(
            "Wrote results: {}",
            config.results_dir.join(variant.results_file_name()).display()
        );
    }

    if let Some(path) = &args.csv {
        write_summary_csv(&table, &config.variants, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote summary CSV: {}", path.display());
    }

    if !args.no_plot {
        let sizes: Vec<f64> = table.sizes().iter().map(|&n| n as f64).collect();
        let series: Vec<PlotSeries> = config
            .variants
            .iter()
            .enumerate()
            .map(|(i, variant)| {
                PlotSeries::new(
                    variant.label.as_str(),
                    &sizes,
                    &table.series(variant.selector),
                    palette(i),
                )
            })
            .collect();
        write_plot(&series, &args.png, ChartKind::Png, true);
        if let Some(svg) = &args.svg {
            write_plot(&series, svg, ChartKind::Svg, true);
        }
    }
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let layout = fit_layout(&args)?;
    let mut fitted: Vec<(Variant, LogFit, usize)> = Vec::new();
    for variant in layout.variants.iter().cloned() {
        let path = layout.results_dir.join(variant.results_file_name());
        let values = match load_results(&path) {
            Ok(values) => values,
            Err(err) => {
                warn!("Skipping {}: {}", variant.label, err);
                continue;
            }
        };
        let sizes = sizes_for(layout.min_size, layout.size_step, values.len());
        match fit_log2(&sizes, &values) {
            Ok(fit) => {
                info!(
                    "{}: time(n) = {:.4} + {:.4}·log2(n)  (rss {:.4}, {} samples)",
                    variant.label, fit.a, fit.b, fit.rss, fit.samples
                );
                let last = sizes.last().map(|&n| n as usize).unwrap_or(layout.min_size);
                fitted.push((variant, fit, last));
            }
            Err(err) => warn!("Cannot fit {}: {}", variant.label, err),
        }
    }
    if fitted.is_empty() {
        return Err(anyhow!(
            "no results in {} could be fitted",
            layout.results_dir.display()
        ));
    }

    if let Some(path) = &args.json {
        let entries: Vec<serde_json::Value> = fitted
            .iter()
            .map(|(variant, fit, _)| serde_json::json!({ "variant": variant, "fit": fit }))
            .collect();
        let text = serde_json::to_string_pretty(&entries)?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote fit coefficients: {}", path.display());
    }

    if !args.no_plot {
        let start = args.plot_start.unwrap_or(layout.min_size).max(1);
        let end = args
            .plot_end
            .unwrap_or_else(|| fitted.iter().map(|(_, _, last)| *last).max().unwrap_or(start));
        if end < start {
            return Err(anyhow!("plot range {}..={} is empty", start, end));
        }
        let xs: Vec<f64> = (start..=end)
            .step_by(layout.size_step.max(1))
            .map(|n| n as f64)
            .collect();
        let series: Vec<PlotSeries> = fitted
            .iter()
            .enumerate()
            .map(|(i, (variant, fit, _))| {
                let ys: Vec<f64> = xs.iter().map(|&n| fit.evaluate(n)).collect();
                PlotSeries::new(format!("Fitted curve: {}", variant.label), &xs, &ys, palette(i))
            })
            .collect();
        write_plot(&series, &args.svg, ChartKind::Svg, false);
        write_plot(&series, &args.png, ChartKind::Png, false);
    }
    Ok(())
}

/// Where the results files live and which sizes their lines stand for.
fn fit_layout(args: &FitArgs) -> Result<SweepConfig> {
    let mut config = match &args.config {
        Some(path) => SweepConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SweepConfig::default(),
    };
    if let Some(dir) = &args.results_dir {
        config.results_dir = dir.clone();
    }
    if let Some(list) = &args.variants {
        config.variants = parse_variant_list(list)?;
    }
    if let Some(min_size) = args.min_size {
        config.min_size = min_size;
    }
    if let Some(step) = args.step {
        config.size_step = step;
    }
    Ok(config)
}

fn apply_sweep_to_conformance(opts: &SweepOpts, config: &mut ConformanceConfig) -> Result<()> {
    if let Some(v) = opts.min_size {
        config.min_size = v;
    }
    if let Some(v) = opts.end_size {
        config.end_size = v;
    }
    if let Some(v) = opts.step {
        config.size_step = v;
    }
    if let Some(v) = opts.repeat {
        config.repeat = v;
    }
    if let Some(v) = opts.min_alt {
        config.min_altitude = v;
    }
    if let Some(v) = opts.max_alt {
        config.max_altitude = v;
    }
    if let Some(list) = &opts.variants {
        config.variants = parse_variant_list(list)?;
    }
    if opts.seed.is_some() {
        config.seed = opts.seed;
    }
    Ok(())
}

fn apply_sweep_to_measure(opts: &SweepOpts, config: &mut SweepConfig) -> Result<()> {
    if let Some(v) = opts.min_size {
        config.min_size = v;
    }
    if let Some(v) = opts.end_size {
        config.end_size = v;
    }
    if let Some(v) = opts.step {
        config.size_step = v;
    }
    if let Some(v) = opts.repeat {
        config.repeat = v;
    }
    if let Some(v) = opts.min_alt {
        config.min_altitude = v;
    }
    if let Some(v) = opts.max_alt {
        config.max_altitude = v;
    }
    if let Some(list) = &opts.variants {
        config.variants = parse_variant_list(list)?;
    }
    if opts.seed.is_some() {
        config.seed = opts.seed;
    }
    Ok(())
}

fn apply_verdict_opts(opts: &VerdictOpts, config: &mut ConformanceConfig) {
    if let Some(form) = opts.form {
        config.form = form.into();
    }
    if let Some(tolerance) = opts.tolerance {
        config.tolerance = tolerance;
    }
}

fn finish_report(report: &ConformanceReport, opts: &VerdictOpts) -> Result<()> {
    info!(
        "{} cases: {} passed, {} mismatched, {} failed",
        report.total(),
        report.passed,
        report.mismatched,
        report.failed
    );
    if let Some(path) = &opts.report {
        report
            .write_json(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote report: {}", path.display());
    }
    if opts.fail_on_mismatch && !report.all_passed() {
        return Err(anyhow!(
            "{} of {} cases did not pass",
            report.mismatched + report.failed,
            report.total()
        ));
    }
    Ok(())
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_case(case: &CaseOutcome, color: bool) {
    let (on, off) = match (color, case.passed()) {
        (false, _) => ("", ""),
        (true, true) => (GREEN, RESET),
        (true, false) => (RED, RESET),
    };
    let tag = format!("Test ({} - {})", case.size, case.knob);
    if case.passed() {
        println!("{on}{tag} successful.{off}");
        return;
    }
    println!("{on}{tag} unsuccessful.{off}");
    println!("{}", "-".repeat(40));
    println!("input:    {}", case.input);
    println!("expected: {}", case.expected);
    println!(
        "observed: {}",
        case.observed.as_deref().unwrap_or("<no output>")
    );
    if let Verdict::Failed(reason) = &case.verdict {
        println!("reason:   {}", reason);
    }
    println!("{}", "-".repeat(40));
}

fn write_plot(series: &[PlotSeries], path: &Path, kind: ChartKind, markers: bool) {
    let label = match kind {
        ChartKind::Png => "PNG",
        ChartKind::Svg => "SVG",
    };
    match render_chart_guard(series, path, kind, markers) {
        Ok(()) => info!("Wrote plot: {}", path.display()),
        Err(err) => warn!("Skipping {} render ({}): {}", label, path.display(), err),
    }
}

fn parse_altitudes(input: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed
            .parse()
            .with_context(|| format!("invalid altitude '{}': expected a number", trimmed))?;
        if !value.is_finite() {
            return Err(anyhow!("invalid altitude '{}': must be finite", trimmed));
        }
        out.push(value);
    }
    if out.is_empty() {
        return Err(HarnessError::InvalidParameter("altitude list was empty".into()).into());
    }
    Ok(out)
}
