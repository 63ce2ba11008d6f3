//! Conformance harness: run the program under test across variants, process
//! counts and input orderings and compare every answer with the oracle.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compare::{
    labels_match, parse_label_line, parse_prescan_line, prescan_matches, DEFAULT_TOLERANCE,
};
use crate::generate::{trial_count, AltitudeGenerator, InputOrdering};
use crate::oracle::{max_prescan, render_labels, render_prescan, visibility, Label};
use crate::runner::{encode_altitudes, Knob, Runner};
use crate::{default_variants, size_range, HarnessError, Variant};

/// Which oracle output the program is expected to print.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputForm {
    /// Exclusive max-prescan of the angles, one number per point.
    Prescan,
    /// Visibility labels `_`, `v`, `u`.
    Labels,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConformanceConfig {
    pub min_size: usize,
    /// Exclusive upper bound of the size sweep.
    pub end_size: usize,
    pub size_step: usize,
    pub repeat: usize,
    pub min_altitude: i64,
    pub max_altitude: i64,
    pub variants: Vec<Variant>,
    /// Largest sequence in process-count mode; sizes run 1..=max_input.
    pub max_input: usize,
    pub ordering_limit: usize,
    pub form: OutputForm,
    pub tolerance: f64,
    pub seed: Option<u64>,
}

impl Default for ConformanceConfig {
    fn default() -> Self {
        Self::variant_mode()
    }
}

impl ConformanceConfig {
    pub fn variant_mode() -> Self {
        Self {
            min_size: 8,
            end_size: 24,
            size_step: 1,
            repeat: 5,
            min_altitude: 0,
            max_altitude: 100,
            variants: default_variants(),
            max_input: 30,
            ordering_limit: 15,
            form: OutputForm::Prescan,
            tolerance: DEFAULT_TOLERANCE,
            seed: None,
        }
    }

    pub fn process_mode() -> Self {
        Self {
            min_altitude: 1,
            max_altitude: 1024,
            form: OutputForm::Labels,
            ..Self::variant_mode()
        }
    }

    /// Load a JSON config; fields missing from the file keep their value in
    /// `base`, so a process-mode file inherits `process_mode()` defaults.
    pub fn load(path: &Path, base: Self) -> Result<Self, HarnessError> {
        let text = fs::read_to_string(path).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |source: serde_json::Error| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            source,
        };
        let file = match serde_json::from_str(&text).map_err(parse_err)? {
            serde_json::Value::Object(file) => file,
            other => return serde_json::from_value(other).map_err(parse_err),
        };
        let mut merged = serde_json::to_value(base)?;
        if let Some(fields) = merged.as_object_mut() {
            fields.extend(file);
        }
        serde_json::from_value(merged).map_err(parse_err)
    }

    fn generator(&self) -> Result<AltitudeGenerator, HarnessError> {
        AltitudeGenerator::new(self.min_altitude, self.max_altitude, self.seed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Mismatch,
    /// The program could not be run or its output could not be parsed.
    Failed(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub size: usize,
    pub knob: Knob,
    pub ordering: Option<InputOrdering>,
    pub input: String,
    pub expected: String,
    pub observed: Option<String>,
    pub verdict: Verdict,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConformanceReport {
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub passed: usize,
    pub mismatched: usize,
    pub failed: usize,
    pub cases: Vec<CaseOutcome>,
}

impl ConformanceReport {
    fn new(mode: &str) -> Self {
        Self {
            generated_at: Utc::now(),
            mode: mode.to_string(),
            passed: 0,
            mismatched: 0,
            failed: 0,
            cases: Vec::new(),
        }
    }

    fn push(&mut self, outcome: CaseOutcome) {
        match outcome.verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Mismatch => self.mismatched += 1,
            Verdict::Failed(_) => self.failed += 1,
        }
        self.cases.push(outcome);
    }

    pub fn total(&self) -> usize {
        self.cases.len()
    }

    pub fn all_passed(&self) -> bool {
        self.mismatched == 0 && self.failed == 0
    }

    pub fn write_json(&self, path: &Path) -> Result<(), HarnessError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

enum Expected {
    Prescan(Vec<f64>),
    Labels(Vec<Label>),
}

impl Expected {
    fn compute(altitudes: &[f64], form: OutputForm) -> Self {
        match form {
            OutputForm::Prescan => Expected::Prescan(max_prescan(altitudes)),
            OutputForm::Labels => Expected::Labels(visibility(altitudes)),
        }
    }

    fn render(&self) -> String {
        match self {
            Expected::Prescan(values) => render_prescan(values),
            Expected::Labels(labels) => render_labels(labels),
        }
    }
}

/// Run the program once and judge its answer. Never fails: invocation and
/// parse errors become [`Verdict::Failed`].
pub fn check_case<R: Runner + ?Sized>(
    runner: &mut R,
    altitudes: &[f64],
    knob: Knob,
    form: OutputForm,
    tolerance: f64,
) -> CaseOutcome {
    let expected = Expected::compute(altitudes, form);
    let mut outcome = CaseOutcome {
        size: altitudes.len(),
        knob,
        ordering: None,
        input: encode_altitudes(altitudes),
        expected: expected.render(),
        observed: None,
        verdict: Verdict::Pass,
    };

    let line = match runner.run(altitudes, knob) {
        Ok(line) => line,
        Err(err) => {
            outcome.verdict = Verdict::Failed(err.to_string());
            return outcome;
        }
    };

    let judged = match &expected {
        Expected::Prescan(values) => parse_prescan_line(&line)
            .map(|observed| prescan_matches(values, &observed, tolerance)),
        Expected::Labels(labels) => {
            parse_label_line(&line).map(|observed| labels_match(labels, &observed))
        }
    };
    outcome.verdict = match judged {
        Ok(true) => Verdict::Pass,
        Ok(false) => Verdict::Mismatch,
        Err(err) => Verdict::Failed(err.to_string()),
    };
    outcome.observed = Some(line);
    outcome
}

/// Fixed worker count, every algorithm variant, `repeat` random inputs per size.
pub fn run_variant_mode<R, F>(
    runner: &mut R,
    config: &ConformanceConfig,
    mut on_case: F,
) -> Result<ConformanceReport, HarnessError>
where
    R: Runner + ?Sized,
    F: FnMut(&CaseOutcome),
{
    if config.variants.is_empty() {
        return Err(HarnessError::InvalidParameter("no variants configured".into()));
    }
    let sizes = size_range(config.min_size, config.end_size, config.size_step)?;
    let mut generator = config.generator()?;
    let mut report = ConformanceReport::new("variant");

    for size in sizes {
        debug!("variant mode: size {}", size);
        for _ in 0..config.repeat {
            let altitudes = generator.random(size);
            for variant in &config.variants {
                let outcome = check_case(
                    runner,
                    &altitudes,
                    Knob::Variant(variant.selector),
                    config.form,
                    config.tolerance,
                );
                on_case(&outcome);
                report.push(outcome);
            }
        }
    }

    info!(
        "variant mode finished: {} passed, {} mismatched, {} failed",
        report.passed, report.mismatched, report.failed
    );
    Ok(report)
}

/// Fixed algorithm, worker counts 1..=n, sorted and shuffled orderings. The
/// sequence grows by one random point per size.
pub fn run_process_mode<R, F>(
    runner: &mut R,
    config: &ConformanceConfig,
    mut on_case: F,
) -> Result<ConformanceReport, HarnessError>
where
    R: Runner + ?Sized,
    F: FnMut(&CaseOutcome),
{
    if config.max_input == 0 {
        return Err(HarnessError::InvalidParameter("max_input must be > 0".into()));
    }
    let mut generator = config.generator()?;
    let mut report = ConformanceReport::new("process");
    let mut altitudes = generator.random(1);

    for size in 1..=config.max_input {
        info!("input size {}", size);
        for trial in 0..trial_count(size, config.ordering_limit) {
            let ordering = InputOrdering::for_trial(trial);
            generator.arrange(&mut altitudes, ordering);
            debug!("input {} ({:?})", encode_altitudes(&altitudes), ordering);
            for processes in 1..=size {
                let mut outcome = check_case(
                    runner,
                    &altitudes,
                    Knob::Processes(processes),
                    config.form,
                    config.tolerance,
                );
                outcome.ordering = Some(ordering);
                on_case(&outcome);
                report.push(outcome);
            }
        }
        generator.push_random(&mut altitudes);
    }

    info!(
        "process mode finished: {} passed, {} mismatched, {} failed",
        report.passed, report.mismatched, report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::SENTINEL;

    /// Answers with the oracle, formatted the way a C++ program prints it.
    struct OracleRunner;

    impl Runner for OracleRunner {
        fn run(&mut self, altitudes: &[f64], knob: Knob) -> Result<String, HarnessError> {
            Ok(match knob {
                Knob::Variant(_) => max_prescan(altitudes)
                    .iter()
                    .map(|&v| {
                        if v == SENTINEL {
                            "-3.40282e+38".to_string()
                        } else {
                            format!("{}", v as f32)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                Knob::Processes(_) => render_labels(&visibility(altitudes)),
            })
        }
    }

    struct FailingRunner;

    impl Runner for FailingRunner {
        fn run(&mut self, _: &[f64], _: Knob) -> Result<String, HarnessError> {
            Err(HarnessError::MalformedOutput("boom".into()))
        }
    }

    #[test]
    fn honest_program_passes_prescan_check() {
        let outcome = check_case(
            &mut OracleRunner,
            &[3.0, 1.0, 4.0, 1.0, 5.0],
            Knob::Variant(1),
            OutputForm::Prescan,
            DEFAULT_TOLERANCE,
        );
        assert_eq!(outcome.verdict, Verdict::Pass, "{outcome:?}");
        assert_eq!(outcome.input, "3,1,4,1,5");
    }

    #[test]
    fn label_disagreement_is_a_mismatch() {
        struct AllVisible;
        impl Runner for AllVisible {
            fn run(&mut self, altitudes: &[f64], _: Knob) -> Result<String, HarnessError> {
                let mut labels = vec!["v"; altitudes.len()];
                labels[0] = "_";
                Ok(labels.join(","))
            }
        }
        let outcome = check_case(
            &mut AllVisible,
            &[5.0, 5.0, 5.0],
            Knob::Processes(2),
            OutputForm::Labels,
            DEFAULT_TOLERANCE,
        );
        assert_eq!(outcome.verdict, Verdict::Mismatch);
        assert_eq!(outcome.expected, "_,v,u");
        assert_eq!(outcome.observed.as_deref(), Some("_,v,v"));
    }

    #[test]
    fn runner_error_is_recorded_not_raised() {
        let outcome = check_case(
            &mut FailingRunner,
            &[1.0, 2.0],
            Knob::Variant(3),
            OutputForm::Prescan,
            DEFAULT_TOLERANCE,
        );
        assert!(matches!(outcome.verdict, Verdict::Failed(_)));
        assert!(outcome.observed.is_none());
    }

    #[test]
    fn variant_mode_covers_every_size_repeat_and_variant() {
        let config = ConformanceConfig {
            min_size: 2,
            end_size: 5,
            repeat: 2,
            seed: Some(11),
            ..ConformanceConfig::variant_mode()
        };
        let mut seen = 0;
        let report = run_variant_mode(&mut OracleRunner, &config, |_| seen += 1).unwrap();
        assert_eq!(report.total(), 3 * 2 * 3);
        assert_eq!(seen, report.total());
        assert!(report.all_passed());
    }

    #[test]
    fn process_mode_walks_orderings_and_worker_counts() {
        let config = ConformanceConfig {
            max_input: 4,
            ordering_limit: 3,
            seed: Some(5),
            ..ConformanceConfig::process_mode()
        };
        let report = run_process_mode(&mut OracleRunner, &config, |_| {}).unwrap();
        // size 1: 1 ordering x 1, size 2: 2 x 2, size 3: 3 x 3, size 4: 3 x 4
        assert_eq!(report.total(), 1 + 4 + 9 + 12);
        assert!(report.all_passed());
        assert_eq!(report.cases[1].ordering, Some(InputOrdering::Ascending));
        assert_eq!(report.cases[3].ordering, Some(InputOrdering::Descending));
    }

    #[test]
    fn partial_config_keeps_the_base_mode_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mpi.json");
        fs::write(&path, r#"{"max_input": 4, "seed": 1}"#).unwrap();

        let config = ConformanceConfig::load(&path, ConformanceConfig::process_mode()).unwrap();
        assert_eq!(config.max_input, 4);
        assert_eq!(config.seed, Some(1));
        assert_eq!(config.form, OutputForm::Labels);
        assert_eq!((config.min_altitude, config.max_altitude), (1, 1024));

        let report = run_process_mode(&mut OracleRunner, &config, |_| {}).unwrap();
        assert!(report.total() > 0);
        assert!(report.all_passed());

        let variant = ConformanceConfig::load(&path, ConformanceConfig::variant_mode()).unwrap();
        assert_eq!(variant.form, OutputForm::Prescan);
        assert_eq!(variant.max_altitude, 100);
    }

    #[test]
    fn malformed_config_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = ConformanceConfig::load(&path, ConformanceConfig::variant_mode()).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigParse { .. }));
        fs::write(&path, r#"{"form": "sideways"}"#).unwrap();
        let err = ConformanceConfig::load(&path, ConformanceConfig::variant_mode()).unwrap_err();
        assert!(matches!(err, HarnessError::ConfigParse { .. }));
    }

    #[test]
    fn failures_do_not_stop_the_sweep() {
        let config = ConformanceConfig {
            min_size: 1,
            end_size: 3,
            repeat: 1,
            seed: Some(2),
            ..ConformanceConfig::variant_mode()
        };
        let report = run_variant_mode(&mut FailingRunner, &config, |_| {}).unwrap();
        assert_eq!(report.failed, 2 * 3);
        assert!(!report.all_passed());
    }
}
