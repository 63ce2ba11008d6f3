//! Harness behaviour against in-process stand-ins for the program under test.

use los_harness::oracle::{angles, render_labels, Label, SENTINEL};
use los_harness::perf::{parse_timing, write_summary_csv};
use los_harness::{
    check_case, fit_log2, flush, load_results, run_process_mode, run_sweep, run_variant_mode,
    sizes_for, ConformanceConfig, HarnessError, Knob, OutputForm, Runner, SweepConfig,
    TimingTable, Variant, Verdict,
};

/// Blocked max-prescan over `p` workers: each block scans locally and is
/// offset by the exclusive prescan of the block maxima.
fn blocked_labels(alts: &[f64], workers: usize) -> Vec<Label> {
    let angles = angles(alts);
    let workers = workers.clamp(1, angles.len());
    let chunk = angles.len().div_ceil(workers);
    let blocks: Vec<&[f64]> = angles.chunks(chunk).collect();

    let mut offsets = Vec::with_capacity(blocks.len());
    let mut carry = SENTINEL;
    for block in &blocks {
        offsets.push(carry);
        carry = block.iter().copied().fold(carry, f64::max);
    }

    let mut labels = Vec::with_capacity(angles.len());
    for (block, offset) in blocks.iter().zip(offsets) {
        let mut running = offset;
        for &angle in block.iter() {
            labels.push(if labels.is_empty() {
                Label::Observer
            } else if angle > running {
                Label::Visible
            } else {
                Label::Hidden
            });
            running = running.max(angle);
        }
    }
    labels
}

struct BlockedProgram {
    calls: usize,
}

impl Runner for BlockedProgram {
    fn run(&mut self, altitudes: &[f64], knob: Knob) -> Result<String, HarnessError> {
        self.calls += 1;
        let workers = match knob {
            Knob::Processes(p) => p,
            Knob::Variant(v) => v as usize,
        };
        Ok(render_labels(&blocked_labels(altitudes, workers)))
    }
}

/// Forgets the offset from earlier blocks, so it only works with one worker.
struct OffsetBug;

impl Runner for OffsetBug {
    fn run(&mut self, altitudes: &[f64], knob: Knob) -> Result<String, HarnessError> {
        let Knob::Processes(workers) = knob else {
            return Err(HarnessError::InvalidParameter("expected a process count".into()));
        };
        let angles = angles(altitudes);
        let chunk = angles.len().div_ceil(workers.max(1));
        let mut out = Vec::new();
        for block in angles.chunks(chunk) {
            let mut running = SENTINEL;
            for &angle in block {
                out.push(if out.is_empty() {
                    Label::Observer
                } else if angle > running {
                    Label::Visible
                } else {
                    Label::Hidden
                });
                running = running.max(angle);
            }
        }
        Ok(render_labels(&out))
    }
}

#[test]
fn every_worker_count_agrees_with_the_oracle() {
    let config = ConformanceConfig {
        max_input: 9,
        ordering_limit: 4,
        seed: Some(2024),
        ..ConformanceConfig::process_mode()
    };
    let mut program = BlockedProgram { calls: 0 };
    let report = run_process_mode(&mut program, &config, |_| {}).unwrap();
    assert!(report.all_passed(), "{:?}", report.cases.iter().find(|c| !c.passed()));
    assert_eq!(program.calls, report.total());
}

#[test]
fn missing_block_offset_is_caught() {
    let config = ConformanceConfig {
        max_input: 12,
        ordering_limit: 6,
        seed: Some(3),
        ..ConformanceConfig::process_mode()
    };
    let mut mismatches = Vec::new();
    let report = run_process_mode(&mut OffsetBug, &config, |case| {
        if case.verdict == Verdict::Mismatch {
            mismatches.push(case.knob);
        }
    })
    .unwrap();
    assert!(report.mismatched > 0);
    assert_eq!(report.failed, 0);
    // a single worker sees the whole sequence and is always right
    assert!(!mismatches.contains(&Knob::Processes(1)));
}

#[test]
fn ascending_input_stresses_the_boundary() {
    let outcome = check_case(
        &mut OffsetBug,
        &[0.0, 1.0, 3.0, 7.0, 8.0, 20.0],
        Knob::Processes(3),
        OutputForm::Labels,
        1e-5,
    );
    assert_eq!(outcome.expected, "_,v,v,v,u,v");
    assert_eq!(outcome.verdict, Verdict::Mismatch);
}

#[test]
fn variant_mode_reports_garbage_output_as_failure() {
    struct Garbage;
    impl Runner for Garbage {
        fn run(&mut self, _: &[f64], _: Knob) -> Result<String, HarnessError> {
            Ok("segmentation fault".into())
        }
    }
    let config = ConformanceConfig {
        min_size: 4,
        end_size: 6,
        repeat: 1,
        seed: Some(1),
        ..ConformanceConfig::variant_mode()
    };
    let report = run_variant_mode(&mut Garbage, &config, |_| {}).unwrap();
    assert_eq!(report.failed, report.total());
    assert!(report
        .cases
        .iter()
        .all(|c| c.observed.as_deref() == Some("segmentation fault")));
}

/// Reports `base + slope * log2(n)` plus a per-call jitter that the sweep's
/// minimum should strip away.
struct LogClock {
    calls: u64,
    fail_selector: Option<u8>,
}

impl Runner for LogClock {
    fn run(&mut self, altitudes: &[f64], knob: Knob) -> Result<String, HarnessError> {
        self.calls += 1;
        let Knob::Variant(selector) = knob else {
            return Err(HarnessError::InvalidParameter("expected a variant".into()));
        };
        if Some(selector) == self.fail_selector {
            return Err(HarnessError::ProcessFailed {
                program: "fake".into(),
                code: Some(1),
                stderr: "crash".into(),
            });
        }
        let n = altitudes.len() as f64;
        let jitter = (self.calls % 2) as f64 * 5.0;
        let time = 10.0 * selector as f64 + 2.0 * n.log2() + jitter;
        Ok(format!("{time}"))
    }
}

#[test]
fn sweep_persists_minima_and_fits_the_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SweepConfig {
        min_size: 2,
        end_size: 20,
        size_step: 2,
        repeat: 3,
        results_dir: dir.path().to_path_buf(),
        seed: Some(9),
        ..SweepConfig::default()
    };
    let mut clock = LogClock {
        calls: 0,
        fail_selector: None,
    };
    let mut table = TimingTable::new();
    run_sweep(&mut clock, &config, &mut table).unwrap();
    assert_eq!(table.sizes(), &[2, 4, 6, 8, 10, 12, 14, 16, 18]);

    for variant in &config.variants {
        let values = load_results(&dir.path().join(variant.results_file_name())).unwrap();
        assert_eq!(values.len(), 9);
        let sizes = sizes_for(config.min_size, config.size_step, values.len());
        let fit = fit_log2(&sizes, &values).unwrap();
        assert!((fit.a - 10.0 * variant.selector as f64).abs() < 1e-6, "{fit:?}");
        assert!((fit.b - 2.0).abs() < 1e-6, "{fit:?}");
    }
}

#[test]
fn flush_rewrites_instead_of_appending() {
    let dir = tempfile::tempdir().expect("tempdir");
    let variants = vec![Variant::from_selector(1)];
    let path = dir.path().join(variants[0].results_file_name());
    std::fs::write(&path, "1\n2\n3\n4\n5\n").unwrap();

    let mut table = TimingTable::new();
    table.record(los_harness::Sample {
        selector: 1,
        size: 8,
        elapsed: 0.25,
    });
    flush(&table, &variants, dir.path()).unwrap();
    assert_eq!(load_results(&path).unwrap(), vec![0.25]);
}

#[test]
fn failing_variant_leaves_nan_rows_and_others_continue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SweepConfig {
        min_size: 4,
        end_size: 7,
        repeat: 2,
        variants: vec![Variant::from_selector(1), Variant::from_selector(2)],
        results_dir: dir.path().to_path_buf(),
        seed: Some(4),
        ..SweepConfig::default()
    };
    let mut clock = LogClock {
        calls: 0,
        fail_selector: Some(2),
    };
    let mut table = TimingTable::new();
    run_sweep(&mut clock, &config, &mut table).unwrap();

    let ok = load_results(&dir.path().join("results_log_p.txt")).unwrap();
    let broken = load_results(&dir.path().join("results_n_2.txt")).unwrap();
    assert_eq!(ok.len(), 3);
    assert!(ok.iter().all(|v| v.is_finite()));
    assert_eq!(broken.len(), 3);
    assert!(broken.iter().all(|v| v.is_nan()));

    let csv_path = dir.path().join("summary.csv");
    write_summary_csv(&table, &config.variants, &csv_path).unwrap();
    let csv_text = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = csv_text.lines();
    assert_eq!(lines.next(), Some("size,log_p,n_2"));
    assert!(lines.next().unwrap().starts_with("4,"));
}

#[test]
fn timing_parser_matches_program_format() {
    assert_eq!(parse_timing("123.456").unwrap(), 123.456);
}
