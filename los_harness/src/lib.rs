//! Line-of-sight visibility oracle and the harnesses that check an external
//! parallel implementation against it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod compare;
pub mod conformance;
pub mod fit;
pub mod generate;
pub mod oracle;
pub mod perf;
pub mod runner;

pub use compare::{approx_eq, is_sentinel, DEFAULT_TOLERANCE};
pub use conformance::{
    check_case, run_process_mode, run_variant_mode, CaseOutcome, ConformanceConfig,
    ConformanceReport, OutputForm, Verdict,
};
pub use fit::{fit_log2, sizes_for, LogFit};
pub use generate::{AltitudeGenerator, InputOrdering};
pub use oracle::{max_prescan, visibility, Label, SENTINEL};
pub use perf::{flush, load_results, run_sweep, Sample, SweepConfig, TimingTable};
pub use runner::{encode_altitudes, CommandRunner, Knob, MpiRunner, Runner};

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with status {code:?}: {stderr}")]
    ProcessFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("malformed program output: {0}")]
    MalformedOutput(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Algorithm variant of the program under test, addressed by its integer
/// selector. What each selector means is up to the program; the harness only
/// passes it through.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variant {
    pub selector: u8,
    /// File-name friendly identifier used for persisted results.
    pub slug: String,
    /// Human-readable label used in plot legends.
    pub label: String,
}

impl Variant {
    pub fn new(selector: u8, slug: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            selector,
            slug: slug.into(),
            label: label.into(),
        }
    }

    /// Variant for a selector, using the well-known slug/label when one exists.
    pub fn from_selector(selector: u8) -> Self {
        default_variants()
            .into_iter()
            .find(|v| v.selector == selector)
            .unwrap_or_else(|| {
                Variant::new(selector, format!("v{selector}"), format!("variant {selector}"))
            })
    }

    pub fn results_file_name(&self) -> String {
        format!("results_{}.txt", self.slug)
    }
}

pub fn default_variants() -> Vec<Variant> {
    vec![
        Variant::new(1, "log_p", "n/p ≥ log p"),
        Variant::new(2, "n_2", "n/2"),
        Variant::new(3, "n", "n"),
    ]
}

/// Parse a comma separated selector list such as `1,2,3`.
pub fn parse_variant_list(input: &str) -> Result<Vec<Variant>, HarnessError> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let selector: u8 = trimmed.parse().map_err(|_| {
            HarnessError::InvalidParameter(format!("invalid variant selector '{trimmed}'"))
        })?;
        if out.iter().any(|v: &Variant| v.selector == selector) {
            continue;
        }
        out.push(Variant::from_selector(selector));
    }
    if out.is_empty() {
        return Err(HarnessError::InvalidParameter("variant list was empty".into()));
    }
    Ok(out)
}

/// Half-open size range `[min, end)` walked with `step`.
pub(crate) fn size_range(min: usize, end: usize, step: usize) -> Result<Vec<usize>, HarnessError> {
    if min == 0 {
        return Err(HarnessError::InvalidParameter("sizes must start at 1 or above".into()));
    }
    if step == 0 {
        return Err(HarnessError::InvalidParameter("size step must be > 0".into()));
    }
    Ok((min..end).step_by(step).collect())
}
