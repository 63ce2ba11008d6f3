//! Tolerance-based comparison of program output against the oracle.

use crate::oracle::Label;
use crate::HarnessError;

/// Finite angles closer than this are considered equal.
pub const DEFAULT_TOLERANCE: f64 = 1e-5;

/// Anything at or below this is the prescan's neutral element. Programs
/// written against single-precision floats print `-FLT_MAX`
/// (`-3.40282e+38`) instead of negative infinity.
pub const SENTINEL_FLOOR: f64 = -3.4e38;

pub fn is_sentinel(value: f64) -> bool {
    value == f64::NEG_INFINITY || value <= SENTINEL_FLOOR
}

/// Sentinels only match sentinels; finite values match within `tolerance`.
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    match (is_sentinel(a), is_sentinel(b)) {
        (true, true) => true,
        (false, false) => (a - b).abs() <= tolerance,
        _ => false,
    }
}

pub fn prescan_matches(expected: &[f64], observed: &[f64], tolerance: f64) -> bool {
    expected.len() == observed.len()
        && expected
            .iter()
            .zip(observed.iter())
            .all(|(&e, &o)| approx_eq(e, o, tolerance))
}

pub fn labels_match(expected: &[Label], observed: &[Label]) -> bool {
    expected == observed
}

fn tokens(line: &str) -> Result<Vec<&str>, HarnessError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(HarnessError::MalformedOutput("empty output line".into()));
    }
    Ok(trimmed.split(',').map(str::trim).collect())
}

pub fn parse_prescan_line(line: &str) -> Result<Vec<f64>, HarnessError> {
    tokens(line)?
        .into_iter()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                HarnessError::MalformedOutput(format!("'{token}' is not a number"))
            })
        })
        .collect()
}

pub fn parse_label_line(line: &str) -> Result<Vec<Label>, HarnessError> {
    tokens(line)?.into_iter().map(str::parse).collect()
}
