//! Sequential reference for the line-of-sight problem.
//!
//! Point `i` is visible from the observer at index 0 when its elevation angle
//! is strictly greater than every angle before it. The exclusive prefix
//! maximum is derived from the inclusive max-scan by shifting it one slot to
//! the right, which matches the output a parallel prescan produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::HarnessError;

/// Neutral element of the max-prescan. Strictly below every finite angle.
pub const SENTINEL: f64 = f64::NEG_INFINITY;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Label {
    Observer,
    Visible,
    Hidden,
}

impl Label {
    pub fn as_char(self) -> char {
        match self {
            Label::Observer => '_',
            Label::Visible => 'v',
            Label::Hidden => 'u',
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for Label {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "_" => Ok(Label::Observer),
            "v" => Ok(Label::Visible),
            "u" => Ok(Label::Hidden),
            other => Err(HarnessError::MalformedOutput(format!(
                "unknown visibility label '{other}'"
            ))),
        }
    }
}

/// Elevation angle of every point as seen from index 0.
pub fn angles(altitudes: &[f64]) -> Vec<f64> {
    let Some(&origin) = altitudes.first() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(altitudes.len());
    out.push(SENTINEL);
    for (i, &alt) in altitudes.iter().enumerate().skip(1) {
        out.push(((alt - origin) / i as f64).atan());
    }
    out
}

/// Left-to-right running maximum, including the current element.
pub fn inclusive_max_scan(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut best = SENTINEL;
    for &v in values {
        if v > best {
            best = v;
        }
        out.push(best);
    }
    out
}

fn shift_right(scan: Vec<f64>) -> Vec<f64> {
    if scan.is_empty() {
        return scan;
    }
    let mut out = Vec::with_capacity(scan.len());
    out.push(SENTINEL);
    out.extend_from_slice(&scan[..scan.len() - 1]);
    out
}

fn prescan_of(angles: &[f64]) -> Vec<f64> {
    shift_right(inclusive_max_scan(angles))
}

/// Exclusive max-prescan of the angle sequence.
pub fn max_prescan(altitudes: &[f64]) -> Vec<f64> {
    prescan_of(&angles(altitudes))
}

/// Visibility label of every point.
pub fn visibility(altitudes: &[f64]) -> Vec<Label> {
    let angles = angles(altitudes);
    let prescan = prescan_of(&angles);
    angles
        .iter()
        .zip(prescan.iter())
        .enumerate()
        .map(|(i, (&angle, &prev))| {
            if i == 0 {
                Label::Observer
            } else if angle > prev {
                Label::Visible
            } else {
                Label::Hidden
            }
        })
        .collect()
}

pub fn render_prescan(values: &[f64]) -> String {
    values
        .iter()
        .map(|&v| {
            if crate::compare::is_sentinel(v) {
                "-inf".to_string()
            } else {
                format!("{v:.5}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn render_labels(labels: &[Label]) -> String {
    labels
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
