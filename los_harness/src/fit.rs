//! Least-squares fit of measured minima to `time(n) = a + b·log2(n)`.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::HarnessError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogFit {
    pub a: f64,
    pub b: f64,
    /// Residual sum of squares over the samples used.
    pub rss: f64,
    pub samples: usize,
}

impl LogFit {
    pub fn evaluate(&self, n: f64) -> f64 {
        self.a + self.b * n.log2()
    }
}

/// The model is linear in `a` and `b`, so the normal equations give the
/// least-squares optimum directly. Non-finite timings and sizes below 1 are
/// skipped.
pub fn fit_log2(sizes: &[f64], times: &[f64]) -> Result<LogFit, HarnessError> {
    if sizes.len() != times.len() {
        return Err(HarnessError::InvalidParameter(format!(
            "{} sizes but {} timings",
            sizes.len(),
            times.len()
        )));
    }
    let (xs, ys): (Vec<f64>, Vec<f64>) = sizes
        .iter()
        .zip(times.iter())
        .filter(|(n, t)| n.is_finite() && **n >= 1.0 && t.is_finite())
        .map(|(&n, &t)| (n.log2(), t))
        .unzip();
    if xs.len() < 2 {
        return Err(HarnessError::InsufficientData(format!(
            "need at least two timings, got {}",
            xs.len()
        )));
    }

    let x = Array1::from_vec(xs);
    let y = Array1::from_vec(ys);
    let count = x.len() as f64;
    let x_mean = x.sum() / count;
    let y_mean = y.sum() / count;
    let dx = &x - x_mean;
    let dy = &y - y_mean;
    let sxx = dx.dot(&dx);
    if sxx <= f64::EPSILON {
        return Err(HarnessError::InsufficientData(
            "timings cover a single size".into(),
        ));
    }
    let b = dx.dot(&dy) / sxx;
    let a = y_mean - b * x_mean;
    let residuals = &y - &(&x * b + a);
    Ok(LogFit {
        a,
        b,
        rss: residuals.dot(&residuals),
        samples: x.len(),
    })
}

/// Sizes matching the lines of a persisted results file written by a sweep
/// starting at `min_size` with `step`.
pub fn sizes_for(min_size: usize, step: usize, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| (min_size + i * step.max(1)) as f64)
        .collect()
}
