//! Random and adversarially ordered altitude sequences.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::HarnessError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InputOrdering {
    Ascending,
    Descending,
    Shuffled,
}

impl InputOrdering {
    /// Trial 0 is sorted ascending, trial 1 descending, the rest shuffled.
    pub fn for_trial(trial: usize) -> Self {
        match trial {
            0 => InputOrdering::Ascending,
            1 => InputOrdering::Descending,
            _ => InputOrdering::Shuffled,
        }
    }
}

/// Number of orderings tried for a sequence of `n` points: `min(limit, n!)`.
pub fn trial_count(n: usize, limit: usize) -> usize {
    let mut factorial: usize = 1;
    for k in 2..=n {
        factorial = factorial.saturating_mul(k);
        if factorial >= limit {
            return limit;
        }
    }
    factorial.min(limit)
}

pub struct AltitudeGenerator {
    rng: StdRng,
    min: i64,
    max: i64,
}

impl AltitudeGenerator {
    /// Integral altitudes drawn uniformly from `[min, max]`.
    pub fn new(min: i64, max: i64, seed: Option<u64>) -> Result<Self, HarnessError> {
        if min > max {
            return Err(HarnessError::InvalidParameter(format!(
                "altitude range {min}..={max} is empty"
            )));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { rng, min, max })
    }

    pub fn next_altitude(&mut self) -> f64 {
        self.rng.gen_range(self.min..=self.max) as f64
    }

    pub fn random(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.next_altitude()).collect()
    }

    pub fn push_random(&mut self, altitudes: &mut Vec<f64>) {
        let next = self.next_altitude();
        altitudes.push(next);
    }

    pub fn arrange(&mut self, altitudes: &mut [f64], ordering: InputOrdering) {
        match ordering {
            InputOrdering::Ascending => altitudes.sort_by(|a, b| a.total_cmp(b)),
            InputOrdering::Descending => altitudes.sort_by(|a, b| b.total_cmp(a)),
            InputOrdering::Shuffled => altitudes.shuffle(&mut self.rng),
        }
    }
}
