//! Performance sweep: repeated timed runs per size and variant, keeping the
//! fastest self-reported time, flushed to disk after every size.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::generate::AltitudeGenerator;
use crate::runner::{Knob, Runner};
use crate::{default_variants, size_range, HarnessError, Variant};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub min_size: usize,
    /// Exclusive upper bound of the size sweep.
    pub end_size: usize,
    pub size_step: usize,
    pub repeat: usize,
    pub min_altitude: i64,
    pub max_altitude: i64,
    pub variants: Vec<Variant>,
    pub results_dir: PathBuf,
    pub seed: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_size: 8,
            end_size: 24,
            size_step: 1,
            repeat: 5,
            min_altitude: 0,
            max_altitude: 100,
            variants: default_variants(),
            results_dir: PathBuf::from("."),
            seed: None,
        }
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let text = fs::read_to_string(path).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| HarnessError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn sizes(&self) -> Result<Vec<usize>, HarnessError> {
        size_range(self.min_size, self.end_size, self.size_step)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub selector: u8,
    pub size: usize,
    /// Elapsed time as reported by the program (μs).
    pub elapsed: f64,
}

/// Minimum elapsed time per (variant selector, size).
#[derive(Clone, Debug, Default)]
pub struct TimingTable {
    minima: BTreeMap<(u8, usize), f64>,
    sizes: Vec<usize>,
}

impl TimingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a size step so it appears in every series, even when all
    /// of its trials failed.
    pub fn begin_size(&mut self, size: usize) {
        if !self.sizes.contains(&size) {
            self.sizes.push(size);
            self.sizes.sort_unstable();
        }
    }

    pub fn record(&mut self, sample: Sample) {
        if !sample.elapsed.is_finite() {
            return;
        }
        self.begin_size(sample.size);
        self.minima
            .entry((sample.selector, sample.size))
            .and_modify(|best| *best = best.min(sample.elapsed))
            .or_insert(sample.elapsed);
    }

    pub fn minimum(&self, selector: u8, size: usize) -> Option<f64> {
        self.minima.get(&(selector, size)).copied()
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Minima in size order; `NaN` where a size has no successful sample.
    pub fn series(&self, selector: u8) -> Vec<f64> {
        self.sizes
            .iter()
            .map(|&size| self.minimum(selector, size).unwrap_or(f64::NAN))
            .collect()
    }
}

/// The program's first output line is its own elapsed time.
pub fn parse_timing(line: &str) -> Result<f64, HarnessError> {
    let trimmed = line.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| HarnessError::MalformedOutput(format!("'{trimmed}' is not a timing")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(HarnessError::MalformedOutput(format!(
            "timing {value} is out of range"
        )));
    }
    Ok(value)
}

/// Rewrite every variant's results file from scratch, one value per line.
pub fn flush(table: &TimingTable, variants: &[Variant], dir: &Path) -> Result<(), HarnessError> {
    for variant in variants {
        let path = dir.join(variant.results_file_name());
        let mut text = String::new();
        for value in table.series(variant.selector) {
            text.push_str(&value.to_string());
            text.push('\n');
        }
        fs::write(&path, text).map_err(|source| HarnessError::Io {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

pub fn load_results(path: &Path) -> Result<Vec<f64>, HarnessError> {
    let text = fs::read_to_string(path).map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<f64>().map_err(|_| {
                HarnessError::MalformedOutput(format!(
                    "{}: '{}' is not a number",
                    path.display(),
                    line
                ))
            })
        })
        .collect()
}

/// CSV with one row per size and one column per variant.
pub fn write_summary_csv(
    table: &TimingTable,
    variants: &[Variant],
    path: &Path,
) -> Result<(), HarnessError> {
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["size".to_string()];
    header.extend(variants.iter().map(|v| v.slug.clone()));
    writer.write_record(&header)?;
    for &size in table.sizes() {
        let mut row = vec![size.to_string()];
        for variant in variants {
            row.push(
                table
                    .minimum(variant.selector, size)
                    .map(|v| format!("{v}"))
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }
    writer.flush().map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Walk the size range. Each trial draws one fresh input and runs it through
/// every variant; the table is flushed to `results_dir` after each size so an
/// interrupted sweep keeps everything up to the last finished size.
pub fn run_sweep<R: Runner + ?Sized>(
    runner: &mut R,
    config: &SweepConfig,
    table: &mut TimingTable,
) -> Result<(), HarnessError> {
    if config.variants.is_empty() {
        return Err(HarnessError::InvalidParameter("no variants configured".into()));
    }
    if config.repeat == 0 {
        return Err(HarnessError::InvalidParameter("repeat must be > 0".into()));
    }
    let sizes = config.sizes()?;
    let mut generator =
        AltitudeGenerator::new(config.min_altitude, config.max_altitude, config.seed)?;
    fs::create_dir_all(&config.results_dir).map_err(|source| HarnessError::Io {
        path: config.results_dir.clone(),
        source,
    })?;

    for size in sizes {
        info!("measuring n = {}", size);
        table.begin_size(size);
        for _ in 0..config.repeat {
            let altitudes = generator.random(size);
            for variant in &config.variants {
                let timing = runner
                    .run(&altitudes, Knob::Variant(variant.selector))
                    .and_then(|line| parse_timing(&line));
                match timing {
                    Ok(elapsed) => {
                        debug!("variant {} n={} took {}", variant.selector, size, elapsed);
                        table.record(Sample {
                            selector: variant.selector,
                            size,
                            elapsed,
                        });
                    }
                    Err(err) => warn!("variant {} n={} failed: {}", variant.selector, size, err),
                }
            }
        }
        flush(table, &config.variants, &config.results_dir)?;
    }
    Ok(())
}
