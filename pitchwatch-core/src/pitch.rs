//! # Pitch Estimation Module
//!
//! Normalized autocorrelation pitch detection for monophonic input.
//!
//! For every candidate lag `L` between `sample_rate / max_frequency` and
//! `sample_rate / min_frequency` the block is correlated with itself shifted
//! by `L`, normalized by the energy of the overlapping head of the block:
//!
//! ```text
//! c[L] = Σ x[i]·x[i+L] / Σ x[i]²      for i in 0..N-L
//! ```
//!
//! ## Features
//! - Confidence gate on the best correlation to reject silence and noise
//! - Earliest-peak selection to avoid locking onto period multiples
//! - Parabolic interpolation for sub-sample lag accuracy
//! - Direct or FFT-backed correlation (see [`CorrelationStrategy`])

use crate::config::{CorrelationStrategy, EstimatorConfig};
use crate::fft::FftCorrelator;
use std::f64::consts::PI;

/// Normalized correlations for a contiguous run of lags.
///
/// `None` marks lags whose overlapping head has no energy.
#[derive(Debug, Default)]
struct Correlogram {
    first_lag: usize,
    values: Vec<Option<f64>>,
}

impl Correlogram {
    fn get(&self, lag: usize) -> Option<f64> {
        lag.checked_sub(self.first_lag)
            .and_then(|k| self.values.get(k).copied().flatten())
    }
}

/// Estimates the fundamental frequency of one block of samples.
///
/// Holds scratch buffers and FFT plans between calls, so keep one per
/// capture loop rather than creating it per block.
pub struct PitchEstimator {
    config: EstimatorConfig,
    correlogram: Correlogram,
    fft: Option<FftCorrelator>,
}

impl PitchEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            correlogram: Correlogram::default(),
            fft: None,
        }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Search bounds `(min_lag, max_lag)` in samples for a sample rate.
    ///
    /// `min_lag` is at least 1, so a zero lag is never considered.
    pub fn lag_bounds(&self, sample_rate: u32) -> (usize, usize) {
        let sr = sample_rate as f64;
        let min_lag = (sr / self.config.max_frequency_hz as f64).round() as usize;
        let max_lag = (sr / self.config.min_frequency_hz as f64).round() as usize;
        (min_lag.max(1), max_lag)
    }

    /// Estimates the fundamental frequency of `signal` in Hz.
    ///
    /// # Returns
    /// * `Some(frequency)` - the best correlation exceeded the confidence threshold
    /// * `None` - fewer than 2 samples, silence, or no periodic structure
    pub fn estimate(&mut self, signal: &[f32], sample_rate: u32) -> Option<f32> {
        let n = signal.len();
        if n < 2 || sample_rate == 0 {
            return None;
        }

        let (min_lag, max_lag) = self.lag_bounds(sample_rate);
        let max_lag = max_lag.min(n - 1);
        if min_lag > max_lag {
            return None;
        }

        // One guard lag on each side for peak tests and interpolation.
        let first_lag = min_lag.saturating_sub(1).max(1);
        let last_lag = (max_lag + 1).min(n - 1);
        self.fill_correlogram(signal, first_lag, last_lag);

        let mut best_corr = 0.0;
        let mut best_lag = 0;
        for lag in min_lag..=max_lag {
            if let Some(corr) = self.correlogram.get(lag) {
                if corr > best_corr {
                    best_corr = corr;
                    best_lag = lag;
                }
            }
        }

        if best_lag == 0 || best_corr <= self.config.confidence_threshold as f64 {
            return None;
        }

        let lag = self.earliest_peak(min_lag, max_lag, best_corr).unwrap_or(best_lag);
        let period = if self.config.interpolate {
            self.interpolate(lag)
        } else {
            lag as f64
        };

        Some((sample_rate as f64 / period) as f32)
    }

    fn fill_correlogram(&mut self, signal: &[f32], first_lag: usize, last_lag: usize) {
        let values = &mut self.correlogram.values;
        values.clear();
        self.correlogram.first_lag = first_lag;

        match self.config.strategy {
            CorrelationStrategy::Direct => {
                for lag in first_lag..=last_lag {
                    let head = &signal[..signal.len() - lag];
                    let (sum, norm) = head.iter().zip(&signal[lag..]).fold(
                        (0.0_f64, 0.0_f64),
                        |(sum, norm), (&a, &b)| {
                            let a = a as f64;
                            (sum + a * b as f64, norm + a * a)
                        },
                    );
                    values.push((norm > 0.0).then(|| sum / norm));
                }
            }
            CorrelationStrategy::Fft => {
                let fft = self.fft.get_or_insert_with(FftCorrelator::new);
                fft.compute(signal);
                for lag in first_lag..=last_lag {
                    let norm = fft.head_energy(lag);
                    values.push((norm > 0.0).then(|| fft.lag_product(lag) / norm));
                }
            }
        }
    }

    /// Smallest local maximum whose correlation is close enough to the best.
    ///
    /// The allowed slack grows for short lags, where rounding the true period
    /// to a whole number of samples costs up to `1 - cos(π / L)`.
    fn earliest_peak(&self, min_lag: usize, max_lag: usize, best_corr: f64) -> Option<usize> {
        let tolerance = self.config.peak_tolerance as f64;
        (min_lag..=max_lag).find(|&lag| {
            let Some(corr) = self.correlogram.get(lag) else {
                return false;
            };
            let slack = tolerance + (1.0 - (PI / lag as f64).cos());
            if corr < best_corr - slack {
                return false;
            }
            let left = self.correlogram.get(lag - 1).is_none_or(|left| corr >= left);
            let right = self.correlogram.get(lag + 1).is_none_or(|right| corr >= right);
            left && right
        })
    }

    /// Parabolic interpolation around `lag` for a fractional period.
    fn interpolate(&self, lag: usize) -> f64 {
        let neighbours = (
            self.correlogram.get(lag - 1),
            self.correlogram.get(lag),
            self.correlogram.get(lag + 1),
        );
        if let (Some(y1), Some(y2), Some(y3)) = neighbours {
            let curvature = y1 - 2.0 * y2 + y3;
            if curvature < 0.0 {
                let shift = 0.5 * (y1 - y3) / curvature;
                if shift.abs() < 1.0 {
                    return lag as f64 + shift;
                }
            }
        }
        lag as f64
    }
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

/// One-shot estimate with the default 50-2000 Hz search.
pub fn detect_pitch(signal: &[f32], sample_rate: u32) -> Option<f32> {
    PitchEstimator::default().estimate(signal, sample_rate)
}
