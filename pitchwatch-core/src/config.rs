//! # Engine Configuration
//!
//! Policy constants for capture, pitch estimation and note mapping. Every
//! field has a default, so a partial JSON file only overrides what it names.
//!
//! ## Defaults
//! - Capture: 44.1 kHz mono, 4096-sample blocks (~93 ms)
//! - Search range: 50 Hz to 2000 Hz, confidence threshold 0.5
//! - Mapping range: 20 Hz to 4186 Hz (C0 to C8), A4 = 440 Hz
//! - Change threshold: 1 Hz

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// How lag correlations are computed for each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStrategy {
    /// One multiply-accumulate pass per lag.
    #[default]
    Direct,
    /// All lags at once through a zero-padded FFT.
    Fft,
}

/// Settings for the autocorrelation pitch estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Lowest fundamental searched for, in Hz. Sets the largest lag.
    pub min_frequency_hz: f32,
    /// Highest fundamental searched for, in Hz. Sets the smallest lag.
    pub max_frequency_hz: f32,
    /// Best normalized correlation must exceed this to report a pitch.
    pub confidence_threshold: f32,
    /// Slack below the best correlation within which an earlier peak wins.
    ///
    /// Larger values avoid subharmonic picks on clean tones but report the
    /// octave above when the second harmonic dominates the fundamental
    /// (about 20 dB stronger at the default). `0.0` keeps the strongest
    /// peak apart from a small allowance for lag quantization.
    pub peak_tolerance: f32,
    /// Refine the chosen lag with parabolic interpolation.
    pub interpolate: bool,
    pub strategy: CorrelationStrategy,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_frequency_hz: 50.0,
            max_frequency_hz: 2000.0,
            confidence_threshold: 0.5,
            peak_tolerance: 0.03,
            interpolate: true,
            strategy: CorrelationStrategy::Direct,
        }
    }
}

/// Settings for frequency to note mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Frequencies below this are reported as out of range (C0 by default).
    pub min_frequency_hz: f32,
    /// Frequencies above this are reported as out of range (C8 by default).
    pub max_frequency_hz: f32,
    /// Concert pitch used to derive C0.
    pub reference_a4_hz: f32,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            min_frequency_hz: 20.0,
            max_frequency_hz: 4186.0,
            reference_a4_hz: 440.0,
        }
    }
}

/// Top-level configuration for a [`DetectionEngine`](crate::engine::DetectionEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    /// A new estimate is published only if it moved by more than this many Hz.
    pub change_threshold_hz: f32,
    pub estimator: EstimatorConfig,
    pub mapping: MappingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 4096,
            change_threshold_hz: 1.0,
            estimator: EstimatorConfig::default(),
            mapping: MappingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Checks every field for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::invalid_config("sample_rate", "must be positive"));
        }
        if self.block_size < 2 {
            return Err(Error::invalid_config("block_size", "must be at least 2"));
        }
        if !self.change_threshold_hz.is_finite() || self.change_threshold_hz < 0.0 {
            return Err(Error::invalid_config(
                "change_threshold_hz",
                "must be a non-negative number",
            ));
        }

        let est = &self.estimator;
        check_range(
            "estimator.min_frequency_hz",
            "estimator.max_frequency_hz",
            est.min_frequency_hz,
            est.max_frequency_hz,
        )?;
        check_unit("estimator.confidence_threshold", est.confidence_threshold)?;
        check_unit("estimator.peak_tolerance", est.peak_tolerance)?;

        let map = &self.mapping;
        check_range(
            "mapping.min_frequency_hz",
            "mapping.max_frequency_hz",
            map.min_frequency_hz,
            map.max_frequency_hz,
        )?;
        if !map.reference_a4_hz.is_finite() || map.reference_a4_hz <= 0.0 {
            return Err(Error::invalid_config(
                "mapping.reference_a4_hz",
                "must be a positive number",
            ));
        }
        Ok(())
    }

    /// Loads a configuration from a JSON file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: EngineConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path.as_ref())?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }
}

fn check_range(min_key: &str, max_key: &str, min: f32, max: f32) -> Result<()> {
    if !min.is_finite() || min <= 0.0 {
        return Err(Error::invalid_config(min_key, "must be a positive number"));
    }
    if !max.is_finite() || max <= min {
        return Err(Error::invalid_config(
            max_key,
            format!("must be greater than {min_key}"),
        ));
    }
    Ok(())
}

fn check_unit(key: &str, value: f32) -> Result<()> {
    if !(0.0..1.0).contains(&value) {
        return Err(Error::invalid_config(key, "must be in [0, 1)"));
    }
    Ok(())
}
