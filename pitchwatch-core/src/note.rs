//! # Note Mapping Module
//!
//! Converts frequency estimates into note labels in twelve-tone equal
//! temperament. The mapping is a pure function of the estimate and the
//! [`MappingConfig`]; nothing is remembered between calls.
//!
//! ## Features
//! - Nearest note name and octave relative to C0 (A4 = 440 Hz by default)
//! - Cent deviation from the nearest equal-tempered note
//! - Sentinel labels for silence, out-of-range input and capture failures

use crate::config::MappingConfig;
use std::fmt;

/// Chromatic note names starting at C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A frequency resolved to its nearest note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteReading {
    /// Note name without octave (e.g. "A", "C#").
    pub name: &'static str,
    /// Scientific pitch octave; C4 is middle C.
    pub octave: i32,
    /// The estimate this reading was made from, in Hz.
    pub frequency_hz: f32,
    /// Deviation from the nearest note (positive = sharp, negative = flat).
    pub cents: f32,
}

impl NoteReading {
    pub fn rounded_hz(&self) -> i64 {
        self.frequency_hz.round() as i64
    }
}

/// The value published to the display.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteLabel {
    /// Nothing has been accepted since the engine was created.
    AwaitingInput,
    /// The last accepted block had no periodic signal.
    Unvoiced,
    /// The estimate fell outside the mappable range.
    OutOfRange,
    Note(NoteReading),
    /// The capture device refused access to the microphone.
    PermissionRequired,
    /// The capture device could not be started.
    CaptureFailed(String),
}

impl NoteLabel {
    pub fn reading(&self) -> Option<&NoteReading> {
        match self {
            NoteLabel::Note(reading) => Some(reading),
            _ => None,
        }
    }

    /// Whether the label reports a failed start rather than a reading.
    pub fn is_failure(&self) -> bool {
        matches!(self, NoteLabel::PermissionRequired | NoteLabel::CaptureFailed(_))
    }
}

impl fmt::Display for NoteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteLabel::AwaitingInput => f.write_str("awaiting input"),
            NoteLabel::Unvoiced => f.write_str("no voiced signal"),
            NoteLabel::OutOfRange => f.write_str("out of range"),
            NoteLabel::Note(reading) => write!(
                f,
                "{}{} ({}Hz)",
                reading.name,
                reading.octave,
                reading.rounded_hz()
            ),
            NoteLabel::PermissionRequired => f.write_str("microphone permission required"),
            NoteLabel::CaptureFailed(message) => write!(f, "capture error: {message}"),
        }
    }
}

/// Maps frequency estimates to [`NoteLabel`]s.
#[derive(Debug, Clone)]
pub struct NoteMapper {
    min_hz: f32,
    max_hz: f32,
    c0_hz: f64,
}

impl NoteMapper {
    pub fn new(config: &MappingConfig) -> Self {
        // C0 sits 4 octaves and 9 semitones below A4.
        let c0_hz = config.reference_a4_hz as f64 * 2.0_f64.powf(-4.75);
        Self {
            min_hz: config.min_frequency_hz,
            max_hz: config.max_frequency_hz,
            c0_hz,
        }
    }

    /// Maps a frequency estimate to a label.
    ///
    /// # Rules (applied in order)
    /// * `None`, zero, negative or NaN → [`NoteLabel::Unvoiced`]
    /// * outside `[min_frequency_hz, max_frequency_hz]` → [`NoteLabel::OutOfRange`]
    /// * otherwise the nearest note, e.g. `"A4 (440Hz)"`
    pub fn map(&self, estimate: Option<f32>) -> NoteLabel {
        let frequency = match estimate {
            Some(f) if f > 0.0 => f,
            _ => return NoteLabel::Unvoiced,
        };
        if frequency < self.min_hz || frequency > self.max_hz {
            return NoteLabel::OutOfRange;
        }

        let steps = (12.0 * (frequency as f64 / self.c0_hz).log2()).round() as i64;
        let octave = steps.div_euclid(12) as i32;
        let note_index = steps.rem_euclid(12) as usize;

        let nearest_hz = self.c0_hz * 2.0_f64.powf(steps as f64 / 12.0);

        NoteLabel::Note(NoteReading {
            name: NOTE_NAMES[note_index],
            octave,
            frequency_hz: frequency,
            cents: calculate_cents_deviation(frequency, nearest_hz as f32),
        })
    }
}

impl Default for NoteMapper {
    fn default() -> Self {
        Self::new(&MappingConfig::default())
    }
}

/// Maps a frequency with the default range and A4 = 440 Hz.
pub fn frequency_to_note(estimate: Option<f32>) -> NoteLabel {
    NoteMapper::default().map(estimate)
}

/// Calculates the deviation from a target frequency in cents.
///
/// 100 cents make a semitone and 1200 an octave.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}
