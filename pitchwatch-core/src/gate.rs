//! Change-threshold gating between consecutive estimates.

/// Suppresses estimates that moved by no more than `threshold_hz` since the
/// last accepted one. An unvoiced block counts as 0 Hz.
#[derive(Debug, Clone)]
pub struct ChangeGate {
    threshold_hz: f32,
    last_accepted_hz: f32,
}

impl ChangeGate {
    pub fn new(threshold_hz: f32) -> Self {
        Self::resume(threshold_hz, 0.0)
    }

    /// A gate that continues from a previously accepted frequency.
    pub fn resume(threshold_hz: f32, last_accepted_hz: f32) -> Self {
        Self {
            threshold_hz,
            last_accepted_hz,
        }
    }

    pub fn last_accepted_hz(&self) -> f32 {
        self.last_accepted_hz
    }

    /// Returns `true` and remembers `frequency_hz` if it differs from the
    /// last accepted value by more than the threshold.
    pub fn admit(&mut self, frequency_hz: f32) -> bool {
        if (frequency_hz - self.last_accepted_hz).abs() > self.threshold_hz {
            self.last_accepted_hz = frequency_hz;
            true
        } else {
            false
        }
    }
}
