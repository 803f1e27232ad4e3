//! # Fast Fourier Transform (FFT) Module
//!
//! Computes the lag products `Σ x[i]·x[i+L]` for every lag of a block at
//! once, using the Wiener-Khinchin relation: the inverse transform of the
//! power spectrum of a zero-padded signal is its linear autocorrelation.
//!
//! ## Features
//! - High-performance FFT using RustFFT, in `f64` to keep lag sums exact
//!   enough to agree with the direct computation
//! - Zero padding to a power of two of at least twice the block length,
//!   so no circular wrap-around leaks into the sums
//! - Plans and buffers reused while the block length stays the same
//! - Prefix energy sums for the per-lag normalization

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Reusable autocorrelation workspace for one block length.
pub struct FftCorrelator {
    len: usize,
    forward: Option<Arc<dyn Fft<f64>>>,
    inverse: Option<Arc<dyn Fft<f64>>>,
    buffer: Vec<Complex<f64>>,
    products: Vec<f64>,
    energy_prefix: Vec<f64>,
}

impl FftCorrelator {
    pub fn new() -> Self {
        Self {
            len: 0,
            forward: None,
            inverse: None,
            buffer: Vec::new(),
            products: Vec::new(),
            energy_prefix: Vec::new(),
        }
    }

    /// Computes lag products and prefix energies for `signal`.
    ///
    /// Afterwards [`lag_product`](Self::lag_product) and
    /// [`head_energy`](Self::head_energy) answer for any lag below
    /// `signal.len()`.
    pub fn compute(&mut self, signal: &[f32]) {
        let n = signal.len();
        let padded = (2 * n).next_power_of_two();
        if padded != self.len || self.forward.is_none() {
            let mut planner = FftPlanner::new();
            self.forward = Some(planner.plan_fft_forward(padded));
            self.inverse = Some(planner.plan_fft_inverse(padded));
            self.len = padded;
        }
        let (Some(forward), Some(inverse)) = (&self.forward, &self.inverse) else {
            return;
        };

        self.buffer.clear();
        self.buffer
            .extend(signal.iter().map(|&s| Complex { re: s as f64, im: 0.0 }));
        self.buffer.resize(padded, Complex { re: 0.0, im: 0.0 });

        forward.process(&mut self.buffer);
        for bin in self.buffer.iter_mut() {
            // |X|² is the spectrum of the autocorrelation.
            *bin = Complex { re: bin.norm_sqr(), im: 0.0 };
        }
        inverse.process(&mut self.buffer);

        // RustFFT leaves the inverse unnormalized.
        let scale = 1.0 / padded as f64;
        self.products.clear();
        self.products
            .extend(self.buffer.iter().take(n).map(|c| c.re * scale));

        self.energy_prefix.clear();
        self.energy_prefix.push(0.0);
        let mut running = 0.0;
        for &s in signal {
            running += s as f64 * s as f64;
            self.energy_prefix.push(running);
        }
    }

    /// `Σ x[i]·x[i+lag]` over the overlapping part of the last block.
    pub fn lag_product(&self, lag: usize) -> f64 {
        self.products.get(lag).copied().unwrap_or(0.0)
    }

    /// `Σ x[i]²` over the first `N - lag` samples of the last block.
    pub fn head_energy(&self, lag: usize) -> f64 {
        let n = self.energy_prefix.len().saturating_sub(1);
        n.checked_sub(lag)
            .map(|head| self.energy_prefix[head])
            .unwrap_or(0.0)
    }
}

impl Default for FftCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
