//! Butterworth bandpass design and stateful per-channel filtering.
//!
//! The design path follows the classic chain: analog lowpass prototype poles,
//! lowpass-to-bandpass transform, bilinear mapping with corner prewarp, then
//! pairing into second-order sections. Filtering runs the sections in
//! direct-form-II-transposed with an externally owned delay line, so one
//! immutable design is shared by every channel while each channel keeps its
//! own state across packet boundaries.

use num_complex::Complex64;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DesignError {
    #[error("bandpass corners must satisfy 0 < low < high < nyquist (got {low}..{high} at {rate} Hz)")]
    BadCorners { low: f64, high: f64, rate: f64 },

    #[error("bandpass order must be a positive multiple of 2 (got {0})")]
    BadOrder(usize),
}

/// One second-order section, coefficients normalised to a0 = 1.
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

/// Immutable filter design shared across channels.
#[derive(Debug, Clone)]
pub struct BandpassDesign {
    sections: Vec<Biquad>,
}

/// Per-channel delay line, one `[s1, s2]` register pair per section.
#[derive(Debug, Clone)]
pub struct FilterState {
    regs: Vec<[f64; 2]>,
}

impl FilterState {
    /// Zero the delay line (applied on detected discontinuities).
    pub fn reset(&mut self) {
        for reg in &mut self.regs {
            *reg = [0.0, 0.0];
        }
    }
}

impl BandpassDesign {
    /// Design an `order`-pole Butterworth bandpass for `rate` Hz sampling.
    ///
    /// `order` is the overall filter order; the analog lowpass prototype has
    /// `order / 2` poles and the result cascades `order / 2` biquads.
    pub fn new(low_hz: f64, high_hz: f64, rate: f64, order: usize) -> Result<Self, DesignError> {
        if order == 0 || order % 2 != 0 {
            return Err(DesignError::BadOrder(order));
        }
        let nyquist = rate / 2.0;
        if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
            return Err(DesignError::BadCorners {
                low: low_hz,
                high: high_hz,
                rate,
            });
        }

        let m = order / 2;
        let fs2 = 2.0 * rate;

        // Prewarped analog corners (rad/s) and derived band parameters.
        let w1 = fs2 * (std::f64::consts::PI * low_hz / rate).tan();
        let w2 = fs2 * (std::f64::consts::PI * high_hz / rate).tan();
        let bw = w2 - w1;
        let w0 = (w1 * w2).sqrt();

        // Analog Butterworth lowpass prototype poles (unit circle, LHP),
        // transformed to the bandpass plane: each prototype pole p yields the
        // two roots of s^2 - p*bw*s + w0^2 = 0.
        let mut analog_poles = Vec::with_capacity(order);
        for k in 0..m {
            let theta = std::f64::consts::PI * (2 * k + m + 1) as f64 / (2 * m) as f64;
            let p = Complex64::from_polar(1.0, theta);
            let half = p * bw / 2.0;
            let disc = (half * half - Complex64::new(w0 * w0, 0.0)).sqrt();
            analog_poles.push(half + disc);
            analog_poles.push(half - disc);
        }

        // Bilinear transform to the z-plane.
        let digital_poles: Vec<Complex64> = analog_poles
            .iter()
            .map(|s| (Complex64::new(fs2, 0.0) + s) / (Complex64::new(fs2, 0.0) - s))
            .collect();

        // Pair poles into sections: each upper-half-plane pole pairs with its
        // conjugate; residual real poles pair among themselves.
        let mut denominators: Vec<(f64, f64)> = Vec::with_capacity(m);
        let mut real_poles: Vec<f64> = Vec::new();
        for z in &digital_poles {
            if z.im > 1e-12 {
                denominators.push((-2.0 * z.re, z.norm_sqr()));
            } else if z.im.abs() <= 1e-12 {
                real_poles.push(z.re);
            }
        }
        real_poles.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for pair in real_poles.chunks(2) {
            if let [r1, r2] = pair {
                denominators.push((-(r1 + r2), r1 * r2));
            }
        }

        // The bandpass numerator carries m zeros at z = 1 and m at z = -1:
        // one (z^2 - 1) pair per section.
        let mut sections: Vec<Biquad> = denominators
            .into_iter()
            .map(|(a1, a2)| Biquad {
                b0: 1.0,
                b1: 0.0,
                b2: -1.0,
                a1,
                a2,
            })
            .collect();

        // Normalise to unit gain at the band centre.
        let wc = 2.0 * (w0 / fs2).atan();
        let z0 = Complex64::from_polar(1.0, wc);
        let mut h = Complex64::new(1.0, 0.0);
        for s in &sections {
            let num = z0 * z0 * s.b0 + z0 * s.b1 + Complex64::new(s.b2, 0.0);
            let den = z0 * z0 + z0 * s.a1 + Complex64::new(s.a2, 0.0);
            h *= num / den;
        }
        let gain = 1.0 / h.norm();
        sections[0].b0 *= gain;
        sections[0].b1 *= gain;
        sections[0].b2 *= gain;

        Ok(Self { sections })
    }

    /// Fresh zeroed delay line for one channel.
    pub fn state(&self) -> FilterState {
        FilterState {
            regs: vec![[0.0, 0.0]; self.sections.len()],
        }
    }

    /// Filter `samples` in place, advancing `state` across the packet.
    pub fn process(&self, state: &mut FilterState, samples: &mut [f64]) {
        for x in samples.iter_mut() {
            let mut v = *x;
            for (section, reg) in self.sections.iter().zip(state.regs.iter_mut()) {
                let y = section.b0 * v + reg[0];
                reg[0] = section.b1 * v - section.a1 * y + reg[1];
                reg[1] = section.b2 * v - section.a2 * y;
                v = y;
            }
            *x = v;
        }
    }
}
