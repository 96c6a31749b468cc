use ndarray::Array2;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::sync::Arc;

use crate::rms::rms_envelope;

/// Threshold at or below which the dB gate is disabled entirely.
pub const GATE_DISABLED_DB: f32 = -60.0;

const AMP_FLOOR: f32 = 1e-5;

/// Zeroes every hop-sized sub-frame whose centered RMS falls below
/// `threshold_db` (dB re 1.0 full scale). Suppresses inference artifacts on
/// silence; a threshold at or below -60 dB leaves the signal untouched.
pub fn db_gate(samples: &mut [f32], hop: usize, frame_length: usize, threshold_db: f32) {
    if threshold_db <= GATE_DISABLED_DB || hop == 0 || samples.is_empty() {
        return;
    }
    let env = rms_envelope(samples, frame_length, hop);
    let sub_frames = samples.len() / hop;
    for i in 0..sub_frames.min(env.len()) {
        let db = 20.0 * env[i].max(AMP_FLOOR).log10();
        if db < threshold_db {
            samples[i * hop..(i + 1) * hop].fill(0.0);
        }
    }
}

/// STFT-based spectral noise suppression.
///
/// Estimates a per-bin noise floor from a longer reference window and
/// attenuates target bins that fall under it by `prop_decrease`. This is the
/// optional input/output noise-reduction collaborator of the pipeline.
pub struct SpectralGate {
    n_fft: usize,
    hop: usize,
    prop_decrease: f32,
    n_std: f32,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl SpectralGate {
    pub fn new(n_fft: usize, prop_decrease: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            n_fft,
            hop: n_fft / 4,
            prop_decrease: prop_decrease.clamp(0.0, 1.0),
            n_std: 1.5,
            window: hann_window_periodic(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    /// Suppresses noise in `signal` using `reference` (usually a longer
    /// window containing `signal` at its tail) for the floor estimate.
    /// Returns a buffer of `signal.len()` samples.
    pub fn process(&self, signal: &[f32], reference: &[f32]) -> Vec<f32> {
        if signal.len() < self.n_fft || reference.len() < self.n_fft {
            return signal.to_vec();
        }

        let ref_spec = self.stft(reference);
        let floor_db = self.noise_floor_db(&ref_spec);

        let mut spec = self.stft(signal);
        let bins = spec.shape()[0];
        let frames = spec.shape()[1];
        let keep_gain = 1.0 - self.prop_decrease;
        for frame in 0..frames {
            for bin in 0..bins {
                let mag_db = 20.0 * (spec[(bin, frame)].norm() + 1e-10).log10();
                if mag_db < floor_db[bin] {
                    spec[(bin, frame)] *= keep_gain;
                }
            }
        }

        self.istft(&spec, signal.len())
    }

    fn stft(&self, signal: &[f32]) -> Array2<Complex32> {
        let frames = 1 + (signal.len() - self.n_fft) / self.hop;
        let mut spec = Array2::from_elem((self.n_fft, frames), Complex32::new(0.0, 0.0));
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.n_fft];
        for frame in 0..frames {
            let offset = frame * self.hop;
            for i in 0..self.n_fft {
                buffer[i] = Complex32::new(signal[offset + i] * self.window[i], 0.0);
            }
            self.forward.process(&mut buffer);
            for (bin, &v) in buffer.iter().enumerate() {
                spec[(bin, frame)] = v;
            }
        }
        spec
    }

    fn istft(&self, spec: &Array2<Complex32>, out_len: usize) -> Vec<f32> {
        let frames = spec.shape()[1];
        let total = (frames - 1) * self.hop + self.n_fft;
        let mut out = vec![0.0_f32; total];
        let mut norm = vec![0.0_f32; total];
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.n_fft];
        let scale = 1.0 / self.n_fft as f32;
        for frame in 0..frames {
            for bin in 0..self.n_fft {
                buffer[bin] = spec[(bin, frame)];
            }
            self.inverse.process(&mut buffer);
            let offset = frame * self.hop;
            for i in 0..self.n_fft {
                out[offset + i] += buffer[i].re * scale * self.window[i];
                norm[offset + i] += self.window[i] * self.window[i];
            }
        }
        for (v, &n) in out.iter_mut().zip(&norm) {
            if n > 1e-8 {
                *v /= n;
            }
        }
        out.truncate(out_len);
        out
    }

    /// Per-bin floor: mean + n_std * std of the reference magnitudes in dB.
    fn noise_floor_db(&self, spec: &Array2<Complex32>) -> Vec<f32> {
        let bins = spec.shape()[0];
        let frames = spec.shape()[1].max(1);
        let mut floor = Vec::with_capacity(bins);
        for bin in 0..bins {
            let mut mean = 0.0_f32;
            for frame in 0..frames {
                mean += 20.0 * (spec[(bin, frame)].norm() + 1e-10).log10();
            }
            mean /= frames as f32;
            let mut var = 0.0_f32;
            for frame in 0..frames {
                let db = 20.0 * (spec[(bin, frame)].norm() + 1e-10).log10();
                var += (db - mean) * (db - mean);
            }
            let std = (var / frames as f32).sqrt();
            floor.push(mean + self.n_std * std);
        }
        floor
    }
}

fn hann_window_periodic(size: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(size);
    let denom = size.max(1) as f32;
    for i in 0..size {
        let phase = 2.0 * std::f32::consts::PI * i as f32 / denom;
        out.push(0.5 - 0.5 * phase.cos());
    }
    out
}
