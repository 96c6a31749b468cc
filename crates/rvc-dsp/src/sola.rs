use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use rvc_core::{Result, RvcError};
use std::f32::consts::PI;
use std::sync::Arc;

/// Complementary fade pair used at every seam: `fade_in[i] = sin(0.5π·t)²`,
/// `fade_out = 1 - fade_in`, so a constant signal crossfades to itself.
#[derive(Debug, Clone)]
pub struct FadeWindows {
    pub fade_in: Vec<f32>,
    pub fade_out: Vec<f32>,
}

impl FadeWindows {
    pub fn new(len: usize) -> Self {
        let mut fade_in = Vec::with_capacity(len);
        for i in 0..len {
            let t = if len > 1 {
                i as f32 / (len - 1) as f32
            } else {
                0.0
            };
            let s = (0.5 * PI * t).sin();
            fade_in.push(s * s);
        }
        let fade_out = fade_in.iter().map(|v| 1.0 - v).collect();
        Self { fade_in, fade_out }
    }

    pub fn len(&self) -> usize {
        self.fade_in.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fade_in.is_empty()
    }
}

/// Finds the offset in `[0, search]` where `segment` best continues `tail`,
/// by normalized cross-correlation. The correlation is divided by the local
/// energy of each candidate window so high-energy offsets are not favored.
pub fn find_offset(tail: &[f32], segment: &[f32], search: usize) -> usize {
    let n = tail.len();
    if n == 0 || segment.len() < n {
        return 0;
    }
    let tail_energy: f32 = tail.iter().map(|v| v * v).sum();
    if tail_energy <= 1e-12 {
        return 0;
    }

    let mut best_offset = 0usize;
    let mut best_score = f32::MIN;
    for offset in 0..=search {
        if offset + n > segment.len() {
            break;
        }
        let cand = &segment[offset..offset + n];
        let mut dot = 0.0_f32;
        let mut energy = 0.0_f32;
        for i in 0..n {
            dot += tail[i] * cand[i];
            energy += cand[i] * cand[i];
        }
        let score = dot / (energy + 1e-8).sqrt();
        if score > best_score {
            best_score = score;
            best_offset = offset;
        }
    }
    best_offset
}

/// Blends the previous tail against the aligned head of the new segment.
pub trait Blend: Send {
    fn blend(&self, tail: &[f32], head: &[f32], fades: &FadeWindows) -> Vec<f32>;
}

/// Fixed monotonic fade pair, the default seam blend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossfadeBlend;

impl Blend for CrossfadeBlend {
    fn blend(&self, tail: &[f32], head: &[f32], fades: &FadeWindows) -> Vec<f32> {
        tail.iter()
            .zip(head)
            .zip(fades.fade_out.iter().zip(&fades.fade_in))
            .map(|((&a, &b), (&out, &inn))| a * out + b * inn)
            .collect()
    }
}

/// Frequency-domain blend matching magnitude and phase of the two windows,
/// avoiding the phase cancellation a plain crossfade can produce.
pub struct PhaseVocoderBlend {
    fft: Arc<dyn Fft<f32>>,
    len: usize,
}

impl PhaseVocoderBlend {
    pub fn new(len: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(len),
            len,
        }
    }

    fn spectrum(&self, signal: &[f32], window: &[f32]) -> Vec<Complex32> {
        let mut buf: Vec<Complex32> = signal
            .iter()
            .zip(window)
            .map(|(&v, &w)| Complex32::new(v * w, 0.0))
            .collect();
        self.fft.process(&mut buf);
        buf.truncate(self.len / 2 + 1);
        buf
    }
}

impl Blend for PhaseVocoderBlend {
    fn blend(&self, tail: &[f32], head: &[f32], fades: &FadeWindows) -> Vec<f32> {
        let n = self.len;
        debug_assert_eq!(tail.len(), n);
        debug_assert_eq!(head.len(), n);

        let window: Vec<f32> = fades
            .fade_out
            .iter()
            .zip(&fades.fade_in)
            .map(|(&o, &i)| (o * i).sqrt())
            .collect();
        let fa = self.spectrum(tail, &window);
        let fb = self.spectrum(head, &window);
        let bins = n / 2 + 1;

        let mut absab: Vec<f32> = fa
            .iter()
            .zip(&fb)
            .map(|(a, b)| a.norm() + b.norm())
            .collect();
        // Double interior bins so the cosine sum matches a real inverse FFT.
        let interior = if n % 2 == 0 { 1..bins - 1 } else { 1..bins };
        for k in interior {
            absab[k] *= 2.0;
        }

        let phia: Vec<f32> = fa.iter().map(|c| c.arg()).collect();
        let mut w = Vec::with_capacity(bins);
        for k in 0..bins {
            let mut delta = fb[k].arg() - phia[k];
            delta -= 2.0 * PI * (delta / (2.0 * PI) + 0.5).floor();
            w.push(2.0 * PI * k as f32 + delta);
        }

        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let t = i as f32 / n as f32;
            let mut sum = 0.0_f32;
            for k in 0..bins {
                sum += absab[k] * (w[k] * t + phia[k]).cos();
            }
            let fo = fades.fade_out[i];
            let fi = fades.fade_in[i];
            out.push(tail[i] * fo * fo + head[i] * fi * fi + sum * window[i] / n as f32);
        }
        out
    }
}

/// Stitches converted segments into a continuous stream.
///
/// Keeps the trailing `sola_buffer` samples of each finished block and aligns
/// the next segment against them before blending, so block boundaries carry
/// no audible seam.
pub struct SolaStitcher {
    block_frame: usize,
    sola_buffer_frame: usize,
    sola_search_frame: usize,
    fades: FadeWindows,
    blend: Box<dyn Blend>,
    tail: Vec<f32>,
}

impl SolaStitcher {
    pub fn new(
        block_frame: usize,
        sola_buffer_frame: usize,
        sola_search_frame: usize,
        use_phase_vocoder: bool,
    ) -> Self {
        let blend: Box<dyn Blend> = if use_phase_vocoder {
            Box::new(PhaseVocoderBlend::new(sola_buffer_frame))
        } else {
            Box::new(CrossfadeBlend)
        };
        Self {
            block_frame,
            sola_buffer_frame,
            sola_search_frame,
            fades: FadeWindows::new(sola_buffer_frame),
            blend,
            tail: vec![0.0; sola_buffer_frame],
        }
    }

    /// Samples a segment must carry: one block plus the seam overlap and the
    /// alignment search span.
    pub fn required_segment_len(&self) -> usize {
        self.block_frame + self.sola_buffer_frame + self.sola_search_frame
    }

    /// Aligns and blends one converted segment, returning exactly one block.
    pub fn process(&mut self, segment: &[f32]) -> Result<Vec<f32>> {
        let need = self.required_segment_len();
        if segment.len() < need {
            return Err(RvcError::InsufficientSegmentLength {
                got: segment.len(),
                need,
            });
        }

        let offset = find_offset(
            &self.tail,
            &segment[..self.sola_buffer_frame + self.sola_search_frame],
            self.sola_search_frame,
        );
        let aligned = &segment[offset..];

        let blended = self
            .blend
            .blend(&self.tail, &aligned[..self.sola_buffer_frame], &self.fades);

        let mut out = Vec::with_capacity(self.block_frame);
        out.extend_from_slice(&blended[..self.sola_buffer_frame.min(self.block_frame)]);
        if self.block_frame > self.sola_buffer_frame {
            out.extend_from_slice(&aligned[self.sola_buffer_frame..self.block_frame]);
        }

        self.tail
            .copy_from_slice(&aligned[self.block_frame..self.block_frame + self.sola_buffer_frame]);
        Ok(out)
    }

    pub fn reset(&mut self) {
        self.tail.fill(0.0);
    }
}
