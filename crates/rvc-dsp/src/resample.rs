use rvc_core::{Result, RvcError};

/// Fixed-ratio linear-interpolation resampler.
///
/// Continuity across streamed calls is the caller's concern: the session
/// prepends a short history window before each conversion and drops the
/// corresponding resampled lead samples.
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    from: u32,
    to: u32,
}

impl Resampler {
    pub fn new(from: u32, to: u32) -> Result<Self> {
        if from == 0 {
            return Err(RvcError::UnsupportedRate(from));
        }
        if to == 0 {
            return Err(RvcError::UnsupportedRate(to));
        }
        Ok(Self { from, to })
    }

    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Number of output samples produced for `input_len` input samples.
    pub fn output_len(&self, input_len: usize) -> usize {
        if input_len == 0 {
            return 0;
        }
        ((input_len as f64) * self.to as f64 / self.from as f64)
            .round()
            .max(1.0) as usize
    }

    pub fn process_into(&self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        if input.is_empty() {
            return;
        }
        if self.is_identity() {
            out.extend_from_slice(input);
            return;
        }

        let ratio = self.to as f64 / self.from as f64;
        let out_len = self.output_len(input.len());
        out.reserve(out_len);
        for i in 0..out_len {
            let src_pos = (i as f64) / ratio;
            let left = src_pos.floor() as usize;
            let right = (left + 1).min(input.len() - 1);
            let frac = (src_pos - left as f64) as f32;
            out.push(input[left.min(input.len() - 1)] * (1.0 - frac) + input[right] * frac);
        }
    }

    pub fn process(&self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(input, &mut out);
        out
    }
}
