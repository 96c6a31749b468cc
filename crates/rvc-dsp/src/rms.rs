/// Centered short-time RMS, one value per hop.
///
/// Each frame is centered on `i * hop` and zero-padded at the signal edges,
/// so `len / hop + 1` values are returned for a signal of `len` samples.
pub fn rms_envelope(signal: &[f32], frame_length: usize, hop: usize) -> Vec<f32> {
    if signal.is_empty() || hop == 0 || frame_length == 0 {
        return Vec::new();
    }
    let n_frames = signal.len() / hop + 1;
    let half = frame_length as isize / 2;
    let mut out = Vec::with_capacity(n_frames);
    for i in 0..n_frames {
        let center = (i * hop) as isize;
        let start = (center - half).max(0) as usize;
        let end = ((center + half) as usize).min(signal.len());
        let mut sum_sq = 0.0_f32;
        for &v in &signal[start..end] {
            sum_sq += v * v;
        }
        out.push((sum_sq / frame_length as f32).sqrt());
    }
    out
}

/// Linear interpolation of an envelope to `out_len` points, endpoints pinned.
pub fn linear_stretch(values: &[f32], out_len: usize) -> Vec<f32> {
    if values.is_empty() || out_len == 0 {
        return vec![0.0; out_len];
    }
    if values.len() == 1 {
        return vec![values[0]; out_len];
    }
    let mut out = Vec::with_capacity(out_len);
    let scale = (values.len() - 1) as f32 / (out_len - 1).max(1) as f32;
    for i in 0..out_len {
        let pos = i as f32 * scale;
        let left = pos.floor() as usize;
        let right = (left + 1).min(values.len() - 1);
        let frac = pos - left as f32;
        out.push(values[left] * (1.0 - frac) + values[right] * frac);
    }
    out
}

/// Rescales `converted` so its short-term RMS tracks `reference`'s,
/// weighted by `mix_rate`. 1.0 is a passthrough, 0.0 fully imposes the
/// reference envelope. `rms_out` is floored at 1e-3 to keep the ratio sane
/// over silence.
pub fn match_volume_envelope(
    converted: &mut [f32],
    reference: &[f32],
    ref_frame_length: usize,
    ref_hop: usize,
    out_frame_length: usize,
    out_hop: usize,
    mix_rate: f32,
) {
    if mix_rate >= 1.0 || converted.is_empty() || reference.is_empty() {
        return;
    }
    let rms_in = rms_envelope(reference, ref_frame_length, ref_hop);
    let rms_out = rms_envelope(converted, out_frame_length, out_hop);
    // Stretch to len + 1 and drop the trailing point so the envelope covers
    // sample centers rather than frame edges.
    let rms_in = linear_stretch(&rms_in, converted.len() + 1);
    let rms_out = linear_stretch(&rms_out, converted.len() + 1);
    let exponent = 1.0 - mix_rate;
    for (i, v) in converted.iter_mut().enumerate() {
        let denom = rms_out[i].max(1e-3);
        *v *= (rms_in[i] / denom).powf(exponent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_signal() {
        let signal = vec![0.5_f32; 1_600];
        let env = rms_envelope(&signal, 640, 160);
        assert_eq!(env.len(), 11);
        // Interior frames see a full window of 0.5.
        assert!((env[5] - 0.5).abs() < 1e-4);
        // Edge frames are zero-padded, so lower.
        assert!(env[0] < 0.5);
    }

    #[test]
    fn stretch_pins_endpoints() {
        let out = linear_stretch(&[1.0, 3.0], 5);
        assert_eq!(out, vec![1.0, 1.5, 2.0, 2.5, 3.0]);
    }

    #[test]
    fn mix_rate_one_is_passthrough() {
        let mut converted = vec![0.25_f32; 800];
        let reference = vec![1.0_f32; 800];
        match_volume_envelope(&mut converted, &reference, 640, 160, 640, 160, 1.0);
        assert!(converted.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn mix_rate_zero_imposes_reference_envelope() {
        let mut converted = vec![0.25_f32; 3_200];
        let reference = vec![0.5_f32; 3_200];
        match_volume_envelope(&mut converted, &reference, 640, 160, 640, 160, 0.0);
        // Away from zero-padded edges the gain should be about 0.5/0.25.
        let mid = converted[1_600];
        assert!((mid - 0.5).abs() < 0.05, "mid={mid}");
    }

    #[test]
    fn near_silent_output_is_floored_not_exploded() {
        let mut converted = vec![1e-6_f32; 1_600];
        let reference = vec![0.5_f32; 1_600];
        match_volume_envelope(&mut converted, &reference, 640, 160, 640, 160, 0.5);
        assert!(converted.iter().all(|v| v.is_finite() && v.abs() < 1.0));
    }
}
