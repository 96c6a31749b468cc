use serde::{Deserialize, Serialize};

use crate::{Result, RvcError};

/// Pitch extraction method forwarded to the conversion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchMethod {
    Fcpe,
    Rmvpe,
    Harvest,
}

impl Default for PitchMethod {
    fn default() -> Self {
        PitchMethod::Fcpe
    }
}

/// Per-session pipeline parameters. Immutable once a session is built;
/// derived frame counts live in [`FrameLayout`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Working sample rate of the pipeline, usually the model's native rate.
    pub sample_rate: u32,
    /// Duration of one processing block in seconds.
    pub block_time: f32,
    /// Crossfade duration in seconds.
    pub crossfade_time: f32,
    /// Extra history handed to the model as context, in seconds.
    pub extra_time: f32,
    /// Noise gate threshold in dBFS. Values at or below -60 disable the gate.
    pub gate_threshold_db: f32,
    /// RMS envelope mix rate. 1.0 disables envelope matching.
    pub rms_mix_rate: f32,
    /// Pitch shift in semitones.
    pub pitch: f32,
    pub input_noise_reduce: bool,
    pub output_noise_reduce: bool,
    /// Use the phase-vocoder blend instead of the fixed crossfade.
    pub use_phase_vocoder: bool,
    pub pitch_method: PitchMethod,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 40_000,
            block_time: 0.2,
            crossfade_time: 0.08,
            extra_time: 2.0,
            gate_threshold_db: -60.0,
            rms_mix_rate: 0.5,
            pitch: 0.0,
            input_noise_reduce: false,
            output_noise_reduce: false,
            use_phase_vocoder: false,
            pitch_method: PitchMethod::default(),
        }
    }
}

/// Frame counts derived from [`PipelineConfig`] once per session.
///
/// Every duration is rounded to a whole number of hops so buffers and
/// sub-frame loops never deal with fractional frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub sample_rate: u32,
    /// Sub-frame hop: 10 ms at the working rate.
    pub hop: usize,
    pub block_frame: usize,
    pub block_frame_16k: usize,
    pub crossfade_frame: usize,
    /// Overlap actually blended at each seam, capped at 4 hops.
    pub sola_buffer_frame: usize,
    /// Offset search span for the seam alignment, one hop.
    pub sola_search_frame: usize,
    pub extra_frame: usize,
    /// Total rolling history: extra + crossfade + search + block.
    pub input_frame: usize,
    pub input_frame_16k: usize,
    /// Leading context frames the model consumes but does not return.
    pub skip_head: usize,
    /// Frames the model is asked to return per cycle.
    pub return_length: usize,
}

impl FrameLayout {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let sample_rate = config.sample_rate;
        if sample_rate < 16_000 || sample_rate % 100 != 0 {
            return Err(RvcError::UnsupportedRate(sample_rate));
        }
        let hop = sample_rate as usize / 100;

        let to_frames = |seconds: f32| -> usize {
            (seconds * sample_rate as f32 / hop as f32).round().max(0.0) as usize * hop
        };

        let block_frame = to_frames(config.block_time);
        let crossfade_frame = to_frames(config.crossfade_time);
        let extra_frame = to_frames(config.extra_time);
        if block_frame == 0 || crossfade_frame == 0 {
            return Err(RvcError::Config(format!(
                "block_time {} / crossfade_time {} rounds to zero frames at {} Hz",
                config.block_time, config.crossfade_time, sample_rate
            )));
        }

        let sola_buffer_frame = crossfade_frame.min(4 * hop);
        let sola_search_frame = hop;
        let input_frame = extra_frame + crossfade_frame + sola_search_frame + block_frame;

        Ok(Self {
            sample_rate,
            hop,
            block_frame,
            block_frame_16k: 160 * block_frame / hop,
            crossfade_frame,
            sola_buffer_frame,
            sola_search_frame,
            extra_frame,
            input_frame,
            input_frame_16k: 160 * input_frame / hop,
            skip_head: extra_frame / hop,
            return_length: (block_frame + sola_buffer_frame + sola_search_frame) / hop,
        })
    }
}
