use std::collections::VecDeque;

use rvc_core::{ConversionModel, FrameLayout, PipelineConfig, Result, RvcError};
use rvc_dsp::{
    db_gate, match_volume_envelope, FadeWindows, Resampler, RollingBuffer, SolaStitcher,
    SpectralGate,
};
use tracing::{debug, warn};

const SPECTRAL_PROP_DECREASE: f32 = 0.9;

/// One live conversion pipeline: the rolling buffer set, the model, and the
/// per-block processing cycle. Owned by the feeding context; the delivery
/// worker never touches it.
///
/// Buffer sizes are fixed by the [`FrameLayout`] at construction and only
/// change by rebuilding the session (working-rate change on model swap).
pub struct ConversionSession {
    config: PipelineConfig,
    layout: FrameLayout,
    model: Box<dyn ConversionModel>,
    /// Raw history at the working rate: extra + crossfade + search + block.
    input_wav: RollingBuffer,
    /// The same history resampled to the model's 16 kHz input rate.
    input_wav_16k: RollingBuffer,
    /// Two hops of raw lead-in kept for resampler continuity.
    res_buffer: RollingBuffer,
    /// Tail of the previous denoised window, blended over seam edges.
    nr_buffer: RollingBuffer,
    /// Converted-output history used as the output noise-reduction reference.
    output_buffer: RollingBuffer,
    stitcher: SolaStitcher,
    fades: FadeWindows,
    spectral_gate: SpectralGate,
    to_16k: Resampler,
    from_native: Option<Resampler>,
    /// Cached source-rate converter for the feed path, keyed by chunk rate.
    source: Option<(u32, Resampler)>,
    accumulated: VecDeque<f32>,
    scratch_16k: Vec<f32>,
    // Live run state, togglable without touching buffers.
    pitch: f32,
    gate_threshold_db: f32,
    input_noise_reduce: bool,
    output_noise_reduce: bool,
}

impl ConversionSession {
    pub fn new(config: PipelineConfig, model: Box<dyn ConversionModel>) -> Result<Self> {
        let layout = FrameLayout::from_config(&config)?;
        let native = model.native_sample_rate();
        let to_16k = Resampler::new(layout.sample_rate, 16_000)?;
        let from_native = if native != layout.sample_rate {
            Some(Resampler::new(native, layout.sample_rate)?)
        } else {
            None
        };
        debug!(
            sample_rate = layout.sample_rate,
            block_frame = layout.block_frame,
            sola_buffer = layout.sola_buffer_frame,
            sola_search = layout.sola_search_frame,
            "session buffers allocated"
        );

        Ok(Self {
            pitch: config.pitch,
            gate_threshold_db: config.gate_threshold_db,
            input_noise_reduce: config.input_noise_reduce,
            output_noise_reduce: config.output_noise_reduce,
            stitcher: SolaStitcher::new(
                layout.block_frame,
                layout.sola_buffer_frame,
                layout.sola_search_frame,
                config.use_phase_vocoder,
            ),
            fades: FadeWindows::new(layout.sola_buffer_frame),
            spectral_gate: SpectralGate::new(4 * layout.hop, SPECTRAL_PROP_DECREASE),
            input_wav: RollingBuffer::new(layout.input_frame),
            input_wav_16k: RollingBuffer::new(layout.input_frame_16k),
            res_buffer: RollingBuffer::new(2 * layout.hop),
            nr_buffer: RollingBuffer::new(layout.sola_buffer_frame),
            output_buffer: RollingBuffer::new(layout.input_frame),
            to_16k,
            from_native,
            source: None,
            accumulated: VecDeque::new(),
            scratch_16k: Vec::new(),
            config,
            layout,
            model,
        })
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn native_sample_rate(&self) -> u32 {
        self.model.native_sample_rate()
    }

    pub fn set_pitch(&mut self, semitones: f32) {
        self.pitch = semitones;
    }

    pub fn set_gate_threshold_db(&mut self, threshold_db: f32) {
        self.gate_threshold_db = threshold_db;
    }

    pub fn set_input_noise_reduce(&mut self, enabled: bool) {
        self.input_noise_reduce = enabled;
    }

    pub fn set_output_noise_reduce(&mut self, enabled: bool) {
        self.output_noise_reduce = enabled;
    }

    /// Replaces the model without resizing buffers. The caller must have
    /// checked that the native rate is unchanged; the old model is dropped
    /// here, releasing its resources.
    pub fn swap_model(&mut self, model: Box<dyn ConversionModel>) {
        self.model = model;
    }

    /// Discards any partially accumulated block at the start of an utterance.
    pub fn begin_utterance(&mut self) {
        self.accumulated.clear();
    }

    /// Feeds PCM16LE mono audio at `source_rate`, returning every finished
    /// output block. Runs the full conversion cycle synchronously on the
    /// caller's thread for each completed block; partial blocks stay
    /// accumulated.
    pub fn feed(&mut self, pcm: &[u8], source_rate: u32) -> Result<Vec<Vec<f32>>> {
        if pcm.len() % 2 != 0 {
            return Err(RvcError::Config(format!(
                "pcm chunk of {} bytes is not whole 16-bit samples",
                pcm.len()
            )));
        }
        let mut chunk = Vec::with_capacity(pcm.len() / 2);
        for pair in pcm.chunks_exact(2) {
            chunk.push(i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0);
        }

        if source_rate != self.layout.sample_rate {
            let resampler = match &self.source {
                Some((rate, r)) if *rate == source_rate => *r,
                _ => {
                    let r = Resampler::new(source_rate, self.layout.sample_rate)?;
                    self.source = Some((source_rate, r));
                    r
                }
            };
            self.accumulated.extend(resampler.process(&chunk));
        } else {
            self.accumulated.extend(chunk);
        }

        let mut blocks = Vec::new();
        while self.accumulated.len() >= self.layout.block_frame {
            let block: Vec<f32> = self.accumulated.drain(..self.layout.block_frame).collect();
            blocks.push(self.process_block(&block)?);
        }
        Ok(blocks)
    }

    /// Runs one full cycle on exactly one block of working-rate samples:
    /// gate, history advance, optional input denoise, resample to 16 kHz,
    /// inference, resample back, optional output denoise, envelope match,
    /// SOLA stitch. Returns exactly `block_frame` samples.
    pub fn process_block(&mut self, block: &[f32]) -> Result<Vec<f32>> {
        let layout = self.layout;
        let hop = layout.hop;

        let mut block = block.to_vec();
        db_gate(&mut block, hop, 4 * hop, self.gate_threshold_db);

        self.input_wav.advance(&block)?;
        self.input_wav_16k.shift_left(layout.block_frame_16k)?;

        if self.input_noise_reduce {
            let span = layout.sola_buffer_frame + layout.block_frame + 2 * hop;
            let denoised_full = self
                .spectral_gate
                .process(self.input_wav.tail(span), self.input_wav.as_slice());
            let mut denoised = denoised_full[2 * hop..].to_vec();
            // Blend the leading edge against the previous denoised tail with
            // the same fade pair SOLA uses, then remember the new tail.
            for i in 0..layout.sola_buffer_frame {
                denoised[i] = denoised[i] * self.fades.fade_in[i]
                    + self.nr_buffer.as_slice()[i] * self.fades.fade_out[i];
            }
            self.nr_buffer.advance(&denoised[layout.block_frame..])?;

            let mut to_resample = Vec::with_capacity(2 * hop + layout.block_frame);
            to_resample.extend_from_slice(self.res_buffer.as_slice());
            to_resample.extend_from_slice(&denoised[..layout.block_frame]);
            let tail_start = to_resample.len() - 2 * hop;
            self.res_buffer.advance(&to_resample[tail_start..])?;
            self.to_16k.process_into(&to_resample, &mut self.scratch_16k);
        } else {
            let raw = self.input_wav.tail(layout.block_frame + 2 * hop);
            self.to_16k.process_into(raw, &mut self.scratch_16k);
        }
        // The first 160 resampled samples only re-cover old history; writing
        // block_frame_16k + 160 keeps the seam between cycles continuous.
        self.input_wav_16k.write_tail(&self.scratch_16k[160..])?;

        let converted_native = match self.model.infer(
            self.input_wav_16k.as_slice(),
            layout.block_frame_16k,
            layout.skip_head,
            layout.return_length,
            self.pitch,
            self.config.pitch_method,
        ) {
            Ok(v) => v,
            Err(e) => {
                // Recoverable: one silent block instead of a dead stream.
                warn!("inference failed, substituting silence: {e}");
                return Ok(vec![0.0; layout.block_frame]);
            }
        };

        let mut converted = match &self.from_native {
            Some(resampler) => resampler.process(&converted_native),
            None => converted_native,
        };

        if self.output_noise_reduce {
            let tail_len = layout.block_frame.min(converted.len());
            self.output_buffer
                .advance(&converted[converted.len() - tail_len..])?;
            converted = self
                .spectral_gate
                .process(&converted, self.output_buffer.as_slice());
        }

        if self.config.rms_mix_rate < 1.0 {
            let start = 160 * layout.skip_head;
            let end = 160 * (layout.skip_head + layout.return_length);
            let reference = &self.input_wav_16k.as_slice()[start..end];
            match_volume_envelope(
                &mut converted,
                reference,
                640,
                160,
                4 * hop,
                hop,
                self.config.rms_mix_rate,
            );
        }

        self.stitcher.process(&converted)
    }
}

impl Drop for ConversionSession {
    fn drop(&mut self) {
        // Model resources (accelerator memory included) are released when the
        // boxed model drops with the session.
        debug!("conversion session torn down");
    }
}
