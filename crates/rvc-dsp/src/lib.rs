//! Pure DSP building blocks of the streaming voice-conversion pipeline:
//! rolling sample windows, rate conversion, gating, RMS envelope matching,
//! and the SOLA seam stitcher. No threads, no devices.

pub mod gate;
pub mod resample;
pub mod ring;
pub mod rms;
pub mod sola;

pub use gate::{db_gate, SpectralGate, GATE_DISABLED_DB};
pub use resample::Resampler;
pub use ring::RollingBuffer;
pub use rms::{linear_stretch, match_volume_envelope, rms_envelope};
pub use sola::{find_offset, Blend, CrossfadeBlend, FadeWindows, PhaseVocoderBlend, SolaStitcher};
