//! Real-time streaming voice conversion.
//!
//! Synthesized speech is fed in as PCM16 chunks, reshaped into fixed-size
//! blocks, converted through a neural model behind the
//! [`rvc_core::ConversionModel`] seam, stitched seam-free with SOLA, and
//! delivered to the audio device by a dedicated worker thread. The feeding
//! call runs the whole cycle synchronously; the worker only moves finished
//! blocks to hardware.

pub mod controller;
pub mod session;
pub mod sink;
pub mod worker;

pub use controller::{ModelLoader, RealtimeConverter, SinkFactory};
pub use session::ConversionSession;
pub use sink::CpalSink;
pub use worker::{DrainSignal, OutputBlock, PlaybackWorker};
