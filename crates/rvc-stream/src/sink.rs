use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rvc_core::{OutputSink, Result, RvcError};
use tracing::warn;

/// Keep at most this much audio queued ahead of the device, in seconds.
/// `write` blocks while the backlog is above it, pacing the worker like a
/// blocking device write.
const MAX_PENDING_SECS: f32 = 1.0;

/// Default audio output device behind the [`OutputSink`] seam: mono f32
/// stream at the pipeline's working rate, fed from a shared queue by the
/// delivery worker.
pub struct CpalSink {
    _stream: cpal::Stream,
    pending: Arc<Mutex<VecDeque<f32>>>,
    max_pending: usize,
}

impl CpalSink {
    pub fn new(sample_rate: u32) -> Result<Self> {
        Self::build(sample_rate).map_err(|e| RvcError::Audio(e.to_string()))
    }

    fn build(sample_rate: u32) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("default output device not found"))?;
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let pending = Arc::new(Mutex::new(VecDeque::<f32>::new()));
        let pending_cb = Arc::clone(&pending);
        let mut last_sample = 0.0_f32;
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = match pending_cb.lock() {
                    Ok(queue) => queue,
                    Err(_) => {
                        data.fill(0.0);
                        return;
                    }
                };
                for sample in data {
                    if let Some(v) = queue.pop_front() {
                        *sample = v;
                        last_sample = v;
                    } else {
                        // Decay towards silence on underrun instead of clicking.
                        last_sample *= 0.995;
                        if last_sample.abs() < 1.0e-5 {
                            last_sample = 0.0;
                        }
                        *sample = last_sample;
                    }
                }
            },
            |err| warn!("output stream error: {err}"),
            None,
        )?;
        stream.play()?;

        Ok(Self {
            _stream: stream,
            pending,
            max_pending: (sample_rate as f32 * MAX_PENDING_SECS) as usize,
        })
    }
}

impl OutputSink for CpalSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        loop {
            {
                let mut queue = self
                    .pending
                    .lock()
                    .map_err(|_| RvcError::DeviceWrite("output queue poisoned".into()))?;
                if queue.len() <= self.max_pending {
                    queue.extend(samples.iter().copied());
                    return Ok(());
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}
