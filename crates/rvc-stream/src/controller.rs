use std::path::PathBuf;
use std::sync::Arc;

use rvc_core::{
    available_models, ConversionModel, ModelConfig, OutputSink, PipelineConfig, Result, RvcError,
};
use tracing::{debug, info};

use crate::session::ConversionSession;
use crate::sink::CpalSink;
use crate::worker::PlaybackWorker;

/// Loads a conversion model from its on-disk path pair. Called again on
/// every hot-swap; implementations decide how weights reach the accelerator.
pub type ModelLoader = Box<dyn FnMut(&ModelConfig) -> Result<Box<dyn ConversionModel>> + Send>;

/// Opens an output sink at a given sample rate. Invoked on the delivery
/// worker's own thread, so the sink never has to cross threads.
pub type SinkFactory = Arc<dyn Fn(u32) -> Result<Box<dyn OutputSink>> + Send + Sync>;

/// Session controller and public control surface of the pipeline.
///
/// Owns the session (feeding context state) and the playback worker. All
/// methods run on the caller's thread; `feed` blocks for the duration of
/// inference and stitching for each completed block.
pub struct RealtimeConverter {
    model_dir: PathBuf,
    config: PipelineConfig,
    load_model: ModelLoader,
    make_sink: SinkFactory,
    on_drained: Option<Arc<dyn Fn() + Send + Sync>>,
    session: Option<ConversionSession>,
    worker: Option<PlaybackWorker>,
    current_model: Option<String>,
}

impl RealtimeConverter {
    pub fn new(
        model_dir: impl Into<PathBuf>,
        config: PipelineConfig,
        load_model: ModelLoader,
        make_sink: SinkFactory,
    ) -> Self {
        Self {
            model_dir: model_dir.into(),
            config,
            load_model,
            make_sink,
            on_drained: None,
            session: None,
            worker: None,
            current_model: None,
        }
    }

    /// Like [`RealtimeConverter::new`], writing to the default audio device.
    pub fn with_default_device(
        model_dir: impl Into<PathBuf>,
        config: PipelineConfig,
        load_model: ModelLoader,
    ) -> Self {
        Self::new(
            model_dir,
            config,
            load_model,
            Arc::new(|rate| Ok(Box::new(CpalSink::new(rate)?) as Box<dyn OutputSink>)),
        )
    }

    /// Registers the callback fired when an utterance finishes draining to
    /// the device. Must be set before `start`; it runs on the delivery
    /// worker's thread.
    pub fn on_utterance_end(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_drained = Some(Arc::new(callback));
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    /// Loads the named model, sizes the buffers for its native rate, and
    /// spins up the delivery worker.
    pub fn start(&mut self, model_name: &str) -> Result<()> {
        let model_config = ModelConfig::locate(&self.model_dir, model_name)?;
        let model = (self.load_model)(&model_config)?;
        let native_rate = model.native_sample_rate();

        let mut config = self.config.clone();
        config.sample_rate = native_rate;
        let session = ConversionSession::new(config, model)?;
        let worker = self.spawn_worker(native_rate)?;

        info!(model = model_name, rate = native_rate, "conversion session started");
        self.session = Some(session);
        self.worker = Some(worker);
        self.current_model = Some(model_name.to_string());
        Ok(())
    }

    fn spawn_worker(&self, sample_rate: u32) -> Result<PlaybackWorker> {
        let factory = Arc::clone(&self.make_sink);
        let callback = self
            .on_drained
            .clone()
            .map(|cb| Box::new(move || cb()) as Box<dyn Fn() + Send>);
        PlaybackWorker::spawn_with_callback(move || factory(sample_rate), callback)
    }

    fn session_mut(&mut self) -> Result<&mut ConversionSession> {
        self.session
            .as_mut()
            .ok_or_else(|| RvcError::Config("session not started".into()))
    }

    /// Discards any partial block left over from the previous utterance.
    pub fn begin_utterance(&mut self) -> Result<()> {
        self.session_mut()?.begin_utterance();
        Ok(())
    }

    /// Pushes one PCM16LE mono chunk through the pipeline; finished blocks
    /// are queued to the delivery worker in stitch order.
    pub fn feed(&mut self, pcm: &[u8], source_rate: u32) -> Result<()> {
        let blocks = self.session_mut()?.feed(pcm, source_rate)?;
        if let Some(worker) = &self.worker {
            for block in blocks {
                worker.send_play(block)?;
            }
        }
        Ok(())
    }

    /// Live pitch update, read by the next inference call.
    pub fn set_pitch(&mut self, semitones: f32) -> Result<()> {
        self.config.pitch = semitones;
        self.session_mut()?.set_pitch(semitones);
        Ok(())
    }

    /// Hot-swaps the model. Same name is a no-op; a different native rate
    /// rebuilds buffers and the device stream, otherwise only the model
    /// handle changes. The old model's resources are released either way.
    pub fn set_model(&mut self, model_name: &str) -> Result<()> {
        if self.current_model.as_deref() == Some(model_name) {
            return Ok(());
        }
        let model_config = ModelConfig::locate(&self.model_dir, model_name)?;
        let model = (self.load_model)(&model_config)?;
        let native_rate = model.native_sample_rate();

        match self.session.as_mut() {
            Some(session) if session.layout().sample_rate == native_rate => {
                session.swap_model(model);
                debug!(model = model_name, "model swapped in place");
            }
            _ => {
                let mut config = self.config.clone();
                config.sample_rate = native_rate;
                // Rate changed: drop the old session first so the previous
                // model releases its memory before the new buffers go up.
                self.session = None;
                self.session = Some(ConversionSession::new(config, model)?);
                if let Some(mut worker) = self.worker.take() {
                    // Let queued blocks of the old utterance finish playing
                    // before the device stream goes away.
                    if worker.send_stop().is_ok() {
                        worker.wait_drained();
                    }
                    worker.shutdown();
                }
                self.worker = Some(self.spawn_worker(native_rate)?);
                info!(model = model_name, rate = native_rate, "session rebuilt for new rate");
            }
        }
        self.current_model = Some(model_name.to_string());
        Ok(())
    }

    /// Queues the stop sentinel; the drained signal fires once everything
    /// ahead of it has reached the device.
    pub fn stop(&self) -> Result<()> {
        match &self.worker {
            Some(worker) => worker.send_stop(),
            None => Err(RvcError::Config("session not started".into())),
        }
    }

    /// Blocks until the current utterance has fully drained.
    pub fn wait(&self) {
        if let Some(worker) = &self.worker {
            worker.wait_drained();
        }
    }

    pub fn stop_and_wait(&self) -> Result<()> {
        self.stop()?;
        self.wait();
        Ok(())
    }

    /// Tears down the worker and the session, releasing the device handle
    /// and model memory.
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.session = None;
        self.current_model = None;
        info!("converter shut down");
    }

    /// Models available on disk: names with both weights and index files.
    pub fn get_models(&self) -> Result<Vec<String>> {
        available_models(&self.model_dir)
    }
}

impl Drop for RealtimeConverter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rvc_core::{IdentityModel, PitchMethod};
    use std::f32::consts::PI;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MemorySink {
        written: Arc<Mutex<Vec<Vec<f32>>>>,
    }

    impl OutputSink for MemorySink {
        fn write(&mut self, samples: &[f32]) -> Result<()> {
            self.written.lock().unwrap().push(samples.to_vec());
            Ok(())
        }
    }

    fn model_dir(name: &str, models: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rvc-ctl-{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for model in models {
            fs::write(dir.join(format!("{model}.pth")), b"").unwrap();
            fs::write(dir.join(format!("{model}.index")), b"").unwrap();
        }
        dir
    }

    fn identity_loader(counter: Arc<AtomicUsize>) -> ModelLoader {
        Box::new(move |config: &ModelConfig| {
            assert!(config.weights_path.exists());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(IdentityModel) as Box<dyn ConversionModel>)
        })
    }

    fn memory_factory(written: Arc<Mutex<Vec<Vec<f32>>>>) -> SinkFactory {
        Arc::new(move |_rate| {
            Ok(Box::new(MemorySink {
                written: Arc::clone(&written),
            }) as Box<dyn OutputSink>)
        })
    }

    fn sine_pcm16(freq: f32, rate: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len * 2);
        for i in 0..len {
            let v = 0.5 * (2.0 * PI * freq * i as f32 / rate as f32).sin();
            out.extend_from_slice(&((v * 32767.0) as i16).to_le_bytes());
        }
        out
    }

    fn converter(dir: &Path, counter: Arc<AtomicUsize>, written: Arc<Mutex<Vec<Vec<f32>>>>) -> RealtimeConverter {
        RealtimeConverter::new(
            dir,
            PipelineConfig {
                rms_mix_rate: 1.0,
                ..PipelineConfig::default()
            },
            identity_loader(counter),
            memory_factory(written),
        )
    }

    #[test]
    fn stop_fires_only_after_queued_blocks_play() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let dir = model_dir("drain", &["Samantha"]);
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut converter = converter(&dir, Arc::new(AtomicUsize::new(0)), Arc::clone(&written));
        converter.start("Samantha").unwrap();

        let block = 3_200; // 0.2 s at the identity model's 16 kHz rate
        converter.feed(&sine_pcm16(440.0, 16_000, 5 * block), 16_000).unwrap();
        converter.stop_and_wait().unwrap();

        assert_eq!(written.lock().unwrap().len(), 5);
        converter.shutdown();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn set_model_with_same_name_is_a_no_op() {
        let dir = model_dir("noop", &["Samantha", "Alex"]);
        let loads = Arc::new(AtomicUsize::new(0));
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut converter = converter(&dir, Arc::clone(&loads), written);

        converter.start("Samantha").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        converter.set_model("Samantha").unwrap();
        converter.set_model("Samantha").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        converter.set_model("Alex").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn listing_reflects_complete_model_pairs() {
        let dir = model_dir("list", &["Samantha", "Alex"]);
        fs::write(dir.join("broken.pth"), b"").unwrap();
        let converter = converter(
            &dir,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Mutex::new(Vec::new())),
        );
        assert_eq!(converter.get_models().unwrap(), vec!["Alex", "Samantha"]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_model_file_fails_start() {
        let dir = model_dir("missing", &[]);
        fs::write(dir.join("half.pth"), b"").unwrap();
        let mut converter = converter(
            &dir,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Mutex::new(Vec::new())),
        );
        assert!(converter.start("half").is_err());
        assert!(!converter.is_started());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn utterance_end_callback_reaches_the_controlling_context() {
        let dir = model_dir("callback", &["Samantha"]);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let mut converter = converter(
            &dir,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Mutex::new(Vec::new())),
        );
        converter.on_utterance_end(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        });
        converter.start("Samantha").unwrap();

        converter.feed(&sine_pcm16(440.0, 16_000, 3_200), 16_000).unwrap();
        converter.stop().unwrap();
        for _ in 0..200 {
            if fired.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        converter.shutdown();
        let _ = fs::remove_dir_all(&dir);
    }

    /// Model whose reported native rate differs, to drive a session rebuild.
    struct WideModel;

    impl ConversionModel for WideModel {
        fn native_sample_rate(&self) -> u32 {
            32_000
        }

        fn infer(
            &mut self,
            window_16k: &[f32],
            _block_frame_16k: usize,
            skip_head: usize,
            return_length: usize,
            _pitch: f32,
            _method: PitchMethod,
        ) -> Result<Vec<f32>> {
            // 320 samples per frame at 32 kHz.
            let slice = &window_16k[160 * skip_head..160 * (skip_head + return_length)];
            let mut out = Vec::with_capacity(slice.len() * 2);
            for &v in slice {
                out.push(v);
                out.push(v);
            }
            Ok(out)
        }
    }

    /// Sink slow enough that blocks are still queued when a swap happens.
    struct SlowMemorySink {
        written: Arc<Mutex<Vec<Vec<f32>>>>,
    }

    impl OutputSink for SlowMemorySink {
        fn write(&mut self, samples: &[f32]) -> Result<()> {
            std::thread::sleep(std::time::Duration::from_millis(20));
            self.written.lock().unwrap().push(samples.to_vec());
            Ok(())
        }
    }

    #[test]
    fn rate_change_plays_out_queued_blocks_first() {
        let dir = model_dir("swap-drain", &["Narrow", "Wide"]);
        let written = Arc::new(Mutex::new(Vec::new()));
        let written_sink = Arc::clone(&written);
        let loader: ModelLoader = Box::new(|config: &ModelConfig| {
            Ok(if config.name == "Wide" {
                Box::new(WideModel) as Box<dyn ConversionModel>
            } else {
                Box::new(IdentityModel) as Box<dyn ConversionModel>
            })
        });
        let mut converter = RealtimeConverter::new(
            &dir,
            PipelineConfig {
                rms_mix_rate: 1.0,
                ..PipelineConfig::default()
            },
            loader,
            Arc::new(move |_rate| {
                Ok(Box::new(SlowMemorySink {
                    written: Arc::clone(&written_sink),
                }) as Box<dyn OutputSink>)
            }),
        );

        converter.start("Narrow").unwrap();
        converter.feed(&sine_pcm16(440.0, 16_000, 4 * 3_200), 16_000).unwrap();
        // Swapping rates must not discard the four blocks still in flight.
        converter.set_model("Wide").unwrap();

        let blocks = written.lock().unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.len() == 3_200));
        drop(blocks);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rate_change_rebuilds_buffers_on_swap() {
        let dir = model_dir("rebuild", &["Narrow", "Wide"]);
        let written = Arc::new(Mutex::new(Vec::new()));
        let loader: ModelLoader = Box::new(|config: &ModelConfig| {
            Ok(if config.name == "Wide" {
                Box::new(WideModel) as Box<dyn ConversionModel>
            } else {
                Box::new(IdentityModel) as Box<dyn ConversionModel>
            })
        });
        let mut converter = RealtimeConverter::new(
            &dir,
            PipelineConfig {
                rms_mix_rate: 1.0,
                ..PipelineConfig::default()
            },
            loader,
            memory_factory(Arc::clone(&written)),
        );

        converter.start("Narrow").unwrap();
        converter.set_model("Wide").unwrap();
        // 32 kHz working rate: one block is now 0.2 s * 32 kHz samples.
        converter.feed(&sine_pcm16(440.0, 32_000, 6_400), 32_000).unwrap();
        converter.stop_and_wait().unwrap();
        let blocks = written.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 6_400);
        let _ = fs::remove_dir_all(&dir);
    }
}
