use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{sync_channel, RecvTimeoutError, SyncSender},
    Arc, Condvar, Mutex,
};
use std::thread;
use std::time::Duration;

use rvc_core::{OutputSink, Result, RvcError};
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 64;
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// One item of the producer/consumer hand-off to the delivery worker.
/// `Stop` is a sentinel processed in FIFO order: by the time the worker sees
/// it, every previously queued `Play` block has been written.
pub enum OutputBlock {
    Play(Vec<f32>),
    Stop,
}

/// Boolean signal raised by the worker when an utterance finishes draining.
/// `wait` is its only consumer; the utterance-end callback is invoked by the
/// worker itself, so callback delivery never races a pending `wait`.
#[derive(Default)]
pub struct DrainSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl DrainSignal {
    pub fn raise(&self) {
        let mut raised = self.raised.lock().expect("drain signal poisoned");
        *raised = true;
        self.cond.notify_all();
    }

    /// Blocks until the signal is raised, then clears it.
    pub fn wait(&self) {
        let mut raised = self.raised.lock().expect("drain signal poisoned");
        while !*raised {
            raised = self.cond.wait(raised).expect("drain signal poisoned");
        }
        *raised = false;
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock().expect("drain signal poisoned")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Streaming,
    Draining,
}

/// Dedicated delivery thread owning the audio output device.
///
/// Receives finished blocks over a bounded channel and writes them to the
/// sink; a `Stop` sentinel raises the drained signal once the queue ahead of
/// it has been flushed, then fires the optional utterance-end callback on
/// this same thread.
pub struct PlaybackWorker {
    tx: SyncSender<OutputBlock>,
    shutdown: Arc<AtomicBool>,
    drained: Arc<DrainSignal>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PlaybackWorker {
    /// Spawns the worker; `make_sink` runs on the worker thread so the device
    /// handle never crosses threads.
    pub fn spawn<S, F>(make_sink: F) -> Result<Self>
    where
        S: OutputSink + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        Self::spawn_with_callback(make_sink, None)
    }

    /// Like [`PlaybackWorker::spawn`]; `on_drained` fires on the worker
    /// thread after each `Stop` sentinel finishes draining.
    pub fn spawn_with_callback<S, F>(
        make_sink: F,
        on_drained: Option<Box<dyn Fn() + Send>>,
    ) -> Result<Self>
    where
        S: OutputSink + 'static,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let (tx, rx) = sync_channel::<OutputBlock>(QUEUE_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let drained = Arc::new(DrainSignal::default());

        let (ready_tx, ready_rx) = sync_channel::<Result<()>>(1);
        let shutdown_worker = Arc::clone(&shutdown);
        let drained_worker = Arc::clone(&drained);
        let worker = thread::spawn(move || {
            let mut sink = match make_sink() {
                Ok(sink) => {
                    let _ = ready_tx.send(Ok(()));
                    sink
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let mut state = WorkerState::Idle;
            while !shutdown_worker.load(Ordering::Relaxed) {
                match rx.recv_timeout(RECV_TIMEOUT) {
                    Ok(OutputBlock::Play(block)) => {
                        if state != WorkerState::Streaming {
                            debug!(samples = block.len(), "playback streaming");
                            state = WorkerState::Streaming;
                        }
                        if let Err(e) = sink.write(&block) {
                            // Recoverable: drop the block, keep the stream.
                            warn!("dropping block after device write failure: {e}");
                        }
                    }
                    Ok(OutputBlock::Stop) => {
                        state = WorkerState::Draining;
                        drained_worker.raise();
                        if let Some(callback) = &on_drained {
                            callback();
                        }
                        debug!(?state, "utterance drained");
                        state = WorkerState::Idle;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(?state, "playback worker stopped");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(RvcError::Audio("playback worker died during startup".into()));
            }
        }

        Ok(Self {
            tx,
            shutdown,
            drained,
            worker: Some(worker),
        })
    }

    pub fn send_play(&self, block: Vec<f32>) -> Result<()> {
        self.tx
            .send(OutputBlock::Play(block))
            .map_err(|_| RvcError::Audio("playback queue disconnected".into()))
    }

    pub fn send_stop(&self) -> Result<()> {
        self.tx
            .send(OutputBlock::Stop)
            .map_err(|_| RvcError::Audio("playback queue disconnected".into()))
    }

    /// Blocks until the current utterance has fully drained to the device.
    pub fn wait_drained(&self) {
        self.drained.wait();
    }

    pub fn drain_signal(&self) -> Arc<DrainSignal> {
        Arc::clone(&self.drained)
    }

    /// Terminates the worker thread and releases the device.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PlaybackWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        written: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl OutputSink for CountingSink {
        fn write(&mut self, _samples: &[f32]) -> Result<()> {
            thread::sleep(self.delay);
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn stop_drains_after_all_queued_blocks() {
        let written = Arc::new(AtomicUsize::new(0));
        let written_sink = Arc::clone(&written);
        let mut worker = PlaybackWorker::spawn(move || {
            Ok(CountingSink {
                written: written_sink,
                delay: Duration::from_millis(5),
            })
        })
        .unwrap();

        for _ in 0..5 {
            worker.send_play(vec![0.0; 256]).unwrap();
        }
        worker.send_stop().unwrap();
        worker.wait_drained();
        assert_eq!(written.load(Ordering::SeqCst), 5);
        worker.shutdown();
    }

    #[test]
    fn drained_callback_fires_after_stop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let written = Arc::new(AtomicUsize::new(0));
        let written_sink = Arc::clone(&written);
        let mut worker = PlaybackWorker::spawn_with_callback(
            move || {
                Ok(CountingSink {
                    written: written_sink,
                    delay: Duration::ZERO,
                })
            },
            Some(Box::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        worker.send_play(vec![0.0; 16]).unwrap();
        worker.send_stop().unwrap();
        for _ in 0..100 {
            if fired.load(Ordering::SeqCst) > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        worker.shutdown();
    }

    #[test]
    fn wait_drained_wakes_even_with_a_callback_registered() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        let written = Arc::new(AtomicUsize::new(0));
        let written_sink = Arc::clone(&written);
        let mut worker = PlaybackWorker::spawn_with_callback(
            move || {
                Ok(CountingSink {
                    written: written_sink,
                    delay: Duration::ZERO,
                })
            },
            Some(Box::new(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        worker.send_play(vec![0.0; 16]).unwrap();
        worker.send_stop().unwrap();
        // Give the callback time to run first; the signal must stay raised
        // for the waiter rather than being consumed on the callback path.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(worker.drain_signal().is_raised());
        worker.wait_drained();
        worker.shutdown();
    }

    struct FailingSink;

    impl OutputSink for FailingSink {
        fn write(&mut self, _samples: &[f32]) -> Result<()> {
            Err(RvcError::DeviceWrite("simulated".into()))
        }
    }

    #[test]
    fn device_write_failure_does_not_stall_the_stream() {
        let mut worker = PlaybackWorker::spawn(|| Ok(FailingSink)).unwrap();
        worker.send_play(vec![0.0; 16]).unwrap();
        worker.send_play(vec![0.0; 16]).unwrap();
        worker.send_stop().unwrap();
        worker.wait_drained();
        worker.shutdown();
    }

    #[test]
    fn sink_construction_failure_surfaces_at_spawn() {
        let result = PlaybackWorker::spawn(|| -> Result<CountingSink> {
            Err(RvcError::Audio("no device".into()))
        });
        assert!(result.is_err());
    }
}
