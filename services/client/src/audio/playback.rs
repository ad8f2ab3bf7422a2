//! Speaker playback pipeline.
//!
//! Inbound `ai_audio` frames carry a sequence number assigned by the
//! service. Frames may arrive out of order; the [`SequenceBuffer`] holds
//! gaps back so segments reach the output device strictly in sequence, and
//! the ring buffer between the worker thread and the cpal callback keeps
//! playback of one segment from interrupting another.

use crate::audio;
use crate::error::EngineError;
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::collections::BTreeMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reorders sequence-tagged segments into strict playback order.
///
/// Segments older than the playback cursor are duplicates of something
/// already rendered and are dropped.
#[derive(Debug, Default)]
pub struct SequenceBuffer {
    next_seq: u64,
    pending: BTreeMap<u64, Vec<f32>>,
}

impl SequenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one segment and returns the run of segments that are now
    /// ready to play, in order.
    pub fn insert(&mut self, seq: u64, samples: Vec<f32>) -> Vec<Vec<f32>> {
        if seq < self.next_seq {
            debug!(seq, "dropping late audio segment");
            return Vec::new();
        }
        self.pending.insert(seq, samples);

        let mut ready = Vec::new();
        while let Some(samples) = self.pending.remove(&self.next_seq) {
            ready.push(samples);
            self.next_seq += 1;
        }
        ready
    }

    pub fn reset(&mut self) {
        self.next_seq = 0;
        self.pending.clear();
    }

    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
    feed_tx: std::sync::mpsc::Sender<Vec<f32>>,
}

/// Owns the output device while voice is enabled.
pub struct PlaybackPipeline {
    worker: Option<Worker>,
    sequencer: SequenceBuffer,
}

impl PlaybackPipeline {
    pub fn new() -> Self {
        Self {
            worker: None,
            sequencer: SequenceBuffer::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Acquires the output device. `source_rate` is the sample rate the
    /// service synthesizes speech at. Idempotent while already running.
    pub fn start(&mut self, source_rate: u32) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (feed_tx, feed_rx) = std::sync::mpsc::channel::<Vec<f32>>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("tutor-playback".to_string())
            .spawn(move || run_playback(stop_flag, ready_tx, feed_rx, source_rate))
            .map_err(|e| EngineError::DeviceUnavailable(format!("playback thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    stop,
                    thread,
                    feed_tx,
                });
                info!("speaker playback started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                Err(EngineError::DeviceUnavailable(
                    "playback worker did not report readiness".to_string(),
                ))
            }
        }
    }

    /// Accepts one sequence-tagged base64 PCM16 segment from the router.
    pub fn push(&mut self, seq: u64, data: &str) {
        let Some(worker) = &self.worker else {
            debug!("dropping audio segment; playback not active");
            return;
        };
        let samples = audio::decode_f32_from_base64_i16(data);
        if samples.is_empty() {
            return;
        }
        for segment in self.sequencer.insert(seq, samples) {
            if worker.feed_tx.send(segment).is_err() {
                warn!("playback worker is gone; dropping audio");
                return;
            }
        }
    }

    /// Releases the output device and discards queued audio. Safe to call
    /// when never started.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
            drop(worker.feed_tx);
            let _ = worker.thread.join();
            info!("speaker playback stopped");
        }
        self.sequencer.reset();
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

type PlaybackInit = (cpal::Stream, ringbuf::HeapProd<f32>, rubato::FastFixedIn<f32>);

fn open_output(source_rate: u32) -> Result<PlaybackInit, EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::DeviceUnavailable("no output device".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    // Two seconds of queued speech between the worker and the callback.
    let ring = HeapRb::<f32>::new(device_rate as usize * 2);
    let (producer, mut consumer) = ring.split();
    let err_fn = |e| warn!("output stream error: {e}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device
            .build_output_stream(
                &supported.config(),
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.try_pop().unwrap_or(0.0);
                        for slot in frame {
                            *slot = sample;
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?,
        SampleFormat::I16 => device
            .build_output_stream(
                &supported.config(),
                move |data: &mut [i16], _| {
                    for frame in data.chunks_mut(channels) {
                        let sample = consumer.try_pop().unwrap_or(0.0);
                        let value =
                            (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                        for slot in frame {
                            *slot = value;
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?,
        other => {
            return Err(EngineError::DeviceUnavailable(format!(
                "unsupported output sample format {other:?}"
            )));
        }
    };
    stream
        .play()
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

    let resampler = audio::create_resampler(source_rate as f64, device_rate as f64, 512)
        .map_err(|e| EngineError::DeviceUnavailable(format!("resampler: {e}")))?;

    Ok((stream, producer, resampler))
}

fn run_playback(
    stop: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), EngineError>>,
    feed_rx: std::sync::mpsc::Receiver<Vec<f32>>,
    source_rate: u32,
) {
    let (stream, mut producer, mut resampler) = match open_output(source_rate) {
        Ok(init) => {
            let _ = ready_tx.send(Ok(()));
            init
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    while !stop.load(Ordering::Relaxed) {
        let segment = match feed_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(segment) => segment,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        };
        let mut resampled = audio::resample(&mut resampler, &segment);
        // Feed the ring, yielding while the callback drains it.
        while !resampled.is_empty() && !stop.load(Ordering::Relaxed) {
            let written = producer.push_slice(&resampled);
            if written == 0 {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            resampled.drain(..written);
        }
    }

    drop(stream);
}
