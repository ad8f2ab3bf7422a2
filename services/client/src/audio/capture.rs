//! Microphone capture pipeline.
//!
//! cpal streams are not `Send`, so the device is owned by a dedicated OS
//! thread: the cpal callback pushes raw samples into a lock-free ring
//! buffer, and the same thread periodically drains the ring, resamples to
//! the wire rate, base64-encodes, and hands the chunk to the engine task
//! over a channel. Stopping the pipeline joins the thread, which releases
//! the device and discards any buffered-but-unsent samples.

use crate::audio;
use crate::error::EngineError;
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How often the worker drains the ring buffer into a wire frame.
const DRAIN_INTERVAL: Duration = Duration::from_millis(60);

struct Worker {
    stop: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

/// Owns the microphone while voice input is enabled.
pub struct CapturePipeline {
    worker: Option<Worker>,
}

impl CapturePipeline {
    pub fn new() -> Self {
        Self { worker: None }
    }

    pub fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    /// Acquires the microphone and starts streaming encoded chunks into
    /// `chunk_tx`. Idempotent while already running.
    pub fn start(
        &mut self,
        chunk_tx: mpsc::Sender<String>,
        wire_rate: u32,
    ) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("tutor-capture".to_string())
            .spawn(move || run_capture(stop_flag, ready_tx, chunk_tx, wire_rate))
            .map_err(|e| EngineError::DeviceUnavailable(format!("capture thread: {e}")))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.worker = Some(Worker { stop, thread });
                info!("microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                Err(EngineError::DeviceUnavailable(
                    "capture worker did not report readiness".to_string(),
                ))
            }
        }
    }

    /// Releases the device. Safe to call when never started; buffered
    /// samples are discarded, never sent after stop.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::Relaxed);
            let _ = worker.thread.join();
            info!("microphone capture stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

type CaptureInit = (cpal::Stream, ringbuf::HeapCons<f32>, rubato::FastFixedIn<f32>);

fn open_input(wire_rate: u32) -> Result<CaptureInit, EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| EngineError::DeviceUnavailable("no input device".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    // A second of headroom between the callback and the drain loop.
    let ring = HeapRb::<f32>::new(device_rate as usize);
    let (mut producer, consumer) = ring.split();
    let err_fn = |e| warn!("input stream error: {e}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device
            .build_input_stream(
                &supported.config(),
                move |data: &[f32], _| {
                    for frame in data.chunks(channels) {
                        let _ = producer.try_push(frame[0]);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &supported.config(),
                move |data: &[i16], _| {
                    for frame in data.chunks(channels) {
                        let _ = producer.try_push(frame[0] as f32 / 32768.0);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?,
        other => {
            return Err(EngineError::DeviceUnavailable(format!(
                "unsupported input sample format {other:?}"
            )));
        }
    };
    stream
        .play()
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

    let resampler = audio::create_resampler(device_rate as f64, wire_rate as f64, 512)
        .map_err(|e| EngineError::DeviceUnavailable(format!("resampler: {e}")))?;

    Ok((stream, consumer, resampler))
}

fn run_capture(
    stop: Arc<AtomicBool>,
    ready_tx: std::sync::mpsc::Sender<Result<(), EngineError>>,
    chunk_tx: mpsc::Sender<String>,
    wire_rate: u32,
) {
    let (stream, mut consumer, mut resampler) = match open_input(wire_rate) {
        Ok(init) => {
            let _ = ready_tx.send(Ok(()));
            init
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut scratch = vec![0f32; 8192];
    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(DRAIN_INTERVAL);
        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            continue;
        }
        let resampled = audio::resample(&mut resampler, &scratch[..n]);
        if resampled.is_empty() {
            continue;
        }
        let encoded = audio::encode_f32_to_base64_i16(&resampled);
        if chunk_tx.blocking_send(encoded).is_err() {
            // Engine is gone; nothing left to feed.
            break;
        }
    }

    drop(stream);
}
