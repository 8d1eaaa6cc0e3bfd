//! Microphone capture on a dedicated thread.
//!
//! The cpal stream lives and dies on the capture thread. Captured audio is
//! downmixed to mono, resampled to [`STREAM_SAMPLE_RATE`] and handed out as
//! little-endian PCM16 chunks on a bounded channel. A full channel drops the
//! chunk: the microphone never waits for the network.

use crate::audio::{STREAM_SAMPLE_RATE, StreamResampler, ToBinary, downmix};
use crate::device;
use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Frames per cpal callback.
pub const INPUT_CHUNK_SIZE: usize = 1024;

/// Keeps the capture thread alive. Dropping it stops capture.
pub struct CaptureHandle {
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stops capture and waits for the device to be released.
    pub fn stop(mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        // Closing the channel wakes the capture thread, which drops its stream.
        self.stop.take();
    }
}

/// Opens the input device and starts capturing into `chunks`.
///
/// Returns once the stream is playing, or with the error that prevented it.
pub fn spawn_capture(
    device_name: Option<String>,
    chunks: mpsc::Sender<Vec<u8>>,
) -> anyhow::Result<CaptureHandle> {
    let (ready_tx, ready_rx) = std_mpsc::sync_channel::<anyhow::Result<()>>(1);
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name("murmur-capture".to_string())
        .spawn(move || {
            let stream = match build_input_stream(device_name.as_deref(), chunks) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            // Blocks until the handle stops or is dropped.
            let _ = stop_rx.recv();
            drop(stream);
            tracing::debug!("capture stream closed");
        })
        .context("Failed to spawn capture thread")?;

    ready_rx
        .recv()
        .context("Capture thread exited during startup")??;

    Ok(CaptureHandle {
        stop: Some(stop_tx),
        thread: Some(thread),
    })
}

fn build_input_stream(
    device_name: Option<&str>,
    chunks: mpsc::Sender<Vec<u8>>,
) -> anyhow::Result<cpal::Stream> {
    let input = device::get_or_default_input(device_name)
        .context("Failed to get audio input device")?;
    tracing::info!("Using input device: {:?}", input.name()?);

    let default_config = input
        .default_input_config()
        .context("Failed to get default input config")?;
    let input_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let channels = input_config.channels as usize;
    tracing::info!("Input stream config: {:?}", &input_config);

    let mut resampler = StreamResampler::new(
        input_config.sample_rate.0 as f64,
        STREAM_SAMPLE_RATE,
        INPUT_CHUNK_SIZE,
    )?;

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        let mono = downmix(data, channels);
        let resampled = resampler.process(&mono);
        if resampled.is_empty() {
            return;
        }
        match chunks.try_send(resampled.as_slice().to_binary()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => tracing::trace!("audio queue full, dropping chunk"),
            Err(TrySendError::Closed(_)) => tracing::trace!("audio consumer gone"),
        }
    };

    let stream = input.build_input_stream(
        &input_config,
        input_data_fn,
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}
