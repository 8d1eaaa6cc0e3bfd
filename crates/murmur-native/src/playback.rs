use crate::audio::{self, STREAM_SAMPLE_RATE, StreamResampler};
use crate::device;
use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use murmur_types::Event;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapProd;
use std::sync::{Arc, Mutex};

/// Frames per output callback.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Seconds of audio the playback buffer holds.
pub const OUTPUT_LATENCY_SECS: usize = 10;
const RESAMPLER_CHUNK: usize = 160;

/// Owns the output stream. Playback stops when this is dropped.
pub struct Playback {
    _stream: cpal::Stream,
}

struct SinkState {
    producer: HeapProd<f32>,
    resampler: StreamResampler,
}

/// Feeds synthesized audio into the playback buffer. Cheap to clone, and
/// usable directly as an `audio:response` subscriber.
#[derive(Clone)]
pub struct PlaybackSink {
    state: Arc<Mutex<SinkState>>,
}

impl PlaybackSink {
    pub(crate) fn new(producer: HeapProd<f32>, resampler: StreamResampler) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                producer,
                resampler,
            })),
        }
    }

    /// Queues little-endian PCM16 audio at [`STREAM_SAMPLE_RATE`]. Returns the
    /// number of samples queued; the rest did not fit the buffer.
    pub fn push_pcm16(&self, bytes: &[u8]) -> usize {
        let samples = audio::pcm16_to_f32(bytes);
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let resampled = state.resampler.process(&samples);
        let pushed = state.producer.push_slice(&resampled);
        if pushed < resampled.len() {
            tracing::warn!("playback buffer full, dropped {} samples", resampled.len() - pushed);
        }
        pushed
    }

    /// Plays binary audio chunks and base64 `audio` fields of `audio_response` frames.
    pub fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::AudioChunk(bytes) => {
                self.push_pcm16(bytes);
            }
            Event::AudioResponse(response) => {
                if let Some(encoded) = response.audio() {
                    let bytes = audio::decode_base64(encoded)
                        .context("audio_response carried invalid base64 audio")?;
                    self.push_pcm16(&bytes);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Opens the output device and starts playing whatever the returned sink receives.
pub fn start(device_name: Option<&str>) -> anyhow::Result<(Playback, PlaybackSink)> {
    let output = device::get_or_default_output(device_name)
        .context("Failed to get audio output device")?;
    tracing::info!("Using output device: {:?}", output.name()?);

    let default_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    let output_channel_count = output_config.channels as usize;
    let output_sample_rate = output_config.sample_rate.0 as usize;
    tracing::info!("Output stream config: {:?}", &output_config);

    let buffer = audio::shared_buffer(output_sample_rate * OUTPUT_LATENCY_SECS);
    let (producer, mut consumer) = buffer.split();
    let resampler = StreamResampler::new(
        STREAM_SAMPLE_RATE,
        output_sample_rate as f64,
        RESAMPLER_CHUNK,
    )?;

    // Every output channel plays the same mono sample.
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        for frame in data.chunks_mut(output_channel_count) {
            let sample = consumer.try_pop().unwrap_or(0.0);
            frame.fill(sample);
        }
    };

    let stream = output.build_output_stream(
        &output_config,
        output_data_fn,
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    stream.play()?;

    Ok((
        Playback { _stream: stream },
        PlaybackSink::new(producer, resampler),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ToBinary;
    use murmur_types::events::AudioResponseEvent;
    use ringbuf::traits::Observer;

    fn sink_with_buffer(size: usize) -> (PlaybackSink, ringbuf::HeapCons<f32>) {
        let (producer, consumer) = audio::shared_buffer(size).split();
        let resampler = StreamResampler::new(STREAM_SAMPLE_RATE, STREAM_SAMPLE_RATE, 160).unwrap();
        (PlaybackSink::new(producer, resampler), consumer)
    }

    #[test]
    fn binary_chunks_reach_the_buffer() {
        let (sink, consumer) = sink_with_buffer(4096);
        let pcm: Vec<i16> = vec![1000; 320];

        sink.handle(&Event::AudioChunk(pcm.as_slice().to_binary())).unwrap();

        assert!(consumer.occupied_len() > 0);
    }

    #[test]
    fn invalid_base64_audio_is_an_error() {
        let (sink, consumer) = sink_with_buffer(4096);
        let event: AudioResponseEvent =
            serde_json::from_value(serde_json::json!({"audio": "%%%"})).unwrap();

        assert!(sink.handle(&Event::AudioResponse(event)).is_err());
        assert_eq!(consumer.occupied_len(), 0);
    }

    #[test]
    fn overflow_is_dropped_not_blocking() {
        let (sink, consumer) = sink_with_buffer(100);
        let pcm: Vec<i16> = vec![1000; 1600];

        let pushed = sink.push_pcm16(&pcm.as_slice().to_binary());

        assert_eq!(pushed, 100);
        assert_eq!(consumer.occupied_len(), 100);
    }
}
