//! [`AudioSink`] on the default output device.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! thread of its own for as long as the sink exists. Samples reach the
//! device callback through an [`audio_queue`] ring; pause and clear requests
//! travel as flags the callback checks each time it runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel as cb;
use log::{debug, error, info, warn};
use vibe_emu_instance::{AudioError, AudioSink};

use crate::audio_queue::{AudioConsumer, AudioProducer, audio_queue};

/// Ring capacity, in device buffers. Leaves room above the instance's own
/// overflow limit of eight buffers.
const RING_BUFFERS: usize = 16;

#[derive(Debug)]
struct Controls {
    paused: AtomicBool,
    clear_requested: AtomicBool,
}

#[derive(Clone, Copy, Debug)]
struct Negotiated {
    sample_rate: u32,
    buffer_size: usize,
}

pub struct CpalSink {
    producer: AudioProducer,
    controls: Arc<Controls>,
    negotiated: Negotiated,
    shutdown: Option<cb::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Opens the default output device, asking for `sample_rate` and a
    /// device buffer of `buffer_size` stereo frames. The device may settle
    /// on something else; [`AudioSink::sample_rate`] and
    /// [`AudioSink::buffer_size`] report what it chose.
    ///
    /// The sink starts paused and plays silence until the first resume.
    pub fn open(sample_rate: u32, buffer_size: usize) -> Result<Self, AudioError> {
        let buffer_size = buffer_size.max(1);
        let (producer, consumer) = audio_queue(buffer_size * RING_BUFFERS);
        let controls = Arc::new(Controls {
            paused: AtomicBool::new(true),
            clear_requested: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = cb::bounded(1);
        let (shutdown_tx, shutdown_rx) = cb::bounded::<()>(1);
        let stream_controls = Arc::clone(&controls);
        let thread = thread::Builder::new()
            .name("vibe-emu-audio".to_owned())
            .spawn(move || {
                let stream = match start_stream(sample_rate, buffer_size, consumer, stream_controls)
                {
                    Ok((stream, negotiated)) => {
                        let _ = ready_tx.send(Ok(negotiated));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the sink drops its sender.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Audio stream closed");
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        let negotiated = match ready_rx.recv() {
            Ok(Ok(negotiated)) => negotiated,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AudioError::Disconnected);
            }
        };

        info!(
            "Audio output open at {} Hz, {} frame buffer",
            negotiated.sample_rate, negotiated.buffer_size
        );
        Ok(Self {
            producer,
            controls,
            negotiated,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.negotiated.sample_rate
    }

    fn buffer_size(&self) -> usize {
        self.negotiated.buffer_size
    }

    fn queued_frames(&self) -> usize {
        self.producer.len()
    }

    fn queue(&mut self, samples: &[i16]) {
        let offered = samples.len() / 2;
        let accepted = self.producer.push_interleaved(samples);
        if accepted < offered {
            debug!("Audio ring full; dropped {} frames", offered - accepted);
        }
    }

    fn pause(&mut self) {
        self.controls.paused.store(true, Ordering::Release);
    }

    fn resume(&mut self) {
        self.controls.paused.store(false, Ordering::Release);
    }

    fn clear(&mut self) {
        self.controls.clear_requested.store(true, Ordering::Release);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

fn start_stream(
    sample_rate: u32,
    buffer_size: usize,
    consumer: AudioConsumer,
    controls: Arc<Controls>,
) -> Result<(cpal::Stream, Negotiated), AudioError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Config(e.to_string()))?;
    let sample_format = supported.sample_format();
    let consumer = Arc::new(consumer);

    let mut config: cpal::StreamConfig = supported.config();
    if supports_rate(&device, sample_format, config.channels, sample_rate) {
        config.sample_rate = cpal::SampleRate(sample_rate);
    } else {
        warn!(
            "Output device cannot play {sample_rate} Hz; using {} Hz",
            config.sample_rate.0
        );
    }

    let mut negotiated = Negotiated {
        sample_rate: config.sample_rate.0,
        buffer_size,
    };

    config.buffer_size = cpal::BufferSize::Fixed(buffer_size as u32);
    let stream = match build_stream(&device, &config, sample_format, &consumer, &controls) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Output device rejected a {buffer_size} frame buffer ({e}); using its default");
            config.buffer_size = cpal::BufferSize::Default;
            if let cpal::SupportedBufferSize::Range { min, .. } = supported.buffer_size() {
                negotiated.buffer_size = negotiated.buffer_size.max(*min as usize);
            }
            build_stream(&device, &config, sample_format, &consumer, &controls)?
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    Ok((stream, negotiated))
}

fn supports_rate(
    device: &cpal::Device,
    format: cpal::SampleFormat,
    channels: cpal::ChannelCount,
    sample_rate: u32,
) -> bool {
    let Ok(mut configs) = device.supported_output_configs() else {
        return false;
    };
    configs.any(|range| {
        range.channels() == channels
            && range.sample_format() == format
            && range.min_sample_rate().0 <= sample_rate
            && sample_rate <= range.max_sample_rate().0
    })
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    consumer: &Arc<AudioConsumer>,
    controls: &Arc<Controls>,
) -> Result<cpal::Stream, AudioError> {
    let consumer = Arc::clone(consumer);
    let controls = Arc::clone(controls);
    let stream = match format {
        cpal::SampleFormat::I16 => build_typed::<i16>(device, config, consumer, controls),
        cpal::SampleFormat::U16 => build_typed::<u16>(device, config, consumer, controls),
        cpal::SampleFormat::F32 => build_typed::<f32>(device, config, consumer, controls),
        other => {
            return Err(AudioError::Config(format!(
                "unsupported sample format {other:?}"
            )));
        }
    };
    stream.map_err(|e| AudioError::Stream(e.to_string()))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    consumer: Arc<AudioConsumer>,
    controls: Arc<Controls>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            fill(data, channels, &consumer, &controls);
        },
        |err| error!("Audio stream error: {err}"),
        None,
    )
}

/// Device callback body. Paused output is silence and leaves the ring
/// untouched; channels past the second get silence too.
fn fill<T>(data: &mut [T], channels: usize, consumer: &AudioConsumer, controls: &Controls)
where
    T: Sample + FromSample<i16>,
{
    if controls.clear_requested.swap(false, Ordering::AcqRel) {
        consumer.drain();
    }
    let paused = controls.paused.load(Ordering::Acquire);

    for frame in data.chunks_mut(channels.max(1)) {
        let (left, right) = if paused {
            (0, 0)
        } else {
            consumer.pop().unwrap_or((0, 0))
        };
        for (channel, out) in frame.iter_mut().enumerate() {
            *out = match channel {
                0 => T::from_sample(left),
                1 => T::from_sample(right),
                _ => T::EQUILIBRIUM,
            };
        }
    }
}
