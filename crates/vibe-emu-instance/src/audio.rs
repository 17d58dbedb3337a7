//! Sample shaping and sink backpressure.
//!
//! Every stereo sample the engine produces passes through [`AudioPipeline`].
//! With an external sink attached, samples are batched and handed over once
//! enough have accumulated; the batch is thrown away when the sink already
//! holds too much, trading an audible pop for bounded latency. Without a sink,
//! samples pile up until a polling reader drains them.

use log::warn;

use crate::engine::StereoSample;

/// Bounded audio output the pipeline feeds.
pub trait AudioSink: Send {
    /// Rate the sink actually plays at, in Hz.
    fn sample_rate(&self) -> u32;
    /// Device buffer size in stereo frames.
    fn buffer_size(&self) -> usize;
    /// Stereo frames queued but not yet played.
    fn queued_frames(&self) -> usize;
    /// Appends interleaved left/right samples.
    fn queue(&mut self, samples: &[i16]);
    fn pause(&mut self);
    fn resume(&mut self);
    /// Drops everything still queued.
    fn clear(&mut self);
}

pub const MAX_VOLUME: i32 = 100;

/// Converts a 0-100 volume position into a linear gain.
pub fn volume_scale(volume: i32) -> f64 {
    let volume = f64::from(volume.clamp(0, MAX_VOLUME));
    100f64.powf(volume / 100.0) / 100.0 - 0.01 * (100.0 - volume) / 100.0
}

pub struct AudioPipeline {
    enabled: bool,
    force_mono: bool,
    volume: i32,
    volume_scale: f64,
    sink: Option<Box<dyn AudioSink>>,
    buffer: Vec<i16>,
    sample_rate: u32,
}

impl Default for AudioPipeline {
    fn default() -> Self {
        Self {
            enabled: false,
            force_mono: false,
            volume: MAX_VOLUME,
            volume_scale: 1.0,
            sink: None,
            buffer: Vec::new(),
            sample_rate: 0,
        }
    }
}

impl AudioPipeline {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: i32) {
        self.volume = volume.clamp(0, MAX_VOLUME);
        self.volume_scale = volume_scale(self.volume);
    }

    pub fn is_mono_forced(&self) -> bool {
        self.force_mono
    }

    pub fn set_mono_forced(&mut self, mono: bool) {
        self.force_mono = mono;
    }

    /// Rate currently in effect (the sink's if one is attached), or 0.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.buffer.reserve(sample_rate as usize);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn sink_buffer_size(&self) -> Option<usize> {
        self.sink.as_ref().map(|sink| sink.buffer_size())
    }

    /// Replaces the current sink; the old one is paused, flushed and dropped.
    pub fn attach_sink(&mut self, sink: Box<dyn AudioSink>) {
        self.detach_sink();
        self.set_sample_rate(sink.sample_rate());
        self.sink = Some(sink);
        self.reset();
    }

    pub fn detach_sink(&mut self) -> Option<Box<dyn AudioSink>> {
        let mut sink = self.sink.take()?;
        sink.pause();
        sink.clear();
        self.sample_rate = 0;
        Some(sink)
    }

    /// Pauses and flushes the sink and drops anything batched locally.
    pub fn reset(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.pause();
            sink.clear();
        }
        self.buffer.clear();
    }

    fn shape(&self, sample: StereoSample) -> (i16, i16) {
        let mut left = sample.left;
        let mut right = sample.right;

        if self.force_mono {
            left = ((i32::from(left) + i32::from(right)) / 2) as i16;
            right = left;
        }

        if self.volume < MAX_VOLUME {
            left = (f64::from(left) * self.volume_scale) as i16;
            right = (f64::from(right) * self.volume_scale) as i16;
        }

        (left, right)
    }

    /// Handles one engine sample. `turbo` flushes every sample straight to
    /// the sink and tightens the overflow limit.
    pub fn push(&mut self, sample: StereoSample, turbo: bool) {
        if !self.enabled {
            return;
        }

        let (left, right) = self.shape(sample);

        let Some(sink) = self.sink.as_mut() else {
            self.buffer.push(left);
            self.buffer.push(right);
            return;
        };

        let buffer_size = sink.buffer_size();
        let frames_queued = sink.queued_frames();
        let max_frames_queued = buffer_size * if turbo { 4 } else { 8 };

        // Turbo output is flushed per sample, so there is no batch to drop;
        // only the sample itself is discarded.
        if frames_queued > max_frames_queued {
            if !turbo {
                warn!(
                    "Audio sink holds {frames_queued} frames (limit {max_frames_queued}); dropping batch"
                );
                self.reset();
            }
            return;
        }

        self.buffer.push(left);
        self.buffer.push(right);

        // A starved sink gets a larger batch so it does not immediately
        // underrun again.
        let required_frames = if turbo {
            0
        } else if frames_queued < buffer_size * 2 {
            buffer_size * 4
        } else {
            buffer_size
        };

        if self.buffer.len() / 2 >= required_frames {
            sink.queue(&self.buffer);
            self.buffer.clear();
            sink.resume();
        }
    }

    /// Hands over everything buffered so far and empties the buffer.
    pub fn take_samples(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.buffer)
    }

    /// Appends everything buffered so far to `destination` and empties the buffer.
    pub fn drain_into(&mut self, destination: &mut Vec<i16>) {
        destination.append(&mut self.buffer);
    }
}
