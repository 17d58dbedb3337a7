//! Device audio output for a `vibe-emu-instance` session.
//!
//! [`CpalSink`] implements the instance's [`AudioSink`](vibe_emu_instance::AudioSink)
//! on the default `cpal` output device.

pub mod audio_queue;
mod cpal_sink;

pub use cpal_sink::CpalSink;
