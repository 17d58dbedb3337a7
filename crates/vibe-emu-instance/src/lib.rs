//! Thread-safe session layer around a single-threaded Game Boy emulation engine.
//!
//! The engine is driven by one run-loop thread; front ends (desktop UI,
//! debugger windows, audio output) poll and command it through [`Instance`].
//! The engine itself is supplied by the embedder through the [`Engine`]
//! traits.

/// Sample shaping, volume and sink backpressure.
pub mod audio;

/// Breakpoint registry and the pause mailbox.
pub mod breakpoints;

/// Persistent instance settings.
pub mod config;

/// Traits the emulation engine implements, and the types they exchange.
pub mod engine;

/// Error types shared by the instance and audio sinks.
pub mod error;

/// Hardware models and boot ROM families.
pub mod hardware;

/// Held and rapid-fire joypad buttons.
pub mod input;

/// The instance and its run loop.
pub mod instance;

/// Frame-rate measurement and turbo pacing.
pub mod pacing;

/// Boot ROM selection and save-state model bookkeeping.
pub mod persistence;

/// Triple-buffered frame output.
pub mod pixels;

/// Virtual printer page queue.
pub mod printer;

/// Rewind button state.
pub mod rewind;

/// Break-and-trace recording.
pub mod trace;

pub use audio::AudioSink;
pub use engine::{DebuggerCommand, Engine, EngineCore, EngineHooks};
pub use error::{AudioError, EngineError, InstanceError};
pub use hardware::{BootRomKind, BorderMode, Model};
pub use instance::Instance;
pub use pixels::PixelBufferMode;
