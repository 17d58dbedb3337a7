use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by the emulation engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The engine returned a nonzero status code.
    #[error("engine returned status {0}")]
    Status(i32),

    #[error("engine rejected the data: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("failed to load {what}: {source}")]
    Load {
        what: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to load save state: {source}")]
    SaveState {
        #[source]
        source: EngineError,
    },

    #[error("battery save {}: {source}", path.display())]
    Battery {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl InstanceError {
    /// Engine status code behind a load failure, if there is one.
    pub fn status(&self) -> Option<i32> {
        match self {
            InstanceError::Load {
                source: EngineError::Status(code),
                ..
            } => Some(*code),
            _ => None,
        }
    }
}

/// Failure to open or drive an external audio sink.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("unsupported audio configuration: {0}")]
    Config(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("audio thread exited before reporting a stream")]
    Disconnected,
}
