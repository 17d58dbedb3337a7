//! Capability set consumed from the emulation engine.
//!
//! The engine is a black box: it steps the hardware, owns breakpoint storage,
//! the rewind ring and the save-state format. The instance only drives it
//! through these traits and reacts to the callbacks it makes from inside
//! [`Engine::advance`].

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::hardware::{BorderMode, Model};

/// SM83 register names understood by [`EngineCore::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Register {
    A,
    B,
    C,
    D,
    E,
    F,
    H,
    L,
    AF,
    BC,
    DE,
    HL,
    SP,
    PC,
}

impl Register {
    #[inline]
    pub const fn is_16_bit(self) -> bool {
        matches!(
            self,
            Register::AF | Register::BC | Register::DE | Register::HL | Register::SP | Register::PC
        )
    }
}

/// Bits of the F register.
pub const FLAG_ZERO: u8 = 0x80;
pub const FLAG_SUBTRACT: u8 = 0x40;
pub const FLAG_HALF_CARRY: u8 = 0x20;
pub const FLAG_CARRY: u8 = 0x10;

/// Joypad state as an 8-bit mask (set bit = pressed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Buttons(pub u8);

impl Buttons {
    pub const NONE: Buttons = Buttons(0);
    pub const RIGHT: Buttons = Buttons(0x01);
    pub const LEFT: Buttons = Buttons(0x02);
    pub const UP: Buttons = Buttons(0x04);
    pub const DOWN: Buttons = Buttons(0x08);
    pub const A: Buttons = Buttons(0x10);
    pub const B: Buttons = Buttons(0x20);
    pub const SELECT: Buttons = Buttons(0x40);
    pub const START: Buttons = Buttons(0x80);
    pub const ALL: Buttons = Buttons(0xFF);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Buttons) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn set(&mut self, button: Buttons, pressed: bool) {
        if pressed {
            self.0 |= button.0;
        } else {
            self.0 &= !button.0;
        }
    }
}

impl std::ops::BitOr for Buttons {
    type Output = Buttons;

    fn bitor(self, rhs: Buttons) -> Buttons {
        Buttons(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Buttons {
    type Output = Buttons;

    fn bitand(self, rhs: Buttons) -> Buttons {
        Buttons(self.0 & rhs.0)
    }
}

/// What the engine should do after asking for debugger input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebuggerCommand {
    Continue,
    /// Execute one instruction, entering calls.
    Step,
    /// Execute one instruction, stepping over calls.
    Next,
    /// Run until the current function returns.
    Finish,
    Other(String),
}

impl DebuggerCommand {
    pub fn as_str(&self) -> &str {
        match self {
            DebuggerCommand::Continue => "continue",
            DebuggerCommand::Step => "step",
            DebuggerCommand::Next => "next",
            DebuggerCommand::Finish => "finish",
            DebuggerCommand::Other(text) => text,
        }
    }
}

impl From<&str> for DebuggerCommand {
    fn from(text: &str) -> Self {
        match text.trim() {
            "continue" | "c" => DebuggerCommand::Continue,
            "step" | "s" => DebuggerCommand::Step,
            "next" | "n" => DebuggerCommand::Next,
            "finish" | "f" => DebuggerCommand::Finish,
            other => DebuggerCommand::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for DebuggerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StereoSample {
    pub left: i16,
    pub right: i16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BacktraceEntry {
    pub label: String,
    pub address: u16,
}

/// Memory areas the engine can hand out wholesale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    Rom,
    Vram,
    Wram,
    Oam,
    Hram,
    CartRam,
}

/// A ROM or ISX image, either on disk or already in memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RomImage {
    Path(PathBuf),
    Buffer(Vec<u8>),
}

impl RomImage {
    /// Short human-readable origin, used in logs and errors.
    pub fn describe(&self) -> String {
        match self {
            RomImage::Path(path) => path.display().to_string(),
            RomImage::Buffer(data) => format!("<{} byte buffer>", data.len()),
        }
    }
}

/// Everything the instance can ask of the engine outside of `advance`.
///
/// Also handed to [`EngineHooks::input_requested`] so the debugger can inspect
/// a frozen machine from inside the engine's own call stack.
pub trait EngineCore {
    fn reset(&mut self);
    fn switch_model_and_reset(&mut self, model: Model);
    fn model(&self) -> Model;

    fn set_border_mode(&mut self, mode: BorderMode);
    /// Current output size in pixels as `(width, height)`.
    fn screen_size(&self) -> (u32, u32);
    /// Native frames per second for the current model.
    fn usual_frame_rate(&self) -> f64;

    fn set_clock_multiplier(&mut self, multiplier: f64);
    /// Uncapped execution; the instance paces turbo mode itself.
    fn set_turbo_mode(&mut self, enabled: bool);
    fn set_sample_rate(&mut self, sample_rate: u32);
    fn set_buttons(&mut self, buttons: Buttons);

    fn register(&self, register: Register) -> u16;
    fn set_register(&mut self, register: Register, value: u16);
    fn read_memory(&self, address: u16) -> u8;
    fn write_memory(&mut self, address: u16, value: u8);
    fn memory_region(&self, region: MemoryRegion) -> Vec<u8>;

    fn debugger_evaluate(&mut self, expression: &str) -> Option<u16>;
    /// Runs a debugger console command and returns the text it logged.
    fn debugger_execute(&mut self, command: &str) -> String;
    fn disassemble(&mut self, address: u16, count: u8) -> String;
    fn debugger_break(&mut self);

    fn add_breakpoint(&mut self, address: u16);
    fn remove_breakpoint(&mut self, address: u16);
    fn clear_breakpoints(&mut self);
    fn breakpoints(&self) -> Vec<u16>;
    fn backtrace(&self) -> Vec<BacktraceEntry>;

    /// Restores the newest buffered state. Returns `false` once history is exhausted.
    fn rewind_pop(&mut self) -> bool;
    fn set_rewind_length(&mut self, seconds: f64);

    fn export_state(&mut self) -> Vec<u8>;
    fn import_state(&mut self, state: &[u8]) -> Result<(), EngineError>;
    /// Model a save state was created on, if the engine can tell.
    fn state_model(&self, state: &[u8]) -> Option<Model>;

    fn load_battery(&mut self, path: &Path) -> Result<(), EngineError>;
    fn save_battery(&mut self, path: &Path) -> Result<(), EngineError>;
    fn load_boot_rom(&mut self, image: &[u8]);
    fn load_rom(&mut self, image: &RomImage) -> Result<(), EngineError>;
    fn load_isx(&mut self, image: &RomImage) -> Result<(), EngineError>;
    fn load_symbols(&mut self, path: &Path) -> Result<(), EngineError>;
    fn clear_symbols(&mut self);

    fn connect_printer(&mut self);
    fn disconnect_serial(&mut self);
}

/// An engine that can be driven by the instance's run loop.
pub trait Engine: EngineCore + Send + 'static {
    /// Run until the engine reaches an internal event. All callbacks are made
    /// synchronously on the calling thread before this returns.
    fn advance(&mut self, hooks: &mut dyn EngineHooks);
}

/// Callbacks made by the engine from inside [`Engine::advance`].
pub trait EngineHooks {
    /// Writes rendered pixels into the frame currently being drawn.
    fn write_pixels(&mut self, offset: usize, pixels: &[u32]);
    /// The frame being drawn is complete.
    fn vblank(&mut self);
    fn sample(&mut self, sample: StereoSample);
    fn log(&mut self, text: &str);
    fn rumble(&mut self, amplitude: f64);
    fn printed_page(&mut self, pixels: &[u32], height: usize);
    /// The engine stopped for debugger input (breakpoint hit or stepping).
    /// Blocks until a command is available.
    fn input_requested(&mut self, engine: &mut dyn EngineCore) -> DebuggerCommand;
}
