//! Scripted engine used by the integration tests.
//!
//! The fake walks a small program in a loop, one "instruction" at a time,
//! incrementing A on every step. Each advance runs one frame: after
//! `INSTRUCTIONS_PER_FRAME` instructions it writes a uniform frame, emits a
//! few samples and signals vblank. Breakpoints, stepping and forced breaks
//! go through `EngineHooks::input_requested` like a real debugger would.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use vibe_emu_instance::engine::{
    BacktraceEntry, Buttons, DebuggerCommand, Engine, EngineCore, EngineHooks, MemoryRegion,
    Register, RomImage, StereoSample,
};
use vibe_emu_instance::error::EngineError;
use vibe_emu_instance::hardware::{
    BorderMode, CgbRevision, DmgRevision, Model, SgbVariant,
};
use vibe_emu_instance::persistence::BuiltInBootRoms;
use vibe_emu_instance::printer::PRINTER_WIDTH;
use vibe_emu_instance::{BootRomKind, Instance};

pub const PROGRAM_START: u16 = 0x0100;
pub const PROGRAM_LEN: u16 = 0x40;
pub const INSTRUCTIONS_PER_FRAME: u32 = 24;
pub const FRAME_COLORS: [u32; 2] = [0x1010_1010, 0x3030_3030];
pub const SAMPLES_PER_FRAME: usize = 4;
pub const SMALL_SCREEN: (u32, u32) = (8, 4);
pub const BORDER_SCREEN: (u32, u32) = (16, 8);
pub const PRINTED_ROWS: usize = 2;

/// Side effects the tests want to look at.
#[derive(Debug, Default)]
pub struct Witness {
    pub clock_multiplier: f64,
    pub turbo: bool,
    pub sample_rate: u32,
    pub buttons: Buttons,
    pub boot_rom: Vec<u8>,
    pub battery: Option<PathBuf>,
    pub symbols: Option<PathBuf>,
    pub resets: usize,
    pub frames: u64,
    pub rewind_seconds: f64,
    pub executed: Vec<String>,
    /// The fake panics when it is about to execute this address.
    pub panic_at: Option<u16>,
    /// Sleep before every instruction, to stretch a trace over real time.
    pub instruction_delay: Option<Duration>,
}

pub struct FakeEngine {
    witness: Arc<Mutex<Witness>>,
    model: Model,
    border: BorderMode,
    regs: [u8; 8],
    sp: u16,
    pc: u16,
    memory: Vec<u8>,
    breakpoints: Vec<u16>,
    stepping: bool,
    break_requested: bool,
    instructions_in_frame: u32,
    frame: u64,
    history: usize,
    max_history: usize,
    printer: bool,
}

const A: usize = 0;
const F: usize = 5;

fn model_tag(model: Model) -> u8 {
    match model {
        Model::Dmg(_) => 0,
        Model::Mgb => 1,
        Model::Sgb(_) => 2,
        Model::Sgb2 => 3,
        Model::Cgb(_) => 4,
        Model::Agb => 5,
    }
}

fn model_from_tag(tag: u8) -> Option<Model> {
    Some(match tag {
        0 => Model::Dmg(DmgRevision::default()),
        1 => Model::Mgb,
        2 => Model::Sgb(SgbVariant::default()),
        3 => Model::Sgb2,
        4 => Model::Cgb(CgbRevision::default()),
        5 => Model::Agb,
        _ => return None,
    })
}

impl FakeEngine {
    pub fn new(witness: Arc<Mutex<Witness>>) -> Self {
        Self {
            witness,
            model: Model::default(),
            border: BorderMode::Never,
            regs: [0; 8],
            sp: 0xFFFE,
            pc: PROGRAM_START,
            memory: vec![0; 0x10000],
            breakpoints: Vec::new(),
            stepping: false,
            break_requested: false,
            instructions_in_frame: 0,
            frame: 0,
            history: 0,
            max_history: 8,
            printer: false,
        }
    }

    fn execute_one(&mut self) {
        self.regs[A] = self.regs[A].wrapping_add(1);
        self.regs[F] = if self.regs[A] == 0 { 0x80 } else { 0x00 };
        self.pc += 1;
        if self.pc >= PROGRAM_START + PROGRAM_LEN {
            self.pc = PROGRAM_START;
        }
    }

    fn finish_frame(&mut self, hooks: &mut dyn EngineHooks) {
        let (width, height) = self.screen_size();
        let color = FRAME_COLORS[(self.frame % 2) as usize];
        hooks.write_pixels(0, &vec![color; (width * height) as usize]);

        for _ in 0..SAMPLES_PER_FRAME {
            hooks.sample(StereoSample {
                left: 1000,
                right: -1000,
            });
        }

        if self.printer {
            hooks.printed_page(&vec![0xFFFF_FFFF; PRINTER_WIDTH * PRINTED_ROWS], PRINTED_ROWS);
            self.printer = false;
        }
        hooks.rumble(if self.frame % 2 == 0 { 0.0 } else { 0.5 });

        hooks.vblank();
        self.frame += 1;
        self.history = (self.history + 1).min(self.max_history);
        self.witness.lock().unwrap().frames = self.frame;
    }

    fn load_image(&mut self, image: &RomImage) -> Result<(), EngineError> {
        let data = match image {
            RomImage::Path(path) => std::fs::read(path)?,
            RomImage::Buffer(data) => data.clone(),
        };
        if data.is_empty() {
            return Err(EngineError::Status(-1));
        }
        self.reset();
        Ok(())
    }
}

impl EngineCore for FakeEngine {
    fn reset(&mut self) {
        self.regs = [0; 8];
        self.sp = 0xFFFE;
        self.pc = PROGRAM_START;
        self.stepping = false;
        self.break_requested = false;
        self.instructions_in_frame = 0;
        self.witness.lock().unwrap().resets += 1;
    }

    fn switch_model_and_reset(&mut self, model: Model) {
        self.model = model;
        self.reset();
    }

    fn model(&self) -> Model {
        self.model
    }

    fn set_border_mode(&mut self, mode: BorderMode) {
        self.border = mode;
    }

    fn screen_size(&self) -> (u32, u32) {
        let border = match self.border {
            BorderMode::Never => false,
            BorderMode::Always => true,
            BorderMode::SgbOnly => self.model.is_sgb(),
        };
        if border { BORDER_SCREEN } else { SMALL_SCREEN }
    }

    fn usual_frame_rate(&self) -> f64 {
        59.7275
    }

    fn set_clock_multiplier(&mut self, multiplier: f64) {
        self.witness.lock().unwrap().clock_multiplier = multiplier;
    }

    fn set_turbo_mode(&mut self, enabled: bool) {
        self.witness.lock().unwrap().turbo = enabled;
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.witness.lock().unwrap().sample_rate = sample_rate;
    }

    fn set_buttons(&mut self, buttons: Buttons) {
        self.witness.lock().unwrap().buttons = buttons;
    }

    fn register(&self, register: Register) -> u16 {
        let pair = |hi: usize, lo: usize| u16::from_be_bytes([self.regs[hi], self.regs[lo]]);
        match register {
            Register::A => self.regs[0].into(),
            Register::B => self.regs[1].into(),
            Register::C => self.regs[2].into(),
            Register::D => self.regs[3].into(),
            Register::E => self.regs[4].into(),
            Register::F => self.regs[5].into(),
            Register::H => self.regs[6].into(),
            Register::L => self.regs[7].into(),
            Register::AF => pair(0, 5),
            Register::BC => pair(1, 2),
            Register::DE => pair(3, 4),
            Register::HL => pair(6, 7),
            Register::SP => self.sp,
            Register::PC => self.pc,
        }
    }

    fn set_register(&mut self, register: Register, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        let (high, low) = match register {
            Register::AF => (0, 5),
            Register::BC => (1, 2),
            Register::DE => (3, 4),
            Register::HL => (6, 7),
            Register::SP => {
                self.sp = value;
                return;
            }
            Register::PC => {
                self.pc = value;
                return;
            }
            single => {
                let index = [
                    Register::A,
                    Register::B,
                    Register::C,
                    Register::D,
                    Register::E,
                    Register::F,
                    Register::H,
                    Register::L,
                ]
                .iter()
                .position(|&r| r == single)
                .unwrap();
                self.regs[index] = lo;
                return;
            }
        };
        self.regs[high] = hi;
        self.regs[low] = lo;
    }

    fn read_memory(&self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    fn write_memory(&mut self, address: u16, value: u8) {
        self.memory[address as usize] = value;
    }

    fn memory_region(&self, region: MemoryRegion) -> Vec<u8> {
        let range = match region {
            MemoryRegion::Rom => 0x0000..0x8000,
            MemoryRegion::Vram => 0x8000..0xA000,
            MemoryRegion::CartRam => 0xA000..0xC000,
            MemoryRegion::Wram => 0xC000..0xE000,
            MemoryRegion::Oam => 0xFE00..0xFEA0,
            MemoryRegion::Hram => 0xFF80..0xFFFF,
        };
        self.memory[range].to_vec()
    }

    fn debugger_evaluate(&mut self, expression: &str) -> Option<u16> {
        match expression.trim() {
            "pc" => Some(self.pc),
            "a" => Some(self.regs[A].into()),
            other => u16::from_str_radix(other.strip_prefix('$')?, 16).ok(),
        }
    }

    fn debugger_execute(&mut self, command: &str) -> String {
        self.witness.lock().unwrap().executed.push(command.to_owned());
        format!("executed {command}\n")
    }

    fn disassemble(&mut self, address: u16, count: u8) -> String {
        (0..count)
            .map(|i| format!("  ${:04X}: inc a\n", address.wrapping_add(i.into())))
            .collect()
    }

    fn debugger_break(&mut self) {
        self.break_requested = true;
    }

    fn add_breakpoint(&mut self, address: u16) {
        if !self.breakpoints.contains(&address) {
            self.breakpoints.push(address);
        }
    }

    fn remove_breakpoint(&mut self, address: u16) {
        self.breakpoints.retain(|&a| a != address);
    }

    fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    fn breakpoints(&self) -> Vec<u16> {
        self.breakpoints.clone()
    }

    fn backtrace(&self) -> Vec<BacktraceEntry> {
        vec![BacktraceEntry {
            label: "main".to_owned(),
            address: self.pc,
        }]
    }

    fn rewind_pop(&mut self) -> bool {
        if self.history == 0 {
            return false;
        }
        self.history -= 1;
        true
    }

    fn set_rewind_length(&mut self, seconds: f64) {
        self.history = 0;
        self.witness.lock().unwrap().rewind_seconds = seconds;
    }

    fn export_state(&mut self) -> Vec<u8> {
        let [pc_hi, pc_lo] = self.pc.to_be_bytes();
        vec![model_tag(self.model), pc_hi, pc_lo, self.regs[A]]
    }

    fn import_state(&mut self, state: &[u8]) -> Result<(), EngineError> {
        let &[tag, pc_hi, pc_lo, a] = state else {
            return Err(EngineError::Rejected("truncated state".to_owned()));
        };
        if tag != model_tag(self.model) {
            return Err(EngineError::Rejected("model mismatch".to_owned()));
        }
        self.pc = u16::from_be_bytes([pc_hi, pc_lo]);
        self.regs[A] = a;
        Ok(())
    }

    fn state_model(&self, state: &[u8]) -> Option<Model> {
        model_from_tag(*state.first()?)
    }

    fn load_battery(&mut self, path: &Path) -> Result<(), EngineError> {
        std::fs::metadata(path)?;
        self.witness.lock().unwrap().battery = Some(path.to_path_buf());
        Ok(())
    }

    fn save_battery(&mut self, path: &Path) -> Result<(), EngineError> {
        std::fs::write(path, [0xBA])?;
        Ok(())
    }

    fn load_boot_rom(&mut self, image: &[u8]) {
        self.witness.lock().unwrap().boot_rom = image.to_vec();
    }

    fn load_rom(&mut self, image: &RomImage) -> Result<(), EngineError> {
        self.load_image(image)
    }

    fn load_isx(&mut self, image: &RomImage) -> Result<(), EngineError> {
        self.load_image(image)
    }

    fn load_symbols(&mut self, path: &Path) -> Result<(), EngineError> {
        self.witness.lock().unwrap().symbols = Some(path.to_path_buf());
        Ok(())
    }

    fn clear_symbols(&mut self) {
        self.witness.lock().unwrap().symbols = None;
    }

    fn connect_printer(&mut self) {
        self.printer = true;
    }

    fn disconnect_serial(&mut self) {
        self.printer = false;
    }
}

impl Engine for FakeEngine {
    fn advance(&mut self, hooks: &mut dyn EngineHooks) {
        loop {
            if self.break_requested || self.stepping || self.breakpoints.contains(&self.pc) {
                self.break_requested = false;
                loop {
                    match hooks.input_requested(self) {
                        DebuggerCommand::Continue | DebuggerCommand::Finish => {
                            self.stepping = false;
                            break;
                        }
                        DebuggerCommand::Step | DebuggerCommand::Next => {
                            self.stepping = true;
                            break;
                        }
                        DebuggerCommand::Other(text) => {
                            self.debugger_execute(&text);
                        }
                    }
                }
            }

            let (panic_at, delay) = {
                let witness = self.witness.lock().unwrap();
                (witness.panic_at, witness.instruction_delay)
            };
            if panic_at == Some(self.pc) {
                panic!("scripted engine fault at ${:04X}", self.pc);
            }
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }

            self.execute_one();
            self.instructions_in_frame += 1;
            if self.instructions_in_frame == INSTRUCTIONS_PER_FRAME {
                self.instructions_in_frame = 0;
                self.finish_frame(hooks);
                return;
            }
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn built_in_boot_roms() -> BuiltInBootRoms {
    BuiltInBootRoms::new()
        .with(BootRomKind::Dmg, vec![0xD0; 16])
        .with(BootRomKind::Cgb, vec![0xC0; 16])
        .with_fast_cgb(vec![0xFA; 16])
}

pub fn new_instance() -> (Arc<Instance<FakeEngine>>, Arc<Mutex<Witness>>) {
    init_logging();
    let witness = Arc::new(Mutex::new(Witness::default()));
    let instance = Instance::new(FakeEngine::new(Arc::clone(&witness)), built_in_boot_roms());
    (Arc::new(instance), witness)
}

/// Polls `condition` for up to five seconds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Game loop on its own thread, stopped and joined on drop.
pub struct RunningLoop {
    instance: Arc<Instance<FakeEngine>>,
    handle: Option<JoinHandle<()>>,
}

impl RunningLoop {
    pub fn start(instance: &Arc<Instance<FakeEngine>>) -> Self {
        let handle = instance.spawn_game_loop();
        wait_until("game loop start", || instance.is_loop_running());
        Self {
            instance: Arc::clone(instance),
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.instance.end_game_loop();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

impl Drop for RunningLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Frames the fake has finished so far.
pub fn frames(witness: &Arc<Mutex<Witness>>) -> u64 {
    witness.lock().unwrap().frames
}
