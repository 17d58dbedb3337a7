//! The instance: one emulation engine shared between a dedicated run-loop
//! thread and any number of front-end threads.
//!
//! Three locks guard it, always taken in the order primary, then pixels or
//! printer:
//!
//! * the primary lock holds the engine and almost all mutable state;
//! * the pixel lock holds only the frame buffers and frame-rate meter, so a
//!   display refresh never waits behind an engine advance;
//! * the printer lock holds only queued printer pages.
//!
//! While the run loop advances the engine, the engine is moved out of the
//! primary lock and the loop's hooks hold the guard. When the engine stops
//! for debugger input the guard is released for real and the loop polls for
//! a command every 10 ms. Front-end calls that need the engine during that
//! window are queued as jobs and run by the polling thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use log::{debug, error, info, warn};

use crate::audio::{AudioPipeline, AudioSink};
use crate::breakpoints::{BreakAndTraceSpec, BreakpointController, BreakpointRegistry};
use crate::config::InstanceConfig;
use crate::engine::{
    BacktraceEntry, Buttons, DebuggerCommand, Engine, EngineCore, EngineHooks, MemoryRegion,
    Register, RomImage, StereoSample,
};
use crate::error::{AudioError, InstanceError};
use crate::hardware::{BootRomKind, BorderMode, Model};
use crate::input::ButtonState;
use crate::pacing::{FrameRateMeter, TurboPacer};
use crate::persistence::{BootRomSelector, BuiltInBootRoms, ModelBookkeeping};
use crate::pixels::{PixelBufferMode, PixelBufferSet};
use crate::printer::{PrintedPage, PrinterFeed};
use crate::rewind::RewindState;
use crate::trace::{TraceRecorder, TraceSession, TraceStep};

/// Sleep between polls while idle-paused or waiting at a breakpoint.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long the run loop stands aside after releasing the primary lock
/// while other threads are queued on it.
const CONTENDER_GRACE: Duration = Duration::from_millis(1);
/// Below this, a speed multiplier pauses instead of being applied.
const MIN_SPEED_MULTIPLIER: f64 = 0.001;

const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const DEFAULT_AUDIO_BUFFER_SIZE: usize = 1024;

type EngineJob = Box<dyn FnOnce(&mut dyn EngineCore, &mut CoreState) + Send>;

/// Everything behind the primary lock except the engine itself.
struct CoreState {
    manual_paused: bool,
    zero_speed_paused: bool,
    loop_finishing: bool,
    rom_loaded: bool,
    vblank_hit: bool,
    border_mode: BorderMode,
    rumble: f64,

    audio: AudioPipeline,
    requested_sample_rate: u32,
    audio_buffer_size: usize,

    turbo: TurboPacer,
    buttons: ButtonState,
    rewind: RewindState,

    breakpoints: BreakpointRegistry,
    controller: BreakpointController,
    tracer: TraceRecorder,

    boot_roms: BootRomSelector,
    models: ModelBookkeeping,

    engine_jobs: Vec<EngineJob>,
}

impl CoreState {
    fn new(boot_roms: BuiltInBootRoms) -> Self {
        let mut audio = AudioPipeline::default();
        audio.set_sample_rate(DEFAULT_SAMPLE_RATE);
        Self {
            manual_paused: false,
            zero_speed_paused: false,
            loop_finishing: false,
            rom_loaded: false,
            vblank_hit: false,
            border_mode: BorderMode::default(),
            rumble: 0.0,
            audio,
            requested_sample_rate: DEFAULT_SAMPLE_RATE,
            audio_buffer_size: DEFAULT_AUDIO_BUFFER_SIZE,
            turbo: TurboPacer::default(),
            buttons: ButtonState::default(),
            rewind: RewindState::default(),
            breakpoints: BreakpointRegistry::default(),
            controller: BreakpointController::default(),
            tracer: TraceRecorder::default(),
            boot_roms: BootRomSelector::new(boot_roms),
            models: ModelBookkeeping::default(),
            engine_jobs: Vec::new(),
        }
    }

    /// Paused in a way that keeps the run loop from advancing at all.
    fn is_idle_paused(&self) -> bool {
        self.manual_paused || self.zero_speed_paused || self.rewind.is_paused()
    }

    /// Resets the engine, going back to the user's model if a save state
    /// switched it. Returns the screen size when the model changed.
    fn reset_engine(&mut self, engine: &mut dyn EngineCore) -> Option<(u32, u32)> {
        self.audio.reset();
        self.rewind.reset();
        match self.models.take_original() {
            Some(original) => {
                info!("Restoring model {original:?}");
                self.boot_roms.install(engine, original);
                engine.switch_model_and_reset(original);
                Some(engine.screen_size())
            }
            None => {
                let model = engine.model();
                self.boot_roms.install(engine, model);
                engine.reset();
                None
            }
        }
    }

    fn run_jobs(&mut self, engine: &mut dyn EngineCore) {
        while !self.engine_jobs.is_empty() {
            for job in std::mem::take(&mut self.engine_jobs) {
                job(engine, self);
            }
        }
    }
}

struct Primary<E> {
    /// `None` while the run loop is advancing the engine.
    engine: Option<E>,
    state: CoreState,
}

struct FrameState {
    buffers: PixelBufferSet,
    meter: FrameRateMeter,
}

#[derive(Clone, Copy)]
enum ImageKind {
    Rom,
    Isx,
}

pub struct Instance<E: Engine> {
    primary: Mutex<Primary<E>>,
    pixels: Mutex<FrameState>,
    printer: Mutex<PrinterFeed>,
    loop_running: AtomicBool,
    contenders: AtomicUsize,
}

impl<E: Engine> Instance<E> {
    pub fn new(mut engine: E, boot_roms: BuiltInBootRoms) -> Self {
        engine.set_sample_rate(DEFAULT_SAMPLE_RATE);
        let (width, height) = engine.screen_size();
        Self {
            primary: Mutex::new(Primary {
                engine: Some(engine),
                state: CoreState::new(boot_roms),
            }),
            pixels: Mutex::new(FrameState {
                buffers: PixelBufferSet::new(width, height),
                meter: FrameRateMeter::default(),
            }),
            printer: Mutex::new(PrinterFeed::default()),
            loop_running: AtomicBool::new(false),
            contenders: AtomicUsize::new(0),
        }
    }

    fn lock_primary(&self) -> MutexGuard<'_, Primary<E>> {
        self.contenders.fetch_add(1, Ordering::AcqRel);
        let guard = self.primary.lock().unwrap_or_else(PoisonError::into_inner);
        self.contenders.fetch_sub(1, Ordering::AcqRel);
        guard
    }

    /// Busy-retries instead of parking. Keeps input-to-output latency low
    /// while running at the cost of one spinning core.
    fn spin_lock_primary(&self) -> MutexGuard<'_, Primary<E>> {
        loop {
            match self.primary.try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => std::hint::spin_loop(),
            }
        }
    }

    fn lock_pixels(&self) -> MutexGuard<'_, FrameState> {
        self.pixels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_printer(&self) -> MutexGuard<'_, PrinterFeed> {
        self.printer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        f(&mut self.lock_primary().state)
    }

    /// Runs `f` against the engine. If the run loop is holding the engine at
    /// a breakpoint, `f` is handed to it and this call blocks until it ran.
    fn with_engine<R, F>(&self, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn EngineCore, &mut CoreState) -> R + Send + 'static,
    {
        let mut guard = self.lock_primary();
        let Primary { engine, state } = &mut *guard;
        if let Some(engine) = engine.as_mut() {
            return f(engine, state);
        }

        // A panicking run loop takes the engine down with it.
        assert!(
            self.loop_running.load(Ordering::Acquire),
            "engine lost: the game loop exited while holding it"
        );

        let (tx, rx) = cb::bounded(1);
        state.engine_jobs.push(Box::new(
            move |engine: &mut dyn EngineCore, state: &mut CoreState| {
                let _ = tx.send(f(engine, state));
            },
        ));
        drop(guard);
        // Jobs only go away by running; the queue outlives `&self`.
        rx.recv().expect("engine job dropped before it ran")
    }

    fn resize_pixels(&self, (width, height): (u32, u32)) {
        self.lock_pixels().buffers.resize(width, height);
    }

    fn resize_pixels_if_changed(&self, (width, height): (u32, u32)) {
        let mut frame = self.lock_pixels();
        if frame.buffers.dimensions() != (width, height) {
            frame.buffers.resize(width, height);
        }
    }

    /// Stands aside briefly so threads blocked on the primary lock get it
    /// before the run loop's next spin grabs it again.
    fn yield_to_contenders(&self) {
        let start = Instant::now();
        while self.contenders.load(Ordering::Acquire) > 0 && start.elapsed() < CONTENDER_GRACE {
            thread::yield_now();
        }
    }

    // ---- run loop ----------------------------------------------------------

    /// Drives the engine until [`Instance::end_game_loop`] is called.
    ///
    /// Starting a second loop on the same instance aborts the process.
    pub fn start_game_loop(&self) {
        if self.loop_running.swap(true, Ordering::AcqRel) {
            error!("Game loop started on an instance whose loop is already running");
            std::process::abort();
        }
        let _running = LoopRunningGuard(&self.loop_running);
        info!("Game loop started");
        self.lock_pixels().meter.reset(Instant::now());

        loop {
            let mut guard = self.spin_lock_primary();
            if guard.state.loop_finishing {
                break;
            }

            let Some(mut engine) = guard.engine.take() else {
                error!("Engine missing from an idle instance; stopping the game loop");
                break;
            };
            guard.state.run_jobs(&mut engine);

            if guard.state.is_idle_paused() {
                guard.engine = Some(engine);
                drop(guard);
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            let hold = guard.state.rewind.apply(|| engine.rewind_pop());
            if !hold {
                engine.set_buttons(guard.state.buttons.effective());
                let mut hooks = LoopHooks {
                    instance: self,
                    primary: Some(guard),
                };
                engine.advance(&mut hooks);
                guard = hooks.into_guard();
            }

            guard.state.run_jobs(&mut engine);
            let usual_frame_rate = engine.usual_frame_rate();
            guard.engine = Some(engine);

            if std::mem::take(&mut guard.state.vblank_hit) && guard.state.turbo.is_enabled() {
                let deadline = guard.state.turbo.deadline();
                drop(guard);
                while Instant::now() < deadline {
                    std::hint::spin_loop();
                }
                guard = self.spin_lock_primary();
                guard
                    .state
                    .turbo
                    .schedule(Instant::now(), usual_frame_rate);
            }

            if guard.state.loop_finishing {
                break;
            }
            drop(guard);
            self.yield_to_contenders();
        }

        info!("Game loop stopped");
    }

    /// Asks the run loop to stop and waits until it has. Safe to call when
    /// the loop is not running or is already being stopped.
    pub fn end_game_loop(&self) {
        let owner = {
            let mut guard = self.lock_primary();
            if guard.state.loop_finishing {
                false
            } else if self.loop_running.load(Ordering::Acquire) {
                guard.state.loop_finishing = true;
                true
            } else {
                return;
            }
        };

        while self.loop_running.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }

        if owner {
            self.lock_primary().state.loop_finishing = false;
        }
    }

    pub fn is_loop_running(&self) -> bool {
        self.loop_running.load(Ordering::Acquire)
    }

    // ---- loading and reset -------------------------------------------------

    /// Loads a ROM, then the optional battery and symbol files. Transient
    /// state (buttons, traces, audio, frame timing) is reset first, so a
    /// failed load leaves nothing half-loaded behind.
    pub fn load_rom(
        &self,
        image: RomImage,
        sram: Option<PathBuf>,
        symbols: Option<PathBuf>,
    ) -> Result<(), InstanceError> {
        self.load_image(ImageKind::Rom, image, sram, symbols)
    }

    pub fn load_isx(
        &self,
        image: RomImage,
        sram: Option<PathBuf>,
        symbols: Option<PathBuf>,
    ) -> Result<(), InstanceError> {
        self.load_image(ImageKind::Isx, image, sram, symbols)
    }

    fn load_image(
        &self,
        kind: ImageKind,
        image: RomImage,
        sram: Option<PathBuf>,
        symbols: Option<PathBuf>,
    ) -> Result<(), InstanceError> {
        self.lock_pixels().meter.reset(Instant::now());
        let (result, size) = self.with_engine(move |engine, state| {
            state.buttons.clear();
            state.tracer.clear();
            state.breakpoints.clear_traced(engine);
            state.rom_loaded = false;
            state.reset_engine(engine);

            let loaded = match kind {
                ImageKind::Rom => engine.load_rom(&image),
                ImageKind::Isx => engine.load_isx(&image),
            };
            let result = match loaded {
                Ok(()) => {
                    engine.clear_symbols();
                    if let Some(path) = sram {
                        if let Err(e) = engine.load_battery(&path) {
                            warn!("Failed to load battery {}: {e}", path.display());
                        }
                    }
                    if let Some(path) = symbols {
                        if let Err(e) = engine.load_symbols(&path) {
                            warn!("Failed to load symbols {}: {e}", path.display());
                        }
                    }
                    state.rom_loaded = true;
                    info!("Loaded {}", image.describe());
                    Ok(())
                }
                Err(source) => Err(InstanceError::Load {
                    what: image.describe(),
                    source,
                }),
            };
            (result, engine.screen_size())
        });

        self.resize_pixels_if_changed(size);
        result
    }

    pub fn is_rom_loaded(&self) -> bool {
        self.with_state(|state| state.rom_loaded)
    }

    pub fn save_sram(&self, path: impl Into<PathBuf>) -> Result<(), InstanceError> {
        let path = path.into();
        self.with_engine(move |engine, _| {
            engine
                .save_battery(&path)
                .map_err(|source| InstanceError::Battery { path, source })
        })
    }

    pub fn reset(&self) {
        if let Some(size) = self.with_engine(|engine, state| state.reset_engine(engine)) {
            self.resize_pixels(size);
        }
        self.lock_pixels().meter.reset(Instant::now());
    }

    // ---- hardware ----------------------------------------------------------

    /// Switches model and resets. An explicit choice forgets any model a
    /// save state switched away from.
    pub fn set_model(&self, model: Model) {
        let size = self.with_engine(move |engine, state| {
            state.models.clear();
            state.boot_roms.install(engine, model);
            engine.switch_model_and_reset(model);
            state.audio.reset();
            info!("Switched model to {model:?}");
            engine.screen_size()
        });
        self.resize_pixels(size);
    }

    pub fn get_model(&self) -> Model {
        self.with_engine(|engine, _| engine.model())
    }

    pub fn set_border_mode(&self, mode: BorderMode) {
        let size = self.with_engine(move |engine, state| {
            state.border_mode = mode;
            engine.set_border_mode(mode);
            engine.screen_size()
        });
        self.resize_pixels(size);
    }

    pub fn get_border_mode(&self) -> BorderMode {
        self.with_state(|state| state.border_mode)
    }

    pub fn set_boot_rom_path(&self, kind: BootRomKind, path: Option<PathBuf>) {
        self.with_state(|state| state.boot_roms.set_custom_path(kind, path));
    }

    pub fn set_use_fast_boot_rom(&self, fast_boot: bool) {
        self.with_state(|state| state.boot_roms.set_fast_boot(fast_boot));
    }

    // ---- input -------------------------------------------------------------

    pub fn set_button_state(&self, button: Buttons, pressed: bool) {
        self.with_state(|state| state.buttons.set_held(button, pressed));
    }

    pub fn set_buttons(&self, mask: Buttons) {
        self.with_state(|state| state.buttons.set_held_mask(mask));
    }

    pub fn get_buttons(&self) -> Buttons {
        self.with_state(|state| state.buttons.held())
    }

    pub fn set_rapid_button_state(&self, button: Buttons, pressed: bool) {
        self.with_state(|state| state.buttons.set_rapid(button, pressed));
    }

    pub fn set_rapid_button_switch_frames(&self, frames: u32) {
        self.with_state(|state| state.buttons.set_switch_frames(frames));
    }

    // ---- speed and pausing -------------------------------------------------

    /// Multipliers below 0.001 pause emulation rather than reach the engine.
    pub fn set_speed_multiplier(&self, multiplier: f64) {
        self.with_engine(move |engine, state| {
            if multiplier >= MIN_SPEED_MULTIPLIER {
                state.zero_speed_paused = false;
                engine.set_clock_multiplier(multiplier);
            } else {
                state.zero_speed_paused = true;
            }
        });
    }

    pub fn is_paused_from_zero_speed(&self) -> bool {
        self.with_state(|state| state.zero_speed_paused)
    }

    /// In turbo mode the engine runs uncapped and the run loop holds it to
    /// `ratio` times the native frame rate.
    pub fn set_turbo_mode(&self, enabled: bool, ratio: f64) {
        self.with_engine(move |engine, state| {
            engine.set_turbo_mode(enabled);
            state.turbo.configure(enabled, ratio);
            state
                .turbo
                .schedule(Instant::now(), engine.usual_frame_rate());
        });
    }

    pub fn is_turbo_mode(&self) -> bool {
        self.with_state(|state| state.turbo.is_enabled())
    }

    pub fn set_paused_manually(&self, paused: bool) {
        self.with_state(|state| state.manual_paused = paused);
    }

    pub fn is_paused_manually(&self) -> bool {
        self.with_state(|state| state.manual_paused)
    }

    /// Paused manually or at a breakpoint.
    pub fn is_paused(&self) -> bool {
        self.with_state(|state| state.manual_paused || state.controller.is_paused())
    }

    pub fn get_frame_rate(&self) -> f64 {
        self.lock_pixels().meter.frame_rate()
    }

    // ---- audio -------------------------------------------------------------

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.with_state(|state| {
            state.audio.reset();
            state.audio.set_enabled(enabled);
        });
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.with_state(|state| state.audio.is_enabled())
    }

    /// Hands samples to `sink` from now on; the engine is switched to the
    /// sink's sample rate.
    pub fn attach_audio_sink(&self, sink: Box<dyn AudioSink>) {
        self.with_engine(move |engine, state| {
            let sample_rate = sink.sample_rate();
            state.audio.attach_sink(sink);
            engine.set_sample_rate(sample_rate);
            info!("Audio sink attached at {sample_rate} Hz");
        });
    }

    /// Opens a sink with the configured sample rate and buffer size. On
    /// failure the current output is left as it was.
    pub fn set_up_audio_sink<F>(&self, open: F) -> bool
    where
        F: FnOnce(u32, usize) -> Result<Box<dyn AudioSink>, AudioError>,
    {
        let (sample_rate, buffer_size) =
            self.with_state(|state| (state.requested_sample_rate, state.audio_buffer_size));
        match open(sample_rate, buffer_size) {
            Ok(sink) => {
                self.attach_audio_sink(sink);
                true
            }
            Err(e) => {
                warn!("Failed to open audio output: {e}");
                false
            }
        }
    }

    /// Falls back to the polled sample buffer.
    pub fn close_audio_sink(&self) {
        self.with_engine(|engine, state| {
            if state.audio.detach_sink().is_some() {
                info!("Audio sink closed");
                let sample_rate = state.requested_sample_rate;
                state.audio.set_sample_rate(sample_rate);
                engine.set_sample_rate(sample_rate);
            }
        });
    }

    /// Rate used for the polled buffer and the next sink opened.
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.with_engine(move |engine, state| {
            state.requested_sample_rate = sample_rate;
            if !state.audio.has_sink() {
                state.audio.set_sample_rate(sample_rate);
                engine.set_sample_rate(sample_rate);
            }
        });
    }

    pub fn get_current_sample_rate(&self) -> u32 {
        self.with_state(|state| state.audio.sample_rate())
    }

    /// Buffer size of the attached sink, or the size the next one is opened with.
    pub fn get_audio_buffer_size(&self) -> usize {
        self.with_state(|state| {
            state
                .audio
                .sink_buffer_size()
                .unwrap_or(state.audio_buffer_size)
        })
    }

    pub fn set_audio_buffer_size(&self, frames: usize) {
        self.with_state(|state| state.audio_buffer_size = frames.max(1));
    }

    pub fn set_volume(&self, volume: i32) {
        self.with_state(|state| state.audio.set_volume(volume));
    }

    pub fn get_volume(&self) -> i32 {
        self.with_state(|state| state.audio.volume())
    }

    pub fn set_mono_forced(&self, mono: bool) {
        self.with_state(|state| state.audio.set_mono_forced(mono));
    }

    pub fn is_mono_forced(&self) -> bool {
        self.with_state(|state| state.audio.is_mono_forced())
    }

    /// Takes every sample buffered since the last call.
    pub fn get_sample_buffer(&self) -> Vec<i16> {
        self.with_state(|state| state.audio.take_samples())
    }

    /// Moves every buffered sample onto the end of `destination`.
    pub fn transfer_sample_buffer(&self, destination: &mut Vec<i16>) {
        self.with_state(|state| state.audio.drain_into(destination));
    }

    // ---- pixels ------------------------------------------------------------

    pub fn get_dimensions(&self) -> (u32, u32) {
        self.lock_pixels().buffers.dimensions()
    }

    pub fn get_pixel_buffer_size(&self) -> usize {
        self.lock_pixels().buffers.len()
    }

    pub fn set_pixel_buffering_mode(&self, mode: PixelBufferMode) {
        self.lock_pixels().buffers.set_mode(mode);
    }

    pub fn get_pixel_buffering_mode(&self) -> PixelBufferMode {
        self.lock_pixels().buffers.mode()
    }

    /// Copies the current frame into `destination`, which must be exactly
    /// [`Instance::get_pixel_buffer_size`] pixels long.
    pub fn read_pixel_buffer(&self, destination: &mut [u32]) -> bool {
        self.lock_pixels().buffers.read(destination)
    }

    // ---- debugger ----------------------------------------------------------

    pub fn get_breakpoints(&self) -> Vec<u16> {
        self.with_engine(|engine, _| engine.breakpoints())
    }

    pub fn break_at(&self, address: u16) {
        self.with_engine(move |engine, state| state.breakpoints.add(engine, address));
    }

    /// Removes a plain or break-and-trace breakpoint. Repeating it is a no-op.
    pub fn remove_breakpoint(&self, address: u16) {
        self.with_engine(move |engine, state| state.breakpoints.remove(engine, address));
    }

    pub fn remove_all_breakpoints(&self) {
        self.with_engine(|engine, state| state.breakpoints.clear(engine));
    }

    pub fn get_backtrace(&self) -> Vec<BacktraceEntry> {
        self.with_engine(|engine, _| engine.backtrace())
    }

    pub fn get_register_value(&self, register: Register) -> u16 {
        self.with_engine(move |engine, _| engine.register(register))
    }

    pub fn set_register_value(&self, register: Register, value: u16) {
        self.with_engine(move |engine, _| engine.set_register(register, value));
    }

    pub fn read_memory(&self, address: u16) -> u8 {
        self.with_engine(move |engine, _| engine.read_memory(address))
    }

    pub fn write_memory(&self, address: u16, value: u8) {
        self.with_engine(move |engine, _| engine.write_memory(address, value));
    }

    pub fn copy_memory_region(&self, region: MemoryRegion) -> Vec<u8> {
        self.with_engine(move |engine, _| engine.memory_region(region))
    }

    /// `None` when the expression does not evaluate.
    pub fn evaluate_expression(&self, expression: &str) -> Option<u16> {
        let expression = expression.to_owned();
        self.with_engine(move |engine, _| engine.debugger_evaluate(&expression))
    }

    /// Runs a debugger console command and returns what it printed.
    pub fn execute_command(&self, command: &str) -> String {
        let command = command.to_owned();
        self.with_engine(move |engine, _| engine.debugger_execute(&command))
    }

    pub fn disassemble_address(&self, address: u16, count: u8) -> String {
        self.with_engine(move |engine, _| engine.disassemble(address, count))
    }

    /// Stops at the next instruction, unless a trace recording owns it.
    pub fn break_immediately(&self) {
        self.with_engine(|engine, state| {
            if state.tracer.is_tracing() {
                return;
            }
            engine.debugger_break();
            state.controller.request_break();
        });
    }

    /// Resumes a breakpoint pause with `command`. No-op unless paused.
    pub fn unbreak(&self, command: DebuggerCommand) {
        self.with_state(|state| {
            state.controller.unbreak(command);
        });
    }

    pub fn is_paused_from_breakpoint(&self) -> bool {
        self.with_state(|state| state.controller.is_paused())
    }

    /// Records `count` instructions the next time execution reaches
    /// `address`, replacing any breakpoint already there.
    pub fn break_and_trace_at(
        &self,
        address: u16,
        count: u16,
        step_over: bool,
        break_when_done: bool,
    ) {
        let spec = BreakAndTraceSpec {
            address,
            count,
            step_over,
            break_when_done,
        };
        self.with_engine(move |engine, state| state.breakpoints.add_traced(engine, spec));
    }

    pub fn break_and_trace_results_ready(&self) -> bool {
        self.with_state(|state| state.tracer.results_ready())
    }

    /// Oldest finished recording.
    pub fn pop_break_and_trace_results(&self) -> Option<TraceSession> {
        self.with_state(|state| state.tracer.pop())
    }

    // ---- save states -------------------------------------------------------

    pub fn create_save_state(&self) -> Vec<u8> {
        self.with_engine(|engine, _| engine.export_state())
    }

    pub fn create_save_state_to(&self, path: &Path) -> Result<(), InstanceError> {
        let state = self.create_save_state();
        std::fs::write(path, state)?;
        Ok(())
    }

    /// Loads a save state, switching model first if it was made on another
    /// one. The model in use before the first such switch is restored by the
    /// next reset.
    pub fn load_save_state(&self, bytes: Vec<u8>) -> Result<(), InstanceError> {
        let size = self.with_engine(move |engine, state| {
            let current = engine.model();
            if let Some(model) = engine.state_model(&bytes).filter(|&m| m != current) {
                state.models.record_implicit_switch(current);
                state.boot_roms.install(engine, model);
                engine.switch_model_and_reset(model);
            }
            engine
                .import_state(&bytes)
                .map_err(|source| InstanceError::SaveState { source })?;
            state.audio.reset();
            Ok::<_, InstanceError>(engine.screen_size())
        })?;
        self.resize_pixels_if_changed(size);
        Ok(())
    }

    pub fn load_save_state_from(&self, path: &Path) -> Result<(), InstanceError> {
        let bytes = std::fs::read(path)?;
        self.load_save_state(bytes)
    }

    // ---- rewind ------------------------------------------------------------

    /// Resizes the engine's history; this also throws it away.
    pub fn set_rewind_length(&self, seconds: f64) {
        self.with_engine(move |engine, _| engine.set_rewind_length(seconds));
    }

    pub fn set_rewind(&self, enabled: bool) {
        self.with_state(|state| state.rewind.set_rewind(enabled));
    }

    pub fn is_rewinding(&self) -> bool {
        self.with_state(|state| state.rewind.is_rewinding())
    }

    pub fn is_paused_from_rewind(&self) -> bool {
        self.with_state(|state| state.rewind.is_paused())
    }

    // ---- serial ------------------------------------------------------------

    pub fn connect_printer(&self) {
        self.with_engine(|engine, _| engine.connect_printer());
        self.lock_printer().set_connected(true);
    }

    pub fn disconnect_serial(&self) {
        self.with_engine(|engine, _| engine.disconnect_serial());
        self.lock_printer().set_connected(false);
    }

    pub fn is_printer_connected(&self) -> bool {
        self.lock_printer().is_connected()
    }

    pub fn pop_printed_image(&self) -> Option<PrintedPage> {
        self.lock_printer().pop()
    }

    /// Latest rumble amplitude reported by the engine.
    pub fn get_rumble(&self) -> f64 {
        self.with_state(|state| state.rumble)
    }

    // ---- configuration -----------------------------------------------------

    pub fn apply_config(&self, cfg: &InstanceConfig) {
        for kind in BootRomKind::ALL {
            self.set_boot_rom_path(kind, cfg.boot_roms.get(kind).cloned());
        }
        self.set_use_fast_boot_rom(cfg.fast_boot);
        self.set_model(cfg.model);
        self.set_border_mode(cfg.border_mode);
        self.set_pixel_buffering_mode(cfg.pixel_buffer_mode);
        self.set_volume(cfg.volume);
        self.set_mono_forced(cfg.mono);
        self.set_sample_rate(cfg.sample_rate);
        self.set_audio_buffer_size(cfg.audio_buffer_size as usize);
        self.set_rewind_length(cfg.rewind_seconds);
        self.set_turbo_mode(self.is_turbo_mode(), cfg.turbo_ratio);
        self.set_rapid_button_switch_frames(cfg.rapid_button_switch_frames);
    }
}

impl<E: Engine> Instance<E> {
    /// Runs the game loop on a new thread.
    pub fn spawn_game_loop(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let instance = Arc::clone(self);
        thread::spawn(move || instance.start_game_loop())
    }
}

/// Clears the running flag when the loop returns or unwinds.
struct LoopRunningGuard<'a>(&'a AtomicBool);

impl Drop for LoopRunningGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Game loop panicked; the engine is lost");
        }
        self.0.store(false, Ordering::Release);
    }
}

/// Callback context for one engine advance. Holds the primary guard except
/// while parked at a breakpoint.
struct LoopHooks<'a, E: Engine> {
    instance: &'a Instance<E>,
    primary: Option<MutexGuard<'a, Primary<E>>>,
}

impl<'a, E: Engine> LoopHooks<'a, E> {
    fn state(&mut self) -> &mut CoreState {
        let instance = self.instance;
        &mut self
            .primary
            .get_or_insert_with(|| instance.lock_primary())
            .state
    }

    fn into_guard(self) -> MutexGuard<'a, Primary<E>> {
        let instance = self.instance;
        self.primary.unwrap_or_else(|| instance.lock_primary())
    }

    /// Trace handling for one input request. `None` means the engine should
    /// pause for the user.
    fn trace_step(&mut self, engine: &mut dyn EngineCore) -> Option<DebuggerCommand> {
        let pc = engine.register(Register::PC);
        let state = self.state();

        if state.tracer.is_tracing() {
            if engine.breakpoints().contains(&pc) {
                state.tracer.interrupt();
            } else {
                return match state.tracer.capture(engine)? {
                    TraceStep::Resume(command) => Some(command),
                    TraceStep::Pause => None,
                };
            }
        }

        let spec = state.breakpoints.take_traced(engine, pc)?;
        let step = match state.tracer.begin(spec) {
            Some(step) => step,
            None => state.tracer.capture(engine)?,
        };
        match step {
            TraceStep::Resume(command) => Some(command),
            TraceStep::Pause => None,
        }
    }

    /// Parks the engine thread until a command arrives or the loop is
    /// asked to finish. The primary lock is released between polls.
    fn pause(&mut self, engine: &mut dyn EngineCore) -> DebuggerCommand {
        {
            let state = self.state();
            state.audio.reset();
            state.controller.enter_pause();
        }
        self.primary = None;

        loop {
            let mut guard = self.instance.lock_primary();
            let state = &mut guard.state;
            state.run_jobs(engine);

            if state.loop_finishing {
                state.controller.reset();
                self.primary = Some(guard);
                return DebuggerCommand::Continue;
            }
            if let Some(command) = state.controller.take_command() {
                self.primary = Some(guard);
                return command;
            }

            drop(guard);
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl<E: Engine> EngineHooks for LoopHooks<'_, E> {
    fn write_pixels(&mut self, offset: usize, pixels: &[u32]) {
        self.instance
            .lock_pixels()
            .buffers
            .write_work(offset, pixels);
    }

    fn vblank(&mut self) {
        let state = self.state();
        state.vblank_hit = true;
        state.buttons.on_vblank();
        state.rewind.on_vblank();

        let mut frame = self.instance.lock_pixels();
        frame.meter.record_frame(Instant::now());
        frame.buffers.rotate();
    }

    fn sample(&mut self, sample: StereoSample) {
        let state = self.state();
        let turbo = state.turbo.is_enabled();
        state.audio.push(sample, turbo);
    }

    fn log(&mut self, text: &str) {
        let text = text.trim_end();
        if !text.is_empty() {
            info!(target: "engine", "{text}");
        }
    }

    fn rumble(&mut self, amplitude: f64) {
        self.state().rumble = amplitude;
    }

    fn printed_page(&mut self, pixels: &[u32], height: usize) {
        self.instance.lock_printer().push(pixels, height);
    }

    fn input_requested(&mut self, engine: &mut dyn EngineCore) -> DebuggerCommand {
        if let Some(command) = self.trace_step(engine) {
            return command;
        }
        debug!(
            "Breakpoint pause at ${:04X}",
            engine.register(Register::PC)
        );
        self.pause(engine)
    }
}
