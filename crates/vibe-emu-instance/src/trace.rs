//! Break-and-trace recording.
//!
//! A session starts when execution reaches a traced breakpoint and captures
//! one register snapshot per instruction until its count runs out or a
//! regular breakpoint interrupts it. Closed sessions queue up in the order
//! they closed until a reader pops them.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::breakpoints::BreakAndTraceSpec;
use crate::engine::{
    DebuggerCommand, EngineCore, FLAG_CARRY, FLAG_HALF_CARRY, FLAG_SUBTRACT, FLAG_ZERO, Register,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    pub carry: bool,
    pub half_carry: bool,
    pub subtract: bool,
    pub zero: bool,
}

impl From<u8> for Flags {
    fn from(f: u8) -> Self {
        Self {
            carry: f & FLAG_CARRY != 0,
            half_carry: f & FLAG_HALF_CARRY != 0,
            subtract: f & FLAG_SUBTRACT != 0,
            zero: f & FLAG_ZERO != 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceSnapshot {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub f: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
    pub flags: Flags,
    /// Disassembly of the instruction at `pc`, first line only.
    pub disassembly: String,
    pub step_over: bool,
}

impl TraceSnapshot {
    pub fn capture(engine: &mut dyn EngineCore, step_over: bool) -> Self {
        let byte = |register| engine.register(register) as u8;
        let (a, b, c, d, e, f, h, l) = (
            byte(Register::A),
            byte(Register::B),
            byte(Register::C),
            byte(Register::D),
            byte(Register::E),
            byte(Register::F),
            byte(Register::H),
            byte(Register::L),
        );
        let sp = engine.register(Register::SP);
        let pc = engine.register(Register::PC);
        let disassembly = engine
            .disassemble(pc, 1)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_owned();

        Self {
            a,
            b,
            c,
            d,
            e,
            f,
            h,
            l,
            sp,
            pc,
            flags: Flags::from(f),
            disassembly,
            step_over,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceSession {
    pub address: u16,
    pub snapshots: Vec<TraceSnapshot>,
    remaining: u16,
    step_over: bool,
    break_when_done: bool,
    closed: bool,
}

impl TraceSession {
    fn new(spec: BreakAndTraceSpec) -> Self {
        Self {
            address: spec.address,
            snapshots: Vec::new(),
            remaining: spec.count,
            step_over: spec.step_over,
            break_when_done: spec.break_when_done,
            closed: spec.count == 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the session stopped before capturing every snapshot.
    pub fn was_cut_short(&self) -> bool {
        self.closed && self.remaining > 0
    }
}

/// What the engine should do after a traced instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceStep {
    Resume(DebuggerCommand),
    /// Recording finished with a pause requested.
    Pause,
}

#[derive(Debug, Default)]
pub struct TraceRecorder {
    sessions: VecDeque<TraceSession>,
}

impl TraceRecorder {
    /// A session is open and owns the engine's next input request.
    pub fn is_tracing(&self) -> bool {
        self.sessions.back().is_some_and(|session| !session.closed)
    }

    /// Opens a session. A zero-count spec closes straight away, resolving
    /// to the step returned here.
    pub fn begin(&mut self, spec: BreakAndTraceSpec) -> Option<TraceStep> {
        self.interrupt();
        debug!(
            "Tracing {} instruction(s) from ${:04X}",
            spec.count, spec.address
        );
        let session = TraceSession::new(spec);
        let finished = session.closed.then(|| Self::finish_step(&session));
        self.sessions.push_back(session);
        finished
    }

    /// Closes the open session early, e.g. when a breakpoint is hit mid-trace.
    pub fn interrupt(&mut self) {
        if let Some(session) = self.sessions.back_mut().filter(|s| !s.closed) {
            debug!(
                "Trace from ${:04X} interrupted with {} snapshot(s) left",
                session.address, session.remaining
            );
            session.closed = true;
        }
    }

    /// Appends a snapshot to the open session. Returns `None` when no
    /// session is open.
    pub fn record(&mut self, mut snapshot: TraceSnapshot) -> Option<TraceStep> {
        let session = self.sessions.back_mut().filter(|s| !s.closed)?;
        snapshot.step_over = session.step_over;
        trace!("${:04X}: {}", snapshot.pc, snapshot.disassembly);
        session.snapshots.push(snapshot);
        session.remaining -= 1;

        if session.remaining == 0 {
            session.closed = true;
            return Some(Self::finish_step(session));
        }
        Some(TraceStep::Resume(if session.step_over {
            DebuggerCommand::Next
        } else {
            DebuggerCommand::Step
        }))
    }

    /// Snapshots the engine into the open session.
    pub fn capture(&mut self, engine: &mut dyn EngineCore) -> Option<TraceStep> {
        let step_over = self.sessions.back()?.step_over;
        self.record(TraceSnapshot::capture(engine, step_over))
    }

    fn finish_step(session: &TraceSession) -> TraceStep {
        if session.break_when_done {
            TraceStep::Pause
        } else {
            TraceStep::Resume(DebuggerCommand::Continue)
        }
    }

    pub fn results_ready(&self) -> bool {
        self.sessions.front().is_some_and(TraceSession::is_closed)
    }

    /// Oldest closed session, if any.
    pub fn pop(&mut self) -> Option<TraceSession> {
        if self.results_ready() {
            self.sessions.pop_front()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
