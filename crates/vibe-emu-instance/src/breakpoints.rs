//! Breakpoint bookkeeping and the pause mailbox.
//!
//! The engine owns the breakpoints that actually stop execution. The
//! registry mirrors every address the instance installed so it can tell a
//! plain breakpoint from one that should start a trace recording.

use std::collections::BTreeMap;

use log::debug;

use crate::engine::{DebuggerCommand, EngineCore};

/// Recording programmed to start the first time execution reaches `address`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakAndTraceSpec {
    pub address: u16,
    /// Snapshots to capture, the one at `address` included.
    pub count: u16,
    /// Step over calls instead of into them.
    pub step_over: bool,
    /// Pause once the last snapshot is captured instead of continuing.
    pub break_when_done: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointEntry {
    Plain,
    Traced(BreakAndTraceSpec),
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    entries: BTreeMap<u16, BreakpointEntry>,
}

impl BreakpointRegistry {
    pub fn add(&mut self, engine: &mut dyn EngineCore, address: u16) {
        self.remove(engine, address);
        self.entries.insert(address, BreakpointEntry::Plain);
        engine.add_breakpoint(address);
    }

    /// Replaces whatever breakpoint was at the spec's address.
    pub fn add_traced(&mut self, engine: &mut dyn EngineCore, spec: BreakAndTraceSpec) {
        self.remove(engine, spec.address);
        self.entries
            .insert(spec.address, BreakpointEntry::Traced(spec));
        engine.add_breakpoint(spec.address);
    }

    /// Removes a plain or traced breakpoint. Missing addresses are ignored.
    pub fn remove(&mut self, engine: &mut dyn EngineCore, address: u16) {
        self.entries.remove(&address);
        if engine.breakpoints().contains(&address) {
            engine.remove_breakpoint(address);
        }
    }

    pub fn clear(&mut self, engine: &mut dyn EngineCore) {
        self.entries.clear();
        engine.clear_breakpoints();
    }

    /// Drops every pending trace spec, keeping plain breakpoints.
    pub fn clear_traced(&mut self, engine: &mut dyn EngineCore) {
        let traced: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, BreakpointEntry::Traced(_)))
            .map(|(&address, _)| address)
            .collect();
        for address in traced {
            self.remove(engine, address);
        }
    }

    /// Removes and returns the trace spec at `address`, along with its engine
    /// breakpoint. Plain breakpoints are left alone.
    pub fn take_traced(
        &mut self,
        engine: &mut dyn EngineCore,
        address: u16,
    ) -> Option<BreakAndTraceSpec> {
        let BreakpointEntry::Traced(spec) = *self.entries.get(&address)? else {
            return None;
        };
        self.remove(engine, address);
        Some(spec)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PauseState {
    #[default]
    Running,
    /// A break was requested and the engine has not stopped yet.
    PendingPause,
    Paused,
}

/// Single-slot mailbox between the paused engine thread and whoever
/// decides how it resumes.
#[derive(Debug, Default)]
pub struct BreakpointController {
    state: PauseState,
    pending: Option<DebuggerCommand>,
}

impl BreakpointController {
    pub fn state(&self) -> PauseState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == PauseState::Paused
    }

    pub fn request_break(&mut self) {
        if self.state == PauseState::Running {
            self.state = PauseState::PendingPause;
        }
    }

    /// The engine stopped and is now waiting for a command.
    pub fn enter_pause(&mut self) {
        debug!("Execution paused for debugger input");
        self.state = PauseState::Paused;
        self.pending = None;
    }

    /// Installs `command` for the paused engine. No-op unless paused.
    pub fn unbreak(&mut self, command: DebuggerCommand) -> bool {
        if self.state != PauseState::Paused {
            return false;
        }
        debug!("Resuming with `{command}`");
        self.pending = Some(command);
        self.state = PauseState::Running;
        true
    }

    pub fn take_command(&mut self) -> Option<DebuggerCommand> {
        self.pending.take()
    }

    pub fn reset(&mut self) {
        self.state = PauseState::Running;
        self.pending = None;
    }
}
