//! Rewind engagement, kept apart from the engine's own history buffer.

/// Tracks whether rewind is engaged and whether history ran out.
#[derive(Debug, Default)]
pub struct RewindState {
    held: bool,
    should_rewind: bool,
    paused: bool,
}

impl RewindState {
    pub fn is_rewinding(&self) -> bool {
        self.held
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Releasing rewind always lifts the exhaustion pause.
    pub fn set_rewind(&mut self, enabled: bool) {
        self.held = enabled;
        if !enabled {
            self.paused = false;
            self.should_rewind = false;
        }
    }

    /// Latched once per vblank.
    pub fn on_vblank(&mut self) {
        self.should_rewind = self.held;
    }

    /// Consumes the latched request, popping engine history through `pop`.
    /// The first pop discards the frame on screen, the second lands on the
    /// state before it. Returns `true` when the engine should not advance
    /// this iteration.
    pub fn apply(&mut self, mut pop: impl FnMut() -> bool) -> bool {
        if self.paused {
            return true;
        }
        if !std::mem::take(&mut self.should_rewind) {
            return false;
        }

        pop();
        if !pop() {
            self.paused = true;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.should_rewind = false;
        self.paused = false;
    }
}
