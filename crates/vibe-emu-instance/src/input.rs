use crate::engine::Buttons;

pub const DEFAULT_RAPID_SWITCH_FRAMES: u32 = 2;

/// Held buttons plus a rapid-fire subset that toggles on a vblank cadence.
#[derive(Debug)]
pub struct ButtonState {
    held: Buttons,
    rapid: Buttons,
    switch_frames: u32,
    frames_until_switch: u32,
    rapid_down: bool,
}

impl Default for ButtonState {
    fn default() -> Self {
        Self {
            held: Buttons::NONE,
            rapid: Buttons::NONE,
            switch_frames: DEFAULT_RAPID_SWITCH_FRAMES,
            frames_until_switch: DEFAULT_RAPID_SWITCH_FRAMES,
            rapid_down: true,
        }
    }
}

impl ButtonState {
    pub fn held(&self) -> Buttons {
        self.held
    }

    pub fn rapid(&self) -> Buttons {
        self.rapid
    }

    pub fn set_held(&mut self, button: Buttons, pressed: bool) {
        self.held.set(button, pressed);
    }

    pub fn set_held_mask(&mut self, mask: Buttons) {
        self.held = mask;
    }

    /// Adding the first rapid button restarts the cadence in the pressed phase.
    pub fn set_rapid(&mut self, button: Buttons, pressed: bool) {
        if pressed && self.rapid.is_empty() {
            self.rapid_down = true;
            self.frames_until_switch = self.switch_frames;
        }
        self.rapid.set(button, pressed);
    }

    pub fn switch_frames(&self) -> u32 {
        self.switch_frames
    }

    /// Zero is treated as one so the cadence always advances.
    pub fn set_switch_frames(&mut self, frames: u32) {
        self.switch_frames = frames.max(1);
        self.frames_until_switch = self.frames_until_switch.min(self.switch_frames);
    }

    pub fn clear(&mut self) {
        self.held = Buttons::NONE;
        self.rapid = Buttons::NONE;
        self.rapid_down = true;
        self.frames_until_switch = self.switch_frames;
    }

    pub fn on_vblank(&mut self) {
        if self.rapid.is_empty() {
            return;
        }
        self.frames_until_switch -= 1;
        if self.frames_until_switch == 0 {
            self.rapid_down = !self.rapid_down;
            self.frames_until_switch = self.switch_frames;
        }
    }

    /// Mask handed to the engine before each advance.
    pub fn effective(&self) -> Buttons {
        if self.rapid_down {
            self.held | self.rapid
        } else {
            self.held
        }
    }
}
