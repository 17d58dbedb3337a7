use std::time::{Duration, Instant};

/// Number of frame intervals averaged into one frame-rate reading.
pub const FRAME_RATE_WINDOW: usize = 30;

/// Realized frame rate over a fixed window of vblank intervals.
///
/// The reading only updates once per full window, so it stays stable enough
/// to display.
#[derive(Debug)]
pub struct FrameRateMeter {
    frame_times: [f64; FRAME_RATE_WINDOW],
    index: usize,
    last_frame: Instant,
    frame_rate: f64,
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl FrameRateMeter {
    pub fn new(now: Instant) -> Self {
        Self {
            frame_times: [0.0; FRAME_RATE_WINDOW],
            index: 0,
            last_frame: now,
            frame_rate: 0.0,
        }
    }

    /// Restarts the window. The last reading is kept.
    pub fn reset(&mut self, now: Instant) {
        self.index = 0;
        self.last_frame = now;
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn record_frame(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_frame);
        self.frame_times[self.index] = elapsed.as_micros() as f64 / 1_000_000.0;
        self.last_frame = now;

        self.index = (self.index + 1) % FRAME_RATE_WINDOW;
        if self.index == 0 {
            let total: f64 = self.frame_times.iter().sum();
            if total > 0.0 {
                self.frame_rate = FRAME_RATE_WINDOW as f64 / total;
            }
        }
    }
}

/// Wall-clock limiter for turbo mode. The engine runs uncapped in turbo, so
/// each frame waits for a deadline derived from the nominal rate.
#[derive(Debug)]
pub struct TurboPacer {
    enabled: bool,
    ratio: f64,
    next_frame: Instant,
}

impl Default for TurboPacer {
    fn default() -> Self {
        Self {
            enabled: false,
            ratio: 1.0,
            next_frame: Instant::now(),
        }
    }
}

impl TurboPacer {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Non-positive or non-finite ratios fall back to native speed.
    pub fn configure(&mut self, enabled: bool, ratio: f64) {
        self.enabled = enabled;
        self.ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            1.0
        };
    }

    pub fn deadline(&self) -> Instant {
        self.next_frame
    }

    /// Sets the next deadline to one turbo frame after `now`.
    pub fn schedule(&mut self, now: Instant, usual_frame_rate: f64) {
        self.next_frame = now + self.frame_interval(usual_frame_rate);
    }

    pub fn frame_interval(&self, usual_frame_rate: f64) -> Duration {
        if !(usual_frame_rate.is_finite() && usual_frame_rate > 0.0) {
            return Duration::ZERO;
        }
        let micros = 1_000_000.0 / usual_frame_rate / self.ratio;
        Duration::from_micros(micros as u64)
    }
}
