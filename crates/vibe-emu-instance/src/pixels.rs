//! Triple-buffered frame storage.
//!
//! Three equal-sized slots rotate through the `work`, `previous` and
//! `previous_second` roles. Only the roles ever move; slot contents are
//! written in place by the engine (through the work role) and copied out by
//! readers.

use log::warn;
use serde::{Deserialize, Serialize};

/// Which completed frames `read` hands to the reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PixelBufferMode {
    /// The frame the engine is drawing right now. Lowest latency, but tears.
    Single,
    /// The last completed frame.
    #[default]
    Double,
    /// Per-channel average of the last two completed frames.
    DoubleBlend,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    First,
    Second,
    Third,
}

impl Slot {
    const fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
            Slot::Third => 2,
        }
    }

    const fn next(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::Third,
            Slot::Third => Slot::First,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Roles {
    work: Slot,
    previous: Slot,
    previous_second: Slot,
}

impl Roles {
    const INITIAL: Roles = Roles {
        work: Slot::First,
        previous: Slot::Third,
        previous_second: Slot::Second,
    };

    /// `previous_second <- previous`, `previous <- work`, `work <- work + 1`.
    const fn rotated(self) -> Roles {
        Roles {
            work: self.work.next(),
            previous: self.work,
            previous_second: self.previous,
        }
    }
}

#[derive(Debug)]
pub struct PixelBufferSet {
    slots: [Vec<u32>; 3],
    roles: Roles,
    width: u32,
    height: u32,
    mode: PixelBufferMode,
}

impl PixelBufferSet {
    pub fn new(width: u32, height: u32) -> Self {
        let mut set = Self {
            slots: Default::default(),
            roles: Roles::INITIAL,
            width: 0,
            height: 0,
            mode: PixelBufferMode::default(),
        };
        set.resize(width, height);
        set
    }

    /// Re-sizes and zero-fills every slot. Roles restart from their initial
    /// assignment, so nothing read afterwards predates the resize.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        let len = width as usize * height as usize;
        for slot in &mut self.slots {
            slot.clear();
            slot.resize(len, 0);
        }
        self.roles = Roles::INITIAL;
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Slot size in 32-bit pixels.
    pub fn len(&self) -> usize {
        self.slots[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mode(&self) -> PixelBufferMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PixelBufferMode) {
        self.mode = mode;
    }

    /// Engine-side write into the work slot. Pixels past the end of the
    /// slot are dropped.
    pub fn write_work(&mut self, offset: usize, pixels: &[u32]) {
        let work = &mut self.slots[self.roles.work.index()];
        if offset >= work.len() {
            warn!(
                "Dropping {} pixels written at offset {offset} past a {} pixel frame",
                pixels.len(),
                work.len()
            );
            return;
        }
        let end = (offset + pixels.len()).min(work.len());
        work[offset..end].copy_from_slice(&pixels[..end - offset]);
    }

    /// Called once per vblank.
    pub fn rotate(&mut self) {
        self.roles = self.roles.rotated();
    }

    /// Copies the frame selected by the current mode into `destination`.
    ///
    /// Returns `false` without writing anything if `destination` is not
    /// exactly one frame long.
    pub fn read(&self, destination: &mut [u32]) -> bool {
        if destination.len() != self.len() {
            return false;
        }

        match self.mode {
            PixelBufferMode::Single => {
                destination.copy_from_slice(&self.slots[self.roles.work.index()]);
            }
            PixelBufferMode::Double => {
                destination.copy_from_slice(&self.slots[self.roles.previous.index()]);
            }
            PixelBufferMode::DoubleBlend => {
                let older = &self.slots[self.roles.previous_second.index()];
                destination.copy_from_slice(&self.slots[self.roles.previous.index()]);
                for (dst, &src) in destination.iter_mut().zip(older.iter()) {
                    *dst = blend(*dst, src);
                }
            }
        }
        true
    }
}

/// Byte-wise `(a + b) / 2` across all four channels.
#[inline]
fn blend(a: u32, b: u32) -> u32 {
    let a = a.to_le_bytes();
    let b = b.to_le_bytes();
    let mut out = [0u8; 4];
    for ((dst, x), y) in out.iter_mut().zip(a).zip(b) {
        *dst = ((x as u16 + y as u16) / 2) as u8;
    }
    u32::from_le_bytes(out)
}
