use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer / single-consumer ring of stereo i16 frames.
///
/// The instance thread produces, the device callback consumes, and neither
/// takes a lock. The ring is lossy: frames pushed while it is full are
/// dropped.
///
/// Neither handle is `Clone`; share the consumer behind an `Arc` when a
/// callback may have to be rebuilt.
pub struct AudioProducer {
    ring: Arc<Ring>,
}

pub struct AudioConsumer {
    ring: Arc<Ring>,
}

struct Ring {
    // One spare slot so head == tail always means empty.
    slots: Box<[UnsafeCell<MaybeUninit<[i16; 2]>>]>,
    cap: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Only the producer writes `slots[head]`, only the consumer reads
// `slots[tail]`, and ownership of a slot changes hands through the atomics.
unsafe impl Sync for Ring {}

impl Ring {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head >= tail {
            head - tail
        } else {
            self.cap - tail + head
        }
    }

    fn capacity_frames(&self) -> usize {
        self.cap - 1
    }

    #[inline]
    fn next_index(&self, idx: usize) -> usize {
        let next = idx + 1;
        if next == self.cap { 0 } else { next }
    }
}

pub fn audio_queue(capacity_frames: usize) -> (AudioProducer, AudioConsumer) {
    let cap = capacity_frames.saturating_add(1).max(2);
    let slots = (0..cap)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();

    let ring = Arc::new(Ring {
        slots,
        cap,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    (
        AudioProducer {
            ring: Arc::clone(&ring),
        },
        AudioConsumer { ring },
    )
}

impl AudioProducer {
    /// Returns `false` when the ring is full and the frame was dropped.
    #[inline]
    pub fn push(&self, left: i16, right: i16) -> bool {
        let head = self.ring.head.load(Ordering::Relaxed);
        let next = self.ring.next_index(head);
        if next == self.ring.tail.load(Ordering::Acquire) {
            return false;
        }

        unsafe {
            (*self.ring.slots[head].get()).write([left, right]);
        }
        self.ring.head.store(next, Ordering::Release);
        true
    }

    /// Pushes interleaved left/right samples until the ring fills up.
    /// A trailing unpaired sample is ignored. Returns the frames accepted.
    pub fn push_interleaved(&self, samples: &[i16]) -> usize {
        samples
            .chunks_exact(2)
            .take_while(|frame| self.push(frame[0], frame[1]))
            .count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.ring.capacity_frames()
    }
}

impl AudioConsumer {
    #[inline]
    pub fn pop(&self) -> Option<(i16, i16)> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        if tail == self.ring.head.load(Ordering::Acquire) {
            return None;
        }

        let frame = unsafe { (*self.ring.slots[tail].get()).assume_init_read() };
        self.ring
            .tail
            .store(self.ring.next_index(tail), Ordering::Release);
        Some((frame[0], frame[1]))
    }

    /// Discards everything queued so far. Returns the frames dropped.
    pub fn drain(&self) -> usize {
        let head = self.ring.head.load(Ordering::Acquire);
        let dropped = self.ring.len();
        self.ring.tail.store(head, Ordering::Release);
        dropped
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity_frames(&self) -> usize {
        self.ring.capacity_frames()
    }
}
