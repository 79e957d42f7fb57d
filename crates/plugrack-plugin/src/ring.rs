//! Single-producer/single-consumer byte ring with atomic frame commit.
//!
//! The ring is `#[repr(C)]` so it can live in place inside a shared-memory
//! mapping and be driven from both sides of the bridge. Writes stage bytes
//! at a private cursor and only become visible to the reader at
//! `commit_write`, so a half-written frame is never observable. A failed
//! space acquire poisons the staged frame; the poisoned frame is discarded
//! wholesale at commit time.
//!
//! Contract: exactly one writer and one reader per ring, which is what the
//! bridge channel layout gives us (each ring has a fixed direction).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// RT client ring.
pub const SMALL_RING_SIZE: usize = 4 * 1024;
/// Non-RT client ring.
pub const BIG_RING_SIZE: usize = 16 * 1024;
/// Non-RT server ring.
pub const HUGE_RING_SIZE: usize = 64 * 1024;

#[repr(C)]
pub struct RingBufferData<const N: usize> {
    /// Committed write counter, free-running.
    head: AtomicU32,
    /// Read counter, free-running.
    tail: AtomicU32,
    /// Write cursor including uncommitted bytes. Writer-side only.
    wrtn: AtomicU32,
    /// Non-zero after a failed acquire; the staged frame is poisoned.
    invalidated: AtomicU32,
    buf: UnsafeCell<[u8; N]>,
}

// One writer and one reader per ring; the byte area is only touched through
// the counters' acquire/release pairs.
unsafe impl<const N: usize> Send for RingBufferData<N> {}
unsafe impl<const N: usize> Sync for RingBufferData<N> {}

impl<const N: usize> RingBufferData<N> {
    const SIZE_CHECK: () = assert!(N.is_power_of_two(), "ring size must be a power of two");

    /// Heap-allocate a zeroed ring. Shared-memory users instead cast a
    /// region pointer and call [`init`](Self::init).
    pub fn new_boxed() -> Box<Self> {
        #[allow(clippy::let_unit_value)]
        let _ = Self::SIZE_CHECK;
        let layout = std::alloc::Layout::new::<Self>();
        // Zeroed atomics and a zeroed byte area are exactly the reset state.
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Self;
            assert!(!ptr.is_null(), "ring allocation failed");
            Box::from_raw(ptr)
        }
    }

    /// Reset all cursors. Creator-side, before the peer attaches.
    pub fn init(&self) {
        #[allow(clippy::let_unit_value)]
        let _ = Self::SIZE_CHECK;
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.wrtn.store(0, Ordering::Relaxed);
        self.invalidated.store(0, Ordering::Release);
    }

    #[inline]
    fn mask(pos: u32) -> usize {
        (pos as usize) & (N - 1)
    }

    pub fn is_data_available_for_reading(&self) -> bool {
        self.head.load(Ordering::Acquire) != self.tail.load(Ordering::Relaxed)
    }

    /// Bytes currently committed and unread.
    pub fn readable_len(&self) -> usize {
        self.head
            .load(Ordering::Acquire)
            .wrapping_sub(self.tail.load(Ordering::Relaxed)) as usize
    }

    // -- write side ----------------------------------------------------

    /// Stage bytes after the current frame. Returns false (and poisons the
    /// frame) when the ring lacks space; the writer never blocks.
    pub fn write_bytes(&self, src: &[u8]) -> bool {
        if self.invalidated.load(Ordering::Relaxed) != 0 {
            return false;
        }
        let wrtn = self.wrtn.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let free = N - wrtn.wrapping_sub(tail) as usize;
        if src.len() > free {
            self.invalidated.store(1, Ordering::Relaxed);
            return false;
        }
        let buf = self.buf.get() as *mut u8;
        for (i, &byte) in src.iter().enumerate() {
            let at = Self::mask(wrtn.wrapping_add(i as u32));
            unsafe { buf.add(at).write(byte) };
        }
        self.wrtn
            .store(wrtn.wrapping_add(src.len() as u32), Ordering::Relaxed);
        true
    }

    /// Publish everything staged since the previous commit. A poisoned
    /// frame is discarded instead, and `false` is returned.
    pub fn commit_write(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        if self.invalidated.swap(0, Ordering::Relaxed) != 0 {
            self.wrtn.store(head, Ordering::Relaxed);
            return false;
        }
        let wrtn = self.wrtn.load(Ordering::Relaxed);
        if wrtn != head {
            self.head.store(wrtn, Ordering::Release);
        }
        true
    }

    pub fn write_opcode(&self, opcode: u32) -> bool {
        self.write_u32(opcode)
    }

    pub fn write_u8(&self, v: u8) -> bool {
        self.write_bytes(&[v])
    }

    pub fn write_bool(&self, v: bool) -> bool {
        self.write_u8(u8::from(v))
    }

    pub fn write_i16(&self, v: i16) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    pub fn write_u16(&self, v: u16) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    pub fn write_i32(&self, v: i32) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    pub fn write_u32(&self, v: u32) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    pub fn write_i64(&self, v: i64) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    pub fn write_u64(&self, v: u64) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    pub fn write_f32(&self, v: f32) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    pub fn write_f64(&self, v: f64) -> bool {
        self.write_bytes(&v.to_ne_bytes())
    }

    /// Length-prefixed byte block. Non-RT side only; RT frames carry fixed
    /// payloads.
    pub fn write_custom_data(&self, data: &[u8]) -> bool {
        self.write_u32(data.len() as u32) && self.write_bytes(data)
    }

    pub fn write_str(&self, s: &str) -> bool {
        self.write_custom_data(s.as_bytes())
    }

    // -- read side -----------------------------------------------------

    /// Copy out committed bytes. Returns false without consuming anything
    /// when fewer than `dst.len()` bytes are committed.
    pub fn read_bytes(&self, dst: &mut [u8]) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let avail = self.head.load(Ordering::Acquire).wrapping_sub(tail) as usize;
        if dst.len() > avail {
            return false;
        }
        let buf = self.buf.get() as *const u8;
        for (i, slot) in dst.iter_mut().enumerate() {
            let at = Self::mask(tail.wrapping_add(i as u32));
            *slot = unsafe { buf.add(at).read() };
        }
        self.tail
            .store(tail.wrapping_add(dst.len() as u32), Ordering::Release);
        true
    }

    /// Read the next opcode, or `0` (the Null opcode) when the ring is
    /// empty.
    pub fn read_opcode(&self) -> u32 {
        self.read_u32().unwrap_or(0)
    }

    pub fn read_u8(&self) -> Option<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b).then_some(b[0])
    }

    pub fn read_bool(&self) -> Option<bool> {
        self.read_u8().map(|v| v != 0)
    }

    pub fn read_i16(&self) -> Option<i16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b).then(|| i16::from_ne_bytes(b))
    }

    pub fn read_u16(&self) -> Option<u16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b).then(|| u16::from_ne_bytes(b))
    }

    pub fn read_i32(&self) -> Option<i32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b).then(|| i32::from_ne_bytes(b))
    }

    pub fn read_u32(&self) -> Option<u32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b).then(|| u32::from_ne_bytes(b))
    }

    pub fn read_i64(&self) -> Option<i64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b).then(|| i64::from_ne_bytes(b))
    }

    pub fn read_u64(&self) -> Option<u64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b).then(|| u64::from_ne_bytes(b))
    }

    pub fn read_f32(&self) -> Option<f32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b).then(|| f32::from_ne_bytes(b))
    }

    pub fn read_f64(&self) -> Option<f64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b).then(|| f64::from_ne_bytes(b))
    }

    pub fn read_custom_data(&self) -> Option<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > N {
            return None;
        }
        let mut data = vec![0u8; len];
        self.read_bytes(&mut data).then_some(data)
    }

    pub fn read_str(&self) -> Option<String> {
        let data = self.read_custom_data()?;
        String::from_utf8(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    type TestRing = RingBufferData<1024>;

    #[test]
    fn typed_roundtrip() {
        let ring = TestRing::new_boxed();
        assert!(ring.write_opcode(7));
        assert!(ring.write_u8(0xAB));
        assert!(ring.write_i16(-123));
        assert!(ring.write_u32(0xDEADBEEF));
        assert!(ring.write_i64(-1));
        assert!(ring.write_f32(0.25));
        assert!(ring.write_f64(std::f64::consts::PI));
        assert!(ring.write_bool(true));
        assert!(ring.write_str("hello"));
        assert!(ring.commit_write());

        assert_eq!(ring.read_opcode(), 7);
        assert_eq!(ring.read_u8(), Some(0xAB));
        assert_eq!(ring.read_i16(), Some(-123));
        assert_eq!(ring.read_u32(), Some(0xDEADBEEF));
        assert_eq!(ring.read_i64(), Some(-1));
        assert_eq!(ring.read_f32(), Some(0.25));
        assert_eq!(ring.read_f64(), Some(std::f64::consts::PI));
        assert_eq!(ring.read_bool(), Some(true));
        assert_eq!(ring.read_str().as_deref(), Some("hello"));
        assert!(!ring.is_data_available_for_reading());
    }

    #[test]
    fn uncommitted_frames_are_invisible() {
        let ring = TestRing::new_boxed();
        assert!(ring.write_u32(1));
        assert!(ring.write_u32(2));
        assert!(!ring.is_data_available_for_reading());
        assert_eq!(ring.read_u32(), None);
        assert!(ring.commit_write());
        assert_eq!(ring.read_u32(), Some(1));
        assert_eq!(ring.read_u32(), Some(2));
    }

    #[test]
    fn overflow_poisons_the_whole_frame() {
        let ring = TestRing::new_boxed();
        assert!(ring.write_u32(42));
        // Larger than the ring: the acquire fails and the staged frame dies.
        let big = vec![0u8; 2048];
        assert!(!ring.write_bytes(&big));
        // Further writes into the poisoned frame are refused too.
        assert!(!ring.write_u32(43));
        assert!(!ring.commit_write());
        assert!(!ring.is_data_available_for_reading());
        // The ring recovers for the next frame.
        assert!(ring.write_u32(44));
        assert!(ring.commit_write());
        assert_eq!(ring.read_u32(), Some(44));
    }

    #[test]
    fn wraps_around_the_byte_area() {
        let ring = RingBufferData::<64>::new_boxed();
        for round in 0..100u32 {
            assert!(ring.write_u32(round));
            assert!(ring.write_u32(round.wrapping_mul(3)));
            assert!(ring.commit_write());
            assert_eq!(ring.read_u32(), Some(round));
            assert_eq!(ring.read_u32(), Some(round.wrapping_mul(3)));
        }
    }

    #[test]
    fn short_read_consumes_nothing() {
        let ring = TestRing::new_boxed();
        ring.write_u16(7);
        ring.commit_write();
        assert_eq!(ring.read_u32(), None);
        assert_eq!(ring.read_u16(), Some(7));
    }

    proptest::proptest! {
        #[test]
        fn arbitrary_byte_frames_roundtrip(frames in proptest::collection::vec(
            proptest::collection::vec(proptest::prelude::any::<u8>(), 0..200), 1..20,
        )) {
            let ring = TestRing::new_boxed();
            for frame in &frames {
                proptest::prop_assert!(ring.write_custom_data(frame));
                proptest::prop_assert!(ring.commit_write());
                proptest::prop_assert_eq!(ring.read_custom_data().as_deref(), Some(frame.as_slice()));
            }
        }
    }

    #[test]
    fn spsc_framing_atomicity_under_threads() {
        let ring: Arc<TestRing> = Arc::from(TestRing::new_boxed());
        let writer_ring = Arc::clone(&ring);
        let frames = 5_000u32;

        let writer = std::thread::spawn(move || {
            let mut sent = 0;
            while sent < frames {
                // A frame is three values with a checksum relation.
                let a = sent;
                let b = sent.wrapping_mul(7);
                if writer_ring.write_u32(a)
                    && writer_ring.write_u32(b)
                    && writer_ring.write_u32(a ^ b)
                {
                    if writer_ring.commit_write() {
                        sent += 1;
                    }
                } else {
                    writer_ring.commit_write();
                    std::thread::yield_now();
                }
            }
        });

        let mut received = 0;
        while received < frames {
            if let Some(a) = ring.read_u32() {
                // The rest of the frame is committed with it.
                let b = ring.read_u32().expect("frame torn: missing b");
                let c = ring.read_u32().expect("frame torn: missing checksum");
                assert_eq!(a ^ b, c);
                assert_eq!(a, received);
                received += 1;
            } else {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();
    }
}
