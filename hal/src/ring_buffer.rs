//! # Ring buffer
//!
//! Fixed capacity circular byte queue shared between an interrupt handler (the producer) and the
//! main-line code (the consumer).
//!
//! `head` is the next slot to write and is only stored by the [`Producer`], `tail` is the next
//! slot to read and is only stored by the [`Consumer`]. One slot is always kept free so a full
//! buffer can be told apart from an empty one, which means at most `N - 1` bytes are pending.
//!
//! When the buffer is full new bytes are dropped. The oldest unread data is kept.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct RingBuffer<const N: usize = 64> {
    buffer: UnsafeCell<[u8; N]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// Safety: The slots are only accessed through a `Producer`/`Consumer` pair, which can only be
// created from a unique reference. The producer writes slot `head` before publishing it and the
// consumer never reads a slot that hasn't been published.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Drop all pending bytes
    pub fn clear(&mut self) {
        *self.head.get_mut() = 0;
        *self.tail.get_mut() = 0;
    }

    /// Split into the interrupt side and the main-line side
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let rb = &*self;
        (Producer { rb }, Consumer { rb })
    }

    fn available(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);

        (N + head - tail) % N
    }

    fn slot(&self, index: usize) -> *mut u8 {
        // Safety: callers keep `index < N`
        unsafe { self.buffer.get().cast::<u8>().add(index) }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Writing end of a [`RingBuffer`]
pub struct Producer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

impl<const N: usize> Producer<'_, N> {
    /// Queue a byte. The byte is silently dropped if the buffer is full
    pub fn insert(&mut self, byte: u8) {
        let head = self.rb.head.load(Ordering::Relaxed);
        let next = (head + 1) % N;

        if next == self.rb.tail.load(Ordering::Acquire) {
            return;
        }

        // Safety: `head` is not visible to the consumer until the store below
        unsafe { self.rb.slot(head).write_volatile(byte) };
        self.rb.head.store(next, Ordering::Release);
    }

    pub fn available(&self) -> usize {
        self.rb.available()
    }
}

/// Reading end of a [`RingBuffer`]
pub struct Consumer<'a, const N: usize> {
    rb: &'a RingBuffer<N>,
}

impl<const N: usize> Consumer<'_, N> {
    /// Number of unread bytes
    pub fn available(&self) -> usize {
        self.rb.available()
    }

    /// Remove and return the oldest byte
    pub fn read(&mut self) -> Option<u8> {
        let byte = self.peek()?;

        let tail = self.rb.tail.load(Ordering::Relaxed);
        self.rb.tail.store((tail + 1) % N, Ordering::Release);

        Some(byte)
    }

    /// Return the oldest byte without removing it
    pub fn peek(&self) -> Option<u8> {
        let tail = self.rb.tail.load(Ordering::Relaxed);

        if self.rb.head.load(Ordering::Acquire) == tail {
            return None;
        }

        // Safety: slot `tail` has been published by the producer
        Some(unsafe { self.rb.slot(tail).read_volatile() })
    }

    /// Block until `terminator` is received
    ///
    /// Bytes before the terminator are stored in `buf` and their count is returned. Bytes which
    /// don't fit in `buf` are consumed and discarded. The terminator itself is consumed but not
    /// stored.
    pub fn read_until(&mut self, terminator: u8, buf: &mut [u8]) -> usize {
        let mut len = 0;

        loop {
            while self.available() == 0 {}

            match self.read() {
                Some(byte) if byte == terminator => return len,
                Some(byte) => {
                    if let Some(slot) = buf.get_mut(len) {
                        *slot = byte;
                        len += 1;
                    }
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_abc() {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        let (mut producer, mut consumer) = rb.split();

        for byte in b"ABC" {
            producer.insert(*byte);
        }

        assert_eq!(consumer.available(), 3);
        assert_eq!(consumer.read(), Some(0x41));
        assert_eq!(consumer.read(), Some(0x42));
        assert_eq!(consumer.read(), Some(0x43));
        assert_eq!(consumer.available(), 0);
        assert_eq!(consumer.read(), None);
    }

    #[test]
    fn test_full_drops_newest() {
        let mut rb: RingBuffer<8> = RingBuffer::new();
        let (mut producer, mut consumer) = rb.split();

        for byte in 0..7 {
            producer.insert(byte);
        }
        assert_eq!(consumer.available(), 7);

        producer.insert(0xFF);
        assert_eq!(consumer.available(), 7);
        assert_eq!(producer.available(), 7);

        for byte in 0..7 {
            assert_eq!(consumer.read(), Some(byte));
        }
        assert_eq!(consumer.read(), None);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(5, 0)]
    #[case(5, 5)]
    #[case(20, 7)]
    #[case(63, 62)]
    fn test_available(#[case] inserts: u8, #[case] reads: u8) {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        let (mut producer, mut consumer) = rb.split();

        for byte in 0..inserts {
            producer.insert(byte);
        }
        for _ in 0..reads {
            consumer.read();
        }

        assert_eq!(consumer.available(), (inserts - reads) as usize);
    }

    #[test]
    fn test_peek_is_not_destructive() {
        let mut rb: RingBuffer<16> = RingBuffer::new();
        let (mut producer, mut consumer) = rb.split();

        assert_eq!(consumer.peek(), None);

        producer.insert(b'x');
        producer.insert(b'y');

        assert_eq!(consumer.peek(), Some(b'x'));
        assert_eq!(consumer.read(), Some(b'x'));
        assert_eq!(consumer.peek(), Some(b'y'));
        assert_eq!(consumer.available(), 1);
    }

    #[test]
    fn test_fifo_across_wrap_around() {
        let mut rb: RingBuffer<4> = RingBuffer::new();
        let (mut producer, mut consumer) = rb.split();

        let mut expected = 0u8;
        for round in 0..10u8 {
            for i in 0..3 {
                producer.insert(round * 3 + i);
            }
            for _ in 0..3 {
                assert_eq!(consumer.read(), Some(expected));
                expected += 1;
            }
        }
    }

    #[test]
    fn test_read_until() {
        let mut rb: RingBuffer<64> = RingBuffer::new();
        let (mut producer, mut consumer) = rb.split();

        for byte in b"hello\nworld\n" {
            producer.insert(*byte);
        }

        let mut buf = [0; 16];
        let len = consumer.read_until(b'\n', &mut buf);
        assert_eq!(&buf[..len], b"hello");

        // Longer than the buffer, the excess is discarded
        let mut short = [0; 3];
        let len = consumer.read_until(b'\n', &mut short);
        assert_eq!(&short[..len], b"wor");
        assert_eq!(consumer.available(), 0);
    }

    #[test]
    fn test_clear() {
        let mut rb: RingBuffer<8> = RingBuffer::new();
        {
            let (mut producer, _) = rb.split();
            producer.insert(1);
            producer.insert(2);
        }

        rb.clear();

        let (_, consumer) = rb.split();
        assert_eq!(consumer.available(), 0);
    }
}
