use std::cell::RefCell;

use critical_section::Mutex;

/// Saved read position into a [`CircBuffer`].
///
/// Iterators never mutate the buffer. One taken before a `read` or `clear`
/// may point at consumed bytes, in which case it reports nothing available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircIter(usize);

struct Ring {
    buffer: Vec<u8>,
    read: usize,
    write: usize,
    size: usize,
}

impl Ring {
    fn length(&self) -> usize {
        self.buffer.len()
    }

    fn is_full(&self) -> bool {
        self.size == self.length() - 1
    }

    /// Bytes readable starting at `pos`, zero if `pos` is outside the live region.
    fn size_from_pos(&self, pos: usize) -> usize {
        let (read, write, length) = (self.read, self.write, self.length());
        if write == read {
            0
        } else if write > read {
            if pos >= read && pos < write {
                write - pos
            } else {
                0
            }
        } else if pos < write {
            write - pos
        } else if pos >= read && pos < length {
            length - pos + write
        } else {
            0
        }
    }

    fn peek(&self, mut pos: usize, data: &mut [u8]) -> usize {
        let count = data.len().min(self.size_from_pos(pos));
        let mut copied = 0;
        while copied < count {
            let chunk = (count - copied).min(self.length() - pos);
            data[copied..copied + chunk].copy_from_slice(&self.buffer[pos..pos + chunk]);
            copied += chunk;
            pos += chunk;
            if pos == self.length() {
                pos = 0;
            }
        }
        count
    }

    fn advance(&self, pos: usize, n: usize) -> usize {
        let n = n.min(self.size_from_pos(pos));
        let next = pos + n;
        if next >= self.length() {
            next - self.length()
        } else {
            next
        }
    }
}

/// Interrupt-safe byte ring.
///
/// A ring of `length` bytes holds at most `length - 1`. Writes never block:
/// they store what fits and report the count. Every operation runs in one
/// critical section, so a producer and a consumer on different contexts can
/// share the buffer through `&self`.
pub struct CircBuffer {
    ring: Mutex<RefCell<Ring>>,
    length: usize,
}

impl CircBuffer {
    /// Create a ring over `length` bytes of storage.
    ///
    /// # Panics
    ///
    /// Panics if `length < 2`; such a ring could never hold a byte.
    pub fn new(length: usize) -> Self {
        assert!(length >= 2, "circular buffer needs at least 2 bytes");
        Self {
            ring: Mutex::new(RefCell::new(Ring {
                buffer: vec![0u8; length],
                read: 0,
                write: 0,
                size: 0,
            })),
            length,
        }
    }

    /// Append as much of `data` as fits. Returns the number of bytes stored.
    pub fn write(&self, data: &[u8]) -> usize {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            let length = ring.length();
            let mut written = 0;
            while written < data.len() && !ring.is_full() {
                let room = if ring.write >= ring.read {
                    // Leave one byte free when the read cursor sits at 0.
                    let end = if ring.read == 0 { length - 1 } else { length };
                    end - ring.write
                } else {
                    ring.read - ring.write - 1
                };
                let chunk = (data.len() - written).min(room);
                let at = ring.write;
                ring.buffer[at..at + chunk].copy_from_slice(&data[written..written + chunk]);
                written += chunk;
                ring.write += chunk;
                ring.size += chunk;
                if ring.write == length {
                    ring.write = 0;
                }
            }
            written
        })
    }

    /// Append one byte. Returns `false` when the ring is full.
    pub fn write_byte(&self, byte: u8) -> bool {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            if ring.is_full() {
                return false;
            }
            let at = ring.write;
            ring.buffer[at] = byte;
            ring.write = if at + 1 == ring.length() { 0 } else { at + 1 };
            ring.size += 1;
            true
        })
    }

    /// Remove up to `buf.len()` bytes into `buf`. Returns the count read.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            let read = ring.read;
            let count = ring.peek(read, buf);
            ring.read = ring.advance(read, count);
            ring.size -= count;
            count
        })
    }

    /// Remove and return the oldest byte.
    pub fn read_byte(&self) -> Option<u8> {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            if ring.size == 0 {
                return None;
            }
            let at = ring.read;
            let byte = ring.buffer[at];
            ring.read = if at + 1 == ring.length() { 0 } else { at + 1 };
            ring.size -= 1;
            Some(byte)
        })
    }

    /// Discard up to `n` of the oldest bytes. Returns the count discarded.
    pub fn consume(&self, n: usize) -> usize {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            let read = ring.read;
            let count = n.min(ring.size_from_pos(read));
            ring.read = ring.advance(read, count);
            ring.size -= count;
            count
        })
    }

    /// Iterator at the current read cursor.
    pub fn begin(&self) -> CircIter {
        critical_section::with(|cs| CircIter(self.ring.borrow_ref(cs).read))
    }

    /// Copy up to `buf.len()` bytes starting at `iter` without consuming them.
    pub fn peek(&self, iter: CircIter, buf: &mut [u8]) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).peek(iter.0, buf))
    }

    /// Byte at `iter`, if any.
    pub fn peek_byte(&self, iter: CircIter) -> Option<u8> {
        critical_section::with(|cs| {
            let ring = self.ring.borrow_ref(cs);
            (ring.size_from_pos(iter.0) > 0).then(|| ring.buffer[iter.0])
        })
    }

    /// Move `iter` forward by `n`, clamped to the bytes available from it.
    pub fn advance(&self, iter: CircIter, n: usize) -> CircIter {
        critical_section::with(|cs| CircIter(self.ring.borrow_ref(cs).advance(iter.0, n)))
    }

    /// Bytes readable from `iter` onward.
    pub fn available(&self, iter: CircIter) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).size_from_pos(iter.0))
    }

    /// Whether `iter` has reached the write cursor.
    pub fn eof(&self, iter: CircIter) -> bool {
        critical_section::with(|cs| self.ring.borrow_ref(cs).write == iter.0)
    }

    /// Bytes currently stored.
    pub fn size(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).size)
    }

    /// Bytes that can still be written.
    pub fn free(&self) -> usize {
        self.capacity() - self.size()
    }

    /// Maximum bytes the ring can hold.
    pub fn capacity(&self) -> usize {
        self.length - 1
    }

    pub fn is_full(&self) -> bool {
        self.size() == self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop everything and reset both cursors.
    pub fn clear(&self) {
        critical_section::with(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            ring.read = 0;
            ring.write = 0;
            ring.size = 0;
        })
    }
}

impl std::fmt::Debug for CircBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        critical_section::with(|cs| {
            let ring = self.ring.borrow_ref(cs);
            f.debug_struct("CircBuffer")
                .field("length", &self.length)
                .field("read", &ring.read)
                .field("write", &ring.write)
                .field("size", &ring.size)
                .finish()
        })
    }
}
