use std::cell::RefCell;
use std::sync::Arc;

use critical_section::Mutex;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::fatal::{FatalHandler, PanicReset};

/// Magic written into every slot header and right after the allocated bytes.
pub const BOUNDARY_MAGIC: u32 = 0xDECA_FBAD;

/// Slot header without boundary checking: used flag, pool index, size (LE).
const HEADER_LEN: usize = 4;
/// Slot header with boundary checking: adds the header magic.
const HEADER_LEN_CHECKED: usize = 8;
/// Trailer written after the allocated bytes when boundary checking.
const TRAILER_LEN: usize = 4;

const USED: u8 = 0x01;

/// Handle to a live pool buffer.
///
/// The allocator validates it on free the way the firmware validated a raw
/// pointer, so a stale or forged id is caught rather than corrupting a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pool: u8,
    slot: u16,
}

impl BufferId {
    /// Build an id from raw parts. Intended for diagnostics and tests.
    pub fn from_raw(pool: u8, slot: u16) -> Self {
        Self { pool, slot }
    }

    pub fn pool(&self) -> usize {
        self.pool as usize
    }

    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

/// Per-class statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub bufsize: usize,
    pub count: usize,
    pub allocs: u32,
    pub frees: u32,
    pub in_use: u32,
    pub max_used: u32,
    pub max_size: usize,
}

struct Pool {
    bufsize: usize,
    count: usize,
    stride: usize,
    arena: Vec<u8>,
    allocs: u32,
    frees: u32,
    max_used: u32,
    max_size: usize,
}

impl Pool {
    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = slot * self.stride;
        start..start + self.stride
    }

    // Counters restart from zero on overflow with slots still live, so frees
    // can briefly exceed allocs.
    fn in_use(&self) -> u32 {
        self.allocs.saturating_sub(self.frees)
    }
}

/// Fixed-size-class buffer allocator.
///
/// Requests are served from the smallest class whose buffer size fits, by a
/// linear scan for a free slot. All pool state is mutated inside a critical
/// section so the allocator may be used from interrupt context.
pub struct PoolAllocator {
    pools: Mutex<RefCell<Vec<Pool>>>,
    header_len: usize,
    boundary_check: bool,
    fatal: Arc<dyn FatalHandler>,
}

impl PoolAllocator {
    /// Create an allocator that panics on fatal faults.
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::with_fatal_handler(config, Arc::new(PanicReset))
    }

    /// Create an allocator with an explicit fatal escalation hook.
    pub fn with_fatal_handler(config: PoolConfig, fatal: Arc<dyn FatalHandler>) -> Result<Self> {
        let mut classes = config.classes.clone();
        if classes.is_empty() {
            return Err(PoolError::InvalidConfig("no pool classes".to_string()));
        }
        if classes.len() > u8::MAX as usize {
            return Err(PoolError::InvalidConfig(format!(
                "{} pool classes (max {})",
                classes.len(),
                u8::MAX
            )));
        }
        classes.sort_by_key(|c| c.bufsize);
        for pair in classes.windows(2) {
            if pair[0].bufsize == pair[1].bufsize {
                return Err(PoolError::InvalidConfig(format!(
                    "duplicate class size {}",
                    pair[0].bufsize
                )));
            }
        }

        let (header_len, trailer_len) = if config.boundary_check {
            (HEADER_LEN_CHECKED, TRAILER_LEN)
        } else {
            (HEADER_LEN, 0)
        };

        let mut pools = Vec::with_capacity(classes.len());
        for class in &classes {
            if class.bufsize == 0 || class.count == 0 {
                return Err(PoolError::InvalidConfig(format!(
                    "class {}x{} has a zero dimension",
                    class.bufsize, class.count
                )));
            }
            if class.bufsize > u16::MAX as usize || class.count > u16::MAX as usize {
                return Err(PoolError::InvalidConfig(format!(
                    "class {}x{} exceeds 16-bit limits",
                    class.bufsize, class.count
                )));
            }
            let stride = header_len + class.bufsize + trailer_len;
            pools.push(Pool {
                bufsize: class.bufsize,
                count: class.count,
                stride,
                arena: vec![0u8; stride * class.count],
                allocs: 0,
                frees: 0,
                max_used: 0,
                max_size: 0,
            });
        }

        debug!(classes = pools.len(), "buffer pools initialized");

        Ok(Self {
            pools: Mutex::new(RefCell::new(pools)),
            header_len,
            boundary_check: config.boundary_check,
            fatal,
        })
    }

    /// Allocate `size` bytes, escalating to the fatal handler on failure.
    pub fn alloc(&self, size: usize) -> BufferId {
        match self.try_alloc(size) {
            Ok(id) => id,
            Err(err) => self.fatal(err),
        }
    }

    /// Allocate `size` bytes.
    pub fn try_alloc(&self, size: usize) -> Result<BufferId> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }

        let header_len = self.header_len;
        let boundary_check = self.boundary_check;
        let found = critical_section::with(|cs| {
            let mut pools = self.pools.borrow_ref_mut(cs);
            for (index, pool) in pools.iter_mut().enumerate() {
                if size > pool.bufsize {
                    continue;
                }
                for slot in 0..pool.count {
                    let range = pool.slot_range(slot);
                    if pool.arena[range.start] & USED != 0 {
                        continue;
                    }

                    let bytes = &mut pool.arena[range];
                    bytes[0] = USED;
                    bytes[1] = index as u8;
                    bytes[2..4].copy_from_slice(&(size as u16).to_le_bytes());
                    if boundary_check {
                        bytes[4..8].copy_from_slice(&BOUNDARY_MAGIC.to_le_bytes());
                        let tail = header_len + size;
                        bytes[tail..tail + TRAILER_LEN]
                            .copy_from_slice(&BOUNDARY_MAGIC.to_le_bytes());
                    }

                    pool.max_size = pool.max_size.max(size);
                    if pool.allocs < u32::MAX {
                        pool.allocs += 1;
                    } else {
                        pool.allocs = 0;
                        pool.frees = 0;
                    }
                    pool.max_used = pool.max_used.max(pool.in_use());

                    return Some(BufferId {
                        pool: index as u8,
                        slot: slot as u16,
                    });
                }
            }
            None
        });

        found.ok_or_else(|| {
            error!(size, "malloc failed");
            PoolError::Exhausted { size }
        })
    }

    /// Return a buffer, escalating to the fatal handler if the id is invalid
    /// or the boundary tags were overwritten.
    pub fn free(&self, id: BufferId) {
        if let Err(err) = self.try_free(id) {
            self.fatal(err);
        }
    }

    /// Return a buffer to its pool.
    pub fn try_free(&self, id: BufferId) -> Result<()> {
        let header_len = self.header_len;
        let boundary_check = self.boundary_check;
        critical_section::with(|cs| {
            let mut pools = self.pools.borrow_ref_mut(cs);
            let invalid = PoolError::InvalidFree {
                pool: id.pool(),
                slot: id.slot(),
            };
            let pool = pools.get_mut(id.pool()).ok_or(invalid.clone())?;
            if id.slot() >= pool.count {
                return Err(invalid);
            }

            let range = pool.slot_range(id.slot());
            let bytes = &mut pool.arena[range];
            if bytes[0] & USED == 0 || bytes[1] != id.pool {
                return Err(invalid);
            }

            if boundary_check {
                let corrupted = PoolError::BoundaryCorrupted {
                    pool: id.pool(),
                    slot: id.slot(),
                };
                let size = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
                let tail = header_len + size;
                if read_magic(bytes, 4) != Some(BOUNDARY_MAGIC)
                    || read_magic(bytes, tail) != Some(BOUNDARY_MAGIC)
                {
                    return Err(corrupted);
                }
            }

            bytes[0] = 0;
            pool.frees = pool.frees.wrapping_add(1);
            Ok(())
        })
    }

    /// Size requested when the buffer was allocated.
    pub fn alloc_size(&self, id: BufferId) -> Result<usize> {
        self.with_live_slot(id, |bytes, _| Ok(u16::from_le_bytes([bytes[2], bytes[3]]) as usize))
    }

    /// Copy `data` into the buffer at `offset`.
    pub fn write(&self, id: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        self.with_live_slot(id, |bytes, header_len| {
            let size = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
            check_bounds(offset, data.len(), size)?;
            let start = header_len + offset;
            bytes[start..start + data.len()].copy_from_slice(data);
            Ok(())
        })
    }

    /// Copy bytes out of the buffer starting at `offset`.
    pub fn read(&self, id: BufferId, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.with_live_slot(id, |bytes, header_len| {
            let size = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
            check_bounds(offset, buf.len(), size)?;
            let start = header_len + offset;
            buf.copy_from_slice(&bytes[start..start + buf.len()]);
            Ok(())
        })
    }

    /// Run `f` over the raw slot of a live buffer: header, data area and the
    /// guard bytes. The data area starts at [`PoolAllocator::data_offset`].
    ///
    /// Runs inside the allocator critical section; keep `f` short.
    pub fn with_slot_mut<R>(&self, id: BufferId, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.with_live_slot(id, |bytes, _| Ok(f(bytes)))
    }

    /// Offset of the data area inside a raw slot.
    pub fn data_offset(&self) -> usize {
        self.header_len
    }

    /// Whether boundary tags are written and verified.
    pub fn boundary_check(&self) -> bool {
        self.boundary_check
    }

    /// Statistics for every class, smallest first.
    pub fn stats(&self) -> Vec<PoolStats> {
        critical_section::with(|cs| {
            self.pools
                .borrow_ref(cs)
                .iter()
                .map(|pool| PoolStats {
                    bufsize: pool.bufsize,
                    count: pool.count,
                    allocs: pool.allocs,
                    frees: pool.frees,
                    in_use: pool.in_use(),
                    max_used: pool.max_used,
                    max_size: pool.max_size,
                })
                .collect()
        })
    }

    /// Escalate an error through the fatal handler.
    pub fn fatal(&self, err: PoolError) -> ! {
        self.fatal.reset(err.reset_reason())
    }

    fn with_live_slot<R>(
        &self,
        id: BufferId,
        f: impl FnOnce(&mut [u8], usize) -> Result<R>,
    ) -> Result<R> {
        let header_len = self.header_len;
        critical_section::with(|cs| {
            let mut pools = self.pools.borrow_ref_mut(cs);
            let invalid = PoolError::InvalidFree {
                pool: id.pool(),
                slot: id.slot(),
            };
            let pool = pools.get_mut(id.pool()).ok_or(invalid.clone())?;
            if id.slot() >= pool.count {
                return Err(invalid);
            }
            let range = pool.slot_range(id.slot());
            let bytes = &mut pool.arena[range];
            if bytes[0] & USED == 0 {
                return Err(invalid);
            }
            f(bytes, header_len)
        })
    }
}

impl std::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("boundary_check", &self.boundary_check)
            .field("stats", &self.stats())
            .finish()
    }
}

fn read_magic(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn check_bounds(offset: usize, len: usize, size: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(PoolError::OutOfBounds { offset, len, size }),
    }
}
