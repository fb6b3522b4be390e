use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::error;
use vanet_pool::{BufferId, PoolAllocator};

use crate::error::{BusError, Result};

/// Bytes reserved in front of every payload: reference count word, source,
/// immediate byte, event and payload length.
pub const MESSAGE_HEADER_LEN: usize = 10;

/// Largest payload a message can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize - MESSAGE_HEADER_LEN;

/// Allocation and free counters shared by a bus and its messages.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) allocs: AtomicU32,
    pub(crate) frees: AtomicU32,
}

/// A message being prepared for publication.
///
/// Owns its pool slot until it is handed to [`Bus::publish`](crate::Bus::publish).
/// Dropping an unpublished message returns the slot.
pub struct Message {
    slot: Option<Slot>,
    immediate: u8,
    len: u16,
}

struct Slot {
    pools: Arc<PoolAllocator>,
    id: BufferId,
    counters: Arc<Counters>,
}

impl Slot {
    fn release(self) {
        self.pools.free(self.id);
        self.counters.frees.fetch_add(1, Ordering::Relaxed);
    }
}

impl Message {
    pub(crate) fn new(
        pools: Arc<PoolAllocator>,
        id: BufferId,
        counters: Arc<Counters>,
        len: u16,
    ) -> Self {
        Self {
            slot: Some(Slot {
                pools,
                id,
                counters,
            }),
            immediate: 0,
            len,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn immediate(&self) -> u8 {
        self.immediate
    }

    pub fn set_immediate(&mut self, value: u8) {
        self.immediate = value;
    }

    /// Copy `data` into the payload at `offset`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset.saturating_add(data.len()) > self.len() {
            return Err(BusError::PayloadOverrun {
                offset,
                len: data.len(),
                payload: self.len(),
            });
        }
        let Some(slot) = &self.slot else {
            return Ok(());
        };
        slot.pools
            .write(slot.id, MESSAGE_HEADER_LEN + offset, data)
            .map_err(Into::into)
    }

    pub(crate) fn into_shared(mut self, source: u8, event: u16) -> Option<Arc<Shared>> {
        let slot = self.slot.take()?;
        Some(Arc::new(Shared {
            slot: Mutex::new(Some(slot)),
            refs: AtomicU32::new(0),
            source,
            event,
            immediate: self.immediate,
            len: self.len,
        }))
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.release();
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("immediate", &self.immediate)
            .field("len", &self.len)
            .finish()
    }
}

/// A published message, shared by every delivery of one publish.
pub(crate) struct Shared {
    slot: Mutex<Option<Slot>>,
    refs: AtomicU32,
    source: u8,
    event: u16,
    immediate: u8,
    len: u16,
}

impl Shared {
    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference, returning the slot to its pool on the last one.
    pub(crate) fn release(&self) {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                error!(
                    source = self.source,
                    event = self.event,
                    "free of a message with no references"
                );
                debug_assert!(false, "message double free");
                return;
            }
            match self.refs.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == 1 {
            if let Some(slot) = self.take_slot() {
                slot.release();
            }
        }
    }

    pub(crate) fn refs(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    fn take_slot(&self) -> Option<Slot> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn read_payload(&self) -> Bytes {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = guard.as_ref() else {
            return Bytes::new();
        };
        let mut buf = vec![0u8; self.len as usize];
        if let Err(err) = slot.pools.read(slot.id, MESSAGE_HEADER_LEN, &mut buf) {
            error!(%err, "message payload unreadable");
            return Bytes::new();
        }
        Bytes::from(buf)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(slot) = self.take_slot() {
            slot.release();
        }
    }
}

/// One subscriber's reference to a published message.
///
/// Read-only. Dropping it (or passing it to [`Bus::free`](crate::Bus::free))
/// releases the reference; the pool slot is returned with the last one.
pub struct Delivery {
    shared: Option<Arc<Shared>>,
}

impl Delivery {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        shared.retain();
        Self {
            shared: Some(shared),
        }
    }

    fn shared(&self) -> &Shared {
        match &self.shared {
            Some(shared) => shared,
            None => unreachable!("delivery used after release"),
        }
    }

    pub fn source(&self) -> u8 {
        self.shared().source
    }

    pub fn event(&self) -> u16 {
        self.shared().event
    }

    pub fn immediate(&self) -> u8 {
        self.shared().immediate
    }

    pub fn len(&self) -> usize {
        self.shared().len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.shared().len == 0
    }

    pub fn has_data(&self) -> bool {
        !self.is_empty()
    }

    /// References still outstanding on the underlying message.
    pub fn ref_count(&self) -> u32 {
        self.shared().refs()
    }

    /// Copy of the payload.
    pub fn data(&self) -> Bytes {
        self.shared().read_payload()
    }

    pub(crate) fn release(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release();
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.shared {
            Some(shared) => f
                .debug_struct("Delivery")
                .field("source", &shared.source)
                .field("event", &format_args!("{:#06x}", shared.event))
                .field("immediate", &shared.immediate)
                .field("len", &shared.len)
                .finish(),
            None => f.write_str("Delivery(released)"),
        }
    }
}
