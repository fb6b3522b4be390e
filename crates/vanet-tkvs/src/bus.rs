use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use vanet_pool::PoolAllocator;

use crate::error::{BusError, Result};
use crate::mailbox::MailboxTx;
use crate::message::{Counters, Delivery, Message, MAX_PAYLOAD, MESSAGE_HEADER_LEN};
use crate::sched::SchedLock;

/// Default subscription table size.
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 32;

/// Bus tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Fixed capacity of the subscription table.
    pub max_subscriptions: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
        }
    }
}

struct Subscription {
    source: u8,
    event_mask: u16,
    queue: MailboxTx,
    priority: u8,
    hits: AtomicU32,
}

impl Subscription {
    fn matches(&self, source: u8, event: u16) -> bool {
        self.source == source && self.event_mask & event != 0
    }
}

/// Per-subscription counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub source: u8,
    pub event_mask: u16,
    pub priority: u8,
    pub hits: u32,
}

/// Bus-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub allocs: u32,
    pub frees: u32,
    pub total_hits: u64,
    pub subscriptions: Vec<SubscriptionStats>,
}

/// The TKVS publish/subscribe bus.
///
/// Tasks subscribe a [`MailboxTx`] to a source and an event mask. A publish
/// hands one [`Delivery`] of the message to every matching queue; the pool
/// slot is returned when the last delivery is released.
pub struct Bus {
    pools: Arc<PoolAllocator>,
    subscriptions: RwLock<Vec<Subscription>>,
    max_subscriptions: usize,
    sched: SchedLock,
    counters: Arc<Counters>,
}

impl Bus {
    pub fn new(pools: Arc<PoolAllocator>, config: BusConfig) -> Self {
        debug!(
            max_subscriptions = config.max_subscriptions,
            "message bus initialized"
        );
        Self {
            pools,
            subscriptions: RwLock::new(Vec::with_capacity(config.max_subscriptions)),
            max_subscriptions: config.max_subscriptions,
            sched: SchedLock::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn pools(&self) -> &Arc<PoolAllocator> {
        &self.pools
    }

    /// Allocate a message with a `payload_len` byte payload.
    ///
    /// Pool exhaustion is fatal and goes through the allocator's fatal
    /// handler, like every other allocation on the board.
    pub fn alloc(&self, payload_len: usize) -> Message {
        match self.try_alloc(payload_len) {
            Ok(msg) => msg,
            Err(BusError::Pool(err)) => self.pools.fatal(err),
            Err(_) => self.pools.fatal(vanet_pool::PoolError::Exhausted {
                size: MESSAGE_HEADER_LEN.saturating_add(payload_len),
            }),
        }
    }

    /// Allocate a message, reporting failure instead of resetting.
    pub fn try_alloc(&self, payload_len: usize) -> Result<Message> {
        if payload_len > MAX_PAYLOAD {
            return Err(BusError::PayloadTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD,
            });
        }
        let id = self.pools.try_alloc(MESSAGE_HEADER_LEN + payload_len)?;
        self.counters.allocs.fetch_add(1, Ordering::Relaxed);
        Ok(Message::new(
            Arc::clone(&self.pools),
            id,
            Arc::clone(&self.counters),
            payload_len as u16,
        ))
    }

    /// Register `queue` for events of `source` that intersect `event_mask`.
    ///
    /// Returns `false` when the mask is empty or the table is full; both are
    /// startup configuration errors on the board.
    pub fn subscribe(&self, source: u8, event_mask: u16, queue: &MailboxTx, priority: u8) -> bool {
        if event_mask == 0 {
            warn!(source, "subscribe with empty event mask");
            return false;
        }
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if subs.len() >= self.max_subscriptions {
            warn!(source, event_mask, "subscription table full");
            return false;
        }
        subs.push(Subscription {
            source,
            event_mask,
            queue: queue.clone(),
            priority,
            hits: AtomicU32::new(0),
        });
        debug!(source, event_mask = format_args!("{event_mask:#06x}"), priority, "subscribed");
        true
    }

    /// Deliver `msg` to every matching subscription. Returns the number of
    /// queues it reached.
    ///
    /// Fan-out runs under the scheduler lock with a provisional publisher
    /// reference, so no receiver can return the slot before every matching
    /// queue has been posted. With no match the slot is returned at once.
    pub fn publish(&self, source: u8, event: u16, msg: Message) -> usize {
        let Some(shared) = msg.into_shared(source, event) else {
            return 0;
        };

        let _sched = self.sched.lock();
        shared.retain();

        let mut delivered = 0;
        {
            let subs = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for sub in subs.iter().filter(|s| s.matches(source, event)) {
                sub.hits.fetch_add(1, Ordering::Relaxed);
                match sub.queue.post(Delivery::new(Arc::clone(&shared))) {
                    Ok(()) => delivered += 1,
                    Err(rejected) => {
                        warn!(
                            source,
                            event = format_args!("{event:#06x}"),
                            priority = sub.priority,
                            "queue post failed, dropping delivery"
                        );
                        drop(rejected);
                    }
                }
            }
        }

        trace!(source, event = format_args!("{event:#06x}"), delivered, "published");
        shared.release();
        delivered
    }

    /// Publish a message carrying only the immediate byte.
    pub fn publish_immediate(&self, source: u8, event: u16, immediate: u8) -> usize {
        let mut msg = self.alloc(0);
        msg.set_immediate(immediate);
        self.publish(source, event, msg)
    }

    /// Publish a copy of `data`.
    pub fn publish_data(&self, source: u8, event: u16, data: &[u8]) -> usize {
        self.publish_immediate_with_data(source, event, 0, data)
    }

    /// Publish a copy of `data` along with an immediate byte.
    pub fn publish_immediate_with_data(
        &self,
        source: u8,
        event: u16,
        immediate: u8,
        data: &[u8],
    ) -> usize {
        let mut msg = self.alloc(data.len());
        msg.set_immediate(immediate);
        if let Err(err) = msg.write(0, data) {
            warn!(%err, "message payload copy failed");
            return 0;
        }
        self.publish(source, event, msg)
    }

    /// Release a delivery. Equivalent to dropping it.
    pub fn free(&self, delivery: Delivery) {
        drop(delivery);
    }

    /// Whether any subscription would receive `event` from `source`.
    pub fn is_subscribed(&self, source: u8, event: u16) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|s| s.matches(source, event))
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> BusStats {
        let subscriptions: Vec<SubscriptionStats> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| SubscriptionStats {
                source: s.source,
                event_mask: s.event_mask,
                priority: s.priority,
                hits: s.hits.load(Ordering::Relaxed),
            })
            .collect();
        BusStats {
            allocs: self.counters.allocs.load(Ordering::Relaxed),
            frees: self.counters.frees.load(Ordering::Relaxed),
            total_hits: subscriptions.iter().map(|s| u64::from(s.hits)).sum(),
            subscriptions,
        }
    }

    /// The `n` busiest subscriptions, busiest first.
    pub fn top_subscriptions(&self, n: usize) -> Vec<SubscriptionStats> {
        let mut subs = self.stats().subscriptions;
        subs.sort_by(|a, b| b.hits.cmp(&a.hits));
        subs.truncate(n);
        subs
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("subscriptions", &self.subscription_count())
            .field("max_subscriptions", &self.max_subscriptions)
            .finish()
    }
}
