//! TKVS: the board's publish/subscribe message bus.
//!
//! Messages live in pool buffers and are shared by reference count between
//! every subscriber they were delivered to:
//!
//! - [`Bus`]: subscription table, publish fan-out, statistics
//! - [`Message`] / [`Delivery`]: a message before and after publication
//! - [`mailbox`]: bounded task queues that subscriptions post into
//! - [`Clock`] / [`TimerService`]: tick source and timers that fire as events

pub mod bus;
pub mod clock;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod sched;
pub mod source;
pub mod timer;

pub use bus::{Bus, BusConfig, BusStats, SubscriptionStats, DEFAULT_MAX_SUBSCRIPTIONS};
pub use clock::{Clock, ManualClock, SystemClock, DEFAULT_TICK_HZ};
pub use error::{BusError, Result};
pub use mailbox::{mailbox, Mailbox, MailboxTx, RecvError};
pub use message::{Delivery, Message, MAX_PAYLOAD, MESSAGE_HEADER_LEN};
pub use sched::{SchedGuard, SchedLock};
pub use source::ALL_EVENTS;
pub use timer::{BusTimer, TimerHandle, TimerKind, TimerService};
