use vanet_pool::PoolError;

/// Errors raised by the message bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The pool allocator refused the request.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Payload larger than a message length field can describe.
    #[error("payload of {len} bytes exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// A write went past the message payload.
    #[error("write of {len} bytes at offset {offset} exceeds payload of {payload} bytes")]
    PayloadOverrun {
        offset: usize,
        len: usize,
        payload: usize,
    },

    /// No timer is registered under this handle.
    #[error("unknown timer {0}")]
    UnknownTimer(usize),
}

pub type Result<T> = std::result::Result<T, BusError>;
