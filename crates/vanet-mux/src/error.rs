/// Errors raised by the multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Payload does not fit the frame information field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// DLCI outside the configured channel table.
    #[error("DLCI {0} out of range")]
    InvalidDlci(u8),

    /// An I/O error occurred writing to the link.
    #[error("mux I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link accepted zero bytes.
    #[error("link closed while writing a frame")]
    ConnectionClosed,

    /// The bus refused an operation.
    #[error(transparent)]
    Bus(#[from] vanet_tkvs::BusError),

    /// The bus refused a subscription the mux task needs.
    #[error("subscription to source {0} rejected")]
    SubscriptionRejected(u8),

    /// The task mailbox lost every sender.
    #[error("mux mailbox disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, MuxError>;
