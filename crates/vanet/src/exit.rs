use std::fmt;
use std::io;

use vanet_mux::MuxError;
use vanet_pool::PoolError;
use vanet_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::DrainTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Io(source) => io_error(context, source),
        MuxError::PayloadTooLarge { .. } | MuxError::InvalidDlci(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MuxError::ConnectionClosed | MuxError::Disconnected => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn pool_error(context: &str, err: PoolError) -> CliError {
    match err {
        PoolError::InvalidConfig(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PoolError::ZeroSize | PoolError::Exhausted { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_codes() {
        let err = io_error("x", io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(err.code, TIMEOUT);
        let err = io_error("x", io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn mux_errors_map_to_codes() {
        let err = mux_error("encode", MuxError::PayloadTooLarge { size: 200, max: 128 });
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("encode: "));
        assert_eq!(mux_error("x", MuxError::ConnectionClosed).code, FAILURE);
    }

    #[test]
    fn bad_pool_table_is_invalid_data() {
        let err = pool_error("pools", PoolError::InvalidConfig("empty".into()));
        assert_eq!(err.code, DATA_INVALID);
    }
}
