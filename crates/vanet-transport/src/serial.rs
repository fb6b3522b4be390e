use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::circ::CircBuffer;
use crate::config::LinkConfig;
use crate::error::{Result, TransportError};

/// Writer side of the UART transmit ring.
///
/// Writes queue into the shared ring. When it lacks room the writer sleeps
/// in `poll_interval` steps until the [`TxPump`] has drained enough, giving
/// up after `drain_timeout`.
#[derive(Debug, Clone)]
pub struct SerialTx {
    ring: Arc<CircBuffer>,
    drain_timeout: Duration,
    poll_interval: Duration,
}

impl SerialTx {
    pub fn new(ring: Arc<CircBuffer>, config: &LinkConfig) -> Self {
        Self {
            ring,
            drain_timeout: config.drain_timeout,
            poll_interval: config.poll_interval,
        }
    }

    /// Wait until the ring has at least `needed` free bytes.
    ///
    /// `needed` is clamped to the ring capacity, so `usize::MAX` waits for
    /// the ring to empty.
    pub fn drain(&self, needed: usize) -> Result<()> {
        let needed = needed.min(self.ring.capacity());
        let started = Instant::now();
        while self.ring.free() < needed {
            if started.elapsed() >= self.drain_timeout {
                warn!(
                    needed,
                    free = self.ring.free(),
                    "transmit ring stalled"
                );
                return Err(TransportError::DrainTimeout(self.drain_timeout));
            }
            std::thread::sleep(self.poll_interval);
        }
        Ok(())
    }

    pub fn ring(&self) -> &Arc<CircBuffer> {
        &self.ring
    }
}

impl Write for SerialTx {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let needed = buf.len().min(self.ring.capacity());
        self.drain(needed)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::TimedOut, e))?;
        let queued = self.ring.write(&buf[..needed]);
        trace!(queued, "queued for transmit");
        Ok(queued)
    }

    /// Block until the pump has taken every queued byte.
    fn flush(&mut self) -> std::io::Result<()> {
        self.drain(usize::MAX)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::TimedOut, e))
    }
}

/// Moves queued bytes from the transmit ring onto the link.
///
/// Plays the role of the UART TX interrupt.
pub struct TxPump<W> {
    ring: Arc<CircBuffer>,
    out: W,
    chunk: Vec<u8>,
}

impl<W: Write> TxPump<W> {
    pub fn new(ring: Arc<CircBuffer>, out: W) -> Self {
        let chunk = vec![0u8; ring.capacity()];
        Self { ring, out, chunk }
    }

    /// Send everything currently queued. Returns the number of bytes sent.
    pub fn pump(&mut self) -> std::io::Result<usize> {
        let mut sent = 0;
        loop {
            let n = self.ring.peek(self.ring.begin(), &mut self.chunk);
            if n == 0 {
                break;
            }
            self.out.write_all(&self.chunk[..n])?;
            self.ring.consume(n);
            sent += n;
        }
        if sent > 0 {
            self.out.flush()?;
        }
        Ok(sent)
    }

    /// Pump until `stop` is set, idling `idle` between empty polls.
    pub fn run(mut self, stop: &AtomicBool, idle: Duration) -> std::io::Result<()> {
        debug!("transmit pump started");
        while !stop.load(Ordering::Acquire) {
            if self.pump()? == 0 {
                std::thread::sleep(idle);
            }
        }
        self.pump()?;
        debug!("transmit pump stopped");
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
