use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use vanet_tkvs::source::{mux_dlci, termios_event, termios_port, MUX_INTERNAL};
use vanet_tkvs::{mailbox, Bus, Delivery, Mailbox, RecvError, ALL_EVENTS};
use vanet_transport::CircBuffer;

use crate::channel::{CONTROL, ECHO};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::event::{DATA_RCVD, DLCI_SEND};
use crate::mux::Mux;

const MUX_TASK_PRIORITY: u8 = 3;

/// The mux task: owns the mux context, the receive ring and a mailbox.
///
/// Every transmit goes through this task. Received link bytes arrive as
/// termios `INPUT_RX` events and are parsed here.
pub struct MuxTask {
    mux: Mux,
    rx: CircBuffer,
    inbox: Mailbox,
    link_source: u8,
    echo: bool,
}

impl MuxTask {
    /// Subscribe the task mailbox and take ownership of `mux`.
    pub fn new(mux: Mux, config: &MuxConfig) -> Result<Self> {
        let link_source = termios_port(config.termios_port)
            .ok_or(MuxError::SubscriptionRejected(config.termios_port))?;
        let (tx, inbox) = mailbox(config.mailbox_depth);

        let mut sources = vec![MUX_INTERNAL];
        sources.extend(mux_dlci(CONTROL));
        if config.echo {
            sources.extend(mux_dlci(ECHO));
        }
        sources.push(link_source);
        for source in sources {
            if !mux.bus().subscribe(source, ALL_EVENTS, &tx, MUX_TASK_PRIORITY) {
                return Err(MuxError::SubscriptionRejected(source));
            }
        }

        info!(link_source, echo = config.echo, "mux task ready");
        Ok(Self {
            mux,
            rx: CircBuffer::new(config.rx_ring.max(2)),
            inbox,
            link_source,
            echo: config.echo,
        })
    }

    pub fn mux(&self) -> &Mux {
        &self.mux
    }

    pub fn mux_mut(&mut self) -> &mut Mux {
        &mut self.mux
    }

    /// Handle at most one delivery, waiting up to `timeout` for it.
    ///
    /// Returns `Ok(false)` when nothing arrived; a stale partial frame is
    /// expired in that case.
    pub fn run_once(&mut self, timeout: Duration) -> Result<bool> {
        match self.inbox.recv_timeout(timeout) {
            Ok(delivery) => {
                self.handle(delivery)?;
                Ok(true)
            }
            Err(RecvError::Timeout) => {
                self.mux.poll_timeout();
                Ok(false)
            }
            Err(RecvError::Disconnected) => Err(MuxError::Disconnected),
        }
    }

    /// Loop until `stop` is set, then drain the mailbox.
    pub fn run(&mut self, stop: &AtomicBool, idle: Duration) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            self.run_once(idle)?;
        }
        // Finish what is already queued so replies in flight reach the link.
        while self.run_once(Duration::ZERO)? {}
        debug!("mux task stopping");
        Ok(())
    }

    fn handle(&mut self, delivery: Delivery) -> Result<()> {
        let source = delivery.source();
        let event = delivery.event();

        if source == MUX_INTERNAL {
            if event == DLCI_SEND {
                let dlci = delivery.immediate();
                let data = delivery.data();
                drop(delivery);
                return self.mux.send_uih(dlci, &data);
            }
            trace!(event, "internal event");
        } else if Some(source) == mux_dlci(CONTROL) {
            debug!(event = format_args!("{event:#06x}"), "control channel event");
        } else if self.echo && Some(source) == mux_dlci(ECHO) {
            if event == DATA_RCVD && delivery.has_data() {
                let data = delivery.data();
                drop(delivery);
                if !self.mux.handle().send(ECHO, &data) {
                    debug!("echo dropped, channel not open");
                }
            }
        } else if source == self.link_source {
            if event & termios_event::INPUT_RX != 0 && delivery.has_data() {
                let data = delivery.data();
                drop(delivery);
                let written = self.rx.write(&data);
                if written < data.len() {
                    warn!(dropped = data.len() - written, "receive ring full");
                }
                self.mux.recv_data(&self.rx)?;
            }
        }
        Ok(())
    }
}

/// Reads the link and publishes what arrives as termios `INPUT_RX` events,
/// standing in for the UART receive interrupt.
pub struct RxPump<R> {
    bus: Arc<Bus>,
    source: u8,
    reader: R,
}

const RX_CHUNK: usize = 256;

impl<R: Read> RxPump<R> {
    pub fn new(bus: Arc<Bus>, port: u8, reader: R) -> Result<Self> {
        let source = termios_port(port).ok_or(MuxError::SubscriptionRejected(port))?;
        Ok(Self { bus, source, reader })
    }

    /// Read once and publish. Returns bytes read; 0 means end of stream.
    pub fn pump(&mut self) -> Result<usize> {
        let mut buf = [0u8; RX_CHUNK];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    self.bus
                        .publish_data(self.source, termios_event::INPUT_RX, &buf[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(MuxError::Io(err)),
            }
        }
    }

    /// Pump until end of stream or `stop`. Read timeouts just re-check `stop`.
    pub fn run(mut self, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            match self.pump() {
                Ok(0) => {
                    info!("link closed by peer");
                    return Ok(());
                }
                Ok(_) => {}
                Err(MuxError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;
    use vanet_pool::{PoolAllocator, PoolConfig};
    use vanet_tkvs::{BusConfig, ManualClock};

    use super::*;
    use crate::channel::ChannelState;
    use crate::codec::{encode_frame, FrameType};
    use crate::testutil::{parse_wire, SharedSink};

    const TICK: Duration = Duration::from_millis(10);

    fn bus(max_subscriptions: usize) -> Arc<Bus> {
        let pools = PoolAllocator::new(PoolConfig::default()).unwrap();
        Arc::new(Bus::new(Arc::new(pools), BusConfig { max_subscriptions }))
    }

    fn task_with(config: MuxConfig) -> (MuxTask, Arc<Bus>, SharedSink) {
        let bus = bus(32);
        let link = SharedSink::default();
        let mux = Mux::new(
            Arc::clone(&bus),
            Arc::new(ManualClock::new(32)),
            link.clone(),
            &config,
        );
        (MuxTask::new(mux, &config).unwrap(), bus, link)
    }

    fn frame(dlci: u8, control: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(dlci, control, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    fn link_rx(bus: &Bus, bytes: &[u8]) {
        bus.publish_data(termios_port(0).unwrap(), termios_event::INPUT_RX, bytes);
    }

    fn settle(task: &mut MuxTask) -> usize {
        let mut handled = 0;
        while task.run_once(TICK).unwrap() {
            handled += 1;
        }
        handled
    }

    #[test]
    fn echo_channel_loops_data_back() {
        let (mut task, bus, link) = task_with(MuxConfig::default());
        let mut wire = frame(CONTROL, FrameType::Sabm.with_pf(), &[]);
        wire.extend(frame(ECHO, FrameType::Sabm.with_pf(), &[]));
        wire.extend(frame(ECHO, FrameType::Uih.control(), b"ping"));
        link_rx(&bus, &wire);

        assert!(settle(&mut task) >= 5);

        let out = parse_wire(&link.take());
        let kinds: Vec<_> = out.iter().map(|f| (f.dlci(), f.frame_type())).collect();
        assert_eq!(
            kinds,
            vec![
                (CONTROL, Some(FrameType::Ua)),
                (ECHO, Some(FrameType::Ua)),
                (ECHO, Some(FrameType::Uih)),
            ]
        );
        assert_eq!(&out[2].info[..], b"ping");
    }

    #[test]
    fn received_bytes_split_across_deliveries() {
        let (mut task, bus, link) = task_with(MuxConfig::default());
        let wire = frame(CONTROL, FrameType::Sabm.with_pf(), &[]);
        for piece in wire.chunks(2) {
            link_rx(&bus, piece);
        }
        settle(&mut task);
        assert_eq!(task.mux().channels().get(CONTROL), ChannelState::Opened);
        assert_eq!(parse_wire(&link.take()).len(), 1);
    }

    #[test]
    fn handle_sends_go_through_the_task() {
        let (mut task, _bus, link) = task_with(MuxConfig::default());
        let handle = task.mux().handle();
        assert!(!handle.send(CONTROL, b"status"));

        task.mux().force_state(CONTROL, ChannelState::Opened);
        assert!(handle.send(CONTROL, b"status"));
        assert!(link.take().is_empty());

        assert!(task.run_once(TICK).unwrap());
        let out = parse_wire(&link.take());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].frame_type(), Some(FrameType::Uih));
        assert_eq!(&out[0].info[..], b"status");
    }

    #[test]
    fn echo_disabled_refuses_echo_channel() {
        let config = MuxConfig {
            echo: false,
            ..MuxConfig::default()
        };
        let (mut task, bus, link) = task_with(config);
        let mut wire = frame(CONTROL, FrameType::Sabm.with_pf(), &[]);
        wire.extend(frame(ECHO, FrameType::Sabm.with_pf(), &[]));
        link_rx(&bus, &wire);
        settle(&mut task);

        let kinds: Vec<_> = parse_wire(&link.take())
            .iter()
            .map(|f| (f.dlci(), f.frame_type()))
            .collect();
        assert_eq!(kinds[1], (ECHO, Some(FrameType::Dm)));
    }

    #[test]
    fn idle_receive_times_out() {
        let (mut task, _bus, _link) = task_with(MuxConfig::default());
        assert!(!task.run_once(TICK).unwrap());
    }

    #[test]
    fn run_returns_when_stopped() {
        let (mut task, _bus, _link) = task_with(MuxConfig::default());
        let stop = AtomicBool::new(true);
        task.run(&stop, TICK).unwrap();
    }

    #[test]
    fn full_subscription_table_is_an_error() {
        let bus = bus(2);
        let config = MuxConfig::default();
        let mux = Mux::new(
            Arc::clone(&bus),
            Arc::new(ManualClock::new(32)),
            SharedSink::default(),
            &config,
        );
        assert!(matches!(
            MuxTask::new(mux, &config),
            Err(MuxError::SubscriptionRejected(_))
        ));
    }

    #[test]
    fn bad_termios_port_is_rejected() {
        let config = MuxConfig {
            termios_port: 9,
            ..MuxConfig::default()
        };
        let mux = Mux::new(
            bus(32),
            Arc::new(ManualClock::new(32)),
            SharedSink::default(),
            &config,
        );
        assert!(MuxTask::new(mux, &config).is_err());
    }

    #[test]
    fn rx_pump_feeds_the_task() {
        let (mut task, bus, link) = task_with(MuxConfig::default());
        let wire = frame(CONTROL, FrameType::Sabm.with_pf(), &[]);
        let mut pump = RxPump::new(Arc::clone(&bus), 0, Cursor::new(wire.clone())).unwrap();
        assert_eq!(pump.pump().unwrap(), wire.len());
        assert_eq!(pump.pump().unwrap(), 0);

        settle(&mut task);
        assert_eq!(parse_wire(&link.take())[0].frame_type(), Some(FrameType::Ua));
    }

    #[test]
    fn rx_pump_run_stops_at_eof() {
        let bus = bus(32);
        let pump = RxPump::new(bus, 0, Cursor::new(vec![0xF9, 0x00])).unwrap();
        pump.run(&AtomicBool::new(false)).unwrap();
    }
}
