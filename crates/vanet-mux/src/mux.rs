use std::io::Write;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use vanet_tkvs::source::{mux_dlci, MUX_INTERNAL};
use vanet_tkvs::{Bus, Clock, ALL_EVENTS};
use vanet_transport::CircBuffer;

use crate::channel::{channel_name, in_range, ChannelReport, ChannelState, ChannelTable, CONTROL, NUM_DLCIS};
use crate::codec::{Frame, FrameStatus, FrameType, MAX_INFO_LEN};
use crate::config::MuxConfig;
use crate::error::{MuxError, Result};
use crate::event::{CONNECT, DATA_RCVD, DISCONNECT, DLCI_SEND};
use crate::parser::{Parser, ParserStats};
use crate::writer::FrameWriter;

type Link = Box<dyn Write + Send>;

/// Mux context: channel table, receive parser and the link writer.
///
/// Owned by the mux task. Other tasks transmit through a [`MuxHandle`],
/// which hands the payload to the task over the bus.
pub struct Mux {
    bus: Arc<Bus>,
    clock: Arc<dyn Clock>,
    channels: Arc<ChannelTable>,
    parser: Parser,
    writer: FrameWriter<Link>,
}

impl Mux {
    pub fn new<W>(bus: Arc<Bus>, clock: Arc<dyn Clock>, link: W, config: &MuxConfig) -> Self
    where
        W: Write + Send + 'static,
    {
        let timeout = clock.ms_to_ticks(config.frame_timeout_ms);
        Self {
            bus,
            clock,
            channels: Arc::new(ChannelTable::new()),
            parser: Parser::new(config.length_mode, timeout),
            writer: FrameWriter::new(Box::new(link)),
        }
    }

    /// Cloneable sender for other tasks.
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            bus: Arc::clone(&self.bus),
            channels: Arc::clone(&self.channels),
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn channels(&self) -> &Arc<ChannelTable> {
        &self.channels
    }

    pub fn parser_stats(&self) -> ParserStats {
        self.parser.stats()
    }

    pub fn frames_written(&self) -> u32 {
        self.writer.frames_written()
    }

    /// Parse and dispatch everything queued in `ring`. Returns the number of
    /// frames dispatched.
    pub fn recv_data(&mut self, ring: &CircBuffer) -> Result<usize> {
        let mut dispatched = 0;
        while !ring.is_empty() {
            let now = self.clock.ticks();
            let (processed, frame) = self.parser.find_frame(ring, now);
            if let Some(frame) = frame {
                match frame.status {
                    FrameStatus::Valid => {
                        self.dispatch(&frame)?;
                        dispatched += 1;
                    }
                    status => warn!(
                        dlci = frame.dlci(),
                        control = format_args!("{:#04x}", frame.control),
                        ?status,
                        "dropping bad frame"
                    ),
                }
            }
            if processed == 0 {
                break;
            }
        }
        Ok(dispatched)
    }

    /// Drop a partial frame that has gone stale. Called when the link is idle.
    pub fn poll_timeout(&mut self) -> bool {
        self.parser.expire(self.clock.ticks())
    }

    /// Act on one valid received frame.
    pub fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        let dlci = frame.dlci();
        debug!(
            dlci,
            kind = frame.frame_type().map_or("unknown", FrameType::name),
            len = frame.info.len(),
            "frame received"
        );
        match frame.frame_type() {
            Some(FrameType::Sabm) => self.on_sabm(dlci),
            Some(FrameType::Disc) => self.on_disc(dlci),
            Some(FrameType::Uih) => self.on_uih(dlci, &frame.info),
            Some(FrameType::Ua) => {
                self.on_ua(dlci);
                Ok(())
            }
            Some(FrameType::Dm) => {
                self.on_dm(dlci);
                Ok(())
            }
            Some(FrameType::Ui) | None => {
                trace!(dlci, control = frame.control, "ignoring frame");
                Ok(())
            }
        }
    }

    /// Write a frame straight to the link.
    pub fn write_frame(&mut self, dlci: u8, control: u8, payload: &[u8]) -> Result<()> {
        self.writer.write_frame(dlci, control, payload)
    }

    /// Write a UIH data frame straight to the link.
    pub fn send_uih(&mut self, dlci: u8, payload: &[u8]) -> Result<()> {
        self.writer.send(dlci, payload)
    }

    /// Ask the peer to open `dlci`.
    pub fn open(&mut self, dlci: u8) -> Result<()> {
        if !in_range(dlci) {
            return Err(MuxError::InvalidDlci(dlci));
        }
        self.writer.write_frame(dlci, FrameType::Sabm.with_pf(), &[])?;
        self.channels.set(dlci, ChannelState::OpenPending);
        Ok(())
    }

    /// Ask the peer to close `dlci`.
    pub fn close(&mut self, dlci: u8) -> Result<()> {
        if !in_range(dlci) {
            return Err(MuxError::InvalidDlci(dlci));
        }
        self.writer.write_frame(dlci, FrameType::Disc.with_pf(), &[])?;
        self.channels.set(dlci, ChannelState::ClosePending);
        Ok(())
    }

    /// Override the state of `dlci` without any frame exchange.
    pub fn force_state(&self, dlci: u8, state: ChannelState) -> bool {
        let set = self.channels.set(dlci, state);
        if set {
            info!(dlci, %state, "channel state forced");
        }
        set
    }

    pub fn channel_report(&self) -> Vec<ChannelReport> {
        (0..NUM_DLCIS)
            .map(|dlci| ChannelReport {
                dlci,
                name: channel_name(dlci),
                subscribed: self.is_subscribed(dlci),
                state: self.channels.get(dlci),
            })
            .collect()
    }

    fn is_subscribed(&self, dlci: u8) -> bool {
        mux_dlci(dlci).is_some_and(|source| self.bus.is_subscribed(source, ALL_EVENTS))
    }

    fn reply(&mut self, dlci: u8, kind: FrameType) -> Result<()> {
        self.writer.write_frame(dlci, kind.with_pf(), &[])
    }

    fn publish(&self, dlci: u8, event: u16) {
        if let Some(source) = mux_dlci(dlci) {
            self.bus.publish_immediate(source, event, 0);
        }
    }

    fn on_sabm(&mut self, dlci: u8) -> Result<()> {
        let gate_open = dlci == CONTROL || self.channels.is_open(CONTROL);
        if in_range(dlci) && self.is_subscribed(dlci) && gate_open {
            self.reply(dlci, FrameType::Ua)?;
            self.channels.set(dlci, ChannelState::Opened);
            info!(dlci, name = channel_name(dlci), "channel opened by peer");
            self.publish(dlci, CONNECT);
        } else {
            debug!(dlci, gate_open, "refusing connect");
            self.reply(dlci, FrameType::Dm)?;
            self.channels.set(dlci, ChannelState::Closed);
        }
        Ok(())
    }

    fn on_disc(&mut self, dlci: u8) -> Result<()> {
        if self.is_subscribed(dlci) {
            self.reply(dlci, FrameType::Ua)?;
            info!(dlci, name = channel_name(dlci), "channel closed by peer");
            self.publish(dlci, DISCONNECT);
        } else {
            self.reply(dlci, FrameType::Dm)?;
        }
        self.channels.set(dlci, ChannelState::Closed);
        Ok(())
    }

    fn on_uih(&mut self, dlci: u8, info: &[u8]) -> Result<()> {
        match mux_dlci(dlci) {
            Some(source) if self.bus.is_subscribed(source, ALL_EVENTS) && self.channels.is_open(dlci) => {
                self.bus.publish_data(source, DATA_RCVD, info);
                Ok(())
            }
            _ => {
                debug!(dlci, state = %self.channels.get(dlci), "data on unusable channel");
                self.reply(dlci, FrameType::Dm)
            }
        }
    }

    fn on_ua(&mut self, dlci: u8) {
        match self.channels.get(dlci) {
            ChannelState::OpenPending => {
                self.channels.set(dlci, ChannelState::Opened);
                info!(dlci, "channel open acknowledged");
                self.publish(dlci, CONNECT);
            }
            ChannelState::ClosePending => {
                self.channels.set(dlci, ChannelState::Closed);
                info!(dlci, "channel close acknowledged");
                self.publish(dlci, DISCONNECT);
            }
            state => debug!(dlci, %state, "unsolicited UA"),
        }
    }

    fn on_dm(&mut self, dlci: u8) {
        if self.channels.set(dlci, ChannelState::Closed) {
            debug!(dlci, "peer refused channel");
        }
    }
}

/// Transmit side of the mux, usable from any task.
#[derive(Clone)]
pub struct MuxHandle {
    bus: Arc<Bus>,
    channels: Arc<ChannelTable>,
}

impl MuxHandle {
    /// Queue `data` for transmission on `dlci`.
    ///
    /// Silently does nothing (returns `false`) unless the DLCI is in range,
    /// has a subscriber, and is open; nothing is framed for a channel
    /// nobody listens on.
    pub fn send(&self, dlci: u8, data: &[u8]) -> bool {
        let Some(source) = mux_dlci(dlci) else {
            return false;
        };
        if data.len() > MAX_INFO_LEN
            || !self.bus.is_subscribed(source, ALL_EVENTS)
            || !self.channels.is_open(dlci)
        {
            trace!(dlci, len = data.len(), "send skipped");
            return false;
        }
        self.bus
            .publish_immediate_with_data(MUX_INTERNAL, DLCI_SEND, dlci, data);
        true
    }

    pub fn state(&self, dlci: u8) -> ChannelState {
        self.channels.get(dlci)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use vanet_pool::{PoolAllocator, PoolConfig};
    use vanet_tkvs::{mailbox, BusConfig, Mailbox, ManualClock};

    use super::*;
    use crate::channel::{ECHO, TIMESYNC, UNIFIED};
    use crate::codec::encode_frame;
    use crate::testutil::{parse_wire, SharedSink};

    struct Rig {
        mux: Mux,
        clock: Arc<ManualClock>,
        link: SharedSink,
        ring: CircBuffer,
        inbox: Mailbox,
    }

    /// Mux with one mailbox subscribed to DLCI 0, DLCI 2 and mux internal.
    fn rig() -> Rig {
        let pools = PoolAllocator::new(PoolConfig::default()).unwrap();
        let bus = Arc::new(Bus::new(Arc::new(pools), BusConfig::default()));
        let clock = Arc::new(ManualClock::new(32));
        let link = SharedSink::default();
        let (tx, inbox) = mailbox(16);
        for source in [mux_dlci(CONTROL).unwrap(), mux_dlci(UNIFIED).unwrap(), MUX_INTERNAL] {
            assert!(bus.subscribe(source, ALL_EVENTS, &tx, 1));
        }
        let mux = Mux::new(
            Arc::clone(&bus),
            clock.clone(),
            link.clone(),
            &MuxConfig::default(),
        );
        Rig {
            mux,
            clock,
            link,
            ring: CircBuffer::new(512),
            inbox,
        }
    }

    fn frame(dlci: u8, control: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(dlci, control, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    impl Rig {
        fn feed(&mut self, bytes: &[u8]) -> usize {
            assert_eq!(self.ring.write(bytes), bytes.len());
            self.mux.recv_data(&self.ring).unwrap()
        }

        fn replies(&self) -> Vec<(u8, Option<FrameType>)> {
            parse_wire(&self.link.take())
                .iter()
                .map(|f| (f.dlci(), f.frame_type()))
                .collect()
        }

        fn events(&self) -> Vec<(u8, u16)> {
            self.inbox
                .drain()
                .iter()
                .map(|d| (d.source(), d.event()))
                .collect()
        }
    }

    #[test]
    fn sabm_on_control_channel_opens_it() {
        let mut rig = rig();
        assert_eq!(rig.feed(&frame(0, FrameType::Sabm.with_pf(), &[])), 1);
        assert_eq!(rig.link.take(), vec![0xF9, 0x03, 0x73, 0x01, 0xD7, 0xF9]);
        assert_eq!(rig.mux.channels().get(0), ChannelState::Opened);
        assert_eq!(rig.events(), vec![(mux_dlci(0).unwrap(), CONNECT)]);
    }

    #[test]
    fn data_channel_waits_for_control_channel() {
        let mut rig = rig();
        rig.feed(&frame(UNIFIED, FrameType::Sabm.with_pf(), &[]));
        assert_eq!(rig.replies(), vec![(UNIFIED, Some(FrameType::Dm))]);
        assert_eq!(rig.mux.channels().get(UNIFIED), ChannelState::Closed);

        rig.feed(&frame(0, FrameType::Sabm.with_pf(), &[]));
        rig.feed(&frame(UNIFIED, FrameType::Sabm.with_pf(), &[]));
        assert_eq!(
            rig.replies(),
            vec![(0, Some(FrameType::Ua)), (UNIFIED, Some(FrameType::Ua))]
        );
        assert_eq!(rig.mux.channels().get(UNIFIED), ChannelState::Opened);
    }

    #[test]
    fn sabm_without_subscriber_is_refused() {
        let mut rig = rig();
        rig.feed(&frame(0, FrameType::Sabm.with_pf(), &[]));
        rig.link.take();
        rig.feed(&frame(TIMESYNC, FrameType::Sabm.with_pf(), &[]));
        assert_eq!(rig.replies(), vec![(TIMESYNC, Some(FrameType::Dm))]);
        assert_eq!(rig.mux.channels().get(TIMESYNC), ChannelState::Closed);
    }

    #[test]
    fn sabm_out_of_range_is_refused() {
        let mut rig = rig();
        rig.feed(&frame(0, FrameType::Sabm.with_pf(), &[]));
        rig.link.take();
        rig.feed(&frame(9, FrameType::Sabm.with_pf(), &[]));
        assert_eq!(rig.replies(), vec![(9, Some(FrameType::Dm))]);
    }

    #[test]
    fn uih_on_open_channel_publishes_payload() {
        let mut rig = rig();
        rig.mux.force_state(0, ChannelState::Opened);
        rig.mux.force_state(UNIFIED, ChannelState::Opened);
        rig.feed(&frame(UNIFIED, FrameType::Uih.control(), b"$PTKL,1,2"));

        assert!(rig.link.take().is_empty());
        let got = rig.inbox.try_recv().unwrap();
        assert_eq!(got.source(), mux_dlci(UNIFIED).unwrap());
        assert_eq!(got.event(), DATA_RCVD);
        assert_eq!(&got.data()[..], b"$PTKL,1,2");
    }

    #[test]
    fn uih_on_closed_channel_replies_dm() {
        let mut rig = rig();
        rig.feed(&frame(UNIFIED, FrameType::Uih.control(), b"early"));
        assert_eq!(rig.replies(), vec![(UNIFIED, Some(FrameType::Dm))]);
        assert!(rig.events().is_empty());
    }

    #[test]
    fn disc_closes_channel() {
        let mut rig = rig();
        rig.mux.force_state(UNIFIED, ChannelState::Opened);
        rig.feed(&frame(UNIFIED, FrameType::Disc.with_pf(), &[]));
        assert_eq!(rig.replies(), vec![(UNIFIED, Some(FrameType::Ua))]);
        assert_eq!(rig.events(), vec![(mux_dlci(UNIFIED).unwrap(), DISCONNECT)]);
        assert_eq!(rig.mux.channels().get(UNIFIED), ChannelState::Closed);
    }

    #[test]
    fn disc_unsubscribed_or_out_of_range_replies_dm() {
        let mut rig = rig();
        rig.feed(&frame(ECHO, FrameType::Disc.with_pf(), &[]));
        rig.feed(&frame(40, FrameType::Disc.with_pf(), &[]));
        assert_eq!(
            rig.replies(),
            vec![(ECHO, Some(FrameType::Dm)), (40, Some(FrameType::Dm))]
        );
    }

    #[test]
    fn bad_fcs_and_unknown_types_get_no_reply() {
        let mut rig = rig();
        let mut bad = frame(0, FrameType::Sabm.with_pf(), &[]);
        bad[4] ^= 0xFF;
        assert_eq!(rig.feed(&bad), 0);
        rig.feed(&frame(0, FrameType::Ui.control(), b"ui"));
        assert!(rig.link.take().is_empty());
        assert_eq!(rig.mux.channels().get(0), ChannelState::Closed);
        assert_eq!(rig.mux.parser_stats().fcs_errors, 1);
    }

    #[test]
    fn local_open_and_close_complete_on_ua() {
        let mut rig = rig();
        rig.mux.open(UNIFIED).unwrap();
        assert_eq!(rig.replies(), vec![(UNIFIED, Some(FrameType::Sabm))]);
        assert_eq!(rig.mux.channels().get(UNIFIED), ChannelState::OpenPending);

        rig.feed(&frame(UNIFIED, FrameType::Ua.with_pf(), &[]));
        assert_eq!(rig.mux.channels().get(UNIFIED), ChannelState::Opened);
        assert_eq!(rig.events(), vec![(mux_dlci(UNIFIED).unwrap(), CONNECT)]);

        rig.mux.close(UNIFIED).unwrap();
        assert_eq!(rig.replies(), vec![(UNIFIED, Some(FrameType::Disc))]);
        assert_eq!(rig.mux.channels().get(UNIFIED), ChannelState::ClosePending);
        rig.feed(&frame(UNIFIED, FrameType::Ua.with_pf(), &[]));
        assert_eq!(rig.mux.channels().get(UNIFIED), ChannelState::Closed);
        assert_eq!(rig.events(), vec![(mux_dlci(UNIFIED).unwrap(), DISCONNECT)]);
    }

    #[test]
    fn dm_refuses_pending_open() {
        let mut rig = rig();
        rig.mux.open(TIMESYNC).unwrap();
        rig.feed(&frame(TIMESYNC, FrameType::Dm.with_pf(), &[]));
        assert_eq!(rig.mux.channels().get(TIMESYNC), ChannelState::Closed);
        assert!(matches!(rig.mux.open(7), Err(MuxError::InvalidDlci(7))));
    }

    #[test]
    fn handle_send_requires_open_subscribed_channel() {
        let rig = rig();
        let handle = rig.mux.handle();
        assert!(!handle.send(UNIFIED, b"nope"));
        assert!(!handle.send(TIMESYNC, b"nope"));
        assert!(!handle.send(9, b"nope"));

        rig.mux.force_state(UNIFIED, ChannelState::Opened);
        assert!(!handle.send(UNIFIED, &[0u8; 129]));
        assert!(handle.send(UNIFIED, b"fix"));

        let got = rig.inbox.try_recv().unwrap();
        assert_eq!(got.source(), MUX_INTERNAL);
        assert_eq!(got.event(), DLCI_SEND);
        assert_eq!(got.immediate(), UNIFIED);
        assert_eq!(&got.data()[..], b"fix");
        assert_eq!(handle.state(UNIFIED), ChannelState::Opened);
    }

    #[test]
    fn stale_partial_frame_is_dropped() {
        let mut rig = rig();
        let sabm = frame(0, FrameType::Sabm.with_pf(), &[]);
        rig.feed(&sabm[..3]);
        rig.clock.advance(65);
        assert!(rig.mux.poll_timeout());
        assert_eq!(rig.feed(&sabm), 1);
        assert_eq!(rig.mux.channels().get(0), ChannelState::Opened);
        assert_eq!(rig.mux.parser_stats().timeouts, 1);
    }

    #[test]
    fn report_lists_every_channel() {
        let rig = rig();
        rig.mux.force_state(UNIFIED, ChannelState::Opened);
        let report = rig.mux.channel_report();
        assert_eq!(report.len(), NUM_DLCIS as usize);
        assert!(report[0].subscribed);
        assert!(!report[1].subscribed);
        assert_eq!(report[2].state, ChannelState::Opened);
        assert!(!rig.mux.force_state(6, ChannelState::Opened));
    }
}
