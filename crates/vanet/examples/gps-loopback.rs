//! Board and main board in one process, joined by a socket pair.
//!
//! The board side runs the mux task, the one-second tick and a GPS task
//! that reports a position sentence on the GPS_RAW channel every tick.
//! The main-board side opens the channel and prints three reports.
//!
//! Run with:
//!   cargo run -p vanet --example gps-loopback

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vanet::bus::source::{clock_event, mux_dlci, CLOCK};
use vanet::bus::{mailbox, Bus, BusConfig, Clock, SystemClock, TimerService, ALL_EVENTS};
use vanet::mux::channel::{CONTROL, GPS_RAW};
use vanet::mux::{FrameType, FrameWriter, LengthMode, Mux, MuxConfig, MuxTask, Parser, RxPump};
use vanet::pool::{PoolAllocator, PoolConfig};
use vanet::transport::LinkStream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (board_end, host_end) = LinkStream::pair()?;
    board_end.set_read_timeout(Some(Duration::from_millis(50)))?;
    host_end.set_read_timeout(Some(Duration::from_millis(50)))?;

    let bus = Arc::new(Bus::new(
        Arc::new(PoolAllocator::new(PoolConfig::default())?),
        BusConfig::default(),
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::default());
    let config = MuxConfig::default();
    let mux = Mux::new(Arc::clone(&bus), Arc::clone(&clock), board_end.try_clone()?, &config);
    let handle = mux.handle();
    let mut task = MuxTask::new(mux, &config)?;

    // The GPS task listens on its channel and on the second tick.
    let (gps_tx, gps_inbox) = mailbox(8);
    bus.subscribe(mux_dlci(GPS_RAW).ok_or("no GPS source")?, ALL_EVENTS, &gps_tx, 2);
    bus.subscribe(CLOCK, clock_event::TICK_1S, &gps_tx, 2);

    let timers = TimerService::new(Arc::clone(&bus), clock);
    timers.start_second_tick()?;

    let stop = AtomicBool::new(false);
    thread::scope(|scope| -> Result<(), Box<dyn std::error::Error>> {
        scope.spawn(|| task.run(&stop, Duration::from_millis(50)));
        scope.spawn(|| {
            RxPump::new(Arc::clone(&bus), config.termios_port, board_end)
                .and_then(|pump| pump.run(&stop))
        });
        scope.spawn(|| timers.run(&stop));
        scope.spawn(|| {
            let inbox = gps_inbox;
            let mut fix = 0u32;
            while !stop.load(Ordering::Relaxed) {
                let Ok(delivery) = inbox.recv_timeout(Duration::from_millis(50)) else {
                    continue;
                };
                if delivery.source() == CLOCK {
                    fix += 1;
                    let sentence = format!("$GPRMC,{fix:06},A,2609.1,N,08008.6,W");
                    handle.send(GPS_RAW, sentence.as_bytes());
                }
            }
        });

        let result = main_board(host_end);
        stop.store(true, Ordering::Relaxed);
        result
    })
}

fn main_board(link: LinkStream) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = link.try_clone()?;
    let mut writer = FrameWriter::new(link);
    writer.write_frame(CONTROL, FrameType::Sabm.with_pf(), &[])?;
    writer.write_frame(GPS_RAW, FrameType::Sabm.with_pf(), &[])?;

    let mut parser = Parser::new(LengthMode::Combined, u32::MAX);
    let mut reports = 0;
    let mut buf = [0u8; 256];
    while reports < 3 {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(err) => return Err(err.into()),
        };
        for frame in buf[..n].iter().filter_map(|&b| parser.push(b, 0)) {
            match frame.frame_type() {
                Some(FrameType::Uih) => {
                    reports += 1;
                    eprintln!("dlci {}: {}", frame.dlci(), String::from_utf8_lossy(&frame.info));
                }
                kind => eprintln!("dlci {}: {:?}", frame.dlci(), kind),
            }
        }
    }
    Ok(())
}
