use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};
use vanet_mux::event::{CONNECT, DATA_RCVD, DISCONNECT};
use vanet_mux::{channel_name, Mux, MuxTask, RxPump, NUM_DLCIS};
use vanet_pool::PoolAllocator;
use vanet_tkvs::source::{mux_dlci, MUX_DLCI_START};
use vanet_tkvs::{mailbox, Bus, Clock, Delivery, RecvError, SystemClock};
use vanet_transport::{CircBuffer, SerialTx, TxPump, UnixLink};

use crate::cmd::LinkArgs;
use crate::config::BoardConfig;
use crate::exit::{
    mux_error, pool_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE,
};
use crate::output::{payload_preview, print_event, print_report, EventOutput, OutputFormat};

const MONITOR_POLL: Duration = Duration::from_millis(100);

pub fn run(args: LinkArgs, format: OutputFormat) -> CliResult<i32> {
    let config = BoardConfig::load(args.config.as_deref())?;
    let pools = PoolAllocator::new(config.pools.clone())
        .map_err(|err| pool_error("invalid pool table", err))?;
    let bus = Arc::new(Bus::new(Arc::new(pools), config.bus.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.tick_hz));

    let (monitor_tx, monitor) = mailbox(config.mux.mailbox_depth);
    let channels = args
        .channels
        .clone()
        .unwrap_or_else(|| (0..NUM_DLCIS).collect());
    for dlci in channels {
        let source = mux_dlci(dlci)
            .ok_or_else(|| CliError::new(USAGE, format!("DLCI {dlci} out of range")))?;
        if !bus.subscribe(source, CONNECT | DISCONNECT | DATA_RCVD, &monitor_tx, 1) {
            return Err(CliError::new(INTERNAL, "subscription table full"));
        }
    }

    let listener = UnixLink::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %args.path.display(), "waiting for main board");
    let stream = listener
        .accept()
        .map_err(|err| transport_error("accept failed", err))?;
    stream
        .set_read_timeout(Some(config.link.poll_interval))
        .map_err(|err| transport_error("link setup failed", err))?;
    let reader = stream
        .try_clone()
        .map_err(|err| transport_error("link setup failed", err))?;
    info!("main board connected");

    let tx_ring = Arc::new(CircBuffer::new(config.link.tx_ring.max(2)));
    let serial = SerialTx::new(Arc::clone(&tx_ring), &config.link);
    let mux = Mux::new(Arc::clone(&bus), clock, serial, &config.mux);
    let mut task = MuxTask::new(mux, &config.mux).map_err(|err| mux_error("mux setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;
    let stopped = AtomicBool::new(false);
    let tx_stopped = AtomicBool::new(false);
    let poll = config.link.poll_interval;

    let stop_all = || {
        running.store(false, Ordering::SeqCst);
        stopped.store(true, Ordering::SeqCst);
    };

    let mut printed = 0usize;
    let outcome = thread::scope(|scope| {
        let tx = scope.spawn(|| TxPump::new(tx_ring, stream).run(&tx_stopped, poll));
        let rx = scope.spawn(|| {
            let result = RxPump::new(Arc::clone(&bus), config.mux.termios_port, reader)
                .and_then(|pump| pump.run(&stopped));
            stop_all();
            result
        });
        let mux = scope.spawn(|| {
            let result = task.run(&stopped, poll);
            stop_all();
            (result, task.mux().channel_report())
        });

        while running.load(Ordering::SeqCst) {
            match monitor.recv_timeout(MONITOR_POLL) {
                Ok(delivery) => {
                    print_event(&event_output(&delivery), format);
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        break;
                    }
                }
                Err(RecvError::Timeout) => {}
                Err(RecvError::Disconnected) => break,
            }
        }
        stop_all();

        let rx_result = rx.join();
        let mux_result = mux.join();
        tx_stopped.store(true, Ordering::SeqCst);
        let tx_result = tx.join();
        (rx_result, mux_result, tx_result)
    });

    let (rx_result, mux_result, tx_result) = outcome;
    let panicked = || CliError::new(INTERNAL, "link worker panicked");
    let (mux_result, report) = mux_result.map_err(|_| panicked())?;

    if args.report {
        print_report(&report, format);
    }
    rx_result
        .map_err(|_| panicked())?
        .map_err(|err| mux_error("link receive failed", err))?;
    mux_result.map_err(|err| mux_error("mux task failed", err))?;
    if let Err(err) = tx_result.map_err(|_| panicked())? {
        warn!(%err, "transmit pump stopped with error");
    }

    info!(events = printed, "link closed");
    Ok(SUCCESS)
}

fn event_output(delivery: &Delivery) -> EventOutput {
    let dlci = delivery.source().wrapping_sub(MUX_DLCI_START);
    let data = delivery.data();
    EventOutput {
        dlci,
        channel: channel_name(dlci),
        event: match delivery.event() {
            CONNECT => "connect",
            DISCONNECT => "disconnect",
            DATA_RCVD => "data",
            _ => "other",
        },
        len: data.len(),
        payload: payload_preview(&data),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
