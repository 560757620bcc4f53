use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use burst_relay::{
    args::{convert_filter, path_or_std, Args, BridgeArgs, Command, SinkArgs, SourceArgs},
    capture::{read_samples, segment_ring, BurstTagger},
    exfil::{run_scheduler, write_samples, Pacer},
    monitoring::StatsReporter,
    tags::{TimeTagger, TX_SOB},
    transport::{
        ingress::{IngressThread, DEFAULT_POLL_INTERVAL},
        push_pull::{PullSource, PushSink, ZmqConfig},
        udp::{BridgeConfig, BridgeKind, UdpBridge},
    },
    Error, Result, Scheduler, Segmenter, Timestamp, PULL_SIZE,
};
use clap::Parser;
use crossbeam_channel::unbounded;
use rtrb::RingBuffer;
use tracing::{info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed)) {
            warn!("could not install Ctrl-C handler: {}", e);
        }
    }

    match args.command {
        Command::Sink(sink) => run_sink(sink, stop),
        Command::Source(source) => run_source(source, stop),
        Command::Bridge(bridge) => run_bridge(bridge, stop),
    }
}

fn run_sink(args: SinkArgs, stop: Arc<AtomicBool>) -> Result<()> {
    let config = args.segmenter_config();
    let sob = config.length_tag.is_none();
    let mut segmenter = Segmenter::new(config)?.with_sink(PushSink::new(&args.zmq_config())?);

    let input: Box<dyn Read + Send> = match path_or_std(&args.input) {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(io::stdin()),
    };
    let (producer, consumer) = RingBuffer::new(args.capacity);
    let reader = {
        let stop = stop.clone();
        thread::spawn(move || read_samples(input, producer, &stop))
    };

    let tagger = (args.burst_len > 0).then(|| {
        let tagger = TimeTagger::new(Timestamp::now(), args.sample_rate);
        let tagger = if sob {
            tagger.with_sob_key(TX_SOB)
        } else {
            tagger.with_length_key(&args.length_tag_name)
        };
        BurstTagger::new(tagger, args.burst_len)
    });
    let pacer = args.throttle.then(|| Pacer::new(args.sample_rate));
    let window = args.max_record_size.max(PULL_SIZE);

    info!(address = %args.address, mode = ?segmenter.mode(), "segmenting");
    let consumed = segment_ring(consumer, &mut segmenter, tagger, window, pacer, &stop)?;
    let read = reader
        .join()
        .map_err(|_| Error::ThreadPanicked("reader"))??;
    info!(read, consumed, records = segmenter.sequence(), "sink done");
    Ok(())
}

fn run_source(args: SourceArgs, stop: Arc<AtomicBool>) -> Result<()> {
    let pull = PullSource::new(&args.zmq_config())?;
    let mut scheduler = Scheduler::new(args.scheduler_config())?;
    let ingress = if args.ingress_thread {
        Some(IngressThread::spawn(pull, scheduler.handle(), DEFAULT_POLL_INTERVAL))
    } else {
        scheduler = scheduler.with_source(pull);
        None
    };
    let reporter = (args.stats_interval > 0).then(|| {
        StatsReporter::spawn(scheduler.handle(), Duration::from_secs(args.stats_interval))
    });

    let output: Box<dyn Write + Send> = match path_or_std(&args.output) {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let (producer, consumer) = RingBuffer::new(args.capacity);
    let writer = {
        let stop = stop.clone();
        thread::spawn(move || write_samples(consumer, output, &stop))
    };

    info!(address = %args.address, rate = args.sample_rate, "scheduling");
    let pacer = Some(Pacer::new(args.sample_rate));
    let produced = run_scheduler(&mut scheduler, args.chunk, producer, pacer, ingress, &stop)?;
    let written = writer
        .join()
        .map_err(|_| Error::ThreadPanicked("writer"))??;

    if let Some(stats) = reporter.and_then(StatsReporter::stop) {
        info!(
            on_time = stats.on_time,
            late = stats.late,
            sequence_gaps = stats.sequence_gaps,
            "final stats"
        );
    }
    info!(produced, written, "source done");
    Ok(())
}

fn run_bridge(args: BridgeArgs, stop: Arc<AtomicBool>) -> Result<()> {
    let kind: BridgeKind = args.kind.parse()?;
    let (inbound_tx, inbound_rx) = unbounded();
    let mut bridge = UdpBridge::start(
        &BridgeConfig::new(kind, &args.addr, args.port).mtu(args.mtu),
        inbound_tx,
    )?;
    let ctx = zmq::Context::new();
    let push = PushSink::with_context(&ctx, &ZmqConfig::new(&args.to_zmq).bind(true))?;
    let pull = PullSource::with_context(&ctx, &ZmqConfig::new(&args.from_zmq))?;
    info!(local = ?bridge.local_addr().ok(), "bridge running");

    let (mut up, mut down) = (0u64, 0u64);
    while !stop.load(Ordering::Relaxed) {
        for bytes in inbound_rx.try_iter() {
            push.send_bytes(&bytes)?;
            up += 1;
        }
        if let Some(bytes) = pull.recv_bytes(DEFAULT_POLL_INTERVAL.as_millis() as i64)? {
            bridge.send(&bytes)?;
            down += 1;
        }
    }
    bridge.stop();
    info!(to_zmq = up, to_udp = down, "bridge done");
    Ok(())
}
