//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    scheduler::SchedulerConfig,
    segmenter::SegmenterConfig,
    tags::PACKET_LEN,
    transport::{push_pull::ZmqConfig, udp::DEFAULT_MTU},
    MAX_RECORD_SIZE, PULL_SIZE, RING_CAPACITY,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Cut a sample file into burst records and push them over zmq
    Sink(SinkArgs),
    /// Pull burst records over zmq and rebuild a continuous sample file
    Source(SourceArgs),
    /// Relay records between a UDP peer and a zmq push/pull pair
    Bridge(BridgeArgs),
}

#[derive(clap::Args, Debug)]
pub struct SinkArgs {
    /// Interleaved cf32 input file, `-` for stdin
    #[clap(short, long, default_value = "-")]
    pub input: String,
    /// zmq endpoint to bind the push socket to
    #[clap(short, long, default_value = "tcp://*:5555")]
    pub address: String,
    /// Name logged with every emitted record
    #[clap(long, default_value = "burst")]
    pub event_name: String,
    /// Largest record in samples
    #[clap(short, long, default_value_t = MAX_RECORD_SIZE)]
    pub max_record_size: usize,
    /// Added to every record's start time, in picoseconds
    #[clap(long, default_value_t = 0, allow_hyphen_values = true)]
    pub schedule_offset_ps: i64,
    /// Samples per second
    #[clap(short, long, default_value_t = 1e6)]
    pub sample_rate: f64,
    /// Length tag key; empty splits on start-of-burst tags instead
    #[clap(long, default_value = PACKET_LEN)]
    pub length_tag_name: String,
    /// Synthesize length and time tags every this many samples (0 for none)
    #[clap(short, long, default_value_t = 0)]
    pub burst_len: usize,
    /// Push queue depth in records
    #[clap(long)]
    pub hwm: Option<i32>,
    /// Send timeout in milliseconds
    #[clap(long, default_value_t = 100)]
    pub timeout_ms: i32,
    /// Refuse records that serialize larger than this
    #[clap(long)]
    pub max_frame_bytes: Option<usize>,
    /// Hold the input to the sample rate
    #[clap(long)]
    pub throttle: bool,
    /// Ring buffer capacity in samples
    #[clap(short, long, default_value_t = RING_CAPACITY)]
    pub capacity: usize,
}

impl SinkArgs {
    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig::new(&self.event_name, self.max_record_size, self.sample_rate)
            .length_tag(&self.length_tag_name)
            .schedule_offset_ps(self.schedule_offset_ps)
    }

    pub fn zmq_config(&self) -> ZmqConfig {
        let mut cfg = ZmqConfig::new(&self.address)
            .bind(true)
            .timeout_ms(self.timeout_ms);
        if let Some(hwm) = self.hwm {
            cfg = cfg.hwm(hwm);
        }
        if let Some(limit) = self.max_frame_bytes {
            cfg = cfg.max_frame_bytes(limit);
        }
        cfg
    }
}

#[derive(clap::Args, Debug)]
pub struct SourceArgs {
    /// Interleaved cf32 output file, `-` for stdout
    #[clap(short, long, default_value = "-")]
    pub output: String,
    /// zmq endpoint to connect the pull socket to
    #[clap(short, long, default_value = "tcp://127.0.0.1:5555")]
    pub address: String,
    /// Samples per second
    #[clap(short, long, default_value_t = 1e6)]
    pub sample_rate: f64,
    /// Samples produced per scheduler pull
    #[clap(long, default_value_t = PULL_SIZE)]
    pub chunk: usize,
    /// Whole seconds of the output origin (wall clock on first use if unset)
    #[clap(long, default_value_t = 0)]
    pub start_time_s: i64,
    /// Fractional seconds of the output origin
    #[clap(long, default_value_t = 0.0)]
    pub start_time_frac: f64,
    /// Receive queue depth in records
    #[clap(long)]
    pub hwm: Option<i32>,
    /// Receive timeout in milliseconds
    #[clap(long, default_value_t = 100)]
    pub timeout_ms: i32,
    /// Ring buffer capacity in samples
    #[clap(short, long, default_value_t = RING_CAPACITY)]
    pub capacity: usize,
    /// Seconds between statistics reports (0 for none)
    #[clap(long, default_value_t = 10)]
    pub stats_interval: u64,
    /// Receive on a background thread instead of polling from the output loop
    #[clap(long)]
    pub ingress_thread: bool,
}

impl SourceArgs {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.sample_rate).start_time(self.start_time_s, self.start_time_frac)
    }

    pub fn zmq_config(&self) -> ZmqConfig {
        let cfg = ZmqConfig::new(&self.address).timeout_ms(self.timeout_ms);
        match self.hwm {
            Some(hwm) => cfg.hwm(hwm),
            None => cfg,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct BridgeArgs {
    /// UDP_SERVER or UDP_CLIENT
    #[clap(short, long, default_value = "UDP_SERVER")]
    pub kind: String,
    /// Address to listen on (server) or send to (client)
    #[clap(long, default_value = "0.0.0.0")]
    pub addr: String,
    /// UDP port
    #[clap(short, long, default_value_t = 60000)]
    pub port: u16,
    /// Largest datagram in bytes
    #[clap(short, long, default_value_t = DEFAULT_MTU)]
    pub mtu: usize,
    /// zmq endpoint datagrams from the peer are pushed to
    #[clap(long, default_value = "tcp://*:5556")]
    pub to_zmq: String,
    /// zmq endpoint records for the peer are pulled from
    #[clap(long, default_value = "tcp://127.0.0.1:5555")]
    pub from_zmq: String,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

/// `-` means the standard stream
pub fn path_or_std(s: &str) -> Option<PathBuf> {
    (s != "-").then(|| PathBuf::from(s))
}
