//! Entry point for `arq-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing) and printing
//! the final report.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use arq_over_udp::config::{
    DEFAULT_MAX_IDLE_TIMEOUTS, DEFAULT_MAX_SENDS, DEFAULT_PORT, DEFAULT_RECV_TIMEOUT_MS,
};
use arq_over_udp::shutdown::{self, Shutdown};
use arq_over_udp::simulator::{RandomLoss, SimulatorConfig};
use arq_over_udp::timer::RtoConfig;
use arq_over_udp::transport::UdpTransport;
use arq_over_udp::{Protocol, ReceiverSession, SenderSession, SessionConfig};

/// Stop-and-Wait, Go-Back-N and Selective Repeat over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a numbered sequence of packets to a receiver.
    Send {
        #[command(flatten)]
        session: SessionArgs,

        /// Receiver address.
        #[arg(long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
        peer: SocketAddr,

        /// Local address to send from.
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,

        /// Initial retransmission timeout in milliseconds.
        #[arg(long, default_value_t = 1000)]
        rto_ms: u64,

        /// Floor for the adaptive timeout in milliseconds.
        #[arg(long, default_value_t = 100)]
        rto_min_ms: u64,

        /// Ceiling for the adaptive timeout in milliseconds.
        #[arg(long, default_value_t = 5000)]
        rto_max_ms: u64,

        /// Transmissions allowed per packet before giving up.
        #[arg(long, default_value_t = DEFAULT_MAX_SENDS)]
        max_sends: u32,

        /// Probability of dropping each transmission, in [0, 1).
        #[arg(long, default_value_t = 0.0)]
        loss_rate: f64,

        /// Seed for the loss simulator.
        #[arg(long)]
        seed: Option<u64>,

        /// Bytes per payload.
        #[arg(long, default_value_t = 64)]
        payload_size: usize,
    },
    /// Receive packets and deliver them in order.
    Recv {
        #[command(flatten)]
        session: SessionArgs,

        /// Local address to listen on.
        #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
        bind: SocketAddr,

        /// Consecutive idle receives before the receiver stops.
        #[arg(long, default_value_t = DEFAULT_MAX_IDLE_TIMEOUTS)]
        max_idle: u32,

        /// Capacity of the delivery queue.
        #[arg(long, default_value_t = 1000)]
        queue: usize,
    },
}

/// Parameters both peers must agree on.
#[derive(Args)]
struct SessionArgs {
    #[arg(short, long, value_enum, default_value_t = Protocol::GoBackN)]
    protocol: Protocol,

    /// Number of packets in the session.
    #[arg(short = 'n', long, default_value_t = 10)]
    total: u32,

    /// Window size (ignored for Stop-and-Wait).
    #[arg(short, long, default_value_t = 4)]
    window: u32,

    /// Bound on each blocking receive, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RECV_TIMEOUT_MS)]
    recv_timeout_ms: u64,

    /// Write the final report to this file as well as stdout.
    #[arg(long)]
    stats: Option<PathBuf>,
}

impl SessionArgs {
    fn config(&self) -> SessionConfig {
        SessionConfig {
            protocol: self.protocol,
            total_packets: self.total,
            window_size: self.window,
            recv_timeout: Duration::from_millis(self.recv_timeout_ms),
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let shutdown = ctrl_c_shutdown();

    let config = cli.mode.config();
    let stats = cli.mode.session().stats.as_deref();
    match &cli.mode {
        Mode::Send { .. } => run_sender(config, stats, shutdown).await,
        Mode::Recv { .. } => run_receiver(config, stats, shutdown).await,
    }
}

impl Mode {
    fn session(&self) -> &SessionArgs {
        match self {
            Mode::Send { session, .. } | Mode::Recv { session, .. } => session,
        }
    }

    /// The full session configuration for this invocation.
    fn config(&self) -> SessionConfig {
        match self {
            Mode::Send {
                session,
                peer,
                bind,
                rto_ms,
                rto_min_ms,
                rto_max_ms,
                max_sends,
                loss_rate,
                seed,
                payload_size,
            } => SessionConfig {
                peer: *peer,
                bind: *bind,
                rto: RtoConfig {
                    initial: Duration::from_millis(*rto_ms),
                    min: Duration::from_millis(*rto_min_ms),
                    max: Duration::from_millis(*rto_max_ms),
                },
                max_sends: *max_sends,
                payload_size: *payload_size,
                simulator: SimulatorConfig {
                    loss_rate: *loss_rate,
                    seed: *seed,
                },
                ..session.config()
            },
            Mode::Recv {
                session,
                bind,
                max_idle,
                queue,
            } => SessionConfig {
                bind: *bind,
                max_idle_timeouts: *max_idle,
                delivery_queue: *queue,
                ..session.config()
            },
        }
    }
}

async fn run_sender(
    config: SessionConfig,
    stats: Option<&Path>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    log::info!("Sending to {} ({})", config.peer, config.protocol);
    let transport = UdpTransport::connect(config.bind, config.peer)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    let loss = RandomLoss::from_config(&config.simulator);
    let payloads = config.payloads();
    let session = SenderSession::new(config, transport, loss, payloads)?;

    let result = session.run(shutdown).await;
    let report = session.report().await;
    print!("{report}");
    if let Some(path) = stats {
        write_report(path, &report.to_string())?;
    }
    result?;
    Ok(())
}

async fn run_receiver(
    config: SessionConfig,
    stats: Option<&Path>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    log::info!("Listening on {} ({})", config.bind, config.protocol);
    let transport = UdpTransport::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    let mut session = ReceiverSession::new(config, transport)?;

    let (tx, mut rx) = session.delivery_channel();
    let consumer = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(delivery) = rx.recv().await {
            log::info!(
                "delivered seq={} {:?}",
                delivery.seq,
                String::from_utf8_lossy(&delivery.payload)
            );
            count += 1;
        }
        count
    });

    let result = session.run(tx, shutdown).await;
    let delivered = consumer.await.context("delivery consumer panicked")?;
    log::info!("{delivered} packet(s) handed to the application");

    let report = session.report();
    print!("{report}");
    if let Some(path) = stats {
        write_report(path, &report.to_string())?;
    }
    result?;
    Ok(())
}

/// A shutdown token tripped by Ctrl-C.
fn ctrl_c_shutdown() -> Shutdown {
    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl-C received, shutting down");
            trigger.trigger();
        }
    });
    shutdown
}

fn write_report(path: &Path, report: &str) -> anyhow::Result<()> {
    std::fs::write(path, report).with_context(|| format!("writing {}", path.display()))
}
