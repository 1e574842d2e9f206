//! Demo client: connects to a framewire demo server, wraps the connection
//! in a [`SyncMultiplexer`], and drives a configurable number of worker
//! tasks each issuing `request` calls in a loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use framewire::{
    channel::{AsyncChannel, Marshaller},
    codec::Message,
    defaults,
    logging::ColorizedFormatter,
    mux::SyncMultiplexer,
    ChannelConfig,
};
use rand::Rng;
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*};

/// Per-worker summary, sent fire-and-forget once a worker finishes its
/// request loop. Demonstrates [`Marshaller`] for callers who want to hand
/// the channel a typed value instead of raw bytes.
#[derive(Debug, Serialize)]
struct WorkerStats {
    worker_id: usize,
    requests_completed: u64,
    elapsed_ms: u64,
}

impl Marshaller for WorkerStats {
    fn marshal(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

/// Framewire demo request/response client.
#[derive(Parser, Debug)]
#[command(name = "framewire-client")]
struct Args {
    /// Address of the demo server to connect to.
    #[arg(long, default_value = defaults::ADDRESS)]
    server: String,

    /// Number of concurrent worker tasks issuing requests.
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Requests issued per worker before exiting.
    #[arg(long, default_value_t = 20)]
    requests: usize,

    /// Per-request timeout, in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    timeout_ms: u64,

    /// Capacity of the connection's outgoing/incoming queue.
    #[arg(long, default_value_t = defaults::Q_SIZE)]
    queue_size: usize,

    /// Directory for the rolling daily log file, in addition to stdout.
    #[arg(long, default_value = "logs")]
    log_dir: String,

    /// Increase log verbosity (-v, -vv, ...).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Project the process-level flags this binary cares about down to the
    /// library-level settings `AsyncChannel`/`SyncMultiplexer` take.
    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            address: self.server.clone(),
            queue_size: self.queue_size,
            request_timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.verbose, &args.log_dir);
    let config = args.channel_config();

    let addr: SocketAddr = config.address.parse()?;
    let stream = TcpStream::connect(addr).await?;
    tune_socket(&stream)?;
    let (reader, writer) = stream.into_split();
    let channel = AsyncChannel::with_queue_size(reader, writer, config.queue_size);
    let mux = SyncMultiplexer::new(channel, config.request_timeout);

    info!(server = %addr, workers = args.workers, "starting demo client");

    let total_messages = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::with_capacity(args.workers);
    for worker_id in 0..args.workers {
        let mux = mux.clone();
        let total_messages = total_messages.clone();
        let requests = args.requests;
        handles.push(tokio::spawn(async move {
            run_worker(worker_id, mux, requests, total_messages).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    let summary = serde_json::json!({
        "server": addr.to_string(),
        "workers": args.workers,
        "total_messages": total_messages.load(Ordering::Relaxed),
    });
    info!(summary = %summary, "demo client finished");
    mux.shutdown();
    Ok(())
}

async fn run_worker(
    worker_id: usize,
    mux: SyncMultiplexer,
    requests: usize,
    total_messages: Arc<AtomicU64>,
) {
    let worker_start = std::time::Instant::now();
    let mut completed: u64 = 0;
    for i in 0..requests {
        if !mux.is_alive() {
            break;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..100);
        tokio::time::sleep(Duration::from_millis(jitter_ms)).await;

        let name = format!("Client{worker_id}-M{i}");
        let msg = Message::new(0, name.clone(), vec![0u8; (jitter_ms as usize) * 15]);

        let start = std::time::Instant::now();
        match mux.request(msg).await {
            Ok(reply) => {
                if reply.name != name {
                    error!(worker = worker_id, want = %name, got = %reply.name, "unexpected reply name");
                }
                total_messages.fetch_add(1, Ordering::Relaxed);
                completed += 1;
            }
            Err(err) => {
                error!(worker = worker_id, error = %err, "request failed");
            }
        }
        tracing::debug!(worker = worker_id, elapsed = ?start.elapsed(), "request completed");
    }

    let stats = WorkerStats {
        worker_id,
        requests_completed: completed,
        elapsed_ms: worker_start.elapsed().as_millis() as u64,
    };
    if let Err(err) = mux.send_named(0, "worker-stats", &stats).await {
        error!(worker = worker_id, error = %err, "failed to send worker stats");
    }
}

/// Disable Nagle's algorithm and enable TCP keep-alive so idle connections
/// are detected and reaped instead of hanging forever.
fn tune_socket(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_tcp_keepalive(
        &socket2::TcpKeepalive::new().with_time(Duration::from_secs(60)),
    )?;
    Ok(())
}

/// Colorized human-facing stdout plus a plain rolling-daily file, the
/// latter kept alive for the process lifetime via the returned guard.
fn init_logging(verbose: u8, log_dir: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let file_appender = tracing_appender::rolling::daily(log_dir, "framewire-client.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(ColorizedFormatter)
                .with_filter(level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(level),
        )
        .init();
    guard
}
