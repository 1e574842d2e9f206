//! Demo server: accepts TCP connections and echoes every message back
//! through an [`AsyncChannel`], tagging the payload with a per-connection
//! counter.

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use framewire::{channel::AsyncChannel, defaults, logging::ColorizedFormatter, ChannelConfig};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*};

/// Framewire demo echo server.
#[derive(Parser, Debug)]
#[command(name = "framewire-server")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = defaults::ADDRESS)]
    bind: String,

    /// Capacity of each connection's outgoing/incoming queue.
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
    /// library-level settings `AsyncChannel` takes. `request_timeout` has
    /// no meaning for a plain echo server (it never issues sync requests)
    /// so it is left at its crate default, same as the donor's
    /// `TransportConfig` carries fields irrelevant to whichever transport
    /// is actually selected.
    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            address: self.bind.clone(),
            queue_size: self.queue_size,
            ..ChannelConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.verbose, &args.log_dir);
    let config = args.channel_config();

    let addr: SocketAddr = config.address.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("framewire demo server listening on {}", addr);

    let mut connection_id: u64 = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "accept failed");
                break;
            }
        };
        connection_id += 1;
        let id = connection_id;
        info!(connection = id, peer = %peer, "accepted connection");
        let queue_size = config.queue_size;
        tokio::spawn(async move {
            if let Err(err) = handle_connection(id, stream, queue_size).await {
                error!(connection = id, error = %err, "connection ended with error");
            }
        });
    }

    Ok(())
}

async fn handle_connection(
    connection_id: u64,
    stream: tokio::net::TcpStream,
    queue_size: usize,
) -> Result<()> {
    tune_socket(&stream)?;
    let (reader, writer) = stream.into_split();
    let channel = AsyncChannel::with_queue_size(reader, writer, queue_size);

    let mut count: u64 = 0;
    while let Some(mut msg) = channel.recv().await {
        count += 1;
        msg.payload = format!("Responce I-{connection_id}-#{count}").into_bytes();
        channel.send(msg).await?;
    }

    info!(
        connection = connection_id,
        messages = count,
        "connection closed"
    );
    Ok(())
}

/// Disable Nagle's algorithm and enable TCP keep-alive so idle connections
/// are detected and reaped instead of hanging forever.
fn tune_socket(stream: &tokio::net::TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_tcp_keepalive(
        &socket2::TcpKeepalive::new().with_time(std::time::Duration::from_secs(60)),
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
    let file_appender = tracing_appender::rolling::daily(log_dir, "framewire-server.log");
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
