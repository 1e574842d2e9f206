//! End-to-end smoke tests over a real `TcpListener`/`TcpStream` pair,
//! exercising the async channel and the sync multiplexer on top of an
//! actual socket rather than an in-memory duplex.

use std::time::Duration;

use anyhow::Result;
use framewire::{channel::AsyncChannel, codec::Message, mux::SyncMultiplexer};
use tokio::net::{TcpListener, TcpStream};

async fn bind_loopback() -> Result<(TcpListener, std::net::SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// A client issuing requests through a `SyncMultiplexer` gets back the
/// replies an echo server sends, over a real TCP socket.
#[tokio::test]
async fn tcp_round_trip_request_response() -> Result<()> {
    let (listener, addr) = bind_loopback().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (reader, writer) = stream.into_split();
        let channel = AsyncChannel::new(reader, writer);
        while let Some(mut msg) = channel.recv().await {
            msg.payload = format!("echo:{}", String::from_utf8_lossy(&msg.payload)).into_bytes();
            if channel.send(msg).await.is_err() {
                break;
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let channel = AsyncChannel::new(reader, writer);
    let mux = SyncMultiplexer::new(channel, Duration::from_secs(2));

    for i in 0..16 {
        let msg = Message::new(0, format!("req-{i}"), format!("ping-{i}").into_bytes());
        let reply = mux.request(msg).await?;
        assert_eq!(reply.payload, format!("echo:ping-{i}").into_bytes());
    }

    mux.shutdown();
    Ok(())
}

/// Concurrent requests from many tasks sharing one multiplexer each get
/// their own matching reply, never a neighbor's.
#[tokio::test]
async fn tcp_round_trip_concurrent_requests_stay_correlated() -> Result<()> {
    let (listener, addr) = bind_loopback().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (reader, writer) = stream.into_split();
        let channel = AsyncChannel::new(reader, writer);
        while let Some(msg) = channel.recv().await {
            if channel.send(msg).await.is_err() {
                break;
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let channel = AsyncChannel::new(reader, writer);
    let mux = SyncMultiplexer::new(channel, Duration::from_secs(2));

    let mut handles = Vec::new();
    for i in 0..32u8 {
        let mux = mux.clone();
        handles.push(tokio::spawn(async move {
            let name = format!("worker-{i}");
            let msg = Message::new(0, name.clone(), vec![i; 8]);
            let reply = mux.request(msg).await.expect("request");
            assert_eq!(reply.name, name);
            assert_eq!(reply.payload, vec![i; 8]);
        }));
    }
    for handle in handles {
        handle.await?;
    }

    mux.shutdown();
    Ok(())
}

/// A request against a peer that never replies times out rather than
/// hanging forever.
#[tokio::test]
async fn tcp_round_trip_silent_peer_times_out() -> Result<()> {
    let (listener, addr) = bind_loopback().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        // Hold the connection open but never read or write anything.
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let channel = AsyncChannel::new(reader, writer);
    let mux = SyncMultiplexer::new(channel, Duration::from_millis(200));

    let msg = Message::new(0, "never-answered".to_string(), vec![]);
    let err = mux.request(msg).await.expect_err("should time out");
    assert!(format!("{err}").to_lowercase().contains("timeout"));

    mux.shutdown();
    Ok(())
}

/// A large payload near `MAX_MESSAGE_SIZE` still round-trips correctly
/// across a real socket rather than only an in-memory buffer.
#[tokio::test]
async fn tcp_round_trip_near_max_size_payload() -> Result<()> {
    let (listener, addr) = bind_loopback().await?;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (reader, writer) = stream.into_split();
        let channel = AsyncChannel::new(reader, writer);
        while let Some(msg) = channel.recv().await {
            if channel.send(msg).await.is_err() {
                break;
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    let channel = AsyncChannel::new(reader, writer);
    let mux = SyncMultiplexer::new(channel, Duration::from_secs(5));

    let big_payload = vec![0xAB; 99_900];
    let msg = Message::new(0, "big".to_string(), big_payload.clone());
    let reply = mux.request(msg).await?;
    assert_eq!(reply.payload, big_payload);

    mux.shutdown();
    Ok(())
}
