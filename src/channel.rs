//! Async full-duplex channel: owns a transport's reader/writer halves plus
//! two bounded queues, serviced by dedicated reader and writer tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::codec::{self, Message, MESSAGE_HEADER_SIZE};
use crate::error::ChannelError;

/// Capacity of each of the channel's two bounded queues.
pub const DEFAULT_Q_SIZE: usize = 200;

/// Something a [`Marshaller`] turns a user value into.
pub trait Marshaller {
    fn marshal(&self) -> anyhow::Result<Vec<u8>>;
}

/// Owns a transport's two halves and the reader/writer worker tasks that
/// drain/fill them. Queues are shared with any clone of this handle; the
/// worker tasks and shutdown state are reference-counted and torn down
/// exactly once regardless of how many handles are dropped.
#[derive(Clone)]
pub struct AsyncChannel {
    outgoing_tx: mpsc::Sender<Message>,
    incoming_rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    alive: Arc<AtomicBool>,
    // A `watch` channel is level-triggered: a worker that subscribes (or
    // wakes up) only after `shutdown` already ran still observes `true`
    // in `borrow()`/`changed()` rather than missing a one-shot
    // `Notify::notify_waiters()` wakeup that nobody was polling for yet.
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_once: Arc<AtomicBool>,
    reader_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    writer_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AsyncChannel {
    /// Spawn reader/writer workers over `reader`/`writer` and return a handle.
    ///
    /// Cancellation of a blocked read is modeled with `tokio::select!` against
    /// the shared shutdown signal rather than by forcibly closing the OS
    /// handle underneath the reader task (the Go original closes the
    /// `io.ReadCloser` from another goroutine; Rust's `AsyncRead` makes that
    /// unnecessary because the read future itself can be raced against a
    /// level-triggered shutdown signal).
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_queue_size(reader, writer, DEFAULT_Q_SIZE)
    }

    /// Like [`AsyncChannel::new`] but with a caller-chosen queue capacity
    /// instead of [`DEFAULT_Q_SIZE`] for both the outgoing and incoming queues.
    pub fn with_queue_size<R, W>(reader: R, writer: W, queue_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(queue_size);
        let (incoming_tx, incoming_rx) = mpsc::channel(queue_size);

        let alive = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let shutdown_once = Arc::new(AtomicBool::new(false));

        let channel = Self {
            outgoing_tx,
            incoming_rx: Arc::new(Mutex::new(incoming_rx)),
            alive,
            shutdown_tx,
            shutdown_once,
            reader_handle: Arc::new(Mutex::new(None)),
            writer_handle: Arc::new(Mutex::new(None)),
        };

        let reader_task = {
            let channel = channel.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                channel.run_reader(reader, incoming_tx, shutdown_rx).await;
            })
        };
        let writer_task = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel.run_writer(writer, outgoing_rx, shutdown_rx).await;
            })
        };

        // Stash the join handles without blocking the caller; these mutexes
        // are only ever contended by shutdown(), which runs after construction.
        if let Ok(mut slot) = channel.reader_handle.try_lock() {
            *slot = Some(reader_task);
        }
        if let Ok(mut slot) = channel.writer_handle.try_lock() {
            *slot = Some(writer_task);
        }

        channel
    }

    async fn run_reader<R>(
        &self,
        mut reader: R,
        incoming_tx: mpsc::Sender<Message>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let mut header_buf = [0u8; MESSAGE_HEADER_SIZE];
            let read_result = tokio::select! {
                _ = shutdown_rx.changed() => break,
                res = reader.read_exact(&mut header_buf) => res,
            };

            match read_result {
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("reader worker observed clean EOF");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "reader worker transport error");
                    break;
                }
            }

            let header = match codec::decode_header(&header_buf) {
                Ok(h) => h,
                Err(err) => {
                    warn!(error = %err, "reader worker decode error, aborting connection");
                    break;
                }
            };

            let mut body = vec![0u8; header.body_len()];
            if let Err(err) = reader.read_exact(&mut body).await {
                warn!(error = %err, "reader worker EOF/error mid-body");
                break;
            }

            let msg = match codec::decode_body(header, &body) {
                Ok(m) => m,
                Err(err) => {
                    warn!(error = %err, "reader worker body decode error");
                    break;
                }
            };

            if incoming_tx.send(msg).await.is_err() {
                debug!("incoming queue receiver dropped, stopping reader worker");
                break;
            }
        }
        self.shutdown();
    }

    async fn run_writer<W>(
        &self,
        mut writer: W,
        mut outgoing_rx: mpsc::Receiver<Message>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) where
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let msg = tokio::select! {
                _ = shutdown_rx.changed() => break,
                msg = outgoing_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let encoded = match codec::encode(&msg) {
                Ok(buf) => buf,
                Err(err) => {
                    warn!(error = %err, "writer worker failed to encode outgoing message");
                    continue;
                }
            };

            if let Err(err) = writer.write_all(&encoded).await {
                warn!(error = %err, "writer worker transport error");
                break;
            }
        }
        self.shutdown();
    }

    /// Enqueue `msg` on the outgoing queue. Blocks only if the queue is full.
    pub async fn send(&self, msg: Message) -> Result<(), ChannelError> {
        if !self.is_alive() {
            return Err(ChannelError::NotAlive);
        }
        self.outgoing_tx
            .send(msg)
            .await
            .map_err(|_| ChannelError::NotAlive)
    }

    /// Convenience: marshal `value` and enqueue it under `code`/`name`.
    pub async fn send_named(
        &self,
        code: u8,
        name: impl Into<String>,
        value: &impl Marshaller,
    ) -> anyhow::Result<()> {
        let payload = value.marshal()?;
        self.send(Message::new(code, name, payload)).await?;
        Ok(())
    }

    /// Convenience: enqueue raw bytes under `code`/`name`.
    pub async fn send_bytes(
        &self,
        code: u8,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), ChannelError> {
        self.send(Message::new(code, name, payload)).await
    }

    /// Block until the next decoded message is available. Safe to call
    /// concurrently; each message goes to exactly one caller.
    pub async fn recv(&self) -> Option<Message> {
        let mut rx = self.incoming_rx.lock().await;
        rx.recv().await
    }

    /// Idempotent shutdown: unblock the reader/writer workers and flip
    /// `is_alive` to false. Safe to call from either worker or the user,
    /// any number of times.
    pub fn shutdown(&self) {
        if self
            .shutdown_once
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.alive.store(false, Ordering::SeqCst);
        // Ignore the "no receivers left" error: both workers may have
        // already exited on their own (e.g. transport EOF) by the time a
        // caller shuts the channel down explicitly.
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Message;

    #[tokio::test]
    async fn delivers_messages_in_send_order() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (server_r, server_w) = tokio::io::split(server_io);

        let client = AsyncChannel::new(client_r, client_w);
        let server = AsyncChannel::new(server_r, server_w);

        for i in 0..5u32 {
            client
                .send(Message {
                    code: 0,
                    id: i,
                    name: format!("m{i}"),
                    payload: vec![],
                })
                .await
                .unwrap();
        }

        for i in 0..5u32 {
            let msg = server.recv().await.unwrap();
            assert_eq!(msg.id, i);
            assert_eq!(msg.name, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (_server_r, _server_w) = tokio::io::split(server_io);

        let client = AsyncChannel::new(client_r, client_w);
        assert!(client.is_alive());
        client.shutdown();
        client.shutdown();
        client.shutdown();
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn shutdown_called_before_workers_are_polled_still_wakes_them() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (_server_r, _server_w) = tokio::io::split(server_io);

        let client = AsyncChannel::new(client_r, client_w);
        // On the default current-thread test runtime, nothing has yielded
        // back to the executor yet, so the reader/writer tasks spawned by
        // `new` have not been polled even once. A level-triggered shutdown
        // signal must still reach them once they do get polled.
        client.shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), client.recv())
            .await
            .expect("reader worker should have observed shutdown and closed the incoming queue");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn shutdown_on_peer_close() {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (client_r, client_w) = tokio::io::split(client_io);

        let client = AsyncChannel::new(client_r, client_w);
        drop(server_io);

        // Give the reader worker a chance to observe EOF and shut down.
        for _ in 0..100 {
            if !client.is_alive() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!client.is_alive());
    }
}
