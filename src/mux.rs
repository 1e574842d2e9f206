//! Sync request/response multiplexer: wraps an [`AsyncChannel`] and
//! correlates replies to outstanding requests by a monotonically
//! increasing id, with a single coordinator task owning the correlation
//! state and a janitor sweep for expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::channel::{AsyncChannel, Marshaller, DEFAULT_Q_SIZE};
use crate::codec::{Message, CODE_DUPLICATE_ID, CODE_TIMEOUT};
use crate::error::{ChannelError, MuxError};

const TIMEOUT_NAME: &str = "Timeout on waiting message";
const DUPLICATE_NAME: &str = "Message with same id already wait response";

struct Waiter {
    id: u32,
    reply_tx: oneshot::Sender<Message>,
}

struct PendingEntry {
    reply_tx: oneshot::Sender<Message>,
    deadline: Instant,
}

struct OrphanEntry {
    message: Message,
    deadline: Instant,
}

fn timeout_message() -> Message {
    Message::new(CODE_TIMEOUT, TIMEOUT_NAME, Vec::new())
}

fn duplicate_message() -> Message {
    Message::new(CODE_DUPLICATE_ID, DUPLICATE_NAME, Vec::new())
}

/// Wraps an [`AsyncChannel`] and provides synchronous, correlated
/// request/response on top of it.
#[derive(Clone)]
pub struct SyncMultiplexer {
    channel: AsyncChannel,
    next_id: Arc<AtomicU32>,
    register_tx: mpsc::Sender<Waiter>,
}

impl SyncMultiplexer {
    /// Wrap `channel`, applying `default_timeout` uniformly to every
    /// outstanding request and orphan entry. Spawns the coordinator task.
    pub fn new(channel: AsyncChannel, default_timeout: Duration) -> Self {
        let (register_tx, register_rx) = mpsc::channel(DEFAULT_Q_SIZE);

        let mux = Self {
            channel: channel.clone(),
            next_id: Arc::new(AtomicU32::new(0)),
            register_tx,
        };

        tokio::spawn(run_coordinator(channel, register_rx, default_timeout));

        mux
    }

    /// Synchronous request/response. Assigns a strictly increasing id
    /// (first id is 1), sends the request, then waits for the matching
    /// reply or a converted reserved-code error.
    pub async fn request(&self, mut msg: Message) -> Result<Message, MuxError> {
        if msg.name.is_empty() {
            return Err(MuxError::EmptyName);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        msg.id = id;

        let (reply_tx, reply_rx) = oneshot::channel();

        // Send before registering: an extremely fast peer may reply before
        // the waiter below is registered, in which case the coordinator
        // stashes it as an orphan. The registration arm always checks
        // orphans first, which closes the race.
        self.channel
            .send(msg)
            .await
            .map_err(|_| MuxError::Transport("channel is not alive".to_string()))?;

        if self
            .register_tx
            .send(Waiter { id, reply_tx })
            .await
            .is_err()
        {
            return Err(MuxError::Transport("coordinator is not running".to_string()));
        }

        match reply_rx.await {
            Ok(reply) => interpret_reply(reply),
            Err(_) => Err(MuxError::Timeout),
        }
    }

    /// Fire-and-forget send, delegated to the wrapped channel.
    pub async fn send(&self, msg: Message) -> Result<(), MuxError> {
        self.channel.send(msg).await.map_err(map_channel_err)
    }

    /// Convenience: marshal `value` and enqueue it under `code`/`name`.
    pub async fn send_named(
        &self,
        code: u8,
        name: impl Into<String>,
        value: &impl Marshaller,
    ) -> anyhow::Result<()> {
        self.channel.send_named(code, name, value).await
    }

    /// Convenience: enqueue raw bytes under `code`/`name`.
    pub async fn send_bytes(
        &self,
        code: u8,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), MuxError> {
        self.channel.send_bytes(code, name, payload).await.map_err(map_channel_err)
    }

    pub fn is_alive(&self) -> bool {
        self.channel.is_alive()
    }

    /// Shut down the wrapped channel; the coordinator task notices the
    /// incoming queue close and terminates on its own, draining `pending`.
    pub fn shutdown(&self) {
        self.channel.shutdown();
    }
}

fn map_channel_err(_: ChannelError) -> MuxError {
    MuxError::Transport("channel is not alive".to_string())
}

fn interpret_reply(reply: Message) -> Result<Message, MuxError> {
    if reply.code < 200 {
        return Ok(reply);
    }
    match reply.code {
        CODE_TIMEOUT => Err(MuxError::Timeout),
        CODE_DUPLICATE_ID => Err(MuxError::DuplicateId),
        crate::codec::CODE_MISSING_ROUTE => Err(MuxError::MissingRoute(reply.name)),
        _ => Err(MuxError::Transport(reply.name)),
    }
}

async fn run_coordinator(
    channel: AsyncChannel,
    mut register_rx: mpsc::Receiver<Waiter>,
    default_timeout: Duration,
) {
    let mut pending: HashMap<u32, PendingEntry> = HashMap::new();
    let mut orphans: HashMap<u32, OrphanEntry> = HashMap::new();
    let mut janitor = tokio::time::interval(default_timeout / 3);

    loop {
        tokio::select! {
            _ = janitor.tick() => {
                sweep(&mut pending, &mut orphans);
            }
            registration = register_rx.recv() => {
                match registration {
                    Some(waiter) => register_waiter(&mut pending, &mut orphans, waiter, default_timeout),
                    None => break,
                }
            }
            arrival = channel.recv() => {
                match arrival {
                    Some(msg) => on_arrival(&mut pending, &mut orphans, msg, default_timeout),
                    None => break,
                }
            }
        }
    }

    debug!("mux coordinator shutting down, draining {} pending waiters", pending.len());
    for (_, entry) in pending.drain() {
        let _ = entry.reply_tx.send(timeout_message());
    }
}

fn sweep(pending: &mut HashMap<u32, PendingEntry>, orphans: &mut HashMap<u32, OrphanEntry>) {
    let now = Instant::now();
    let expired: Vec<u32> = pending
        .iter()
        .filter(|(_, e)| e.deadline <= now)
        .map(|(id, _)| *id)
        .collect();
    for id in &expired {
        if let Some(entry) = pending.remove(id) {
            let _ = entry.reply_tx.send(timeout_message());
        }
    }

    let orphans_before = orphans.len();
    orphans.retain(|_, e| e.deadline > now);
    let orphans_dropped = orphans_before - orphans.len();

    if !expired.is_empty() || orphans_dropped > 0 {
        debug!(
            timed_out = expired.len(),
            orphans_dropped, "janitor sweep evicted expired entries"
        );
    } else {
        trace!(
            pending = pending.len(),
            orphans = orphans.len(),
            "janitor sweep found nothing expired"
        );
    }
}

fn register_waiter(
    pending: &mut HashMap<u32, PendingEntry>,
    orphans: &mut HashMap<u32, OrphanEntry>,
    waiter: Waiter,
    default_timeout: Duration,
) {
    if let Some(orphan) = orphans.remove(&waiter.id) {
        let _ = waiter.reply_tx.send(orphan.message);
        return;
    }
    if pending.contains_key(&waiter.id) {
        let _ = waiter.reply_tx.send(duplicate_message());
        return;
    }
    pending.insert(
        waiter.id,
        PendingEntry {
            reply_tx: waiter.reply_tx,
            deadline: Instant::now() + default_timeout,
        },
    );
}

fn on_arrival(
    pending: &mut HashMap<u32, PendingEntry>,
    orphans: &mut HashMap<u32, OrphanEntry>,
    msg: Message,
    default_timeout: Duration,
) {
    if let Some(entry) = pending.remove(&msg.id) {
        let _ = entry.reply_tx.send(msg);
        return;
    }
    orphans.insert(
        msg.id,
        OrphanEntry {
            message: msg,
            deadline: Instant::now() + default_timeout,
        },
    );
}
