//! Typed error surface for the framewire crate.
//!
//! Each subsystem gets its own variant set; [`Error`] unifies them behind
//! one type so callers that don't care about the subsystem can still use
//! `framewire::Result<T>`.

use thiserror::Error;

/// Frame codec failures. These never carry I/O state; the codec is pure.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    /// Fewer than `messageHeaderSize` bytes were available to decode a header.
    #[error("message buffer shorter than the 9-byte header")]
    TooShortMessage,

    /// The buffer's length didn't match the header's declared `name_len`/`payload_len`.
    #[error("message buffer length does not match declared header sizes")]
    BinaryLength,

    /// `9 + name_len + payload_len` exceeded [`crate::MAX_MESSAGE_SIZE`].
    #[error("frame of {0} bytes exceeds the maximum message size")]
    FrameTooLarge(usize),
}

/// Async channel failures, surfaced through `shutdown`/`is_alive` rather than
/// returned inline in most cases; kept for the few calls that can fail synchronously.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has already shut down; further sends are rejected.
    #[error("channel is no longer alive")]
    NotAlive,

    /// Transport I/O failure escalated from a reader or writer worker.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A frame failed to decode or encode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Router registration failures.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RouterError {
    /// `register` was called with an empty name or no inbound queue.
    #[error("wrong routing income data")]
    WrongIncomeData,

    /// `register` was called twice with the same route name.
    #[error("routing with specified name already exists")]
    AlreadyExists,
}

/// Sync multiplexer failures, either returned inline (caller errors) or
/// delivered over the reply slot as a converted reserved-code message
/// (correlation errors).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MuxError {
    /// `request` was called with an empty `name`.
    #[error("message name must not be empty")]
    EmptyName,

    /// No reply arrived before the configured timeout.
    #[error("Timeout on waiting message")]
    Timeout,

    /// Two waiters were registered for the same id before the first resolved.
    #[error("Message with same id already wait response")]
    DuplicateId,

    /// The peer returned a missing-route marker for this request.
    #[error("{0}")]
    MissingRoute(String),

    /// A generic transport-level error marker (reserved code 255) came back.
    #[error("{0}")]
    Transport(String),
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Mux(#[from] MuxError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
