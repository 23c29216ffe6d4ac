//! The message sent through a connection actor's mailbox, and the reply
//! channel it answers on. Generalizes the teacher's direct
//! `Client::{get,set,delete,...}` method calls (which talked straight to a
//! pooled connection) into an explicit command object, since spec §4.5's
//! actor has exactly one in-flight request at a time and needs something
//! to queue.

use tokio::sync::oneshot;

use crate::{error::Error, payload::Payload, protocol::{AppendPrependKind, IncrDecrKind, StoreKind}};

/// Identifies a command's shape without its payload, for the pieces of
/// the engine — today, only [`crate::compressor::Compressor`] — that need
/// to special-case a command kind rather than the command itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Get,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Delete,
    Incr,
    Decr,
    FlushAll,
    Stats,
    Version,
}

/// A fully-formed request ready to hand to a wire protocol driver. Sent
/// through a connection actor's mailbox along with a one-shot reply
/// channel (spec §4.5: one request in flight at a time per connection).
#[derive(Debug)]
pub enum Command {
    Get {
        key: Vec<u8>,
        reply: oneshot::Sender<Result<Option<Payload>, Error>>,
    },
    Store {
        kind: StoreKind,
        key: Vec<u8>,
        payload: Payload,
        expire: u32,
        reply: oneshot::Sender<Result<bool, Error>>,
    },
    AppendPrepend {
        kind: AppendPrependKind,
        key: Vec<u8>,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<bool, Error>>,
    },
    Delete {
        key: Vec<u8>,
        reply: oneshot::Sender<Result<bool, Error>>,
    },
    IncrDecr {
        kind: IncrDecrKind,
        key: Vec<u8>,
        delta: u64,
        initial: Option<u64>,
        expire: u32,
        reply: oneshot::Sender<Result<Option<u64>, Error>>,
    },
    FlushAll {
        delay: Option<u32>,
        reply: oneshot::Sender<Result<bool, Error>>,
    },
    Stats {
        name: Option<String>,
        reply: oneshot::Sender<Result<std::collections::HashMap<String, String>, Error>>,
    },
    Version {
        reply: oneshot::Sender<Result<String, Error>>,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Get { .. } => CommandKind::Get,
            Command::Store { kind: StoreKind::Set, .. } => CommandKind::Set,
            Command::Store { kind: StoreKind::Add, .. } => CommandKind::Add,
            Command::Store { kind: StoreKind::Replace, .. } => CommandKind::Replace,
            Command::AppendPrepend { kind: AppendPrependKind::Append, .. } => CommandKind::Append,
            Command::AppendPrepend { kind: AppendPrependKind::Prepend, .. } => CommandKind::Prepend,
            Command::Delete { .. } => CommandKind::Delete,
            Command::IncrDecr { kind: IncrDecrKind::Incr, .. } => CommandKind::Incr,
            Command::IncrDecr { kind: IncrDecrKind::Decr, .. } => CommandKind::Decr,
            Command::FlushAll { .. } => CommandKind::FlushAll,
            Command::Stats { .. } => CommandKind::Stats,
            Command::Version { .. } => CommandKind::Version,
        }
    }

    /// Delivers `result` to whoever is awaiting this command's reply. A
    /// dropped receiver (the caller gave up waiting) is not an error: the
    /// connection actor keeps draining its mailbox regardless.
    pub fn fail(self, err: Error) {
        match self {
            Command::Get { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Store { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::AppendPrepend { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Delete { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::IncrDecr { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::FlushAll { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Stats { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Command::Version { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}
