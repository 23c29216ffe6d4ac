//! Wire protocol drivers: given a [`Socket`] and a request, write the wire
//! bytes and parse the reply. Two concrete implementations exist —
//! [`binary::BinaryProtocol`] (grounded on the teacher's
//! `rsmc-core/src/protocol/{mod,packet,error}.rs`) and
//! [`text::TextProtocol`] (new) — exposing the same operation set, per
//! spec §4.4.

mod binary;
mod status;
mod text;

pub use binary::{BinaryProtocol, Header};
pub use status::{ProtocolError, Status};
pub use text::TextProtocol;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::{error::Error, payload::Payload, socket::Socket};

/// A store-style command: `set` always overwrites, `add` fails if the key
/// already exists, `replace` fails if it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Set,
    Add,
    Replace,
}

/// `append` concatenates after the existing value, `prepend` before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendPrependKind {
    Append,
    Prepend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrDecrKind {
    Incr,
    Decr,
}

/// Given a connection, write the request bytes and parse the reply. One
/// operation per entry in spec §4.4's enumerated set, plus `prepare` (spec
/// §4.4's "prepareHandle" hook, invoked by the `Connection` actor before a
/// socket is considered ready).
#[async_trait]
pub trait WireProtocol<S: Socket>: Clone + Send + Sync + 'static {
    /// A one-shot hook to run on the raw socket before connect completes.
    /// The binary protocol uses this to force byte mode; the text
    /// protocol has no such requirement.
    fn prepare(&self) -> Option<crate::socket::PreparerHook> {
        None
    }

    async fn store(
        &self,
        socket: &mut S,
        kind: StoreKind,
        key: &[u8],
        payload: Payload,
        expire: u32,
    ) -> Result<bool, Error>;

    async fn get(&self, socket: &mut S, key: &[u8]) -> Result<Option<Payload>, Error>;

    async fn append_prepend(
        &self,
        socket: &mut S,
        kind: AppendPrependKind,
        key: &[u8],
        data: &[u8],
    ) -> Result<bool, Error>;

    async fn delete(&self, socket: &mut S, key: &[u8]) -> Result<bool, Error>;

    /// Returns `None` only when the key was missing and no `initial` value
    /// was supplied (spec §4.4.1/§4.4.2's incr/decr fallback dance).
    async fn incr_decr(
        &self,
        socket: &mut S,
        kind: IncrDecrKind,
        key: &[u8],
        delta: u64,
        initial: Option<u64>,
        expire: u32,
    ) -> Result<Option<u64>, Error>;

    async fn flush_all(&self, socket: &mut S, delay: Option<u32>) -> Result<bool, Error>;

    async fn stats(&self, socket: &mut S, name: Option<&str>) -> Result<HashMap<String, String>, Error>;

    async fn version(&self, socket: &mut S) -> Result<String, Error>;

    /// A best-effort goodbye sent before the connection actor drops the
    /// socket for good (spec §4.6's graceful `disconnect()`). Default is a
    /// no-op; not every protocol needs one.
    async fn quit(&self, _socket: &mut S) -> Result<(), Error> {
        Ok(())
    }
}
