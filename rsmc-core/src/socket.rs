//! The transport primitive a concrete async runtime must implement.
//!
//! Directly generalizes the teacher's `rsmc-core/src/client.rs` `Connection`
//! trait (`connect`/`read`/`write`), renamed to `Socket` so that
//! `connection::Connection` can be the per-server state-machine type spec
//! §4.5 names — the teacher used one name for both the transport and
//! (implicitly) its owner.

use async_trait::async_trait;

use crate::error::Error;

/// A one-shot hook run on the raw socket before `connect` completes. The
/// binary protocol uses this to force byte mode on the underlying
/// connection (spec §4.4's "prepareHandle" / glossary "preparer hook");
/// the text protocol's hook is a no-op.
pub type PreparerHook = fn() -> Result<(), Error>;

/// An open connection to one memcached server. A concrete implementation
/// wraps whatever the host async runtime provides (e.g. `tokio::net::
/// TcpStream`). Read/write are plain byte-oriented primitives; the wire
/// protocol modules build framed requests/responses on top of them.
#[async_trait]
pub trait Socket: Send + Sync + Sized + 'static {
    /// Open a TCP connection to `server`, running `preparer` (if any)
    /// before the connection is considered ready.
    async fn connect(server: &str, preparer: Option<PreparerHook>) -> Result<Self, Error>;

    /// Read at least one byte into `buf`, which is already sized to the
    /// desired read length. Returns the number of bytes read; `0` means
    /// the peer closed the connection.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error>;

    /// Write `data` in full.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), Error>;
}
