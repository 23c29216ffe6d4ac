//! Runtime-agnostic engine for talking to a memcached cluster.
//!
//! This crate implements everything that does not depend on a concrete
//! async runtime: the wire protocols (text and binary), the per-server
//! connection state machine, the consistent-hash-free weighted selector,
//! the pluggable serializer/compressor traits and their default
//! implementations, and the `Client` façade that ties them together.
//!
//! A concrete `Socket` implementation (e.g. `rsmc-tokio`'s `TokioSocket`)
//! and task-spawning glue are required to actually open connections; see
//! the `socket` module for the trait a runtime crate must implement.

pub mod client;
pub mod compressor;
pub mod connection;
pub mod error;
pub mod payload;
pub mod protocol;
pub mod request;
pub mod selector;
pub mod serializer;
pub mod socket;

pub use client::{Client, ClientConfig};
pub use compressor::{Compressor, GzipCompressor, NoCompressor};
pub use error::Error;
pub use payload::Payload;
pub use selector::{CrcRingSelector, PreHashedKey, Selector, ServerSpec};
pub use serializer::{JsonSerializer, Serializer, StructuredSerializer};
pub use socket::{PreparerHook, Socket};
