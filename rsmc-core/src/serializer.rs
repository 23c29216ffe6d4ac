//! Serializers turn application values into an opaque [`Payload`] and
//! back. Two concrete, non-interoperable implementations are provided, per
//! spec §4.1: a "structured" one for compatibility with the traditional
//! stored format (`bincode`, following the encoding already used for wire
//! packets in `protocol::binary`) and a JSON one. They are selected via
//! [`crate::client::ClientConfig`] and are not required to agree on a
//! wire format with each other — a value written by one cannot be read by
//! the other, because they set different flag bits.

use bincode::{DefaultOptions, Options};
use serde::{de::DeserializeOwned, Serialize as SerdeSerialize};

use crate::{
    error::Error,
    payload::{Payload, FLAG_JSON, FLAG_STRUCTURED},
};

/// Encodes/decodes application values to/from the opaque byte-plus-flags
/// representation the wire protocols carry.
///
/// `serialize` with no value returns `None` (the caller treats this as "do
/// not transmit", used by `append`/`prepend` which never serialize at
/// all). `deserialize` with no payload returns `None` (a cache miss).
pub trait Serializer: Clone + Send + Sync + 'static {
    fn serialize<V: SerdeSerialize>(&self, value: Option<&V>) -> Result<Option<Payload>, Error>;
    fn deserialize<V: DeserializeOwned>(&self, payload: Option<Payload>) -> Result<Option<V>, Error>;
}

fn bincode_options() -> impl Options {
    DefaultOptions::new().with_big_endian().with_fixint_encoding()
}

/// The default serializer: encodes structured values with `bincode`,
/// setting [`FLAG_STRUCTURED`]. This is the format existing memcached
/// clients using the traditional stored representation expect.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredSerializer;

impl Serializer for StructuredSerializer {
    fn serialize<V: SerdeSerialize>(&self, value: Option<&V>) -> Result<Option<Payload>, Error> {
        let value = match value {
            None => return Ok(None),
            Some(v) => v,
        };
        let data = bincode_options().serialize(value)?;
        Ok(Some(Payload::new(data, FLAG_STRUCTURED)))
    }

    fn deserialize<V: DeserializeOwned>(&self, payload: Option<Payload>) -> Result<Option<V>, Error> {
        let payload = match payload {
            None => return Ok(None),
            Some(p) => p,
        };
        if payload.data.is_empty() {
            return Ok(None);
        }
        // Rust's static typing makes the source model's "scalar emitted
        // verbatim, structured value bincode-encoded" distinction moot: a
        // typed `V` always round-trips through the same bincode config
        // regardless of which bit produced it, so we always decode with
        // it. The flag bit still identifies *that* this serializer wrote
        // the payload, which is what a receiver needs to decide whether to
        // decode at all.
        let value = bincode_options().deserialize(&payload.data)?;
        Ok(Some(value))
    }
}

/// A serializer that encodes structured values as JSON, setting
/// [`FLAG_JSON`]. Not interoperable with [`StructuredSerializer`]: a value
/// written by one cannot be read by the other.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<V: SerdeSerialize>(&self, value: Option<&V>) -> Result<Option<Payload>, Error> {
        let value = match value {
            None => return Ok(None),
            Some(v) => v,
        };
        let data = serde_json::to_vec(value)?;
        Ok(Some(Payload::new(data, FLAG_JSON)))
    }

    fn deserialize<V: DeserializeOwned>(&self, payload: Option<Payload>) -> Result<Option<V>, Error> {
        let payload = match payload {
            None => return Ok(None),
            Some(p) => p,
        };
        if payload.data.is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_slice(&payload.data)?;
        Ok(Some(value))
    }
}
