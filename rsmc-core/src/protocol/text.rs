//! The memcached ASCII text protocol: CRLF-terminated command lines, with
//! a raw data block following storage commands (spec §4.4.1). The teacher
//! never implemented this protocol; grounded instead on the line-oriented
//! request/response shape documented for the ASCII protocol and on the
//! pack's `pelikan-io-pelikan` proxy sources for how a text-protocol
//! reply line is tokenized in idiomatic Rust.

use async_trait::async_trait;
use std::collections::HashMap;

use super::{status::ProtocolError, AppendPrependKind, IncrDecrKind, StoreKind, WireProtocol};
use crate::{error::Error, payload::Payload, socket::Socket};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Reads one CRLF-terminated line, returning it without the line ending.
/// `Socket` only exposes fixed-size reads, so this reads one byte at a
/// time; text-protocol replies are short and this keeps `Socket` minimal
/// (spec §4.4's socket primitive is byte-oriented, not line-oriented).
async fn read_line<S: Socket>(socket: &mut S) -> Result<String, Error> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        socket.read_exact(&mut byte).await?;
        if byte[0] == LF {
            if buf.last() == Some(&CR) {
                buf.pop();
            }
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8.into())
}

async fn write_line<S: Socket>(socket: &mut S, line: &str) -> Result<(), Error> {
    let mut bytes = line.as_bytes().to_vec();
    bytes.push(CR);
    bytes.push(LF);
    socket.write_all(&bytes).await
}

async fn read_data_block<S: Socket>(socket: &mut S, len: usize) -> Result<Vec<u8>, Error> {
    let mut data = vec![0u8; len];
    socket.read_exact(&mut data).await?;
    let mut trailer = [0u8; 2];
    socket.read_exact(&mut trailer).await?;
    if trailer != [CR, LF] {
        return Err(ProtocolError::UnexpectedReply("data block missing CRLF trailer".to_string()).into());
    }
    Ok(data)
}

fn parse_u32(field: &str) -> Result<u32, Error> {
    field.parse().map_err(|_| ProtocolError::MalformedNumericField.into())
}

fn parse_u64(field: &str) -> Result<u64, Error> {
    field.parse().map_err(|_| ProtocolError::MalformedNumericField.into())
}

fn key_str(key: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(key).map_err(|_| ProtocolError::InvalidUtf8.into())
}

/// Speaks the memcached ASCII text protocol over a [`Socket`]. All
/// commands are sent without `noreply`: the engine always waits for a
/// reply line so that the connection actor's single in-flight slot can
/// tell when it is safe to send the next request.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextProtocol;

impl TextProtocol {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Socket> WireProtocol<S> for TextProtocol {
    async fn store(
        &self,
        socket: &mut S,
        kind: StoreKind,
        key: &[u8],
        payload: Payload,
        expire: u32,
    ) -> Result<bool, Error> {
        let cmd = match kind {
            StoreKind::Set => "set",
            StoreKind::Add => "add",
            StoreKind::Replace => "replace",
        };
        write_line(
            socket,
            &format!("{} {} {} {} {}", cmd, key_str(key)?, payload.flags, expire, payload.data.len()),
        )
        .await?;
        socket.write_all(&payload.data).await?;
        socket.write_all(&[CR, LF]).await?;

        match read_line(socket).await?.as_str() {
            "STORED" => Ok(true),
            "NOT_STORED" | "EXISTS" => Ok(false),
            other => Err(ProtocolError::UnexpectedReply(other.to_string()).into()),
        }
    }

    async fn get(&self, socket: &mut S, key: &[u8]) -> Result<Option<Payload>, Error> {
        write_line(socket, &format!("get {}", key_str(key)?)).await?;

        let header = read_line(socket).await?;
        if header == "END" {
            return Ok(None);
        }
        let mut parts = header.split_whitespace();
        match parts.next() {
            Some("VALUE") => {}
            _ => return Err(ProtocolError::UnexpectedReply(header).into()),
        }
        let _returned_key = parts.next().ok_or(ProtocolError::UnexpectedReply(header.clone()))?;
        let flags = parse_u32(parts.next().ok_or(ProtocolError::UnexpectedReply(header.clone()))?)?;
        let len: usize = parts
            .next()
            .ok_or(ProtocolError::UnexpectedReply(header.clone()))?
            .parse()
            .map_err(|_| ProtocolError::MalformedNumericField)?;

        let data = read_data_block(socket, len).await?;
        let end = read_line(socket).await?;
        if end != "END" {
            return Err(ProtocolError::UnexpectedReply(end).into());
        }
        Ok(Some(Payload::new(data, flags)))
    }

    async fn append_prepend(
        &self,
        socket: &mut S,
        kind: AppendPrependKind,
        key: &[u8],
        data: &[u8],
    ) -> Result<bool, Error> {
        let cmd = match kind {
            AppendPrependKind::Append => "append",
            AppendPrependKind::Prepend => "prepend",
        };
        write_line(socket, &format!("{} {} 0 0 {}", cmd, key_str(key)?, data.len())).await?;
        socket.write_all(data).await?;
        socket.write_all(&[CR, LF]).await?;

        match read_line(socket).await?.as_str() {
            "STORED" => Ok(true),
            "NOT_STORED" => Ok(false),
            other => Err(ProtocolError::UnexpectedReply(other.to_string()).into()),
        }
    }

    async fn delete(&self, socket: &mut S, key: &[u8]) -> Result<bool, Error> {
        write_line(socket, &format!("delete {}", key_str(key)?)).await?;
        match read_line(socket).await?.as_str() {
            "DELETED" => Ok(true),
            "NOT_FOUND" => Ok(false),
            other => Err(ProtocolError::UnexpectedReply(other.to_string()).into()),
        }
    }

    async fn incr_decr(
        &self,
        socket: &mut S,
        kind: IncrDecrKind,
        key: &[u8],
        delta: u64,
        initial: Option<u64>,
        _expire: u32,
    ) -> Result<Option<u64>, Error> {
        let cmd = match kind {
            IncrDecrKind::Incr => "incr",
            IncrDecrKind::Decr => "decr",
        };
        write_line(socket, &format!("{} {} {}", cmd, key_str(key)?, delta)).await?;
        let reply = read_line(socket).await?;
        match reply.as_str() {
            "NOT_FOUND" => {
                // The text protocol has no atomic "initialize if missing"
                // verb; emulate spec §4.4.2's incr/decr fallback with a
                // best-effort `add <key> 0 0 <len>` of the initial value.
                if let Some(initial) = initial {
                    let stored = self
                        .store(socket, StoreKind::Add, key, Payload::new(initial.to_string().into_bytes(), 0), 0)
                        .await?;
                    if stored {
                        Ok(Some(initial))
                    } else {
                        Ok(None)
                    }
                } else {
                    Ok(None)
                }
            }
            other => Ok(Some(parse_u64(other)?)),
        }
    }

    async fn flush_all(&self, socket: &mut S, delay: Option<u32>) -> Result<bool, Error> {
        let line = match delay {
            Some(delay) => format!("flush_all {}", delay),
            None => "flush_all".to_string(),
        };
        write_line(socket, &line).await?;
        match read_line(socket).await?.as_str() {
            "OK" => Ok(true),
            other => Err(ProtocolError::UnexpectedReply(other.to_string()).into()),
        }
    }

    async fn stats(&self, socket: &mut S, name: Option<&str>) -> Result<HashMap<String, String>, Error> {
        let line = match name {
            Some(name) => format!("stats {}", name),
            None => "stats".to_string(),
        };
        write_line(socket, &line).await?;

        let mut stats = HashMap::new();
        loop {
            let reply = read_line(socket).await?;
            if reply == "END" {
                break;
            }
            let mut parts = reply.splitn(3, ' ');
            match parts.next() {
                Some("STAT") => {}
                _ => return Err(ProtocolError::UnexpectedReply(reply).into()),
            }
            let key = parts.next().ok_or_else(|| ProtocolError::UnexpectedReply(reply.clone()))?;
            let value = parts.next().ok_or_else(|| ProtocolError::UnexpectedReply(reply.clone()))?;
            stats.insert(key.to_string(), value.to_string());
        }
        Ok(stats)
    }

    async fn version(&self, socket: &mut S) -> Result<String, Error> {
        write_line(socket, "version").await?;
        let reply = read_line(socket).await?;
        reply
            .strip_prefix("VERSION ")
            .map(|v| v.to_string())
            .ok_or_else(|| ProtocolError::UnexpectedReply(reply).into())
    }

    async fn quit(&self, socket: &mut S) -> Result<(), Error> {
        write_line(socket, "quit").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::PreparerHook;
    use std::collections::VecDeque;

    /// An in-memory `Socket` double, fed from a scripted list of replies
    /// and recording everything written to it. Grounded on the teacher's
    /// `rmsc-core/src/ring.rs` `TestConn` test-double pattern.
    #[derive(Default)]
    struct MockSocket {
        inbox: VecDeque<u8>,
        pub written: Vec<u8>,
    }

    impl MockSocket {
        fn with_script(bytes: &[u8]) -> Self {
            Self { inbox: bytes.iter().copied().collect(), written: Vec::new() }
        }
    }

    #[async_trait]
    impl Socket for MockSocket {
        async fn connect(_server: &str, _preparer: Option<PreparerHook>) -> Result<Self, Error> {
            unreachable!("not exercised in these tests")
        }

        async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
            for slot in buf.iter_mut() {
                *slot = self.inbox.pop_front().ok_or_else(|| {
                    Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "mock exhausted"))
                })?;
            }
            Ok(())
        }

        async fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
            self.written.extend_from_slice(data);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_get_hit() {
        let mut socket = MockSocket::with_script(b"VALUE mykey 5 5\r\nhello\r\nEND\r\n");
        let proto = TextProtocol::new();
        let payload = proto.get(&mut socket, b"mykey").await.unwrap().unwrap();
        assert_eq!(b"hello".to_vec(), payload.data);
        assert_eq!(5, payload.flags);
    }

    #[tokio::test]
    async fn test_get_miss() {
        let mut socket = MockSocket::with_script(b"END\r\n");
        let proto = TextProtocol::new();
        assert_eq!(None, proto.get(&mut socket, b"mykey").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_stored() {
        let mut socket = MockSocket::with_script(b"STORED\r\n");
        let proto = TextProtocol::new();
        let ok = proto.store(&mut socket, StoreKind::Set, b"k", Payload::new(b"v".to_vec(), 0), 0).await.unwrap();
        assert!(ok);
        let written = String::from_utf8(socket.written).unwrap();
        assert_eq!("set k 0 0 1\r\nv\r\n", written);
    }

    #[tokio::test]
    async fn test_incr_not_found_without_initial() {
        let mut socket = MockSocket::with_script(b"NOT_FOUND\r\n");
        let proto = TextProtocol::new();
        let result = proto.incr_decr(&mut socket, IncrDecrKind::Incr, b"k", 1, None, 0).await.unwrap();
        assert_eq!(None, result);
    }

    #[tokio::test]
    async fn test_incr_numeric_reply() {
        let mut socket = MockSocket::with_script(b"42\r\n");
        let proto = TextProtocol::new();
        let result = proto.incr_decr(&mut socket, IncrDecrKind::Incr, b"k", 1, None, 0).await.unwrap();
        assert_eq!(Some(42), result);
    }

    #[tokio::test]
    async fn test_version() {
        let mut socket = MockSocket::with_script(b"VERSION 1.6.21\r\n");
        let proto = TextProtocol::new();
        assert_eq!("1.6.21", proto.version(&mut socket).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats() {
        let mut socket = MockSocket::with_script(b"STAT pid 123\r\nSTAT uptime 456\r\nEND\r\n");
        let proto = TextProtocol::new();
        let stats = proto.stats(&mut socket, None).await.unwrap();
        assert_eq!(Some(&"123".to_string()), stats.get("pid"));
        assert_eq!(Some(&"456".to_string()), stats.get("uptime"));
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_protocol_error() {
        let mut socket = MockSocket::with_script(b"GARBAGE\r\n");
        let proto = TextProtocol::new();
        let err = proto.delete(&mut socket, b"k").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnexpectedReply(_))));
    }
}
