//! The high-level client used to talk to a memcached cluster: one
//! [`Client`] owns one [`connection::ConnectionHandle`] per configured
//! server and routes each command through a [`Selector`], [`Serializer`]
//! and [`Compressor`] before it reaches the wire. Generalizes the
//! teacher's `deadpool`-pooled `Client<C, P>`
//! (`rsmc-core/src/client.rs`): where the teacher checked a connection
//! out of a pool per call, every command here goes to the one actor
//! already owning that server's connection (spec §4.5's single in-flight
//! slot rules out a pool of interchangeable connections).
//!
//! Per spec §7, almost every expected failure (miss, protocol rejection,
//! I/O error, routing failure) resolves to the command's natural default
//! return value rather than a propagated `Result`: a `None`, a `false`,
//! an empty map. `Error` still exists for the pieces of the engine that
//! can genuinely fail, and every swallowed failure is reported through a
//! `tracing` event so an application that cares can observe it.

use std::{
    collections::{HashMap, HashSet},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize as SerdeSerialize};
use tokio::sync::oneshot;

use crate::{
    compressor::Compressor,
    connection::{self, ConnectionConfig, ConnectionHandle},
    error::Error,
    payload::Payload,
    protocol::{AppendPrependKind, IncrDecrKind, StoreKind, WireProtocol},
    request::Command,
    selector::{PreHashedKey, Selector, ServerId, ServerSpec},
    serializer::Serializer,
    socket::Socket,
};

/// A user-supplied key transformer, run before validation/routing (spec
/// §4.6 submission step 1). Defaults to the identity function.
pub type KeyPreprocessor = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

fn identity_preprocessor(key: &[u8]) -> Vec<u8> {
    key.to_vec()
}

/// Configuration for a [`Client`]: the server list, the strategy objects
/// (spec §4.1-§4.3), and the namespace settings (spec §3).
#[derive(Clone)]
pub struct ClientConfig<Sel, Ser, Comp> {
    servers: Vec<ServerSpec>,
    selector: Sel,
    serializer: Ser,
    compressor: Comp,
    namespace: Vec<u8>,
    /// Whether the namespace is folded into the hash used to pick a
    /// server, or only physically prefixed onto the wire key (spec §3,
    /// default `true`).
    hash_namespace: bool,
    connection: ConnectionConfig,
    preprocessor: KeyPreprocessor,
}

impl<Sel: Selector + Default, Ser: Serializer + Default, Comp: Compressor + Default> ClientConfig<Sel, Ser, Comp> {
    pub fn new<I: Into<ServerSpec>>(servers: impl IntoIterator<Item = I>) -> Self {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            selector: Sel::default(),
            serializer: Ser::default(),
            compressor: Comp::default(),
            namespace: Vec::new(),
            hash_namespace: true,
            connection: ConnectionConfig::default(),
            preprocessor: Arc::new(identity_preprocessor),
        }
    }
}

impl<Sel: Selector, Ser: Serializer, Comp: Compressor> ClientConfig<Sel, Ser, Comp> {
    pub fn with_selector<Sel2: Selector>(self, selector: Sel2) -> ClientConfig<Sel2, Ser, Comp> {
        ClientConfig {
            servers: self.servers,
            selector,
            serializer: self.serializer,
            compressor: self.compressor,
            namespace: self.namespace,
            hash_namespace: self.hash_namespace,
            connection: self.connection,
            preprocessor: self.preprocessor,
        }
    }

    pub fn with_serializer<Ser2: Serializer>(self, serializer: Ser2) -> ClientConfig<Sel, Ser2, Comp> {
        ClientConfig {
            servers: self.servers,
            selector: self.selector,
            serializer,
            compressor: self.compressor,
            namespace: self.namespace,
            hash_namespace: self.hash_namespace,
            connection: self.connection,
            preprocessor: self.preprocessor,
        }
    }

    pub fn with_compressor<Comp2: Compressor>(self, compressor: Comp2) -> ClientConfig<Sel, Ser, Comp2> {
        ClientConfig {
            servers: self.servers,
            selector: self.selector,
            serializer: self.serializer,
            compressor,
            namespace: self.namespace,
            hash_namespace: self.hash_namespace,
            connection: self.connection,
            preprocessor: self.preprocessor,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<Vec<u8>>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_hash_namespace(mut self, hash_namespace: bool) -> Self {
        self.hash_namespace = hash_namespace;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connection.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.connection.request_timeout = timeout;
        self
    }

    /// Sets the key transformer run before every key is validated and
    /// routed (spec §4.6 step 1, §6 `preprocessor`). Defaults to identity.
    pub fn with_preprocessor(mut self, f: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> Self {
        self.preprocessor = Arc::new(f);
        self
    }
}

/// A client for a memcached cluster. Cloning gives the clone its own
/// table of [`ConnectionHandle`]s, but each handle still addresses the
/// same underlying connection actor (spec §4.5 — the actor, not the
/// `Client`, owns the socket), so cloning remains cheap.
pub struct Client<S, W, Sel, Ser, Comp> {
    connections: HashMap<ServerId, ConnectionHandle>,
    protocol: W,
    connection_config: ConnectionConfig,
    selector: Sel,
    serializer: Ser,
    compressor: Comp,
    namespace: Vec<u8>,
    hash_namespace: bool,
    preprocessor: KeyPreprocessor,
    _socket: PhantomData<fn() -> S>,
}

impl<S, W, Sel, Ser, Comp> Clone for Client<S, W, Sel, Ser, Comp>
where
    W: Clone,
    Sel: Clone,
    Ser: Clone,
    Comp: Clone,
{
    fn clone(&self) -> Self {
        Self {
            connections: self.connections.clone(),
            protocol: self.protocol.clone(),
            connection_config: self.connection_config,
            selector: self.selector.clone(),
            serializer: self.serializer.clone(),
            compressor: self.compressor.clone(),
            namespace: self.namespace.clone(),
            hash_namespace: self.hash_namespace,
            preprocessor: self.preprocessor.clone(),
            _socket: PhantomData,
        }
    }
}

impl<S, W, Sel, Ser, Comp> Client<S, W, Sel, Ser, Comp>
where
    S: Socket,
    W: WireProtocol<S>,
    Sel: Selector,
    Ser: Serializer,
    Comp: Compressor,
{
    /// Spawns one connection actor per configured server and builds the
    /// selector's routing ring. `protocol` is shared (cloned) across every
    /// connection actor.
    pub fn new(config: ClientConfig<Sel, Ser, Comp>, protocol: W) -> Self {
        let ClientConfig {
            servers,
            mut selector,
            serializer,
            compressor,
            namespace,
            hash_namespace,
            connection,
            preprocessor,
        } = config;
        selector.set_servers(servers.clone());

        let connections = servers
            .into_iter()
            .map(|spec| {
                let handle = connection::spawn::<S, W>(spec.id.clone(), protocol.clone(), connection);
                (spec.id, handle)
            })
            .collect();

        Self {
            connections,
            protocol,
            connection_config: connection,
            selector,
            serializer,
            compressor,
            namespace,
            hash_namespace,
            preprocessor,
            _socket: PhantomData,
        }
    }

    fn wire_key(&self, real_key: &[u8]) -> Vec<u8> {
        if self.namespace.is_empty() {
            real_key.to_vec()
        } else {
            [&self.namespace[..], real_key].concat()
        }
    }

    fn hash_namespace_bytes(&self) -> &[u8] {
        if self.hash_namespace {
            &self.namespace
        } else {
            b""
        }
    }

    /// Applies the key preprocessor, then validates and routes the
    /// resulting key. Returns the transformed key alongside its server so
    /// every later step (wire-key construction, hashing) stays consistent
    /// with what was actually validated and routed (spec §4.6 step 1).
    fn route(&self, real_key: &[u8]) -> Result<(ServerId, Vec<u8>), Error> {
        let real_key = (self.preprocessor)(real_key);
        crate::selector::validate_key(&real_key)?;
        let server = self.selector.get_server(&real_key, self.hash_namespace_bytes()).ok_or(Error::NoRoute)?;
        Ok((server, real_key))
    }

    /// Same as [`Self::route`], but only the transformer runs against
    /// `key.real_key` — `key.hash_index` already picked the server, so it
    /// bypasses both hashing and preprocessing's influence on routing.
    fn route_prehashed(&self, key: &PreHashedKey) -> Result<(ServerId, Vec<u8>), Error> {
        let real_key = (self.preprocessor)(&key.real_key);
        crate::selector::validate_key(&real_key)?;
        let server = self.selector.get_server_prehashed(key.hash_index).ok_or(Error::NoRoute)?;
        Ok((server, real_key))
    }

    fn handle_for(&self, server: &ServerId) -> Result<&ConnectionHandle, Error> {
        self.connections.get(server).ok_or(Error::NoRoute)
    }

    async fn send<T>(&self, server: &ServerId, build: impl FnOnce(oneshot::Sender<Result<T, Error>>) -> Command) -> Result<T, Error> {
        let handle = self.handle_for(server)?;
        let (tx, rx) = oneshot::channel();
        handle.dispatch(build(tx)).await;
        rx.await.map_err(|_| Error::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "connection actor shut down")))?
    }

    async fn get_raw(&self, real_key: &[u8]) -> Result<Option<Payload>, Error> {
        let (server, real_key) = self.route(real_key)?;
        let key = self.wire_key(&real_key);
        self.send(&server, |reply| Command::Get { key, reply }).await
    }

    /// Fetches and deserializes a single value. Returns `None` on a miss,
    /// a routing failure, or any wire/deserialization error (logged via
    /// `tracing`, per spec §7).
    pub async fn get<K: AsRef<[u8]>, V: DeserializeOwned>(&self, key: K) -> Option<V> {
        let key = key.as_ref();
        match self.get_raw(key).await {
            Ok(Some(payload)) => match self.decode(payload) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(error = %err, "get: failed to decode value");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "get failed");
                None
            }
        }
    }

    /// Fetches multiple keys concurrently. Keys that miss, fail to route,
    /// or fail to decode are simply absent from the result map (spec §7).
    pub async fn get_multi<K: AsRef<[u8]>, V: DeserializeOwned>(&self, keys: &[K]) -> HashMap<Vec<u8>, V> {
        let fetches = keys.iter().map(|key| {
            let key = key.as_ref().to_vec();
            async move {
                let value: Option<V> = self.get(&key).await;
                value.map(|v| (key, v))
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    fn decode<V: DeserializeOwned>(&self, payload: Payload) -> Result<Option<V>, Error> {
        let payload = self.compressor.decompress(payload)?;
        self.serializer.deserialize(Some(payload))
    }

    fn encode<V: SerdeSerialize>(&self, value: &V, kind: crate::request::CommandKind) -> Result<Payload, Error> {
        let payload = self.serializer.serialize(Some(value))?.unwrap_or_default();
        self.compressor.compress(payload, kind)
    }

    async fn store(&self, kind: StoreKind, real_key: &[u8], payload: Payload, expire: u32) -> Result<bool, Error> {
        let (server, real_key) = self.route(real_key)?;
        let key = self.wire_key(&real_key);
        self.send(&server, |reply| Command::Store { kind, key, payload, expire, reply }).await
    }

    /// Unconditionally stores a value. Returns `false` on any failure,
    /// including routing and encode errors (spec §7).
    pub async fn set<K: AsRef<[u8]>, V: SerdeSerialize>(&self, key: K, value: &V, expire: u32) -> bool {
        self.store_with_kind(StoreKind::Set, key.as_ref(), value, expire, crate::request::CommandKind::Set).await
    }

    /// Stores only if `key` does not already exist.
    pub async fn add<K: AsRef<[u8]>, V: SerdeSerialize>(&self, key: K, value: &V, expire: u32) -> bool {
        self.store_with_kind(StoreKind::Add, key.as_ref(), value, expire, crate::request::CommandKind::Add).await
    }

    /// Stores only if `key` already exists.
    pub async fn replace<K: AsRef<[u8]>, V: SerdeSerialize>(&self, key: K, value: &V, expire: u32) -> bool {
        self.store_with_kind(StoreKind::Replace, key.as_ref(), value, expire, crate::request::CommandKind::Replace).await
    }

    async fn store_with_kind<V: SerdeSerialize>(
        &self,
        kind: StoreKind,
        key: &[u8],
        value: &V,
        expire: u32,
        command_kind: crate::request::CommandKind,
    ) -> bool {
        let payload = match self.encode(value, command_kind) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, "store: failed to encode value");
                return false;
            }
        };
        match self.store(kind, key, payload, expire).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(error = %err, "store failed");
                false
            }
        }
    }

    /// Sets multiple key/value pairs concurrently. Returns the keys that
    /// were *not* successfully stored (spec §7's bulk error shape).
    pub async fn set_multi<K: AsRef<[u8]>, V: SerdeSerialize>(&self, values: &HashMap<K, V>) -> Vec<Vec<u8>> {
        self.set_multi_with_expire(values, 0).await
    }

    pub async fn set_multi_with_expire<K: AsRef<[u8]>, V: SerdeSerialize>(
        &self,
        values: &HashMap<K, V>,
        expire: u32,
    ) -> Vec<Vec<u8>> {
        let stores = values.iter().map(|(key, value)| {
            let key_bytes = key.as_ref().to_vec();
            async move {
                let ok = self.set(&key_bytes, value, expire).await;
                (key_bytes, ok)
            }
        });
        join_all(stores).await.into_iter().filter(|(_, ok)| !ok).map(|(key, _)| key).collect()
    }

    /// Concatenates `data` after the value already stored for `key`.
    /// Never serializes or compresses (spec §4.2's append/prepend bypass).
    pub async fn append<K: AsRef<[u8]>>(&self, key: K, data: &[u8]) -> bool {
        self.append_prepend(AppendPrependKind::Append, key.as_ref(), data).await
    }

    /// Concatenates `data` before the value already stored for `key`.
    pub async fn prepend<K: AsRef<[u8]>>(&self, key: K, data: &[u8]) -> bool {
        self.append_prepend(AppendPrependKind::Prepend, key.as_ref(), data).await
    }

    async fn append_prepend(&self, kind: AppendPrependKind, real_key: &[u8], data: &[u8]) -> bool {
        let result: Result<bool, Error> = async {
            let (server, real_key) = self.route(real_key)?;
            let key = self.wire_key(&real_key);
            self.send(&server, |reply| Command::AppendPrepend { kind, key, data: data.to_vec(), reply }).await
        }
        .await;
        match result {
            Ok(ok) => ok,
            Err(err) => {
                tracing::warn!(error = %err, "append/prepend failed");
                false
            }
        }
    }

    /// Deletes a key. Returns `false` if the key was missing or the
    /// request failed (spec §7).
    pub async fn delete<K: AsRef<[u8]>>(&self, key: K) -> bool {
        let real_key = key.as_ref();
        let result: Result<bool, Error> = async {
            let (server, real_key) = self.route(real_key)?;
            let key = self.wire_key(&real_key);
            self.send(&server, |reply| Command::Delete { key, reply }).await
        }
        .await;
        match result {
            Ok(ok) => ok,
            Err(err) => {
                tracing::warn!(error = %err, "delete failed");
                false
            }
        }
    }

    /// Deletes multiple keys concurrently. Returns the keys that were
    /// *not* deleted (either missing, or failed outright).
    pub async fn delete_multi<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<Vec<u8>> {
        let deletes = keys.iter().map(|key| {
            let key_bytes = key.as_ref().to_vec();
            async move {
                let ok = self.delete(&key_bytes).await;
                (key_bytes, ok)
            }
        });
        join_all(deletes).await.into_iter().filter(|(_, ok)| !ok).map(|(key, _)| key).collect()
    }

    async fn incr_decr(
        &self,
        kind: IncrDecrKind,
        real_key: &[u8],
        delta: u64,
        initial: Option<u64>,
        expire: u32,
    ) -> Option<u64> {
        let result: Result<Option<u64>, Error> = async {
            let (server, real_key) = self.route(real_key)?;
            let key = self.wire_key(&real_key);
            self.send(&server, |reply| Command::IncrDecr { kind, key, delta, initial, expire, reply }).await
        }
        .await;
        match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "incr/decr failed");
                None
            }
        }
    }

    /// Atomically increments a numeric value stored as its ASCII decimal
    /// representation. Returns `None` if the key is missing and no
    /// `initial` was given, or on any failure (spec §4.4.2).
    pub async fn incr<K: AsRef<[u8]>>(&self, key: K, delta: u64, initial: Option<u64>, expire: u32) -> Option<u64> {
        self.incr_decr(IncrDecrKind::Incr, key.as_ref(), delta, initial, expire).await
    }

    pub async fn decr<K: AsRef<[u8]>>(&self, key: K, delta: u64, initial: Option<u64>, expire: u32) -> Option<u64> {
        self.incr_decr(IncrDecrKind::Decr, key.as_ref(), delta, initial, expire).await
    }

    /// Flushes every server in the cluster. Returns `false` if any server
    /// failed to flush.
    pub async fn flush_all(&self, delay: Option<u32>) -> bool {
        let servers: Vec<ServerId> = self.selector.servers();
        let flushes = servers.iter().map(|server| {
            let server = server.clone();
            async move {
                self.send(&server, |reply| Command::FlushAll { delay, reply })
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(error = %err, server = %server, "flush_all failed");
                        false
                    })
            }
        });
        join_all(flushes).await.into_iter().all(|ok| ok)
    }

    /// Returns `stats` from every configured server, keyed by server id.
    pub async fn stats(&self) -> HashMap<ServerId, HashMap<String, String>> {
        let servers: Vec<ServerId> = self.selector.servers();
        let gathers = servers.iter().map(|server| {
            let server = server.clone();
            async move {
                let result = self.send(&server, |reply| Command::Stats { name: None, reply }).await;
                match result {
                    Ok(stats) => Some((server, stats)),
                    Err(err) => {
                        tracing::warn!(error = %err, server = %server, "stats failed");
                        None
                    }
                }
            }
        });
        join_all(gathers).await.into_iter().flatten().collect()
    }

    /// Returns each configured server's `version` reply, keyed by server
    /// id; a server that fails to answer is simply absent.
    pub async fn version(&self) -> HashMap<ServerId, String> {
        let servers: Vec<ServerId> = self.selector.servers();
        let gathers = servers.iter().map(|server| {
            let server = server.clone();
            async move {
                let result = self.send(&server, |reply| Command::Version { reply }).await;
                match result {
                    Ok(version) => Some((server, version)),
                    Err(err) => {
                        tracing::warn!(error = %err, server = %server, "version failed");
                        None
                    }
                }
            }
        });
        join_all(gathers).await.into_iter().flatten().collect()
    }

    /// Fetches a value using a pre-hashed key (spec §3), bypassing CRC32
    /// hashing for routing.
    pub async fn get_prehashed<V: DeserializeOwned>(&self, key: &PreHashedKey) -> Option<V> {
        let result: Result<Option<Payload>, Error> = async {
            let (server, real_key) = self.route_prehashed(key)?;
            let wire_key = self.wire_key(&real_key);
            self.send(&server, |reply| Command::Get { key: wire_key, reply }).await
        }
        .await;
        match result {
            Ok(Some(payload)) => self.decode(payload).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "get_prehashed: failed to decode value");
                None
            }),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "get_prehashed failed");
                None
            }
        }
    }

    /// Replaces the server list at runtime (spec §6 `setServers`): closes
    /// any connection whose server is no longer in `servers`, and spawns a
    /// fresh actor for each newly added one. Connections for servers that
    /// stay in the list are left untouched.
    pub fn set_servers(&mut self, servers: Vec<ServerSpec>) {
        self.selector.set_servers(servers.clone());

        let desired: HashSet<ServerId> = servers.iter().map(|spec| spec.id.clone()).collect();
        let stale: Vec<ServerId> = self.connections.keys().filter(|id| !desired.contains(*id)).cloned().collect();
        for id in stale {
            if let Some(handle) = self.connections.remove(&id) {
                handle.shutdown();
            }
        }

        for spec in servers {
            if !self.connections.contains_key(&spec.id) {
                let handle = connection::spawn::<S, W>(spec.id.clone(), self.protocol.clone(), self.connection_config);
                self.connections.insert(spec.id, handle);
            }
        }
    }

    /// Gracefully shuts down every connection (spec §6 `disconnect`): each
    /// actor sends a best-effort `quit` and stops. Further commands issued
    /// after this call fail with a routing error until [`Self::set_servers`]
    /// is called again.
    pub fn disconnect(&mut self) {
        for handle in self.connections.values() {
            handle.shutdown();
        }
        self.connections.clear();
    }

    /// Gets (and optionally sets) the namespace (spec §6 `namespace`).
    pub fn namespace(&mut self, new: Option<String>) -> &str {
        if let Some(new) = new {
            self.namespace = new.into_bytes();
        }
        std::str::from_utf8(&self.namespace).unwrap_or_default()
    }

    /// Gets (and optionally sets) whether the namespace is folded into
    /// the routing hash (spec §6 `hashNamespace`).
    pub fn hash_namespace(&mut self, new: Option<bool>) -> bool {
        if let Some(new) = new {
            self.hash_namespace = new;
        }
        self.hash_namespace
    }

    /// Gets (and optionally sets) the compression threshold in bytes
    /// (spec §6 `compressThreshold`). Delegates straight to the
    /// [`Compressor`], which already holds this value behind interior
    /// mutability.
    pub fn compress_threshold(&self, new: Option<usize>) -> usize {
        if let Some(new) = new {
            self.compressor.set_compress_threshold(new);
        }
        self.compressor.compress_threshold()
    }

    /// Sets the key transformer run before every key is validated and
    /// routed (spec §6 `setPreprocessor`).
    pub fn set_preprocessor(&mut self, f: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) {
        self.preprocessor = Arc::new(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compressor::NoCompressor,
        selector::CrcRingSelector,
        serializer::StructuredSerializer,
        socket::PreparerHook,
    };
    use async_trait::async_trait;

    /// A `Socket` that is never actually driven: these tests construct a
    /// `Client` by hand to exercise routing/namespacing without spawning
    /// connection actors, so `S` only needs to type-check. Full
    /// end-to-end coverage against both real wire protocols lives in
    /// `rsmc-tokio`'s integration tests, which run an in-process TCP
    /// listener.
    #[derive(Clone)]
    struct FakeSocket;

    #[async_trait]
    impl Socket for FakeSocket {
        async fn connect(_server: &str, _preparer: Option<PreparerHook>) -> Result<Self, Error> {
            Ok(Self)
        }
        async fn read_exact(&mut self, _buf: &mut [u8]) -> Result<(), Error> {
            Ok(())
        }
        async fn write_all(&mut self, _data: &[u8]) -> Result<(), Error> {
            Ok(())
        }
    }

    fn bare_client(
        namespace: &[u8],
        hash_namespace: bool,
        servers: Vec<ServerSpec>,
    ) -> Client<FakeSocket, crate::protocol::BinaryProtocol, CrcRingSelector, StructuredSerializer, NoCompressor> {
        let mut selector = CrcRingSelector::new();
        selector.set_servers(servers);
        Client {
            connections: HashMap::new(),
            protocol: crate::protocol::BinaryProtocol::new(),
            connection_config: ConnectionConfig::default(),
            selector,
            serializer: StructuredSerializer,
            compressor: NoCompressor,
            namespace: namespace.to_vec(),
            hash_namespace,
            preprocessor: Arc::new(identity_preprocessor),
            _socket: PhantomData,
        }
    }

    #[test]
    fn test_wire_key_prefixes_namespace() {
        let client = bare_client(b"ns:", true, vec![ServerSpec::new("a", 1), ServerSpec::new("b", 1)]);
        assert_eq!(b"ns:mykey".to_vec(), client.wire_key(b"mykey"));
        assert_eq!(b"ns:", client.hash_namespace_bytes());
    }

    #[test]
    fn test_hash_namespace_disabled() {
        let client = bare_client(b"ns:", false, vec![ServerSpec::new("a", 1)]);
        assert_eq!(b"" as &[u8], client.hash_namespace_bytes());
        assert_eq!(b"ns:mykey".to_vec(), client.wire_key(b"mykey"));
    }

    #[test]
    fn test_route_rejects_invalid_key() {
        let client = bare_client(b"", true, vec![ServerSpec::new("a", 1)]);
        assert!(matches!(client.route(b"has space"), Err(Error::InvalidKey)));
    }

    #[test]
    fn test_preprocessor_transforms_key_before_routing() {
        let mut client = bare_client(b"", true, vec![ServerSpec::new("a", 1)]);
        client.set_preprocessor(|key: &[u8]| [b"pre:".as_slice(), key].concat());
        let (server, real_key) = client.route(b"mykey").unwrap();
        assert_eq!(b"pre:mykey".to_vec(), real_key);
        assert_eq!("a:11211", server);
    }

    #[test]
    fn test_namespace_accessor_gets_and_sets() {
        let mut client = bare_client(b"old:", true, vec![ServerSpec::new("a", 1)]);
        assert_eq!("old:", client.namespace(None));
        assert_eq!("new:", client.namespace(Some("new:".to_string())));
        assert_eq!(b"new:".to_vec(), client.namespace);
    }

    #[test]
    fn test_hash_namespace_accessor_gets_and_sets() {
        let mut client = bare_client(b"ns:", true, vec![ServerSpec::new("a", 1)]);
        assert!(client.hash_namespace(None));
        assert!(!client.hash_namespace(Some(false)));
        assert!(!client.hash_namespace);
    }

    #[test]
    fn test_compress_threshold_accessor_delegates_to_compressor() {
        let client = bare_client(b"", true, vec![ServerSpec::new("a", 1)]);
        assert_eq!(0, client.compress_threshold(None));
        assert_eq!(0, client.compress_threshold(Some(5000)));
    }

    #[tokio::test]
    async fn test_set_servers_adds_and_removes_connections() {
        let config = ClientConfig::<CrcRingSelector, StructuredSerializer, NoCompressor>::new(["a"]);
        let mut client: Client<FakeSocket, crate::protocol::BinaryProtocol, _, _, _> =
            Client::new(config, crate::protocol::BinaryProtocol::new());
        assert_eq!(1, client.connections.len());

        client.set_servers(vec![ServerSpec::new("b", 1), ServerSpec::new("c", 1)]);
        assert_eq!(2, client.connections.len());
        assert!(!client.connections.contains_key("a:11211"));
        assert!(client.connections.contains_key("b:11211"));
        assert!(client.connections.contains_key("c:11211"));
    }

    #[tokio::test]
    async fn test_disconnect_clears_connections() {
        let config = ClientConfig::<CrcRingSelector, StructuredSerializer, NoCompressor>::new(["a"]);
        let mut client: Client<FakeSocket, crate::protocol::BinaryProtocol, _, _, _> =
            Client::new(config, crate::protocol::BinaryProtocol::new());
        client.disconnect();
        assert!(client.connections.is_empty());
    }
}
