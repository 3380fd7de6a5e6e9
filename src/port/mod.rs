//! # Communication Port
//!
//! The request/reply messaging primitive shared by every service.
//!
//! A port is created in one of four [`PortMode`]s and keeps it for its whole life:
//!
//! - **local-send / local-receive**: paired by a direct reference. A send calls the
//!   target's handler inline and hands it a [`Replier`] that delivers the answer back
//!   to the sender's own handler.
//! - **network-send / network-receive**: paired by a `scheme://host:port` address. The
//!   receiving side runs a one-shot listener that serves exactly one request, waits
//!   for the local handler's reply, writes it back and closes. A further round trip
//!   needs another [`CommunicationPort::listen`] once the previous one has finished.
//!
//! Each network round trip uses its own connection. The connection opened by
//! [`CommunicationPort::set_target`] is consumed by the first send; later sends on the
//! same port connect again.
//!
//! A port is a cheap `Clone` handle; clones share all state. Concurrent sends on one
//! port are not supported. Use a port per concurrent caller.

mod address;
pub mod codec;
mod handler;
mod listener;

pub use address::TransportAddress;
pub use codec::{CodecError, CodecResult};
pub use handler::{AckHandler, MessageHandler, Replier};

use std::{
    fmt,
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::Mutex,
    task::AbortHandle,
};
use tracing::{debug, error, instrument, trace, warn};
use uuid::Uuid;

use crate::{
    config::TransportConfig,
    value::Payload,
    worker::{Worker, WorkerError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PortMode {
    LocalSend,
    LocalReceive,
    NetworkSend,
    NetworkReceive,
}

impl PortMode {
    pub fn is_local(&self) -> bool {
        matches!(self, PortMode::LocalSend | PortMode::LocalReceive)
    }

    pub fn is_sender(&self) -> bool {
        matches!(self, PortMode::LocalSend | PortMode::NetworkSend)
    }
}

/// Where a send port delivers its requests.
#[derive(Debug, Clone)]
pub enum PortTarget {
    /// A local-receive port in this process.
    Local(CommunicationPort),
    /// A `scheme://host:port` address served by a network-receive port.
    Remote(String),
}

impl From<CommunicationPort> for PortTarget {
    fn from(port: CommunicationPort) -> Self {
        PortTarget::Local(port)
    }
}

impl From<&CommunicationPort> for PortTarget {
    fn from(port: &CommunicationPort) -> Self {
        PortTarget::Local(port.clone())
    }
}

impl From<&str> for PortTarget {
    fn from(address: &str) -> Self {
        PortTarget::Remote(address.to_string())
    }
}

impl From<String> for PortTarget {
    fn from(address: String) -> Self {
        PortTarget::Remote(address)
    }
}

impl From<TransportAddress> for PortTarget {
    fn from(address: TransportAddress) -> Self {
        PortTarget::Remote(address.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("{port}: communication port is not ready")]
    NotReady { port: String },

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("{port}: operation not valid in {mode} mode: {operation}")]
    InvalidOperation {
        port: String,
        mode: PortMode,
        operation: String,
    },

    #[error("{port}: no receive handler registered")]
    NoHandler { port: String },

    #[error("{port}: target must be a local-receive port, got {mode}")]
    InvalidTarget { port: String, mode: PortMode },

    #[error("{port}: timed out after {timeout:?}")]
    Timeout { port: String, timeout: Duration },

    #[error("{port}: connection closed before the reply arrived")]
    ConnectionClosed { port: String },

    #[error("{port}: handler dropped the request without replying")]
    NoReply { port: String },

    #[error("Listener failed: {0}")]
    Listener(#[from] WorkerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PortResult<T> = Result<T, PortError>;

const NOT_READY_HINT: &str = "A local-send port needs a local-receive port as target. \
A network-send port needs a target address like \"tcp://localhost:5555\".";

enum Target {
    Local(CommunicationPort),
    Remote(TransportAddress),
}

struct PortInner {
    id: Uuid,
    mode: PortMode,
    name: RwLock<String>,
    transport: TransportConfig,
    target: RwLock<Option<Target>>,
    handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    ack_handler: RwLock<Option<AckHandler>>,
    // network-send only
    socket: Mutex<Option<TcpSocket>>,
    connection: Mutex<Option<TcpStream>>,
    // network-receive only
    listen_address: Option<TransportAddress>,
    bound_address: RwLock<Option<TransportAddress>>,
    received: AtomicBool,
    last_request: RwLock<Option<Payload>>,
    listener: Mutex<Option<Worker>>,
    // stays reachable while a join holds the worker
    listener_task: RwLock<Option<AbortHandle>>,
}

#[derive(Clone)]
pub struct CommunicationPort {
    inner: Arc<PortInner>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl CommunicationPort {
    fn build(
        mode: PortMode,
        transport: TransportConfig,
        socket: Option<TcpSocket>,
        listen_address: Option<TransportAddress>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            inner: Arc::new(PortInner {
                id,
                mode,
                name: RwLock::new(format!("{}-{}", mode, id.simple())),
                transport,
                target: RwLock::new(None),
                handler: RwLock::new(None),
                ack_handler: RwLock::new(None),
                socket: Mutex::new(socket),
                connection: Mutex::new(None),
                listen_address,
                bound_address: RwLock::new(None),
                received: AtomicBool::new(false),
                last_request: RwLock::new(None),
                listener: Mutex::new(None),
                listener_task: RwLock::new(None),
            }),
        }
    }

    pub fn local_send() -> Self {
        Self::build(PortMode::LocalSend, TransportConfig::default(), None, None)
    }

    pub fn local_receive() -> Self {
        Self::build(PortMode::LocalReceive, TransportConfig::default(), None, None)
    }

    /// Creates a network-send port. The socket is allocated here; the connection is
    /// made by [`CommunicationPort::set_target`].
    pub fn network_send(transport: &TransportConfig) -> PortResult<Self> {
        let socket = TcpSocket::new_v4()?;
        Ok(Self::build(
            PortMode::NetworkSend,
            transport.clone(),
            Some(socket),
            None,
        ))
    }

    /// Creates a network-receive port for `address`. Nothing is bound until
    /// [`CommunicationPort::listen`].
    pub fn network_receive(address: &str, transport: &TransportConfig) -> PortResult<Self> {
        let address = TransportAddress::parse(address)?;
        check_scheme(&address, transport)?;
        Ok(Self::build(
            PortMode::NetworkReceive,
            transport.clone(),
            None,
            Some(address),
        ))
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn mode(&self) -> PortMode {
        self.inner.mode
    }

    pub fn name(&self) -> String {
        read(&self.inner.name).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *write(&self.inner.name) = name.into();
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.inner.transport
    }

    /// Registers the receive callback, replacing any previous one.
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(Payload, Option<Replier>) + Send + Sync + 'static,
    {
        self.set_handler(Arc::new(handler));
    }

    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        *write(&self.inner.handler) = Some(handler);
    }

    pub fn has_handler(&self) -> bool {
        read(&self.inner.handler).is_some()
    }

    /// Registers the acknowledgement callback of a network-receive port. It observes
    /// each reply right before the listener writes it back.
    pub fn set_ack_handler<F>(&self, handler: F)
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        *write(&self.inner.ack_handler) = Some(Arc::new(handler));
    }

    /// Points a send port at its peer.
    ///
    /// A remote target is connected before this returns; the port is ready afterwards.
    pub async fn set_target(&self, target: impl Into<PortTarget>) -> PortResult<()> {
        let target: PortTarget = target.into();
        match (self.inner.mode, target) {
            (PortMode::LocalSend, PortTarget::Local(peer)) => {
                if peer.mode() != PortMode::LocalReceive {
                    return Err(PortError::InvalidTarget {
                        port: self.name(),
                        mode: peer.mode(),
                    });
                }
                debug!("{}: targeting {}", self.name(), peer.name());
                *write(&self.inner.target) = Some(Target::Local(peer));
                Ok(())
            }
            (PortMode::NetworkSend, PortTarget::Remote(address)) => {
                let address = TransportAddress::parse(&address)?;
                check_scheme(&address, &self.inner.transport)?;
                let socket = self.inner.socket.lock().await.take();
                let stream = self.connect(socket, &address).await?;
                *self.inner.connection.lock().await = Some(stream);
                debug!("{}: connected to {}", self.name(), address);
                *write(&self.inner.target) = Some(Target::Remote(address));
                Ok(())
            }
            (_, target) => Err(self.invalid_operation(format!(
                "set_target({})",
                match target {
                    PortTarget::Local(peer) => format!("port {}", peer.name()),
                    PortTarget::Remote(address) => address,
                }
            ))),
        }
    }

    /// `true` when a send could proceed. Logs a usage hint when it could not.
    pub fn is_ready(&self) -> bool {
        let ready = matches!(
            (self.inner.mode, read(&self.inner.target).as_ref()),
            (PortMode::LocalSend, Some(Target::Local(_)))
                | (PortMode::NetworkSend, Some(Target::Remote(_)))
        );
        if !ready {
            error!("{}: {}", self.name(), NOT_READY_HINT);
        }
        ready
    }

    /// Sends `payload` and waits for the round trip.
    ///
    /// Returns after the peer's reply was delivered to this port's handler. On a local
    /// port that means after the target's handler returned; a handler that keeps its
    /// [`Replier`] for later answers the sender asynchronously.
    #[instrument(level = "debug", skip(self, payload), fields(port = %self.name()))]
    pub async fn send(&self, payload: Payload) -> PortResult<()> {
        if !self.is_ready() {
            return Err(PortError::NotReady { port: self.name() });
        }
        match self.inner.mode {
            PortMode::LocalSend => self.send_local(payload),
            PortMode::NetworkSend => {
                let round_trip = self.send_remote(payload);
                let reply = match self.inner.transport.request_timeout {
                    Some(limit) => self.within(limit, round_trip).await??,
                    None => round_trip.await?,
                };
                self.receive(reply, None)
            }
            _ => Err(self.invalid_operation("send")),
        }
    }

    fn send_local(&self, payload: Payload) -> PortResult<()> {
        let peer = match read(&self.inner.target).as_ref() {
            Some(Target::Local(peer)) => peer.clone(),
            _ => return Err(PortError::NotReady { port: self.name() }),
        };
        let sender = self.clone();
        let replier = Replier::new(move |reply| {
            if let Err(e) = sender.receive(reply, None) {
                error!("{}: failed to deliver reply: {}", sender.name(), e);
            }
        });
        peer.receive(payload, Some(replier))
    }

    async fn send_remote(&self, payload: Payload) -> PortResult<Payload> {
        let address = match read(&self.inner.target).as_ref() {
            Some(Target::Remote(address)) => address.clone(),
            _ => return Err(PortError::NotReady { port: self.name() }),
        };
        let pending = self.inner.connection.lock().await.take();
        let mut stream = match pending {
            Some(stream) => stream,
            None => {
                trace!("{}: opening a fresh connection to {}", self.name(), address);
                self.connect(None, &address).await?
            }
        };

        let max_frame_size = self.inner.transport.max_frame_size;
        codec::write_frame(&mut stream, &payload, max_frame_size).await?;
        match codec::read_frame(&mut stream, max_frame_size).await {
            Ok(reply) => Ok(reply),
            Err(CodecError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(PortError::ConnectionClosed { port: self.name() })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn connect(
        &self,
        socket: Option<TcpSocket>,
        address: &TransportAddress,
    ) -> PortResult<TcpStream> {
        let socket = match socket {
            Some(socket) => socket,
            None => TcpSocket::new_v4()?,
        };
        let connecting = socket.connect(address.socket_addr());
        let stream = match self.inner.transport.request_timeout {
            Some(limit) => self.within(limit, connecting).await??,
            None => connecting.await?,
        };
        Ok(stream)
    }

    async fn within<F: Future>(&self, limit: Duration, future: F) -> PortResult<F::Output> {
        tokio::time::timeout(limit, future)
            .await
            .map_err(|_| PortError::Timeout {
                port: self.name(),
                timeout: limit,
            })
    }

    /// Delivers `payload` to this port's handler.
    ///
    /// With a `reply` the delivery is a request and a missing handler is an error.
    /// Without one it is the terminal leg of a round trip; a missing handler is only
    /// logged because nobody is left to report to.
    pub fn receive(&self, payload: Payload, reply: Option<Replier>) -> PortResult<()> {
        let handler = read(&self.inner.handler).clone();
        match (handler, reply) {
            (Some(handler), reply) => {
                trace!("{}: delivering {:?}", self.name(), payload);
                handler.handle(payload, reply);
                Ok(())
            }
            (None, Some(_)) => {
                error!("{}: request arrived but no receive handler is set", self.name());
                Err(PortError::NoHandler { port: self.name() })
            }
            (None, None) => {
                warn!("{}: reply dropped, no receive handler is set", self.name());
                Ok(())
            }
        }
    }

    /// Binds the listen address and starts the one-shot listener of a network-receive
    /// port. Returns once the port accepts connections.
    ///
    /// Once the previous listener has finished, calling this again starts a fresh one
    /// and clears the received flag and the last request.
    pub async fn listen(&self) -> PortResult<()> {
        let Some(address) = self.inner.listen_address.clone() else {
            return Err(self.invalid_operation("listen"));
        };
        let mut slot = self.inner.listener.lock().await;
        if self.listener_running() {
            return Err(self.invalid_operation("listen (already listening)"));
        }
        if let Some(previous) = slot.take() {
            debug!("{}: replacing finished listener '{}'", self.name(), previous.name());
        }

        let tcp = TcpListener::bind(address.socket_addr()).await?;
        let bound = match tcp.local_addr()? {
            SocketAddr::V4(addr) => address.with_socket_addr(addr),
            SocketAddr::V6(_) => address,
        };
        debug!("{}: listening on {}", self.name(), bound);
        *write(&self.inner.bound_address) = Some(bound);
        *write(&self.inner.last_request) = None;
        self.inner.received.store(false, Ordering::SeqCst);

        let worker = Worker::spawn(
            format!("{}-listener", self.name()),
            listener::serve_once(self.clone(), tcp),
        )?;
        *write(&self.inner.listener_task) = worker.abort_handle();
        *slot = Some(worker);
        Ok(())
    }

    /// Waits for the listener to finish its round trip and reports its failure, if any.
    ///
    /// The listener is not locked while waiting, so [`close`](Self::close) can still
    /// abort it.
    pub async fn join_listener(&self, timeout: Option<Duration>) -> PortResult<()> {
        let taken = self.inner.listener.lock().await.take();
        let Some(mut worker) = taken else {
            return Err(self.invalid_operation("join_listener (not listening)"));
        };

        let result = worker.join(timeout).await;
        if let Err(WorkerError::Timeout { .. }) = result {
            let mut slot = self.inner.listener.lock().await;
            if slot.is_none() {
                *slot = Some(worker);
            }
        }
        Ok(result?)
    }

    /// The address the listener is bound to, with an ephemeral port resolved.
    pub fn local_address(&self) -> Option<TransportAddress> {
        read(&self.inner.bound_address).clone()
    }

    /// `true` once the listener has read a request.
    pub fn has_received(&self) -> bool {
        self.inner.received.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Payload> {
        read(&self.inner.last_request).clone()
    }

    /// Aborts a pending listener and drops an unused connection.
    pub async fn close(&self) {
        if let Some(task) = write(&self.inner.listener_task).take() {
            if !task.is_finished() {
                debug!("{}: aborting listener", self.name());
                task.abort();
            }
        }
        self.inner.connection.lock().await.take();
        self.inner.socket.lock().await.take();
    }

    fn listener_running(&self) -> bool {
        read(&self.inner.listener_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn record_request(&self, request: &Payload) {
        *write(&self.inner.last_request) = Some(request.clone());
        self.inner.received.store(true, Ordering::SeqCst);
    }

    fn ack_handler(&self) -> Option<AckHandler> {
        read(&self.inner.ack_handler).clone()
    }

    fn invalid_operation(&self, operation: impl Into<String>) -> PortError {
        PortError::InvalidOperation {
            port: self.name(),
            mode: self.inner.mode,
            operation: operation.into(),
        }
    }
}

fn check_scheme(address: &TransportAddress, transport: &TransportConfig) -> PortResult<()> {
    if address.scheme() != transport.scheme {
        return Err(PortError::InvalidAddress {
            address: address.to_string(),
            reason: format!("transport is configured for {}://", transport.scheme),
        });
    }
    Ok(())
}

impl PartialEq for CommunicationPort {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CommunicationPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicationPort")
            .field("name", &self.name())
            .field("mode", &self.inner.mode)
            .finish()
    }
}
