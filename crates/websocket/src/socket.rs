//! Socket lifecycle: the per-connection state, the frame pump, and the
//! outbound dial.
//!
//! A connection is created once the opening handshake has completed,
//! in either direction. The read half (with whatever the handshake
//! buffered) feeds a pump task that reassembles fragmented messages in
//! order and hands complete JSON objects to a [`MessageSink`]. The
//! write half sits behind a mutex so responses, forwards and
//! broadcasts can all share one socket.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use sharemesh_protocol::ServiceMessage;
use sharemesh_protocol::constants::FRAGMENT_THRESHOLD;
use sharemesh_protocol::types::AgentClass;

use crate::error::SocketError;
use crate::frame::{self, Frame, MAX_PAYLOAD, Opcode};
use crate::handshake;

/// A boxed future returned by sink callbacks.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Receives complete messages and lifecycle events from socket pumps.
///
/// Implementors provide the routing and service logic; the socket
/// layer handles framing, reassembly and control frames.
pub trait MessageSink: Send + Sync + 'static {
    /// Called with each complete JSON text message, already
    /// reassembled from its fragments.
    fn deliver(&self, socket: Arc<SocketConnection>, payload: String) -> SinkFuture<'_>;

    /// Called exactly once when the connection ends, whether by a
    /// close frame, an I/O error or shutdown.
    fn closed(&self, socket: Arc<SocketConnection>) -> SinkFuture<'_>;
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketStatus {
    /// Handshake finished, not yet registered.
    Pending = 0,
    /// Registered and usable.
    Open = 1,
    /// Close initiated locally; no further messages accepted.
    End = 2,
    /// Fully closed.
    Closed = 3,
}

impl SocketStatus {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => SocketStatus::Pending,
            1 => SocketStatus::Open,
            2 => SocketStatus::End,
            _ => SocketStatus::Closed,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live peer connection.
pub struct SocketConnection {
    agent: String,
    class: AgentClass,
    /// Payloads above this size leave in continuation frames; 0
    /// disables splitting. Browser peers reassemble on their own side
    /// so they get whole frames.
    fragment_threshold: usize,
    /// Client-role sockets must mask every outbound frame.
    mask_frames: bool,
    status: AtomicU8,
    writer: Mutex<BoxedWriter>,
}

impl SocketConnection {
    /// Wraps the write half of a connection whose handshake already
    /// completed. The peer's identity keys the registry entry.
    pub fn new(
        agent: impl Into<String>,
        class: AgentClass,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        mask_frames: bool,
    ) -> Arc<Self> {
        Self::with_threshold(agent, class, writer, mask_frames, FRAGMENT_THRESHOLD)
    }

    /// [`SocketConnection::new`] with an explicit outbound
    /// fragmentation threshold. Browser sockets never fragment
    /// whatever the threshold says.
    pub fn with_threshold(
        agent: impl Into<String>,
        class: AgentClass,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        mask_frames: bool,
        threshold: usize,
    ) -> Arc<Self> {
        let fragment_threshold = match class {
            AgentClass::Browser => 0,
            AgentClass::Device | AgentClass::User => threshold,
        };
        Arc::new(Self {
            agent: agent.into(),
            class,
            fragment_threshold,
            mask_frames,
            status: AtomicU8::new(SocketStatus::Pending as u8),
            writer: Mutex::new(Box::new(writer)),
        })
    }

    /// Hash identifying the peer.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn class(&self) -> AgentClass {
        self.class
    }

    pub fn status(&self) -> SocketStatus {
        SocketStatus::from_bits(self.status.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        self.status() == SocketStatus::Open
    }

    /// Marks the socket registered and usable.
    pub fn activate(&self) {
        // Only a pending socket becomes open; a closed one stays closed.
        let _ = self.status.compare_exchange(
            SocketStatus::Pending as u8,
            SocketStatus::Open as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Transitions to closed, reporting whether this call made the
    /// transition. The pump uses this to fire the sink exactly once.
    fn mark_closed(&self) -> bool {
        self.status.swap(SocketStatus::Closed as u8, Ordering::SeqCst)
            != SocketStatus::Closed as u8
    }

    fn mask_key(&self) -> Option<[u8; 4]> {
        self.mask_frames.then(|| {
            let id = uuid::Uuid::new_v4();
            let bytes = id.as_bytes();
            [bytes[0], bytes[1], bytes[2], bytes[3]]
        })
    }

    /// Sends a payload, splitting it per the fragmentation threshold.
    pub async fn send(&self, opcode: Opcode, payload: &[u8]) -> Result<(), SocketError> {
        if !self.is_open() {
            return Err(SocketError::Closed);
        }
        let key = self.mask_key();
        let mut writer = self.writer.lock().await;
        frame::write_fragmented(&mut *writer, opcode, payload, self.fragment_threshold, key).await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), SocketError> {
        self.send(Opcode::Text, text.as_bytes()).await
    }

    /// Serializes and sends a service envelope.
    pub async fn send_message(&self, message: &ServiceMessage) -> Result<(), SocketError> {
        let text = serde_json::to_string(message)?;
        self.send_text(&text).await
    }

    /// Writes a single control frame, bypassing the open check so the
    /// pump can echo a close after the status has moved on.
    async fn send_control(&self, mut frame: Frame) -> Result<(), SocketError> {
        let key = self.mask_key();
        frame.masked = key.is_some();
        let mut writer = self.writer.lock().await;
        frame::write_frame(&mut *writer, &frame, key).await
    }

    /// Initiates a close from this side. The pump finishes the
    /// lifecycle when the peer answers or the stream drops.
    pub async fn close(&self) {
        let previous = self.status.swap(SocketStatus::End as u8, Ordering::SeqCst);
        if previous == SocketStatus::Closed as u8 {
            self.status
                .store(SocketStatus::Closed as u8, Ordering::SeqCst);
            return;
        }
        let close = Frame {
            fin: true,
            reserved: 0,
            opcode: Opcode::Close,
            masked: self.mask_frames,
            payload: Vec::new(),
        };
        if let Err(error) = self.send_control(close).await {
            tracing::debug!(agent = %self.agent, "close frame not delivered: {error}");
        }
    }

    /// Tears the connection down without the close handshake. The peer
    /// sees the stream end; no close frame, no reason, no reply.
    pub async fn destroy(&self) {
        let previous = self.status.swap(SocketStatus::End as u8, Ordering::SeqCst);
        if previous == SocketStatus::Closed as u8 {
            self.status
                .store(SocketStatus::Closed as u8, Ordering::SeqCst);
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            tracing::debug!(agent = %self.agent, "stream teardown: {error}");
        }
    }
}

impl fmt::Debug for SocketConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConnection")
            .field("agent", &self.agent)
            .field("class", &self.class)
            .field("status", &self.status())
            .finish()
    }
}

/// Spawns the frame pump for a connection.
///
/// The pump owns the buffered read half, processes control frames
/// inline and delivers complete JSON messages to the sink. When the
/// stream ends for any reason the sink's `closed` hook fires once.
pub fn spawn_read_pump<R>(
    socket: Arc<SocketConnection>,
    reader: R,
    sink: Arc<dyn MessageSink>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        tokio::select! {
            _ = cancel.cancelled() => {
                socket.close().await;
            }
            result = pump_frames(&socket, &mut reader, &sink) => {
                if let Err(error) = result {
                    tracing::debug!(
                        agent = %socket.agent(),
                        class = %socket.class(),
                        "socket pump ended: {error}"
                    );
                }
            }
        }
        if socket.mark_closed() {
            sink.closed(Arc::clone(&socket)).await;
        }
    })
}

/// Reads frames until the peer closes or the stream fails.
///
/// Fragmented messages arrive as a non-final data frame followed by
/// continuation frames; the first frame's opcode applies to the whole
/// sequence. Control frames may interleave and are handled inline.
async fn pump_frames<R: AsyncBufRead + Unpin>(
    socket: &Arc<SocketConnection>,
    reader: &mut R,
    sink: &Arc<dyn MessageSink>,
) -> Result<(), SocketError> {
    let mut pending_opcode: Option<Opcode> = None;
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let frame = frame::read_frame(reader).await?;
        match frame.opcode {
            Opcode::Close => {
                // Echo the close payload back, then let the pump end.
                let echo = Frame {
                    fin: true,
                    reserved: frame.reserved,
                    opcode: Opcode::Close,
                    masked: socket.mask_frames,
                    payload: frame.payload,
                };
                if let Err(error) = socket.send_control(echo).await {
                    tracing::debug!(agent = %socket.agent(), "close echo failed: {error}");
                }
                return Ok(());
            }
            Opcode::Ping => {
                let pong = Frame {
                    fin: true,
                    reserved: frame.reserved,
                    opcode: Opcode::Pong,
                    masked: socket.mask_frames,
                    payload: frame.payload,
                };
                socket.send_control(pong).await?;
            }
            Opcode::Pong => {}
            Opcode::Text | Opcode::Binary => {
                if pending_opcode.is_some() {
                    return Err(SocketError::Protocol(
                        "data frame interleaved with an unfinished message".into(),
                    ));
                }
                if frame.fin {
                    deliver(socket, sink, frame.opcode, frame.payload).await;
                    // A sink may close or destroy the socket it was
                    // handed; stop reading for a dead connection.
                    if !matches!(
                        socket.status(),
                        SocketStatus::Pending | SocketStatus::Open
                    ) {
                        return Ok(());
                    }
                } else {
                    pending_opcode = Some(frame.opcode);
                    pending = frame.payload;
                }
            }
            Opcode::Continuation => {
                let Some(opcode) = pending_opcode else {
                    return Err(SocketError::Protocol(
                        "continuation frame without a message start".into(),
                    ));
                };
                if pending.len() + frame.payload.len() > MAX_PAYLOAD {
                    return Err(SocketError::OversizedFrame(
                        (pending.len() + frame.payload.len()) as u64,
                    ));
                }
                pending.extend_from_slice(&frame.payload);
                if frame.fin {
                    pending_opcode = None;
                    deliver(socket, sink, opcode, std::mem::take(&mut pending)).await;
                    if !matches!(
                        socket.status(),
                        SocketStatus::Pending | SocketStatus::Open
                    ) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Hands a complete message to the sink when it carries a JSON object.
///
/// Everything on the wire that matters is a service envelope; other
/// payloads are dropped after a debug note.
async fn deliver(
    socket: &Arc<SocketConnection>,
    sink: &Arc<dyn MessageSink>,
    opcode: Opcode,
    payload: Vec<u8>,
) {
    let Ok(text) = String::from_utf8(payload) else {
        tracing::debug!(agent = %socket.agent(), "discarding non-utf8 {opcode:?} message");
        return;
    };
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        sink.deliver(Arc::clone(socket), text).await;
    } else {
        tracing::debug!(agent = %socket.agent(), "discarding non-object message");
    }
}

/// Dials a peer, performs the client half of the handshake and spawns
/// the pump. The returned socket is still pending; callers register
/// and activate it.
pub async fn connect(
    address: &str,
    local_agent: &str,
    local_class: AgentClass,
    remote_agent: &str,
    remote_class: AgentClass,
    sink: Arc<dyn MessageSink>,
    cancel: CancellationToken,
) -> Result<Arc<SocketConnection>, SocketError> {
    let stream = TcpStream::connect(address).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let key = handshake::generate_key();
    handshake::write_request(&mut write_half, address, &key, local_agent, local_class).await?;
    handshake::read_accept(&mut reader, &key).await?;

    let socket = SocketConnection::new(remote_agent, remote_class, write_half, true);
    spawn_read_pump(Arc::clone(&socket), reader, sink, cancel);
    Ok(socket)
}
