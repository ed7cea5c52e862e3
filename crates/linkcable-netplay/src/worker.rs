//! The connection worker: the only thread that touches the socket.
//!
//! It runs a current-thread tokio runtime. After the Connect/Ack handshake
//! it reads frames and hands them to the session while draining the outbound
//! queue onto the socket. It stops when a Shutdown has been written or
//! received, or when the socket fails, and then releases the session.
//! Observer notifications and list callbacks are posted to a separate
//! dispatch thread so that no user code runs on the worker.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Sender, bounded};
use linkcable_netproto::{
    codec::encode_message,
    constants::{BUILD_ID_LEN, CHUNK_SIZE, HEADER_LEN, PROTOCOL_VERSION},
    header::Header,
    messages::session::{Connect, Shutdown},
    msg_kind::MsgKind,
    packet::Packet,
};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, lookup_host},
};
use tracing::{debug, info, trace, warn};

use crate::{
    config::ClientConfig,
    dispatch::{self, Notifier, join_unless_current},
    error::NetplayError,
    outbound::OutboundQueue,
    session::{Flow, Session},
    transport::{FrameReader, FrameWriter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub(crate) struct Dial {
    pub host: String,
    pub port: u16,
    pub build_id: [u8; BUILD_ID_LEN],
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
}

impl Dial {
    pub fn new(config: &ClientConfig, host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            build_id: config.build_id_bytes(),
            connect_timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
            queue_capacity: config.effective_queue_capacity(),
        }
    }
}

pub(crate) struct Worker {
    thread: Mutex<Option<JoinHandle<()>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    queue: Arc<OutboundQueue>,
    state: Arc<Mutex<ConnectionState>>,
}

impl Worker {
    /// Start the worker and dispatch threads and wait until the handshake
    /// has finished.
    pub fn spawn(dial: Dial, session: Arc<Session>) -> Result<Self, NetplayError> {
        let queue = Arc::new(OutboundQueue::new(dial.queue_capacity));
        let state = Arc::new(Mutex::new(ConnectionState::Connecting));
        let (ready_tx, ready_rx) = bounded(1);
        let (notifier, dispatch) = dispatch::spawn()?;

        let spawned = {
            let queue = queue.clone();
            let state = state.clone();
            thread::Builder::new()
                .name("linkcable-worker".into())
                .spawn(move || run(dial, session, queue, state, notifier, ready_tx))
                .map_err(|e| NetplayError::WorkerSpawn(e.to_string()))
        };
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                join_unless_current(dispatch, "dispatch");
                return Err(e);
            }
        };

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(NetplayError::WorkerSpawn("worker exited early".into())));
        let worker = Self {
            thread: Mutex::new(Some(thread)),
            dispatch: Mutex::new(Some(dispatch)),
            queue,
            state,
        };
        match outcome {
            Ok(()) => Ok(worker),
            Err(e) => {
                worker.join();
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Enter `Disconnecting`: queue a Shutdown for the relay and refuse
    /// anything after it.
    pub fn request_stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnecting;
            }
        }
        if let Err(e) = self.queue.enqueue_message(&Shutdown) {
            debug!("shutdown not queued: {e}");
        }
        self.queue.close();
    }

    /// Wait for the worker to exit, then for queued notifications to run.
    pub fn join(&self) {
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            join_unless_current(thread, "connection worker");
        }
        let dispatch = self.dispatch.lock().take();
        if let Some(dispatch) = dispatch {
            join_unless_current(dispatch, "dispatch");
        }
    }

    pub fn shutdown(&self) {
        self.request_stop();
        self.join();
    }
}

fn run(
    dial: Dial,
    session: Arc<Session>,
    queue: Arc<OutboundQueue>,
    state: Arc<Mutex<ConnectionState>>,
    notifier: Notifier,
    ready: Sender<Result<(), NetplayError>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            *state.lock() = ConnectionState::Closed;
            let _ = ready.send(Err(NetplayError::WorkerSpawn(e.to_string())));
            return;
        }
    };

    runtime.block_on(async move {
        let (reader, writer) = match handshake(&dial).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(host = %dial.host, port = dial.port, "connect failed: {e}");
                *state.lock() = ConnectionState::Closed;
                let _ = ready.send(Err(e));
                return;
            }
        };

        info!(host = %dial.host, port = dial.port, "connected to relay");
        *state.lock() = ConnectionState::Connected;
        session.set_outbound(Some(queue.clone()));
        session.set_notifier(Some(notifier.clone()));
        let _ = ready.send(Ok(()));
        let observer = session.observer().clone();
        notifier.post(move || observer.connected());

        let reason = tokio::select! {
            reason = reader_loop(reader, &session) => reason,
            reason = writer_loop(writer, &queue, dial.poll_interval) => reason,
        };

        info!(%reason, "connection closed");
        *state.lock() = ConnectionState::Closed;
        queue.close();
        session.release_all();
        let observer = session.observer().clone();
        notifier.post(move || observer.disconnected(&reason));
    });
}

type Halves = (
    FrameReader<tokio::net::tcp::OwnedReadHalf>,
    FrameWriter<tokio::net::tcp::OwnedWriteHalf>,
);

async fn handshake(dial: &Dial) -> Result<Halves, NetplayError> {
    tokio::time::timeout(dial.connect_timeout, greet(dial))
        .await
        .map_err(|_| NetplayError::Timeout("connection handshake"))?
}

/// Connect, send Connect and wait for the relay's Ack.
async fn greet(dial: &Dial) -> Result<Halves, NetplayError> {
    let addr = lookup_host((dial.host.as_str(), dial.port))
        .await
        .map_err(|e| NetplayError::ConnectionFailed(e.to_string()))?
        .next()
        .ok_or_else(|| NetplayError::ConnectionFailed(format!("no address for {}", dial.host)))?;

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| NetplayError::ConnectionFailed(e.to_string()))?;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write);

    let connect = encode_message(&Connect {
        protocol_version: PROTOCOL_VERSION,
        build_id: dial.build_id,
    })?;
    writer.send_frame(&connect).await?;

    let frame = reader
        .receive_frame()
        .await
        .map_err(|e| NetplayError::HandshakeFailed(e.to_string()))?;
    match Packet::decode(&frame.header, &frame.body) {
        Ok(Packet::Ack(ack)) if ack.is_accepted() => {
            debug!(reply = ack.reply, "handshake accepted");
            Ok((reader, writer))
        }
        Ok(Packet::Ack(ack)) => Err(NetplayError::HandshakeRejected(ack.reply)),
        Ok(other) => Err(NetplayError::HandshakeFailed(format!(
            "expected Ack, got {:?}",
            other.msg_kind()
        ))),
        Err(e) => Err(NetplayError::HandshakeFailed(e.to_string())),
    }
}

/// Read frames until the connection fails or the relay shuts down.
async fn reader_loop(mut reader: FrameReader<impl AsyncRead + Unpin>, session: &Session) -> String {
    loop {
        let frame = match reader.receive_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("read failed: {e}");
                return e.to_string();
            }
        };

        let packet = match Packet::decode(&frame.header, &frame.body) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(
                    kind = frame.header.kind,
                    body_size = frame.header.body_size,
                    "dropping malformed message: {e}"
                );
                continue;
            }
        };

        if let Packet::Ack(ack) = packet {
            debug!(reply = ack.reply, "late ack ignored");
            continue;
        }
        trace!(kind = ?packet.msg_kind(), "dispatching");
        if session.handle_packet(packet) == Flow::Stop {
            return "server shut down".to_string();
        }
    }
}

/// Copy queued bytes to the socket until a Shutdown has been written or the
/// queue is closed.
async fn writer_loop(
    mut writer: FrameWriter<impl AsyncWrite + Unpin>,
    queue: &OutboundQueue,
    poll_interval: Duration,
) -> String {
    let mut cursor = MessageCursor::default();
    loop {
        let bytes = match tokio::time::timeout(poll_interval, queue.drain(CHUNK_SIZE)).await {
            Err(_) => continue,
            Ok(None) => {
                writer.shutdown().await;
                return "outbound queue closed".to_string();
            }
            Ok(Some(bytes)) => bytes,
        };

        let shutdown_end = cursor.advance(&bytes);
        let to_write = shutdown_end.map_or(&bytes[..], |end| &bytes[..end]);
        if let Err(e) = writer.write_raw(to_write).await {
            warn!("write failed: {e}");
            return e.to_string();
        }

        if shutdown_end.is_some() {
            let _ = writer.flush().await;
            writer.shutdown().await;
            return "disconnected locally".to_string();
        }
    }
}

/// Tracks message boundaries in the outbound byte stream.
#[derive(Default)]
struct MessageCursor {
    header: Vec<u8>,
    body_left: usize,
    kind: u32,
}

impl MessageCursor {
    /// Consume `bytes`. Returns the offset just past the end of a Shutdown
    /// message if one ends inside `bytes`.
    fn advance(&mut self, bytes: &[u8]) -> Option<usize> {
        let mut pos = 0;
        while pos < bytes.len() {
            if self.body_left == 0 {
                let take = (HEADER_LEN - self.header.len()).min(bytes.len() - pos);
                self.header.extend_from_slice(&bytes[pos..pos + take]);
                pos += take;
                if self.header.len() < HEADER_LEN {
                    continue;
                }
                if let Ok(header) = Header::decode(&self.header) {
                    self.kind = header.kind;
                    self.body_left = header.body_size as usize;
                }
                self.header.clear();
            } else {
                let take = self.body_left.min(bytes.len() - pos);
                self.body_left -= take;
                pos += take;
            }

            if self.body_left == 0 && self.header.is_empty() && self.kind == MsgKind::Shutdown as u32
            {
                return Some(pos);
            }
        }
        None
    }
}
