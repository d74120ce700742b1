//! Per-socket connection state machine: handshake, reader/writer loops,
//! heartbeat, dispatch table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use event_protocol::{topic, Descriptor, Event};

use crate::codec::Codec;
use crate::error::ConnectionError;
use crate::framing;

const SEND_QUEUE_CAPACITY: usize = 100;

/// `__init_id__` bypasses whatever codec the connection is configured with:
/// spec compatibility requires this exact payload shape (base64-encoded
/// JSON `{ID, WorkID}`) regardless of codec selection, so it is applied
/// directly rather than through `Codec::encode`/`Codec::decode`.
fn encode_init_id(desc: &Descriptor) -> Vec<u8> {
    use base64::Engine as _;
    let json = serde_json::to_vec(desc).expect("Descriptor always serialises");
    base64::engine::general_purpose::STANDARD
        .encode(json)
        .into_bytes()
}

fn decode_init_id(wire: &[u8]) -> Result<Descriptor, String> {
    use base64::Engine as _;
    let json = base64::engine::general_purpose::STANDARD
        .decode(wire)
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&json).map_err(|e| e.to_string())
}
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Invoked with the owning connection and the dispatched event; runs inside
/// its own task for per-topic handlers, synchronously on the reader task for
/// the global handler.
pub type Handler = Arc<dyn Fn(Arc<Connection>, Event) + Send + Sync>;

pub struct ConnectionOpts {
    pub role: Role,
    pub codec: Arc<dyn Codec>,
    pub id: i64,
    pub work_id: i64,
    pub global_handler: Option<Handler>,
    pub parent_token: CancellationToken,
}

pub struct Connection {
    id: AtomicI64,
    work_id: AtomicI64,
    role: Role,
    codec: Arc<dyn Codec>,
    tx: mpsc::Sender<Event>,
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    global_handler: Option<Handler>,
    closed: AtomicBool,
    token: CancellationToken,
}

impl Connection {
    /// A descriptor-only handle with no live socket: already closed, so
    /// `send`/`try_send` fail with [`ConnectionError::Closed`]. Used by the
    /// fleet registry's presence-store fallback path.
    pub fn closed_handle(id: i64, work_id: i64) -> Arc<Self> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(Self {
            id: AtomicI64::new(id),
            work_id: AtomicI64::new(work_id),
            role: Role::Server,
            codec: Arc::new(crate::codec::Identity),
            tx,
            handlers: RwLock::new(HashMap::new()),
            global_handler: None,
            closed: AtomicBool::new(true),
            token: CancellationToken::new(),
        })
    }

    /// Wraps `socket`, starts the reader/writer tasks (and, for client role,
    /// the heartbeat ticker), and returns the ready connection immediately.
    pub fn new<S>(socket: S, opts: ConnectionOpts) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let conn = Arc::new(Self {
            id: AtomicI64::new(opts.id),
            work_id: AtomicI64::new(opts.work_id),
            role: opts.role,
            codec: opts.codec,
            tx,
            handlers: RwLock::new(HashMap::new()),
            global_handler: opts.global_handler,
            closed: AtomicBool::new(false),
            token: opts.parent_token.child_token(),
        });

        if conn.role == Role::Client {
            // Registered via `try_write` rather than spawning a task: the
            // reader loop must never see `__init_id__` before this handler
            // is in the table, and nothing else holds the lock yet.
            conn.handlers
                .try_write()
                .expect("uncontended at construction")
                .entry(topic::INIT_ID.to_owned())
                .or_default()
                .push(Arc::new(move |conn, event| {
                    match decode_init_id(&event.data) {
                        Ok(desc) => {
                            conn.id.store(desc.id, Ordering::SeqCst);
                            conn.work_id.store(desc.work_id, Ordering::SeqCst);
                        }
                        Err(err) => warn!(%err, "malformed __init_id__ handshake payload"),
                    }
                }));
        }

        let (read_half, write_half) = tokio::io::split(socket);

        tokio::spawn(writer_loop(Arc::clone(&conn), write_half, rx));
        tokio::spawn(reader_loop(Arc::clone(&conn), read_half));

        if conn.role == Role::Client {
            tokio::spawn(heartbeat_loop(Arc::clone(&conn)));
        }

        if conn.role == Role::Server {
            let desc = Descriptor {
                id: conn.id(),
                work_id: conn.work_id(),
            };
            let _ = conn
                .tx
                .try_send(Event::new(topic::INIT_ID, encode_init_id(&desc)));
        }

        conn
    }

    pub fn id(&self) -> i64 {
        self.id.load(Ordering::SeqCst)
    }

    pub fn work_id(&self) -> i64 {
        self.work_id.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Appends `handler` to the dispatch table for `topic`.
    pub async fn on(
        self: &Arc<Self>,
        topic: &str,
        handler: Handler,
    ) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.handlers
            .write()
            .await
            .entry(topic.to_owned())
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Dispatches `event` to every handler registered for its topic, each in
    /// its own task, then — unless this is the `__init_id__` handshake —
    /// invokes the global handler synchronously.
    pub async fn emit(self: &Arc<Self>, event: Event) {
        let handlers = {
            let table = self.handlers.read().await;
            table.get(&event.topic).cloned().unwrap_or_default()
        };
        for handler in handlers {
            let conn = Arc::clone(self);
            let event = event.clone();
            tokio::spawn(async move {
                let handler = handler;
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(conn, event);
                }));
                if result.is_err() {
                    warn!("connection handler panicked");
                }
            });
        }

        if event.topic != topic::INIT_ID {
            if let Some(global) = self.global_handler.clone() {
                let conn = Arc::clone(self);
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    global(conn, event);
                }));
                if result.is_err() {
                    warn!("global handler panicked");
                }
            }
        }
    }

    /// Enqueues `{topic, data}` onto the send buffer, blocking if it is full.
    pub async fn send(&self, topic: &str, data: Vec<u8>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.tx
            .send(Event::new(topic, data))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Non-blocking variant of [`Connection::send`]: fails with
    /// [`ConnectionError::QueueFull`] instead of waiting for room.
    pub fn try_send(&self, topic: &str, data: Vec<u8>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.tx
            .try_send(Event::new(topic, data))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ConnectionError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
            })
    }

    /// Single-shot: invokes the global handler with `__close__`, cancels the
    /// connection's token, and marks it closed. Safe to call more than once.
    pub async fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(global) = self.global_handler.clone() {
            let conn = Arc::clone(self);
            global(conn, Event::empty(topic::CLOSE));
        }
        self.token.cancel();
        debug!(id = self.id(), "connection closed");
    }
}

async fn reader_loop<R>(conn: Arc<Connection>, mut read_half: R)
where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            () = conn.token.cancelled() => break,
            frame = framing::read_frame(&mut read_half) => {
                match frame {
                    Ok(mut event) => {
                        if event.topic != topic::INIT_ID {
                            event.data = conn.codec.decode(&event.data).unwrap_or_default();
                        }
                        conn.emit(event).await;
                    }
                    Err(err) => {
                        debug!(id = conn.id(), %err, "reader loop exiting");
                        break;
                    }
                }
            }
        }
    }
    conn.close().await;
}

async fn writer_loop<W>(conn: Arc<Connection>, mut write_half: W, mut rx: mpsc::Receiver<Event>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        let event = tokio::select! {
            () = conn.token.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let wire = if event.topic == topic::INIT_ID {
            event.data.clone()
        } else {
            conn.codec.encode(&event.data).unwrap_or_default()
        };
        if let Err(err) =
            framing::write_frame(&mut write_half, &Event::new(event.topic, wire)).await
        {
            debug!(id = conn.id(), %err, "writer loop exiting");
            break;
        }
    }
    conn.close().await;
}

async fn heartbeat_loop(conn: Arc<Connection>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            () = conn.token.cancelled() => break,
            _ = ticker.tick() => {
                if conn.send(topic::HEARTBEAT, Vec::new()).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Identity;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::duplex;

    fn opts(role: Role) -> ConnectionOpts {
        ConnectionOpts {
            role,
            codec: Arc::new(Identity),
            id: 1,
            work_id: 7,
            global_handler: None,
            parent_token: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn server_role_sends_init_id_on_construction() {
        let (server_io, mut client_io) = duplex(4096);
        let _conn = Connection::new(server_io, opts(Role::Server));

        let event = framing::read_frame(&mut client_io).await.unwrap();
        assert_eq!(event.topic, topic::INIT_ID);
        let desc = decode_init_id(&event.data).unwrap();
        assert_eq!(desc, Descriptor { id: 1, work_id: 7 });
    }

    #[tokio::test]
    async fn client_role_adopts_ids_from_handshake() {
        let (mut server_io, client_io) = duplex(4096);
        let mut client_opts = opts(Role::Client);
        client_opts.id = 0;
        client_opts.work_id = 0;
        let conn = Connection::new(client_io, client_opts);

        let desc = Descriptor { id: 42, work_id: 3 };
        let event = Event::new(topic::INIT_ID, encode_init_id(&desc));
        framing::write_frame(&mut server_io, &event).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if conn.id() == 42 && conn.work_id() == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn send_then_read_round_trips_through_framing() {
        let (server_io, mut client_io) = duplex(4096);
        let conn = Connection::new(server_io, opts(Role::Server));
        let _ = framing::read_frame(&mut client_io).await.unwrap(); // discard __init_id__

        conn.send("echo", b"hello".to_vec()).await.unwrap();
        let event = framing::read_frame(&mut client_io).await.unwrap();
        assert_eq!(event.topic, "echo");
        assert_eq!(event.data, b"hello");
    }

    #[tokio::test]
    async fn on_after_close_fails() {
        let (server_io, _client_io) = duplex(4096);
        let conn = Connection::new(server_io, opts(Role::Server));
        conn.close().await;
        let err = conn.on("anything", Arc::new(|_, _| {})).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn close_invokes_global_handler_exactly_once() {
        let (server_io, _client_io) = duplex(4096);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let mut connection_opts = opts(Role::Server);
        connection_opts.global_handler = Some(Arc::new(move |_, event| {
            if event.topic == topic::CLOSE {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let conn = Connection::new(server_io, connection_opts);

        conn.close().await;
        conn.close().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn emit_dispatches_to_per_topic_handlers_and_global_handler() {
        let (server_io, _client_io) = duplex(4096);
        let per_topic_calls = Arc::new(AtomicUsize::new(0));
        let global_calls = Arc::new(AtomicUsize::new(0));

        let mut connection_opts = opts(Role::Server);
        let global_clone = Arc::clone(&global_calls);
        connection_opts.global_handler = Some(Arc::new(move |_, _| {
            global_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let conn = Connection::new(server_io, connection_opts);

        let per_topic_clone = Arc::clone(&per_topic_calls);
        conn.on(
            "demo",
            Arc::new(move |_, _| {
                per_topic_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        conn.emit(Event::new("demo", Vec::new())).await;

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if per_topic_calls.load(Ordering::SeqCst) == 1
                    && global_calls.load(Ordering::SeqCst) == 1
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
