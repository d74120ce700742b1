//! Fleet manager: owns the online-connection registry and drives admission
//! and eviction off two dedicated tasks, mirroring the single-writer-per-map
//! discipline of the Go source's `onConnection`/`onDisconnect` goroutines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use event_protocol::{topic, Descriptor, Event};

use crate::codec::Codec;
use crate::connection::{Connection, ConnectionOpts, Handler, Role};
use crate::idgen::IdGen;
use crate::presence::Presence;

const CHANNEL_CAPACITY: usize = 100;

/// Upper bound on how long the evict task keeps draining stragglers after
/// the fleet's token is cancelled: connections close concurrently with the
/// cancellation, so the registry does not empty out atomically.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(4);

pub struct WorkerOpts {
    pub id: i64,
    pub codec: Arc<dyn Codec>,
    pub presence: Arc<Presence>,
    pub global_handler: Option<Handler>,
    pub parent_token: CancellationToken,
}

pub struct Worker {
    id: i64,
    codec: Arc<dyn Codec>,
    presence: Arc<Presence>,
    idgen: IdGen,
    token: CancellationToken,
    connections: RwLock<HashMap<i64, Arc<Connection>>>,
    count: AtomicI64,
    admit_tx: mpsc::Sender<Arc<Connection>>,
    evict_tx: mpsc::Sender<Arc<Connection>>,
    connection_global_handler: Handler,
}

impl Worker {
    pub fn new(opts: WorkerOpts) -> Arc<Self> {
        let (admit_tx, admit_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (evict_tx, evict_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let evict_tx_for_wrapper = evict_tx.clone();
        let user_handler = opts.global_handler;
        let connection_global_handler: Handler = Arc::new(move |conn, event| {
            if event.topic == topic::CLOSE {
                let evict_tx = evict_tx_for_wrapper.clone();
                let conn = Arc::clone(&conn);
                tokio::spawn(async move {
                    let _ = evict_tx.send(conn).await;
                });
            }
            if let Some(handler) = user_handler.as_ref() {
                handler(conn, event);
            }
        });

        let worker = Arc::new(Self {
            id: opts.id,
            codec: opts.codec,
            presence: opts.presence,
            idgen: IdGen::new(opts.id),
            token: opts.parent_token.child_token(),
            connections: RwLock::new(HashMap::new()),
            count: AtomicI64::new(0),
            admit_tx,
            evict_tx,
            connection_global_handler,
        });

        tokio::spawn(admit_task(Arc::clone(&worker), admit_rx));
        tokio::spawn(evict_task(Arc::clone(&worker), evict_rx));

        worker
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Wraps `socket` as a server-role [`Connection`], enqueues it onto the
    /// admit channel (blocking if the channel is full), and returns it.
    pub async fn admit<S>(self: &Arc<Self>, socket: S) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.idgen.next();
        let conn = Connection::new(
            socket,
            ConnectionOpts {
                role: Role::Server,
                codec: Arc::clone(&self.codec),
                id,
                work_id: self.id,
                global_handler: Some(Arc::clone(&self.connection_global_handler)),
                parent_token: self.token.clone(),
            },
        );
        let _ = self.admit_tx.send(Arc::clone(&conn)).await;
        conn
    }

    /// Enqueues `conn` onto the evict channel (blocking if full).
    pub async fn disconnect(&self, conn: Arc<Connection>) {
        let _ = self.evict_tx.send(conn).await;
    }

    /// Checks the local map first, then falls back to the presence store.
    /// A presence-only hit reconstructs a descriptor-only [`Connection`]
    /// (no live socket): `Send` on it fails with `Closed`.
    pub async fn find(&self, id: i64) -> Option<Arc<Connection>> {
        if let Some(conn) = self.connections.read().await.get(&id).cloned() {
            return Some(conn);
        }
        match self.presence.find(id).await {
            Ok(Some(desc)) => Some(Connection::closed_handle(desc.id, desc.work_id)),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "presence lookup failed");
                None
            }
        }
    }

    /// Monotonic read, no lock: exact value not guaranteed during
    /// concurrent admit/evict transitions.
    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Cancels the fleet's token; admit/evict tasks observe this and the
    /// evict task flushes presence state for every still-registered id.
    pub fn close(&self) {
        self.token.cancel();
    }
}

async fn admit_task(worker: Arc<Worker>, mut rx: mpsc::Receiver<Arc<Connection>>) {
    loop {
        tokio::select! {
            () = worker.token.cancelled() => break,
            next = rx.recv() => match next {
                Some(conn) => handle_admit(&worker, conn).await,
                None => break,
            },
        }
    }
}

async fn handle_admit(worker: &Arc<Worker>, conn: Arc<Connection>) {
    let desc = Descriptor {
        id: conn.id(),
        work_id: conn.work_id(),
    };
    {
        let mut connections = worker.connections.write().await;
        connections.insert(desc.id, Arc::clone(&conn));
    }
    worker.count.fetch_add(1, Ordering::Relaxed);
    if let Err(err) = worker.presence.online(desc).await {
        warn!(id = desc.id, %err, "presence online failed, admitting anyway");
    }
    conn.emit(Event::empty(topic::LOGIN)).await;
}

async fn evict_task(worker: Arc<Worker>, mut rx: mpsc::Receiver<Arc<Connection>>) {
    loop {
        tokio::select! {
            () = worker.token.cancelled() => {
                drain_on_shutdown(&worker, &mut rx).await;
                break;
            }
            next = rx.recv() => match next {
                Some(conn) => handle_evict(&worker, conn).await,
                None => break,
            },
        }
    }
}

async fn handle_evict(worker: &Arc<Worker>, conn: Arc<Connection>) {
    let id = conn.id();
    let removed = worker.connections.write().await.remove(&id);
    if removed.is_some() {
        worker.count.fetch_sub(1, Ordering::Relaxed);
        if let Err(err) = worker.presence.offline(id).await {
            warn!(id, %err, "presence offline failed, local state is authoritative");
        }
    }
}

/// Connections close concurrently with token cancellation and report
/// themselves here as they go; keep handling evictions (rather than stopping
/// dead at cancellation) until the registry empties out or the deadline
/// passes, then force-clear and flush presence for any stragglers.
async fn drain_on_shutdown(worker: &Arc<Worker>, rx: &mut mpsc::Receiver<Arc<Connection>>) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
    loop {
        if worker.connections.read().await.is_empty() {
            break;
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(conn)) => handle_evict(worker, conn).await,
            Ok(None) | Err(_) => break,
        }
    }

    let stragglers: Vec<i64> = worker
        .connections
        .write()
        .await
        .drain()
        .map(|(id, _)| id)
        .collect();
    if !stragglers.is_empty() {
        worker
            .count
            .fetch_sub(stragglers.len() as i64, Ordering::Relaxed);
    }
    for id in stragglers {
        if let Err(err) = worker.presence.offline(id).await {
            warn!(id, %err, "presence offline failed during shutdown drain");
        }
    }
}
