//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from phones and control panels.
//! 3. Upgrading each connection to a WebSocket session, reading the role and
//!    device id from the request URL (see [`super::handshake`]).
//! 4. Running two concurrent halves per connection:
//!    - **Reader**: decodes inbound frames and hands them to the [`Router`].
//!    - **Writer**: drains the connection's outbound queue into the socket.
//! 5. Calling [`Router::on_disconnect`] exactly once when the connection ends.
//! 6. Stopping the accept loop when the `running` flag is cleared, then
//!    closing every open connection the same way.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task.  The accept loop never blocks:
//! it accepts a connection and immediately spawns a new task for it before
//! accepting the next one.  A slow control panel only fills its own outbound
//! queue; it never delays the phone that is streaming to it.
//!
//! # Stopping a connection
//!
//! The reader only checks for "stop" (peer gone, writer failed, hub shutting
//! down) *between* messages.  A message that has reached the router is
//! always routed to the end, so a half-applied registration can never be
//! left behind.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{Request, Response},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use relay_core::{ConnectionId, Role};

use super::handshake::{reject, ConnectionParams};
use crate::application::{Outbound, RouteError, Router};

/// How long open connections get to clean up after shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the WebSocket TCP listener.
///
/// # Errors
///
/// Returns an error if the port is already in use or the process lacks
/// permission to bind.
pub async fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
}

/// Binds `addr` and runs the accept loop until `running` is set to `false`.
pub async fn run_server(
    addr: SocketAddr,
    router: Arc<Router>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = bind_listener(addr).await?;
    serve(listener, router, running).await
}

/// Runs the accept loop on an already bound listener.
///
/// Split from [`run_server`] so tests can bind port 0 and learn the real
/// address before the loop starts.
///
/// Returns once `running` is cleared and every connection task has run its
/// cleanup, or the drain timeout has passed.
pub async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;
    info!("relay hub listening on ws://{local_addr}");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short accept timeout so the loop notices the shutdown flag even
        // when nobody is connecting.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("TCP connection from {peer_addr}");
                let router = Arc::clone(&router);
                let shutdown = shutdown_rx.clone();
                tasks.spawn(async move {
                    handle_connection(stream, peer_addr, router, shutdown).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of file descriptors); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }

        // Reap finished connections so the set only holds live ones.
        while tasks.try_join_next().is_some() {}
    }

    // ── Drain ─────────────────────────────────────────────────────────────────
    info!(connections = tasks.len(), "closing open connections");
    shutdown_tx.send_replace(true);
    let drained = timeout(DRAIN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = tasks.len(), "connections did not close in time; aborting them");
        tasks.abort_all();
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Entry point of each per-connection task; logs the outcome.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
    shutdown: watch::Receiver<bool>,
) {
    match run_connection(stream, peer_addr, router, shutdown).await {
        Ok(()) => debug!("connection from {peer_addr} finished"),
        Err(e) => warn!("connection from {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one connection.
///
/// 1. Completes the WebSocket handshake, refusing bad parameters with 400.
/// 2. Adds the connection to the router (and registers a producer that named
///    its device in the URL).
/// 3. Runs the reader and writer halves until the connection ends.
/// 4. Cleans up through [`Router::on_disconnect`], whatever ended the session.
async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    // ── Step 1: handshake ─────────────────────────────────────────────────────
    let mut params = None;
    let ws_stream = accept_hdr_async(stream, |request: &Request, response: Response| {
        match ConnectionParams::from_query(request.uri().query()) {
            Ok(parsed) => {
                params = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                warn!("refusing upgrade from {peer_addr}: {e}");
                Err(reject(&e))
            }
        }
    })
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let params = params.context("handshake finished without connection parameters")?;

    // ── Step 2: join the router ───────────────────────────────────────────────
    let connection = ConnectionId::new_v4();
    let outbound = router
        .on_connect(connection, params.role)
        .await
        .context("failed to add connection to the router")?;
    info!(connection = %connection, role = %params.role, peer = %peer_addr, "connection established");

    // ── Step 3: run until the connection ends ─────────────────────────────────
    let (ws_tx, ws_rx) = ws_stream.split();
    let result = drive_connection(ws_tx, ws_rx, connection, &params, &router, outbound, shutdown).await;

    // ── Step 4: cleanup, on every exit path of step 3 ─────────────────────────
    router
        .on_disconnect(connection)
        .await
        .with_context(|| format!("cleanup failed for connection {connection}"))?;
    info!(connection = %connection, "connection closed");

    result
}

/// Pumps one connection until the peer leaves, the writer fails, or the hub
/// shuts down.
///
/// The writer runs as its own task.  The reader awaits each router call
/// outside the `select!`, so nothing can cancel a message half-way through.
async fn drive_connection<Tx, Rx>(
    ws_tx: Tx,
    mut ws_rx: Rx,
    connection: ConnectionId,
    params: &ConnectionParams,
    router: &Router,
    outbound: mpsc::Receiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    Tx: Sink<WsMessage, Error = WsError> + Unpin + Send + 'static,
    Rx: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    if let Some((device_id, metadata)) = params.implicit_registration() {
        router
            .on_register(connection, device_id, metadata)
            .await
            .context("registration from handshake parameters failed")?;
    }

    let role = params.role;
    let mut writer = tokio::spawn(write_outbound(ws_tx, outbound));

    // Messages are handled one at a time, which keeps each producer's frames
    // in order.
    let result = loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            written = &mut writer => {
                break match written {
                    Ok(result) => result.context("WebSocket write failed"),
                    Err(e) => Err(anyhow::Error::new(e).context("writer task ended abnormally")),
                };
            }
            _ = shutdown.changed() => {
                debug!(connection = %connection, "hub shutting down");
                break Ok(());
            }
        };

        let ws_msg = match next {
            Some(Ok(msg)) => msg,
            None | Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!(connection = %connection, "WebSocket closed");
                break Ok(());
            }
            Some(Err(e)) => break Err(e).context("WebSocket read failed"),
        };

        match ws_msg {
            WsMessage::Text(text) => {
                report(connection, router.dispatch(connection, role, &text).await);
            }
            WsMessage::Binary(data) => {
                let result = router.on_binary_frame(connection, &data).await;
                report(connection, result.map(|_| ()));
            }
            WsMessage::Ping(_) if role == Role::Producer => {
                // tungstenite answers the ping itself; we only note the sign of life.
                let result = router.on_producer_ping(connection).await;
                report(connection, result.map(|_| ()));
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            WsMessage::Close(_) => {
                debug!(connection = %connection, "Close frame received");
                break Ok(());
            }
        }
    };

    writer.abort();
    result
}

/// Writer half: outbound queue → socket.
async fn write_outbound<Tx>(mut ws_tx: Tx, mut outbound: mpsc::Receiver<Outbound>) -> Result<(), WsError>
where
    Tx: Sink<WsMessage, Error = WsError> + Unpin,
{
    while let Some(text) = outbound.recv().await {
        ws_tx.send(WsMessage::Text(text.to_string())).await?;
    }
    Ok(())
}

// ── Helper ────────────────────────────────────────────────────────────────────

/// Logs a routing failure.  The connection stays open either way.
fn report(connection: ConnectionId, result: Result<(), RouteError>) {
    match result {
        Ok(()) => {}
        // The lock guard already logged this at error level.
        Err(RouteError::LockTimeout { .. }) => {}
        Err(e) => warn!(connection = %connection, "message dropped: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
