//! Engine host – serves one [`Engine`] over a byte stream or over HTTP.
//!
//! ## Stream session
//!
//! | Inbound frame | Effect                                       |
//! |---------------|----------------------------------------------|
//! | `Action`      | one engine step, answered with a `Response`  |
//! | `Quit`        | ends the session                             |
//! | end of stream | ends the session                             |
//!
//! ## HTTP routes
//!
//! | Route        | Effect                                               |
//! |--------------|------------------------------------------------------|
//! | `POST /step` | one engine step; the body is the action payload      |
//! | `POST /quit` | drops the client's object-list cache, stops serving  |

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use log::{info, warn};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::codec::{read_message, write_message, MessageKind, DEFAULT_MAX_PAYLOAD};
use crate::engine::Engine;
use crate::error::CodecError;
use crate::http::{CONTENT_TYPE_PAYLOAD, QUIT_PATH, STEP_PATH};

// ---------------------------------------------------------------------------
// Byte stream
// ---------------------------------------------------------------------------

/// Answer actions from `reader` on `writer` until the client quits or the
/// stream ends.  Returns the number of steps served.
pub fn serve_stream<R: Read, W: Write>(
    engine: &mut Engine,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, CodecError> {
    engine.begin_connection();
    let mut served = 0;
    while let Some(msg) = read_message(reader, DEFAULT_MAX_PAYLOAD)? {
        match msg.kind {
            MessageKind::Action => {
                let response = engine.step_payload(&msg.payload)?;
                write_message(writer, MessageKind::Response, &response)?;
                served += 1;
            }
            MessageKind::Quit => {
                info!("[host] client quit after {} steps", served);
                return Ok(served);
            }
            MessageKind::Response => warn!("[host] ignoring response frame from client"),
        }
    }
    info!("[host] client disconnected after {} steps", served);
    Ok(served)
}

/// Serve one client over a FIFO pair.  `to_engine` is opened for reading
/// first, matching the order the client opens them in.
pub fn serve_fifos(engine: &mut Engine, to_engine: &Path, from_engine: &Path) -> Result<u64, CodecError> {
    info!(
        "[host] waiting for a client on {} / {}",
        to_engine.display(),
        from_engine.display()
    );
    let mut reader = File::open(to_engine)?;
    let mut writer = OpenOptions::new().write(true).open(from_engine)?;
    serve_stream(engine, &mut reader, &mut writer)
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HostState {
    engine: Arc<Mutex<Engine>>,
    shutdown: Arc<Notify>,
}

impl HostState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<Engine>> {
        &self.engine
    }

    /// Resolves once a client posts `/quit`.
    pub async fn quit_requested(&self) {
        self.shutdown.notified().await;
    }
}

pub fn router(state: HostState) -> Router {
    Router::new()
        .route(STEP_PATH, post(step))
        .route(QUIT_PATH, post(quit))
        .with_state(state)
}

async fn step(State(state): State<HostState>, body: Bytes) -> Response {
    let engine = Arc::clone(&state.engine);
    let stepped = tokio::task::spawn_blocking(move || engine.lock().step_payload(&body)).await;
    match stepped {
        Ok(Ok(payload)) => ([(header::CONTENT_TYPE, CONTENT_TYPE_PAYLOAD)], payload).into_response(),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "rejected step payload");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "step task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn quit(State(state): State<HostState>) -> StatusCode {
    let engine = Arc::clone(&state.engine);
    if let Err(e) = tokio::task::spawn_blocking(move || engine.lock().begin_connection()).await {
        tracing::warn!(error = %e, "quit task failed");
    }
    state.shutdown.notify_one();
    tracing::info!("client quit");
    StatusCode::NO_CONTENT
}

/// Serve HTTP on `listener` until a client posts `/quit`.
pub async fn serve_http(listener: TcpListener, state: HostState) -> std::io::Result<()> {
    info!("[host] serving http on {}", listener.local_addr()?);
    let shutdown = state.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.quit_requested().await })
        .await
}
