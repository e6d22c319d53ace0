//! # Receiver Service
//!
//! Serves the single snapshot slot over HTTP.
//!
//! ```text
//! ┌─────────────┐    ┌──────────────────┐    ┌──────────────┐
//! │ POST / PUT  │───▶│ ReceiverService  │───▶│ dyn Storage  │
//! │ GET         │◀───│ (warp filters)   │◀───│ (one slot)   │
//! └─────────────┘    └──────────────────┘    └──────────────┘
//! ```
//!
//! The path and query of a request are ignored: POST and PUT replace the snapshot with the
//! body, GET returns it labelled `application/json`, anything else is answered with 501.
//! Content-Length and chunked framing (including `Expect: 100-continue`) are handled by the
//! HTTP server underneath, the body is collected here under the configured size cap and
//! request deadline.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use http_receiver::network::receiver::{ReceiverService, ReceiverSettings};
//! use http_receiver::storage::MemoryStorage;
//! use http_receiver::error_handling::types::NetworkError;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NetworkError> {
//!     let settings = ReceiverSettings {
//!         bind_addr: "127.0.0.1:0".parse().unwrap(),
//!         max_body_bytes: 1024 * 1024,
//!         request_timeout: Duration::from_secs(30),
//!     };
//!
//!     let handle = ReceiverService::new(settings, Arc::new(MemoryStorage::new()))
//!         .start()
//!         .await?;
//!     println!("listening on {}", handle.local_addr());
//!
//!     handle.stop().await
//! }
//! ```

use super::idle_timeout::IdleTimeoutStream;
use crate::configuration::config::Config;
use crate::error_handling::types::{ConfigError, HttpError, NetworkError, StorageError};
use crate::storage::storage_trait::Storage;
use bytes::{Buf, BufMut};
use futures_util::{pin_mut, Stream, StreamExt};
use log::{debug, error, info, trace, warn};
use std::convert::Infallible;
use std::fmt::Display;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use warp::http::{Method, StatusCode};
use warp::{reply, Filter, Rejection, Reply};

pub const SNAPSHOT_CONTENT_TYPE: &str = "application/json";

/// Pause after a failed `accept` (e.g. out of file descriptors) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// API error payload
#[derive(serde::Serialize)]
struct ApiError {
    message: String,
}

/// Listener parameters, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub bind_addr: SocketAddr,
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl ReceiverSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: config.socket_addr()?,
            max_body_bytes: config.max_body_bytes,
            request_timeout: config.request_timeout(),
        })
    }
}

/// The receiver, not yet bound. Call [`ReceiverService::start`] to begin serving.
pub struct ReceiverService {
    settings: ReceiverSettings,
    storage: Arc<dyn Storage>,
}

impl ReceiverService {
    pub fn new(settings: ReceiverSettings, storage: Arc<dyn Storage>) -> Self {
        Self { settings, storage }
    }

    /// Binds the listener and spawns the HTTP server on it.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::BindError` when the address is unavailable or privileged.
    pub async fn start(self) -> Result<ReceiverHandle, NetworkError> {
        let listener = TcpListener::bind(self.settings.bind_addr)
            .await
            .map_err(|e| {
                error!("Unable to bind {}: {}", self.settings.bind_addr, e);
                NetworkError::BindError(e)
            })?;
        let local_addr = listener.local_addr().map_err(NetworkError::SockError)?;
        info!("Listening on {}", local_addr);

        let idle = self.settings.request_timeout;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = warp::serve(routes(Arc::new(self.settings), self.storage))
            .serve_incoming_with_graceful_shutdown(
                Box::pin(incoming(listener, idle)),
                async move {
                    let _ = shutdown_rx.await;
                },
            );

        let task = tokio::spawn(async move {
            server.await;
            info!("Stopped listening on {}", local_addr);
        });

        Ok(ReceiverHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// A running receiver.
///
/// Dropping the handle also stops the server, [`ReceiverHandle::stop`] additionally waits for
/// it to finish.
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and releases the listening socket, then waits for the
    /// requests already in flight to complete.
    pub async fn stop(self) -> Result<(), NetworkError> {
        let _ = self.shutdown_tx.send(());
        self.task.await.map_err(|e| {
            error!("Server on {} did not shut down cleanly: {}", self.local_addr, e);
            NetworkError::ShutdownFailed
        })
    }
}

/// Accepted connections, each behind an inactivity deadline. Accept failures are logged and
/// retried rather than ending the stream, which would stop the server.
fn incoming(
    listener: TcpListener,
    idle: Duration,
) -> impl Stream<Item = io::Result<IdleTimeoutStream<TcpStream>>> {
    futures_util::stream::unfold(listener, move |listener| async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    trace!("Accepted connection from {}", peer);
                    return Some((Ok(IdleTimeoutStream::new(stream, idle)), listener));
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    })
}

/// Every method on every path, answered from the snapshot slot.
pub fn routes(
    settings: Arc<ReceiverSettings>,
    storage: Arc<dyn Storage>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    warp::method()
        .and(warp::header::optional::<u64>("content-length"))
        .and(warp::body::stream())
        .and_then(move |method: Method, declared: Option<u64>, body| {
            let settings = settings.clone();
            let storage = storage.clone();
            async move {
                Ok::<_, Rejection>(dispatch(method, declared, body, &settings, storage).await)
            }
        })
        .recover(rejection_to_reply)
}

async fn dispatch<S, B, E>(
    method: Method,
    declared: Option<u64>,
    body: S,
    settings: &ReceiverSettings,
    storage: Arc<dyn Storage>,
) -> reply::Response
where
    S: Stream<Item = Result<B, E>>,
    B: Buf,
    E: Display,
{
    match method {
        Method::POST | Method::PUT => {
            let collected = timeout(
                settings.request_timeout,
                collect_body(body, declared, settings.max_body_bytes),
            )
            .await
            .unwrap_or(Err(HttpError::Timeout));

            match collected {
                Ok(body) => ingest(storage, &method, body).await,
                Err(e) => {
                    warn!("Rejecting {} request: {}", method, e);
                    error_reply(e.status(), &e.to_string())
                }
            }
        }
        Method::GET => retrieve(storage).await,
        _ => {
            warn!("Unsupported method {}", method);
            error_reply(
                StatusCode::NOT_IMPLEMENTED,
                &format!("Unsupported method ({})", method),
            )
        }
    }
}

/// Gathers the request body into one buffer of at most `limit` bytes.
///
/// A declared length over the limit is refused before any body byte is pulled. Otherwise the
/// buffer grows only with bytes that actually arrived, whatever length was announced.
pub(crate) async fn collect_body<S, B, E>(
    body: S,
    declared: Option<u64>,
    limit: usize,
) -> Result<Vec<u8>, HttpError>
where
    S: Stream<Item = Result<B, E>>,
    B: Buf,
    E: Display,
{
    if declared.is_some_and(|length| length > limit as u64) {
        return Err(HttpError::BodyTooLarge(limit));
    }

    pin_mut!(body);
    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| HttpError::MalformedBody(e.to_string()))?;
        if collected.len() + chunk.remaining() > limit {
            return Err(HttpError::BodyTooLarge(limit));
        }
        collected.put(chunk);
    }
    Ok(collected)
}

/// Only a malformed header can reject, every method and path is routed.
async fn rejection_to_reply(err: Rejection) -> Result<reply::Response, Infallible> {
    debug!("Rejected request: {:?}", err);
    Ok(error_reply(StatusCode::BAD_REQUEST, "Malformed request"))
}

fn error_reply(status: StatusCode, message: &str) -> reply::Response {
    reply::with_status(
        reply::json(&ApiError {
            message: message.to_string(),
        }),
        status,
    )
    .into_response()
}

/// Replaces the snapshot with `body`. Answers 200 with no body, or 500 if the store failed.
pub async fn ingest(storage: Arc<dyn Storage>, method: &Method, body: Vec<u8>) -> reply::Response {
    info!("{} received: {} bytes", method, body.len());

    let saved = tokio::task::spawn_blocking(move || storage.save_snapshot(&body))
        .await
        .unwrap_or_else(|e| {
            error!("Snapshot write task failed: {}", e);
            Err(StorageError::WriteFailed)
        });

    match saved {
        Ok(()) => reply::with_status(reply::reply(), StatusCode::OK).into_response(),
        Err(e) => {
            error!("Failed to store snapshot: {}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store snapshot")
        }
    }
}

/// Returns the snapshot as the body of a 200. No snapshot yet, or an unreadable one, gives an
/// empty body.
pub async fn retrieve(storage: Arc<dyn Storage>) -> reply::Response {
    let loaded = tokio::task::spawn_blocking(move || storage.get_snapshot())
        .await
        .unwrap_or_else(|e| {
            error!("Snapshot read task failed: {}", e);
            Err(StorageError::ReadFailed)
        });

    let snapshot = match loaded {
        Ok(Some(data)) => data,
        Ok(None) => Vec::new(),
        Err(e) => {
            warn!("Serving empty snapshot: {}", e);
            Vec::new()
        }
    };
    debug!("Serving snapshot of {} bytes", snapshot.len());

    reply::with_status(
        reply::with_header(snapshot, "Content-Type", SNAPSHOT_CONTENT_TYPE),
        StatusCode::OK,
    )
    .into_response()
}
