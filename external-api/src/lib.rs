//! # Healthcheck & API
//!
//! This crate provides http api's for healthcheck, diagnostics, and metrics
//! It exposes the following endpoints:
//!
//! /health
//! /ping
//! /metrics
//! /metrics-text
//! /leases
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![allow(clippy::cognitive_complexity, clippy::too_many_arguments)]

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Result, bail};
use axum::{Router, extract::Extension, routing};

use booking_lock::{LeaseManager, LeaseStore};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace};

pub use crate::models::{Health, State};

/// The task runner for the [`ExternalApi`]
#[derive(Debug)]
pub struct ExternalApiGuard {
    task_handle: JoinHandle<()>,
}

impl Drop for ExternalApiGuard {
    fn drop(&mut self) {
        trace!("ExternalApiRunner drop called");
        self.task_handle.abort();
    }
}

/// Listens to relevant channels to gather information about
/// the running system and reports this data in an HTTP API
#[derive(Debug)]
pub struct ExternalApi<S> {
    tx: mpsc::Sender<Health>,
    rx: mpsc::Receiver<Health>,
    addr: SocketAddr,
    state: State,
    lease_mgr: Arc<LeaseManager<S>>,
}

impl<S: LeaseStore> ExternalApi<S> {
    /// Create a new ExternalApi instance
    pub fn new(addr: SocketAddr, lease_mgr: Arc<LeaseManager<S>>) -> Self {
        trace!("starting external api");
        let (tx, rx) = mpsc::channel(10);
        let state = models::blank_health();
        Self {
            tx,
            rx,
            addr,
            state,
            lease_mgr,
        }
    }

    /// clone the health sender channel
    pub fn sender(&self) -> mpsc::Sender<Health> {
        self.tx.clone()
    }

    /// Set the health
    pub async fn set_health(&self, health: Health) {
        *self.state.lock() = health;
    }

    /// Listen to Health changes over the channel
    async fn listen_status(&mut self) -> Result<()> {
        while let Some(health) = self.rx.recv().await {
            let mut guard = self.state.lock();
            if *guard != health {
                info!(%health, "health changed");
                *guard = health;
            }
        }
        info!("listen health exited-- nothing listening");
        Ok(())
    }

    /// serve the HTTP external api
    async fn run(addr: SocketAddr, state: State, lease_mgr: Arc<LeaseManager<S>>) -> Result<()> {
        let tcp = TcpListener::bind(&addr).await?;
        let app = Router::new()
            .route("/health", routing::get(handlers::ok))
            .route("/ping", routing::get(handlers::ping))
            .route("/metrics", routing::get(handlers::metrics))
            .route("/metrics-text", routing::get(handlers::metrics_text))
            .route("/leases", routing::get(handlers::leases::<S>))
            .layer(TraceLayer::new_for_http())
            .layer(Extension(state))
            .layer(Extension(lease_mgr));

        debug!("external API listening on {}", addr);

        axum::serve(tcp, app).await?;
        bail!("external API returned-- should not happen")
    }

    /// Kick off the HTTP service and start listening on all channels for
    /// changes. The task ends when `token` is cancelled.
    pub fn start(mut self, token: CancellationToken) -> JoinHandle<()> {
        let state = self.state.clone();
        let addr = self.addr;
        let lease_mgr = self.lease_mgr.clone();
        // if tx is not cloned, health listen will never update since ExternalApi is owner

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("external API stopping");
                }
                res = async {
                    tokio::try_join!(
                        ExternalApi::run(addr, state, lease_mgr),
                        self.listen_status()
                    )
                } => {
                    if let Err(err) = res {
                        error!(?err, "health task returning, this should not happen")
                    }
                }
            }
        })
    }

    /// Start the `ExternalApiRunner`
    pub fn serve(self) -> ExternalApiGuard {
        ExternalApiGuard {
            task_handle: self.start(CancellationToken::new()),
        }
    }
}

mod handlers {

    use std::sync::Arc;

    use axum::{
        Json,
        body::Body,
        extract::Extension,
        http::header,
        http::{Response, StatusCode},
        response::IntoResponse,
    };
    use booking_lock::{
        ErrorKind, LeaseManager, LeaseStore,
        metrics::{START_TIME, UPTIME},
    };
    use prometheus::{Encoder, ProtobufEncoder, TextEncoder};
    use tracing::error;

    use crate::models::{ErrorBody, Health, ServerResult, State};

    pub(crate) async fn ok(Extension(state): Extension<State>) -> ServerResult<impl IntoResponse> {
        Ok(match *state.lock() {
            Health::Good => StatusCode::OK,
            Health::Bad => StatusCode::INTERNAL_SERVER_ERROR,
        })
    }

    /// Every lease currently in the store. Observability only, not a
    /// consistent snapshot.
    pub(crate) async fn leases<S: LeaseStore>(
        Extension(lease_mgr): Extension<Arc<LeaseManager<S>>>,
    ) -> ServerResult<Response<Body>> {
        match lease_mgr.list_active_leases().await {
            Ok(leases) => Ok(Json(leases).into_response()),
            Err(err) => {
                error!(?err, "failed to list leases");
                let status = match err.kind() {
                    ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let body = ErrorBody {
                    reason: err.reason(),
                    message: err.to_string(),
                };
                Ok((status, Json(body)).into_response())
            }
        }
    }

    pub(crate) async fn metrics() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = ProtobufEncoder::new();
        let mut buf = Vec::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error protobuf encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn metrics_text() -> ServerResult<impl IntoResponse> {
        UPTIME.set(START_TIME.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buf = String::new();
        let mf = prometheus::gather();
        let resp = Response::builder().header(header::CONTENT_TYPE, encoder.format_type());

        match encoder.encode_utf8(&mf, &mut buf) {
            Err(err) => {
                error!(?err, "error text encoding prometheus metrics");
                Ok(resp
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())?)
            }
            Ok(_) => Ok(resp.status(StatusCode::OK).body(Body::from(buf))?),
        }
    }

    pub(crate) async fn ping() -> impl IntoResponse {
        StatusCode::OK
    }
}

/// Various models for API responses
pub mod models {
    use axum::response::IntoResponse;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::{fmt, sync::Arc};

    /// The overall health of the system
    pub type State = Arc<Mutex<Health>>;
    /// Health is binary Good/Bad at the moment
    #[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone, Eq)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Health {
        /// Report good health
        Good,
        /// Report bad health
        Bad,
    }

    impl fmt::Display for Health {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}",
                match *self {
                    Health::Good => "GOOD",
                    Health::Bad => "BAD",
                }
            )
        }
    }

    pub(crate) fn blank_health() -> State {
        Arc::new(Mutex::new(Health::Bad))
    }

    /// JSON body returned when a lease operation fails
    #[derive(Serialize, Debug)]
    pub struct ErrorBody {
        /// stable machine-readable reason, e.g. `store-unavailable`
        pub reason: &'static str,
        /// human readable detail
        pub message: String,
    }

    // error type
    /// Make our own error that wraps `anyhow::Error`.
    #[derive(Debug)]
    pub struct ServerError(anyhow::Error);
    /// return error result
    pub type ServerResult<T> = Result<T, ServerError>;

    impl IntoResponse for ServerError {
        fn into_response(self) -> axum::response::Response {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}", self.0),
            )
                .into_response()
        }
    }

    impl<E> From<E> for ServerError
    where
        E: Into<anyhow::Error>,
    {
        fn from(err: E) -> Self {
            Self(err.into())
        }
    }
}
