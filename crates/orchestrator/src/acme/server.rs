//! Plain-HTTP challenge listener
//!
//! Answers `GET /.well-known/acme-challenge/<token>` with the exact key
//! authorization of a pending challenge. The same listener exposes
//! `/metrics` and `/health` for operators.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::challenge::ChallengeManager;
use crate::metrics::OrchestratorMetrics;

const TEXT_PLAIN: &str = "text/plain";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// HTTP-01 challenge server
#[derive(Debug, Clone)]
pub struct ChallengeServer {
    challenges: ChallengeManager,
    metrics: Option<OrchestratorMetrics>,
}

impl ChallengeServer {
    pub fn new(challenges: ChallengeManager) -> Self {
        Self {
            challenges,
            metrics: None,
        }
    }

    /// Also serve `/metrics`
    pub fn with_metrics(mut self, metrics: OrchestratorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bind the listener
    pub async fn bind(addr: &str) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Challenge listener bound");
        Ok(listener)
    }

    /// Accept connections until `shutdown` is cancelled
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down challenge listener");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream, remote_addr).await;
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(self, stream: TcpStream, remote_addr: SocketAddr) {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: Request<Incoming>| {
            let response = self.respond(req.method(), req.uri().path());
            async move { Ok::<_, Infallible>(response) }
        });

        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
            debug!(error = %e, remote_addr = %remote_addr, "Connection error");
        }
    }

    /// Route one request
    pub fn respond(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        if method != Method::GET && method != Method::HEAD {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }

        if let Some(token) = ChallengeManager::extract_token(path) {
            return match self.challenges.get_response(token) {
                Some(key_authorization) => {
                    debug!(token = %token, "Served challenge response");
                    plain(StatusCode::OK, key_authorization)
                }
                None => {
                    trace!(token = %token, "Unknown challenge token");
                    plain(StatusCode::NOT_FOUND, "not found")
                }
            };
        }

        match path {
            "/health" => plain(StatusCode::OK, "ok"),
            "/metrics" => self.metrics_response(),
            _ => plain(StatusCode::NOT_FOUND, "not found"),
        }
    }

    fn metrics_response(&self) -> Response<Full<Bytes>> {
        let Some(metrics) = &self.metrics else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };

        metrics
            .pending_challenges
            .set(self.challenges.pending_count() as i64);

        match metrics.encode() {
            Ok(text) => response(StatusCode::OK, PROMETHEUS_TEXT, text),
            Err(e) => {
                warn!(error = %e, "Failed to encode metrics");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        }
    }
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    response(status, TEXT_PLAIN, body)
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static(content_type));
    response
}
