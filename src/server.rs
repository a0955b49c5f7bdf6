//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.
//!
//! # Streaming
//!
//! Each request gets a [`pipe`]: the application writes into the sink half
//! on its own task while hyper polls the body half. The response head is
//! returned to hyper as soon as the application sends it, so large bodies
//! go out chunk by chunk under the pipe's backpressure.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::BodyExt;
use hyper::body::{Body, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::Application;
use crate::error::Result;
use crate::headers::Headers;
use crate::request::Request;
use crate::response::Response;
use crate::sink::{HIGH_WATER_MARK, Head, PipeBody, pipe};

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use conduit::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, app: Application) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(app);

        info!(addr = %self.addr, env = app.settings().env(), "conduit listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a SIGTERM stops accepting even if more
                // connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req: hyper::Request<Incoming>| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("conduit stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the application and hands hyper a streaming
/// response. Every failure is answered on the wire, so hyper never sees an
/// error.
///
/// - A request body that cannot be read is answered with `400` and the
///   application never runs.
/// - An application task that dies before sending a head (a panicking
///   middleware) is answered with `500`.
async fn dispatch<B>(
    app: Arc<Application>,
    req: hyper::Request<B>,
    remote_addr: SocketAddr,
) -> std::result::Result<http::Response<PipeBody>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, method = %parts.method, path = parts.uri.path(), "failed to read request body: {e}");
            return Ok(bodiless(400));
        }
    };

    let headers = parts.headers.iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();
    let request = Request::new(parts.method.as_str(), parts.uri.path())
        .with_headers(headers)
        .with_body(body);

    debug!(peer = %remote_addr, method = request.method(), path = request.path(), "dispatching");

    let (sink, head, body) = pipe(HIGH_WATER_MARK);
    let task = tokio::spawn(async move {
        app.respond(request, Response::new(sink)).await;
    });

    match head.await {
        Ok(head) => Ok(into_http(head, body)),
        // The sink is gone without a head: either the task died or the
        // application finished without answering.
        Err(_) => match task.await {
            Err(e) => {
                error!(peer = %remote_addr, method = %parts.method, path = parts.uri.path(), "request task failed: {e}");
                Ok(bodiless(500))
            }
            Ok(()) => Ok(bodiless(404)),
        },
    }
}

/// An empty response with `status`, fed by a pipe nobody writes to.
fn bodiless(status: u16) -> http::Response<PipeBody> {
    let (sink, _head, body) = pipe(HIGH_WATER_MARK);
    drop(sink);
    let headers: Headers = [("Content-Length", "0")].into_iter().collect();
    into_http(Head { status, headers }, body)
}

fn into_http(head: Head, body: PipeBody) -> http::Response<PipeBody> {
    let mut response = http::Response::new(body);
    *response.status_mut() = StatusCode::from_u16(head.status).unwrap_or_else(|_| {
        warn!(status = head.status, "invalid status code, sending 500");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    for (name, value) in head.headers.iter() {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!(header = name, "dropping invalid response header"),
        }
    }
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
