//! # conduit
//!
//! A small HTTP application layer: a middleware cascade, an ordered router
//! and a streaming, flow-controlled response.
//!
//! ## The model
//!
//! - Every unit of work is a [`Middleware`]: `call(req, res, next)`. It either
//!   finishes the [`Response`] or hands over to `next`.
//! - A [`Cascade`] runs a list of middleware in order. The [`Router`] picks
//!   the first route whose [`RequestMatcher`] accepts the request and runs
//!   that route's filters and action as a cascade of its own.
//! - The [`Application`] owns the top-level stack, the router, [`Settings`]
//!   and lifecycle events, and guarantees every request gets an answer.
//! - The [`Response`] writes to a [`Sink`](sink::Sink). Writes report
//!   backpressure; [`Response::send_file`] honors it chunk by chunk.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use conduit::{Application, FileOptions, Server};
//! use conduit::middleware::from_fn;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut app = Application::new();
//!     app.get("/users/:id", from_fn(|req, res, _next| Box::pin(async move {
//!         let id = req.param("id").unwrap_or("unknown");
//!         res.render_text(format!(r#"{{"id":"{id}"}}"#), "application/json", 200)
//!     })))
//!     .get("/report", from_fn(|_req, res, _next| Box::pin(async move {
//!         res.send_file("report.csv", FileOptions::new().attachment(), 200).await
//!     })));
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```

mod app;
mod cascade;
mod error;
mod headers;
mod matcher;
mod request;
mod response;
mod router;
mod server;
mod settings;

pub mod middleware;
pub mod session;
pub mod sink;
pub mod testing;
pub mod view;

pub use app::{AppEvent, Application};
pub use cascade::Cascade;
pub use error::{Error, Result};
pub use headers::Headers;
pub use matcher::{Methods, RequestMatcher};
pub use middleware::{BoxedMiddleware, Middleware, Next};
pub use request::Request;
pub use response::{
    ContentType, FILE_CHUNK_SIZE, FileOptions, RenderOptions, Response, State, ViewOptions,
};
pub use router::Router;
pub use server::Server;
pub use settings::Settings;
