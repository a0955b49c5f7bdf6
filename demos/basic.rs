//! Minimal conduit example: logging middleware, an auth filter, params and a
//! streamed file download.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -H 'authorization: token' http://localhost:3000/admin
//!   curl -OJ http://localhost:3000/download
//!   curl -i http://localhost:3000/old-home

use std::time::Instant;

use conduit::middleware::{boxed, from_fn};
use conduit::{AppEvent, Application, ContentType, FileOptions, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let timer = from_fn(|req, res, next| Box::pin(async move {
        let started = Instant::now();
        let outcome = next.run(req, res).await;
        tracing::info!(
            method = req.method(),
            path = req.path(),
            status = res.status(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "request",
        );
        outcome
    }));

    let require_auth = boxed(from_fn(|req, res, next| Box::pin(async move {
        if req.header("authorization").is_none() {
            return res.render_text("unauthorized", ContentType::Text, 401);
        }
        next.run(req, res).await
    })));

    let mut app = Application::new();
    app.configure(["development"], |app| {
        app.on(AppEvent::End, |req, _res| {
            tracing::debug!(path = req.path(), "nothing answered");
        });
    });

    app.inject(timer)
        .get("/users/:id", from_fn(|req, res, _next| Box::pin(async move {
            let id = req.param("id").unwrap_or("unknown");
            res.render_text(format!(r#"{{"id":"{id}","name":"alice"}}"#), ContentType::Json, 200)
        })))
        .get_with("/admin", require_auth, from_fn(|_req, res, _next| Box::pin(async move {
            res.render_text("welcome", ContentType::Text, 200)
        })))
        .get("/download", from_fn(|_req, res, _next| Box::pin(async move {
            res.send_file("Cargo.toml", FileOptions::new().attachment_named("Cargo.toml"), 200).await
        })))
        .get("/old-home", from_fn(|_req, res, _next| Box::pin(async move {
            res.redirect_to("/users/1", 301)
        })));

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}
