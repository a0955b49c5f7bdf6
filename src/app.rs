//! The application: top-level middleware stack, owned router, settings and
//! lifecycle events.
//!
//! # Where the router sits
//!
//! Middleware run in the order they were injected. The router is part of
//! that list: either where [`Application::inject_router`] put it, or, if it
//! was never injected, appended at the end when the first request arrives.
//! From then on the stack is frozen; later setup calls thaw it and the next
//! request freezes it again with the router kept where it was.

use std::sync::{Arc, OnceLock};

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::matcher::{Methods, RequestMatcher};
use crate::middleware::{BoxFuture, BoxedMiddleware, IntoFilters, Middleware, Next, boxed};
use crate::request::Request;
use crate::response::{Response, ViewOptions};
use crate::router::Router;
use crate::settings::Settings;
use crate::view::View;

/// Lifecycle events emitted for every request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AppEvent {
    /// Before the stack runs.
    Start,
    /// When the request falls off the end of the stack.
    End,
}

type Listener = Arc<dyn Fn(&Request, &Response) + Send + Sync>;

enum Layer {
    Middleware(BoxedMiddleware),
    Router,
}

struct Frozen {
    stack: Vec<BoxedMiddleware>,
    end: [BoxedMiddleware; 1],
    auto_mounted: bool,
}

/// Terminal continuation of the application's stack.
struct EmitEnd(Vec<Listener>);

impl Middleware for EmitEnd {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        for listener in &self.0 {
            listener(&*req, &*res);
        }
        next.run(req, res)
    }
}

/// An HTTP application.
///
/// ```rust
/// use conduit::{AppEvent, Application};
/// use conduit::middleware::from_fn;
///
/// let mut app = Application::new();
/// app.on(AppEvent::Start, |req, _res| tracing::info!(path = req.path(), "request"))
///     .get("/hello/:name", from_fn(|req, res, _next| Box::pin(async move {
///         let body = format!("Hello {}", req.param("name").unwrap_or("you"));
///         res.render_text(body, "text/plain", 200)
///     })));
/// ```
pub struct Application {
    settings: Settings,
    router: Arc<Router>,
    layers: Vec<Layer>,
    router_mounted: bool,
    start: Vec<Listener>,
    end: Vec<Listener>,
    view: Option<Arc<dyn View>>,
    frozen: OnceLock<Frozen>,
}

impl Application {
    pub fn new() -> Self {
        Self::with_settings(Settings::new())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            router: Arc::new(Router::new()),
            layers: Vec::new(),
            router_mounted: false,
            start: Vec::new(),
            end: Vec::new(),
            view: None,
            frozen: OnceLock::new(),
        }
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key)
    }

    pub fn set_setting(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.settings.set(key, value);
        self
    }

    /// Runs `setup` if the current `env` setting is one of `envs`.
    pub fn configure<'e>(
        &mut self,
        envs: impl IntoIterator<Item = &'e str>,
        setup: impl FnOnce(&mut Self),
    ) -> &mut Self {
        if envs.into_iter().any(|env| env == self.settings.env()) {
            setup(self);
        }
        self
    }

    /// Runs `setup` regardless of the environment.
    pub fn configure_all(&mut self, setup: impl FnOnce(&mut Self)) -> &mut Self {
        setup(self);
        self
    }

    /// Sets the renderer used by [`Response::render`].
    pub fn set_view(&mut self, view: impl View) -> &mut Self {
        self.view = Some(Arc::new(view));
        self
    }

    // ── Stack ─────────────────────────────────────────────────────────────────

    /// Appends `middleware` to the top-level stack.
    pub fn inject(&mut self, middleware: impl Middleware) -> &mut Self {
        self.inject_boxed(boxed(middleware))
    }

    pub fn inject_boxed(&mut self, middleware: BoxedMiddleware) -> &mut Self {
        self.thaw();
        self.layers.push(Layer::Middleware(middleware));
        self
    }

    /// Places the router at this position of the stack. Later injections run
    /// after it, and it will not be appended again on the first request.
    pub fn inject_router(&mut self) -> &mut Self {
        self.thaw();
        if !self.router_mounted {
            self.layers.push(Layer::Router);
            self.router_mounted = true;
        }
        self
    }

    /// Subscribes to a lifecycle event.
    pub fn on(
        &mut self,
        event: AppEvent,
        listener: impl Fn(&Request, &Response) + Send + Sync + 'static,
    ) -> &mut Self {
        self.thaw();
        let listener: Listener = Arc::new(listener);
        match event {
            AppEvent::Start => self.start.push(listener),
            AppEvent::End => self.end.push(listener),
        }
        self
    }

    // ── Routes ────────────────────────────────────────────────────────────────

    pub fn route(
        &mut self,
        matcher: RequestMatcher,
        filters: impl IntoFilters,
        action: impl Middleware,
    ) -> &mut Self {
        self.router_mut().add(matcher, filters, action);
        self
    }

    pub fn handle(
        &mut self,
        methods: impl Into<Methods>,
        path: &str,
        filters: impl IntoFilters,
        action: impl Middleware,
    ) -> &mut Self {
        self.route(RequestMatcher::new(methods, path), filters, action)
    }

    pub fn get(&mut self, path: &str, action: impl Middleware) -> &mut Self {
        self.handle("GET", path, (), action)
    }

    pub fn get_with(&mut self, path: &str, filters: impl IntoFilters, action: impl Middleware) -> &mut Self {
        self.handle("GET", path, filters, action)
    }

    pub fn post(&mut self, path: &str, action: impl Middleware) -> &mut Self {
        self.handle("POST", path, (), action)
    }

    pub fn post_with(&mut self, path: &str, filters: impl IntoFilters, action: impl Middleware) -> &mut Self {
        self.handle("POST", path, filters, action)
    }

    // ── Serving ───────────────────────────────────────────────────────────────

    /// Runs one request to completion and makes sure the client gets a
    /// well-formed answer.
    ///
    /// - A middleware error is logged; the client gets a `500` if nothing was
    ///   sent yet, otherwise the response is ended where it stands.
    /// - A client that went away is only noted at `debug`.
    /// - A request nobody answered gets a `404`.
    /// - A response with its head sent but never ended is ended.
    pub async fn respond(&self, mut req: Request, mut res: Response) {
        let outcome = self.call(&mut req, &mut res, Next::terminal()).await;

        match outcome {
            Err(Error::Closed) => {
                debug!(method = req.method(), path = req.path(), "client went away");
            }
            Err(e) => {
                error!(method = req.method(), path = req.path(), error = %e, "request failed");
                if !res.headers_sent() {
                    let _ = res.render_text("Internal Server Error", "text/plain", 500);
                }
            }
            Ok(()) if !res.headers_sent() => {
                warn!(method = req.method(), path = req.path(), "no middleware answered, sending 404");
                let _ = res.render_text("Not Found", "text/plain", 404);
            }
            Ok(()) => {}
        }

        if !res.is_ended() {
            let _ = res.end(None);
        }
    }

    fn router_mut(&mut self) -> &mut Router {
        self.thaw();
        Arc::get_mut(&mut self.router)
            .expect("router is shared only by the frozen stack, which was just dropped")
    }

    /// Snapshot of the stack, with the router appended if nobody placed it.
    fn freeze(&self) -> Frozen {
        let router: BoxedMiddleware = self.router.clone();
        let mut stack: Vec<BoxedMiddleware> = self.layers.iter()
            .map(|layer| match layer {
                Layer::Middleware(m) => Arc::clone(m),
                Layer::Router => Arc::clone(&router),
            })
            .collect();
        let auto_mounted = !self.router_mounted;
        if auto_mounted {
            stack.push(router);
        }
        Frozen { stack, end: [boxed(EmitEnd(self.end.clone()))], auto_mounted }
    }

    /// Drops the frozen stack before a setup change, keeping an auto-mounted
    /// router where the first request put it.
    fn thaw(&mut self) {
        if let Some(frozen) = self.frozen.take() {
            if frozen.auto_mounted {
                self.layers.push(Layer::Router);
                self.router_mounted = true;
            }
        }
    }
}

impl Default for Application {
    fn default() -> Self { Self::new() }
}

impl Middleware for Application {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        let frozen = self.frozen.get_or_init(|| self.freeze());

        res.set_view_options(ViewOptions {
            view_path: self.settings.view_path().to_path_buf(),
            default_layout: self.settings.get("default_layout"),
            view: self.view.clone(),
        });
        for listener in &self.start {
            listener(&*req, &*res);
        }

        Next::new(&frozen.stack, Next::new(&frozen.end, next)).run(req, res)
    }
}
