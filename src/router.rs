//! Ordered request router.
//!
//! Routes are tried in the order they were registered and the first match
//! wins. No specificity ranking: register `/users/new` before `/users/:id`
//! if you want the literal to take precedence.

use tracing::debug;

use crate::cascade::Cascade;
use crate::error::Result;
use crate::matcher::{Methods, RequestMatcher};
use crate::middleware::{BoxFuture, IntoFilters, Middleware, Next, boxed};
use crate::request::Request;
use crate::response::Response;

struct Route {
    matcher: RequestMatcher,
    /// Filters followed by the action.
    cascade: Cascade,
}

/// The application router.
///
/// A list of (matcher, filters, action) entries, built once at startup and
/// read-only while serving. The router is itself a [`Middleware`]: on a match
/// it injects the captured params into the request and runs the route's
/// filters and action, continuing with its own `next` if they all delegate.
/// On a miss it calls `next` directly.
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers a route. Returns `self` for chaining.
    ///
    /// ```rust
    /// use conduit::{RequestMatcher, Router};
    /// use conduit::middleware::{boxed, from_fn};
    ///
    /// let auth = boxed(from_fn(|req, res, next| Box::pin(async move {
    ///     if req.header("authorization").is_none() {
    ///         return res.render_text("unauthorized", "text/plain", 401);
    ///     }
    ///     next.run(req, res).await
    /// })));
    /// let show = from_fn(|req, res, _next| Box::pin(async move {
    ///     let id = req.param("id").unwrap_or("unknown").to_owned();
    ///     res.render_text(id, "text/plain", 200)
    /// }));
    ///
    /// let router = Router::new().route(RequestMatcher::new("GET", "/users/:id"), auth, show);
    /// assert_eq!(router.len(), 1);
    /// ```
    pub fn route(mut self, matcher: RequestMatcher, filters: impl IntoFilters, action: impl Middleware) -> Self {
        self.add(matcher, filters, action);
        self
    }

    /// Registers `action` for a method + path template pair. Returns `self`
    /// for chaining.
    pub fn on(self, methods: impl Into<Methods>, path: &str, action: impl Middleware) -> Self {
        self.route(RequestMatcher::new(methods, path), (), action)
    }

    pub fn get(self, path: &str, action: impl Middleware) -> Self {
        self.on("GET", path, action)
    }

    pub fn post(self, path: &str, action: impl Middleware) -> Self {
        self.on("POST", path, action)
    }

    pub(crate) fn add(&mut self, matcher: RequestMatcher, filters: impl IntoFilters, action: impl Middleware) {
        let mut stack = filters.into_filters();
        stack.push(boxed(action));
        self.routes.push(Route { matcher, cascade: Cascade::new(stack) });
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl Middleware for Router {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        for route in &self.routes {
            if let Some(params) = route.matcher.matches(req.method(), req.path()) {
                debug!(method = req.method(), path = req.path(), route = route.matcher.template(), "route matched");
                req.set_params(params);
                return route.cascade.call(req, res, next);
            }
        }
        debug!(method = req.method(), path = req.path(), "no route matched");
        next.run(req, res)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::middleware::{BoxedMiddleware, from_fn};
    use crate::testing::{MemorySink, Record};

    fn reply(tag: &'static str) -> impl Middleware {
        from_fn(move |req, res, _next| Box::pin(async move {
            let x = req.param("x").unwrap_or("-").to_owned();
            res.render_text(format!("{tag}:{x}"), "text/plain", 200)
        }))
    }

    async fn dispatch(router: &Router, method: &str, path: &str) -> Record {
        let (sink, record) = MemorySink::new();
        let mut req = Request::new(method, path);
        let mut res = Response::new(sink);
        router.call(&mut req, &mut res, Next::terminal()).await.unwrap();
        record
    }

    #[tokio::test]
    async fn first_registered_route_wins() {
        let router = Router::new()
            .get("/a/:x", reply("param"))
            .get("/a/b", reply("literal"));

        let record = dispatch(&router, "GET", "/a/b").await;
        assert_eq!(record.body(), b"param:b");
    }

    #[tokio::test]
    async fn literal_first_shadows_param() {
        let router = Router::new()
            .get("/a/b", reply("literal"))
            .get("/a/:x", reply("param"));

        assert_eq!(dispatch(&router, "GET", "/a/b").await.body(), b"literal:-");
        assert_eq!(dispatch(&router, "GET", "/a/c").await.body(), b"param:c");
    }

    #[tokio::test]
    async fn method_mismatch_tries_later_routes() {
        let router = Router::new()
            .post("/a/:x", reply("post"))
            .get("/a/:x", reply("get"));

        assert_eq!(dispatch(&router, "GET", "/a/1").await.body(), b"get:1");
        assert_eq!(dispatch(&router, "post", "/a/1").await.body(), b"post:1");
    }

    #[tokio::test]
    async fn miss_falls_through_to_next() {
        let router = Router::new().get("/a/:x", reply("param"));
        let fallback: [BoxedMiddleware; 1] = [boxed(from_fn(|_req, res, _next| Box::pin(async move {
            res.render_text("not found", "text/plain", 404)
        })))];

        let (sink, record) = MemorySink::new();
        let mut req = Request::new("GET", "/a/b/c");
        let mut res = Response::new(sink);
        router.call(&mut req, &mut res, Next::new(&fallback, Next::terminal())).await.unwrap();

        assert_eq!(record.status(), Some(404));
        assert!(req.params().is_empty());
    }

    #[tokio::test]
    async fn filters_run_before_the_action_and_may_halt() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let filter = |name: &'static str, pass: bool| -> BoxedMiddleware {
            let log = Arc::clone(&log);
            boxed(from_fn(move |req, res, next| {
                let log = Arc::clone(&log);
                Box::pin(async move {
                    log.lock().unwrap().push(name);
                    if pass {
                        next.run(req, res).await
                    } else {
                        res.render_text("halted", "text/plain", 403)
                    }
                })
            }))
        };

        let router = Router::new()
            .route(RequestMatcher::new("GET", "/open"), vec![filter("f1", true), filter("f2", true)], reply("open"))
            .route(RequestMatcher::new("GET", "/closed"), filter("guard", false), reply("closed"));

        assert_eq!(dispatch(&router, "GET", "/open").await.body(), b"open:-");
        let closed = dispatch(&router, "GET", "/closed").await;
        assert_eq!(closed.status(), Some(403));
        assert_eq!(*log.lock().unwrap(), ["f1", "f2", "guard"]);
    }

    #[tokio::test]
    async fn route_cascade_continues_with_the_routers_next() {
        let passthrough = from_fn(|req, res, next| Box::pin(async move { next.run(req, res).await }));
        let router = Router::new().get("/a", passthrough);
        let app = Cascade::new(vec![boxed(router), boxed(reply("tail"))]);

        let (sink, record) = MemorySink::new();
        let mut req = Request::new("GET", "/a");
        let mut res = Response::new(sink);
        app.run(&mut req, &mut res).await.unwrap();

        assert_eq!(record.body(), b"tail:-");
    }

    #[tokio::test]
    async fn interleaved_requests_keep_their_own_params() {
        let slow = from_fn(|req, res, _next| Box::pin(async move {
            let before = req.param("x").unwrap_or("").to_owned();
            let delay = if before == "first" { 20 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let after = req.param("x").unwrap_or("").to_owned();
            res.render_text(format!("{before}/{after}"), "text/plain", 200)
        }));
        let router = Arc::new(Router::new().get("/a/:x", slow));

        let (one, two) = tokio::join!(
            dispatch(&router, "GET", "/a/first"),
            dispatch(&router, "GET", "/a/second"),
        );

        assert_eq!(one.body(), b"first/first");
        assert_eq!(two.body(), b"second/second");
    }
}
