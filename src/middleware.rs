//! Middleware trait, continuations and type erasure.
//!
//! # How a cascade runs
//!
//! Every unit of request processing (a plain closure, a route action, the
//! [`Router`](crate::Router), a [`Cascade`](crate::Cascade), the
//! [`Application`](crate::Application) itself) implements one trait:
//!
//! ```text
//! call(req, res, next)
//! ```
//!
//! `next` is a [`Next`]: an immutable slice of the remaining middleware plus
//! the continuation to fall back to once that slice is exhausted. Calling
//! [`Next::run`] pops the head of the slice and hands it a fresh `Next` over
//! the tail:
//!
//! ```text
//! Next { stack: [a, b, c], then: outer }
//!        ↓ run
//! a.call(req, res, Next { stack: [b, c], then: outer })
//!        ↓ a calls next.run
//! b.call(req, res, Next { stack: [c], then: outer })
//!        ↓ ...
//! outer.run(req, res)                   ← terminal continuation
//! ```
//!
//! The position lives in the continuation, never in the shared list, so any
//! number of in-flight requests can walk the same stack at once. `run` takes
//! `self` by value: a middleware cannot call its continuation twice.
//!
//! Not calling `next` ends the cascade at that middleware, which then owns
//! finishing the [`Response`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

/// A heap-allocated, type-erased future borrowing the request pair for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of request/response processing.
///
/// Implementations either finish the response and return without touching
/// `next`, or delegate by awaiting `next.run(req, res)`. Returning an error
/// aborts the current request only; the application turns it into a `500`
/// (or a clean close, when the head already went out).
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>>;
}

/// A shared, type-erased middleware.
///
/// `Arc` because the same middleware value sits in stacks that many
/// concurrent requests walk at once.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Erases a middleware into a [`BoxedMiddleware`].
pub fn boxed(middleware: impl Middleware) -> BoxedMiddleware {
    Arc::new(middleware)
}

// ── Continuations ─────────────────────────────────────────────────────────────

/// Single-use continuation handed to each middleware.
pub struct Next<'a> {
    stack: &'a [BoxedMiddleware],
    then: Option<Box<Next<'a>>>,
}

impl<'a> Next<'a> {
    /// A continuation over `stack` that falls back to `then` once the stack
    /// is exhausted.
    pub(crate) fn new(stack: &'a [BoxedMiddleware], then: Next<'a>) -> Self {
        Self { stack, then: Some(Box::new(then)) }
    }

    /// The continuation that does nothing. Ends every chain.
    pub fn terminal() -> Self {
        Self { stack: &[], then: None }
    }

    /// Forwards control to the next middleware in the active cascade.
    pub fn run<'r>(self, req: &'r mut Request, res: &'r mut Response) -> BoxFuture<'r, Result<()>>
    where
        'a: 'r,
    {
        let Next { stack, then } = self;
        match stack.split_first() {
            Some((head, rest)) => head.call(req, res, Next { stack: rest, then }),
            None => match then {
                Some(then) => (*then).run(req, res),
                None => Box::pin(std::future::ready(Ok(()))),
            },
        }
    }
}

// ── Closures ──────────────────────────────────────────────────────────────────

/// Middleware built from a closure. Obtain via [`from_fn`].
pub struct FnMiddleware<F>(F);

/// Turns a closure into a [`Middleware`].
///
/// The closure returns a boxed future so it can borrow the request pair:
///
/// ```rust
/// use conduit::middleware::from_fn;
///
/// let hello = from_fn(|_req, res, _next| Box::pin(async move {
///     res.render_text("hello", "text/plain", 200)
/// }));
/// ```
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, Next<'a>) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    FnMiddleware(f)
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response, Next<'a>) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        (self.0)(req, res, next)
    }
}

// ── Route filters ─────────────────────────────────────────────────────────────

/// Anything accepted as a route's filter list: nothing, one middleware, or an
/// ordered sequence.
pub trait IntoFilters {
    fn into_filters(self) -> Vec<BoxedMiddleware>;
}

impl IntoFilters for () {
    fn into_filters(self) -> Vec<BoxedMiddleware> { Vec::new() }
}

impl IntoFilters for BoxedMiddleware {
    fn into_filters(self) -> Vec<BoxedMiddleware> { vec![self] }
}

impl IntoFilters for Vec<BoxedMiddleware> {
    fn into_filters(self) -> Vec<BoxedMiddleware> { self }
}

impl<const N: usize> IntoFilters for [BoxedMiddleware; N] {
    fn into_filters(self) -> Vec<BoxedMiddleware> { self.into() }
}
