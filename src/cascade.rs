//! Sequential composition of middleware.

use crate::error::Result;
use crate::middleware::{BoxFuture, BoxedMiddleware, Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// An ordered list of middleware that is itself a [`Middleware`].
///
/// Running a cascade walks the list front to back; each entry decides whether
/// to hand off to the next one. When the list is exhausted the cascade falls
/// through to the `next` it was invoked with. No retries, no reordering.
pub struct Cascade {
    stack: Vec<BoxedMiddleware>,
}

impl Cascade {
    pub fn new(stack: Vec<BoxedMiddleware>) -> Self {
        Self { stack }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Runs the cascade with a terminal continuation that does nothing.
    pub fn run<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> BoxFuture<'a, Result<()>> {
        self.call(req, res, Next::terminal())
    }
}

impl FromIterator<BoxedMiddleware> for Cascade {
    fn from_iter<I: IntoIterator<Item = BoxedMiddleware>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Middleware for Cascade {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a mut Response,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Next::new(&self.stack, next).run(req, res)
    }
}
