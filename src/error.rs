//! Unified error type.

/// The error type returned by conduit's fallible operations.
///
/// Client-facing failures (a missing file, an unmatched route) are expressed
/// as HTTP responses, not as `Error`s. This type surfaces infrastructure
/// failures and contract violations: touching headers after they went out,
/// writing to a finished response, or a transport that went away.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Header or status mutation after the head was written.
    #[error("headers already sent")]
    HeadersSent,

    /// `write` or `end` on a response that has already ended.
    #[error("response already ended")]
    Ended,

    /// The consumer side of the transport is gone (client disconnected).
    #[error("transport closed")]
    Closed,

    #[error("view: {0}")]
    View(String),

    #[error("session store: {0}")]
    Session(String),
}

/// `Result` specialised to [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
