//! Outgoing HTTP response: header state machine and flow-controlled body.
//!
//! A response moves through three states and never back:
//!
//! ```text
//! Open ──send_headers──▶ HeadersSent ──end──▶ Ended
//!   │                                          ▲
//!   └──────────────── write / end ─────────────┘  (head goes out first)
//! ```
//!
//! Status and headers are mutable only while `Open`. Body writes report
//! backpressure from the underlying [`Sink`]: when [`Response::write`]
//! returns `false`, await [`Response::drain`] before writing again.
//! [`Response::send_file`] is the reference user of that protocol.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::sink::Sink;
use crate::view::{Locals, Template, View};

/// Size of each read when streaming a file.
pub const FILE_CHUNK_SIZE: usize = 2048;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values, usable wherever a content type string is.
#[derive(Clone, Copy, Debug)]
pub enum ContentType {
    Csv,          // text/csv
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl AsRef<str> for ContentType {
    fn as_ref(&self) -> &str {
        match self {
            Self::Csv         => "text/csv",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Per-request view configuration, set by the application.
#[derive(Clone, Default)]
pub struct ViewOptions {
    pub view_path: std::path::PathBuf,
    pub default_layout: Option<String>,
    pub view: Option<Arc<dyn View>>,
}

/// Options for [`Response::render`].
#[derive(Clone, Debug)]
pub struct RenderOptions {
    layout: Option<String>,
    status: u16,
    content_type: String,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self { layout: None, status: 200, content_type: "text/html".to_owned() }
    }

    pub fn layout(mut self, layout: impl Into<String>) -> Self {
        self.layout = Some(layout.into());
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn content_type(mut self, content_type: impl AsRef<str>) -> Self {
        self.content_type = content_type.as_ref().to_owned();
        self
    }
}

impl Default for RenderOptions {
    fn default() -> Self { Self::new() }
}

/// Options for [`Response::send_file`].
#[derive(Clone, Debug, Default)]
pub struct FileOptions {
    attachment: Option<Option<String>>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Content-Disposition: attachment;`
    pub fn attachment(mut self) -> Self {
        self.attachment = Some(None);
        self
    }

    /// `Content-Disposition: attachment; filename="<name>"`
    pub fn attachment_named(mut self, name: impl Into<String>) -> Self {
        self.attachment = Some(Some(name.into()));
        self
    }

    fn disposition(&self) -> Option<String> {
        match &self.attachment {
            None => None,
            Some(None) => Some("attachment;".to_owned()),
            Some(Some(name)) => Some(format!("attachment; filename=\"{name}\"")),
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// Where a response is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Open,
    HeadersSent,
    Ended,
}

type HeadersHook = Box<dyn FnOnce(&mut Headers) + Send>;
type EndHook = Box<dyn FnOnce() + Send>;

/// Per-request output sink.
///
/// ```rust
/// use conduit::Response;
/// use conduit::testing::MemorySink;
///
/// let (sink, record) = MemorySink::new();
/// let mut res = Response::new(sink);
/// res.set_header("x-request-id", "42").unwrap();
/// res.render_text("hello", "text/plain", 200).unwrap();
///
/// assert_eq!(record.header("content-length").as_deref(), Some("5"));
/// assert!(res.set_header("x-late", "1").is_err());
/// ```
pub struct Response {
    status: u16,
    headers: Headers,
    state: State,
    sink: Box<dyn Sink>,
    on_headers: Vec<HeadersHook>,
    on_end: Vec<EndHook>,
    view: ViewOptions,
}

impl Response {
    /// A `200` response over `sink` with its `Date` header already set.
    pub fn new(sink: impl Sink) -> Self {
        let mut headers = Headers::new();
        headers.set("Date", httpdate::fmt_http_date(SystemTime::now()));
        Self {
            status: 200,
            headers,
            state: State::Open,
            sink: Box::new(sink),
            on_headers: Vec::new(),
            on_end: Vec::new(),
            view: ViewOptions::default(),
        }
    }

    pub fn status(&self) -> u16 { self.status }
    pub fn state(&self) -> State { self.state }
    pub fn headers(&self) -> &Headers { &self.headers }
    pub fn headers_sent(&self) -> bool { self.state != State::Open }
    pub fn is_ended(&self) -> bool { self.state == State::Ended }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// `true` while body bytes can still be written.
    pub fn is_writable(&self) -> bool {
        self.state != State::Ended && self.sink.is_writable()
    }

    pub fn set_status(&mut self, status: u16) -> Result<()> {
        self.ensure_open()?;
        self.status = status;
        Ok(())
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.headers.set(name, value);
        Ok(())
    }

    pub fn set_headers<K, V>(&mut self, headers: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.ensure_open()?;
        for (name, value) in headers {
            self.headers.set(name, value);
        }
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self.headers.remove(name))
    }

    /// Registers an observer that may still edit headers right before the
    /// head is written.
    pub fn on_headers(&mut self, hook: impl FnOnce(&mut Headers) + Send + 'static) -> Result<()> {
        self.ensure_open()?;
        self.on_headers.push(Box::new(hook));
        Ok(())
    }

    /// Registers a hook that runs exactly once when the response finishes:
    /// on [`end`](Response::end), when the transport fails, or when the
    /// response is dropped unterminated.
    pub fn on_end(&mut self, hook: impl FnOnce() + Send + 'static) {
        if self.state == State::Ended {
            hook();
        } else {
            self.on_end.push(Box::new(hook));
        }
    }

    pub fn view_options(&self) -> &ViewOptions {
        &self.view
    }

    pub fn set_view_options(&mut self, options: ViewOptions) {
        self.view = options;
    }

    // ── Head ──────────────────────────────────────────────────────────────────

    /// Writes the status line and headers. `Open → HeadersSent`.
    pub fn send_headers(&mut self) -> Result<()> {
        self.ensure_open()?;
        for hook in std::mem::take(&mut self.on_headers) {
            hook(&mut self.headers);
        }
        self.state = State::HeadersSent;
        let written = self.sink.write_head(self.status, &self.headers);
        self.check(written)
    }

    /// Sets `status`, merges `headers`, then sends the head.
    pub fn send_headers_with<K, V>(
        &mut self,
        status: u16,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_status(status)?;
        self.set_headers(headers)?;
        self.send_headers()
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    /// Writes a body chunk, sending the head first if needed.
    ///
    /// Returns `false` when the transport is buffering: await
    /// [`drain`](Response::drain) before the next write.
    pub fn write(&mut self, data: impl Into<Bytes>) -> Result<bool> {
        self.ensure_not_ended()?;
        if self.state == State::Open {
            self.send_headers()?;
        }
        let accepted = self.sink.write(data.into());
        self.check(accepted)
    }

    /// Writes an optional final chunk and ends the response.
    pub fn end(&mut self, data: Option<Bytes>) -> Result<()> {
        self.ensure_not_ended()?;
        if self.state == State::Open {
            self.send_headers()?;
        }
        let ended = self.sink.end(data);
        self.finish();
        ended
    }

    /// Waits until the transport accepts writes without buffering again.
    pub async fn drain(&mut self) -> Result<()> {
        self.ensure_not_ended()?;
        let drained = self.sink.drained().await;
        self.check(drained)
    }

    // ── Conveniences ──────────────────────────────────────────────────────────

    /// Sends `body` with a byte-accurate `Content-Length` and ends.
    pub fn render_text(
        &mut self,
        body: impl Into<String>,
        content_type: impl AsRef<str>,
        status: u16,
    ) -> Result<()> {
        let body = body.into();
        self.set_header("Content-Type", content_type.as_ref())?;
        self.set_header("Content-Length", body.len().to_string())?;
        self.set_status(status)?;
        self.send_headers()?;
        self.end(Some(Bytes::from(body)))
    }

    /// Renders `template` through the configured [`View`] and sends it with
    /// [`render_text`](Response::render_text).
    pub fn render(&mut self, template: &str, locals: &Locals, options: RenderOptions) -> Result<()> {
        let view = self.view.view.clone()
            .ok_or_else(|| Error::View("no view configured".to_owned()))?;
        let layout = options.layout.or_else(|| self.view.default_layout.clone());
        let body = view.render(&Template {
            name: template,
            layout: layout.as_deref(),
            root: &self.view.view_path,
            locals,
        })?;
        self.render_text(body, options.content_type, options.status)
    }

    /// Sends a bodiless redirect to `path`.
    pub fn redirect_to(&mut self, path: &str, status: u16) -> Result<()> {
        self.set_header("Location", path)?;
        self.set_status(status)?;
        self.send_headers()?;
        self.end(None)
    }

    /// Streams the file at `path` in [`FILE_CHUNK_SIZE`] chunks.
    ///
    /// A missing or unreadable file is answered with a bodiless `404`, not an
    /// error. Otherwise `Content-Length` and `Last-Modified` come from the
    /// file's metadata and the body is written chunk by chunk, pausing on
    /// backpressure until the transport drains. The file handle is released
    /// before the last chunk goes out, and on every early exit.
    pub async fn send_file(
        &mut self,
        path: impl AsRef<Path>,
        options: FileOptions,
        status: u16,
    ) -> Result<()> {
        let path = path.as_ref();
        let (file, meta) = match open_regular(path).await {
            Ok(opened) => opened,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "file not readable, answering 404");
                self.set_status(404)?;
                self.send_headers()?;
                return self.end(None);
            }
        };

        if let Some(disposition) = options.disposition() {
            self.set_header("Content-Disposition", disposition)?;
        }
        if let Ok(modified) = meta.modified() {
            self.set_header("Last-Modified", httpdate::fmt_http_date(modified))?;
        }
        let len = meta.len();
        self.set_header("Content-Length", len.to_string())?;
        self.set_status(status)?;
        self.send_headers()?;

        self.stream_file(file, len).await
    }

    /// Chunk-then-check loop. Never reads past `len`, so the last chunk is
    /// known before it is read and always goes out through `end`. A chunk
    /// that hit backpressure was still accepted; after the drain the next
    /// read continues from the file offset.
    async fn stream_file(&mut self, mut file: File, len: u64) -> Result<()> {
        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let want = (len - sent).min(FILE_CHUNK_SIZE as u64) as usize;
            let n = read_full(&mut file, &mut buf[..want]).await?;
            sent += n as u64;
            let chunk = Bytes::copy_from_slice(&buf[..n]);

            if sent >= len || n < want {
                drop(file);
                trace!(bytes = sent, "file streamed");
                return self.end(Some(chunk).filter(|c| !c.is_empty()));
            }
            if !self.write(chunk)? {
                self.drain().await?;
            }
        }
    }

    // ── State guards ──────────────────────────────────────────────────────────

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::HeadersSent => Err(Error::HeadersSent),
            State::Ended => Err(Error::Ended),
        }
    }

    fn ensure_not_ended(&self) -> Result<()> {
        match self.state {
            State::Ended => Err(Error::Ended),
            _ => Ok(()),
        }
    }

    /// A transport that went away ends the response on the spot.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::Closed)) {
            debug!("transport closed, abandoning response");
            self.finish();
        }
        result
    }

    fn finish(&mut self) {
        self.state = State::Ended;
        for hook in std::mem::take(&mut self.on_end) {
            hook();
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if self.state != State::Ended {
            self.finish();
        }
    }
}

async fn open_regular(path: &Path) -> std::io::Result<(File, std::fs::Metadata)> {
    let file = File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(std::io::Error::other("not a regular file"));
    }
    Ok((file, meta))
}

/// Fills `buf` unless the file ends first; returns the bytes read.
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::testing::{MemorySink, SinkEvent};

    fn file_of(dir: &TempDir, name: &str, len: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = {
            let count = Arc::clone(&count);
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        (count, hook)
    }

    #[test]
    fn date_header_is_set_at_construction() {
        let (sink, _record) = MemorySink::new();
        let res = Response::new(sink);
        let date = res.header("date").unwrap();
        assert!(httpdate::parse_http_date(date).is_ok());
        assert_eq!(res.status(), 200);
        assert_eq!(res.state(), State::Open);
    }

    #[test]
    fn render_text_sets_exact_content_length() {
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.render_text("hello", "text/plain", 200).unwrap();

        assert_eq!(record.status(), Some(200));
        assert_eq!(record.header("Content-Length").as_deref(), Some("5"));
        assert_eq!(record.header("content-type").as_deref(), Some("text/plain"));
        assert_eq!(record.end_chunk(), Some(Some(Bytes::from_static(b"hello"))));
        assert!(record.writes().is_empty());
        assert!(res.is_ended());
    }

    #[test]
    fn content_length_counts_bytes_not_chars() {
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.render_text("héllo", ContentType::Text, 201).unwrap();

        assert_eq!(record.status(), Some(201));
        assert_eq!(record.header("content-length").as_deref(), Some("6"));
        assert_eq!(record.header("content-type").as_deref(), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn header_mutation_after_send_is_rejected() {
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.set_header("X-Before", "1").unwrap();
        res.send_headers().unwrap();

        assert!(matches!(res.set_header("X-After", "1"), Err(Error::HeadersSent)));
        assert!(matches!(res.remove_header("X-Before"), Err(Error::HeadersSent)));
        assert!(matches!(res.set_status(500), Err(Error::HeadersSent)));
        assert!(matches!(res.send_headers(), Err(Error::HeadersSent)));
        assert_eq!(res.header("x-after"), None);
        assert_eq!(record.status(), Some(200));
        assert_eq!(record.header("x-before").as_deref(), Some("1"));
    }

    #[test]
    fn headers_hook_runs_before_the_head_is_written() {
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.on_headers(|headers| headers.set("X-Hooked", "yes")).unwrap();
        res.send_headers_with(204, [("X-Extra", "1")]).unwrap();

        assert_eq!(record.status(), Some(204));
        assert_eq!(record.header("x-hooked").as_deref(), Some("yes"));
        assert_eq!(record.header("x-extra").as_deref(), Some("1"));
        assert!(res.on_headers(|_| {}).is_err());
    }

    #[test]
    fn write_sends_head_first_and_end_is_final() {
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);

        assert!(res.write("a").unwrap());
        res.end(Some(Bytes::from_static(b"b"))).unwrap();

        assert_eq!(record.events(), [SinkEvent::Head(200), SinkEvent::Write(1), SinkEvent::End(1)]);
        assert!(matches!(res.write("c"), Err(Error::Ended)));
        assert!(matches!(res.end(None), Err(Error::Ended)));
        assert!(!res.is_writable());
    }

    #[test]
    fn redirect_sets_location_without_body() {
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.redirect_to("/login", 302).unwrap();

        assert_eq!(record.status(), Some(302));
        assert_eq!(record.header("location").as_deref(), Some("/login"));
        assert_eq!(record.end_chunk(), Some(None));
    }

    #[test]
    fn end_hooks_run_once() {
        let (sink, _record) = MemorySink::new();
        let (count, hook) = counter();
        let mut res = Response::new(sink);
        res.on_end(hook);
        res.end(None).unwrap();
        drop(res);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn end_hooks_run_when_dropped_unterminated() {
        let (sink, _record) = MemorySink::new();
        let (count, hook) = counter();
        let mut res = Response::new(sink);
        res.on_end(hook);
        res.send_headers().unwrap();
        drop(res);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_ends_the_response() {
        let (sink, record) = MemorySink::new();
        let (count, hook) = counter();
        let mut res = Response::new(sink);
        res.on_end(hook);
        res.send_headers().unwrap();

        record.disconnect();
        assert!(matches!(res.write("x"), Err(Error::Closed)));
        assert!(res.is_ended());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn render_uses_view_and_default_layout() {
        struct Echo;
        impl View for Echo {
            fn render(&self, t: &Template<'_>) -> Result<String> {
                let who = t.locals.get("who").map_or("", String::as_str);
                Ok(format!("{}|{}|{}", t.name, t.layout.unwrap_or("-"), who))
            }
        }

        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.set_view_options(ViewOptions {
            view_path: "/views".into(),
            default_layout: Some("main".to_owned()),
            view: Some(Arc::new(Echo)),
        });
        let locals = Locals::from([("who".to_owned(), "ann".to_owned())]);
        res.render("index", &locals, RenderOptions::new().status(202)).unwrap();

        assert_eq!(record.status(), Some(202));
        assert_eq!(record.header("content-type").as_deref(), Some("text/html"));
        assert_eq!(record.body(), b"index|main|ann");
    }

    #[test]
    fn render_without_view_is_an_error() {
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        let err = res.render("index", &Locals::new(), RenderOptions::default()).unwrap_err();
        assert!(matches!(err, Error::View(_)));
        assert_eq!(record.status(), None);
    }

    #[tokio::test]
    async fn send_file_missing_is_404_without_body() {
        let dir = TempDir::new().unwrap();
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);

        res.send_file(dir.path().join("nope.txt"), FileOptions::new(), 200).await.unwrap();

        assert_eq!(record.status(), Some(404));
        assert_eq!(record.end_chunk(), Some(None));
        assert!(record.body().is_empty());
    }

    #[tokio::test]
    async fn send_file_directory_is_404() {
        let dir = TempDir::new().unwrap();
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);

        res.send_file(dir.path(), FileOptions::new(), 200).await.unwrap();
        assert_eq!(record.status(), Some(404));
    }

    #[tokio::test]
    async fn send_file_streams_in_chunks_and_ends_with_the_last() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "big.bin", 5000);
        let (sink, record) = MemorySink::new();
        let (count, hook) = counter();
        let mut res = Response::new(sink);
        res.on_end(hook);

        res.send_file(&path, FileOptions::new(), 200).await.unwrap();

        let writes = record.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.len() == FILE_CHUNK_SIZE));
        assert_eq!(record.end_chunk().unwrap().unwrap().len(), 5000 - 2 * FILE_CHUNK_SIZE);
        assert_eq!(record.body(), std::fs::read(&path).unwrap());
        assert_eq!(record.header("content-length").as_deref(), Some("5000"));
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(record.header("last-modified"), Some(httpdate::fmt_http_date(modified)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_file_of_exact_chunk_multiple_ends_with_a_full_chunk() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "even.bin", 2 * FILE_CHUNK_SIZE);
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);

        res.send_file(&path, FileOptions::new(), 200).await.unwrap();

        assert_eq!(record.writes().len(), 1);
        assert_eq!(record.end_chunk().unwrap().unwrap().len(), FILE_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn send_file_empty_ends_without_data() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "empty", 0);
        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);

        res.send_file(&path, FileOptions::new(), 200).await.unwrap();

        assert_eq!(record.events(), [SinkEvent::Head(200), SinkEvent::End(0)]);
        assert_eq!(record.header("content-length").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn send_file_attachment_headers() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "report.csv", 10);

        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.send_file(&path, FileOptions::new().attachment(), 200).await.unwrap();
        assert_eq!(record.header("content-disposition").as_deref(), Some("attachment;"));

        let (sink, record) = MemorySink::new();
        let mut res = Response::new(sink);
        res.send_file(&path, FileOptions::new().attachment_named("q3.csv"), 203).await.unwrap();
        assert_eq!(record.status(), Some(203));
        assert_eq!(
            record.header("content-disposition").as_deref(),
            Some("attachment; filename=\"q3.csv\""),
        );
    }

    #[tokio::test]
    async fn send_file_waits_for_drain_after_each_pressured_write() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "slow.bin", 5000);
        let (sink, record) = MemorySink::with_backpressure();
        let mut res = Response::new(sink);

        res.send_file(&path, FileOptions::new(), 200).await.unwrap();

        assert_eq!(record.events(), [
            SinkEvent::Head(200),
            SinkEvent::Write(FILE_CHUNK_SIZE),
            SinkEvent::Drain,
            SinkEvent::Write(FILE_CHUNK_SIZE),
            SinkEvent::Drain,
            SinkEvent::End(5000 - 2 * FILE_CHUNK_SIZE),
        ]);
        assert_eq!(record.body(), std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn send_file_pauses_until_the_sink_drains() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "gated.bin", 5000);
        let (sink, record) = MemorySink::gated();

        let task = tokio::spawn(async move {
            let mut res = Response::new(sink);
            res.send_file(&path, FileOptions::new(), 200).await
        });

        wait_for(|| record.writes().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(record.writes().len(), 1);

        record.release_drain();
        wait_for(|| record.writes().len() == 2).await;
        assert!(!record.is_ended());

        record.release_drain();
        task.await.unwrap().unwrap();
        assert!(record.is_ended());
        assert_eq!(record.body().len(), 5000);
    }

    #[tokio::test]
    async fn send_file_stops_when_the_client_goes_away() {
        let dir = TempDir::new().unwrap();
        let path = file_of(&dir, "gone.bin", 5000);
        let (sink, record) = MemorySink::gated();
        let (count, hook) = counter();

        let task = tokio::spawn(async move {
            let mut res = Response::new(sink);
            res.on_end(hook);
            res.send_file(&path, FileOptions::new(), 200).await
        });

        wait_for(|| record.writes().len() == 1).await;
        record.disconnect();

        assert!(matches!(task.await.unwrap(), Err(Error::Closed)));
        assert_eq!(record.writes().len(), 1);
        assert!(!record.is_ended());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not reached");
    }
}
