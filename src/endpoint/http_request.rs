//! Server-side HTTP request.
//!
//! The request line and headers arrive up front as a [`RequestHead`]; the
//! body arrives as a `ReadStream<Buffer>`. Derived views (path, query,
//! params, absolute URI, form attributes) are computed on first access and
//! the same instance is returned afterwards.
//!
//! # Body Handling
//!
//! | Registered | Per-chunk handler | Body handler |
//! |------------|-------------------|--------------|
//! | `handler` only | every chunk | - |
//! | `body_handler` | never | once, after the end handler |
//!
//! Setting one replaces the other.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::trace;
use url::Url;

use crate::buffer::Buffer;
use crate::context::Context;
use crate::error::Error;
use crate::multimap::MultiMap;
use crate::stream::{Handler, InboundQueue, ReadStream, StreamBase, StreamState, VoidHandler};

use super::http_response::HttpServerResponse;

// ============================================================================
// Constants
// ============================================================================

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

static EMPTY: MultiMap = MultiMap::new();

// ============================================================================
// HttpVersion
// ============================================================================

/// HTTP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpVersion {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    #[default]
    Http11,
    /// HTTP/2
    Http2,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        })
    }
}

// ============================================================================
// RequestHead
// ============================================================================

/// Request line, headers and connection addresses.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    /// Method, e.g. `GET`.
    pub method: String,
    /// Request target as sent by the client.
    pub uri: String,
    /// Protocol version.
    pub version: HttpVersion,
    /// Request headers.
    pub headers: MultiMap,
    /// Local socket address.
    pub local_address: Option<SocketAddr>,
    /// Peer socket address.
    pub remote_address: Option<SocketAddr>,
}

impl RequestHead {
    /// Creates a head with the given method and target.
    #[must_use]
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Sets the protocol version.
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Sets the local address.
    #[inline]
    #[must_use]
    pub fn with_local_address(mut self, address: SocketAddr) -> Self {
        self.local_address = Some(address);
        self
    }

    /// Sets the peer address.
    #[inline]
    #[must_use]
    pub fn with_remote_address(mut self, address: SocketAddr) -> Self {
        self.remote_address = Some(address);
        self
    }

    /// Host used to resolve relative targets.
    fn host(&self) -> String {
        if let Some(host) = self.headers.get("host") {
            return host.to_string();
        }
        self.local_address
            .map_or_else(|| "localhost".to_string(), |address| address.to_string())
    }
}

// ============================================================================
// RequestTarget
// ============================================================================

/// Request target split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestTarget {
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) absolute_uri: String,
}

impl RequestTarget {
    /// Parses `uri` against `http://{host}/`. Unparseable targets are split
    /// on the first `?` as-is.
    pub(crate) fn parse(uri: &str, host: &str) -> Self {
        let parsed = Url::parse(uri)
            .or_else(|_| Url::parse(&format!("http://{host}/")).and_then(|base| base.join(uri)));

        match parsed {
            Ok(url) => Self {
                path: url.path().to_string(),
                query: url.query().map(str::to_string),
                absolute_uri: url.to_string(),
            },
            Err(e) => {
                trace!(uri, error = %e, "Request target not a valid URL");
                let (path, query) = match uri.split_once('?') {
                    Some((path, query)) => (path.to_string(), Some(query.to_string())),
                    None => (uri.to_string(), None),
                };
                Self {
                    path,
                    query,
                    absolute_uri: format!("http://{host}{uri}"),
                }
            }
        }
    }
}

// ============================================================================
// HttpServerRequest
// ============================================================================

struct RequestInner {
    head: RequestHead,
    context: Context,
    inbound: InboundQueue<Buffer>,
    data_handler: Mutex<Option<Handler<Buffer>>>,
    end_handler: Mutex<Option<VoidHandler>>,
    body_handler: Mutex<Option<Handler<Buffer>>>,
    body: Mutex<Buffer>,
    expect_multipart: AtomicBool,
    target: OnceLock<RequestTarget>,
    params: OnceLock<MultiMap>,
    form_attributes: OnceLock<MultiMap>,
    response: HttpServerResponse,
}

impl RequestInner {
    fn on_data(&self, chunk: Buffer) {
        let aggregate = self.body_handler.lock().is_some();
        if aggregate || self.expect_multipart.load(Ordering::Acquire) {
            self.body.lock().append_buffer(&chunk);
        }
        if aggregate {
            return;
        }
        let handler = self.data_handler.lock().clone();
        if let Some(handler) = handler {
            handler(chunk);
        }
    }

    fn on_end(&self) {
        let body = std::mem::take(&mut *self.body.lock());

        if self.expect_multipart.load(Ordering::Acquire) && self.is_form_urlencoded() {
            let _ = self
                .form_attributes
                .set(MultiMap::from_urlencoded(&body.to_string()));
        }

        let end_handler = self.end_handler.lock().clone();
        if let Some(handler) = end_handler {
            handler();
        }
        let body_handler = self.body_handler.lock().clone();
        if let Some(handler) = body_handler {
            handler(body);
        }
    }

    fn is_form_urlencoded(&self) -> bool {
        self.head.headers.get("content-type").is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
        })
    }
}

/// Incoming HTTP request on the server side.
///
/// Cloning yields another handle to the same request.
#[derive(Clone)]
pub struct HttpServerRequest {
    inner: Arc<RequestInner>,
}

impl HttpServerRequest {
    /// Creates a request affined to `context`, with a fresh response.
    pub fn new(head: RequestHead, context: Context) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<RequestInner>| {
            let inbound = InboundQueue::new();

            let target = weak.clone();
            inbound.set_handler(Arc::new(move |chunk| {
                if let Some(inner) = target.upgrade() {
                    inner.on_data(chunk);
                }
            }));
            let target = weak.clone();
            inbound.set_end_handler(Arc::new(move || {
                if let Some(inner) = target.upgrade() {
                    inner.on_end();
                }
            }));

            RequestInner {
                response: HttpServerResponse::new(context.clone()),
                head,
                context,
                inbound,
                data_handler: Mutex::new(None),
                end_handler: Mutex::new(None),
                body_handler: Mutex::new(None),
                body: Mutex::new(Buffer::new()),
                expect_multipart: AtomicBool::new(false),
                target: OnceLock::new(),
                params: OnceLock::new(),
                form_attributes: OnceLock::new(),
            }
        });
        Self { inner }
    }

    // ========================================================================
    // Request Line
    // ========================================================================

    /// Protocol version.
    #[inline]
    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.inner.head.version
    }

    /// Method, e.g. `GET`.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.head.method
    }

    /// Request target as sent by the client.
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.inner.head.uri
    }

    /// Path component of the target.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.target().path
    }

    /// Query string without the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target().query.as_deref()
    }

    /// Target resolved to an absolute URI.
    #[must_use]
    pub fn absolute_uri(&self) -> &str {
        &self.target().absolute_uri
    }

    fn target(&self) -> &RequestTarget {
        self.inner
            .target
            .get_or_init(|| RequestTarget::parse(&self.inner.head.uri, &self.inner.head.host()))
    }

    // ========================================================================
    // Headers and Params
    // ========================================================================

    /// Request headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &MultiMap {
        &self.inner.head.headers
    }

    /// First value of a header.
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.inner.head.headers.get(name)
    }

    /// Decoded query parameters.
    #[must_use]
    pub fn params(&self) -> &MultiMap {
        self.inner.params.get_or_init(|| {
            self.query()
                .map(MultiMap::from_urlencoded)
                .unwrap_or_default()
        })
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params().get(name)
    }

    /// Local socket address.
    #[inline]
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.head.local_address
    }

    /// Peer socket address.
    #[inline]
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.inner.head.remote_address
    }

    /// The response for this request. Always the same instance.
    #[inline]
    #[must_use]
    pub fn response(&self) -> &HttpServerResponse {
        &self.inner.response
    }

    /// Context all callbacks run on.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Body stream state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.inner.inbound.state()
    }

    // ========================================================================
    // Body
    // ========================================================================

    /// Collects the whole body and calls `handler` once, after the end
    /// handler. Replaces any per-chunk handler.
    pub fn body_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Buffer) + Send + Sync + 'static,
    {
        *self.inner.data_handler.lock() = None;
        *self.inner.body_handler.lock() = Some(Arc::new(handler));
        self
    }

    /// Enables form decoding for urlencoded bodies.
    pub fn set_expect_multipart(&self, expect: bool) -> &Self {
        self.inner.expect_multipart.store(expect, Ordering::Release);
        self
    }

    /// Returns `true` if form decoding is enabled.
    #[must_use]
    pub fn is_expect_multipart(&self) -> bool {
        self.inner.expect_multipart.load(Ordering::Acquire)
    }

    /// Decoded form fields. Empty until the body has ended.
    #[must_use]
    pub fn form_attributes(&self) -> &MultiMap {
        self.inner.form_attributes.get().unwrap_or(&EMPTY)
    }

    /// First value of a form field.
    #[must_use]
    pub fn get_form_attribute(&self, name: &str) -> Option<&str> {
        self.form_attributes().get(name)
    }
}

// ============================================================================
// HttpServerRequest - Transport Side
// ============================================================================

impl HttpServerRequest {
    /// Delivers a body chunk. Callable from any thread.
    pub fn handle_data(&self, chunk: Buffer) {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || {
            inbound.push(chunk);
        });
    }

    /// Signals the end of the body.
    pub fn handle_end(&self) {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || inbound.end());
    }

    /// Fails the body stream.
    pub fn handle_error(&self, err: Error) {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || inbound.fail(err));
    }

    /// Waits until the body stream wants data.
    pub async fn wait_for_demand(&self) -> bool {
        self.inner.inbound.wait_for_demand().await
    }
}

// ============================================================================
// Stream Traits
// ============================================================================

impl StreamBase for HttpServerRequest {
    fn exception_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.inner.inbound.set_exception_handler(Arc::new(handler));
        self
    }
}

impl ReadStream<Buffer> for HttpServerRequest {
    /// Sets the per-chunk handler. Replaces any body handler.
    fn handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(Buffer) + Send + Sync + 'static,
    {
        *self.inner.body_handler.lock() = None;
        *self.inner.data_handler.lock() = Some(Arc::new(handler));
        self
    }

    fn remove_handler(&self) -> &Self {
        *self.inner.data_handler.lock() = None;
        self
    }

    fn pause(&self) -> &Self {
        self.inner.inbound.pause();
        self
    }

    fn resume(&self) -> &Self {
        let inbound = self.inner.inbound.clone();
        self.inner.context.dispatch(move || inbound.resume());
        self
    }

    fn end_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.end_handler.lock() = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for HttpServerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerRequest")
            .field("method", &self.inner.head.method)
            .field("uri", &self.inner.head.uri)
            .field("version", &self.inner.head.version)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    fn request(head: RequestHead) -> HttpServerRequest {
        HttpServerRequest::new(head, Context::new())
    }

    #[test]
    fn test_target_parse_relative() {
        let target = RequestTarget::parse("/a/b?x=1&y=2", "example.com:8080");
        assert_eq!(target.path, "/a/b");
        assert_eq!(target.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(target.absolute_uri, "http://example.com:8080/a/b?x=1&y=2");
    }

    #[test]
    fn test_target_parse_absolute() {
        let target = RequestTarget::parse("http://other/p", "ignored");
        assert_eq!(target.path, "/p");
        assert_eq!(target.query, None);
    }

    #[test]
    fn test_version_display() {
        assert_eq!(HttpVersion::Http11.to_string(), "HTTP/1.1");
        assert_eq!(HttpVersion::Http10.to_string(), "HTTP/1.0");
    }

    #[tokio::test]
    async fn test_views_are_memoized() {
        let req = request(
            RequestHead::new("GET", "/search?q=rust&q=tokio&page=2").with_header("Host", "h"),
        );

        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query(), Some("q=rust&q=tokio&page=2"));
        assert_eq!(req.get_param("page"), Some("2"));
        assert_eq!(req.params().get_all("q"), vec!["rust", "tokio"]);
        assert_eq!(req.absolute_uri(), "http://h/search?q=rust&q=tokio&page=2");
        assert_eq!(req.get_header("host"), Some("h"));

        assert!(std::ptr::eq(req.params(), req.params()));
        assert!(std::ptr::eq(req.headers(), req.headers()));
        assert!(std::ptr::eq(req.path(), req.path()));
        assert!(std::ptr::eq(req.response(), req.response()));
    }

    #[tokio::test]
    async fn test_chunks_reach_handler() {
        let req = request(RequestHead::new("POST", "/"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        req.handler(move |chunk| {
            let _ = tx.send(chunk);
        });

        req.handle_data(Buffer::from("a"));
        req.handle_data(Buffer::from("b"));

        assert_eq!(rx.recv().await.unwrap(), Buffer::from("a"));
        assert_eq!(rx.recv().await.unwrap(), Buffer::from("b"));
    }

    #[tokio::test]
    async fn test_body_handler_after_end_handler() {
        let req = request(RequestHead::new("POST", "/"));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let chunk_tx = tx.clone();
        req.handler(move |_| {
            let _ = chunk_tx.send("chunk".to_string());
        });
        let end_tx = tx.clone();
        req.end_handler(move || {
            let _ = end_tx.send("end".to_string());
        });
        req.body_handler(move |body| {
            let _ = tx.send(format!("body:{body}"));
        });

        req.handle_data(Buffer::from("hello "));
        req.handle_data(Buffer::from("world"));
        req.handle_end();

        assert_eq!(rx.recv().await.unwrap(), "end");
        assert_eq!(rx.recv().await.unwrap(), "body:hello world");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_form_attributes() {
        let req = request(
            RequestHead::new("POST", "/form")
                .with_header("Content-Type", "application/x-www-form-urlencoded; charset=utf-8"),
        );
        req.set_expect_multipart(true);
        assert!(req.is_expect_multipart());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let observed = req.clone();
        req.end_handler(move || {
            let _ = tx.send(observed.get_form_attribute("name").map(str::to_string));
        });

        assert!(req.form_attributes().is_empty());
        req.handle_data(Buffer::from("name=J%C3%BCrgen&x=1"));
        req.handle_end();

        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("Jürgen"));
        assert_eq!(req.get_form_attribute("x"), Some("1"));
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let req = request(RequestHead::new("POST", "/"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        req.exception_handler(move |err| {
            let _ = tx.send(err);
        });

        req.handle_error(Error::connection("reset"));
        req.handle_end();

        assert!(rx.recv().await.unwrap().is_connection_error());
        assert_eq!(req.state(), StreamState::Errored);
    }
}
