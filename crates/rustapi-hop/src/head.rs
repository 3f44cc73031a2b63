//! Request and response snapshots handed to resolvers and projectors.
//!
//! The tower pipeline moves the request into the inner service, so the
//! interceptor keeps an owned copy of everything it may later publish.

use http::{Extensions, HeaderMap, Method, StatusCode, Uri, Version};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::time::Instant;

/// Ad-hoc named values attached to a request or response by upstream code.
///
/// Inserted into the request or response extensions, these are picked up by
/// the field projector under their own name, which is how handlers publish
/// fields the built-in accessors know nothing about.
///
/// ```ignore
/// Attributes::new()
///     .with("drinking", vec!["Coffee", "Water"])
///     .insert_into(req.extensions_mut());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge these attributes into `extensions`, keeping any already there.
    pub fn insert_into(self, extensions: &mut Extensions) {
        match extensions.get_mut::<Attributes>() {
            Some(existing) => existing.0.extend(self.0),
            None => {
                extensions.insert(self);
            }
        }
    }

    fn from_extensions(extensions: &Extensions) -> Self {
        extensions.get::<Attributes>().cloned().unwrap_or_default()
    }
}

/// Instant at which the interceptor first saw a request.
///
/// Only attached in deferred mode; its presence is what makes the envelope
/// carry `millis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStart(pub Instant);

/// Owned snapshot of a request head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    started_at: Option<Instant>,
    attributes: Attributes,
}

impl RequestHead {
    /// Snapshot the head of `req`.
    ///
    /// The peer address is taken from a [`SocketAddr`] extension when the
    /// server provides one.
    pub fn from_request<B>(req: &http::Request<B>) -> Self {
        let extensions = req.extensions();
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            version: req.version(),
            headers: req.headers().clone(),
            remote_addr: extensions.get::<SocketAddr>().copied(),
            started_at: extensions.get::<RequestStart>().map(|start| start.0),
            attributes: Attributes::from_extensions(extensions),
        }
    }

    /// Build a head from its parts, mostly useful for tests and manual publishing.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            remote_addr: None,
            started_at: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_start(mut self, start: Instant) -> Self {
        self.started_at = Some(start);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path plus query string as received.
    pub fn original_url(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    /// Request protocol: the URI scheme when present, `http` otherwise.
    pub fn protocol(&self) -> &str {
        self.uri.scheme_str().unwrap_or("http")
    }

    /// Host name without port, from the URI authority or the `Host` header.
    pub fn hostname(&self) -> Option<&str> {
        let host = match self.uri.authority() {
            Some(authority) => authority.as_str(),
            None => self.headers.get(http::header::HOST)?.to_str().ok()?,
        };
        let host = host.rsplit('@').next().unwrap_or(host);
        let host = if host.starts_with('[') {
            // IPv6 literal, keep the brackets
            match host.find(']') {
                Some(end) => &host[..=end],
                None => host,
            }
        } else {
            host.split(':').next().unwrap_or(host)
        };
        (!host.is_empty()).then_some(host)
    }
}

/// Owned snapshot of a response head.
///
/// Layers in front of the interceptor can describe the response as it stands
/// when the request arrives by inserting a `ResponseHead` into the request
/// extensions, see [`insert_into`](Self::insert_into). Immediate mode
/// publishes that state; deferred mode folds it under the final response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    attributes: Attributes,
}

impl ResponseHead {
    pub fn from_response<B>(res: &http::Response<B>) -> Self {
        Self {
            status: res.status(),
            version: res.version(),
            headers: res.headers().clone(),
            attributes: Attributes::from_extensions(res.extensions()),
        }
    }

    /// The response as seen when `req` enters the interceptor.
    ///
    /// A `200` with no headers unless upstream code attached a head.
    pub fn at_entry<B>(req: &http::Request<B>) -> Self {
        req.extensions()
            .get::<ResponseHead>()
            .cloned()
            .unwrap_or_else(|| Self {
                version: req.version(),
                ..Self::new(StatusCode::OK)
            })
    }

    /// Store this head in request extensions for [`at_entry`](Self::at_entry).
    pub fn insert_into(self, extensions: &mut Extensions) {
        extensions.insert(self);
    }

    /// Fill in headers and attributes set at entry that the final response lacks.
    pub(crate) fn with_entry(mut self, entry: ResponseHead) -> Self {
        for name in entry.headers.keys() {
            if self.headers.contains_key(name) {
                continue;
            }
            for value in entry.headers.get_all(name) {
                self.headers.append(name.clone(), value.clone());
            }
        }
        let mut attributes = entry.attributes;
        attributes.0.extend(self.attributes.0);
        self.attributes = attributes;
        self
    }

    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}
