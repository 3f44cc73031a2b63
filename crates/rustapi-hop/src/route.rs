//! Routing key derivation.
//!
//! A [`RouteResolver`] decides, per request, under which routing key the
//! summary is published, or whether it is published at all. The built-in
//! [`DefaultRoute`] yields `<protocol>.<reversed hostname labels>`, so a
//! request to `http://api.example.com` is published as `http.com.example.api`
//! and can be subscribed to with `http.com.example.#`.

use crate::error::BoxError;
use crate::head::{RequestHead, ResponseHead};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// A non-empty, dot-delimited AMQP routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Returns `None` for an empty key, which suppresses publishing.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        (!key.is_empty()).then_some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from the default resolver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Request has no hostname to derive a routing key from")]
    MissingHostname,
}

/// Strategy deciding the routing key of a request.
///
/// `Ok(None)` suppresses publishing for the request; `Err` is reported to the
/// error observer and also suppresses it.
#[async_trait]
pub trait RouteResolver: Send + Sync + 'static {
    async fn resolve(
        &self,
        request: &RequestHead,
        response: &ResponseHead,
    ) -> Result<Option<RoutingKey>, BoxError>;
}

/// Derive `<protocol>.<hostname labels, last first>`.
///
/// Exposed so custom resolvers can delegate to it:
///
/// ```ignore
/// let route = route_async(|req, res| async move {
///     tokio::time::sleep(Duration::from_millis(500)).await;
///     default_route(&req, &res)
/// });
/// ```
pub fn default_route(
    request: &RequestHead,
    _response: &ResponseHead,
) -> Result<RoutingKey, RouteError> {
    let hostname = request.hostname().ok_or(RouteError::MissingHostname)?;

    let mut key = String::with_capacity(request.protocol().len() + hostname.len() + 1);
    key.push_str(request.protocol());
    for label in hostname.rsplit('.') {
        key.push('.');
        key.push_str(label);
    }
    Ok(RoutingKey(key))
}

/// The built-in resolver, see [`default_route`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRoute;

#[async_trait]
impl RouteResolver for DefaultRoute {
    async fn resolve(
        &self,
        request: &RequestHead,
        response: &ResponseHead,
    ) -> Result<Option<RoutingKey>, BoxError> {
        Ok(Some(default_route(request, response)?))
    }
}

/// Values a resolver closure may return.
///
/// Strings become keys (empty ones suppress), `None` suppresses, and
/// `Result`s forward their error.
pub trait IntoRoutingKey {
    fn into_routing_key(self) -> Result<Option<RoutingKey>, BoxError>;
}

impl IntoRoutingKey for RoutingKey {
    fn into_routing_key(self) -> Result<Option<RoutingKey>, BoxError> {
        Ok(Some(self))
    }
}

impl IntoRoutingKey for String {
    fn into_routing_key(self) -> Result<Option<RoutingKey>, BoxError> {
        Ok(RoutingKey::new(self))
    }
}

impl IntoRoutingKey for &str {
    fn into_routing_key(self) -> Result<Option<RoutingKey>, BoxError> {
        Ok(RoutingKey::new(self))
    }
}

impl<K: IntoRoutingKey> IntoRoutingKey for Option<K> {
    fn into_routing_key(self) -> Result<Option<RoutingKey>, BoxError> {
        match self {
            Some(key) => key.into_routing_key(),
            None => Ok(None),
        }
    }
}

impl<K, E> IntoRoutingKey for Result<K, E>
where
    K: IntoRoutingKey,
    E: Into<BoxError>,
{
    fn into_routing_key(self) -> Result<Option<RoutingKey>, BoxError> {
        match self {
            Ok(key) => key.into_routing_key(),
            Err(err) => Err(err.into()),
        }
    }
}

/// Resolver backed by a synchronous closure.
pub struct FnRoute<F>(F);

/// Build a resolver from a synchronous closure.
///
/// ```ignore
/// let route = route_fn(|req, _res| {
///     if req.path().starts_with("/foo/bar") { None } else { Some("my.custom.route") }
/// });
/// ```
pub fn route_fn<F, K>(f: F) -> FnRoute<F>
where
    F: Fn(&RequestHead, &ResponseHead) -> K + Send + Sync + 'static,
    K: IntoRoutingKey,
{
    FnRoute(f)
}

#[async_trait]
impl<F, K> RouteResolver for FnRoute<F>
where
    F: Fn(&RequestHead, &ResponseHead) -> K + Send + Sync + 'static,
    K: IntoRoutingKey,
{
    async fn resolve(
        &self,
        request: &RequestHead,
        response: &ResponseHead,
    ) -> Result<Option<RoutingKey>, BoxError> {
        (self.0)(request, response).into_routing_key()
    }
}

/// Resolver backed by a closure returning a future.
///
/// The closure receives owned snapshots so the future can outlive the call.
pub struct AsyncRoute<F>(F);

pub fn route_async<F, Fut, K>(f: F) -> AsyncRoute<F>
where
    F: Fn(RequestHead, ResponseHead) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = K> + Send + 'static,
    K: IntoRoutingKey,
{
    AsyncRoute(f)
}

#[async_trait]
impl<F, Fut, K> RouteResolver for AsyncRoute<F>
where
    F: Fn(RequestHead, ResponseHead) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = K> + Send + 'static,
    K: IntoRoutingKey,
{
    async fn resolve(
        &self,
        request: &RequestHead,
        response: &ResponseHead,
    ) -> Result<Option<RoutingKey>, BoxError> {
        (self.0)(request.clone(), response.clone())
            .await
            .into_routing_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HOST;
    use http::{HeaderValue, Method, StatusCode};
    use proptest::prelude::*;

    fn request(uri: &str, host: Option<&str>) -> RequestHead {
        let head = RequestHead::new(Method::GET, uri.parse().unwrap());
        match host {
            Some(host) => head.with_header(HOST, HeaderValue::from_str(host).unwrap()),
            None => head,
        }
    }

    fn ok() -> ResponseHead {
        ResponseHead::new(StatusCode::OK)
    }

    #[test]
    fn test_default_route_localhost() {
        let key = default_route(&request("/foo/bar", Some("localhost:7777")), &ok()).unwrap();
        assert_eq!(key.as_str(), "http.localhost");
    }

    #[test]
    fn test_default_route_reverses_labels() {
        let key = default_route(&request("/", Some("a.b.example.com")), &ok()).unwrap();
        assert_eq!(key.as_str(), "http.com.example.b.a");

        let key = default_route(&request("https://a.b.com/", None), &ok()).unwrap();
        assert_eq!(key.as_str(), "https.com.b.a");
    }

    #[test]
    fn test_default_route_without_host_fails() {
        assert_eq!(
            default_route(&request("/", None), &ok()),
            Err(RouteError::MissingHostname)
        );
    }

    #[test]
    fn test_empty_key_suppresses() {
        assert_eq!(RoutingKey::new(""), None);
        assert!("".into_routing_key().unwrap().is_none());
        assert!(None::<&str>.into_routing_key().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fn_route_filters() {
        let route = route_fn(|req: &RequestHead, _: &ResponseHead| {
            if req.path().starts_with("/foo/bar") {
                None
            } else {
                Some("my.custom.route")
            }
        });

        let suppressed = route.resolve(&request("/foo/bar/baz", None), &ok()).await;
        assert!(suppressed.unwrap().is_none());

        let routed = route.resolve(&request("/this/one/goes", None), &ok()).await;
        assert_eq!(routed.unwrap().unwrap().as_str(), "my.custom.route");
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_route_delegates_to_default() {
        let route = route_async(|req, res| async move {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            default_route(&req, &res)
        });

        let key = route
            .resolve(&request("/down/the/garden/path", Some("localhost")), &ok())
            .await
            .unwrap();
        assert_eq!(key.unwrap().as_str(), "http.localhost");
    }

    #[tokio::test]
    async fn test_resolver_error_propagates() {
        let err = DefaultRoute
            .resolve(&request("/", None), &ok())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), RouteError::MissingHostname.to_string());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every hostname label appears once, last label first, after the protocol.
        #[test]
        fn prop_default_route_reverses_every_label(
            labels in prop::collection::vec("[a-z][a-z0-9-]{0,10}", 1..6),
        ) {
            let host = labels.join(".");
            let key = default_route(&request("/", Some(&host)), &ok()).unwrap();

            let mut expected = vec!["http".to_string()];
            expected.extend(labels.iter().rev().cloned());
            prop_assert_eq!(key.as_str(), expected.join("."));
        }
    }
}
