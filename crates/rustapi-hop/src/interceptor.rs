//! The publish sequence shared by every service a layer produces.

use crate::bootstrap::{self, ChannelHandle};
use crate::broker::BrokerSource;
use crate::config::{ErrorCallback, HopConfig};
use crate::envelope::{Envelope, MessageProperties};
use crate::error::{ConfigError, HopError};
use crate::head::{RequestHead, ResponseHead};
use crate::project::FieldProjector;
use crate::route::RouteResolver;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::Instrument;

/// What happened to a single publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The message was handed to the broker.
    Published,
    /// The resolver returned no routing key.
    Suppressed,
    /// The channel was not ready yet, so the message was dropped.
    Skipped,
}

pub(crate) struct Interceptor {
    channel: Arc<ChannelHandle>,
    exchange: String,
    route: Arc<dyn RouteResolver>,
    request: FieldProjector<RequestHead>,
    response: FieldProjector<ResponseHead>,
    properties: MessageProperties,
    wait_for_finish: bool,
    on_error: Option<ErrorCallback>,
    runtime: Handle,
}

impl Interceptor {
    /// Validate `config` and start the bootstrap in the background.
    pub(crate) fn start(source: BrokerSource, config: HopConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime =
            Handle::try_current().map_err(|err| ConfigError::NoRuntime(err.to_string()))?;

        let channel = Arc::new(ChannelHandle::new());
        bootstrap::spawn(
            &runtime,
            channel.clone(),
            source.into_pending(),
            config.exchange_spec(),
            config.on_error.clone(),
        );

        Ok(Self {
            request: config.request_projector(),
            response: config.response_projector(),
            channel,
            exchange: config.exchange,
            route: config.route,
            properties: MessageProperties::json(),
            wait_for_finish: config.wait_for_finish,
            on_error: config.on_error,
            runtime,
        })
    }

    pub(crate) fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub(crate) fn exchange(&self) -> &str {
        &self.exchange
    }

    pub(crate) fn wait_for_finish(&self) -> bool {
        self.wait_for_finish
    }

    /// Resolve, project, encode and publish one request.
    pub(crate) async fn publish(
        &self,
        request: &RequestHead,
        response: &ResponseHead,
    ) -> Result<PublishOutcome, HopError> {
        let key = self
            .route
            .resolve(request, response)
            .await
            .map_err(HopError::Resolve)?;
        let Some(key) = key else {
            tracing::trace!("No routing key, message suppressed");
            return Ok(PublishOutcome::Suppressed);
        };
        tracing::Span::current().record("routing_key", key.as_str());

        let millis = request
            .started_at()
            .map(|start| u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX));
        let envelope = Envelope::new(
            self.request.project(request),
            self.response.project(response),
            millis,
        );
        let payload = envelope.to_payload()?;

        let Some(channel) = self.channel.get() else {
            tracing::trace!("Channel not ready, message dropped");
            return Ok(PublishOutcome::Skipped);
        };

        let size = payload.len();
        channel
            .publish(&self.exchange, key.as_str(), payload, &self.properties)
            .await
            .map_err(HopError::Publish)?;
        tracing::debug!(bytes = size, "Message published");
        Ok(PublishOutcome::Published)
    }

    /// Run [`publish`](Self::publish) as a detached task.
    ///
    /// Errors end up in the log and the error observer.
    pub(crate) fn spawn_publish(self: &Arc<Self>, request: RequestHead, response: ResponseHead) {
        let this = Arc::clone(self);
        let span = tracing::debug_span!(
            "hop_publish",
            method = %request.method(),
            path = request.path(),
            status = response.status().as_u16(),
            routing_key = tracing::field::Empty,
        );

        self.runtime.spawn(
            async move {
                if let Err(err) = this.publish(&request, &response).await {
                    tracing::warn!(error = %err, "Failed to publish request summary");
                    if let Some(callback) = &this.on_error {
                        callback(&err);
                    }
                }
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::head::{Attributes, RequestStart};
    use crate::route::{route_async, route_fn};
    use http::header::HOST;
    use http::{HeaderValue, Method, StatusCode};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn request(path: &str) -> RequestHead {
        RequestHead::new(Method::GET, path.parse().unwrap())
            .with_header(HOST, HeaderValue::from_static("localhost"))
    }

    fn ok() -> ResponseHead {
        ResponseHead::new(StatusCode::OK)
    }

    async fn ready(broker: &MemoryBroker, config: HopConfig) -> Interceptor {
        let interceptor = Interceptor::start(broker.source(), config).unwrap();
        assert!(interceptor.channel().ready().await);
        interceptor
    }

    #[tokio::test]
    async fn test_publish_with_default_route() {
        let broker = MemoryBroker::new();
        let interceptor = ready(&broker, HopConfig::new()).await;

        let outcome = interceptor.publish(&request("/foo?a=1"), &ok()).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published);

        let messages = broker.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].exchange, "amq.topic");
        assert_eq!(messages[0].routing_key, "http.localhost");
        assert_eq!(messages[0].properties, MessageProperties::json());

        let envelope = messages[0].envelope().unwrap();
        assert_eq!(envelope.request["path"], "/foo");
        assert_eq!(envelope.request["query"]["a"], "1");
        assert_eq!(envelope.response["statusCode"], 200);
        assert!(envelope.millis.is_none());
    }

    #[tokio::test]
    async fn test_suppressed_route_publishes_nothing() {
        let broker = MemoryBroker::new();
        let config = HopConfig::new().route(route_fn(|req: &RequestHead, _: &ResponseHead| {
            if req.path().starts_with("/foo/bar") {
                None
            } else {
                Some("my.custom.route")
            }
        }));
        let interceptor = ready(&broker, config).await;

        assert_eq!(
            interceptor.publish(&request("/foo/bar"), &ok()).await.unwrap(),
            PublishOutcome::Suppressed
        );
        assert_eq!(
            interceptor.publish(&request("/foo"), &ok()).await.unwrap(),
            PublishOutcome::Published
        );

        let messages = broker.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].routing_key, "my.custom.route");
    }

    #[tokio::test]
    async fn test_unready_channel_skips() {
        let broker = MemoryBroker::new();
        let (source, _gate) = broker.gated_source();
        let interceptor = Interceptor::start(source, HopConfig::new()).unwrap();

        assert_eq!(
            interceptor.publish(&request("/"), &ok()).await.unwrap(),
            PublishOutcome::Skipped
        );
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_resolver_error_is_returned() {
        let broker = MemoryBroker::new();
        let interceptor = ready(&broker, HopConfig::new()).await;

        // no Host header and no authority: the default route has nothing to work with
        let head = RequestHead::new(Method::GET, "/".parse().unwrap());
        let err = interceptor.publish(&head, &ok()).await.unwrap_err();
        assert!(matches!(err, HopError::Resolve(_)));
        assert!(broker.messages().is_empty());
    }

    #[tokio::test]
    async fn test_extra_fields_and_millis() {
        let broker = MemoryBroker::new();
        let interceptor = ready(&broker, HopConfig::new().request_fields(["drinking"])).await;

        let head = request("/")
            .with_attributes(Attributes::new().with("drinking", vec!["Coffee", "Water"]))
            .with_start(Instant::now());
        interceptor.publish(&head, &ok()).await.unwrap();

        let envelope = broker.messages()[0].envelope().unwrap();
        assert_eq!(envelope.request["drinking"], serde_json::json!(["Coffee", "Water"]));
        let keys: Vec<_> = envelope.request.keys().cloned().collect();
        assert_eq!(keys[0], "drinking");
        assert!(envelope.millis.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_publish_with_slow_resolver() {
        let broker = MemoryBroker::new();
        let config = HopConfig::new().route(route_async(|req: RequestHead, res: ResponseHead| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            crate::route::default_route(&req, &res)
        }));
        let interceptor = Arc::new(ready(&broker, config).await);

        let mut http_req = http::Request::new(());
        *http_req.uri_mut() = "/slow".parse().unwrap();
        http_req
            .headers_mut()
            .insert(HOST, HeaderValue::from_static("localhost"));
        http_req.extensions_mut().insert(RequestStart(Instant::now()));

        interceptor.spawn_publish(RequestHead::from_request(&http_req), ok());

        let found = broker
            .wait_for("amq.topic", "http.#", 1, Duration::from_secs(2))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].envelope().unwrap().request["path"], "/slow");
    }

    #[tokio::test]
    async fn test_publish_failure_reaches_observer() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let broker = MemoryBroker::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let config = HopConfig::new().on_error(move |err| sink.lock().unwrap().push(err.to_string()));
        let interceptor = Arc::new(ready(&broker, config).await);
        broker.fail_publishes(true);

        interceptor.spawn_publish(request("/"), ok());
        for _ in 0..50 {
            if !errors.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Publish failed"));
    }

    #[test]
    fn test_start_requires_runtime() {
        let result = Interceptor::start(MemoryBroker::new().source(), HopConfig::new());
        assert!(matches!(result, Err(ConfigError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_empty_exchange() {
        let result = Interceptor::start(MemoryBroker::new().source(), HopConfig::new().exchange(""));
        assert!(matches!(result, Err(ConfigError::EmptyExchange)));
    }
}
