//! Configuration for the HopLayer middleware.
//!
//! This module provides the `HopConfig` builder and, behind the `config`
//! feature, `HopEnv` for reading the same settings from `HOP_*` environment
//! variables.

use crate::broker::{ExchangeKind, ExchangeSpec};
use crate::error::{ConfigError, HopError};
use crate::head::{RequestHead, ResponseHead};
use crate::project::{
    forwarded_ips, FieldAccessor, FieldProjector, REQUEST_BASELINE, RESPONSE_BASELINE,
};
use crate::route::{DefaultRoute, RouteResolver};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked for every error raised after construction.
pub type ErrorCallback = Arc<dyn Fn(&HopError) + Send + Sync>;

/// Exchange every message goes to unless configured otherwise.
pub const DEFAULT_EXCHANGE: &str = "amq.topic";

/// Configuration for the HopLayer middleware.
///
/// Use the builder pattern to customize behavior:
///
/// ```ignore
/// use rustapi_hop::{HopConfig, route_fn};
///
/// let config = HopConfig::new()
///     .exchange("traffic")
///     .request_fields(["drinking", "eating"])
///     .route(route_fn(|req, _res| {
///         (req.path() != "/health").then_some("my.custom.route")
///     }))
///     .wait_for_finish(true);
/// ```
#[derive(Clone)]
pub struct HopConfig {
    /// Exchange name. Default: "amq.topic".
    pub(crate) exchange: String,

    /// Exchange type. Default: topic.
    pub(crate) exchange_kind: ExchangeKind,

    /// Whether the exchange is declared durable. Default: true.
    pub(crate) durable: bool,

    /// Routing key strategy. Default: [`DefaultRoute`].
    pub(crate) route: Arc<dyn RouteResolver>,

    /// Extra request fields, placed before the baseline.
    pub(crate) request_fields: Vec<String>,

    /// Extra response fields, placed before the baseline.
    pub(crate) response_fields: Vec<String>,

    pub(crate) request_accessors: HashMap<String, FieldAccessor<RequestHead>>,

    pub(crate) response_accessors: HashMap<String, FieldAccessor<ResponseHead>>,

    /// Publish after the response body has been produced. Default: false.
    pub(crate) wait_for_finish: bool,

    /// Fill `ips` from `X-Forwarded-For`. Default: false.
    pub(crate) trust_proxy: bool,

    /// Observer for bootstrap and publish errors (optional).
    pub(crate) on_error: Option<ErrorCallback>,
}

impl Default for HopConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HopConfig {
    /// Create a new configuration with default values.
    ///
    /// Defaults:
    /// - Exchange: "amq.topic", type topic, durable
    /// - Route: `<protocol>.<reversed hostname>`
    /// - Baseline request and response fields only
    /// - Publish as soon as the request arrives
    pub fn new() -> Self {
        Self {
            exchange: DEFAULT_EXCHANGE.to_string(),
            exchange_kind: ExchangeKind::Topic,
            durable: true,
            route: Arc::new(DefaultRoute),
            request_fields: Vec::new(),
            response_fields: Vec::new(),
            request_accessors: HashMap::new(),
            response_accessors: HashMap::new(),
            wait_for_finish: false,
            trust_proxy: false,
            on_error: None,
        }
    }

    /// Set the exchange name.
    pub fn exchange(mut self, name: impl Into<String>) -> Self {
        self.exchange = name.into();
        self
    }

    /// Set the exchange type, e.g. `"topic"` or `"fanout"`.
    pub fn exchange_type(mut self, kind: impl Into<ExchangeKind>) -> Self {
        self.exchange_kind = kind.into();
        self
    }

    /// Declare the exchange durable or transient.
    ///
    /// The built-in `amq.*` exchanges are durable; declaring one of them
    /// transient fails the bootstrap.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Set the routing key strategy.
    pub fn route<R: RouteResolver>(mut self, route: R) -> Self {
        self.route = Arc::new(route);
        self
    }

    /// Add request fields to every message.
    ///
    /// The names are placed before the baseline, never replacing it.
    pub fn request_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.request_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add response fields to every message.
    pub fn response_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.response_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Register how a request field is read.
    ///
    /// Takes precedence over attributes and built-in fields of the same name.
    /// The field is selected as well, so there is no need to also list it in
    /// [`request_fields`](Self::request_fields).
    pub fn request_accessor<F>(mut self, name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&RequestHead) -> Option<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.request_fields.push(name.clone());
        self.request_accessors.insert(name, Arc::new(accessor));
        self
    }

    /// Register how a response field is read.
    pub fn response_accessor<F>(mut self, name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&ResponseHead) -> Option<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.response_fields.push(name.clone());
        self.response_accessors.insert(name, Arc::new(accessor));
        self
    }

    /// Publish once the response has been fully produced, with `millis` set.
    pub fn wait_for_finish(mut self, wait: bool) -> Self {
        self.wait_for_finish = wait;
        self
    }

    /// Read the `ips` request field from `X-Forwarded-For`.
    ///
    /// Only enable behind a proxy that sets the header, otherwise clients
    /// choose what ends up in the published message.
    pub fn trust_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    /// Set a callback for bootstrap and publish errors.
    ///
    /// Errors are always logged; the callback is an additional hook and is
    /// invoked from the background task that hit the error.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HopError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.is_empty() {
            return Err(ConfigError::EmptyExchange);
        }
        Ok(())
    }

    pub(crate) fn exchange_spec(&self) -> ExchangeSpec {
        ExchangeSpec {
            name: self.exchange.clone(),
            kind: self.exchange_kind.clone(),
            durable: self.durable,
        }
    }

    pub(crate) fn request_projector(&self) -> FieldProjector<RequestHead> {
        let mut accessors = self.request_accessors.clone();
        if self.trust_proxy {
            let trusted: FieldAccessor<RequestHead> = Arc::new(forwarded_ips);
            accessors.entry("ips".to_string()).or_insert(trusted);
        }
        FieldProjector::new(
            self.request_fields.iter().map(String::as_str),
            REQUEST_BASELINE,
            &accessors,
        )
    }

    pub(crate) fn response_projector(&self) -> FieldProjector<ResponseHead> {
        FieldProjector::new(
            self.response_fields.iter().map(String::as_str),
            RESPONSE_BASELINE,
            &self.response_accessors,
        )
    }
}

impl fmt::Debug for HopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut request_accessors: Vec<_> = self.request_accessors.keys().collect();
        request_accessors.sort();
        let mut response_accessors: Vec<_> = self.response_accessors.keys().collect();
        response_accessors.sort();

        f.debug_struct("HopConfig")
            .field("exchange", &self.exchange)
            .field("exchange_kind", &self.exchange_kind)
            .field("durable", &self.durable)
            .field("request_fields", &self.request_fields)
            .field("response_fields", &self.response_fields)
            .field("request_accessors", &request_accessors)
            .field("response_accessors", &response_accessors)
            .field("wait_for_finish", &self.wait_for_finish)
            .field("trust_proxy", &self.trust_proxy)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "config")]
pub use env::{load_dotenv, HopEnv};

#[cfg(feature = "config")]
mod env {
    use super::HopConfig;
    use crate::broker::BrokerSource;
    use crate::error::ConfigError;
    use serde::Deserialize;

    /// Settings read from `HOP_*` environment variables.
    ///
    /// | Variable               | Field             |
    /// |------------------------|-------------------|
    /// | `HOP_AMQP_URL`         | broker URL        |
    /// | `HOP_EXCHANGE`         | exchange name     |
    /// | `HOP_EXCHANGE_TYPE`    | exchange type     |
    /// | `HOP_WAIT_FOR_FINISH`  | deferred mode     |
    /// | `HOP_REQUEST_FIELDS`   | comma separated   |
    /// | `HOP_RESPONSE_FIELDS`  | comma separated   |
    /// | `HOP_TRUST_PROXY`      | forwarded `ips`   |
    ///
    /// Unset variables leave the corresponding [`HopConfig`] value untouched.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
    pub struct HopEnv {
        pub amqp_url: Option<String>,
        pub exchange: Option<String>,
        pub exchange_type: Option<String>,
        pub wait_for_finish: Option<bool>,
        pub request_fields: Option<Vec<String>>,
        pub response_fields: Option<Vec<String>>,
        pub trust_proxy: Option<bool>,
    }

    impl HopEnv {
        pub const PREFIX: &'static str = "HOP_";

        /// Read the process environment.
        pub fn from_env() -> Result<Self, ConfigError> {
            envy::prefixed(Self::PREFIX)
                .from_env::<Self>()
                .map_err(ConfigError::from)
        }

        /// Read from explicit `(name, value)` pairs, names including the prefix.
        pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
        where
            I: IntoIterator<Item = (String, String)>,
        {
            envy::prefixed(Self::PREFIX)
                .from_iter::<_, Self>(vars)
                .map_err(ConfigError::from)
        }

        /// Overlay the values that were set onto `config`.
        pub fn apply(&self, mut config: HopConfig) -> HopConfig {
            if let Some(exchange) = &self.exchange {
                config = config.exchange(exchange.clone());
            }
            if let Some(kind) = &self.exchange_type {
                config = config.exchange_type(kind.as_str());
            }
            if let Some(wait) = self.wait_for_finish {
                config = config.wait_for_finish(wait);
            }
            if let Some(fields) = &self.request_fields {
                config = config.request_fields(fields.iter().map(|f| f.trim()));
            }
            if let Some(fields) = &self.response_fields {
                config = config.response_fields(fields.iter().map(|f| f.trim()));
            }
            if let Some(trust) = self.trust_proxy {
                config = config.trust_proxy(trust);
            }
            config
        }

        /// The broker to connect to, the local default when no URL is set.
        pub fn source(&self) -> Result<BrokerSource, ConfigError> {
            match &self.amqp_url {
                Some(url) => BrokerSource::url(url),
                None => Ok(BrokerSource::local()),
            }
        }
    }

    /// Load environment variables from a `.env` file, if present.
    ///
    /// Existing variables take precedence over the file.
    pub fn load_dotenv() {
        let _ = dotenvy::dotenv();
    }
}
