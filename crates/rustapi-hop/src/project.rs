//! Field projection.
//!
//! Each published message carries a `request` and a `response` mapping built
//! from an ordered list of field names. The names are resolved to accessors
//! once, when the layer is built; projecting a request then just runs the
//! accessors in order and skips the ones that yield nothing.

use crate::head::{Attributes, RequestHead, ResponseHead};
use http::{HeaderMap, Version};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Request fields included in every message.
pub const REQUEST_BASELINE: &[&str] = &[
    "method",
    "originalUrl",
    "httpVersion",
    "hostname",
    "baseUrl",
    "path",
    "url",
    "params",
    "query",
    "cookies",
    "signedCookies",
    "ip",
    "ips",
    "headers",
];

/// Response fields included in every message.
pub const RESPONSE_BASELINE: &[&str] = &["statusCode", "statusMessage", "_headers"];

/// User-registered accessor for a named field.
pub type FieldAccessor<T> = Arc<dyn Fn(&T) -> Option<Value> + Send + Sync>;

type Builtin<T> = fn(&T) -> Option<Value>;

/// Something the projector can read named fields from.
pub trait Projectable {
    /// Accessor for a field the type knows natively.
    fn builtin(name: &str) -> Option<Builtin<Self>>;

    /// Values attached by upstream code.
    fn attributes(&self) -> &Attributes;
}

enum Accessor<T> {
    Custom(FieldAccessor<T>),
    Builtin(Builtin<T>),
    AttributeOnly,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Custom(f) => Self::Custom(f.clone()),
            Self::Builtin(f) => Self::Builtin(*f),
            Self::AttributeOnly => Self::AttributeOnly,
        }
    }
}

/// Ordered, de-duplicated set of fields with their accessors.
pub struct FieldProjector<T> {
    fields: Vec<(String, Accessor<T>)>,
}

impl<T> Clone for FieldProjector<T> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
        }
    }
}

impl<T: Projectable> FieldProjector<T> {
    /// Resolve `extra` followed by `baseline` into accessors.
    ///
    /// A name listed twice keeps its first position.
    pub fn new<'a>(
        extra: impl IntoIterator<Item = &'a str>,
        baseline: &[&'a str],
        custom: &HashMap<String, FieldAccessor<T>>,
    ) -> Self {
        let mut fields: Vec<(String, Accessor<T>)> = Vec::new();
        for name in extra.into_iter().chain(baseline.iter().copied()) {
            if fields.iter().any(|(existing, _)| existing == name) {
                continue;
            }
            let accessor = match (custom.get(name), T::builtin(name)) {
                (Some(f), _) => Accessor::Custom(f.clone()),
                (None, Some(f)) => Accessor::Builtin(f),
                (None, None) => Accessor::AttributeOnly,
            };
            fields.push((name.to_string(), accessor));
        }
        Self { fields }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Copy the selected fields of `target` into a new mapping.
    ///
    /// Precedence per name: registered accessor, then an attribute of the
    /// same name, then the built-in accessor.
    pub fn project(&self, target: &T) -> Map<String, Value> {
        let attributes = target.attributes();
        let mut out = Map::with_capacity(self.fields.len());
        for (name, accessor) in &self.fields {
            let value = match accessor {
                Accessor::Custom(f) => f(target),
                Accessor::Builtin(f) => attributes.get(name).cloned().or_else(|| f(target)),
                Accessor::AttributeOnly => attributes.get(name).cloned(),
            };
            if let Some(value) = value {
                out.insert(name.clone(), value);
            }
        }
        out
    }
}

impl<T> fmt::Debug for FieldProjector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Projectable for RequestHead {
    fn builtin(name: &str) -> Option<Builtin<Self>> {
        let accessor: Builtin<Self> = match name {
            "method" => |r| Some(r.method().as_str().into()),
            "originalUrl" | "url" => |r| Some(r.original_url().into()),
            "httpVersion" => |r| Some(http_version(r.version()).into()),
            "hostname" => |r| r.hostname().map(Value::from),
            "baseUrl" => |_| Some(Value::from("")),
            "path" => |r| Some(r.path().into()),
            "params" => |_| Some(Value::Object(Map::new())),
            "query" => |r| Some(parse_query(r.uri().query())),
            "cookies" => |r| parse_cookies(r.headers()),
            "ip" => |r| r.remote_addr().map(|addr| addr.ip().to_string().into()),
            // Forwarded addresses are only trusted when the config says so.
            "ips" => |_| Some(Value::Array(Vec::new())),
            "headers" => |r| Some(header_map(r.headers())),
            _ => return None,
        };
        Some(accessor)
    }

    fn attributes(&self) -> &Attributes {
        RequestHead::attributes(self)
    }
}

impl Projectable for ResponseHead {
    fn builtin(name: &str) -> Option<Builtin<Self>> {
        let accessor: Builtin<Self> = match name {
            "statusCode" => |r| Some(r.status().as_u16().into()),
            "statusMessage" => |r| Some(r.status().canonical_reason().unwrap_or("").into()),
            "_headers" => |r| Some(header_map(r.headers())),
            _ => return None,
        };
        Some(accessor)
    }

    fn attributes(&self) -> &Attributes {
        ResponseHead::attributes(self)
    }
}

fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

/// Lower-cased header names; repeated headers are joined with `", "`.
fn header_map(headers: &HeaderMap) -> Value {
    let mut out = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        out.insert(name.as_str().to_string(), Value::String(joined));
    }
    Value::Object(out)
}

/// Repeated keys collect into an array, matching the usual query-string parsers.
fn parse_query(query: Option<&str>) -> Value {
    let pairs: Vec<(String, String)> = query
        .and_then(|q| serde_urlencoded::from_str(q).ok())
        .unwrap_or_default();

    let mut out = Map::new();
    for (key, value) in pairs {
        match out.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                out.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(out)
}

fn parse_cookies(headers: &HeaderMap) -> Option<Value> {
    let mut out = Map::new();
    let mut seen = false;
    for header in headers.get_all(http::header::COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        seen = true;
        for cookie in cookie::Cookie::split_parse(header).flatten() {
            out.insert(cookie.name().to_string(), cookie.value().into());
        }
    }
    seen.then_some(Value::Object(out))
}

/// Addresses from `X-Forwarded-For`, client first.
pub(crate) fn forwarded_ips(head: &RequestHead) -> Option<Value> {
    let ips = head
        .headers()
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(Value::from)
        .collect::<Vec<_>>();
    Some(Value::Array(ips))
}
