use rustapi_hop::broker::topic::binding_matches;
use rustapi_hop::broker::PublishedMessage;
use serde_json::Value;

/// Matcher for published messages
///
/// Fields are addressed with JSON pointers into the decoded body, e.g.
/// `/request/path` or `/response/_headers/x-using-hop`.
#[derive(Debug, Clone, Default)]
pub struct MessageMatcher {
    pub(crate) exchange: Option<String>,
    pub(crate) binding: Option<String>,
    pub(crate) fields: Vec<(String, Value)>,
    pub(crate) present: Vec<String>,
    pub(crate) absent: Vec<String>,
}

impl MessageMatcher {
    /// Create a new matcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a specific exchange
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Match routing keys a queue bound with `binding` would receive
    pub fn binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    /// Match a body field against an exact value
    pub fn field(mut self, pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((pointer.into(), value.into()));
        self
    }

    /// Require a body field to be present
    pub fn has(mut self, pointer: impl Into<String>) -> Self {
        self.present.push(pointer.into());
        self
    }

    /// Require a body field to be absent
    pub fn lacks(mut self, pointer: impl Into<String>) -> Self {
        self.absent.push(pointer.into());
        self
    }

    /// Check if the matcher matches a message
    pub fn matches(&self, message: &PublishedMessage) -> bool {
        if let Some(exchange) = &self.exchange {
            if exchange != &message.exchange {
                return false;
            }
        }

        if let Some(binding) = &self.binding {
            if !binding_matches(binding, &message.routing_key) {
                return false;
            }
        }

        if self.fields.is_empty() && self.present.is_empty() && self.absent.is_empty() {
            return true;
        }

        let Ok(body) = message.json() else {
            return false;
        };

        self.fields
            .iter()
            .all(|(pointer, expected)| body.pointer(pointer) == Some(expected))
            && self.present.iter().all(|p| body.pointer(p).is_some())
            && self.absent.iter().all(|p| body.pointer(p).is_none())
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use rustapi_hop::envelope::MessageProperties;
    use serde_json::json;

    fn message(exchange: &str, routing_key: &str, body: Value) -> PublishedMessage {
        PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: serde_json::to_vec(&body).unwrap(),
            properties: MessageProperties::json(),
        }
    }

    #[test]
    fn test_field_pointers() {
        let msg = message(
            "amq.topic",
            "http.localhost",
            json!({"request": {"path": "/foo", "query": {"one": "1"}}, "response": {"statusCode": 200}}),
        );

        assert!(MessageMatcher::new()
            .binding("http.#")
            .field("/request/path", "/foo")
            .field("/request/query/one", "1")
            .field("/response/statusCode", 200)
            .lacks("/millis")
            .matches(&msg));
        assert!(!MessageMatcher::new().has("/millis").matches(&msg));
        assert!(!MessageMatcher::new().field("/request/path", "/bar").matches(&msg));
        assert!(!MessageMatcher::new().exchange("traffic").matches(&msg));
    }

    #[test]
    fn test_undecodable_body_fails_field_checks() {
        let mut msg = message("amq.topic", "http.localhost", json!({}));
        msg.payload = b"not json".to_vec();

        assert!(MessageMatcher::new().binding("#").matches(&msg));
        assert!(!MessageMatcher::new().has("/request").matches(&msg));
    }

    fn word_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-z]{1,8}").unwrap()
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("/[a-z]{3,8}(/[a-z0-9]{1,5})?").unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Empty matcher matches every message
        #[test]
        fn prop_empty_matcher_matches_all(
            exchange in word_strategy(),
            key in prop::collection::vec(word_strategy(), 1..5),
            path in path_strategy(),
        ) {
            let msg = message(&exchange, &key.join("."), json!({"request": {"path": path}}));
            prop_assert!(MessageMatcher::new().matches(&msg));
        }

        /// Criteria combine with AND logic
        #[test]
        fn prop_criteria_are_conjunctive(
            path in path_strategy(),
            other in path_strategy(),
            status in 100u16..600,
        ) {
            let msg = message(
                "amq.topic",
                "http.localhost",
                json!({"request": {"path": path}, "response": {"statusCode": status}}),
            );

            let matcher = MessageMatcher::new()
                .field("/request/path", path.clone())
                .field("/response/statusCode", status);
            prop_assert!(matcher.matches(&msg));

            let matcher = MessageMatcher::new()
                .field("/request/path", other.clone())
                .field("/response/statusCode", status);
            prop_assert_eq!(matcher.matches(&msg), other == path);
        }

        /// Binding prefix with `#` matches every key under it
        #[test]
        fn prop_binding_prefix(
            host in prop::collection::vec(word_strategy(), 1..4),
        ) {
            let key = format!("http.{}", host.join("."));
            let msg = message("amq.topic", &key, json!({}));
            prop_assert!(MessageMatcher::new().binding("http.#").matches(&msg));
            prop_assert!(!MessageMatcher::new().binding("https.#").matches(&msg));
        }
    }
}
