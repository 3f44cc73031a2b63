use super::matcher::MessageMatcher;
use rustapi_hop::broker::PublishedMessage;

/// An expectation on published messages
#[derive(Debug, Clone)]
pub struct Expectation {
    pub(crate) matcher: MessageMatcher,
    pub(crate) times: Times,
}

impl Expectation {
    /// Create a new expectation
    pub fn new(matcher: MessageMatcher) -> Self {
        Self {
            matcher,
            times: Times::Once,
        }
    }

    /// Expect exactly one matching message
    pub fn once(mut self) -> Self {
        self.times = Times::Once;
        self
    }

    /// Expect exactly n matching messages
    pub fn times(mut self, n: usize) -> Self {
        self.times = Times::Exactly(n);
        self
    }

    /// Expect at least one matching message
    pub fn at_least_once(mut self) -> Self {
        self.times = Times::AtLeast(1);
        self
    }

    /// Expect no matching message
    pub fn never(mut self) -> Self {
        self.times = Times::Exactly(0);
        self
    }

    /// Number of `messages` the matcher accepts
    pub fn count(&self, messages: &[PublishedMessage]) -> usize {
        messages.iter().filter(|m| self.matcher.matches(m)).count()
    }

    /// Panic unless the number of matching messages satisfies the expectation
    pub fn verify(&self, messages: &[PublishedMessage]) {
        let count = self.count(messages);
        assert!(
            self.times.accepts(count),
            "Expectation {:?} expected {}, got {} of {} messages",
            self.matcher,
            self.times,
            count,
            messages.len()
        );
    }
}

/// Define how many times an expectation should be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Times {
    Once,
    Exactly(usize),
    AtLeast(usize),
    AtMost(usize),
    Any,
}

impl Times {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Times::Once => count == 1,
            Times::Exactly(n) => count == n,
            Times::AtLeast(n) => count >= n,
            Times::AtMost(n) => count <= n,
            Times::Any => true,
        }
    }
}

impl std::fmt::Display for Times {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Times::Once => write!(f, "1 message"),
            Times::Exactly(n) => write!(f, "{} messages", n),
            Times::AtLeast(n) => write!(f, "at least {} messages", n),
            Times::AtMost(n) => write!(f, "at most {} messages", n),
            Times::Any => write!(f, "any number of messages"),
        }
    }
}

/// Verify every expectation against the same message log
pub fn verify_all(expectations: &[Expectation], messages: &[PublishedMessage]) {
    for expectation in expectations {
        expectation.verify(messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustapi_hop::envelope::MessageProperties;

    fn message(routing_key: &str) -> PublishedMessage {
        PublishedMessage {
            exchange: "amq.topic".to_string(),
            routing_key: routing_key.to_string(),
            payload: b"{}".to_vec(),
            properties: MessageProperties::json(),
        }
    }

    #[test]
    fn test_times_accepts() {
        assert!(Times::Once.accepts(1));
        assert!(!Times::Once.accepts(2));
        assert!(Times::AtLeast(2).accepts(3));
        assert!(!Times::AtMost(2).accepts(3));
        assert!(Times::Any.accepts(0));
    }

    #[test]
    fn test_verify_counts_matching_messages() {
        let messages = vec![message("http.localhost"), message("my.custom.route")];

        verify_all(
            &[
                Expectation::new(MessageMatcher::new().binding("http.#")).once(),
                Expectation::new(MessageMatcher::new().binding("#")).times(2),
                Expectation::new(MessageMatcher::new().binding("https.#")).never(),
            ],
            &messages,
        );
    }

    #[test]
    #[should_panic(expected = "expected 1 message, got 0")]
    fn test_verify_panics_on_mismatch() {
        Expectation::new(MessageMatcher::new().binding("https.#")).verify(&[message("http.a")]);
    }
}
