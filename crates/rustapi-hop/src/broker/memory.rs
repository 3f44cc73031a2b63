//! In-memory broker that records declarations and messages.

use super::topic::binding_matches;
use super::{BrokerChannel, BrokerSource, ExchangeSpec};
use crate::envelope::{Envelope, MessageProperties};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// A message captured by [`MemoryBroker`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub properties: MessageProperties,
}

impl PublishedMessage {
    /// Decode the payload.
    pub fn envelope(&self) -> serde_json::Result<Envelope> {
        Envelope::from_payload(&self.payload)
    }

    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    channels_opened: usize,
    declarations: Vec<ExchangeSpec>,
    exchanges: HashMap<String, ExchangeSpec>,
    messages: Vec<PublishedMessage>,
    fail_publishes: bool,
}

/// In-memory broker (not persistent, for testing/dev).
///
/// A source handed out by [`MemoryBroker::source`] counts as one opened
/// channel once the bootstrap awaits it; all of them share the same exchanges and message log. Exchanges
/// behave like a real broker's: re-declaring one with a different kind or
/// durability fails, and publishing to an undeclared one is an error.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
    published: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose channel is available immediately.
    pub fn source(&self) -> BrokerSource {
        let broker = self.clone();
        BrokerSource::pending_channel(async move {
            let channel: Arc<dyn BrokerChannel> = Arc::new(broker.open_channel());
            Ok::<_, BrokerError>(channel)
        })
    }

    /// A source whose channel only opens once the returned sender fires.
    ///
    /// Dropping the sender without sending fails the bootstrap.
    pub fn gated_source(&self) -> (BrokerSource, oneshot::Sender<()>) {
        let (open_tx, open_rx) = oneshot::channel();
        let broker = self.clone();
        let source = BrokerSource::pending_channel(async move {
            open_rx
                .await
                .map_err(|_| BrokerError::Unavailable("connection abandoned".to_string()))?;
            let channel: Arc<dyn BrokerChannel> = Arc::new(broker.open_channel());
            Ok::<_, BrokerError>(channel)
        });
        (source, open_tx)
    }

    fn open_channel(&self) -> MemoryChannel {
        if let Ok(mut state) = self.state.lock() {
            state.channels_opened += 1;
        }
        MemoryChannel {
            broker: self.clone(),
        }
    }

    /// Declare an exchange up front, as another client would.
    pub fn declare(&self, exchange: ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.lock()?;
        Self::declare_locked(&mut state, exchange)
    }

    /// Make every subsequent publish fail.
    pub fn fail_publishes(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_publishes = fail;
        }
    }

    pub fn channels_opened(&self) -> usize {
        self.state.lock().map(|s| s.channels_opened).unwrap_or_default()
    }

    /// Every successful declaration, in order.
    pub fn declarations(&self) -> Vec<ExchangeSpec> {
        self.state
            .lock()
            .map(|s| s.declarations.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// Messages a queue bound to `exchange` with `binding` would receive.
    pub fn messages_matching(&self, exchange: &str, binding: &str) -> Vec<PublishedMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.exchange == exchange && binding_matches(binding, &m.routing_key))
            .collect()
    }

    /// Wait until at least `count` messages match, or `timeout` elapses.
    ///
    /// Returns whatever matched at that point.
    pub async fn wait_for(
        &self,
        exchange: &str,
        binding: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<PublishedMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let matching = self.messages_matching(exchange, binding);
            if matching.len() >= count {
                return matching;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.messages_matching(exchange, binding);
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::Unavailable("Lock poisoned".to_string()))
    }

    fn declare_locked(state: &mut MemoryState, exchange: ExchangeSpec) -> Result<(), BrokerError> {
        if let Some(existing) = state.exchanges.get(&exchange.name) {
            if existing.kind != exchange.kind || existing.durable != exchange.durable {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent arg for exchange '{}': declared {} (durable={}), requested {} (durable={})",
                    exchange.name, existing.kind, existing.durable, exchange.kind, exchange.durable
                )));
            }
        }
        state
            .exchanges
            .insert(exchange.name.clone(), exchange.clone());
        state.declarations.push(exchange);
        Ok(())
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let mut state = self.broker.lock()?;
        MemoryBroker::declare_locked(&mut state, exchange.clone())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.broker.lock()?;
            if state.fail_publishes {
                return Err(BrokerError::Unavailable("publishing disabled".to_string()));
            }
            if !state.exchanges.contains_key(exchange) {
                return Err(BrokerError::PreconditionFailed(format!(
                    "no exchange '{exchange}'"
                )));
            }
            state.messages.push(PublishedMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload,
                properties: properties.clone(),
            });
        }
        self.broker.published.notify_waiters();
        Ok(())
    }
}
