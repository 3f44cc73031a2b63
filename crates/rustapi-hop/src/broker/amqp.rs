//! `lapin` backed channel.

use super::{BrokerChannel, ExchangeKind, ExchangeSpec};
use crate::envelope::MessageProperties;
use crate::error::BrokerError;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection};
use std::sync::Arc;

/// An AMQP channel together with the connection it was opened on.
///
/// Holding the connection keeps it alive for as long as the interceptor
/// publishes; it is never closed from here.
pub struct AmqpChannel {
    channel: Channel,
    _connection: Arc<Connection>,
}

impl AmqpChannel {
    pub(crate) async fn open(
        connection: Arc<Connection>,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = connection.create_channel().await?;
        tracing::debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(Arc::new(Self {
            channel,
            _connection: connection,
        }))
    }
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Custom(kind) => lapin::ExchangeKind::Custom(kind.clone()),
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: exchange.durable,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(
                &exchange.name,
                (&exchange.kind).into(),
                options,
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        let properties = BasicProperties::default()
            .with_content_type(properties.content_type.clone().into())
            .with_content_encoding(properties.content_encoding.clone().into());

        // The returned confirmation is dropped: delivery is not tracked.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?;
        Ok(())
    }
}
