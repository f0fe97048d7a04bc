use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};

use super::{ChannelError, Delivery, EventChannel, Subscription};

/// Offsets are committed manually, after the caller has applied the effect.
pub struct KafkaChannel {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
}

fn classify(err: KafkaError) -> ChannelError {
    let transient = matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::BrokerNotAvailable
        )
    );
    if transient {
        ChannelError::Unavailable(err.to_string())
    } else {
        ChannelError::Rejected(err.to_string())
    }
}

impl KafkaChannel {
    pub fn new(brokers: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| ChannelError::Protocol(format!("producer config: {e}")))?;
        tracing::info!(brokers, "kafka producer created");
        Ok(Self {
            producer,
            brokers: brokers.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl EventChannel for KafkaChannel {
    async fn publish(&self, topic: &str, key: &str, payload: Bytes) -> Result<(), ChannelError> {
        let record = FutureRecord::to(topic).payload(payload.as_ref()).key(key);
        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(topic, key, partition, offset, "event published");
                Ok(())
            }
            Err((e, _)) => Err(classify(e)),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        let brokers = self.brokers.clone();
        let topic_name = topic.to_string();
        let group = group.to_string();
        let timeout = self.timeout;

        // Consumer creation and the metadata probe block on librdkafka.
        let consumer = tokio::task::spawn_blocking(move || -> Result<StreamConsumer, ChannelError> {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| ChannelError::Protocol(format!("consumer config: {e}")))?;
            // Subscribing never talks to the broker; the metadata fetch does,
            // which is what tells us the channel is reachable.
            consumer
                .fetch_metadata(Some(&topic_name), Timeout::After(timeout))
                .map_err(|e| ChannelError::Unavailable(e.to_string()))?;
            consumer.subscribe(&[&topic_name]).map_err(classify)?;
            Ok(consumer)
        })
        .await
        .map_err(|e| ChannelError::Protocol(format!("subscribe task: {e}")))??;

        Ok(Box::new(KafkaSubscription { consumer }))
    }

    async fn shutdown(&self) {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout))).await;
        match flushed {
            Ok(Ok(())) => tracing::info!("kafka producer flushed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "kafka producer flush failed"),
            Err(e) => tracing::warn!(error = %e, "kafka flush task failed"),
        }
    }
}

struct KafkaSubscription {
    consumer: StreamConsumer,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self, timeout: Duration) -> Result<Option<Delivery>, ChannelError> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(classify(e)),
            Ok(Ok(message)) => message,
        };
        Ok(Some(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: Bytes::copy_from_slice(message.payload().unwrap_or_default()),
        }))
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &delivery.topic,
            delivery.partition,
            Offset::Offset(delivery.offset + 1),
        )
        .map_err(classify)?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(classify)
    }
}
