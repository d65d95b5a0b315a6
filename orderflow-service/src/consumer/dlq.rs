//! Dead-letter publisher (Kafka).
//!
//! Fire-and-forget publication of poisoned messages to the DLQ topic.
//! The original payload, key and headers are preserved; a `DLQ REASON`
//! header carries the classification string.

use rdkafka::message::{Header, Headers, Message, OwnedHeaders, OwnedMessage};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::sync::atomic::Ordering;
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::metrics;

pub struct DlqPublisher {
    topic: String,
    producer: FutureProducer,
    delivery_tx: Mutex<Option<mpsc::Sender<DeliveryFuture>>>,
    reaper: Mutex<Option<thread::JoinHandle<()>>>,
}

impl DlqPublisher {
    pub fn new(config: &KafkaConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", "orderflow-dlq")
            .set("acks", "all")
            .set("linger.ms", "5")
            .create()?;

        let (tx, rx) = mpsc::channel::<DeliveryFuture>();
        let reaper = thread::Builder::new()
            .name("dlq-reaper".into())
            .spawn(move || delivery_loop(rx))?;

        Ok(Self {
            topic: config.dlq_topic.clone(),
            producer,
            delivery_tx: Mutex::new(Some(tx)),
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Publish the original message bytes with a `DLQ REASON` header appended.
    ///
    /// Failures are logged and counted; they never influence how the
    /// originating message's offset is handled.
    pub fn publish(&self, msg: &OwnedMessage, reason: &str) {
        let mut headers = OwnedHeaders::new();
        if let Some(original) = msg.headers() {
            for header in original.iter() {
                headers = headers.insert(header);
            }
        }
        headers = headers.insert(Header {
            key: "DLQ REASON",
            value: Some(reason.as_bytes()),
        });

        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&self.topic).headers(headers);
        if let Some(key) = msg.key() {
            record = record.key(key);
        }
        if let Some(payload) = msg.payload() {
            record = record.payload(payload);
        }

        match self.producer.send_result(record) {
            Ok(delivery) => {
                metrics::DLQ_MESSAGES.fetch_add(1, Ordering::Relaxed);
                let guard = match self.delivery_tx.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                match guard.as_ref() {
                    Some(tx) => {
                        if tx.send(delivery).is_err() {
                            metrics::DLQ_PUBLISH_DROPPED.fetch_add(1, Ordering::Relaxed);
                            warn!("dlq delivery reaper unavailable");
                        }
                    }
                    None => {
                        metrics::DLQ_PUBLISH_DROPPED.fetch_add(1, Ordering::Relaxed);
                        warn!("dlq publisher already closed");
                    }
                }
            }
            Err((err, _)) => {
                metrics::DLQ_PUBLISH_DROPPED.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, key = %lossy_key(msg), "failed to produce message to dlq");
            }
        }
    }

    /// Close after all workers have drained: stop the reaper and flush
    /// whatever is still queued inside the producer.
    pub fn close(&self) {
        let tx = match self.delivery_tx.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(tx);

        let reaper = match self.reaper.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = reaper {
            let _ = handle.join();
        }

        if let Err(err) = self.producer.flush(Duration::from_secs(5)) {
            warn!(error = %err, "dlq producer flush failed");
        }
    }
}

/// Drain delivery reports and log the outcome of each DLQ send.
fn delivery_loop(rx: mpsc::Receiver<DeliveryFuture>) {
    for delivery in rx {
        match futures::executor::block_on(delivery) {
            Ok(Ok((partition, offset))) => {
                metrics::DLQ_DELIVERY_OK.fetch_add(1, Ordering::Relaxed);
                info!(partition, offset, "dlq message delivered");
            }
            Ok(Err((err, msg))) => {
                metrics::DLQ_DELIVERY_ERR.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, key = %lossy_key(&msg), "dlq delivery failed");
            }
            Err(err) => {
                metrics::DLQ_DELIVERY_ERR.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "dlq delivery canceled");
            }
        }
    }
}

pub(super) fn lossy_key(msg: &OwnedMessage) -> String {
    String::from_utf8_lossy(msg.key().unwrap_or_default()).into_owned()
}
