//! Best-effort publication of withdrawal outcomes.
//!
//! `WithdrawalNotifier::notify` never blocks and never fails: events go into a
//! bounded channel drained by a background worker, and anything that goes
//! wrong past that point is logged and dropped.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{AccountNumber, EventStatus, WithdrawalEvent};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PublishError {
    #[error("Publisher unavailable: {0}")]
    Unavailable(String),
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, key: &str, event: &WithdrawalEvent) -> Result<(), PublishError>;
}

/// Demo publisher that writes what it would have sent to the log.
#[derive(Debug, Clone)]
pub struct LoggingEventPublisher {
    simulate_delay: bool,
    failure_rate: f64,
}

impl LoggingEventPublisher {
    pub fn new(simulate_delay: bool, failure_rate: f64) -> Self {
        Self {
            simulate_delay,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    pub fn render_alert(event: &WithdrawalEvent) -> String {
        let account = event.account_number.masked();
        match event.status {
            EventStatus::Success => format!(
                "Bank alert: {} was withdrawn from account {}.",
                event.amount, account
            ),
            EventStatus::Declined => format!(
                "Bank alert: a withdrawal of {} from account {} was declined.",
                event.amount, account
            ),
            EventStatus::Failed => format!(
                "Bank alert: a withdrawal of {} from account {} could not be processed. Please try again later.",
                event.amount, account
            ),
        }
    }
}

impl Default for LoggingEventPublisher {
    fn default() -> Self {
        Self::new(false, 0.0)
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, topic: &str, key: &str, event: &WithdrawalEvent) -> Result<(), PublishError> {
        let payload = event.to_json();

        let (delay, fail) = {
            let mut rng = rand::thread_rng();
            let delay = self
                .simulate_delay
                .then(|| Duration::from_millis(rng.gen_range(100..=300)));
            (delay, rng.gen::<f64>() < self.failure_rate)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(PublishError::Unavailable("simulated publish failure".to_string()));
        }

        info!(
            topic,
            key,
            message_id = %Uuid::new_v4(),
            timestamp = %Utc::now().to_rfc3339(),
            payload = %payload,
            sms = %Self::render_alert(event),
            "Published withdrawal event"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub topic: String,
    pub buffer: usize,
    pub publish_timeout: Duration,
    pub simulate_delay: bool,
    pub failure_rate: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            topic: "arn:aws:sns:us-east-1:123456789012:withdrawal-events".to_string(),
            buffer: 1024,
            publish_timeout: Duration::from_secs(5),
            simulate_delay: false,
            failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct NotifierStats {
    queued: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NotifierMetrics {
    pub queued: u64,
    pub dropped: u64,
}

/// Handle used by the request path. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WithdrawalNotifier {
    sender: mpsc::Sender<WithdrawalEvent>,
    stats: Arc<NotifierStats>,
}

impl WithdrawalNotifier {
    /// Starts the publishing worker. The worker exits once `shutdown` is
    /// cancelled and every already-buffered event has been attempted, or
    /// when all notifier handles are dropped.
    pub fn spawn(
        publisher: Arc<dyn EventPublisher>,
        config: NotificationConfig,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.buffer.max(1));
        let handle = tokio::spawn(run_worker(publisher, config, receiver, shutdown));
        (
            Self {
                sender,
                stats: Arc::new(NotifierStats::default()),
            },
            handle,
        )
    }

    pub fn notify(&self, account_number: &AccountNumber, amount: Decimal, status: EventStatus) {
        let event = WithdrawalEvent::new(account_number.clone(), amount, status);
        match self.sender.try_send(event) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    account_number = %event.account_number,
                    status = %event.status,
                    "Notification buffer full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    account_number = %event.account_number,
                    status = %event.status,
                    "Notification worker stopped, dropping event"
                );
            }
        }
    }

    pub fn metrics(&self) -> NotifierMetrics {
        NotifierMetrics {
            queued: self.stats.queued.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(
    publisher: Arc<dyn EventPublisher>,
    config: NotificationConfig,
    mut receiver: mpsc::Receiver<WithdrawalEvent>,
    shutdown: CancellationToken,
) {
    info!(topic = %config.topic, "Notification worker started");

    loop {
        tokio::select! {
            maybe_event = receiver.recv() => match maybe_event {
                Some(event) => publish_one(publisher.as_ref(), &config, &event).await,
                None => break,
            },
            _ = shutdown.cancelled() => {
                receiver.close();
                let mut drained = 0usize;
                while let Some(event) = receiver.recv().await {
                    publish_one(publisher.as_ref(), &config, &event).await;
                    drained += 1;
                }
                debug!(drained, "Drained pending notifications");
                break;
            }
        }
    }

    info!("Notification worker stopped");
}

async fn publish_one(publisher: &dyn EventPublisher, config: &NotificationConfig, event: &WithdrawalEvent) {
    let key = event.account_number.as_str();
    let outcome = tokio::time::timeout(config.publish_timeout, publisher.publish(&config.topic, key, event))
        .await
        .unwrap_or(Err(PublishError::Timeout(config.publish_timeout)));

    if let Err(e) = outcome {
        error!(
            account_number = %event.account_number,
            amount = %event.amount,
            status = %event.status,
            error = %e,
            "Failed to publish withdrawal event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<(String, String, WithdrawalEvent)>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, key: &str, event: &WithdrawalEvent) -> Result<(), PublishError> {
            self.events
                .lock()
                .await
                .push((topic.to_string(), key.to_string(), event.clone()));
            Ok(())
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _: &str, _: &str, _: &WithdrawalEvent) -> Result<(), PublishError> {
            Err(PublishError::Unavailable("broker down".into()))
        }
    }

    struct SlowPublisher;

    #[async_trait]
    impl EventPublisher for SlowPublisher {
        async fn publish(&self, _: &str, _: &str, _: &WithdrawalEvent) -> Result<(), PublishError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn number() -> AccountNumber {
        AccountNumber::parse("123456789").unwrap()
    }

    #[tokio::test]
    async fn test_events_are_published_in_order() {
        let publisher = Arc::new(RecordingPublisher::default());
        let shutdown = CancellationToken::new();
        let (notifier, handle) =
            WithdrawalNotifier::spawn(publisher.clone(), NotificationConfig::default(), shutdown.clone());

        notifier.notify(&number(), dec!(100.00), EventStatus::Success);
        notifier.notify(&number(), dec!(999999.00), EventStatus::Declined);

        shutdown.cancel();
        handle.await.unwrap();

        let events = publisher.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, "123456789");
        assert_eq!(events[0].2.status, EventStatus::Success);
        assert_eq!(events[1].2.status, EventStatus::Declined);
        assert_eq!(events[1].2.amount, dec!(999999.00));
        assert_eq!(notifier.metrics().queued, 2);
    }

    #[tokio::test]
    async fn test_publisher_failure_is_swallowed() {
        let shutdown = CancellationToken::new();
        let (notifier, handle) =
            WithdrawalNotifier::spawn(Arc::new(FailingPublisher), NotificationConfig::default(), shutdown.clone());

        notifier.notify(&number(), dec!(1), EventStatus::Failed);
        shutdown.cancel();

        assert!(handle.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_publisher_does_not_block_notify() {
        let config = NotificationConfig {
            buffer: 1,
            publish_timeout: Duration::from_millis(50),
            ..NotificationConfig::default()
        };
        let shutdown = CancellationToken::new();
        let (notifier, handle) = WithdrawalNotifier::spawn(Arc::new(SlowPublisher), config, shutdown.clone());

        let start = tokio::time::Instant::now();
        for _ in 0..10 {
            notifier.notify(&number(), dec!(5), EventStatus::Success);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        let metrics = notifier.metrics();
        assert!(metrics.dropped > 0);
        assert_eq!(metrics.queued + metrics.dropped, 10);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_alert_masks_account_number() {
        let event = WithdrawalEvent::new(number(), dec!(100.00), EventStatus::Success);
        let alert = LoggingEventPublisher::render_alert(&event);

        assert!(alert.contains("****6789"));
        assert!(!alert.contains("123456789"));
        assert!(alert.contains("100.00"));
    }

    #[tokio::test]
    async fn test_logging_publisher_honours_failure_rate() {
        let event = WithdrawalEvent::new(number(), dec!(1.00), EventStatus::Success);

        assert!(LoggingEventPublisher::new(false, 0.0)
            .publish("topic", "123456789", &event)
            .await
            .is_ok());
        assert!(LoggingEventPublisher::new(false, 1.0)
            .publish("topic", "123456789", &event)
            .await
            .is_err());
    }
}
