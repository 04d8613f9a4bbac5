//! Topic-based progress bus backed by per-topic `tokio::sync::broadcast`
//! channels.
//!
//! [`ProgressBus`] carries *live* job updates only. Delivery is
//! best-effort and at-most-once per subscription: an event published on a
//! topic nobody listens to is dropped. The job store is the durable
//! projection, so a reader that missed events re-reads the store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use planbridge_core::job_events::JobTopic;
use planbridge_core::status::JobStatus;
use planbridge_core::types::{JobId, Timestamp};
use planbridge_db::models::job::Job;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// A transient progress message about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress_percent: i16,
    pub phase: Option<String>,
    pub total_items: i32,
    pub succeeded_items: i32,
    pub failed_items: i32,
    pub error_message: Option<String>,
    pub timestamp: Timestamp,
}

impl ProgressEvent {
    /// Snapshot of a job record as an event.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress_percent: job.progress_percent,
            phase: job.current_phase.clone(),
            total_items: job.total_items,
            succeeded_items: job.succeeded_items,
            failed_items: job.failed_items,
            error_message: job.error_message.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Topic this event belongs on, derived from its status.
    pub fn topic(&self) -> JobTopic {
        match self.status {
            JobStatus::Pending | JobStatus::Running => JobTopic::Progress,
            JobStatus::Completed => JobTopic::Complete,
            JobStatus::Failed => JobTopic::Error,
            JobStatus::Cancelled => JobTopic::Cancel,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressBus
// ---------------------------------------------------------------------------

/// Default per-topic buffer capacity.
const DEFAULT_CAPACITY: usize = 256;

type TopicMap = HashMap<String, broadcast::Sender<ProgressEvent>>;

struct BusInner {
    capacity: usize,
    topics: RwLock<TopicMap>,
}

impl BusInner {
    /// Drop the topic's channel once its last receiver is gone.
    fn prune(&self, topic: &str) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if topics
            .get(topic)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            topics.remove(topic);
        }
    }
}

/// In-process, topic-scoped publish/subscribe hub.
///
/// Cheap to clone; all clones share the same topics.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<BusInner>,
}

impl ProgressBus {
    /// Create a bus with a specific per-topic capacity.
    ///
    /// A subscriber that falls more than `capacity` events behind skips
    /// the oldest ones.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Publish to every current subscriber of `topic`.
    ///
    /// Never waits. Returns how many subscribers the event reached; zero
    /// means it was dropped.
    pub fn publish(&self, topic: &str, event: ProgressEvent) -> usize {
        let topics = self.inner.topics.read().unwrap_or_else(PoisonError::into_inner);
        match topics.get(topic) {
            // A SendError only means every receiver went away meanwhile.
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Publish on the job-scoped topic of the given kind.
    pub fn publish_job(&self, topic: JobTopic, event: ProgressEvent) -> usize {
        let name = topic.for_job(event.job_id);
        self.publish(&name, event)
    }

    /// Subscribe to `topic`. Dropping the handle unsubscribes.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let existing = {
            let topics = self.inner.topics.read().unwrap_or_else(PoisonError::into_inner);
            topics.get(topic).map(broadcast::Sender::subscribe)
        };

        let receiver = match existing {
            Some(receiver) => receiver,
            None => {
                let mut topics = self.inner.topics.write().unwrap_or_else(PoisonError::into_inner);
                topics
                    .entry(topic.to_string())
                    .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
                    .subscribe()
            }
        };

        Subscription {
            topic: topic.to_string(),
            receiver: Some(receiver),
            bus: Arc::clone(&self.inner),
        }
    }

    /// Subscribe to the job-scoped topic of the given kind.
    pub fn subscribe_job(&self, topic: JobTopic, job_id: JobId) -> Subscription {
        self.subscribe(&topic.for_job(job_id))
    }

    /// Number of topics that currently have at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Current subscriber count on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live subscription to one topic.
///
/// Unsubscribes on [`unsubscribe`](Subscription::unsubscribe) or on drop,
/// whichever comes first, so every exit path releases the topic.
pub struct Subscription {
    topic: String,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    bus: Arc<BusInner>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once unsubscribed. Lagging skips the lost events
    /// with a warning and keeps going.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        topic = %self.topic,
                        skipped,
                        "Progress subscriber lagged, events were dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving and release the topic if this was its last reader.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.receiver.take().is_some() {
            self.bus.prune(&self.topic);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn event(job_id: JobId, status: JobStatus, percent: i16) -> ProgressEvent {
        ProgressEvent {
            job_id,
            status,
            progress_percent: percent,
            phase: Some("correcting".into()),
            total_items: 10,
            succeeded_items: 0,
            failed_items: 0,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_on_its_topic() {
        let bus = ProgressBus::default();
        let job_id = uuid::Uuid::now_v7();
        let mut sub = bus.subscribe_job(JobTopic::Progress, job_id);

        let delivered = bus.publish_job(JobTopic::Progress, event(job_id, JobStatus::Running, 30));
        assert_eq!(delivered, 1);

        let received = sub.recv().await.expect("should receive the event");
        assert_eq!(received.progress_percent, 30);
        assert_eq!(sub.topic(), JobTopic::Progress.for_job(job_id));
    }

    #[tokio::test]
    async fn topics_are_isolated_per_job_and_kind() {
        let bus = ProgressBus::default();
        let job_a = uuid::Uuid::now_v7();
        let job_b = uuid::Uuid::now_v7();
        let mut sub_a = bus.subscribe_job(JobTopic::Progress, job_a);
        let _complete_a = bus.subscribe_job(JobTopic::Complete, job_a);

        assert_eq!(
            bus.publish_job(JobTopic::Progress, event(job_b, JobStatus::Running, 10)),
            0
        );
        bus.publish_job(JobTopic::Progress, event(job_a, JobStatus::Running, 20));

        let received = sub_a.recv().await.unwrap();
        assert_eq!(received.job_id, job_a);
        assert_eq!(received.progress_percent, 20);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = ProgressBus::default();
        let job_id = uuid::Uuid::now_v7();
        let mut rx1 = bus.subscribe_job(JobTopic::Error, job_id);
        let mut rx2 = bus.subscribe_job(JobTopic::Error, job_id);

        assert_eq!(
            bus.publish_job(JobTopic::Error, event(job_id, JobStatus::Failed, 50)),
            2
        );

        assert_eq!(rx1.recv().await.unwrap().status, JobStatus::Failed);
        assert_eq!(rx2.recv().await.unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = ProgressBus::default();
        let job_id = uuid::Uuid::now_v7();
        assert_eq!(
            bus.publish_job(JobTopic::Progress, event(job_id, JobStatus::Running, 5)),
            0
        );
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn dropping_last_subscription_removes_topic() {
        let bus = ProgressBus::default();
        let sub1 = bus.subscribe("progress.x");
        let sub2 = bus.subscribe("progress.x");
        assert_eq!(bus.subscriber_count("progress.x"), 2);

        drop(sub1);
        assert_eq!(bus.subscriber_count("progress.x"), 1);
        assert_eq!(bus.topic_count(), 1);

        sub2.unsubscribe();
        assert_eq!(bus.subscriber_count("progress.x"), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest() {
        let bus = ProgressBus::new(2);
        let job_id = uuid::Uuid::now_v7();
        let mut sub = bus.subscribe_job(JobTopic::Progress, job_id);

        for percent in [10, 20, 30, 40] {
            bus.publish_job(JobTopic::Progress, event(job_id, JobStatus::Running, percent));
        }

        assert_eq!(sub.recv().await.unwrap().progress_percent, 30);
        assert_eq!(sub.recv().await.unwrap().progress_percent, 40);
    }

    #[test]
    fn event_topic_follows_status() {
        let id = uuid::Uuid::now_v7();
        assert_eq!(event(id, JobStatus::Running, 0).topic(), JobTopic::Progress);
        assert_eq!(event(id, JobStatus::Completed, 100).topic(), JobTopic::Complete);
        assert_eq!(event(id, JobStatus::Failed, 0).topic(), JobTopic::Error);
        assert_eq!(event(id, JobStatus::Cancelled, 0).topic(), JobTopic::Cancel);
    }
}
