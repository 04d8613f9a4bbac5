//! Per-client relay of one job's live progress.
//!
//! A session subscribes to the job's topics *before* reading the store
//! snapshot, so nothing published in between is lost. The client first
//! gets a `connected` frame and the snapshot, then relayed events. A
//! progress event whose percentage is below the last one sent is dropped,
//! so the client never sees progress go backwards.

use std::sync::Arc;

use planbridge_core::job_events::{JobTopic, MSG_TYPE_COMPLETE, MSG_TYPE_ERROR, MSG_TYPE_PROGRESS};
use planbridge_core::status::JobStatus;
use planbridge_core::types::JobId;
use planbridge_db::{JobStore, StoreError};
use planbridge_events::{ProgressBus, ProgressEvent, Subscription};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;

/// One frame written to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Connected { job_id: JobId },
    Event {
        kind: &'static str,
        event: ProgressEvent,
    },
    Heartbeat,
}

/// Frame kind for a job event, derived from its status.
pub fn frame_kind(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending | JobStatus::Running => MSG_TYPE_PROGRESS,
        JobStatus::Completed => MSG_TYPE_COMPLETE,
        JobStatus::Failed | JobStatus::Cancelled => MSG_TYPE_ERROR,
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The job reached a terminal status and the grace period elapsed.
    Terminal,
    /// The client went away.
    Disconnected,
    /// A frame could not be written within the write deadline.
    WriteTimeout,
}

// ---------------------------------------------------------------------------
// StreamGateway
// ---------------------------------------------------------------------------

pub struct StreamGateway {
    store: Arc<dyn JobStore>,
    bus: ProgressBus,
    config: StreamConfig,
}

impl StreamGateway {
    pub fn new(store: Arc<dyn JobStore>, bus: ProgressBus, config: StreamConfig) -> Self {
        Self { store, bus, config }
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    /// Subscribe to `job_id`'s topics, then read its current state.
    pub async fn open(&self, job_id: JobId) -> Result<StreamSession, StoreError> {
        let topics = JobTopics {
            progress: self.bus.subscribe_job(JobTopic::Progress, job_id),
            complete: self.bus.subscribe_job(JobTopic::Complete, job_id),
            error: self.bus.subscribe_job(JobTopic::Error, job_id),
            cancel: self.bus.subscribe_job(JobTopic::Cancel, job_id),
        };

        let job = self
            .store
            .find_by_id(job_id)
            .await?
            .ok_or(StoreError::NotFound(job_id))?;

        Ok(StreamSession {
            job_id,
            snapshot: ProgressEvent::from_job(&job),
            topics,
            config: self.config,
        })
    }
}

struct JobTopics {
    progress: Subscription,
    complete: Subscription,
    error: Subscription,
    cancel: Subscription,
}

enum Wake {
    Disconnected,
    Heartbeat,
    Event(Option<ProgressEvent>),
}

// ---------------------------------------------------------------------------
// StreamSession
// ---------------------------------------------------------------------------

/// An opened stream, ready to relay. Dropping it unsubscribes.
pub struct StreamSession {
    job_id: JobId,
    snapshot: ProgressEvent,
    topics: JobTopics,
    config: StreamConfig,
}

impl StreamSession {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn snapshot(&self) -> &ProgressEvent {
        &self.snapshot
    }

    /// Relay frames into `sink` until the job ends, the client leaves or
    /// a write misses its deadline.
    pub async fn run(self, sink: mpsc::Sender<Frame>, disconnect: CancellationToken) -> SessionEnd {
        let job_id = self.job_id;
        let end = self.relay(&sink, &disconnect).await;
        tracing::debug!(job_id = %job_id, end = ?end, "Stream session closed");
        end
    }

    async fn relay(
        mut self,
        sink: &mpsc::Sender<Frame>,
        disconnect: &CancellationToken,
    ) -> SessionEnd {
        let write_timeout = self.config.write_timeout;

        if let Err(end) = write(sink, Frame::Connected { job_id: self.job_id }, write_timeout).await
        {
            return end;
        }

        let snapshot = self.snapshot.clone();
        let mut last_percent = snapshot.progress_percent;
        let terminal = snapshot.status.is_terminal();
        let frame = Frame::Event {
            kind: frame_kind(snapshot.status),
            event: snapshot,
        };
        if let Err(end) = write(sink, frame, write_timeout).await {
            return end;
        }
        if terminal {
            return self.close_after_grace(disconnect).await;
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                biased;
                _ = disconnect.cancelled() => Wake::Disconnected,
                event = self.topics.complete.recv() => Wake::Event(event),
                event = self.topics.error.recv() => Wake::Event(event),
                event = self.topics.cancel.recv() => Wake::Event(event),
                event = self.topics.progress.recv() => Wake::Event(event),
                _ = heartbeat.tick() => Wake::Heartbeat,
            };

            let event = match wake {
                Wake::Disconnected => return SessionEnd::Disconnected,
                Wake::Heartbeat => {
                    if let Err(end) = write(sink, Frame::Heartbeat, write_timeout).await {
                        return end;
                    }
                    continue;
                }
                // Our own subscriptions keep every channel open.
                Wake::Event(None) => return SessionEnd::Disconnected,
                Wake::Event(Some(event)) => event,
            };

            let terminal = event.status.is_terminal();
            if !terminal {
                if event.progress_percent < last_percent {
                    tracing::trace!(
                        job_id = %self.job_id,
                        percent = event.progress_percent,
                        last_percent,
                        "Dropping stale progress",
                    );
                    continue;
                }
                last_percent = event.progress_percent;
            }

            let frame = Frame::Event {
                kind: frame_kind(event.status),
                event,
            };
            if let Err(end) = write(sink, frame, write_timeout).await {
                return end;
            }
            if terminal {
                return self.close_after_grace(disconnect).await;
            }
        }
    }

    async fn close_after_grace(self, disconnect: &CancellationToken) -> SessionEnd {
        // Release the topics before waiting out the grace period.
        drop(self.topics);
        tokio::select! {
            _ = disconnect.cancelled() => SessionEnd::Disconnected,
            _ = tokio::time::sleep(self.config.close_grace) => SessionEnd::Terminal,
        }
    }
}

async fn write(
    sink: &mpsc::Sender<Frame>,
    frame: Frame,
    timeout: std::time::Duration,
) -> Result<(), SessionEnd> {
    match sink.send_timeout(frame, timeout).await {
        Ok(()) => Ok(()),
        Err(SendTimeoutError::Timeout(_)) => Err(SessionEnd::WriteTimeout),
        Err(SendTimeoutError::Closed(_)) => Err(SessionEnd::Disconnected),
    }
}
