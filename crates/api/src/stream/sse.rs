//! Server-Sent Events transport for stream sessions.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::sse::{Event, Sse};
use planbridge_core::job_events::MSG_TYPE_CONNECTED;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::gateway::{Frame, StreamSession};

/// Frames buffered between a session and the HTTP body. A client that
/// stops reading fills this up and trips the write deadline.
const FRAME_BUFFER: usize = 16;

impl Frame {
    pub fn into_event(self) -> Event {
        match self {
            Frame::Connected { job_id } => Event::default()
                .event(MSG_TYPE_CONNECTED)
                .data(serde_json::json!({ "job_id": job_id }).to_string()),
            Frame::Event { kind, event } => Event::default()
                .event(kind)
                .data(serde_json::to_string(&event).unwrap_or_default()),
            Frame::Heartbeat => Event::default().comment(""),
        }
    }
}

/// Yields the inner stream's items and fires a cancellation token when
/// dropped, which is how a session learns its client went away.
pub struct DisconnectGuarded<S> {
    inner: S,
    _guard: DropGuard,
}

impl<S> DisconnectGuarded<S> {
    pub fn new(inner: S, disconnect: CancellationToken) -> Self {
        Self {
            inner,
            _guard: disconnect.drop_guard(),
        }
    }
}

impl<S: Stream + Unpin> Stream for DisconnectGuarded<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Run `session` on its own task and expose it as an SSE response.
pub fn into_sse(
    session: StreamSession,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let disconnect = CancellationToken::new();

    let job_id = session.job_id();
    tracing::info!(job_id = %job_id, "Stream client connected");
    tokio::spawn(session.run(tx, disconnect.clone()));

    let frames = ReceiverStream::new(rx).map(|frame| Ok::<_, Infallible>(frame.into_event()));
    Sse::new(DisconnectGuarded::new(frames, disconnect))
}
