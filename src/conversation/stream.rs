//! Pull-based wrapper over streamed generation.
//!
//! Engines push [`GenerationEvent`]s into a channel; consumers pull them
//! here as a plain lazy sequence with an explicit terminal event, so the
//! consuming loop looks the same whether the engine streams natively or
//! adapts a callback API.

use crate::error::EngineErrorKind;
use crate::pipeline::messages::GenerationEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A lazy, pull-based sequence of [`GenerationEvent`]s for one turn.
///
/// The sequence terminates exactly once, with either `Done` or `Error`;
/// after the terminal event, `next` returns `None` forever. Dropping the
/// stream issues a best-effort cancellation signal to the engine —
/// already-delivered tokens remain valid.
pub struct GenerationStream {
    rx: mpsc::Receiver<GenerationEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl GenerationStream {
    pub(crate) fn new(rx: mpsc::Receiver<GenerationEvent>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            finished: false,
        }
    }

    /// Pull the next event, blocking until one is available.
    ///
    /// Returns `None` once the stream has terminated.
    pub async fn next(&mut self) -> Option<GenerationEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Some(event)
            }
            None => {
                // Producer vanished without a terminal event: surface that
                // as a single Error so the terminates-exactly-once contract
                // holds for consumers.
                self.finished = true;
                Some(GenerationEvent::Error(EngineErrorKind::InvalidResponse))
            }
        }
    }

    /// Request cancellation of the underlying engine call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether a terminal event has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl futures_util::Stream for GenerationStream {
    type Item = GenerationEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<GenerationEvent>> {
        use std::task::Poll;

        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(GenerationEvent::Error(EngineErrorKind::InvalidResponse)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
