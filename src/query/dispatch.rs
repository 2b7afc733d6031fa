//! Task dispatch boundary
//!
//! The broker hands a physical plan to the task-dispatch subsystem and gets
//! back a single-use delivery channel. Exactly one terminal event travels
//! over it, or none at all if dispatch fails internally and drops its sender.
//!
//! ```text
//!   MetricQuery                       TaskDispatcher
//!       │  submit_metric_task(plan)        │
//!       │ ───────────────────────────────▶ │
//!       │ ◀──────── EventReceiver ──────── │ (keeps EventSender)
//!       │                                  │
//!       │ ◀════ TimeSeriesEvent (once) ═══ │
//! ```
//!
//! When the caller's context fires first the receiver is detached: the
//! channel is closed, the sender notices on its next `deliver`, and a late
//! event is dropped without anyone blocking on it.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::QueryResult;
use super::plan::PhysicalPlan;
use super::series::TimeSeriesEvent;
use super::statement::Query;

// ============================================================================
// Query Context
// ============================================================================

/// Cancellation and deadline for one query
///
/// Cloning shares the same cancellation state.
#[derive(Debug, Clone)]
pub struct QueryContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// Context without deadline, cancelled only explicitly
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Derive a context cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose deadline is at most `timeout` from now
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let capped = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(capped, |d| d.min(capped))),
        }
    }

    /// Cancel the query
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context is cancelled or past its deadline
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            },
            None => self.token.cancelled().await,
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Delivery Channel
// ============================================================================

/// Create a single-use delivery channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = oneshot::channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer half, held by the dispatch subsystem
#[derive(Debug)]
pub struct EventSender {
    tx: oneshot::Sender<TimeSeriesEvent>,
}

impl EventSender {
    /// Deliver the terminal event
    ///
    /// Returns `false` when the receiver was detached or dropped; the event
    /// is discarded in that case.
    pub fn deliver(self, event: TimeSeriesEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether nobody is listening any more
    pub fn is_detached(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve once the receiver is detached or dropped
    pub async fn detached(&mut self) {
        self.tx.closed().await
    }
}

/// Consumer half, held by the query orchestrator
#[derive(Debug)]
pub struct EventReceiver {
    rx: oneshot::Receiver<TimeSeriesEvent>,
}

impl EventReceiver {
    /// Wait for the terminal event
    ///
    /// `None` means the sender went away without delivering.
    pub async fn recv(&mut self) -> Option<TimeSeriesEvent> {
        (&mut self.rx).await.ok()
    }

    /// Stop listening
    ///
    /// Closes the channel so a later `deliver` fails fast, and drops an event
    /// that raced in before the close.
    pub fn detach(mut self) {
        self.rx.close();
        if let Ok(late) = self.rx.try_recv() {
            tracing::debug!(
                series = late.series_list.len(),
                "Discarding event delivered after detach"
            );
        }
    }
}

// ============================================================================
// Task Dispatcher
// ============================================================================

/// Executes physical plans against remote storage nodes
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Submit a metric task
    ///
    /// On success the returned receiver yields at most one event. An `Err`
    /// means the plan was rejected and nothing was sent.
    async fn submit_metric_task(
        &self,
        ctx: &QueryContext,
        plan: &PhysicalPlan,
        query: &Query,
    ) -> QueryResult<EventReceiver>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::series::RawSeries;

    #[tokio::test]
    async fn test_deliver_once() {
        let (tx, mut rx) = event_channel();
        assert!(tx.deliver(TimeSeriesEvent::new(vec![RawSeries::new("a")])));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.series_list.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_sender_is_missing_response() {
        let (tx, mut rx) = event_channel();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_detach_discards_late_event() {
        let (mut tx, rx) = event_channel();
        assert!(!tx.is_detached());
        rx.detach();
        tx.detached().await;
        assert!(tx.is_detached());
        assert!(!tx.deliver(TimeSeriesEvent::default()));
    }

    #[tokio::test]
    async fn test_detach_after_delivery() {
        let (tx, rx) = event_channel();
        assert!(tx.deliver(TimeSeriesEvent::default()));
        // Value already buffered; detach drops it without blocking
        rx.detach();
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_deadline() {
        let ctx = QueryContext::with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_done());
        ctx.done().await;
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_context_cancel_propagates_to_child() {
        let ctx = QueryContext::new();
        let child = ctx.child();
        ctx.cancel();
        child.done().await;
        assert!(child.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_with_timeout_keeps_earlier_deadline() {
        let ctx = QueryContext::with_timeout(Duration::from_secs(1));
        let child = ctx.child_with_timeout(Duration::from_secs(30));
        assert_eq!(child.deadline(), ctx.deadline());

        let open = QueryContext::new().child_with_timeout(Duration::from_secs(5));
        assert!(open.deadline().is_some());
    }
}
