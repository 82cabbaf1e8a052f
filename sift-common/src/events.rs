//! Event types for the PhotoSift event system
//!
//! Provides shared event definitions and the `EventBus` used to fan triage
//! progress out to SSE clients and other in-process listeners.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// PhotoSift event types
///
/// Events are broadcast via [`EventBus`] and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SiftEvent {
    /// Triage job accepted and staging started
    ///
    /// Triggers:
    /// - SSE: Show triage progress UI
    TriageJobStarted {
        /// Triage job UUID
        job_id: Uuid,
        /// Number of source images submitted
        source_count: usize,
        /// When job started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job moved to a new status/phase
    TriagePhaseChanged {
        job_id: Uuid,
        /// Status after the transition (e.g. "processing")
        status: String,
        /// Phase after the transition (e.g. "coarse_pass")
        phase: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress update, emitted after every grid
    ///
    /// Triggers:
    /// - SSE: Update progress bar and counters
    TriageProgressUpdate {
        job_id: Uuid,
        /// Current phase
        phase: String,
        /// Grids processed so far (all passes)
        current_step: u64,
        /// Grids known so far (all passes)
        total_steps: u64,
        /// Remote model calls attempted
        api_calls: u64,
        /// Grids that produced no usable selection
        grids_failed: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Triage job completed successfully
    TriageJobCompleted {
        job_id: Uuid,
        /// Photos ingested
        total_input: u64,
        /// Photos in the final selection
        final_selected: u64,
        /// Job duration in seconds
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Triage job failed
    TriageJobFailed {
        job_id: Uuid,
        /// Error message details
        error_message: String,
        /// Grids processed before failure
        grids_processed: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Triage job cancelled by user
    TriageJobCancelled {
        job_id: Uuid,
        /// Grids processed before cancellation
        grids_processed: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SiftEvent {
    /// Get event type as string for filtering / SSE event names
    pub fn event_type(&self) -> &str {
        match self {
            SiftEvent::TriageJobStarted { .. } => "TriageJobStarted",
            SiftEvent::TriagePhaseChanged { .. } => "TriagePhaseChanged",
            SiftEvent::TriageProgressUpdate { .. } => "TriageProgressUpdate",
            SiftEvent::TriageJobCompleted { .. } => "TriageJobCompleted",
            SiftEvent::TriageJobFailed { .. } => "TriageJobFailed",
            SiftEvent::TriageJobCancelled { .. } => "TriageJobCancelled",
        }
    }

    /// Job the event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            SiftEvent::TriageJobStarted { job_id, .. }
            | SiftEvent::TriagePhaseChanged { job_id, .. }
            | SiftEvent::TriageProgressUpdate { job_id, .. }
            | SiftEvent::TriageJobCompleted { job_id, .. }
            | SiftEvent::TriageJobFailed { job_id, .. }
            | SiftEvent::TriageJobCancelled { job_id, .. } => *job_id,
        }
    }
}

/// Central event distribution bus
///
/// Uses `tokio::sync::broadcast` internally:
/// - Non-blocking emission
/// - Multiple subscribers, each receiving every event emitted after subscription
/// - Slow subscribers lag and lose the oldest events once `capacity` is exceeded
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SiftEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// ```
    /// use sift_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SiftEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SiftEvent) -> Result<usize, broadcast::error::SendError<SiftEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SiftEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(SiftEvent::TriageJobCancelled {
            job_id,
            grids_processed: 3,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "TriageJobCancelled");
        assert_eq!(event.job_id(), job_id);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        let event = SiftEvent::TriageJobStarted {
            job_id: Uuid::new_v4(),
            source_count: 1,
            timestamp: chrono::Utc::now(),
        };

        assert!(bus.emit(event.clone()).is_err());
        // Lossy variant must not panic
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = SiftEvent::TriagePhaseChanged {
            job_id: Uuid::nil(),
            status: "processing".to_string(),
            phase: "coarse_pass".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TriagePhaseChanged");
        assert_eq!(json["phase"], "coarse_pass");
    }
}
