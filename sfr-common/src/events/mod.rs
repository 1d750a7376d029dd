//! Event types for the StudyFindr engine
//!
//! Provides the EngineEvent enum and the EventBus that replaces ambient
//! window-level broadcasting between views.

use crate::ids::LocationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identifies the component instance that raised an event
///
/// A component compares the origin of an incoming notification with its own
/// tag to skip reacting to changes it made itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin(Uuid);

impl Origin {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine event types
///
/// Events are broadcast via EventBus; views and engine components subscribe
/// to the ones they render or react to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A bookmark toggle reached a successful terminal outcome
    ///
    /// Triggers:
    /// - Favorites list: refresh from server (unless it raised the event)
    /// - Map: update marker badge
    BookmarksChanged {
        /// Component instance that performed the toggle
        origin: Origin,
        /// User whose bookmarks changed
        user: String,
        location_id: LocationId,
        /// Membership after the change
        bookmarked: bool,
        timestamp: DateTime<Utc>,
    },

    /// An optimistic bookmark change was reverted after a failed call
    ///
    /// Triggers:
    /// - UI: transient error message
    BookmarkRolledBack {
        location_id: LocationId,
        /// Membership restored locally
        bookmarked: bool,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A review for the location was created or updated
    ///
    /// Triggers:
    /// - Aggregation cache: invalidate the location
    /// - Selection: refresh if the location is selected
    ReviewsUpdated {
        origin: Origin,
        location_id: LocationId,
        timestamp: DateTime<Utc>,
    },

    /// An aggregate computation finished
    AggregateUpdated {
        location_id: LocationId,
        /// False when the location has no reviews
        rated: bool,
        timestamp: DateTime<Utc>,
    },

    /// Selected location changed (None = deselected)
    ///
    /// Triggers:
    /// - Map: move highlight, open/close popup
    /// - List: scroll to and highlight card
    SelectionChanged {
        location_id: Option<LocationId>,
        timestamp: DateTime<Utc>,
    },

    /// Active category changed
    CategoryChanged {
        category: String,
        timestamp: DateTime<Utc>,
    },

    /// An action needed a signed-in user
    ///
    /// Triggers:
    /// - UI: sign-in prompt
    AuthenticationRequired {
        action: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            EngineEvent::BookmarksChanged { .. } => "BookmarksChanged",
            EngineEvent::BookmarkRolledBack { .. } => "BookmarkRolledBack",
            EngineEvent::ReviewsUpdated { .. } => "ReviewsUpdated",
            EngineEvent::AggregateUpdated { .. } => "AggregateUpdated",
            EngineEvent::SelectionChanged { .. } => "SelectionChanged",
            EngineEvent::CategoryChanged { .. } => "CategoryChanged",
            EngineEvent::AuthenticationRequired { .. } => "AuthenticationRequired",
        }
    }

    /// Origin tag, for events that carry one
    pub fn origin(&self) -> Option<Origin> {
        match self {
            EngineEvent::BookmarksChanged { origin, .. }
            | EngineEvent::ReviewsUpdated { origin, .. } => Some(*origin),
            _ => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Publish/subscribe channel owned by the coordinating engine
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use sfr_common::events::{EventBus, EngineEvent};
///
/// let event_bus = EventBus::new(64);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(EngineEvent::CategoryChanged {
///     category: "Quiet Study".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "CategoryChanged");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            tracing::trace!(event_type = event.event_type(), "No subscribers for event");
        }
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
