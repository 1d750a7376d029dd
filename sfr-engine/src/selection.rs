//! Location selection
//!
//! Selecting a location fetches its full review list (through the
//! aggregation cache) and the signed-in user's own review concurrently.
//! The last selection wins: results are applied only while the selection
//! still names the same location and generation.

use crate::aggregation::ReviewAggregationCache;
use crate::backend::Gateway;
use crate::feed::ReviewFeedPaginator;
use crate::session::Session;
use chrono::Utc;
use sfr_common::events::{EngineEvent, EventBus};
use sfr_common::model::{
    LocationRecord, ReviewAggregate, ReviewRecord, SortDirection, SortKey,
};
use sfr_common::{Error, LocationId, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Data shown for a selected location
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionData {
    pub location_id: LocationId,
    pub aggregate: Option<ReviewAggregate>,
    /// Most recent reviews with a comment
    pub preview: Vec<ReviewRecord>,
    /// The signed-in user's review, if any
    pub own_review: Option<ReviewRecord>,
    /// Review data could not be fetched; the location stays selected
    pub fetch_failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    None,
    Selecting(LocationId),
    Ready(Box<SelectionData>),
}

impl SelectionState {
    pub fn location_id(&self) -> Option<&LocationId> {
        match self {
            SelectionState::None => None,
            SelectionState::Selecting(id) => Some(id),
            SelectionState::Ready(data) => Some(&data.location_id),
        }
    }
}

struct SelectionInner {
    state: SelectionState,
    generation: u64,
}

#[derive(Clone)]
pub struct SelectionCoordinator {
    cache: ReviewAggregationCache,
    gateway: Gateway,
    session: Session,
    feed: ReviewFeedPaginator,
    event_bus: EventBus,
    preview_len: usize,
    inner: Arc<Mutex<SelectionInner>>,
}

impl SelectionCoordinator {
    pub fn new(
        cache: ReviewAggregationCache,
        gateway: Gateway,
        session: Session,
        feed: ReviewFeedPaginator,
        event_bus: EventBus,
        preview_len: usize,
    ) -> Self {
        Self {
            cache,
            gateway,
            session,
            feed,
            event_bus,
            preview_len,
            inner: Arc::new(Mutex::new(SelectionInner {
                state: SelectionState::None,
                generation: 0,
            })),
        }
    }

    /// Select a location; selecting the current location again is a no-op
    pub async fn select(&self, location: &LocationRecord) -> Result<()> {
        self.start(location, false).await
    }

    /// Re-fetch the current location's data (after a review submission)
    pub async fn refresh(&self, location: &LocationRecord) -> Result<()> {
        self.start(location, true).await
    }

    /// Re-fetch a selection left with `fetch_failed`
    ///
    /// Returns `Ok(false)` without any request unless `location` is the
    /// current selection and its fetch failed.
    pub async fn retry(&self, location: &LocationRecord) -> Result<bool> {
        let failed = matches!(
            &self.inner.lock().await.state,
            SelectionState::Ready(data) if data.location_id == location.id && data.fetch_failed
        );
        if !failed {
            return Ok(false);
        }
        debug!(location_id = %location.id, "Retrying selection fetch");
        self.start(location, true).await?;
        Ok(true)
    }

    async fn start(&self, location: &LocationRecord, force: bool) -> Result<()> {
        if !location.coordinates.is_valid() {
            return Err(Error::InvalidInput(format!(
                "location {} has invalid coordinates",
                location.id
            )));
        }
        let id = location.id.clone();

        let generation = {
            let mut inner = self.inner.lock().await;
            if !force && inner.state.location_id() == Some(&id) {
                debug!(location_id = %id, "Location already selected");
                return Ok(());
            }
            inner.generation += 1;
            inner.state = SelectionState::Selecting(id.clone());
            inner.generation
        };
        self.feed.close().await;
        self.event_bus.emit_lossy(EngineEvent::SelectionChanged {
            location_id: Some(id.clone()),
            timestamp: Utc::now(),
        });

        let user = self.session.current_user().await;
        let own_review = async {
            match &user {
                Some(user) => self.gateway.fetch_user_review(user, &id).await,
                None => Ok(None),
            }
        };
        let (reviews, own_review) = tokio::join!(self.cache.compute(&id), own_review);

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state.location_id() != Some(&id) {
            debug!(location_id = %id, "Discarding superseded selection result");
            return Ok(());
        }

        let own_review = own_review.unwrap_or_else(|e| {
            warn!(location_id = %id, error = %e, "Own review fetch failed");
            None
        });
        let loaded = match reviews {
            Ok((reviews, aggregate)) => {
                inner.state = SelectionState::Ready(Box::new(SelectionData {
                    location_id: id.clone(),
                    aggregate,
                    preview: self.preview(reviews),
                    own_review,
                    fetch_failed: false,
                }));
                true
            }
            Err(e) => {
                warn!(location_id = %id, error = %e, "Selection fetch failed");
                inner.state = SelectionState::Ready(Box::new(SelectionData {
                    location_id: id.clone(),
                    aggregate: None,
                    preview: Vec::new(),
                    own_review: None,
                    fetch_failed: true,
                }));
                false
            }
        };
        if loaded {
            // opened under the selection lock so a newer selection cannot interleave
            self.feed
                .open(&id, SortKey::CreatedAt, SortDirection::Descending)
                .await;
        }
        drop(inner);

        if loaded {
            if let Err(e) = self.feed.load_next_page().await {
                warn!(location_id = %id, error = %e, "First review page failed");
            }
        }
        Ok(())
    }

    fn preview(&self, mut reviews: Vec<ReviewRecord>) -> Vec<ReviewRecord> {
        reviews.retain(|r| r.comment.as_deref().is_some_and(|c| !c.trim().is_empty()));
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        reviews.truncate(self.preview_len);
        reviews
    }

    /// Clear the selection; in-flight results are discarded
    pub async fn deselect(&self) {
        let previous = {
            let mut inner = self.inner.lock().await;
            inner.generation += 1;
            std::mem::replace(&mut inner.state, SelectionState::None)
        };
        self.feed.close().await;
        if previous != SelectionState::None {
            self.event_bus.emit_lossy(EngineEvent::SelectionChanged {
                location_id: None,
                timestamp: Utc::now(),
            });
        }
    }

    /// Whether the marker or card for `id` should render highlighted
    pub async fn highlight(&self, id: &LocationId) -> bool {
        self.inner.lock().await.state.location_id() == Some(id)
    }

    pub async fn state(&self) -> SelectionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn selected_id(&self) -> Option<LocationId> {
        self.inner.lock().await.state.location_id().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, Op};
    use crate::backend::StudyBackend;
    use crate::catalog::{classify, static_seed};
    use crate::feed::FeedState;
    use sfr_common::config::CategoryConfig;
    use sfr_common::model::{Provenance, Ratings, ReviewSubmission};
    use std::time::Duration;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        selection: SelectionCoordinator,
        feed: ReviewFeedPaginator,
        session: Session,
        locations: Vec<LocationRecord>,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let bus = EventBus::new(32);
        let gateway = Gateway::new(backend.clone(), Duration::from_secs(10));
        let session = Session::new(bus.clone());
        let cache = ReviewAggregationCache::new(gateway.clone(), bus.clone(), 100);
        let feed = ReviewFeedPaginator::new(gateway.clone(), session.clone(), 5);
        let selection = SelectionCoordinator::new(
            cache,
            gateway,
            session.clone(),
            feed.clone(),
            bus,
            3,
        );
        let rules = CategoryConfig::default();
        let locations = static_seed()
            .into_iter()
            .map(|raw| classify(raw, Provenance::Static, &rules))
            .collect();
        Fixture {
            backend,
            selection,
            feed,
            session,
            locations,
        }
    }

    #[tokio::test]
    async fn test_select_loads_aggregate_own_review_and_feed() {
        let f = fixture().await;
        let west = &f.locations[1];
        f.session.sign_in("gator@ufl.edu").await.unwrap();
        f.backend
            .submit_review(
                "gator@ufl.edu",
                &west.id,
                &ReviewSubmission {
                    ratings: Ratings::new(5, 4, 4, 2, 5),
                    comment: Some("quiet upstairs".to_string()),
                },
            )
            .await
            .unwrap();

        f.selection.select(west).await.unwrap();

        match f.selection.state().await {
            SelectionState::Ready(data) => {
                assert_eq!(data.aggregate.unwrap().review_count, 1);
                assert_eq!(data.preview.len(), 1);
                assert!(data.own_review.is_some());
                assert!(!data.fetch_failed);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(f.feed.location_id().await, Some(west.id.clone()));
        assert_eq!(f.feed.state().await, FeedState::Exhausted);
        assert!(f.selection.highlight(&west.id).await);
    }

    #[tokio::test]
    async fn test_reselect_same_location_is_noop() {
        let f = fixture().await;
        let west = &f.locations[1];
        f.selection.select(west).await.unwrap();
        let calls = f.backend.calls(Op::FetchReviews).await;

        f.selection.select(west).await.unwrap();
        assert_eq!(f.backend.calls(Op::FetchReviews).await, calls);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_location_selected() {
        let f = fixture().await;
        f.backend.fail_once(Op::FetchReviews).await;

        f.selection.select(&f.locations[0]).await.unwrap();
        match f.selection.state().await {
            SelectionState::Ready(data) => {
                assert!(data.fetch_failed);
                assert!(data.aggregate.is_none());
                assert!(data.preview.is_empty());
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(f.feed.state().await, FeedState::Idle);
    }

    #[tokio::test]
    async fn test_retry_after_fetch_failure() {
        let f = fixture().await;
        let marston = &f.locations[0];
        f.backend.fail_once(Op::FetchReviews).await;
        f.selection.select(marston).await.unwrap();

        // selecting again is a no-op; retry re-fetches
        f.selection.select(marston).await.unwrap();
        assert!(matches!(f.selection.state().await, SelectionState::Ready(d) if d.fetch_failed));

        assert!(f.selection.retry(marston).await.unwrap());
        match f.selection.state().await {
            SelectionState::Ready(data) => assert!(!data.fetch_failed),
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(f.feed.state().await, FeedState::Exhausted);

        let calls = f.backend.calls(Op::FetchReviews).await;
        assert!(!f.selection.retry(marston).await.unwrap());
        assert!(!f.selection.retry(&f.locations[1]).await.unwrap());
        assert_eq!(f.backend.calls(Op::FetchReviews).await, calls);
    }

    #[tokio::test]
    async fn test_invalid_coordinates_rejected() {
        let f = fixture().await;
        let mut broken = f.locations[0].clone();
        broken.coordinates.lat = f64::INFINITY;

        assert!(matches!(
            f.selection.select(&broken).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(f.selection.state().await, SelectionState::None);
    }

    #[tokio::test]
    async fn test_deselect() {
        let f = fixture().await;
        f.selection.select(&f.locations[0]).await.unwrap();
        f.selection.deselect().await;
        assert_eq!(f.selection.selected_id().await, None);
        assert_eq!(f.feed.state().await, FeedState::Idle);
    }
}
