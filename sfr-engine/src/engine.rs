//! StudyEngine: owner of every component
//!
//! Wires the catalog, aggregation cache, feed, bookmarks, selection and
//! category engine to one gateway, one session and one event bus, and
//! exposes the operations a view layer calls.

use crate::aggregation::{AggregateStatus, ReviewAggregationCache};
use crate::backend::{Gateway, StudyBackend};
use crate::bookmarks::BookmarkReconciler;
use crate::catalog::{static_seed, LoadReport, LocationCatalog};
use crate::categories::{Category, CategoryEntry, CategoryFilterEngine};
use crate::feed::ReviewFeedPaginator;
use crate::selection::{SelectionCoordinator, SelectionState};
use crate::session::Session;
use chrono::Utc;
use sfr_common::config::EngineConfig;
use sfr_common::events::{EngineEvent, EventBus, Origin};
use sfr_common::model::{
    Bookmark, BookmarkDraft, LocationRecord, ReviewRecord, ReviewSubmission, UserProfile,
    VoteAction, VoteCounts,
};
use sfr_common::{Error, LocationId, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Valid display-name length, in characters
const USERNAME_LENGTH: std::ops::RangeInclusive<usize> = 2..=20;

pub struct StudyEngine {
    config: EngineConfig,
    gateway: Gateway,
    event_bus: EventBus,
    session: Session,
    origin: Origin,
    catalog: RwLock<Arc<LocationCatalog>>,
    cache: ReviewAggregationCache,
    feed: ReviewFeedPaginator,
    bookmarks: BookmarkReconciler,
    selection: SelectionCoordinator,
    categories: CategoryFilterEngine,
    active_category: RwLock<Category>,
}

impl StudyEngine {
    pub fn new(config: EngineConfig, backend: Arc<dyn StudyBackend>) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        let gateway = Gateway::new(backend, config.request_timeout());
        let session = Session::new(event_bus.clone());
        let cache = ReviewAggregationCache::new(
            gateway.clone(),
            event_bus.clone(),
            config.feed.aggregate_page_size,
        );
        let feed = ReviewFeedPaginator::new(gateway.clone(), session.clone(), config.feed.page_size);
        let bookmarks = BookmarkReconciler::new(gateway.clone(), session.clone(), event_bus.clone());
        let selection = SelectionCoordinator::new(
            cache.clone(),
            gateway.clone(),
            session.clone(),
            feed.clone(),
            event_bus.clone(),
            config.feed.comment_preview_len,
        );
        let categories = CategoryFilterEngine::new(cache.clone(), config.categories.clone());

        info!(
            timeout_ms = config.request_timeout_ms,
            page_size = config.feed.page_size,
            "StudyEngine created"
        );

        Self {
            config,
            gateway,
            event_bus,
            session,
            origin: Origin::new(),
            catalog: RwLock::new(Arc::new(LocationCatalog::default())),
            cache,
            feed,
            bookmarks,
            selection,
            categories,
            active_category: RwLock::new(Category::All),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_bus.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn feed(&self) -> &ReviewFeedPaginator {
        &self.feed
    }

    pub fn cache(&self) -> &ReviewAggregationCache {
        &self.cache
    }

    pub fn bookmark_reconciler(&self) -> &BookmarkReconciler {
        &self.bookmarks
    }

    // ========================================
    // Locations
    // ========================================

    /// Fetch the remote set and rebuild the catalog
    ///
    /// On fetch failure the catalog holds the built-in seed only and the
    /// error is returned.
    pub async fn load_locations(&self) -> Result<LoadReport> {
        let rules = &self.config.categories;
        match self.gateway.fetch_locations().await {
            Ok(remote) => {
                let (catalog, report) = LocationCatalog::load(static_seed(), remote, rules);
                *self.catalog.write().await = Arc::new(catalog);
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Location fetch failed, using built-in seed");
                let (catalog, _) = LocationCatalog::load(static_seed(), Vec::new(), rules);
                *self.catalog.write().await = Arc::new(catalog);
                Err(e)
            }
        }
    }

    /// Current catalog snapshot
    pub async fn catalog(&self) -> Arc<LocationCatalog> {
        self.catalog.read().await.clone()
    }

    pub async fn location(&self, id: &LocationId) -> Result<LocationRecord> {
        self.catalog
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("location {}", id)))
    }

    /// Cached aggregate status; schedules a computation when unknown
    pub async fn aggregate(&self, id: &LocationId) -> AggregateStatus {
        self.cache.get(id).await
    }

    // ========================================
    // Session
    // ========================================

    /// Sign in and load the user's bookmarks
    pub async fn sign_in(&self, email: &str) -> Result<()> {
        self.session.sign_in(email).await?;
        let email = email.trim();
        if let Err(e) = self.bookmarks.reload(email).await {
            warn!(user = email, error = %e, "Bookmark load after sign-in failed");
            return Err(e);
        }
        Ok(())
    }

    pub async fn sign_out(&self) {
        self.session.sign_out().await;
        self.bookmarks.clear().await;
    }

    // ========================================
    // Selection and categories
    // ========================================

    pub async fn select(&self, id: &LocationId) -> Result<()> {
        let location = self.location(id).await?;
        self.selection.select(&location).await
    }

    /// Retry the review fetch of a selection left with `fetch_failed`
    ///
    /// Returns whether a retry was issued.
    pub async fn retry_selection(&self) -> Result<bool> {
        let Some(id) = self.selection.selected_id().await else {
            return Ok(false);
        };
        let location = self.location(&id).await?;
        self.selection.retry(&location).await
    }

    pub async fn deselect(&self) {
        self.selection.deselect().await;
    }

    pub async fn selection(&self) -> SelectionState {
        self.selection.state().await
    }

    pub async fn is_highlighted(&self, id: &LocationId) -> bool {
        self.selection.highlight(id).await
    }

    pub async fn active_category(&self) -> Category {
        *self.active_category.read().await
    }

    /// Switch category; clears the selection, keeps cached aggregates
    pub async fn set_category(&self, category: Category) -> Vec<CategoryEntry> {
        let changed = {
            let mut active = self.active_category.write().await;
            let changed = *active != category;
            *active = category;
            changed
        };
        if changed {
            self.selection.deselect().await;
            self.event_bus.emit_lossy(EngineEvent::CategoryChanged {
                category: category.to_string(),
                timestamp: Utc::now(),
            });
        }
        self.locations_in(category).await
    }

    /// Entries of a category without switching to it
    pub async fn locations_in(&self, category: Category) -> Vec<CategoryEntry> {
        let catalog = self.catalog().await;
        let bookmarks = self.bookmarks.bookmarks().await;
        self.categories.filter(category, &catalog, &bookmarks).await
    }

    // ========================================
    // Bookmarks
    // ========================================

    /// Toggle the bookmark of a location; returns the new membership
    ///
    /// Works for bookmarked locations that have left the catalog, using the
    /// bookmark's captured display fields.
    pub async fn toggle_bookmark(&self, id: &LocationId) -> Result<bool> {
        let draft = match self.catalog.read().await.get(id) {
            Some(record) => BookmarkDraft::from(record),
            None => match self.bookmarks.get(id).await {
                Some(Bookmark {
                    name,
                    coordinates: Some(coordinates),
                    ..
                }) => BookmarkDraft { name, coordinates },
                _ => return Err(Error::NotFound(format!("location {}", id))),
            },
        };
        self.bookmarks.toggle(id, draft).await
    }

    pub async fn is_bookmarked(&self, id: &LocationId) -> bool {
        self.bookmarks.contains(id).await
    }

    pub async fn bookmarks(&self) -> Vec<Bookmark> {
        self.bookmarks.bookmarks().await
    }

    /// Reload bookmarks from the server; returns whether they changed
    pub async fn refresh_bookmarks(&self) -> Result<bool> {
        let user = self.session.require_user("load bookmarks").await?;
        self.bookmarks.reload(&user).await
    }

    // ========================================
    // Reviews
    // ========================================

    /// Create or update the signed-in user's review of a location
    pub async fn submit_review(
        &self,
        id: &LocationId,
        submission: ReviewSubmission,
    ) -> Result<ReviewRecord> {
        submission.ratings.validate()?;
        let user = self.session.require_user("submit review").await?;

        let review = self.gateway.submit_review(&user, id, &submission).await?;
        info!(location_id = %id, review_id = %review.id, "Review submitted");

        self.cache.invalidate(id).await;
        self.event_bus.emit_lossy(EngineEvent::ReviewsUpdated {
            origin: self.origin,
            location_id: id.clone(),
            timestamp: Utc::now(),
        });
        self.refresh_if_selected(id).await;
        Ok(review)
    }

    /// The signed-in user's review of a location, if any
    pub async fn own_review(&self, id: &LocationId) -> Result<Option<ReviewRecord>> {
        let user = self.session.require_user("load review").await?;
        self.gateway.fetch_user_review(&user, id).await
    }

    pub async fn rate_review(&self, review_id: &str, action: VoteAction) -> Result<VoteCounts> {
        self.feed.rate(review_id, action).await
    }

    async fn refresh_if_selected(&self, id: &LocationId) {
        if !self.selection.highlight(id).await {
            return;
        }
        match self.location(id).await {
            Ok(location) => {
                if let Err(e) = self.selection.refresh(&location).await {
                    warn!(location_id = %id, error = %e, "Selection refresh failed");
                }
            }
            Err(e) => debug!(location_id = %id, error = %e, "Selected location left the catalog"),
        }
    }

    // ========================================
    // Profile
    // ========================================

    pub async fn profile(&self) -> Result<UserProfile> {
        let user = self.session.require_user("load profile").await?;
        self.gateway.fetch_user_profile(&user).await
    }

    pub async fn update_username(&self, username: &str) -> Result<UserProfile> {
        let username = username.trim();
        if !USERNAME_LENGTH.contains(&username.chars().count()) {
            return Err(Error::InvalidInput(format!(
                "username must be {} to {} characters",
                USERNAME_LENGTH.start(),
                USERNAME_LENGTH.end()
            )));
        }
        let user = self.session.require_user("update profile").await?;
        let profile = self.gateway.update_user_profile(&user, username).await?;
        info!(user = %user, username, "Profile updated");
        Ok(profile)
    }

    // ========================================
    // Event handling
    // ========================================

    /// React to one bus event raised elsewhere
    pub async fn handle_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::BookmarksChanged { .. } => {
                if let Err(e) = self.bookmarks.handle_event(event).await {
                    warn!(error = %e, "Bookmark reload after external change failed");
                }
            }
            EngineEvent::ReviewsUpdated {
                origin,
                location_id,
                ..
            } if *origin != self.origin => {
                self.cache.invalidate(location_id).await;
                self.refresh_if_selected(location_id).await;
            }
            _ => {}
        }
    }

    /// Spawn the task that feeds bus events to [`handle_event`](Self::handle_event)
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut rx = self.event_bus.subscribe();
        tokio::spawn(async move {
            debug!("Engine event listener started");
            loop {
                match rx.recv().await {
                    Ok(event) => engine.handle_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Engine event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event bus closed, listener exiting");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, Op};
    use sfr_common::model::Ratings;

    async fn engine() -> (Arc<MemoryBackend>, StudyEngine) {
        let backend = Arc::new(MemoryBackend::new());
        let engine = StudyEngine::new(EngineConfig::default(), backend.clone());
        engine.load_locations().await.unwrap();
        (backend, engine)
    }

    #[tokio::test]
    async fn test_load_failure_keeps_seed() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_once(Op::FetchLocations).await;
        let engine = StudyEngine::new(EngineConfig::default(), backend);

        assert!(engine.load_locations().await.is_err());
        assert_eq!(engine.catalog().await.len(), 3);
    }

    #[tokio::test]
    async fn test_submit_requires_user_and_valid_ratings() {
        let (_backend, engine) = engine().await;
        let id = LocationId::parse("1").unwrap();
        let submission = ReviewSubmission {
            ratings: Ratings::new(4, 4, 4, 4, 4),
            comment: None,
        };

        assert!(matches!(
            engine.submit_review(&id, submission.clone()).await,
            Err(Error::Unauthenticated(_))
        ));

        engine.sign_in("gator@ufl.edu").await.unwrap();
        let bad = ReviewSubmission {
            ratings: Ratings::new(0, 4, 4, 4, 4),
            comment: None,
        };
        assert!(matches!(
            engine.submit_review(&id, bad).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(engine.submit_review(&id, submission).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_refreshes_selected_location() {
        let (_backend, engine) = engine().await;
        let id = LocationId::parse("2").unwrap();
        engine.sign_in("gator@ufl.edu").await.unwrap();
        engine.select(&id).await.unwrap();

        engine
            .submit_review(
                &id,
                ReviewSubmission {
                    ratings: Ratings::new(5, 5, 5, 5, 5),
                    comment: Some("great".to_string()),
                },
            )
            .await
            .unwrap();

        match engine.selection().await {
            SelectionState::Ready(data) => {
                assert_eq!(data.aggregate.unwrap().review_count, 1);
                assert!(data.own_review.is_some());
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_selection_after_failure() {
        let (backend, engine) = engine().await;
        let id = LocationId::parse("3").unwrap();
        assert!(!engine.retry_selection().await.unwrap());

        backend.fail_once(Op::FetchReviews).await;
        engine.select(&id).await.unwrap();
        assert!(engine.retry_selection().await.unwrap());

        match engine.selection().await {
            SelectionState::Ready(data) => {
                assert_eq!(data.location_id, id);
                assert!(!data.fetch_failed);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_category_switch_deselects() {
        let (_backend, engine) = engine().await;
        let mut rx = engine.subscribe();
        let id = LocationId::parse("1").unwrap();
        engine.select(&id).await.unwrap();

        let libraries = engine.set_category(Category::Libraries).await;
        assert_eq!(libraries.len(), 3);
        assert_eq!(engine.selection().await, SelectionState::None);

        let mut saw_category = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::CategoryChanged { category, .. } = event {
                assert_eq!(category, "Libraries");
                saw_category = true;
            }
        }
        assert!(saw_category);
    }

    #[tokio::test]
    async fn test_update_username_validation() {
        let (backend, engine) = engine().await;
        engine.sign_in("gator@ufl.edu").await.unwrap();
        backend
            .set_profile("gator@ufl.edu", UserProfile::default())
            .await;

        assert!(matches!(
            engine.update_username("x").await,
            Err(Error::InvalidInput(_))
        ));
        let profile = engine.update_username("Albert").await.unwrap();
        assert_eq!(profile.username, "Albert");
        assert_eq!(engine.profile().await.unwrap().username, "Albert");
    }
}
