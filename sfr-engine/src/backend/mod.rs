//! Backend collaborator interface
//!
//! [`StudyBackend`] lists every server operation the engine consumes. All of
//! them are fallible, latent and independently invocable; nothing assumes
//! atomicity across calls. Implementations return strict records, parsed at
//! the boundary by `sfr_common::model::parse`.
//!
//! Engine components never hold a backend directly: they go through
//! [`Gateway`], which bounds each call with the configured timeout and maps
//! expiry onto the network failure path.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use sfr_common::model::{
    AddBookmarkOutcome, Bookmark, BookmarkDraft, RawLocation, ReviewPage, ReviewQuery,
    ReviewRecord, ReviewSubmission, UserProfile, VoteAction, VoteCounts,
};
use sfr_common::{Error, LocationId, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Server operations consumed by the engine
#[async_trait]
pub trait StudyBackend: Send + Sync {
    /// Fetch the remote location set
    async fn fetch_locations(&self) -> Result<Vec<RawLocation>>;

    /// Fetch one page of a location's reviews
    async fn fetch_reviews(&self, query: &ReviewQuery) -> Result<ReviewPage>;

    /// Fetch `user`'s review of a location, if any
    async fn fetch_user_review(
        &self,
        user: &str,
        location_id: &LocationId,
    ) -> Result<Option<ReviewRecord>>;

    /// Create or update `user`'s review of a location
    async fn submit_review(
        &self,
        user: &str,
        location_id: &LocationId,
        submission: &ReviewSubmission,
    ) -> Result<ReviewRecord>;

    /// Like, dislike, or remove a vote on a review
    async fn rate_review(&self, review_id: &str, user: &str, action: VoteAction)
        -> Result<VoteCounts>;

    /// Create the global bookmark document (or report that it exists)
    async fn add_bookmark(
        &self,
        draft: &BookmarkDraft,
        place_id: Option<&str>,
        user: Option<&str>,
    ) -> Result<AddBookmarkOutcome>;

    /// Associate a bookmark document with a user
    async fn add_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()>;

    /// Remove a bookmark document from a user
    async fn remove_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()>;

    /// Remove a bookmark document from the global collection
    async fn remove_bookmark(&self, bookmark_id: &str) -> Result<()>;

    /// Fetch every bookmark of a user
    async fn fetch_user_bookmarks(&self, user: &str) -> Result<Vec<Bookmark>>;

    /// Fetch a user's public profile
    async fn fetch_user_profile(&self, user: &str) -> Result<UserProfile>;

    /// Change a user's display name
    async fn update_user_profile(&self, user: &str, username: &str) -> Result<UserProfile>;
}

/// Timeout-enforcing handle on a backend
///
/// Cheap to clone; every engine component holds one.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn StudyBackend>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(backend: Arc<dyn StudyBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one backend call under the timeout
    async fn call<T>(&self, operation: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Backend call timed out");
                Err(Error::Network(format!(
                    "{} timed out after {}ms",
                    operation,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn fetch_locations(&self) -> Result<Vec<RawLocation>> {
        self.call("fetch_locations", self.backend.fetch_locations()).await
    }

    pub async fn fetch_reviews(&self, query: &ReviewQuery) -> Result<ReviewPage> {
        self.call("fetch_reviews", self.backend.fetch_reviews(query)).await
    }

    pub async fn fetch_user_review(
        &self,
        user: &str,
        location_id: &LocationId,
    ) -> Result<Option<ReviewRecord>> {
        self.call("fetch_user_review", self.backend.fetch_user_review(user, location_id))
            .await
    }

    pub async fn submit_review(
        &self,
        user: &str,
        location_id: &LocationId,
        submission: &ReviewSubmission,
    ) -> Result<ReviewRecord> {
        self.call(
            "submit_review",
            self.backend.submit_review(user, location_id, submission),
        )
        .await
    }

    pub async fn rate_review(
        &self,
        review_id: &str,
        user: &str,
        action: VoteAction,
    ) -> Result<VoteCounts> {
        self.call("rate_review", self.backend.rate_review(review_id, user, action))
            .await
    }

    pub async fn add_bookmark(
        &self,
        draft: &BookmarkDraft,
        place_id: Option<&str>,
        user: Option<&str>,
    ) -> Result<AddBookmarkOutcome> {
        self.call("add_bookmark", self.backend.add_bookmark(draft, place_id, user))
            .await
    }

    pub async fn add_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()> {
        self.call("add_user_bookmark", self.backend.add_user_bookmark(user, bookmark_id))
            .await
    }

    pub async fn remove_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()> {
        self.call(
            "remove_user_bookmark",
            self.backend.remove_user_bookmark(user, bookmark_id),
        )
        .await
    }

    pub async fn remove_bookmark(&self, bookmark_id: &str) -> Result<()> {
        self.call("remove_bookmark", self.backend.remove_bookmark(bookmark_id))
            .await
    }

    pub async fn fetch_user_bookmarks(&self, user: &str) -> Result<Vec<Bookmark>> {
        self.call("fetch_user_bookmarks", self.backend.fetch_user_bookmarks(user))
            .await
    }

    pub async fn fetch_user_profile(&self, user: &str) -> Result<UserProfile> {
        self.call("fetch_user_profile", self.backend.fetch_user_profile(user))
            .await
    }

    pub async fn update_user_profile(&self, user: &str, username: &str) -> Result<UserProfile> {
        self.call(
            "update_user_profile",
            self.backend.update_user_profile(user, username),
        )
        .await
    }
}
