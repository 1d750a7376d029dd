//! In-process backend
//!
//! Keeps locations, reviews and bookmarks in memory with the same contracts as
//! the HTTP API: one review per (author, location) with resubmission updating
//! it, vote sets per review, global bookmark documents associated with users.
//! Drives the CLI's offline mode and the test suites, so it also supports
//! injected latency, injected failures and per-operation call counters.

use super::StudyBackend;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use sfr_common::model::{
    AddBookmarkOutcome, Bookmark, BookmarkDraft, RawLocation, ReviewPage, ReviewQuery,
    ReviewRecord, ReviewSubmission, SortDirection, SortKey, UserProfile, VoteAction, VoteCounts,
};
use sfr_common::{Error, LocationId, Result};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

/// Backend operations, for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FetchLocations,
    FetchReviews,
    FetchUserReview,
    SubmitReview,
    RateReview,
    AddBookmark,
    AddUserBookmark,
    RemoveUserBookmark,
    RemoveBookmark,
    FetchUserBookmarks,
    FetchUserProfile,
    UpdateUserProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Once,
    Always,
}

#[derive(Debug, Clone)]
struct BookmarkDoc {
    location_id: LocationId,
    draft: BookmarkDraft,
}

#[derive(Default)]
struct Store {
    locations: Vec<RawLocation>,
    reviews: Vec<ReviewRecord>,
    bookmarks: HashMap<String, BookmarkDoc>,
    user_bookmarks: HashMap<String, Vec<String>>,
    profiles: HashMap<String, UserProfile>,
    next_id: u64,
    faults: HashMap<Op, Fault>,
    calls: HashMap<Op, usize>,
    latency: Duration,
    review_latency: HashMap<LocationId, Duration>,
}

impl Store {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    /// Deterministic, strictly increasing creation times
    fn clock(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600, 0)
            .single()
            .unwrap_or_else(Utc::now)
            + ChronoDuration::seconds(self.next_id as i64)
    }
}

/// In-memory implementation of [`StudyBackend`]
#[derive(Default)]
pub struct MemoryBackend {
    store: Mutex<Store>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a location set
    pub fn with_locations(locations: Vec<RawLocation>) -> Self {
        Self {
            store: Mutex::new(Store {
                locations,
                ..Store::default()
            }),
        }
    }

    pub async fn set_locations(&self, locations: Vec<RawLocation>) {
        self.store.lock().await.locations = locations;
    }

    /// Insert or replace a review directly (bypasses fault injection)
    pub async fn seed_review(&self, review: ReviewRecord) {
        let mut store = self.store.lock().await;
        store
            .reviews
            .retain(|r| !(r.author == review.author && r.location_id == review.location_id));
        store.reviews.push(review);
    }

    pub async fn set_profile(&self, user: &str, profile: UserProfile) {
        self.store
            .lock()
            .await
            .profiles
            .insert(user.to_string(), profile);
    }

    /// Delay applied to every operation
    pub async fn set_latency(&self, latency: Duration) {
        self.store.lock().await.latency = latency;
    }

    /// Extra delay for review fetches of one location
    pub async fn set_review_latency(&self, location_id: &LocationId, latency: Duration) {
        self.store
            .lock()
            .await
            .review_latency
            .insert(location_id.clone(), latency);
    }

    /// Fail the next call of `op`
    pub async fn fail_once(&self, op: Op) {
        self.store.lock().await.faults.insert(op, Fault::Once);
    }

    /// Fail every call of `op` until [`MemoryBackend::heal`]
    pub async fn fail_always(&self, op: Op) {
        self.store.lock().await.faults.insert(op, Fault::Always);
    }

    pub async fn heal(&self, op: Op) {
        self.store.lock().await.faults.remove(&op);
    }

    /// Number of calls made to `op` so far
    pub async fn calls(&self, op: Op) -> usize {
        self.store.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Bookmark ids currently associated with `user`
    pub async fn user_bookmark_ids(&self, user: &str) -> Vec<String> {
        self.store
            .lock()
            .await
            .user_bookmarks
            .get(user)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn global_bookmark_count(&self) -> usize {
        self.store.lock().await.bookmarks.len()
    }

    /// Count the call, apply latency, and consume any injected fault
    async fn enter(&self, op: Op, location_id: Option<&LocationId>) -> Result<()> {
        let delay = {
            let mut store = self.store.lock().await;
            *store.calls.entry(op).or_insert(0) += 1;
            let extra = location_id
                .and_then(|id| store.review_latency.get(id).copied())
                .unwrap_or_default();
            store.latency + extra
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut store = self.store.lock().await;
        match store.faults.get(&op).copied() {
            Some(Fault::Once) => {
                store.faults.remove(&op);
                Err(Error::Network(format!("injected failure in {:?}", op)))
            }
            Some(Fault::Always) => Err(Error::Network(format!("injected failure in {:?}", op))),
            None => Ok(()),
        }
    }
}

fn sort_reviews(reviews: &mut [ReviewRecord], key: SortKey, direction: SortDirection) {
    reviews.sort_by(|a, b| {
        let ordering = match key {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::Likes => a
                .likes_count
                .cmp(&b.likes_count)
                .then_with(|| a.created_at.cmp(&b.created_at)),
        }
        .then_with(|| a.id.cmp(&b.id));
        match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

#[async_trait]
impl StudyBackend for MemoryBackend {
    async fn fetch_locations(&self) -> Result<Vec<RawLocation>> {
        self.enter(Op::FetchLocations, None).await?;
        Ok(self.store.lock().await.locations.clone())
    }

    async fn fetch_reviews(&self, query: &ReviewQuery) -> Result<ReviewPage> {
        self.enter(Op::FetchReviews, Some(&query.location_id)).await?;
        let store = self.store.lock().await;

        let mut matching: Vec<ReviewRecord> = store
            .reviews
            .iter()
            .filter(|r| r.location_id == query.location_id)
            .cloned()
            .collect();
        sort_reviews(&mut matching, query.sort_key, query.direction);

        let start = (query.page as usize).saturating_mul(query.page_size as usize);
        let end = start.saturating_add(query.page_size as usize);
        let reviews: Vec<ReviewRecord> = matching
            .iter()
            .skip(start)
            .take(query.page_size as usize)
            .cloned()
            .collect();

        Ok(ReviewPage {
            reviews,
            has_more: matching.len() > end,
        })
    }

    async fn fetch_user_review(
        &self,
        user: &str,
        location_id: &LocationId,
    ) -> Result<Option<ReviewRecord>> {
        self.enter(Op::FetchUserReview, Some(location_id)).await?;
        let store = self.store.lock().await;
        Ok(store
            .reviews
            .iter()
            .find(|r| r.author == user && &r.location_id == location_id)
            .cloned())
    }

    async fn submit_review(
        &self,
        user: &str,
        location_id: &LocationId,
        submission: &ReviewSubmission,
    ) -> Result<ReviewRecord> {
        self.enter(Op::SubmitReview, None).await?;
        submission.ratings.validate()?;
        let mut store = self.store.lock().await;

        if let Some(existing) = store
            .reviews
            .iter_mut()
            .find(|r| r.author == user && &r.location_id == location_id)
        {
            existing.ratings = submission.ratings;
            existing.comment = submission.comment.clone();
            return Ok(existing.clone());
        }

        let id = store.next_id("review-");
        let created_at = store.clock();
        let author_name = store.profiles.get(user).map(|p| p.username.clone());
        let review = ReviewRecord {
            id,
            location_id: location_id.clone(),
            author: user.to_string(),
            author_name,
            profile_picture: None,
            ratings: submission.ratings,
            comment: submission.comment.clone(),
            created_at: Some(created_at),
            likes: BTreeSet::new(),
            dislikes: BTreeSet::new(),
            likes_count: 0,
            dislikes_count: 0,
        };
        store.reviews.push(review.clone());
        Ok(review)
    }

    async fn rate_review(
        &self,
        review_id: &str,
        user: &str,
        action: VoteAction,
    ) -> Result<VoteCounts> {
        self.enter(Op::RateReview, None).await?;
        let mut store = self.store.lock().await;
        let review = store
            .reviews
            .iter_mut()
            .find(|r| r.id == review_id)
            .ok_or_else(|| Error::NotFound(format!("review {}", review_id)))?;

        review.likes.remove(user);
        review.dislikes.remove(user);
        match action {
            VoteAction::Like => {
                review.likes.insert(user.to_string());
            }
            VoteAction::Dislike => {
                review.dislikes.insert(user.to_string());
            }
            VoteAction::Remove => {}
        }
        review.likes_count = review.likes.len() as u32;
        review.dislikes_count = review.dislikes.len() as u32;

        Ok(VoteCounts {
            likes_count: review.likes_count,
            dislikes_count: review.dislikes_count,
        })
    }

    async fn add_bookmark(
        &self,
        draft: &BookmarkDraft,
        place_id: Option<&str>,
        _user: Option<&str>,
    ) -> Result<AddBookmarkOutcome> {
        self.enter(Op::AddBookmark, None).await?;
        let mut store = self.store.lock().await;

        let location_id = place_id.and_then(LocationId::parse);
        let existing = store.bookmarks.iter().find(|(_, doc)| match &location_id {
            Some(id) => &doc.location_id == id,
            None => doc.draft == *draft,
        });
        if let Some((bookmark_id, _)) = existing {
            return Ok(AddBookmarkOutcome {
                bookmark_id: bookmark_id.clone(),
                duplicate: true,
            });
        }

        let bookmark_id = store.next_id("bm-");
        let location_id = match location_id {
            Some(id) => id,
            None => LocationId::parse(&bookmark_id)
                .ok_or_else(|| Error::Network("bookmark id generation failed".to_string()))?,
        };
        store.bookmarks.insert(
            bookmark_id.clone(),
            BookmarkDoc {
                location_id,
                draft: draft.clone(),
            },
        );
        Ok(AddBookmarkOutcome {
            bookmark_id,
            duplicate: false,
        })
    }

    async fn add_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()> {
        self.enter(Op::AddUserBookmark, None).await?;
        let mut store = self.store.lock().await;
        if !store.bookmarks.contains_key(bookmark_id) {
            return Err(Error::NotFound(format!("bookmark {}", bookmark_id)));
        }
        let ids = store.user_bookmarks.entry(user.to_string()).or_default();
        if !ids.iter().any(|id| id == bookmark_id) {
            ids.push(bookmark_id.to_string());
        }
        Ok(())
    }

    async fn remove_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()> {
        self.enter(Op::RemoveUserBookmark, None).await?;
        let mut store = self.store.lock().await;
        if let Some(ids) = store.user_bookmarks.get_mut(user) {
            ids.retain(|id| id != bookmark_id);
        }
        Ok(())
    }

    async fn remove_bookmark(&self, bookmark_id: &str) -> Result<()> {
        self.enter(Op::RemoveBookmark, None).await?;
        self.store.lock().await.bookmarks.remove(bookmark_id);
        Ok(())
    }

    async fn fetch_user_bookmarks(&self, user: &str) -> Result<Vec<Bookmark>> {
        self.enter(Op::FetchUserBookmarks, None).await?;
        let store = self.store.lock().await;
        let ids = store.user_bookmarks.get(user).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| {
                store.bookmarks.get(id).map(|doc| Bookmark {
                    location_id: doc.location_id.clone(),
                    bookmark_id: Some(id.clone()),
                    name: doc.draft.name.clone(),
                    coordinates: Some(doc.draft.coordinates),
                })
            })
            .collect())
    }

    async fn fetch_user_profile(&self, user: &str) -> Result<UserProfile> {
        self.enter(Op::FetchUserProfile, None).await?;
        self.store
            .lock()
            .await
            .profiles
            .get(user)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("user {}", user)))
    }

    async fn update_user_profile(&self, user: &str, username: &str) -> Result<UserProfile> {
        self.enter(Op::UpdateUserProfile, None).await?;
        let username = username.trim();
        if !(2..=20).contains(&username.chars().count()) {
            return Err(Error::InvalidInput(
                "username must be 2-20 characters".to_string(),
            ));
        }
        let mut store = self.store.lock().await;
        let profile = store.profiles.entry(user.to_string()).or_default();
        profile.username = username.to_string();
        Ok(profile.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfr_common::model::Ratings;

    fn query(location: &LocationId, page: u32, size: u32, key: SortKey) -> ReviewQuery {
        ReviewQuery {
            location_id: location.clone(),
            page,
            page_size: size,
            sort_key: key,
            direction: SortDirection::Descending,
        }
    }

    fn submission(q: u8) -> ReviewSubmission {
        ReviewSubmission {
            ratings: Ratings::new(q, 3, 3, 3, 3),
            comment: None,
        }
    }

    #[tokio::test]
    async fn test_resubmission_updates_existing_review() {
        let backend = MemoryBackend::new();
        let lib = LocationId::parse("lib").unwrap();

        let first = backend.submit_review("a@ufl.edu", &lib, &submission(2)).await.unwrap();
        let second = backend.submit_review("a@ufl.edu", &lib, &submission(5)).await.unwrap();

        assert_eq!(first.id, second.id);
        let page = backend.fetch_reviews(&query(&lib, 0, 10, SortKey::CreatedAt)).await.unwrap();
        assert_eq!(page.reviews.len(), 1);
        assert_eq!(page.reviews[0].ratings.quietness, 5);
    }

    #[tokio::test]
    async fn test_paging_and_has_more() {
        let backend = MemoryBackend::new();
        let lib = LocationId::parse("lib").unwrap();
        for i in 0..7 {
            backend
                .submit_review(&format!("u{}@ufl.edu", i), &lib, &submission(3))
                .await
                .unwrap();
        }

        let p0 = backend.fetch_reviews(&query(&lib, 0, 5, SortKey::CreatedAt)).await.unwrap();
        let p1 = backend.fetch_reviews(&query(&lib, 1, 5, SortKey::CreatedAt)).await.unwrap();
        assert_eq!(p0.reviews.len(), 5);
        assert!(p0.has_more);
        assert_eq!(p1.reviews.len(), 2);
        assert!(!p1.has_more);
        // Newest first
        assert_eq!(p0.reviews[0].author, "u6@ufl.edu");
    }

    #[tokio::test]
    async fn test_votes_are_exclusive() {
        let backend = MemoryBackend::new();
        let lib = LocationId::parse("lib").unwrap();
        let review = backend.submit_review("a@ufl.edu", &lib, &submission(3)).await.unwrap();

        let liked = backend.rate_review(&review.id, "b@ufl.edu", VoteAction::Like).await.unwrap();
        assert_eq!(liked, VoteCounts { likes_count: 1, dislikes_count: 0 });
        let disliked = backend
            .rate_review(&review.id, "b@ufl.edu", VoteAction::Dislike)
            .await
            .unwrap();
        assert_eq!(disliked, VoteCounts { likes_count: 0, dislikes_count: 1 });
        let removed = backend
            .rate_review(&review.id, "b@ufl.edu", VoteAction::Remove)
            .await
            .unwrap();
        assert_eq!(removed, VoteCounts::default());
    }

    #[tokio::test]
    async fn test_fail_once_then_recover() {
        let backend = MemoryBackend::new();
        backend.fail_once(Op::FetchLocations).await;

        assert!(backend.fetch_locations().await.is_err());
        assert!(backend.fetch_locations().await.is_ok());
        assert_eq!(backend.calls(Op::FetchLocations).await, 2);
    }
}
