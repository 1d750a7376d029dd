//! Infinite-scroll review feed
//!
//! One paginator serves the selected location. At most one page request is
//! outstanding; proximity signals that arrive while it runs are coalesced.
//! Every `open` bumps a generation counter so a response belonging to an
//! earlier location or sort order is discarded on arrival.

use crate::backend::Gateway;
use crate::session::Session;
use sfr_common::model::{
    ReviewQuery, ReviewRecord, SortDirection, SortKey, VoteAction, VoteCounts,
};
use sfr_common::{Error, LocationId, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Paginator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    /// No location open
    Idle,
    /// Opened, or a page request is outstanding
    Loading,
    /// More pages are available
    Loaded,
    /// The server reported no further pages
    Exhausted,
    /// The last page request failed; `retry` re-requests the same page
    Errored(String),
}

struct FeedInner {
    location_id: Option<LocationId>,
    sort_key: SortKey,
    direction: SortDirection,
    entries: Vec<ReviewRecord>,
    next_page: u32,
    state: FeedState,
    in_flight: bool,
    generation: u64,
}

impl FeedInner {
    fn reset(&mut self, location_id: Option<LocationId>, state: FeedState) {
        self.location_id = location_id;
        self.entries.clear();
        self.next_page = 0;
        self.state = state;
        self.in_flight = false;
        self.generation += 1;
    }
}

/// Review feed of the selected location
#[derive(Clone)]
pub struct ReviewFeedPaginator {
    gateway: Gateway,
    session: Session,
    page_size: u32,
    inner: Arc<Mutex<FeedInner>>,
}

impl ReviewFeedPaginator {
    pub fn new(gateway: Gateway, session: Session, page_size: u32) -> Self {
        Self {
            gateway,
            session,
            page_size: page_size.max(1),
            inner: Arc::new(Mutex::new(FeedInner {
                location_id: None,
                sort_key: SortKey::CreatedAt,
                direction: SortDirection::Descending,
                entries: Vec::new(),
                next_page: 0,
                state: FeedState::Idle,
                in_flight: false,
                generation: 0,
            })),
        }
    }

    /// Reset for a location and sort order; the first page is requested by
    /// [`load_next_page`](Self::load_next_page)
    pub async fn open(&self, location_id: &LocationId, sort_key: SortKey, direction: SortDirection) {
        let mut inner = self.inner.lock().await;
        inner.sort_key = sort_key;
        inner.direction = direction;
        inner.reset(Some(location_id.clone()), FeedState::Loading);
        debug!(location_id = %location_id, sort = sort_key.as_str(), "Review feed opened");
    }

    /// Back to `Idle`; outstanding responses are discarded
    pub async fn close(&self) {
        self.inner.lock().await.reset(None, FeedState::Idle);
    }

    /// Request the next page
    ///
    /// Returns `Ok(true)` when a page was fetched and applied, `Ok(false)`
    /// when the call was coalesced, not applicable in the current state, or
    /// its response was superseded.
    pub async fn load_next_page(&self) -> Result<bool> {
        let (query, generation) = {
            let mut inner = self.inner.lock().await;
            if inner.in_flight {
                debug!("Page request already in flight, coalescing");
                return Ok(false);
            }
            let initial = inner.state == FeedState::Loading && inner.next_page == 0;
            if !(initial || inner.state == FeedState::Loaded) {
                return Ok(false);
            }
            let Some(location_id) = inner.location_id.clone() else {
                return Ok(false);
            };
            inner.in_flight = true;
            inner.state = FeedState::Loading;
            let query = ReviewQuery {
                location_id,
                page: inner.next_page,
                page_size: self.page_size,
                sort_key: inner.sort_key,
                direction: inner.direction,
            };
            (query, inner.generation)
        };

        let result = self.gateway.fetch_reviews(&query).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!(
                location_id = %query.location_id,
                page = query.page,
                "Discarding superseded review page"
            );
            return Ok(false);
        }
        inner.in_flight = false;

        match result {
            Ok(page) => {
                let mut present: HashSet<String> =
                    inner.entries.iter().map(|r| r.id.clone()).collect();
                let fresh: Vec<ReviewRecord> = page
                    .reviews
                    .into_iter()
                    .filter(|r| present.insert(r.id.clone()))
                    .collect();
                let appended = fresh.len();
                inner.entries.extend(fresh);
                inner.next_page += 1;
                inner.state = if page.has_more {
                    FeedState::Loaded
                } else {
                    FeedState::Exhausted
                };
                debug!(
                    location_id = %query.location_id,
                    page = query.page,
                    appended,
                    total = inner.entries.len(),
                    "Review page loaded"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(location_id = %query.location_id, page = query.page, error = %e, "Review page failed");
                inner.state = FeedState::Errored(e.to_string());
                Err(e)
            }
        }
    }

    /// The last rendered entry became visible
    pub async fn on_last_entry_visible(&self) -> Result<bool> {
        self.load_next_page().await
    }

    /// Re-request the page that failed, keeping loaded entries
    pub async fn retry(&self) -> Result<bool> {
        {
            let mut inner = self.inner.lock().await;
            if !matches!(inner.state, FeedState::Errored(_)) {
                return Ok(false);
            }
            inner.state = if inner.next_page == 0 {
                FeedState::Loading
            } else {
                FeedState::Loaded
            };
        }
        self.load_next_page().await
    }

    /// Same key flips direction; a new key sorts descending. Restarts at page 0.
    pub async fn toggle_sort(&self, sort_key: SortKey) -> Result<bool> {
        {
            let mut inner = self.inner.lock().await;
            let Some(location_id) = inner.location_id.clone() else {
                return Ok(false);
            };
            if inner.sort_key == sort_key {
                inner.direction = inner.direction.flipped();
            } else {
                inner.sort_key = sort_key;
                inner.direction = SortDirection::Descending;
            }
            inner.reset(Some(location_id), FeedState::Loading);
        }
        self.load_next_page().await
    }

    /// Vote on a review in the feed
    ///
    /// Voting the way the user already voted removes the vote. Counts come
    /// from the server response.
    pub async fn rate(&self, review_id: &str, action: VoteAction) -> Result<VoteCounts> {
        let user = self.session.require_user("rate review").await?;

        let effective = {
            let inner = self.inner.lock().await;
            let entry = inner
                .entries
                .iter()
                .find(|r| r.id == review_id)
                .ok_or_else(|| Error::NotFound(format!("review {} not in feed", review_id)))?;
            match (entry.vote_of(&user), action) {
                (Some(current), requested) if current == requested => VoteAction::Remove,
                (_, requested) => requested,
            }
        };

        let counts = self.gateway.rate_review(review_id, &user, effective).await?;

        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.iter_mut().find(|r| r.id == review_id) {
            entry.likes.remove(&user);
            entry.dislikes.remove(&user);
            match effective {
                VoteAction::Like => {
                    entry.likes.insert(user.clone());
                }
                VoteAction::Dislike => {
                    entry.dislikes.insert(user.clone());
                }
                VoteAction::Remove => {}
            }
            entry.likes_count = counts.likes_count;
            entry.dislikes_count = counts.dislikes_count;
        }
        debug!(review_id, action = effective.as_str(), "Review vote applied");
        Ok(counts)
    }

    pub async fn state(&self) -> FeedState {
        self.inner.lock().await.state.clone()
    }

    pub async fn entries(&self) -> Vec<ReviewRecord> {
        self.inner.lock().await.entries.clone()
    }

    pub async fn location_id(&self) -> Option<LocationId> {
        self.inner.lock().await.location_id.clone()
    }

    pub async fn sort(&self) -> (SortKey, SortDirection) {
        let inner = self.inner.lock().await;
        (inner.sort_key, inner.direction)
    }
}
