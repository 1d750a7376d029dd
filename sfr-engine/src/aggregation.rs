//! Review aggregation cache
//!
//! Per-location means are always computed from the complete review list,
//! walked page by page at `aggregate_page_size`, never from the pages the
//! feed happens to have loaded. Results are cached for the session; an
//! invalidation epoch keeps a computation that started before a review
//! submission from storing its stale result afterwards.

use crate::backend::Gateway;
use chrono::Utc;
use sfr_common::events::{EngineEvent, EventBus};
use sfr_common::model::{ReviewAggregate, ReviewQuery, ReviewRecord, SortDirection, SortKey};
use sfr_common::{LocationId, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Answer of a non-blocking cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateStatus {
    Ready(ReviewAggregate),
    /// Fetched; the location has no reviews
    Unrated,
    /// Being computed; an `AggregateUpdated` event follows
    Pending,
}

/// Registration of one running computation
struct Flight {
    ticket: u64,
    epoch: u64,
}

#[derive(Default)]
struct CacheState {
    aggregates: HashMap<LocationId, ReviewAggregate>,
    unrated: HashSet<LocationId>,
    /// Running computations; dropping the sender wakes waiters
    in_flight: HashMap<LocationId, (u64, watch::Sender<bool>)>,
    epochs: HashMap<LocationId, u64>,
    next_ticket: u64,
}

impl CacheState {
    fn register(&mut self, id: &LocationId) -> Flight {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let epoch = self.epochs.get(id).copied().unwrap_or(0);
        let (tx, _) = watch::channel(false);
        self.in_flight.insert(id.clone(), (ticket, tx));
        Flight { ticket, epoch }
    }

    fn finish(&mut self, id: &LocationId, ticket: u64) {
        if self.in_flight.get(id).is_some_and(|(t, _)| *t == ticket) {
            if let Some((_, tx)) = self.in_flight.remove(id) {
                let _ = tx.send(true);
            }
        }
    }
}

/// Session-wide cache of review aggregates
#[derive(Clone)]
pub struct ReviewAggregationCache {
    gateway: Gateway,
    event_bus: EventBus,
    page_size: u32,
    state: Arc<Mutex<CacheState>>,
}

impl ReviewAggregationCache {
    pub fn new(gateway: Gateway, event_bus: EventBus, page_size: u32) -> Self {
        Self {
            gateway,
            event_bus,
            page_size: page_size.max(1),
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Cached status without triggering a computation
    pub async fn peek(&self, id: &LocationId) -> Option<AggregateStatus> {
        let state = self.state.lock().await;
        if let Some(aggregate) = state.aggregates.get(id) {
            Some(AggregateStatus::Ready(aggregate.clone()))
        } else if state.unrated.contains(id) {
            Some(AggregateStatus::Unrated)
        } else if state.in_flight.contains_key(id) {
            Some(AggregateStatus::Pending)
        } else {
            None
        }
    }

    /// Cached status; starts one background computation when nothing is known
    pub async fn get(&self, id: &LocationId) -> AggregateStatus {
        let flight = {
            let mut state = self.state.lock().await;
            if let Some(aggregate) = state.aggregates.get(id) {
                return AggregateStatus::Ready(aggregate.clone());
            }
            if state.unrated.contains(id) {
                return AggregateStatus::Unrated;
            }
            if state.in_flight.contains_key(id) {
                return AggregateStatus::Pending;
            }
            state.register(id)
        };

        let cache = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            // failures are logged in run(); the next get() retries
            let _ = cache.run(&id, flight).await;
        });
        AggregateStatus::Pending
    }

    /// Aggregate for `id`, computing it if needed
    ///
    /// Joins a computation already in flight instead of issuing another.
    /// `Ok(None)` means the location has no reviews.
    pub async fn fetch(&self, id: &LocationId) -> Result<Option<ReviewAggregate>> {
        loop {
            let waiter = {
                let state = self.state.lock().await;
                if let Some(aggregate) = state.aggregates.get(id) {
                    return Ok(Some(aggregate.clone()));
                }
                if state.unrated.contains(id) {
                    return Ok(None);
                }
                state.in_flight.get(id).map(|(_, tx)| tx.subscribe())
            };

            match waiter {
                Some(mut rx) => {
                    // Err means the computation was superseded; look again
                    let _ = rx.wait_for(|done| *done).await;
                }
                None => return self.compute(id).await.map(|(_, aggregate)| aggregate),
            }
        }
    }

    /// Re-read the full review list, store and return it with its aggregate
    pub async fn compute(
        &self,
        id: &LocationId,
    ) -> Result<(Vec<ReviewRecord>, Option<ReviewAggregate>)> {
        let flight = self.state.lock().await.register(id);
        self.run(id, flight).await
    }

    /// Drop the entry; computations already running will not store
    pub async fn invalidate(&self, id: &LocationId) {
        let mut state = self.state.lock().await;
        state.aggregates.remove(id);
        state.unrated.remove(id);
        *state.epochs.entry(id.clone()).or_insert(0) += 1;
        if let Some((_, tx)) = state.in_flight.remove(id) {
            let _ = tx.send(true);
        }
        debug!(location_id = %id, "Aggregate invalidated");
    }

    async fn run(
        &self,
        id: &LocationId,
        flight: Flight,
    ) -> Result<(Vec<ReviewRecord>, Option<ReviewAggregate>)> {
        let result = self.fetch_all(id).await;

        let mut state = self.state.lock().await;
        state.finish(id, flight.ticket);
        let reviews = match result {
            Ok(reviews) => reviews,
            Err(e) => {
                warn!(location_id = %id, error = %e, "Aggregate computation failed");
                return Err(e);
            }
        };

        let aggregate = ReviewAggregate::compute(id, &reviews);
        let current_epoch = state.epochs.get(id).copied().unwrap_or(0);
        if current_epoch != flight.epoch {
            debug!(location_id = %id, "Discarding aggregate computed before invalidation");
            return Ok((reviews, aggregate));
        }

        match &aggregate {
            Some(aggregate) => {
                state.unrated.remove(id);
                state.aggregates.insert(id.clone(), aggregate.clone());
            }
            None => {
                state.aggregates.remove(id);
                state.unrated.insert(id.clone());
            }
        }
        drop(state);

        self.event_bus.emit_lossy(EngineEvent::AggregateUpdated {
            location_id: id.clone(),
            rated: aggregate.is_some(),
            timestamp: Utc::now(),
        });
        Ok((reviews, aggregate))
    }

    /// Walk every page of the location's reviews
    async fn fetch_all(&self, id: &LocationId) -> Result<Vec<ReviewRecord>> {
        let mut reviews: Vec<ReviewRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut page = 0;

        loop {
            let result = self
                .gateway
                .fetch_reviews(&ReviewQuery {
                    location_id: id.clone(),
                    page,
                    page_size: self.page_size,
                    sort_key: SortKey::CreatedAt,
                    direction: SortDirection::Descending,
                })
                .await?;

            let before = reviews.len();
            for review in result.reviews {
                if seen.insert(review.id.clone()) {
                    reviews.push(review);
                }
            }
            // a page with nothing new cannot make progress
            if !result.has_more || reviews.len() == before {
                break;
            }
            page += 1;
        }

        debug!(location_id = %id, count = reviews.len(), pages = page + 1, "Fetched full review list");
        Ok(reviews)
    }
}
