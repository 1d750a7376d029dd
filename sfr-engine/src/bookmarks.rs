//! Bookmark reconciliation
//!
//! A bookmark lives in two server collections: a global bookmark document
//! and the user's list of bookmark ids. Toggling touches both, in order, and
//! the local set is updated optimistically before either call. Any failure
//! before the user association is settled restores the previous membership.
//!
//! Each reconciler carries an [`Origin`]; change notifications are tagged
//! with it so an instance can ignore the echo of its own toggles.

use crate::backend::Gateway;
use crate::session::Session;
use chrono::Utc;
use sfr_common::events::{EngineEvent, EventBus, Origin};
use sfr_common::model::{Bookmark, BookmarkDraft};
use sfr_common::{Error, LocationId, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Default)]
struct BookmarkState {
    /// User the entries belong to
    user: Option<String>,
    entries: BTreeMap<LocationId, Bookmark>,
    /// Locations with a toggle in flight
    in_flight: HashSet<LocationId>,
}

/// Local view of the signed-in user's bookmarks
#[derive(Clone)]
pub struct BookmarkReconciler {
    gateway: Gateway,
    session: Session,
    event_bus: EventBus,
    origin: Origin,
    state: Arc<Mutex<BookmarkState>>,
}

impl BookmarkReconciler {
    pub fn new(gateway: Gateway, session: Session, event_bus: EventBus) -> Self {
        Self {
            gateway,
            session,
            event_bus,
            origin: Origin::new(),
            state: Arc::new(Mutex::new(BookmarkState::default())),
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Add or remove a bookmark; returns the membership after the toggle
    ///
    /// Fails with `Busy` when a toggle of the same location is still running
    /// and with `Unauthenticated` without a user; neither changes state.
    pub async fn toggle(&self, location_id: &LocationId, draft: BookmarkDraft) -> Result<bool> {
        let user = self.session.require_user("bookmark location").await?;

        let previous = {
            let mut state = self.state.lock().await;
            if state.in_flight.contains(location_id) {
                return Err(Error::Busy(format!(
                    "bookmark toggle for {} in progress",
                    location_id
                )));
            }
            if state.user.as_deref() != Some(user.as_str()) {
                state.user = Some(user.clone());
                state.entries.clear();
            }
            state.in_flight.insert(location_id.clone());

            let previous = state.entries.remove(location_id);
            if previous.is_none() {
                state.entries.insert(
                    location_id.clone(),
                    Bookmark {
                        location_id: location_id.clone(),
                        bookmark_id: None,
                        name: draft.name.clone(),
                        coordinates: Some(draft.coordinates),
                    },
                );
            }
            previous
        };
        let adding = previous.is_none();

        let result = match &previous {
            None => self.add_remote(&user, location_id, &draft).await.map(Some),
            Some(existing) => self.remove_remote(&user, existing).await.map(|_| None),
        };

        let mut state = self.state.lock().await;
        state.in_flight.remove(location_id);
        let same_user = state.user.as_deref() == Some(user.as_str());

        match result {
            Ok(bookmark_id) => {
                if same_user {
                    match bookmark_id {
                        Some(id) => {
                            state.entries.insert(
                                location_id.clone(),
                                Bookmark {
                                    location_id: location_id.clone(),
                                    bookmark_id: Some(id),
                                    name: draft.name,
                                    coordinates: Some(draft.coordinates),
                                },
                            );
                        }
                        None => {
                            state.entries.remove(location_id);
                        }
                    }
                }
                drop(state);
                info!(location_id = %location_id, bookmarked = adding, "Bookmark toggled");
                self.event_bus.emit_lossy(EngineEvent::BookmarksChanged {
                    origin: self.origin,
                    user,
                    location_id: location_id.clone(),
                    bookmarked: adding,
                    timestamp: Utc::now(),
                });
                Ok(adding)
            }
            Err(e) => {
                if same_user {
                    match previous {
                        Some(existing) => {
                            state.entries.insert(location_id.clone(), existing);
                        }
                        None => {
                            state.entries.remove(location_id);
                        }
                    }
                }
                drop(state);
                warn!(
                    location_id = %location_id,
                    adding,
                    error = %e,
                    "Bookmark toggle failed, rolled back"
                );
                self.event_bus.emit_lossy(EngineEvent::BookmarkRolledBack {
                    location_id: location_id.clone(),
                    bookmarked: !adding,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Create (or find) the global document, then associate it with the user
    async fn add_remote(
        &self,
        user: &str,
        location_id: &LocationId,
        draft: &BookmarkDraft,
    ) -> Result<String> {
        let place_id = location_id.to_place_id();
        let outcome = self
            .gateway
            .add_bookmark(draft, Some(&place_id), Some(user))
            .await?;
        if outcome.duplicate {
            debug!(location_id = %location_id, bookmark_id = %outcome.bookmark_id, "Bookmark document already exists");
        }
        self.gateway
            .add_user_bookmark(user, &outcome.bookmark_id)
            .await?;
        Ok(outcome.bookmark_id)
    }

    /// Detach from the user, then drop the global document (best effort)
    async fn remove_remote(&self, user: &str, existing: &Bookmark) -> Result<()> {
        let server_id = existing.server_id();
        self.gateway.remove_user_bookmark(user, &server_id).await?;
        if let Err(e) = self.gateway.remove_bookmark(&server_id).await {
            warn!(bookmark_id = %server_id, error = %e, "Global bookmark removal failed");
        }
        Ok(())
    }

    /// Replace local state with the server's list when it differs
    ///
    /// Locations with a toggle in flight keep their optimistic membership;
    /// the toggle settles them when it completes.
    pub async fn reload(&self, user: &str) -> Result<bool> {
        let fetched = self.gateway.fetch_user_bookmarks(user).await?;
        let mut entries: BTreeMap<LocationId, Bookmark> = fetched
            .into_iter()
            .map(|b| (b.location_id.clone(), b))
            .collect();

        let mut state = self.state.lock().await;
        if state.user.as_deref() == Some(user) {
            for id in &state.in_flight {
                match state.entries.get(id) {
                    Some(pending) => {
                        entries.insert(id.clone(), pending.clone());
                    }
                    None => {
                        entries.remove(id);
                    }
                }
            }
            if state.entries == entries {
                return Ok(false);
            }
        }
        debug!(user, count = entries.len(), "Bookmarks reloaded");
        state.user = Some(user.to_string());
        state.entries = entries;
        Ok(true)
    }

    /// React to a bus event; reloads on another instance's change
    pub async fn handle_event(&self, event: &EngineEvent) -> Result<bool> {
        let EngineEvent::BookmarksChanged { origin, user, .. } = event else {
            return Ok(false);
        };
        if *origin == self.origin {
            return Ok(false);
        }
        if self.session.current_user().await.as_deref() != Some(user.as_str()) {
            return Ok(false);
        }
        self.reload(user).await
    }

    /// Forget every bookmark (sign-out)
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.user = None;
        state.entries.clear();
    }

    pub async fn contains(&self, location_id: &LocationId) -> bool {
        self.state.lock().await.entries.contains_key(location_id)
    }

    pub async fn get(&self, location_id: &LocationId) -> Option<Bookmark> {
        self.state.lock().await.entries.get(location_id).cloned()
    }

    pub async fn bookmarks(&self) -> Vec<Bookmark> {
        self.state.lock().await.entries.values().cloned().collect()
    }
}
