//! Shared fixtures for sfr-engine integration tests
//!
//! `TestEngine` wires a `StudyEngine` to a `MemoryBackend` that tests can
//! seed, slow down and break.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use sfr_common::config::EngineConfig;
use sfr_common::model::{Coordinates, RawLocation, Ratings, ReviewRecord};
use sfr_common::LocationId;
use sfr_engine::backend::MemoryBackend;
use sfr_engine::StudyEngine;

pub const USER: &str = "albert@ufl.edu";

/// Engine plus direct access to its backend
pub struct TestEngine {
    pub backend: Arc<MemoryBackend>,
    pub engine: Arc<StudyEngine>,
}

impl TestEngine {
    /// Built-in seed plus `remote` locations, default configuration
    pub async fn start(remote: Vec<RawLocation>) -> Self {
        Self::with_config(remote, EngineConfig::default()).await
    }

    pub async fn with_config(remote: Vec<RawLocation>, config: EngineConfig) -> Self {
        let backend = Arc::new(MemoryBackend::with_locations(remote));
        let engine = Arc::new(StudyEngine::new(config, backend.clone()));
        engine
            .load_locations()
            .await
            .expect("memory backend serves locations");
        Self { backend, engine }
    }

    pub async fn signed_in(self) -> Self {
        self.engine.sign_in(USER).await.expect("sign-in succeeds");
        self
    }

    /// Seed reviews whose quietness ratings are `scores`, one author each
    pub async fn seed_quietness(&self, location: &str, scores: &[u8]) {
        let id = id(location);
        for (n, score) in scores.iter().enumerate() {
            self.backend
                .seed_review(review(&id, &format!("{}-{}", location, n), *score))
                .await;
        }
    }
}

pub fn id(raw: &str) -> LocationId {
    LocationId::parse(raw).expect("valid location id")
}

/// A library-typed remote location near campus
pub fn library(raw_id: &str, name: &str) -> RawLocation {
    typed(raw_id, name, "library")
}

/// A remote location reported with type `kind`
pub fn typed(raw_id: &str, name: &str, kind: &str) -> RawLocation {
    RawLocation {
        id: id(raw_id),
        coordinates: Coordinates::new(29.65, -82.34),
        name: name.to_string(),
        icon: None,
        type_text: Some(kind.to_string()),
        type_tags: vec![kind.to_string()],
        address: None,
        hours: None,
        rating: None,
        price_tier: None,
    }
}

pub fn review(location: &LocationId, author: &str, quietness: u8) -> ReviewRecord {
    ReviewRecord {
        id: format!("{}-{}", location, author),
        location_id: location.clone(),
        author: format!("{}@ufl.edu", author),
        author_name: None,
        profile_picture: None,
        ratings: Ratings::new(quietness, 4, 4, 3, 4),
        comment: Some(format!("review by {}", author)),
        created_at: None,
        likes: BTreeSet::new(),
        dislikes: BTreeSet::new(),
        likes_count: 0,
        dislikes_count: 0,
    }
}
