//! Records exchanged between the engine and its collaborators
//!
//! Backend JSON is loosely shaped; [`parse`] converts it into these strict
//! records once, at the collaborator boundary.

pub mod parse;

use crate::ids::LocationId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ========================================
// Locations
// ========================================

/// Category/type tag inferred for a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Library,
    Cafe,
    Restaurant,
    Store,
    University,
    Default,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Library => "library",
            LocationKind::Cafe => "cafe",
            LocationKind::Restaurant => "restaurant",
            LocationKind::Store => "store",
            LocationKind::University => "university",
            LocationKind::Default => "default",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a location record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Built-in seed shipped with the client
    Static,
    /// Fetched from the backend
    Remote,
}

/// WGS84 coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite and within latitude/longitude range
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Opening hours as reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpeningHours {
    pub open: Option<String>,
    pub close: Option<String>,
    /// Weekday names the hours apply to
    #[serde(default)]
    pub days: Vec<String>,
}

/// A location as it arrived from a source, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct RawLocation {
    pub id: LocationId,
    pub coordinates: Coordinates,
    pub name: String,
    /// Icon URL or icon name hint
    pub icon: Option<String>,
    /// Free-text type field (`type` or `description`)
    pub type_text: Option<String>,
    /// Provider type tags (`types` array), lowercased
    pub type_tags: Vec<String>,
    pub address: Option<String>,
    pub hours: Option<OpeningHours>,
    /// External rating, clamped to 0-5
    pub rating: Option<f64>,
    pub price_tier: Option<u8>,
}

/// Canonical, classified location record
///
/// Immutable once built by the catalog; a re-fetch replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: LocationId,
    pub coordinates: Coordinates,
    pub name: String,
    pub kind: LocationKind,
    pub address: Option<String>,
    pub hours: Option<OpeningHours>,
    pub rating: Option<f64>,
    pub price_tier: Option<u8>,
    #[serde(default)]
    pub type_tags: Vec<String>,
    pub provenance: Provenance,
    pub is_study_candidate: bool,
}

// ========================================
// Reviews
// ========================================

/// The five rating dimensions of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Quietness,
    Seating,
    Vibes,
    Crowdedness,
    Internet,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Quietness,
        Dimension::Seating,
        Dimension::Vibes,
        Dimension::Crowdedness,
        Dimension::Internet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Quietness => "quietness",
            Dimension::Seating => "seating",
            Dimension::Vibes => "vibes",
            Dimension::Crowdedness => "crowdedness",
            Dimension::Internet => "internet",
        }
    }
}

/// Star ratings, each 1-5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    pub quietness: u8,
    pub seating: u8,
    pub vibes: u8,
    pub crowdedness: u8,
    pub internet: u8,
}

impl Ratings {
    pub fn new(quietness: u8, seating: u8, vibes: u8, crowdedness: u8, internet: u8) -> Self {
        Self {
            quietness,
            seating,
            vibes,
            crowdedness,
            internet,
        }
    }

    pub fn get(&self, dimension: Dimension) -> u8 {
        match dimension {
            Dimension::Quietness => self.quietness,
            Dimension::Seating => self.seating,
            Dimension::Vibes => self.vibes,
            Dimension::Crowdedness => self.crowdedness,
            Dimension::Internet => self.internet,
        }
    }

    /// Reject any dimension outside 1-5 (an unset star widget reports 0)
    pub fn validate(&self) -> Result<()> {
        for dimension in Dimension::ALL {
            let value = self.get(dimension);
            if !(1..=5).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "{} rating must be between 1 and 5, got {}",
                    dimension.as_str(),
                    value
                )));
            }
        }
        Ok(())
    }
}

/// A single user's review of a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Canonical review id
    pub id: String,
    pub location_id: LocationId,
    /// Author email
    pub author: String,
    pub author_name: Option<String>,
    pub profile_picture: Option<String>,
    pub ratings: Ratings,
    pub comment: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes: BTreeSet<String>,
    #[serde(default)]
    pub dislikes: BTreeSet<String>,
    pub likes_count: u32,
    pub dislikes_count: u32,
}

impl ReviewRecord {
    /// The vote `user` currently holds on this review, if any
    pub fn vote_of(&self, user: &str) -> Option<VoteAction> {
        if self.likes.contains(user) {
            Some(VoteAction::Like)
        } else if self.dislikes.contains(user) {
            Some(VoteAction::Dislike)
        } else {
            None
        }
    }
}

/// New or updated review content
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewSubmission {
    pub ratings: Ratings,
    pub comment: Option<String>,
}

/// Vote applied to somebody else's review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Like,
    Dislike,
    Remove,
}

impl VoteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteAction::Like => "like",
            VoteAction::Dislike => "dislike",
            VoteAction::Remove => "remove",
        }
    }
}

/// Vote totals returned after rating a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteCounts {
    pub likes_count: u32,
    pub dislikes_count: u32,
}

/// Review feed ordering field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortKey {
    #[serde(rename = "created_at")]
    CreatedAt,
    #[serde(rename = "likes")]
    Likes,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::Likes => "likes",
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created_at" | "date" => Ok(SortKey::CreatedAt),
            "likes" => Ok(SortKey::Likes),
            other => Err(Error::InvalidInput(format!("unknown sort key: {}", other))),
        }
    }
}

/// Review feed ordering direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Descending,
    Ascending,
}

impl SortDirection {
    /// Wire encoding used by the review endpoint (`-1` newest/most first)
    pub fn as_wire(&self) -> &'static str {
        match self {
            SortDirection::Descending => "-1",
            SortDirection::Ascending => "1",
        }
    }

    pub fn flipped(&self) -> Self {
        match self {
            SortDirection::Descending => SortDirection::Ascending,
            SortDirection::Ascending => SortDirection::Descending,
        }
    }
}

/// Parameters for one page of a location's review list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewQuery {
    pub location_id: LocationId,
    /// 0-based page number
    pub page: u32,
    pub page_size: u32,
    pub sort_key: SortKey,
    pub direction: SortDirection,
}

/// One page of reviews plus the server's continuation signal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewPage {
    pub reviews: Vec<ReviewRecord>,
    pub has_more: bool,
}

/// Per-location means of every review dimension
///
/// Always derived from the complete review set of a location; never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAggregate {
    pub location_id: LocationId,
    pub quietness: f64,
    pub seating: f64,
    pub vibes: f64,
    pub crowdedness: f64,
    pub internet: f64,
    /// Mean of quietness, seating, vibes and internet (crowdedness excluded)
    pub overall: f64,
    pub review_count: usize,
}

impl ReviewAggregate {
    /// Arithmetic means over every review of the location
    ///
    /// Returns `None` for an empty review set: an unrated location has no
    /// aggregate, never a zero-valued one. Reviews belonging to other locations
    /// are ignored. Each author counts once: the newest of their reviews wins,
    /// the later one in `reviews` on equal timestamps.
    pub fn compute(location_id: &LocationId, reviews: &[ReviewRecord]) -> Option<Self> {
        let mut latest: BTreeMap<&str, &ReviewRecord> = BTreeMap::new();
        for review in reviews.iter().filter(|r| &r.location_id == location_id) {
            match latest.get(review.author.as_str()) {
                Some(kept) if kept.created_at > review.created_at => {}
                _ => {
                    latest.insert(review.author.as_str(), review);
                }
            }
        }
        let own: Vec<&ReviewRecord> = latest.into_values().collect();
        if own.is_empty() {
            return None;
        }

        let count = own.len() as f64;
        let mean = |dimension: Dimension| {
            own.iter()
                .map(|review| f64::from(review.ratings.get(dimension)))
                .sum::<f64>()
                / count
        };

        let quietness = mean(Dimension::Quietness);
        let seating = mean(Dimension::Seating);
        let vibes = mean(Dimension::Vibes);
        let internet = mean(Dimension::Internet);

        Some(Self {
            location_id: location_id.clone(),
            quietness,
            seating,
            vibes,
            crowdedness: mean(Dimension::Crowdedness),
            internet,
            overall: (quietness + seating + vibes + internet) / 4.0,
            review_count: own.len(),
        })
    }

    pub fn score(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Quietness => self.quietness,
            Dimension::Seating => self.seating,
            Dimension::Vibes => self.vibes,
            Dimension::Crowdedness => self.crowdedness,
            Dimension::Internet => self.internet,
        }
    }
}

// ========================================
// Bookmarks and users
// ========================================

/// Display fields captured when a bookmark is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmarkDraft {
    pub name: String,
    pub coordinates: Coordinates,
}

impl From<&LocationRecord> for BookmarkDraft {
    fn from(location: &LocationRecord) -> Self {
        Self {
            name: location.name.clone(),
            coordinates: location.coordinates,
        }
    }
}

/// A user's bookmark of a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub location_id: LocationId,
    /// Server-side bookmark document id, when known
    pub bookmark_id: Option<String>,
    pub name: String,
    pub coordinates: Option<Coordinates>,
}

impl Bookmark {
    /// Id to use for user association/removal calls
    pub fn server_id(&self) -> String {
        self.bookmark_id
            .clone()
            .unwrap_or_else(|| self.location_id.to_place_id())
    }
}

/// Result of the global add-bookmark call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddBookmarkOutcome {
    pub bookmark_id: String,
    /// Server reported the bookmark already existed
    pub duplicate: bool,
}

/// Public profile of a user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub profile_picture: Option<String>,
}
