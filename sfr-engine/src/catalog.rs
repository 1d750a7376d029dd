//! Location catalog
//!
//! Merges the built-in seed with the remote location set into one canonical,
//! classified collection. Loading is a pure merge: fetching happens in the
//! engine, which also reports fetch failures to its caller.

use sfr_common::config::CategoryConfig;
use sfr_common::model::{
    parse, Coordinates, LocationKind, LocationRecord, Provenance, RawLocation,
};
use sfr_common::LocationId;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Raw type tags that qualify an unlisted cafe
const QUALIFYING_TAGS: [&str; 3] = ["cafe", "library", "book_store"];

/// Minimum external rating that qualifies an unlisted cafe
const CANDIDATE_MIN_RATING: f64 = 4.0;

/// Keyword table for kind inference, checked in order
const KIND_KEYWORDS: [(LocationKind, &[&str]); 5] = [
    (LocationKind::Library, &["library", "libraries"]),
    (
        LocationKind::Cafe,
        &["cafe", "café", "coffee", "espresso", "teahouse", "starbucks"],
    ),
    (
        LocationKind::Restaurant,
        &["restaurant", "food", "diner", "grill", "pizza", "meal_takeaway"],
    ),
    (LocationKind::Store, &["store", "shop", "market"]),
    (
        LocationKind::University,
        &["university", "college", "school", "campus"],
    ),
];

/// Outcome counters of one catalog load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub static_loaded: usize,
    pub remote_loaded: usize,
    /// Entries whose id was already present (first occurrence wins)
    pub duplicates: usize,
    /// Entries without a usable id or coordinates
    pub skipped: usize,
}

/// Canonical, classified location collection
#[derive(Debug, Clone, Default)]
pub struct LocationCatalog {
    records: Vec<LocationRecord>,
    index: HashMap<LocationId, usize>,
}

impl LocationCatalog {
    /// Merge the seed and the remote set
    ///
    /// Seed entries come first, so a remote entry with the same canonical id
    /// as a seed entry is dropped.
    pub fn load(
        seed: Vec<RawLocation>,
        remote: Vec<RawLocation>,
        rules: &CategoryConfig,
    ) -> (Self, LoadReport) {
        let mut catalog = Self::default();
        let mut report = LoadReport::default();

        let sources = [(Provenance::Static, seed), (Provenance::Remote, remote)];
        for (provenance, raws) in sources {
            for raw in raws {
                if !raw.coordinates.is_valid() {
                    warn!(id = %raw.id, "Skipping location with invalid coordinates");
                    report.skipped += 1;
                    continue;
                }
                if catalog.index.contains_key(&raw.id) {
                    debug!(id = %raw.id, ?provenance, "Duplicate location id, keeping first");
                    report.duplicates += 1;
                    continue;
                }
                match provenance {
                    Provenance::Static => report.static_loaded += 1,
                    Provenance::Remote => report.remote_loaded += 1,
                }
                let record = classify(raw, provenance, rules);
                catalog.index.insert(record.id.clone(), catalog.records.len());
                catalog.records.push(record);
            }
        }

        info!(
            static_loaded = report.static_loaded,
            remote_loaded = report.remote_loaded,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Location catalog loaded"
        );
        (catalog, report)
    }

    /// Parse raw JSON documents, then merge them
    pub fn load_json(
        seed: &[Value],
        remote: &[Value],
        rules: &CategoryConfig,
    ) -> (Self, LoadReport) {
        let seed_parsed: Vec<RawLocation> = seed.iter().filter_map(parse::location).collect();
        let remote_parsed: Vec<RawLocation> = remote.iter().filter_map(parse::location).collect();
        let unparseable =
            (seed.len() - seed_parsed.len()) + (remote.len() - remote_parsed.len());

        let (catalog, mut report) = Self::load(seed_parsed, remote_parsed, rules);
        report.skipped += unparseable;
        (catalog, report)
    }

    pub fn get(&self, id: &LocationId) -> Option<&LocationRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn contains(&self, id: &LocationId) -> bool {
        self.index.contains_key(id)
    }

    /// Records in load order
    pub fn iter(&self) -> impl Iterator<Item = &LocationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_by_kind(&self) -> HashMap<LocationKind, usize> {
        let mut counts = HashMap::new();
        for record in &self.records {
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// The campus libraries shipped with the map view
pub fn static_seed() -> Vec<RawLocation> {
    [
        ("1", "Marston Library", 29.6479572, -82.3439199),
        ("2", "Library West", 29.6508246, -82.3417565),
        ("3", "Smathers Library", 29.6515513, -82.34281469999999),
    ]
    .into_iter()
    .filter_map(|(id, name, lat, lng)| {
        Some(RawLocation {
            id: LocationId::parse(id)?,
            coordinates: Coordinates::new(lat, lng),
            name: name.to_string(),
            icon: None,
            type_text: Some("library".to_string()),
            type_tags: vec!["library".to_string()],
            address: None,
            hours: None,
            rating: None,
            price_tier: None,
        })
    })
    .collect()
}

/// Build the canonical record for a raw location
pub fn classify(raw: RawLocation, provenance: Provenance, rules: &CategoryConfig) -> LocationRecord {
    let kind = infer_kind(&raw, rules);
    let is_study_candidate = is_study_candidate(
        kind,
        &raw.name,
        raw.rating,
        raw.price_tier,
        &raw.type_tags,
        rules,
    );
    LocationRecord {
        id: raw.id,
        coordinates: raw.coordinates,
        name: raw.name,
        kind,
        address: raw.address,
        hours: raw.hours,
        rating: raw.rating,
        price_tier: raw.price_tier,
        type_tags: raw.type_tags,
        provenance,
        is_study_candidate,
    }
}

fn kind_from_text(text: &str) -> Option<LocationKind> {
    let text = text.to_lowercase();
    KIND_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(kind, _)| *kind)
}

/// Icon hint, then the free-text type field, then type tags, then the name
pub fn infer_kind(raw: &RawLocation, rules: &CategoryConfig) -> LocationKind {
    if let Some(kind) = raw.icon.as_deref().and_then(kind_from_text) {
        return kind;
    }
    if let Some(kind) = raw.type_text.as_deref().and_then(kind_from_text) {
        return kind;
    }
    if let Some(kind) = raw.type_tags.iter().find_map(|tag| kind_from_text(tag)) {
        return kind;
    }
    if let Some(kind) = kind_from_text(&raw.name) {
        return kind;
    }
    if matches_allow_list(&raw.name, rules) {
        return LocationKind::Cafe;
    }
    LocationKind::Default
}

fn matches_allow_list(name: &str, rules: &CategoryConfig) -> bool {
    let name = name.to_lowercase();
    rules
        .cafe_allow_list
        .iter()
        .any(|entry| !entry.is_empty() && name.contains(&entry.to_lowercase()))
}

/// Whether `term` occurs in `haystack` delimited by non-alphanumerics
fn contains_word(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    haystack.match_indices(term).any(|(start, matched)| {
        let end = start + matched.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Study-candidate heuristic
///
/// Libraries always qualify. A cafe qualifies when its name is on the allow
/// list; otherwise it must carry no deny-list term and show one quality
/// signal (rating, price tier, or a qualifying raw type tag).
pub fn is_study_candidate(
    kind: LocationKind,
    name: &str,
    rating: Option<f64>,
    price_tier: Option<u8>,
    type_tags: &[String],
    rules: &CategoryConfig,
) -> bool {
    match kind {
        LocationKind::Library => true,
        LocationKind::Cafe => {
            if matches_allow_list(name, rules) {
                return true;
            }
            let lowered = name.to_lowercase();
            if rules
                .cafe_deny_list
                .iter()
                .any(|term| contains_word(&lowered, &term.to_lowercase()))
            {
                return false;
            }
            rating.is_some_and(|r| r >= CANDIDATE_MIN_RATING)
                || price_tier.is_some_and(|p| p > 0)
                || type_tags
                    .iter()
                    .any(|tag| QUALIFYING_TAGS.contains(&tag.as_str()))
        }
        _ => false,
    }
}
