//! Category filtering and ranking
//!
//! Simple categories are predicates over catalog fields. Rated categories
//! pull aggregates for every catalog member through the aggregation cache
//! (bounded concurrency; ids already known are never fetched again), apply a
//! threshold, rank, and keep the top entries.

use crate::aggregation::{AggregateStatus, ReviewAggregationCache};
use crate::catalog::LocationCatalog;
use futures::stream::{self, StreamExt};
use sfr_common::config::CategoryConfig;
use sfr_common::model::{Bookmark, Coordinates, LocationKind, LocationRecord, ReviewAggregate};
use sfr_common::{Error, LocationId, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    All,
    Libraries,
    Cafes,
    Favorites,
    PopularStudy,
    QuietStudy,
    ConvenienceStudy,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::All,
        Category::Libraries,
        Category::Cafes,
        Category::Favorites,
        Category::PopularStudy,
        Category::QuietStudy,
        Category::ConvenienceStudy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "All",
            Category::Libraries => "Libraries",
            Category::Cafes => "Cafes",
            Category::Favorites => "Favorites",
            Category::PopularStudy => "Popular Study",
            Category::QuietStudy => "Quiet Study",
            Category::ConvenienceStudy => "Convenience Study",
        }
    }

    /// Whether the category ranks by review aggregates
    pub fn is_rated(&self) -> bool {
        matches!(
            self,
            Category::PopularStudy | Category::QuietStudy | Category::ConvenienceStudy
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    /// Accepts display names and dashed/underscored short forms
    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match key.as_str() {
            "all" | "alllocations" => Ok(Category::All),
            "libraries" | "library" => Ok(Category::Libraries),
            "cafes" | "cafe" => Ok(Category::Cafes),
            "favorites" | "favourites" | "bookmarks" => Ok(Category::Favorites),
            "popularstudy" | "popular" => Ok(Category::PopularStudy),
            "quietstudy" | "quiet" => Ok(Category::QuietStudy),
            "conveniencestudy" | "convenience" => Ok(Category::ConvenienceStudy),
            _ => Err(Error::InvalidInput(format!("unknown category: {}", s))),
        }
    }
}

/// One row of a category listing
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryEntry {
    pub location_id: LocationId,
    pub name: String,
    pub coordinates: Option<Coordinates>,
    /// `None` for favorites whose location left the catalog
    pub kind: Option<LocationKind>,
    pub aggregate: Option<ReviewAggregate>,
    /// Ranking score of rated categories
    pub score: Option<f64>,
}

impl CategoryEntry {
    fn from_record(record: &LocationRecord) -> Self {
        Self {
            location_id: record.id.clone(),
            name: record.name.clone(),
            coordinates: Some(record.coordinates),
            kind: Some(record.kind),
            aggregate: None,
            score: None,
        }
    }

    fn from_bookmark(bookmark: &Bookmark) -> Self {
        Self {
            location_id: bookmark.location_id.clone(),
            name: bookmark.name.clone(),
            coordinates: bookmark.coordinates,
            kind: None,
            aggregate: None,
            score: None,
        }
    }

    pub fn in_catalog(&self) -> bool {
        self.kind.is_some()
    }
}

pub struct CategoryFilterEngine {
    cache: ReviewAggregationCache,
    rules: CategoryConfig,
}

impl CategoryFilterEngine {
    pub fn new(cache: ReviewAggregationCache, rules: CategoryConfig) -> Self {
        Self { cache, rules }
    }

    pub fn rules(&self) -> &CategoryConfig {
        &self.rules
    }

    /// Entries of `category`, in display order
    pub async fn filter(
        &self,
        category: Category,
        catalog: &LocationCatalog,
        bookmarks: &[Bookmark],
    ) -> Vec<CategoryEntry> {
        match category {
            Category::All => catalog.iter().map(CategoryEntry::from_record).collect(),
            Category::Libraries => Self::by_kind(catalog, LocationKind::Library),
            Category::Cafes => Self::by_kind(catalog, LocationKind::Cafe),
            Category::Favorites => bookmarks
                .iter()
                .map(|bookmark| match catalog.get(&bookmark.location_id) {
                    Some(record) => CategoryEntry::from_record(record),
                    None => CategoryEntry::from_bookmark(bookmark),
                })
                .collect(),
            Category::PopularStudy | Category::QuietStudy | Category::ConvenienceStudy => {
                self.ranked(category, catalog).await
            }
        }
    }

    fn by_kind(catalog: &LocationCatalog, kind: LocationKind) -> Vec<CategoryEntry> {
        catalog
            .iter()
            .filter(|record| record.kind == kind)
            .map(CategoryEntry::from_record)
            .collect()
    }

    /// Fetch aggregates not yet known, with bounded concurrency
    pub async fn ensure_aggregates(&self, ids: &[LocationId]) {
        let mut missing = Vec::new();
        for id in ids {
            match self.cache.peek(id).await {
                Some(AggregateStatus::Ready(_)) | Some(AggregateStatus::Unrated) => {}
                _ => missing.push(id.clone()),
            }
        }
        if missing.is_empty() {
            return;
        }
        debug!(count = missing.len(), "Fetching aggregates for ranking");

        let failures = stream::iter(missing)
            .map(|id| async move {
                let result = self.cache.fetch(&id).await;
                (id, result)
            })
            .buffer_unordered(self.rules.max_concurrent_fetches.max(1))
            .filter_map(|(id, result)| async move { result.err().map(|e| (id, e)) })
            .collect::<Vec<_>>()
            .await;
        for (id, e) in failures {
            warn!(location_id = %id, error = %e, "Aggregate unavailable, excluded from ranking");
        }
    }

    async fn ranked(&self, category: Category, catalog: &LocationCatalog) -> Vec<CategoryEntry> {
        let ids: Vec<LocationId> = catalog.iter().map(|r| r.id.clone()).collect();
        self.ensure_aggregates(&ids).await;

        let mut entries = Vec::new();
        for record in catalog.iter() {
            let Some(AggregateStatus::Ready(aggregate)) = self.cache.peek(&record.id).await else {
                continue;
            };
            let Some(score) = self.score(category, &aggregate) else {
                continue;
            };
            let mut entry = CategoryEntry::from_record(record);
            entry.score = Some(score);
            entry.aggregate = Some(aggregate);
            entries.push(entry);
        }

        // stable sort keeps catalog order among equal scores
        entries.sort_by(|a, b| {
            let by_score = b
                .score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal);
            let by_count = || {
                let count = |e: &CategoryEntry| e.aggregate.as_ref().map_or(0, |a| a.review_count);
                count(b).cmp(&count(a))
            };
            match category {
                Category::PopularStudy => by_score.then_with(by_count),
                _ => by_score,
            }
        });
        entries.truncate(self.rules.top_n);
        entries
    }

    /// Ranking score, or `None` when the aggregate misses the threshold
    pub fn score(&self, category: Category, aggregate: &ReviewAggregate) -> Option<f64> {
        let rules = &self.rules;
        match category {
            Category::QuietStudy => {
                (aggregate.quietness >= rules.quiet_min).then_some(aggregate.quietness)
            }
            Category::ConvenienceStudy => (aggregate.seating >= rules.convenience_seating_min
                && aggregate.internet >= rules.convenience_internet_min)
                .then_some((aggregate.seating + aggregate.internet) / 2.0),
            Category::PopularStudy => (aggregate.review_count >= rules.popular_min_reviews
                && aggregate.review_count > 0
                && aggregate.overall >= rules.popular_overall_min)
                .then_some(aggregate.overall),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(quietness: f64, seating: f64, internet: f64, overall: f64, count: usize) -> ReviewAggregate {
        ReviewAggregate {
            location_id: LocationId::parse("x").unwrap(),
            quietness,
            seating,
            vibes: 3.0,
            crowdedness: 3.0,
            internet,
            overall,
            review_count: count,
        }
    }

    fn engine() -> CategoryFilterEngine {
        use crate::backend::{Gateway, MemoryBackend};
        use sfr_common::events::EventBus;
        use std::sync::Arc;
        use std::time::Duration;

        let gateway = Gateway::new(Arc::new(MemoryBackend::new()), Duration::from_secs(1));
        let cache = ReviewAggregationCache::new(gateway, EventBus::new(8), 100);
        CategoryFilterEngine::new(cache, CategoryConfig::default())
    }

    #[test]
    fn test_category_names_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert_eq!("quiet-study".parse::<Category>().unwrap(), Category::QuietStudy);
        assert!("group study".parse::<Category>().is_err());
    }

    #[test]
    fn test_thresholds() {
        let engine = engine();

        assert_eq!(engine.score(Category::QuietStudy, &aggregate(3.0, 1.0, 1.0, 2.0, 1)), Some(3.0));
        assert_eq!(engine.score(Category::QuietStudy, &aggregate(2.9, 5.0, 5.0, 4.0, 1)), None);

        assert_eq!(
            engine.score(Category::ConvenienceStudy, &aggregate(1.0, 4.0, 3.5, 2.0, 1)),
            Some(3.75)
        );
        assert_eq!(engine.score(Category::ConvenienceStudy, &aggregate(5.0, 3.4, 5.0, 4.0, 1)), None);

        assert_eq!(engine.score(Category::PopularStudy, &aggregate(4.0, 4.0, 4.0, 3.5, 1)), Some(3.5));
        assert_eq!(engine.score(Category::PopularStudy, &aggregate(4.0, 4.0, 4.0, 3.4, 9)), None);
        assert_eq!(engine.score(Category::Libraries, &aggregate(5.0, 5.0, 5.0, 5.0, 9)), None);
    }
}
