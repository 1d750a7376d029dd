//! End-to-end behavior of the engine against the in-memory backend
//!
//! Race scenarios run on paused tokio time: backend latency is simulated
//! with `sleep`, so completion order is deterministic.

mod helpers;

use std::time::Duration;

use helpers::{id, library, typed, TestEngine, USER};
use sfr_common::config::EngineConfig;
use sfr_common::events::{EngineEvent, Origin};
use sfr_common::model::{Ratings, ReviewSubmission, SortDirection, SortKey};
use sfr_common::Error;
use sfr_engine::aggregation::AggregateStatus;
use sfr_engine::backend::memory::Op;
use sfr_engine::categories::Category;
use sfr_engine::feed::FeedState;
use sfr_engine::selection::SelectionState;

fn scores(entries: &[sfr_engine::categories::CategoryEntry]) -> Vec<f64> {
    entries.iter().filter_map(|e| e.score).collect()
}

// ================================================================================================
// Categories
// ================================================================================================

#[tokio::test]
async fn test_quiet_study_ranks_and_filters() {
    let t = TestEngine::start(vec![
        library("q42", "Quiet 4.2"),
        library("q21", "Loud 2.1"),
        library("q35", "Quiet 3.5"),
        library("q30", "Quiet 3.0"),
    ])
    .await;
    t.seed_quietness("q42", &[5, 5, 4, 4, 3]).await;
    t.seed_quietness("q21", &[3, 2, 2, 2, 2, 2, 2, 2, 2, 2]).await;
    t.seed_quietness("q35", &[4, 3]).await;
    t.seed_quietness("q30", &[3]).await;

    let entries = t.engine.set_category(Category::QuietStudy).await;

    assert_eq!(scores(&entries), vec![4.2, 3.5, 3.0]);
    assert_eq!(entries[0].location_id, id("q42"));
    // unrated seed libraries are excluded, not ranked as zero
    assert!(entries.iter().all(|e| e.aggregate.is_some()));
}

#[tokio::test]
async fn test_quiet_study_ranks_every_kind_of_location() {
    let t = TestEngine::start(vec![
        typed("r42", "Noodle Bar Annex", "restaurant"),
        typed("r21", "Food Court", "restaurant"),
        typed("s35", "Campus Bookstore", "store"),
        typed("u30", "Reitz Union", "university"),
    ])
    .await;
    t.seed_quietness("r42", &[5, 5, 4, 4, 3]).await;
    t.seed_quietness("r21", &[3, 2, 2, 2, 2, 2, 2, 2, 2, 2]).await;
    t.seed_quietness("s35", &[4, 3]).await;
    t.seed_quietness("u30", &[3]).await;

    let entries = t.engine.set_category(Category::QuietStudy).await;

    assert_eq!(scores(&entries), vec![4.2, 3.5, 3.0]);
    let order: Vec<_> = entries.iter().map(|e| e.location_id.to_string()).collect();
    assert_eq!(order, vec!["r42", "s35", "u30"]);
}

#[tokio::test]
async fn test_ranked_categories_never_refetch_known_aggregates() {
    let t = TestEngine::start(vec![library("a", "A"), library("b", "B")]).await;
    t.seed_quietness("a", &[4]).await;

    t.engine.set_category(Category::QuietStudy).await;
    let calls = t.backend.calls(Op::FetchReviews).await;

    t.engine.set_category(Category::PopularStudy).await;
    t.engine.set_category(Category::ConvenienceStudy).await;
    assert_eq!(t.backend.calls(Op::FetchReviews).await, calls);
}

#[tokio::test]
async fn test_failed_aggregate_is_retried_on_next_ranking() {
    let t = TestEngine::start(vec![library("a", "A")]).await;
    t.seed_quietness("a", &[5]).await;
    t.backend.fail_always(Op::FetchReviews).await;

    assert!(t.engine.set_category(Category::QuietStudy).await.is_empty());

    t.backend.heal(Op::FetchReviews).await;
    let entries = t.engine.locations_in(Category::QuietStudy).await;
    assert_eq!(scores(&entries), vec![5.0]);
}

#[tokio::test]
async fn test_popular_ties_break_on_review_count() {
    let t = TestEngine::start(vec![library("few", "Few"), library("many", "Many")]).await;
    t.seed_quietness("few", &[4]).await;
    t.seed_quietness("many", &[4, 4, 4]).await;

    let entries = t.engine.set_category(Category::PopularStudy).await;
    let order: Vec<_> = entries.iter().map(|e| e.location_id.to_string()).collect();
    assert_eq!(order, vec!["many", "few"]);
}

#[tokio::test]
async fn test_top_n_truncation() {
    let mut config = EngineConfig::default();
    config.categories.top_n = 2;
    let remote = (0..5).map(|n| library(&format!("l{}", n), "Lib")).collect();
    let t = TestEngine::with_config(remote, config).await;
    for n in 0..5 {
        t.seed_quietness(&format!("l{}", n), &[5]).await;
    }

    assert_eq!(t.engine.set_category(Category::QuietStudy).await.len(), 2);
}

#[tokio::test]
async fn test_favorites_keep_locations_that_left_the_catalog() {
    let t = TestEngine::start(vec![library("gone", "Closing Soon")]).await.signed_in().await;
    assert!(t.engine.toggle_bookmark(&id("gone")).await.unwrap());

    t.backend.set_locations(Vec::new()).await;
    t.engine.load_locations().await.unwrap();
    assert!(t.engine.location(&id("gone")).await.is_err());

    let favorites = t.engine.set_category(Category::Favorites).await;
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].name, "Closing Soon");
    assert!(!favorites[0].in_catalog());
    assert!(favorites[0].coordinates.is_some());

    // still removable through the captured display fields
    assert!(!t.engine.toggle_bookmark(&id("gone")).await.unwrap());
    assert!(t.engine.set_category(Category::Favorites).await.is_empty());
}

// ================================================================================================
// Aggregation
// ================================================================================================

#[tokio::test]
async fn test_aggregate_independent_of_page_size() {
    let mut aggregates = Vec::new();
    for page_size in [1, 3, 100] {
        let mut config = EngineConfig::default();
        config.feed.aggregate_page_size = page_size;
        config.feed.page_size = 2;
        let t = TestEngine::with_config(vec![library("lib", "Lib")], config).await;
        t.seed_quietness("lib", &[1, 2, 3, 4, 5, 5, 4]).await;

        aggregates.push(t.engine.cache().fetch(&id("lib")).await.unwrap().unwrap());
    }

    assert_eq!(aggregates[0].review_count, 7);
    assert_eq!(aggregates[0], aggregates[1]);
    assert_eq!(aggregates[1], aggregates[2]);
}

#[tokio::test]
async fn test_zero_reviews_produce_no_aggregate() {
    let t = TestEngine::start(vec![library("empty", "Empty")]).await;
    let empty = id("empty");

    assert_eq!(t.engine.aggregate(&empty).await, AggregateStatus::Pending);
    assert_eq!(t.engine.cache().fetch(&empty).await.unwrap(), None);
    assert_eq!(t.engine.aggregate(&empty).await, AggregateStatus::Unrated);
    assert!(t.engine.set_category(Category::PopularStudy).await.is_empty());
}

#[tokio::test]
async fn test_resubmission_updates_instead_of_duplicating() {
    let t = TestEngine::start(vec![library("lib", "Lib")]).await.signed_in().await;
    let lib = id("lib");
    let submit = |quietness| ReviewSubmission {
        ratings: Ratings::new(quietness, 3, 3, 3, 3),
        comment: Some("again".to_string()),
    };

    let first = t.engine.submit_review(&lib, submit(2)).await.unwrap();
    t.engine.cache().fetch(&lib).await.unwrap();
    let second = t.engine.submit_review(&lib, submit(5)).await.unwrap();

    assert_eq!(first.id, second.id);
    let aggregate = t.engine.cache().fetch(&lib).await.unwrap().unwrap();
    assert_eq!(aggregate.review_count, 1);
    assert_eq!(aggregate.quietness, 5.0);
    assert_eq!(t.engine.own_review(&lib).await.unwrap().unwrap().ratings.quietness, 5);
}

#[tokio::test]
async fn test_foreign_review_update_invalidates_cache() {
    let t = TestEngine::start(vec![library("lib", "Lib")]).await;
    let lib = id("lib");
    t.seed_quietness("lib", &[2]).await;
    t.engine.cache().fetch(&lib).await.unwrap();
    let listener = t.engine.spawn_event_listener();

    t.seed_quietness("lib", &[2, 4]).await;
    t.engine
        .event_bus()
        .emit(EngineEvent::ReviewsUpdated {
            origin: Origin::new(),
            location_id: lib.clone(),
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

    let mut invalidated = false;
    for _ in 0..50 {
        if t.engine.cache().peek(&lib).await.is_none() {
            invalidated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(invalidated);
    assert_eq!(t.engine.cache().fetch(&lib).await.unwrap().unwrap().review_count, 2);
    listener.abort();
}

// ================================================================================================
// Selection and feed races
// ================================================================================================

#[tokio::test(start_paused = true)]
async fn test_last_selection_wins() {
    let t = TestEngine::start(vec![library("a", "A"), library("b", "B")])
        .await
        .signed_in()
        .await;
    t.seed_quietness("a", &[1]).await;
    t.seed_quietness("b", &[5, 5]).await;
    t.backend.set_review_latency(&id("a"), Duration::from_millis(500)).await;
    t.backend.set_review_latency(&id("b"), Duration::from_millis(50)).await;

    let slow = {
        let engine = t.engine.clone();
        tokio::spawn(async move { engine.select(&id("a")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    t.engine.select(&id("b")).await.unwrap();
    slow.await.unwrap().unwrap();

    match t.engine.selection().await {
        SelectionState::Ready(data) => {
            assert_eq!(data.location_id, id("b"));
            assert_eq!(data.aggregate.unwrap().review_count, 2);
        }
        other => panic!("unexpected state {:?}", other),
    }
    assert_eq!(t.engine.feed().location_id().await, Some(id("b")));
    assert_eq!(t.engine.feed().entries().await.len(), 2);
    assert!(t.engine.is_highlighted(&id("b")).await);
    assert!(!t.engine.is_highlighted(&id("a")).await);
}

#[tokio::test(start_paused = true)]
async fn test_deselect_discards_in_flight_selection() {
    let t = TestEngine::start(vec![library("a", "A")]).await;
    t.backend.set_review_latency(&id("a"), Duration::from_millis(200)).await;

    let pending = {
        let engine = t.engine.clone();
        tokio::spawn(async move { engine.select(&id("a")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(t.engine.selection().await, SelectionState::Selecting(id("a")));
    t.engine.deselect().await;
    pending.await.unwrap().unwrap();

    assert_eq!(t.engine.selection().await, SelectionState::None);
    assert_eq!(t.engine.feed().state().await, FeedState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_coalesced_page_requests() {
    let t = TestEngine::start(vec![library("lib", "Lib")]).await;
    t.seed_quietness("lib", &[3; 12]).await;
    t.backend.set_review_latency(&id("lib"), Duration::from_millis(100)).await;
    let feed = t.engine.feed();
    feed.open(&id("lib"), SortKey::CreatedAt, SortDirection::Descending).await;

    let (first, second) = tokio::join!(feed.load_next_page(), feed.on_last_entry_visible());
    assert_ne!(first.unwrap(), second.unwrap());
    assert_eq!(t.backend.calls(Op::FetchReviews).await, 1);

    let (third, fourth) = tokio::join!(feed.on_last_entry_visible(), feed.on_last_entry_visible());
    assert_ne!(third.unwrap(), fourth.unwrap());
    assert_eq!(t.backend.calls(Op::FetchReviews).await, 2);

    let entries = feed.entries().await;
    let mut ids: Vec<_> = entries.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);
    assert_eq!(entries.len(), 10);
}

// ================================================================================================
// Bookmarks
// ================================================================================================

#[tokio::test]
async fn test_bookmark_round_trip_with_midway_failures() {
    let t = TestEngine::start(vec![]).await.signed_in().await;
    let west = id("2");
    let mut rx = t.engine.subscribe();

    // add fails at the user association: rolled back
    t.backend.fail_once(Op::AddUserBookmark).await;
    assert!(t.engine.toggle_bookmark(&west).await.is_err());
    assert!(!t.engine.is_bookmarked(&west).await);
    assert!(t.backend.user_bookmark_ids(USER).await.is_empty());

    assert!(t.engine.toggle_bookmark(&west).await.unwrap());
    assert!(t.engine.is_bookmarked(&west).await);
    assert_eq!(t.backend.user_bookmark_ids(USER).await.len(), 1);

    // remove fails at the user detachment: bookmark restored
    t.backend.fail_once(Op::RemoveUserBookmark).await;
    assert!(t.engine.toggle_bookmark(&west).await.is_err());
    assert!(t.engine.is_bookmarked(&west).await);
    assert_eq!(t.backend.user_bookmark_ids(USER).await.len(), 1);

    assert!(!t.engine.toggle_bookmark(&west).await.unwrap());
    assert!(!t.engine.is_bookmarked(&west).await);
    assert!(t.backend.user_bookmark_ids(USER).await.is_empty());
    assert_eq!(t.backend.global_bookmark_count().await, 0);

    let mut rollbacks = 0;
    let mut changes = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::BookmarkRolledBack { .. } => rollbacks += 1,
            EngineEvent::BookmarksChanged { .. } => changes += 1,
            _ => {}
        }
    }
    assert_eq!((rollbacks, changes), (2, 2));
    assert!(!t.engine.refresh_bookmarks().await.unwrap());
}

#[tokio::test]
async fn test_bookmark_requires_sign_in() {
    let t = TestEngine::start(vec![]).await;
    let mut rx = t.engine.subscribe();

    let err = t.engine.toggle_bookmark(&id("1")).await.unwrap_err();
    assert!(matches!(err, Error::Unauthenticated(_)));
    assert!(matches!(
        rx.try_recv().unwrap(),
        EngineEvent::AuthenticationRequired { .. }
    ));
    assert_eq!(t.backend.calls(Op::AddBookmark).await, 0);
}

#[tokio::test]
async fn test_second_instance_picks_up_bookmark_change() {
    let t = TestEngine::start(vec![]).await.signed_in().await;
    let other = sfr_engine::bookmarks::BookmarkReconciler::new(
        sfr_engine::backend::Gateway::new(t.backend.clone(), Duration::from_secs(5)),
        t.engine.session().clone(),
        t.engine.event_bus().clone(),
    );
    let mut rx = t.engine.subscribe();

    t.engine.toggle_bookmark(&id("3")).await.unwrap();
    let event = rx.recv().await.unwrap();

    assert!(other.handle_event(&event).await.unwrap());
    assert!(other.contains(&id("3")).await);
    assert!(!t.engine.bookmark_reconciler().handle_event(&event).await.unwrap());
}
