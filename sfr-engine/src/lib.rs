//! # StudyFindr Engine Library (sfr-engine)
//!
//! Location-interaction state engine behind the map and list views.
//!
//! **Purpose:** Keep map and list pointed at the same selected location,
//! maintain an optimistic bookmark set, cache per-location review aggregates
//! for category rankings, and page through sorted review feeds.
//!
//! **Architecture:** Every component talks to the server through the
//! [`backend::Gateway`], which bounds each call with a timeout. The
//! [`engine::StudyEngine`] owns all components and the event bus; nothing
//! else writes to their state.

pub mod aggregation;
pub mod backend;
pub mod bookmarks;
pub mod catalog;
pub mod categories;
pub mod engine;
pub mod feed;
pub mod selection;
pub mod session;

pub use engine::StudyEngine;
pub use sfr_common::{Error, LocationId, Result};
