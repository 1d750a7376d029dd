//! # StudyFindr Common Library
//!
//! Shared code for the StudyFindr engine and its binaries:
//! - Canonical identifiers (IdentifierNormalizer)
//! - Location, review, bookmark and aggregate records
//! - Parsing of loosely-shaped backend JSON into those records
//! - Event types (EngineEvent) and the EventBus
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod model;

pub use error::{Error, Result};
pub use ids::LocationId;
