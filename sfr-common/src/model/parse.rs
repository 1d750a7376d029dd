//! Parsing of loosely-shaped backend JSON
//!
//! The backend (and the documents it passes through from the places provider)
//! encodes the same field in several ways: numbers as JSON numbers, numeric
//! strings or `{"$numberDouble": "..."}` wrappers; coordinates under
//! `position`, `coordinates`, `geometry.location` or at top level; ids as bare,
//! prefixed or nested values. Everything is normalized here so consuming code
//! only ever sees the strict records of [`crate::model`].

use super::{
    AddBookmarkOutcome, Bookmark, Coordinates, OpeningHours, Ratings, RawLocation, ReviewPage,
    ReviewRecord, UserProfile, VoteCounts,
};
use crate::ids::{normalize_value, LocationId};
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

/// Extended-JSON number wrappers
const NUMBER_WRAPPERS: [&str; 4] = ["$numberDouble", "$numberInt", "$numberLong", "$numberDecimal"];

/// Read a number from any of its tolerated encodings
pub fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(map) => NUMBER_WRAPPERS
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(number),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(string))
}

fn first_number(obj: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| obj.get(*key).and_then(number))
}

fn first_id(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .map(normalize_value)
        .find(|id| !id.is_empty())
}

fn lat_lng(obj: &Value) -> Option<Coordinates> {
    let lat = first_number(obj, &["lat", "latitude"])?;
    let lng = first_number(obj, &["lng", "lon", "long", "longitude"])?;
    let coordinates = Coordinates::new(lat, lng);
    coordinates.is_valid().then_some(coordinates)
}

/// Find coordinates wherever the document keeps them
pub fn coordinates(obj: &Value) -> Option<Coordinates> {
    obj.get("position")
        .and_then(lat_lng)
        .or_else(|| obj.get("coordinates").and_then(lat_lng))
        .or_else(|| {
            obj.get("geometry")
                .and_then(|g| g.get("location"))
                .and_then(lat_lng)
        })
        .or_else(|| obj.get("location").and_then(lat_lng))
        .or_else(|| lat_lng(obj))
}

/// Parse a timestamp: RFC 3339 string, epoch milliseconds, or `{"$date": ..}`
pub fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                // Python isoformat without offset
                chrono::NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            }),
        Value::Object(map) => map.get("$date").and_then(timestamp),
        other => number(other).and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
    }
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(string).collect())
        .unwrap_or_default()
}

fn hours(value: &Value) -> Option<OpeningHours> {
    if !value.is_object() {
        return None;
    }
    let hours = OpeningHours {
        open: first_string(value, &["open"]),
        close: first_string(value, &["close"]),
        days: value
            .get("days")
            .and_then(Value::as_array)
            .map(|days| days.iter().filter_map(string).collect())
            .unwrap_or_default(),
    };
    (hours.open.is_some() || hours.close.is_some() || !hours.days.is_empty()).then_some(hours)
}

/// Parse one raw location document
///
/// Returns `None` when the document has no usable id or coordinates.
pub fn location(obj: &Value) -> Option<RawLocation> {
    let id = first_id(obj, &["_id", "id", "place_id", "location_id"])
        .and_then(|id| LocationId::parse(&id))?;
    let coordinates = coordinates(obj)?;
    let name = first_string(obj, &["name", "title"]).unwrap_or_else(|| id.to_string());

    let mut type_tags: Vec<String> = obj
        .get("types")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(string).map(|t| t.to_lowercase()).collect())
        .unwrap_or_default();
    if let Some(tag) = obj.get("type").and_then(string) {
        let tag = tag.to_lowercase();
        if !type_tags.contains(&tag) {
            type_tags.push(tag);
        }
    }

    Some(RawLocation {
        id,
        coordinates,
        name,
        icon: first_string(obj, &["icon", "icon_hint", "iconType"]),
        type_text: first_string(obj, &["type", "description"]),
        type_tags,
        address: first_string(obj, &["address", "formatted_address", "vicinity"]),
        hours: obj.get("hours").and_then(hours),
        rating: first_number(obj, &["rating"]).map(|r| r.clamp(0.0, 5.0)),
        price_tier: first_number(obj, &["price_level", "price_tier"])
            .filter(|p| *p >= 0.0)
            .map(|p| p.round().min(f64::from(u8::MAX)) as u8),
    })
}

/// Parse a location set; accepts a bare array or `{"locations": [...]}`
///
/// Returns the parsed records and the number of entries that were skipped.
pub fn location_list(value: &Value) -> Result<(Vec<RawLocation>, usize)> {
    let items = list(value, &["locations", "places", "results"])?;
    let parsed: Vec<RawLocation> = items.iter().filter_map(location).collect();
    let skipped = items.len() - parsed.len();
    Ok((parsed, skipped))
}

fn list<'a>(value: &'a Value, keys: &[&str]) -> Result<&'a Vec<Value>> {
    if let Some(items) = value.as_array() {
        return Ok(items);
    }
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array))
        .ok_or_else(|| Error::Network(format!("expected a list under one of {:?}", keys)))
}

fn rating(obj: &Value, key: &str) -> Option<u8> {
    obj.get(key)
        .and_then(number)
        .map(|r| r.round())
        .filter(|r| (1.0..=5.0).contains(r))
        .map(|r| r as u8)
}

/// Parse one review document
///
/// Returns `None` when the review lacks an id, a location, an author or any
/// of the five ratings.
pub fn review(obj: &Value) -> Option<ReviewRecord> {
    let id = first_id(obj, &["_id", "id", "review_id"])?;
    let location_id = first_id(obj, &["location_id", "place_id"])
        .and_then(|id| LocationId::parse(&id))?;
    let author = first_string(obj, &["user_email", "email", "author"])?;

    let ratings = Ratings {
        quietness: rating(obj, "quietness")?,
        seating: rating(obj, "seating")?,
        vibes: rating(obj, "vibes")?,
        crowdedness: rating(obj, "crowdedness")?,
        internet: rating(obj, "internet")?,
    };

    let likes = string_set(obj.get("likes"));
    let dislikes = string_set(obj.get("dislikes"));
    let likes_count = first_number(obj, &["likes_count"])
        .map(|n| n.max(0.0) as u32)
        .unwrap_or(likes.len() as u32);
    let dislikes_count = first_number(obj, &["dislikes_count"])
        .map(|n| n.max(0.0) as u32)
        .unwrap_or(dislikes.len() as u32);

    Some(ReviewRecord {
        id,
        location_id,
        author,
        author_name: first_string(obj, &["user_name", "username"]),
        profile_picture: first_string(obj, &["profile_picture"]),
        ratings,
        comment: first_string(obj, &["comment"]),
        created_at: obj.get("created_at").and_then(timestamp),
        likes,
        dislikes,
        likes_count,
        dislikes_count,
    })
}

/// Parse `{ reviews: [...], has_more: bool }`
///
/// Malformed entries are dropped with a warning; a missing `reviews` list is a
/// malformed response.
pub fn review_page(value: &Value) -> Result<ReviewPage> {
    let items = list(value, &["reviews"])?;
    let reviews: Vec<ReviewRecord> = items.iter().filter_map(review).collect();
    if reviews.len() != items.len() {
        tracing::warn!(
            dropped = items.len() - reviews.len(),
            "Dropped malformed review entries"
        );
    }
    let has_more = value
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(ReviewPage { reviews, has_more })
}

/// Parse `{ review: ReviewRecord | null }`
pub fn optional_review(value: &Value) -> Result<Option<ReviewRecord>> {
    match value.get("review") {
        None | Some(Value::Null) => Ok(None),
        Some(obj) => review(obj)
            .map(Some)
            .ok_or_else(|| Error::Network("malformed review in response".to_string())),
    }
}

/// Parse `{ likes_count, dislikes_count }`
pub fn vote_counts(value: &Value) -> Result<VoteCounts> {
    let likes = first_number(value, &["likes_count"]);
    let dislikes = first_number(value, &["dislikes_count"]);
    match (likes, dislikes) {
        (Some(likes), Some(dislikes)) => Ok(VoteCounts {
            likes_count: likes.max(0.0) as u32,
            dislikes_count: dislikes.max(0.0) as u32,
        }),
        _ => Err(Error::Network("vote response lacks counts".to_string())),
    }
}

/// Parse one bookmark document
///
/// The location is identified by `place_id`, then `location_id`, then the
/// document id; the document id doubles as the server bookmark id.
pub fn bookmark(obj: &Value) -> Option<Bookmark> {
    let document_id = first_id(obj, &["_id", "bookmark_id", "id"]);
    let location_id = first_id(obj, &["place_id", "location_id"])
        .or_else(|| document_id.clone())
        .and_then(|id| LocationId::parse(&id))?;

    Some(Bookmark {
        name: first_string(obj, &["name"]).unwrap_or_else(|| location_id.to_string()),
        coordinates: coordinates(obj),
        bookmark_id: document_id,
        location_id,
    })
}

/// Parse a bookmark list; accepts a bare array or `{"bookmarks": [...]}`
pub fn bookmark_list(value: &Value) -> Result<Vec<Bookmark>> {
    Ok(list(value, &["bookmarks"])?
        .iter()
        .filter_map(bookmark)
        .collect())
}

/// Parse the add-bookmark response
pub fn add_bookmark(value: &Value) -> Result<AddBookmarkOutcome> {
    let duplicate = value
        .get("duplicate")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || value
            .get("message")
            .and_then(Value::as_str)
            .map(|m| m.to_lowercase().contains("already"))
            .unwrap_or(false);
    let bookmark_id = first_id(value, &["bookmark_id", "_id", "id"])
        .ok_or_else(|| Error::Network("add-bookmark response lacks an id".to_string()))?;
    Ok(AddBookmarkOutcome {
        bookmark_id,
        duplicate,
    })
}

/// Parse `{ user: { username, profile_picture } }`
pub fn user_profile(value: &Value) -> Result<UserProfile> {
    let user = value
        .get("user")
        .ok_or_else(|| Error::Network("profile response lacks user".to_string()))?;
    Ok(UserProfile {
        username: first_string(user, &["username"]).unwrap_or_default(),
        profile_picture: first_string(user, &["profile_picture"]),
    })
}
