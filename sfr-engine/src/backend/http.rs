//! HTTP backend for the StudyFindr API
//!
//! Talks JSON to the Flask-style API (`/api/get_location_reviews`,
//! `/api/add_bookmark`, ...). Responses are handed to
//! `sfr_common::model::parse` as loose `serde_json::Value`s; this module only
//! deals with routes, status codes and transport errors.

use super::StudyBackend;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use sfr_common::model::{
    parse, AddBookmarkOutcome, Bookmark, BookmarkDraft, RawLocation, ReviewPage, ReviewQuery,
    ReviewRecord, ReviewSubmission, UserProfile, VoteAction, VoteCounts,
};
use sfr_common::{Error, LocationId, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// reqwest-backed implementation of [`StudyBackend`]
pub struct HttpBackend {
    /// HTTP client for API requests
    client: Client,
    /// API root without trailing slash, e.g. `http://localhost:5000`
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the API at `base_url`
    ///
    /// `timeout` is the transport-level bound; the gateway applies its own.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, route: &str) -> String {
        format!("{}/api/{}", self.base_url, route)
    }

    async fn get(&self, route: &str, query: &[(&str, String)]) -> Result<Value> {
        debug!(route, "GET");
        let response = self
            .client
            .get(self.url(route))
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(route, e))?;
        read_json(route, response).await
    }

    async fn post(&self, route: &str, body: &Value) -> Result<Value> {
        debug!(route, "POST");
        let response = self
            .client
            .post(self.url(route))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(route, e))?;
        read_json(route, response).await
    }
}

fn transport_error(route: &str, err: reqwest::Error) -> Error {
    Error::Network(format!("{} request failed: {}", route, err))
}

/// Pull a human-readable message out of `{"errors": {...}}` or `{"error": ..}`
fn error_message(body: &Value) -> Option<String> {
    let errors = body.get("errors").or_else(|| body.get("error"))?;
    match errors {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("general")
            .or_else(|| map.get("message"))
            .or_else(|| map.values().next())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        other => Some(other.to_string()),
    }
}

async fn read_json(route: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.map_err(|e| transport_error(route, e))?;
    let json: Value = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body)
            .map_err(|e| Error::Network(format!("{} returned malformed JSON: {}", route, e)))?
    };

    if status.is_success() {
        return Ok(json);
    }
    let message = error_message(&json).unwrap_or_else(|| status.to_string());
    if status == StatusCode::CONFLICT {
        // Callers that treat conflicts as success inspect the body themselves
        return Err(Error::Network(format!("{} conflict: {}", route, message)));
    }
    warn!(route, status = status.as_u16(), %message, "API request rejected");
    Err(Error::Network(format!("{} failed ({}): {}", route, status, message)))
}

#[async_trait]
impl StudyBackend for HttpBackend {
    async fn fetch_locations(&self) -> Result<Vec<RawLocation>> {
        let body = self.get("get_locations", &[]).await?;
        let (locations, skipped) = parse::location_list(&body)?;
        if skipped > 0 {
            warn!(skipped, "Skipped location entries without id or coordinates");
        }
        Ok(locations)
    }

    async fn fetch_reviews(&self, query: &ReviewQuery) -> Result<ReviewPage> {
        let body = self
            .get(
                "get_location_reviews",
                &[
                    ("location_id", query.location_id.to_string()),
                    ("page", query.page.to_string()),
                    ("limit", query.page_size.to_string()),
                    ("sort_by", query.sort_key.as_str().to_string()),
                    ("sort_order", query.direction.as_wire().to_string()),
                ],
            )
            .await?;
        parse::review_page(&body)
    }

    async fn fetch_user_review(
        &self,
        user: &str,
        location_id: &LocationId,
    ) -> Result<Option<ReviewRecord>> {
        let body = self
            .get(
                "get_user_review",
                &[
                    ("email", user.to_string()),
                    ("location_id", location_id.to_string()),
                ],
            )
            .await?;
        parse::optional_review(&body)
    }

    async fn submit_review(
        &self,
        user: &str,
        location_id: &LocationId,
        submission: &ReviewSubmission,
    ) -> Result<ReviewRecord> {
        let ratings = &submission.ratings;
        let body = self
            .post(
                "submit_review",
                &json!({
                    "user_email": user,
                    "location_id": location_id.as_str(),
                    "quietness": ratings.quietness,
                    "seating": ratings.seating,
                    "vibes": ratings.vibes,
                    "crowdedness": ratings.crowdedness,
                    "internet": ratings.internet,
                    "comment": submission.comment.clone().unwrap_or_default(),
                }),
            )
            .await?;
        parse::optional_review(&body)?
            .ok_or_else(|| Error::Network("submit_review returned no review".to_string()))
    }

    async fn rate_review(
        &self,
        review_id: &str,
        user: &str,
        action: VoteAction,
    ) -> Result<VoteCounts> {
        let body = self
            .post(
                "rate_review",
                &json!({
                    "review_id": review_id,
                    "user_email": user,
                    "action": action.as_str(),
                }),
            )
            .await?;
        parse::vote_counts(&body)
    }

    async fn add_bookmark(
        &self,
        draft: &BookmarkDraft,
        place_id: Option<&str>,
        user: Option<&str>,
    ) -> Result<AddBookmarkOutcome> {
        let mut body = json!({
            "name": draft.name,
            "latitude": draft.coordinates.lat,
            "longitude": draft.coordinates.lng,
        });
        if let Some(place_id) = place_id {
            body["place_id"] = json!(place_id);
        }
        if let Some(user) = user {
            body["email"] = json!(user);
        }

        // 409 carries the existing bookmark id; read it instead of failing
        let route = "add_bookmark";
        let response = self
            .client
            .post(self.url(route))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(route, e))?;
        if response.status() == StatusCode::CONFLICT {
            let text = response.text().await.map_err(|e| transport_error(route, e))?;
            let json: Value = serde_json::from_str(&text)?;
            let mut outcome = parse::add_bookmark(&json)?;
            outcome.duplicate = true;
            return Ok(outcome);
        }
        let json = read_json(route, response).await?;
        parse::add_bookmark(&json)
    }

    async fn add_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()> {
        self.post(
            "add_user_bookmark",
            &json!({ "email": user, "bookmark_id": bookmark_id }),
        )
        .await
        .map(|_| ())
    }

    async fn remove_user_bookmark(&self, user: &str, bookmark_id: &str) -> Result<()> {
        self.post(
            "remove_user_bookmark",
            &json!({ "email": user, "bookmark_id": bookmark_id }),
        )
        .await
        .map(|_| ())
    }

    async fn remove_bookmark(&self, bookmark_id: &str) -> Result<()> {
        self.post("remove_bookmark", &json!({ "bookmark_id": bookmark_id }))
            .await
            .map(|_| ())
    }

    async fn fetch_user_bookmarks(&self, user: &str) -> Result<Vec<Bookmark>> {
        let body = self
            .get("get_user_bookmarks", &[("email", user.to_string())])
            .await?;
        parse::bookmark_list(&body)
    }

    async fn fetch_user_profile(&self, user: &str) -> Result<UserProfile> {
        let body = self.get("get_user", &[("email", user.to_string())]).await?;
        parse::user_profile(&body)
    }

    async fn update_user_profile(&self, user: &str, username: &str) -> Result<UserProfile> {
        let route = "update_profile";
        let form = reqwest::multipart::Form::new()
            .text("email", user.to_string())
            .text("username", username.to_string());
        let response = self
            .client
            .post(self.url(route))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(route, e))?;
        let body = read_json(route, response).await?;
        parse::user_profile(&body)
    }
}
