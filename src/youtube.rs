#![forbid(unsafe_code)]

//! Blocking YouTube Data API v3 client used by the sampling pipeline.
//!
//! The API surface the pipeline depends on is captured by the [`VideoApi`]
//! trait so the fetch strategy can be exercised against scripted fakes.
//! [`YouTubeClient`] is the production implementation; it issues one request
//! at a time and maps HTTP 403/429 onto a dedicated quota error variant that
//! callers inspect with [`ApiError::is_quota`].

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

const CALL_TIMEOUT: Duration = Duration::from_secs(20);

/// Failures surfaced by the platform API.
///
/// Quota exhaustion is a global resource state and must stay distinguishable
/// from per-call failures, so it gets its own variant instead of being folded
/// into the generic status error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("quota exceeded or rate limited (HTTP {status})")]
    QuotaExceeded { status: u16 },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },
    #[error("transport failure calling {endpoint}: {message}")]
    Transport { endpoint: &'static str, message: String },
    #[error("could not decode {endpoint} response: {message}")]
    Decode { endpoint: &'static str, message: String },
}

impl ApiError {
    pub fn is_quota(&self) -> bool {
        matches!(self, ApiError::QuotaExceeded { .. })
    }
}

/// Parameters for one bounded category search.
#[derive(Debug, Clone)]
pub struct SearchQuery<'a> {
    pub published_after: &'a str,
    pub published_before: &'a str,
    pub category_id: &'a str,
    pub region_code: &'a str,
    pub duration_bucket: &'a str,
    pub max_results: u32,
}

/// The slice of the platform API the pipeline consumes.
pub trait VideoApi {
    /// Returns the ids of videos published inside the query window.
    fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<String>, ApiError>;

    /// Bulk detail lookup for the given video ids (single request).
    fn video_details(&self, ids: &[String]) -> Result<Vec<VideoItem>, ApiError>;

    /// Bulk statistics lookup for the given channel ids (single request).
    fn channel_statistics(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, ChannelStatistics>, ApiError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: Option<String>,
}

/// The resolutions the extractor cares about, best first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailSet {
    #[serde(default)]
    pub maxres: Option<Thumbnail>,
    #[serde(default)]
    pub high: Option<Thumbnail>,
    #[serde(default)]
    pub medium: Option<Thumbnail>,
}

/// `snippet` part of a video resource. Everything is optional-with-default
/// because older or region-locked videos routinely omit fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub thumbnails: ThumbnailSet,
    #[serde(default)]
    pub default_audio_language: Option<String>,
    #[serde(default)]
    pub published_at: String,
}

/// `statistics` part of a video resource. The API serializes counts as
/// decimal strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    #[serde(default)]
    pub view_count: Option<String>,
    #[serde(default)]
    pub like_count: Option<String>,
    #[serde(default)]
    pub comment_count: Option<String>,
}

/// `contentDetails` part of a video resource.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContentDetails {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub definition: Option<String>,
}

/// One item from a `videos.list` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub snippet: Snippet,
    #[serde(default)]
    pub statistics: VideoStatistics,
    #[serde(default)]
    pub content_details: ContentDetails,
}

/// `statistics` part of a channel resource, counts as decimal strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(default)]
    pub subscriber_count: Option<String>,
    #[serde(default)]
    pub view_count: Option<String>,
    #[serde(default)]
    pub video_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: SearchId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelItem {
    #[serde(default)]
    id: String,
    #[serde(default)]
    statistics: ChannelStatistics,
}

/// Production client for the YouTube Data API v3.
pub struct YouTubeClient {
    agent: ureq::Agent,
    api_key: String,
    base_url: String,
}

impl YouTubeClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, API_BASE_URL.to_string())
    }

    /// Same client against an alternate endpoint, used to point tests at a
    /// local server.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(CALL_TIMEOUT).build();
        Self {
            agent,
            api_key,
            base_url,
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.agent.get(&url).query("key", &self.api_key);
        for (name, value) in params {
            request = request.query(name, value);
        }

        match request.call() {
            Ok(response) => response.into_json::<T>().map_err(|err| ApiError::Decode {
                endpoint,
                message: err.to_string(),
            }),
            Err(ureq::Error::Status(status, _)) if status == 403 || status == 429 => {
                Err(ApiError::QuotaExceeded { status })
            }
            Err(ureq::Error::Status(status, _)) => Err(ApiError::Status { endpoint, status }),
            Err(err) => Err(ApiError::Transport {
                endpoint,
                message: err.to_string(),
            }),
        }
    }
}

impl VideoApi for YouTubeClient {
    fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<String>, ApiError> {
        let max_results = query.max_results.to_string();
        let response: SearchResponse = self.get_json(
            "search",
            &[
                ("part", "id"),
                ("publishedAfter", query.published_after),
                ("publishedBefore", query.published_before),
                ("maxResults", &max_results),
                // Newest-first keeps the sample inside the day window
                // without paging.
                ("order", "date"),
                ("type", "video"),
                ("videoCategoryId", query.category_id),
                ("regionCode", query.region_code),
                ("videoDuration", query.duration_bucket),
            ],
        )?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id)
            .filter(|id| !id.is_empty())
            .collect())
    }

    fn video_details(&self, ids: &[String]) -> Result<Vec<VideoItem>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids.join(",");
        let response: VideoListResponse = self.get_json(
            "videos",
            &[("part", "snippet,statistics,contentDetails"), ("id", &joined)],
        )?;
        Ok(response.items)
    }

    fn channel_statistics(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, ChannelStatistics>, ApiError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.join(",");
        let response: ChannelListResponse =
            self.get_json("channels", &[("part", "statistics"), ("id", &joined)])?;
        Ok(response
            .items
            .into_iter()
            .map(|item| (item.id, item.statistics))
            .collect())
    }
}

/// Converts a `PT#H#M#S` duration token into whole seconds.
///
/// Anything that does not look like an hours/minutes/seconds token (including
/// day-based `P1DT...` values, which never appear for sampled uploads) parses
/// to 0 rather than failing.
pub fn parse_duration(token: &str) -> u64 {
    let Some(rest) = token.strip_prefix("PT") else {
        return 0;
    };

    let mut seconds = 0u64;
    let mut digits = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let Ok(value) = digits.parse::<u64>() else {
            return 0;
        };
        digits.clear();
        match ch {
            'H' => seconds += value * 3600,
            'M' => seconds += value * 60,
            'S' => seconds += value,
            _ => return 0,
        }
    }
    seconds
}

/// Lenient count parsing for the API's decimal-string counters; anything
/// missing or malformed becomes 0.
pub fn parse_count(raw: Option<&str>) -> u64 {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_handles_full_token() {
        assert_eq!(parse_duration("PT1H2M3S"), 3723);
    }

    #[test]
    fn parse_duration_minutes_only() {
        assert_eq!(parse_duration("PT45M"), 2700);
    }

    #[test]
    fn parse_duration_zero_and_garbage() {
        assert_eq!(parse_duration("PT0S"), 0);
        assert_eq!(parse_duration(""), 0);
        assert_eq!(parse_duration("not-a-duration"), 0);
        assert_eq!(parse_duration("P3DT1H"), 0);
        assert_eq!(parse_duration("PTS"), 0);
    }

    #[test]
    fn parse_duration_hours_and_seconds() {
        assert_eq!(parse_duration("PT2H5S"), 7205);
        assert_eq!(parse_duration("PT90S"), 90);
    }

    #[test]
    fn parse_count_defaults_to_zero() {
        assert_eq!(parse_count(None), 0);
        assert_eq!(parse_count(Some("")), 0);
        assert_eq!(parse_count(Some("nope")), 0);
        assert_eq!(parse_count(Some("12345")), 12345);
        assert_eq!(parse_count(Some(" 7 ")), 7);
    }

    #[test]
    fn quota_error_is_distinguishable() {
        let quota = ApiError::QuotaExceeded { status: 403 };
        let status = ApiError::Status {
            endpoint: "search",
            status: 500,
        };
        assert!(quota.is_quota());
        assert!(!status.is_quota());
    }

    #[test]
    fn search_response_extracts_video_ids() {
        let payload = r#"{
            "items": [
                {"id": {"kind": "youtube#video", "videoId": "abc123"}},
                {"id": {"kind": "youtube#channel"}},
                {"id": {"videoId": ""}}
            ]
        }"#;
        let response: SearchResponse = serde_json::from_str(payload).unwrap();
        let ids: Vec<String> = response
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id)
            .filter(|id| !id.is_empty())
            .collect();
        assert_eq!(ids, vec!["abc123".to_string()]);
    }

    #[test]
    fn video_item_tolerates_missing_parts() {
        let payload = r#"{"items": [{"id": "v1", "snippet": {"title": "hello"}}]}"#;
        let response: VideoListResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(response.items.len(), 1);
        let item = &response.items[0];
        assert_eq!(item.id, "v1");
        assert_eq!(item.snippet.title, "hello");
        assert!(item.statistics.view_count.is_none());
        assert!(item.content_details.duration.is_none());
    }

    #[test]
    fn channel_response_builds_statistics_map() {
        let payload = r#"{
            "items": [
                {"id": "c1", "statistics": {"subscriberCount": "1000", "viewCount": "5", "videoCount": "2"}},
                {"id": "c2", "statistics": {}}
            ]
        }"#;
        let response: ChannelListResponse = serde_json::from_str(payload).unwrap();
        let map: HashMap<String, ChannelStatistics> = response
            .items
            .into_iter()
            .map(|item| (item.id, item.statistics))
            .collect();
        assert_eq!(parse_count(map["c1"].subscriber_count.as_deref()), 1000);
        assert_eq!(parse_count(map["c2"].subscriber_count.as_deref()), 0);
    }
}
