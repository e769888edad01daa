#![forbid(unsafe_code)]

//! The randomized daily sampling strategy.
//!
//! A batch is drawn by visiting regions in uniformly random order and, inside
//! each region, visiting categories in uniformly random order. The shuffles
//! are a correctness property, not a nicety: the day's API quota regularly
//! runs out mid-batch, and without them whichever region or category happened
//! to be enumerated first would be systematically over-represented across the
//! accumulated dataset. The RNG is injected so tests can pin the visit order.
//!
//! Quota handling is asymmetric on purpose. Quota exhaustion is a global
//! resource state, so it is re-raised out of the category loop and stops the
//! whole fetch, keeping what earlier regions already produced. Any other
//! failure is local: the category (or region) is logged and skipped.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use log::{error, info, warn};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::dataset::VideoRecord;
use crate::youtube::{
    ApiError, ChannelStatistics, SearchQuery, VideoApi, VideoItem, parse_count, parse_duration,
};

/// Category ids the platform assigns to uploads, with their display names.
pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("1", "Film & Animation"),
    ("2", "Autos & Vehicles"),
    ("10", "Music"),
    ("15", "Pets & Animals"),
    ("17", "Sports"),
    ("19", "Travel & Events"),
    ("20", "Gaming"),
    ("22", "People & Blogs"),
    ("23", "Comedy"),
    ("24", "Entertainment"),
    ("25", "News & Politics"),
    ("26", "Howto & Style"),
    ("27", "Education"),
    ("28", "Science & Technology"),
    ("29", "Nonprofits & Activism"),
];

const REGION_PRESETS: &[(&str, &[&str])] = &[
    ("US", &["US"]),
    (
        "EU",
        &[
            "GB", "IE", "DE", "FR", "NL", "SE", "DK", "FI", "NO", "AT", "BE", "IT", "ES", "PT",
            "PL",
        ],
    ),
    (
        "US_EU",
        &["US", "GB", "IE", "DE", "FR", "NL", "SE", "DK", "FI", "NO"],
    ),
];

/// Expands a region selector into region codes.
///
/// Unknown selectors are passed through as a literal single code so new
/// regions work without a release.
pub fn resolve_regions(selector: &str) -> Vec<String> {
    for (name, codes) in REGION_PRESETS {
        if *name == selector {
            return codes.iter().map(|code| code.to_string()).collect();
        }
    }
    vec![selector.to_string()]
}

pub fn default_category_ids() -> Vec<String> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(id, _)| id.to_string())
        .collect()
}

pub fn category_name_for(category_id: &str) -> &'static str {
    DEFAULT_CATEGORIES
        .iter()
        .find(|(id, _)| *id == category_id)
        .map(|(_, name)| *name)
        .unwrap_or("Unknown")
}

/// Parameters for one collection run. Built fresh per invocation, never
/// persisted.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// How many days back the single-day sampling window lies.
    pub days_ago: i64,
    pub videos_per_category: u32,
    /// Explicit category ids, or `None` for the full default set.
    pub categories: Option<Vec<String>>,
    /// Preset name or literal region code.
    pub region: String,
    pub min_subscribers: u64,
    pub min_views: u64,
    /// Required views as a fraction of channel subscribers.
    pub min_view_ratio: f64,
    pub min_duration_seconds: u64,
    /// Platform-side coarse duration bucket for the search call.
    pub duration_bucket: String,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            days_ago: 7,
            videos_per_category: 5,
            categories: None,
            region: "US".to_string(),
            min_subscribers: 1000,
            min_views: 0,
            min_view_ratio: 0.0,
            min_duration_seconds: 60,
            duration_bucket: "medium".to_string(),
        }
    }
}

/// Fetches up to the requested volume of raw records across shuffled regions
/// and categories.
///
/// Quota exhaustion anywhere stops the batch and returns what earlier regions
/// collected; any other per-region failure logs and moves on.
pub fn fetch_batch<A: VideoApi, R: Rng>(
    api: &A,
    request: &FetchRequest,
    rng: &mut R,
) -> Vec<VideoRecord> {
    let mut regions = resolve_regions(&request.region);
    regions.shuffle(rng);

    info!(
        "fetching batch: {} region(s), window {} day(s) back",
        regions.len(),
        request.days_ago
    );

    // Spread the requested volume across regions instead of re-requesting the
    // full count per region.
    let per_region_limit = (request.videos_per_category / regions.len().max(1) as u32).max(1);

    let mut collected = Vec::new();
    for region_code in &regions {
        match fetch_region(api, request, region_code, per_region_limit, rng) {
            Ok(records) => collected.extend(records),
            Err(err) if err.is_quota() => {
                warn!("quota exhausted on region {region_code}, stopping batch: {err}");
                break;
            }
            Err(err) => {
                error!("region {region_code} failed: {err}");
                continue;
            }
        }
    }

    info!("collected {} raw record(s)", collected.len());
    collected
}

/// One region's pass over its shuffled categories.
///
/// Quota errors abandon the remaining categories and re-raise; other category
/// failures are logged and skipped.
fn fetch_region<A: VideoApi, R: Rng>(
    api: &A,
    request: &FetchRequest,
    region_code: &str,
    max_results: u32,
    rng: &mut R,
) -> Result<Vec<VideoRecord>, ApiError> {
    let (published_after, published_before) = day_window(Utc::now(), request.days_ago);

    let mut categories = request
        .categories
        .clone()
        .unwrap_or_else(default_category_ids);
    categories.shuffle(rng);

    let mut records = Vec::new();
    for category_id in &categories {
        let query = SearchQuery {
            published_after: &published_after,
            published_before: &published_before,
            category_id,
            region_code,
            duration_bucket: &request.duration_bucket,
            max_results,
        };
        match fetch_category(api, request, &query) {
            Ok(batch) => records.extend(batch),
            Err(err) if err.is_quota() => return Err(err),
            Err(err) => {
                error!("category {category_id} failed in region {region_code}: {err}");
                continue;
            }
        }
    }

    Ok(records)
}

/// One bounded search plus the two bulk follow-up calls, then the exact
/// minimum-duration filter the platform's coarse bucket cannot enforce.
fn fetch_category<A: VideoApi>(
    api: &A,
    request: &FetchRequest,
    query: &SearchQuery<'_>,
) -> Result<Vec<VideoRecord>, ApiError> {
    let video_ids = api.search(query)?;
    if video_ids.is_empty() {
        return Ok(Vec::new());
    }

    let items = api.video_details(&video_ids)?;

    let mut channel_ids: Vec<String> = items
        .iter()
        .map(|item| item.snippet.channel_id.clone())
        .filter(|id| !id.is_empty())
        .collect();
    channel_ids.sort_unstable();
    channel_ids.dedup();
    let channel_stats = api.channel_statistics(&channel_ids)?;

    let mut records = Vec::new();
    for item in &items {
        let record = extract_record(item, &channel_stats);
        if record.duration_seconds >= request.min_duration_seconds {
            records.push(record);
        }
    }
    Ok(records)
}

/// The inclusive start/end of the UTC calendar day `days_ago` days before
/// `now`, in the RFC 3339 shape the search endpoint expects.
fn day_window(now: DateTime<Utc>, days_ago: i64) -> (String, String) {
    let target = (now - Duration::days(days_ago)).date_naive();
    let start = target.and_time(NaiveTime::MIN);
    let end = target.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN));
    (
        start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        end.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    )
}

/// Maps one raw video item plus the bulk channel statistics into a
/// [`VideoRecord`]. Pure: no network, no randomness.
pub fn extract_record(
    item: &VideoItem,
    channel_stats: &HashMap<String, ChannelStatistics>,
) -> VideoRecord {
    let snippet = &item.snippet;
    let stats = &item.statistics;
    let content = &item.content_details;
    let channel = channel_stats.get(&snippet.channel_id);

    // Best available resolution first, empty string when nothing usable.
    let thumbnail_url = [
        snippet.thumbnails.maxres.as_ref(),
        snippet.thumbnails.high.as_ref(),
        snippet.thumbnails.medium.as_ref(),
    ]
    .into_iter()
    .flatten()
    .filter_map(|thumb| thumb.url.as_deref())
    .find(|url| !url.is_empty())
    .unwrap_or_default()
    .to_string();

    let tags = snippet
        .tags
        .iter()
        .take(10)
        .cloned()
        .collect::<Vec<_>>()
        .join("|");

    let category_id = snippet.category_id.clone().unwrap_or_default();
    let category_name = category_name_for(&category_id).to_string();

    VideoRecord {
        video_id: item.id.clone(),
        title: snippet.title.clone(),
        category_id,
        category_name,
        views: parse_count(stats.view_count.as_deref()),
        likes: parse_count(stats.like_count.as_deref()),
        comments: parse_count(stats.comment_count.as_deref()),
        channel_id: snippet.channel_id.clone(),
        channel_subscribers: parse_count(channel.and_then(|c| c.subscriber_count.as_deref())),
        channel_total_views: parse_count(channel.and_then(|c| c.view_count.as_deref())),
        channel_video_count: parse_count(channel.and_then(|c| c.video_count.as_deref())),
        tags,
        description_len: snippet.description.chars().count() as u64,
        duration_seconds: parse_duration(content.duration.as_deref().unwrap_or("PT0S")),
        definition: content.definition.clone().unwrap_or_else(|| "sd".to_string()),
        language: snippet
            .default_audio_language
            .clone()
            .unwrap_or_else(|| "en".to_string()),
        published_at: snippet.published_at.clone(),
        captured_at: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        video_url: format!("https://www.youtube.com/watch?v={}", item.id),
        thumbnail_url,
        batch_version: String::new(),
    }
}

/// Deduplicates by video id and enforces the eligibility thresholds,
/// preserving arrival order among admitted records.
///
/// The seen-set is updated only when a record is admitted. A later duplicate
/// of an admitted record is always dropped, while a later duplicate of a
/// record that failed the thresholds is evaluated again.
pub fn dedup_filter(records: Vec<VideoRecord>, request: &FetchRequest) -> Vec<VideoRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut admitted = Vec::new();

    for record in records {
        if seen.contains(&record.video_id) {
            continue;
        }
        let required_views = request
            .min_views
            .max((record.channel_subscribers as f64 * request.min_view_ratio) as u64);
        if record.channel_subscribers >= request.min_subscribers && record.views >= required_views {
            seen.insert(record.video_id.clone());
            admitted.push(record);
        }
    }

    info!("{} unique record(s) after filtering", admitted.len());
    admitted
}
