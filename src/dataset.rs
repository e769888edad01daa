#![forbid(unsafe_code)]

//! Working-set persistence: the metadata CSV and the thumbnail files that
//! accumulate under `current/` until a rotation seals them into a batch.
//!
//! The CSV is strictly append-only. The header is written exactly once when
//! the file is created and every later run appends rows in the same column
//! order, so a partially written run never corrupts earlier rows.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const METADATA_CSV_FILE: &str = "metadata.csv";

const THUMBNAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Column order of the metadata CSV. Must match the field order serialized by
/// [`VideoRecord::csv_row`]; rows are appended in this order forever once the
/// header exists.
pub const CSV_COLUMNS: &[&str] = &[
    "video_id",
    "title",
    "category_id",
    "category_name",
    "views",
    "likes",
    "comments",
    "channel_id",
    "channel_subscribers",
    "channel_total_views",
    "channel_video_count",
    "tags",
    "description_len",
    "duration_seconds",
    "definition",
    "language",
    "published_at",
    "captured_at",
    "video_url",
    "thumbnail_url",
    "batch_version",
];

/// One sampled video with its channel context.
///
/// `batch_version` is empty at extraction time; the collection binary stamps
/// it with the target batch name just before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub category_id: String,
    pub category_name: String,

    pub views: u64,
    pub likes: u64,
    pub comments: u64,

    pub channel_id: String,
    pub channel_subscribers: u64,
    pub channel_total_views: u64,
    pub channel_video_count: u64,

    /// First ten tags in source order, joined with `|`.
    pub tags: String,
    pub description_len: u64,
    pub duration_seconds: u64,
    pub definition: String,
    pub language: String,

    pub published_at: String,
    pub captured_at: String,
    pub video_url: String,
    /// May be empty when the platform exposes no usable resolution.
    pub thumbnail_url: String,
    #[serde(default)]
    pub batch_version: String,
}

impl VideoRecord {
    /// Renders the record as one CSV row in [`CSV_COLUMNS`] order.
    pub fn csv_row(&self) -> String {
        let fields = [
            csv_field(&self.video_id),
            csv_field(&self.title),
            csv_field(&self.category_id),
            csv_field(&self.category_name),
            self.views.to_string(),
            self.likes.to_string(),
            self.comments.to_string(),
            csv_field(&self.channel_id),
            self.channel_subscribers.to_string(),
            self.channel_total_views.to_string(),
            self.channel_video_count.to_string(),
            csv_field(&self.tags),
            self.description_len.to_string(),
            self.duration_seconds.to_string(),
            csv_field(&self.definition),
            csv_field(&self.language),
            csv_field(&self.published_at),
            csv_field(&self.captured_at),
            csv_field(&self.video_url),
            csv_field(&self.thumbnail_url),
            csv_field(&self.batch_version),
        ];
        fields.join(",")
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Append-only store for the working set's metadata rows.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the records, writing the header first if the file is new.
    pub fn append(&self, records: &[VideoRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let file_exists = self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;

        if !file_exists {
            writeln!(file, "{}", CSV_COLUMNS.join(","))
                .with_context(|| format!("writing header to {}", self.path.display()))?;
        }
        for record in records {
            writeln!(file, "{}", record.csv_row())
                .with_context(|| format!("appending row for {}", record.video_id))?;
        }
        Ok(())
    }

    /// Number of accumulated samples, counted as physical lines minus the
    /// header. A missing file counts as zero.
    pub fn count_samples(&self) -> Result<u64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let file =
            File::open(&self.path).with_context(|| format!("opening {}", self.path.display()))?;
        let mut lines = 0u64;
        for line in BufReader::new(file).lines() {
            line.with_context(|| format!("reading {}", self.path.display()))?;
            lines += 1;
        }
        Ok(lines.saturating_sub(1))
    }
}

/// Downloads every record's thumbnail into `output_dir` as `<video_id>.jpg`.
///
/// Best effort throughout: records without a thumbnail URL and files that
/// already exist are skipped, individual download failures are logged and do
/// not abort the pass.
pub fn download_thumbnails_bulk(records: &[VideoRecord], output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let agent = ureq::AgentBuilder::new().timeout(THUMBNAIL_TIMEOUT).build();
    info!("downloading {} thumbnail(s)", records.len());

    for record in records {
        if record.thumbnail_url.is_empty() {
            continue;
        }
        let path = output_dir.join(format!("{}.jpg", record.video_id));
        if path.exists() {
            continue;
        }
        if let Err(err) = download_thumbnail(&agent, &record.thumbnail_url, &path) {
            warn!("thumbnail download failed for {}: {err}", record.video_id);
        }
    }

    Ok(())
}

fn download_thumbnail(agent: &ureq::Agent, url: &str, path: &Path) -> Result<()> {
    let response = agent.get(url).call()?;
    let mut reader = response.into_reader();
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    io::copy(&mut reader, &mut file)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_record(video_id: &str) -> VideoRecord {
        VideoRecord {
            video_id: video_id.to_string(),
            title: "A title".to_string(),
            category_id: "10".to_string(),
            category_name: "Music".to_string(),
            views: 100,
            likes: 10,
            comments: 1,
            channel_id: "chan".to_string(),
            channel_subscribers: 5000,
            channel_total_views: 100_000,
            channel_video_count: 42,
            tags: "a|b".to_string(),
            description_len: 12,
            duration_seconds: 300,
            definition: "hd".to_string(),
            language: "en".to_string(),
            published_at: "2026-08-01T12:00:00Z".to_string(),
            captured_at: "2026-08-05T09:00:00.000000".to_string(),
            video_url: format!("https://www.youtube.com/watch?v={video_id}"),
            thumbnail_url: String::new(),
            batch_version: String::new(),
        }
    }

    #[test]
    fn csv_row_matches_column_count() {
        let row = sample_record("v1").csv_row();
        assert_eq!(row.split(',').count(), CSV_COLUMNS.len());
    }

    #[test]
    fn csv_field_quotes_specials() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn append_writes_header_exactly_once() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join(METADATA_CSV_FILE));

        store.append(&[sample_record("v1")]).unwrap();
        store
            .append(&[sample_record("v2"), sample_record("v3")])
            .unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_COLUMNS.join(","));
        assert!(lines[1].starts_with("v1,"));
        assert!(lines[3].starts_with("v3,"));
    }

    #[test]
    fn append_empty_batch_creates_nothing() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join(METADATA_CSV_FILE));
        store.append(&[]).unwrap();
        assert!(!store.path().exists());
        assert_eq!(store.count_samples().unwrap(), 0);
    }

    #[test]
    fn count_samples_excludes_header() {
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join(METADATA_CSV_FILE));
        assert_eq!(store.count_samples().unwrap(), 0);

        store
            .append(&[sample_record("v1"), sample_record("v2")])
            .unwrap();
        assert_eq!(store.count_samples().unwrap(), 2);

        store.append(&[sample_record("v3")]).unwrap();
        assert_eq!(store.count_samples().unwrap(), 3);
    }

    #[test]
    fn quoted_title_survives_a_round_trip_line() {
        let mut record = sample_record("v1");
        record.title = "Top 10, allegedly \"best\"".to_string();
        let dir = tempdir().unwrap();
        let store = CsvStore::new(dir.path().join(METADATA_CSV_FILE));
        store.append(&[record]).unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        assert!(contents.contains("\"Top 10, allegedly \"\"best\"\"\""));
        assert_eq!(store.count_samples().unwrap(), 1);
    }

    #[test]
    fn thumbnails_skip_empty_urls_and_existing_files() {
        let dir = tempdir().unwrap();

        // Record without a URL is skipped outright; the existing file keeps
        // the second record from triggering a network call.
        let no_url = sample_record("v1");
        let mut cached = sample_record("v2");
        cached.thumbnail_url = "http://127.0.0.1:9/unreachable.jpg".to_string();
        fs::write(dir.path().join("v2.jpg"), b"cached").unwrap();

        download_thumbnails_bulk(&[no_url, cached], dir.path()).unwrap();

        assert!(!dir.path().join("v1.jpg").exists());
        assert_eq!(fs::read(dir.path().join("v2.jpg")).unwrap(), b"cached");
    }
}
