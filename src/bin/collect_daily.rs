#![forbid(unsafe_code)]

//! Daily collection job. Fetches a randomized sample of yesterday-ish
//! uploads, downloads their thumbnails into `current/`, appends the metadata
//! CSV, mirrors the run to the experiment tracker, and writes the rotation
//! marker once the working set reaches the batch limit. Meant to run from a
//! scheduler once per day; rerunning after a failure is always safe because
//! every write is append-only.

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::env;
use std::fs;
use std::path::PathBuf;
use tubeset_tools::{
    config::{RuntimeOverrides, resolve_runtime_settings},
    dataset::{CsvStore, METADATA_CSV_FILE, VideoRecord, download_thumbnails_bulk},
    rotation::{
        BATCHES_SUBDIR, CURRENT_SUBDIR, RotationDecision, RotationMarker, batch_name,
        evaluate_rotation, next_batch_number, sealed_batch_numbers,
    },
    sampler::{FetchRequest, dedup_filter, fetch_batch},
    security::ensure_not_root,
    tracking::{HttpTracker, RunTracker},
    youtube::YouTubeClient,
};

/// Working-set size that triggers a rotation.
const BATCH_LIMIT: u64 = 500;
/// Tracking-service runs kept, matching the batch retention window.
const MAX_TRACKER_RUNS: usize = 350;

const DEFAULT_DAYS_AGO: i64 = 7;
const DEFAULT_VIDEOS_PER_CATEGORY: u32 = 5;
const DEFAULT_REGION: &str = "US_EU";
const MIN_SUBSCRIBERS: u64 = 10_000;
const MIN_VIEWS: u64 = 100;
// 0.01% of subscribers, e.g. a 27M-subscriber channel needs 2700 views.
const MIN_VIEW_RATIO: f64 = 0.0001;
const MIN_DURATION_SECONDS: u64 = 60;
const DURATION_BUCKET: &str = "medium";

#[derive(Debug, Clone)]
struct CollectArgs {
    dataset_root: Option<PathBuf>,
    days_ago: i64,
    videos_per_category: u32,
    region: String,
    seed: Option<u64>,
}

impl CollectArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut dataset_root: Option<PathBuf> = None;
        let mut days_ago = DEFAULT_DAYS_AGO;
        let mut videos_per_category = DEFAULT_VIDEOS_PER_CATEGORY;
        let mut region = DEFAULT_REGION.to_string();
        let mut seed: Option<u64> = None;
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            let (name, inline) = match arg.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let mut value_for = |flag: &str| -> Result<String> {
                if let Some(value) = inline.clone() {
                    return Ok(value);
                }
                args.next()
                    .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
            };

            match name.as_str() {
                "--dataset-root" => {
                    dataset_root = Some(PathBuf::from(value_for("--dataset-root")?));
                }
                "--days-ago" => {
                    let raw = value_for("--days-ago")?;
                    days_ago = raw
                        .parse()
                        .with_context(|| format!("invalid --days-ago value: {raw}"))?;
                }
                "--videos-per-category" => {
                    let raw = value_for("--videos-per-category")?;
                    videos_per_category = raw
                        .parse()
                        .with_context(|| format!("invalid --videos-per-category value: {raw}"))?;
                }
                "--region" => {
                    region = value_for("--region")?;
                }
                "--seed" => {
                    let raw = value_for("--seed")?;
                    seed = Some(
                        raw.parse()
                            .with_context(|| format!("invalid --seed value: {raw}"))?,
                    );
                }
                _ => {
                    bail!("unknown argument: {name}");
                }
            }
        }

        Ok(Self {
            dataset_root,
            days_ago,
            videos_per_category,
            region,
            seed,
        })
    }
}

fn main() -> Result<()> {
    env_logger::init();
    ensure_not_root("collect_daily")?;

    let args = CollectArgs::parse()?;
    let settings = resolve_runtime_settings(RuntimeOverrides {
        dataset_root: args.dataset_root.clone(),
        ..RuntimeOverrides::default()
    })?;
    let api_key = settings.require_api_key()?.to_string();

    let dataset_root = settings.dataset_root.clone();
    let current_dir = dataset_root.join(CURRENT_SUBDIR);
    let batches_dir = dataset_root.join(BATCHES_SUBDIR);
    fs::create_dir_all(&current_dir)
        .with_context(|| format!("creating {}", current_dir.display()))?;

    let sealed = sealed_batch_numbers(&batches_dir)?;
    let target_batch = batch_name(next_batch_number(&sealed));

    println!("===================================");
    println!("Daily video sample collection");
    println!("===================================");
    println!("Dataset root: {}", dataset_root.display());
    println!("Region selector: {}", args.region);
    println!("Target version: {target_batch}");
    println!();

    let request = FetchRequest {
        days_ago: args.days_ago,
        videos_per_category: args.videos_per_category,
        categories: None,
        region: args.region.clone(),
        min_subscribers: MIN_SUBSCRIBERS,
        min_views: MIN_VIEWS,
        min_view_ratio: MIN_VIEW_RATIO,
        min_duration_seconds: MIN_DURATION_SECONDS,
        duration_bucket: DURATION_BUCKET.to_string(),
    };

    let client = YouTubeClient::new(api_key);
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    println!("Fetching videos...");
    let collected = fetch_batch(&client, &request, &mut rng);
    let mut admitted = dedup_filter(collected, &request);
    if admitted.is_empty() {
        println!("No eligible videos found today.");
        return Ok(());
    }
    println!("Fetched {} unique video(s)", admitted.len());

    println!("Downloading {} thumbnail(s)...", admitted.len());
    download_thumbnails_bulk(&admitted, &current_dir)?;

    for record in &mut admitted {
        record.batch_version = target_batch.clone();
    }
    let store = CsvStore::new(current_dir.join(METADATA_CSV_FILE));
    store.append(&admitted)?;

    match settings.tracking {
        Some(tracking) => {
            println!("Logging run to the experiment tracker...");
            let tracker = HttpTracker::new(tracking);
            mirror_run_best_effort(&tracker, &target_batch, &admitted);
        }
        None => println!("Experiment tracking disabled (TRACKING_BASE_URL not set)"),
    }

    let total = store.count_samples()?;
    println!("Working set: {total}/{BATCH_LIMIT} sample(s)");

    match evaluate_rotation(total, BATCH_LIMIT, &sealed) {
        RotationDecision::Due { batch_name } => {
            RotationMarker::new(&dataset_root).write(&batch_name)?;
            println!("Rotation needed: {batch_name}");
            println!("Marker written; the rotation job performs the move.");
        }
        RotationDecision::Accumulating { .. } => {
            println!("Daily collection complete");
        }
    }

    Ok(())
}

/// Uploads the run and prunes the tracker's window. Failures are warnings;
/// pruning only runs when the upload landed so a flaky service never loses
/// newer runs before older ones.
fn mirror_run_best_effort(tracker: &dyn RunTracker, batch_version: &str, records: &[VideoRecord]) {
    if let Err(err) = tracker.log_run(batch_version, records) {
        eprintln!("Warning: experiment tracking upload failed: {err:#}");
        return;
    }
    match tracker.prune_runs(MAX_TRACKER_RUNS) {
        Ok(0) => {}
        Ok(deleted) => println!("Pruned {deleted} old tracking run(s)"),
        Err(err) => eprintln!("Warning: tracking run pruning failed: {err:#}"),
    }
}
