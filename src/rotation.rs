#![forbid(unsafe_code)]

//! Batch rotation and retention.
//!
//! The working set accumulates under `current/` until it reaches the batch
//! limit, at which point a durable marker (`.rotate`) records the target
//! batch name. A separate run observes the marker, moves the working set
//! into `batches/batch_NNN` through the version tool, recreates an empty
//! working set, and deletes the marker. Splitting decision from execution
//! means a failed move never loses the fact that rotation was due: the
//! marker is idempotent and safe to retry.
//!
//! All physical moves go through the narrow [`VersionTool`] capability so
//! the decision logic stays testable without spawning any process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use log::{info, warn};

pub const ROTATE_MARKER_FILE: &str = ".rotate";
pub const CURRENT_SUBDIR: &str = "current";
pub const BATCHES_SUBDIR: &str = "batches";

const VERSION_TOOL_PROGRAM: &str = "dvc";

/// Canonical name for a sealed batch number: `batch_001`, `batch_002`, ...
pub fn batch_name(number: u32) -> String {
    format!("batch_{number:03}")
}

/// Sealed batch numbers recovered from the `batch_*.dvc` entries in the
/// batches directory, ascending. A missing directory means no batches yet.
pub fn sealed_batch_numbers(batches_dir: &Path) -> Result<Vec<u32>> {
    if !batches_dir.exists() {
        return Ok(Vec::new());
    }

    let mut numbers = Vec::new();
    for entry in fs::read_dir(batches_dir)
        .with_context(|| format!("reading {}", batches_dir.display()))?
    {
        let entry = entry.with_context(|| format!("reading {}", batches_dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(".dvc") else {
            continue;
        };
        let Some(digits) = stem.strip_prefix("batch_") else {
            continue;
        };
        if let Ok(number) = digits.parse::<u32>() {
            numbers.push(number);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

/// Next monotonic batch number: one past the highest sealed number, starting
/// at 1 when nothing has been sealed yet.
pub fn next_batch_number(sealed: &[u32]) -> u32 {
    sealed.iter().copied().max().map_or(1, |max| max + 1)
}

/// Outcome of comparing the working set against the batch limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationDecision {
    /// Still below the limit; keep accumulating.
    Accumulating { count: u64, limit: u64 },
    /// Limit reached; the named batch must be sealed next.
    Due { batch_name: String },
}

/// Pure rotation transition: reads nothing, writes nothing.
pub fn evaluate_rotation(count: u64, limit: u64, sealed: &[u32]) -> RotationDecision {
    if count >= limit {
        RotationDecision::Due {
            batch_name: batch_name(next_batch_number(sealed)),
        }
    } else {
        RotationDecision::Accumulating { count, limit }
    }
}

/// The durable rotation-pending signal. Presence means a rotation is owed;
/// the file body is the target batch name.
#[derive(Debug, Clone)]
pub struct RotationMarker {
    path: PathBuf,
}

impl RotationMarker {
    pub fn new(dataset_root: &Path) -> Self {
        Self {
            path: dataset_root.join(ROTATE_MARKER_FILE),
        }
    }

    pub fn read(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let name = contents.trim().to_string();
        Ok(if name.is_empty() { None } else { Some(name) })
    }

    pub fn write(&self, batch_name: &str) -> Result<()> {
        fs::write(&self.path, batch_name)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    pub fn clear(&self) -> Result<()> {
        fs::remove_file(&self.path)
            .with_context(|| format!("removing {}", self.path.display()))
    }
}

/// Narrow capability over the external version tool that physically moves
/// batches and reclaims storage.
pub trait VersionTool {
    /// Moves the working set into the named immutable batch.
    fn seal_batch(&self, batch_name: &str) -> Result<()>;
    /// Recreates an empty tracked working set after a seal.
    fn reset_working_set(&self) -> Result<()>;
    /// Publishes pending data to remote storage.
    fn push(&self) -> Result<()>;
    /// Drops the named batch from tracking.
    fn remove_batch(&self, batch_name: &str) -> Result<()>;
    /// Reclaims storage for anything no longer tracked.
    fn collect_garbage(&self) -> Result<()>;
}

/// Production [`VersionTool`] that shells out to `dvc`.
pub struct DvcTool {
    dataset_root: PathBuf,
}

impl DvcTool {
    pub fn new(dataset_root: PathBuf) -> Self {
        Self { dataset_root }
    }

    /// Runs `dvc --version` to fail loudly before any rotation work starts.
    pub fn ensure_available() -> Result<()> {
        let status = Command::new(VERSION_TOOL_PROGRAM)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => bail!("{} is installed but returned a failure status", VERSION_TOOL_PROGRAM),
            Err(err) => bail!(
                "{} is not installed or not in PATH: {}",
                VERSION_TOOL_PROGRAM,
                err
            ),
        }
    }

    fn run(&self, args: &[&str], cwd: &Path) -> Result<()> {
        info!("running: {} {}", VERSION_TOOL_PROGRAM, args.join(" "));
        let status = Command::new(VERSION_TOOL_PROGRAM)
            .args(args)
            .current_dir(cwd)
            .status()
            .with_context(|| format!("spawning {} {}", VERSION_TOOL_PROGRAM, args.join(" ")))?;
        if !status.success() {
            bail!(
                "{} {} exited with status {}",
                VERSION_TOOL_PROGRAM,
                args.join(" "),
                status
            );
        }
        Ok(())
    }
}

impl VersionTool for DvcTool {
    fn seal_batch(&self, batch_name: &str) -> Result<()> {
        let target = format!("{BATCHES_SUBDIR}/{batch_name}");
        self.run(&["move", CURRENT_SUBDIR, &target], &self.dataset_root)
    }

    fn reset_working_set(&self) -> Result<()> {
        let current_dir = self.dataset_root.join(CURRENT_SUBDIR);
        fs::create_dir_all(&current_dir)
            .with_context(|| format!("creating {}", current_dir.display()))?;
        self.run(&["add", "current/"], &self.dataset_root)
    }

    fn push(&self) -> Result<()> {
        self.run(&["push"], &self.dataset_root)
    }

    fn remove_batch(&self, batch_name: &str) -> Result<()> {
        let dvc_file = format!("{batch_name}.dvc");
        self.run(&["remove", &dvc_file], &self.dataset_root.join(BATCHES_SUBDIR))
    }

    fn collect_garbage(&self) -> Result<()> {
        self.run(
            &["gc", "--workspace", "--cloud", "--force"],
            &self.dataset_root,
        )
    }
}

/// Seals the working set into the named batch and resets it to empty.
pub fn rotate(tool: &dyn VersionTool, batch_name: &str) -> Result<()> {
    info!("rotating working set into {BATCHES_SUBDIR}/{batch_name}");
    tool.seal_batch(batch_name)?;
    tool.reset_working_set()?;
    tool.push()?;
    Ok(())
}

/// The eviction candidate, if the ledger exceeds the retained maximum:
/// always the numerically smallest (oldest) batch, and never more than one.
pub fn select_eviction(sealed: &[u32], max_batches: usize) -> Option<u32> {
    if sealed.len() > max_batches {
        sealed.iter().copied().min()
    } else {
        None
    }
}

/// Evicts at most one batch past the retention limit. Rotation cadence keeps
/// the backlog from growing by more than one per rotation, so this does not
/// loop.
pub fn prune_old_batches(
    tool: &dyn VersionTool,
    sealed: &[u32],
    max_batches: usize,
) -> Result<Option<u32>> {
    let Some(oldest) = select_eviction(sealed, max_batches) else {
        info!("batch count {}/{max_batches}, nothing to evict", sealed.len());
        return Ok(None);
    };

    let name = batch_name(oldest);
    warn!(
        "retention limit exceeded ({} > {max_batches}), evicting {name}",
        sealed.len()
    );
    tool.remove_batch(&name)?;
    tool.collect_garbage()?;
    Ok(Some(oldest))
}
