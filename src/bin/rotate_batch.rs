#![forbid(unsafe_code)]

//! Decoupled rotation job. Observes the marker the collection job leaves
//! behind, seals the working set into the next numbered batch through the
//! version tool, prunes the oldest batch past the retention window, and only
//! then deletes the marker. Any failure leaves the marker in place, so the
//! whole job can simply be rerun.

use anyhow::{Context, Result, bail};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tubeset_tools::{
    config::{RuntimeOverrides, resolve_runtime_settings},
    rotation::{
        BATCHES_SUBDIR, DvcTool, RotationMarker, batch_name, prune_old_batches, rotate,
        sealed_batch_numbers,
    },
    security::ensure_not_root,
};

/// Sealed batches kept before the oldest is evicted.
const MAX_BATCHES: usize = 150;

#[derive(Debug, Clone)]
struct RotateArgs {
    dataset_root: Option<PathBuf>,
}

impl RotateArgs {
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
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--dataset-root=") {
                dataset_root = Some(PathBuf::from(value));
                continue;
            }
            match arg.as_str() {
                "--dataset-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--dataset-root requires a value"))?;
                    dataset_root = Some(PathBuf::from(value));
                }
                _ => {
                    bail!("unknown argument: {arg}");
                }
            }
        }

        Ok(Self { dataset_root })
    }
}

fn main() -> Result<()> {
    env_logger::init();
    ensure_not_root("rotate_batch")?;

    let args = RotateArgs::parse()?;
    let settings = resolve_runtime_settings(RuntimeOverrides {
        dataset_root: args.dataset_root.clone(),
        ..RuntimeOverrides::default()
    })?;
    let dataset_root = settings.dataset_root.clone();

    let marker = RotationMarker::new(&dataset_root);
    let pending = marker.read()?;

    if let Err(err) = write_github_output(pending.as_deref()) {
        eprintln!("Warning: could not write CI outputs: {err:#}");
    }

    let Some(target_batch) = pending else {
        println!("No rotation needed.");
        return Ok(());
    };

    println!("Rotation needed: {target_batch}");
    DvcTool::ensure_available()?;
    let tool = DvcTool::new(dataset_root.clone());
    rotate(&tool, &target_batch)?;
    println!("Working set sealed into {BATCHES_SUBDIR}/{target_batch}");

    let sealed = sealed_batch_numbers(&dataset_root.join(BATCHES_SUBDIR))?;
    match prune_old_batches(&tool, &sealed, MAX_BATCHES)? {
        Some(evicted) => {
            println!(
                "Evicted {} from tracking and remote storage",
                batch_name(evicted)
            );
        }
        None => {
            println!(
                "Batch count: {}/{MAX_BATCHES} (no cleanup needed)",
                sealed.len()
            );
        }
    }

    marker.clear()?;
    println!("Rotation complete: {target_batch}");

    Ok(())
}

/// Reports the rotation decision to the CI workflow when `GITHUB_OUTPUT` is
/// set, so the workflow can gate later steps on `needs_rotation`.
fn write_github_output(batch_name: Option<&str>) -> Result<()> {
    match env::var("GITHUB_OUTPUT") {
        Ok(path) if !path.is_empty() => append_github_output(Path::new(&path), batch_name),
        _ => Ok(()),
    }
}

fn append_github_output(path: &Path, batch_name: Option<&str>) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    match batch_name {
        Some(name) => {
            writeln!(file, "needs_rotation=true")?;
            writeln!(file, "batch_name={name}")?;
        }
        None => {
            writeln!(file, "needs_rotation=false")?;
        }
    }
    Ok(())
}
