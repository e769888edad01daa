#![forbid(unsafe_code)]

//! Privilege guard shared by the tubeset binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a collection job is started as root. The binaries are
/// meant to run from an unprivileged scheduler account; writing the dataset
/// tree as root would leave files a normal rerun can no longer touch.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use the scheduler's unprivileged service account"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Uid;

    #[test]
    fn unprivileged_uid_passes() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "collect_daily").is_ok());
    }

    #[test]
    fn root_uid_is_rejected() {
        let err = ensure_not_root_for(Uid::from_raw(0), "collect_daily").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }
}
