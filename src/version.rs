//! Persisted last-successful-release marker and the skip/process gate built on it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Default marker location, relative to the working directory.
pub const DEFAULT_VERSION_FILE: &str = "data/processed_version.txt";

/// Single-value file recording the last release indexed without any failure.
#[derive(Debug, Clone)]
pub struct VersionMarker {
    path: PathBuf,
}

impl VersionMarker {
    /// Marker stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored release tag. A missing, empty, or unreadable file means no prior run.
    pub fn read(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Some(raw.trim().to_string()).filter(|tag| !tag.is_empty()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "could not read version marker");
                None
            }
        }
    }

    /// Replaces the stored tag.
    pub fn write(&self, release_tag: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, release_tag)?;
        fs::rename(&staging, &self.path)?;
        info!(path = %self.path.display(), release_tag, "recorded processed release");
        Ok(())
    }
}

/// Why a run must process icons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessReason {
    /// `--force` was given.
    Forced,
    /// No marker exists.
    FirstRun,
    /// The marker names a different release.
    NewRelease {
        /// Marker value.
        previous: String,
    },
    /// The marker matches but the index is missing documents or fields.
    Incomplete,
}

/// Result of the version gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Everything for this release is already indexed.
    Skip,
    /// Icons must be (re)processed.
    Process(ProcessReason),
}

/// Decides whether `latest` needs processing.
///
/// `is_complete` is consulted only when the marker already names `latest` and the run is not
/// forced, so a skip costs exactly one completeness check and nothing else.
pub fn check_version(
    stored: Option<&str>,
    latest: &str,
    force: bool,
    is_complete: impl FnOnce() -> bool,
) -> GateDecision {
    if force {
        return GateDecision::Process(ProcessReason::Forced);
    }
    match stored {
        None => GateDecision::Process(ProcessReason::FirstRun),
        Some(previous) if previous != latest => GateDecision::Process(ProcessReason::NewRelease {
            previous: previous.to_string(),
        }),
        Some(_) if is_complete() => GateDecision::Skip,
        Some(_) => GateDecision::Process(ProcessReason::Incomplete),
    }
}
