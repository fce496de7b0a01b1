/// Status document: `status.json`, shared by the orchestrator and the watchdog.
///
/// The only mutation path is `StatusStore::save(patch)`, which re-reads the
/// freshest document, merges the patch monotonically, and replaces the file
/// atomically (temp file in the same directory, then rename).
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// The JSON payload persisted in `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StatusDocument {
    pub iteration: u32,
    /// Last update, epoch seconds.
    pub timestamp: f64,
    /// First save, epoch seconds. Absent in documents written by older runners.
    pub started_at: Option<f64>,
    pub complete: bool,
    pub session_id: Option<String>,
}

impl StatusDocument {
    /// Start of the run, falling back to the last update for older documents.
    pub fn start_time(&self) -> f64 {
        self.started_at.unwrap_or(self.timestamp)
    }

    pub fn hours_since_start(&self, now: f64) -> f64 {
        (now - self.start_time()) / 3600.0
    }

    pub fn hours_since_update(&self, now: f64) -> f64 {
        (now - self.timestamp) / 3600.0
    }

    /// Merge a patch into this document. Iteration and completion only move forward.
    fn apply(mut self, patch: StatusPatch, now: f64) -> Self {
        self.started_at = Some(self.start_time());
        if let Some(iteration) = patch.iteration {
            self.iteration = self.iteration.max(iteration);
        }
        if let Some(complete) = patch.complete {
            self.complete = self.complete || complete;
        }
        if let Some(session_id) = patch.session_id {
            self.session_id = Some(session_id);
        }
        self.timestamp = now;
        self
    }
}

/// Fields a writer wants to change. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub iteration: Option<u32>,
    pub complete: Option<bool>,
    pub session_id: Option<String>,
}

/// Current time as fractional epoch seconds.
pub fn now_epoch_secs() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Read/update access to one status document.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. `Ok(None)` when no status has been written yet.
    pub fn load(&self) -> Result<Option<StatusDocument>, StatusError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StatusError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StatusError::Parse {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Apply `patch` to the freshest stored document and write it back atomically.
    ///
    /// An unreadable existing document is replaced rather than blocking the write.
    /// Returns the document as written.
    pub fn save(&self, patch: StatusPatch) -> Result<StatusDocument, StatusError> {
        let now = now_epoch_secs();
        let current = match self.load() {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "existing status unreadable, replacing it");
                None
            }
        };
        let base = current.unwrap_or_else(|| StatusDocument {
            timestamp: now,
            ..StatusDocument::default()
        });

        let doc = base.apply(patch, now);
        self.write(&doc)?;
        Ok(doc)
    }

    /// Write the document via a temp file in the same directory, then rename,
    /// so readers never see a partial write.
    fn write(&self, doc: &StatusDocument) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(doc).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".status.json.tmp")
            .tempfile_in(dir)
            .map_err(|e| StatusError::Write {
                path: dir.to_path_buf(),
                source: e,
            })?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| StatusError::Write {
                path: tmp.path().to_path_buf(),
                source: e,
            })?;

        tmp.persist(&self.path).map_err(|e| StatusError::Persist {
            to: self.path.clone(),
            source: e.error,
        })?;

        Ok(())
    }
}

/// Errors from status document operations.
#[derive(Debug)]
pub enum StatusError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Persist {
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Read { path, source } => {
                write!(f, "failed to read status {}: {source}", path.display())
            }
            StatusError::Parse { path, source } => {
                write!(f, "malformed status {}: {source}", path.display())
            }
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Persist { to, source } => {
                write!(f, "failed to replace {}: {source}", to.display())
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Read { source, .. } => Some(source),
            StatusError::Parse { source, .. } => Some(source),
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Persist { source, .. } => Some(source),
        }
    }
}
