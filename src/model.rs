use anyhow::{Context, Result};
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "flv", "mov", "rmvb", "wmv", "3gp", "webm", "ts",
];

/// Identifies one media file across scans: the same path with a different
/// size or modification time is a different file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    path: PathBuf,
    size: u64,
    modified_ms: i64,
}

impl FileIdentity {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified_ms: i64) -> Self {
        Self {
            path: path.into(),
            size,
            modified_ms,
        }
    }

    /// Reads size and modification time from disk. Symlinks are resolved so a
    /// file reachable through two paths yields one identity.
    pub fn from_path(path: &Path) -> Result<Self> {
        let resolved = crate::config::normalize_path(path);
        let metadata = fs::metadata(&resolved)
            .with_context(|| format!("failed to stat {}", resolved.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a regular file", resolved.display());
        }

        let modified_ms = metadata
            .modified()
            .map(epoch_millis)
            .with_context(|| format!("no modification time for {}", resolved.display()))?;

        Ok(Self {
            path: resolved,
            size: metadata.len(),
            modified_ms,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified_ms(&self) -> i64 {
        self.modified_ms
    }

    /// Bytes that are not valid UTF-8 are replaced, never dropped.
    pub fn file_name(&self) -> Option<Cow<'_, str>> {
        self.path.file_name().map(|name| name.to_string_lossy())
    }
}

fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_millis())
            .map(|ms| -ms)
            .unwrap_or(i64::MIN),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub identity: FileIdentity,
    pub display_name: String,
}

impl CatalogEntry {
    /// Builds an entry named after the file. Returns `None` when the path has
    /// no usable file name.
    pub fn for_identity(identity: FileIdentity) -> Option<Self> {
        let display_name = identity
            .file_name()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())?;
        Some(Self {
            identity,
            display_name,
        })
    }
}

/// Last file played and where it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub identity: Option<FileIdentity>,
    pub position_ms: u64,
}

impl PlaybackState {
    pub fn at(identity: FileIdentity, position_ms: u64) -> Self {
        Self {
            identity: Some(identity),
            position_ms,
        }
    }
}

/// Extension match on the text after the last '.', ignoring case.
pub fn is_video_name(name: &str) -> bool {
    let name = name.trim();
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    VIDEO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

pub fn is_video_path(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| is_video_name(&name.to_string_lossy()))
}
