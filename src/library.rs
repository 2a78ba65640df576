use crate::catalog::MediaCatalog;
use crate::config::Settings;
use crate::model::{self, CatalogEntry, FileIdentity};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use walkdir::WalkDir;

/// Structured source of known media paths, newest first.
pub trait MediaIndex: Send + Sync {
    fn recent_video_paths(&self) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Default)]
pub struct NoMediaIndex;

impl MediaIndex for NoMediaIndex {
    fn recent_video_paths(&self) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct IndexRow {
    path: Option<String>,
    #[serde(default)]
    date_added: i64,
}

/// Media index kept as a JSON array of `{ "path": ..., "date_added": ... }`.
#[derive(Debug)]
pub struct JsonMediaIndex {
    path: PathBuf,
}

impl JsonMediaIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MediaIndex for JsonMediaIndex {
    fn recent_video_paths(&self) -> Result<Vec<PathBuf>> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read media index {}", self.path.display()))?;
        let mut rows: Vec<IndexRow> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse media index {}", self.path.display()))?;
        rows.sort_by(|a, b| b.date_added.cmp(&a.date_added));
        Ok(rows
            .into_iter()
            .filter_map(|row| row.path)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

pub struct LibraryScanner {
    index: Box<dyn MediaIndex>,
    roots: Vec<PathBuf>,
}

impl std::fmt::Debug for LibraryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryScanner")
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl LibraryScanner {
    pub fn new(index: Box<dyn MediaIndex>, roots: Vec<PathBuf>) -> Self {
        Self { index, roots }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let index: Box<dyn MediaIndex> = match &settings.media_index {
            Some(path) => Box::new(JsonMediaIndex::new(path)),
            None => Box::new(NoMediaIndex),
        };
        Self::new(index, settings.scan_roots.clone())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Blocking. Finding nothing gives an empty catalog.
    pub fn scan(&self) -> MediaCatalog {
        self.scan_with_cancel(&AtomicBool::new(false))
            .unwrap_or_default()
    }

    /// Returns `None` if `cancel` was raised before the walk finished.
    pub fn scan_with_cancel(&self, cancel: &AtomicBool) -> Option<MediaCatalog> {
        let mut entries = self.indexed_entries();
        if entries.is_empty() {
            debug!("media index yielded nothing, walking {} roots", self.roots.len());
            entries = self.walk_roots(cancel)?;
        }

        let catalog = MediaCatalog::new(entries);
        info!("library scan found {} videos", catalog.count());
        Some(catalog)
    }

    fn indexed_entries(&self) -> Vec<CatalogEntry> {
        let paths = match self.index.recent_video_paths() {
            Ok(paths) => paths,
            Err(err) => {
                warn!("media index unavailable: {err:#}");
                return Vec::new();
            }
        };

        paths
            .iter()
            .filter(|path| model::is_video_path(path))
            .filter_map(|path| match FileIdentity::from_path(path) {
                Ok(identity) => CatalogEntry::for_identity(identity),
                Err(err) => {
                    debug!("dropping stale index row: {err:#}");
                    None
                }
            })
            .collect()
    }

    fn walk_roots(&self, cancel: &AtomicBool) -> Option<Vec<CatalogEntry>> {
        for root in &self.roots {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let found = walk_folder(root, cancel)?;
            if !found.is_empty() {
                debug!("using {} videos from {}", found.len(), root.display());
                return Some(found);
            }
        }
        Some(Vec::new())
    }
}

/// Recursively collects videos under `root`. Unreadable directories and
/// symlink loops are skipped. Cancellation is checked before entering each
/// directory.
pub fn walk_folder(root: &Path, cancel: &AtomicBool) -> Option<Vec<CatalogEntry>> {
    let mut found = Vec::new();

    for next in WalkDir::new(root).follow_links(true) {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable entry: {err}");
                continue;
            }
        };

        if entry.file_type().is_dir() {
            if cancel.load(Ordering::Relaxed) {
                debug!("scan cancelled at {}", entry.path().display());
                return None;
            }
            continue;
        }

        let path = entry.path();
        if !entry.file_type().is_file() || !model::is_video_path(path) {
            continue;
        }

        match FileIdentity::from_path(path) {
            Ok(identity) => found.extend(CatalogEntry::for_identity(identity)),
            Err(err) => debug!("skipping {}: {err:#}", path.display()),
        }
    }

    Some(found)
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Completed(Arc<MediaCatalog>),
    Cancelled,
}

#[derive(Debug)]
struct InFlight {
    subscribers: Vec<Sender<ScanOutcome>>,
    cancel: Arc<AtomicBool>,
}

/// Runs scans on a background thread. At most one scan runs at a time;
/// requests made while one is running receive that scan's result.
#[derive(Debug)]
pub struct ScanWorker {
    scanner: Arc<LibraryScanner>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
}

impl ScanWorker {
    pub fn new(scanner: LibraryScanner) -> Self {
        Self {
            scanner: Arc::new(scanner),
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn request(&self) -> Receiver<ScanOutcome> {
        let (tx, rx) = mpsc::channel();
        let mut slot = lock(&self.in_flight);
        if let Some(job) = slot.as_mut() {
            debug!("joining in-flight library scan");
            job.subscribers.push(tx);
            return rx;
        }

        let cancel = Arc::new(AtomicBool::new(false));
        *slot = Some(InFlight {
            subscribers: vec![tx],
            cancel: Arc::clone(&cancel),
        });
        drop(slot);

        let scanner = Arc::clone(&self.scanner);
        let in_flight = Arc::clone(&self.in_flight);
        thread::spawn(move || {
            let outcome = match scanner.scan_with_cancel(&cancel) {
                Some(catalog) => ScanOutcome::Completed(Arc::new(catalog)),
                None => ScanOutcome::Cancelled,
            };
            let finished = lock(&in_flight).take();
            if let Some(job) = finished {
                for subscriber in job.subscribers {
                    let _ = subscriber.send(outcome.clone());
                }
            }
        });

        rx
    }

    pub fn cancel(&self) {
        if let Some(job) = lock(&self.in_flight).as_ref() {
            job.cancel.store(true, Ordering::Relaxed);
        }
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.in_flight).is_some()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::tempdir;

    struct FixedIndex(Vec<PathBuf>);

    impl MediaIndex for FixedIndex {
        fn recent_video_paths(&self) -> Result<Vec<PathBuf>> {
            Ok(self.0.clone())
        }
    }

    struct FailingIndex;

    impl MediaIndex for FailingIndex {
        fn recent_video_paths(&self) -> Result<Vec<PathBuf>> {
            anyhow::bail!("index offline")
        }
    }

    struct GatedIndex {
        gate: Mutex<Receiver<()>>,
        calls: Arc<AtomicUsize>,
    }

    impl MediaIndex for GatedIndex {
        fn recent_video_paths(&self) -> Result<Vec<PathBuf>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = lock(&self.gate).recv();
            Ok(Vec::new())
        }
    }

    fn names(catalog: &MediaCatalog) -> Vec<String> {
        catalog
            .entries()
            .iter()
            .map(|entry| entry.display_name.clone())
            .collect()
    }

    #[test]
    fn walk_filters_non_video_files() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.mp4"), b"x").expect("write mp4");
        fs::write(dir.path().join("b.txt"), b"x").expect("write txt");
        fs::write(dir.path().join("mkv"), b"x").expect("write bare");

        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        assert_eq!(names(&scanner.scan()), vec!["a.mp4"]);
    }

    #[test]
    fn walk_descends_and_sorts_case_insensitively() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("shows").join("s1");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(nested.join("beta.MKV"), b"x").expect("write");
        fs::write(dir.path().join("Alpha.mp4"), b"x").expect("write");
        fs::write(dir.path().join("charlie.avi"), b"x").expect("write");

        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        assert_eq!(
            names(&scanner.scan()),
            vec!["Alpha.mp4", "beta.MKV", "charlie.avi"]
        );
    }

    #[test]
    fn index_results_win_over_walk() {
        let indexed = tempdir().expect("tempdir");
        let walked = tempdir().expect("tempdir");
        let file = indexed.path().join("indexed.mp4");
        fs::write(&file, b"x").expect("write");
        fs::write(walked.path().join("walked.mp4"), b"x").expect("write");

        let scanner = LibraryScanner::new(
            Box::new(FixedIndex(vec![file])),
            vec![walked.path().to_path_buf()],
        );
        assert_eq!(names(&scanner.scan()), vec!["indexed.mp4"]);
    }

    #[test]
    fn stale_index_rows_fall_back_to_walk() {
        let walked = tempdir().expect("tempdir");
        fs::write(walked.path().join("walked.mp4"), b"x").expect("write");
        fs::write(walked.path().join("doc.txt"), b"x").expect("write");

        let scanner = LibraryScanner::new(
            Box::new(FixedIndex(vec![
                walked.path().join("deleted.mp4"),
                walked.path().join("doc.txt"),
            ])),
            vec![walked.path().to_path_buf()],
        );
        assert_eq!(names(&scanner.scan()), vec!["walked.mp4"]);
    }

    #[test]
    fn live_index_rows_survive_stale_ones_without_walk() {
        let indexed = tempdir().expect("tempdir");
        let walked = tempdir().expect("tempdir");
        let live = indexed.path().join("live.mkv");
        fs::write(&live, b"x").expect("write");
        fs::write(walked.path().join("walked.mp4"), b"x").expect("write");

        let scanner = LibraryScanner::new(
            Box::new(FixedIndex(vec![
                indexed.path().join("deleted.mp4"),
                live,
                indexed.path().join("also-gone.avi"),
            ])),
            vec![walked.path().to_path_buf()],
        );
        assert_eq!(names(&scanner.scan()), vec!["live.mkv"]);
    }

    #[test]
    fn failing_index_is_treated_as_empty() {
        let walked = tempdir().expect("tempdir");
        fs::write(walked.path().join("walked.webm"), b"x").expect("write");

        let scanner = LibraryScanner::new(Box::new(FailingIndex), vec![walked.path().to_path_buf()]);
        assert_eq!(scanner.scan().count(), 1);
    }

    #[test]
    fn fallback_stops_at_first_root_with_results() {
        let empty = tempdir().expect("tempdir");
        let first = tempdir().expect("tempdir");
        let second = tempdir().expect("tempdir");
        fs::write(first.path().join("first.mov"), b"x").expect("write");
        fs::write(second.path().join("second.mov"), b"x").expect("write");

        let scanner = LibraryScanner::new(
            Box::new(NoMediaIndex),
            vec![
                empty.path().join("missing"),
                empty.path().to_path_buf(),
                first.path().to_path_buf(),
                second.path().to_path_buf(),
            ],
        );
        assert_eq!(names(&scanner.scan()), vec!["first.mov"]);
    }

    #[test]
    fn nothing_found_is_an_empty_catalog() {
        let dir = tempdir().expect("tempdir");
        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        assert!(scanner.scan().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_file_counts_once() {
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("movie.mp4");
        fs::write(&file, b"x").expect("write");
        std::os::unix::fs::symlink(&file, dir.path().join("alias.mp4")).expect("symlink");

        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        assert_eq!(scanner.scan().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_does_not_abort_scan() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).expect("mkdir");
        fs::write(nested.join("clip.3gp"), b"x").expect("write");
        std::os::unix::fs::symlink(dir.path(), nested.join("loop")).expect("symlink");

        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        assert_eq!(names(&scanner.scan()), vec!["clip.3gp"]);
    }

    #[cfg(unix)]
    #[test]
    fn unlistable_directory_is_skipped_and_siblings_scanned() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let locked = dir.path().join("locked");
        let open = dir.path().join("open");
        fs::create_dir(&locked).expect("mkdir locked");
        fs::create_dir(&open).expect("mkdir open");
        fs::write(locked.join("hidden.mp4"), b"x").expect("write");
        fs::write(open.join("visible.mp4"), b"x").expect("write");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("chmod");

        if fs::read_dir(&locked).is_ok() {
            // Running with permissions ignored, e.g. as root.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("restore");
            return;
        }

        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        let found = names(&scanner.scan());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("restore");

        assert_eq!(found, vec!["visible.mp4"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_file_names_are_catalogued() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(OsStr::from_bytes(b"caf\xe9.mp4")), b"x").expect("write");
        fs::write(dir.path().join("ok.mp4"), b"x").expect("write");

        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        let catalog = scanner.scan();
        assert_eq!(catalog.count(), 2);
        assert_eq!(names(&catalog), vec!["caf\u{fffd}.mp4", "ok.mp4"]);
    }

    #[test]
    fn raised_cancel_stops_walk() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.mp4"), b"x").expect("write");

        let scanner = LibraryScanner::new(Box::new(NoMediaIndex), vec![dir.path().to_path_buf()]);
        assert!(scanner.scan_with_cancel(&AtomicBool::new(true)).is_none());
    }

    #[test]
    fn json_index_serves_newest_first() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("index.json");
        fs::write(
            &path,
            r#"[
                { "path": "/m/old.mp4", "date_added": 1 },
                { "path": null, "date_added": 5 },
                { "path": "/m/new.mp4", "date_added": 9 }
            ]"#,
        )
        .expect("write index");

        let paths = JsonMediaIndex::new(path).recent_video_paths().expect("query");
        assert_eq!(
            paths,
            vec![PathBuf::from("/m/new.mp4"), PathBuf::from("/m/old.mp4")]
        );
    }

    #[test]
    fn concurrent_requests_share_one_scan() {
        let (release, gate) = mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let scanner = LibraryScanner::new(
            Box::new(GatedIndex {
                gate: Mutex::new(gate),
                calls: Arc::clone(&calls),
            }),
            Vec::new(),
        );
        let worker = ScanWorker::new(scanner);

        let first = worker.request();
        let second = worker.request();
        assert!(worker.is_scanning());
        release.send(()).expect("release");

        let timeout = Duration::from_secs(5);
        let (ScanOutcome::Completed(a), ScanOutcome::Completed(b)) = (
            first.recv_timeout(timeout).expect("first result"),
            second.recv_timeout(timeout).expect("second result"),
        ) else {
            panic!("scan did not complete");
        };
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_worker_reports_cancellation() {
        let dir = tempdir().expect("tempdir");
        let (release, gate) = mpsc::channel();
        let scanner = LibraryScanner::new(
            Box::new(GatedIndex {
                gate: Mutex::new(gate),
                calls: Arc::new(AtomicUsize::new(0)),
            }),
            vec![dir.path().to_path_buf()],
        );
        let worker = ScanWorker::new(scanner);

        let result = worker.request();
        worker.cancel();
        release.send(()).expect("release");

        let outcome = result
            .recv_timeout(Duration::from_secs(5))
            .expect("outcome");
        assert!(matches!(outcome, ScanOutcome::Cancelled));
    }
}
