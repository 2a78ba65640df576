use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "lampbox";
const SETTINGS_FILE: &str = "settings.json";
const STATE_FILE: &str = "state.json";

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("LAMPBOX_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    Ok(home_dir()?.join(".config").join(APP_DIR))
}

fn home_dir() -> Result<PathBuf> {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .context("neither HOME nor USERPROFILE is set")
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn state_path() -> Result<PathBuf> {
    Ok(config_root()?.join(STATE_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Walked in order when the media index is empty; the first root that
    /// yields anything wins.
    #[serde(default = "default_scan_roots")]
    pub scan_roots: Vec<PathBuf>,
    #[serde(default)]
    pub media_index: Option<PathBuf>,
    #[serde(default = "default_thumbnail_budget_bytes")]
    pub thumbnail_budget_bytes: usize,
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,
    #[serde(default = "default_seek_step_ms")]
    pub seek_step_ms: u64,
}

fn default_scan_roots() -> Vec<PathBuf> {
    let Ok(home) = home_dir() else {
        return Vec::new();
    };
    vec![home.join("Movies"), home.join("Videos"), home]
}

fn default_thumbnail_budget_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_thumbnail_width() -> u32 {
    240
}

fn default_thumbnail_height() -> u32 {
    135
}

fn default_seek_step_ms() -> u64 {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_roots: default_scan_roots(),
            media_index: None,
            thumbnail_budget_bytes: default_thumbnail_budget_bytes(),
            thumbnail_width: default_thumbnail_width(),
            thumbnail_height: default_thumbnail_height(),
            seek_step_ms: default_seek_step_ms(),
        }
    }
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(&settings_path()?)
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    Ok(settings)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Str(String),
    Int(i64),
}

/// Narrow view of a persisted key-value store. `put_batch` either applies
/// every pair or none of them.
pub trait KeyValueStore {
    fn get_string(&self, key: &str, default: &str) -> String;
    fn get_int(&self, key: &str, default: i64) -> i64;
    fn put_batch(&mut self, batch: &[(&str, StoreValue)]) -> Result<()>;
}

fn store_value_to_json(value: &StoreValue) -> Value {
    match value {
        StoreValue::Str(text) => Value::from(text.as_str()),
        StoreValue::Int(number) => Value::from(*number),
    }
}

/// Key-value store kept as a flat JSON object on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: HashMap<String, Value>,
}

impl JsonFileStore {
    pub fn open_default() -> Result<Self> {
        ensure_config_dir()?;
        Self::open(state_path()?)
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                path,
                values: HashMap::new(),
            });
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        let values: HashMap<String, Value> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse state file {}", path.display()))?;
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomically(&self, values: &HashMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(values)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }

    fn put_batch(&mut self, batch: &[(&str, StoreValue)]) -> Result<()> {
        let mut next = self.values.clone();
        for (key, value) in batch {
            next.insert((*key).to_string(), store_value_to_json(value));
        }
        self.write_atomically(&next)?;
        self.values = next;
        Ok(())
    }
}

/// In-process store, used where nothing should touch the disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, StoreValue>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches written so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str, default: &str) -> String {
        match self.values.get(key) {
            Some(StoreValue::Str(text)) => text.clone(),
            _ => default.to_string(),
        }
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.values.get(key) {
            Some(StoreValue::Int(number)) => *number,
            _ => default,
        }
    }

    fn put_batch(&mut self, batch: &[(&str, StoreValue)]) -> Result<()> {
        for (key, value) in batch {
            self.values.insert((*key).to_string(), value.clone());
        }
        self.writes += 1;
        Ok(())
    }
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempdir().expect("tempdir");
        let settings = load_settings_from(&dir.path().join("settings.json")).expect("load");
        assert_eq!(settings.thumbnail_width, 240);
        assert_eq!(settings.thumbnail_height, 135);
        assert_eq!(settings.seek_step_ms, 10_000);
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "scan_roots": ["/data/movies"], "seek_step_ms": 5000 }"#)
            .expect("write settings");

        let settings = load_settings_from(&path).expect("load");
        assert_eq!(settings.scan_roots, vec![PathBuf::from("/data/movies")]);
        assert_eq!(settings.seek_step_ms, 5_000);
        assert_eq!(settings.thumbnail_budget_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let mut store = JsonFileStore::open(path.clone()).expect("open");
        store
            .put_batch(&[
                ("name", StoreValue::Str(String::from("a.mp4"))),
                ("position", StoreValue::Int(42)),
            ])
            .expect("put");

        let reopened = JsonFileStore::open(path).expect("reopen");
        assert_eq!(reopened.get_string("name", ""), "a.mp4");
        assert_eq!(reopened.get_int("position", 0), 42);
        assert_eq!(reopened.get_int("missing", -1), -1);
    }

    #[test]
    fn json_store_leaves_no_staging_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let mut store = JsonFileStore::open(path.clone()).expect("open");
        store
            .put_batch(&[("position", StoreValue::Int(1))])
            .expect("put");

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn mismatched_value_type_falls_back_to_default() {
        let mut store = MemoryStore::new();
        store
            .put_batch(&[("position", StoreValue::Str(String::from("x")))])
            .expect("put");
        assert_eq!(store.get_int("position", 7), 7);
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn strips_windows_verbatim_prefix() {
        let cleaned = strip_windows_verbatim_prefix(Path::new(r"\\?\E:\MOVIES\a.mp4"));
        assert_eq!(cleaned, PathBuf::from(r"E:\MOVIES\a.mp4"));
    }
}
