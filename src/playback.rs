use crate::config::{KeyValueStore, StoreValue};
use crate::model::{FileIdentity, PlaybackState};
use anyhow::Result;
use std::path::{Path, PathBuf};

pub const KEY_LAST_PATH: &str = "last_video_path";
pub const KEY_LAST_SIZE: &str = "last_video_size";
pub const KEY_LAST_MODIFIED: &str = "last_video_modified_ms";
pub const KEY_LAST_POSITION: &str = "last_video_position";
/// Raw path bytes, base64 encoded, written only when the path is not UTF-8.
pub const KEY_LAST_PATH_BYTES: &str = "last_video_path_bytes";

/// Reads the saved resume point. Missing or malformed keys give an empty
/// state at position 0.
pub fn load(store: &impl KeyValueStore) -> PlaybackState {
    let path = store.get_string(KEY_LAST_PATH, "");
    let raw_path = store.get_string(KEY_LAST_PATH_BYTES, "");
    let size = store.get_int(KEY_LAST_SIZE, -1);
    let modified_ms = store.get_int(KEY_LAST_MODIFIED, 0);
    let position = store.get_int(KEY_LAST_POSITION, 0);

    let identity = match (path.trim().is_empty(), u64::try_from(size)) {
        (false, Ok(size)) => Some(FileIdentity::new(
            decode_path(&raw_path).unwrap_or_else(|| PathBuf::from(path)),
            size,
            modified_ms,
        )),
        _ => None,
    };

    PlaybackState {
        identity,
        position_ms: u64::try_from(position).unwrap_or(0),
    }
}

/// Writes identity and position in a single batch.
pub fn save(store: &mut impl KeyValueStore, state: &PlaybackState) -> Result<()> {
    let (path, raw_path, size, modified_ms) = match &state.identity {
        Some(identity) => (
            identity.path().to_string_lossy().to_string(),
            encode_path(identity.path()),
            i64::try_from(identity.size()).unwrap_or(i64::MAX),
            identity.modified_ms(),
        ),
        None => (String::new(), String::new(), -1, 0),
    };
    let position = i64::try_from(state.position_ms).unwrap_or(i64::MAX);

    store.put_batch(&[
        (KEY_LAST_PATH, StoreValue::Str(path)),
        (KEY_LAST_PATH_BYTES, StoreValue::Str(raw_path)),
        (KEY_LAST_SIZE, StoreValue::Int(size)),
        (KEY_LAST_MODIFIED, StoreValue::Int(modified_ms)),
        (KEY_LAST_POSITION, StoreValue::Int(position)),
    ])
}

#[cfg(unix)]
fn encode_path(path: &Path) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::os::unix::ffi::OsStrExt;

    if path.to_str().is_some() {
        return String::new();
    }
    URL_SAFE_NO_PAD.encode(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn encode_path(_path: &Path) -> String {
    String::new()
}

#[cfg(unix)]
fn decode_path(raw: &str) -> Option<PathBuf> {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    if raw.is_empty() {
        return None;
    }
    match URL_SAFE_NO_PAD.decode(raw) {
        Ok(bytes) => Some(PathBuf::from(OsString::from_vec(bytes))),
        Err(err) => {
            log::debug!("ignoring malformed saved path bytes: {err}");
            None
        }
    }
}

#[cfg(not(unix))]
fn decode_path(_raw: &str) -> Option<PathBuf> {
    None
}

/// Drops the saved resume point.
pub fn forget(store: &mut impl KeyValueStore) -> Result<()> {
    save(store, &PlaybackState::default())
}
