#![no_main]

use libfuzzer_sys::fuzz_target;
use lampbox::catalog::MediaCatalog;
use lampbox::config::MemoryStore;
use lampbox::core::{PlaybackErrorCode, PlaybackEvent, SessionController};
use lampbox::model::{CatalogEntry, FileIdentity};
use std::sync::Arc;

fn catalog(len: usize) -> Arc<MediaCatalog> {
    Arc::new(MediaCatalog::new(
        (0..len)
            .filter_map(|idx| {
                CatalogEntry::for_identity(FileIdentity::new(format!("/v/clip_{idx}.mp4"), 1, 0))
            })
            .collect(),
    ))
}

fuzz_target!(|data: &[u8]| {
    let len = data.first().map_or(0, |byte| usize::from(*byte % 16));
    let mut controller = SessionController::new(catalog(len), MemoryStore::new());

    for byte in data.iter().skip(1) {
        let event = match byte % 12 {
            0 => PlaybackEvent::PlaybackStarted,
            1 => PlaybackEvent::PositionReport(u64::from(*byte) * 250),
            2 => PlaybackEvent::Pause,
            3 => PlaybackEvent::Resume,
            4 => PlaybackEvent::Completed,
            5 => PlaybackEvent::PlaybackError(PlaybackErrorCode::DecodingFailed),
            6 => PlaybackEvent::Teardown,
            7 => PlaybackEvent::SeekForward,
            8 => PlaybackEvent::SeekBackward,
            9 => PlaybackEvent::Prepared {
                duration_ms: Some(u64::from(*byte) * 1_000),
            },
            10 => PlaybackEvent::SelectItem(FileIdentity::new(
                format!("/v/clip_{}.mp4", byte % 16),
                1,
                0,
            )),
            _ => PlaybackEvent::CatalogRefreshed(catalog(usize::from(byte % 16))),
        };
        controller.handle(event);

        if let Some(index) = controller.state().index() {
            assert!(index < controller.catalog().count());
        }
    }
});
