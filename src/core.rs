use crate::catalog::MediaCatalog;
use crate::config::KeyValueStore;
use crate::library::LibraryScanner;
use crate::model::{FileIdentity, PlaybackState};
use crate::playback;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_SEEK_STEP_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Ready { index: usize, resume_ms: u64 },
    Playing { index: usize, position_ms: u64 },
    Paused { index: usize, position_ms: u64 },
    Erroring { index: usize, retry_count: u32 },
    /// Every item failed during one lap of the catalog.
    Exhausted,
}

impl SessionState {
    pub fn index(self) -> Option<usize> {
        match self {
            Self::Ready { index, .. }
            | Self::Playing { index, .. }
            | Self::Paused { index, .. }
            | Self::Erroring { index, .. } => Some(index),
            Self::Empty | Self::Exhausted => None,
        }
    }

    fn with_index(self, index: usize) -> Self {
        match self {
            Self::Ready { resume_ms, .. } => Self::Ready { index, resume_ms },
            Self::Playing { position_ms, .. } => Self::Playing { index, position_ms },
            Self::Paused { position_ms, .. } => Self::Paused { index, position_ms },
            Self::Erroring { retry_count, .. } => Self::Erroring { index, retry_count },
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackErrorCode {
    DecoderInitFailed,
    DecodingFailed,
    FormatUnsupported,
    ExceedsCapabilities,
    Other(String),
}

impl PlaybackErrorCode {
    pub fn message(&self) -> String {
        match self {
            Self::DecoderInitFailed => String::from("Decoder failed to initialise"),
            Self::DecodingFailed => String::from("Decoding failed, the format may not be supported"),
            Self::FormatUnsupported => String::from("Video format not supported"),
            Self::ExceedsCapabilities => {
                String::from("Video exceeds what this device can decode")
            }
            Self::Other(detail) => {
                let short: String = detail.chars().take(30).collect();
                format!("Playback error: {short}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    SelectItem(FileIdentity),
    Prepared { duration_ms: Option<u64> },
    PlaybackStarted,
    PositionReport(u64),
    Pause,
    Resume,
    TogglePlayback,
    SeekTo(u64),
    SeekForward,
    SeekBackward,
    Completed,
    PlaybackError(PlaybackErrorCode),
    Teardown,
    CatalogRefreshed(Arc<MediaCatalog>),
}

/// What the renderer should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Load { path: PathBuf, seek_to_ms: u64 },
    Seek { position_ms: u64 },
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    PlaybackFailed { display_name: String, message: String },
    Resumed { position_ms: u64 },
    LibraryExhausted,
    CatalogEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub identity: FileIdentity,
    pub display_name: String,
    pub resume_position_ms: u64,
}

/// Decides what plays. Every transition is applied synchronously; saving the
/// resume point is a side effect whose failure is logged and ignored.
#[derive(Debug)]
pub struct SessionController<S> {
    catalog: Arc<MediaCatalog>,
    state: SessionState,
    store: S,
    saved: PlaybackState,
    last_error: Option<PlaybackErrorCode>,
    consecutive_errors: u32,
    lap_start: Option<FileIdentity>,
    duration_ms: Option<u64>,
    seek_step_ms: u64,
    notifications: Vec<Notification>,
}

impl<S: KeyValueStore> SessionController<S> {
    pub fn new(catalog: Arc<MediaCatalog>, store: S) -> Self {
        let saved = playback::load(&store);
        let mut controller = Self {
            catalog,
            state: SessionState::Empty,
            store,
            saved,
            last_error: None,
            consecutive_errors: 0,
            lap_start: None,
            duration_ms: None,
            seek_step_ms: DEFAULT_SEEK_STEP_MS,
            notifications: Vec::new(),
        };
        controller.state = controller.initial_state();
        if controller.state == SessionState::Empty {
            controller.notifications.push(Notification::CatalogEmpty);
        }
        info!("session starts in {:?}", controller.state);
        controller
    }

    pub fn start(scanner: &LibraryScanner, store: S) -> Self {
        Self::new(Arc::new(scanner.scan()), store)
    }

    pub fn with_seek_step(mut self, seek_step_ms: u64) -> Self {
        self.seek_step_ms = seek_step_ms;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn catalog(&self) -> &Arc<MediaCatalog> {
        &self.catalog
    }

    pub fn saved_state(&self) -> &PlaybackState {
        &self.saved
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn last_error(&self) -> Option<&PlaybackErrorCode> {
        self.last_error.as_ref()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn current_selection(&self) -> Option<Selection> {
        let (index, resume_position_ms) = match self.state {
            SessionState::Ready { index, resume_ms } => (index, resume_ms),
            SessionState::Playing { index, position_ms }
            | SessionState::Paused { index, position_ms } => (index, position_ms),
            SessionState::Erroring { index, .. } => (index, 0),
            SessionState::Empty | SessionState::Exhausted => return None,
        };
        let entry = self.catalog.item_at(index)?;
        Some(Selection {
            identity: entry.identity.clone(),
            display_name: entry.display_name.clone(),
            resume_position_ms,
        })
    }

    /// The load the renderer still owes us, if an item is selected but not
    /// yet started.
    pub fn pending_directive(&self) -> Option<Directive> {
        match self.state {
            SessionState::Ready { index, resume_ms } => self.load_directive(index, resume_ms),
            _ => None,
        }
    }

    pub fn handle(&mut self, event: PlaybackEvent) -> Option<Directive> {
        debug!("{:?} <- {event:?}", self.state);
        match event {
            PlaybackEvent::SelectItem(identity) => self.select(&identity),
            PlaybackEvent::Prepared { duration_ms } => {
                self.duration_ms = duration_ms;
                None
            }
            PlaybackEvent::PlaybackStarted => {
                self.started();
                None
            }
            PlaybackEvent::PositionReport(position_ms) => {
                if let SessionState::Playing { index, .. } = self.state {
                    self.state = SessionState::Playing { index, position_ms };
                }
                None
            }
            PlaybackEvent::Pause => self.pause(),
            PlaybackEvent::Resume => self.resume(),
            PlaybackEvent::TogglePlayback => match self.state {
                SessionState::Playing { .. } => self.pause(),
                SessionState::Paused { .. } => self.resume(),
                _ => None,
            },
            PlaybackEvent::SeekTo(target_ms) => self.seek(target_ms),
            PlaybackEvent::SeekForward => {
                let position = self.position_ms()?;
                self.seek(position.saturating_add(self.seek_step_ms))
            }
            PlaybackEvent::SeekBackward => {
                let position = self.position_ms()?;
                self.seek(position.saturating_sub(self.seek_step_ms))
            }
            PlaybackEvent::Completed => match self.state {
                SessionState::Playing { index, .. } => self.advance(index),
                _ => None,
            },
            PlaybackEvent::PlaybackError(code) => match self.state {
                SessionState::Playing { index, .. } | SessionState::Ready { index, .. } => {
                    self.fail(index, code)
                }
                _ => None,
            },
            PlaybackEvent::Teardown => {
                if let SessionState::Playing { index, position_ms }
                | SessionState::Paused { index, position_ms } = self.state
                {
                    self.persist(index, position_ms);
                }
                None
            }
            PlaybackEvent::CatalogRefreshed(catalog) => self.refresh(catalog),
        }
    }

    fn initial_state(&self) -> SessionState {
        if self.catalog.is_empty() {
            return SessionState::Empty;
        }

        let found = self
            .saved
            .identity
            .as_ref()
            .and_then(|identity| self.catalog.index_of(identity));
        match found {
            Some(index) => SessionState::Ready {
                index,
                resume_ms: self.saved.position_ms,
            },
            None => SessionState::Ready {
                index: 0,
                resume_ms: 0,
            },
        }
    }

    fn select(&mut self, identity: &FileIdentity) -> Option<Directive> {
        let Some(index) = self.catalog.index_of(identity) else {
            debug!("ignoring selection of {}", identity.path().display());
            return None;
        };

        let resume_ms = if self.saved.identity.as_ref() == Some(identity) {
            self.saved.position_ms
        } else {
            0
        };
        self.reset_errors();
        self.duration_ms = None;
        self.state = SessionState::Ready { index, resume_ms };
        self.load_directive(index, resume_ms)
    }

    fn started(&mut self) {
        let SessionState::Ready { index, resume_ms } = self.state else {
            return;
        };
        self.reset_errors();
        self.state = SessionState::Playing {
            index,
            position_ms: resume_ms,
        };
        if resume_ms > 0 {
            self.notifications.push(Notification::Resumed {
                position_ms: resume_ms,
            });
        }
    }

    fn pause(&mut self) -> Option<Directive> {
        let SessionState::Playing { index, position_ms } = self.state else {
            return None;
        };
        self.state = SessionState::Paused { index, position_ms };
        self.persist(index, position_ms);
        Some(Directive::Pause)
    }

    fn resume(&mut self) -> Option<Directive> {
        let SessionState::Paused { index, position_ms } = self.state else {
            return None;
        };
        self.state = SessionState::Playing { index, position_ms };
        Some(Directive::Resume)
    }

    fn position_ms(&self) -> Option<u64> {
        match self.state {
            SessionState::Playing { position_ms, .. } | SessionState::Paused { position_ms, .. } => {
                Some(position_ms)
            }
            _ => None,
        }
    }

    fn seek(&mut self, target_ms: u64) -> Option<Directive> {
        let position_ms = self
            .duration_ms
            .map_or(target_ms, |duration| target_ms.min(duration));
        self.state = match self.state {
            SessionState::Playing { index, .. } => SessionState::Playing { index, position_ms },
            SessionState::Paused { index, .. } => SessionState::Paused { index, position_ms },
            _ => return None,
        };
        if let Some(index) = self.state.index() {
            self.persist(index, position_ms);
        }
        Some(Directive::Seek { position_ms })
    }

    /// Moves to the next item, wrapping after the last one.
    fn advance(&mut self, index: usize) -> Option<Directive> {
        let count = self.catalog.count();
        if count == 0 {
            return self.become_empty();
        }

        let next = (index + 1) % count;
        self.duration_ms = None;
        self.state = SessionState::Ready {
            index: next,
            resume_ms: 0,
        };
        self.persist(next, 0);
        self.load_directive(next, 0)
    }

    fn fail(&mut self, index: usize, code: PlaybackErrorCode) -> Option<Directive> {
        let Some(entry) = self.catalog.item_at(index).cloned() else {
            return self.become_empty();
        };

        self.consecutive_errors += 1;
        self.state = SessionState::Erroring {
            index,
            retry_count: self.consecutive_errors,
        };
        warn!(
            "playback of {} failed ({} in a row): {}",
            entry.display_name,
            self.consecutive_errors,
            code.message()
        );
        self.notifications.push(Notification::PlaybackFailed {
            display_name: entry.display_name.clone(),
            message: code.message(),
        });
        self.last_error = Some(code);

        let lap_start = self
            .lap_start
            .get_or_insert_with(|| entry.identity.clone())
            .clone();
        let next = (index + 1) % self.catalog.count();
        let wrapped = self
            .catalog
            .item_at(next)
            .is_some_and(|candidate| candidate.identity == lap_start);
        if !wrapped {
            return self.advance(index);
        }

        warn!("every item in the library failed to play");
        self.duration_ms = None;
        self.persist(next, 0);
        self.state = SessionState::Exhausted;
        self.notifications.push(Notification::LibraryExhausted);
        Some(Directive::Stop)
    }

    fn refresh(&mut self, catalog: Arc<MediaCatalog>) -> Option<Directive> {
        let current = self
            .state
            .index()
            .and_then(|index| self.catalog.item_at(index))
            .map(|entry| entry.identity.clone());
        self.catalog = catalog;
        info!("catalog refreshed with {} videos", self.catalog.count());

        if let Some(lap_start) = &self.lap_start {
            if self.catalog.index_of(lap_start).is_none() {
                self.lap_start = None;
            }
        }

        if self.catalog.is_empty() {
            if self.state == SessionState::Empty {
                return None;
            }
            return self.become_empty();
        }

        let Some(identity) = current else {
            self.reset_errors();
            self.state = self.initial_state();
            return self.pending_directive();
        };

        match self.catalog.index_of(&identity) {
            Some(index) => {
                self.state = self.state.with_index(index);
                None
            }
            None => {
                debug!("{} left the catalog", identity.path().display());
                self.reset_errors();
                self.duration_ms = None;
                self.state = SessionState::Ready {
                    index: 0,
                    resume_ms: 0,
                };
                self.pending_directive()
            }
        }
    }

    fn become_empty(&mut self) -> Option<Directive> {
        self.state = SessionState::Empty;
        self.duration_ms = None;
        self.reset_errors();
        self.notifications.push(Notification::CatalogEmpty);
        Some(Directive::Stop)
    }

    fn reset_errors(&mut self) {
        self.consecutive_errors = 0;
        self.lap_start = None;
    }

    fn load_directive(&self, index: usize, seek_to_ms: u64) -> Option<Directive> {
        self.catalog.item_at(index).map(|entry| Directive::Load {
            path: entry.identity.path().to_path_buf(),
            seek_to_ms,
        })
    }

    fn persist(&mut self, index: usize, position_ms: u64) {
        let Some(entry) = self.catalog.item_at(index) else {
            return;
        };
        let state = PlaybackState::at(entry.identity.clone(), position_ms);
        if let Err(err) = playback::save(&mut self.store, &state) {
            warn!("failed to save playback state: {err:#}");
        }
        self.saved = state;
    }
}

/// Controller behind one lock, for hosts that deliver events from more than
/// one thread.
#[derive(Debug)]
pub struct SharedSession<S> {
    inner: Arc<Mutex<SessionController<S>>>,
}

impl<S> Clone for SharedSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeyValueStore> SharedSession<S> {
    pub fn new(controller: SessionController<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    pub fn handle(&self, event: PlaybackEvent) -> Option<Directive> {
        self.lock().handle(event)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn current_selection(&self) -> Option<Selection> {
        self.lock().current_selection()
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        self.lock().take_notifications()
    }

    fn lock(&self) -> MutexGuard<'_, SessionController<S>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
