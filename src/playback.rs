//! # Playback Controller
//!
//! [`PlayerController`] is the single owner of "what is playing and where".
//! It drives an [`AudioEngine`], keeps the bound [`Book`]'s position current,
//! persists it through the [`BookStore`] and publishes [`PlayerEvent`]s.
//!
//! ## States
//!
//! ```text
//! Idle --play--> Playing <--play/pause--> Paused
//!   any --stop--> Stopped       any --release--> Idle
//! ```
//!
//! ## Concurrency
//!
//! The controller is a cheap cloneable handle. Every operation takes one mutex,
//! so commands from different threads run one after another in lock order and
//! the last one wins. The current state is mirrored in an atomic for lock-free
//! reads, and events are published while the lock is held so subscribers see
//! them in the same order.
//!
//! While playing, a position updater thread wakes every tick to record the
//! engine position, count the sleep timer down and move on when a chapter ends.

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error, info, trace, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use crate::db::BookStore;
use crate::engine::AudioEngine;
use crate::error::{ModelError, PlaybackError};
use crate::model::{Book, ID_UNKNOWN};
use crate::notifier::{ChangeNotifier, PlayerEvent, Subscription};

/// Within this many milliseconds of a chapter start, "previous" goes to the
/// previous chapter instead of restarting the current one.
const PREVIOUS_RESTART_THRESHOLD_MS: i64 = 2_000;

/// Playback state of a [`PlayerController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlayState {
    Idle = 0,
    Playing = 1,
    Paused = 2,
    Stopped = 3,
}

impl PlayState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            3 => PlayState::Stopped,
            _ => PlayState::Idle,
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayState::Idle => "idle",
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
            PlayState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Direction of a [`PlayerController::skip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Timing knobs of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSettings {
    /// Distance of one skip.
    pub seek_time: Duration,
    /// How far a pause with rewind jumps back.
    pub auto_rewind: Duration,
    /// Length of the sleep timer.
    pub sleep_time: Duration,
    /// Position updater period.
    pub tick_interval: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            seek_time: Duration::from_secs(20),
            auto_rewind: Duration::from_secs(2),
            sleep_time: Duration::from_secs(20 * 60),
            tick_interval: Duration::from_secs(1),
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

struct Inner {
    engine: Box<dyn AudioEngine>,
    /// Whether `engine` holds the current chapter.
    prepared: bool,
    book: Option<Book>,
    state: PlayState,
    sleep_remaining: Option<Duration>,
    /// Dropping the sender stops the position updater.
    ticker: Option<Sender<()>>,
    ticker_generation: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    state: AtomicU8,
    store: Arc<BookStore>,
    settings: PlaybackSettings,
    notifier: ChangeNotifier,
}

/// Thread-safe handle to one player.
#[derive(Clone)]
pub struct PlayerController {
    shared: Arc<Shared>,
}

impl fmt::Debug for PlayerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PlayerController {
    pub fn new(engine: Box<dyn AudioEngine>, store: Arc<BookStore>, settings: PlaybackSettings) -> Self {
        Self::with_notifier(engine, store, settings, ChangeNotifier::new())
    }

    /// Like [`PlayerController::new`] but publishing into an existing notifier.
    pub fn with_notifier(
        engine: Box<dyn AudioEngine>,
        store: Arc<BookStore>,
        settings: PlaybackSettings,
        notifier: ChangeNotifier,
    ) -> Self {
        let inner = Inner {
            engine,
            prepared: false,
            book: None,
            state: PlayState::Idle,
            sleep_remaining: None,
            ticker: None,
            ticker_generation: 0,
        };
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                state: AtomicU8::new(PlayState::Idle as u8),
                store,
                settings,
                notifier,
            }),
        }
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.shared.notifier
    }

    pub fn subscribe(&self) -> Subscription {
        self.shared.notifier.subscribe()
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.shared.settings
    }

    /// Current state without taking the controller lock.
    pub fn state(&self) -> PlayState {
        PlayState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn has_book(&self) -> bool {
        self.shared.lock().book.is_some()
    }

    /// Snapshot of the bound book with its live position.
    pub fn book(&self) -> Option<Book> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        capture_position(inner);
        inner.book.clone()
    }

    pub fn sleep_timer_remaining(&self) -> Option<Duration> {
        self.shared.lock().sleep_remaining
    }

    /// Binds the player to `book`, resuming at the book's stored position.
    ///
    /// Whatever was playing before is stopped and its position saved.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Model`] if `book` breaks a model invariant.
    pub fn init(&self, book: Book) -> Result<(), PlaybackError> {
        book.validate()?;
        let mut guard = self.shared.lock();
        let inner = &mut *guard;

        if inner.prepared {
            capture_position(inner);
            inner.engine.release();
            inner.prepared = false;
            self.shared.persist(inner);
        }
        self.shared.cancel_sleep_timer(inner);

        let book_id = book.id;
        info!("Bound book `{}` at {}ms in {}", book.name, book.time, book.current_path.display());
        inner.book = Some(book);
        self.shared.set_state(inner, PlayState::Idle);
        self.shared.notifier.publish(PlayerEvent::BookChanged { book_id });
        Ok(())
    }

    /// Starts or resumes playback. Does nothing when already playing.
    pub fn play(&self) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        self.shared.play_locked(&mut guard)
    }

    /// Pauses playback, optionally jumping back by the auto-rewind amount.
    ///
    /// Ignored unless playing.
    pub fn pause(&self, rewind: bool) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        self.shared.pause_locked(&mut guard, rewind)
    }

    /// Pauses (with rewind) when playing, plays otherwise.
    pub fn play_pause(&self) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        if guard.state == PlayState::Playing {
            self.shared.pause_locked(&mut guard, true)
        } else {
            self.shared.play_locked(&mut guard)
        }
    }

    /// Stops playback, saves the position, frees the engine and cancels the
    /// sleep timer.
    pub fn stop(&self) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        if guard.book.is_none() {
            return Err(PlaybackError::NoBook);
        }
        self.shared.stop_locked(&mut guard);
        Ok(())
    }

    /// Stops and unbinds the book.
    pub fn release(&self) {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        self.shared.stop_locked(inner);
        inner.book = None;
        self.shared.set_state(inner, PlayState::Idle);
    }

    /// Sets the playback speed, clamped into the supported range, and returns
    /// the value applied. Playback continues uninterrupted.
    pub fn set_playback_speed(&self, speed: f32) -> Result<f32, PlaybackError> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let book = inner.book.as_mut().ok_or(PlaybackError::NoBook)?;
        let applied = book.set_speed(speed);
        if applied != speed {
            debug!("Requested speed {speed} clamped to {applied}");
        }
        if inner.prepared {
            inner.engine.set_speed(applied)?;
        }
        self.shared.persist(inner);
        self.shared.notifier.publish(PlayerEvent::SpeedChanged(applied));
        Ok(applied)
    }

    /// Jumps to `time` milliseconds into the chapter at `path`, switching
    /// chapters if needed and keeping the play/pause state.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownChapter`] if `path` is not a chapter of the book.
    pub fn change_time(&self, time: i64, path: &Path) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        self.shared.change_time_locked(&mut guard, time, path)
    }

    /// Moves to the start of the next chapter. No-op on the last chapter.
    pub fn next(&self) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        self.shared.next_locked(&mut guard)
    }

    /// Restarts the current chapter, or goes to the previous one when close to
    /// the chapter start. `to_start` picks where in the previous chapter.
    pub fn previous(&self, to_start: bool) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        self.shared.previous_locked(&mut guard, to_start)
    }

    /// Jumps by the configured seek time, crossing chapter borders.
    pub fn skip(&self, direction: Direction) -> Result<(), PlaybackError> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let book = inner.book.as_ref().ok_or(PlaybackError::NoBook)?;
        let current = book
            .current_chapter()
            .ok_or_else(|| unknown_current(book))?;
        let (path, duration) = (current.path().to_path_buf(), current.duration());

        let now = current_time(inner);
        let delta = millis(self.shared.settings.seek_time);
        let target = match direction {
            Direction::Forward => now.saturating_add(delta),
            Direction::Backward => now.saturating_sub(delta),
        };
        trace!("Skipping {direction:?} from {now}ms to {target}ms");

        if target < 0 {
            self.shared.previous_locked(inner, false)
        } else if target > duration {
            self.shared.next_locked(inner)
        } else {
            self.shared.change_time_locked(inner, target, &path)
        }
    }

    /// Starts the sleep timer, or cancels it when running. Returns the time
    /// left afterwards.
    pub fn toggle_sleep_timer(&self) -> Result<Option<Duration>, PlaybackError> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        if inner.book.is_none() {
            return Err(PlaybackError::NoBook);
        }
        inner.sleep_remaining = match inner.sleep_remaining {
            Some(_) => {
                info!("Sleep timer cancelled");
                None
            }
            None => {
                info!("Sleep timer set to {:?}", self.shared.settings.sleep_time);
                Some(self.shared.settings.sleep_time)
            }
        };
        self.shared
            .notifier
            .publish(PlayerEvent::SleepTimerChanged(inner.sleep_remaining));
        Ok(inner.sleep_remaining)
    }
}

fn unknown_current(book: &Book) -> PlaybackError {
    ModelError::UnknownChapter {
        book: book.name.clone(),
        path: book.current_path.clone(),
    }
    .into()
}

/// Live position: the engine's if prepared, the book's otherwise.
fn current_time(inner: &Inner) -> i64 {
    match (&inner.book, inner.prepared) {
        (_, true) => inner.engine.position(),
        (Some(book), false) => book.time,
        (None, false) => 0,
    }
}

/// Copies the engine position into the book.
fn capture_position(inner: &mut Inner) {
    if !inner.prepared {
        return;
    }
    let position = inner.engine.position();
    if let Some(book) = inner.book.as_mut() {
        let duration = book.current_chapter().map(|c| c.duration()).unwrap_or(0);
        book.time = position.clamp(0, duration);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(self: &Arc<Self>, inner: &mut Inner, state: PlayState) {
        if state == PlayState::Playing {
            if inner.ticker.is_none() {
                self.start_ticker(inner);
            }
        } else {
            inner.ticker = None;
        }

        let previous = inner.state;
        inner.state = state;
        self.state.store(state as u8, Ordering::Release);
        if previous != state {
            debug!("Player {previous} -> {state}");
            self.notifier.publish(PlayerEvent::StateChanged(state));
        }
    }

    fn start_ticker(self: &Arc<Self>, inner: &mut Inner) {
        let (sender, stop) = channel::bounded::<()>(0);
        inner.ticker_generation += 1;
        let generation = inner.ticker_generation;
        let interval = self.settings.tick_interval;
        let shared: Weak<Shared> = Arc::downgrade(self);

        let spawned = thread::Builder::new()
            .name("voice-position".into())
            .spawn(move || loop {
                match stop.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(shared) = shared.upgrade() else { break };
                        if !shared.tick(generation) {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(_) => inner.ticker = Some(sender),
            Err(e) => error!("Could not start the position updater: {e}"),
        }
    }

    /// One position updater step. Returns `false` when the updater should exit.
    fn tick(self: &Arc<Self>, generation: u64) -> bool {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.ticker_generation != generation || inner.state != PlayState::Playing {
            return false;
        }

        if let Some(remaining) = inner.sleep_remaining {
            let left = remaining.saturating_sub(self.settings.tick_interval);
            if left.is_zero() {
                info!("Sleep timer elapsed, stopping");
                self.stop_locked(inner);
                return false;
            }
            inner.sleep_remaining = Some(left);
            self.notifier.publish(PlayerEvent::SleepTimerChanged(Some(left)));
        }

        if inner.engine.is_completed() {
            self.complete_chapter(inner);
            return inner.state == PlayState::Playing && inner.ticker_generation == generation;
        }

        capture_position(inner);
        self.persist(inner);
        if let Some(book) = &inner.book {
            self.notifier.publish(PlayerEvent::PositionChanged {
                path: book.current_path.clone(),
                time: book.time,
            });
        }
        true
    }

    /// The engine ran to the end of the current chapter.
    fn complete_chapter(self: &Arc<Self>, inner: &mut Inner) {
        let next = inner
            .book
            .as_ref()
            .and_then(|b| b.next_chapter())
            .map(|c| c.path().to_path_buf());

        match next {
            Some(path) => {
                debug!("Chapter finished, continuing with {}", path.display());
                if let Err(e) = self.change_time_locked(inner, 0, &path) {
                    error!("Could not continue with the next chapter: {e}");
                    self.stop_locked(inner);
                }
            }
            None => {
                info!("Reached the end of the book");
                self.stop_locked(inner);
            }
        }
    }

    fn persist(&self, inner: &Inner) {
        if let Some(book) = &inner.book {
            if book.id != ID_UNKNOWN {
                // Outcome is logged by the store.
                drop(self.store.update_book_async(book));
            }
        }
    }

    fn cancel_sleep_timer(&self, inner: &mut Inner) {
        if inner.sleep_remaining.take().is_some() {
            self.notifier.publish(PlayerEvent::SleepTimerChanged(None));
        }
    }

    /// Loads the book's current chapter into the engine at the book's position
    /// and speed.
    fn prepare_locked(&self, inner: &mut Inner) -> Result<(), PlaybackError> {
        let book = inner.book.as_ref().ok_or(PlaybackError::NoBook)?;
        let chapter = book
            .current_chapter()
            .cloned()
            .ok_or_else(|| unknown_current(book))?;
        let (time, speed) = (book.time, book.speed);

        inner.prepared = false;
        inner.engine.prepare(&chapter)?;
        inner.prepared = true;
        inner.engine.set_speed(speed)?;
        inner.engine.seek_to(time)?;
        Ok(())
    }

    fn play_locked(self: &Arc<Self>, inner: &mut Inner) -> Result<(), PlaybackError> {
        if inner.book.is_none() {
            return Err(PlaybackError::NoBook);
        }
        if inner.state == PlayState::Playing {
            trace!("Already playing");
            return Ok(());
        }

        if !inner.prepared {
            if let Err(e) = self.prepare_locked(inner) {
                error!("Could not prepare playback: {e}");
                self.stop_locked(inner);
                return Err(e);
            }
        }
        if inner.engine.is_completed() {
            inner.engine.seek_to(0)?;
        }
        inner.engine.start()?;
        self.set_state(inner, PlayState::Playing);
        Ok(())
    }

    fn pause_locked(self: &Arc<Self>, inner: &mut Inner, rewind: bool) -> Result<(), PlaybackError> {
        if inner.state != PlayState::Playing {
            debug!("Pause ignored while {}", inner.state);
            return Ok(());
        }

        inner.engine.pause()?;
        let amount = millis(self.settings.auto_rewind);
        if rewind && amount > 0 {
            let target = (inner.engine.position() - amount).max(0);
            inner.engine.seek_to(target)?;
        }
        capture_position(inner);
        self.persist(inner);
        self.set_state(inner, PlayState::Paused);
        Ok(())
    }

    fn stop_locked(self: &Arc<Self>, inner: &mut Inner) {
        if inner.prepared {
            capture_position(inner);
            inner.engine.release();
            inner.prepared = false;
        }
        self.persist(inner);
        self.cancel_sleep_timer(inner);
        self.set_state(inner, PlayState::Stopped);
    }

    fn change_time_locked(
        self: &Arc<Self>,
        inner: &mut Inner,
        time: i64,
        path: &Path,
    ) -> Result<(), PlaybackError> {
        let book = inner.book.as_mut().ok_or(PlaybackError::NoBook)?;
        let switching = book.current_path != path;
        book.set_position(time, path)?;
        let time = book.time;

        if inner.prepared {
            if switching {
                let was_playing = inner.state == PlayState::Playing;
                if let Err(e) = self.prepare_locked(inner) {
                    error!("Could not switch to {}: {e}", path.display());
                    self.stop_locked(inner);
                    return Err(e);
                }
                if was_playing {
                    inner.engine.start()?;
                }
            } else {
                inner.engine.seek_to(time)?;
            }
        }

        self.persist(inner);
        self.notifier.publish(PlayerEvent::PositionChanged {
            path: path.to_path_buf(),
            time,
        });
        Ok(())
    }

    fn next_locked(self: &Arc<Self>, inner: &mut Inner) -> Result<(), PlaybackError> {
        let book = inner.book.as_ref().ok_or(PlaybackError::NoBook)?;
        match book.next_chapter().map(|c| c.path().to_path_buf()) {
            Some(path) => self.change_time_locked(inner, 0, &path),
            None => {
                debug!("Already on the last chapter");
                Ok(())
            }
        }
    }

    fn previous_locked(self: &Arc<Self>, inner: &mut Inner, to_start: bool) -> Result<(), PlaybackError> {
        let now = current_time(inner);
        let book = inner.book.as_ref().ok_or(PlaybackError::NoBook)?;
        let current: PathBuf = book.current_path.clone();
        let previous = book
            .previous_chapter()
            .map(|c| (c.path().to_path_buf(), c.duration()));

        match previous {
            Some((path, duration)) if now <= PREVIOUS_RESTART_THRESHOLD_MS => {
                let target = if to_start {
                    0
                } else {
                    (duration - millis(self.settings.seek_time)).max(0)
                };
                self.change_time_locked(inner, target, &path)
            }
            _ => {
                if previous.is_none() && now <= PREVIOUS_RESTART_THRESHOLD_MS {
                    warn!("No previous chapter, restarting the first one");
                }
                self.change_time_locked(inner, 0, &current)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::model::{BookType, Chapter};
    use std::time::Instant;

    /// What the scripted engine has been told to do.
    #[derive(Debug, Default)]
    struct EngineScript {
        prepared: Option<PathBuf>,
        duration: i64,
        position: i64,
        playing: bool,
        speed: f32,
        fail_prepare: bool,
        prepares: usize,
        misuse: Vec<String>,
    }

    #[derive(Clone, Default)]
    struct ScriptedEngine(Arc<Mutex<EngineScript>>);

    impl ScriptedEngine {
        fn script(&self) -> MutexGuard<'_, EngineScript> {
            self.0.lock().unwrap()
        }

        fn loaded(&self, call: &str) -> Result<MutexGuard<'_, EngineScript>, EngineError> {
            let mut script = self.script();
            if script.prepared.is_none() {
                script.misuse.push(call.to_string());
                return Err(EngineError::NotPrepared);
            }
            Ok(script)
        }
    }

    impl AudioEngine for ScriptedEngine {
        fn prepare(&mut self, chapter: &Chapter) -> Result<(), EngineError> {
            let mut script = self.script();
            if script.fail_prepare {
                return Err(EngineError::Prepare {
                    path: chapter.path().to_path_buf(),
                    reason: "scripted failure".into(),
                });
            }
            script.prepared = Some(chapter.path().to_path_buf());
            script.duration = chapter.duration();
            script.position = 0;
            script.playing = false;
            script.prepares += 1;
            Ok(())
        }

        fn start(&mut self) -> Result<(), EngineError> {
            self.loaded("start")?.playing = true;
            Ok(())
        }

        fn pause(&mut self) -> Result<(), EngineError> {
            self.loaded("pause")?.playing = false;
            Ok(())
        }

        fn seek_to(&mut self, ms: i64) -> Result<(), EngineError> {
            let mut script = self.loaded("seek_to")?;
            script.position = ms.clamp(0, script.duration);
            Ok(())
        }

        fn position(&self) -> i64 {
            self.script().position
        }

        fn duration(&self) -> i64 {
            self.script().duration
        }

        fn set_speed(&mut self, speed: f32) -> Result<(), EngineError> {
            self.loaded("set_speed")?.speed = speed;
            Ok(())
        }

        fn is_playing(&self) -> bool {
            self.script().playing
        }

        fn is_completed(&self) -> bool {
            let script = self.script();
            script.prepared.is_some() && script.position >= script.duration
        }

        fn release(&mut self) {
            let mut script = self.script();
            script.prepared = None;
            script.playing = false;
        }
    }

    fn quiet_settings() -> PlaybackSettings {
        PlaybackSettings {
            tick_interval: Duration::from_secs(3_600),
            ..PlaybackSettings::default()
        }
    }

    fn create_test_player(settings: PlaybackSettings) -> (PlayerController, ScriptedEngine, Arc<BookStore>, Book) {
        let store = Arc::new(BookStore::open_in_memory().unwrap());
        let chapters = (1..=3)
            .map(|i| Chapter::new(format!("/books/dune/{i}.mp3"), format!("Chapter {i}"), 60_000))
            .collect();
        let book = Book::new("/books/dune", "Dune", BookType::SingleFolder, chapters).unwrap();
        let book = store.add_book(book).unwrap();

        let engine = ScriptedEngine::default();
        let player = PlayerController::new(Box::new(engine.clone()), Arc::clone(&store), settings);
        player.init(book.clone()).unwrap();
        (player, engine, store, book)
    }

    fn chapter_path(i: usize) -> PathBuf {
        PathBuf::from(format!("/books/dune/{i}.mp3"))
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn stored(store: &BookStore, id: i64) -> Book {
        store.flush().unwrap();
        store.get_book(id).unwrap().unwrap()
    }

    #[test]
    fn test_new_player_is_idle_without_book() {
        let store = Arc::new(BookStore::open_in_memory().unwrap());
        let player = PlayerController::new(Box::new(ScriptedEngine::default()), store, quiet_settings());
        assert_eq!(player.state(), PlayState::Idle);
        assert!(!player.has_book());
        assert!(matches!(player.play(), Err(PlaybackError::NoBook)));
        assert!(matches!(player.set_playback_speed(1.0), Err(PlaybackError::NoBook)));
        assert!(matches!(player.next(), Err(PlaybackError::NoBook)));
        assert!(matches!(player.stop(), Err(PlaybackError::NoBook)));
        assert!(matches!(player.toggle_sleep_timer(), Err(PlaybackError::NoBook)));
        assert_eq!(player.state(), PlayState::Idle);
        assert_eq!(player.sleep_timer_remaining(), None);
    }

    #[test]
    fn test_init_rejects_invalid_book() {
        let (player, _engine, _store, mut book) = create_test_player(quiet_settings());
        book.current_path = PathBuf::from("/elsewhere.mp3");
        assert!(matches!(player.init(book), Err(PlaybackError::Model(_))));
        assert_eq!(player.book().unwrap().current_path, chapter_path(1));
    }

    #[test]
    fn test_play_prepares_at_stored_position() {
        let (player, engine, store, mut book) = create_test_player(quiet_settings());
        book.set_position(15_000, &chapter_path(2)).unwrap();
        book.set_speed(1.5);
        store.update_book(&book).unwrap();
        player.init(store.get_book(book.id).unwrap().unwrap()).unwrap();

        player.play().unwrap();
        assert_eq!(player.state(), PlayState::Playing);
        let script = engine.script();
        assert_eq!(script.prepared, Some(chapter_path(2)));
        assert_eq!(script.position, 15_000);
        assert_eq!(script.speed, 1.5);
        assert!(script.playing);
    }

    #[test]
    fn test_play_is_idempotent() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        player.play().unwrap();
        player.play().unwrap();
        assert_eq!(player.state(), PlayState::Playing);
        assert_eq!(engine.script().prepares, 1);
    }

    #[test]
    fn test_pause_rewinds_and_persists() {
        let (player, engine, store, book) = create_test_player(quiet_settings());
        player.play().unwrap();
        engine.script().position = 10_000;

        player.pause(true).unwrap();
        assert_eq!(player.state(), PlayState::Paused);
        assert_eq!(engine.script().position, 8_000);
        assert_eq!(stored(&store, book.id).time, 8_000);

        player.play().unwrap();
        engine.script().position = 1_000;
        player.pause(true).unwrap();
        assert_eq!(engine.script().position, 0);

        player.play().unwrap();
        engine.script().position = 5_000;
        player.pause(false).unwrap();
        assert_eq!(stored(&store, book.id).time, 5_000);
    }

    #[test]
    fn test_pause_ignored_unless_playing() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        player.pause(true).unwrap();
        assert_eq!(player.state(), PlayState::Idle);
        assert!(engine.script().misuse.is_empty());
    }

    #[test]
    fn test_pause_then_play_from_another_thread() {
        let (player, _engine, _store, _book) = create_test_player(quiet_settings());
        player.play().unwrap();

        let other = player.clone();
        thread::spawn(move || other.pause(true).unwrap()).join().unwrap();
        assert_eq!(player.state(), PlayState::Paused);

        player.play().unwrap();
        assert_eq!(player.state(), PlayState::Playing);
    }

    #[test]
    fn test_play_pause_toggles() {
        let (player, _engine, _store, _book) = create_test_player(quiet_settings());
        player.play_pause().unwrap();
        assert_eq!(player.state(), PlayState::Playing);
        player.play_pause().unwrap();
        assert_eq!(player.state(), PlayState::Paused);
    }

    #[test]
    fn test_stop_releases_engine_and_cancels_sleep_timer() {
        let (player, engine, store, book) = create_test_player(quiet_settings());
        player.play().unwrap();
        player.toggle_sleep_timer().unwrap();
        engine.script().position = 42_000;

        player.stop().unwrap();
        assert_eq!(player.state(), PlayState::Stopped);
        assert!(engine.script().prepared.is_none());
        assert_eq!(player.sleep_timer_remaining(), None);
        assert_eq!(stored(&store, book.id).time, 42_000);

        // Stopped players prepare again on play.
        player.play().unwrap();
        assert_eq!(engine.script().position, 42_000);
        assert_eq!(engine.script().prepares, 2);
    }

    #[test]
    fn test_release_unbinds_book() {
        let (player, _engine, _store, _book) = create_test_player(quiet_settings());
        player.play().unwrap();
        player.release();
        assert_eq!(player.state(), PlayState::Idle);
        assert!(!player.has_book());
    }

    #[test]
    fn test_speed_is_clamped_and_applied() {
        let (player, engine, store, book) = create_test_player(quiet_settings());
        player.play().unwrap();

        assert_eq!(player.set_playback_speed(5.0).unwrap(), 3.0);
        assert_eq!(engine.script().speed, 3.0);
        assert_eq!(player.state(), PlayState::Playing);
        assert_eq!(stored(&store, book.id).speed, 3.0);

        assert_eq!(player.set_playback_speed(0.1).unwrap(), 0.5);
        assert_eq!(player.set_playback_speed(1.75).unwrap(), 1.75);
        assert_eq!(player.book().unwrap().speed, 1.75);
    }

    #[test]
    fn test_change_time_switches_chapter_keeping_state() {
        let (player, engine, store, book) = create_test_player(quiet_settings());
        player.play().unwrap();

        player.change_time(30_000, &chapter_path(3)).unwrap();
        assert_eq!(player.state(), PlayState::Playing);
        {
            let script = engine.script();
            assert_eq!(script.prepared, Some(chapter_path(3)));
            assert_eq!(script.position, 30_000);
            assert!(script.playing);
        }
        let saved = stored(&store, book.id);
        assert_eq!(saved.current_path, chapter_path(3));
        assert_eq!(saved.time, 30_000);

        player.pause(false).unwrap();
        player.change_time(1_000, &chapter_path(1)).unwrap();
        assert_eq!(player.state(), PlayState::Paused);
        assert!(!engine.script().playing);
    }

    #[test]
    fn test_change_time_rejects_unknown_chapter() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        player.play().unwrap();
        let err = player.change_time(0, Path::new("/books/other.mp3")).unwrap_err();
        assert!(matches!(err, PlaybackError::Model(ModelError::UnknownChapter { .. })));
        assert_eq!(player.state(), PlayState::Playing);
        assert_eq!(engine.script().prepared, Some(chapter_path(1)));
    }

    #[test]
    fn test_change_time_before_play_only_moves_position() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        player.change_time(7_000, &chapter_path(2)).unwrap();
        assert!(engine.script().prepared.is_none());
        player.play().unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(2)));
        assert_eq!(engine.script().position, 7_000);
    }

    #[test]
    fn test_next_and_previous() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        player.play().unwrap();

        player.next().unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(2)));

        // Far into the chapter: restart it.
        engine.script().position = 5_000;
        player.previous(false).unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(2)));
        assert_eq!(engine.script().position, 0);

        // Near the start: previous chapter, seek time before its end.
        engine.script().position = 1_000;
        player.previous(false).unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(1)));
        assert_eq!(engine.script().position, 40_000);

        player.next().unwrap();
        player.previous(true).unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(1)));
        assert_eq!(engine.script().position, 0);

        // First chapter: restart.
        player.previous(true).unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(1)));
    }

    #[test]
    fn test_next_on_last_chapter_is_noop() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        player.play().unwrap();
        player.change_time(10_000, &chapter_path(3)).unwrap();
        player.next().unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(3)));
        assert_eq!(engine.script().position, 10_000);
    }

    #[test]
    fn test_skip_crosses_chapter_borders() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        player.play().unwrap();

        engine.script().position = 10_000;
        player.skip(Direction::Forward).unwrap();
        assert_eq!(engine.script().position, 30_000);

        engine.script().position = 50_000;
        player.skip(Direction::Forward).unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(2)));
        assert_eq!(engine.script().position, 0);

        player.skip(Direction::Backward).unwrap();
        assert_eq!(engine.script().prepared, Some(chapter_path(1)));
        assert_eq!(engine.script().position, 40_000);
    }

    #[test]
    fn test_prepare_failure_stops_player() {
        let (player, engine, _store, _book) = create_test_player(quiet_settings());
        engine.script().fail_prepare = true;
        assert!(matches!(player.play(), Err(PlaybackError::Engine(_))));
        assert_eq!(player.state(), PlayState::Stopped);
        assert!(engine.script().misuse.is_empty());
    }

    #[test]
    fn test_sleep_timer_toggle() {
        let (player, _engine, _store, _book) = create_test_player(quiet_settings());
        assert_eq!(player.toggle_sleep_timer().unwrap(), Some(Duration::from_secs(1_200)));
        assert_eq!(player.sleep_timer_remaining(), Some(Duration::from_secs(1_200)));
        assert_eq!(player.toggle_sleep_timer().unwrap(), None);
    }

    #[test]
    fn test_sleep_timer_stops_playback() {
        let settings = PlaybackSettings {
            tick_interval: Duration::from_millis(10),
            sleep_time: Duration::from_millis(30),
            ..PlaybackSettings::default()
        };
        let (player, _engine, _store, _book) = create_test_player(settings);
        player.toggle_sleep_timer().unwrap();
        player.play().unwrap();

        assert!(wait_for(|| player.state() == PlayState::Stopped));
        assert_eq!(player.sleep_timer_remaining(), None);
    }

    #[test]
    fn test_updater_persists_position() {
        let settings = PlaybackSettings {
            tick_interval: Duration::from_millis(10),
            ..PlaybackSettings::default()
        };
        let (player, engine, store, book) = create_test_player(settings);
        player.play().unwrap();
        engine.script().position = 12_000;

        assert!(wait_for(|| {
            store.flush().unwrap();
            store.get_book(book.id).unwrap().unwrap().time == 12_000
        }));
    }

    #[test]
    fn test_completion_moves_to_next_chapter_then_stops() {
        let settings = PlaybackSettings {
            tick_interval: Duration::from_millis(10),
            ..PlaybackSettings::default()
        };
        let (player, engine, _store, _book) = create_test_player(settings);
        player.play().unwrap();

        engine.script().position = 60_000;
        assert!(wait_for(|| engine.script().prepared == Some(chapter_path(2))));
        assert_eq!(player.state(), PlayState::Playing);

        player.change_time(59_000, &chapter_path(3)).unwrap();
        engine.script().position = 60_000;
        assert!(wait_for(|| player.state() == PlayState::Stopped));

        let book = player.book().unwrap();
        assert_eq!(book.current_path, chapter_path(3));
        assert_eq!(book.time, 60_000);

        // Playing a finished book starts the last chapter over.
        player.play().unwrap();
        assert_eq!(engine.script().position, 0);
    }

    #[test]
    fn test_events_follow_transitions() {
        let (player, _engine, _store, _book) = create_test_player(quiet_settings());
        let events = player.subscribe();
        player.play().unwrap();
        player.set_playback_speed(2.0).unwrap();
        player.pause(false).unwrap();

        assert_eq!(
            events.drain(),
            vec![
                PlayerEvent::StateChanged(PlayState::Playing),
                PlayerEvent::SpeedChanged(2.0),
                PlayerEvent::StateChanged(PlayState::Paused),
            ]
        );
    }

    #[test]
    fn test_concurrent_commands_end_in_last_published_state() {
        let (player, engine, store, book) = create_test_player(quiet_settings());
        let initial = player.state();
        let events = player.subscribe();

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let player = player.clone();
                thread::spawn(move || {
                    let result = match i % 10 {
                        0 => player.play(),
                        1 => player.pause(i % 3 == 0),
                        2 => player.stop(),
                        3 => player.set_playback_speed(i as f32 / 20.0).map(|_| ()),
                        4 => player.change_time(i * 500, &chapter_path(i as usize % 3 + 1)),
                        5 => player.next(),
                        6 => player.previous(i % 4 == 0),
                        7 => player.skip(if i % 2 == 0 { Direction::Forward } else { Direction::Backward }),
                        8 => player.toggle_sleep_timer().map(|_| ()),
                        _ => player.play_pause(),
                    };
                    result.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Events are published under the lock, so the last transition seen
        // is the one the final lock holder made.
        let state = player.state();
        let last_published = events
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                PlayerEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .last()
            .unwrap_or(initial);
        assert_eq!(state, last_published);
        let snapshot = player.book().unwrap();
        snapshot.validate().unwrap();
        assert!(engine.script().misuse.is_empty());

        let script = engine.script();
        match state {
            PlayState::Playing => assert!(script.playing && script.prepared.is_some()),
            PlayState::Paused => assert!(!script.playing && script.prepared.is_some()),
            PlayState::Stopped => assert!(script.prepared.is_none()),
            PlayState::Idle => {}
        }
        drop(script);
        stored(&store, book.id).validate().unwrap();
    }
}
