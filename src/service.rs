//! # Playback Service
//!
//! Interactive session around one [`PlayerController`]. Lines read from the
//! input become [`Signal`]s for a [`CommandDispatcher`], and player events are
//! printed as they happen.
//!
//! ## Threads
//!
//! - the input reader, parsing lines and sending signals over a channel
//! - the dispatcher loop on the calling thread, handing signals to its pool
//! - the event printer, subscribed to the controller
//!
//! ## Commands
//!
//! ```text
//! play | pause | toggle | stop | next | prev | ff | rw | sleep
//! speed <x>            seek <ms> [path]      key <code>
//! {"action": ...}      status                quit
//! ```
//!
//! On exit the player is stopped and every pending write is flushed.

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::{self, Sender};
use log::{debug, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::db::BookStore;
use crate::dispatch::{CommandDispatcher, Intent, PlayerCommand, Signal};
use crate::engine::{AudioEngine, ClockEngine};
use crate::model::Book;
use crate::notifier::PlayerEvent;
use crate::playback::{Direction, PlayState, PlaybackSettings, PlayerController};

const DISPATCH_WORKERS: usize = 2;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum InputLine {
    Signal(Signal),
    /// Seek inside the given chapter, or the current one.
    Seek { time: i64, path: Option<PathBuf> },
    Status,
    Quit,
}

/// Parses one line of user input. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<InputLine>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with('{') {
        return Ok(Some(InputLine::Signal(Signal::Intent(Intent::from_json(line)?))));
    }

    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let mut argument = |what: &str| words.next().ok_or_else(|| anyhow!("`{verb}` needs {what}"));

    let command = match verb.as_str() {
        "play" => PlayerCommand::Play,
        "pause" => PlayerCommand::Pause { rewind: true },
        "toggle" => PlayerCommand::PlayPause,
        "stop" => PlayerCommand::Stop,
        "next" => PlayerCommand::Next,
        "prev" | "previous" => PlayerCommand::Previous { to_start: true },
        "ff" => PlayerCommand::Skip(Direction::Forward),
        "rw" => PlayerCommand::Skip(Direction::Backward),
        "sleep" => PlayerCommand::ToggleSleepTimer,
        "speed" => {
            let raw = argument("a speed")?;
            let speed: f32 = raw.parse().with_context(|| format!("Invalid speed `{raw}`"))?;
            PlayerCommand::SetSpeed(speed)
        }
        "seek" => {
            let raw = argument("a time in milliseconds")?;
            let time: i64 = raw.parse().with_context(|| format!("Invalid time `{raw}`"))?;
            let rest: Vec<&str> = words.collect();
            let path = (!rest.is_empty()).then(|| PathBuf::from(rest.join(" ")));
            return Ok(Some(InputLine::Seek { time, path }));
        }
        "key" => {
            let raw = argument("a key code")?;
            let code: i32 = raw.parse().with_context(|| format!("Invalid key code `{raw}`"))?;
            return Ok(Some(InputLine::Signal(Signal::Key(code))));
        }
        "status" => return Ok(Some(InputLine::Status)),
        "quit" | "exit" => return Ok(Some(InputLine::Quit)),
        other => bail!("Unknown command `{other}`"),
    };
    Ok(Some(InputLine::Signal(Signal::Command(command))))
}

/// Formats milliseconds as `m:ss`, or `h:mm:ss` past an hour.
pub fn format_millis(ms: i64) -> String {
    let total = ms.max(0) / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// One-line summary of what the player is doing.
pub fn status_line(controller: &PlayerController) -> String {
    let state = controller.state();
    let Some(book) = controller.book() else {
        return format!("{state}, no book");
    };

    let index = book.current_index().map(|i| i + 1).unwrap_or(0);
    let (chapter, duration) = book
        .current_chapter()
        .map(|c| (c.name().to_string(), c.duration()))
        .unwrap_or_default();
    let mut line = format!(
        "{state}  {}  [{index}/{}] {chapter}  {} / {}  {:.2}x",
        book.name,
        book.chapters.len(),
        format_millis(book.time),
        format_millis(duration),
        book.speed,
    );
    if let Some(remaining) = controller.sleep_timer_remaining() {
        let ms = i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX);
        line.push_str(&format!("  sleep {}", format_millis(ms)));
    }
    line
}

fn describe(event: &PlayerEvent) -> Option<String> {
    match event {
        PlayerEvent::StateChanged(PlayState::Playing) => Some("♫ playing".into()),
        PlayerEvent::StateChanged(state) => Some(format!("■ {state}")),
        PlayerEvent::BookChanged { book_id } => Some(format!("book #{book_id}")),
        PlayerEvent::SpeedChanged(speed) => Some(format!("speed {speed:.2}x")),
        PlayerEvent::SleepTimerChanged(None) => Some("sleep timer off".into()),
        // Countdown and position ticks would flood the terminal.
        PlayerEvent::SleepTimerChanged(Some(_)) | PlayerEvent::PositionChanged { .. } => None,
    }
}

/// Interactive player session for one book.
pub struct PlaybackService {
    store: Arc<BookStore>,
    dispatcher: CommandDispatcher,
}

impl PlaybackService {
    /// Session playing `book` on a [`ClockEngine`].
    pub fn new(store: Arc<BookStore>, book: Book, settings: PlaybackSettings) -> Result<Self> {
        Self::with_engine(store, Box::new(ClockEngine::new()), book, settings)
    }

    pub fn with_engine(
        store: Arc<BookStore>,
        engine: Box<dyn AudioEngine>,
        book: Book,
        settings: PlaybackSettings,
    ) -> Result<Self> {
        let controller = PlayerController::new(engine, Arc::clone(&store), settings);
        controller
            .init(book)
            .context("Failed to load the book into the player")?;
        let dispatcher = CommandDispatcher::new(controller, DISPATCH_WORKERS)?;
        Ok(Self { store, dispatcher })
    }

    pub fn controller(&self) -> &PlayerController {
        self.dispatcher.controller()
    }

    /// Runs until `input` ends or a `quit` line arrives.
    pub fn run<R>(self, input: R) -> Result<()>
    where
        R: BufRead + Send + 'static,
    {
        let controller = self.controller().clone();
        info!("Playback service started");
        println!("{}", status_line(&controller));

        let events = controller.subscribe();
        let subscription = events.id();
        let printer = thread::Builder::new()
            .name("voice-events".into())
            .spawn(move || {
                for event in events.receiver().iter() {
                    if let Some(text) = describe(&event) {
                        println!("{text}");
                    }
                }
            })
            .context("Failed to spawn event printer")?;

        let (signals, received) = channel::unbounded();
        let reader_controller = controller.clone();
        let reader = thread::Builder::new()
            .name("voice-input".into())
            .spawn(move || read_input(input, &reader_controller, &signals))
            .context("Failed to spawn input reader")?;

        let dispatched = self.dispatcher.listen(received);
        debug!("Dispatched {dispatched} signal(s)");
        if reader.join().is_err() {
            warn!("Input reader panicked");
        }

        controller.stop()?;
        self.store.flush()?;
        controller.notifier().unsubscribe(subscription);
        if printer.join().is_err() {
            warn!("Event printer panicked");
        }
        info!("Playback service stopped");
        Ok(())
    }
}

fn read_input<R: BufRead>(input: R, controller: &PlayerController, signals: &Sender<Signal>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read input: {e}");
                break;
            }
        };

        let signal = match parse_line(&line) {
            Ok(None) => continue,
            Ok(Some(InputLine::Quit)) => break,
            Ok(Some(InputLine::Status)) => {
                println!("{}", status_line(controller));
                continue;
            }
            Ok(Some(InputLine::Seek { time, path })) => {
                let path = path.or_else(|| controller.book().map(|b| b.current_path));
                match path {
                    Some(path) => Signal::Command(PlayerCommand::ChangeTime { time, path }),
                    None => {
                        eprintln!("Nothing to seek in");
                        continue;
                    }
                }
            }
            Ok(Some(InputLine::Signal(signal))) => signal,
            Err(e) => {
                eprintln!("{e:#}");
                continue;
            }
        };

        if signals.send(signal).is_err() {
            break;
        }
    }
}
