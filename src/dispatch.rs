//! # Command Dispatch
//!
//! Turns media-button key codes and action intents into [`PlayerCommand`]s and
//! runs them against a [`PlayerController`] on a dedicated worker pool.
//!
//! ## Key Codes
//!
//! | Code | Key            | Command               |
//! |------|----------------|-----------------------|
//! | 79   | HEADSETHOOK    | play/pause            |
//! | 85   | PLAY_PAUSE     | play/pause            |
//! | 126  | PLAY           | play/pause            |
//! | 127  | PAUSE          | play/pause            |
//! | 86   | STOP           | stop                  |
//! | 87   | NEXT           | skip forward          |
//! | 90   | FAST_FORWARD   | skip forward          |
//! | 88   | PREVIOUS       | skip backward         |
//! | 89   | REWIND         | skip backward         |
//!
//! ## Intents
//!
//! An intent is an action id plus typed extras, and reads from JSON as
//! `{"action": "voice.action.CHANGE_TIME", "extras": {"time": 5000, "path": "/a.mp3"}}`.
//!
//! Unknown or malformed signals are logged and dropped. Commands arriving
//! before a book is bound do nothing. Controller errors are logged, never
//! returned to the sender.

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, TryRecvError};
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::error::PlaybackError;
use crate::playback::{Direction, PlayerController};

pub const ACTION_SET_PLAYBACK_SPEED: &str = "voice.action.SET_PLAYBACK_SPEED";
pub const ACTION_CHANGE_TIME: &str = "voice.action.CHANGE_TIME";
pub const ACTION_TOGGLE_SLEEP_TIMER: &str = "voice.action.TOGGLE_SLEEP_TIMER";
pub const ACTION_NEXT: &str = "voice.action.NEXT";
pub const ACTION_PREVIOUS: &str = "voice.action.PREVIOUS";
pub const ACTION_FAST_FORWARD: &str = "voice.action.FAST_FORWARD";
pub const ACTION_REWIND: &str = "voice.action.REWIND";
pub const ACTION_PLAY_PAUSE: &str = "voice.action.PLAY_PAUSE";
pub const ACTION_STOP: &str = "voice.action.STOP";

pub const EXTRA_SPEED: &str = "speed";
pub const EXTRA_TIME: &str = "time";
pub const EXTRA_PATH: &str = "path";

/// Media buttons the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKey {
    HeadsetHook,
    PlayPause,
    Stop,
    Next,
    Previous,
    Rewind,
    FastForward,
    Play,
    Pause,
}

impl MediaKey {
    pub const ALL: [MediaKey; 9] = [
        MediaKey::HeadsetHook,
        MediaKey::PlayPause,
        MediaKey::Stop,
        MediaKey::Next,
        MediaKey::Previous,
        MediaKey::Rewind,
        MediaKey::FastForward,
        MediaKey::Play,
        MediaKey::Pause,
    ];

    pub fn from_key_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.key_code() == code)
    }

    pub fn key_code(self) -> i32 {
        match self {
            MediaKey::HeadsetHook => 79,
            MediaKey::PlayPause => 85,
            MediaKey::Stop => 86,
            MediaKey::Next => 87,
            MediaKey::Previous => 88,
            MediaKey::Rewind => 89,
            MediaKey::FastForward => 90,
            MediaKey::Play => 126,
            MediaKey::Pause => 127,
        }
    }

    pub fn command(self) -> PlayerCommand {
        match self {
            MediaKey::HeadsetHook | MediaKey::PlayPause | MediaKey::Play | MediaKey::Pause => {
                PlayerCommand::PlayPause
            }
            MediaKey::Stop => PlayerCommand::Stop,
            MediaKey::Next | MediaKey::FastForward => PlayerCommand::Skip(Direction::Forward),
            MediaKey::Previous | MediaKey::Rewind => PlayerCommand::Skip(Direction::Backward),
        }
    }
}

/// One controller operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Play,
    Pause { rewind: bool },
    PlayPause,
    Stop,
    Next,
    Previous { to_start: bool },
    Skip(Direction),
    SetSpeed(f32),
    ChangeTime { time: i64, path: PathBuf },
    ToggleSleepTimer,
}

/// An action id with its extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub action: String,
    #[serde(default)]
    pub extras: Map<String, Value>,
}

impl Intent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            extras: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extras.insert(key.to_string(), value.into());
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).with_context(|| format!("Failed to parse intent: {text}"))
    }

    /// The command this intent asks for, `None` for unknown actions or
    /// missing extras.
    pub fn command(&self) -> Option<PlayerCommand> {
        let command = match self.action.as_str() {
            ACTION_SET_PLAYBACK_SPEED => {
                let speed = self.extras.get(EXTRA_SPEED)?.as_f64()?;
                PlayerCommand::SetSpeed(speed as f32)
            }
            ACTION_CHANGE_TIME => {
                let time = self.extras.get(EXTRA_TIME)?.as_i64()?;
                let path = self.extras.get(EXTRA_PATH)?.as_str()?;
                PlayerCommand::ChangeTime {
                    time,
                    path: PathBuf::from(path),
                }
            }
            ACTION_TOGGLE_SLEEP_TIMER => PlayerCommand::ToggleSleepTimer,
            ACTION_NEXT => PlayerCommand::Next,
            ACTION_PREVIOUS => PlayerCommand::Previous { to_start: true },
            ACTION_FAST_FORWARD => PlayerCommand::Skip(Direction::Forward),
            ACTION_REWIND => PlayerCommand::Skip(Direction::Backward),
            ACTION_PLAY_PAUSE => PlayerCommand::PlayPause,
            ACTION_STOP => PlayerCommand::Stop,
            _ => return None,
        };
        Some(command)
    }
}

/// Anything that can reach the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Key(i32),
    Intent(Intent),
    Command(PlayerCommand),
}

impl Signal {
    pub fn command(&self) -> Option<PlayerCommand> {
        match self {
            Signal::Key(code) => MediaKey::from_key_code(*code).map(MediaKey::command),
            Signal::Intent(intent) => intent.command(),
            Signal::Command(command) => Some(command.clone()),
        }
    }
}

/// Runs `command` on `controller`.
pub fn execute(controller: &PlayerController, command: &PlayerCommand) -> Result<(), PlaybackError> {
    match command {
        PlayerCommand::Play => controller.play(),
        PlayerCommand::Pause { rewind } => controller.pause(*rewind),
        PlayerCommand::PlayPause => controller.play_pause(),
        PlayerCommand::Stop => controller.stop(),
        PlayerCommand::Next => controller.next(),
        PlayerCommand::Previous { to_start } => controller.previous(*to_start),
        PlayerCommand::Skip(direction) => controller.skip(*direction),
        PlayerCommand::SetSpeed(speed) => controller.set_playback_speed(*speed).map(|_| ()),
        PlayerCommand::ChangeTime { time, path } => controller.change_time(*time, path),
        PlayerCommand::ToggleSleepTimer => controller.toggle_sleep_timer().map(|_| ()),
    }
}

fn run(controller: &PlayerController, signal: &Signal) {
    let Some(command) = signal.command() else {
        warn!("Ignoring unrecognised signal {signal:?}");
        return;
    };
    trace!("Executing {command:?}");
    match execute(controller, &command) {
        Ok(()) => {}
        Err(PlaybackError::NoBook) => debug!("Ignoring {command:?}, no book is bound"),
        Err(e) => error!("{command:?} failed: {e}"),
    }
}

/// Completion handle of a submitted signal.
#[derive(Debug)]
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket {
    receiver: Receiver<()>,
}

impl Ticket {
    /// Blocks until the signal ran. Returns `false` if the worker went away
    /// first.
    pub fn wait(self) -> bool {
        self.receiver.recv().is_ok()
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.receiver.try_recv(), Err(TryRecvError::Empty))
    }
}

/// Executes signals on its own thread pool.
pub struct CommandDispatcher {
    controller: PlayerController,
    pool: rayon::ThreadPool,
}

impl CommandDispatcher {
    pub fn new(controller: PlayerController, workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|idx| format!("voice-dispatch-{idx}"))
            .build()
            .context("Failed to start dispatcher workers")?;
        info!("Dispatcher started with {} worker(s)", pool.current_num_threads());
        Ok(Self { controller, pool })
    }

    pub fn controller(&self) -> &PlayerController {
        &self.controller
    }

    /// Queues `signal` and returns immediately.
    pub fn submit(&self, signal: Signal) -> Ticket {
        let (done, receiver) = channel::bounded(1);
        let controller = self.controller.clone();
        self.pool.spawn(move || {
            run(&controller, &signal);
            let _ = done.send(());
        });
        Ticket { receiver }
    }

    pub fn handle_key(&self, code: i32) -> Ticket {
        self.submit(Signal::Key(code))
    }

    pub fn handle_intent(&self, intent: Intent) -> Ticket {
        self.submit(Signal::Intent(intent))
    }

    /// Dispatches everything received on `signals` until every sender is
    /// gone, then waits for the outstanding work. Returns the number of
    /// signals dispatched.
    pub fn listen(&self, signals: Receiver<Signal>) -> usize {
        let mut outstanding: Vec<Ticket> = Vec::new();
        let mut count = 0;
        for signal in signals.iter() {
            outstanding.retain(|ticket| !ticket.is_done());
            outstanding.push(self.submit(signal));
            count += 1;
        }
        for ticket in outstanding {
            ticket.wait();
        }
        debug!("Signal channel closed after {count} signal(s)");
        count
    }
}
