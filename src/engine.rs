//! # Audio Engine Contracts
//!
//! The playback controller drives audio through [`AudioEngine`]; sample level
//! tempo and volume processing sits behind [`SampleProcessor`]. Both are narrow
//! seams so a platform player or a native DSP library can be plugged in.
//!
//! ## Provided Implementations
//!
//! - [`ClockEngine`]: a headless engine whose playhead follows the wall clock
//!   scaled by the playback speed. Used by the CLI session and in tests.
//! - [`LinearResampler`]: a small tempo changer using linear interpolation.

use log::{debug, trace};
use std::path::PathBuf;
use std::time::Instant;

use crate::error::EngineError;
use crate::model::{clamp_speed, Chapter};

/// Plays one chapter at a time.
///
/// The controller only calls `start`, `pause`, `seek_to` and `set_speed`
/// after a successful `prepare`, and calls `release` before preparing a
/// chapter again after a stop.
pub trait AudioEngine: Send {
    /// Loads `chapter` paused at position 0.
    fn prepare(&mut self, chapter: &Chapter) -> Result<(), EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    /// Moves the playhead to `ms`, clamped into the chapter.
    fn seek_to(&mut self, ms: i64) -> Result<(), EngineError>;

    /// Current playhead in milliseconds, 0 when nothing is prepared.
    fn position(&self) -> i64;

    /// Length of the prepared chapter in milliseconds.
    fn duration(&self) -> i64;

    fn set_speed(&mut self, speed: f32) -> Result<(), EngineError>;

    fn is_playing(&self) -> bool;

    /// Whether the playhead reached the end of the prepared chapter.
    fn is_completed(&self) -> bool;

    /// Unloads the chapter. Safe to call repeatedly.
    fn release(&mut self);
}

#[derive(Debug)]
struct Loaded {
    path: PathBuf,
    duration: i64,
    /// Playhead at the moment `started` was taken.
    offset: i64,
    started: Option<Instant>,
}

impl Loaded {
    fn position(&self, speed: f32) -> i64 {
        let advanced = self
            .started
            .map(|at| (at.elapsed().as_millis() as f64 * f64::from(speed)) as i64)
            .unwrap_or(0);
        (self.offset + advanced).min(self.duration)
    }
}

/// Headless engine driven by the wall clock.
#[derive(Debug)]
pub struct ClockEngine {
    loaded: Option<Loaded>,
    speed: f32,
}

impl Default for ClockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockEngine {
    pub fn new() -> Self {
        Self {
            loaded: None,
            speed: 1.0,
        }
    }

    fn loaded_mut(&mut self) -> Result<&mut Loaded, EngineError> {
        self.loaded.as_mut().ok_or(EngineError::NotPrepared)
    }
}

impl AudioEngine for ClockEngine {
    fn prepare(&mut self, chapter: &Chapter) -> Result<(), EngineError> {
        debug!("Preparing {}", chapter.path().display());
        self.loaded = Some(Loaded {
            path: chapter.path().to_path_buf(),
            duration: chapter.duration(),
            offset: 0,
            started: None,
        });
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let loaded = self.loaded_mut()?;
        if loaded.started.is_none() {
            loaded.started = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        let speed = self.speed;
        let loaded = self.loaded_mut()?;
        loaded.offset = loaded.position(speed);
        loaded.started = None;
        Ok(())
    }

    fn seek_to(&mut self, ms: i64) -> Result<(), EngineError> {
        let loaded = self.loaded_mut()?;
        loaded.offset = ms.clamp(0, loaded.duration);
        if loaded.started.is_some() {
            loaded.started = Some(Instant::now());
        }
        trace!("Seeked {} to {}ms", loaded.path.display(), loaded.offset);
        Ok(())
    }

    fn position(&self) -> i64 {
        self.loaded
            .as_ref()
            .map(|l| l.position(self.speed))
            .unwrap_or(0)
    }

    fn duration(&self) -> i64 {
        self.loaded.as_ref().map(|l| l.duration).unwrap_or(0)
    }

    fn set_speed(&mut self, speed: f32) -> Result<(), EngineError> {
        let old = self.speed;
        if let Some(loaded) = self.loaded.as_mut() {
            // Bank the time played at the old speed before switching.
            if loaded.started.is_some() {
                loaded.offset = loaded.position(old);
                loaded.started = Some(Instant::now());
            }
        }
        self.speed = clamp_speed(speed);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.loaded.as_ref().is_some_and(|l| l.started.is_some())
    }

    fn is_completed(&self) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|l| l.position(self.speed) >= l.duration)
    }

    fn release(&mut self) {
        if let Some(loaded) = self.loaded.take() {
            debug!("Released {}", loaded.path.display());
        }
    }
}

/// Streaming tempo and volume processor over interleaved 16-bit samples.
///
/// Mirrors the usual native DSP life cycle: construct with sample rate and
/// channel count, feed with `put_samples`, drain with `receive_samples`,
/// `flush` at end of stream. Dropping the processor closes it.
pub trait SampleProcessor: Send {
    /// Queues input. Returns `false` if the input was rejected.
    fn put_samples(&mut self, samples: &[i16]) -> bool;

    /// Moves processed samples into `out` and returns how many were written.
    fn receive_samples(&mut self, out: &mut [i16]) -> usize;

    /// Processes whatever input is still buffered.
    fn flush(&mut self);

    /// Processed samples waiting to be received.
    fn samples_available(&self) -> usize;

    fn sample_rate(&self) -> u32;
    fn set_sample_rate(&mut self, sample_rate: u32);
    fn channels(&self) -> u16;
    fn set_channels(&mut self, channels: u16);
    fn pitch(&self) -> f32;
    fn set_pitch(&mut self, pitch: f32);
    fn speed(&self) -> f32;
    fn set_speed(&mut self, speed: f32);
    fn rate(&self) -> f32;
    fn set_rate(&mut self, rate: f32);
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn chord_pitch(&self) -> bool;
    fn set_chord_pitch(&mut self, enabled: bool);
}

/// Changes tempo by resampling with linear interpolation.
///
/// Speed and rate both scale the tempo and shift pitch along with it. The
/// pitch and chord pitch settings are stored for callers but not applied.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    sample_rate: u32,
    channels: u16,
    pitch: f32,
    speed: f32,
    rate: f32,
    volume: f32,
    chord_pitch: bool,
    input: Vec<i16>,
    output: Vec<i16>,
    /// Fractional read position in frames inside `input`.
    cursor: f64,
}

impl LinearResampler {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            pitch: 1.0,
            speed: 1.0,
            rate: 1.0,
            volume: 1.0,
            chord_pitch: false,
            input: Vec::new(),
            output: Vec::new(),
            cursor: 0.0,
        }
    }

    fn step(&self) -> f64 {
        f64::from(self.speed * self.rate).max(0.01)
    }

    fn scale(&self, sample: f64) -> i16 {
        (sample * f64::from(self.volume)).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }

    fn process(&mut self, drain_all: bool) {
        let channels = usize::from(self.channels);
        let frames = self.input.len() / channels;
        let step = self.step();

        while frames > 0 {
            let idx = self.cursor.floor() as usize;
            let has_next = idx + 1 < frames;
            if !has_next && !(drain_all && idx < frames) {
                break;
            }
            let frac = self.cursor - idx as f64;
            for ch in 0..channels {
                let a = f64::from(self.input[idx * channels + ch]);
                let b = if has_next {
                    f64::from(self.input[(idx + 1) * channels + ch])
                } else {
                    a
                };
                let sample = self.scale(a + (b - a) * frac);
                self.output.push(sample);
            }
            self.cursor += step;
        }

        let consumed = (self.cursor.floor() as usize).min(frames);
        self.input.drain(..consumed * channels);
        self.cursor -= consumed as f64;
        if drain_all {
            self.input.clear();
            self.cursor = 0.0;
        }
    }
}

impl SampleProcessor for LinearResampler {
    fn put_samples(&mut self, samples: &[i16]) -> bool {
        if samples.len() % usize::from(self.channels) != 0 {
            return false;
        }
        self.input.extend_from_slice(samples);
        self.process(false);
        true
    }

    fn receive_samples(&mut self, out: &mut [i16]) -> usize {
        let count = out.len().min(self.output.len());
        out[..count].copy_from_slice(&self.output[..count]);
        self.output.drain(..count);
        count
    }

    fn flush(&mut self) {
        self.process(true);
    }

    fn samples_available(&self) -> usize {
        self.output.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn set_channels(&mut self, channels: u16) {
        let channels = channels.max(1);
        if channels != self.channels {
            // Buffered frames cannot be reinterpreted with a new layout.
            self.flush();
            self.channels = channels;
        }
    }

    fn pitch(&self) -> f32 {
        self.pitch
    }

    fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    fn rate(&self) -> f32 {
        self.rate
    }

    fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn chord_pitch(&self) -> bool {
        self.chord_pitch
    }

    fn set_chord_pitch(&mut self, enabled: bool) {
        self.chord_pitch = enabled;
    }
}
