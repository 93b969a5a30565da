//! Audiobook player core: a persistent book catalog, a thread-safe playback
//! controller and media-button command dispatch.
//!
//! Core modules:
//! - [`db`] - Book, chapter and bookmark persistence
//! - [`model`] - Books, chapters and bookmarks with their invariants
//! - [`playback`] - Playback state machine
//! - [`dispatch`] - Media keys and action intents
//! - [`natural`] - Natural-order string comparison
//!
//! ### Supporting Modules
//!
//! - [`engine`] - Audio engine and sample processor seams
//! - [`notifier`] - Player event publish/subscribe
//! - [`scanner`] - Library folder scanning
//! - [`service`] - Interactive playback session
//! - [`config`] - Data directory and settings
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//! - [`error`] - Typed errors
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use voice::db::BookStore;
//! use voice::engine::ClockEngine;
//! use voice::model::{Book, BookType, Chapter};
//! use voice::playback::{PlaybackSettings, PlayerController};
//!
//! let store = Arc::new(BookStore::open_in_memory()?);
//! let chapters = vec![
//!     Chapter::new("/books/dune/01.mp3", "01", 600_000),
//!     Chapter::new("/books/dune/02.mp3", "02", 540_000),
//! ];
//! let book = store.add_book(Book::new("/books/dune", "Dune", BookType::SingleFolder, chapters)?)?;
//!
//! let player = PlayerController::new(
//!     Box::new(ClockEngine::new()),
//!     Arc::clone(&store),
//!     PlaybackSettings::default(),
//! );
//! player.init(book)?;
//! player.play()?;
//! player.set_playback_speed(1.5)?;
//! player.pause(true)?;
//! store.flush()?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Storage, scanning and configuration return `anyhow::Result` with context.
//! Model, engine and controller failures are typed ([`error`]) so callers can
//! tell a missing book from a broken invariant.
//!
//! ## Threads
//!
//! - the store writer, running background writes in submission order
//! - the position updater, alive while a book is playing
//! - the dispatcher pool
//! - scanner threads measuring chapters in parallel

pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod model;
pub mod natural;
pub mod notifier;
pub mod playback;
pub mod scanner;
pub mod service;
