//! # Book Model
//!
//! In-memory representation of the library: [`Book`]s made of [`Chapter`]s,
//! with user [`Bookmark`]s and the playback position that gets persisted.
//!
//! ## Invariants
//!
//! A valid book has at least one chapter, unique chapter paths, a non-empty name
//! and root, a current chapter that is one of its chapters, a position inside
//! that chapter, a speed inside [`SPEED_MIN`]..=[`SPEED_MAX`] and bookmarks that
//! only point at its own chapters. [`Book::validate`] checks all of them.
//!
//! ## Legacy Records
//!
//! [`BookDetail`] and [`MediaDetail`] mirror the two persisted tables row by
//! row. The store converts between them and [`Book`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ModelError;
use crate::natural::natural_cmp;

/// Slowest supported playback speed.
pub const SPEED_MIN: f32 = 0.5;
/// Fastest supported playback speed.
pub const SPEED_MAX: f32 = 3.0;
/// Identity of a book or bookmark that has not been stored yet.
pub const ID_UNKNOWN: i64 = -1;

/// Clamps a requested playback speed into the supported range.
///
/// Non-finite input falls back to normal speed.
pub fn clamp_speed(speed: f32) -> f32 {
    if !speed.is_finite() {
        return 1.0;
    }
    speed.clamp(SPEED_MIN, SPEED_MAX)
}

/// How a book was discovered on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookType {
    /// A single audio file inside a collection folder.
    CollectionFile,
    /// A sub-folder of a collection folder.
    CollectionFolder,
    /// A configured single-book folder.
    SingleFolder,
    /// A configured single audio file.
    SingleFile,
}

impl BookType {
    pub fn as_str(self) -> &'static str {
        match self {
            BookType::CollectionFile => "COLLECTION_FILE",
            BookType::CollectionFolder => "COLLECTION_FOLDER",
            BookType::SingleFolder => "SINGLE_FOLDER",
            BookType::SingleFile => "SINGLE_FILE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "COLLECTION_FILE" => Some(BookType::CollectionFile),
            "COLLECTION_FOLDER" => Some(BookType::CollectionFolder),
            "SINGLE_FOLDER" => Some(BookType::SingleFolder),
            "SINGLE_FILE" => Some(BookType::SingleFile),
            _ => None,
        }
    }

    /// Whether the book root is a folder rather than one file.
    pub fn is_folder(self) -> bool {
        matches!(self, BookType::CollectionFolder | BookType::SingleFolder)
    }
}

impl fmt::Display for BookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One playable audio file of a book. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chapter {
    path: PathBuf,
    name: String,
    duration: i64,
}

impl Chapter {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, duration: i64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            duration: duration.max(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length in milliseconds.
    pub fn duration(&self) -> i64 {
        self.duration
    }
}

/// A saved position inside one of a book's chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Store identity, [`ID_UNKNOWN`] until saved.
    pub id: i64,
    pub path: PathBuf,
    /// Offset into the chapter in milliseconds.
    pub time: i64,
    pub title: String,
}

impl Bookmark {
    pub fn new(path: impl Into<PathBuf>, time: i64, title: impl Into<String>) -> Self {
        Self {
            id: ID_UNKNOWN,
            path: path.into(),
            time: time.max(0),
            title: title.into(),
        }
    }
}

/// An audiobook with its chapters and playback state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub name: String,
    pub author: Option<String>,
    pub book_type: BookType,
    /// File or folder the book was created from.
    pub root: PathBuf,
    pub chapters: Vec<Chapter>,
    pub bookmarks: Vec<Bookmark>,
    /// Path of the chapter playback resumes in.
    pub current_path: PathBuf,
    /// Position inside the current chapter in milliseconds.
    pub time: i64,
    pub speed: f32,
    /// `false` once the book has been hidden.
    pub active: bool,
    pub cover: Option<PathBuf>,
    pub thumb: Option<PathBuf>,
}

impl Book {
    /// Creates an unsaved book positioned at the start of its first chapter.
    ///
    /// # Errors
    ///
    /// Fails if `chapters` is empty or repeats a path, or if `name` or `root`
    /// is empty.
    pub fn new(
        root: impl Into<PathBuf>,
        name: impl Into<String>,
        book_type: BookType,
        chapters: Vec<Chapter>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let current_path = chapters
            .first()
            .map(|c| c.path.clone())
            .ok_or_else(|| ModelError::NoChapters(name.clone()))?;

        let book = Self {
            id: ID_UNKNOWN,
            name,
            author: None,
            book_type,
            root: root.into(),
            chapters,
            bookmarks: Vec::new(),
            current_path,
            time: 0,
            speed: 1.0,
            active: true,
            cover: None,
            thumb: None,
        };
        book.validate()?;
        Ok(book)
    }

    /// Checks every model invariant.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyName);
        }
        if self.root.as_os_str().is_empty() {
            return Err(ModelError::EmptyRoot);
        }
        if self.chapters.is_empty() {
            return Err(ModelError::NoChapters(self.name.clone()));
        }
        for (idx, chapter) in self.chapters.iter().enumerate() {
            if self.chapters[..idx].iter().any(|c| c.path == chapter.path) {
                return Err(ModelError::DuplicateChapter(chapter.path.clone()));
            }
        }
        if !(SPEED_MIN..=SPEED_MAX).contains(&self.speed) {
            return Err(ModelError::SpeedOutOfRange(self.speed));
        }

        let current = self.chapter(&self.current_path)?;
        if self.time < 0 || self.time > current.duration {
            return Err(ModelError::PositionOutOfRange {
                path: self.current_path.clone(),
                time: self.time,
                duration: current.duration,
            });
        }

        for bookmark in &self.bookmarks {
            self.chapter_index(&bookmark.path)?;
        }
        Ok(())
    }

    /// Looks up a chapter by path.
    pub fn chapter(&self, path: &Path) -> Result<&Chapter, ModelError> {
        self.chapter_index(path).map(|idx| &self.chapters[idx])
    }

    /// Position of the chapter with `path` in the chapter list.
    pub fn chapter_index(&self, path: &Path) -> Result<usize, ModelError> {
        self.chapters
            .iter()
            .position(|c| c.path == path)
            .ok_or_else(|| ModelError::UnknownChapter {
                book: self.name.clone(),
                path: path.to_path_buf(),
            })
    }

    pub fn current_index(&self) -> Option<usize> {
        self.chapter_index(&self.current_path).ok()
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.current_index().map(|idx| &self.chapters[idx])
    }

    pub fn next_chapter(&self) -> Option<&Chapter> {
        self.current_index().and_then(|idx| self.chapters.get(idx + 1))
    }

    pub fn previous_chapter(&self) -> Option<&Chapter> {
        self.current_index()
            .and_then(|idx| idx.checked_sub(1))
            .and_then(|idx| self.chapters.get(idx))
    }

    /// Moves the resume point, clamping `time` into the chapter.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownChapter`] if `path` is not one of the chapters.
    pub fn set_position(&mut self, time: i64, path: &Path) -> Result<(), ModelError> {
        let duration = self.chapter(path)?.duration;
        self.current_path = path.to_path_buf();
        self.time = time.clamp(0, duration);
        Ok(())
    }

    /// Stores `speed` after clamping it and returns the value actually kept.
    pub fn set_speed(&mut self, speed: f32) -> f32 {
        self.speed = clamp_speed(speed);
        self.speed
    }

    /// Sum of all chapter durations in milliseconds.
    pub fn global_duration(&self) -> i64 {
        self.chapters.iter().map(Chapter::duration).sum()
    }

    /// Milliseconds elapsed since the start of the first chapter.
    pub fn global_position(&self) -> i64 {
        let before: i64 = match self.current_index() {
            Some(idx) => self.chapters[..idx].iter().map(Chapter::duration).sum(),
            None => 0,
        };
        before + self.time
    }

    /// Orders two bookmarks by chapter, then time, then title.
    ///
    /// # Errors
    ///
    /// [`ModelError::UnknownChapter`] if either bookmark points outside the book.
    pub fn compare_bookmarks(&self, a: &Bookmark, b: &Bookmark) -> Result<Ordering, ModelError> {
        let a_idx = self.chapter_index(&a.path)?;
        let b_idx = self.chapter_index(&b.path)?;
        Ok(a_idx
            .cmp(&b_idx)
            .then(a.time.cmp(&b.time))
            .then_with(|| a.title.cmp(&b.title)))
    }

    /// Bookmarks in [`Book::compare_bookmarks`] order.
    pub fn sorted_bookmarks(&self) -> Result<Vec<Bookmark>, ModelError> {
        let mut keyed = self
            .bookmarks
            .iter()
            .map(|b| self.chapter_index(&b.path).map(|idx| (idx, b.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        keyed.sort_by(|(ai, a), (bi, b)| {
            ai.cmp(bi)
                .then(a.time.cmp(&b.time))
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(keyed.into_iter().map(|(_, b)| b).collect())
    }

    /// Books sort by the natural order of their names.
    pub fn compare_by_name(&self, other: &Book) -> Ordering {
        natural_cmp(&self.name, &other.name)
    }
}

/// Row image of `bookTable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDetail {
    pub id: i64,
    pub name: String,
    pub cover: Option<String>,
    pub thumb: Option<String>,
    /// Ordered ids of the media rows that make up the book.
    pub media_ids: Vec<i64>,
    /// Id of the media row playback resumes in.
    pub position: i64,
}

impl BookDetail {
    const DELIMITER: char = ',';

    /// Media ids encoded for the `bookMediaContaining` column.
    pub fn media_ids_as_string(&self) -> String {
        self.media_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(&Self::DELIMITER.to_string())
    }

    /// Decodes a `bookMediaContaining` value, skipping malformed entries.
    pub fn parse_media_ids(encoded: &str) -> Vec<i64> {
        encoded
            .split(Self::DELIMITER)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(|part| match part.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    log::warn!("Ignoring malformed media id `{part}`");
                    None
                }
            })
            .collect()
    }
}

/// Row image of `mediaTable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDetail {
    pub id: i64,
    pub path: PathBuf,
    pub name: String,
    /// Resume time in milliseconds.
    pub position: i64,
    pub duration: i64,
}
