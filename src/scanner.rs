//! # Library Scanner
//!
//! Walks the configured library folders and keeps the [`BookStore`] in sync
//! with what is on disk.
//!
//! ## Roots
//!
//! - **Single-book entries**: each configured path is one book. A file
//!   becomes a `SINGLE_FILE` book, a folder a `SINGLE_FOLDER` book.
//! - **Collection folders**: every child of the folder is one book, either
//!   `COLLECTION_FILE` or `COLLECTION_FOLDER`.
//!
//! ## Sync Rules
//!
//! - New entries with audio become new books.
//! - Hidden books whose entry is back are revealed.
//! - Books whose files changed get the new chapter list, keeping the resume
//!   point when its chapter still exists.
//! - Active books whose entry vanished, lost all audio or is no longer
//!   configured are hidden.
//!
//! Chapter durations are measured in parallel with a [`MediaAnalyzer`].

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use walkdir::WalkDir;

use crate::db::BookStore;
use crate::model::{Book, BookType, Chapter};
use crate::natural::natural_path_cmp;

/// Extensions recognised as audio, compared case-insensitively.
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "m4b", "mp4", "aac", "flac", "ogg", "oga", "opus", "wav", "mka",
];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|known| known.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

pub fn is_audio_file(path: &Path) -> bool {
    path.is_file() && has_extension(path, AUDIO_EXTENSIONS)
}

/// Measures chapter files.
pub trait MediaAnalyzer: Send + Sync {
    /// Playing time of the file at `path` in milliseconds.
    fn duration(&self, path: &Path) -> Result<i64>;
}

/// Reads durations from container headers, decoding packet timestamps when
/// the header does not carry a frame count.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaAnalyzer;

impl MediaAnalyzer for SymphoniaAnalyzer {
    fn duration(&self, path: &Path) -> Result<i64> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .with_context(|| format!("Failed to probe {}", path.display()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow!("No audio track in {}", path.display()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let frames = match params.n_frames {
            Some(frames) => frames,
            None => {
                let mut total = 0u64;
                loop {
                    match format.next_packet() {
                        Ok(packet) if packet.track_id() == track_id => total += packet.dur,
                        Ok(_) => {}
                        Err(SymphoniaError::IoError(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                        Err(e) => {
                            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
                        }
                    }
                }
                total
            }
        };

        let millis = if let Some(time_base) = params.time_base {
            let time = time_base.calc_time(frames);
            time.seconds as f64 * 1000.0 + time.frac * 1000.0
        } else if let Some(rate) = params.sample_rate {
            frames as f64 * 1000.0 / f64::from(rate)
        } else {
            bail!("Cannot tell the duration of {}", path.display());
        };

        let millis = millis.round() as i64;
        if millis <= 0 {
            bail!("{} contains no audio", path.display());
        }
        Ok(millis)
    }
}

/// Library folders to scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRoots {
    pub single: Vec<PathBuf>,
    pub collection: Vec<PathBuf>,
}

impl ScanRoots {
    /// Every book entry with the type it would get, in natural order.
    fn entries(&self) -> Vec<(PathBuf, BookType)> {
        let mut entries = Vec::new();

        let mut single = self.single.clone();
        single.sort_by(|a, b| natural_path_cmp(a, b));
        for path in single {
            if is_audio_file(&path) {
                entries.push((path, BookType::SingleFile));
            } else if path.is_dir() {
                entries.push((path, BookType::SingleFolder));
            } else {
                debug!("Skipping missing single-book entry {}", path.display());
            }
        }

        for folder in &self.collection {
            let children = match fs::read_dir(folder) {
                Ok(children) => children,
                Err(e) => {
                    warn!("Cannot read collection folder {}: {e}", folder.display());
                    continue;
                }
            };
            let mut children: Vec<PathBuf> = children.filter_map(|c| c.ok()).map(|c| c.path()).collect();
            children.sort_by(|a, b| natural_path_cmp(a, b));
            for path in children {
                if is_audio_file(&path) {
                    entries.push((path, BookType::CollectionFile));
                } else if path.is_dir() {
                    entries.push((path, BookType::CollectionFolder));
                }
            }
        }
        entries
    }
}

/// What a scan changed, by book id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub added: Vec<i64>,
    pub updated: Vec<i64>,
    pub revealed: Vec<i64>,
    pub hidden: Vec<i64>,
    /// Audio files that could not be analysed.
    pub skipped: usize,
}

/// Audio files under `entry`, ordered naturally.
fn audio_files(entry: &Path) -> Vec<PathBuf> {
    if entry.is_file() {
        return vec![entry.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(entry)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Error accessing entry: {err}");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), AUDIO_EXTENSIONS))
        .map(|e| e.into_path())
        .collect();
    files.sort_by(|a, b| natural_path_cmp(a, b));
    files
}

fn first_image(folder: &Path) -> Option<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), IMAGE_EXTENSIONS))
        .map(|e| e.into_path())
        .collect();
    images.sort_by(|a, b| natural_path_cmp(a, b));
    images.into_iter().next()
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Whether `book` is the book created from `entry`.
fn matches_entry(book: &Book, entry: &Path, book_type: BookType) -> bool {
    if book.book_type != book_type {
        return false;
    }
    if book_type.is_folder() {
        book.root == entry
    } else {
        book.chapters.first().map(|c| c.path() == entry).unwrap_or(false)
    }
}

/// Swaps in `chapters`, fixing the resume point. Returns `false` if nothing
/// changed.
fn replace_chapters(book: &mut Book, chapters: Vec<Chapter>) -> bool {
    if book.chapters == chapters {
        return false;
    }

    match chapters.iter().find(|c| c.path() == book.current_path) {
        Some(current) if current.duration() < book.time => book.time = 0,
        Some(_) => {}
        None => {
            if let Some(first) = chapters.first() {
                book.current_path = first.path().to_path_buf();
            }
            book.time = 0;
        }
    }
    book.bookmarks.retain(|b| chapters.iter().any(|c| c.path() == b.path));
    book.chapters = chapters;
    true
}

/// Synchronises a [`BookStore`] with the library folders.
pub struct Scanner {
    store: Arc<BookStore>,
    analyzer: Box<dyn MediaAnalyzer>,
    covers_dir: Option<PathBuf>,
}

impl Scanner {
    pub fn new(store: Arc<BookStore>) -> Self {
        Self::with_analyzer(store, Box::new(SymphoniaAnalyzer))
    }

    pub fn with_analyzer(store: Arc<BookStore>, analyzer: Box<dyn MediaAnalyzer>) -> Self {
        Self {
            store,
            analyzer,
            covers_dir: None,
        }
    }

    /// Copy folder images into `dir` as book covers.
    pub fn covers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.covers_dir = Some(dir.into());
        self
    }

    /// Runs one full scan.
    pub fn scan(&self, roots: &ScanRoots) -> Result<ScanReport> {
        let known = self.store.get_all_books()?;
        let mut report = ScanReport::default();
        let mut seen: HashSet<i64> = HashSet::new();

        for (entry, book_type) in roots.entries() {
            let (chapters, skipped) = self.chapters_of(&entry);
            report.skipped += skipped;
            let existing = known.iter().find(|b| matches_entry(b, &entry, book_type));

            let book = match (existing, chapters.is_empty()) {
                (None, true) => {
                    debug!("No audio in {}", entry.display());
                    continue;
                }
                (Some(book), true) => {
                    debug!("Book `{}` lost all its audio", book.name);
                    continue;
                }
                (None, false) => {
                    let root = if book_type.is_folder() {
                        entry.clone()
                    } else {
                        entry.parent().map(Path::to_path_buf).unwrap_or_else(|| entry.clone())
                    };
                    let book = self.store.add_book(Book::new(root, display_name(&entry), book_type, chapters)?)?;
                    info!("Added book `{}` with {} chapter(s)", book.name, book.chapters.len());
                    report.added.push(book.id);
                    book
                }
                (Some(book), false) => {
                    let mut book = book.clone();
                    let was_hidden = !book.active;
                    book.active = true;
                    if replace_chapters(&mut book, chapters) {
                        self.store.update_chapters(&book)?;
                        info!("Updated chapters of `{}`", book.name);
                        report.updated.push(book.id);
                    }
                    if was_hidden {
                        self.store.reveal_book(&book)?;
                        report.revealed.push(book.id);
                    }
                    book
                }
            };
            seen.insert(book.id);

            if book_type.is_folder() && book.cover.is_none() {
                if let Err(e) = self.attach_cover(book, &entry) {
                    warn!("Could not attach a cover from {}: {e:#}", entry.display());
                }
            }
        }

        for book in known.iter().filter(|b| b.active && !seen.contains(&b.id)) {
            self.store.hide_book(book)?;
            report.hidden.push(book.id);
        }

        info!(
            "Scan finished: {} added, {} updated, {} revealed, {} hidden, {} file(s) skipped",
            report.added.len(),
            report.updated.len(),
            report.revealed.len(),
            report.hidden.len(),
            report.skipped
        );
        Ok(report)
    }

    /// Runs [`Scanner::scan`] on a background thread.
    pub fn spawn_scan(self: Arc<Self>, roots: ScanRoots) -> Result<JoinHandle<Result<ScanReport>>> {
        thread::Builder::new()
            .name("voice-scanner".into())
            .spawn(move || self.scan(&roots))
            .context("Failed to spawn scanner thread")
    }

    fn chapters_of(&self, entry: &Path) -> (Vec<Chapter>, usize) {
        let files = audio_files(entry);
        let measured: Vec<(PathBuf, Result<i64>)> = files
            .into_par_iter()
            .map(|path| {
                let duration = self.analyzer.duration(&path);
                (path, duration)
            })
            .collect();

        let mut chapters = Vec::with_capacity(measured.len());
        let mut skipped = 0;
        for (path, duration) in measured {
            match duration {
                Ok(duration) => {
                    let name = display_name(&path);
                    chapters.push(Chapter::new(path, name, duration));
                }
                Err(e) => {
                    warn!("Skipping {}: {e:#}", path.display());
                    skipped += 1;
                }
            }
        }
        (chapters, skipped)
    }

    fn attach_cover(&self, mut book: Book, folder: &Path) -> Result<()> {
        let Some(covers_dir) = &self.covers_dir else {
            return Ok(());
        };
        let Some(image) = first_image(folder) else {
            return Ok(());
        };

        fs::create_dir_all(covers_dir)
            .with_context(|| format!("Failed to create {}", covers_dir.display()))?;
        let extension = image.extension().and_then(|e| e.to_str()).unwrap_or("jpg");
        let target = covers_dir.join(format!("{}.{}", book.id, extension.to_ascii_lowercase()));
        fs::copy(&image, &target)
            .with_context(|| format!("Failed to copy {} to {}", image.display(), target.display()))?;

        debug!("Using {} as cover of `{}`", image.display(), book.name);
        book.cover = Some(target);
        self.store.update_book(&book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Every file lasts 60s unless its name says `broken`.
    struct FixedAnalyzer;

    impl MediaAnalyzer for FixedAnalyzer {
        fn duration(&self, path: &Path) -> Result<i64> {
            if path.to_string_lossy().contains("broken") {
                bail!("unreadable");
            }
            Ok(60_000)
        }
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    fn create_test_scanner() -> (Arc<BookStore>, Scanner) {
        let store = Arc::new(BookStore::open_in_memory().unwrap());
        let scanner = Scanner::with_analyzer(Arc::clone(&store), Box::new(FixedAnalyzer));
        (store, scanner)
    }

    #[test]
    fn test_audio_extension_check() {
        assert!(has_extension(Path::new("a/B.MP3"), AUDIO_EXTENSIONS));
        assert!(has_extension(Path::new("x.m4b"), AUDIO_EXTENSIONS));
        assert!(!has_extension(Path::new("cover.jpg"), AUDIO_EXTENSIONS));
        assert!(!has_extension(Path::new("README"), AUDIO_EXTENSIONS));
    }

    #[test]
    fn test_single_folder_book_in_natural_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Dune");
        for name in ["track10.mp3", "track2.mp3", "track1.mp3", "notes.txt"] {
            touch(&root.join(name));
        }
        let (store, scanner) = create_test_scanner();

        let report = scanner
            .scan(&ScanRoots {
                single: vec![root.clone()],
                ..ScanRoots::default()
            })
            .unwrap();
        assert_eq!(report.added.len(), 1);

        let book = store.get_book(report.added[0]).unwrap().unwrap();
        assert_eq!(book.name, "Dune");
        assert_eq!(book.book_type, BookType::SingleFolder);
        assert_eq!(book.root, root);
        let names: Vec<&str> = book.chapters.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["track1", "track2", "track10"]);
    }

    #[test]
    fn test_single_file_book() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("Hobbit.m4b");
        touch(&file);
        let (store, scanner) = create_test_scanner();

        scanner
            .scan(&ScanRoots {
                single: vec![file.clone()],
                ..ScanRoots::default()
            })
            .unwrap();
        let books = store.get_active_books().unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].name, "Hobbit");
        assert_eq!(books[0].book_type, BookType::SingleFile);
        assert_eq!(books[0].root, dir.path());
        assert_eq!(books[0].chapters[0].path(), file);
    }

    #[test]
    fn test_collection_children_become_books() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Emma.mp3"));
        touch(&dir.path().join("Persuasion/01.mp3"));
        touch(&dir.path().join("Persuasion/02.mp3"));
        touch(&dir.path().join("Empty/readme.txt"));
        let (store, scanner) = create_test_scanner();

        let report = scanner
            .scan(&ScanRoots {
                collection: vec![dir.path().to_path_buf()],
                ..ScanRoots::default()
            })
            .unwrap();
        assert_eq!(report.added.len(), 2);

        let books = store.get_active_books().unwrap();
        assert_eq!(books[0].name, "Emma");
        assert_eq!(books[0].book_type, BookType::CollectionFile);
        assert_eq!(books[1].name, "Persuasion");
        assert_eq!(books[1].book_type, BookType::CollectionFolder);
        assert_eq!(books[1].chapters.len(), 2);
    }

    #[test]
    fn test_missing_root_hides_and_return_reveals() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Book");
        touch(&root.join("1.mp3"));
        touch(&root.join("2.mp3"));
        let roots = ScanRoots {
            single: vec![root.clone()],
            ..ScanRoots::default()
        };
        let (store, scanner) = create_test_scanner();

        let id = scanner.scan(&roots).unwrap().added[0];
        let mut book = store.get_book(id).unwrap().unwrap();
        book.set_position(30_000, &root.join("2.mp3")).unwrap();
        store.update_book(&book).unwrap();

        fs::rename(&root, dir.path().join("Moved")).unwrap();
        let report = scanner.scan(&roots).unwrap();
        assert_eq!(report.hidden, vec![id]);
        assert!(store.get_active_books().unwrap().is_empty());

        fs::rename(dir.path().join("Moved"), &root).unwrap();
        let report = scanner.scan(&roots).unwrap();
        assert_eq!(report.revealed, vec![id]);
        assert!(report.added.is_empty());

        let book = store.get_book(id).unwrap().unwrap();
        assert!(book.active);
        assert_eq!(book.current_path, root.join("2.mp3"));
        assert_eq!(book.time, 30_000);
    }

    #[test]
    fn test_unconfigured_books_are_hidden() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("A/1.mp3"));
        let (store, scanner) = create_test_scanner();
        scanner
            .scan(&ScanRoots {
                single: vec![dir.path().join("A")],
                ..ScanRoots::default()
            })
            .unwrap();

        let report = scanner.scan(&ScanRoots::default()).unwrap();
        assert_eq!(report.hidden.len(), 1);
        assert_eq!(store.get_hidden_books().unwrap().len(), 1);
    }

    #[test]
    fn test_changed_files_update_chapters() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Book");
        touch(&root.join("1.mp3"));
        touch(&root.join("2.mp3"));
        let roots = ScanRoots {
            single: vec![root.clone()],
            ..ScanRoots::default()
        };
        let (store, scanner) = create_test_scanner();
        let id = scanner.scan(&roots).unwrap().added[0];

        let mut book = store.get_book(id).unwrap().unwrap();
        book.set_position(5_000, &root.join("2.mp3")).unwrap();
        store.update_book(&book).unwrap();

        touch(&root.join("3.mp3"));
        let report = scanner.scan(&roots).unwrap();
        assert_eq!(report.updated, vec![id]);
        let book = store.get_book(id).unwrap().unwrap();
        assert_eq!(book.chapters.len(), 3);
        assert_eq!(book.current_path, root.join("2.mp3"));
        assert_eq!(book.time, 5_000);

        fs::remove_file(root.join("2.mp3")).unwrap();
        scanner.scan(&roots).unwrap();
        let book = store.get_book(id).unwrap().unwrap();
        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.current_path, root.join("1.mp3"));
        assert_eq!(book.time, 0);

        // Unchanged files are not rewritten.
        assert!(scanner.scan(&roots).unwrap().updated.is_empty());
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Book");
        touch(&root.join("1.mp3"));
        touch(&root.join("2-broken.mp3"));
        let (store, scanner) = create_test_scanner();

        let report = scanner
            .scan(&ScanRoots {
                single: vec![root],
                ..ScanRoots::default()
            })
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(store.get_book(report.added[0]).unwrap().unwrap().chapters.len(), 1);
    }

    #[test]
    fn test_folder_cover_is_copied() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("Book");
        touch(&root.join("1.mp3"));
        fs::write(root.join("Folder.JPG"), b"image").unwrap();
        let covers = dir.path().join("covers");
        let (store, scanner) = create_test_scanner();
        let scanner = scanner.covers_dir(&covers);

        let id = scanner
            .scan(&ScanRoots {
                single: vec![root],
                ..ScanRoots::default()
            })
            .unwrap()
            .added[0];
        let cover = store.get_book(id).unwrap().unwrap().cover.unwrap();
        assert_eq!(cover, covers.join(format!("{id}.jpg")));
        assert_eq!(fs::read(cover).unwrap(), b"image");
    }

    #[test]
    fn test_spawn_scan() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Book/1.flac"));
        let (store, scanner) = create_test_scanner();

        let handle = Arc::new(scanner)
            .spawn_scan(ScanRoots {
                single: vec![dir.path().join("Book")],
                ..ScanRoots::default()
            })
            .unwrap();
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(store.get_active_books().unwrap().len(), 1);
    }

    #[test]
    fn test_symphonia_rejects_non_audio() {
        let dir = TempDir::new().unwrap();
        let fake = dir.path().join("fake.mp3");
        fs::write(&fake, b"definitely not audio").unwrap();
        assert!(SymphoniaAnalyzer.duration(&fake).is_err());
        assert!(SymphoniaAnalyzer.duration(&dir.path().join("missing.mp3")).is_err());
    }
}
