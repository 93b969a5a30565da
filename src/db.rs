//! # Book Catalog Store
//!
//! Durable storage for books, their chapter (media) rows and bookmarks in an
//! embedded SQLite database.
//!
//! ## Schema
//!
//! - `bookTable`: one row per book. `bookMediaContaining` lists the ids of the
//!   book's media rows in chapter order, comma separated, and `bookPosition`
//!   holds the id of the media row playback resumes in.
//! - `mediaTable`: one row per chapter. `mediaPosition` is the resume time.
//! - `bookmarkTable`: user bookmarks, keyed by book.
//!
//! ## Concurrency
//!
//! A [`BookStore`] is created once by the caller and shared through an `Arc`.
//! Every call takes the connection lock and multi-row changes run inside one
//! transaction. Background writes go through a single writer thread in
//! submission order, so when two writes touch the same row the one submitted
//! last wins. Each background write hands back a [`PendingWrite`].

use anyhow::{anyhow, bail, Context, Result};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use log::{debug, error, info, trace, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::ModelError;
use crate::model::{clamp_speed, Book, BookDetail, BookType, Bookmark, Chapter, MediaDetail, ID_UNKNOWN};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS bookTable (
        bookID              INTEGER PRIMARY KEY AUTOINCREMENT,
        bookName            TEXT    NOT NULL,
        bookCover           TEXT,
        bookThumb           TEXT,
        bookMediaContaining TEXT    NOT NULL,
        bookPosition        INTEGER,
        bookAuthor          TEXT,
        bookType            TEXT    NOT NULL DEFAULT 'SINGLE_FOLDER',
        bookRoot            TEXT    NOT NULL DEFAULT '',
        bookSpeed           REAL    NOT NULL DEFAULT 1.0,
        bookActive          INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE IF NOT EXISTS mediaTable (
        mediaID       INTEGER PRIMARY KEY AUTOINCREMENT,
        mediaPath     TEXT    NOT NULL,
        mediaName     TEXT    NOT NULL,
        mediaPosition INTEGER NOT NULL DEFAULT 0,
        mediaDuration INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS bookmarkTable (
        bookmarkID    INTEGER PRIMARY KEY AUTOINCREMENT,
        bookID        INTEGER NOT NULL,
        bookmarkPath  TEXT    NOT NULL,
        bookmarkTime  INTEGER NOT NULL,
        bookmarkTitle TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_bookmark_book ON bookmarkTable(bookID);
";

const BOOK_COLUMNS: &str = "bookID, bookName, bookCover, bookThumb, bookMediaContaining, \
     bookPosition, bookAuthor, bookType, bookRoot, bookSpeed, bookActive";

type WriteJob = Box<dyn FnOnce(&mut Connection) + Send>;

/// Handle to a write running on the store's writer thread.
///
/// Dropping the handle does not cancel the write. Failures are always logged;
/// [`PendingWrite::wait`] additionally returns them to the caller.
#[derive(Debug)]
#[must_use = "drop the handle explicitly to ignore the write's outcome"]
pub struct PendingWrite {
    receiver: Receiver<Result<()>>,
}

impl PendingWrite {
    /// Blocks until the write finished and returns its outcome.
    pub fn wait(self) -> Result<()> {
        self.receiver
            .recv()
            .map_err(|_| anyhow!("Store writer stopped before the write completed"))?
    }

    /// Returns the outcome if the write already finished.
    pub fn try_result(&self) -> Option<Result<()>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(Err(anyhow!("Store writer stopped before the write completed")))
            }
        }
    }
}

/// Everything `bookTable` holds for one book.
struct BookRow {
    detail: BookDetail,
    author: Option<String>,
    book_type: BookType,
    root: PathBuf,
    speed: f32,
    active: bool,
}

/// SQLite backed catalog of books, chapters and bookmarks.
pub struct BookStore {
    conn: Arc<Mutex<Connection>>,
    writer: Option<Sender<WriteJob>>,
    worker: Option<JoinHandle<()>>,
}

impl BookStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open book database at {}", path.display()))?;
        info!("Opened book database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create book database schema")?;

        let conn = Arc::new(Mutex::new(conn));
        let (writer, jobs) = channel::unbounded::<WriteJob>();
        let worker_conn = Arc::clone(&conn);
        let worker = thread::Builder::new()
            .name("voice-store-writer".into())
            .spawn(move || {
                for job in jobs {
                    let mut conn = lock(&worker_conn);
                    job(&mut *conn);
                }
                debug!("Store writer finished");
            })
            .context("Failed to spawn store writer thread")?;

        Ok(Self {
            conn,
            writer: Some(writer),
            worker: Some(worker),
        })
    }

    fn enqueue<F>(&self, label: &'static str, write: F) -> PendingWrite
    where
        F: FnOnce(&mut Connection) -> Result<()> + Send + 'static,
    {
        let (reply, receiver) = channel::bounded(1);
        let job: WriteJob = Box::new(move |conn| {
            let result = write(conn);
            match &result {
                Ok(()) => trace!("Background write `{label}` done"),
                Err(e) => error!("Background write `{label}` failed: {e:#}"),
            }
            // The caller may have dropped its handle.
            let _ = reply.send(result);
        });

        match &self.writer {
            Some(writer) => {
                if writer.send(job).is_err() {
                    error!("Store writer is gone, `{label}` was not written");
                }
            }
            None => error!("Store is shutting down, `{label}` was not written"),
        }
        PendingWrite { receiver }
    }

    /// Blocks until every background write submitted so far has finished.
    pub fn flush(&self) -> Result<()> {
        self.enqueue("flush", |_| Ok(())).wait()
    }

    /// All books, hidden ones included, in natural name order.
    pub fn get_all_books(&self) -> Result<Vec<Book>> {
        self.query_books(None)
    }

    /// Books that are not hidden, in natural name order.
    pub fn get_active_books(&self) -> Result<Vec<Book>> {
        self.query_books(Some(true))
    }

    /// Hidden books, in natural name order.
    pub fn get_hidden_books(&self) -> Result<Vec<Book>> {
        self.query_books(Some(false))
    }

    fn query_books(&self, active: Option<bool>) -> Result<Vec<Book>> {
        let conn = lock(&self.conn);
        let rows = match active {
            Some(flag) => {
                let sql = format!("SELECT {BOOK_COLUMNS} FROM bookTable WHERE bookActive = ?1");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([flag], book_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let sql = format!("SELECT {BOOK_COLUMNS} FROM bookTable");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], book_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        let mut books = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(book) = assemble_book(&conn, row)? {
                books.push(book);
            }
        }
        books.sort_by(|a, b| a.compare_by_name(b));
        Ok(books)
    }

    /// Loads one book by id.
    pub fn get_book(&self, id: i64) -> Result<Option<Book>> {
        let conn = lock(&self.conn);
        match read_book_row(&conn, id)? {
            Some(row) => assemble_book(&conn, row),
            None => Ok(None),
        }
    }

    /// Inserts `book` with its chapters and bookmarks in one transaction and
    /// returns it with the assigned ids.
    ///
    /// # Errors
    ///
    /// Fails if the book breaks a model invariant or the insert fails; nothing
    /// is written in that case.
    pub fn add_book(&self, mut book: Book) -> Result<Book> {
        book.validate()
            .with_context(|| format!("Refusing to store invalid book `{}`", book.name))?;

        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;

        let (media_ids, position) = insert_media(&tx, &book)?;
        let detail = BookDetail {
            id: ID_UNKNOWN,
            name: book.name.clone(),
            cover: book.cover.as_deref().map(path_string),
            thumb: book.thumb.as_deref().map(path_string),
            media_ids,
            position,
        };
        tx.execute(
            "INSERT INTO bookTable (bookName, bookCover, bookThumb, bookMediaContaining, bookPosition,
                                    bookAuthor, bookType, bookRoot, bookSpeed, bookActive)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                detail.name,
                detail.cover,
                detail.thumb,
                detail.media_ids_as_string(),
                detail.position,
                book.author,
                book.book_type.as_str(),
                path_string(&book.root),
                f64::from(book.speed),
                book.active,
            ],
        )
        .with_context(|| format!("Failed to insert book `{}`", book.name))?;
        book.id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO bookmarkTable (bookID, bookmarkPath, bookmarkTime, bookmarkTitle)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for bookmark in &mut book.bookmarks {
                stmt.execute(params![book.id, path_string(&bookmark.path), bookmark.time, bookmark.title])?;
                bookmark.id = tx.last_insert_rowid();
            }
        }

        tx.commit().context("Committing new book failed")?;
        info!("Added book `{}` with {} chapters (id {})", book.name, book.chapters.len(), book.id);
        Ok(book)
    }

    /// Writes the book's metadata and current position.
    pub fn update_book(&self, book: &Book) -> Result<()> {
        let mut conn = lock(&self.conn);
        write_book(&mut conn, book)
    }

    /// Background variant of [`BookStore::update_book`].
    pub fn update_book_async(&self, book: &Book) -> PendingWrite {
        let book = book.clone();
        self.enqueue("update book", move |conn| write_book(conn, &book))
    }

    /// Replaces the book's media rows with its current chapter list.
    pub fn update_chapters(&self, book: &Book) -> Result<()> {
        book.validate()?;
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;

        let old = read_book_row(&tx, book.id)?
            .ok_or_else(|| anyhow!("No book with id {} to update", book.id))?;
        {
            let mut stmt = tx.prepare("DELETE FROM mediaTable WHERE mediaID = ?1")?;
            for id in &old.detail.media_ids {
                stmt.execute([id])?;
            }
        }
        let (media_ids, position) = insert_media(&tx, book)?;
        let detail = BookDetail { media_ids, position, ..old.detail };
        tx.execute(
            "UPDATE bookTable SET bookMediaContaining = ?1, bookPosition = ?2 WHERE bookID = ?3",
            params![detail.media_ids_as_string(), detail.position, book.id],
        )?;
        write_book_row(&tx, book)?;
        tx.commit().context("Committing chapter update failed")
    }

    /// Hides a book from the active listing without deleting anything.
    pub fn hide_book(&self, book: &Book) -> Result<()> {
        self.set_active(book.id, false)?;
        info!("Hid book `{}`", book.name);
        Ok(())
    }

    /// Makes a hidden book active again.
    pub fn reveal_book(&self, book: &Book) -> Result<()> {
        self.set_active(book.id, true)?;
        info!("Revealed book `{}`", book.name);
        Ok(())
    }

    fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "UPDATE bookTable SET bookActive = ?1 WHERE bookID = ?2",
            params![active, id],
        )?;
        if changed == 0 {
            bail!("No book with id {id}");
        }
        Ok(())
    }

    /// Removes the book, its media rows and its bookmarks atomically, then
    /// deletes its cover and thumbnail files.
    ///
    /// # Errors
    ///
    /// Fails if the book does not exist or the transaction fails. Problems
    /// removing the image files are only logged.
    pub fn delete_book(&self, book: &Book) -> Result<()> {
        let detail = {
            let mut conn = lock(&self.conn);
            let tx = conn.transaction()?;
            let row = read_book_row(&tx, book.id)?
                .ok_or_else(|| anyhow!("No book with id {} to delete", book.id))?;

            {
                let mut stmt = tx.prepare("DELETE FROM mediaTable WHERE mediaID = ?1")?;
                for id in &row.detail.media_ids {
                    stmt.execute([id])?;
                }
            }
            tx.execute("DELETE FROM bookmarkTable WHERE bookID = ?1", [book.id])?;
            tx.execute("DELETE FROM bookTable WHERE bookID = ?1", [book.id])?;
            tx.commit()
                .with_context(|| format!("Committing delete of book `{}` failed", book.name))?;
            row.detail
        };
        info!("Deleted book `{}` ({} media rows)", detail.name, detail.media_ids.len());

        for image in [detail.cover, detail.thumb].into_iter().flatten() {
            match fs::remove_file(&image) {
                Ok(()) => debug!("Removed image {image}"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove image {image}: {e}"),
            }
        }
        Ok(())
    }

    /// Saves a bookmark for `book_id` and returns it with its id.
    ///
    /// # Errors
    ///
    /// Fails with [`ModelError::UnknownChapter`] if the bookmark's path is not
    /// one of the book's chapters.
    pub fn add_bookmark(&self, book_id: i64, bookmark: &Bookmark) -> Result<Bookmark> {
        let conn = lock(&self.conn);
        let row = read_book_row(&conn, book_id)?
            .ok_or_else(|| anyhow!("No book with id {book_id}"))?;
        let media = read_media(&conn, &row.detail.media_ids)?;
        if !media.iter().any(|m| m.path == bookmark.path) {
            return Err(ModelError::UnknownChapter {
                book: row.detail.name,
                path: bookmark.path.clone(),
            }
            .into());
        }

        conn.execute(
            "INSERT INTO bookmarkTable (bookID, bookmarkPath, bookmarkTime, bookmarkTitle)
             VALUES (?1, ?2, ?3, ?4)",
            params![book_id, path_string(&bookmark.path), bookmark.time, bookmark.title],
        )?;
        let mut saved = bookmark.clone();
        saved.id = conn.last_insert_rowid();
        debug!("Added bookmark `{}` to book {book_id}", saved.title);
        Ok(saved)
    }

    /// Deletes a bookmark. Returns `false` if it did not exist.
    pub fn delete_bookmark(&self, bookmark_id: i64) -> Result<bool> {
        let conn = lock(&self.conn);
        let changed = conn.execute("DELETE FROM bookmarkTable WHERE bookmarkID = ?1", [bookmark_id])?;
        Ok(changed > 0)
    }

    pub fn get_bookmarks(&self, book_id: i64) -> Result<Vec<Bookmark>> {
        let conn = lock(&self.conn);
        read_bookmarks(&conn, book_id)
    }

    pub fn get_book_detail(&self, id: i64) -> Result<Option<BookDetail>> {
        let conn = lock(&self.conn);
        Ok(read_book_row(&conn, id)?.map(|row| row.detail))
    }

    pub fn get_all_book_details(&self) -> Result<Vec<BookDetail>> {
        let conn = lock(&self.conn);
        let sql = format!("SELECT {BOOK_COLUMNS} FROM bookTable ORDER BY bookID");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], book_row)?;
        Ok(rows
            .map(|row| row.map(|r| r.detail))
            .collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_media(&self, id: i64) -> Result<Option<MediaDetail>> {
        let conn = lock(&self.conn);
        Ok(conn
            .query_row(
                "SELECT mediaID, mediaPath, mediaName, mediaPosition, mediaDuration
                 FROM mediaTable WHERE mediaID = ?1",
                [id],
                media_row,
            )
            .optional()?)
    }

    /// Media rows of a book in chapter order.
    pub fn get_media_from_book(&self, book_id: i64) -> Result<Vec<MediaDetail>> {
        let conn = lock(&self.conn);
        match read_book_row(&conn, book_id)? {
            Some(row) => read_media(&conn, &row.detail.media_ids),
            None => Ok(Vec::new()),
        }
    }

    /// Background write of one `bookTable` row image.
    pub fn update_book_detail_async(&self, detail: BookDetail) -> PendingWrite {
        self.enqueue("update book detail", move |conn| {
            let changed = conn.execute(
                "UPDATE bookTable SET bookName = ?1, bookCover = ?2, bookThumb = ?3,
                        bookMediaContaining = ?4, bookPosition = ?5
                 WHERE bookID = ?6",
                params![
                    detail.name,
                    detail.cover,
                    detail.thumb,
                    detail.media_ids_as_string(),
                    detail.position,
                    detail.id,
                ],
            )?;
            if changed == 0 {
                bail!("No book with id {}", detail.id);
            }
            Ok(())
        })
    }

    /// Background write of one `mediaTable` row image.
    pub fn update_media_async(&self, media: MediaDetail) -> PendingWrite {
        self.enqueue("update media", move |conn| {
            let changed = conn.execute(
                "UPDATE mediaTable SET mediaPath = ?1, mediaName = ?2, mediaPosition = ?3,
                        mediaDuration = ?4
                 WHERE mediaID = ?5",
                params![
                    path_string(&media.path),
                    media.name,
                    media.position,
                    media.duration,
                    media.id,
                ],
            )?;
            if changed == 0 {
                bail!("No media with id {}", media.id);
            }
            Ok(())
        })
    }
}

impl Drop for BookStore {
    fn drop(&mut self) {
        // Closing the queue lets the writer drain what is left and exit.
        self.writer.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Store writer thread panicked");
            }
        }
    }
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn book_row(row: &Row<'_>) -> rusqlite::Result<BookRow> {
    let encoded: String = row.get(4)?;
    let book_type: String = row.get(7)?;
    let root: String = row.get(8)?;
    Ok(BookRow {
        detail: BookDetail {
            id: row.get(0)?,
            name: row.get(1)?,
            cover: row.get(2)?,
            thumb: row.get(3)?,
            media_ids: BookDetail::parse_media_ids(&encoded),
            position: row.get::<_, Option<i64>>(5)?.unwrap_or(ID_UNKNOWN),
        },
        author: row.get(6)?,
        book_type: BookType::parse(&book_type).unwrap_or_else(|| {
            warn!("Unknown book type `{book_type}`, assuming single folder");
            BookType::SingleFolder
        }),
        root: PathBuf::from(root),
        speed: row.get::<_, f64>(9)? as f32,
        active: row.get(10)?,
    })
}

fn media_row(row: &Row<'_>) -> rusqlite::Result<MediaDetail> {
    let path: String = row.get(1)?;
    Ok(MediaDetail {
        id: row.get(0)?,
        path: PathBuf::from(path),
        name: row.get(2)?,
        position: row.get(3)?,
        duration: row.get(4)?,
    })
}

fn read_book_row(conn: &Connection, id: i64) -> Result<Option<BookRow>> {
    let sql = format!("SELECT {BOOK_COLUMNS} FROM bookTable WHERE bookID = ?1");
    Ok(conn.query_row(&sql, [id], book_row).optional()?)
}

fn read_media(conn: &Connection, ids: &[i64]) -> Result<Vec<MediaDetail>> {
    let mut stmt = conn.prepare(
        "SELECT mediaID, mediaPath, mediaName, mediaPosition, mediaDuration
         FROM mediaTable WHERE mediaID = ?1",
    )?;
    let mut media = Vec::with_capacity(ids.len());
    for id in ids {
        match stmt.query_row([id], media_row).optional()? {
            Some(row) => media.push(row),
            None => warn!("Media row {id} is referenced but missing"),
        }
    }
    Ok(media)
}

fn read_bookmarks(conn: &Connection, book_id: i64) -> Result<Vec<Bookmark>> {
    let mut stmt = conn.prepare(
        "SELECT bookmarkID, bookmarkPath, bookmarkTime, bookmarkTitle
         FROM bookmarkTable WHERE bookID = ?1 ORDER BY bookmarkID",
    )?;
    let rows = stmt.query_map([book_id], |row| {
        let path: String = row.get(1)?;
        Ok(Bookmark {
            id: row.get(0)?,
            path: PathBuf::from(path),
            time: row.get(2)?,
            title: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Inserts one media row per chapter. Returns the new ids and the id of the
/// current chapter's row.
fn insert_media(conn: &Connection, book: &Book) -> Result<(Vec<i64>, i64)> {
    let mut stmt = conn.prepare(
        "INSERT INTO mediaTable (mediaPath, mediaName, mediaPosition, mediaDuration)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut ids = Vec::with_capacity(book.chapters.len());
    let mut position = ID_UNKNOWN;
    for chapter in &book.chapters {
        let is_current = chapter.path() == book.current_path;
        let resume = if is_current { book.time } else { 0 };
        stmt.execute(params![
            path_string(chapter.path()),
            chapter.name(),
            resume,
            chapter.duration()
        ])
        .with_context(|| format!("Failed to insert chapter {}", chapter.path().display()))?;
        let id = conn.last_insert_rowid();
        if is_current {
            position = id;
        }
        ids.push(id);
    }
    Ok((ids, position))
}

/// Builds a [`Book`] from its rows. Books whose media rows are all gone are
/// skipped.
fn assemble_book(conn: &Connection, row: BookRow) -> Result<Option<Book>> {
    let media = read_media(conn, &row.detail.media_ids)?;
    let Some(first) = media.first() else {
        warn!("Book `{}` has no readable chapters, skipping", row.detail.name);
        return Ok(None);
    };

    let current = media
        .iter()
        .find(|m| m.id == row.detail.position)
        .unwrap_or(first);
    let current_path = current.path.clone();
    let time = current.position.clamp(0, current.duration.max(0));
    let chapters: Vec<Chapter> = media
        .iter()
        .map(|m| Chapter::new(m.path.clone(), m.name.clone(), m.duration))
        .collect();

    let mut bookmarks = read_bookmarks(conn, row.detail.id)?;
    bookmarks.retain(|b| {
        let known = chapters.iter().any(|c| c.path() == b.path);
        if !known {
            debug!("Bookmark `{}` points at a removed chapter", b.title);
        }
        known
    });

    let book_root = if row.root.as_os_str().is_empty() {
        first.path.clone()
    } else {
        row.root
    };

    Ok(Some(Book {
        id: row.detail.id,
        name: row.detail.name,
        author: row.author,
        book_type: row.book_type,
        root: book_root,
        chapters,
        bookmarks,
        current_path,
        time,
        speed: clamp_speed(row.speed),
        active: row.active,
        cover: row.detail.cover.map(PathBuf::from),
        thumb: row.detail.thumb.map(PathBuf::from),
    }))
}

/// Writes metadata and position of an already stored book in one transaction.
fn write_book(conn: &mut Connection, book: &Book) -> Result<()> {
    let tx = conn.transaction()?;
    write_book_row(&tx, book)?;
    tx.commit()
        .with_context(|| format!("Committing update of book `{}` failed", book.name))?;
    trace!("Stored book `{}` at {}ms in {}", book.name, book.time, book.current_path.display());
    Ok(())
}

fn write_book_row(tx: &Transaction<'_>, book: &Book) -> Result<()> {
    if book.id == ID_UNKNOWN {
        bail!("Book `{}` has not been stored yet", book.name);
    }

    let row = read_book_row(tx, book.id)?
        .ok_or_else(|| anyhow!("No book with id {}", book.id))?;
    let current = read_media(tx, &row.detail.media_ids)?
        .into_iter()
        .find(|m| m.path == book.current_path)
        .ok_or_else(|| ModelError::UnknownChapter {
            book: book.name.clone(),
            path: book.current_path.clone(),
        })?;

    tx.execute(
        "UPDATE bookTable SET bookName = ?1, bookCover = ?2, bookThumb = ?3, bookPosition = ?4,
                bookAuthor = ?5, bookType = ?6, bookRoot = ?7, bookSpeed = ?8, bookActive = ?9
         WHERE bookID = ?10",
        params![
            book.name,
            book.cover.as_deref().map(path_string),
            book.thumb.as_deref().map(path_string),
            current.id,
            book.author,
            book.book_type.as_str(),
            path_string(&book.root),
            f64::from(clamp_speed(book.speed)),
            book.active,
            book.id,
        ],
    )?;
    tx.execute(
        "UPDATE mediaTable SET mediaPosition = ?1 WHERE mediaID = ?2",
        params![book.time.clamp(0, current.duration.max(0)), current.id],
    )?;
    Ok(())
}
