//! # Voice - Command-Line Audiobook Player
//!
//! Catalogs audiobooks from library folders, remembers where you stopped in
//! every book and plays them through an interactive session.
//!
//! ## Usage
//!
//! ```bash
//! # Configure and scan the library
//! voice folders add --collection ~/Audiobooks
//! voice scan
//!
//! # Browse
//! voice list
//! voice info "Dune"
//!
//! # Listen
//! voice play "Dune"
//! ```

use anyhow::{anyhow, bail, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use voice::cli::{self, BookmarkAction, FolderAction};
use voice::completion;
use voice::config::{RuntimeConfig, Settings};
use voice::db::BookStore;
use voice::model::{Book, Bookmark};
use voice::scanner::Scanner;
use voice::service::{format_millis, PlaybackService};

/// Finds a book by id or by name.
///
/// Names match case-insensitively, exactly first and then by substring. An
/// ambiguous substring is an error.
fn resolve_book(store: &BookStore, query: &str) -> Result<Book> {
    if let Ok(id) = query.parse::<i64>() {
        if let Some(book) = store.get_book(id)? {
            return Ok(book);
        }
    }

    let books = store.get_all_books()?;
    let needle = query.to_lowercase();
    if let Some(book) = books.iter().find(|b| b.name.to_lowercase() == needle) {
        return Ok(book.clone());
    }

    let mut matches: Vec<&Book> = books
        .iter()
        .filter(|b| b.name.to_lowercase().contains(&needle))
        .collect();
    match matches.len() {
        0 => bail!("No book matches `{query}`"),
        1 => Ok(matches.remove(0).clone()),
        _ => {
            let names: Vec<&str> = matches.iter().map(|b| b.name.as_str()).collect();
            bail!("`{query}` matches several books: {}", names.join(", "))
        }
    }
}

fn open_store(config: &RuntimeConfig) -> Result<BookStore> {
    BookStore::open(&config.db_path)
}

fn print_book_line(book: &Book) {
    let hidden = if book.active { "" } else { "  (hidden)" };
    println!(
        "{:>4}  {}  {} / {}  {} chapter(s){hidden}",
        book.id,
        book.name,
        format_millis(book.global_position()),
        format_millis(book.global_duration()),
        book.chapters.len(),
    );
}

fn print_book_info(book: &Book) -> Result<()> {
    println!("{} (#{})", book.name, book.id);
    if let Some(author) = &book.author {
        println!("  author:  {author}");
    }
    println!("  type:    {}", book.book_type);
    println!("  root:    {}", book.root.display());
    println!("  speed:   {:.2}x", book.speed);
    println!(
        "  played:  {} / {}",
        format_millis(book.global_position()),
        format_millis(book.global_duration())
    );
    if let Some(cover) = &book.cover {
        println!("  cover:   {}", cover.display());
    }

    println!("  chapters:");
    for chapter in &book.chapters {
        let marker = if chapter.path() == book.current_path { "▶" } else { " " };
        println!("   {marker} {}  {}", format_millis(chapter.duration()), chapter.name());
    }

    let bookmarks = book.sorted_bookmarks()?;
    if !bookmarks.is_empty() {
        println!("  bookmarks:");
        for bookmark in bookmarks {
            print_bookmark(book, &bookmark);
        }
    }
    Ok(())
}

fn print_bookmark(book: &Book, bookmark: &Bookmark) {
    let chapter = book
        .chapter(&bookmark.path)
        .map(|c| c.name().to_string())
        .unwrap_or_else(|_| bookmark.path.display().to_string());
    println!(
        "   {:>4}  {}  {} @ {}",
        bookmark.id,
        bookmark.title,
        chapter,
        format_millis(bookmark.time)
    );
}

fn print_settings(settings: &Settings) {
    println!("seek time:    {}s", settings.seek_time_secs);
    println!("auto rewind:  {}s", settings.auto_rewind_secs);
    println!("sleep time:   {}min", settings.sleep_time_mins);
}

fn print_folders(settings: &Settings) {
    for folder in &settings.single_book_folders {
        println!("single      {}", folder.display());
    }
    for folder in &settings.collection_book_folders {
        println!("collection  {}", folder.display());
    }
}

/// Main entry point for the Voice application.
///
/// # Logging
///
/// Controlled via `RUST_LOG`:
/// - `RUST_LOG=debug voice scan` - Enable debug logging
/// - `RUST_LOG=voice::playback=trace voice play` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let data_dir = args.data_dir.as_deref();

    match args.command {
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
            return Ok(());
        }
        cli::Command::CompletionEnhanced { shell } => {
            match shell {
                cli::Shell::Bash => completion::generate_enhanced_bash_completion(),
                cli::Shell::Fish => completion::generate_enhanced_fish_completion(),
                _ => return Err(anyhow!("Enhanced completions only supported for bash and fish")),
            }
            return Ok(());
        }
        cli::Command::CompleteBooks { fish } => {
            return completion::print_book_completions(data_dir, fish);
        }
        command => run(command, data_dir),
    }
}

fn run(command: cli::Command, data_dir: Option<&Path>) -> Result<()> {
    let config = RuntimeConfig::new(data_dir)?;
    debug!("Using data directory {}", config.data_dir.display());
    let mut settings = config.load_settings()?;

    match command {
        cli::Command::Folders { action } => match action {
            FolderAction::Add { path, collection } => {
                match settings.add_folder(&path, collection)? {
                    Some(added) => {
                        settings.save(&config.settings_path)?;
                        println!("Added {}", added.display());
                    }
                    None => println!("{} is already configured", path.display()),
                }
            }
            FolderAction::Remove { path } => {
                if settings.remove_folder(&path)? {
                    settings.save(&config.settings_path)?;
                    println!("Removed {}", path.display());
                } else {
                    bail!("{} is not a library folder", path.display());
                }
            }
            FolderAction::List => print_folders(&settings),
        },
        cli::Command::Scan => {
            let store = Arc::new(open_store(&config)?);
            let scanner = Scanner::new(Arc::clone(&store)).covers_dir(&config.covers_dir);
            let report = scanner.scan(&settings.scan_roots())?;
            println!(
                "{} added, {} updated, {} revealed, {} hidden",
                report.added.len(),
                report.updated.len(),
                report.revealed.len(),
                report.hidden.len()
            );
            if report.skipped > 0 {
                println!("{} file(s) could not be read", report.skipped);
            }
        }
        cli::Command::List { all } => {
            let store = open_store(&config)?;
            let books = if all {
                store.get_all_books()?
            } else {
                store.get_active_books()?
            };
            if books.is_empty() {
                println!("No books. Add a folder with `voice folders add` and run `voice scan`.");
            }
            for book in &books {
                print_book_line(book);
            }
        }
        cli::Command::Info { book } => {
            let store = open_store(&config)?;
            print_book_info(&resolve_book(&store, &book)?)?;
        }
        cli::Command::Hide { book } => {
            let store = open_store(&config)?;
            let book = resolve_book(&store, &book)?;
            store.hide_book(&book)?;
            println!("Hid {}", book.name);
        }
        cli::Command::Reveal { book } => {
            let store = open_store(&config)?;
            let book = resolve_book(&store, &book)?;
            store.reveal_book(&book)?;
            println!("Revealed {}", book.name);
        }
        cli::Command::Delete { book } => {
            let store = open_store(&config)?;
            let book = resolve_book(&store, &book)?;
            store.delete_book(&book)?;
            if settings.current_book == Some(book.id) {
                settings.current_book = None;
                settings.save(&config.settings_path)?;
            }
            println!("Deleted {}", book.name);
        }
        cli::Command::Bookmark { action } => {
            let store = open_store(&config)?;
            match action {
                BookmarkAction::Add { book, title, time, chapter } => {
                    let book = resolve_book(&store, &book)?;
                    let path = chapter.unwrap_or_else(|| book.current_path.clone());
                    let time = time.unwrap_or(book.time);
                    let bookmark = store.add_bookmark(book.id, &Bookmark::new(path, time, title))?;
                    println!("Added bookmark #{}", bookmark.id);
                }
                BookmarkAction::List { book } => {
                    let book = resolve_book(&store, &book)?;
                    for bookmark in book.sorted_bookmarks()? {
                        print_bookmark(&book, &bookmark);
                    }
                }
                BookmarkAction::Remove { id } => {
                    if !store.delete_bookmark(id)? {
                        bail!("No bookmark with id {id}");
                    }
                    println!("Removed bookmark #{id}");
                }
            }
        }
        cli::Command::Play { book } => {
            let store = Arc::new(open_store(&config)?);
            let book = match (book, settings.current_book) {
                (Some(query), _) => resolve_book(&store, &query)?,
                (None, Some(id)) => store
                    .get_book(id)?
                    .ok_or_else(|| anyhow!("The last played book (#{id}) is gone"))?,
                (None, None) => bail!("No book given and nothing played yet"),
            };
            if settings.current_book != Some(book.id) {
                settings.current_book = Some(book.id);
                settings.save(&config.settings_path)?;
            }

            info!("Starting playback of `{}`", book.name);
            let service = PlaybackService::new(Arc::clone(&store), book, settings.playback())?;
            service.run(BufReader::new(io::stdin()))?;
        }
        cli::Command::Settings { seek_time, auto_rewind, sleep_time } => {
            let changed = seek_time.is_some() || auto_rewind.is_some() || sleep_time.is_some();
            if let Some(secs) = seek_time {
                settings.seek_time_secs = secs;
            }
            if let Some(secs) = auto_rewind {
                settings.auto_rewind_secs = secs;
            }
            if let Some(mins) = sleep_time {
                settings.sleep_time_mins = mins;
            }
            if changed {
                settings.save(&config.settings_path)?;
            }
            print_settings(&settings);
        }
        other => debug!("{other:?} needs no data directory"),
    }

    Ok(())
}
