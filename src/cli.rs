//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `voice` binary.
//!
//! ## Commands
//!
//! - `folders`: manage the library folders
//! - `scan`: sync the catalog with the library folders
//! - `list` / `info`: browse the catalog
//! - `hide` / `reveal` / `delete`: manage books
//! - `bookmark`: add, list and remove bookmarks
//! - `play`: interactive playback session
//! - `settings`: show or change playback preferences
//!
//! ## Examples
//!
//! ```bash
//! voice folders add --collection ~/Audiobooks
//! voice scan
//! voice play "Dune"
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "voice")]
#[command(about = "Voice: a command-line audiobook player")]
#[command(version)]
pub struct Args {
    /// Directory holding the database, settings and covers
    #[arg(long, global = true, env = "VOICE_DATA_DIR", value_hint = clap::ValueHint::DirPath)]
    pub data_dir: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage library folders
    Folders {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Sync the catalog with the library folders
    ///
    /// New books are added, changed ones updated, hidden ones whose files are
    /// back revealed, and books whose files disappeared hidden.
    Scan,

    /// List books in natural name order
    List {
        /// Include hidden books
        #[arg(short, long)]
        all: bool,
    },

    /// Show chapters, position and bookmarks of a book
    Info {
        /// Book id or name
        #[arg(value_hint = clap::ValueHint::Other)]
        book: String,
    },

    /// Hide a book without deleting it
    Hide {
        /// Book id or name
        book: String,
    },

    /// Make a hidden book visible again
    Reveal {
        /// Book id or name
        book: String,
    },

    /// Delete a book, its chapters, bookmarks and cover
    Delete {
        /// Book id or name
        book: String,
    },

    /// Manage bookmarks
    Bookmark {
        #[command(subcommand)]
        action: BookmarkAction,
    },

    /// Start an interactive playback session
    ///
    /// Reads commands from stdin: play, pause, toggle, stop, next, prev, ff,
    /// rw, speed <x>, seek <ms> [path], sleep, key <code>, status, quit.
    /// JSON intents like {"action": "voice.action.NEXT"} are accepted too.
    Play {
        /// Book id or name, defaults to the last book played
        book: Option<String>,
    },

    /// Show or change playback preferences
    Settings {
        /// Skip distance in seconds
        #[arg(long)]
        seek_time: Option<u64>,

        /// Jump back on pause, in seconds
        #[arg(long)]
        auto_rewind: Option<u64>,

        /// Sleep timer length in minutes
        #[arg(long)]
        sleep_time: Option<u64>,
    },

    /// Generate shell completions
    ///
    /// Usage: voice completion bash > ~/.local/share/bash-completion/completions/voice
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Generate enhanced completion with book name completion
    ///
    /// Usage: voice completion-enhanced fish > ~/.config/fish/completions/voice.fish
    CompletionEnhanced {
        /// Shell to generate enhanced completions for (currently bash and fish supported)
        shell: Shell,
    },

    /// List book names for completion (hidden command)
    #[command(hide = true)]
    CompleteBooks {
        /// Print names unquoted, for fish
        #[arg(long)]
        fish: bool,
    },
}

/// Library folder actions
#[derive(Subcommand, Debug)]
pub enum FolderAction {
    /// Add a library folder
    Add {
        #[arg(value_hint = clap::ValueHint::AnyPath)]
        path: PathBuf,

        /// Treat every child of the folder as its own book
        #[arg(short, long)]
        collection: bool,
    },

    /// Remove a library folder
    Remove {
        #[arg(value_hint = clap::ValueHint::AnyPath)]
        path: PathBuf,
    },

    /// List library folders
    List,
}

/// Bookmark actions
#[derive(Subcommand, Debug)]
pub enum BookmarkAction {
    /// Bookmark a position
    Add {
        /// Book id or name
        book: String,

        /// Title of the bookmark
        title: String,

        /// Position in milliseconds, defaults to the book's resume point
        #[arg(long)]
        time: Option<i64>,

        /// Chapter file, defaults to the book's current chapter
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        chapter: Option<PathBuf>,
    },

    /// List bookmarks of a book in chapter order
    List {
        /// Book id or name
        book: String,
    },

    /// Remove a bookmark by id
    Remove { id: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_global_data_dir() {
        let args = Args::try_parse_from(["voice", "list", "--all", "--data-dir", "/tmp/v"]).unwrap();
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/v")));
        assert!(matches!(args.command, Command::List { all: true }));
    }

    #[test]
    fn test_parse_bookmark_add() {
        let args = Args::try_parse_from(["voice", "bookmark", "add", "Dune", "Spice", "--time", "1500"]).unwrap();
        match args.command {
            Command::Bookmark {
                action: BookmarkAction::Add { book, title, time, chapter },
            } => {
                assert_eq!(book, "Dune");
                assert_eq!(title, "Spice");
                assert_eq!(time, Some(1500));
                assert_eq!(chapter, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_play_book_is_optional() {
        let args = Args::try_parse_from(["voice", "play"]).unwrap();
        assert!(matches!(args.command, Command::Play { book: None }));
    }
}
