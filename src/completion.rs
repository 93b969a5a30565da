//! # Shell Completion Module
//!
//! - Generation of completion scripts for various shells
//! - Dynamic completion of book names from the catalog
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! voice completion bash > ~/.local/share/bash-completion/completions/voice
//!
//! # Fish with book name completion
//! voice completion-enhanced fish > ~/.config/fish/completions/voice.fish
//! ```

use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io;
use std::path::Path;

use crate::config;
use crate::db::BookStore;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Generate enhanced fish completion script with book name completion
pub fn generate_enhanced_fish_completion() {
    println!(r#"# Enhanced Voice completion script for Fish shell with book name completion
# Install with: voice completion-enhanced fish > ~/.config/fish/completions/voice.fish

function __voice_complete_books
    if command -sq voice
        voice complete-books --fish 2>/dev/null
    end
end

complete -c voice -e

# Global options
complete -c voice -s h -l help -d 'Print help information'
complete -c voice -s V -l version -d 'Print version information'
complete -c voice -l data-dir -r -a '(__fish_complete_directories)' -d 'Directory holding the database, settings and covers'

# Main commands
complete -c voice -f -n '__fish_is_first_token' -a 'folders' -d 'Manage library folders'
complete -c voice -f -n '__fish_is_first_token' -a 'scan' -d 'Sync the catalog with the library folders'
complete -c voice -f -n '__fish_is_first_token' -a 'list' -d 'List books in natural name order'
complete -c voice -f -n '__fish_is_first_token' -a 'info' -d 'Show chapters, position and bookmarks of a book'
complete -c voice -f -n '__fish_is_first_token' -a 'hide' -d 'Hide a book without deleting it'
complete -c voice -f -n '__fish_is_first_token' -a 'reveal' -d 'Make a hidden book visible again'
complete -c voice -f -n '__fish_is_first_token' -a 'delete' -d 'Delete a book'
complete -c voice -f -n '__fish_is_first_token' -a 'bookmark' -d 'Manage bookmarks'
complete -c voice -f -n '__fish_is_first_token' -a 'play' -d 'Start an interactive playback session'
complete -c voice -f -n '__fish_is_first_token' -a 'settings' -d 'Show or change playback preferences'
complete -c voice -f -n '__fish_is_first_token' -a 'completion' -d 'Generate shell completions'
complete -c voice -f -n '__fish_is_first_token' -a 'completion-enhanced' -d 'Generate enhanced shell completions'

# Book arguments
complete -c voice -f -n '__fish_seen_subcommand_from info hide reveal delete play' -a '(__voice_complete_books)' -d 'Book'

# folders
complete -c voice -f -n '__fish_seen_subcommand_from folders' -a 'add remove list'
complete -c voice -n '__fish_seen_subcommand_from add remove' -a '(__fish_complete_directories)'
complete -c voice -f -n '__fish_seen_subcommand_from add' -s c -l collection -d 'Every child is its own book'

# list
complete -c voice -f -n '__fish_seen_subcommand_from list' -s a -l all -d 'Include hidden books'

# bookmark
complete -c voice -f -n '__fish_seen_subcommand_from bookmark' -a 'add list remove'

# settings
complete -c voice -f -n '__fish_seen_subcommand_from settings' -l seek-time -r -d 'Skip distance in seconds'
complete -c voice -f -n '__fish_seen_subcommand_from settings' -l auto-rewind -r -d 'Jump back on pause, in seconds'
complete -c voice -f -n '__fish_seen_subcommand_from settings' -l sleep-time -r -d 'Sleep timer length in minutes'

# completion
complete -c voice -f -n '__fish_seen_subcommand_from completion' -a 'bash zsh fish power-shell elvish'
complete -c voice -f -n '__fish_seen_subcommand_from completion-enhanced' -a 'bash fish'
"#);
}

/// Generate enhanced bash completion script with book name completion
pub fn generate_enhanced_bash_completion() {
    println!(r#"#!/bin/bash
# Enhanced Voice completion script with book name completion
# Install with: voice completion-enhanced bash > ~/.local/share/bash-completion/completions/voice

_voice_complete_books() {{
    if command -v voice >/dev/null 2>&1; then
        voice complete-books 2>/dev/null
    fi
}}

_voice() {{
    local cur prev words cword
    _init_completion || return

    case "${{prev}}" in
        info|hide|reveal|delete|play)
            local IFS=$'\n'
            COMPREPLY=($(compgen -W "$(_voice_complete_books)" -- "${{cur}}"))
            return 0
            ;;
        completion|completion-enhanced)
            COMPREPLY=($(compgen -W "bash zsh fish power-shell elvish" -- "${{cur}}"))
            return 0
            ;;
        folders)
            COMPREPLY=($(compgen -W "add remove list" -- "${{cur}}"))
            return 0
            ;;
        bookmark)
            COMPREPLY=($(compgen -W "add list remove" -- "${{cur}}"))
            return 0
            ;;
        --data-dir)
            _filedir -d
            return 0
            ;;
    esac

    local subcommands="folders scan list info hide reveal delete bookmark play settings completion completion-enhanced help"

    if [[ $cword -eq 1 ]]; then
        COMPREPLY=($(compgen -W "$subcommands --data-dir --help --version" -- "${{cur}}"))
    else
        case "${{words[1]}}" in
            folders)
                _filedir -d
                COMPREPLY+=($(compgen -W "--collection --help" -- "${{cur}}"))
                ;;
            list)
                COMPREPLY=($(compgen -W "--all --help" -- "${{cur}}"))
                ;;
            settings)
                COMPREPLY=($(compgen -W "--seek-time --auto-rewind --sleep-time --help" -- "${{cur}}"))
                ;;
            *)
                COMPREPLY=($(compgen -W "--help" -- "${{cur}}"))
                ;;
        esac
    fi
}} &&
complete -F _voice voice

# ex: filetype=sh
"#);
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Names of the active books, for completion.
///
/// Any problem reaching the catalog yields an empty list so a broken database
/// never breaks the shell.
pub fn get_book_completions(data_dir: Option<&Path>) -> Result<Vec<String>> {
    let db_path = match config::get_db_path(data_dir) {
        Ok(path) => path,
        Err(_) => return Ok(Vec::new()),
    };
    if !db_path.exists() {
        return Ok(Vec::new());
    }

    let books = match BookStore::open(&db_path).and_then(|store| store.get_active_books()) {
        Ok(books) => books,
        Err(_) => return Ok(Vec::new()),
    };
    let mut names: Vec<String> = books.into_iter().map(|b| b.name).collect();
    names.dedup();
    Ok(names)
}

/// Formats a completion for the given shell. Fish takes names verbatim, other
/// shells get names with whitespace quoted.
pub fn format_completion(name: &str, fish: bool) -> String {
    if !fish && name.contains(char::is_whitespace) {
        format!("\"{}\"", name.replace('"', "\\\""))
    } else {
        name.to_string()
    }
}

/// Print available book names, one per line.
pub fn print_book_completions(data_dir: Option<&Path>, fish: bool) -> Result<()> {
    for name in get_book_completions(data_dir)? {
        println!("{}", format_completion(&name, fish));
    }
    Ok(())
}
