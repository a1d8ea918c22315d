//! # Shell Completion Module
//!
//! Completion scripts for every shell clap_complete supports, plus an
//! enhanced bash script that completes `generate --seed` with song ids
//! from the database.
//!
//! ## Usage
//!
//! ```bash
//! playlist-rl completion bash > ~/.local/share/bash-completion/completions/playlist-rl
//! playlist-rl completion bash --enhanced > ~/.local/share/bash-completion/completions/playlist-rl
//! ```

use crate::db;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};
use std::path::Path;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Bash script completing subcommands, options and seed song ids.
pub fn enhanced_bash_completion() -> &'static str {
    r#"#!/bin/bash
# Enhanced playlist-rl completion with seed song completion

_playlist_rl() {
    local cur prev words cword
    _init_completion || return

    case "${prev}" in
        --seed|-s)
            mapfile -t COMPREPLY < <(playlist-rl complete-songs 2>/dev/null | grep "^${cur}")
            return 0
            ;;
        --preset)
            COMPREPLY=($(compgen -W "baseline improved diversity-focused" -- "${cur}"))
            return 0
            ;;
        completion)
            COMPREPLY=($(compgen -W "bash zsh fish power-shell elvish" -- "${cur}"))
            return 0
            ;;
        import|--db|--config|--embeddings|--model|--output|-o|-m)
            _filedir
            return 0
            ;;
    esac

    local subcommands="import embed train generate search genres history completion help"

    if [[ $cword -eq 1 ]]; then
        COMPREPLY=($(compgen -W "$subcommands --db --config --help --version" -- "${cur}"))
    else
        case "${words[1]}" in
            train)
                COMPREPLY=($(compgen -W "--episodes --preset --embeddings --model --help" -- "${cur}"))
                ;;
            generate)
                COMPREPLY=($(compgen -W "--seed --length --genre --min-popularity --min-year --target --embeddings --model --json --help" -- "${cur}"))
                ;;
            history)
                COMPREPLY=($(compgen -W "--run --limit --help" -- "${cur}"))
                ;;
            *)
                COMPREPLY=($(compgen -W "--help" -- "${cur}"))
                ;;
        esac
    fi
} &&
complete -F _playlist_rl playlist-rl
"#
}

/// Song ids in catalog order, empty when the database is missing or
/// unreadable.
pub fn get_song_completions(db_path: &Path) -> Vec<String> {
    if !db_path.exists() {
        return Vec::new();
    }

    db::connect(db_path)
        .and_then(|conn| db::load_catalog(&conn, None))
        .map(|catalog| catalog.songs().iter().map(|song| song.id.clone()).collect())
        .unwrap_or_default()
}

pub fn print_song_completions(db_path: &Path) -> Result<()> {
    let mut out = io::stdout().lock();
    for id in get_song_completions(db_path) {
        writeln!(out, "{id}")?;
    }
    Ok(())
}
