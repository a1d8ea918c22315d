//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `playlist-rl` binary.
//!
//! ## Commands
//!
//! - `import`: Load a JSON song catalog into the database
//! - `embed`: Write feature-derived embeddings for the catalog
//! - `train`: Train the DQN agent and save the model
//! - `generate`: Build a playlist from a seed song with the trained model
//! - `search`, `genres`: Browse the catalog
//! - `history`: Show recorded training episodes
//!
//! ## Examples
//!
//! ```bash
//! playlist-rl import songs.json
//! playlist-rl train --episodes 200 --preset diversity-focused
//! playlist-rl generate --seed 4uLU6hMCjMI75M1A2tKUQC --length 15 --genre pop
//! ```

use crate::generator::AudioTarget;
use crate::reward::RewardPreset;
use crate::song::Attribute;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser, Debug)]
#[command(name = "playlist-rl")]
#[command(about = "Learn to sequence playlists with a Deep Q-Network")]
#[command(version)]
pub struct Args {
    /// JSON file with tunables (reward preset, agent, training, ...)
    #[arg(long, global = true, env = "PLAYLIST_RL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true, env = "PLAYLIST_RL_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import songs from a JSON array of song records
    ///
    /// Songs are inserted or replaced by id. Missing audio attributes are
    /// stored as NULL and imputed later by the configured policy.
    Import {
        /// JSON file holding an array of songs
        path: PathBuf,

        /// Keep only the newest N songs of the file
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Derive embeddings from audio features and write them as text
    Embed {
        /// Output file (defaults to the data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train the agent on the catalog and save the model
    Train {
        /// Number of episodes (overrides the config file)
        #[arg(short, long)]
        episodes: Option<usize>,

        /// Reward preset (overrides the config file)
        #[arg(long, value_enum)]
        preset: Option<RewardPreset>,

        /// Embeddings file; derived from features when absent
        #[arg(long)]
        embeddings: Option<PathBuf>,

        /// Where to save the model
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Generate a playlist with the trained model
    Generate {
        /// Seed song id; random when omitted
        #[arg(short, long, value_hint = clap::ValueHint::Other)]
        seed: Option<String>,

        /// Playlist length including the seed
        #[arg(short, long, default_value = "20")]
        length: usize,

        /// Accepted genre (repeatable, case-insensitive)
        #[arg(short, long = "genre")]
        genres: Vec<String>,

        #[arg(long)]
        min_popularity: Option<f64>,

        #[arg(long)]
        min_year: Option<i32>,

        /// Audio target `attribute=value[:tolerance]`, e.g. `energy=0.8`
        #[arg(long = "target", value_parser = parse_audio_target)]
        targets: Vec<AudioTarget>,

        #[arg(long)]
        embeddings: Option<PathBuf>,

        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Print the playlist as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search songs by name, artist or genre
    Search {
        query: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List the genres present in the catalog
    Genres,

    /// Show recorded training episodes
    History {
        /// Restrict to one training run
        #[arg(long)]
        run: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Generate shell completions
    ///
    /// Usage: playlist-rl completion bash > ~/.local/share/bash-completion/completions/playlist-rl
    Completion {
        shell: Shell,

        /// Bash script that also completes `--seed` with song ids
        #[arg(long)]
        enhanced: bool,
    },

    /// List song ids for completion (hidden command)
    #[command(hide = true)]
    CompleteSongs,
}

/// Parse `attribute=value` or `attribute=value:tolerance`.
pub fn parse_audio_target(raw: &str) -> Result<AudioTarget, String> {
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected attribute=value, got '{raw}'"))?;
    let attribute = Attribute::from_name(name.trim()).ok_or_else(|| format!("unknown attribute '{name}'"))?;

    let (value, tolerance) = match rest.split_once(':') {
        Some((value, tolerance)) => (value, Some(tolerance)),
        None => (rest, None),
    };
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid value '{value}'"))?;

    let mut target = AudioTarget::new(attribute, value);
    if let Some(tolerance) = tolerance {
        target.tolerance = tolerance
            .trim()
            .parse()
            .map_err(|_| format!("invalid tolerance '{tolerance}'"))?;
    }
    Ok(target)
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
    fn test_parse_generate() {
        let args = Args::parse_from([
            "playlist-rl",
            "--db",
            "x.db",
            "generate",
            "--seed",
            "abc",
            "-g",
            "pop",
            "-g",
            "rock",
            "--target",
            "energy=0.8",
        ]);
        assert_eq!(args.db, Some(PathBuf::from("x.db")));
        match args.command {
            Command::Generate {
                seed, length, genres, targets, ..
            } => {
                assert_eq!(seed.as_deref(), Some("abc"));
                assert_eq!(length, 20);
                assert_eq!(genres, vec!["pop", "rock"]);
                assert_eq!(targets, vec![AudioTarget::new(Attribute::Energy, 0.8)]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_audio_target() {
        let target = parse_audio_target("tempo=120").unwrap();
        assert_eq!(target.attribute, Attribute::Tempo);
        assert!((target.tolerance - 30.0).abs() < 1e-12);

        let target = parse_audio_target("valence=0.3:0.05").unwrap();
        assert!((target.tolerance - 0.05).abs() < 1e-12);

        assert!(parse_audio_target("energy").is_err());
        assert!(parse_audio_target("loudest=1").is_err());
        assert!(parse_audio_target("energy=high").is_err());
    }
}
