//! # playlist-rl
//!
//! Command-line front end: imports a song catalog into SQLite, trains the
//! DQN playlist agent, and generates playlists from a seed song.
//!
//! ## Usage
//!
//! ```bash
//! playlist-rl import songs.json
//! playlist-rl train --episodes 300
//! playlist-rl generate --seed <song id> --length 20
//! playlist-rl history
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG=debug` for per-episode
//! output.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::info;
use playlist_rl::config::{AppConfig, RuntimeConfig};
use playlist_rl::embedding::{self, EmbeddingStore};
use playlist_rl::generator::{Constraints, PlaylistRequest, Session};
use playlist_rl::song::Catalog;
use playlist_rl::{cli, completion, config, db};
use std::fs;
use std::path::Path;

/// Catalog from the database plus embeddings from `embeddings`, the
/// default embeddings file, or the audio features, in that order.
fn open_session(runtime: &RuntimeConfig, app: &AppConfig, embeddings: Option<&Path>) -> Result<Session> {
    let conn = db::init_database(&runtime.db_path)?;
    let catalog = db::load_catalog(&conn, app.catalog_limit)
        .context("No songs in the database. Run `playlist-rl import <songs.json>` first")?;

    let store = match embeddings {
        Some(path) => EmbeddingStore::load(&config::absolute(path)?, app.embedding_dimension())?,
        None if runtime.embeddings_path.exists() => {
            EmbeddingStore::load(&runtime.embeddings_path, app.embedding_dimension())?
        }
        None => {
            info!("No embeddings file, deriving embeddings from audio features");
            embedding::derive_from_features(&catalog, &app.features)?
        }
    };

    Ok(Session::new(catalog, store, app.session_settings())?)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::Args::parse();
    let mut app = config::load_config(args.config.as_deref())?;
    let mut runtime = RuntimeConfig::new()?;
    if let Some(db_path) = &args.db {
        runtime = runtime.with_db_path(db_path)?;
    }

    match args.command {
        cli::Command::Import { path, limit } => {
            let path = config::absolute(&path)?;
            info!("Importing songs from {}", path.display());
            let catalog = Catalog::from_json_file(&path, limit)?;
            let mut conn = db::init_database(&runtime.db_path)?;
            db::import_songs(&mut conn, catalog.songs())?;
            println!("{} songs in {}", db::song_count(&conn)?, runtime.db_path.display());
        }
        cli::Command::Embed { output } => {
            let conn = db::init_database(&runtime.db_path)?;
            let catalog = db::load_catalog(&conn, app.catalog_limit)?;
            let store = embedding::derive_from_features(&catalog, &app.features)?;

            let output = match output {
                Some(path) => config::absolute(&path)?,
                None => runtime.embeddings_path.clone(),
            };
            ensure_parent(&output)?;
            store.save_text(&output, &catalog)?;
            println!("Wrote {} embeddings of dimension {} to {}", store.len(), store.dimension(), output.display());
        }
        cli::Command::Train {
            episodes,
            preset,
            embeddings,
            model,
        } => {
            if let Some(episodes) = episodes {
                app.training.episodes = episodes;
            }
            if let Some(preset) = preset {
                app.reward_preset = preset;
                app.reward = None;
            }

            let mut session = open_session(&runtime, &app, embeddings.as_deref())?;
            let mut conn = db::init_database(&runtime.db_path)?;
            let run_id = db::new_run_id();
            info!("Training run {run_id}");

            let report = session.train()?;

            let model_path = match model {
                Some(path) => config::absolute(&path)?,
                None => runtime.model_path.clone(),
            };
            ensure_parent(&model_path)?;
            session.save_model(&model_path)?;
            db::record_run(&mut conn, &run_id, &report)?;

            println!(
                "{run_id}: {} episodes ({} aborted), mean reward {:.2}, model saved to {}",
                report.episodes.len(),
                report.aborted(),
                report.mean_reward(),
                model_path.display()
            );
            if let Some(best) = report.best_episode() {
                println!("Best episode {} with reward {:.2}", best.episode, best.total_reward);
            }
        }
        cli::Command::Generate {
            seed,
            length,
            genres,
            min_popularity,
            min_year,
            targets,
            embeddings,
            model,
            json,
        } => {
            let mut session = open_session(&runtime, &app, embeddings.as_deref())?;
            let model_path = match model {
                Some(path) => config::absolute(&path)?,
                None => runtime.model_path.clone(),
            };
            session
                .load_model(&model_path)
                .with_context(|| format!("No usable model at {}. Run `playlist-rl train` first", model_path.display()))?;

            let filtered = !genres.is_empty() || min_popularity.is_some() || min_year.is_some() || !targets.is_empty();
            let request = PlaylistRequest {
                seed_song_id: seed,
                length,
                constraints: filtered.then(|| Constraints {
                    genres,
                    min_popularity,
                    min_year,
                    audio_targets: targets,
                    ..Default::default()
                }),
            };
            let playlist = session.generate_playlist(&request)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&playlist)?);
            } else {
                for (i, song) in playlist.songs.iter().enumerate() {
                    println!("{:>3}. {} [{}]", i + 1, song.display_name(), song.id);
                }
                println!("Score: {:.2}/10", playlist.score);
            }
        }
        cli::Command::Search { query, limit } => {
            let session = open_session(&runtime, &app, None)?;
            for song in session.search_songs(&query, limit) {
                println!(
                    "{}  {}  ({})",
                    song.id,
                    song.display_name(),
                    song.genre.as_deref().unwrap_or("Unknown")
                );
            }
        }
        cli::Command::Genres => {
            let session = open_session(&runtime, &app, None)?;
            for genre in session.genres() {
                println!("{genre}");
            }
        }
        cli::Command::History { run, limit } => {
            let conn = db::init_database(&runtime.db_path)?;
            let records = db::episode_history(&conn, run.as_deref(), limit)?;
            if records.is_empty() {
                println!("No training episodes recorded");
            }
            for record in records {
                println!(
                    "{} #{:<4} steps {:>3}  reward {:>8.2}  epsilon {:.3}{}",
                    record.run_id,
                    record.episode,
                    record.steps,
                    record.total_reward,
                    record.epsilon,
                    record.aborted.map(|r| format!("  aborted: {r}")).unwrap_or_default()
                );
            }
        }
        cli::Command::Completion { shell, enhanced } => {
            if enhanced {
                if shell != cli::Shell::Bash {
                    bail!("Enhanced completions are only available for bash");
                }
                print!("{}", completion::enhanced_bash_completion());
            } else {
                let mut cmd = cli::Args::command();
                completion::generate_completions(completion::shell_to_completion_shell(shell), &mut cmd);
            }
        }
        cli::Command::CompleteSongs => {
            completion::print_song_completions(&runtime.db_path)?;
        }
    }

    Ok(())
}
