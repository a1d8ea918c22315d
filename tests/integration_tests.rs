//! # Integration Tests
//!
//! End-to-end checks through the public API: catalog import into SQLite,
//! training, model persistence and generation, the environment and agent
//! contracts, and the command-line binary.

use anyhow::Result;
use ndarray::Array1;
use playlist_rl::embedding::{derive_from_features, EmbeddingStore};
use playlist_rl::environment::{EnvironmentConfig, PlaylistEnvironment};
use playlist_rl::features::{cosine_similarity, FeatureExtractor, FeatureLayout, MissingFieldPolicy};
use playlist_rl::generator::{Constraints, PlaylistRequest, Session, SessionSettings};
use playlist_rl::replay::Transition;
use playlist_rl::reward::{RewardConfig, RewardPreset};
use playlist_rl::trainer::TrainingConfig;
use playlist_rl::{db, AgentConfig, Catalog, DqnAgent, PlaylistError, QFunction, Song};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

/// Songs with distinct, fully specified audio features.
fn sample_songs(count: usize) -> Vec<Song> {
    let genres = ["Pop", "Rock", "Electronic", "Jazz"];
    (0..count)
        .map(|i| {
            let x = i as f64;
            Song {
                id: format!("song{i:03}"),
                name: Some(format!("Title {i}")),
                artist: Some(format!("Artist {}", i % 5)),
                album: Some(format!("Album {}", i % 7)),
                genre: Some(genres[i % genres.len()].to_string()),
                release_date: Some(format!("{}-03-01", 1990 + i % 30)),
                explicit: Some(i % 4 == 0),
                danceability: Some((0.2 + 0.07 * x) % 1.0),
                energy: Some((0.9 - 0.05 * x).rem_euclid(1.0)),
                valence: Some((0.1 + 0.13 * x) % 1.0),
                tempo: Some(80.0 + (x * 11.0) % 90.0),
                loudness: Some(-20.0 + (x * 1.7) % 18.0),
                speechiness: Some(0.05),
                acousticness: Some((0.3 * x) % 1.0),
                instrumentalness: Some(0.0),
                liveness: Some(0.1),
                key: Some((i % 12) as f64),
                mode: Some((i % 2) as f64),
                time_signature: Some(4.0),
                duration_ms: Some(180_000.0 + x * 1000.0),
                popularity: Some((20.0 + x * 7.0) % 100.0),
                ..Default::default()
            }
        })
        .collect()
}

fn fast_settings() -> SessionSettings {
    SessionSettings {
        features: FeatureExtractor::new(FeatureLayout::Extended, MissingFieldPolicy::Fixed),
        reward: RewardConfig::preset(RewardPreset::Improved),
        environment: EnvironmentConfig {
            max_playlist_length: 6,
            seed: Some(11),
        },
        agent: AgentConfig {
            hidden_layers: vec![16, 8],
            seed: Some(5),
            ..Default::default()
        },
        training: TrainingConfig {
            episodes: 5,
            batch_size: 8,
            target_update_interval: 2,
            max_steps_per_episode: Some(10),
            log_every: 0,
        },
    }
}

fn write_catalog(dir: &Path, songs: &[Song]) -> Result<PathBuf> {
    let path = dir.join("songs.json");
    std::fs::write(&path, serde_json::to_string(songs)?)?;
    Ok(path)
}

#[cfg(test)]
mod workflow_tests {
    use super::*;

    #[test]
    fn test_import_train_save_load_generate() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog_path = write_catalog(dir.path(), &sample_songs(24))?;

        let mut conn = db::init_database(&dir.path().join("playlists.db"))?;
        let imported = Catalog::from_json_file(&catalog_path, None)?;
        db::import_songs(&mut conn, imported.songs())?;
        let catalog = db::load_catalog(&conn, Some(20))?;
        assert_eq!(catalog.len(), 20);

        let settings = fast_settings();
        let embeddings = derive_from_features(&catalog, &settings.features)?;
        let mut session = Session::new(catalog.clone(), embeddings.clone(), settings.clone())?;

        let run_id = db::new_run_id();
        let report = session.train_with(|summary| {
            db::record_episode(&conn, &run_id, summary).unwrap();
        })?;
        assert_eq!(report.episodes.len(), 5);
        assert_eq!(db::episode_history(&conn, Some(&run_id), 100)?.len(), 5);

        let model_path = dir.path().join("models/dqn_model.json");
        std::fs::create_dir_all(model_path.parent().unwrap())?;
        session.save_model(&model_path)?;

        let mut restored = Session::new(catalog.clone(), embeddings, settings)?;
        restored.load_model(&model_path)?;

        let seed = catalog.songs()[3].id.clone();
        let request = PlaylistRequest {
            seed_song_id: Some(seed.clone()),
            length: 8,
            constraints: None,
        };
        let original = session.generate_playlist(&request)?;
        let reloaded = restored.generate_playlist(&request)?;

        assert_eq!(original.songs.len(), 8);
        assert_eq!(original.songs[0].id, seed);
        let ids = |p: &playlist_rl::generator::GeneratedPlaylist| p.songs.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&original), ids(&reloaded));
        assert_eq!(original.metrics.num_songs, 8);
        Ok(())
    }

    #[test]
    fn test_generation_respects_genre_constraint() -> Result<()> {
        let catalog = Catalog::new(sample_songs(40))?;
        let settings = fast_settings();
        let embeddings = derive_from_features(&catalog, &settings.features)?;
        let mut session = Session::new(catalog, embeddings, settings)?;
        session.train()?;

        let playlist = session.generate_playlist(&PlaylistRequest {
            seed_song_id: Some("song001".to_string()),
            length: 6,
            constraints: Some(Constraints {
                genres: vec!["JAZZ".to_string()],
                min_candidates: 1,
                ..Default::default()
            }),
        })?;

        assert_eq!(playlist.songs.len(), 6);
        assert!(playlist.songs[1..]
            .iter()
            .all(|s| s.genre.as_deref() == Some("Jazz")));
        Ok(())
    }

    #[test]
    fn test_generation_without_model_is_refused() -> Result<()> {
        let catalog = Catalog::new(sample_songs(5))?;
        let embeddings = derive_from_features(&catalog, &FeatureExtractor::default())?;
        let session = Session::new(catalog, embeddings, fast_settings())?;

        let result = session.generate_playlist(&PlaylistRequest {
            length: 3,
            ..Default::default()
        });
        assert!(matches!(result, Err(PlaylistError::ModelNotLoaded)));
        Ok(())
    }
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    fn five_song_env() -> PlaylistEnvironment {
        let catalog = Arc::new(Catalog::new(sample_songs(5)).unwrap());
        let extractor = FeatureExtractor::new(FeatureLayout::Base, MissingFieldPolicy::Fixed);
        let embeddings = derive_from_features(&catalog, &extractor).unwrap();
        PlaylistEnvironment::new(
            catalog,
            &embeddings,
            &extractor,
            RewardConfig::default(),
            EnvironmentConfig {
                max_playlist_length: 5,
                seed: Some(0),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_five_song_scenario() {
        let mut env = five_song_env();
        env.reset_with(0).unwrap();

        let step = env.step(2);
        assert!(!step.done);
        assert_eq!(env.playlist(), &[0, 2]);

        let profiles = env.profiles();
        let breakdown = step.info.breakdown.expect("valid step has a breakdown");
        let expected_cosine = cosine_similarity(&profiles[0].features, &profiles[2].features);
        assert!((breakdown.cosine - expected_cosine).abs() < 1e-12);
        let expected = env.reward_model().reward(&[&profiles[0]], &profiles[2], 2);
        assert!((step.reward - expected).abs() < 1e-12);

        let again = env.step(2);
        assert!(again.done);
        assert!(again.info.invalid_action);
        assert_eq!(again.reward, env.reward_model().invalid_action_penalty());
    }

    #[test]
    fn test_selected_and_available_partition_the_catalog() {
        let mut env = five_song_env();
        env.reset().unwrap();
        while !env.is_done() {
            let next = env.available().iter().next().unwrap();
            env.step(next);

            for i in 0..5 {
                let selected = env.playlist().contains(&i);
                assert_ne!(selected, env.available().contains(i), "song {i}");
            }
        }
        assert_eq!(env.playlist().len(), 5);
        assert!(env.available().is_empty());
    }

    #[test]
    fn test_epsilon_decay_and_target_sync() {
        let config = AgentConfig {
            epsilon_start: 1.0,
            epsilon_min: 0.5,
            epsilon_decay: 0.9,
            hidden_layers: vec![8],
            seed: Some(3),
            ..Default::default()
        };
        let mut agent = DqnAgent::new(3, 4, config).unwrap();
        for i in 0..6_usize {
            let state = Array1::from(vec![i as f64, 1.0, 0.0]);
            agent.remember(Transition::new(state.clone(), i % 4, 1.0, state, i == 5));
        }

        assert_eq!(agent.replay(10).unwrap(), None, "too few transitions");
        assert_eq!(agent.epsilon(), 1.0);

        for n in 1..=10 {
            assert!(agent.replay(4).unwrap().is_some());
            let expected = (0.9_f64.powi(n)).max(0.5);
            assert!((agent.epsilon() - expected).abs() < 1e-12, "after {n} replays");
        }

        agent.update_target_model().unwrap();
        let states = ndarray::array![[0.5, 1.0, -1.0], [2.0, 0.0, 3.0]];
        assert_eq!(
            agent.online().predict(states.view()).unwrap(),
            agent.target().predict(states.view()).unwrap()
        );
    }

    #[test]
    fn test_embeddings_text_roundtrip_feeds_environment() -> Result<()> {
        let dir = TempDir::new()?;
        let catalog = Catalog::new(sample_songs(6))?;
        let extractor = FeatureExtractor::default();
        let store = derive_from_features(&catalog, &extractor)?;

        let path = dir.path().join("embeddings.txt");
        store.save_text(&path, &catalog)?;
        let loaded = EmbeddingStore::load(&path, extractor.dimension())?;
        assert_eq!(loaded.len(), 6);

        let env = PlaylistEnvironment::new(
            Arc::new(catalog),
            &loaded,
            &extractor,
            RewardConfig::default(),
            EnvironmentConfig::default(),
        )?;
        assert_eq!(env.state_size(), extractor.dimension());
        assert_eq!(env.action_size(), 6);
        Ok(())
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    fn bin() -> Command {
        Command::new(env!("CARGO_BIN_EXE_playlist-rl"))
    }

    #[test]
    fn test_cli_help_displays_correctly() {
        let output = bin().arg("--help").output().expect("Failed to run help command");
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(output.status.success());
        for sub in ["import", "train", "generate", "history"] {
            assert!(stdout.contains(sub), "{sub} missing from help");
        }
    }

    #[test]
    fn test_cli_import_search_train_generate() -> Result<()> {
        let dir = TempDir::new()?;
        let db_path = dir.path().join("cli.db");
        let model_path = dir.path().join("model.json");
        let config_path = dir.path().join("config.json");
        let catalog_path = write_catalog(dir.path(), &sample_songs(12))?;
        std::fs::write(
            &config_path,
            r#"{ "agent": { "hidden_layers": [8], "seed": 1 },
                 "training": { "episodes": 3, "batch_size": 4, "log_every": 0 },
                 "environment": { "max_playlist_length": 4, "seed": 2 } }"#,
        )?;

        let run = |args: &[&str]| {
            bin()
                .arg("--db")
                .arg(&db_path)
                .arg("--config")
                .arg(&config_path)
                .args(args)
                .output()
                .expect("Failed to run binary")
        };

        let import = run(&["import", catalog_path.to_str().unwrap()]);
        assert!(import.status.success(), "{}", String::from_utf8_lossy(&import.stderr));
        assert!(String::from_utf8_lossy(&import.stdout).contains("12 songs"));

        let search = run(&["search", "artist 3"]);
        assert!(search.status.success());
        assert_eq!(String::from_utf8_lossy(&search.stdout).lines().count(), 2);

        let generate = run(&["generate", "--model", model_path.to_str().unwrap()]);
        assert!(!generate.status.success(), "no model trained yet");

        let train = run(&["train", "--model", model_path.to_str().unwrap()]);
        assert!(train.status.success(), "{}", String::from_utf8_lossy(&train.stderr));
        assert!(model_path.exists());

        let generate = run(&[
            "generate",
            "--model",
            model_path.to_str().unwrap(),
            "--seed",
            "song005",
            "--length",
            "4",
            "--json",
        ]);
        assert!(generate.status.success(), "{}", String::from_utf8_lossy(&generate.stderr));
        let playlist: serde_json::Value = serde_json::from_slice(&generate.stdout)?;
        assert_eq!(playlist["songs"].as_array().map(Vec::len), Some(4));
        assert_eq!(playlist["songs"][0]["id"], "song005");

        let history = run(&["history"]);
        assert!(history.status.success());
        assert_eq!(String::from_utf8_lossy(&history.stdout).lines().count(), 3);
        Ok(())
    }
}
