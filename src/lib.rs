//! Reinforcement-learning playlist sequencing.
//!
//! A Deep Q-Network agent learns to order songs so that consecutive tracks
//! are similar but not repetitive, the playlist stays diverse, popular
//! songs are favoured and energy/tempo flow smoothly.
//!
//! Core modules:
//! - [`features`] - Song → normalised feature vector, missing-field policies
//! - [`embedding`] - Read-only song id → embedding store
//! - [`reward`] - Parameterised reward model, presets and playlist metrics
//! - [`environment`] - Playlist-building MDP
//! - [`replay`] - Experience replay memory
//! - [`network`] - Q-function seam and the MLP approximator
//! - [`agent`] - DQN agent (epsilon-greedy, replay, target network)
//! - [`trainer`] - Episode loop
//! - [`generator`] - Session: training, model persistence, generation
//!
//! ### Supporting Modules
//!
//! - [`config`] - Data directory, paths and the tunables file
//! - [`db`] - SQLite catalog and training history
//! - [`cli`], [`completion`] - Command-line definitions and shell completion
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use playlist_rl::embedding::derive_from_features;
//! use playlist_rl::features::FeatureExtractor;
//! use playlist_rl::generator::{PlaylistRequest, Session, SessionSettings};
//! use playlist_rl::song::Catalog;
//! use std::path::Path;
//!
//! let catalog = Catalog::from_json_file(Path::new("songs.json"), Some(10_000))?;
//! let embeddings = derive_from_features(&catalog, &FeatureExtractor::default())?;
//! let mut session = Session::new(catalog, embeddings, SessionSettings::default())?;
//!
//! session.train()?;
//! let playlist = session.generate_playlist(&PlaylistRequest {
//!     seed_song_id: None,
//!     length: 20,
//!     constraints: None,
//! })?;
//! println!("score {:.2}", playlist.score);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! Library modules return [`error::PlaylistError`]. Invalid actions and
//! too-short histories are not errors: they show up as a penalty reward
//! and the base reward respectively. `db`, `config` and the binary use
//! `anyhow` for context-rich messages.

pub mod actions;
pub mod agent;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod environment;
pub mod error;
pub mod features;
pub mod generator;
pub mod network;
pub mod replay;
pub mod reward;
pub mod song;
pub mod trainer;

pub use agent::{AgentConfig, DqnAgent};
pub use embedding::EmbeddingStore;
pub use environment::{EnvironmentConfig, PlaylistEnvironment};
pub use error::{PlaylistError, Result};
pub use features::{FeatureExtractor, MissingFieldPolicy};
pub use generator::Session;
pub use network::{MlpQNetwork, QFunction};
pub use reward::{RewardConfig, RewardModel, RewardPreset};
pub use song::{Catalog, Song};
