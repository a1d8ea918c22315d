//! Session object tying catalog, embeddings, training and generation together.
//!
//! A [`Session`] owns everything a front end needs between requests: the
//! loaded catalog and embeddings, the configuration, the trained (or loaded)
//! agent and a bounded training log. Create one per process with
//! [`Session::new`]; dropping it releases everything.
//!
//! Generation uses the greedy policy: exploration is for training only.

use crate::agent::{AgentConfig, DqnAgent};
use crate::embedding::EmbeddingStore;
use crate::environment::{EnvironmentConfig, PlaylistEnvironment};
use crate::error::{PlaylistError, Result};
use crate::features::{FeatureExtractor, SongProfile};
use crate::reward::statistics::{evaluate_playlist, PlaylistMetrics};
use crate::reward::RewardConfig;
use crate::song::{Attribute, Catalog, Song};
use crate::trainer::{EpisodeSummary, Trainer, TrainingConfig, TrainingReport};
use log::{info, log, warn, Level};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Everything tunable about a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub features: FeatureExtractor,
    pub reward: RewardConfig,
    pub environment: EnvironmentConfig,
    pub agent: AgentConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub level: String,
    pub message: String,
}

/// Training log that drops its oldest half once it grows past `max_entries`.
#[derive(Debug, Clone)]
pub struct TrainingLog {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    keep: usize,
}

impl Default for TrainingLog {
    fn default() -> Self {
        Self::new(1000, 500)
    }
}

impl TrainingLog {
    pub fn new(max_entries: usize, keep: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
            keep: keep.min(max_entries),
        }
    }

    /// Record and forward to the `log` facade.
    pub fn push(&mut self, level: Level, message: impl Into<String>) {
        let message = message.into();
        log!(level, "{message}");

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        self.entries.push_back(LogEntry {
            timestamp,
            level: level.to_string(),
            message,
        });

        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.keep;
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Keep songs whose attribute lies within `tolerance` of `target`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioTarget {
    pub attribute: Attribute,
    pub target: f64,
    pub tolerance: f64,
}

impl AudioTarget {
    /// Target with the default tolerance for the attribute's scale.
    pub fn new(attribute: Attribute, target: f64) -> Self {
        let tolerance = match attribute {
            Attribute::Tempo => 30.0,
            Attribute::Loudness => 6.0,
            Attribute::Popularity => 20.0,
            _ => 0.2,
        };
        Self { attribute, target, tolerance }
    }
}

/// Candidate filters for generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// Accepted genres (case-insensitive); empty accepts all.
    pub genres: Vec<String>,
    pub min_popularity: Option<f64>,
    pub min_year: Option<i32>,
    /// Songs lacking the attribute are not filtered by it.
    pub audio_targets: Vec<AudioTarget>,
    /// Below this many admitted candidates, excluded songs are re-admitted.
    pub min_candidates: usize,
    /// Re-admission stops once this many candidates are admitted.
    pub refill_target: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            genres: Vec::new(),
            min_popularity: None,
            min_year: None,
            audio_targets: Vec::new(),
            min_candidates: 50,
            refill_target: 100,
        }
    }
}

impl Constraints {
    #[must_use]
    pub fn admits(&self, song: &Song) -> bool {
        if !self.genres.is_empty() {
            let genre = song.genre.as_deref().unwrap_or("Unknown");
            if !self.genres.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                return false;
            }
        }

        if let Some(min) = self.min_popularity {
            if song.attribute(Attribute::Popularity).unwrap_or(0.0) < min {
                return false;
            }
        }

        if let Some(min_year) = self.min_year {
            match song.release_year() {
                Some(year) if year >= min_year => {}
                _ => return false,
            }
        }

        self.audio_targets.iter().all(|target| {
            song.attribute(target.attribute)
                .map_or(true, |value| (value - target.target).abs() <= target.tolerance)
        })
    }

    /// Catalog indices to withhold, never including `keep`.
    fn excluded_indices(&self, catalog: &Catalog, keep: Option<usize>) -> Vec<usize> {
        let mut excluded = Vec::new();
        let mut admitted = 0;
        for (i, song) in catalog.songs().iter().enumerate() {
            if Some(i) == keep {
                continue;
            }
            if self.admits(song) {
                admitted += 1;
            } else {
                excluded.push(i);
            }
        }

        if admitted < self.min_candidates && !excluded.is_empty() {
            warn!(
                "Only {admitted} songs satisfy the constraints; re-admitting up to {}",
                self.refill_target
            );
            let readmit = self.refill_target.saturating_sub(admitted).min(excluded.len());
            excluded.drain(..readmit);
        }
        excluded
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistRequest {
    /// Random seed song when absent.
    pub seed_song_id: Option<String>,
    /// Total songs including the seed.
    pub length: usize,
    #[serde(default)]
    pub constraints: Option<Constraints>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPlaylist {
    pub songs: Vec<Song>,
    /// Step rewards of every song after the seed.
    pub rewards: Vec<f64>,
    /// 0–10 evaluation score.
    pub score: f64,
    pub metrics: PlaylistMetrics,
}

pub struct Session {
    catalog: Arc<Catalog>,
    embeddings: EmbeddingStore,
    profiles: Arc<[SongProfile]>,
    settings: SessionSettings,
    agent: Option<DqnAgent>,
    log: TrainingLog,
}

impl Session {
    /// Profiles are extracted once here; data errors surface before any
    /// training starts.
    pub fn new(catalog: Catalog, embeddings: EmbeddingStore, settings: SessionSettings) -> Result<Self> {
        settings.reward.validate()?;
        settings.agent.validate()?;
        let profiles: Arc<[SongProfile]> = settings.features.profiles(&catalog)?.into();

        info!(
            "Session ready: {} songs, {} embeddings (dimension {})",
            catalog.len(),
            embeddings.len(),
            embeddings.dimension()
        );

        Ok(Self {
            catalog: Arc::new(catalog),
            embeddings,
            profiles,
            settings,
            agent: None,
            log: TrainingLog::default(),
        })
    }

    fn environment(&self, config: EnvironmentConfig) -> Result<PlaylistEnvironment> {
        PlaylistEnvironment::with_profiles(
            Arc::clone(&self.catalog),
            Arc::clone(&self.profiles),
            &self.embeddings,
            self.settings.reward.clone(),
            config,
        )
    }

    pub fn train(&mut self) -> Result<TrainingReport> {
        self.train_with(|_| {})
    }

    /// Train a fresh agent and install it. `observer` sees every episode.
    pub fn train_with<F: FnMut(&EpisodeSummary)>(&mut self, mut observer: F) -> Result<TrainingReport> {
        let mut env = self.environment(self.settings.environment)?;
        let mut agent = DqnAgent::new(env.state_size(), env.action_size(), self.settings.agent.clone())?;
        let trainer = Trainer::new(self.settings.training.clone())?;

        self.log.push(
            Level::Info,
            format!(
                "Training started: {} episodes over {} songs",
                trainer.config().episodes,
                env.action_size()
            ),
        );

        let log = &mut self.log;
        let report = trainer.run_with(&mut env, &mut agent, |summary| {
            match &summary.aborted {
                Some(reason) => log.push(Level::Error, format!("Episode {} aborted: {reason}", summary.episode)),
                None => log.push(
                    Level::Debug,
                    format!(
                        "Episode {}: {} steps, reward {:.2}, epsilon {:.3}",
                        summary.episode, summary.steps, summary.total_reward, summary.epsilon
                    ),
                ),
            }
            observer(summary);
        });

        self.log.push(
            Level::Info,
            format!(
                "Training finished: mean reward {:.2}, {} aborted episodes",
                report.mean_reward(),
                report.aborted()
            ),
        );
        self.agent = Some(agent);
        Ok(report)
    }

    /// Load model parameters. On failure no model is installed, so
    /// generation refuses to run.
    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        self.agent = None;
        let mut agent = DqnAgent::new(self.embeddings.dimension(), self.catalog.len(), self.settings.agent.clone())?;
        match agent.load(path) {
            Ok(()) => {
                self.log.push(Level::Info, format!("Loaded model from {}", path.display()));
                self.agent = Some(agent);
                Ok(())
            }
            Err(e) => {
                self.log.push(Level::Error, format!("Failed to load model: {e}"));
                Err(e)
            }
        }
    }

    pub fn save_model(&self, path: &Path) -> Result<()> {
        self.agent.as_ref().ok_or(PlaylistError::ModelNotLoaded)?.save(path)
    }

    #[must_use]
    pub fn has_model(&self) -> bool {
        self.agent.is_some()
    }

    /// Build a playlist greedily from the installed model.
    ///
    /// # Errors
    ///
    /// [`PlaylistError::ModelNotLoaded`] without a trained or loaded model,
    /// [`PlaylistError::UnknownSong`] for an unknown seed id.
    pub fn generate_playlist(&self, request: &PlaylistRequest) -> Result<GeneratedPlaylist> {
        let agent = self.agent.as_ref().ok_or(PlaylistError::ModelNotLoaded)?;
        let seed = request
            .seed_song_id
            .as_deref()
            .map(|id| {
                self.catalog
                    .index_of(id)
                    .ok_or_else(|| PlaylistError::UnknownSong(id.to_string()))
            })
            .transpose()?;

        let mut env = self.environment(EnvironmentConfig {
            max_playlist_length: request.length.max(1),
            seed: self.settings.environment.seed,
        })?;

        if let Some(constraints) = &request.constraints {
            let excluded = constraints.excluded_indices(&self.catalog, seed);
            info!(
                "{} of {} songs available after constraints",
                self.catalog.len() - excluded.len(),
                self.catalog.len()
            );
            env.exclude(excluded);
        }

        let mut state = match seed {
            Some(index) => env.reset_with(index)?,
            None => env.reset()?,
        };

        let mut rewards = Vec::new();
        while !env.is_done() {
            let action = agent.act_greedy(&state, env.available())?;
            let step = env.step(action);
            rewards.push(step.reward);
            state = step.state;
        }

        let songs: Vec<&Song> = env.playlist_songs().collect();
        let profiles: Vec<&SongProfile> = env.playlist().iter().map(|&i| &self.profiles[i]).collect();
        let score = evaluate_playlist(&songs, &self.embeddings);
        info!("Generated playlist of {} songs, score {score:.2}", songs.len());

        Ok(GeneratedPlaylist {
            songs: songs.into_iter().cloned().collect(),
            rewards,
            score,
            metrics: PlaylistMetrics::compute(&profiles),
        })
    }

    /// Case-insensitive substring match on name, artist and genre.
    pub fn search_songs(&self, query: &str, limit: usize) -> Vec<&Song> {
        let query = query.to_lowercase();
        let matches = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|value| value.to_lowercase().contains(&query))
        };

        self.catalog
            .songs()
            .iter()
            .filter(|song| matches(&song.name) || matches(&song.artist) || matches(&song.genre))
            .take(limit)
            .collect()
    }

    /// Distinct genres present in the catalog, sorted.
    pub fn genres(&self) -> Vec<String> {
        self.catalog
            .songs()
            .iter()
            .filter_map(|song| song.genre.as_deref())
            .filter(|genre| !genre.is_empty() && *genre != "Unknown")
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn training_log(&self) -> &TrainingLog {
        &self.log
    }

    pub fn clear_training_log(&mut self) {
        self.log.clear();
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn embeddings(&self) -> &EmbeddingStore {
        &self.embeddings
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}
