//! Playlist construction as a Markov decision process.
//!
//! ## Episode lifecycle
//!
//! ```text
//! EMPTY --reset()--> BUILDING --step(valid)*--> TERMINAL
//!                        |                         ^
//!                        +--step(invalid)----------+
//! ```
//!
//! `reset` places one seed song. Each valid `step` moves an action from the
//! available set to the playlist and scores it with the [`RewardModel`].
//! The episode ends when the playlist reaches `max_playlist_length` or no
//! action is left. Stepping with an unavailable action (or at all outside
//! BUILDING) returns the configured penalty and ends the episode without
//! touching the playlist.
//!
//! ## State vector
//!
//! Mean embedding of the selected songs that have one, or zeros.

use crate::actions::ActionSet;
use crate::embedding::EmbeddingStore;
use crate::error::{PlaylistError, Result};
use crate::features::{FeatureExtractor, SongProfile};
use crate::reward::{RewardBreakdown, RewardConfig, RewardModel};
use crate::song::{Catalog, Song};
use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub max_playlist_length: usize,
    /// Seed for the seed-song RNG; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            max_playlist_length: 50,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    /// Constructed, never reset.
    Empty,
    Building,
    /// Absorbing until the next reset.
    Terminal,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    pub invalid_action: bool,
    /// Present for valid steps.
    pub breakdown: Option<RewardBreakdown>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub state: Array1<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

pub struct PlaylistEnvironment {
    catalog: Arc<Catalog>,
    profiles: Arc<[SongProfile]>,
    embeddings: Array2<f64>,
    has_embedding: Vec<bool>,
    reward: RewardModel,
    config: EnvironmentConfig,
    rng: StdRng,

    playlist: Vec<usize>,
    available: ActionSet,
    excluded: ActionSet,
    embedding_sum: Array1<f64>,
    embedded_count: usize,
    phase: EpisodePhase,
}

impl PlaylistEnvironment {
    /// Build an environment, extracting profiles for the whole catalog.
    ///
    /// # Errors
    ///
    /// Fails on an invalid reward or environment configuration and, under
    /// a strict missing-field policy, on songs lacking attributes.
    pub fn new(
        catalog: Arc<Catalog>,
        embeddings: &EmbeddingStore,
        extractor: &FeatureExtractor,
        reward: RewardConfig,
        config: EnvironmentConfig,
    ) -> Result<Self> {
        let profiles: Arc<[SongProfile]> = extractor.profiles(&catalog)?.into();
        Self::with_profiles(catalog, profiles, embeddings, reward, config)
    }

    /// Build from precomputed profiles (one per catalog song, same order).
    pub fn with_profiles(
        catalog: Arc<Catalog>,
        profiles: Arc<[SongProfile]>,
        embeddings: &EmbeddingStore,
        reward: RewardConfig,
        config: EnvironmentConfig,
    ) -> Result<Self> {
        if config.max_playlist_length == 0 {
            return Err(PlaylistError::InvalidConfig(
                "max_playlist_length must be at least 1".to_string(),
            ));
        }
        if profiles.len() != catalog.len() {
            return Err(PlaylistError::InvalidConfig(format!(
                "{} profiles for a catalog of {} songs",
                profiles.len(),
                catalog.len()
            )));
        }

        let n = catalog.len();
        let dim = embeddings.dimension();
        let mut matrix = Array2::<f64>::zeros((n, dim));
        let mut has_embedding = vec![false; n];
        for (i, song) in catalog.songs().iter().enumerate() {
            if let Some(vector) = embeddings.get(&song.id) {
                matrix.row_mut(i).assign(vector);
                has_embedding[i] = true;
            }
        }

        let missing = has_embedding.iter().filter(|has| !**has).count();
        if missing > 0 {
            warn!("{missing} of {n} songs have no embedding and will not contribute to the state");
        }

        let reward = RewardModel::new(reward)?;
        info!(
            "Environment created with {} songs, state size {}, reward weights sum {:.2}",
            n,
            dim,
            reward.config().weights.total()
        );

        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        Ok(Self {
            catalog,
            profiles,
            embeddings: matrix,
            has_embedding,
            reward,
            config,
            rng,
            playlist: Vec::new(),
            available: ActionSet::full(n),
            excluded: ActionSet::empty(n),
            embedding_sum: Array1::zeros(dim),
            embedded_count: 0,
            phase: EpisodePhase::Empty,
        })
    }

    /// Start an episode from a uniformly random seed song.
    ///
    /// # Errors
    ///
    /// [`PlaylistError::NoAvailableActions`] when every song is excluded.
    pub fn reset(&mut self) -> Result<Array1<f64>> {
        self.clear_episode();
        let seed = self
            .available
            .choose(&mut self.rng)
            .ok_or(PlaylistError::NoAvailableActions)?;
        self.place_seed(seed);
        Ok(self.state())
    }

    /// Start an episode from a chosen seed song. An excluded seed is
    /// re-admitted for this placement.
    pub fn reset_with(&mut self, seed: usize) -> Result<Array1<f64>> {
        if seed >= self.catalog.len() {
            return Err(PlaylistError::UnknownSong(format!("#{seed}")));
        }
        self.excluded.remove(seed);
        self.clear_episode();
        self.place_seed(seed);
        Ok(self.state())
    }

    /// Base reward of the seed placement (empty history).
    #[must_use]
    pub fn seed_reward(&self) -> f64 {
        self.reward.first_song_reward()
    }

    /// Apply one action.
    pub fn step(&mut self, action: usize) -> Step {
        if self.phase != EpisodePhase::Building || !self.available.contains(action) {
            debug!("Invalid action {action} in phase {:?}", self.phase);
            self.phase = EpisodePhase::Terminal;
            return Step {
                state: self.state(),
                reward: self.reward.invalid_action_penalty(),
                done: true,
                info: StepInfo {
                    invalid_action: true,
                    breakdown: None,
                },
            };
        }

        self.available.remove(action);
        let breakdown = {
            let history: Vec<&SongProfile> = self.playlist.iter().map(|&i| &self.profiles[i]).collect();
            self.reward
                .score(&history, &self.profiles[action], self.playlist.len() + 1)
        };
        self.push(action);

        let done = self.update_phase();
        Step {
            state: self.state(),
            reward: breakdown.total,
            done,
            info: StepInfo {
                invalid_action: false,
                breakdown: Some(breakdown),
            },
        }
    }

    /// Withhold songs from selection until [`Self::clear_exclusions`].
    /// Songs already in the playlist are unaffected.
    pub fn exclude<I: IntoIterator<Item = usize>>(&mut self, indices: I) {
        for index in indices {
            if index < self.catalog.len() && !self.playlist.contains(&index) {
                self.available.remove(index);
                self.excluded.insert(index);
            }
        }
        if self.phase == EpisodePhase::Building {
            self.update_phase();
        }
    }

    pub fn clear_exclusions(&mut self) {
        let excluded: Vec<usize> = self.excluded.iter().collect();
        for index in excluded {
            self.excluded.remove(index);
            self.available.insert(index);
        }
    }

    /// Mean embedding of the embedded playlist songs, or zeros.
    #[must_use]
    pub fn state(&self) -> Array1<f64> {
        if self.embedded_count == 0 {
            Array1::zeros(self.embeddings.ncols())
        } else {
            #[allow(clippy::cast_precision_loss)]
            let count = self.embedded_count as f64;
            &self.embedding_sum / count
        }
    }

    #[must_use]
    pub fn playlist(&self) -> &[usize] {
        &self.playlist
    }

    /// Playlist as songs, in order.
    pub fn playlist_songs(&self) -> impl Iterator<Item = &Song> + '_ {
        self.playlist.iter().filter_map(|&i| self.catalog.get(i))
    }

    #[must_use]
    pub fn available(&self) -> &ActionSet {
        &self.available
    }

    #[must_use]
    pub fn excluded(&self) -> &ActionSet {
        &self.excluded
    }

    #[must_use]
    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == EpisodePhase::Terminal
    }

    #[must_use]
    pub fn state_size(&self) -> usize {
        self.embeddings.ncols()
    }

    #[must_use]
    pub fn action_size(&self) -> usize {
        self.catalog.len()
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn profiles(&self) -> &[SongProfile] {
        &self.profiles
    }

    #[must_use]
    pub fn reward_model(&self) -> &RewardModel {
        &self.reward
    }

    #[must_use]
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    fn clear_episode(&mut self) {
        for &index in &self.playlist {
            if !self.excluded.contains(index) {
                self.available.insert(index);
            }
        }
        self.playlist.clear();
        self.embedding_sum.fill(0.0);
        self.embedded_count = 0;
        self.phase = EpisodePhase::Empty;
    }

    fn place_seed(&mut self, seed: usize) {
        self.available.remove(seed);
        self.push(seed);
        self.phase = EpisodePhase::Building;
        self.update_phase();
        debug!("Episode seeded with song {seed}");
    }

    fn push(&mut self, index: usize) {
        self.playlist.push(index);
        if self.has_embedding[index] {
            self.embedding_sum += &self.embeddings.row(index);
            self.embedded_count += 1;
        }
    }

    /// Move to TERMINAL when a stop condition holds; returns `done`.
    fn update_phase(&mut self) -> bool {
        let done = self.playlist.len() >= self.config.max_playlist_length || self.available.is_empty();
        if done {
            self.phase = EpisodePhase::Terminal;
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{cosine_similarity, FeatureLayout, MissingFieldPolicy};
    use crate::reward::RewardPreset;
    use std::collections::HashSet;

    fn song(id: &str, energy: f64, tempo: f64, valence: f64, popularity: f64) -> Song {
        Song {
            id: id.to_string(),
            energy: Some(energy),
            tempo: Some(tempo),
            valence: Some(valence),
            popularity: Some(popularity),
            ..Default::default()
        }
    }

    fn five_song_env(max_len: usize) -> PlaylistEnvironment {
        let catalog = Catalog::new(vec![
            song("s0", 0.9, 128.0, 0.8, 65.0),
            song("s1", 0.2, 70.0, 0.2, 30.0),
            song("s2", 0.7, 120.0, 0.6, 55.0),
            song("s3", 0.5, 100.0, 0.4, 80.0),
            song("s4", 0.3, 90.0, 0.9, 45.0),
        ])
        .unwrap();
        let store = EmbeddingStore::from_entries(
            3,
            (0..5).map(|i| (format!("s{i}"), vec![f64::from(i), 1.0, -f64::from(i)])),
        )
        .unwrap();
        let extractor = FeatureExtractor::new(FeatureLayout::Base, MissingFieldPolicy::Fixed);

        PlaylistEnvironment::new(
            Arc::new(catalog),
            &store,
            &extractor,
            RewardConfig::preset(RewardPreset::Improved),
            EnvironmentConfig {
                max_playlist_length: max_len,
                seed: Some(11),
            },
        )
        .unwrap()
    }

    fn assert_partition(env: &PlaylistEnvironment) {
        let selected: HashSet<usize> = env.playlist().iter().copied().collect();
        let available: HashSet<usize> = env.available().iter().collect();
        let excluded: HashSet<usize> = env.excluded().iter().collect();

        assert!(selected.is_disjoint(&available));
        assert!(selected.is_disjoint(&excluded));
        assert!(available.is_disjoint(&excluded));
        let union: HashSet<usize> = selected.iter().chain(&available).chain(&excluded).copied().collect();
        assert_eq!(union.len(), env.action_size());
    }

    #[test]
    fn test_scenario_seed_step_and_repeat() {
        let mut env = five_song_env(50);
        assert_eq!(env.phase(), EpisodePhase::Empty);

        let state = env.reset_with(0).unwrap();
        assert_eq!(state.to_vec(), vec![0.0, 1.0, 0.0]);
        assert_eq!(env.seed_reward(), 5.0);

        let step = env.step(2);
        assert_eq!(env.playlist(), &[0, 2]);
        assert!(!step.done);
        let profiles = env.profiles();
        let expected = env.reward_model().reward(&[&profiles[0]], &profiles[2], 2);
        assert_eq!(step.reward, expected);
        let breakdown = step.info.breakdown.unwrap();
        assert!((breakdown.cosine - cosine_similarity(&profiles[0].features, &profiles[2].features)).abs() < 1e-12);
        assert_eq!(step.state.to_vec(), vec![1.0, 1.0, -1.0]);

        let repeat = env.step(2);
        assert_eq!(repeat.reward, -10.0);
        assert!(repeat.done);
        assert!(repeat.info.invalid_action);
        assert_eq!(env.playlist(), &[0, 2]);
        assert_eq!(env.phase(), EpisodePhase::Terminal);
    }

    #[test]
    fn test_out_of_range_and_terminal_steps_are_invalid() {
        let mut env = five_song_env(50);
        assert!(env.step(1).info.invalid_action, "step before reset");

        env.reset_with(0).unwrap();
        let out = env.step(99);
        assert!(out.done && out.info.invalid_action);

        let after = env.step(1);
        assert!(after.info.invalid_action, "terminal is absorbing");
        assert_eq!(env.playlist(), &[0]);
    }

    #[test]
    fn test_done_at_max_length_not_before() {
        let mut env = five_song_env(3);
        env.reset_with(4).unwrap();
        assert!(!env.step(1).done);
        assert!(env.step(3).done);
        assert_eq!(env.playlist().len(), 3);
    }

    #[test]
    fn test_done_when_available_exhausted() {
        let mut env = five_song_env(50);
        env.reset_with(0).unwrap();
        let dones: Vec<bool> = [1, 2, 3, 4].iter().map(|&a| env.step(a).done).collect();
        assert_eq!(dones, vec![false, false, false, true]);
        assert!(env.available().is_empty());
    }

    #[test]
    fn test_partition_holds_across_random_episodes() {
        let mut env = five_song_env(4);
        for _ in 0..20 {
            env.reset().unwrap();
            assert_partition(&env);
            while !env.is_done() {
                let action = env.available().as_slice()[0];
                env.step(action);
                assert_partition(&env);
            }
        }
    }

    #[test]
    fn test_exclusions_shrink_available() {
        let mut env = five_song_env(50);
        env.exclude([1, 3]);
        env.reset_with(0).unwrap();
        assert_partition(&env);
        assert!(!env.available().contains(1));

        assert!(env.step(3).info.invalid_action);

        env.clear_exclusions();
        env.reset_with(0).unwrap();
        assert_eq!(env.available().len(), 4);
    }

    #[test]
    fn test_reset_with_unknown_index() {
        let mut env = five_song_env(50);
        assert!(matches!(env.reset_with(5), Err(PlaylistError::UnknownSong(_))));
    }

    #[test]
    fn test_zero_state_without_embeddings() {
        let catalog = Arc::new(Catalog::new(vec![Song::with_id("a"), Song::with_id("b")]).unwrap());
        let store = EmbeddingStore::from_entries(4, Vec::new()).unwrap();
        let mut env = PlaylistEnvironment::new(
            catalog,
            &store,
            &FeatureExtractor::default(),
            RewardConfig::default(),
            EnvironmentConfig::default(),
        )
        .unwrap();

        let state = env.reset().unwrap();
        assert_eq!(state.to_vec(), vec![0.0; 4]);
    }
}
