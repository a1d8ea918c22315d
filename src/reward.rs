//! Step reward for placing a candidate song after a playlist history.
//!
//! One parameterised model covers every historical scoring variant; the
//! variants survive as [`RewardPreset`]s. The reward is an unbounded real
//! used for relative ranking during learning and is never clamped.
//!
//! ## Terms
//!
//! - **similarity**: cosine similarity to the previous song, mapped through a
//!   [`SimilarityCurve`] (optimal band, penalty above a threshold)
//! - **diversity**: variance/range/key statistics over a trailing window,
//!   capped
//! - **popularity**: banded bonus on the average popularity of the previous
//!   song and the candidate
//! - **flow** (optional): smoothness of energy and tempo jumps
//!
//! An empty history short-circuits to `first_song_reward`.

use crate::error::{PlaylistError, Result};
use crate::features::{cosine_similarity, SongProfile};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Named parameterisations of the reward model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RewardPreset {
    /// Similarity to the previous song plus dissimilarity to recent songs
    /// and a per-position length bonus.
    Baseline,
    /// Optimal similarity band, feature-variance diversity, popularity bands
    /// and energy/tempo flow.
    #[default]
    Improved,
    /// Strong over-similarity penalties and tempo/energy/key diversity.
    DiversityFocused,
}

/// Shape of the similarity term above a penalty threshold. Both shapes
/// stay at or below the value the curve has at the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SimilarityPenalty {
    /// Decline from the curve's value at `threshold` with slope
    /// `multiplier` (in units of the scale applied at the threshold). Above
    /// the optional `severe` threshold the slope becomes its multiplier.
    Linear {
        threshold: f64,
        multiplier: f64,
        #[serde(default)]
        severe: Option<(f64, f64)>,
    },
    /// Constant `value` above `threshold`; the `severe` value replaces it
    /// above the second threshold.
    Step {
        threshold: f64,
        value: f64,
        #[serde(default)]
        severe: Option<(f64, f64)>,
    },
}

impl SimilarityPenalty {
    #[must_use]
    pub fn threshold(&self) -> f64 {
        match *self {
            SimilarityPenalty::Linear { threshold, .. } | SimilarityPenalty::Step { threshold, .. } => threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityCurve {
    /// Inclusive `(low, high)` band scored with `optimal_scale`.
    pub optimal_band: (f64, f64),
    pub optimal_scale: f64,
    pub outside_scale: f64,
    #[serde(default)]
    pub penalty: Option<SimilarityPenalty>,
}

impl SimilarityCurve {
    fn scale_at(&self, similarity: f64) -> f64 {
        let (low, high) = self.optimal_band;
        if (low..=high).contains(&similarity) {
            self.optimal_scale
        } else {
            self.outside_scale
        }
    }

    /// Similarity term for a raw cosine similarity.
    #[must_use]
    pub fn value(&self, similarity: f64) -> f64 {
        let Some(penalty) = self.penalty.filter(|p| similarity > p.threshold()) else {
            return similarity * self.scale_at(similarity);
        };

        match penalty {
            SimilarityPenalty::Linear {
                threshold,
                multiplier,
                severe,
            } => {
                let scale = self.scale_at(threshold);
                let mut adjusted = threshold * scale - (similarity - threshold) * multiplier * scale;
                if let Some((severe_threshold, severe_multiplier)) = severe {
                    if similarity > severe_threshold {
                        adjusted -= (similarity - severe_threshold) * (severe_multiplier - multiplier) * scale;
                    }
                }
                adjusted
            }
            SimilarityPenalty::Step { value, severe, .. } => match severe {
                Some((severe_threshold, severe_value)) if similarity > severe_threshold => severe_value,
                _ => value,
            },
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let (low, high) = self.optimal_band;
        if low > high {
            return Err(format!("similarity band is inverted: ({low}, {high})"));
        }
        let Some(penalty) = self.penalty else {
            return Ok(());
        };

        let threshold = penalty.threshold();
        let anchor = threshold * self.scale_at(threshold);
        match penalty {
            SimilarityPenalty::Linear { multiplier, severe, .. } => {
                if !(multiplier.is_finite() && multiplier >= 0.0) {
                    return Err(format!("penalty multiplier must be non-negative, got {multiplier}"));
                }
                if let Some((severe_threshold, severe_multiplier)) = severe {
                    if severe_threshold < threshold || severe_multiplier.is_nan() || severe_multiplier < multiplier {
                        return Err("severe penalty must start later and be at least as steep".to_string());
                    }
                }
            }
            SimilarityPenalty::Step { value, severe, .. } => {
                if value.is_nan() || value > anchor {
                    return Err(format!("step penalty {value} exceeds the curve value {anchor} at the threshold"));
                }
                if let Some((severe_threshold, severe_value)) = severe {
                    if severe_threshold < threshold || severe_value.is_nan() || severe_value > value {
                        return Err("severe step must start later and not exceed the step value".to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Weights of the diversity statistics over the trailing window.
///
/// The window is the last `window` songs including the candidate. With
/// fewer songs placed the term is `warmup_reward`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiversityConfig {
    pub window: usize,
    #[serde(default)]
    pub tempo_variance_weight: f64,
    #[serde(default)]
    pub energy_variance_weight: f64,
    #[serde(default)]
    pub energy_range_weight: f64,
    #[serde(default)]
    pub key_weight: f64,
    #[serde(default)]
    pub feature_variance_weight: f64,
    /// Weight of `1 - mean cosine(candidate, earlier window songs)`.
    #[serde(default)]
    pub dissimilarity_weight: f64,
    pub cap: f64,
    #[serde(default)]
    pub warmup_reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityBands {
    /// Inclusive `(low, high, reward)`; first match wins.
    pub bands: Vec<(f64, f64, f64)>,
    pub fallback: f64,
}

impl PopularityBands {
    #[must_use]
    pub fn value(&self, average_popularity: f64) -> f64 {
        self.bands
            .iter()
            .find(|(low, high, _)| (*low..=*high).contains(&average_popularity))
            .map_or(self.fallback, |(_, _, reward)| *reward)
    }
}

/// `max(0, base - |Δenergy| * energy_weight - |Δtempo| / tempo_divisor)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub base: f64,
    pub energy_weight: f64,
    pub tempo_divisor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub similarity: f64,
    pub diversity: f64,
    pub popularity: f64,
    pub flow: f64,
}

impl RewardWeights {
    /// Sum of all weights; logged when an environment is built.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.similarity + self.diversity + self.popularity + self.flow
    }
}

/// Bonus for a diverse step; optionally only inside a similarity band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonusTier {
    pub min_diversity: f64,
    #[serde(default)]
    pub similarity_band: Option<(f64, f64)>,
    pub bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub first_song_reward: f64,
    pub invalid_action_penalty: f64,
    pub similarity: SimilarityCurve,
    pub diversity: DiversityConfig,
    pub popularity: PopularityBands,
    #[serde(default)]
    pub flow: Option<FlowConfig>,
    pub weights: RewardWeights,
    #[serde(default)]
    pub length_bonus: f64,
    #[serde(default)]
    pub bonus_tiers: Vec<BonusTier>,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self::preset(RewardPreset::default())
    }
}

impl RewardConfig {
    #[must_use]
    pub fn preset(preset: RewardPreset) -> Self {
        match preset {
            RewardPreset::Baseline => Self {
                first_song_reward: 1.0,
                invalid_action_penalty: -10.0,
                similarity: SimilarityCurve {
                    optimal_band: (-1.0, 1.0),
                    optimal_scale: 5.0,
                    outside_scale: 5.0,
                    penalty: None,
                },
                diversity: DiversityConfig {
                    window: 4,
                    tempo_variance_weight: 0.0,
                    energy_variance_weight: 0.0,
                    energy_range_weight: 0.0,
                    key_weight: 0.0,
                    feature_variance_weight: 0.0,
                    dissimilarity_weight: 3.0,
                    cap: 6.0,
                    warmup_reward: 0.0,
                },
                popularity: PopularityBands {
                    bands: Vec::new(),
                    fallback: 0.0,
                },
                flow: None,
                weights: RewardWeights {
                    similarity: 1.0,
                    diversity: 1.0,
                    popularity: 0.0,
                    flow: 0.0,
                },
                length_bonus: 0.5,
                bonus_tiers: Vec::new(),
            },
            RewardPreset::Improved => Self {
                first_song_reward: 5.0,
                invalid_action_penalty: -10.0,
                similarity: SimilarityCurve {
                    optimal_band: (0.7, 0.85),
                    optimal_scale: 10.0,
                    outside_scale: 5.0,
                    penalty: Some(SimilarityPenalty::Linear {
                        threshold: 0.85,
                        multiplier: 2.0,
                        severe: None,
                    }),
                },
                diversity: DiversityConfig {
                    window: 3,
                    tempo_variance_weight: 0.0,
                    energy_variance_weight: 0.0,
                    energy_range_weight: 0.0,
                    key_weight: 0.0,
                    feature_variance_weight: 20.0,
                    dissimilarity_weight: 0.0,
                    cap: 5.0,
                    warmup_reward: 0.0,
                },
                popularity: PopularityBands {
                    bands: vec![(50.0, 70.0, 3.0), (40.0, 80.0, 2.0)],
                    fallback: 1.0,
                },
                flow: Some(FlowConfig {
                    base: 3.0,
                    energy_weight: 5.0,
                    tempo_divisor: 50.0,
                }),
                weights: RewardWeights {
                    similarity: 1.0,
                    diversity: 1.0,
                    popularity: 1.0,
                    flow: 1.0,
                },
                length_bonus: 0.0,
                bonus_tiers: vec![BonusTier {
                    min_diversity: 1.0,
                    similarity_band: Some((0.7, 0.85)),
                    bonus: 1.0,
                }],
            },
            RewardPreset::DiversityFocused => Self {
                first_song_reward: 10.0,
                invalid_action_penalty: -20.0,
                similarity: SimilarityCurve {
                    optimal_band: (0.5, 0.7),
                    optimal_scale: 8.0,
                    outside_scale: 4.0,
                    penalty: Some(SimilarityPenalty::Step {
                        threshold: 0.8,
                        value: -5.0,
                        severe: Some((0.9, -10.0)),
                    }),
                },
                diversity: DiversityConfig {
                    window: 3,
                    tempo_variance_weight: 0.1,
                    energy_variance_weight: 15.0,
                    energy_range_weight: 0.0,
                    key_weight: 3.0,
                    feature_variance_weight: 0.0,
                    dissimilarity_weight: 0.0,
                    cap: 15.0,
                    warmup_reward: 5.0,
                },
                popularity: PopularityBands {
                    bands: vec![(30.0, 70.0, 3.0)],
                    fallback: 1.0,
                },
                flow: None,
                weights: RewardWeights {
                    similarity: 1.0,
                    diversity: 1.0,
                    popularity: 1.0,
                    flow: 0.0,
                },
                length_bonus: 0.0,
                bonus_tiers: vec![
                    BonusTier { min_diversity: 12.0, similarity_band: None, bonus: 5.0 },
                    BonusTier { min_diversity: 9.0, similarity_band: None, bonus: 3.0 },
                    BonusTier { min_diversity: 6.0, similarity_band: None, bonus: 1.5 },
                ],
            },
        }
    }

    /// Reject configurations that cannot produce a finite reward.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PlaylistError::InvalidConfig(msg));

        if self.diversity.window < 3 {
            return invalid(format!("diversity window must be at least 3, got {}", self.diversity.window));
        }
        if let Err(msg) = self.similarity.validate() {
            return invalid(msg);
        }
        if let Some(flow) = &self.flow {
            if flow.tempo_divisor <= 0.0 {
                return invalid("flow tempo_divisor must be positive".to_string());
            }
        }

        let scalars = [
            self.first_song_reward,
            self.invalid_action_penalty,
            self.weights.total(),
            self.length_bonus,
            self.diversity.cap,
        ];
        if scalars.iter().any(|v| !v.is_finite()) {
            return invalid("reward parameters must be finite".to_string());
        }
        Ok(())
    }
}

/// Every term of one step reward. `total` is what the agent sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    /// `true` when the history was empty and only the base reward applied.
    pub first_song: bool,
    /// Raw cosine similarity to the previous song.
    pub cosine: f64,
    pub similarity: f64,
    pub diversity: f64,
    pub popularity: f64,
    pub flow: f64,
    pub length_bonus: f64,
    pub bonus: f64,
    pub total: f64,
}

/// Pure `(history, candidate, position) → reward`.
#[derive(Debug, Clone)]
pub struct RewardModel {
    config: RewardConfig,
}

impl RewardModel {
    pub fn new(config: RewardConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            "Reward model: weights sum to {:.3}, penalty {}",
            config.weights.total(),
            config.invalid_action_penalty
        );
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    #[must_use]
    pub fn first_song_reward(&self) -> f64 {
        self.config.first_song_reward
    }

    #[must_use]
    pub fn invalid_action_penalty(&self) -> f64 {
        self.config.invalid_action_penalty
    }

    pub fn reward(&self, history: &[&SongProfile], candidate: &SongProfile, position: usize) -> f64 {
        self.score(history, candidate, position).total
    }

    /// Score `candidate` placed after `history` (oldest first).
    ///
    /// `position` is the playlist length once the candidate is placed.
    #[must_use]
    pub fn score(&self, history: &[&SongProfile], candidate: &SongProfile, position: usize) -> RewardBreakdown {
        let Some(previous) = history.last() else {
            return RewardBreakdown {
                first_song: true,
                total: self.config.first_song_reward,
                ..Default::default()
            };
        };

        let cfg = &self.config;
        let cosine = cosine_similarity(&previous.features, &candidate.features);
        let similarity = cfg.similarity.value(cosine);
        let diversity = self.diversity(history, candidate);
        let popularity = cfg
            .popularity
            .value((previous.popularity() + candidate.popularity()) / 2.0);
        let flow = cfg.flow.map_or(0.0, |flow| {
            let energy_jump = (candidate.energy() - previous.energy()).abs();
            let tempo_jump = (candidate.tempo() - previous.tempo()).abs();
            (flow.base - energy_jump * flow.energy_weight - tempo_jump / flow.tempo_divisor).max(0.0)
        });

        #[allow(clippy::cast_precision_loss)]
        let length_bonus = cfg.length_bonus * position as f64;

        let bonus = cfg
            .bonus_tiers
            .iter()
            .find(|tier| {
                diversity >= tier.min_diversity
                    && tier
                        .similarity_band
                        .map_or(true, |(low, high)| (low..=high).contains(&cosine))
            })
            .map_or(0.0, |tier| tier.bonus);

        let w = &cfg.weights;
        let total = w.similarity * similarity
            + w.diversity * diversity
            + w.popularity * popularity
            + w.flow * flow
            + length_bonus
            + bonus;

        RewardBreakdown {
            first_song: false,
            cosine,
            similarity,
            diversity,
            popularity,
            flow,
            length_bonus,
            bonus,
            total,
        }
    }

    fn diversity(&self, history: &[&SongProfile], candidate: &SongProfile) -> f64 {
        let cfg = &self.config.diversity;
        if history.len() + 1 < cfg.window {
            return cfg.warmup_reward;
        }

        let earlier = &history[history.len() + 1 - cfg.window..];
        let window: Vec<&SongProfile> = earlier.iter().copied().chain(std::iter::once(candidate)).collect();

        let mut value = 0.0;

        if cfg.tempo_variance_weight != 0.0 {
            let tempos: Vec<f64> = window.iter().map(|p| p.tempo()).collect();
            value += cfg.tempo_variance_weight * variance(&tempos);
        }
        if cfg.energy_variance_weight != 0.0 || cfg.energy_range_weight != 0.0 {
            let energies: Vec<f64> = window.iter().map(|p| p.energy()).collect();
            let (min, max) = energies
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &e| (lo.min(e), hi.max(e)));
            value += cfg.energy_variance_weight * variance(&energies) + cfg.energy_range_weight * (max - min);
        }
        if cfg.key_weight != 0.0 {
            let keys: HashSet<i64> = window.iter().map(|p| p.pitch_class()).collect();
            #[allow(clippy::cast_precision_loss)]
            let distinct = keys.len() as f64;
            value += cfg.key_weight * distinct;
        }
        if cfg.feature_variance_weight != 0.0 {
            value += cfg.feature_variance_weight * mean_feature_variance(&window);
        }
        if cfg.dissimilarity_weight != 0.0 {
            #[allow(clippy::cast_precision_loss)]
            let mean_similarity = earlier
                .iter()
                .map(|p| cosine_similarity(&p.features, &candidate.features))
                .sum::<f64>()
                / earlier.len() as f64;
            value += cfg.dissimilarity_weight * (1.0 - mean_similarity);
        }

        value.min(cfg.cap)
    }
}

/// Population variance; zero for fewer than two values.
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Mean over dimensions of the per-dimension variance.
fn mean_feature_variance(profiles: &[&SongProfile]) -> f64 {
    let Some(first) = profiles.first() else { return 0.0 };
    let dims = first.features.len();
    if dims == 0 {
        return 0.0;
    }

    let total: f64 = (0..dims)
        .map(|d| {
            let column: Vec<f64> = profiles.iter().map(|p| p.features[d]).collect();
            variance(&column)
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = total / dims as f64;
    mean
}

/// Whole-playlist metrics and the 0–10 evaluation score.
pub mod statistics {
    use super::{mean_feature_variance, variance};
    use crate::embedding::EmbeddingStore;
    use crate::features::{cosine_similarity, SongProfile};
    use crate::song::{Attribute, Song};
    use serde::Serialize;
    use std::collections::HashSet;

    /// Aggregate quality metrics of a finished playlist.
    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    pub struct PlaylistMetrics {
        pub num_songs: usize,
        /// Mean cosine similarity of consecutive songs.
        pub similarity: f64,
        /// `similarity` minus twice its excess over 0.9.
        pub adjusted_similarity: f64,
        /// Weighted feature/tempo/energy/valence variance, capped at 5.
        pub diversity: f64,
        pub feature_variance: f64,
        /// Tempo variance / 1000.
        pub tempo_variance: f64,
        pub energy_variance: f64,
        pub valence_variance: f64,
        pub popularity: f64,
        pub popularity_score: f64,
        pub avg_energy: f64,
        pub avg_danceability: f64,
        pub avg_valence: f64,
        pub flow_score: f64,
        pub key_diversity: usize,
        pub balance_bonus: f64,
        pub total_score: f64,
    }

    impl PlaylistMetrics {
        /// Metrics for profiles in playlist order. Fewer than two songs
        /// yields all-zero metrics with the song count set.
        #[must_use]
        pub fn compute(playlist: &[&SongProfile]) -> Self {
            if playlist.len() < 2 {
                return Self {
                    num_songs: playlist.len(),
                    ..Default::default()
                };
            }

            let column = |attr: Attribute| -> Vec<f64> { playlist.iter().map(|p| p.raw(attr)).collect() };
            let tempos = column(Attribute::Tempo);
            let energies = column(Attribute::Energy);
            let valences = column(Attribute::Valence);
            let popularities = column(Attribute::Popularity);
            let danceabilities = column(Attribute::Danceability);

            let similarities: Vec<f64> = playlist
                .windows(2)
                .map(|pair| cosine_similarity(&pair[0].features, &pair[1].features))
                .collect();
            let similarity = mean(&similarities);
            let adjusted_similarity = similarity - ((similarity - 0.9) * 2.0).max(0.0);

            let feature_variance = mean_feature_variance(playlist);
            let tempo_variance = variance(&tempos) / 1000.0;
            let energy_variance = variance(&energies);
            let valence_variance = variance(&valences);
            let diversity = (feature_variance * 5.0
                + tempo_variance * 3.0
                + energy_variance * 2.0
                + valence_variance * 2.0)
                .min(5.0);

            let popularity = mean(&popularities);
            let popularity_multiplier = if (50.0..=70.0).contains(&popularity) {
                1.2
            } else if (40.0..=80.0).contains(&popularity) {
                1.0
            } else {
                0.8
            };
            let popularity_score = popularity / 100.0 * 3.0 * popularity_multiplier;

            let energy_flow = 1.0 - mean_abs_diff(&energies);
            let tempo_flow = 1.0 - mean_abs_diff(&tempos) / 50.0;
            let flow_score = (energy_flow + tempo_flow) / 2.0;

            let key_diversity = playlist.iter().map(|p| p.pitch_class()).collect::<HashSet<_>>().len();

            let balance_bonus = if (0.7..=0.85).contains(&similarity) && diversity >= 1.0 {
                1.0
            } else {
                0.0
            };

            let total_score = adjusted_similarity * 0.25 * 10.0
                + diversity * 0.35
                + popularity_score * 0.25
                + flow_score * 0.15 * 5.0
                + balance_bonus;

            Self {
                num_songs: playlist.len(),
                similarity,
                adjusted_similarity,
                diversity,
                feature_variance,
                tempo_variance,
                energy_variance,
                valence_variance,
                popularity,
                popularity_score,
                avg_energy: mean(&energies),
                avg_danceability: mean(&danceabilities),
                avg_valence: mean(&valences),
                flow_score,
                key_diversity,
                balance_bonus,
                total_score,
            }
        }
    }

    /// 0–10 quality score of a generated playlist.
    ///
    /// Consecutive songs are compared by embedding dot product. Songs
    /// without a popularity count as 50.
    #[must_use]
    pub fn evaluate_playlist(playlist: &[&Song], embeddings: &EmbeddingStore) -> f64 {
        let popularity = |song: &&Song| song.attribute(Attribute::Popularity).unwrap_or(50.0);

        match playlist {
            [] => 0.0,
            [only] => popularity(only) / 100.0 * 5.0,
            _ => {
                let avg_popularity = mean(&playlist.iter().map(popularity).collect::<Vec<_>>());
                let similarities: Vec<f64> = playlist
                    .windows(2)
                    .filter_map(|pair| {
                        let a = embeddings.get(&pair[0].id)?;
                        let b = embeddings.get(&pair[1].id)?;
                        Some(a.dot(b))
                    })
                    .collect();

                if similarities.is_empty() {
                    return avg_popularity / 100.0 * 7.0;
                }

                let similarity = mean(&similarities).abs();
                let diversity = 1.0 - similarity;
                ((similarity * 0.4 + diversity * 0.3 + avg_popularity / 100.0 * 0.3) * 10.0).clamp(0.0, 10.0)
            }
        }
    }

    fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = values.len() as f64;
        values.iter().sum::<f64>() / n
    }

    fn mean_abs_diff(values: &[f64]) -> f64 {
        let diffs: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        mean(&diffs)
    }
}
