//! Song → fixed-length feature vectors for similarity and diversity scoring.
//!
//! Extraction is total: each attribute lookup falls back through the
//! configured [`MissingFieldPolicy`]. Only [`MissingFieldPolicy::Strict`]
//! can fail. Interaction features are always derived from the (normalised)
//! base features, never looked up.

use crate::error::{PlaylistError, Result};
use crate::song::{Attribute, Catalog, Song};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Feature vector used only for similarity/diversity, never as an identity.
pub type FeatureVector = Array1<f64>;

/// Number of base features (one per [`Attribute`]).
pub const BASE_FEATURES: usize = 14;
/// Base features plus the eight derived interactions.
pub const EXTENDED_FEATURES: usize = 22;

/// Which features to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLayout {
    /// 14 normalised base attributes.
    Base,
    /// Base attributes followed by 8 interaction features.
    #[default]
    Extended,
}

impl FeatureLayout {
    pub const fn dimension(self) -> usize {
        match self {
            FeatureLayout::Base => BASE_FEATURES,
            FeatureLayout::Extended => EXTENDED_FEATURES,
        }
    }
}

/// What to substitute when a song lacks an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MissingFieldPolicy {
    /// Documented constant per attribute (see [`Fallback::fixed`]).
    #[default]
    Fixed,
    /// Midpoint of the attribute's stand-in range.
    Midpoint,
    /// Uniform sample in the stand-in range, reproducible per (seed, song id).
    Seeded { seed: u64 },
    /// Refuse to impute.
    Strict,
}

/// Default constant and stand-in range for one attribute.
#[derive(Debug, Clone, Copy)]
pub struct Fallback {
    pub fixed: f64,
    pub low: f64,
    pub high: f64,
    /// Integer-valued attribute (key, mode, time signature).
    pub discrete: bool,
}

impl Fallback {
    const fn continuous(fixed: f64, low: f64, high: f64) -> Self {
        Self { fixed, low, high, discrete: false }
    }

    const fn discrete(fixed: f64, low: f64, high: f64) -> Self {
        Self { fixed, low, high, discrete: true }
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        if self.discrete {
            // Bounds are small integers by construction.
            #[allow(clippy::cast_possible_truncation)]
            let value = rng.gen_range(self.low as i64..=self.high as i64);
            #[allow(clippy::cast_precision_loss)]
            let value = value as f64;
            value
        } else {
            rng.gen_range(self.low..self.high)
        }
    }
}

/// Fallback table, indexed like [`Attribute::ALL`].
#[must_use]
pub const fn fallback(attr: Attribute) -> Fallback {
    match attr {
        Attribute::Danceability => Fallback::continuous(0.5, 0.3, 0.7),
        Attribute::Energy => Fallback::continuous(0.5, 0.3, 0.7),
        Attribute::Valence => Fallback::continuous(0.5, 0.2, 0.8),
        Attribute::Tempo => Fallback::continuous(120.0, 80.0, 160.0),
        Attribute::Loudness => Fallback::continuous(-10.0, -20.0, -5.0),
        Attribute::Speechiness => Fallback::continuous(0.1, 0.0, 0.3),
        Attribute::Acousticness => Fallback::continuous(0.5, 0.1, 0.9),
        Attribute::Instrumentalness => Fallback::continuous(0.1, 0.0, 0.8),
        Attribute::Liveness => Fallback::continuous(0.1, 0.05, 0.4),
        Attribute::Key => Fallback::discrete(6.0, 0.0, 11.0),
        Attribute::Mode => Fallback::discrete(0.5, 0.0, 1.0),
        Attribute::TimeSignature => Fallback::discrete(4.0, 3.0, 5.0),
        Attribute::DurationMs => Fallback::continuous(200_000.0, 120_000.0, 300_000.0),
        Attribute::Popularity => Fallback::continuous(50.0, 20.0, 80.0),
    }
}

/// Resolved raw attributes plus the derived feature vector of one song.
///
/// This is what the reward model consumes; it never sees a [`Song`].
#[derive(Debug, Clone, PartialEq)]
pub struct SongProfile {
    pub features: FeatureVector,
    raw: [f64; BASE_FEATURES],
}

impl SongProfile {
    /// Build a profile directly from resolved raw attributes.
    pub fn new(features: FeatureVector, raw: [f64; BASE_FEATURES]) -> Self {
        Self { features, raw }
    }

    /// Resolved (imputed where missing) raw value of `attr`.
    #[must_use]
    pub fn raw(&self, attr: Attribute) -> f64 {
        self.raw[attr as usize]
    }

    pub fn tempo(&self) -> f64 {
        self.raw(Attribute::Tempo)
    }

    pub fn energy(&self) -> f64 {
        self.raw(Attribute::Energy)
    }

    pub fn popularity(&self) -> f64 {
        self.raw(Attribute::Popularity)
    }

    /// Pitch class 0..=11.
    #[must_use]
    pub fn pitch_class(&self) -> i64 {
        #[allow(clippy::cast_possible_truncation)]
        let key = self.raw(Attribute::Key).round() as i64;
        key.rem_euclid(12)
    }
}

/// Deterministic song → feature mapping under a missing-field policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureExtractor {
    #[serde(default)]
    pub layout: FeatureLayout,
    #[serde(default)]
    pub policy: MissingFieldPolicy,
}

impl FeatureExtractor {
    pub fn new(layout: FeatureLayout, policy: MissingFieldPolicy) -> Self {
        Self { layout, policy }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.layout.dimension()
    }

    /// Raw attribute values in [`Attribute::ALL`] order, imputed per policy.
    pub fn resolve(&self, song: &Song) -> Result<[f64; BASE_FEATURES]> {
        let mut rng = match self.policy {
            MissingFieldPolicy::Seeded { seed } => Some(StdRng::seed_from_u64(seed ^ fnv1a(&song.id))),
            _ => None,
        };

        let mut raw = [0.0; BASE_FEATURES];
        for (slot, attr) in raw.iter_mut().zip(Attribute::ALL) {
            *slot = match song.attribute(attr) {
                Some(value) => value,
                None => {
                    let fb = fallback(attr);
                    match (&self.policy, rng.as_mut()) {
                        (MissingFieldPolicy::Seeded { .. }, Some(rng)) => fb.sample(rng),
                        (MissingFieldPolicy::Midpoint, _) => fb.midpoint(),
                        (MissingFieldPolicy::Strict, _) => {
                            return Err(PlaylistError::MissingField {
                                song_id: song.id.clone(),
                                field: attr.name(),
                            })
                        }
                        _ => fb.fixed,
                    }
                }
            };
        }
        Ok(raw)
    }

    pub fn extract(&self, song: &Song) -> Result<FeatureVector> {
        let raw = self.resolve(song)?;
        Ok(self.features_from_raw(&raw))
    }

    pub fn profile(&self, song: &Song) -> Result<SongProfile> {
        let raw = self.resolve(song)?;
        Ok(SongProfile {
            features: self.features_from_raw(&raw),
            raw,
        })
    }

    /// Profiles for the whole catalog, in catalog order.
    pub fn profiles(&self, catalog: &Catalog) -> Result<Vec<SongProfile>> {
        catalog
            .songs()
            .par_iter()
            .map(|song| self.profile(song))
            .collect()
    }

    /// Normalise raw attributes and append interactions for the layout.
    #[must_use]
    pub fn features_from_raw(&self, raw: &[f64; BASE_FEATURES]) -> FeatureVector {
        let get = |attr: Attribute| raw[attr as usize];

        let dance = get(Attribute::Danceability);
        let energy = get(Attribute::Energy);
        let valence = get(Attribute::Valence);
        let tempo = (get(Attribute::Tempo) / 200.0).min(1.0);
        let loudness = ((get(Attribute::Loudness) + 60.0) / 60.0).max(0.0);
        let speech = get(Attribute::Speechiness);
        let acoustic = get(Attribute::Acousticness);
        let instrumental = get(Attribute::Instrumentalness);
        let live = get(Attribute::Liveness);

        let mut features = Vec::with_capacity(self.dimension());
        features.extend_from_slice(&[
            dance,
            energy,
            valence,
            tempo,
            loudness,
            speech,
            acoustic,
            instrumental,
            live,
            get(Attribute::Key) / 11.0,
            get(Attribute::Mode),
            (get(Attribute::TimeSignature) - 3.0) / 4.0,
            (get(Attribute::DurationMs) / 300_000.0).min(1.0),
            get(Attribute::Popularity) / 100.0,
        ]);

        if self.layout == FeatureLayout::Extended {
            features.extend_from_slice(&[
                dance * energy,
                valence * energy,
                1.0 - acoustic,
                tempo * valence,
                loudness / energy.max(0.1),
                speech + live,
                (valence - 0.5).abs() * 2.0,
                instrumental * (1.0 - speech),
            ]);
        }

        Array1::from(features)
    }
}

/// Cosine similarity; zero when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let norm = a.dot(a).sqrt() * b.dot(b).sqrt();
    if norm <= f64::EPSILON {
        0.0
    } else {
        a.dot(b) / norm
    }
}

/// Stable string hash so seeded imputation survives toolchain upgrades.
fn fnv1a(value: &str) -> u64 {
    value.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_song() -> Song {
        Song {
            id: "full".to_string(),
            danceability: Some(0.8),
            energy: Some(0.6),
            valence: Some(0.9),
            tempo: Some(100.0),
            loudness: Some(-6.0),
            speechiness: Some(0.05),
            acousticness: Some(0.2),
            instrumentalness: Some(0.0),
            liveness: Some(0.1),
            key: Some(5.0),
            mode: Some(1.0),
            time_signature: Some(4.0),
            duration_ms: Some(210_000.0),
            popularity: Some(64.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_dimensions() {
        let song = full_song();
        let base = FeatureExtractor::new(FeatureLayout::Base, MissingFieldPolicy::Fixed);
        let extended = FeatureExtractor::new(FeatureLayout::Extended, MissingFieldPolicy::Fixed);

        assert_eq!(base.extract(&song).unwrap().len(), 14);
        assert_eq!(extended.extract(&song).unwrap().len(), 22);
    }

    #[test]
    fn test_normalisation_and_interactions() {
        let extractor = FeatureExtractor::default();
        let features = extractor.extract(&full_song()).unwrap();

        assert!((features[3] - 0.5).abs() < 1e-12, "tempo / 200");
        assert!((features[4] - 0.9).abs() < 1e-12, "(loudness + 60) / 60");
        assert!((features[11] - 0.25).abs() < 1e-12, "(time_signature - 3) / 4");
        assert!((features[13] - 0.64).abs() < 1e-12, "popularity / 100");
        assert!((features[14] - 0.48).abs() < 1e-12, "danceability * energy");
        assert!((features[16] - 0.8).abs() < 1e-12, "1 - acousticness");
        assert!((features[20] - 0.8).abs() < 1e-12, "|valence - 0.5| * 2");
    }

    #[test]
    fn test_fixed_policy_is_total() {
        let extractor = FeatureExtractor::default();
        let empty = Song::with_id("empty");
        let profile = extractor.profile(&empty).unwrap();

        assert_eq!(profile.tempo(), 120.0);
        assert_eq!(profile.energy(), 0.5);
        assert_eq!(profile.popularity(), 50.0);
        assert_eq!(profile.pitch_class(), 6);
        assert!(profile.features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_midpoint_policy() {
        let extractor = FeatureExtractor::new(FeatureLayout::Base, MissingFieldPolicy::Midpoint);
        let raw = extractor.resolve(&Song::with_id("m")).unwrap();

        assert_eq!(raw[Attribute::Tempo as usize], 120.0);
        assert_eq!(raw[Attribute::Popularity as usize], 50.0);
        assert_eq!(raw[Attribute::Liveness as usize], 0.225);
    }

    #[test]
    fn test_seeded_policy_is_reproducible_and_in_range() {
        let extractor = FeatureExtractor::new(FeatureLayout::Extended, MissingFieldPolicy::Seeded { seed: 7 });
        let song = Song::with_id("track-1");

        let first = extractor.resolve(&song).unwrap();
        let second = extractor.resolve(&song).unwrap();
        assert_eq!(first, second);

        for attr in Attribute::ALL {
            let fb = fallback(attr);
            let value = first[attr as usize];
            assert!(value >= fb.low && value <= fb.high, "{} out of range: {value}", attr.name());
        }

        let other = extractor.resolve(&Song::with_id("track-2")).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_present_values_ignore_policy() {
        let song = full_song();
        let fixed = FeatureExtractor::new(FeatureLayout::Extended, MissingFieldPolicy::Fixed);
        let seeded = FeatureExtractor::new(FeatureLayout::Extended, MissingFieldPolicy::Seeded { seed: 1 });
        assert_eq!(fixed.extract(&song).unwrap(), seeded.extract(&song).unwrap());
    }

    #[test]
    fn test_strict_policy_reports_field() {
        let extractor = FeatureExtractor::new(FeatureLayout::Base, MissingFieldPolicy::Strict);
        let mut song = full_song();
        song.tempo = None;

        match extractor.extract(&song) {
            Err(PlaylistError::MissingField { field, .. }) => assert_eq!(field, "tempo"),
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_cosine_similarity_edges() {
        let a = Array1::from(vec![1.0, 0.0]);
        let b = Array1::from(vec![0.0, 2.0]);
        let zero = Array1::from(vec![0.0, 0.0]);

        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
    }
}
