//! Read-only song id → embedding vector store.
//!
//! Embeddings are produced outside the learning core (the `embed` command
//! derives them from standardised feature vectors) and loaded once before an
//! environment is built. Nothing mutates a store after loading.
//!
//! ## Text format
//!
//! ```text
//! # embedding: 0 1 2 ...
//! <song id> <v1> <v2> ... <vd>
//! ```
//!
//! Values past the configured dimension are ignored; lines with fewer are
//! skipped with a warning.

use crate::error::{PlaylistError, Result};
use crate::features::FeatureExtractor;
use crate::song::Catalog;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub type Embedding = Array1<f64>;

#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    dimension: usize,
    vectors: HashMap<String, Embedding>,
}

impl EmbeddingStore {
    /// Build a store from `(id, vector)` pairs, checking every dimension.
    pub fn from_entries<I>(dimension: usize, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        if dimension == 0 {
            return Err(PlaylistError::InvalidConfig(
                "embedding dimension must be positive".to_string(),
            ));
        }

        let mut vectors = HashMap::new();
        for (id, values) in entries {
            if values.len() != dimension {
                return Err(PlaylistError::EmbeddingDimension {
                    song_id: id,
                    expected: dimension,
                    found: values.len(),
                });
            }
            vectors.insert(id, Array1::from(values));
        }

        Ok(Self { dimension, vectors })
    }

    /// Load by extension: `.json` is a `{ "id": [..] }` object, anything
    /// else is the whitespace text format.
    pub fn load(path: &Path, dimension: usize) -> Result<Self> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let store = if is_json {
            Self::load_json(path, dimension)?
        } else {
            Self::load_text(path, dimension)?
        };

        info!(
            "Loaded {} embeddings (dimension {}) from {}",
            store.len(),
            dimension,
            path.display()
        );
        Ok(store)
    }

    pub fn load_text(path: &Path, dimension: usize) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse_text(&raw, dimension)
    }

    /// Parse the text format. Malformed lines are skipped, not fatal.
    pub fn parse_text(raw: &str, dimension: usize) -> Result<Self> {
        let mut entries = Vec::new();

        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let Some(id) = parts.next() else { continue };
            let values: std::result::Result<Vec<f64>, _> =
                parts.take(dimension).map(str::parse::<f64>).collect();

            match values {
                Ok(values) if values.len() == dimension => entries.push((id.to_string(), values)),
                Ok(values) => warn!(
                    "Skipping embedding line {} for '{}': expected {} values, found {}",
                    line_no + 1,
                    id,
                    dimension,
                    values.len()
                ),
                Err(e) => warn!("Skipping embedding line {} for '{}': {}", line_no + 1, id, e),
            }
        }

        Self::from_entries(dimension, entries)
    }

    pub fn load_json(path: &Path, dimension: usize) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let map: HashMap<String, Vec<f64>> = serde_json::from_str(&raw)?;
        Self::from_entries(dimension, map)
    }

    /// Write the text format, one line per song in `order` that has a vector.
    pub fn save_text(&self, path: &Path, order: &Catalog) -> Result<()> {
        let header: Vec<String> = (0..self.dimension).map(|i| i.to_string()).collect();
        let mut out = format!("# embedding: {}\n", header.join(" "));

        for song in order.songs() {
            if let Some(vector) = self.vectors.get(&song.id) {
                let values: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
                out.push_str(&format!("{} {}\n", song.id, values.join(" ")));
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, out)?;
        debug!("Wrote {} embeddings to {}", self.len(), path.display());
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Embedding> {
        self.vectors.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Embeddings from z-score standardised feature vectors.
///
/// Columns with zero variance are left centred at zero.
pub fn derive_from_features(catalog: &Catalog, extractor: &FeatureExtractor) -> Result<EmbeddingStore> {
    let profiles = extractor.profiles(catalog)?;
    let dimension = extractor.dimension();

    let mut matrix = Array2::<f64>::zeros((profiles.len(), dimension));
    for (mut row, profile) in matrix.axis_iter_mut(Axis(0)).zip(&profiles) {
        row.assign(&profile.features);
    }

    if let Some(mean) = matrix.mean_axis(Axis(0)) {
        let std = matrix.std_axis(Axis(0), 0.0);
        for mut row in matrix.axis_iter_mut(Axis(0)) {
            row -= &mean;
            row.zip_mut_with(&std, |v, &s| {
                if s > f64::EPSILON {
                    *v /= s;
                }
            });
        }
    }

    let entries = catalog
        .songs()
        .iter()
        .zip(matrix.axis_iter(Axis(0)))
        .map(|(song, row)| (song.id.clone(), row.to_vec()));

    EmbeddingStore::from_entries(dimension, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureLayout, MissingFieldPolicy};
    use crate::song::Song;

    #[test]
    fn test_parse_text_skips_short_and_bad_lines() {
        let raw = "# embedding: 0 1 2\n\
                   a 0.1 0.2 0.3\n\
                   b 0.5 0.5\n\
                   c 1 2 3 4 5\n\
                   d 1 x 3\n";
        let store = EmbeddingStore::parse_text(raw, 3).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").unwrap().to_vec(), vec![0.1, 0.2, 0.3]);
        assert_eq!(store.get("c").unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
        assert!(!store.contains("b"));
        assert!(!store.contains("d"));
    }

    #[test]
    fn test_from_entries_checks_dimension() {
        let result = EmbeddingStore::from_entries(2, vec![("x".to_string(), vec![1.0])]);
        assert!(matches!(
            result,
            Err(PlaylistError::EmbeddingDimension { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_text_and_json_loading_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(vec![Song::with_id("a"), Song::with_id("b")]).unwrap();
        let store = EmbeddingStore::from_entries(
            2,
            vec![("a".to_string(), vec![1.0, 2.0]), ("b".to_string(), vec![-0.5, 0.25])],
        )
        .unwrap();

        let text_path = dir.path().join("embeddings.txt");
        store.save_text(&text_path, &catalog).unwrap();
        let reloaded = EmbeddingStore::load(&text_path, 2).unwrap();
        assert_eq!(reloaded.get("b"), store.get("b"));

        let json_path = dir.path().join("embeddings.json");
        fs::write(&json_path, r#"{"a": [1.0, 2.0]}"#).unwrap();
        let from_json = EmbeddingStore::load(&json_path, 2).unwrap();
        assert_eq!(from_json.len(), 1);
    }

    #[test]
    fn test_save_text_writes_catalog_order_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog =
            Catalog::new(vec![Song::with_id("b"), Song::with_id("none"), Song::with_id("a")]).unwrap();
        let store = EmbeddingStore::from_entries(
            2,
            vec![("a".to_string(), vec![1.0, 2.0]), ("b".to_string(), vec![-0.5, 0.25])],
        )
        .unwrap();

        let path = dir.path().join("nested/embeddings.txt");
        store.save_text(&path, &catalog).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines, vec!["# embedding: 0 1", "b -0.5 0.25", "a 1 2"]);
        assert!(written.ends_with('\n'));

        let reloaded = EmbeddingStore::parse_text(&written, 2).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("a"), store.get("a"));
    }

    #[test]
    fn test_derived_embeddings_are_standardised() {
        let songs = (0..4)
            .map(|i| {
                let mut song = Song::with_id(format!("s{i}"));
                song.energy = Some(0.2 * f64::from(i));
                song
            })
            .collect();
        let catalog = Catalog::new(songs).unwrap();
        let extractor = FeatureExtractor::new(FeatureLayout::Base, MissingFieldPolicy::Fixed);

        let store = derive_from_features(&catalog, &extractor).unwrap();
        assert_eq!(store.dimension(), 14);

        let energy: Vec<f64> = (0..4).map(|i| store.get(&format!("s{i}")).unwrap()[1]).collect();
        let mean: f64 = energy.iter().sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-9);
        // Constant columns stay at zero.
        assert!(store.get("s0").unwrap()[3].abs() < 1e-12);
    }
}
