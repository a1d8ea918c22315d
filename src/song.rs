//! Song records and the ordered catalog the environment acts over.
//!
//! A [`Song`] is immutable once loaded. Every audio/meta attribute is
//! optional: lookups go through [`Song::attribute`], which only returns
//! values that are present *and* finite. Anything else is resolved later by
//! the feature extractor's missing-field policy.

use crate::error::{PlaylistError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// How a song---and associated data---is stored in the catalog.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Stable, unique identifier (Spotify track id in collected catalogs).
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`.
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub explicit: Option<bool>,
    /// Query the collector used to find this song.
    #[serde(default)]
    pub search_query: Option<String>,

    #[serde(default)]
    pub danceability: Option<f64>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub valence: Option<f64>,
    /// Beats per minute.
    #[serde(default)]
    pub tempo: Option<f64>,
    /// Decibels, typically -60..0.
    #[serde(default)]
    pub loudness: Option<f64>,
    #[serde(default)]
    pub speechiness: Option<f64>,
    #[serde(default)]
    pub acousticness: Option<f64>,
    #[serde(default)]
    pub instrumentalness: Option<f64>,
    #[serde(default)]
    pub liveness: Option<f64>,
    /// Pitch class, 0..=11.
    #[serde(default)]
    pub key: Option<f64>,
    /// 0 = minor, 1 = major.
    #[serde(default)]
    pub mode: Option<f64>,
    #[serde(default)]
    pub time_signature: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    /// 0..=100.
    #[serde(default)]
    pub popularity: Option<f64>,
}

/// Named numeric attributes of a [`Song`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Danceability,
    Energy,
    Valence,
    Tempo,
    Loudness,
    Speechiness,
    Acousticness,
    Instrumentalness,
    Liveness,
    Key,
    Mode,
    TimeSignature,
    DurationMs,
    Popularity,
}

impl Attribute {
    pub const ALL: [Attribute; 14] = [
        Attribute::Danceability,
        Attribute::Energy,
        Attribute::Valence,
        Attribute::Tempo,
        Attribute::Loudness,
        Attribute::Speechiness,
        Attribute::Acousticness,
        Attribute::Instrumentalness,
        Attribute::Liveness,
        Attribute::Key,
        Attribute::Mode,
        Attribute::TimeSignature,
        Attribute::DurationMs,
        Attribute::Popularity,
    ];

    /// Field name as it appears in catalog JSON and database columns.
    pub const fn name(self) -> &'static str {
        match self {
            Attribute::Danceability => "danceability",
            Attribute::Energy => "energy",
            Attribute::Valence => "valence",
            Attribute::Tempo => "tempo",
            Attribute::Loudness => "loudness",
            Attribute::Speechiness => "speechiness",
            Attribute::Acousticness => "acousticness",
            Attribute::Instrumentalness => "instrumentalness",
            Attribute::Liveness => "liveness",
            Attribute::Key => "key",
            Attribute::Mode => "mode",
            Attribute::TimeSignature => "time_signature",
            Attribute::DurationMs => "duration_ms",
            Attribute::Popularity => "popularity",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|attr| attr.name() == name)
    }
}

impl Song {
    /// Minimal song with only an identifier; mostly useful in tests.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Raw value of `attr` if present and finite.
    #[must_use]
    pub fn attribute(&self, attr: Attribute) -> Option<f64> {
        let value = match attr {
            Attribute::Danceability => self.danceability,
            Attribute::Energy => self.energy,
            Attribute::Valence => self.valence,
            Attribute::Tempo => self.tempo,
            Attribute::Loudness => self.loudness,
            Attribute::Speechiness => self.speechiness,
            Attribute::Acousticness => self.acousticness,
            Attribute::Instrumentalness => self.instrumentalness,
            Attribute::Liveness => self.liveness,
            Attribute::Key => self.key,
            Attribute::Mode => self.mode,
            Attribute::TimeSignature => self.time_signature,
            Attribute::DurationMs => self.duration_ms,
            Attribute::Popularity => self.popularity,
        };
        value.filter(|v| v.is_finite())
    }

    pub fn set_attribute(&mut self, attr: Attribute, value: Option<f64>) {
        let slot = match attr {
            Attribute::Danceability => &mut self.danceability,
            Attribute::Energy => &mut self.energy,
            Attribute::Valence => &mut self.valence,
            Attribute::Tempo => &mut self.tempo,
            Attribute::Loudness => &mut self.loudness,
            Attribute::Speechiness => &mut self.speechiness,
            Attribute::Acousticness => &mut self.acousticness,
            Attribute::Instrumentalness => &mut self.instrumentalness,
            Attribute::Liveness => &mut self.liveness,
            Attribute::Key => &mut self.key,
            Attribute::Mode => &mut self.mode,
            Attribute::TimeSignature => &mut self.time_signature,
            Attribute::DurationMs => &mut self.duration_ms,
            Attribute::Popularity => &mut self.popularity,
        };
        *slot = value;
    }

    /// Four-digit release year, if the release date starts with one.
    #[must_use]
    pub fn release_year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok())
    }

    /// "Artist - Title" for display, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.artist, &self.name) {
            (Some(artist), Some(name)) => format!("{artist} - {name}"),
            (None, Some(name)) => name.clone(),
            _ => self.id.clone(),
        }
    }
}

/// Ordered song universe. Action `i` always means `songs()[i]`.
#[derive(Debug, Clone)]
pub struct Catalog {
    songs: Vec<Song>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog, rejecting empty input and duplicate ids.
    pub fn new(songs: Vec<Song>) -> Result<Self> {
        if songs.is_empty() {
            return Err(PlaylistError::EmptyCatalog);
        }

        let mut index = HashMap::with_capacity(songs.len());
        for (i, song) in songs.iter().enumerate() {
            if index.insert(song.id.clone(), i).is_some() {
                return Err(PlaylistError::DuplicateSongId(song.id.clone()));
            }
        }

        Ok(Self { songs, index })
    }

    /// Load a JSON array of songs. When the file holds more than `limit`
    /// songs only the last `limit` (newest collected) are kept.
    pub fn from_json_file(path: &Path, limit: Option<usize>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut songs: Vec<Song> = serde_json::from_str(&raw)?;

        if let Some(limit) = limit {
            if songs.len() > limit {
                log::info!(
                    "Catalog {} holds {} songs, keeping the newest {}",
                    path.display(),
                    songs.len(),
                    limit
                );
                songs.drain(..songs.len() - limit);
            }
        }

        Self::new(songs)
    }

    #[must_use]
    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.songs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}
