use crate::song::{Attribute, Catalog, Song};
use crate::trainer::{EpisodeSummary, TrainingReport};
use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata columns, in the order they precede the attribute columns.
const META_COLUMNS: [&str; 8] = [
    "id",
    "name",
    "artist",
    "album",
    "genre",
    "release_date",
    "explicit",
    "search_query",
];

/// One recorded training episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeRecord {
    pub run_id: String,
    pub episode: usize,
    pub steps: usize,
    pub total_reward: f64,
    pub epsilon: f64,
    pub playlist_len: usize,
    pub aborted: Option<String>,
    /// Seconds since the Unix epoch.
    pub recorded_at: i64,
}

/// Open the database at `path`, creating its parent directory if needed.
pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }

    Connection::open(path).with_context(|| format!("Failed to open database at {}", path.display()))
}

/// Open the database and create the `songs` and `episodes` tables if they
/// do not exist yet. Safe to call on every start.
pub fn init_database(path: &Path) -> Result<Connection> {
    let conn = connect(path)?;

    let attribute_columns: String = Attribute::ALL
        .iter()
        .map(|attr| format!(",\n            \"{}\" REAL", attr.name()))
        .collect();

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS songs (
            id           TEXT PRIMARY KEY,
            name         TEXT,
            artist       TEXT,
            album        TEXT,
            genre        TEXT,
            release_date TEXT,
            explicit     INTEGER,
            search_query TEXT{attribute_columns}
        );
        CREATE TABLE IF NOT EXISTS episodes (
            run_id       TEXT    NOT NULL,
            episode      INTEGER NOT NULL,
            steps        INTEGER NOT NULL,
            reward       REAL    NOT NULL,
            epsilon      REAL    NOT NULL,
            playlist_len INTEGER NOT NULL,
            aborted      TEXT,
            recorded_at  INTEGER NOT NULL,
            PRIMARY KEY (run_id, episode)
        );
        CREATE INDEX IF NOT EXISTS idx_songs_genre ON songs(genre);
        CREATE INDEX IF NOT EXISTS idx_episodes_time ON episodes(recorded_at);"
    ))
    .with_context(|| format!("Failed to create tables in {}", path.display()))?;

    debug!("Database ready at {}", path.display());
    Ok(conn)
}

fn column_list() -> String {
    META_COLUMNS
        .iter()
        .map(|c| (*c).to_string())
        .chain(Attribute::ALL.iter().map(|attr| format!("\"{}\"", attr.name())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Insert or replace songs by id in one transaction. Returns the number
/// of rows written.
pub fn import_songs(conn: &mut Connection, songs: &[Song]) -> Result<usize> {
    let columns = column_list();
    let placeholders = (1..=META_COLUMNS.len() + Attribute::ALL.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    let tx = conn.transaction()?;
    {
        let mut stmt = tx
            .prepare(&format!("INSERT OR REPLACE INTO songs ({columns}) VALUES ({placeholders})"))
            .context("Invalid SQL statement when preparing song import")?;

        for song in songs {
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(song.id.clone()),
                Box::new(song.name.clone()),
                Box::new(song.artist.clone()),
                Box::new(song.album.clone()),
                Box::new(song.genre.clone()),
                Box::new(song.release_date.clone()),
                Box::new(song.explicit),
                Box::new(song.search_query.clone()),
            ];
            values.extend(
                Attribute::ALL
                    .iter()
                    .map(|&attr| Box::new(song.attribute(attr)) as Box<dyn rusqlite::ToSql>),
            );

            stmt.execute(rusqlite::params_from_iter(values.iter()))
                .with_context(|| format!("Failed to import song {}", song.id))?;
        }
    }
    tx.commit().context("Committing song import failed")?;

    info!("Imported {} songs", songs.len());
    Ok(songs.len())
}

fn song_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Song> {
    let mut song = Song {
        id: row.get(0)?,
        name: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        genre: row.get(4)?,
        release_date: row.get(5)?,
        explicit: row.get(6)?,
        search_query: row.get(7)?,
        ..Default::default()
    };
    for (offset, attr) in Attribute::ALL.into_iter().enumerate() {
        song.set_attribute(attr, row.get(META_COLUMNS.len() + offset)?);
    }
    Ok(song)
}

/// Load the catalog, newest releases first, optionally keeping only the
/// `limit` newest songs.
pub fn load_catalog(conn: &Connection, limit: Option<usize>) -> Result<Catalog> {
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM songs ORDER BY release_date IS NULL, release_date DESC, id LIMIT ?1",
            column_list()
        ))
        .context("Invalid SQL statement when selecting songs")?;

    let songs = stmt
        .query_map([limit], song_from_row)
        .context("Cannot query songs")?
        .collect::<rusqlite::Result<Vec<Song>>>()
        .context("Failed to read song row")?;

    debug!("Loaded {} songs from database", songs.len());
    Catalog::new(songs).context("Database does not hold a usable catalog")
}

pub fn song_count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))
        .context("Could not count songs")?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Identifier for a new training run, derived from the current time.
pub fn new_run_id() -> String {
    format!("run-{}", now())
}

pub fn record_episode(conn: &Connection, run_id: &str, summary: &EpisodeSummary) -> Result<()> {
    record_episode_at(conn, run_id, summary, now())
}

fn record_episode_at(conn: &Connection, run_id: &str, summary: &EpisodeSummary, recorded_at: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO episodes
            (run_id, episode, steps, reward, epsilon, playlist_len, aborted, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run_id,
            i64::try_from(summary.episode).unwrap_or(i64::MAX),
            i64::try_from(summary.steps).unwrap_or(i64::MAX),
            summary.total_reward,
            summary.epsilon,
            i64::try_from(summary.playlist.len()).unwrap_or(i64::MAX),
            summary.aborted,
            recorded_at,
        ],
    )
    .with_context(|| format!("Failed to record episode {} of {run_id}", summary.episode))?;
    Ok(())
}

/// Record every episode of a finished run in one transaction.
pub fn record_run(conn: &mut Connection, run_id: &str, report: &TrainingReport) -> Result<()> {
    let tx = conn.transaction()?;
    for summary in &report.episodes {
        record_episode(&tx, run_id, summary)?;
    }
    tx.commit().context("Committing training run failed")?;

    info!("Recorded {} episodes for {run_id}", report.episodes.len());
    Ok(())
}

/// Recorded episodes, the most recently started run first and each run's
/// episodes in episode order. Restricted to one run when `run_id` is given.
pub fn episode_history(conn: &Connection, run_id: Option<&str>, limit: usize) -> Result<Vec<EpisodeRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn
        .prepare(
            "SELECT run_id, episode, steps, reward, epsilon, playlist_len, aborted, recorded_at
             FROM episodes
             WHERE ?1 IS NULL OR run_id = ?1
             ORDER BY MIN(recorded_at) OVER (PARTITION BY run_id) DESC, run_id DESC, episode ASC
             LIMIT ?2",
        )
        .context("Invalid SQL statement when selecting episodes")?;

    let rows = stmt
        .query_map(params![run_id, limit], |row| {
            let episode: i64 = row.get(1)?;
            let steps: i64 = row.get(2)?;
            let playlist_len: i64 = row.get(5)?;
            Ok(EpisodeRecord {
                run_id: row.get(0)?,
                episode: usize::try_from(episode).unwrap_or(0),
                steps: usize::try_from(steps).unwrap_or(0),
                total_reward: row.get(3)?,
                epsilon: row.get(4)?,
                playlist_len: usize::try_from(playlist_len).unwrap_or(0),
                aborted: row.get(6)?,
                recorded_at: row.get(7)?,
            })
        })
        .context("Cannot query episodes")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read episode row")
}
