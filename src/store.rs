use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::app_dirs::AppDirs;
use crate::game::{GameSnapshot, Mode};
use crate::wordset::Wordset;

/// Loaded wordsets kept hot, keyed by row id.
const WORDSET_CACHE_CAP: usize = 4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not create state directory {path}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("wordset {0} not found")]
    WordsetNotFound(String),
    #[error("wordset {0:?} has no words in the store")]
    EmptyWordset(String),
    #[error("game {0} not found")]
    GameNotFound(String),
    #[error("bad incorrect_chars payload")]
    Payload(#[from] serde_json::Error),
    #[error("games row carries unknown mode {0:?}")]
    BadMode(String),
    #[error("games row carries unrepresentable timestamp {0}")]
    BadTimestamp(i64),
}

/// Lookup key for wordsets: by persisted id or by name.
#[derive(Debug, Clone, PartialEq)]
pub enum WordsetKey {
    Id(i64),
    Name(String),
}

impl std::fmt::Display for WordsetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WordsetKey::Id(id) => write!(f, "id {id}"),
            WordsetKey::Name(name) => write!(f, "name {name:?}"),
        }
    }
}

/// Lookup key for games: by row id or by the session's unique start stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameKey {
    Id(i64),
    CreatedAt(DateTime<Utc>),
}

/// One aggregate row for the history view.
#[derive(Debug, Clone, PartialEq)]
pub struct GameStatsRow {
    pub accuracy: Option<f64>,
    pub wpm: f64,
    pub created_at: DateTime<Utc>,
    pub incorrect_chars: HashMap<char, u32>,
}

/// Tiny LRU over loaded wordsets; hit moves the entry to the front, insert
/// evicts from the back.
#[derive(Debug, Default)]
struct WordsetCache {
    entries: Vec<(i64, Arc<Wordset>)>,
}

impl WordsetCache {
    fn get(&mut self, id: i64) -> Option<Arc<Wordset>> {
        let idx = self.entries.iter().position(|(k, _)| *k == id)?;
        let entry = self.entries.remove(idx);
        let ws = entry.1.clone();
        self.entries.insert(0, entry);
        Some(ws)
    }

    fn insert(&mut self, id: i64, ws: Arc<Wordset>) {
        self.entries.retain(|(k, _)| *k != id);
        self.entries.insert(0, (id, ws));
        self.entries.truncate(WORDSET_CACHE_CAP);
    }
}

/// SQLite-backed store for wordsets and game history.
///
/// All calls are synchronous single-row operations; the event loop blocks
/// for their duration, which is acceptable at this size.
#[derive(Debug)]
pub struct GameStore {
    conn: Connection,
    cache: WordsetCache,
}

impl GameStore {
    /// Open (or create) the store at the default state path.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("simplytype.db"));
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::StateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS wordsets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(40) NOT NULL,
                language_code VARCHAR(6) NOT NULL,
                difficulty INTEGER
            );
            CREATE TABLE IF NOT EXISTS words (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content VARCHAR(50) NOT NULL,
                wordset_id INTEGER NOT NULL,
                FOREIGN KEY (wordset_id)
                    REFERENCES wordsets(id)
                    ON DELETE CASCADE,
                UNIQUE(content, wordset_id)
            );
            CREATE TABLE IF NOT EXISTS games (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mode VARCHAR(10),
                wordset_id INTEGER,
                seed INTEGER NOT NULL,
                pos INTEGER NOT NULL,
                incorrect_chars TEXT,
                elapsed INTEGER,
                created_at INTEGER NOT NULL UNIQUE,
                word_count INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER,
                FOREIGN KEY (wordset_id)
                    REFERENCES wordsets(id)
                    ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_words_wordset ON words(wordset_id);
            CREATE INDEX IF NOT EXISTS idx_games_created_at ON games(created_at);
            "#,
        )?;
        info!("opened game store");
        Ok(Self {
            conn,
            cache: WordsetCache::default(),
        })
    }

    /// Insert a wordset header and all its words in one transaction.
    pub fn insert_wordset(&mut self, ws: &Wordset) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO wordsets (name, language_code, difficulty) VALUES (?1, ?2, ?3)",
            params![ws.name, ws.language, ws.difficulty],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt =
                tx.prepare("INSERT INTO words (content, wordset_id) VALUES (?1, ?2)")?;
            for word in ws.words() {
                stmt.execute(params![word, id])?;
            }
        }
        tx.commit()?;
        info!(name = %ws.name, words = ws.len(), id, "stored wordset");
        Ok(id)
    }

    /// Fetch a wordset by id or name. Id lookups go through a small LRU so a
    /// session restart does not re-read the word rows.
    pub fn find_wordset(&mut self, key: &WordsetKey) -> Result<Arc<Wordset>, StoreError> {
        if let WordsetKey::Id(id) = key {
            if let Some(ws) = self.cache.get(*id) {
                debug!(id, "wordset cache hit");
                return Ok(ws);
            }
        }

        let row = match key {
            WordsetKey::Id(id) => self
                .conn
                .query_row(
                    "SELECT id, name, language_code, difficulty FROM wordsets WHERE id = ?1",
                    [id],
                    Self::wordset_header,
                )
                .optional()?,
            WordsetKey::Name(name) => self
                .conn
                .query_row(
                    "SELECT id, name, language_code, difficulty FROM wordsets WHERE name = ?1",
                    [name],
                    Self::wordset_header,
                )
                .optional()?,
        };
        let (id, name, language, difficulty) =
            row.ok_or_else(|| StoreError::WordsetNotFound(key.to_string()))?;

        let words = self.find_words(id)?;
        let mut ws = Wordset::new(name.clone(), language, difficulty, words)
            .map_err(|_| StoreError::EmptyWordset(name))?;
        ws.id = Some(id);
        let ws = Arc::new(ws);
        self.cache.insert(id, ws.clone());
        Ok(ws)
    }

    fn wordset_header(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, u8)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }

    pub fn find_words(&self, wordset_id: i64) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT content FROM words WHERE wordset_id = ?1 ORDER BY id")?;
        let words = stmt
            .query_map([wordset_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(words)
    }

    pub fn list_wordset_ids(&self) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id FROM wordsets ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Upsert keyed on the session's unique start stamp: pausing the same
    /// session repeatedly updates one row rather than growing history.
    pub fn insert_or_update_game(&self, snap: &GameSnapshot) -> Result<i64, StoreError> {
        let incorrect = serde_json::to_string(&snap.incorrect_chars)?;
        let created_at = snap.created_at.timestamp_millis();
        self.conn.execute(
            r#"
            INSERT INTO games
                (mode, wordset_id, seed, pos, incorrect_chars, elapsed, created_at, word_count, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(created_at) DO UPDATE SET
                mode = excluded.mode,
                wordset_id = excluded.wordset_id,
                seed = excluded.seed,
                pos = excluded.pos,
                incorrect_chars = excluded.incorrect_chars,
                elapsed = excluded.elapsed,
                word_count = excluded.word_count,
                last_updated = excluded.last_updated
            "#,
            params![
                snap.mode.to_string(),
                snap.wordset_id,
                snap.seed as i64,
                snap.pos as i64,
                incorrect,
                snap.elapsed_ms as i64,
                created_at,
                snap.word_count as i64,
                Utc::now().timestamp_millis(),
            ],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM games WHERE created_at = ?1",
            [created_at],
            |row| row.get(0),
        )?;
        debug!(id, pos = snap.pos, "saved game snapshot");
        Ok(id)
    }

    pub fn find_game(&self, key: GameKey) -> Result<GameSnapshot, StoreError> {
        const COLS: &str =
            "id, mode, wordset_id, seed, pos, incorrect_chars, elapsed, created_at, word_count";
        let row = match key {
            GameKey::Id(id) => self
                .conn
                .query_row(
                    &format!("SELECT {COLS} FROM games WHERE id = ?1"),
                    [id],
                    Self::game_row,
                )
                .optional()?,
            GameKey::CreatedAt(ts) => self
                .conn
                .query_row(
                    &format!("SELECT {COLS} FROM games WHERE created_at = ?1"),
                    [ts.timestamp_millis()],
                    Self::game_row,
                )
                .optional()?,
        };
        let raw = row.ok_or_else(|| {
            StoreError::GameNotFound(match key {
                GameKey::Id(id) => format!("id {id}"),
                GameKey::CreatedAt(ts) => format!("created_at {ts}"),
            })
        })?;
        Self::snapshot_from_raw(raw)
    }

    #[allow(clippy::type_complexity)]
    fn game_row(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(i64, String, Option<i64>, i64, i64, Option<String>, i64, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    }

    #[allow(clippy::type_complexity)]
    fn snapshot_from_raw(
        raw: (i64, String, Option<i64>, i64, i64, Option<String>, i64, i64, i64),
    ) -> Result<GameSnapshot, StoreError> {
        let (id, mode, wordset_id, seed, pos, incorrect, elapsed, created_at, word_count) = raw;
        let mode: Mode = mode.parse().map_err(StoreError::BadMode)?;
        let incorrect_chars = match incorrect {
            Some(json) => serde_json::from_str(&json)?,
            None => HashMap::new(),
        };
        let created_at = DateTime::<Utc>::from_timestamp_millis(created_at)
            .ok_or(StoreError::BadTimestamp(created_at))?;
        Ok(GameSnapshot {
            id: Some(id),
            mode,
            wordset_id,
            seed: seed as u64,
            pos: pos as usize,
            incorrect_chars,
            elapsed_ms: elapsed as u64,
            created_at,
            word_count: word_count as usize,
        })
    }

    /// History rows, newest last, optionally bounded to games started at or
    /// after `since`. Accuracy and speed are derived from the stored
    /// counters with the same formulas the live session uses.
    pub fn aggregate_game_stats(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<GameStatsRow>, StoreError> {
        let floor = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT pos, incorrect_chars, elapsed, created_at, word_count
            FROM games
            WHERE created_at >= ?1
            ORDER BY created_at
            "#,
        )?;
        let raw = stmt
            .query_map([floor], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(raw.len());
        for (pos, incorrect, elapsed, created_at, word_count) in raw {
            let incorrect_chars: HashMap<char, u32> = match incorrect {
                Some(json) => serde_json::from_str(&json)?,
                None => HashMap::new(),
            };
            let accuracy = if pos > 0 {
                let wrong: u32 = incorrect_chars.values().sum();
                Some((pos as f64 - wrong as f64) / pos as f64)
            } else {
                None
            };
            let wpm = if elapsed > 0 {
                word_count as f64 * 60_000.0 / elapsed as f64
            } else {
                0.0
            };
            let Some(created_at) = DateTime::<Utc>::from_timestamp_millis(created_at) else {
                warn!(created_at, "skipping history row with bad timestamp");
                continue;
            };
            rows.push(GameStatsRow {
                accuracy,
                wpm,
                created_at,
                incorrect_chars,
            });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store() -> GameStore {
        GameStore::open_in_memory().unwrap()
    }

    fn pets() -> Wordset {
        Wordset::new("pets", "en", 1, vec!["cat".into(), "dog".into()]).unwrap()
    }

    fn snapshot(created_at: DateTime<Utc>, wordset_id: Option<i64>) -> GameSnapshot {
        GameSnapshot {
            id: None,
            mode: Mode::Challenge,
            wordset_id,
            seed: 42,
            pos: 10,
            incorrect_chars: HashMap::from([('a', 2)]),
            elapsed_ms: 5000,
            created_at,
            word_count: 3,
        }
    }

    // created_at round-trips at millisecond precision; sub-ms is dropped.
    fn now_ms() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    #[test]
    fn insert_and_find_wordset_by_id_and_name() {
        let mut store = store();
        let id = store.insert_wordset(&pets()).unwrap();

        let by_id = store.find_wordset(&WordsetKey::Id(id)).unwrap();
        assert_eq!(by_id.id, Some(id));
        assert_eq!(by_id.name, "pets");
        assert_eq!(by_id.words(), ["cat", "dog"]);

        let by_name = store
            .find_wordset(&WordsetKey::Name("pets".into()))
            .unwrap();
        assert_eq!(by_name.id, Some(id));
    }

    #[test]
    fn find_wordset_misses_report_the_key() {
        let mut store = store();
        assert_matches!(
            store.find_wordset(&WordsetKey::Id(999)),
            Err(StoreError::WordsetNotFound(_))
        );
        assert_matches!(
            store.find_wordset(&WordsetKey::Name("nope".into())),
            Err(StoreError::WordsetNotFound(_))
        );
    }

    #[test]
    fn wordset_without_words_is_an_error() {
        let mut store = store();
        store
            .conn
            .execute(
                "INSERT INTO wordsets (name, language_code, difficulty) VALUES ('bare', 'en', 1)",
                [],
            )
            .unwrap();
        assert_matches!(
            store.find_wordset(&WordsetKey::Name("bare".into())),
            Err(StoreError::EmptyWordset(_))
        );
    }

    #[test]
    fn id_lookup_is_served_from_cache() {
        let mut store = store();
        let id = store.insert_wordset(&pets()).unwrap();
        let first = store.find_wordset(&WordsetKey::Id(id)).unwrap();
        let second = store.find_wordset(&WordsetKey::Id(id)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let mut store = store();
        let mut ids = Vec::new();
        for i in 0..=WORDSET_CACHE_CAP {
            let ws =
                Wordset::new(format!("set{i}"), "en", 1, vec![format!("word{i}")]).unwrap();
            ids.push(store.insert_wordset(&ws).unwrap());
        }
        let first = store.find_wordset(&WordsetKey::Id(ids[0])).unwrap();
        for id in &ids[1..] {
            store.find_wordset(&WordsetKey::Id(*id)).unwrap();
        }
        // ids[0] was pushed out by the CAP newer entries.
        let reloaded = store.find_wordset(&WordsetKey::Id(ids[0])).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
        assert_eq!(*first, *reloaded);
    }

    #[test]
    fn list_wordset_ids_returns_all() {
        let mut store = store();
        assert!(store.list_wordset_ids().unwrap().is_empty());
        let a = store.insert_wordset(&pets()).unwrap();
        let b = store
            .insert_wordset(&Wordset::new("other", "en", 2, vec!["x".into()]).unwrap())
            .unwrap();
        assert_eq!(store.list_wordset_ids().unwrap(), vec![a, b]);
    }

    #[test]
    fn game_snapshot_round_trips() {
        let mut store = store();
        let ws_id = store.insert_wordset(&pets()).unwrap();
        let snap = snapshot(now_ms(), Some(ws_id));
        let id = store.insert_or_update_game(&snap).unwrap();

        let loaded = store.find_game(GameKey::Id(id)).unwrap();
        assert_eq!(loaded.mode, snap.mode);
        assert_eq!(loaded.wordset_id, snap.wordset_id);
        assert_eq!(loaded.seed, snap.seed);
        assert_eq!(loaded.pos, snap.pos);
        assert_eq!(loaded.elapsed_ms, snap.elapsed_ms);
        assert_eq!(loaded.incorrect_chars, snap.incorrect_chars);
        assert_eq!(loaded.created_at, snap.created_at);

        let by_stamp = store.find_game(GameKey::CreatedAt(snap.created_at)).unwrap();
        assert_eq!(by_stamp.id, Some(id));
    }

    #[test]
    fn upsert_updates_the_same_row() {
        let store = store();
        let created = now_ms();
        let mut snap = snapshot(created, None);
        let first_id = store.insert_or_update_game(&snap).unwrap();

        snap.pos = 25;
        snap.elapsed_ms = 9000;
        let second_id = store.insert_or_update_game(&snap).unwrap();
        assert_eq!(first_id, second_id);

        let loaded = store.find_game(GameKey::Id(first_id)).unwrap();
        assert_eq!(loaded.pos, 25);
        assert_eq!(loaded.elapsed_ms, 9000);

        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM games", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn find_game_miss_is_reported() {
        let store = store();
        assert_matches!(
            store.find_game(GameKey::Id(7)),
            Err(StoreError::GameNotFound(_))
        );
    }

    #[test]
    fn aggregate_computes_accuracy_and_wpm() {
        let store = store();
        let snap = snapshot(now_ms(), None);
        store.insert_or_update_game(&snap).unwrap();

        let rows = store.aggregate_game_stats(None).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        // pos 10, 2 wrong -> 0.8; 3 words in 5s -> 36 wpm
        assert_eq!(row.accuracy, Some(0.8));
        assert!((row.wpm - 36.0).abs() < 1e-9);
        assert_eq!(row.incorrect_chars.get(&'a'), Some(&2));
    }

    #[test]
    fn aggregate_honors_the_since_bound() {
        let store = store();
        let old = DateTime::from_timestamp_millis(1_000_000).unwrap();
        let new = now_ms();
        store.insert_or_update_game(&snapshot(old, None)).unwrap();
        store.insert_or_update_game(&snapshot(new, None)).unwrap();

        assert_eq!(store.aggregate_game_stats(None).unwrap().len(), 2);
        let bounded = store.aggregate_game_stats(Some(new)).unwrap();
        assert_eq!(bounded.len(), 1);
        assert_eq!(bounded[0].created_at, new);
    }

    #[test]
    fn deleting_a_wordset_cascades_to_words_and_nulls_games() {
        let mut store = store();
        let ws_id = store.insert_wordset(&pets()).unwrap();
        let game_id = store
            .insert_or_update_game(&snapshot(now_ms(), Some(ws_id)))
            .unwrap();

        store
            .conn
            .execute("DELETE FROM wordsets WHERE id = ?1", [ws_id])
            .unwrap();

        assert!(store.find_words(ws_id).unwrap().is_empty());
        let loaded = store.find_game(GameKey::Id(game_id)).unwrap();
        assert_eq!(loaded.wordset_id, None);
    }
}
