use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::game::{Mode, UNBOUNDED_MS};
use crate::store::WordsetKey;

/// Challenge sessions default to half a minute when nothing else is given.
pub const DEFAULT_DURATION_MS: i64 = 30_000;

/// Wordset looked up when neither CLI nor stored defaults name one.
pub const DEFAULT_WORDSET: &str = "english-easy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// User defaults persisted between runs. Every field is optional; gaps are
/// filled by `resolve_options`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoredOptions {
    pub wordset_name: Option<String>,
    pub wordset_id: Option<i64>,
    pub mode: Option<Mode>,
    pub duration_secs: Option<i64>,
    pub seed: Option<u64>,
    pub theme: Option<Theme>,
}

/// Per-invocation overrides, typically from the CLI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplicitOptions {
    pub wordset_name: Option<String>,
    pub wordset_id: Option<i64>,
    pub mode: Option<Mode>,
    pub duration_secs: Option<i64>,
    pub seed: Option<u64>,
}

/// Everything a session needs, fully defaulted. Business logic takes this
/// struct instead of reading settings ad hoc.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub wordset: WordsetKey,
    pub mode: Mode,
    pub duration_ms: i64,
    pub seed: u64,
    pub theme: Theme,
}

/// Pure defaulting: explicit beats stored beats built-in. The duration only
/// applies to Challenge; Learning and Zen are always unbounded.
pub fn resolve_options(
    explicit: &ExplicitOptions,
    stored: &StoredOptions,
    fallback_seed: u64,
) -> ResolvedOptions {
    let mode = explicit.mode.or(stored.mode).unwrap_or(Mode::Challenge);

    let duration_ms = match mode {
        Mode::Learning | Mode::Zen => UNBOUNDED_MS,
        Mode::Challenge => explicit
            .duration_secs
            .or(stored.duration_secs)
            .filter(|s| *s > 0)
            .map(|s| s * 1000)
            .unwrap_or(DEFAULT_DURATION_MS),
    };

    let wordset = explicit
        .wordset_id
        .map(WordsetKey::Id)
        .or_else(|| explicit.wordset_name.clone().map(WordsetKey::Name))
        .or(stored.wordset_id.map(WordsetKey::Id))
        .or_else(|| stored.wordset_name.clone().map(WordsetKey::Name))
        .unwrap_or_else(|| WordsetKey::Name(DEFAULT_WORDSET.to_string()));

    ResolvedOptions {
        wordset,
        mode,
        duration_ms,
        seed: explicit.seed.or(stored.seed).unwrap_or(fallback_seed),
        theme: stored.theme.unwrap_or_default(),
    }
}

pub trait ConfigStore {
    fn load(&self) -> StoredOptions;
    fn save(&self, opts: &StoredOptions) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = crate::app_dirs::AppDirs::config_path()
            .unwrap_or_else(|| PathBuf::from("simplytype_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> StoredOptions {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(opts) = serde_json::from_slice::<StoredOptions>(&bytes) {
                return opts;
            }
        }
        StoredOptions::default()
    }

    fn save(&self, opts: &StoredOptions) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(opts).unwrap_or_default();
        fs::write(&self.path, data)
    }
}
