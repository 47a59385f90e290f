use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Fallback word pool compiled into the binary, used when the store has no
/// wordsets yet. Same file format as user-supplied wordset files.
const BUILTIN_WORDSET: &str = include_str!("../resources/wordsets/english-easy.txt");

#[derive(Debug, Error)]
pub enum WordsetError {
    #[error("could not read wordset file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed wordset header {0:?}: expected `<name> <language> <difficulty>`")]
    MalformedHeader(String),
    #[error("wordset difficulty {0:?} is not an integer")]
    InvalidDifficulty(String),
    #[error("wordset {0:?} contains no words")]
    Empty(String),
}

/// A named set of unique lowercase words for one language and difficulty tier.
///
/// Immutable after construction; a session samples from it but never
/// modifies it.
#[derive(Debug, Clone, PartialEq)]
pub struct Wordset {
    pub id: Option<i64>,
    pub name: String,
    pub language: String,
    pub difficulty: u8,
    words: Vec<String>,
}

impl Wordset {
    /// Build a wordset from raw parts. Words are lowercased and deduplicated
    /// preserving first-seen order. Fails when no words remain.
    pub fn new(
        name: impl Into<String>,
        language: impl Into<String>,
        difficulty: u8,
        words: impl IntoIterator<Item = String>,
    ) -> Result<Self, WordsetError> {
        let name = name.into();
        let mut seen = HashSet::new();
        let words: Vec<String> = words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty() && seen.insert(w.clone()))
            .collect();
        if words.is_empty() {
            return Err(WordsetError::Empty(name));
        }
        Ok(Self {
            id: None,
            name,
            language: language.into(),
            difficulty,
            words,
        })
    }

    /// Parse the on-disk wordset format: line 1 is `<name> <language>
    /// <difficulty>`, every following non-empty line is one word.
    pub fn parse(contents: &str) -> Result<Self, WordsetError> {
        let mut lines = contents.lines();
        let header = lines.next().unwrap_or_default();
        let fields: Vec<&str> = header.split_whitespace().collect();
        let &[name, language, difficulty] = fields.as_slice() else {
            return Err(WordsetError::MalformedHeader(header.to_string()));
        };
        let difficulty: u8 = difficulty
            .parse()
            .map_err(|_| WordsetError::InvalidDifficulty(difficulty.to_string()))?;
        let ws = Self::new(name, language, difficulty, lines.map(str::to_string))?;
        debug!(name = %ws.name, words = ws.len(), "parsed wordset");
        Ok(ws)
    }

    pub fn from_file(path: &Path) -> Result<Self, WordsetError> {
        let contents = fs::read_to_string(path).map_err(|source| WordsetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// The compiled-in default pool. Infallible: the asset is validated by
    /// tests, a parse failure here is a build defect.
    pub fn builtin() -> Self {
        Self::parse(BUILTIN_WORDSET).expect("builtin wordset asset is malformed")
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Draw `count` words uniformly at random with repetition, in draw order.
    /// The same seed always yields the same sequence for a fixed pool size.
    pub fn sample_with_repetition(&self, count: usize, seed: u64) -> Vec<String> {
        let mut rng = SmallRng::seed_from_u64(seed);
        self.sample_with_rng(&mut rng, count)
    }

    /// Continue an existing seeded stream. A session keeps its own rng so that
    /// text extensions pick up where the initial sample left off.
    pub fn sample_with_rng<R: Rng>(&self, rng: &mut R, count: usize) -> Vec<String> {
        (0..count)
            .map(|_| self.words[rng.gen_range(0..self.words.len())].clone())
            .collect()
    }
}

impl std::fmt::Display for Wordset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {} - {} - {} words",
            self.name,
            self.language,
            self.difficulty,
            self.words.len()
        )
    }
}
