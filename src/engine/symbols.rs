//! Word symbol table: maps lattice word ids to their spelling.

use crate::engine::lattice::{EPSILON, WordId};
use crate::error::{Result, VoxgateError};
use std::collections::HashMap;
use std::path::Path;

/// Spelling of the epsilon symbol.
pub const EPSILON_SYMBOL: &str = "<eps>";

/// Spelling used for words outside the vocabulary.
pub const UNKNOWN_SYMBOL: &str = "<unk>";

/// Immutable id <-> word mapping.
///
/// Loaded once at startup and shared read-only by every worker.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    words: HashMap<WordId, String>,
    ids: HashMap<String, WordId>,
}

impl SymbolTable {
    /// Load a table from a file of `word id` lines.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VoxgateError::SymbolTable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&content).map_err(|message| VoxgateError::SymbolTable {
            path: path.display().to_string(),
            message,
        })
    }

    /// Parse `word id` lines. Blank lines are ignored.
    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        let mut table = Self::default();
        for (index, line) in content.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            let id = fields
                .next()
                .ok_or_else(|| format!("line {}: missing id for {:?}", index + 1, word))?;
            let id: WordId = id
                .parse()
                .map_err(|_| format!("line {}: bad id {:?}", index + 1, id))?;
            if fields.next().is_some() {
                return Err(format!("line {}: expected two fields", index + 1));
            }
            table.insert(word, id);
        }
        Ok(table)
    }

    /// Build a table from `(word, id)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, WordId)>) -> Self {
        let mut table = Self::default();
        for (word, id) in pairs {
            table.insert(word, id);
        }
        table
    }

    fn insert(&mut self, word: &str, id: WordId) {
        self.words.insert(id, word.to_string());
        self.ids.entry(word.to_string()).or_insert(id);
    }

    /// Spelling of `id`, if known.
    pub fn find(&self, id: WordId) -> Option<&str> {
        self.words.get(&id).map(String::as_str)
    }

    /// Id of `word`, if known.
    pub fn id_of(&self, word: &str) -> Option<WordId> {
        self.ids.get(word).copied()
    }

    /// Id to use for `word`, falling back to `<unk>` and then epsilon.
    pub fn id_or_unknown(&self, word: &str) -> WordId {
        self.id_of(word)
            .or_else(|| self.id_of(UNKNOWN_SYMBOL))
            .unwrap_or(EPSILON)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
