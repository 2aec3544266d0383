//! Valid-code vocabulary and known-misspelling aliases

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Ordered set of valid codes.
///
/// Codes are stored uppercased and trimmed. Iteration order is insertion
/// order, which is the fuzzy-match tie-break.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    codes: Vec<String>,
    index: HashSet<String>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a code; empty entries and duplicates are ignored.
    /// Returns whether the code was newly inserted.
    pub fn insert(&mut self, code: &str) -> bool {
        let code = canonical_code(code);
        if code.is_empty() || self.index.contains(&code) {
            return false;
        }
        self.index.insert(code.clone());
        self.codes.push(code);
        true
    }

    /// Exact membership test (after canonicalization)
    pub fn contains(&self, code: &str) -> bool {
        self.index.contains(&canonical_code(code))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut vocab = Vocabulary::new();
        for code in iter {
            vocab.insert(code.as_ref());
        }
        vocab
    }
}

/// Mapping from lowercase misspelling to canonical code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, misspelling: &str, canonical: &str) {
        let key = misspelling.trim().to_lowercase();
        if key.is_empty() {
            return;
        }
        self.entries.insert(key, canonical_code(canonical));
    }

    /// Case-insensitive lookup
    pub fn get(&self, text: &str) -> Option<&str> {
        self.entries
            .get(&text.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<BTreeMap<String, String>> for AliasTable {
    fn from(map: BTreeMap<String, String>) -> Self {
        let mut table = AliasTable::new();
        for (k, v) in &map {
            table.insert(k, v);
        }
        table
    }
}

impl From<AliasTable> for BTreeMap<String, String> {
    fn from(table: AliasTable) -> Self {
        table.entries
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = AliasTable::new();
        for (k, v) in iter {
            table.insert(k.as_ref(), v.as_ref());
        }
        table
    }
}

/// Uppercase and trim, the canonical form of every code
pub fn canonical_code(text: &str) -> String {
    text.trim().to_uppercase()
}
