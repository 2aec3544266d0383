//! Character-level OCR normalization
//!
//! A fixed substitution table applied in insertion order. Entries are
//! character-disjoint (no replacement is itself a source), so applying the
//! table to its own output changes nothing.

use serde::{Deserialize, Serialize};

use crate::error::{KuerzelError, Result};

/// Ordered single-character substitutions, e.g. `l -> 1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct CharSubstitutionTable {
    entries: Vec<(char, char)>,
}

impl Default for CharSubstitutionTable {
    fn default() -> Self {
        Self {
            entries: vec![('l', '1'), ('Z', '2'), ('z', '2')],
        }
    }
}

impl CharSubstitutionTable {
    /// Empty table
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// Build a table, rejecting duplicate sources and chained replacements
    pub fn new(entries: Vec<(char, char)>) -> Result<Self> {
        for (i, (from, to)) in entries.iter().enumerate() {
            if from == to {
                return Err(KuerzelError::InvalidParameters(format!(
                    "substitution '{from}' -> '{to}' maps a character to itself"
                )));
            }
            if entries[..i].iter().any(|(f, _)| f == from) {
                return Err(KuerzelError::InvalidParameters(format!(
                    "duplicate substitution source '{from}'"
                )));
            }
            if entries.iter().any(|(f, _)| f == to) {
                return Err(KuerzelError::InvalidParameters(format!(
                    "substitution '{from}' -> '{to}' produces a character that is itself substituted"
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[(char, char)] {
        &self.entries
    }

    /// Apply every substitution, appending one audit entry per substitution
    /// that actually fired: `'<old>' -> '<new>' (<count>x)`.
    pub fn apply(&self, text: &str, corrections: &mut Vec<String>) -> String {
        let mut result = text.to_string();
        for &(from, to) in &self.entries {
            let count = result.chars().filter(|&c| c == from).count();
            if count == 0 {
                continue;
            }
            result = result.chars().map(|c| if c == from { to } else { c }).collect();
            corrections.push(format!("'{from}' -> '{to}' ({count}x)"));
        }
        result
    }
}

impl TryFrom<Vec<(String, String)>> for CharSubstitutionTable {
    type Error = KuerzelError;

    fn try_from(pairs: Vec<(String, String)>) -> Result<Self> {
        let mut entries = Vec::with_capacity(pairs.len());
        for (from, to) in pairs {
            entries.push((single_char(&from)?, single_char(&to)?));
        }
        Self::new(entries)
    }
}

impl From<CharSubstitutionTable> for Vec<(String, String)> {
    fn from(table: CharSubstitutionTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(f, t)| (f.to_string(), t.to_string()))
            .collect()
    }
}

fn single_char(s: &str) -> Result<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(KuerzelError::InvalidParameters(format!(
            "substitution entry {s:?} must be exactly one character"
        ))),
    }
}
