//! OCR Text Correction
//!
//! Reconciles noisy recognizer output with the closed vocabulary of valid
//! codes. Stages run in a fixed order, each on the previous stage's output:
//! 1. character normalization ([`CharSubstitutionTable`])
//! 2. alias resolution ([`AliasTable`])
//! 3. fuzzy matching ([`fuzzy::best_match`])

pub mod alias;
pub mod fuzzy;
pub mod normalize;
pub mod vocabulary;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use alias::resolve_alias;
pub use fuzzy::{best_match, ratcliff_obershelp, FuzzyMatch, SimilarityMetric};
pub use normalize::CharSubstitutionTable;
pub use vocabulary::{canonical_code, AliasTable, Vocabulary};

/// Which correction stages run, and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionSettings {
    /// Apply the character substitution table
    pub normalize: bool,
    /// Resolve known misspellings
    pub alias: bool,
    /// Fall back to the closest vocabulary entry
    pub fuzzy: bool,
    pub metric: SimilarityMetric,
    pub substitutions: CharSubstitutionTable,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            normalize: true,
            alias: true,
            fuzzy: true,
            metric: SimilarityMetric::default(),
            substitutions: CharSubstitutionTable::default(),
        }
    }
}

/// Text after correction plus the audit trail of what changed
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub text: String,
    pub corrections: Vec<String>,
}

/// Run normalization, alias resolution and fuzzy matching on recognized text.
///
/// The result is not forced into the vocabulary: when nothing matches, the
/// corrected text is returned as-is for manual review.
pub fn correct_text(
    raw: &str,
    settings: &CorrectionSettings,
    vocabulary: &Vocabulary,
    aliases: &AliasTable,
    fuzzy_cutoff: f64,
) -> Correction {
    let mut corrections = Vec::new();

    let normalized = if settings.normalize {
        settings.substitutions.apply(raw, &mut corrections)
    } else {
        raw.to_string()
    };

    let mut working = canonical_code(&normalized);

    if settings.alias {
        if let Some(canonical) = resolve_alias(&working, aliases, vocabulary) {
            debug!("Alias '{}' resolved to '{}'", normalized.trim(), canonical);
            corrections.push(format!("alias '{}' -> '{}'", normalized.trim(), canonical));
            working = canonical.to_string();
        }
    }

    if settings.fuzzy && !vocabulary.contains(&working) {
        if let Some(m) = best_match(&working, vocabulary, settings.metric, fuzzy_cutoff) {
            debug!("Fuzzy match '{}' -> '{}' (ratio {:.2})", working, m.code, m.ratio);
            corrections.push(format!("fuzzy '{}' -> '{}' ({:.2})", working, m.code, m.ratio));
            working = m.code;
        }
    }

    Correction {
        text: working,
        corrections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        ["HSS", "HS5", "HS1", "G-12"].into_iter().collect()
    }

    #[test]
    fn test_normalization_then_membership() {
        let settings = CorrectionSettings {
            substitutions: CharSubstitutionTable::new(vec![('l', '1')]).unwrap(),
            ..Default::default()
        };
        let out = correct_text("HSl", &settings, &vocab(), &AliasTable::new(), 0.7);
        assert_eq!(out.text, "HS1");
        assert_eq!(out.corrections, vec!["'l' -> '1' (1x)"]);
    }

    #[test]
    fn test_alias_resolution() {
        let aliases: AliasTable = [("hss", "HSS")].into_iter().collect();
        let out = correct_text("hss", &CorrectionSettings::default(), &vocab(), &aliases, 0.7);
        assert_eq!(out.text, "HSS");
        assert_eq!(out.corrections, vec!["alias 'hss' -> 'HSS'"]);
    }

    #[test]
    fn test_fuzzy_fallback() {
        let out = correct_text("HS5X", &CorrectionSettings::default(), &vocab(), &AliasTable::new(), 0.7);
        assert_eq!(out.text, "HS5");
        assert_eq!(out.corrections, vec!["fuzzy 'HS5X' -> 'HS5' (0.86)"]);
    }

    #[test]
    fn test_unmatched_text_kept() {
        let settings = CorrectionSettings {
            substitutions: CharSubstitutionTable::empty(),
            ..Default::default()
        };
        let out = correct_text("ZZZZ", &settings, &vocab(), &AliasTable::new(), 0.6);
        assert_eq!(out.text, "ZZZZ");
        assert!(out.corrections.is_empty());
    }

    #[test]
    fn test_stages_chain_on_previous_output() {
        // 'l' -> '1' first, then the alias keyed on the normalized text fires
        let aliases: AliasTable = [("g-1z", "G-12")].into_iter().collect();
        let settings = CorrectionSettings {
            substitutions: CharSubstitutionTable::new(vec![('l', '1')]).unwrap(),
            ..Default::default()
        };
        let out = correct_text("G-lz", &settings, &vocab(), &aliases, 0.9);
        assert_eq!(out.text, "G-12");
        assert_eq!(out.corrections, vec!["'l' -> '1' (1x)", "alias 'G-1z' -> 'G-12'"]);
    }

    #[test]
    fn test_disabled_stages() {
        let settings = CorrectionSettings {
            normalize: false,
            alias: false,
            fuzzy: false,
            ..Default::default()
        };
        let aliases: AliasTable = [("hsl", "HS1")].into_iter().collect();
        let out = correct_text("HSl", &settings, &vocab(), &aliases, 0.1);
        assert_eq!(out.text, "HSL");
        assert!(out.corrections.is_empty());
    }

    #[test]
    fn test_exact_member_skips_fuzzy() {
        let out = correct_text(" hs5 ", &CorrectionSettings::default(), &vocab(), &AliasTable::new(), 0.1);
        assert_eq!(out.text, "HS5");
        assert!(out.corrections.is_empty());
    }
}
