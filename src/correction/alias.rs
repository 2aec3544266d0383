//! Known-misspelling resolution

use super::vocabulary::{AliasTable, Vocabulary};

/// Look `text` up in the alias table. Returns the canonical code only when the
/// alias exists and its target is itself a valid code.
pub fn resolve_alias<'a>(
    text: &str,
    aliases: &'a AliasTable,
    vocabulary: &Vocabulary,
) -> Option<&'a str> {
    aliases
        .get(text)
        .filter(|canonical| vocabulary.contains(canonical))
}
