//! Text normalization applied before classification
//!
//! Order is fixed: table substitution, compatibility normalization (NFKC),
//! printable filter, script transliteration.

use std::collections::HashMap;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// Conversion between script variants of the same language
pub trait Transliterate: Send + Sync {
    fn transliterate(&self, text: &str) -> String;
}

/// Leaves text untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransliteration;

impl Transliterate for NoTransliteration {
    fn transliterate(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Whether `c` survives the printable filter
///
/// Newline, carriage return and tab are kept. Control characters, invisible
/// format characters and whitespace other than the plain space are dropped.
pub fn is_printable(c: char) -> bool {
    if matches!(c, '\n' | '\r' | '\t' | ' ') {
        return true;
    }

    if c.is_control() || c.is_whitespace() {
        return false;
    }

    !matches!(
        c,
        '\u{00AD}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
    )
}

/// Configurable normalization pipeline
#[derive(Clone)]
pub struct TextNormalizer {
    compatibility: bool,
    transliterator: Arc<dyn Transliterate>,
}

impl TextNormalizer {
    pub fn new(compatibility: bool) -> Self {
        Self {
            compatibility,
            transliterator: Arc::new(NoTransliteration),
        }
    }

    pub fn with_transliterator(mut self, transliterator: Arc<dyn Transliterate>) -> Self {
        self.transliterator = transliterator;
        self
    }

    /// Run the pipeline, substituting through `table` when given
    pub fn normalize(&self, text: &str, table: Option<&HashMap<char, char>>) -> String {
        let substituted: String = match table {
            Some(table) => text
                .chars()
                .map(|c| table.get(&c).copied().unwrap_or(c))
                .collect(),
            None => text.to_string(),
        };

        let composed: String = if self.compatibility {
            substituted.nfkc().collect()
        } else {
            substituted
        };

        let printable: String = composed.chars().filter(|&c| is_printable(c)).collect();

        self.transliterator.transliterate(&printable)
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Transliterate for Upper {
        fn transliterate(&self, text: &str) -> String {
            text.to_uppercase()
        }
    }

    #[test]
    fn test_compatibility_normalization() {
        let normalizer = TextNormalizer::new(true);
        assert_eq!(normalizer.normalize("ｆｒｅｅ ①", None), "free 1");

        let raw = TextNormalizer::new(false);
        assert_eq!(raw.normalize("ｆｒｅｅ", None), "ｆｒｅｅ");
    }

    #[test]
    fn test_printable_filter() {
        let normalizer = TextNormalizer::new(false);
        assert_eq!(normalizer.normalize("a\u{200B}b\u{0007}c\nd\te", None), "abc\nd\te");
    }

    #[test]
    fn test_substitution_runs_first() {
        let table: HashMap<char, char> = [('@', 'a'), ('０', 'x')].into_iter().collect();
        let normalizer = TextNormalizer::new(true);
        // the table sees the fullwidth zero before NFKC turns it into '0'
        assert_eq!(normalizer.normalize("sp@m ０", Some(&table)), "spam x");
    }

    #[test]
    fn test_transliteration_runs_last() {
        let normalizer = TextNormalizer::new(true).with_transliterator(Arc::new(Upper));
        assert_eq!(normalizer.normalize("ｂａｄ\u{FEFF}", None), "BAD");
    }
}
