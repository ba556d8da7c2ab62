//! Rule categories, word lists and hit counters
//!
//! Each category holds an ordered list of regex rules with a hit counter per
//! rule. Classification returns the first matching rule in insertion order.
//! Some categories (`spc`, `spe`) also encode a character substitution
//! table through rules of the form `[<keys>](?#<value>)`.

use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from category names
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CategoryError {
    #[error("Unknown rule category: {0}")]
    Unknown(String),
}

/// Letter of an ad subcategory (`ada` … `adz`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdLetter(char);

impl AdLetter {
    pub fn new(c: char) -> Option<Self> {
        c.is_ascii_lowercase().then_some(Self(c))
    }

    /// All 26 letters in alphabetical order
    pub fn all() -> impl Iterator<Item = Self> {
        ('a'..='z').map(Self)
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

/// Closed set of rule categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    /// Advertisement
    Ad,
    /// Advertisement subcategory
    AdSub(AdLetter),
    /// Ban-worthy on its own
    Ban,
    /// Profile bio
    Bio,
    /// Contact information
    Con,
    /// Instant messenger links
    Iml,
    /// Display names
    Nm,
    /// Phone numbers
    Pho,
    /// Special characters, encodes a substitution table
    Spc,
    /// Special letters, encodes a substitution table
    Spe,
}

impl Category {
    /// Categories without a letter suffix
    pub const BASE: [Category; 9] = [
        Category::Ad,
        Category::Ban,
        Category::Bio,
        Category::Con,
        Category::Iml,
        Category::Nm,
        Category::Pho,
        Category::Spc,
        Category::Spe,
    ];

    /// Base categories followed by the 26 ad subcategories
    pub fn all() -> impl Iterator<Item = Category> {
        Self::BASE
            .into_iter()
            .chain(AdLetter::all().map(Category::AdSub))
    }

    pub fn name(&self) -> String {
        match self {
            Category::Ad => "ad".to_string(),
            Category::AdSub(letter) => format!("ad{}", letter.as_char()),
            Category::Ban => "ban".to_string(),
            Category::Bio => "bio".to_string(),
            Category::Con => "con".to_string(),
            Category::Iml => "iml".to_string(),
            Category::Nm => "nm".to_string(),
            Category::Pho => "pho".to_string(),
            Category::Spc => "spc".to_string(),
            Category::Spe => "spe".to_string(),
        }
    }

    /// Name of the persisted word list, e.g. `ban_words`
    pub fn dataset_name(&self) -> String {
        format!("{}_words", self.name())
    }

    /// Parse a word list name such as `ban_words`
    pub fn from_dataset(name: &str) -> Result<Self, CategoryError> {
        name.strip_suffix("_words")
            .ok_or_else(|| CategoryError::Unknown(name.to_string()))?
            .parse()
    }

    /// Whether rules of this category build a substitution table
    pub fn encodes_table(&self) -> bool {
        matches!(self, Category::Spc | Category::Spe)
    }
}

impl FromStr for Category {
    type Err = CategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s {
            "ad" => Category::Ad,
            "ban" => Category::Ban,
            "bio" => Category::Bio,
            "con" => Category::Con,
            "iml" => Category::Iml,
            "nm" => Category::Nm,
            "pho" => Category::Pho,
            "spc" => Category::Spc,
            "spe" => Category::Spe,
            other => {
                let mut chars = other.strip_prefix("ad").unwrap_or_default().chars();
                match (chars.next().and_then(AdLetter::new), chars.next()) {
                    (Some(letter), None) => Category::AdSub(letter),
                    _ => return Err(CategoryError::Unknown(s.to_string())),
                }
            }
        };
        Ok(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<String> for Category {
    type Error = CategoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.name()
    }
}

/// A persisted rule with its hit counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub word: String,
    pub hits: u64,
}

/// Result of a successful classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub category: Category,
    /// The rule that matched
    pub word: String,
    /// The matched span of the normalized text
    pub matched: String,
}

/// Outcome of a rule synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
}

/// Sink for rule sets whose counters or rules changed
pub trait RulePersist: Send + Sync {
    fn persist(&self, category: Category, entries: &[RuleEntry]);
}

static COMMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\?#([^)]*)\)").unwrap());

static TABLE_ENTRY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(\?#([^)]+)\)").unwrap());

static MULTI_SPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

static SPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s").unwrap());

#[derive(Debug)]
struct CompiledRule {
    word: String,
    regex: Option<Regex>,
    /// Not applicable to OCR-derived text
    ocr_exempt: bool,
}

impl CompiledRule {
    fn compile(word: &str) -> Self {
        let ocr_exempt = COMMENT_REGEX
            .captures_iter(word)
            .any(|cap| cap[1].contains("nocr"));
        let pattern = COMMENT_REGEX.replace_all(word, "");

        let regex = match RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .multi_line(true)
            .build()
        {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Compile rule {} error: {}", word, e);
                None
            }
        };

        Self {
            word: word.to_string(),
            regex,
            ocr_exempt,
        }
    }
}

/// `key -> value` pairs embedded in a table rule
pub fn parse_table_entries(word: &str) -> Vec<(char, char)> {
    let mut pairs = Vec::new();

    for cap in TABLE_ENTRY_REGEX.captures_iter(word) {
        let Some(value) = cap[2].trim().chars().next() else {
            continue;
        };

        for key in cap[1].chars().filter(|&c| c != '\\') {
            pairs.push((key, value));
        }
    }

    pairs
}

fn build_table(rules: &[CompiledRule]) -> HashMap<char, char> {
    rules
        .iter()
        .flat_map(|rule| parse_table_entries(&rule.word))
        .collect()
}

#[derive(Debug, Default)]
struct RuleSet {
    rules: Arc<Vec<CompiledRule>>,
    hits: HashMap<String, u64>,
}

impl RuleSet {
    fn entries(&self) -> Vec<RuleEntry> {
        self.rules
            .iter()
            .map(|rule| RuleEntry {
                word: rule.word.clone(),
                hits: self.hits.get(&rule.word).copied().unwrap_or(0),
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct RuleState {
    sets: HashMap<Category, RuleSet>,
    tables: HashMap<Category, HashMap<char, char>>,
}

/// All active rule sets, guarded by the `regex` lock
pub struct RuleBook {
    state: Mutex<RuleState>,
    persist: Arc<dyn RulePersist>,
}

impl RuleBook {
    pub fn new(persist: Arc<dyn RulePersist>) -> Self {
        Self {
            state: Mutex::new(RuleState::default()),
            persist,
        }
    }

    /// Install a category from its persisted entries without saving
    pub fn load(&self, category: Category, entries: Vec<RuleEntry>) {
        let rules: Vec<CompiledRule> = entries.iter().map(|e| CompiledRule::compile(&e.word)).collect();
        let hits = entries.into_iter().map(|e| (e.word, e.hits)).collect();

        let mut state = self.state.lock();
        if category.encodes_table() {
            state.tables.insert(category, build_table(&rules));
        }
        state.sets.insert(
            category,
            RuleSet {
                rules: Arc::new(rules),
                hits,
            },
        );
    }

    /// Active categories in a stable order
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<_> = self.state.lock().sets.keys().copied().collect();
        categories.sort();
        categories
    }

    pub fn is_active(&self, category: Category) -> bool {
        self.state.lock().sets.contains_key(&category)
    }

    /// Match `text` against a category's rules
    ///
    /// Whitespace runs are collapsed first. If nothing matches and the text
    /// still contains spaces, one more pass runs with all whitespace removed.
    /// The first matching rule wins and its counter is persisted.
    pub fn classify(&self, text: &str, category: Category, ocr: bool) -> Option<RuleMatch> {
        if text.is_empty() {
            return None;
        }

        let rules = {
            let state = self.state.lock();
            Arc::clone(&state.sets.get(&category)?.rules)
        };

        let mut candidate = MULTI_SPACE_REGEX.replace_all(text, " ").into_owned();

        for pass in 0..2 {
            if pass == 1 {
                if !candidate.contains(' ') {
                    break;
                }
                candidate = SPACE_REGEX.replace_all(&candidate, "").into_owned();
            }

            for rule in rules.iter() {
                if ocr && rule.ocr_exempt {
                    continue;
                }

                let Some(regex) = &rule.regex else {
                    continue;
                };

                if let Some(m) = regex.find(&candidate) {
                    self.record_hit(category, &rule.word);
                    return Some(RuleMatch {
                        category,
                        word: rule.word.clone(),
                        matched: m.as_str().to_string(),
                    });
                }
            }
        }

        None
    }

    fn record_hit(&self, category: Category, word: &str) {
        let mut state = self.state.lock();
        let Some(set) = state.sets.get_mut(&category) else {
            return;
        };

        // The rule may have been removed by a concurrent sync
        let Some(hits) = set.hits.get_mut(word) else {
            return;
        };
        *hits += 1;

        self.persist.persist(category, &set.entries());
    }

    /// Replace a category's rules with `words`
    ///
    /// Rules no longer present lose their counters, new rules start at zero,
    /// surviving rules keep theirs. Returns `None` for inactive categories.
    pub fn sync_rules(&self, category: Category, words: Vec<String>) -> Option<SyncReport> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let set = state.sets.get_mut(&category)?;

        let target: HashSet<&str> = words.iter().map(String::as_str).collect();
        let current: HashSet<String> = set.rules.iter().map(|r| r.word.clone()).collect();

        let mut report = SyncReport::default();
        let mut rules: Vec<CompiledRule> = Vec::with_capacity(words.len());

        let old_rules = std::mem::take(&mut set.rules);
        for rule in Arc::try_unwrap(old_rules)
            .unwrap_or_else(|shared| shared.iter().map(|r| CompiledRule::compile(&r.word)).collect())
        {
            if target.contains(rule.word.as_str()) {
                rules.push(rule);
            } else {
                set.hits.remove(&rule.word);
                report.removed += 1;
            }
        }

        let mut seen = HashSet::new();
        for word in words {
            if current.contains(&word) || !seen.insert(word.clone()) {
                continue;
            }
            set.hits.insert(word.clone(), 0);
            rules.push(CompiledRule::compile(&word));
            report.added += 1;
        }

        set.rules = Arc::new(rules);
        let entries = set.entries();

        if category.encodes_table() {
            state.tables.insert(category, build_table(&set.rules));
        }

        self.persist.persist(category, &entries);

        if report.added > 0 || report.removed > 0 {
            info!(
                "Synced {} rules: {} added, {} removed",
                category, report.added, report.removed
            );
        }
        Some(report)
    }

    /// Hit counter of one rule
    pub fn hits(&self, category: Category, word: &str) -> Option<u64> {
        self.state.lock().sets.get(&category)?.hits.get(word).copied()
    }

    /// Persistable snapshot of a category
    pub fn entries(&self, category: Category) -> Option<Vec<RuleEntry>> {
        self.state.lock().sets.get(&category).map(RuleSet::entries)
    }

    /// Substitution table derived from a table category
    pub fn table(&self, category: Category) -> Option<HashMap<char, char>> {
        self.state.lock().tables.get(&category).cloned()
    }

    /// Take every active category's non-zero counters and reset all to zero
    ///
    /// Counts are cleared before they are delivered; a failed delivery loses
    /// that interval.
    pub fn drain_counts(&self) -> Vec<(Category, HashMap<String, u64>)> {
        let mut state = self.state.lock();
        let mut categories: Vec<Category> = state.sets.keys().copied().collect();
        categories.sort();

        let mut drained = Vec::with_capacity(categories.len());
        for category in categories {
            let Some(set) = state.sets.get_mut(&category) else {
                continue;
            };

            let counts: HashMap<String, u64> = set
                .hits
                .iter()
                .filter(|(_, &hits)| hits > 0)
                .map(|(word, &hits)| (word.clone(), hits))
                .collect();

            set.hits.values_mut().for_each(|hits| *hits = 0);
            self.persist.persist(category, &set.entries());

            debug!("Drained {} counters from {}", counts.len(), category);
            drained.push((category, counts));
        }

        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        saved: Mutex<Vec<(Category, Vec<RuleEntry>)>>,
    }

    impl RulePersist for Recorder {
        fn persist(&self, category: Category, entries: &[RuleEntry]) {
            self.saved.lock().push((category, entries.to_vec()));
        }
    }

    fn book_with(category: Category, words: &[&str]) -> (RuleBook, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let book = RuleBook::new(recorder.clone());
        book.load(
            category,
            words
                .iter()
                .map(|w| RuleEntry { word: w.to_string(), hits: 0 })
                .collect(),
        );
        (book, recorder)
    }

    #[test]
    fn test_category_names() {
        assert_eq!("ban".parse::<Category>(), Ok(Category::Ban));
        assert_eq!("adq".parse::<Category>(), Ok(Category::AdSub(AdLetter::new('q').unwrap())));
        assert!("adqq".parse::<Category>().is_err());
        assert!("ad1".parse::<Category>().is_err());
        assert!("porn".parse::<Category>().is_err());
        assert_eq!(Category::from_dataset("spc_words"), Ok(Category::Spc));
        assert!(Category::from_dataset("spc").is_err());
        assert_eq!(Category::all().count(), 35);
    }

    #[test]
    fn test_category_serde_rejects_unknown() {
        let parsed: Vec<Category> = serde_json::from_str(r#"["ad", "adz", "nm"]"#).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(serde_json::from_str::<Vec<Category>>(r#"["ad", "xyz"]"#).is_err());
    }

    #[test]
    fn test_classify_counts_hits() {
        let (book, recorder) = book_with(Category::Ban, &["free.?money"]);

        let m = book.classify("Free-Money NOW", Category::Ban, false).unwrap();
        assert_eq!(m.word, "free.?money");
        assert_eq!(m.matched, "Free-Money");
        assert_eq!(book.hits(Category::Ban, "free.?money"), Some(1));

        book.classify("Free-Money NOW", Category::Ban, false).unwrap();
        assert_eq!(book.hits(Category::Ban, "free.?money"), Some(2));
        assert_eq!(recorder.saved.lock().len(), 2);
    }

    #[test]
    fn test_first_match_wins() {
        let (book, _) = book_with(Category::Ad, &["buy", "buy now"]);
        let m = book.classify("buy now", Category::Ad, false).unwrap();
        assert_eq!(m.word, "buy");
        assert_eq!(book.hits(Category::Ad, "buy now"), Some(0));
    }

    #[test]
    fn test_space_injection_retry() {
        let (book, _) = book_with(Category::Ban, &["freemoney"]);
        assert!(book.classify("f r e e   m o n e y", Category::Ban, false).is_some());
        assert!(book.classify("nothing-here", Category::Ban, false).is_none());
    }

    #[test]
    fn test_ocr_exempt_rules() {
        let (book, _) = book_with(Category::Ad, &["promo(?# nocr)"]);
        assert!(book.classify("promo code", Category::Ad, true).is_none());
        assert!(book.classify("promo code", Category::Ad, false).is_some());
    }

    #[test]
    fn test_invalid_rule_never_matches() {
        let (book, _) = book_with(Category::Con, &["(unclosed", "contact"]);
        let m = book.classify("(unclosed contact", Category::Con, false).unwrap();
        assert_eq!(m.word, "contact");
        assert_eq!(book.entries(Category::Con).unwrap().len(), 2);
    }

    #[test]
    fn test_inactive_category() {
        let (book, _) = book_with(Category::Ban, &["x"]);
        assert!(book.classify("x", Category::Bio, false).is_none());
        assert!(book.sync_rules(Category::Bio, vec!["y".into()]).is_none());
    }

    #[test]
    fn test_sync_rules_idempotent() {
        let (book, _) = book_with(Category::Ban, &["alpha", "beta"]);
        book.classify("alpha", Category::Ban, false);

        let target = vec!["alpha".to_string(), "gamma".to_string()];
        let report = book.sync_rules(Category::Ban, target.clone()).unwrap();
        assert_eq!(report, SyncReport { added: 1, removed: 1 });

        let first = book.entries(Category::Ban).unwrap();
        let report = book.sync_rules(Category::Ban, target).unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(book.entries(Category::Ban).unwrap(), first);

        assert_eq!(book.hits(Category::Ban, "alpha"), Some(1));
        assert_eq!(book.hits(Category::Ban, "gamma"), Some(0));
        assert_eq!(book.hits(Category::Ban, "beta"), None);
    }

    #[test]
    fn test_table_rebuilt_on_sync() {
        let (book, _) = book_with(Category::Spc, &["[ａ@](?#a)"]);
        let table = book.table(Category::Spc).unwrap();
        assert_eq!(table.get(&'@'), Some(&'a'));

        book.sync_rules(Category::Spc, vec!["[０〇](?#o)".to_string()]);
        let table = book.table(Category::Spc).unwrap();
        assert_eq!(table.get(&'@'), None);
        assert_eq!(table.get(&'〇'), Some(&'o'));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_parse_table_entries() {
        assert_eq!(parse_table_entries(r"[\$ｓ](?#s)"), vec![('$', 's'), ('ｓ', 's')]);
        assert!(parse_table_entries("plain").is_empty());
    }

    #[test]
    fn test_drain_counts() {
        let (book, _) = book_with(Category::Ban, &["free.?money", "other"]);
        book.classify("free money", Category::Ban, false);
        book.classify("freemoney", Category::Ban, false);

        let drained = book.drain_counts();
        assert_eq!(drained.len(), 1);
        let (category, counts) = &drained[0];
        assert_eq!(*category, Category::Ban);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("free.?money"), Some(&2));

        assert_eq!(book.hits(Category::Ban, "free.?money"), Some(0));
    }
}
