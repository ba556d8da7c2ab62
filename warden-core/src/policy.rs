//! Composite text policies built from atomic classifiers

use std::sync::Arc;

use crate::{
    AdLetter, Category, EmojiCatalog, EmojiKind, EmojiThresholds, RuleBook, RuleMatch,
    TextNormalizer,
};

/// Boolean combinations over rule categories and emoji heuristics
pub struct Classifier {
    rules: Arc<RuleBook>,
    emoji: EmojiCatalog,
    thresholds: EmojiThresholds,
    normalizer: TextNormalizer,
}

impl Classifier {
    pub fn new(
        rules: Arc<RuleBook>,
        emoji: EmojiCatalog,
        thresholds: EmojiThresholds,
        normalizer: TextNormalizer,
    ) -> Self {
        Self {
            rules,
            emoji,
            thresholds,
            normalizer,
        }
    }

    pub fn rules(&self) -> &Arc<RuleBook> {
        &self.rules
    }

    /// Run the normalization pipeline with the substitution table of `table`
    pub fn normalize(&self, text: &str, table: Option<Category>) -> String {
        let table = table.and_then(|category| self.rules.table(category));
        self.normalizer.normalize(text, table.as_ref())
    }

    /// Single-category match
    pub fn regex(&self, category: Category, text: &str, ocr: bool) -> Option<RuleMatch> {
        self.rules.classify(text, category, ocr)
    }

    pub fn emoji_signal(&self, kind: EmojiKind, text: &str) -> bool {
        self.emoji.signal(kind, text, &self.thresholds)
    }

    /// First ad subcategory that matches, skipping `exclude`
    pub fn is_ad_text(&self, text: &str, ocr: bool, exclude: Option<AdLetter>) -> Option<AdLetter> {
        if text.is_empty() {
            return None;
        }

        AdLetter::all()
            .filter(|&letter| Some(letter) != exclude)
            .find(|&letter| self.regex(Category::AdSub(letter), text, ocr).is_some())
    }

    /// Contact details: `con`, `iml` or `pho`
    pub fn is_con_text(&self, text: &str, ocr: bool) -> bool {
        self.regex(Category::Con, text, ocr).is_some()
            || self.regex(Category::Iml, text, ocr).is_some()
            || self.regex(Category::Pho, text, ocr).is_some()
    }

    /// Ban-worthy text
    ///
    /// Any of: a `ban` rule, ad with contact, emoji-ad with contact, ad
    /// subcategory with contact, ad subcategory with emoji-ad, or two
    /// distinct ad subcategories.
    pub fn is_ban_text(&self, text: &str, ocr: bool) -> bool {
        if self.regex(Category::Ban, text, ocr).is_some() {
            return true;
        }

        let ad = self.regex(Category::Ad, text, ocr).is_some();
        let con = self.is_con_text(text, ocr);
        if ad && con {
            return true;
        }

        let emoji = self.emoji_signal(EmojiKind::Ad, text);
        if emoji && con {
            return true;
        }

        let Some(letter) = self.is_ad_text(text, ocr, None) else {
            return false;
        };

        con || emoji || self.is_ad_text(text, ocr, Some(letter)).is_some()
    }

    /// Profile bio: `bio` rule or ban-worthy, on the normalized text
    pub fn is_bio_text(&self, text: &str) -> bool {
        let text = self.normalize(text, Some(Category::Spc));
        self.regex(Category::Bio, &text, false).is_some() || self.is_ban_text(&text, false)
    }

    /// Display name: `nm` rule, `bio` rule or ban-worthy, on the normalized text
    pub fn is_nm_text(&self, text: &str) -> bool {
        let text = self.normalize(text, Some(Category::Spc));
        self.regex(Category::Nm, &text, false).is_some()
            || self.regex(Category::Bio, &text, false).is_some()
            || self.is_ban_text(&text, false)
    }
}
