//! Product and facility name normalizer.
//!
//! Handles:
//! - Parenthetical and punctuation stripping
//! - Number gluing ("FLOK 20" → "FLOK20")
//! - Core names (digits and packaging/dosage-form tokens removed) for grouping
//! - Variant names (digits kept) for telling strengths apart within a group
//! - Exact product keys used to join invoices to master records

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("parenthetical pattern"));

static SPACED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(\d+)\s*").expect("spaced number pattern"));

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("digits pattern"));

static TRAILING_PACK_SIZE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\d+\s*(ML|MG|GM|G|KG|L|TAB|TABLET|SYP|SYRUP|EXP|EXPT)\s*$")
        .expect("pack size pattern")
});

static DEFAULT_NORMALIZER: LazyLock<Normalizer> = LazyLock::new(Normalizer::new);

/// Which canonical form to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizeMode {
    /// Digits and packaging suffixes stripped; groups variants of one product.
    Core,
    /// Digits and suffixes kept; distinguishes strengths and forms.
    Variant,
}

/// Name normalizer.
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Upper-case tokens dropped in core mode
    suffix_tokens: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Create a normalizer with the default packaging/dosage-form tokens.
    pub fn new() -> Self {
        Self {
            suffix_tokens: Self::default_suffix_tokens(),
        }
    }

    /// Normalize product text. Empty input gives an empty string.
    pub fn normalize(&self, text: &str, mode: NormalizeMode) -> String {
        let without_parens = PARENTHETICAL.replace_all(text, "");
        let cleaned = strip_punctuation(&without_parens);
        let glued = SPACED_NUMBER.replace_all(cleaned.trim(), "$1");

        let collapsed = match mode {
            NormalizeMode::Variant => glued.split_whitespace().collect::<Vec<_>>().join(" "),
            NormalizeMode::Core => {
                let no_digits = DIGITS.replace_all(&glued, "");
                no_digits
                    .split_whitespace()
                    .filter(|token| !self.suffix_tokens.contains(&token.to_uppercase()))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        };

        collapsed.to_lowercase()
    }

    /// Exact join key for a product name ("BRETHNOL SYP 100ML" → "BRETHNOLSYP").
    pub fn product_key(&self, text: &str) -> String {
        let upper = strip_punctuation(text).trim().to_uppercase();
        let trimmed = TRAILING_PACK_SIZE.replace(&upper, "");
        trimmed.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Add a token dropped in core mode.
    pub fn add_suffix_token(&mut self, token: &str) {
        self.suffix_tokens.insert(token.trim().to_uppercase());
    }

    /// Whether a token is dropped in core mode.
    pub fn is_suffix_token(&self, token: &str) -> bool {
        self.suffix_tokens.contains(&token.to_uppercase())
    }

    /// Default packaging and dosage-form tokens.
    fn default_suffix_tokens() -> HashSet<String> {
        [
            "SYP", "SYRUP", "EXP", "EXPT", "PLUS", "DSR", "TAB", "TABLET", "GEL", "DROPS", "DROP",
            "SUSP", "KID", "DT", "LB", "CV", "MG", "O",
        ]
        .iter()
        .map(|t| t.to_string())
        .collect()
    }
}

/// Normalize with the default token table.
pub fn normalize(text: &str, mode: NormalizeMode) -> String {
    DEFAULT_NORMALIZER.normalize(text, mode)
}

/// Exact product key with the default normalizer.
pub fn product_key(text: &str) -> String {
    DEFAULT_NORMALIZER.product_key(text)
}

/// Keep word characters (alphanumerics and `_`) and whitespace.
pub(crate) fn strip_punctuation(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_gluing() {
        assert_eq!(normalize("FLOK 20", NormalizeMode::Variant), "flok20");
        assert_eq!(normalize("FLOK-20", NormalizeMode::Variant), "flok20");
        assert_eq!(normalize("FLOK 20", NormalizeMode::Core), "flok");
    }

    #[test]
    fn test_core_drops_suffix_tokens() {
        assert_eq!(normalize("Azee Syrup", NormalizeMode::Core), "azee");
        assert_eq!(normalize("Azee Syrup", NormalizeMode::Variant), "azee syrup");
        assert_eq!(normalize("Calpol Drops", NormalizeMode::Core), "calpol");
    }

    #[test]
    fn test_parenthetical_removed() {
        assert_eq!(normalize("Pan D (Strip of 10)", NormalizeMode::Core), "pan d");
        assert_eq!(normalize("(discontinued)", NormalizeMode::Variant), "");
    }

    #[test]
    fn test_glued_suffix_survives_core() {
        // "650 Tab" glues into the word, so the suffix is no longer a token.
        assert_eq!(normalize("Dolo 650 Tab", NormalizeMode::Variant), "dolo650tab");
        assert_eq!(normalize("Dolo 650 Tab", NormalizeMode::Core), "dolotab");
    }

    #[test]
    fn test_empty_and_symbol_input() {
        assert_eq!(normalize("", NormalizeMode::Core), "");
        assert_eq!(normalize("   ", NormalizeMode::Variant), "");
        assert_eq!(normalize("!!--!!", NormalizeMode::Core), "");
    }

    #[test]
    fn test_product_key_strips_pack_size() {
        assert_eq!(product_key("BRETHNOL SYP 100ML"), "BRETHNOLSYP");
        assert_eq!(product_key("brethnol syp 100 ml"), "BRETHNOLSYP");
        assert_eq!(product_key("Dolo 650 tablet"), "DOLO");
        assert_eq!(product_key("FLOK-20"), "FLOK20");
        assert_eq!(product_key("FLOK 20"), "FLOK20");
    }

    #[test]
    fn test_underscore_is_a_word_character() {
        assert_eq!(product_key("AB_C 10"), "AB_C10");
        assert_eq!(normalize("Ab_c Syrup", NormalizeMode::Variant), "ab_c syrup");
        assert_eq!(normalize("Ab-c Syrup", NormalizeMode::Variant), "abc syrup");
    }

    #[test]
    fn test_product_key_keeps_inner_numbers() {
        assert_eq!(product_key("BRETHNOL SYP 100ML PACK"), "BRETHNOLSYP100MLPACK");
    }

    #[test]
    fn test_custom_suffix_token() {
        let mut normalizer = Normalizer::new();
        assert!(!normalizer.is_suffix_token("cream"));
        normalizer.add_suffix_token("cream");
        assert_eq!(normalizer.normalize("Betnovate Cream", NormalizeMode::Core), "betnovate");
    }
}
