//! Description normalization: raw bank text to comparable vendor patterns
//!
//! Bank descriptions arrive as "card prefix, merchant city" noise. Extraction
//! peels off the merchant fragment, normalization reduces it to a short
//! canonical pattern ("Lidl Zuerich 0800 Zuerich" -> "LIDLZUERICH") that
//! survives store numbers and address churn.

use strsim::normalized_levenshtein;

/// Standalone address tokens that carry no merchant identity
const NOISE_WORDS: &[&str] = &[
    "STR", "STRASSE", "STREET", "ST", "AVENUE", "AVE", "PLATZ", "GASSE",
];

/// Pull the merchant fragment out of a raw description.
///
/// Card exports commonly read "Purchase Visa Debit xxxx 7693, Lidl Zuerich";
/// everything after the first comma is the merchant when it is long enough to
/// be meaningful. Descriptions without a comma are used whole.
pub fn extract_vendor(description: &str) -> &str {
    if let Some((_, after)) = description.split_once(',') {
        let fragment = after.trim();
        if fragment.len() > 3 {
            return fragment;
        }
    }
    description.trim()
}

/// Reduce a vendor fragment to its canonical match pattern.
///
/// Upper-cases, drops digits and punctuation, removes standalone address
/// words, then concatenates the first few meaningful tokens. Idempotent:
/// feeding a pattern back through produces the same pattern.
pub fn normalize_vendor(fragment: &str) -> String {
    if fragment.trim().is_empty() {
        return String::new();
    }

    let upper = fragment.to_uppercase();

    // Alphabetic runs only; digits and punctuation act as separators
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in upper.chars() {
        if ch.is_ascii_alphabetic() {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let mut pattern = String::new();
    let mut used = 0;
    for token in &tokens {
        if NOISE_WORDS.contains(&token.as_str()) {
            continue;
        }
        if token.len() < 3 {
            continue;
        }
        pattern.push_str(token);
        used += 1;
        // Patterns much longer than this get brittle against address churn
        if pattern.len() >= 8 || used >= 3 {
            break;
        }
    }

    if pattern.len() >= 2 {
        return pattern;
    }

    // Nothing token-worthy survived (pure digits, initials). Fall back to a
    // raw prefix so the transaction still gets a stable fingerprint.
    upper.chars().filter(|c| !c.is_whitespace()).take(10).collect()
}

/// Similarity of two patterns in [0, 1]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b)
}

/// Derive a presentable vendor name from an extracted fragment.
///
/// "lidl zuerich 0800" becomes "Lidl Zuerich"; used when the human confirms
/// a category without naming the vendor.
pub fn suggest_vendor_name(fragment: &str) -> String {
    let words: Vec<&str> = fragment
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        return "Unknown Vendor".to_string();
    }

    let mut parts: Vec<String> = words
        .iter()
        .take(2)
        .filter(|w| w.len() >= 3)
        .map(|w| title_case(w))
        .collect();

    if parts.is_empty() {
        parts.push(title_case(words[0]));
    }
    parts.join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_vendor_after_comma() {
        let desc = "Purchase Visa Debit xxxx 7693, Lidl Zuerich 0800 Zuerich";
        assert_eq!(extract_vendor(desc), "Lidl Zuerich 0800 Zuerich");
    }

    #[test]
    fn test_extract_vendor_no_comma_uses_whole() {
        assert_eq!(extract_vendor("Ihre Zahlung"), "Ihre Zahlung");
    }

    #[test]
    fn test_extract_vendor_short_suffix_uses_whole() {
        assert_eq!(extract_vendor("Payment, AG"), "Payment, AG");
    }

    #[test]
    fn test_normalize_drops_digits_and_noise_words() {
        assert_eq!(normalize_vendor("Lidl Zuerich 0800 Zuerich"), "LIDLZUERICH");
        assert_eq!(normalize_vendor("COOP-2238 WINT. ST"), "COOPWINT");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in [
            "Lidl Zuerich 0800 Zuerich",
            "Migros Bahnhofstrasse 123",
            "COOP-2238 WINT. ST",
            "a1",
            "7-11",
            "  LIDL  zuerich ",
        ] {
            let once = normalize_vendor(input);
            assert_eq!(normalize_vendor(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_normalize_case_and_whitespace_insensitive() {
        assert_eq!(
            normalize_vendor("lidl   ZUERICH"),
            normalize_vendor("LIDL Zuerich")
        );
    }

    #[test]
    fn test_normalize_short_fallback() {
        // No alphabetic token of length >= 3; falls back to raw prefix
        assert_eq!(normalize_vendor("7-11"), "7-11");
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("LIDL", "LIDL"), 1.0);
        assert_eq!(similarity("", "LIDL"), 0.0);
        let s = similarity("LIDLZUERICH", "LIDLZURICH");
        assert!(s > 0.85 && s < 1.0);
    }

    #[test]
    fn test_suggest_vendor_name() {
        assert_eq!(suggest_vendor_name("lidl zuerich 0800"), "Lidl Zuerich");
        assert_eq!(suggest_vendor_name("AG 12"), "Ag");
        assert_eq!(suggest_vendor_name("1234"), "Unknown Vendor");
    }
}
