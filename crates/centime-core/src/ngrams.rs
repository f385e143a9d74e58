//! N-gram windowing over vendor fragments
//!
//! Slides word windows of length 1 to 4 over a cleaned vendor fragment and
//! scores each as a brand-name candidate. Brand names usually lead the
//! fragment; location words ("hauptbahnhof", "zentrum") are noise that must
//! rank below them however often they appear.

/// Keyword lists marking windows as a known business category
const BUSINESS_TYPES: &[(&str, &[&str])] = &[
    ("retail", &["shop", "store", "market", "mart", "retail"]),
    (
        "food",
        &["restaurant", "cafe", "bistro", "pizza", "burger", "kebab", "sushi"],
    ),
    (
        "transport",
        &["bus", "train", "taxi", "uber", "lyft", "transport", "metro"],
    ),
    (
        "fuel",
        &["shell", "bp", "esso", "texaco", "mobil", "tankstelle", "gas"],
    ),
    ("bank", &["bank", "atm", "sparkasse", "credit", "debit"]),
    ("pharmacy", &["pharmacy", "apotheke", "medical", "drogerie"]),
    ("telecom", &["telekom", "vodafone", "orange", "swisscom"]),
];

/// Address and place words that carry no brand identity
const LOCATION_NOISE: &[&str] = &[
    "street",
    "str",
    "strasse",
    "avenue",
    "ave",
    "road",
    "rd",
    "platz",
    "gasse",
    "hauptbahnhof",
    "bahnhof",
    "station",
    "airport",
    "flughafen",
    "zentrum",
    "center",
    "north",
    "south",
    "east",
    "west",
    "nord",
    "s\u{fc}d",
    "ost",
    "city",
    "stadt",
    "downtown",
    "uptown",
    "mall",
    "shopping",
];

/// What a scored window looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NgramKind {
    /// Window contains a known business-category keyword
    Business(&'static str),
    /// Window touches location-noise vocabulary
    Location,
    /// A single leading-quality token of 4+ characters
    BrandCandidate,
    /// Multi-word window, plausibly a full brand name
    CompositeBrand,
    Generic,
}

impl NgramKind {
    /// True for the kinds worth proposing as a parent brand
    pub fn is_brand_like(&self) -> bool {
        matches!(self, Self::BrandCandidate | Self::CompositeBrand)
    }
}

impl std::fmt::Display for NgramKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Business(category) => write!(f, "business_{}", category),
            Self::Location => write!(f, "location"),
            Self::BrandCandidate => write!(f, "brand_candidate"),
            Self::CompositeBrand => write!(f, "composite_brand"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// One scored word window
#[derive(Debug, Clone)]
pub struct Ngram {
    pub pattern: String,
    pub confidence: f64,
    pub kind: NgramKind,
    pub position: usize,
    pub words: Vec<String>,
}

/// Generate scored n-grams over a vendor fragment, best first.
///
/// Window lengths run from `min_len` to `max_len` words. Ties keep the
/// shorter, earlier window first, so "kkiosk" outranks "kkiosk zuerich" when
/// both saturate the score.
pub fn generate(fragment: &str, min_len: usize, max_len: usize) -> Vec<Ngram> {
    let cleaned: String = fragment
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().filter(|w| w.len() >= 2).collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut ngrams = Vec::new();
    for n in min_len..=max_len.min(words.len()) {
        for i in 0..=(words.len() - n) {
            let window = &words[i..i + n];
            ngrams.push(Ngram {
                pattern: window.join(" "),
                confidence: score_window(window, i),
                kind: classify(window),
                position: i,
                words: window.iter().map(|w| w.to_string()).collect(),
            });
        }
    }

    // Stable sort: equal scores preserve generation order
    ngrams.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ngrams
}

fn is_location(word: &str) -> bool {
    LOCATION_NOISE.contains(&word)
}

fn is_business(word: &str) -> bool {
    BUSINESS_TYPES
        .iter()
        .any(|(_, keywords)| keywords.contains(&word))
}

fn score_window(words: &[&str], position: usize) -> f64 {
    let mut confidence = 0.5;

    // Brand names usually lead the fragment
    if position == 0 {
        confidence += 0.3;
    }

    // Longer windows are more specific
    confidence += (words.len() as f64 * 0.1).min(0.3);

    let non_location = words.iter().filter(|w| !is_location(w)).count();
    confidence += (non_location as f64 * 0.1).min(0.2);

    let business = words.iter().filter(|w| is_business(w)).count();
    confidence += (business as f64 * 0.1).min(0.2);

    // A lone short token past the front is almost never the brand
    if words.len() == 1 && words[0].len() < 4 && position > 0 {
        confidence -= 0.2;
    }

    // Pure location windows are the worst candidates
    if words.iter().all(|w| is_location(w)) {
        confidence -= 0.4;
    }

    confidence.clamp(0.0, 1.0)
}

fn classify(words: &[&str]) -> NgramKind {
    let joined = words.join(" ");
    for (category, keywords) in BUSINESS_TYPES {
        if keywords.iter().any(|k| joined.contains(k)) {
            return NgramKind::Business(category);
        }
    }
    if words.iter().any(|w| is_location(w)) {
        return NgramKind::Location;
    }
    if words.len() == 1 && words[0].len() >= 4 {
        return NgramKind::BrandCandidate;
    }
    if words.len() > 1 {
        return NgramKind::CompositeBrand;
    }
    NgramKind::Generic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_brand_outranks_location_noise() {
        let ngrams = generate("kkiosk z\u{fc}rich hauptbahnhof", 1, 4);

        let top = &ngrams[0];
        assert_eq!(top.pattern, "kkiosk");
        assert_eq!(top.kind, NgramKind::BrandCandidate);
        assert_eq!(top.position, 0);

        let hauptbahnhof = ngrams
            .iter()
            .find(|n| n.pattern == "hauptbahnhof")
            .unwrap();
        assert_eq!(hauptbahnhof.kind, NgramKind::Location);
        assert!(hauptbahnhof.confidence < 0.3);
        assert!(hauptbahnhof.confidence < top.confidence);
    }

    #[test]
    fn test_business_keyword_classification() {
        let ngrams = generate("shell tankstelle winterthur", 1, 2);
        let shell = ngrams.iter().find(|n| n.pattern == "shell").unwrap();
        assert_eq!(shell.kind, NgramKind::Business("fuel"));
    }

    #[test]
    fn test_composite_brand_windows() {
        let ngrams = generate("starbucks coffee company", 2, 3);
        let first = ngrams.iter().find(|n| n.pattern == "starbucks coffee").unwrap();
        assert_eq!(first.kind, NgramKind::CompositeBrand);
        assert!(first.confidence > 0.9);
    }

    #[test]
    fn test_short_trailing_token_penalized() {
        let ngrams = generate("migros ag", 1, 1);
        let migros = ngrams.iter().find(|n| n.pattern == "migros").unwrap();
        let ag = ngrams.iter().find(|n| n.pattern == "ag").unwrap();
        assert!(ag.confidence < migros.confidence);
    }

    #[test]
    fn test_scores_stay_in_bounds() {
        for fragment in ["", "x", "shell shop market bank pizza", "str strasse platz gasse"] {
            for ngram in generate(fragment, 1, 4) {
                assert!((0.0..=1.0).contains(&ngram.confidence), "{:?}", ngram);
            }
        }
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(NgramKind::Business("food").to_string(), "business_food");
        assert_eq!(NgramKind::BrandCandidate.to_string(), "brand_candidate");
        assert!(NgramKind::CompositeBrand.is_brand_like());
        assert!(!NgramKind::Location.is_brand_like());
    }
}
