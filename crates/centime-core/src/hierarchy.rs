//! Brand hierarchy discovery across the learned vendor set
//!
//! "Migros" should be the parent of "Migros Bahnhofstrasse" and
//! "Migros Zuerich" rather than three unrelated vendors. Parent candidates
//! come from the high-confidence brand n-grams of each vendor; a vendor is a
//! candidate child when the parent's words all appear in its name and the
//! strings are reasonably similar.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::models::Vendor;
use crate::ngrams;
use crate::normalize::{extract_vendor, similarity};

/// Parent n-grams must clear this confidence to be proposed
const PARENT_CANDIDATE_CONFIDENCE: f64 = 0.7;
/// Minimum string similarity between a parent candidate and a child name.
/// Edit-distance similarity punishes length gaps hard ("migros" against
/// "migros bahnhofstrasse" scores ~0.29), so this sits well below the
/// suggestion floor; the word-subset check is the primary gate.
const CHILD_SIMILARITY: f64 = 0.25;
/// Floor for grouping suggestions against existing vendors
const SUGGESTION_SIMILARITY: f64 = 0.4;
/// Brand n-grams above this confidence name a new vendor
const NEW_NAME_CONFIDENCE: f64 = 0.6;

/// A vendor proposed as the child of a parent brand
#[derive(Debug, Clone, Serialize)]
pub struct ChildLink {
    pub vendor_id: i64,
    pub vendor_name: String,
    pub confidence: f64,
    pub shared_words: Vec<String>,
}

/// An existing vendor that could absorb a new description
#[derive(Debug, Clone, Serialize)]
pub struct GroupingSuggestion {
    pub vendor_id: i64,
    pub vendor_name: String,
    pub category_id: Option<i64>,
    pub similarity: f64,
    pub ngram_confidence: f64,
    pub combined_confidence: f64,
    pub matching_ngram: String,
    pub ngram_type: String,
    pub hierarchical: bool,
    pub siblings: Vec<SiblingLink>,
}

/// A vendor sharing a parent brand with another
#[derive(Debug, Clone, Serialize)]
pub struct SiblingLink {
    pub vendor_id: i64,
    pub vendor_name: String,
    pub shared_parent: String,
    pub similarity: f64,
}

/// Hierarchy resolver over one user's vendor set
pub struct HierarchyResolver<'a> {
    db: &'a Database,
}

impl<'a> HierarchyResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Propose parent brands and their candidate children across all vendors
    pub fn find_hierarchies(&self) -> Result<HashMap<String, Vec<ChildLink>>> {
        let vendors = self.db.list_vendors(false)?;

        let mut parents: Vec<(String, i64)> = Vec::new();
        let mut seen = HashSet::new();
        for vendor in &vendors {
            for candidate in parent_candidates(vendor) {
                if seen.insert(candidate.clone()) {
                    parents.push((candidate, vendor.id));
                }
            }
        }

        let mut hierarchies = HashMap::new();
        for (candidate, source_vendor_id) in parents {
            let children = find_children(&candidate, &vendors, source_vendor_id);
            if !children.is_empty() {
                hierarchies.insert(candidate, children);
            }
        }

        debug!("Found {} parent brand candidates", hierarchies.len());
        Ok(hierarchies)
    }

    /// Rank existing vendors against a new description using n-gram matching,
    /// flagging hierarchical (parent brand) matches and sibling groups
    pub fn suggest_grouping(
        &self,
        description: &str,
        limit: usize,
    ) -> Result<Vec<GroupingSuggestion>> {
        let fragment = extract_vendor(description);
        let grams = ngrams::generate(fragment, 1, 4);
        let vendors = self.db.list_vendors(false)?;

        let mut suggestions = Vec::new();
        let mut seen_vendors = HashSet::new();

        for gram in grams.iter().take(10) {
            for vendor in &vendors {
                if seen_vendors.contains(&vendor.id) {
                    continue;
                }

                let name_similarity = similarity(&gram.pattern, &vendor.name.to_lowercase());
                let pattern_similarity = vendor
                    .patterns
                    .iter()
                    .map(|p| similarity(&gram.pattern, &denormalize(p)))
                    .fold(0.0, f64::max);
                let best = name_similarity.max(pattern_similarity);
                if best <= SUGGESTION_SIMILARITY {
                    continue;
                }

                seen_vendors.insert(vendor.id);
                suggestions.push(GroupingSuggestion {
                    vendor_id: vendor.id,
                    vendor_name: vendor.name.clone(),
                    category_id: vendor.default_category_id,
                    similarity: best,
                    ngram_confidence: gram.confidence,
                    combined_confidence: gram.confidence * 0.4 + best * 0.6,
                    matching_ngram: gram.pattern.clone(),
                    ngram_type: gram.kind.to_string(),
                    hierarchical: is_hierarchical(&gram.pattern, &vendor.name),
                    siblings: Vec::new(),
                });
            }
        }

        suggestions.sort_by(|a, b| {
            b.combined_confidence
                .partial_cmp(&a.combined_confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions.truncate(limit);

        for suggestion in &mut suggestions {
            suggestion.siblings = siblings(suggestion.vendor_id, &vendors);
        }
        Ok(suggestions)
    }

    /// Propose a clean name for a brand-new vendor from its best n-gram
    pub fn suggest_new_vendor_name(&self, description: &str) -> String {
        let fragment = extract_vendor(description);
        let grams = ngrams::generate(fragment, 1, 4);

        for gram in &grams {
            if gram.kind.is_brand_like() && gram.confidence > NEW_NAME_CONFIDENCE {
                return title_case(&gram.pattern);
            }
        }
        match grams.first() {
            Some(gram) => title_case(&gram.pattern),
            None => title_case(fragment),
        }
    }
}

/// High-confidence brand n-grams from a vendor's name and stored patterns
fn parent_candidates(vendor: &Vendor) -> Vec<String> {
    let mut candidates = HashSet::new();

    for gram in ngrams::generate(&vendor.name, 1, 2) {
        if gram.kind.is_brand_like() && gram.confidence > PARENT_CANDIDATE_CONFIDENCE {
            candidates.insert(gram.pattern);
        }
    }
    for pattern in &vendor.patterns {
        for gram in ngrams::generate(&denormalize(pattern), 1, 2) {
            if gram.kind.is_brand_like() && gram.confidence > PARENT_CANDIDATE_CONFIDENCE {
                candidates.insert(gram.pattern);
            }
        }
    }

    candidates.into_iter().collect()
}

fn find_children(parent: &str, vendors: &[Vendor], exclude_vendor_id: i64) -> Vec<ChildLink> {
    let parent_words: HashSet<&str> = parent.split_whitespace().collect();
    let mut children = Vec::new();

    for vendor in vendors {
        if vendor.id == exclude_vendor_id {
            continue;
        }
        let name_lower = vendor.name.to_lowercase();
        let vendor_words: HashSet<&str> = name_lower.split_whitespace().collect();
        if !parent_words.is_subset(&vendor_words) {
            continue;
        }
        if similarity(parent, &name_lower) <= CHILD_SIMILARITY {
            continue;
        }
        let mut shared: Vec<String> = parent_words
            .intersection(&vendor_words)
            .map(|w| w.to_string())
            .collect();
        shared.sort();
        children.push(ChildLink {
            vendor_id: vendor.id,
            vendor_name: vendor.name.clone(),
            confidence: hierarchy_confidence(parent, &name_lower),
            shared_words: shared,
        });
    }
    children
}

/// Confidence that `child` belongs under `parent`: word-overlap ratio (60%),
/// string similarity (30%), and a bonus when the parent is the shorter core
/// brand (10%)
fn hierarchy_confidence(parent: &str, child: &str) -> f64 {
    let parent_words: HashSet<&str> = parent.split_whitespace().collect();
    let child_words: HashSet<&str> = child.split_whitespace().collect();
    if parent_words.is_empty() {
        return 0.0;
    }

    let overlap = parent_words.intersection(&child_words).count() as f64 / parent_words.len() as f64;
    let mut confidence = overlap * 0.6 + similarity(parent, child) * 0.3;
    if parent.len() < child.len() {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

/// A match is hierarchical when the n-gram's words are a strict subset of the
/// vendor's name words
fn is_hierarchical(pattern: &str, vendor_name: &str) -> bool {
    let pattern_words: HashSet<&str> = pattern.split_whitespace().collect();
    let name_lower = vendor_name.to_lowercase();
    let name_words: HashSet<&str> = name_lower.split_whitespace().collect();
    pattern_words.is_subset(&name_words) && pattern_words.len() < name_words.len()
}

fn siblings(vendor_id: i64, vendors: &[Vendor]) -> Vec<SiblingLink> {
    let Some(vendor) = vendors.iter().find(|v| v.id == vendor_id) else {
        return Vec::new();
    };

    let mut result = Vec::new();
    for parent in parent_candidates(vendor) {
        for child in find_children(&parent, vendors, vendor_id) {
            result.push(SiblingLink {
                vendor_id: child.vendor_id,
                vendor_name: child.vendor_name,
                shared_parent: parent.clone(),
                similarity: child.confidence,
            });
        }
    }
    result
}

/// Best-effort readable form of a stored pattern. Normalization is lossy, so
/// this only splits camel-case boundaries and lower-cases; an all-caps
/// pattern comes back as one lower-cased word.
fn denormalize(pattern: &str) -> String {
    let mut spaced = String::with_capacity(pattern.len() + 4);
    let chars: Vec<char> = pattern.chars().collect();
    for (i, &ch) in chars.iter().enumerate() {
        if i > 0 && ch.is_uppercase() && chars[i - 1].is_lowercase() {
            spaced.push(' ');
        }
        spaced.push(ch);
    }
    spaced.to_lowercase()
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
