//! Vendor pattern matching and categorization learning
//!
//! Two halves: the matcher scores new transactions against the learned vendor
//! pattern library and decides auto-assign vs. needs-review, and the learner
//! turns a human confirmation into vendor patterns plus a similarity sweep
//! over the remaining uncategorized transactions.

use serde::Serialize;
use tracing::{debug, info};

use crate::db::{Database, LearningCommit, TxCategorization, VendorMutation};
use crate::error::{Error, Result};
use crate::models::{CategoryType, Transaction, Vendor};
use crate::normalize::{extract_vendor, normalize_vendor, similarity, suggest_vendor_name};

/// Confidence recorded when a keyword class routes a transaction to manual review
const MANUAL_REVIEW_CONFIDENCE: f64 = 0.5;
/// Similarity floor for the post-confirmation sweep
const SWEEP_SIMILARITY: f64 = 0.9;
/// Confidence recorded on swept transactions
const SWEEP_CONFIDENCE: f64 = 0.95;
/// Similarity floor for vendor suggestions (deliberately permissive)
const SUGGESTION_FLOOR: f64 = 0.4;

/// Keyword classes that route straight to a manual-review bucket, before any
/// pattern matching. Cash and wallet payments carry no merchant identity, so
/// learning from them would only produce garbage patterns.
const MANUAL_REVIEW_CLASSES: &[(&str, &str)] = &[
    ("twint", "TWINT Payments"),
    ("atm", "ATM Withdrawals"),
    ("geldautomat", "ATM Withdrawals"),
    ("bancomat", "ATM Withdrawals"),
    ("cash withdrawal", "ATM Withdrawals"),
    ("transfer", "Bank Transfers"),
    ("\u{fc}berweisung", "Bank Transfers"),
    ("virement", "Bank Transfers"),
    ("payment order", "Bank Transfers"),
    ("standing order", "Bank Transfers"),
    ("dauerauftrag", "Bank Transfers"),
    ("ordre permanent", "Bank Transfers"),
];

const FALLBACK_REVIEW_CATEGORY: &str = "Manual Review";

/// Counts from a batch categorization run
#[derive(Debug, Default, Clone, Serialize)]
pub struct CategorizationSummary {
    pub auto_categorized: usize,
    pub sent_to_manual_review: usize,
    pub needs_review: usize,
}

/// What a confirmation taught the engine
#[derive(Debug, Clone, Serialize)]
pub struct LearningOutcome {
    pub vendor_id: Option<i64>,
    pub vendor_created: bool,
    pub pattern_learned: Option<String>,
    pub similar_categorized: usize,
    pub learning_applied: bool,
}

/// One candidate vendor for a description, ranked by pattern similarity
#[derive(Debug, Clone, Serialize)]
pub struct VendorSuggestion {
    pub vendor_id: i64,
    pub vendor_name: String,
    pub category_id: Option<i64>,
    pub similarity: f64,
    pub matching_pattern: String,
    pub allows_learning: bool,
}

/// How a description flows through extraction, normalization and matching
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub original_description: String,
    pub extracted_vendor: String,
    pub normalized_pattern: String,
    pub manual_review_class: Option<String>,
    pub suggestions: Vec<VendorSuggestion>,
}

/// Categorization matcher and learner over one user's database
pub struct Categorizer<'a> {
    db: &'a Database,
}

impl<'a> Categorizer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// The manual-review keyword class a description falls into, if any
    fn manual_review_class(description: &str) -> Option<(&'static str, &'static str)> {
        let lower = description.to_lowercase();
        MANUAL_REVIEW_CLASSES
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
            .copied()
    }

    /// Match a description against the learned vendor library.
    ///
    /// Exact pattern equality short-circuits at 1.0; otherwise the best fuzzy
    /// score that clears the vendor's own threshold wins. Returns the best
    /// vendor (if any cleared) and the best score seen.
    pub fn match_vendor(&self, description: &str) -> Result<(Option<Vendor>, f64)> {
        let pattern = normalize_vendor(extract_vendor(description));

        let mut best: Option<Vendor> = None;
        let mut best_score = 0.0;
        for vendor in self.db.list_vendors(true)? {
            for stored in &vendor.patterns {
                if *stored == pattern {
                    return Ok((Some(vendor), 1.0));
                }
                if stored.len() > 2 && pattern.len() > 2 {
                    let score = similarity(stored, &pattern);
                    if score > best_score && score >= vendor.confidence_threshold {
                        best_score = score;
                        best = Some(vendor.clone());
                    }
                }
            }
        }
        Ok((best, best_score))
    }

    /// Run the matcher over every uncategorized transaction.
    ///
    /// Manual-review keyword classes are routed first; everything else goes
    /// through the pattern library. All outcomes commit in one batch.
    pub fn categorize_new(&self, confidence_threshold: f64) -> Result<CategorizationSummary> {
        let _guard = self.db.write_guard();

        let transactions = self.db.list_uncategorized(None)?;
        let mut outcomes = Vec::new();
        let mut summary = CategorizationSummary::default();

        for tx in &transactions {
            if let Some(outcome) = self.route_manual_review(tx)? {
                outcomes.push(outcome);
                summary.sent_to_manual_review += 1;
                continue;
            }

            let (vendor, confidence) = self.match_vendor(&tx.description)?;
            match vendor {
                Some(vendor) if confidence >= confidence_threshold => {
                    let category_learns = match vendor.default_category_id {
                        Some(cid) => self
                            .db
                            .get_category(cid)?
                            .map(|c| c.allows_learning())
                            .unwrap_or(false),
                        None => false,
                    };
                    if vendor.allow_learning && category_learns {
                        debug!(
                            "Auto-categorized '{}' -> {} ({:.2})",
                            extract_vendor(&tx.description),
                            vendor.name,
                            confidence
                        );
                        outcomes.push(TxCategorization {
                            tx_id: tx.id,
                            category_id: vendor.default_category_id,
                            vendor_id: Some(vendor.id),
                            confidence_score: confidence,
                            needs_review: false,
                        });
                        summary.auto_categorized += 1;
                    } else {
                        // Vendor known but learning disabled somewhere; a
                        // human keeps the final say
                        outcomes.push(TxCategorization {
                            tx_id: tx.id,
                            category_id: None,
                            vendor_id: Some(vendor.id),
                            confidence_score: confidence,
                            needs_review: true,
                        });
                        summary.needs_review += 1;
                    }
                }
                _ => {
                    outcomes.push(TxCategorization {
                        tx_id: tx.id,
                        category_id: None,
                        vendor_id: None,
                        confidence_score: confidence,
                        needs_review: true,
                    });
                    summary.needs_review += 1;
                }
            }
        }

        self.db.batch_categorize(&outcomes)?;
        if summary.auto_categorized > 0 || summary.sent_to_manual_review > 0 {
            info!(
                "Categorized {} transactions, {} sent to manual review",
                summary.auto_categorized, summary.sent_to_manual_review
            );
        }
        Ok(summary)
    }

    fn route_manual_review(&self, tx: &Transaction) -> Result<Option<TxCategorization>> {
        let Some((_, category_name)) = Self::manual_review_class(&tx.description) else {
            return Ok(None);
        };
        let category = match self.db.find_manual_review_category(category_name)? {
            Some(c) => Some(c),
            None => self.db.find_manual_review_category(FALLBACK_REVIEW_CATEGORY)?,
        };
        Ok(category.map(|c| TxCategorization {
            tx_id: tx.id,
            category_id: Some(c.id),
            vendor_id: None,
            confidence_score: MANUAL_REVIEW_CONFIDENCE,
            needs_review: true,
        }))
    }

    /// Apply a human confirmation: categorize the transaction and, when
    /// learning is permitted, grow the vendor library and sweep similar
    /// uncategorized transactions.
    ///
    /// Learning is skipped entirely when the target category is a
    /// manual-review bucket or refuses learning, and also when the
    /// transaction is being moved *out of* a manual-review bucket. Triage
    /// buckets hold cash/wallet noise; minting patterns from them the moment
    /// a human sorts one would poison the library.
    pub fn confirm(
        &self,
        transaction_id: i64,
        category_id: i64,
        vendor_name: Option<&str>,
    ) -> Result<LearningOutcome> {
        let _guard = self.db.write_guard();

        let tx = self
            .db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", transaction_id)))?;
        let category = self
            .db
            .get_category(category_id)?
            .ok_or_else(|| Error::NotFound(format!("category {}", category_id)))?;

        let prior_was_manual_review = match tx.category_id {
            Some(prior_id) => self
                .db
                .get_category(prior_id)?
                .map(|c| c.category_type == CategoryType::ManualReview)
                .unwrap_or(false),
            None => false,
        };
        let learning_applied = category.allows_learning()
            && category.category_type != CategoryType::ManualReview
            && !prior_was_manual_review;

        if !learning_applied {
            self.db.commit_learning(&LearningCommit {
                vendor: VendorMutation::None,
                category_id,
                confirmed_tx_id: transaction_id,
                swept_tx_ids: Vec::new(),
                sweep_confidence: SWEEP_CONFIDENCE,
            })?;
            debug!(
                "Confirmed transaction {} without learning (category '{}')",
                transaction_id, category.name
            );
            return Ok(LearningOutcome {
                vendor_id: None,
                vendor_created: false,
                pattern_learned: None,
                similar_categorized: 0,
                learning_applied: false,
            });
        }

        let fragment = extract_vendor(&tx.description);
        let pattern = normalize_vendor(fragment);
        let name = vendor_name
            .map(str::to_string)
            .unwrap_or_else(|| suggest_vendor_name(fragment));

        info!(
            "Learning vendor pattern '{}' from '{}' (vendor '{}')",
            pattern, fragment, name
        );

        // Exact-pattern vendor wins, then same-name vendor, then a new one
        let (mutation, vendor_created) =
            if let Some(existing) = self.db.find_vendor_with_pattern(&pattern)? {
                (VendorMutation::Retarget { vendor_id: existing.id }, false)
            } else if let Some(existing) = self.db.find_vendor_by_name(&name)? {
                (
                    VendorMutation::AttachPattern {
                        vendor_id: existing.id,
                        pattern: pattern.clone(),
                    },
                    false,
                )
            } else {
                (
                    VendorMutation::Create {
                        name,
                        pattern: pattern.clone(),
                    },
                    true,
                )
            };

        let swept_tx_ids = self.sweep_candidates(&pattern, transaction_id)?;
        let similar_categorized = swept_tx_ids.len();

        let vendor_id = self.db.commit_learning(&LearningCommit {
            vendor: mutation,
            category_id,
            confirmed_tx_id: transaction_id,
            swept_tx_ids,
            sweep_confidence: SWEEP_CONFIDENCE,
        })?;

        if let Some(id) = vendor_id {
            self.db.record_vendor_match(id, tx.amount)?;
        }
        if similar_categorized > 0 {
            info!(
                "Swept {} similar transactions into category {}",
                similar_categorized, category_id
            );
        }

        Ok(LearningOutcome {
            vendor_id,
            vendor_created,
            pattern_learned: Some(pattern),
            similar_categorized,
            learning_applied: true,
        })
    }

    /// Uncategorized transactions whose normalized pattern equals or closely
    /// resembles the just-learned one
    fn sweep_candidates(&self, pattern: &str, exclude_tx_id: i64) -> Result<Vec<i64>> {
        let mut matched = Vec::new();
        for tx in self.db.list_sweep_candidates(exclude_tx_id)? {
            let candidate = normalize_vendor(extract_vendor(&tx.description));
            if candidate == pattern {
                matched.push(tx.id);
                continue;
            }
            if candidate.len() > 2
                && pattern.len() > 2
                && similarity(&candidate, pattern) >= SWEEP_SIMILARITY
            {
                matched.push(tx.id);
            }
        }
        Ok(matched)
    }

    /// Rank existing vendors against a description, for the review UI
    pub fn vendor_suggestions(&self, description: &str, limit: usize) -> Result<Vec<VendorSuggestion>> {
        let pattern = normalize_vendor(extract_vendor(description));

        let mut suggestions = Vec::new();
        for vendor in self.db.list_vendors(false)? {
            let mut best = 0.0;
            let mut matching = String::new();
            for stored in &vendor.patterns {
                let score = similarity(stored, &pattern);
                if score > best {
                    best = score;
                    matching = stored.clone();
                }
            }
            if best > SUGGESTION_FLOOR {
                suggestions.push(VendorSuggestion {
                    vendor_id: vendor.id,
                    vendor_name: vendor.name.clone(),
                    category_id: vendor.default_category_id,
                    similarity: best,
                    matching_pattern: matching,
                    allows_learning: vendor.allow_learning,
                });
            }
        }
        suggestions.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions.truncate(limit);
        Ok(suggestions)
    }

    /// Trace how a description would be processed, for diagnostics
    pub fn debug_info(&self, description: &str) -> Result<DebugInfo> {
        let fragment = extract_vendor(description);
        Ok(DebugInfo {
            original_description: description.to_string(),
            extracted_vendor: fragment.to_string(),
            normalized_pattern: normalize_vendor(fragment),
            manual_review_class: Self::manual_review_class(description)
                .map(|(class, _)| class.to_string()),
            suggestions: self.vendor_suggestions(description, 3)?,
        })
    }
}
