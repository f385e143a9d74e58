//! Learning reusable transfer patterns from confirmed transfers
//!
//! Every confirmed transfer teaches the engine a fingerprint of its two
//! accounts, its description shape and its amount bucket. Future detection
//! runs replay those fingerprints over unclaimed transactions and surface
//! recurring flows (monthly savings moves, credit card settlements) at high
//! confidence.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{Database, NewTransferPattern};
use crate::error::{Error, Result};
use crate::models::{Account, Transaction, TransferPattern};
use crate::normalize::similarity;

/// Two stored patterns describing the same account pair merge at this similarity
const MERGE_SIMILARITY: f64 = 0.8;
/// An account matches a stored side at this similarity
const ACCOUNT_MATCH_SIMILARITY: f64 = 0.7;
/// Row cap per application run
const CANDIDATE_LIMIT: i64 = 500;

/// Keywords that classify a transfer description
const DESCRIPTION_KEYWORDS: &[&str] = &[
    "transfer",
    "\u{fc}berweisung",
    "virement",
    "internal",
    "zwischen",
    "to",
    "from",
    "payment",
    "wire",
];

/// A pair proposed by a learned pattern
#[derive(Debug, Clone, Serialize)]
pub struct PatternMatch {
    pub from_transaction_id: i64,
    pub to_transaction_id: i64,
    pub confidence: f64,
    pub amount: f64,
    pub date_difference: i64,
    pub pattern_id: i64,
    pub pattern_name: String,
    pub auto_confirm: bool,
}

/// Transfer pattern learner over one user's database
pub struct PatternLearner<'a> {
    db: &'a Database,
}

impl<'a> PatternLearner<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Learn from a confirmed transfer: merge into a similar existing pattern
    /// or mint a new one. Returns the pattern id.
    pub fn learn_from_transfer(
        &self,
        transfer_id: i64,
        pattern_name: Option<&str>,
    ) -> Result<i64> {
        let _guard = self.db.write_guard();

        let transfer = self
            .db
            .get_transfer(transfer_id)?
            .ok_or_else(|| Error::NotFound(format!("transfer {}", transfer_id)))?;
        let from_account = self
            .db
            .get_account(transfer.from_account_id)?
            .ok_or_else(|| Error::NotFound(format!("account {}", transfer.from_account_id)))?;
        let to_account = self
            .db
            .get_account(transfer.to_account_id)?
            .ok_or_else(|| Error::NotFound(format!("account {}", transfer.to_account_id)))?;

        let from_pattern = account_pattern(&from_account);
        let to_pattern = account_pattern(&to_account);
        let description_pattern = extract_description_pattern(transfer.description.as_deref());

        // A close match on both account sides is the same flow; merge rather
        // than letting near-duplicate patterns accumulate
        for existing in self.db.list_active_transfer_patterns()? {
            let from_match = similarity(&existing.from_account_pattern, &from_pattern);
            let to_match = similarity(&existing.to_account_pattern, &to_pattern);
            if from_match > MERGE_SIMILARITY && to_match > MERGE_SIMILARITY {
                self.db.record_pattern_match(existing.id, transfer.amount)?;
                info!("Merged transfer into existing pattern '{}'", existing.name);
                return Ok(existing.id);
            }
        }

        let name = pattern_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} -> {}", from_account.name, to_account.name));
        self.db.insert_transfer_pattern(&NewTransferPattern {
            name,
            from_account_pattern: from_pattern,
            to_account_pattern: to_pattern,
            description_pattern,
            amount_bucket: amount_bucket(transfer.amount),
            typical_amount: transfer.amount.abs(),
            amount_tolerance: 0.05,
            max_days_between: 3,
            confidence_threshold: 0.8,
            auto_confirm: false,
            created_from_transfer_id: Some(transfer_id),
        })
    }

    /// Replay all active patterns over recent unclaimed transactions
    pub fn find_matches(&self, days_lookback: i64) -> Result<Vec<PatternMatch>> {
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(days_lookback);
        let transactions = self.db.list_unclaimed_in_window(cutoff, CANDIDATE_LIMIT)?;
        let accounts = self.db.list_accounts(true)?;
        let patterns = self.db.list_active_transfer_patterns()?;

        let mut matches = Vec::new();
        for pattern in &patterns {
            self.match_pattern(pattern, &transactions, &accounts, &mut matches);
        }

        // A pair can surface under several patterns; keep its first (patterns
        // are ordered most-matched first)
        let mut seen = std::collections::HashSet::new();
        matches.retain(|m| seen.insert((m.from_transaction_id, m.to_transaction_id)));
        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            "Pattern application: {} matches from {} patterns",
            matches.len(),
            patterns.len()
        );
        Ok(matches)
    }

    fn match_pattern(
        &self,
        pattern: &TransferPattern,
        transactions: &[Transaction],
        accounts: &[Account],
        matches: &mut Vec<PatternMatch>,
    ) {
        let from_accounts: Vec<&Account> = accounts
            .iter()
            .filter(|a| similarity(&account_pattern(a), &pattern.from_account_pattern) > ACCOUNT_MATCH_SIMILARITY)
            .collect();
        let to_accounts: Vec<&Account> = accounts
            .iter()
            .filter(|a| similarity(&account_pattern(a), &pattern.to_account_pattern) > ACCOUNT_MATCH_SIMILARITY)
            .collect();

        for from_account in &from_accounts {
            for to_account in &to_accounts {
                if from_account.id == to_account.id {
                    continue;
                }
                let from_txs = transactions
                    .iter()
                    .filter(|t| t.account_id == Some(from_account.id) && t.amount < 0.0);
                for from_tx in from_txs {
                    let to_txs = transactions
                        .iter()
                        .filter(|t| t.account_id == Some(to_account.id) && t.amount > 0.0);
                    for to_tx in to_txs {
                        let confidence = pattern_confidence(pattern, from_tx, to_tx);
                        if confidence >= pattern.confidence_threshold {
                            matches.push(PatternMatch {
                                from_transaction_id: from_tx.id,
                                to_transaction_id: to_tx.id,
                                confidence,
                                amount: from_tx.amount.abs(),
                                date_difference: (from_tx.date - to_tx.date).num_days().abs(),
                                pattern_id: pattern.id,
                                pattern_name: pattern.name.clone(),
                                auto_confirm: pattern.auto_confirm,
                            });
                        }
                    }
                }
            }
        }
    }
}

/// Fingerprint an account: type, de-noised name, institution, pipe-joined
pub(crate) fn account_pattern(account: &Account) -> String {
    let mut parts = vec![format!("type:{}", account.account_type)];

    let normalized: String = account
        .name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
        .collect();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    if !normalized.is_empty() {
        parts.push(format!("name:{}", normalized));
    }
    if let Some(institution) = &account.institution {
        parts.push(format!("institution:{}", institution));
    }
    parts.join("|")
}

/// Classify a transfer description: keyword tag when known transfer words
/// appear, otherwise a short prefix of the lower-cased text
pub(crate) fn extract_description_pattern(description: Option<&str>) -> String {
    let Some(description) = description else {
        return String::new();
    };
    let normalized = description.to_lowercase();

    let found: Vec<&str> = DESCRIPTION_KEYWORDS
        .iter()
        .filter(|k| normalized.contains(*k))
        .copied()
        .collect();
    if !found.is_empty() {
        return format!("keywords:{}", found.join(","));
    }

    let words: Vec<&str> = normalized.split_whitespace().take(3).collect();
    format!("prefix:{}", words.join(" "))
}

/// Tag an amount with a coarse bucket: round-to-N for clean figures, a range
/// otherwise
pub(crate) fn amount_bucket(amount: f64) -> String {
    let amount = amount.abs();

    if amount.fract() == 0.0 {
        let whole = amount as i64;
        if whole % 1000 == 0 {
            return "round:1000".to_string();
        }
        if whole % 100 == 0 {
            return "round:100".to_string();
        }
        if whole % 50 == 0 {
            return "round:50".to_string();
        }
    }

    if amount < 100.0 {
        "range:0-100".to_string()
    } else if amount < 500.0 {
        "range:100-500".to_string()
    } else if amount < 1000.0 {
        "range:500-1000".to_string()
    } else if amount < 5000.0 {
        "range:1000-5000".to_string()
    } else {
        "range:5000+".to_string()
    }
}

/// Score a candidate pair against a pattern: amount closeness to the typical
/// amount (40%), date proximity (30%), description shape (20%), and a small
/// historical-success bonus (10%, capped)
fn pattern_confidence(pattern: &TransferPattern, from_tx: &Transaction, to_tx: &Transaction) -> f64 {
    let mut confidence = 0.0;

    if pattern.typical_amount > 0.0 {
        let amount_diff = (from_tx.amount.abs() - pattern.typical_amount).abs();
        let max_diff = pattern.typical_amount * pattern.amount_tolerance;
        if amount_diff == 0.0 {
            confidence += 0.4;
        } else if max_diff > 0.0 && amount_diff <= max_diff {
            confidence += 0.4 * (1.0 - amount_diff / max_diff);
        } else {
            confidence += 0.1;
        }
    }

    let date_diff = (from_tx.date - to_tx.date).num_days().abs();
    if date_diff == 0 {
        confidence += 0.3;
    } else if date_diff <= pattern.max_days_between {
        confidence += 0.3 * (1.0 - date_diff as f64 / pattern.max_days_between as f64);
    }

    if !pattern.description_pattern.is_empty() {
        confidence += 0.2
            * match_description(
                &pattern.description_pattern,
                &from_tx.description,
                &to_tx.description,
            );
    }

    if pattern.times_matched > 0 {
        let success = (pattern.times_matched as f64 / 10.0).min(1.0);
        confidence += 0.1 * success;
    }

    confidence.min(1.0)
}

fn match_description(pattern: &str, desc1: &str, desc2: &str) -> f64 {
    let lower1 = desc1.to_lowercase();
    let lower2 = desc2.to_lowercase();

    if let Some(keywords) = pattern.strip_prefix("keywords:") {
        for keyword in keywords.split(',') {
            if lower1.contains(keyword) || lower2.contains(keyword) {
                return 1.0;
            }
        }
        return 0.0;
    }
    if let Some(prefix) = pattern.strip_prefix("prefix:") {
        if lower1.contains(prefix) || lower2.contains(prefix) {
            return 1.0;
        }
        return 0.0;
    }
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewTransfer;
    use crate::models::{AccountType, DetectionMethod, NewTransaction};
    use chrono::NaiveDate;

    fn setup() -> (Database, i64, i64) {
        let db = Database::in_memory().unwrap();
        let checking = db
            .insert_account("Main Checking", AccountType::Checking, Some("ZKB"))
            .unwrap();
        let savings = db
            .insert_account("Savings 2", AccountType::Savings, Some("ZKB"))
            .unwrap();
        (db, checking, savings)
    }

    fn make_transfer(db: &Database, from: i64, to: i64, amount: f64, desc: &str) -> i64 {
        let date = Utc::now().date_naive();
        let out = db
            .insert_transaction(&NewTransaction {
                date,
                amount: -amount,
                description: desc.to_string(),
                account_id: Some(from),
            })
            .unwrap();
        let inc = db
            .insert_transaction(&NewTransaction {
                date,
                amount,
                description: desc.to_string(),
                account_id: Some(to),
            })
            .unwrap();
        db.create_transfer(&NewTransfer {
            from_transaction_id: out,
            to_transaction_id: inc,
            confidence_score: Some(0.9),
            matched_rule: None,
            detection_method: DetectionMethod::Manual,
        })
        .unwrap()
    }

    #[test]
    fn test_account_pattern_shape() {
        let (db, checking, _) = setup();
        let account = db.get_account(checking).unwrap().unwrap();
        assert_eq!(
            account_pattern(&account),
            "type:checking|name:MAIN CHECKING|institution:ZKB"
        );
    }

    #[test]
    fn test_description_pattern_keywords_and_prefix() {
        assert_eq!(
            extract_description_pattern(Some("Transfer to savings")),
            "keywords:transfer,to"
        );
        assert_eq!(
            extract_description_pattern(Some("Lohn September Arbeitgeber AG Extra")),
            "prefix:lohn september arbeitgeber"
        );
        assert_eq!(extract_description_pattern(None), "");
    }

    #[test]
    fn test_amount_buckets() {
        assert_eq!(amount_bucket(2000.0), "round:1000");
        assert_eq!(amount_bucket(-700.0), "round:100");
        assert_eq!(amount_bucket(150.0), "round:50");
        assert_eq!(amount_bucket(73.20), "range:0-100");
        assert_eq!(amount_bucket(842.17), "range:500-1000");
        assert_eq!(amount_bucket(9999.99), "range:5000+");
    }

    #[test]
    fn test_learn_creates_then_merges() {
        let (db, checking, savings) = setup();
        let learner = PatternLearner::new(&db);

        let first = make_transfer(&db, checking, savings, 500.0, "Monthly transfer to savings");
        let pattern_id = learner.learn_from_transfer(first, None).unwrap();

        let pattern = db.get_transfer_pattern(pattern_id).unwrap().unwrap();
        assert_eq!(pattern.name, "Main Checking -> Savings 2");
        assert_eq!(pattern.amount_bucket, "round:100");
        assert_eq!(pattern.times_matched, 1);
        assert!(!pattern.auto_confirm);
        assert!((pattern.typical_amount - 500.0).abs() < 1e-9);

        // Same account pair again: merge with weighted typical amount
        let second = make_transfer(&db, checking, savings, 600.0, "Monthly transfer to savings");
        let merged_id = learner.learn_from_transfer(second, None).unwrap();
        assert_eq!(merged_id, pattern_id);

        let merged = db.get_transfer_pattern(pattern_id).unwrap().unwrap();
        assert_eq!(merged.times_matched, 2);
        assert!((merged.typical_amount - 550.0).abs() < 1e-9);
        assert_eq!(db.list_transfer_patterns().unwrap().len(), 1);
    }

    #[test]
    fn test_learn_distinct_account_pair_creates_new_pattern() {
        let (db, checking, savings) = setup();
        let broker = db
            .insert_account("Brokerage", AccountType::Investment, Some("IBKR"))
            .unwrap();
        let learner = PatternLearner::new(&db);

        let a = make_transfer(&db, checking, savings, 500.0, "Transfer to savings");
        let b = make_transfer(&db, checking, broker, 1000.0, "Transfer to broker");
        let id_a = learner.learn_from_transfer(a, None).unwrap();
        let id_b = learner.learn_from_transfer(b, None).unwrap();
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn test_find_matches_recurring_flow() {
        let (db, checking, savings) = setup();
        let learner = PatternLearner::new(&db);

        let seed = make_transfer(&db, checking, savings, 500.0, "Transfer to savings");
        let pattern_id = learner.learn_from_transfer(seed, None).unwrap();

        // Next month's instance of the same flow, not yet claimed
        let date = Utc::now().date_naive();
        let out = db
            .insert_transaction(&NewTransaction {
                date,
                amount: -500.0,
                description: "Transfer to savings".to_string(),
                account_id: Some(checking),
            })
            .unwrap();
        let inc = db
            .insert_transaction(&NewTransaction {
                date,
                amount: 500.0,
                description: "Incoming transfer".to_string(),
                account_id: Some(savings),
            })
            .unwrap();

        let matches = learner.find_matches(30).unwrap();
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.from_transaction_id, out);
        assert_eq!(m.to_transaction_id, inc);
        assert_eq!(m.pattern_id, pattern_id);
        assert!(m.confidence >= 0.8);
        assert!(!m.auto_confirm);
    }

    #[test]
    fn test_pattern_confidence_in_bounds() {
        let pattern = TransferPattern {
            id: 1,
            name: "p".to_string(),
            from_account_pattern: "type:checking".to_string(),
            to_account_pattern: "type:savings".to_string(),
            description_pattern: "keywords:transfer".to_string(),
            amount_bucket: "round:100".to_string(),
            typical_amount: 500.0,
            amount_tolerance: 0.05,
            max_days_between: 3,
            confidence_threshold: 0.8,
            auto_confirm: false,
            times_matched: 50,
            last_matched_at: None,
            active: true,
            created_from_transfer_id: None,
            created_at: Utc::now(),
        };
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let tx = |amount: f64, desc: &str| Transaction {
            id: 0,
            date,
            amount,
            description: desc.to_string(),
            account_id: Some(1),
            category_id: None,
            vendor_id: None,
            confidence_score: None,
            needs_review: false,
            transfer_id: None,
            created_at: Utc::now(),
        };

        let c = pattern_confidence(&pattern, &tx(-500.0, "transfer out"), &tx(500.0, "in"));
        assert!((0.0..=1.0).contains(&c));
        assert!(c >= 0.9);

        // Degenerate inputs stay bounded
        let c = pattern_confidence(&pattern, &tx(-0.0, ""), &tx(0.0, ""));
        assert!((0.0..=1.0).contains(&c));
    }
}
