//! Internal transfer pair detection
//!
//! Pairs opposite-signed transactions on different accounts within a lookback
//! window, scores each candidate pair, and either auto-confirms the transfer
//! or emits a suggestion for human review. Named rules (regex or substring)
//! boost confidence and can force auto-confirmation for known flows like
//! Revolut top-ups that carry a fee.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{Database, NewTransfer};
use crate::error::{Error, Result};
use crate::models::{Account, AccountType, DetectionMethod, Transaction};

/// Settings key in the settings table
const SETTINGS_KEY: &str = "transfer_settings";
/// Pairs below this confidence are not worth surfacing at all
const SUGGESTION_FLOOR: f64 = 0.5;
/// Hard rejection above this relative amount difference
const MAX_RELATIVE_DIFF: f64 = 0.20;
/// Row cap per detection run; pairwise scanning is quadratic in this
const CANDIDATE_LIMIT: i64 = 500;

/// Keywords that mark a description as transfer-like when no rule fires
const TRANSFER_KEYWORDS: &[&str] = &[
    "transfer",
    "\u{fc}berweisung",
    "virement",
    "internal",
    "between accounts",
    "wire",
    "ach",
    "electronic transfer",
    "online transfer",
];

/// Cross-account-type pairings that commonly carry transfers
const TYPICAL_PAIRINGS: &[(AccountType, AccountType)] = &[
    (AccountType::Checking, AccountType::Savings),
    (AccountType::Checking, AccountType::Investment),
    (AccountType::CreditCard, AccountType::Checking),
];

/// A named detection rule. The pattern is tried as a regex and degrades to
/// substring containment when it does not compile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRule {
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_confirm: bool,
    #[serde(default)]
    pub allow_fees: bool,
    #[serde(default)]
    pub max_fee_tolerance: f64,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

/// Per-user detection settings, persisted as JSON in the settings table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "default_days_lookback")]
    pub days_lookback: i64,
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance: f64,
    #[serde(default = "default_percentage_tolerance")]
    pub percentage_tolerance: f64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_true")]
    pub enable_auto_matching: bool,
    #[serde(default)]
    pub rules: Vec<TransferRule>,
}

fn default_days_lookback() -> i64 {
    7
}
fn default_amount_tolerance() -> f64 {
    0.50
}
fn default_percentage_tolerance() -> f64 {
    0.02
}
fn default_confidence_threshold() -> f64 {
    0.85
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            days_lookback: default_days_lookback(),
            amount_tolerance: default_amount_tolerance(),
            percentage_tolerance: default_percentage_tolerance(),
            confidence_threshold: default_confidence_threshold(),
            enable_auto_matching: true,
            rules: default_rules(),
        }
    }
}

/// The stock rule set shipped to every user
pub fn default_rules() -> Vec<TransferRule> {
    vec![
        TransferRule {
            name: "Revolut".to_string(),
            pattern: "REVOLUT".to_string(),
            enabled: true,
            auto_confirm: true,
            allow_fees: true,
            max_fee_tolerance: 5.00,
            description: "Revolut transfers (may include fees)".to_string(),
        },
        TransferRule {
            name: "Savings Keywords".to_string(),
            pattern: "SPAREN|SAVING|SPARKONTO".to_string(),
            enabled: true,
            auto_confirm: true,
            allow_fees: false,
            max_fee_tolerance: 0.0,
            description: "Transfers to/from savings accounts".to_string(),
        },
        TransferRule {
            name: "Credit Card Payment".to_string(),
            pattern: "KREDITKARTE|VISA|MASTERCARD|CREDIT.*CARD".to_string(),
            enabled: true,
            auto_confirm: false,
            allow_fees: false,
            max_fee_tolerance: 0.0,
            description: "Credit card payments and transactions".to_string(),
        },
        TransferRule {
            name: "Bank Transfer Keywords".to_string(),
            pattern: "\u{dc}BERWEISUNG|TRANSFER|VIREMENT|WIRE|INTERNAL".to_string(),
            enabled: true,
            auto_confirm: false,
            allow_fees: true,
            max_fee_tolerance: 2.00,
            description: "Generic bank transfer keywords".to_string(),
        },
    ]
}

/// A rule pattern resolved at load time
enum RuleMatcher {
    Regex(regex::Regex),
    Substring(String),
}

struct CompiledRule {
    rule: TransferRule,
    matcher: RuleMatcher,
}

impl CompiledRule {
    fn compile(rule: &TransferRule) -> Self {
        let upper = rule.pattern.to_uppercase();
        let matcher = match regex::RegexBuilder::new(&upper)
            .case_insensitive(true)
            .build()
        {
            Ok(re) => RuleMatcher::Regex(re),
            Err(err) => {
                warn!(
                    "Rule '{}' pattern does not compile ({}); using substring match",
                    rule.name, err
                );
                RuleMatcher::Substring(upper)
            }
        };
        Self {
            rule: rule.clone(),
            matcher,
        }
    }

    fn matches(&self, description: &str) -> bool {
        if self.rule.pattern.is_empty() {
            return false;
        }
        let upper = description.to_uppercase();
        match &self.matcher {
            RuleMatcher::Regex(re) => re.is_match(&upper),
            RuleMatcher::Substring(text) => upper.contains(text),
        }
    }
}

/// A candidate pair below the auto-confirm bar, surfaced for human review
#[derive(Debug, Clone, Serialize)]
pub struct TransferSuggestion {
    pub from_transaction_id: i64,
    pub to_transaction_id: i64,
    pub amount: f64,
    pub date_difference: i64,
    pub confidence: f64,
    pub matched_rule: Option<String>,
    pub reason: String,
}

/// Outcome of one detection run
#[derive(Debug, Default, Clone, Serialize)]
pub struct DetectionOutcome {
    pub auto_matched: Vec<i64>,
    pub suggestions: Vec<TransferSuggestion>,
}

/// One dry-run match from `test_rules`
#[derive(Debug, Clone, Serialize)]
pub struct RuleTestMatch {
    pub from_description: String,
    pub to_description: String,
    pub amount: f64,
    pub confidence: f64,
    pub matched_rule: Option<String>,
    pub date_difference: i64,
}

/// Summary of a `test_rules` dry run
#[derive(Debug, Clone, Serialize)]
pub struct RuleTestReport {
    pub matches: usize,
    pub samples: Vec<RuleTestMatch>,
    pub rule_stats: HashMap<String, usize>,
}

/// Transfer pair detector over one user's database
pub struct TransferDetector<'a> {
    db: &'a Database,
}

impl<'a> TransferDetector<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Load the user's persisted settings, falling back to defaults
    pub fn load_settings(&self) -> Result<TransferSettings> {
        match self.db.load_setting(SETTINGS_KEY)? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(settings) => Ok(settings),
                Err(err) => {
                    warn!("Stored transfer settings unreadable ({}); using defaults", err);
                    Ok(TransferSettings::default())
                }
            },
            None => Ok(TransferSettings::default()),
        }
    }

    /// Persist settings for future runs
    pub fn save_settings(&self, settings: &TransferSettings) -> Result<()> {
        self.db
            .save_setting(SETTINGS_KEY, &serde_json::to_string(settings)?)?;
        info!("Saved transfer settings");
        Ok(())
    }

    /// Run detection over the unclaimed transactions in the lookback window.
    ///
    /// Greedy claiming: the first transaction in iteration order claims its
    /// first sufficiently-confident partner; both leave the pool immediately.
    pub fn detect(&self, settings: &TransferSettings) -> Result<DetectionOutcome> {
        let _guard = self.db.write_guard();

        let cutoff = Utc::now().date_naive() - chrono::Duration::days(settings.days_lookback);
        let transactions = self.db.list_unclaimed_in_window(cutoff, CANDIDATE_LIMIT)?;
        let accounts = self.account_map()?;
        let rules: Vec<CompiledRule> = settings
            .rules
            .iter()
            .filter(|r| r.enabled)
            .map(CompiledRule::compile)
            .collect();

        let mut outcome = DetectionOutcome::default();
        let mut claimed: HashSet<i64> = HashSet::new();

        for (i, tx1) in transactions.iter().enumerate() {
            if claimed.contains(&tx1.id) {
                continue;
            }
            for tx2 in &transactions[i + 1..] {
                if claimed.contains(&tx2.id) {
                    continue;
                }
                if !candidate_pair(tx1, tx2, settings, &rules) {
                    continue;
                }
                let (confidence, matched_rule) =
                    score_pair(tx1, tx2, &accounts, settings, &rules);
                if confidence < SUGGESTION_FLOOR {
                    continue;
                }

                claimed.insert(tx1.id);
                claimed.insert(tx2.id);

                let (from_tx, to_tx) = if tx1.amount < 0.0 { (tx1, tx2) } else { (tx2, tx1) };
                let auto = settings.enable_auto_matching
                    && (confidence >= settings.confidence_threshold
                        || matched_rule.map(|r| r.rule.auto_confirm).unwrap_or(false));

                if auto {
                    let method = if matched_rule.is_some() {
                        DetectionMethod::Rule
                    } else {
                        DetectionMethod::Auto
                    };
                    match self.db.create_transfer(&NewTransfer {
                        from_transaction_id: from_tx.id,
                        to_transaction_id: to_tx.id,
                        confidence_score: Some(confidence),
                        matched_rule: matched_rule.map(|r| r.rule.name.clone()),
                        detection_method: method,
                    }) {
                        Ok(transfer_id) => {
                            info!(
                                "Auto-matched transfer {} ({:.2} confidence, rule: {})",
                                transfer_id,
                                confidence,
                                matched_rule.map(|r| r.rule.name.as_str()).unwrap_or("general")
                            );
                            outcome.auto_matched.push(transfer_id);
                        }
                        Err(err) => warn!("Failed to auto-match pair: {}", err),
                    }
                } else {
                    outcome.suggestions.push(TransferSuggestion {
                        from_transaction_id: from_tx.id,
                        to_transaction_id: to_tx.id,
                        amount: from_tx.amount.abs(),
                        date_difference: date_diff_days(tx1, tx2),
                        confidence,
                        matched_rule: matched_rule.map(|r| r.rule.name.clone()),
                        reason: suggestion_reason(tx1, tx2, matched_rule),
                    });
                }
                break;
            }
        }

        outcome.suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(
            "Detection run: {} auto-matched, {} suggestions",
            outcome.auto_matched.len(),
            outcome.suggestions.len()
        );
        Ok(outcome)
    }

    /// Score historical pairs against a rule set without creating anything
    pub fn test_rules(&self, settings: &TransferSettings) -> Result<RuleTestReport> {
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(settings.days_lookback);
        let transactions = self.db.list_unclaimed_in_window(cutoff, CANDIDATE_LIMIT)?;
        let accounts = self.account_map()?;
        let rules: Vec<CompiledRule> = settings
            .rules
            .iter()
            .filter(|r| r.enabled)
            .map(CompiledRule::compile)
            .collect();

        let mut rule_stats: HashMap<String, usize> = rules
            .iter()
            .map(|r| (r.rule.name.clone(), 0))
            .collect();
        let mut samples = Vec::new();
        let mut matches = 0usize;

        'outer: for (i, tx1) in transactions.iter().enumerate() {
            for tx2 in &transactions[i + 1..] {
                if !candidate_pair(tx1, tx2, settings, &rules) {
                    continue;
                }
                let (confidence, matched_rule) =
                    score_pair(tx1, tx2, &accounts, settings, &rules);
                if confidence < SUGGESTION_FLOOR {
                    continue;
                }
                matches += 1;
                if let Some(rule) = matched_rule {
                    if let Some(count) = rule_stats.get_mut(&rule.rule.name) {
                        *count += 1;
                    }
                }
                if samples.len() < 10 {
                    let (from_tx, to_tx) =
                        if tx1.amount < 0.0 { (tx1, tx2) } else { (tx2, tx1) };
                    samples.push(RuleTestMatch {
                        from_description: from_tx.description.clone(),
                        to_description: to_tx.description.clone(),
                        amount: from_tx.amount.abs(),
                        confidence,
                        matched_rule: matched_rule.map(|r| r.rule.name.clone()),
                        date_difference: date_diff_days(tx1, tx2),
                    });
                }
                if matches >= 20 {
                    break 'outer;
                }
            }
        }

        Ok(RuleTestReport {
            matches,
            samples,
            rule_stats,
        })
    }

    /// Record a transfer the user paired by hand.
    ///
    /// The pair still has to be plausible under the user's settings: opposite
    /// signs, distinct accounts, amounts within tolerance (or a fee-allowing
    /// rule), dates inside the window.
    pub fn create_manual_transfer(
        &self,
        from_transaction_id: i64,
        to_transaction_id: i64,
    ) -> Result<i64> {
        let _guard = self.db.write_guard();

        let settings = self.load_settings()?;
        let from_tx = self
            .db
            .get_transaction(from_transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", from_transaction_id)))?;
        let to_tx = self
            .db
            .get_transaction(to_transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", to_transaction_id)))?;
        let rules: Vec<CompiledRule> = settings
            .rules
            .iter()
            .filter(|r| r.enabled)
            .map(CompiledRule::compile)
            .collect();
        if !candidate_pair(&from_tx, &to_tx, &settings, &rules) {
            return Err(Error::InvalidData(
                "transactions do not form a plausible transfer pair".to_string(),
            ));
        }

        self.db.create_transfer(&NewTransfer {
            from_transaction_id,
            to_transaction_id,
            confidence_score: None,
            matched_rule: None,
            detection_method: DetectionMethod::Manual,
        })
    }

    /// Undo a transfer, releasing both transactions back into the pool
    pub fn delete_transfer(&self, transfer_id: i64) -> Result<()> {
        let _guard = self.db.write_guard();
        self.db.delete_transfer(transfer_id)
    }

    fn account_map(&self) -> Result<HashMap<i64, Account>> {
        Ok(self
            .db
            .list_accounts(false)?
            .into_iter()
            .map(|a| (a.id, a))
            .collect())
    }
}

fn date_diff_days(tx1: &Transaction, tx2: &Transaction) -> i64 {
    (tx1.date - tx2.date).num_days().abs()
}

/// Cheap filter applied before scoring
fn candidate_pair(
    tx1: &Transaction,
    tx2: &Transaction,
    settings: &TransferSettings,
    rules: &[CompiledRule],
) -> bool {
    let opposite = (tx1.amount > 0.0 && tx2.amount < 0.0) || (tx1.amount < 0.0 && tx2.amount > 0.0);
    if !opposite {
        return false;
    }
    match (tx1.account_id, tx2.account_id) {
        (Some(a), Some(b)) if a == b => return false,
        _ => {}
    }
    if date_diff_days(tx1, tx2) > settings.days_lookback {
        return false;
    }

    let amount_diff = (tx1.amount.abs() - tx2.amount.abs()).abs();
    let max_amount = tx1.amount.abs().max(tx2.amount.abs());
    if max_amount > 0.0 {
        if amount_diff <= settings.amount_tolerance {
            return true;
        }
        if amount_diff / max_amount <= settings.percentage_tolerance {
            return true;
        }
        for rule in rules {
            if rule.rule.allow_fees
                && amount_diff <= rule.rule.max_fee_tolerance
                && (rule.matches(&tx1.description) || rule.matches(&tx2.description))
            {
                return true;
            }
        }
        if amount_diff / max_amount > MAX_RELATIVE_DIFF {
            return false;
        }
    }
    true
}

/// Score a candidate pair. Symmetric in its two transaction arguments.
fn score_pair<'r>(
    tx1: &Transaction,
    tx2: &Transaction,
    accounts: &HashMap<i64, Account>,
    settings: &TransferSettings,
    rules: &'r [CompiledRule],
) -> (f64, Option<&'r CompiledRule>) {
    let mut confidence: f64 = 0.0;

    let matched_rule = rules
        .iter()
        .find(|r| r.matches(&tx1.description) || r.matches(&tx2.description));
    if matched_rule.is_some() {
        confidence += 0.4;
    }

    let amount_diff = (tx1.amount.abs() - tx2.amount.abs()).abs();
    let max_amount = tx1.amount.abs().max(tx2.amount.abs());
    if max_amount == 0.0 {
        return (0.0, matched_rule);
    }

    let fee_tolerance = matched_rule
        .filter(|r| r.rule.allow_fees)
        .map(|r| r.rule.max_fee_tolerance)
        .unwrap_or(0.0);
    if amount_diff == 0.0 {
        confidence += 0.4;
    } else if amount_diff <= settings.amount_tolerance {
        confidence += 0.35;
    } else if amount_diff / max_amount <= settings.percentage_tolerance {
        confidence += 0.3;
    } else if amount_diff <= fee_tolerance {
        confidence += 0.25;
    } else if amount_diff / max_amount <= 0.05 {
        confidence += 0.15;
    } else if amount_diff / max_amount <= 0.10 {
        confidence += 0.05;
    } else {
        confidence -= 0.1;
    }

    let date_diff = date_diff_days(tx1, tx2);
    confidence += match date_diff {
        0 => 0.3,
        1 => 0.25,
        2 => 0.2,
        3 => 0.1,
        _ => -0.05,
    };

    let desc1 = tx1.description.to_lowercase();
    let desc2 = tx2.description.to_lowercase();

    if matched_rule.is_none()
        && TRANSFER_KEYWORDS
            .iter()
            .any(|k| desc1.contains(k) || desc2.contains(k))
    {
        confidence += 0.15;
    }

    let words1: HashSet<&str> = desc1.split_whitespace().collect();
    let words2: HashSet<&str> = desc2.split_whitespace().collect();
    if words1.intersection(&words2).count() >= 2 {
        confidence += 0.05;
    }

    if let (Some(a1), Some(a2)) = (
        tx1.account_id.and_then(|id| accounts.get(&id)),
        tx2.account_id.and_then(|id| accounts.get(&id)),
    ) {
        let pair = (a1.account_type, a2.account_type);
        let reverse = (a2.account_type, a1.account_type);
        if TYPICAL_PAIRINGS.contains(&pair) || TYPICAL_PAIRINGS.contains(&reverse) {
            confidence += 0.1;
        }
    }

    if max_amount >= 1000.0 {
        confidence += 0.05;
    } else if max_amount < 10.0 {
        confidence -= 0.05;
    }
    if tx1.amount.abs().fract() == 0.0 || tx2.amount.abs().fract() == 0.0 {
        confidence += 0.03;
    }

    (confidence.clamp(0.0, 1.0), matched_rule)
}

fn suggestion_reason(
    tx1: &Transaction,
    tx2: &Transaction,
    matched_rule: Option<&CompiledRule>,
) -> String {
    let mut reasons = Vec::new();
    if let Some(rule) = matched_rule {
        reasons.push(format!("matches rule '{}'", rule.rule.name));
    }

    let amount_diff = (tx1.amount.abs() - tx2.amount.abs()).abs();
    if amount_diff == 0.0 {
        reasons.push("exact amount match".to_string());
    } else if amount_diff < tx1.amount.abs() * 0.02 {
        reasons.push("very similar amounts".to_string());
    }

    match date_diff_days(tx1, tx2) {
        0 => reasons.push("same date".to_string()),
        1 => reasons.push("consecutive dates".to_string()),
        _ => {}
    }

    if reasons.is_empty() {
        reasons.push("pattern analysis".to_string());
    }
    format!("Suggested due to: {}", reasons.join(", "))
}
