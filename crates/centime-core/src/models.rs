//! Domain models for Centime

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Account types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    CreditCard,
    Investment,
    Loan,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
            Self::CreditCard => "credit_card",
            Self::Investment => "investment",
            Self::Loan => "loan",
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "checking" => Ok(Self::Checking),
            "savings" => Ok(Self::Savings),
            "credit_card" | "creditcard" => Ok(Self::CreditCard),
            "investment" => Ok(Self::Investment),
            "loan" => Ok(Self::Loan),
            _ => Err(format!("Unknown account type: {}", s)),
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bank account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub institution: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Category types
///
/// MANUAL_REVIEW categories collect transactions for human triage and never
/// participate in pattern learning, regardless of their stored learning flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Income,
    Expense,
    Saving,
    ManualReview,
    Transfer,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Saving => "saving",
            Self::ManualReview => "manual_review",
            Self::Transfer => "transfer",
        }
    }
}

impl std::str::FromStr for CategoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "saving" => Ok(Self::Saving),
            "manual_review" => Ok(Self::ManualReview),
            "transfer" => Ok(Self::Transfer),
            _ => Err(format!("Unknown category type: {}", s)),
        }
    }
}

impl std::fmt::Display for CategoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A spending/income/savings category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub category_type: CategoryType,
    /// Parent category (same type, no cycles - enforced on write)
    pub parent_id: Option<i64>,
    pub allow_learning: bool,
    pub created_at: DateTime<Utc>,
}

impl Category {
    /// Effective learning permission.
    ///
    /// Manual-review categories never learn, whatever the stored flag says.
    pub fn allows_learning(&self) -> bool {
        self.category_type != CategoryType::ManualReview && self.allow_learning
    }
}

/// A learned merchant with its canonical match patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: i64,
    pub name: String,
    /// Deduplicated normalized match patterns (e.g. "LIDLZUERICH")
    pub patterns: Vec<String>,
    pub default_category_id: Option<i64>,
    /// Minimum similarity for a fuzzy pattern match against this vendor
    pub confidence_threshold: f64,
    pub allow_learning: bool,
    pub match_count: i64,
    pub last_matched_at: Option<DateTime<Utc>>,
    /// Running average of matched transaction amounts (absolute)
    pub average_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A financial transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub date: NaiveDate,
    /// Negative = outflow, positive = inflow
    pub amount: f64,
    pub description: String,
    pub account_id: Option<i64>,
    pub category_id: Option<i64>,
    pub vendor_id: Option<i64>,
    /// Match certainty in [0,1]; None until the matcher has seen it
    pub confidence_score: Option<f64>,
    pub needs_review: bool,
    /// Set when the transaction is one side of a confirmed transfer
    pub transfer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A transaction to be inserted (before DB insertion)
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub amount: f64,
    pub description: String,
    pub account_id: Option<i64>,
}

/// How a transfer was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Manual,
    Auto,
    Rule,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
            Self::Rule => "rule",
        }
    }
}

impl std::str::FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            "rule" => Ok(Self::Rule),
            _ => Err(format!("Unknown detection method: {}", s)),
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An internal movement of funds between two of the user's accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub from_transaction_id: Option<i64>,
    pub to_transaction_id: Option<i64>,
    /// Always positive
    pub amount: f64,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub confidence_score: Option<f64>,
    /// Name of the rule that triggered the match, if any
    pub matched_rule: Option<String>,
    pub detection_method: DetectionMethod,
    pub created_at: DateTime<Utc>,
}

/// A reusable pattern derived from confirmed transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferPattern {
    pub id: i64,
    pub name: String,
    /// Pipe-joined account fingerprint, e.g. "type:checking|name:MAIN|institution:ZKB"
    pub from_account_pattern: String,
    pub to_account_pattern: String,
    /// "keywords:..." or "prefix:..." tag derived from the transfer description
    pub description_pattern: String,
    /// "round:1000" / "range:100-500" style amount bucket
    pub amount_bucket: String,
    /// Weighted running average of matched amounts
    pub typical_amount: f64,
    /// Fractional tolerance around the typical amount
    pub amount_tolerance: f64,
    pub max_days_between: i64,
    pub confidence_threshold: f64,
    pub auto_confirm: bool,
    pub times_matched: i64,
    pub last_matched_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_from_transfer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
