//! Centime Core Library
//!
//! Matching-and-learning engine for the Centime personal finance tool:
//! - Database access and migrations
//! - Description normalization into canonical vendor patterns
//! - Vendor pattern matching, learning and similarity sweeps
//! - Internal transfer pair detection with configurable rules
//! - Transfer pattern learning from confirmed transfers
//! - N-gram analysis and vendor brand hierarchy discovery

pub mod categorize;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod models;
pub mod ngrams;
pub mod normalize;
pub mod transfer_learning;
pub mod transfers;

pub use categorize::{
    CategorizationSummary, Categorizer, DebugInfo, LearningOutcome, VendorSuggestion,
};
pub use db::{
    Database, LearningCommit, NewTransfer, NewTransferPattern, PatternSettingsUpdate,
    TxCategorization, VendorMutation,
};
pub use error::{Error, Result};
pub use hierarchy::{ChildLink, GroupingSuggestion, HierarchyResolver, SiblingLink};
pub use models::{
    Account, AccountType, Category, CategoryType, DetectionMethod, NewTransaction, Transaction,
    Transfer, TransferPattern, Vendor,
};
pub use ngrams::{Ngram, NgramKind};
pub use transfer_learning::{PatternLearner, PatternMatch};
pub use transfers::{
    DetectionOutcome, RuleTestReport, TransferDetector, TransferRule, TransferSettings,
    TransferSuggestion,
};
