//! Vendor pattern store and atomic learning commits

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::Vendor;

/// Default threshold for vendors created by the learner
pub(crate) const LEARNED_VENDOR_THRESHOLD: f64 = 0.85;

fn row_to_vendor(row: &rusqlite::Row<'_>) -> rusqlite::Result<Vendor> {
    let patterns_json: String = row.get(2)?;
    let last_matched: Option<String> = row.get(7)?;
    let created: String = row.get(9)?;
    Ok(Vendor {
        id: row.get(0)?,
        name: row.get(1)?,
        patterns: serde_json::from_str(&patterns_json).unwrap_or_default(),
        default_category_id: row.get(3)?,
        confidence_threshold: row.get(4)?,
        allow_learning: row.get(5)?,
        match_count: row.get(6)?,
        last_matched_at: last_matched.map(|s| parse_datetime(&s)),
        average_amount: row.get(8)?,
        created_at: parse_datetime(&created),
    })
}

const VENDOR_COLS: &str = "id, name, patterns, default_category_id, confidence_threshold, \
     allow_learning, match_count, last_matched_at, average_amount, created_at";

/// How a learning commit touches the vendor table
#[derive(Debug, Clone)]
pub enum VendorMutation {
    /// No vendor change (learning skipped)
    None,
    /// Point an existing vendor at a (possibly new) default category; the
    /// pattern is already in its set
    Retarget { vendor_id: i64 },
    /// Add a pattern to an existing vendor and update its default category
    AttachPattern { vendor_id: i64, pattern: String },
    /// Create a new learning-enabled vendor seeded with one pattern
    Create { name: String, pattern: String },
}

/// An atomic human-confirmation commit: vendor mutation, the confirmed
/// transaction, and the swept similar transactions, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct LearningCommit {
    pub vendor: VendorMutation,
    pub category_id: i64,
    pub confirmed_tx_id: i64,
    /// Uncategorized transactions matched by the similarity sweep
    pub swept_tx_ids: Vec<i64>,
    /// Confidence stored on swept transactions
    pub sweep_confidence: f64,
}

impl Database {
    /// Create a vendor directly (used by tests and external import tooling;
    /// the learner goes through `commit_learning`)
    pub fn insert_vendor(
        &self,
        name: &str,
        patterns: &[String],
        default_category_id: Option<i64>,
        confidence_threshold: f64,
        allow_learning: bool,
    ) -> Result<i64> {
        let mut deduped: Vec<String> = Vec::new();
        for p in patterns {
            if !deduped.contains(p) {
                deduped.push(p.clone());
            }
        }
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO vendors (name, patterns, default_category_id, confidence_threshold, allow_learning)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                name,
                serde_json::to_string(&deduped)?,
                default_category_id,
                confidence_threshold,
                allow_learning,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a vendor by id
    pub fn get_vendor(&self, id: i64) -> Result<Option<Vendor>> {
        let conn = self.conn()?;
        let vendor = conn
            .query_row(
                &format!("SELECT {} FROM vendors WHERE id = ?", VENDOR_COLS),
                params![id],
                row_to_vendor,
            )
            .optional()?;
        Ok(vendor)
    }

    /// List vendors, optionally restricted to learning-enabled ones
    pub fn list_vendors(&self, learning_only: bool) -> Result<Vec<Vendor>> {
        let conn = self.conn()?;
        let sql = if learning_only {
            format!(
                "SELECT {} FROM vendors WHERE allow_learning = TRUE ORDER BY name",
                VENDOR_COLS
            )
        } else {
            format!("SELECT {} FROM vendors ORDER BY name", VENDOR_COLS)
        };
        let mut stmt = conn.prepare(&sql)?;
        let vendors = stmt
            .query_map([], row_to_vendor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(vendors)
    }

    /// Find a learning-enabled vendor whose pattern set contains `pattern`
    pub fn find_vendor_with_pattern(&self, pattern: &str) -> Result<Option<Vendor>> {
        // Pattern sets are small JSON arrays; scan in memory
        Ok(self
            .list_vendors(true)?
            .into_iter()
            .find(|v| v.patterns.iter().any(|p| p == pattern)))
    }

    /// Find a learning-enabled vendor by exact name
    pub fn find_vendor_by_name(&self, name: &str) -> Result<Option<Vendor>> {
        let conn = self.conn()?;
        let vendor = conn
            .query_row(
                &format!(
                    "SELECT {} FROM vendors WHERE name = ? AND allow_learning = TRUE",
                    VENDOR_COLS
                ),
                params![name],
                row_to_vendor,
            )
            .optional()?;
        Ok(vendor)
    }

    /// Record a successful match against a vendor: bump the counter, refresh
    /// the timestamp, and fold the amount into the running average.
    pub fn record_vendor_match(&self, vendor_id: i64, amount: f64) -> Result<()> {
        let vendor = self
            .get_vendor(vendor_id)?
            .ok_or_else(|| Error::NotFound(format!("vendor {}", vendor_id)))?;

        let abs_amount = amount.abs();
        let new_count = vendor.match_count + 1;
        let new_average = match vendor.average_amount {
            Some(avg) => (avg * vendor.match_count as f64 + abs_amount) / new_count as f64,
            None => abs_amount,
        };

        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE vendors
            SET match_count = ?, average_amount = ?, last_matched_at = ?
            WHERE id = ?
            "#,
            params![
                new_count,
                new_average,
                Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                vendor_id
            ],
        )?;
        Ok(())
    }

    /// Apply a learning commit atomically.
    ///
    /// The vendor mutation, the confirmed transaction update (confidence 1.0,
    /// review cleared), and every swept transaction either all commit or none
    /// do. Returns the id of the vendor that was created or touched, if any.
    pub fn commit_learning(&self, commit: &LearningCommit) -> Result<Option<i64>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let vendor_id = match &commit.vendor {
            VendorMutation::None => None,
            VendorMutation::Retarget { vendor_id } => {
                tx.execute(
                    "UPDATE vendors SET default_category_id = ? WHERE id = ?",
                    params![commit.category_id, vendor_id],
                )?;
                Some(*vendor_id)
            }
            VendorMutation::AttachPattern { vendor_id, pattern } => {
                let patterns_json: String = tx.query_row(
                    "SELECT patterns FROM vendors WHERE id = ?",
                    params![vendor_id],
                    |row| row.get(0),
                )?;
                let mut patterns: Vec<String> =
                    serde_json::from_str(&patterns_json).unwrap_or_default();
                if !patterns.contains(pattern) {
                    patterns.push(pattern.clone());
                }
                tx.execute(
                    "UPDATE vendors SET patterns = ?, default_category_id = ? WHERE id = ?",
                    params![
                        serde_json::to_string(&patterns)?,
                        commit.category_id,
                        vendor_id
                    ],
                )?;
                debug!("Added pattern '{}' to vendor {}", pattern, vendor_id);
                Some(*vendor_id)
            }
            VendorMutation::Create { name, pattern } => {
                tx.execute(
                    r#"
                    INSERT INTO vendors (name, patterns, default_category_id, confidence_threshold, allow_learning)
                    VALUES (?, ?, ?, ?, TRUE)
                    "#,
                    params![
                        name,
                        serde_json::to_string(&vec![pattern.clone()])?,
                        commit.category_id,
                        LEARNED_VENDOR_THRESHOLD,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                info!("Created vendor '{}' with pattern '{}'", name, pattern);
                Some(id)
            }
        };

        // Swept transactions: same vendor/category, high confidence, review cleared
        for tx_id in &commit.swept_tx_ids {
            tx.execute(
                r#"
                UPDATE transactions
                SET vendor_id = ?, category_id = ?, confidence_score = ?, needs_review = FALSE
                WHERE id = ? AND category_id IS NULL
                "#,
                params![vendor_id, commit.category_id, commit.sweep_confidence, tx_id],
            )?;
        }

        // The confirmed transaction is always finalized, learning or not
        tx.execute(
            r#"
            UPDATE transactions
            SET vendor_id = COALESCE(?, vendor_id), category_id = ?,
                confidence_score = 1.0, needs_review = FALSE
            WHERE id = ?
            "#,
            params![vendor_id, commit.category_id, commit.confirmed_tx_id],
        )?;

        tx.commit()?;
        Ok(vendor_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryType;

    #[test]
    fn test_insert_vendor_dedupes_patterns() {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_vendor(
                "Lidl",
                &["LIDLZUERICH".to_string(), "LIDLZUERICH".to_string()],
                None,
                0.8,
                true,
            )
            .unwrap();
        let vendor = db.get_vendor(id).unwrap().unwrap();
        assert_eq!(vendor.patterns, vec!["LIDLZUERICH"]);
    }

    #[test]
    fn test_find_vendor_with_pattern_skips_learning_disabled() {
        let db = Database::in_memory().unwrap();
        db.insert_vendor("Frozen", &["MIGROS".to_string()], None, 0.8, false)
            .unwrap();
        assert!(db.find_vendor_with_pattern("MIGROS").unwrap().is_none());

        db.insert_vendor("Migros", &["MIGROS".to_string()], None, 0.8, true)
            .unwrap();
        let found = db.find_vendor_with_pattern("MIGROS").unwrap().unwrap();
        assert_eq!(found.name, "Migros");
    }

    #[test]
    fn test_record_vendor_match_running_average() {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_vendor("Coop", &["COOP".to_string()], None, 0.8, true)
            .unwrap();

        db.record_vendor_match(id, -10.0).unwrap();
        db.record_vendor_match(id, -30.0).unwrap();

        let vendor = db.get_vendor(id).unwrap().unwrap();
        assert_eq!(vendor.match_count, 2);
        assert!((vendor.average_amount.unwrap() - 20.0).abs() < 1e-9);
        assert!(vendor.last_matched_at.is_some());
    }

    #[test]
    fn test_commit_learning_creates_vendor_and_sweeps() {
        let db = Database::in_memory().unwrap();
        let cat = db
            .insert_category("Groceries", CategoryType::Expense, None, true)
            .unwrap();
        let account = db
            .insert_account("Main", crate::models::AccountType::Checking, None)
            .unwrap();

        let confirmed = db
            .insert_transaction(&crate::models::NewTransaction {
                date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                amount: -25.50,
                description: "Lidl Zuerich".to_string(),
                account_id: Some(account),
            })
            .unwrap();
        let similar = db
            .insert_transaction(&crate::models::NewTransaction {
                date: chrono::NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                amount: -12.00,
                description: "Lidl Zuerich 0800".to_string(),
                account_id: Some(account),
            })
            .unwrap();

        let vendor_id = db
            .commit_learning(&LearningCommit {
                vendor: VendorMutation::Create {
                    name: "Lidl".to_string(),
                    pattern: "LIDLZUERICH".to_string(),
                },
                category_id: cat,
                confirmed_tx_id: confirmed,
                swept_tx_ids: vec![similar],
                sweep_confidence: 0.95,
            })
            .unwrap()
            .unwrap();

        let vendor = db.get_vendor(vendor_id).unwrap().unwrap();
        assert_eq!(vendor.default_category_id, Some(cat));
        assert!((vendor.confidence_threshold - 0.85).abs() < 1e-9);

        let confirmed_tx = db.get_transaction(confirmed).unwrap().unwrap();
        assert_eq!(confirmed_tx.confidence_score, Some(1.0));
        assert!(!confirmed_tx.needs_review);
        assert_eq!(confirmed_tx.vendor_id, Some(vendor_id));

        let swept_tx = db.get_transaction(similar).unwrap().unwrap();
        assert_eq!(swept_tx.category_id, Some(cat));
        assert_eq!(swept_tx.confidence_score, Some(0.95));
        assert!(!swept_tx.needs_review);
    }
}
