//! Learned transfer pattern lifecycle

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::TransferPattern;

fn row_to_pattern(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransferPattern> {
    let last_matched: Option<String> = row.get(12)?;
    let created: String = row.get(15)?;
    Ok(TransferPattern {
        id: row.get(0)?,
        name: row.get(1)?,
        from_account_pattern: row.get(2)?,
        to_account_pattern: row.get(3)?,
        description_pattern: row.get(4)?,
        amount_bucket: row.get(5)?,
        typical_amount: row.get(6)?,
        amount_tolerance: row.get(7)?,
        max_days_between: row.get(8)?,
        confidence_threshold: row.get(9)?,
        auto_confirm: row.get(10)?,
        times_matched: row.get(11)?,
        last_matched_at: last_matched.map(|s| parse_datetime(&s)),
        active: row.get(13)?,
        created_from_transfer_id: row.get(14)?,
        created_at: parse_datetime(&created),
    })
}

const PATTERN_COLS: &str = "id, name, from_account_pattern, to_account_pattern, \
     description_pattern, amount_bucket, typical_amount, amount_tolerance, \
     max_days_between, confidence_threshold, auto_confirm, times_matched, \
     last_matched_at, active, created_from_transfer_id, created_at";

/// A pattern derived from a confirmed transfer, ready to store
#[derive(Debug, Clone)]
pub struct NewTransferPattern {
    pub name: String,
    pub from_account_pattern: String,
    pub to_account_pattern: String,
    pub description_pattern: String,
    pub amount_bucket: String,
    pub typical_amount: f64,
    pub amount_tolerance: f64,
    pub max_days_between: i64,
    pub confidence_threshold: f64,
    pub auto_confirm: bool,
    pub created_from_transfer_id: Option<i64>,
}

/// User-tunable knobs on a stored pattern
#[derive(Debug, Clone, Default)]
pub struct PatternSettingsUpdate {
    pub amount_tolerance: Option<f64>,
    pub max_days_between: Option<i64>,
    pub confidence_threshold: Option<f64>,
    pub auto_confirm: Option<bool>,
}

impl Database {
    /// Store a new transfer pattern, counted as matched once (its seed transfer)
    pub fn insert_transfer_pattern(&self, new: &NewTransferPattern) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO transfer_patterns (name, from_account_pattern, to_account_pattern,
                description_pattern, amount_bucket, typical_amount, amount_tolerance,
                max_days_between, confidence_threshold, auto_confirm, times_matched,
                last_matched_at, created_from_transfer_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
            params![
                new.name,
                new.from_account_pattern,
                new.to_account_pattern,
                new.description_pattern,
                new.amount_bucket,
                new.typical_amount,
                new.amount_tolerance,
                new.max_days_between,
                new.confidence_threshold,
                new.auto_confirm,
                Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                new.created_from_transfer_id,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Stored transfer pattern '{}' ({})", new.name, id);
        Ok(id)
    }

    /// Get a transfer pattern by id
    pub fn get_transfer_pattern(&self, id: i64) -> Result<Option<TransferPattern>> {
        let conn = self.conn()?;
        let pattern = conn
            .query_row(
                &format!("SELECT {} FROM transfer_patterns WHERE id = ?", PATTERN_COLS),
                params![id],
                row_to_pattern,
            )
            .optional()?;
        Ok(pattern)
    }

    /// List active patterns, most-matched first
    pub fn list_active_transfer_patterns(&self) -> Result<Vec<TransferPattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfer_patterns WHERE active = TRUE \
             ORDER BY times_matched DESC, id",
            PATTERN_COLS
        ))?;
        let patterns = stmt
            .query_map([], row_to_pattern)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(patterns)
    }

    /// List all patterns including deactivated ones
    pub fn list_transfer_patterns(&self) -> Result<Vec<TransferPattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transfer_patterns ORDER BY times_matched DESC, id",
            PATTERN_COLS
        ))?;
        let patterns = stmt
            .query_map([], row_to_pattern)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(patterns)
    }

    /// Fold another observed amount into a pattern's running state.
    ///
    /// The typical amount is a count-weighted average so an outlier transfer
    /// shifts an established pattern only slightly.
    pub fn record_pattern_match(&self, id: i64, amount: f64) -> Result<()> {
        let pattern = self
            .get_transfer_pattern(id)?
            .ok_or_else(|| Error::NotFound(format!("transfer pattern {}", id)))?;

        let new_count = pattern.times_matched + 1;
        let new_typical = (pattern.typical_amount * pattern.times_matched as f64 + amount.abs())
            / new_count as f64;

        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE transfer_patterns
            SET times_matched = ?, typical_amount = ?, last_matched_at = ?
            WHERE id = ?
            "#,
            params![
                new_count,
                new_typical,
                Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                id
            ],
        )?;
        debug!(
            "Pattern {} matched {} times, typical amount now {:.2}",
            id, new_count, new_typical
        );
        Ok(())
    }

    /// Adjust a pattern's tunable settings; untouched fields keep their values
    pub fn update_pattern_settings(&self, id: i64, update: &PatternSettingsUpdate) -> Result<()> {
        let pattern = self
            .get_transfer_pattern(id)?
            .ok_or_else(|| Error::NotFound(format!("transfer pattern {}", id)))?;

        if let Some(tolerance) = update.amount_tolerance {
            if !(0.0..=1.0).contains(&tolerance) {
                return Err(Error::InvalidData(format!(
                    "amount tolerance {} out of range [0, 1]",
                    tolerance
                )));
            }
        }
        if let Some(threshold) = update.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::InvalidData(format!(
                    "confidence threshold {} out of range [0, 1]",
                    threshold
                )));
            }
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE transfer_patterns
            SET amount_tolerance = ?, max_days_between = ?, confidence_threshold = ?,
                auto_confirm = ?
            WHERE id = ?
            "#,
            params![
                update.amount_tolerance.unwrap_or(pattern.amount_tolerance),
                update.max_days_between.unwrap_or(pattern.max_days_between),
                update
                    .confidence_threshold
                    .unwrap_or(pattern.confidence_threshold),
                update.auto_confirm.unwrap_or(pattern.auto_confirm),
                id
            ],
        )?;
        Ok(())
    }

    /// Retire a pattern without losing its history
    pub fn deactivate_transfer_pattern(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE transfer_patterns SET active = FALSE WHERE id = ?",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("transfer pattern {}", id)));
        }
        info!("Deactivated transfer pattern {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pattern() -> NewTransferPattern {
        NewTransferPattern {
            name: "Checking -> Savings".to_string(),
            from_account_pattern: "type:checking|name:CHECKING".to_string(),
            to_account_pattern: "type:savings|name:SAVINGS".to_string(),
            description_pattern: "keywords:transfer,savings".to_string(),
            amount_bucket: "round:500".to_string(),
            typical_amount: 500.0,
            amount_tolerance: 0.05,
            max_days_between: 3,
            confidence_threshold: 0.8,
            auto_confirm: false,
            created_from_transfer_id: None,
        }
    }

    #[test]
    fn test_insert_and_get_pattern() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_transfer_pattern(&sample_pattern()).unwrap();

        let pattern = db.get_transfer_pattern(id).unwrap().unwrap();
        assert_eq!(pattern.times_matched, 1);
        assert!(pattern.active);
        assert!(!pattern.auto_confirm);
        assert!(pattern.last_matched_at.is_some());
    }

    #[test]
    fn test_record_match_weighted_typical() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_transfer_pattern(&sample_pattern()).unwrap();

        // (500 * 1 + 600) / 2 = 550
        db.record_pattern_match(id, 600.0).unwrap();
        let pattern = db.get_transfer_pattern(id).unwrap().unwrap();
        assert_eq!(pattern.times_matched, 2);
        assert!((pattern.typical_amount - 550.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_settings_partial() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_transfer_pattern(&sample_pattern()).unwrap();

        db.update_pattern_settings(
            id,
            &PatternSettingsUpdate {
                auto_confirm: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let pattern = db.get_transfer_pattern(id).unwrap().unwrap();
        assert!(pattern.auto_confirm);
        // Unspecified fields untouched
        assert!((pattern.amount_tolerance - 0.05).abs() < 1e-9);

        let err = db
            .update_pattern_settings(
                id,
                &PatternSettingsUpdate {
                    amount_tolerance: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn test_deactivate_hides_from_active_list() {
        let db = Database::in_memory().unwrap();
        let id = db.insert_transfer_pattern(&sample_pattern()).unwrap();
        assert_eq!(db.list_active_transfer_patterns().unwrap().len(), 1);

        db.deactivate_transfer_pattern(id).unwrap();
        assert!(db.list_active_transfer_patterns().unwrap().is_empty());
        assert_eq!(db.list_transfer_patterns().unwrap().len(), 1);
    }
}
