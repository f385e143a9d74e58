//! Transfer creation and deletion with two-sided transaction linkage

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{DetectionMethod, Transfer};

fn row_to_transfer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transfer> {
    let date_str: String = row.get(6)?;
    let method_str: String = row.get(10)?;
    let created: String = row.get(11)?;
    Ok(Transfer {
        id: row.get(0)?,
        from_account_id: row.get(1)?,
        to_account_id: row.get(2)?,
        from_transaction_id: row.get(3)?,
        to_transaction_id: row.get(4)?,
        amount: row.get(5)?,
        date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| chrono::Utc::now().date_naive()),
        description: row.get(7)?,
        confidence_score: row.get(8)?,
        matched_rule: row.get(9)?,
        detection_method: method_str.parse().unwrap_or(DetectionMethod::Manual),
        created_at: parse_datetime(&created),
    })
}

const TRANSFER_COLS: &str = "id, from_account_id, to_account_id, from_transaction_id, \
     to_transaction_id, amount, date, description, confidence_score, matched_rule, \
     detection_method, created_at";

/// A transfer to be recorded from a matched pair of transactions
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub from_transaction_id: i64,
    pub to_transaction_id: i64,
    pub confidence_score: Option<f64>,
    pub matched_rule: Option<String>,
    pub detection_method: DetectionMethod,
}

impl Database {
    /// Record a confirmed transfer and link both transactions to it, atomically.
    ///
    /// Validates that the two transactions exist, sit on distinct accounts,
    /// carry opposite signs, and are not already claimed by another transfer.
    pub fn create_transfer(&self, new: &NewTransfer) -> Result<i64> {
        let from_tx = self
            .get_transaction(new.from_transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", new.from_transaction_id)))?;
        let to_tx = self
            .get_transaction(new.to_transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", new.to_transaction_id)))?;

        let from_account = from_tx
            .account_id
            .ok_or_else(|| Error::InvalidData("outgoing transaction has no account".to_string()))?;
        let to_account = to_tx
            .account_id
            .ok_or_else(|| Error::InvalidData("incoming transaction has no account".to_string()))?;
        if from_account == to_account {
            return Err(Error::InvalidData(
                "both transactions are on the same account".to_string(),
            ));
        }
        if from_tx.amount >= 0.0 || to_tx.amount <= 0.0 {
            return Err(Error::InvalidData(
                "transfer requires a negative outgoing and a positive incoming amount".to_string(),
            ));
        }
        if from_tx.transfer_id.is_some() || to_tx.transfer_id.is_some() {
            return Err(Error::InvalidData(
                "one of the transactions already belongs to a transfer".to_string(),
            ));
        }

        let amount = from_tx.amount.abs();
        let date = from_tx.date.min(to_tx.date);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, from_transaction_id,
                to_transaction_id, amount, date, description, confidence_score,
                matched_rule, detection_method)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                from_account,
                to_account,
                new.from_transaction_id,
                new.to_transaction_id,
                amount,
                date.format("%Y-%m-%d").to_string(),
                from_tx.description,
                new.confidence_score,
                new.matched_rule,
                new.detection_method.as_str(),
            ],
        )?;
        let transfer_id = tx.last_insert_rowid();

        // Both sides leave the matching pool
        tx.execute(
            "UPDATE transactions SET transfer_id = ?, needs_review = FALSE WHERE id IN (?, ?)",
            params![transfer_id, new.from_transaction_id, new.to_transaction_id],
        )?;
        tx.commit()?;

        info!(
            "Created transfer {} ({} -> {}, {:.2})",
            transfer_id, from_account, to_account, amount
        );
        Ok(transfer_id)
    }

    /// Delete a transfer and release both transactions back into the pool
    pub fn delete_transfer(&self, id: i64) -> Result<()> {
        let transfer = self
            .get_transfer(id)?
            .ok_or_else(|| Error::NotFound(format!("transfer {}", id)))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE transactions SET transfer_id = NULL WHERE transfer_id = ?",
            params![id],
        )?;
        tx.execute("DELETE FROM transfers WHERE id = ?", params![id])?;
        tx.commit()?;

        debug!(
            "Deleted transfer {} ({} -> {})",
            id, transfer.from_account_id, transfer.to_account_id
        );
        Ok(())
    }

    /// Get a transfer by id
    pub fn get_transfer(&self, id: i64) -> Result<Option<Transfer>> {
        let conn = self.conn()?;
        let transfer = conn
            .query_row(
                &format!("SELECT {} FROM transfers WHERE id = ?", TRANSFER_COLS),
                params![id],
                row_to_transfer,
            )
            .optional()?;
        Ok(transfer)
    }

    /// List transfers, newest first
    pub fn list_transfers(&self, limit: Option<i64>) -> Result<Vec<Transfer>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transfers ORDER BY date DESC, id DESC LIMIT ?",
            TRANSFER_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let transfers = stmt
            .query_map(params![limit.unwrap_or(-1)], row_to_transfer)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(transfers)
    }
}
