//! Transaction queries and categorization updates

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{NewTransaction, Transaction};

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let date_str: String = row.get(1)?;
    let created: String = row.get(10)?;
    Ok(Transaction {
        id: row.get(0)?,
        date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| chrono::Utc::now().date_naive()),
        amount: row.get(2)?,
        description: row.get(3)?,
        account_id: row.get(4)?,
        category_id: row.get(5)?,
        vendor_id: row.get(6)?,
        confidence_score: row.get(7)?,
        needs_review: row.get(8)?,
        transfer_id: row.get(9)?,
        created_at: parse_datetime(&created),
    })
}

const TX_COLS: &str = "id, date, amount, description, account_id, category_id, \
     vendor_id, confidence_score, needs_review, transfer_id, created_at";

/// One categorization outcome to persist (matcher output)
#[derive(Debug, Clone)]
pub struct TxCategorization {
    pub tx_id: i64,
    pub category_id: Option<i64>,
    pub vendor_id: Option<i64>,
    pub confidence_score: f64,
    pub needs_review: bool,
}

impl Database {
    /// Insert a transaction
    pub fn insert_transaction(&self, tx: &NewTransaction) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO transactions (date, amount, description, account_id) VALUES (?, ?, ?, ?)",
            params![
                tx.date.format("%Y-%m-%d").to_string(),
                tx.amount,
                tx.description,
                tx.account_id
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a transaction by id
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?", TX_COLS),
                params![id],
                row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// List transactions with no category, oldest first
    pub fn list_uncategorized(&self, limit: Option<i64>) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE category_id IS NULL ORDER BY date, id LIMIT ?",
            TX_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let txs = stmt
            .query_map(params![limit.unwrap_or(-1)], row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txs)
    }

    /// List transactions not yet part of a transfer, on or after `cutoff`.
    ///
    /// Candidates for transfer pair detection; newest first so recent imports
    /// are matched before the window expires on them.
    pub fn list_unclaimed_in_window(
        &self,
        cutoff: NaiveDate,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE transfer_id IS NULL AND date >= ? AND account_id IS NOT NULL \
             ORDER BY date DESC, id DESC LIMIT ?",
            TX_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let txs = stmt
            .query_map(
                params![cutoff.format("%Y-%m-%d").to_string(), limit],
                row_to_transaction,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txs)
    }

    /// List uncategorized transactions whose description matches no vendor yet,
    /// for the similarity sweep after a confirmation
    pub fn list_sweep_candidates(&self, exclude_tx_id: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions \
             WHERE category_id IS NULL AND vendor_id IS NULL AND id != ? \
             ORDER BY date, id",
            TX_COLS
        );
        let mut stmt = conn.prepare(&sql)?;
        let txs = stmt
            .query_map(params![exclude_tx_id], row_to_transaction)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(txs)
    }

    /// Apply a batch of categorization outcomes in one transaction
    pub fn batch_categorize(&self, outcomes: &[TxCategorization]) -> Result<usize> {
        if outcomes.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for outcome in outcomes {
            tx.execute(
                r#"
                UPDATE transactions
                SET category_id = ?, vendor_id = ?, confidence_score = ?, needs_review = ?
                WHERE id = ?
                "#,
                params![
                    outcome.category_id,
                    outcome.vendor_id,
                    outcome.confidence_score,
                    outcome.needs_review,
                    outcome.tx_id
                ],
            )?;
        }
        tx.commit()?;
        debug!("Applied {} categorization updates", outcomes.len());
        Ok(outcomes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountType;

    fn tx(date: (i32, u32, u32), amount: f64, desc: &str, account: Option<i64>) -> NewTransaction {
        NewTransaction {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            amount,
            description: desc.to_string(),
            account_id: account,
        }
    }

    #[test]
    fn test_insert_and_get_transaction() {
        let db = Database::in_memory().unwrap();
        let id = db
            .insert_transaction(&tx((2024, 3, 15), -42.50, "Coop Pronto", None))
            .unwrap();

        let found = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(found.description, "Coop Pronto");
        assert_eq!(found.date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert!(found.category_id.is_none());
        assert!(!found.needs_review);
    }

    #[test]
    fn test_list_uncategorized_ordering() {
        let db = Database::in_memory().unwrap();
        db.insert_transaction(&tx((2024, 3, 10), -5.0, "Later", None))
            .unwrap();
        db.insert_transaction(&tx((2024, 3, 1), -5.0, "Earlier", None))
            .unwrap();

        let txs = db.list_uncategorized(None).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].description, "Earlier");
    }

    #[test]
    fn test_list_unclaimed_in_window_respects_cutoff() {
        let db = Database::in_memory().unwrap();
        let account = db
            .insert_account("Main", AccountType::Checking, None)
            .unwrap();
        db.insert_transaction(&tx((2024, 1, 1), -100.0, "Old", Some(account)))
            .unwrap();
        let recent = db
            .insert_transaction(&tx((2024, 3, 1), -100.0, "Recent", Some(account)))
            .unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let txs = db.list_unclaimed_in_window(cutoff, 100).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, recent);
    }

    #[test]
    fn test_batch_categorize_atomic() {
        let db = Database::in_memory().unwrap();
        let a = db
            .insert_transaction(&tx((2024, 3, 1), -10.0, "A", None))
            .unwrap();
        let b = db
            .insert_transaction(&tx((2024, 3, 2), -20.0, "B", None))
            .unwrap();
        let cat = db
            .insert_category("Groceries", crate::models::CategoryType::Expense, None, true)
            .unwrap();

        let applied = db
            .batch_categorize(&[
                TxCategorization {
                    tx_id: a,
                    category_id: Some(cat),
                    vendor_id: None,
                    confidence_score: 0.9,
                    needs_review: false,
                },
                TxCategorization {
                    tx_id: b,
                    category_id: None,
                    vendor_id: None,
                    confidence_score: 0.3,
                    needs_review: true,
                },
            ])
            .unwrap();
        assert_eq!(applied, 2);

        let a_tx = db.get_transaction(a).unwrap().unwrap();
        assert_eq!(a_tx.category_id, Some(cat));
        assert_eq!(a_tx.confidence_score, Some(0.9));

        let b_tx = db.get_transaction(b).unwrap().unwrap();
        assert!(b_tx.needs_review);
    }
}
