//! Bank account operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{Account, AccountType};

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let type_str: String = row.get(2)?;
    let created: String = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        account_type: type_str.parse().unwrap_or(AccountType::Checking),
        institution: row.get(3)?,
        active: row.get(4)?,
        created_at: parse_datetime(&created),
    })
}

const ACCOUNT_COLS: &str = "id, name, account_type, institution, active, created_at";

impl Database {
    /// Create an account
    pub fn insert_account(
        &self,
        name: &str,
        account_type: AccountType,
        institution: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (name, account_type, institution) VALUES (?, ?, ?)",
            params![name, account_type.as_str(), institution],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get an account by id
    pub fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLS),
                params![id],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// List accounts, optionally restricted to active ones
    pub fn list_accounts(&self, active_only: bool) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let sql = if active_only {
            format!(
                "SELECT {} FROM accounts WHERE active = TRUE ORDER BY name",
                ACCOUNT_COLS
            )
        } else {
            format!("SELECT {} FROM accounts ORDER BY name", ACCOUNT_COLS)
        };
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], row_to_account)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }
}
