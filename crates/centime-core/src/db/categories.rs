//! Category tree operations: typed hierarchy, cycle checking, default seeding

use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Category, CategoryType};

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    let type_str: String = row.get(2)?;
    let created: String = row.get(5)?;
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        category_type: type_str.parse().unwrap_or(CategoryType::Expense),
        parent_id: row.get(3)?,
        allow_learning: row.get(4)?,
        created_at: parse_datetime(&created),
    })
}

const CATEGORY_COLS: &str = "id, name, category_type, parent_id, allow_learning, created_at";

impl Database {
    /// Create a category.
    ///
    /// The parent (when given) must exist and have the same type. Manual-review
    /// categories are stored with learning disabled whatever the caller passed.
    pub fn insert_category(
        &self,
        name: &str,
        category_type: CategoryType,
        parent_id: Option<i64>,
        allow_learning: bool,
    ) -> Result<i64> {
        if let Some(pid) = parent_id {
            let parent = self
                .get_category(pid)?
                .ok_or_else(|| Error::NotFound(format!("parent category {}", pid)))?;
            if parent.category_type != category_type {
                return Err(Error::InvalidData(format!(
                    "parent category '{}' has type {}, child must match",
                    parent.name, parent.category_type
                )));
            }
        }

        let effective_learning =
            allow_learning && category_type != CategoryType::ManualReview;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO categories (name, category_type, parent_id, allow_learning)
            VALUES (?, ?, ?, ?)
            "#,
            params![name, category_type.as_str(), parent_id, effective_learning],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a category by id
    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLS),
                params![id],
                row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// List all categories
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM categories ORDER BY category_type, name",
            CATEGORY_COLS
        ))?;
        let categories = stmt
            .query_map([], row_to_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    /// Re-parent a category.
    ///
    /// Rejects a parent that is the category itself or one of its descendants
    /// (would form a cycle), or one of a different type.
    pub fn set_category_parent(&self, id: i64, new_parent_id: Option<i64>) -> Result<()> {
        let category = self
            .get_category(id)?
            .ok_or_else(|| Error::NotFound(format!("category {}", id)))?;

        if let Some(pid) = new_parent_id {
            if pid == id {
                return Err(Error::InvalidData(
                    "category cannot be its own parent".to_string(),
                ));
            }
            let parent = self
                .get_category(pid)?
                .ok_or_else(|| Error::NotFound(format!("category {}", pid)))?;
            if parent.category_type != category.category_type {
                return Err(Error::InvalidData(format!(
                    "cannot parent {} category under {} category",
                    category.category_type, parent.category_type
                )));
            }
            if self.is_descendant_of(pid, id)? {
                return Err(Error::InvalidData(format!(
                    "'{}' is a descendant of '{}'; re-parenting would form a cycle",
                    parent.name, category.name
                )));
            }
        }

        let conn = self.conn()?;
        conn.execute(
            "UPDATE categories SET parent_id = ? WHERE id = ?",
            params![new_parent_id, id],
        )?;
        Ok(())
    }

    /// Walk the parent chain of `candidate` looking for `ancestor`
    fn is_descendant_of(&self, candidate: i64, ancestor: i64) -> Result<bool> {
        let mut current = Some(candidate);
        // Bounded walk so a pre-existing corrupt cycle cannot loop forever
        for _ in 0..64 {
            match current {
                None => return Ok(false),
                Some(id) if id == ancestor => return Ok(true),
                Some(id) => {
                    current = self.get_category(id)?.and_then(|c| c.parent_id);
                }
            }
        }
        Ok(false)
    }

    /// Find a manual-review category by name
    pub fn find_manual_review_category(&self, name: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!(
                    "SELECT {} FROM categories WHERE category_type = 'manual_review' AND name = ?",
                    CATEGORY_COLS
                ),
                params![name],
                row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Seed the default category tree (idempotent - skips when any category exists)
    pub fn seed_default_categories(&self) -> Result<()> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(());
        }
        drop(conn);

        let income = ["Salary", "Other Income"];
        for name in income {
            self.insert_category(name, CategoryType::Income, None, true)?;
        }

        let expense_tree: [(&str, &[&str]); 5] = [
            (
                "Housing",
                &["Rent/Mortgage", "Utilities", "Internet/Phone", "Maintenance"],
            ),
            (
                "Transportation",
                &["Public Transport", "Fuel", "Car Insurance", "Car Maintenance"],
            ),
            ("Food", &["Groceries", "Restaurants", "Coffee/Snacks"]),
            (
                "Personal",
                &["Healthcare", "Clothing", "Entertainment", "Education"],
            ),
            ("Financial", &["Bank Fees", "Insurance", "Loans"]),
        ];
        for (parent_name, children) in expense_tree {
            let parent_id =
                self.insert_category(parent_name, CategoryType::Expense, None, true)?;
            for child in children {
                self.insert_category(child, CategoryType::Expense, Some(parent_id), true)?;
            }
        }

        let savings = ["Emergency Fund", "Retirement Savings", "Vacation Fund"];
        for name in savings {
            self.insert_category(name, CategoryType::Saving, None, true)?;
        }

        // Manual-review buckets never learn
        let manual_review = [
            "TWINT Payments",
            "ATM Withdrawals",
            "Bank Transfers",
            "Manual Review",
        ];
        for name in manual_review {
            self.insert_category(name, CategoryType::ManualReview, None, false)?;
        }

        self.insert_category("Account Transfers", CategoryType::Transfer, None, true)?;

        info!("Seeded default categories");
        Ok(())
    }
}
