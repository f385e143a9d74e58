//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `accounts` - Bank account operations
//! - `categories` - Category tree with cycle checking and seeding
//! - `vendors` - Vendor pattern store and learning commits
//! - `transactions` - Transaction queries and categorization updates
//! - `transfers` - Transfer creation/deletion with two-sided linkage
//! - `transfer_patterns` - Learned transfer pattern lifecycle

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::Result;

mod accounts;
mod categories;
mod transactions;
mod transfer_patterns;
mod transfers;
mod vendors;

pub use transactions::TxCategorization;
pub use transfer_patterns::{NewTransferPattern, PatternSettingsUpdate};
pub use transfers::NewTransfer;
pub use vendors::{LearningCommit, VendorMutation};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
///
/// One database holds one user's data. Mutation phases (learning commits,
/// transfer creation, pattern merges) serialize on `write_guard`; reads run
/// concurrently off the pool.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Create a new database connection pool at the given path
    pub fn new(path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because each pooled
    /// connection would otherwise see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!(
            "{}/centime_test_{}_{}.db",
            std::env::temp_dir().display(),
            std::process::id(),
            id
        );

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Acquire the single-writer lock for this database.
    ///
    /// Engine write phases hold this guard so that two concurrent runs cannot
    /// interleave their mutations (duplicate vendors, double-claimed pairs).
    pub fn write_guard(&self) -> MutexGuard<'_, ()> {
        // A poisoned lock means a writer panicked mid-phase; the SQL
        // transaction it held has already rolled back, so continuing is safe.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load persisted transfer settings JSON, if any
    pub fn load_setting(&self, key: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Persist a settings value (upsert)
    pub fn save_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;

            -- Synchronous NORMAL: good balance of safety and performance
            PRAGMA synchronous = NORMAL;

            -- Accounts (bank accounts)
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                account_type TEXT NOT NULL,
                institution TEXT,
                active BOOLEAN DEFAULT TRUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Categories (typed, hierarchical)
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                category_type TEXT NOT NULL,
                parent_id INTEGER REFERENCES categories(id),
                allow_learning BOOLEAN DEFAULT TRUE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(name, category_type)
            );

            CREATE INDEX IF NOT EXISTS idx_categories_parent ON categories(parent_id);
            CREATE INDEX IF NOT EXISTS idx_categories_type ON categories(category_type);

            -- Vendors (learned merchants with normalized match patterns)
            CREATE TABLE IF NOT EXISTS vendors (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                patterns TEXT NOT NULL DEFAULT '[]',   -- JSON array of normalized patterns
                default_category_id INTEGER REFERENCES categories(id),
                confidence_threshold REAL DEFAULT 0.8,
                allow_learning BOOLEAN DEFAULT TRUE,
                match_count INTEGER DEFAULT 0,
                last_matched_at DATETIME,
                average_amount REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_vendors_name ON vendors(name);

            -- Transactions
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                date DATE NOT NULL,
                amount REAL NOT NULL,
                description TEXT NOT NULL,
                account_id INTEGER REFERENCES accounts(id),
                category_id INTEGER REFERENCES categories(id),
                vendor_id INTEGER REFERENCES vendors(id),
                confidence_score REAL,
                needs_review BOOLEAN DEFAULT FALSE,
                transfer_id INTEGER REFERENCES transfers(id),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_needs_review ON transactions(needs_review);
            CREATE INDEX IF NOT EXISTS idx_transactions_transfer ON transactions(transfer_id);

            -- Transfers (two linked transactions on distinct accounts)
            CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY,
                from_account_id INTEGER NOT NULL REFERENCES accounts(id),
                to_account_id INTEGER NOT NULL REFERENCES accounts(id),
                from_transaction_id INTEGER REFERENCES transactions(id),
                to_transaction_id INTEGER REFERENCES transactions(id),
                amount REAL NOT NULL,
                date DATE NOT NULL,
                description TEXT,
                confidence_score REAL,
                matched_rule TEXT,
                detection_method TEXT NOT NULL DEFAULT 'manual',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transfers_date ON transfers(date);

            -- Transfer patterns (learned from confirmed transfers)
            CREATE TABLE IF NOT EXISTS transfer_patterns (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                from_account_pattern TEXT NOT NULL,
                to_account_pattern TEXT NOT NULL,
                description_pattern TEXT NOT NULL DEFAULT '',
                amount_bucket TEXT NOT NULL DEFAULT '',
                typical_amount REAL NOT NULL,
                amount_tolerance REAL NOT NULL DEFAULT 0.05,
                max_days_between INTEGER NOT NULL DEFAULT 3,
                confidence_threshold REAL NOT NULL DEFAULT 0.8,
                auto_confirm BOOLEAN DEFAULT FALSE,
                times_matched INTEGER DEFAULT 0,
                last_matched_at DATETIME,
                active BOOLEAN DEFAULT TRUE,
                created_from_transfer_id INTEGER REFERENCES transfers(id),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transfer_patterns_active ON transfer_patterns(active);

            -- Settings (JSON blobs keyed by name, e.g. transfer settings)
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        info!("Database migrations complete");
        Ok(())
    }
}
