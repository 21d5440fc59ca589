use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    institution TEXT NOT NULL,
    account_type TEXT NOT NULL,
    external_account_id TEXT,
    access_token TEXT,
    connection_status TEXT NOT NULL DEFAULT 'disconnected',
    cursor TEXT,
    last_synced_at TEXT,
    last_sync_error TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    parent_id INTEGER,
    is_income INTEGER DEFAULT 0,
    is_recurring INTEGER DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (parent_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    external_id TEXT UNIQUE,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    merchant TEXT,
    amount REAL NOT NULL,
    category_id INTEGER,
    predicted_category_id INTEGER,
    status TEXT NOT NULL DEFAULT 'pending_review',
    source TEXT NOT NULL,
    is_pending INTEGER DEFAULT 0,
    tier TEXT,
    confidence REAL,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (category_id) REFERENCES categories(id),
    FOREIGN KEY (predicted_category_id) REFERENCES categories(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);
CREATE INDEX IF NOT EXISTS idx_transactions_account_date ON transactions(account_id, date);

CREATE TABLE IF NOT EXISTS merchant_mappings (
    id INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL UNIQUE,
    category_id INTEGER NOT NULL,
    confidence INTEGER DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS amount_rules (
    id INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL,
    amount REAL NOT NULL,
    tolerance REAL DEFAULT 0.01,
    category_id INTEGER NOT NULL,
    note TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS sync_log (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    trigger_source TEXT NOT NULL,
    status TEXT NOT NULL,
    added INTEGER DEFAULT 0,
    modified INTEGER DEFAULT 0,
    removed INTEGER DEFAULT 0,
    error_message TEXT,
    duration_ms INTEGER,
    started_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    import_date TEXT DEFAULT (datetime('now')),
    record_count INTEGER,
    date_range_start TEXT,
    date_range_end TEXT,
    checksum TEXT,
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);
";

// (key, display_name, parent_key, is_income, is_recurring)
const DEFAULT_CATEGORIES: &[(&str, &str, Option<&str>, bool, bool)] = &[
    // Top-level groups
    ("income", "Income", None, true, false),
    ("housing", "Housing", None, false, true),
    ("food", "Food & Drink", None, false, false),
    ("transport", "Transportation", None, false, false),
    ("subscriptions", "Subscriptions", None, false, true),
    ("health", "Health & Wellness", None, false, false),
    ("shopping", "Shopping", None, false, false),
    ("entertainment", "Entertainment", None, false, false),
    ("transfer", "Transfers & Payments", None, false, false),
    ("misc", "Miscellaneous", None, false, false),
    // Income
    ("paycheck", "Paycheck", Some("income"), true, true),
    ("interest", "Interest", Some("income"), true, false),
    ("refund", "Refunds & Reimbursements", Some("income"), true, false),
    // Housing
    ("rent", "Rent", Some("housing"), false, true),
    ("utilities", "Utilities", Some("housing"), false, true),
    ("internet", "Internet", Some("housing"), false, true),
    // Food
    ("groceries", "Groceries", Some("food"), false, false),
    ("restaurants", "Restaurants", Some("food"), false, false),
    ("coffee", "Coffee", Some("food"), false, false),
    // Transportation
    ("gas", "Gas", Some("transport"), false, false),
    ("rideshare", "Rideshare", Some("transport"), false, false),
    ("parking", "Parking & Tolls", Some("transport"), false, false),
    // Subscriptions
    ("streaming", "Streaming", Some("subscriptions"), false, true),
    ("software", "Software", Some("subscriptions"), false, true),
    ("gym", "Gym", Some("subscriptions"), false, true),
    // Health
    ("pharmacy", "Pharmacy", Some("health"), false, false),
    ("medical", "Medical", Some("health"), false, false),
    // Shopping
    ("clothing", "Clothing", Some("shopping"), false, false),
    ("household", "Household Goods", Some("shopping"), false, false),
    // Entertainment
    ("events", "Events & Tickets", Some("entertainment"), false, false),
    ("travel", "Travel", Some("entertainment"), false, false),
    // Transfers
    ("credit_card_payment", "Credit Card Payment", Some("transfer"), false, false),
    ("account_transfer", "Account Transfer", Some("transfer"), false, false),
    ("venmo", "Venmo", Some("transfer"), false, false),
    // Misc
    ("fees", "Bank Fees", Some("misc"), false, false),
    ("other", "Other", Some("misc"), false, false),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for cat in DEFAULT_CATEGORIES {
            let parent_id: Option<i64> = match cat.2 {
                Some(key) => Some(conn.query_row(
                    "SELECT id FROM categories WHERE key = ?1",
                    [key],
                    |r| r.get(0),
                )?),
                None => None,
            };
            conn.execute(
                "INSERT INTO categories (key, display_name, parent_id, is_income, is_recurring) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![cat.0, cat.1, parent_id, cat.3, cat.4],
            )?;
        }
    }
    Ok(())
}
