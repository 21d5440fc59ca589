use std::path::Path;

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cascade::classify;
use crate::classifier::Classifier;
use crate::error::{PennyError, Result};
use crate::models::{NormalizedRow, ReviewStatus, Source};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn parse_amount(raw: &str) -> Option<f64> {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.trim().parse::<f64>().ok().map(|v| -v);
    }
    s.parse().ok()
}

/// Accepts ISO dates as-is and M/D/Y statements, normalized to YYYY-MM-DD.
pub fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(d) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.format("%Y-%m-%d").to_string());
    }
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let m: u32 = parts[0].parse().ok()?;
    let d: u32 = parts[1].parse().ok()?;
    let y: i32 = parts[2].parse().ok()?;
    chrono::NaiveDate::from_ymd_opt(y, m, d).map(|dt| dt.format("%Y-%m-%d").to_string())
}

fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn is_duplicate_row(conn: &Connection, account_id: i64, row: &NormalizedRow) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM transactions WHERE account_id = ?1 AND date = ?2 \
         AND ABS(amount - ?3) < 0.005 AND description = ?4",
    )?;
    Ok(stmt.exists(rusqlite::params![
        account_id,
        row.date,
        row.amount,
        row.description
    ])?)
}

// ---------------------------------------------------------------------------
// CSV parsing
// ---------------------------------------------------------------------------

pub struct ParseOutcome {
    pub rows: Vec<NormalizedRow>,
    pub malformed: usize,
}

/// Expected columns: date, description, amount, and optionally merchant.
/// A header row is detected and skipped; malformed rows are counted, never
/// fatal.
pub fn parse_csv(file_path: &Path, flip_signs: bool) -> Result<ParseOutcome> {
    let file = std::fs::File::open(file_path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));

    let mut rows = Vec::new();
    let mut malformed = 0usize;
    for (idx, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(_) => {
                malformed += 1;
                continue;
            }
        };
        if record.len() < 3 {
            if !record.iter().all(|f| f.trim().is_empty()) {
                malformed += 1;
            }
            continue;
        }
        // Header row: first field is not a date.
        let Some(date) = parse_date(&record[0]) else {
            if idx == 0 {
                continue;
            }
            malformed += 1;
            continue;
        };
        let description = record[1].trim().to_string();
        let Some(amount) = parse_amount(&record[2]) else {
            malformed += 1;
            continue;
        };
        if description.is_empty() {
            malformed += 1;
            continue;
        }
        let merchant = record
            .get(3)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(String::from);
        let amount = if flip_signs { -amount } else { amount };
        rows.push(NormalizedRow {
            date,
            description,
            merchant,
            amount,
        });
    }
    Ok(ParseOutcome { rows, malformed })
}

// ---------------------------------------------------------------------------
// import_file
// ---------------------------------------------------------------------------

pub struct ImportOptions {
    /// Rows land with source 'archive_import' and become merge candidates
    /// for a later feed sync.
    pub archive: bool,
    /// Flip amount signs for statements that record deposits as positive.
    pub flip_signs: bool,
}

#[derive(Debug)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub malformed: usize,
}

pub fn import_file(
    conn: &Connection,
    file_path: &Path,
    account_name: &str,
    options: &ImportOptions,
    classifier: Option<&dyn Classifier>,
    threshold: i64,
) -> Result<ImportResult> {
    let account_id: i64 = {
        let mut stmt = conn.prepare("SELECT id FROM accounts WHERE name = ?1")?;
        stmt.query_row([account_name], |row| row.get(0))
            .map_err(|_| PennyError::UnknownAccount(account_name.to_string()))?
    };

    let checksum = compute_checksum(file_path)?;
    {
        let mut stmt =
            conn.prepare("SELECT 1 FROM imports WHERE checksum = ?1 AND account_id = ?2")?;
        if stmt.exists(rusqlite::params![checksum, account_id])? {
            return Err(PennyError::DuplicateImport(
                file_path.display().to_string(),
            ));
        }
    }

    let parsed = parse_csv(file_path, options.flip_signs)?;
    if parsed.malformed > 0 {
        warn!(
            file = %file_path.display(),
            malformed = parsed.malformed,
            "skipped malformed rows"
        );
    }

    let source = if options.archive {
        Source::ArchiveImport
    } else {
        Source::FileImport
    };

    let tx = conn.unchecked_transaction()?;
    let mut imported = 0usize;
    let mut skipped = 0usize;
    for row in &parsed.rows {
        if is_duplicate_row(&tx, account_id, row)? {
            skipped += 1;
            continue;
        }
        let classification = classify(&tx, &row.description, row.amount, classifier, threshold)?;
        let (category_id, predicted_category_id) = match classification.status {
            ReviewStatus::AutoConfirmed => (classification.category_id, None),
            _ => (None, classification.category_id),
        };
        tx.execute(
            "INSERT INTO transactions (account_id, date, description, merchant, amount, \
             category_id, predicted_category_id, status, source, tier, confidence) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                account_id,
                row.date,
                row.description,
                row.merchant,
                row.amount,
                category_id,
                predicted_category_id,
                classification.status.as_str(),
                source.as_str(),
                classification.tier,
                if classification.tier.is_some() {
                    Some(classification.confidence)
                } else {
                    None
                },
            ],
        )?;
        imported += 1;
    }

    let dates: Vec<&str> = parsed.rows.iter().map(|r| r.date.as_str()).collect();
    let min_date = dates.iter().min().copied();
    let max_date = dates.iter().max().copied();
    tx.execute(
        "INSERT INTO imports (filename, account_id, record_count, date_range_start, \
         date_range_end, checksum) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            file_path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            account_id,
            parsed.rows.len() as i64,
            min_date,
            max_date,
            checksum,
        ],
    )?;
    tx.commit()?;

    info!(
        file = %file_path.display(),
        account = account_name,
        imported,
        skipped,
        malformed = parsed.malformed,
        "import complete"
    );

    Ok(ImportResult {
        imported,
        skipped,
        malformed: parsed.malformed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use crate::models::ReviewStatus;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn add_test_account(conn: &Connection) {
        conn.execute(
            "INSERT INTO accounts (name, institution, account_type) \
             VALUES ('Test Checking', 'test', 'checking')",
            [],
        )
        .unwrap();
    }

    const OPTS: ImportOptions = ImportOptions {
        archive: false,
        flip_signs: false,
    };

    fn write_csv(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("$50.00"), Some(50.0));
        assert_eq!(parse_amount("(500.00)"), Some(-500.0));
        assert_eq!(parse_amount("  -42.50  "), Some(-42.5));
        assert_eq!(parse_amount("not_a_number"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2025-01-15"), Some("2025-01-15".to_string()));
        assert_eq!(parse_date("01/15/2025"), Some("2025-01-15".to_string()));
        assert_eq!(parse_date("13/01/2025"), None);
        assert_eq!(parse_date("nope"), None);
    }

    #[test]
    fn test_parse_csv_skips_header_and_counts_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "a.csv",
            "date,description,amount\n\
             2025-01-15,COFFEE SHOP,4.50\n\
             not-a-date,BROKEN,1.00\n\
             2025-01-16,MARKET,12.00,Market Inc\n\
             2025-01-17,,9.00\n",
        );
        let outcome = parse_csv(&path, false).unwrap();
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.malformed, 2);
        assert_eq!(outcome.rows[1].merchant.as_deref(), Some("Market Inc"));
    }

    #[test]
    fn test_parse_csv_flip_signs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "a.csv", "2025-01-15,PAYCHECK,2500.00\n");
        let outcome = parse_csv(&path, true).unwrap();
        assert_eq!(outcome.rows[0].amount, -2500.0);
    }

    #[test]
    fn test_import_file_inserts_transactions() {
        let (dir, conn) = test_db();
        add_test_account(&conn);
        let path = write_csv(
            dir.path(),
            "stmt.csv",
            "2025-01-15,PAYMENT ONE,100.00\n2025-01-16,PAYMENT TWO,250.00\n",
        );
        let result = import_file(&conn, &path, "Test Checking", &OPTS, None, 3).unwrap();
        assert_eq!(result.imported, 2);
        let (count, source): (i64, String) = conn
            .query_row(
                "SELECT count(*), source FROM transactions",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(source, "file_import");
    }

    #[test]
    fn test_import_file_rejects_duplicate_checksum() {
        let (dir, conn) = test_db();
        add_test_account(&conn);
        let path = write_csv(dir.path(), "stmt.csv", "2025-01-15,PAYMENT ONE,100.00\n");
        import_file(&conn, &path, "Test Checking", &OPTS, None, 3).unwrap();
        let err = import_file(&conn, &path, "Test Checking", &OPTS, None, 3).unwrap_err();
        assert!(matches!(err, PennyError::DuplicateImport(_)));
    }

    #[test]
    fn test_import_file_skips_duplicate_rows() {
        let (dir, conn) = test_db();
        add_test_account(&conn);
        let a = write_csv(
            dir.path(),
            "a.csv",
            "2025-01-15,PAYMENT ONE,100.00\n2025-01-16,PAYMENT TWO,200.00\n",
        );
        import_file(&conn, &a, "Test Checking", &OPTS, None, 3).unwrap();
        let b = write_csv(
            dir.path(),
            "b.csv",
            "2025-01-16,PAYMENT TWO,200.00\n2025-01-18,PAYMENT THREE,300.00\n",
        );
        let result = import_file(&conn, &b, "Test Checking", &OPTS, None, 3).unwrap();
        assert_eq!(result.imported, 1);
        assert_eq!(result.skipped, 1);
    }

    #[test]
    fn test_import_classifies_rows() {
        let (dir, conn) = test_db();
        add_test_account(&conn);
        let cat: i64 = conn
            .query_row("SELECT id FROM categories WHERE key = 'coffee'", [], |r| r.get(0))
            .unwrap();
        conn.execute(
            "INSERT INTO merchant_mappings (pattern, category_id, confidence) \
             VALUES ('BLUE BOTTLE', ?1, 5)",
            [cat],
        )
        .unwrap();
        let path = write_csv(dir.path(), "a.csv", "2025-01-15,BLUE BOTTLE COFFEE,6.25\n");
        import_file(&conn, &path, "Test Checking", &OPTS, None, 3).unwrap();
        let (category_id, status): (Option<i64>, String) = conn
            .query_row(
                "SELECT category_id, status FROM transactions",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(category_id, Some(cat));
        assert_eq!(status, ReviewStatus::AutoConfirmed.as_str());
    }

    #[test]
    fn test_archive_import_source() {
        let (dir, conn) = test_db();
        add_test_account(&conn);
        let path = write_csv(dir.path(), "old.csv", "2024-06-01,OLD PAYMENT,75.00\n");
        let opts = ImportOptions {
            archive: true,
            flip_signs: false,
        };
        import_file(&conn, &path, "Test Checking", &opts, None, 3).unwrap();
        let source: String = conn
            .query_row("SELECT source FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(source, "archive_import");
    }

    #[test]
    fn test_import_records_batch_metadata() {
        let (dir, conn) = test_db();
        add_test_account(&conn);
        let path = write_csv(
            dir.path(),
            "stmt.csv",
            "2025-01-15,PAYMENT ONE,100.00\n2025-01-20,PAYMENT TWO,50.00\n",
        );
        import_file(&conn, &path, "Test Checking", &OPTS, None, 3).unwrap();
        let (start, end, count): (String, String, i64) = conn
            .query_row(
                "SELECT date_range_start, date_range_end, record_count FROM imports",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(start, "2025-01-15");
        assert_eq!(end, "2025-01-20");
        assert_eq!(count, 2);
    }
}
