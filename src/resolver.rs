use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::cascade::{classify, Classification};
use crate::classifier::Classifier;
use crate::error::Result;
use crate::feed::FeedTransaction;
use crate::models::{ReviewStatus, Source};

/// What the resolver decided to do with one incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Matched an existing row by external id; mutable fields updated.
    Updated,
    /// A pending row posted; the existing row was upgraded in place.
    PendingPosted,
    /// Attached the external id to an archive-imported row.
    MergedArchive,
    /// Re-pointed an existing row's external id after a cursor reset
    /// re-delivered it under a new id.
    Repointed,
    /// Brand-new ledger row.
    Inserted,
}

impl Disposition {
    /// Whether the sync summary counts this as an add (vs. a modification).
    pub fn is_add(&self) -> bool {
        matches!(self, Disposition::Inserted)
    }
}

/// Decide the disposition of one normalized incoming record against the
/// ledger, in strict order: external-id match, pending→posted upgrade,
/// archive merge, re-ingestion re-point, insert.
pub fn resolve_incoming(
    conn: &Connection,
    account_id: i64,
    incoming: &FeedTransaction,
    classifier: Option<&dyn Classifier>,
    threshold: i64,
) -> Result<Disposition> {
    // 1. Exact match by external id.
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, status FROM transactions WHERE external_id = ?1",
            [&incoming.external_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some((id, status)) = existing {
        update_mutable_fields(conn, id, &status, incoming)?;
        return Ok(Disposition::Updated);
    }

    // 2. Pending→posted transition: the incoming posted record references the
    // external id we stored for its pending form. Upgrading in place keeps
    // the row (and any confirmed category) instead of creating a duplicate.
    if let Some(pending_id) = &incoming.pending_external_id {
        let pending_match: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, status FROM transactions WHERE external_id = ?1",
                [pending_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some((id, status)) = pending_match {
            conn.execute(
                "UPDATE transactions SET external_id = ?1, is_pending = 0 WHERE id = ?2",
                rusqlite::params![incoming.external_id, id],
            )?;
            update_mutable_fields(conn, id, &status, incoming)?;
            return Ok(Disposition::PendingPosted);
        }
    }

    // 3. Cross-source merge: an archive row for the same account and amount
    // within ±2 days that has not been claimed by the feed yet. Archive data
    // pre-dates the feed and often already carries a categorization, so the
    // archive row stays canonical.
    let archive_match: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, status FROM transactions \
             WHERE account_id = ?1 AND source = 'archive_import' AND external_id IS NULL \
             AND ABS(amount - ?2) < 0.005 \
             AND date >= date(?3, '-2 day') AND date <= date(?3, '+2 day') \
             LIMIT 1",
            rusqlite::params![account_id, incoming.amount, incoming.date],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some((id, status)) = archive_match {
        conn.execute(
            "UPDATE transactions SET external_id = ?1, date = ?2, is_pending = ?3 WHERE id = ?4",
            rusqlite::params![incoming.external_id, incoming.date, incoming.pending, id],
        )?;
        // Keep the archive description unless the feed has the raw bank text.
        if incoming.original_description.is_some() && !ReviewStatus::parse(&status)?.protects_edits()
        {
            conn.execute(
                "UPDATE transactions SET description = ?1, merchant = ?2 WHERE id = ?3",
                rusqlite::params![
                    incoming.ledger_description(),
                    incoming.ledger_merchant(),
                    id
                ],
            )?;
        }
        info!(
            external_id = %incoming.external_id,
            amount = incoming.amount,
            "merged feed transaction into archive row"
        );
        return Ok(Disposition::MergedArchive);
    }

    // 4. Idempotent re-ingestion guard: after a cursor reset the feed
    // re-delivers old records under fresh external ids. Re-point rather than
    // duplicate.
    let replayed: Option<i64> = conn
        .query_row(
            "SELECT id FROM transactions \
             WHERE account_id = ?1 AND date = ?2 AND ABS(amount - ?3) < 0.005 \
             AND external_id IS NOT NULL AND external_id != ?4 \
             LIMIT 1",
            rusqlite::params![account_id, incoming.date, incoming.amount, incoming.external_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = replayed {
        conn.execute(
            "UPDATE transactions SET external_id = ?1, is_pending = ?2 WHERE id = ?3",
            rusqlite::params![incoming.external_id, incoming.pending, id],
        )?;
        return Ok(Disposition::Repointed);
    }

    // 5. Brand new — run the cascade and insert.
    let classification = classify(
        conn,
        incoming.ledger_description(),
        incoming.amount,
        classifier,
        threshold,
    )?;
    insert_new(conn, account_id, incoming, &classification)?;
    Ok(Disposition::Inserted)
}

/// Date, amount, and the pending flag always update. Description and
/// merchant only update while the row is still under review — user edits on
/// confirmed or staged rows must survive later syncs.
fn update_mutable_fields(
    conn: &Connection,
    id: i64,
    status: &str,
    incoming: &FeedTransaction,
) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET date = ?1, amount = ?2, is_pending = ?3 WHERE id = ?4",
        rusqlite::params![incoming.date, incoming.amount, incoming.pending, id],
    )?;
    if !ReviewStatus::parse(status)?.protects_edits() {
        conn.execute(
            "UPDATE transactions SET description = ?1, merchant = ?2 WHERE id = ?3",
            rusqlite::params![incoming.ledger_description(), incoming.ledger_merchant(), id],
        )?;
    }
    Ok(())
}

fn insert_new(
    conn: &Connection,
    account_id: i64,
    incoming: &FeedTransaction,
    classification: &Classification,
) -> Result<()> {
    let (category_id, predicted_category_id) = match classification.status {
        ReviewStatus::AutoConfirmed => (classification.category_id, None),
        _ => (None, classification.category_id),
    };
    conn.execute(
        "INSERT INTO transactions \
         (account_id, external_id, date, description, merchant, amount, category_id, \
          predicted_category_id, status, source, is_pending, tier, confidence) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        rusqlite::params![
            account_id,
            incoming.external_id,
            incoming.date,
            incoming.ledger_description(),
            incoming.ledger_merchant(),
            incoming.amount,
            category_id,
            predicted_category_id,
            classification.status.as_str(),
            Source::ExternalSync.as_str(),
            incoming.pending,
            classification.tier,
            classification.confidence,
        ],
    )?;
    Ok(())
}

/// Feed "removed" events delete the matching row outright.
pub fn apply_removal(conn: &Connection, external_id: &str) -> Result<bool> {
    let count = conn.execute(
        "DELETE FROM transactions WHERE external_id = ?1",
        [external_id],
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn add_account(conn: &Connection) -> i64 {
        conn.execute(
            "INSERT INTO accounts (name, institution, account_type) VALUES ('Checking', 'test', 'checking')",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn feed_txn(external_id: &str, date: &str, description: &str, amount: f64) -> FeedTransaction {
        FeedTransaction {
            external_id: external_id.to_string(),
            date: date.to_string(),
            description: description.to_string(),
            original_description: None,
            merchant: None,
            amount,
            pending: false,
            pending_external_id: None,
        }
    }

    fn row_count(conn: &Connection, account_id: i64) -> i64 {
        conn.query_row(
            "SELECT count(*) FROM transactions WHERE account_id = ?1",
            [account_id],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_replay_is_idempotent() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let txn = feed_txn("ext-1", "2025-03-10", "COFFEE SHOP #55", 4.75);
        assert_eq!(
            resolve_incoming(&conn, acct, &txn, None, 3).unwrap(),
            Disposition::Inserted
        );
        assert_eq!(
            resolve_incoming(&conn, acct, &txn, None, 3).unwrap(),
            Disposition::Updated
        );
        assert_eq!(row_count(&conn, acct), 1);
    }

    #[test]
    fn test_update_refreshes_mutable_fields() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let txn = feed_txn("ext-1", "2025-03-10", "COFFEE SHOP #55", 4.75);
        resolve_incoming(&conn, acct, &txn, None, 3).unwrap();
        let mut corrected = feed_txn("ext-1", "2025-03-11", "COFFEE SHOP #55 AUS", 5.25);
        corrected.pending = true;
        resolve_incoming(&conn, acct, &corrected, None, 3).unwrap();
        let (date, desc, amount, pending): (String, String, f64, bool) = conn
            .query_row(
                "SELECT date, description, amount, is_pending FROM transactions WHERE external_id = 'ext-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(date, "2025-03-11");
        assert_eq!(desc, "COFFEE SHOP #55 AUS");
        assert!((amount - 5.25).abs() < 1e-9);
        assert!(pending);
    }

    #[test]
    fn test_confirmed_description_is_protected() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let txn = feed_txn("ext-1", "2025-03-10", "COFFEE SHOP #55", 4.75);
        resolve_incoming(&conn, acct, &txn, None, 3).unwrap();
        conn.execute(
            "UPDATE transactions SET status = 'confirmed', merchant = 'My Coffee Place' \
             WHERE external_id = 'ext-1'",
            [],
        )
        .unwrap();

        // Feed later revises the description and corrects the amount.
        let revised = feed_txn("ext-1", "2025-03-10", "CHANGED TEXT", 4.95);
        resolve_incoming(&conn, acct, &revised, None, 3).unwrap();

        let (desc, merchant, amount): (String, String, f64) = conn
            .query_row(
                "SELECT description, merchant, amount FROM transactions WHERE external_id = 'ext-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(desc, "COFFEE SHOP #55");
        assert_eq!(merchant, "My Coffee Place");
        assert!((amount - 4.95).abs() < 1e-9);
    }

    #[test]
    fn test_pending_to_posted_upgrade() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let mut pending = feed_txn("pend-1", "2025-03-10", "COFFEE SHOP #55", 4.75);
        pending.pending = true;
        resolve_incoming(&conn, acct, &pending, None, 3).unwrap();

        // User confirms a category while the charge is still pending.
        let coffee: i64 = conn
            .query_row("SELECT id FROM categories WHERE key = 'coffee'", [], |r| r.get(0))
            .unwrap();
        conn.execute(
            "UPDATE transactions SET category_id = ?1, status = 'confirmed' WHERE external_id = 'pend-1'",
            [coffee],
        )
        .unwrap();

        let mut posted = feed_txn("post-1", "2025-03-12", "COFFEE SHOP #55", 4.75);
        posted.pending_external_id = Some("pend-1".to_string());
        assert_eq!(
            resolve_incoming(&conn, acct, &posted, None, 3).unwrap(),
            Disposition::PendingPosted
        );
        assert_eq!(row_count(&conn, acct), 1);

        let (external_id, is_pending, category_id): (String, bool, Option<i64>) = conn
            .query_row(
                "SELECT external_id, is_pending, category_id FROM transactions",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(external_id, "post-1");
        assert!(!is_pending);
        assert_eq!(category_id, Some(coffee));
    }

    #[test]
    fn test_archive_merge_within_date_tolerance() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        conn.execute(
            "INSERT INTO transactions (account_id, date, description, amount, source) \
             VALUES (?1, '2024-03-10', 'GROCERY MART', 42.17, 'archive_import')",
            [acct],
        )
        .unwrap();

        let txn = feed_txn("ext-x", "2024-03-11", "GROCERY MART 0042", 42.17);
        assert_eq!(
            resolve_incoming(&conn, acct, &txn, None, 3).unwrap(),
            Disposition::MergedArchive
        );
        assert_eq!(row_count(&conn, acct), 1);
        let (external_id, source): (String, String) = conn
            .query_row("SELECT external_id, source FROM transactions", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(external_id, "ext-x");
        assert_eq!(source, "archive_import");
    }

    #[test]
    fn test_archive_merge_ignores_out_of_window_dates() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        conn.execute(
            "INSERT INTO transactions (account_id, date, description, amount, source) \
             VALUES (?1, '2024-03-01', 'GROCERY MART', 42.17, 'archive_import')",
            [acct],
        )
        .unwrap();
        let txn = feed_txn("ext-x", "2024-03-11", "GROCERY MART 0042", 42.17);
        assert_eq!(
            resolve_incoming(&conn, acct, &txn, None, 3).unwrap(),
            Disposition::Inserted
        );
        assert_eq!(row_count(&conn, acct), 2);
    }

    #[test]
    fn test_archive_merge_keeps_existing_category() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let groceries: i64 = conn
            .query_row("SELECT id FROM categories WHERE key = 'groceries'", [], |r| r.get(0))
            .unwrap();
        conn.execute(
            "INSERT INTO transactions (account_id, date, description, amount, source, category_id, status) \
             VALUES (?1, '2024-03-10', 'GROCERY MART', 42.17, 'archive_import', ?2, 'confirmed')",
            rusqlite::params![acct, groceries],
        )
        .unwrap();
        let txn = feed_txn("ext-x", "2024-03-11", "GROCERY MART 0042", 42.17);
        resolve_incoming(&conn, acct, &txn, None, 3).unwrap();
        let category: Option<i64> = conn
            .query_row("SELECT category_id FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(category, Some(groceries));
    }

    #[test]
    fn test_cursor_reset_replay_repoints_external_id() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let original = feed_txn("old-id", "2025-03-10", "COFFEE SHOP #55", 4.75);
        resolve_incoming(&conn, acct, &original, None, 3).unwrap();

        // Cursor reset re-delivers the same real-world transaction under a
        // fresh external id.
        let replayed = feed_txn("new-id", "2025-03-10", "COFFEE SHOP #55", 4.75);
        assert_eq!(
            resolve_incoming(&conn, acct, &replayed, None, 3).unwrap(),
            Disposition::Repointed
        );
        assert_eq!(row_count(&conn, acct), 1);
        let external_id: String = conn
            .query_row("SELECT external_id FROM transactions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(external_id, "new-id");
    }

    #[test]
    fn test_insert_runs_cascade() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let coffee: i64 = conn
            .query_row("SELECT id FROM categories WHERE key = 'coffee'", [], |r| r.get(0))
            .unwrap();
        conn.execute(
            "INSERT INTO merchant_mappings (pattern, category_id, confidence) VALUES ('COFFEE SHOP', ?1, 5)",
            [coffee],
        )
        .unwrap();
        let txn = feed_txn("ext-1", "2025-03-10", "COFFEE SHOP #55", 4.75);
        resolve_incoming(&conn, acct, &txn, None, 3).unwrap();
        let (status, category_id): (String, Option<i64>) = conn
            .query_row("SELECT status, category_id FROM transactions", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(status, "auto_confirmed");
        assert_eq!(category_id, Some(coffee));
    }

    #[test]
    fn test_removal_deletes_row() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let txn = feed_txn("ext-1", "2025-03-10", "COFFEE SHOP #55", 4.75);
        resolve_incoming(&conn, acct, &txn, None, 3).unwrap();
        assert!(apply_removal(&conn, "ext-1").unwrap());
        assert!(!apply_removal(&conn, "ext-1").unwrap());
        assert_eq!(row_count(&conn, acct), 0);
    }

    #[test]
    fn test_feed_then_archive_order_also_converges() {
        // Archive import dedupes against rows the feed delivered first; the
        // importer's exact-duplicate guard covers the reverse interleaving,
        // so no second posted row appears either way.
        let (_dir, conn) = test_db();
        let acct = add_account(&conn);
        let txn = feed_txn("ext-1", "2024-03-11", "GROCERY MART", 42.17);
        resolve_incoming(&conn, acct, &txn, None, 3).unwrap();
        // Same transaction replayed later must not duplicate regardless of id.
        let replay = feed_txn("ext-2", "2024-03-11", "GROCERY MART", 42.17);
        resolve_incoming(&conn, acct, &replay, None, 3).unwrap();
        assert_eq!(row_count(&conn, acct), 1);
    }
}
