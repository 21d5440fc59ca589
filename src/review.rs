use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{PennyError, Result};
use crate::models::ReviewStatus;

/// Increment the mapping's confidence when the user confirms its current
/// target; reset to 1 and retarget when they pick something else; create at
/// 1 on first confirmation. This is the only place confidence ever changes.
pub fn apply_mapping_feedback(conn: &Connection, merchant: &str, category_id: i64) -> Result<()> {
    let pattern = merchant.to_uppercase();
    let existing: Option<(i64, i64)> = conn
        .query_row(
            "SELECT id, category_id FROM merchant_mappings WHERE pattern = ?1",
            [&pattern],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((id, current_category)) if current_category == category_id => {
            conn.execute(
                "UPDATE merchant_mappings SET confidence = confidence + 1 WHERE id = ?1",
                [id],
            )?;
        }
        Some((id, _)) => {
            conn.execute(
                "UPDATE merchant_mappings SET category_id = ?1, confidence = 1 WHERE id = ?2",
                rusqlite::params![category_id, id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO merchant_mappings (pattern, category_id, confidence) VALUES (?1, ?2, 1)",
                rusqlite::params![pattern, category_id],
            )?;
        }
    }
    Ok(())
}

fn lookup_category(conn: &Connection, key: &str) -> Result<i64> {
    conn.query_row("SELECT id FROM categories WHERE key = ?1", [key], |r| r.get(0))
        .optional()?
        .ok_or_else(|| PennyError::UnknownCategory(key.to_string()))
}

fn lookup_txn(conn: &Connection, txn_id: i64) -> Result<(ReviewStatus, Option<String>)> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT status, merchant FROM transactions WHERE id = ?1",
            [txn_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (status, merchant) =
        row.ok_or_else(|| PennyError::Other(format!("transaction {txn_id} not found")))?;
    Ok((ReviewStatus::parse(&status)?, merchant))
}

/// Stage a transaction with a chosen category (pending_save). Staging is
/// provisional: merchant-mapping confidence is untouched until commit.
pub fn stage(conn: &Connection, txn_id: i64, category_key: &str) -> Result<()> {
    let category_id = lookup_category(conn, category_key)?;
    let (status, _) = lookup_txn(conn, txn_id)?;
    match status {
        ReviewStatus::PendingReview | ReviewStatus::PendingSave => {
            conn.execute(
                "UPDATE transactions SET category_id = ?1, status = 'pending_save' WHERE id = ?2",
                rusqlite::params![category_id, txn_id],
            )?;
            Ok(())
        }
        other => Err(PennyError::InvalidState(format!(
            "cannot stage transaction {txn_id} from status {}",
            other.as_str()
        ))),
    }
}

/// Send a staged transaction back to review, clearing the assignment. The
/// assigned category becomes the prediction unless one already exists.
/// A no-op on rows already back in review; illegal on confirmed rows.
pub fn kick_back(conn: &Connection, txn_id: i64) -> Result<()> {
    let (status, _) = lookup_txn(conn, txn_id)?;
    match status {
        ReviewStatus::PendingSave => {
            conn.execute(
                "UPDATE transactions SET \
                 predicted_category_id = COALESCE(predicted_category_id, category_id), \
                 category_id = NULL, status = 'pending_review' WHERE id = ?1",
                [txn_id],
            )?;
            Ok(())
        }
        ReviewStatus::PendingReview => Ok(()),
        other => Err(PennyError::InvalidState(format!(
            "cannot kick back transaction {txn_id} from status {}",
            other.as_str()
        ))),
    }
}

#[derive(Debug, Default, Clone)]
pub struct CommitResult {
    pub committed: usize,
    pub mappings_updated: usize,
}

/// Commit every staged row to confirmed. Confidence feedback happens here
/// and only here, once per committed row; two staged rows sharing a merchant
/// pattern each count.
pub fn commit_staged(conn: &Connection) -> Result<CommitResult> {
    let mut stmt = conn.prepare(
        "SELECT id, merchant, category_id FROM transactions WHERE status = 'pending_save'",
    )?;
    let staged: Vec<(i64, Option<String>, Option<i64>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = CommitResult::default();

    for (txn_id, merchant, category_id) in staged {
        conn.execute(
            "UPDATE transactions SET status = 'confirmed' WHERE id = ?1",
            [txn_id],
        )?;
        result.committed += 1;

        if let (Some(merchant), Some(category_id)) = (merchant, category_id) {
            apply_mapping_feedback(conn, &merchant, category_id)?;
            result.mappings_updated += 1;
        }
    }

    info!(
        committed = result.committed,
        mappings = result.mappings_updated,
        "committed staged transactions"
    );
    Ok(result)
}

/// Kick back every staged row.
pub fn revert_all(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "UPDATE transactions SET \
         predicted_category_id = COALESCE(predicted_category_id, category_id), \
         category_id = NULL, status = 'pending_review' \
         WHERE status = 'pending_save'",
        [],
    )?;
    Ok(count)
}

/// Confirm a single pending_review row directly with a chosen category,
/// applying confidence feedback immediately.
pub fn confirm(conn: &Connection, txn_id: i64, category_key: &str) -> Result<()> {
    let category_id = lookup_category(conn, category_key)?;
    let (status, merchant) = lookup_txn(conn, txn_id)?;
    if !matches!(status, ReviewStatus::PendingReview | ReviewStatus::PendingSave) {
        return Err(PennyError::InvalidState(format!(
            "cannot confirm transaction {txn_id} from status {}",
            status.as_str()
        )));
    }
    conn.execute(
        "UPDATE transactions SET category_id = ?1, status = 'confirmed' WHERE id = ?2",
        rusqlite::params![category_id, txn_id],
    )?;
    if let Some(merchant) = merchant {
        apply_mapping_feedback(conn, &merchant, category_id)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum BulkAction {
    /// Confirm each row with its predicted category; rows without a
    /// prediction are skipped.
    ConfirmPredicted,
    /// Assign the given category to every row.
    Change(String),
}

/// Bulk confirm: same feedback rule as single confirmation, per row.
pub fn bulk_confirm(conn: &Connection, txn_ids: &[i64], action: &BulkAction) -> Result<usize> {
    let mut confirmed = 0usize;
    for &txn_id in txn_ids {
        let (status, merchant) = lookup_txn(conn, txn_id)?;
        if !matches!(status, ReviewStatus::PendingReview | ReviewStatus::PendingSave) {
            continue;
        }
        let category_id = match action {
            BulkAction::ConfirmPredicted => {
                let predicted: Option<i64> = conn.query_row(
                    "SELECT predicted_category_id FROM transactions WHERE id = ?1",
                    [txn_id],
                    |r| r.get(0),
                )?;
                match predicted {
                    Some(id) => id,
                    None => continue,
                }
            }
            BulkAction::Change(key) => lookup_category(conn, key)?,
        };
        conn.execute(
            "UPDATE transactions SET category_id = ?1, status = 'confirmed' WHERE id = ?2",
            rusqlite::params![category_id, txn_id],
        )?;
        if let Some(merchant) = merchant {
            apply_mapping_feedback(conn, &merchant, category_id)?;
        }
        confirmed += 1;
    }
    Ok(confirmed)
}

/// Bulk stage: same selection rules as bulk confirm, but rows land in
/// pending_save and no feedback is applied.
pub fn bulk_stage(conn: &Connection, txn_ids: &[i64], action: &BulkAction) -> Result<usize> {
    let mut staged = 0usize;
    for &txn_id in txn_ids {
        let (status, _) = lookup_txn(conn, txn_id)?;
        if !matches!(status, ReviewStatus::PendingReview | ReviewStatus::PendingSave) {
            continue;
        }
        let category_id = match action {
            BulkAction::ConfirmPredicted => {
                let predicted: Option<i64> = conn.query_row(
                    "SELECT predicted_category_id FROM transactions WHERE id = ?1",
                    [txn_id],
                    |r| r.get(0),
                )?;
                match predicted {
                    Some(id) => id,
                    None => continue,
                }
            }
            BulkAction::Change(key) => lookup_category(conn, key)?,
        };
        conn.execute(
            "UPDATE transactions SET category_id = ?1, status = 'pending_save' WHERE id = ?2",
            rusqlite::params![category_id, txn_id],
        )?;
        staged += 1;
    }
    Ok(staged)
}
