use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::db::get_connection;
use crate::error::Result;
use crate::ledger::{list_transactions, LedgerFilter};
use crate::models::ReviewStatus;
use crate::review::{
    bulk_confirm, bulk_stage, commit_staged, confirm, kick_back, revert_all, stage, BulkAction,
};
use crate::settings::db_path;

pub fn list(
    status: Option<&str>,
    account: Option<&str>,
    search: Option<&str>,
    limit: usize,
) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let status = match status {
        Some(s) => Some(ReviewStatus::parse(s)?),
        None => Some(ReviewStatus::PendingReview),
    };
    let rows = list_transactions(
        &conn,
        &LedgerFilter {
            status,
            account,
            search,
            limit: Some(limit),
            ..Default::default()
        },
    )?;

    if rows.is_empty() {
        println!("No matching transactions.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Date", "Account", "Description", "Amount", "Category", "Predicted", "Status",
    ]);
    for row in &rows {
        // Show where a prediction came from, e.g. "coffee (merchant_map 0.67)".
        let predicted = match (&row.predicted_key, &row.tier, row.confidence) {
            (Some(key), Some(tier), Some(conf)) => format!("{key} ({tier} {conf:.2})"),
            (Some(key), _, _) => key.clone(),
            (None, _, _) => String::new(),
        };
        table.add_row(vec![
            Cell::new(row.id),
            Cell::new(&row.date),
            Cell::new(&row.account_name),
            Cell::new(&row.description),
            Cell::new(format!("{:.2}", row.amount)),
            Cell::new(row.category_key.as_deref().unwrap_or("")),
            Cell::new(predicted),
            Cell::new(row.status.as_str()),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub fn stage_cmd(id: i64, category: &str) -> Result<()> {
    let conn = get_connection(&db_path())?;
    stage(&conn, id, category)?;
    println!("Staged transaction {id} as {category}.");
    Ok(())
}

pub fn kick_back_cmd(id: i64) -> Result<()> {
    let conn = get_connection(&db_path())?;
    kick_back(&conn, id)?;
    println!("Transaction {id} sent back to pending review.");
    Ok(())
}

pub fn commit_cmd() -> Result<()> {
    let conn = get_connection(&db_path())?;
    let result = commit_staged(&conn)?;
    if result.committed == 0 {
        println!("Nothing staged.");
    } else {
        println!(
            "{} ({} merchant mappings updated)",
            format!("Committed {} transactions.", result.committed).green(),
            result.mappings_updated
        );
    }
    Ok(())
}

pub fn revert_cmd() -> Result<()> {
    let conn = get_connection(&db_path())?;
    let count = revert_all(&conn)?;
    println!("Reverted {count} staged transactions.");
    Ok(())
}

pub fn confirm_cmd(id: i64, category: &str) -> Result<()> {
    let conn = get_connection(&db_path())?;
    confirm(&conn, id, category)?;
    println!("Confirmed transaction {id} as {category}.");
    Ok(())
}

pub fn bulk_cmd(ids: &[i64], category: Option<&str>, stage_only: bool) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let action = match category {
        Some(key) => BulkAction::Change(key.to_string()),
        None => BulkAction::ConfirmPredicted,
    };
    let affected = if stage_only {
        let n = bulk_stage(&conn, ids, &action)?;
        println!("Staged {n} of {} transactions.", ids.len());
        n
    } else {
        let n = bulk_confirm(&conn, ids, &action)?;
        println!("Confirmed {n} of {} transactions.", ids.len());
        n
    };
    if affected < ids.len() {
        println!(
            "{}",
            "Some rows were skipped (already confirmed or missing a prediction).".yellow()
        );
    }
    Ok(())
}
