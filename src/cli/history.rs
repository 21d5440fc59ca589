use comfy_table::{Cell, Table};
use rusqlite::OptionalExtension;

use crate::db::get_connection;
use crate::error::{PennyError, Result};
use crate::settings::db_path;
use crate::sync::sync_history;

pub fn run(account: Option<&str>, limit: usize) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let account_id = match account {
        Some(name) => Some(
            conn.query_row("SELECT id FROM accounts WHERE name = ?1", [name], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .ok_or_else(|| PennyError::UnknownAccount(name.to_string()))?,
        ),
        None => None,
    };

    let entries = sync_history(&conn, account_id, limit)?;
    if entries.is_empty() {
        println!("No syncs recorded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "When", "Account", "Trigger", "Status", "Added", "Modified", "Removed", "Duration", "Error",
    ]);
    for entry in &entries {
        let duration = entry
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&entry.started_at),
            Cell::new(&entry.account_name),
            Cell::new(&entry.trigger),
            Cell::new(&entry.status),
            Cell::new(entry.added),
            Cell::new(entry.modified),
            Cell::new(entry.removed),
            Cell::new(duration),
            Cell::new(entry.error_message.as_deref().unwrap_or("")),
        ]);
    }
    println!("Sync history\n{table}");
    Ok(())
}
