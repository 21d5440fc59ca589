use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::db::get_connection;
use crate::error::{PennyError, Result};
use crate::settings::db_path;

pub fn add(name: &str, account_type: &str, institution: &str) -> Result<()> {
    if !matches!(account_type, "checking" | "savings" | "credit") {
        return Err(PennyError::Other(format!(
            "unknown account type '{account_type}' (expected checking, savings, or credit)"
        )));
    }
    let conn = get_connection(&db_path())?;
    conn.execute(
        "INSERT INTO accounts (name, institution, account_type) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, institution, account_type],
    )?;
    println!("Added account: {name}");
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = get_connection(&db_path())?;
    let mut stmt = conn.prepare(
        "SELECT id, name, institution, account_type, connection_status FROM accounts ORDER BY id",
    )?;
    let rows: Vec<(i64, String, String, String, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Institution", "Type", "Connection"]);
    for (id, name, institution, account_type, status) in rows {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(name),
            Cell::new(institution),
            Cell::new(account_type),
            Cell::new(status),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}

pub fn link(name: &str, access_token: &str, external_id: Option<&str>) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let changed = conn.execute(
        "UPDATE accounts SET access_token = ?1, external_account_id = ?2, \
         connection_status = 'connected', last_sync_error = NULL WHERE name = ?3",
        rusqlite::params![access_token, external_id, name],
    )?;
    if changed == 0 {
        return Err(PennyError::UnknownAccount(name.to_string()));
    }
    println!("Linked account: {name}");
    println!("Run `penny sync --account \"{name}\"` to pull transactions.");
    Ok(())
}

pub fn status() -> Result<()> {
    let conn = get_connection(&db_path())?;
    let mut stmt = conn.prepare(
        "SELECT name, connection_status, last_synced_at, last_sync_error \
         FROM accounts ORDER BY id",
    )?;
    let rows: Vec<(String, String, Option<String>, Option<String>)> = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        println!("No accounts. Run `penny accounts add` first.");
        return Ok(());
    }
    for (name, status, last_synced, error) in rows {
        let status_display = match status.as_str() {
            "connected" => status.green(),
            "login_required" => status.red(),
            _ => status.yellow(),
        };
        print!("{name}: {status_display}");
        if let Some(at) = last_synced {
            print!("  (last sync {at})");
        }
        println!();
        if let Some(err) = error {
            println!("  {}", err.red());
        }
    }
    Ok(())
}
