use comfy_table::{Cell, Table};

use crate::categories::category_id_by_key;
use crate::db::get_connection;
use crate::error::Result;
use crate::settings::db_path;

pub fn list() -> Result<()> {
    let conn = get_connection(&db_path())?;

    let mut stmt = conn.prepare(
        "SELECT m.pattern, c.key, m.confidence FROM merchant_mappings m \
         JOIN categories c ON m.category_id = c.id ORDER BY m.confidence DESC, m.pattern",
    )?;
    let mappings: Vec<(String, String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec!["Pattern", "Category", "Confidence"]);
    for (pattern, category, confidence) in &mappings {
        table.add_row(vec![
            Cell::new(pattern),
            Cell::new(category),
            Cell::new(confidence),
        ]);
    }
    println!("Merchant mappings\n{table}");

    let mut stmt = conn.prepare(
        "SELECT r.pattern, r.amount, r.tolerance, c.key, r.note FROM amount_rules r \
         JOIN categories c ON r.category_id = c.id ORDER BY r.pattern",
    )?;
    let rules: Vec<(String, f64, f64, String, Option<String>)> = stmt
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
    table.set_header(vec!["Pattern", "Amount", "Tolerance", "Category", "Note"]);
    for (pattern, amount, tolerance, category, note) in &rules {
        table.add_row(vec![
            Cell::new(pattern),
            Cell::new(format!("{amount:.2}")),
            Cell::new(format!("{tolerance:.2}")),
            Cell::new(category),
            Cell::new(note.as_deref().unwrap_or("")),
        ]);
    }
    println!("Amount rules\n{table}");
    Ok(())
}

pub fn add_merchant(pattern: &str, category: &str, confidence: i64) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let category_id = category_id_by_key(&conn, category)?;
    conn.execute(
        "INSERT INTO merchant_mappings (pattern, category_id, confidence) VALUES (?1, ?2, ?3)",
        rusqlite::params![pattern.to_uppercase(), category_id, confidence],
    )?;
    println!("Added merchant mapping: {} -> {category}", pattern.to_uppercase());
    Ok(())
}

pub fn add_amount(
    pattern: &str,
    amount: f64,
    tolerance: f64,
    category: &str,
    note: Option<&str>,
) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let category_id = category_id_by_key(&conn, category)?;
    conn.execute(
        "INSERT INTO amount_rules (pattern, amount, tolerance, category_id, note) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![pattern.to_uppercase(), amount, tolerance, category_id, note],
    )?;
    println!("Added amount rule: {} at {amount:.2} -> {category}", pattern.to_uppercase());
    Ok(())
}
