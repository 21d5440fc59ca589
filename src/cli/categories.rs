use comfy_table::{Cell, Table};

use crate::categories::{add_category, delete_category, list_categories, merge_categories};
use crate::db::get_connection;
use crate::error::Result;
use crate::settings::db_path;

pub fn list() -> Result<()> {
    let conn = get_connection(&db_path())?;
    let cats = list_categories(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["Key", "Name", "Flags"]);
    for cat in &cats {
        let key = if cat.parent_id.is_some() {
            format!("  {}", cat.key)
        } else {
            cat.key.clone()
        };
        let mut flags = Vec::new();
        if cat.is_income {
            flags.push("income");
        }
        if cat.is_recurring {
            flags.push("recurring");
        }
        table.add_row(vec![
            Cell::new(key),
            Cell::new(&cat.display_name),
            Cell::new(flags.join(", ")),
        ]);
    }
    println!("Categories\n{table}");
    Ok(())
}

pub fn add(
    key: &str,
    name: &str,
    parent: Option<&str>,
    income: bool,
    recurring: bool,
) -> Result<()> {
    let conn = get_connection(&db_path())?;
    add_category(&conn, key, name, parent, income, recurring)?;
    println!("Added category: {key}");
    Ok(())
}

pub fn delete(key: &str) -> Result<()> {
    let conn = get_connection(&db_path())?;
    delete_category(&conn, key)?;
    println!("Deleted category: {key}");
    Ok(())
}

pub fn merge(from: &str, into: &str) -> Result<()> {
    let conn = get_connection(&db_path())?;
    merge_categories(&conn, from, into)?;
    println!("Merged {from} into {into}.");
    Ok(())
}
