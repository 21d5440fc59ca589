use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{PennyError, Result};
use crate::models::Category;

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, key, display_name, parent_id, is_income, is_recurring \
         FROM categories ORDER BY COALESCE(parent_id, id), parent_id IS NOT NULL, key",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                key: row.get(1)?,
                display_name: row.get(2)?,
                parent_id: row.get(3)?,
                is_income: row.get::<_, i64>(4)? != 0,
                is_recurring: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn category_id_by_key(conn: &Connection, key: &str) -> Result<i64> {
    conn.query_row("SELECT id FROM categories WHERE key = ?1", [key], |r| r.get(0))
        .optional()?
        .ok_or_else(|| PennyError::UnknownCategory(key.to_string()))
}

pub fn add_category(
    conn: &Connection,
    key: &str,
    display_name: &str,
    parent_key: Option<&str>,
    is_income: bool,
    is_recurring: bool,
) -> Result<i64> {
    let parent_id = match parent_key {
        Some(pk) => {
            let id = category_id_by_key(conn, pk)?;
            // Keep the taxonomy two levels deep.
            let grandparent: Option<i64> = conn.query_row(
                "SELECT parent_id FROM categories WHERE id = ?1",
                [id],
                |r| r.get(0),
            )?;
            if grandparent.is_some() {
                return Err(PennyError::InvalidState(format!(
                    "'{pk}' is a leaf category and cannot have children"
                )));
            }
            Some(id)
        }
        None => None,
    };
    conn.execute(
        "INSERT INTO categories (key, display_name, parent_id, is_income, is_recurring) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![key, display_name, parent_id, is_income, is_recurring],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The target category plus, for a group, all of its children.
fn family_ids(conn: &Connection, category_id: i64) -> Result<Vec<i64>> {
    let mut ids = vec![category_id];
    let mut stmt = conn.prepare("SELECT id FROM categories WHERE parent_id = ?1")?;
    let children = stmt
        .query_map([category_id], |r| r.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    ids.extend(children);
    Ok(ids)
}

fn reference_count(conn: &Connection, category_id: i64) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT \
           (SELECT count(*) FROM transactions \
            WHERE category_id = ?1 OR predicted_category_id = ?1) \
         + (SELECT count(*) FROM merchant_mappings WHERE category_id = ?1) \
         + (SELECT count(*) FROM amount_rules WHERE category_id = ?1)",
        [category_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Deletion is refused while anything references the category or, for a
/// group, any of its children.
pub fn delete_category(conn: &Connection, key: &str) -> Result<()> {
    let id = category_id_by_key(conn, key)?;
    for member in family_ids(conn, id)? {
        if reference_count(conn, member)? > 0 {
            return Err(PennyError::CategoryInUse(key.to_string()));
        }
    }
    conn.execute("DELETE FROM categories WHERE parent_id = ?1", [id])?;
    conn.execute("DELETE FROM categories WHERE id = ?1", [id])?;
    info!(category = key, "deleted category");
    Ok(())
}

/// Reassign every reference from one leaf category to another, then delete
/// the source.
pub fn merge_categories(conn: &Connection, from_key: &str, into_key: &str) -> Result<()> {
    if from_key == into_key {
        return Err(PennyError::InvalidState(
            "cannot merge a category into itself".to_string(),
        ));
    }
    let from_id = category_id_by_key(conn, from_key)?;
    let into_id = category_id_by_key(conn, into_key)?;

    let has_children: bool = conn
        .prepare("SELECT 1 FROM categories WHERE parent_id = ?1")?
        .exists([from_id])?;
    if has_children {
        return Err(PennyError::InvalidState(format!(
            "'{from_key}' is a group; merge its children individually"
        )));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE transactions SET category_id = ?1 WHERE category_id = ?2",
        [into_id, from_id],
    )?;
    tx.execute(
        "UPDATE transactions SET predicted_category_id = ?1 WHERE predicted_category_id = ?2",
        [into_id, from_id],
    )?;
    tx.execute(
        "UPDATE merchant_mappings SET category_id = ?1 WHERE category_id = ?2",
        [into_id, from_id],
    )?;
    tx.execute(
        "UPDATE amount_rules SET category_id = ?1 WHERE category_id = ?2",
        [into_id, from_id],
    )?;
    tx.execute("DELETE FROM categories WHERE id = ?1", [from_id])?;
    tx.commit()?;
    info!(from = from_key, into = into_key, "merged categories");
    Ok(())
}
