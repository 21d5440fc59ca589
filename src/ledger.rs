use rusqlite::Connection;

use crate::error::Result;
use crate::models::ReviewStatus;

/// Row shape for listing commands, joined with account and category names.
#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub id: i64,
    pub date: String,
    pub description: String,
    pub amount: f64,
    pub account_name: String,
    pub category_key: Option<String>,
    pub predicted_key: Option<String>,
    pub status: ReviewStatus,
    pub tier: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Default)]
pub struct LedgerFilter<'a> {
    pub status: Option<ReviewStatus>,
    pub account: Option<&'a str>,
    pub category: Option<&'a str>,
    pub from_date: Option<&'a str>,
    pub to_date: Option<&'a str>,
    pub search: Option<&'a str>,
    pub limit: Option<usize>,
}

pub fn list_transactions(conn: &Connection, filter: &LedgerFilter) -> Result<Vec<LedgerRow>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    if let Some(status) = filter.status {
        params.push(status.as_str().to_string());
        clauses.push(format!("t.status = ?{}", params.len()));
    }
    if let Some(account) = filter.account {
        params.push(account.to_string());
        clauses.push(format!("a.name = ?{}", params.len()));
    }
    if let Some(category) = filter.category {
        params.push(category.to_string());
        clauses.push(format!(
            "(c.key = ?{n} OR p.key = ?{n})",
            n = params.len()
        ));
    }
    if let Some(from) = filter.from_date {
        params.push(from.to_string());
        clauses.push(format!("t.date >= ?{}", params.len()));
    }
    if let Some(to) = filter.to_date {
        params.push(to.to_string());
        clauses.push(format!("t.date <= ?{}", params.len()));
    }
    if let Some(search) = filter.search {
        params.push(format!("%{}%", search.to_uppercase()));
        clauses.push(format!(
            "(UPPER(t.description) LIKE ?{n} OR UPPER(COALESCE(t.merchant,'')) LIKE ?{n})",
            n = params.len()
        ));
    }

    let where_clause = if clauses.is_empty() {
        String::from("1=1")
    } else {
        clauses.join(" AND ")
    };
    let limit = filter.limit.unwrap_or(200);
    let sql = format!(
        "SELECT t.id, t.date, t.description, t.amount, a.name, \
                c.key, p.key, t.status, t.tier, t.confidence \
         FROM transactions t \
         JOIN accounts a ON t.account_id = a.id \
         LEFT JOIN categories c ON t.category_id = c.id \
         LEFT JOIN categories p ON t.predicted_category_id = p.id \
         WHERE {where_clause} ORDER BY t.date DESC, t.id DESC LIMIT {limit}"
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_values: Vec<&dyn rusqlite::types::ToSql> = params
        .iter()
        .map(|p| p as &dyn rusqlite::types::ToSql)
        .collect();
    let rows = stmt.query_map(param_values.as_slice(), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, Option<String>>(8)?,
            row.get::<_, Option<f64>>(9)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, date, description, amount, account_name, category_key, predicted_key, status, tier, confidence) = row?;
        out.push(LedgerRow {
            id,
            date,
            description,
            amount,
            account_name,
            category_key,
            predicted_key,
            status: ReviewStatus::parse(&status)?,
            tier,
            confidence,
        });
    }
    Ok(out)
}
