use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use rusqlite::{Connection, OptionalExtension};
use tracing::{error, info, warn};

use crate::classifier::Classifier;
use crate::error::{PennyError, Result};
use crate::feed::{FeedError, TransactionFeed};
use crate::resolver::{apply_removal, resolve_incoming};

/// Automatic restarts allowed after a cursor-invalidating feed mutation.
const MAX_MUTATION_RETRIES: u32 = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

/// Advisory per-account gate: a manual sync and the scheduled sync must not
/// race on the same cursor. Owned by the caller and shared by reference —
/// not process-global state.
#[derive(Default)]
pub struct SyncGate {
    in_flight: Mutex<HashSet<i64>>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, account_id: i64) -> Result<SyncPermit<'_>> {
        let mut set = self.in_flight.lock().unwrap();
        if !set.insert(account_id) {
            return Err(PennyError::SyncInProgress(account_id));
        }
        Ok(SyncPermit { gate: self, account_id })
    }
}

pub struct SyncPermit<'a> {
    gate: &'a SyncGate,
    account_id: i64,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.lock().unwrap().remove(&self.account_id);
    }
}

/// Incremental sync for one account: pull pages of changes from the feed,
/// reconcile each into the ledger, and persist the cursor after every page
/// so a mid-sync failure resumes near where it left off. Every invocation,
/// success or failure, lands in sync_log.
pub fn sync_account(
    conn: &Connection,
    feed: &dyn TransactionFeed,
    classifier: Option<&dyn Classifier>,
    gate: &SyncGate,
    account_id: i64,
    trigger: &str,
    threshold: i64,
) -> Result<SyncOutcome> {
    let _permit = gate.begin(account_id)?;
    let started = Instant::now();

    let result = run_sync(conn, feed, classifier, account_id, threshold);
    let duration_ms = started.elapsed().as_millis() as i64;

    match &result {
        Ok(outcome) => {
            conn.execute(
                "UPDATE accounts SET last_synced_at = datetime('now'), last_sync_error = NULL \
                 WHERE id = ?1",
                [account_id],
            )?;
            record_sync_log(conn, account_id, trigger, "ok", *outcome, None, duration_ms)?;
            info!(
                account_id,
                added = outcome.added,
                modified = outcome.modified,
                removed = outcome.removed,
                trigger,
                "sync complete"
            );
        }
        Err(e) => {
            let message = e.to_string();
            conn.execute(
                "UPDATE accounts SET last_sync_error = ?1 WHERE id = ?2",
                rusqlite::params![&message, account_id],
            )?;
            if matches!(e, PennyError::LoginRequired(_)) {
                conn.execute(
                    "UPDATE accounts SET connection_status = 'login_required' WHERE id = ?1",
                    [account_id],
                )?;
            }
            record_sync_log(
                conn,
                account_id,
                trigger,
                "error",
                SyncOutcome::default(),
                Some(&message),
                duration_ms,
            )?;
            error!(account_id, error = %message, trigger, "sync failed");
        }
    }

    result
}

fn run_sync(
    conn: &Connection,
    feed: &dyn TransactionFeed,
    classifier: Option<&dyn Classifier>,
    account_id: i64,
    threshold: i64,
) -> Result<SyncOutcome> {
    let (access_token, account_filter): (Option<String>, Option<String>) = conn
        .query_row(
            "SELECT access_token, external_account_id FROM accounts WHERE id = ?1",
            [account_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| PennyError::UnknownAccount(account_id.to_string()))?;
    let access_token = access_token
        .ok_or_else(|| PennyError::Feed(format!("account {account_id} is not linked")))?;

    let mut cursor: String = conn
        .query_row("SELECT cursor FROM accounts WHERE id = ?1", [account_id], |r| {
            r.get::<_, Option<String>>(0)
        })?
        .unwrap_or_default();

    let mut outcome = SyncOutcome::default();
    let mut retries = 0u32;
    let mut page_no = 0u32;

    loop {
        page_no += 1;
        let page = match feed.sync_page(&access_token, &cursor, account_filter.as_deref()) {
            Ok(page) => page,
            Err(FeedError::MutationConflict) => {
                retries += 1;
                if retries > MAX_MUTATION_RETRIES {
                    return Err(PennyError::Feed(format!(
                        "cursor invalidated {retries} times; giving up"
                    )));
                }
                warn!(account_id, retries, "feed mutated during pagination; restarting sync");
                // Restart the whole sync from an empty cursor. Rows already
                // ingested are re-pointed by the resolver, not duplicated.
                cursor.clear();
                conn.execute(
                    "UPDATE accounts SET cursor = '' WHERE id = ?1",
                    [account_id],
                )?;
                outcome = SyncOutcome::default();
                page_no = 0;
                continue;
            }
            Err(FeedError::LoginRequired(msg)) => return Err(PennyError::LoginRequired(msg)),
            Err(e) => return Err(PennyError::Feed(e.to_string())),
        };

        // One write transaction per page: keeps the resume point current and
        // bounds how long concurrent review actions wait on the write lock.
        let tx = conn.unchecked_transaction()?;
        for txn in &page.added {
            if resolve_incoming(&tx, account_id, txn, classifier, threshold)?.is_add() {
                outcome.added += 1;
            } else {
                outcome.modified += 1;
            }
        }
        for txn in &page.modified {
            resolve_incoming(&tx, account_id, txn, classifier, threshold)?;
            outcome.modified += 1;
        }
        for removal in &page.removed {
            if apply_removal(&tx, &removal.external_id)? {
                outcome.removed += 1;
            }
        }
        cursor = page.next_cursor.clone();
        tx.execute(
            "UPDATE accounts SET cursor = ?1 WHERE id = ?2",
            rusqlite::params![&cursor, account_id],
        )?;
        tx.commit()?;

        info!(
            account_id,
            page = page_no,
            added = page.added.len(),
            modified = page.modified.len(),
            removed = page.removed.len(),
            has_more = page.has_more,
            "synced page"
        );

        if !page.has_more {
            break;
        }
    }

    Ok(outcome)
}

fn record_sync_log(
    conn: &Connection,
    account_id: i64,
    trigger: &str,
    status: &str,
    outcome: SyncOutcome,
    error_message: Option<&str>,
    duration_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_log (account_id, trigger_source, status, added, modified, removed, \
         error_message, duration_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            account_id,
            trigger,
            status,
            outcome.added as i64,
            outcome.modified as i64,
            outcome.removed as i64,
            error_message,
            duration_ms,
        ],
    )?;
    Ok(())
}

pub struct AccountSync {
    pub name: String,
    pub result: Result<SyncOutcome>,
}

/// Sync every connected account sequentially. One account's failure is
/// recorded and does not block the rest.
pub fn sync_all(
    conn: &Connection,
    feed: &dyn TransactionFeed,
    classifier: Option<&dyn Classifier>,
    gate: &SyncGate,
    trigger: &str,
    threshold: i64,
) -> Result<Vec<AccountSync>> {
    let mut stmt = conn.prepare(
        "SELECT id, name FROM accounts WHERE connection_status = 'connected' ORDER BY id",
    )?;
    let accounts: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut results = Vec::with_capacity(accounts.len());
    for (account_id, name) in accounts {
        let result = sync_account(conn, feed, classifier, gate, account_id, trigger, threshold);
        if let Err(e) = &result {
            warn!(account = %name, error = %e, "account sync failed; continuing");
        }
        results.push(AccountSync { name, result });
    }
    Ok(results)
}

#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub account_name: String,
    pub trigger: String,
    pub status: String,
    pub added: i64,
    pub modified: i64,
    pub removed: i64,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub started_at: String,
}

pub fn sync_history(
    conn: &Connection,
    account_id: Option<i64>,
    limit: usize,
) -> Result<Vec<SyncLogEntry>> {
    let mut sql = String::from(
        "SELECT a.name, l.trigger_source, l.status, l.added, l.modified, \
         l.removed, l.error_message, l.duration_ms, l.started_at \
         FROM sync_log l JOIN accounts a ON l.account_id = a.id",
    );
    if account_id.is_some() {
        sql.push_str(" WHERE l.account_id = ?1");
    }
    sql.push_str(" ORDER BY l.id DESC LIMIT ");
    sql.push_str(&limit.to_string());

    let mut stmt = conn.prepare(&sql)?;
    let map_row = |row: &rusqlite::Row<'_>| {
        Ok(SyncLogEntry {
            account_name: row.get(0)?,
            trigger: row.get(1)?,
            status: row.get(2)?,
            added: row.get(3)?,
            modified: row.get(4)?,
            removed: row.get(5)?,
            error_message: row.get(6)?,
            duration_ms: row.get(7)?,
            started_at: row.get(8)?,
        })
    };
    let rows = if let Some(id) = account_id {
        stmt.query_map([id], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?
    } else {
        stmt.query_map([], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    Ok(rows)
}
