use colored::Colorize;
use rusqlite::Connection;

use crate::classifier::{AnthropicClassifier, Classifier};
use crate::db::get_connection;
use crate::error::{PennyError, Result};
use crate::feed::HttpFeed;
use crate::settings::{db_path, Settings};
use crate::sync::{sync_account, sync_all, SyncGate, SyncOutcome};

pub(crate) fn build_feed(settings: &Settings) -> Result<HttpFeed> {
    let secret = settings.feed_secret().ok_or_else(|| {
        PennyError::Settings("PENNY_FEED_SECRET is not set".to_string())
    })?;
    if settings.feed_url.is_empty() {
        return Err(PennyError::Settings(
            "feed_url is not configured; edit settings.json".to_string(),
        ));
    }
    Ok(HttpFeed::new(
        &settings.feed_url,
        &settings.feed_client_id,
        &secret,
    ))
}

/// None when the classifier is disabled or no API key is present; the
/// cascade then stops after tier 2.
pub(crate) fn build_classifier(settings: &Settings) -> Option<AnthropicClassifier> {
    if !settings.classifier_enabled {
        return None;
    }
    settings
        .classifier_api_key()
        .map(|key| AnthropicClassifier::new(&key, &settings.classifier_model))
}

fn print_outcome(name: &str, outcome: &SyncOutcome) {
    println!(
        "{}: {} added, {} modified, {} removed",
        name.bold(),
        outcome.added,
        outcome.modified,
        outcome.removed
    );
}

pub fn run(account: Option<&str>, settings: &Settings) -> Result<()> {
    let conn = get_connection(&db_path())?;
    let feed = build_feed(settings)?;
    let classifier = build_classifier(settings);
    let classifier_ref = classifier.as_ref().map(|c| c as &dyn Classifier);
    let gate = SyncGate::new();
    let threshold = settings.auto_confirm_threshold;

    match account {
        Some(name) => {
            let account_id = lookup_account(&conn, name)?;
            let outcome = sync_account(
                &conn,
                &feed,
                classifier_ref,
                &gate,
                account_id,
                "manual",
                threshold,
            )?;
            print_outcome(name, &outcome);
        }
        None => {
            let results = sync_all(&conn, &feed, classifier_ref, &gate, "manual", threshold)?;
            if results.is_empty() {
                println!("No connected accounts. Run `penny accounts link` first.");
                return Ok(());
            }
            let mut failures = 0usize;
            for entry in &results {
                match &entry.result {
                    Ok(outcome) => print_outcome(&entry.name, outcome),
                    Err(e) => {
                        failures += 1;
                        println!("{}: {}", entry.name.bold(), e.to_string().red());
                    }
                }
            }
            if failures > 0 {
                return Err(PennyError::Other(format!(
                    "{failures} account(s) failed to sync"
                )));
            }
        }
    }
    Ok(())
}

fn lookup_account(conn: &Connection, name: &str) -> Result<i64> {
    use rusqlite::OptionalExtension;
    conn.query_row("SELECT id FROM accounts WHERE name = ?1", [name], |r| r.get(0))
        .optional()?
        .ok_or_else(|| PennyError::UnknownAccount(name.to_string()))
}
