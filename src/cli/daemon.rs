use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::classifier::Classifier;
use crate::db::get_connection;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::settings::{db_path, Settings};
use crate::sync::{sync_all, SyncGate};

/// Foreground sync loop. Runs until the process is killed.
pub fn run(settings: &Settings) -> Result<()> {
    let feed = super::sync::build_feed(settings)?;
    let classifier = super::sync::build_classifier(settings);
    let interval = Duration::from_secs(settings.sync_interval_minutes.max(1) * 60);
    let threshold = settings.auto_confirm_threshold;
    let db = db_path();

    println!(
        "Syncing every {} minutes. Ctrl-C to stop.",
        settings.sync_interval_minutes.max(1)
    );

    let mut scheduler = Scheduler::new();
    scheduler.add_job("sync-all", interval, move || {
        let run = || -> Result<()> {
            let conn = get_connection(&db)?;
            let gate = SyncGate::new();
            let classifier_ref = classifier.as_ref().map(|c| c as &dyn Classifier);
            sync_all(&conn, &feed, classifier_ref, &gate, "scheduled", threshold)?;
            Ok(())
        };
        if let Err(e) = run() {
            error!(error = %e, "scheduled sync failed");
        }
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    scheduler.run(shutdown);
    Ok(())
}
