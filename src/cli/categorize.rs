use colored::Colorize;

use crate::cascade::{batch_categorize, clear_predictions};
use crate::classifier::Classifier;
use crate::db::get_connection;
use crate::error::Result;
use crate::settings::{db_path, Settings};

pub fn run(limit: usize, clear: bool, settings: &Settings) -> Result<()> {
    let conn = get_connection(&db_path())?;

    if clear {
        let cleared = clear_predictions(&conn)?;
        println!("Cleared predictions on {cleared} transactions.");
        return Ok(());
    }

    let classifier = super::sync::build_classifier(settings);
    let classifier_ref = classifier.as_ref().map(|c| c as &dyn Classifier);
    let stats = batch_categorize(
        &conn,
        classifier_ref,
        settings.auto_confirm_threshold,
        limit,
    )?;

    if stats.total_eligible == 0 {
        println!("Nothing to categorize.");
        return Ok(());
    }
    println!(
        "Processed {} of {} eligible transactions:",
        stats.processed, stats.total_eligible
    );
    println!(
        "  {} auto-staged ({} amount rules, {} merchant mappings)",
        stats.auto_staged.to_string().green(),
        stats.amount_rule,
        stats.merchant_map
    );
    println!("  {} predicted ({} via fallback)", stats.predicted, stats.ai);
    if stats.unmatched > 0 {
        println!("  {} unmatched", stats.unmatched.to_string().yellow());
    }
    if stats.auto_staged > 0 {
        println!("Run `penny review commit` to confirm staged transactions.");
    }
    Ok(())
}
